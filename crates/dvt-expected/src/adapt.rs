use std::collections::BTreeSet;

use crate::{ExpectedAlarmSet, Side};

/// How an adaptation reshaped the expected alarm set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlarmSetChange {
    Swapped { from: Side, to: Side },
    Extended { added: Vec<String> },
}

impl AlarmSetChange {
    pub fn message(&self) -> String {
        match self {
            AlarmSetChange::Swapped { to, .. } => {
                format!("detected 3-sensor configuration on side {to}")
            }
            AlarmSetChange::Extended { added } => {
                format!("added {} to the expected alarms", added.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adaptation {
    pub set: ExpectedAlarmSet,
    pub change: Option<AlarmSetChange>,
}

/// Recompute the expected alarm set from every alarm id observed so far.
///
/// - 3 sensors: a side takes over only with strictly more evidence than the
///   other; ties keep the active side.
/// - 6 sensors: observed acceptable additions are appended; never shrinks.
/// - fixed sets are returned unchanged.
pub fn adapt(set: &ExpectedAlarmSet, evidence: &BTreeSet<String>) -> Adaptation {
    match set {
        ExpectedAlarmSet::Fixed(_) => unchanged(set),

        ExpectedAlarmSet::ThreeSensorAmbiguous {
            side_a,
            side_b,
            active,
        } => {
            let count = |ids: &[String]| ids.iter().filter(|id| evidence.contains(*id)).count();
            let (a, b) = (count(side_a), count(side_b));
            let next = if a > b {
                Side::A
            } else if b > a {
                Side::B
            } else {
                *active
            };
            if next == *active {
                return unchanged(set);
            }
            Adaptation {
                set: ExpectedAlarmSet::ThreeSensorAmbiguous {
                    side_a: side_a.clone(),
                    side_b: side_b.clone(),
                    active: next,
                },
                change: Some(AlarmSetChange::Swapped {
                    from: *active,
                    to: next,
                }),
            }
        }

        ExpectedAlarmSet::SixSensorExtensible {
            primary,
            acceptable,
            adopted,
        } => {
            let added: Vec<String> = acceptable
                .iter()
                .filter(|id| evidence.contains(*id) && !adopted.contains(id))
                .cloned()
                .collect();
            if added.is_empty() {
                return unchanged(set);
            }
            // Rebuild in canonical order so the result does not depend on
            // which tick saw which addition.
            let next_adopted: Vec<String> = acceptable
                .iter()
                .filter(|id| adopted.contains(id) || added.contains(id))
                .cloned()
                .collect();
            Adaptation {
                set: ExpectedAlarmSet::SixSensorExtensible {
                    primary: primary.clone(),
                    acceptable: acceptable.clone(),
                    adopted: next_adopted,
                },
                change: Some(AlarmSetChange::Extended { added }),
            }
        }
    }
}

fn unchanged(set: &ExpectedAlarmSet) -> Adaptation {
    Adaptation {
        set: set.clone(),
        change: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ids::alarm_id, resolve, Cardinality};

    fn evidence(vars: &[u8]) -> BTreeSet<String> {
        vars.iter().copied().map(alarm_id).collect()
    }

    #[test]
    fn three_sensor_default_holds_without_evidence() {
        let set = resolve(Cardinality::Three).alarms;
        let out = adapt(&set, &BTreeSet::new());
        assert_eq!(out.set, set);
        assert!(out.change.is_none());
    }

    #[test]
    fn three_sensor_swaps_on_strict_majority() {
        let set = resolve(Cardinality::Three).alarms;
        let out = adapt(&set, &evidence(&[34]));
        assert_eq!(
            out.change,
            Some(AlarmSetChange::Swapped {
                from: Side::A,
                to: Side::B
            })
        );
        assert!(out.set.contains(&alarm_id(34)));
        assert!(!out.set.contains(&alarm_id(32)));
    }

    #[test]
    fn three_sensor_tie_keeps_active_side() {
        let set = resolve(Cardinality::Three).alarms;
        let on_b = adapt(&set, &evidence(&[34, 38])).set;
        let tied = adapt(&on_b, &evidence(&[34, 38, 32, 36]));
        assert!(tied.change.is_none());
        assert_eq!(tied.set, on_b);
    }

    #[test]
    fn six_sensor_appends_in_canonical_order() {
        let set = resolve(Cardinality::Six).alarms;
        let first = adapt(&set, &evidence(&[41]));
        assert_eq!(
            first.change,
            Some(AlarmSetChange::Extended {
                added: vec![alarm_id(41)]
            })
        );
        let second = adapt(&first.set, &evidence(&[41, 33, 39]));
        assert_eq!(
            second.change,
            Some(AlarmSetChange::Extended {
                added: vec![alarm_id(33)]
            })
        );
        let ids = second.set.ids();
        assert_eq!(ids.len(), 8);
        assert_eq!(&ids[6..], &[alarm_id(33).as_str(), alarm_id(41).as_str()]);
        // 39 is not an acceptable addition for six sensors.
        assert!(!second.set.contains(&alarm_id(39)));
    }

    #[test]
    fn fixed_set_ignores_evidence() {
        let set = resolve(Cardinality::Twelve).alarms;
        let out = adapt(&set, &evidence(&[32, 99]));
        assert_eq!(out.set, set);
        assert!(out.change.is_none());
    }
}
