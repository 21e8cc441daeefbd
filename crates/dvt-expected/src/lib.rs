//! Expected-set resolution.
//!
//! Pure, deterministic: the declared sensor cardinality fixes the expected
//! metrics; the expected alarms may be reshaped during a session by
//! [`adapt`] as evidence accumulates.

use serde::{Deserialize, Serialize};
use std::fmt;

mod adapt;
pub mod ids;

pub use adapt::{adapt, Adaptation, AlarmSetChange};
pub use ids::{flags_for_alarm, is_alarm_id};

// ---------------------------------------------------------------------------
// Cardinality
// ---------------------------------------------------------------------------

/// Number of load sensors physically installed on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Cardinality {
    Three,
    Six,
    Twelve,
}

impl Cardinality {
    pub fn as_u8(&self) -> u8 {
        match self {
            Cardinality::Three => 3,
            Cardinality::Six => 6,
            Cardinality::Twelve => 12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsupportedCardinality(pub u8);

impl fmt::Display for UnsupportedCardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported sensor count {} (expected 3, 6 or 12)", self.0)
    }
}

impl std::error::Error for UnsupportedCardinality {}

impl TryFrom<u8> for Cardinality {
    type Error = UnsupportedCardinality;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            3 => Ok(Cardinality::Three),
            6 => Ok(Cardinality::Six),
            12 => Ok(Cardinality::Twelve),
            other => Err(UnsupportedCardinality(other)),
        }
    }
}

impl From<Cardinality> for u8 {
    fn from(c: Cardinality) -> u8 {
        c.as_u8()
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

// ---------------------------------------------------------------------------
// Alarm set
// ---------------------------------------------------------------------------

/// Wiring side of a half-populated (3-sensor) device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => f.write_str("A"),
            Side::B => f.write_str("B"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedAlarmSet {
    /// Not adaptable.
    Fixed(Vec<String>),
    /// Two disjoint candidates; `active` is the side currently expected.
    ThreeSensorAmbiguous {
        side_a: Vec<String>,
        side_b: Vec<String>,
        active: Side,
    },
    /// `primary` is always expected; `adopted` holds the acceptable additions
    /// seen so far, in the order of `acceptable`.
    SixSensorExtensible {
        primary: Vec<String>,
        acceptable: Vec<String>,
        adopted: Vec<String>,
    },
}

impl ExpectedAlarmSet {
    /// Ids currently expected, in canonical order.
    pub fn ids(&self) -> Vec<&str> {
        match self {
            ExpectedAlarmSet::Fixed(ids) => ids.iter().map(String::as_str).collect(),
            ExpectedAlarmSet::ThreeSensorAmbiguous {
                side_a,
                side_b,
                active,
            } => match active {
                Side::A => side_a.iter().map(String::as_str).collect(),
                Side::B => side_b.iter().map(String::as_str).collect(),
            },
            ExpectedAlarmSet::SixSensorExtensible {
                primary, adopted, ..
            } => primary
                .iter()
                .chain(adopted.iter())
                .map(String::as_str)
                .collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids().contains(&id)
    }

    pub fn len(&self) -> usize {
        match self {
            ExpectedAlarmSet::Fixed(ids) => ids.len(),
            ExpectedAlarmSet::ThreeSensorAmbiguous {
                side_a,
                side_b,
                active,
            } => match active {
                Side::A => side_a.len(),
                Side::B => side_b.len(),
            },
            ExpectedAlarmSet::SixSensorExtensible {
                primary, adopted, ..
            } => primary.len() + adopted.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_adaptable(&self) -> bool {
        !matches!(self, ExpectedAlarmSet::Fixed(_))
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedSet {
    pub cardinality: Cardinality,
    /// Weather, junction box, then load metrics.
    pub metrics: Vec<String>,
    pub alarms: ExpectedAlarmSet,
}

impl ExpectedSet {
    pub fn is_expected_metric(&self, id: &str) -> bool {
        self.metrics.iter().any(|m| m == id)
    }
}

pub fn resolve(cardinality: Cardinality) -> ExpectedSet {
    let mut metrics: Vec<String> = ids::WEATHER_METRICS
        .iter()
        .chain(ids::JUNCTION_BOX_METRICS.iter())
        .map(|s| s.to_string())
        .collect();
    metrics.extend(ids::load_metrics(cardinality));

    let alarms = match cardinality {
        Cardinality::Three => ExpectedAlarmSet::ThreeSensorAmbiguous {
            side_a: ids::alarm_ids(&[32, 36, 40]),
            side_b: ids::alarm_ids(&[34, 38, 42]),
            active: Side::A,
        },
        Cardinality::Six => ExpectedAlarmSet::SixSensorExtensible {
            primary: ids::alarm_ids(&[32, 34, 36, 38, 40, 42]),
            acceptable: ids::alarm_ids(&[33, 37, 41]),
            adopted: Vec::new(),
        },
        Cardinality::Twelve => ExpectedAlarmSet::Fixed(ids::alarm_ids(&[
            32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43,
        ])),
    };

    ExpectedSet {
        cardinality,
        metrics,
        alarms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_counts_per_cardinality() {
        assert_eq!(resolve(Cardinality::Three).metrics.len(), 13);
        assert_eq!(resolve(Cardinality::Six).metrics.len(), 16);
        assert_eq!(resolve(Cardinality::Twelve).metrics.len(), 22);
    }

    #[test]
    fn alarm_shapes_per_cardinality() {
        let three = resolve(Cardinality::Three).alarms;
        assert!(three.is_adaptable());
        assert_eq!(
            three.ids(),
            vec![
                "EGM_OUT_SENS_23_VAR_32",
                "EGM_OUT_SENS_23_VAR_36",
                "EGM_OUT_SENS_23_VAR_40"
            ]
        );

        let six = resolve(Cardinality::Six).alarms;
        assert_eq!(six.len(), 6);
        assert!(!six.contains("EGM_OUT_SENS_23_VAR_33"));

        let twelve = resolve(Cardinality::Twelve).alarms;
        assert!(!twelve.is_adaptable());
        assert_eq!(twelve.len(), 12);
    }

    #[test]
    fn cardinality_parses_only_supported_counts() {
        assert_eq!(Cardinality::try_from(6), Ok(Cardinality::Six));
        assert_eq!(Cardinality::try_from(4), Err(UnsupportedCardinality(4)));
        assert_eq!(u8::from(Cardinality::Twelve), 12);
    }
}
