//! Metric and alarm identifiers reported by the device firmware.

use crate::Cardinality;

pub const WEATHER_METRICS: [&str; 5] = [
    "EIT_WINDVEL",
    "EIT_WINDDIR1",
    "EIT_HUMIDITY",
    "EIT_TEMPERATURE",
    "EIT_PIROMETER",
];

pub const JUNCTION_BOX_METRICS: [&str; 5] = [
    "EIT_ACCEL_X",
    "EIT_ACCEL_Y",
    "EIT_ACCEL_Z",
    "EIT_INCLIN_X",
    "EIT_INCLIN_Y",
];

/// Substring shared by every load-sensor alarm id.
pub const ALARM_MARKER: &str = "EGM_OUT_SENS";

const LOAD_POSITIONS: [&str; 3] = ["04", "08", "12"];

pub fn is_alarm_id(id: &str) -> bool {
    id.contains(ALARM_MARKER)
}

pub fn alarm_id(var: u8) -> String {
    format!("EGM_OUT_SENS_23_VAR_{var}")
}

pub fn alarm_ids(vars: &[u8]) -> Vec<String> {
    vars.iter().copied().map(alarm_id).collect()
}

/// Load metrics shaped by cardinality: positions x sides x lines.
pub fn load_metrics(cardinality: Cardinality) -> Vec<String> {
    let (sides, lines): (&[&str], &[&str]) = match cardinality {
        Cardinality::Three => (&["A"], &["L1"]),
        Cardinality::Six => (&["A", "B"], &["L1"]),
        Cardinality::Twelve => (&["A", "B"], &["L1", "L2"]),
    };
    let mut out = Vec::with_capacity(LOAD_POSITIONS.len() * sides.len() * lines.len());
    for pos in LOAD_POSITIONS {
        for side in sides {
            for line in lines {
                out.push(format!("EIT_LOAD_{pos}_{side}_{line}"));
            }
        }
    }
    out
}

/// (alarm var, first flag var). Each alarm is backed by two consecutive
/// calculated flags.
const SENSOR_FLAG_MAP: [(u8, u8); 12] = [
    (36, 13),
    (38, 15),
    (40, 17),
    (42, 19),
    (32, 21),
    (34, 23),
    (37, 25),
    (39, 27),
    (41, 29),
    (43, 31),
    (33, 33),
    (35, 35),
];

/// The calculated boolean flags that back an alarm id in the flag store.
pub fn flags_for_alarm(alarm: &str) -> Option<[String; 2]> {
    let var: u8 = alarm.strip_prefix("EGM_OUT_SENS_23_VAR_")?.parse().ok()?;
    let (_, first) = SENSOR_FLAG_MAP.iter().find(|(a, _)| *a == var)?;
    Some([
        format!("EAM_OUT_ALG_19_VAR_{first}"),
        format!("EAM_OUT_ALG_19_VAR_{}", first + 1),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_metric_counts_follow_cardinality() {
        assert_eq!(load_metrics(Cardinality::Three).len(), 3);
        assert_eq!(load_metrics(Cardinality::Six).len(), 6);
        assert_eq!(load_metrics(Cardinality::Twelve).len(), 12);
        assert_eq!(
            load_metrics(Cardinality::Three),
            vec!["EIT_LOAD_04_A_L1", "EIT_LOAD_08_A_L1", "EIT_LOAD_12_A_L1"]
        );
        assert!(load_metrics(Cardinality::Twelve).contains(&"EIT_LOAD_12_B_L2".to_string()));
    }

    #[test]
    fn flags_map_to_consecutive_pairs() {
        assert_eq!(
            flags_for_alarm("EGM_OUT_SENS_23_VAR_36"),
            Some([
                "EAM_OUT_ALG_19_VAR_13".to_string(),
                "EAM_OUT_ALG_19_VAR_14".to_string()
            ])
        );
        assert_eq!(
            flags_for_alarm("EGM_OUT_SENS_23_VAR_33").map(|f| f[1].clone()),
            Some("EAM_OUT_ALG_19_VAR_34".to_string())
        );
        assert_eq!(flags_for_alarm("EGM_OUT_SENS_23_VAR_99"), None);
        assert_eq!(flags_for_alarm("EIT_WINDVEL"), None);
    }

    #[test]
    fn alarm_marker_detection() {
        assert!(is_alarm_id("EGM_OUT_SENS_23_VAR_30"));
        assert!(!is_alarm_id("EAM_OUT_ALG_19_VAR_13"));
    }
}
