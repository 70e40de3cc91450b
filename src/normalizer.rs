// ABOUTME: Pure normalization of raw upstream activity payloads into canonical shape
// ABOUTME: Sport classification, defensive numeric coercion, and accept/reject decisions
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Normalizer: raw upstream payload → canonical business shape.
//!
//! Rejections are always machine-readable
//! (`sport_type_not_allowed:<TYPE>`, `distance_non_positive`,
//! `duration_non_positive`), never a bare boolean. Numeric fields may
//! arrive as plain numbers, unit-wrapped objects, duration-like objects
//! or strings, or may be missing entirely; every shape degrades to a
//! safe zero default instead of failing.

use crate::models::SportType;
use crate::providers::RawActivity;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Canonical activity shape accepted for persistence
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedActivity {
    /// Canonical sport classification
    pub sport_type: SportType,
    /// Activity name (upstream name or a sport-derived fallback)
    pub name: String,
    /// Distance in meters
    pub distance_meters: f64,
    /// Duration in seconds
    pub duration_seconds: i64,
    /// Elevation gain in meters
    pub elevation_gain: f64,
    /// Activity start time
    pub start_time: DateTime<Utc>,
}

/// Business accept/reject decision for one raw payload
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeOutcome {
    /// Activity passes product rules
    Accepted(NormalizedActivity),
    /// Activity violates a product rule
    Rejected {
        /// Machine-readable rule identifier
        reason: String,
    },
}

/// Map an upstream activity type string to the canonical sport set
#[must_use]
pub fn map_sport_type(raw: &str) -> SportType {
    match raw.to_lowercase().as_str() {
        "run" | "virtualrun" => SportType::Run,
        "trailrun" => SportType::TrailRun,
        "ride" | "virtualride" | "gravelride" | "mountainbikeride" | "ebikeride" => SportType::Bike,
        "walk" | "hike" => SportType::Walk,
        "weighttraining" | "workout" | "crossfit" => SportType::Strength,
        _ => SportType::Other(raw.to_owned()),
    }
}

/// Coerce a possibly unit-wrapped or missing numeric field to `f64`
#[must_use]
pub fn coerce_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        // Unit-wrapped values arrive as {"value": n} or {"meters": n}
        Value::Object(map) => map
            .get("value")
            .or_else(|| map.get("meters"))
            .map_or(0.0, coerce_f64),
        _ => 0.0,
    }
}

/// Coerce a duration-like field (number, object, or `HH:MM:SS` string)
/// to whole seconds
#[must_use]
pub fn coerce_duration_seconds(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_f64().map_or(0, |secs| secs as i64),
        Value::String(s) => parse_clock_duration(s).unwrap_or_else(|| {
            s.trim().parse::<f64>().map_or(0, |secs| secs as i64)
        }),
        Value::Object(map) => map
            .get("seconds")
            .or_else(|| map.get("value"))
            .map_or(0, coerce_duration_seconds),
        _ => 0,
    }
}

/// Parse `HH:MM:SS` or `MM:SS` clock strings. Checked arithmetic:
/// an overflowing component degrades to `None` like any other
/// unparseable shape.
fn parse_clock_duration(raw: &str) -> Option<i64> {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return None;
    }
    let mut seconds = 0_i64;
    for part in &parts {
        let value = part.parse::<i64>().ok()?;
        seconds = seconds.checked_mul(60)?.checked_add(value)?;
    }
    Some(seconds)
}

/// Normalize a raw payload and decide acceptance per product rules.
///
/// Acceptance requires a supported sport type and a positive distance
/// (distance-based sports) or positive duration (duration-based
/// sports, e.g. strength work).
#[must_use]
pub fn normalize(raw: &RawActivity) -> NormalizeOutcome {
    let sport_type = raw
        .sport_type
        .as_deref()
        .map_or(SportType::Other(String::new()), map_sport_type);

    if !sport_type.is_supported() {
        return NormalizeOutcome::Rejected {
            reason: format!("sport_type_not_allowed:{}", sport_type.as_str()),
        };
    }

    let distance_meters = coerce_f64(&raw.distance);
    let mut duration_seconds = coerce_duration_seconds(&raw.moving_time);
    if duration_seconds == 0 {
        duration_seconds = coerce_duration_seconds(&raw.elapsed_time);
    }

    if sport_type.is_duration_based() {
        if duration_seconds <= 0 {
            return NormalizeOutcome::Rejected {
                reason: "duration_non_positive".to_owned(),
            };
        }
    } else if distance_meters <= 0.0 {
        return NormalizeOutcome::Rejected {
            reason: "distance_non_positive".to_owned(),
        };
    }

    let start_time = raw
        .start_date
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc));

    let name = raw
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("{} activity", sport_type.as_str()));

    NormalizeOutcome::Accepted(NormalizedActivity {
        sport_type,
        name,
        distance_meters,
        duration_seconds,
        elevation_gain: coerce_f64(&raw.total_elevation_gain),
        start_time,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_activity(payload: serde_json::Value) -> RawActivity {
        serde_json::from_value(payload).unwrap()
    }

    #[test]
    fn test_coerce_f64_known_shapes() {
        assert!((coerce_f64(&json!(8210.5)) - 8210.5).abs() < f64::EPSILON);
        assert!((coerce_f64(&json!({"value": 8210.5})) - 8210.5).abs() < f64::EPSILON);
        assert!((coerce_f64(&json!({"meters": 42.0})) - 42.0).abs() < f64::EPSILON);
        assert!((coerce_f64(&json!("123.5")) - 123.5).abs() < f64::EPSILON);
        assert!(coerce_f64(&json!(null)).abs() < f64::EPSILON);
        assert!(coerce_f64(&json!([1, 2])).abs() < f64::EPSILON);
        assert!(coerce_f64(&json!("not a number")).abs() < f64::EPSILON);
    }

    #[test]
    fn test_coerce_duration_known_shapes() {
        assert_eq!(coerce_duration_seconds(&json!(3600)), 3600);
        assert_eq!(coerce_duration_seconds(&json!(3600.9)), 3600);
        assert_eq!(coerce_duration_seconds(&json!({"seconds": 90})), 90);
        assert_eq!(coerce_duration_seconds(&json!({"value": 90})), 90);
        assert_eq!(coerce_duration_seconds(&json!("01:30:00")), 5400);
        assert_eq!(coerce_duration_seconds(&json!("45:30")), 2730);
        assert_eq!(coerce_duration_seconds(&json!("600")), 600);
        assert_eq!(coerce_duration_seconds(&json!(null)), 0);
    }

    #[test]
    fn test_coerce_duration_overflowing_clock_string_degrades_to_zero() {
        assert_eq!(
            coerce_duration_seconds(&json!("9223372036854775807:00")),
            0
        );
        assert_eq!(
            coerce_duration_seconds(&json!("1:9223372036854775807")),
            0
        );
        assert_eq!(coerce_duration_seconds(&json!("-9223372036854775808:00")), 0);
    }

    #[test]
    fn test_sport_mapping_table() {
        assert_eq!(map_sport_type("Run"), SportType::Run);
        assert_eq!(map_sport_type("TrailRun"), SportType::TrailRun);
        assert_eq!(map_sport_type("VirtualRide"), SportType::Bike);
        assert_eq!(map_sport_type("Hike"), SportType::Walk);
        assert_eq!(map_sport_type("WeightTraining"), SportType::Strength);
        assert_eq!(
            map_sport_type("Windsurf"),
            SportType::Other("Windsurf".into())
        );
    }

    #[test]
    fn test_accepts_distance_based_activity() {
        let raw = raw_activity(json!({
            "id": 555,
            "name": "Morning Run",
            "sport_type": "Run",
            "distance": 8210.5,
            "moving_time": 2545,
            "total_elevation_gain": 120.0,
            "start_date": "2025-06-01T07:00:00Z"
        }));

        match normalize(&raw) {
            NormalizeOutcome::Accepted(activity) => {
                assert_eq!(activity.sport_type, SportType::Run);
                assert_eq!(activity.name, "Morning Run");
                assert_eq!(activity.duration_seconds, 2545);
            }
            NormalizeOutcome::Rejected { reason } => panic!("Unexpected rejection: {reason}"),
        }
    }

    #[test]
    fn test_accepts_strength_work_without_distance() {
        let raw = raw_activity(json!({
            "id": 556,
            "sport_type": "WeightTraining",
            "moving_time": 1800
        }));

        match normalize(&raw) {
            NormalizeOutcome::Accepted(activity) => {
                assert_eq!(activity.sport_type, SportType::Strength);
                assert!(activity.distance_meters.abs() < f64::EPSILON);
                assert_eq!(activity.name, "STRENGTH activity");
            }
            NormalizeOutcome::Rejected { reason } => panic!("Unexpected rejection: {reason}"),
        }
    }

    #[test]
    fn test_rejects_unsupported_sport_with_named_type() {
        let raw = raw_activity(json!({"id": 557, "sport_type": "Windsurf", "distance": 5000}));
        assert_eq!(
            normalize(&raw),
            NormalizeOutcome::Rejected {
                reason: "sport_type_not_allowed:Windsurf".into()
            }
        );
    }

    #[test]
    fn test_rejects_zero_distance_run() {
        let raw = raw_activity(json!({"id": 558, "sport_type": "Run", "moving_time": 600}));
        assert_eq!(
            normalize(&raw),
            NormalizeOutcome::Rejected {
                reason: "distance_non_positive".into()
            }
        );
    }

    #[test]
    fn test_rejects_zero_duration_strength_work() {
        let raw = raw_activity(json!({"id": 559, "sport_type": "Workout"}));
        assert_eq!(
            normalize(&raw),
            NormalizeOutcome::Rejected {
                reason: "duration_non_positive".into()
            }
        );
    }

    #[test]
    fn test_elapsed_time_fallback_when_moving_time_missing() {
        let raw = raw_activity(json!({
            "id": 560,
            "sport_type": "Ride",
            "distance": 30000,
            "elapsed_time": 4200
        }));

        match normalize(&raw) {
            NormalizeOutcome::Accepted(activity) => {
                assert_eq!(activity.duration_seconds, 4200);
            }
            NormalizeOutcome::Rejected { reason } => panic!("Unexpected rejection: {reason}"),
        }
    }

    #[test]
    fn test_missing_sport_type_is_rejected_not_a_crash() {
        let raw = raw_activity(json!({"id": 561, "distance": 1000}));
        match normalize(&raw) {
            NormalizeOutcome::Rejected { reason } => {
                assert!(reason.starts_with("sport_type_not_allowed:"));
            }
            NormalizeOutcome::Accepted(_) => panic!("Expected rejection"),
        }
    }
}
