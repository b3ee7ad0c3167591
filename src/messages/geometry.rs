//! Spatial value types carried inside catalogue payloads.

use serde::{Deserialize, Serialize};

/// Planning-space point. Upper-case `X/Y/Z` keys are accepted on decode.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Vector3 {
    #[serde(alias = "X")]
    pub x: f64,
    #[serde(alias = "Y")]
    pub y: f64,
    #[serde(alias = "Z")]
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Position of a patient sensor tag (PST) in tracker space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationVector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl TranslationVector {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A detected or selected airway lumen in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Lumen {
    pub x: i32,
    pub y: i32,
    pub radius: i32,
    /// Frame id the lumen was detected in.
    pub fid: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector3_accepts_upper_case_keys() {
        let v: Vector3 = serde_json::from_str(r#"{"X": 1.0, "Y": 2.0, "Z": 3.0}"#).unwrap();
        assert_eq!(v, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(
            serde_json::to_value(v).unwrap(),
            serde_json::json!({"x": 1.0, "y": 2.0, "z": 3.0})
        );
    }

    #[test]
    fn test_missing_fields_default_to_zero() {
        let t: TranslationVector = serde_json::from_str(r#"{"y": 4.5}"#).unwrap();
        assert_eq!(t, TranslationVector::new(0.0, 4.5, 0.0));
        let l: Lumen = serde_json::from_str("{}").unwrap();
        assert_eq!(l, Lumen::default());
    }
}
