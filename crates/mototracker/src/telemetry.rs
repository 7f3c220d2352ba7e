//! Telemetry frame decoding and crash classification.
//!
//! A frame is one JSON object sent by the sensor device:
//!
//! ```json
//! {
//!   "timestamp": 1700000000123,
//!   "location": {"lat": 19.43, "lng": -99.13},
//!   "sensors": {
//!     "accel": {"x": 0.1, "y": 9.8, "z": 0.3},
//!     "gyro":  {"x": 0.0, "y": 0.1, "z": 0.0},
//!     "speed": 12.5
//!   }
//! }
//! ```
//!
//! Decoding is pure and independent of persistence. Classification compares
//! the Euclidean norms of the acceleration and angular-rate vectors against
//! fixed thresholds with a strict `>`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DetectionConfig;
use crate::error::{Error, Result};

/// Default acceleration threshold.
pub const DEFAULT_ACCEL_THRESHOLD: f64 = 15.0;

/// Default angular-rate threshold.
pub const DEFAULT_GYRO_THRESHOLD: f64 = 20.0;

/// Device timestamp: epoch milliseconds, or an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameTimestamp {
    /// Milliseconds since the epoch.
    Millis(i64),
    /// Any other textual timestamp.
    Text(String),
}

impl FrameTimestamp {
    /// Epoch milliseconds, when the timestamp is numeric.
    #[must_use]
    pub fn as_millis(&self) -> Option<i64> {
        match self {
            Self::Millis(ms) => Some(*ms),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for FrameTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Millis(ms) => write!(f, "{ms}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// GPS position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

/// A three-axis reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axes {
    /// X axis.
    pub x: f64,
    /// Y axis.
    pub y: f64,
    /// Z axis.
    pub z: f64,
}

impl Axes {
    /// Euclidean norm of the vector.
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Motion sensor block of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sensors {
    /// Accelerometer, m/s².
    pub accel: Axes,
    /// Gyroscope.
    pub gyro: Axes,
    /// Device-reported speed.
    pub speed: f64,
}

/// A decoded device frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    /// Device timestamp.
    pub timestamp: FrameTimestamp,
    /// Where the reading was taken.
    pub location: Location,
    /// Motion sensors.
    pub sensors: Sensors,
}

impl TelemetryFrame {
    /// Magnitudes of the acceleration and angular-rate vectors.
    #[must_use]
    pub fn magnitudes(&self) -> Magnitudes {
        Magnitudes {
            accel: self.sensors.accel.magnitude(),
            gyro: self.sensors.gyro.magnitude(),
        }
    }
}

/// Vector magnitudes of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Magnitudes {
    /// Acceleration magnitude.
    pub accel: f64,
    /// Angular-rate magnitude.
    pub gyro: f64,
}

/// Crash thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Acceleration magnitude threshold.
    pub accel: f64,
    /// Angular-rate magnitude threshold.
    pub gyro: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            accel: DEFAULT_ACCEL_THRESHOLD,
            gyro: DEFAULT_GYRO_THRESHOLD,
        }
    }
}

impl From<&DetectionConfig> for Thresholds {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            accel: config.accel_threshold,
            gyro: config.gyro_threshold,
        }
    }
}

/// Outcome of classifying one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Nothing unusual.
    Normal,
    /// At least one magnitude strictly exceeded its threshold.
    Accident,
}

impl Classification {
    /// True for [`Classification::Accident`].
    #[must_use]
    pub fn is_accident(self) -> bool {
        matches!(self, Self::Accident)
    }
}

/// Classify a frame's magnitudes. Equal to the threshold is not an accident.
#[must_use]
pub fn classify(magnitudes: Magnitudes, thresholds: &Thresholds) -> Classification {
    if magnitudes.accel > thresholds.accel || magnitudes.gyro > thresholds.gyro {
        Classification::Accident
    } else {
        Classification::Normal
    }
}

/// Decode one frame of text.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the text is not a well-formed frame.
pub fn decode(text: &str) -> Result<TelemetryFrame> {
    let frame: TelemetryFrame =
        serde_json::from_str(text.trim()).map_err(|e| Error::decode(e.to_string()))?;

    if let FrameTimestamp::Text(s) = &frame.timestamp {
        if s.trim().is_empty() {
            return Err(Error::decode("empty timestamp"));
        }
    }

    Ok(frame)
}

/// BLAKE3 hash of a raw frame, used to drop repeated frames.
#[must_use]
pub fn frame_hash(text: &str) -> String {
    blake3::hash(text.trim().as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_accel(x: f64, y: f64, z: f64) -> String {
        format!(
            r#"{{"timestamp": 1, "location": {{"lat": 1.5, "lng": -2.5}},
               "sensors": {{"accel": {{"x": {x}, "y": {y}, "z": {z}}},
                            "gyro": {{"x": 0, "y": 0, "z": 0}}, "speed": 0}}}}"#
        )
    }

    #[test]
    fn test_magnitude_is_euclidean_norm() {
        let cases = [
            (3.0, 4.0, 0.0, 5.0),
            (0.0, 0.0, 0.0, 0.0),
            (1.0, 2.0, 2.0, 3.0),
            (-6.0, 0.0, -8.0, 10.0),
        ];
        for (x, y, z, expected) in cases {
            assert!((Axes { x, y, z }.magnitude() - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_three_four_five_is_normal() {
        let frame = decode(&frame_with_accel(3.0, 4.0, 0.0)).unwrap();
        let mags = frame.magnitudes();
        assert_eq!(mags.accel, 5.0);
        assert_eq!(classify(mags, &Thresholds::default()), Classification::Normal);
    }

    #[test]
    fn test_exact_accel_threshold_is_not_accident() {
        let frame = decode(&frame_with_accel(9.0, 12.0, 0.0)).unwrap();
        let mags = frame.magnitudes();
        assert_eq!(mags.accel, 15.0);
        assert!(!classify(mags, &Thresholds::default()).is_accident());
    }

    #[test]
    fn test_above_accel_threshold_is_accident() {
        let frame = decode(&frame_with_accel(9.0, 12.0, 1.0)).unwrap();
        assert!(frame.magnitudes().accel > 15.0);
        assert!(classify(frame.magnitudes(), &Thresholds::default()).is_accident());
    }

    #[test]
    fn test_gyro_threshold_is_strict() {
        let t = Thresholds::default();
        let at = Magnitudes {
            accel: 0.0,
            gyro: 20.0,
        };
        let above = Magnitudes {
            accel: 0.0,
            gyro: 20.000_001,
        };
        assert_eq!(classify(at, &t), Classification::Normal);
        assert_eq!(classify(above, &t), Classification::Accident);
    }

    #[test]
    fn test_custom_thresholds() {
        let config = DetectionConfig {
            accel_threshold: 4.0,
            gyro_threshold: 1.0,
        };
        let t = Thresholds::from(&config);
        let mags = Magnitudes {
            accel: 5.0,
            gyro: 0.0,
        };
        assert!(classify(mags, &t).is_accident());
    }

    #[test]
    fn test_decode_string_timestamp() {
        let text = r#"{"timestamp": "2024-05-01T10:00:00Z", "location": {"lat": 0, "lng": 0},
            "sensors": {"accel": {"x": 0, "y": 0, "z": 0}, "gyro": {"x": 0, "y": 0, "z": 0}, "speed": 0}}"#;
        let frame = decode(text).unwrap();
        assert_eq!(frame.timestamp.to_string(), "2024-05-01T10:00:00Z");
        assert_eq!(frame.timestamp.as_millis(), None);
    }

    #[test]
    fn test_timestamp_millis() {
        assert_eq!(FrameTimestamp::Millis(42).as_millis(), Some(42));
        assert_eq!(FrameTimestamp::Text("17".to_string()).as_millis(), Some(17));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        for bad in [
            "",
            "not json",
            "{\"timestamp\": 1}",
            r#"{"timestamp": 1, "location": {"lat": 0, "lng": 0}, "sensors": {"accel": {"x": 0, "y": 0}, "gyro": {"x": 0, "y": 0, "z": 0}, "speed": 0}}"#,
            r#"{"timestamp": "  ", "location": {"lat": 0, "lng": 0}, "sensors": {"accel": {"x": 0, "y": 0, "z": 0}, "gyro": {"x": 0, "y": 0, "z": 0}, "speed": 0}}"#,
        ] {
            let err = decode(bad).unwrap_err();
            assert!(err.is_decode_error(), "unexpected error for {bad:?}: {err}");
        }
    }

    #[test]
    fn test_frame_hash_ignores_surrounding_whitespace() {
        assert_eq!(frame_hash("{\"a\":1}"), frame_hash("  {\"a\":1}\n"));
        assert_ne!(frame_hash("{\"a\":1}"), frame_hash("{\"a\":2}"));
    }
}
