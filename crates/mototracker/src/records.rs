//! Record types persisted in the local store.
//!
//! Ids are `None` until the storage layer assigns one. Every syncable record
//! carries a `synced` flag that only ever moves from `false` to `true`.

use serde::{Deserialize, Serialize};

use crate::telemetry::{Magnitudes, TelemetryFrame};

/// Context string for password digests.
const PASSWORD_CONTEXT: &str = "mototracker 2024-05 account password v1";

/// A registered rider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Row id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Display name.
    pub name: String,
    /// Login email, unique across users.
    pub email: String,
    /// Phone number.
    pub phone: String,
    /// Digest of the password, never the password itself.
    #[serde(skip)]
    pub password_digest: String,
    /// Company or fleet the rider belongs to.
    pub company: String,
    /// Profile picture location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
    /// Acknowledged by the remote store.
    pub synced: bool,
}

impl User {
    /// Create an unsaved user, digesting the password.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        phone: impl Into<String>,
        password: &str,
        company: impl Into<String>,
    ) -> Self {
        let email = email.into();
        let password_digest = Self::digest_password(&email, password);
        Self {
            id: None,
            name: name.into(),
            email,
            phone: phone.into(),
            password_digest,
            company: company.into(),
            image_uri: None,
            synced: false,
        }
    }

    /// Compute the stored digest for an email/password pair.
    #[must_use]
    pub fn digest_password(email: &str, password: &str) -> String {
        let mut hasher = blake3::Hasher::new_derive_key(PASSWORD_CONTEXT);
        hasher.update(email.as_bytes());
        hasher.update(&[0]);
        hasher.update(password.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Check a candidate password against the stored digest.
    #[must_use]
    pub fn verify_password(&self, password: &str) -> bool {
        Self::digest_password(&self.email, password) == self.password_digest
    }
}

/// A motorcycle owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Motorcycle {
    /// Row id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Owner.
    pub user_id: i64,
    /// Manufacturer.
    pub brand: String,
    /// Model name.
    pub model: String,
    /// Model year.
    pub year: Option<i32>,
    /// License plate.
    pub plate: String,
    /// Engine displacement in cc.
    pub displacement: Option<i32>,
    /// Insurance policy reference.
    pub insurance: Option<String>,
    /// Paint color.
    pub color: Option<String>,
    /// Acknowledged by the remote store.
    pub synced: bool,
}

impl Motorcycle {
    /// Create an unsaved motorcycle with only the required fields.
    #[must_use]
    pub fn new(
        user_id: i64,
        brand: impl Into<String>,
        model: impl Into<String>,
        plate: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            user_id,
            brand: brand.into(),
            model: model.into(),
            year: None,
            plate: plate.into(),
            displacement: None,
            insurance: None,
            color: None,
            synced: false,
        }
    }
}

/// Someone to notify when an accident is detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    /// Row id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// The rider this contact belongs to.
    pub user_id: i64,
    /// Contact name.
    pub full_name: String,
    /// Ten-digit phone number.
    pub phone_number: String,
    /// Relationship to the rider.
    pub relationship: Option<String>,
    /// Contact email.
    pub email: Option<String>,
    /// Acknowledged by the remote store.
    pub synced: bool,
}

impl EmergencyContact {
    /// Create an unsaved contact.
    #[must_use]
    pub fn new(
        user_id: i64,
        full_name: impl Into<String>,
        phone_number: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            user_id,
            full_name: full_name.into(),
            phone_number: phone_number.into(),
            relationship: None,
            email: None,
            synced: false,
        }
    }
}

/// One raw telemetry frame as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Row id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Device timestamp, also the remote document key.
    pub timestamp: String,
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lng: f64,
    /// Acceleration x.
    pub accel_x: f64,
    /// Acceleration y.
    pub accel_y: f64,
    /// Acceleration z.
    pub accel_z: f64,
    /// Angular rate x.
    pub gyro_x: f64,
    /// Angular rate y.
    pub gyro_y: f64,
    /// Angular rate z.
    pub gyro_z: f64,
    /// Speed reported by the device.
    pub speed: f64,
    /// BLAKE3 hash of the raw frame text.
    #[serde(skip)]
    pub frame_hash: String,
    /// Acknowledged by the remote store.
    pub synced: bool,
}

impl SensorSample {
    /// Build an unsaved sample from a decoded frame.
    #[must_use]
    pub fn from_frame(frame: &TelemetryFrame, frame_hash: impl Into<String>) -> Self {
        let accel = &frame.sensors.accel;
        let gyro = &frame.sensors.gyro;
        Self {
            id: None,
            timestamp: frame.timestamp.to_string(),
            lat: frame.location.lat,
            lng: frame.location.lng,
            accel_x: accel.x,
            accel_y: accel.y,
            accel_z: accel.z,
            gyro_x: gyro.x,
            gyro_y: gyro.y,
            gyro_z: gyro.z,
            speed: frame.sensors.speed,
            frame_hash: frame_hash.into(),
            synced: false,
        }
    }
}

/// Acceleration magnitude recorded per frame.
///
/// Historically labelled "calculated speed"; the value is the magnitude of
/// the acceleration vector, not a speed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedSample {
    /// Row id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Device timestamp.
    pub timestamp: String,
    /// Acceleration magnitude.
    pub calculated_speed: f64,
}

impl SpeedSample {
    /// Create an unsaved sample.
    #[must_use]
    pub fn new(timestamp: impl Into<String>, calculated_speed: f64) -> Self {
        Self {
            id: None,
            timestamp: timestamp.into(),
            calculated_speed,
        }
    }
}

/// A frame that crossed the crash thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccidentEvent {
    /// Row id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Device timestamp.
    pub timestamp: String,
    /// Acceleration magnitude at the time of the event.
    pub accel_magnitude: f64,
    /// Angular-rate magnitude at the time of the event.
    pub gyro_magnitude: f64,
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lng: f64,
}

impl AccidentEvent {
    /// Build an unsaved event from a frame and its magnitudes.
    #[must_use]
    pub fn from_frame(frame: &TelemetryFrame, magnitudes: Magnitudes) -> Self {
        Self {
            id: None,
            timestamp: frame.timestamp.to_string(),
            accel_magnitude: magnitudes.accel,
            gyro_magnitude: magnitudes.gyro,
            lat: frame.location.lat,
            lng: frame.location.lng,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry;

    const FRAME: &str = r#"{
        "timestamp": 1700000000123,
        "location": {"lat": 19.4326, "lng": -99.1332},
        "sensors": {
            "accel": {"x": 9.0, "y": 12.0, "z": 1.0},
            "gyro": {"x": 0.1, "y": 0.2, "z": 0.3},
            "speed": 42.5
        }
    }"#;

    #[test]
    fn test_user_password_digest() {
        let user = User::new("Ana", "ana@example.com", "5512345678", "s3cret", "");
        assert_ne!(user.password_digest, "s3cret");
        assert!(user.verify_password("s3cret"));
        assert!(!user.verify_password("S3cret"));
    }

    #[test]
    fn test_password_digest_bound_to_email() {
        let a = User::digest_password("a@example.com", "pw");
        let b = User::digest_password("b@example.com", "pw");
        assert_ne!(a, b);
    }

    #[test]
    fn test_user_serialization_hides_digest() {
        let user = User::new("Ana", "ana@example.com", "5512345678", "s3cret", "ACME");
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains(&user.password_digest));
        assert!(!json.contains("s3cret"));
    }

    #[test]
    fn test_sensor_sample_from_frame() {
        let frame = telemetry::decode(FRAME).unwrap();
        let sample = SensorSample::from_frame(&frame, "abc");

        assert_eq!(sample.timestamp, "1700000000123");
        assert!((sample.lat - 19.4326).abs() < 1e-9);
        assert!((sample.accel_y - 12.0).abs() < f64::EPSILON);
        assert!((sample.speed - 42.5).abs() < f64::EPSILON);
        assert_eq!(sample.frame_hash, "abc");
        assert!(!sample.synced);
    }

    #[test]
    fn test_accident_event_copies_location() {
        let frame = telemetry::decode(FRAME).unwrap();
        let event = AccidentEvent::from_frame(&frame, frame.magnitudes());

        assert!((event.lat - 19.4326).abs() < 1e-9);
        assert!((event.lng + 99.1332).abs() < 1e-9);
        assert!(event.accel_magnitude > 15.0);
    }

    #[test]
    fn test_new_records_start_unsynced() {
        assert!(!Motorcycle::new(1, "Honda", "CB500", "ABC-123").synced);
        assert!(!EmergencyContact::new(1, "Luis", "5511122233").synced);
    }
}
