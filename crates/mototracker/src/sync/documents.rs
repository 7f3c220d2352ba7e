//! Remote document shapes.
//!
//! Field names are camelCase on the wire. Passwords and password digests are
//! never part of any document.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::Result;
use crate::records::{EmergencyContact, Motorcycle, SensorSample, User};
use crate::storage::Storage;
use crate::telemetry::FrameTimestamp;

/// Placeholder for an unknown name or model.
pub const UNKNOWN: &str = "Desconocido";
/// Placeholder for a missing emergency contact.
pub const UNKNOWN_CONTACT: &str = "Contacto Desconocido";
/// Placeholder for a missing phone number.
pub const NO_NUMBER: &str = "Sin número";
/// Placeholder for a missing license plate.
pub const NO_PLATE: &str = "Sin placa";
/// Placeholder for a missing color.
pub const NO_COLOR: &str = "Sin color";

/// Event type recorded for every threshold crossing.
pub const FALL_EVENT: &str = "fall";

/// Document for a raw sensor sample, keyed by its timestamp.
#[must_use]
pub fn sensor_document(sample: &SensorSample) -> Value {
    json!({
        "timestamp": sample.timestamp,
        "lat": sample.lat,
        "lng": sample.lng,
        "accelX": sample.accel_x,
        "accelY": sample.accel_y,
        "accelZ": sample.accel_z,
        "gyroX": sample.gyro_x,
        "gyroY": sample.gyro_y,
        "gyroZ": sample.gyro_z,
        "speed": sample.speed,
        "synced": true,
    })
}

/// Batch payload for a user. The password digest stays local.
#[must_use]
pub fn user_document(user: &User) -> Value {
    json!({
        "name": user.name,
        "email": user.email,
        "phone": user.phone,
        "company": user.company,
        "synced": true,
    })
}

/// Batch payload for a motorcycle.
#[must_use]
pub fn motorcycle_document(motorcycle: &Motorcycle) -> Value {
    json!({
        "userId": motorcycle.user_id,
        "brand": motorcycle.brand,
        "model": motorcycle.model,
        "plate": motorcycle.plate,
        "synced": true,
    })
}

/// Batch payload for an emergency contact.
#[must_use]
pub fn contact_document(contact: &EmergencyContact) -> Value {
    json!({
        "userId": contact.user_id,
        "fullName": contact.full_name,
        "phoneNumber": contact.phone_number,
        "relationship": contact.relationship,
        "email": contact.email,
        "synced": true,
    })
}

/// Composite document uploaded when an accident is detected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyDocument {
    /// Always [`FALL_EVENT`].
    pub event_type: String,
    /// Device timestamp in epoch milliseconds.
    pub timestamp: i64,
    /// Where it happened.
    pub location: LocationDoc,
    /// Sensor snapshot at the time of the event.
    pub sensors: SensorsDoc,
    /// The rider and their first emergency contact.
    pub driver: DriverDoc,
    /// The rider's first motorcycle.
    pub motorcycle: MotorcycleDoc,
    /// The route in progress.
    pub route: RouteDoc,
}

/// Position block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocationDoc {
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lng: f64,
}

/// Three-axis block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisDoc {
    /// X axis.
    pub x: f64,
    /// Y axis.
    pub y: f64,
    /// Z axis.
    pub z: f64,
}

/// Sensor snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorsDoc {
    /// Accelerometer.
    pub accel: AxisDoc,
    /// Gyroscope.
    pub gyro: AxisDoc,
    /// Device speed.
    pub speed: f64,
}

/// Rider block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverDoc {
    /// Rider name.
    pub name: String,
    /// Rider phone.
    pub phone: String,
    /// First emergency contact.
    pub emergency_contact: ContactDoc,
}

/// Emergency contact block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDoc {
    /// Contact name.
    pub full_name: String,
    /// Contact phone.
    pub phone_number: String,
    /// Relationship, empty when unknown.
    pub relationship: String,
    /// Email, empty when unknown.
    pub email: String,
}

/// Motorcycle block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotorcycleDoc {
    /// Manufacturer.
    pub brand: String,
    /// Model name.
    pub model: String,
    /// License plate.
    pub plate: String,
    /// Paint color.
    pub color: String,
}

/// Route block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDoc {
    /// Route start in epoch milliseconds.
    pub start_timestamp: i64,
    /// Seconds elapsed since the route started.
    pub duration_so_far: i64,
}

/// An emergency document plus the local rows it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct EmergencyBundle {
    /// What gets uploaded.
    pub document: EmergencyDocument,
    /// The user row, when it exists.
    pub user_id: Option<i64>,
    /// The motorcycle row, when one exists.
    pub motorcycle_id: Option<i64>,
    /// The contact row, when one exists.
    pub contact_id: Option<i64>,
}

impl EmergencyBundle {
    /// Document id in the `emergency_data` collection.
    #[must_use]
    pub fn document_id(&self) -> String {
        self.document.timestamp.to_string()
    }
}

/// Assemble the emergency document for `user_id` from local rows.
///
/// Missing rows are replaced by placeholders and logged.
///
/// # Errors
///
/// Returns an error if a storage lookup fails.
pub fn build_emergency(
    storage: &Storage,
    user_id: i64,
    sample: &SensorSample,
    now: DateTime<Utc>,
) -> Result<EmergencyBundle> {
    let user = storage.user_by_id(user_id)?;
    if user.is_none() {
        warn!(user_id, "User not found, using placeholder driver");
    }

    let contact = storage.contacts_by_user(user_id)?.into_iter().next();
    if contact.is_none() {
        warn!(user_id, "No emergency contact, using placeholder");
    }

    let motorcycle = storage.motorcycles_by_user(user_id)?.into_iter().next();
    if motorcycle.is_none() {
        warn!(user_id, "No motorcycle, using placeholder");
    }

    let timestamp = sample_millis(sample).unwrap_or_else(|| now.timestamp_millis());

    let route = match storage.route_started_at()? {
        Some(started) => RouteDoc {
            start_timestamp: started.timestamp_millis(),
            duration_so_far: (now - started).num_seconds().max(0),
        },
        None => RouteDoc {
            start_timestamp: timestamp,
            duration_so_far: 0,
        },
    };

    let driver = DriverDoc {
        name: user
            .as_ref()
            .map_or_else(|| UNKNOWN.to_string(), |u| u.name.clone()),
        phone: user
            .as_ref()
            .map_or_else(|| NO_NUMBER.to_string(), |u| u.phone.clone()),
        emergency_contact: contact.as_ref().map_or_else(
            || ContactDoc {
                full_name: UNKNOWN_CONTACT.to_string(),
                phone_number: NO_NUMBER.to_string(),
                relationship: String::new(),
                email: String::new(),
            },
            |c| ContactDoc {
                full_name: c.full_name.clone(),
                phone_number: c.phone_number.clone(),
                relationship: c.relationship.clone().unwrap_or_default(),
                email: c.email.clone().unwrap_or_default(),
            },
        ),
    };

    let motorcycle_doc = motorcycle.as_ref().map_or_else(
        || MotorcycleDoc {
            brand: UNKNOWN.to_string(),
            model: UNKNOWN.to_string(),
            plate: NO_PLATE.to_string(),
            color: NO_COLOR.to_string(),
        },
        |m| MotorcycleDoc {
            brand: m.brand.clone(),
            model: m.model.clone(),
            plate: m.plate.clone(),
            color: m.color.clone().unwrap_or_else(|| NO_COLOR.to_string()),
        },
    );

    let document = EmergencyDocument {
        event_type: FALL_EVENT.to_string(),
        timestamp,
        location: LocationDoc {
            lat: sample.lat,
            lng: sample.lng,
        },
        sensors: SensorsDoc {
            accel: AxisDoc {
                x: sample.accel_x,
                y: sample.accel_y,
                z: sample.accel_z,
            },
            gyro: AxisDoc {
                x: sample.gyro_x,
                y: sample.gyro_y,
                z: sample.gyro_z,
            },
            speed: sample.speed,
        },
        driver,
        motorcycle: motorcycle_doc,
        route,
    };

    Ok(EmergencyBundle {
        document,
        user_id: user.and_then(|u| u.id),
        motorcycle_id: motorcycle.and_then(|m| m.id),
        contact_id: contact.and_then(|c| c.id),
    })
}

fn sample_millis(sample: &SensorSample) -> Option<i64> {
    FrameTimestamp::Text(sample.timestamp.clone()).as_millis()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn sample(timestamp: &str) -> SensorSample {
        SensorSample {
            id: Some(1),
            timestamp: timestamp.to_string(),
            lat: 19.4,
            lng: -99.1,
            accel_x: 9.0,
            accel_y: 12.0,
            accel_z: 1.0,
            gyro_x: 0.5,
            gyro_y: 0.0,
            gyro_z: 0.0,
            speed: 40.0,
            frame_hash: "h".to_string(),
            synced: false,
        }
    }

    #[test]
    fn test_user_document_omits_password() {
        let user = crate::records::User::new("Ana", "ana@example.com", "5512345678", "pw", "ACME");
        let doc = user_document(&user);
        let text = doc.to_string();

        assert_eq!(doc["email"], "ana@example.com");
        assert_eq!(doc["synced"], true);
        assert!(doc.get("password").is_none());
        assert!(!text.contains(&user.password_digest));
    }

    #[test]
    fn test_sensor_document_fields() {
        let doc = sensor_document(&sample("1700"));
        assert_eq!(doc["timestamp"], "1700");
        assert_eq!(doc["accelY"], 12.0);
        assert_eq!(doc["speed"], 40.0);
    }

    #[test]
    fn test_emergency_placeholders() {
        let storage = Storage::open_in_memory().unwrap();
        let now = Utc::now();

        let bundle = build_emergency(&storage, 42, &sample("1700000000000"), now).unwrap();
        let doc = &bundle.document;

        assert_eq!(doc.event_type, "fall");
        assert_eq!(doc.timestamp, 1_700_000_000_000);
        assert_eq!(doc.driver.name, UNKNOWN);
        assert_eq!(doc.driver.emergency_contact.full_name, UNKNOWN_CONTACT);
        assert_eq!(doc.driver.emergency_contact.phone_number, NO_NUMBER);
        assert_eq!(doc.motorcycle.plate, NO_PLATE);
        assert_eq!(doc.motorcycle.color, NO_COLOR);
        assert_eq!(doc.route.start_timestamp, 1_700_000_000_000);
        assert_eq!(doc.route.duration_so_far, 0);
        assert_eq!(bundle.user_id, None);
        assert_eq!(bundle.contact_id, None);
        assert_eq!(bundle.document_id(), "1700000000000");
    }

    #[test]
    fn test_emergency_uses_first_rows_and_route_marker() {
        let storage = Storage::open_in_memory().unwrap();
        let user_id = storage
            .insert_user(&User::new("Ana", "ana@example.com", "5512345678", "pw", "ACME"))
            .unwrap();
        let mut bike = Motorcycle::new(user_id, "Honda", "CB500F", "ABC-123");
        bike.color = Some("Rojo".to_string());
        let bike_id = storage.insert_motorcycle(&bike).unwrap();
        storage
            .insert_motorcycle(&Motorcycle::new(user_id, "Yamaha", "MT-07", "ZZZ-999"))
            .unwrap();
        let contact_id = storage
            .insert_contact(&EmergencyContact::new(user_id, "Luis", "5511122233"))
            .unwrap();

        let now = Utc::now();
        storage
            .set_route_started_at(now - Duration::seconds(90))
            .unwrap();

        let bundle = build_emergency(&storage, user_id, &sample("1700"), now).unwrap();
        let doc = &bundle.document;

        assert_eq!(doc.driver.name, "Ana");
        assert_eq!(doc.driver.emergency_contact.full_name, "Luis");
        assert_eq!(doc.driver.emergency_contact.relationship, "");
        assert_eq!(doc.motorcycle.plate, "ABC-123");
        assert_eq!(doc.motorcycle.color, "Rojo");
        assert_eq!(doc.route.duration_so_far, 90);
        assert_eq!(bundle.user_id, Some(user_id));
        assert_eq!(bundle.motorcycle_id, Some(bike_id));
        assert_eq!(bundle.contact_id, Some(contact_id));
    }

    #[test]
    fn test_emergency_text_timestamp_falls_back_to_now() {
        let storage = Storage::open_in_memory().unwrap();
        let now = Utc::now();
        let bundle = build_emergency(&storage, 1, &sample("2024-05-01T10:00:00Z"), now).unwrap();
        assert_eq!(bundle.document.timestamp, now.timestamp_millis());
    }

    #[test]
    fn test_emergency_document_is_camel_case() {
        let storage = Storage::open_in_memory().unwrap();
        let bundle = build_emergency(&storage, 1, &sample("5"), Utc::now()).unwrap();
        let value = serde_json::to_value(&bundle.document).unwrap();

        assert_eq!(value["eventType"], "fall");
        assert!(value["driver"]["emergencyContact"]["fullName"].is_string());
        assert!(value["route"]["durationSoFar"].is_number());
        assert!(value["sensors"]["accel"]["x"].is_number());
    }
}
