//! Telemetry rows: raw samples, per-frame magnitudes and accidents.

use rusqlite::params;
use tracing::debug;

use super::{flag, Storage};
use crate::error::Result;
use crate::records::{AccidentEvent, SensorSample, SpeedSample};

const SENSOR_COLUMNS: &str = "id, timestamp, lat, lng, accel_x, accel_y, accel_z, \
     gyro_x, gyro_y, gyro_z, speed, frame_hash, synced";

impl Storage {
    /// Insert a raw sample.
    ///
    /// Returns `None` if a sample with the same frame hash is already stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_sensor_sample(&self, sample: &SensorSample) -> Result<Option<i64>> {
        let conn = self.conn()?;

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sensor_data WHERE frame_hash = ?1)",
            [&sample.frame_hash],
            |row| row.get(0),
        )?;
        if exists {
            debug!(hash = %sample.frame_hash, "Skipping duplicate frame");
            return Ok(None);
        }

        conn.execute(
            r"
            INSERT INTO sensor_data
                (timestamp, lat, lng, accel_x, accel_y, accel_z,
                 gyro_x, gyro_y, gyro_z, speed, frame_hash, synced)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ",
            params![
                sample.timestamp,
                sample.lat,
                sample.lng,
                sample.accel_x,
                sample.accel_y,
                sample.accel_z,
                sample.gyro_x,
                sample.gyro_y,
                sample.gyro_z,
                sample.speed,
                sample.frame_hash,
                sample.synced,
            ],
        )?;
        Ok(Some(conn.last_insert_rowid()))
    }

    /// Samples not yet acknowledged remotely, oldest first, at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn unsynced_sensor_samples(&self, limit: usize) -> Result<Vec<SensorSample>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SENSOR_COLUMNS} FROM sensor_data WHERE synced = 0 ORDER BY id LIMIT ?1"
        ))?;
        let samples = stmt
            .query_map([i64::try_from(limit).unwrap_or(i64::MAX)], row_to_sample)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(samples)
    }

    /// Mark one sample as synced.
    ///
    /// Returns the number of rows changed, 0 when the row was already synced.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn mark_sensor_synced(&self, id: i64) -> Result<usize> {
        let affected = self.conn()?.execute(
            "UPDATE sensor_data SET synced = 1 WHERE id = ?1 AND synced = 0",
            [id],
        )?;
        Ok(affected)
    }

    /// The most recent samples, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recent_sensor_samples(&self, limit: usize) -> Result<Vec<SensorSample>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SENSOR_COLUMNS} FROM sensor_data ORDER BY id DESC LIMIT ?1"
        ))?;
        let samples = stmt
            .query_map([i64::try_from(limit).unwrap_or(i64::MAX)], row_to_sample)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(samples)
    }

    /// Record the acceleration magnitude of one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_speed_sample(&self, sample: &SpeedSample) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO calculated_speed (timestamp, calculated_speed) VALUES (?1, ?2)",
            params![sample.timestamp, sample.calculated_speed],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Number of stored magnitude rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn speed_sample_count(&self) -> Result<i64> {
        let count = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM calculated_speed", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Record a detected accident.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_accident(&self, event: &AccidentEvent) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO accident_events (timestamp, accel_magnitude, gyro_magnitude, lat, lng)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                event.timestamp,
                event.accel_magnitude,
                event.gyro_magnitude,
                event.lat,
                event.lng,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, timestamp = %event.timestamp, "Inserted accident event");
        Ok(id)
    }

    /// The most recent accidents, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recent_accidents(&self, limit: usize) -> Result<Vec<AccidentEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r"
            SELECT id, timestamp, accel_magnitude, gyro_magnitude, lat, lng
            FROM accident_events
            ORDER BY id DESC
            LIMIT ?1
            ",
        )?;
        let events = stmt
            .query_map([i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                Ok(AccidentEvent {
                    id: Some(row.get(0)?),
                    timestamp: row.get(1)?,
                    accel_magnitude: row.get(2)?,
                    gyro_magnitude: row.get(3)?,
                    lat: row.get(4)?,
                    lng: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }
}

fn row_to_sample(row: &rusqlite::Row) -> rusqlite::Result<SensorSample> {
    Ok(SensorSample {
        id: Some(row.get(0)?),
        timestamp: row.get(1)?,
        lat: row.get(2)?,
        lng: row.get(3)?,
        accel_x: row.get(4)?,
        accel_y: row.get(5)?,
        accel_z: row.get(6)?,
        gyro_x: row.get(7)?,
        gyro_y: row.get(8)?,
        gyro_z: row.get(9)?,
        speed: row.get(10)?,
        frame_hash: row.get(11)?,
        synced: flag(row.get(12)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    fn sample(timestamp: &str, hash: &str) -> SensorSample {
        SensorSample {
            id: None,
            timestamp: timestamp.to_string(),
            lat: 19.4,
            lng: -99.1,
            accel_x: 0.1,
            accel_y: 9.8,
            accel_z: 0.2,
            gyro_x: 0.0,
            gyro_y: 0.0,
            gyro_z: 0.0,
            speed: 30.0,
            frame_hash: hash.to_string(),
            synced: false,
        }
    }

    #[test]
    fn test_insert_sample_dedups_by_hash() {
        let storage = storage();
        assert!(storage.insert_sensor_sample(&sample("1", "h1")).unwrap().is_some());
        assert!(storage.insert_sensor_sample(&sample("1", "h1")).unwrap().is_none());
        assert!(storage.insert_sensor_sample(&sample("1", "h2")).unwrap().is_some());

        assert_eq!(storage.stats().unwrap().sensor_samples, 2);
    }

    #[test]
    fn test_mark_sensor_synced_touches_one_row() {
        let storage = storage();
        let a = storage.insert_sensor_sample(&sample("100", "a")).unwrap().unwrap();
        storage.insert_sensor_sample(&sample("100", "b")).unwrap();
        storage.insert_sensor_sample(&sample("200", "c")).unwrap();

        assert_eq!(storage.mark_sensor_synced(a).unwrap(), 1);
        assert_eq!(storage.mark_sensor_synced(a).unwrap(), 0);

        let pending = storage.unsynced_sensor_samples(10).unwrap();
        let hashes: Vec<_> = pending.iter().map(|s| s.frame_hash.as_str()).collect();
        assert_eq!(hashes, ["b", "c"]);
        assert_eq!(pending[0].timestamp, "100");
    }

    #[test]
    fn test_unsynced_limit_and_order() {
        let storage = storage();
        for i in 0..5 {
            storage
                .insert_sensor_sample(&sample(&i.to_string(), &format!("h{i}")))
                .unwrap();
        }

        let pending = storage.unsynced_sensor_samples(3).unwrap();
        let stamps: Vec<_> = pending.iter().map(|s| s.timestamp.as_str()).collect();
        assert_eq!(stamps, ["0", "1", "2"]);

        let recent = storage.recent_sensor_samples(2).unwrap();
        assert_eq!(recent[0].timestamp, "4");
        assert_eq!(storage.stats().unwrap().newest_sample.as_deref(), Some("4"));
    }

    #[test]
    fn test_speed_samples() {
        let storage = storage();
        storage.insert_speed_sample(&SpeedSample::new("1", 5.0)).unwrap();
        storage.insert_speed_sample(&SpeedSample::new("1", 5.0)).unwrap();
        assert_eq!(storage.speed_sample_count().unwrap(), 2);
    }

    #[test]
    fn test_accidents() {
        let storage = storage();
        let event = AccidentEvent {
            id: None,
            timestamp: "1700".to_string(),
            accel_magnitude: 22.0,
            gyro_magnitude: 3.0,
            lat: 1.0,
            lng: 2.0,
        };
        let id = storage.insert_accident(&event).unwrap();

        let events = storage.recent_accidents(5).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, Some(id));
        assert_eq!(events[0].timestamp, "1700");
        assert_eq!(storage.stats().unwrap().accidents, 1);
    }
}
