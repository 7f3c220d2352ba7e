//! `SQLite` schema definitions for mototracker.

/// Users table. Email is unique.
pub const CREATE_USERS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    phone TEXT NOT NULL,
    password_digest TEXT NOT NULL,
    company TEXT NOT NULL DEFAULT '',
    image_uri TEXT,
    synced INTEGER NOT NULL DEFAULT 0
)
";

/// Unique index enforcing one account per email.
pub const CREATE_USERS_EMAIL_INDEX: &str = r"
CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users(email)
";

/// Motorcycles table, many per user.
pub const CREATE_MOTORCYCLES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS motorcycles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    brand TEXT NOT NULL,
    model TEXT NOT NULL,
    year INTEGER,
    plate TEXT NOT NULL,
    displacement INTEGER,
    insurance TEXT,
    color TEXT,
    synced INTEGER NOT NULL DEFAULT 0
)
";

/// Lookup of motorcycles by owner.
pub const CREATE_MOTORCYCLES_USER_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_motorcycles_user ON motorcycles(user_id)
";

/// Emergency contacts table, many per user.
pub const CREATE_CONTACTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS emergency_contacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    full_name TEXT NOT NULL,
    phone_number TEXT NOT NULL,
    relationship TEXT,
    email TEXT,
    synced INTEGER NOT NULL DEFAULT 0
)
";

/// Lookup of contacts by owner.
pub const CREATE_CONTACTS_USER_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_contacts_user ON emergency_contacts(user_id)
";

/// Raw telemetry frames.
pub const CREATE_SENSOR_DATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS sensor_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    lat REAL NOT NULL,
    lng REAL NOT NULL,
    accel_x REAL NOT NULL,
    accel_y REAL NOT NULL,
    accel_z REAL NOT NULL,
    gyro_x REAL NOT NULL,
    gyro_y REAL NOT NULL,
    gyro_z REAL NOT NULL,
    speed REAL NOT NULL,
    frame_hash TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// Lookup of samples by device timestamp (remote document key).
pub const CREATE_SENSOR_TIMESTAMP_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_sensor_timestamp ON sensor_data(timestamp)
";

/// Frame deduplication.
pub const CREATE_SENSOR_HASH_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_sensor_hash ON sensor_data(frame_hash)
";

/// Unsynced backlog scans.
pub const CREATE_SENSOR_SYNCED_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_sensor_synced ON sensor_data(synced)
";

/// Acceleration magnitude per frame.
pub const CREATE_SPEED_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS calculated_speed (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    calculated_speed REAL NOT NULL
)
";

/// Frames that crossed the crash thresholds.
pub const CREATE_ACCIDENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS accident_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    accel_magnitude REAL NOT NULL,
    gyro_magnitude REAL NOT NULL,
    lat REAL NOT NULL,
    lng REAL NOT NULL
)
";

/// Key-value pairs: schema version, session, route markers.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_USERS_TABLE,
    CREATE_USERS_EMAIL_INDEX,
    CREATE_MOTORCYCLES_TABLE,
    CREATE_MOTORCYCLES_USER_INDEX,
    CREATE_CONTACTS_TABLE,
    CREATE_CONTACTS_USER_INDEX,
    CREATE_SENSOR_DATA_TABLE,
    CREATE_SENSOR_TIMESTAMP_INDEX,
    CREATE_SENSOR_HASH_INDEX,
    CREATE_SENSOR_SYNCED_INDEX,
    CREATE_SPEED_TABLE,
    CREATE_ACCIDENTS_TABLE,
    CREATE_METADATA_TABLE,
];

/// Every table, dropped when the schema is recreated.
pub const TABLE_NAMES: &[&str] = &[
    "users",
    "motorcycles",
    "emergency_contacts",
    "sensor_data",
    "calculated_speed",
    "accident_events",
    "metadata",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.trim().is_empty());
        }
    }

    #[test]
    fn test_every_table_has_a_create_statement() {
        for table in TABLE_NAMES {
            let needle = format!("CREATE TABLE IF NOT EXISTS {table} (");
            assert!(
                SCHEMA_STATEMENTS.iter().any(|s| s.contains(&needle)),
                "no CREATE for {table}"
            );
        }
    }

    #[test]
    fn test_syncable_tables_carry_synced_flag() {
        for stmt in [
            CREATE_USERS_TABLE,
            CREATE_MOTORCYCLES_TABLE,
            CREATE_CONTACTS_TABLE,
            CREATE_SENSOR_DATA_TABLE,
        ] {
            assert!(stmt.contains("synced INTEGER NOT NULL DEFAULT 0"));
        }
    }
}
