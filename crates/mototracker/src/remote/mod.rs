//! Remote document store.
//!
//! The cloud side is a schemaless document database organized in
//! collections. Two writes are used: an upsert keyed by a caller-chosen
//! document id and an append that lets the store pick the id.

mod http;
mod memory;

pub use http::HttpDocumentStore;
pub use memory::MemoryDocumentStore;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::config::RemoteConfig;
use crate::error::Result;

/// Raw sensor samples, keyed by device timestamp.
pub const SENSOR_DATA: &str = "sensor_data";

/// Composite accident documents, keyed by device timestamp.
pub const EMERGENCY_DATA: &str = "emergency_data";

/// User profiles.
pub const USERS: &str = "users";

/// Motorcycles.
pub const MOTORCYCLES: &str = "motorcycles";

/// Emergency contacts.
pub const EMERGENCY_CONTACTS: &str = "emergency_contacts";

/// A remote document database.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// Create or replace the document `id` in `collection`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store does not acknowledge the write.
    async fn upsert(&self, collection: &str, id: &str, document: &Value) -> Result<()>;

    /// Append a document to `collection`, returning the id the store assigned.
    ///
    /// # Errors
    ///
    /// Returns an error if the store does not acknowledge the write.
    async fn add(&self, collection: &str, document: &Value) -> Result<String>;
}

/// Build the configured store, or `None` when no remote is configured.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be constructed.
pub fn from_config(config: &RemoteConfig) -> Result<Option<Arc<dyn DocumentStore>>> {
    match &config.base_url {
        Some(base_url) => {
            let store = HttpDocumentStore::new(
                base_url,
                config.api_key.clone(),
                std::time::Duration::from_secs(config.timeout_secs),
            )?;
            Ok(Some(Arc::new(store)))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_without_url() {
        assert!(from_config(&RemoteConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_from_config_with_url() {
        let config = RemoteConfig {
            base_url: Some("https://db.example.com/v1".to_string()),
            ..RemoteConfig::default()
        };
        assert!(from_config(&config).unwrap().is_some());
    }
}
