//! Immediate per-row uploads from the ingest pipeline.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::documents::{build_emergency, sensor_document};
use crate::error::{Error, Result};
use crate::records::SensorSample;
use crate::remote::{DocumentStore, EMERGENCY_DATA, SENSOR_DATA};
use crate::storage::Storage;

/// What happened to an emergency upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmergencyUpload {
    /// The document was acknowledged under this id.
    Uploaded(String),
    /// Nobody is logged in, so there is no driver to report.
    NoSession,
}

/// Pushes freshly stored rows to the remote store and marks them synced.
#[derive(Debug, Clone)]
pub struct Uploader {
    storage: Arc<Storage>,
    store: Arc<dyn DocumentStore>,
}

impl Uploader {
    /// Create an uploader.
    #[must_use]
    pub fn new(storage: Arc<Storage>, store: Arc<dyn DocumentStore>) -> Self {
        Self { storage, store }
    }

    /// Upsert a sample keyed by its timestamp, then mark it synced.
    ///
    /// Returns the number of local rows marked.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write or the local update
    /// fails. The row stays unsynced on a remote failure.
    pub async fn upload_sample(&self, sample: &SensorSample) -> Result<usize> {
        let id = sample
            .id
            .ok_or_else(|| Error::internal("sample was uploaded before it was stored"))?;
        let document = sensor_document(sample);
        self.store
            .upsert(SENSOR_DATA, &sample.timestamp, &document)
            .await
            .map_err(|e| {
                warn!(timestamp = %sample.timestamp, error = %e, "Sample upload failed");
                e
            })?;

        let marked = self.storage.mark_sensor_synced(id)?;
        debug!(id, timestamp = %sample.timestamp, marked, "Sample synced");
        Ok(marked)
    }

    /// Build and upsert the emergency document for `sample`.
    ///
    /// The logged-in user is the driver. On success the user, motorcycle and
    /// contact rows used in the document are marked synced; placeholders are
    /// not rows and are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if building, uploading or marking fails.
    pub async fn upload_emergency(&self, sample: &SensorSample) -> Result<EmergencyUpload> {
        let Some(user_id) = self.storage.session_user_id()? else {
            error!(
                timestamp = %sample.timestamp,
                "Accident detected but no user is logged in, skipping emergency upload"
            );
            return Ok(EmergencyUpload::NoSession);
        };

        let bundle = build_emergency(&self.storage, user_id, sample, Utc::now())?;
        let document_id = bundle.document_id();
        let document: Value = serde_json::to_value(&bundle.document)?;

        self.store
            .upsert(EMERGENCY_DATA, &document_id, &document)
            .await
            .map_err(|e| {
                error!(%document_id, error = %e, "Emergency upload failed");
                e
            })?;
        info!(%document_id, user_id, "Emergency data uploaded");

        if let Some(id) = bundle.user_id {
            self.storage.mark_user_synced(id)?;
        }
        if let Some(id) = bundle.motorcycle_id {
            self.storage.mark_motorcycle_synced(id)?;
        }
        if let Some(id) = bundle.contact_id {
            self.storage.mark_contact_synced(id)?;
        }

        Ok(EmergencyUpload::Uploaded(document_id))
    }
}
