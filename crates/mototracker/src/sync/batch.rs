//! Batch upload of everything still unsynced.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::documents::{contact_document, motorcycle_document, sensor_document, user_document};
use crate::error::{Error, Result};
use crate::remote::{DocumentStore, EMERGENCY_CONTACTS, MOTORCYCLES, SENSOR_DATA, USERS};
use crate::storage::Storage;

/// Samples fetched per backlog page.
const BACKLOG_PAGE: usize = 200;

/// Kinds of rows the batch sync walks, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEntity {
    /// Users.
    Users,
    /// Motorcycles.
    Motorcycles,
    /// Emergency contacts.
    EmergencyContacts,
    /// Sensor samples left behind by failed immediate uploads.
    SensorSamples,
}

impl fmt::Display for SyncEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Users => write!(f, "users"),
            Self::Motorcycles => write!(f, "motorcycles"),
            Self::EmergencyContacts => write!(f, "emergency contacts"),
            Self::SensorSamples => write!(f, "sensor samples"),
        }
    }
}

/// Rows acknowledged during one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    /// Users uploaded.
    pub users: usize,
    /// Motorcycles uploaded.
    pub motorcycles: usize,
    /// Emergency contacts uploaded.
    pub contacts: usize,
    /// Sensor samples uploaded.
    pub sensor_samples: usize,
}

impl SyncCounts {
    /// Sum of all counts.
    #[must_use]
    pub fn total(&self) -> usize {
        self.users + self.motorcycles + self.contacts + self.sensor_samples
    }
}

/// Result of one batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Every unsynced row was acknowledged.
    Success(SyncCounts),
    /// The run stopped at the first failure and should be retried.
    Retry {
        /// Rows acknowledged before the failure.
        counts: SyncCounts,
        /// What was being uploaded.
        entity: SyncEntity,
        /// The failure.
        error: String,
    },
}

impl SyncOutcome {
    /// True for [`SyncOutcome::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Rows acknowledged, whatever the outcome.
    #[must_use]
    pub fn counts(&self) -> SyncCounts {
        match self {
            Self::Success(counts) | Self::Retry { counts, .. } => *counts,
        }
    }
}

/// Uploads unsynced users, motorcycles and contacts, then the sample backlog.
#[derive(Debug, Clone)]
pub struct BatchSync {
    storage: Arc<Storage>,
    store: Arc<dyn DocumentStore>,
    include_sensor_backlog: bool,
}

impl BatchSync {
    /// Create a batch sync.
    #[must_use]
    pub fn new(
        storage: Arc<Storage>,
        store: Arc<dyn DocumentStore>,
        include_sensor_backlog: bool,
    ) -> Self {
        Self {
            storage,
            store,
            include_sensor_backlog,
        }
    }

    /// Run once. Never fails: errors become [`SyncOutcome::Retry`].
    pub async fn run(&self) -> SyncOutcome {
        let mut counts = SyncCounts::default();

        let steps = [
            SyncEntity::Users,
            SyncEntity::Motorcycles,
            SyncEntity::EmergencyContacts,
            SyncEntity::SensorSamples,
        ];

        for entity in steps {
            if entity == SyncEntity::SensorSamples && !self.include_sensor_backlog {
                continue;
            }
            if let Err(e) = self.sync_entity(entity, &mut counts).await {
                warn!(%entity, error = %e, "Batch sync stopped, will retry");
                return SyncOutcome::Retry {
                    counts,
                    entity,
                    error: e.to_string(),
                };
            }
        }

        info!(
            users = counts.users,
            motorcycles = counts.motorcycles,
            contacts = counts.contacts,
            sensor_samples = counts.sensor_samples,
            "Batch sync complete"
        );
        SyncOutcome::Success(counts)
    }

    async fn sync_entity(&self, entity: SyncEntity, counts: &mut SyncCounts) -> Result<()> {
        match entity {
            SyncEntity::Users => {
                for user in self.storage.unsynced_users()? {
                    let id = user.id.ok_or_else(|| Error::internal("stored user without id"))?;
                    let remote_id = self.store.add(USERS, &user_document(&user)).await?;
                    self.storage.mark_user_synced(id)?;
                    debug!(id, %remote_id, "User synced");
                    counts.users += 1;
                }
            }
            SyncEntity::Motorcycles => {
                for motorcycle in self.storage.unsynced_motorcycles()? {
                    let id = motorcycle
                        .id
                        .ok_or_else(|| Error::internal("stored motorcycle without id"))?;
                    let remote_id = self
                        .store
                        .add(MOTORCYCLES, &motorcycle_document(&motorcycle))
                        .await?;
                    self.storage.mark_motorcycle_synced(id)?;
                    debug!(id, %remote_id, plate = %motorcycle.plate, "Motorcycle synced");
                    counts.motorcycles += 1;
                }
            }
            SyncEntity::EmergencyContacts => {
                for contact in self.storage.unsynced_contacts()? {
                    let id = contact
                        .id
                        .ok_or_else(|| Error::internal("stored contact without id"))?;
                    let remote_id = self
                        .store
                        .add(EMERGENCY_CONTACTS, &contact_document(&contact))
                        .await?;
                    self.storage.mark_contact_synced(id)?;
                    debug!(id, %remote_id, "Emergency contact synced");
                    counts.contacts += 1;
                }
            }
            SyncEntity::SensorSamples => loop {
                let page = self.storage.unsynced_sensor_samples(BACKLOG_PAGE)?;
                if page.is_empty() {
                    break;
                }
                let mut marked = 0;
                for sample in &page {
                    let id = sample
                        .id
                        .ok_or_else(|| Error::internal("stored sample without id"))?;
                    self.store
                        .upsert(SENSOR_DATA, &sample.timestamp, &sensor_document(sample))
                        .await?;
                    let n = self.storage.mark_sensor_synced(id)?;
                    marked += n;
                    counts.sensor_samples += n;
                }
                if marked == 0 {
                    break;
                }
            },
        }
        Ok(())
    }
}
