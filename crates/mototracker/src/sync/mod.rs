//! Getting local rows to the remote store.
//!
//! Two paths lead there. The [`Uploader`] pushes each sensor sample (and an
//! emergency document on accidents) as soon as ingest stores it. The
//! [`BatchSync`], driven daily by the [`Scheduler`], sweeps up every row that
//! is still unsynced. A row's synced flag is only set after the store
//! acknowledged the write.

mod batch;
pub mod documents;
mod scheduler;
mod uploader;

pub use batch::{BatchSync, SyncCounts, SyncEntity, SyncOutcome};
pub use documents::{build_emergency, EmergencyBundle, EmergencyDocument};
pub use scheduler::{next_run_after, Scheduler};
pub use uploader::{EmergencyUpload, Uploader};
