//! `mototracker` - Motorcycle telemetry recorder with crash detection
//!
//! This library pairs with a sensor device over a stream socket, stores its
//! frames locally, flags possible accidents and synchronizes rider data and
//! telemetry with a remote document store.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod accounts;
pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod link;
pub mod logging;
pub mod records;
pub mod remote;
pub mod service;
pub mod storage;
pub mod sync;
pub mod telemetry;

pub use accounts::Accounts;
pub use config::Config;
pub use error::{Error, Result};
pub use ingest::{IngestPipeline, IngestReport};
pub use link::{DeviceLink, LinkExit, LinkHandle};
pub use logging::init_logging;
pub use remote::DocumentStore;
pub use service::{RouteService, RouteSummary};
pub use storage::{Storage, StorageStats};
pub use sync::{BatchSync, Scheduler, SyncOutcome, Uploader};
