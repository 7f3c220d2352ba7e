//! The route service: device link, ingest and uploads for one ride.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};

use crate::accounts::Accounts;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ingest::{IngestPipeline, IngestReport};
use crate::link::{DeviceLink, LinkExit, LinkHandle};
use crate::remote::DocumentStore;
use crate::storage::Storage;
use crate::sync::Uploader;
use crate::telemetry::Thresholds;

/// How a route ended.
#[derive(Debug, Clone, Serialize)]
pub struct RouteSummary {
    /// When the route started.
    pub started_at: DateTime<Utc>,
    /// Route length in seconds.
    pub duration_secs: i64,
    /// Why the device link stopped.
    pub exit: String,
    /// What the ingest pipeline did.
    pub ingest: IngestReport,
}

/// Hosts one route: accepts the device, stores its frames and uploads them.
#[derive(Debug, Clone)]
pub struct RouteService {
    storage: Arc<Storage>,
    store: Option<Arc<dyn DocumentStore>>,
    thresholds: Thresholds,
    channel_capacity: usize,
}

impl RouteService {
    /// Create the service. Without a store frames are only kept locally.
    #[must_use]
    pub fn new(
        storage: Arc<Storage>,
        store: Option<Arc<dyn DocumentStore>>,
        config: &Config,
    ) -> Self {
        Self {
            storage,
            store,
            thresholds: Thresholds::from(&config.detection),
            channel_capacity: config.link.channel_capacity.max(1),
        }
    }

    /// Run the route until the device goes away or `shutdown` resolves.
    ///
    /// The route marker is set on start and cleared on exit. Uploads still in
    /// flight when the link stops are awaited before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the route marker cannot be written or a service
    /// task panics.
    pub async fn run<F>(&self, link: DeviceLink, shutdown: F) -> Result<RouteSummary>
    where
        F: Future<Output = ()>,
    {
        let accounts = Accounts::new(Arc::clone(&self.storage));
        let started_at = accounts.start_route(Utc::now())?;

        let uploader = self
            .store
            .as_ref()
            .map(|store| Uploader::new(Arc::clone(&self.storage), Arc::clone(store)));
        if uploader.is_none() {
            warn!("No remote store configured, frames are stored locally only");
        }
        let pipeline = IngestPipeline::new(Arc::clone(&self.storage), uploader, self.thresholds);

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let ingest_task = tokio::spawn(async move { pipeline.run(rx).await });

        let handle = LinkHandle::new();
        let mut link_task = tokio::spawn(link.run(tx, handle.clone()));

        tokio::pin!(shutdown);
        let joined = tokio::select! {
            joined = &mut link_task => joined,
            () = &mut shutdown => {
                info!("Shutdown requested, stopping route");
                handle.stop();
                link_task.await
            }
        };
        finish_route(&accounts, started_at, joined, ingest_task).await
    }
}

/// Collect the ingest report and clear the route marker, whatever the link
/// task returned.
async fn finish_route(
    accounts: &Accounts,
    started_at: DateTime<Utc>,
    joined: std::result::Result<LinkExit, JoinError>,
    ingest_task: JoinHandle<IngestReport>,
) -> Result<RouteSummary> {
    // The link owned the only sender. It is dropped even when the link task
    // panicked, so ingest always drains and finishes.
    let ingest = ingest_task
        .await
        .map_err(|e| Error::internal(format!("ingest task failed: {e}")));
    let stopped = accounts.stop_route(Utc::now());

    let exit = joined.map_err(|e| Error::internal(format!("device link task failed: {e}")))?;
    let ingest = ingest?;
    let duration = stopped?.unwrap_or_else(chrono::Duration::zero);

    if ingest.uploads_failed > 0 || ingest.emergency_failures > 0 {
        warn!(
            uploads_failed = ingest.uploads_failed,
            emergency_failures = ingest.emergency_failures,
            "Some uploads failed, rows stay queued for the batch sync"
        );
    }
    info!(reason = %exit, frames = ingest.frames_stored, "Route finished");

    Ok(RouteSummary {
        started_at,
        duration_secs: duration.num_seconds(),
        exit: exit.to_string(),
        ingest,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    use super::*;
    use crate::config::LinkConfig;
    use crate::link::ACK;
    use crate::remote::{MemoryDocumentStore, SENSOR_DATA};

    const FRAME: &str = r#"{"timestamp":1700000000000,"location":{"lat":19.4,"lng":-99.1},"sensors":{"accel":{"x":3,"y":4,"z":0},"gyro":{"x":0,"y":0,"z":0},"speed":30}}"#;

    fn config() -> Config {
        Config {
            link: LinkConfig {
                bind_addr: "127.0.0.1:0".to_string(),
                ..LinkConfig::default()
            },
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_route_stores_and_uploads_until_device_leaves() {
        let config = config();
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let store = Arc::new(MemoryDocumentStore::new());
        let remote: Arc<dyn DocumentStore> = store.clone();
        let service = RouteService::new(Arc::clone(&storage), Some(remote), &config);

        let link = DeviceLink::bind(&config.link).await.unwrap();
        let addr = link.local_addr().unwrap();
        let route = tokio::spawn(async move { service.run(link, std::future::pending()).await });

        let mut device = TcpStream::connect(addr).await.unwrap();
        device.write_all(FRAME.as_bytes()).await.unwrap();
        let mut ack = [0u8; ACK.len()];
        device.read_exact(&mut ack).await.unwrap();
        assert_eq!(&ack, ACK.as_bytes());
        drop(device);

        let summary = tokio::time::timeout(Duration::from_secs(5), route)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(summary.ingest.frames_stored, 1);
        assert_eq!(summary.ingest.uploads_ok, 1);
        assert!(summary.exit.contains("disconnected"));
        assert_eq!(store.count(SENSOR_DATA).unwrap(), 1);
        assert!(storage.route_started_at().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_link_task_still_clears_route() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let accounts = Accounts::new(Arc::clone(&storage));
        let started_at = accounts.start_route(Utc::now()).unwrap();

        let joined: std::result::Result<LinkExit, JoinError> =
            tokio::spawn(async { panic!("link crashed") }).await;
        let ingest_task = tokio::spawn(async { IngestReport::default() });

        let result = finish_route(&accounts, started_at, joined, ingest_task).await;
        assert!(matches!(result, Err(Error::Internal(_))));
        assert!(storage.route_started_at().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_route_stops_on_shutdown() {
        let config = config();
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let service = RouteService::new(Arc::clone(&storage), None, &config);

        let link = DeviceLink::bind(&config.link).await.unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let route = tokio::spawn(async move {
            service
                .run(link, async {
                    let _ = stop_rx.await;
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(storage.route_started_at().unwrap().is_some());

        stop_tx.send(()).unwrap();
        let summary = route.await.unwrap().unwrap();
        assert_eq!(summary.exit, "stopped");
        assert_eq!(summary.ingest, IngestReport::default());
        assert!(storage.route_started_at().unwrap().is_none());
    }
}
