//! Ingest pipeline: decode, persist, classify, upload.
//!
//! Every frame from the device link is decoded and stored as a sensor
//! sample plus its acceleration magnitude. Frames that cross the crash
//! thresholds also produce an accident row. Stored frames are then handed to
//! supervised upload tasks; their results are folded into an
//! [`IngestReport`] so failures are visible to the caller.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::link::InboundFrame;
use crate::records::{AccidentEvent, SensorSample, SpeedSample};
use crate::storage::Storage;
use crate::sync::{EmergencyUpload, Uploader};
use crate::telemetry::{self, Magnitudes, Thresholds};

/// A frame that made it into the local store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFrame {
    /// The stored sample, with its row id.
    pub sample: SensorSample,
    /// Vector magnitudes of the frame.
    pub magnitudes: Magnitudes,
    /// The accident row, when the frame crossed a threshold.
    pub accident: Option<AccidentEvent>,
}

/// Result of persisting one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Persisted {
    /// New frame, stored.
    Stored(StoredFrame),
    /// Identical frame already stored; nothing was written.
    Duplicate,
}

/// Counters for one ingest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Frames received from the link.
    pub frames_received: u64,
    /// Frames stored.
    pub frames_stored: u64,
    /// Frames dropped as repeats.
    pub duplicates: u64,
    /// Frames that failed to decode.
    pub decode_failures: u64,
    /// Frames that could not be written locally.
    pub storage_failures: u64,
    /// Accident rows written.
    pub accidents: u64,
    /// Samples acknowledged by the remote store.
    pub uploads_ok: u64,
    /// Samples the remote store did not acknowledge.
    pub uploads_failed: u64,
    /// Emergency documents acknowledged.
    pub emergencies_sent: u64,
    /// Emergency uploads skipped for lack of a session.
    pub emergencies_skipped: u64,
    /// Emergency uploads that failed.
    pub emergency_failures: u64,
    /// Upload tasks that panicked or were cancelled.
    pub task_failures: u64,
}

#[derive(Debug)]
struct UploadResult {
    sample: Result<usize>,
    emergency: Option<Result<EmergencyUpload>>,
}

impl IngestReport {
    fn record_upload(&mut self, joined: std::result::Result<UploadResult, JoinError>) {
        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Upload task failed");
                self.task_failures += 1;
                return;
            }
        };

        match result.sample {
            Ok(_) => self.uploads_ok += 1,
            Err(_) => self.uploads_failed += 1,
        }

        match result.emergency {
            Some(Ok(EmergencyUpload::Uploaded(_))) => self.emergencies_sent += 1,
            Some(Ok(EmergencyUpload::NoSession)) => self.emergencies_skipped += 1,
            Some(Err(_)) => self.emergency_failures += 1,
            None => {}
        }
    }
}

/// Turns device frames into stored rows and remote uploads.
#[derive(Debug, Clone)]
pub struct IngestPipeline {
    storage: Arc<Storage>,
    uploader: Option<Uploader>,
    thresholds: Thresholds,
}

impl IngestPipeline {
    /// Create a pipeline. Without an uploader frames are only stored locally.
    #[must_use]
    pub fn new(storage: Arc<Storage>, uploader: Option<Uploader>, thresholds: Thresholds) -> Self {
        Self {
            storage,
            uploader,
            thresholds,
        }
    }

    /// Decode and store one frame.
    ///
    /// # Errors
    ///
    /// Returns a decode error for malformed text, or a storage error.
    pub fn persist(&self, text: &str) -> Result<Persisted> {
        let frame = telemetry::decode(text)?;
        let hash = telemetry::frame_hash(text);

        let mut sample = SensorSample::from_frame(&frame, hash);
        let Some(id) = self.storage.insert_sensor_sample(&sample)? else {
            return Ok(Persisted::Duplicate);
        };
        sample.id = Some(id);

        let magnitudes = frame.magnitudes();
        self.storage
            .insert_speed_sample(&SpeedSample::new(sample.timestamp.clone(), magnitudes.accel))?;

        let accident = if telemetry::classify(magnitudes, &self.thresholds).is_accident() {
            let mut event = AccidentEvent::from_frame(&frame, magnitudes);
            event.id = Some(self.storage.insert_accident(&event)?);
            warn!(
                timestamp = %event.timestamp,
                accel = magnitudes.accel,
                gyro = magnitudes.gyro,
                "Possible accident detected"
            );
            Some(event)
        } else {
            None
        };

        Ok(Persisted::Stored(StoredFrame {
            sample,
            magnitudes,
            accident,
        }))
    }

    /// Consume frames until the channel closes, then wait for every upload.
    pub async fn run(&self, mut frames: mpsc::Receiver<InboundFrame>) -> IngestReport {
        let mut report = IngestReport::default();
        let mut uploads: JoinSet<UploadResult> = JoinSet::new();

        loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Some(frame) => self.handle(&frame, &mut report, &mut uploads),
                    None => break,
                },
                Some(joined) = uploads.join_next(), if !uploads.is_empty() => {
                    report.record_upload(joined);
                }
            }
        }

        while let Some(joined) = uploads.join_next().await {
            report.record_upload(joined);
        }

        debug!(?report, "Ingest finished");
        report
    }

    fn handle(
        &self,
        frame: &InboundFrame,
        report: &mut IngestReport,
        uploads: &mut JoinSet<UploadResult>,
    ) {
        report.frames_received += 1;

        let stored = match self.persist(&frame.text) {
            Ok(Persisted::Stored(stored)) => stored,
            Ok(Persisted::Duplicate) => {
                debug!(peer = %frame.peer, "Dropped duplicate frame");
                report.duplicates += 1;
                return;
            }
            Err(e) if e.is_decode_error() => {
                warn!(peer = %frame.peer, error = %e, "Dropping malformed frame");
                report.decode_failures += 1;
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to store frame");
                report.storage_failures += 1;
                return;
            }
        };

        report.frames_stored += 1;
        if stored.accident.is_some() {
            report.accidents += 1;
        }

        if let Some(uploader) = &self.uploader {
            let uploader = uploader.clone();
            uploads.spawn(async move {
                let emergency = if stored.accident.is_some() {
                    Some(uploader.upload_emergency(&stored.sample).await)
                } else {
                    None
                };
                let sample = uploader.upload_sample(&stored.sample).await;
                UploadResult { sample, emergency }
            });
        }
    }
}
