//! Throttled, fire-and-forget forwarding of readings to the telemetry sink.
//!
//! [`ThrottledUploader::handle`] runs the gate check under a lock and hands
//! back the upload as a `'static` future. The caller decides where it runs;
//! the run loop spawns it so the advertisement path never waits on HTTP.

use crate::decoder::Reading;
use crate::telemetry::{TelemetryPayload, TelemetrySink, UploadOutcome, UploadResult};
use crate::throttle::ThrottleGate;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// An accepted upload, ready to be awaited or spawned.
pub type UploadTask = Pin<Box<dyn Future<Output = UploadResult> + Send + 'static>>;

/// Source of "now" for the throttle gate.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Monotonic system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Forwards at most one reading per throttle interval to a [`TelemetrySink`].
pub struct ThrottledUploader {
    gate: Mutex<ThrottleGate>,
    sink: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
}

impl ThrottledUploader {
    pub fn new(gate: ThrottleGate, sink: Arc<dyn TelemetrySink>) -> Self {
        Self::with_clock(gate, sink, Arc::new(SystemClock))
    }

    pub fn with_clock(gate: ThrottleGate, sink: Arc<dyn TelemetrySink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            gate: Mutex::new(gate),
            sink,
            clock,
        }
    }

    /// Offer a reading for upload.
    ///
    /// Returns `None` when the throttle window is still closed; the reading
    /// is dropped. Otherwise the window is consumed *before* anything is sent
    /// and the returned task performs exactly one POST, logging its outcome.
    /// The task never retries and its result is informational only.
    pub fn handle(&self, reading: &Reading) -> Option<UploadTask> {
        let now = self.clock.now();

        if !self.try_open_gate(now) {
            tracing::trace!(
                temperature = reading.temperature_celsius,
                "upload throttled"
            );
            return None;
        }

        let payload = TelemetryPayload::from(reading);
        let sink = Arc::clone(&self.sink);

        Some(Box::pin(async move {
            if let Ok(body) = serde_json::to_string(&payload) {
                tracing::debug!(%body, "uploading telemetry");
            }
            let result = sink.post(&payload).await;
            log_upload_result(&payload, &result);
            result
        }))
    }

    fn try_open_gate(&self, now: Instant) -> bool {
        // A panic elsewhere cannot leave the gate half-updated, so a poisoned
        // lock is still safe to use.
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        gate.try_acquire(now)
    }
}

fn log_upload_result(payload: &TelemetryPayload, result: &UploadResult) {
    match result {
        Ok(UploadOutcome::Accepted) => tracing::info!(
            temperature = payload.temperature,
            group_id = ?payload.group_id,
            "cloud upload succeeded"
        ),
        Ok(UploadOutcome::BadRequest) => {
            tracing::warn!("cloud upload rejected: invalid URL, request parameters or body")
        }
        Ok(UploadOutcome::InvalidToken) => {
            tracing::error!("cloud upload rejected: invalid access token")
        }
        Ok(UploadOutcome::Rejected(status)) => {
            tracing::warn!(status, "cloud upload rejected")
        }
        Err(error) => tracing::warn!(%error, "cloud connection failed"),
    }
}
