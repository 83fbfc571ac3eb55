//! Core application runner (business logic) for `beacon-gateway`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit codes
//! so it can be tested deterministically with an injected scanner and sink.

use crate::advertisement::Advertisement;
use crate::config::{ACCESS_TOKEN_ENV, parse_company_id};
use crate::decoder::{self, BeaconFilter, hex_payload};
use crate::scanner::{Backend, ScanError, ScanMode, ScanOptions, ScanSession};
use crate::telemetry::{HttpSink, UploadError, UploadResult};
use crate::throttle::{ThrottleGate, parse_duration};
use crate::uploader::ThrottledUploader;
use clap::Parser;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};

/// Gateway configuration, read once at startup.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Advertised name of the beacon to forward (exact, case-sensitive match).
    #[arg(long, default_value = crate::config::DEFAULT_TARGET_NAME)]
    pub target_name: String,

    /// Company identifier whose manufacturer data carries the payload.
    /// Hex with 0x prefix or decimal.
    #[arg(long, default_value_t = crate::config::DEFAULT_COMPANY_ID, value_parser = parse_company_id)]
    pub company_id: u16,

    /// Base URL of the telemetry HTTP API.
    #[arg(long, default_value = crate::config::DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Device access token, inserted into the telemetry URL.
    #[arg(long, env = ACCESS_TOKEN_ENV, hide_env_values = true)]
    pub access_token: String,

    /// Upload at most one reading per interval.
    /// Accepts duration with suffix: 1s, 1.5s, 500ms, 1m.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub upload_interval: Duration,

    /// Timeout for a single upload request.
    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    pub upload_timeout: Duration,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Active scanning requests scan responses; passive only listens
    #[arg(long, default_value_t, value_enum)]
    pub scan_mode: ScanMode,

    /// Verbose output, log filtered advertisements and raw payloads
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    pub fn beacon_filter(&self) -> BeaconFilter {
        BeaconFilter::new(self.target_name.clone(), self.company_id)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            mode: self.scan_mode,
            company_id: self.company_id,
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("failed to create telemetry client: {0}")]
    Sink(#[from] UploadError),
    /// The backend closed the advertisement stream without being asked to.
    #[error("advertisement stream closed unexpectedly")]
    ScanEnded(RunSummary),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
        options: ScanOptions,
    ) -> Pin<Box<dyn Future<Output = Result<ScanSession, ScanError>> + Send + '_>>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
        options: ScanOptions,
    ) -> Pin<Box<dyn Future<Output = Result<ScanSession, ScanError>> + Send + '_>> {
        Box::pin(async move { crate::scanner::start_scan(backend, options).await })
    }
}

/// Counters for one gateway run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Advertisements received from the scanner
    pub advertisements: u64,
    /// Advertisements that were not from the target beacon
    pub skipped: u64,
    /// Target beacon advertisements with an undecodable payload
    pub malformed: u64,
    /// Readings dropped by the throttle gate
    pub throttled: u64,
    /// Uploads started
    pub uploads: u64,
    /// Uploads the sink answered with 200
    pub accepted: u64,
    /// Uploads that were rejected or never reached the sink
    pub failed: u64,
}

impl RunSummary {
    fn record_upload(&mut self, joined: Result<UploadResult, JoinError>) {
        match joined {
            Ok(Ok(outcome)) if outcome.is_accepted() => self.accepted += 1,
            Ok(_) => self.failed += 1,
            // Cancelled on shutdown; not a failure of the upload itself.
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                tracing::error!(error = %e, "upload task panicked");
                self.failed += 1;
            }
        }
    }
}

/// Decode one advertisement and offer the reading to the uploader.
fn process_advertisement(
    advertisement: &Advertisement,
    filter: &BeaconFilter,
    uploader: &ThrottledUploader,
    uploads: &mut JoinSet<UploadResult>,
    summary: &mut RunSummary,
) {
    summary.advertisements += 1;

    let raw = match decoder::target_payload(advertisement, filter) {
        Ok(raw) => raw,
        Err(reason) => {
            summary.skipped += 1;
            tracing::debug!(
                address = %advertisement.address,
                name = ?advertisement.name,
                %reason,
                "advertisement skipped"
            );
            return;
        }
    };

    tracing::debug!(address = %advertisement.address, payload = %hex_payload(raw), "beacon payload");

    match decoder::decode_payload(raw) {
        Ok(reading) => {
            tracing::info!(
                address = %advertisement.address,
                temperature = reading.temperature_celsius,
                group_id = ?reading.group_id,
                "beacon reading received"
            );

            match uploader.handle(&reading) {
                Some(task) => {
                    summary.uploads += 1;
                    uploads.spawn(task);
                }
                None => summary.throttled += 1,
            }
        }
        Err(error) => {
            summary.malformed += 1;
            tracing::error!(address = %advertisement.address, %error, "dropping beacon advertisement");
        }
    }
}

/// Run the gateway until `shutdown` resolves.
///
/// - Each advertisement is decoded; readings are offered to `uploader` and
///   accepted uploads run as independent tasks.
/// - On shutdown the scanner is stopped and in-flight uploads are abandoned.
/// - If the scanner stream ends on its own, in-flight uploads are awaited and
///   `RunError::ScanEnded` is returned.
pub async fn run_until(
    options: &Options,
    scanner: &dyn Scanner,
    uploader: &ThrottledUploader,
    shutdown: impl Future<Output = ()>,
) -> Result<RunSummary, RunError> {
    let filter = options.beacon_filter();
    let ScanSession {
        mut advertisements,
        handle,
    } = scanner
        .start_scan(options.backend, options.scan_options())
        .await?;

    tracing::info!(
        target_name = %filter.target_name,
        company_id = %format!("{:#06x}", filter.company_id),
        backend = %options.backend,
        scan_mode = %options.scan_mode,
        "scanning for beacon"
    );

    let mut uploads = JoinSet::new();
    let mut summary = RunSummary::default();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown requested, stopping scanner");
                handle.stop();
                uploads.abort_all();
                return Ok(summary);
            }
            Some(joined) = uploads.join_next(), if !uploads.is_empty() => {
                summary.record_upload(joined);
            }
            advertisement = advertisements.recv() => match advertisement {
                Some(advertisement) => process_advertisement(
                    &advertisement,
                    &filter,
                    uploader,
                    &mut uploads,
                    &mut summary,
                ),
                None => break,
            },
        }
    }

    tracing::warn!("advertisement stream closed");
    while let Some(joined) = uploads.join_next().await {
        summary.record_upload(joined);
    }

    Err(RunError::ScanEnded(summary))
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Wire the real HTTP sink and scanner and run until interrupted.
///
/// # Errors
/// Returns `RunError` if the HTTP client or the Bluetooth scanner cannot be
/// initialized, or `RunError::ScanEnded` if the scanner stops on its own.
pub async fn run(options: Options) -> Result<RunSummary, RunError> {
    let sink = HttpSink::new(&options.base_url, &options.access_token, options.upload_timeout)?;
    let uploader =
        ThrottledUploader::new(ThrottleGate::new(options.upload_interval), Arc::new(sink));

    tracing::info!(target_name = %options.target_name, "starting gateway");

    run_until(&options, &RealScanner, &uploader, shutdown_signal()).await
}
