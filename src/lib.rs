//! `beacon-gateway` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing and process exit codes.
//! The core “business logic” lives in [`crate::app`] where it can be tested
//! deterministically with an injected scanner and telemetry sink.

pub mod advertisement;
pub mod app;
pub mod config;
pub mod decoder;
pub mod logging;
pub mod scanner;
pub mod telemetry;
pub mod throttle;
pub mod uploader;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::{Advertisement, DeviceAddress, ManufacturerData};
pub use app::{Options, RunError, RunSummary, Scanner};
pub use decoder::{BeaconFilter, DecodeError, Reading, SkipReason, decode, decode_payload};
pub use scanner::{Backend, ScanError, ScanMode, ScanOptions, ScanSession};
pub use telemetry::{HttpSink, TelemetryPayload, TelemetrySink, UploadError, UploadOutcome};
pub use throttle::{ThrottleGate, parse_duration};
pub use uploader::{Clock, SystemClock, ThrottledUploader};
