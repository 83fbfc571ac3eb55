use crate::advertisement::{Advertisement, DeviceAddress};
use crate::decoder::BeaconFilter;
use crate::telemetry::{TelemetryPayload, TelemetrySink, UploadError, UploadOutcome, UploadResult};
use crate::uploader::Clock;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A stable device address for unit tests.
pub const TEST_ADDRESS: DeviceAddress = DeviceAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

pub const TEST_NAME: &str = "Lab4-Adv";

pub const TEST_COMPANY_ID: u16 = 0x0059;

pub fn test_filter() -> BeaconFilter {
    BeaconFilter::new(TEST_NAME, TEST_COMPANY_ID)
}

/// Build an advertisement from the target beacon carrying `payload`.
pub fn beacon(payload: &[u8]) -> Advertisement {
    Advertisement::new(TEST_ADDRESS)
        .with_name(TEST_NAME)
        .with_manufacturer_data(TEST_COMPANY_ID, payload)
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}

/// A sink that records every payload and replays scripted results.
///
/// Once the script runs out every post is accepted.
#[derive(Debug, Default)]
pub struct RecordingSink {
    posted: Mutex<Vec<TelemetryPayload>>,
    script: Mutex<VecDeque<UploadResult>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(results: impl IntoIterator<Item = UploadResult>) -> Self {
        Self {
            posted: Mutex::default(),
            script: Mutex::new(results.into_iter().collect()),
        }
    }

    pub fn posted(&self) -> Vec<TelemetryPayload> {
        self.posted.lock().unwrap().clone()
    }
}

impl TelemetrySink for RecordingSink {
    fn post<'a>(
        &'a self,
        payload: &'a TelemetryPayload,
    ) -> Pin<Box<dyn Future<Output = UploadResult> + Send + 'a>> {
        self.posted.lock().unwrap().push(payload.clone());
        let result = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(UploadOutcome::Accepted));
        Box::pin(async move { result })
    }
}

pub fn connect_error() -> UploadError {
    UploadError::Connect("connection refused".to_string())
}
