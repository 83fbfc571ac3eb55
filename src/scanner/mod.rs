//! BLE advertisement scanning.
//!
//! This module provides a backend-independent entry point for observing
//! nearby BLE advertisements. Backends only report what they see; filtering
//! for the target beacon happens in [`crate::decoder`].

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::advertisement::Advertisement;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
#[cfg(any(feature = "bluer", feature = "hci"))]
pub const MANUFACTURER_DATA_TYPE: u8 = 0xff;

/// Channel buffer size between a backend and the run loop.
pub const ADVERTISEMENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
            #[cfg(not(any(feature = "bluer", feature = "hci")))]
            _ => unreachable!("Backend enum has no variants when no backend features are enabled"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            #[cfg(feature = "hci")]
            "hci" | "raw" => Ok(Backend::Hci),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Scan mode hint passed to the backend.
///
/// Active scanning requests scan responses, which is where many devices put
/// their name. Passive scanning only listens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ScanMode {
    #[default]
    Active,
    Passive,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Active => write!(f, "active"),
            ScanMode::Passive => write!(f, "passive"),
        }
    }
}

/// Backend-independent scan settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    pub mode: ScanMode,
    /// Company id of interest; backends that can pre-filter in hardware use it
    pub company_id: u16,
}

/// Handle to a running backend task.
///
/// Stopping (or dropping) the handle aborts the task, which releases the
/// backend's Bluetooth resources.
#[derive(Debug)]
pub struct ScanHandle {
    task: JoinHandle<()>,
}

impl ScanHandle {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ScanHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A started scan: the advertisement stream plus the handle that stops it.
#[derive(Debug)]
pub struct ScanSession {
    pub advertisements: mpsc::Receiver<Advertisement>,
    pub handle: ScanHandle,
}

/// Hand an advertisement to the run loop without ever waiting.
///
/// A full channel drops the advertisement. Returns `false` once the receiver
/// is gone and the backend should stop.
pub(crate) fn forward(tx: &mpsc::Sender<Advertisement>, advertisement: Advertisement) -> bool {
    match tx.try_send(advertisement) {
        Ok(()) => true,
        Err(TrySendError::Full(dropped)) => {
            tracing::debug!(address = %dropped.address, "advertisement channel full, dropping");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Start scanning for BLE advertisements using the specified backend.
///
/// This is the main entry point for creating a scanner. It dispatches to the
/// appropriate backend implementation based on the `backend` parameter.
///
/// # Errors
/// Returns `ScanError::Bluetooth` if the adapter cannot be initialized.
pub async fn start_scan(backend: Backend, options: ScanOptions) -> Result<ScanSession, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan(options).await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan(options).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_ADDRESS, beacon};
    use std::str::FromStr;

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::Bluetooth("adapter not found".to_string());
        assert_eq!(format!("{}", err), "Bluetooth error: adapter not found");
    }

    #[cfg(all(feature = "bluer", feature = "hci"))]
    #[test]
    fn test_backend_from_str() {
        assert_eq!(Backend::from_str("bluer").unwrap(), Backend::Bluer);
        assert_eq!(Backend::from_str("BlueZ").unwrap(), Backend::Bluer);
        assert_eq!(Backend::from_str("hci").unwrap(), Backend::Hci);
        assert_eq!(Backend::from_str("raw").unwrap(), Backend::Hci);
        assert!(Backend::from_str("invalid").is_err());
    }

    #[cfg(all(feature = "bluer", feature = "hci"))]
    #[test]
    fn test_backend_display() {
        assert_eq!(format!("{}", Backend::Bluer), "bluer");
        assert_eq!(format!("{}", Backend::Hci), "hci");
    }

    #[test]
    fn test_scan_mode_default_is_active() {
        assert_eq!(ScanMode::default(), ScanMode::Active);
        assert_eq!(ScanMode::Active.to_string(), "active");
        assert_eq!(ScanMode::Passive.to_string(), "passive");
    }

    #[test]
    fn test_forward_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        assert!(forward(&tx, beacon(&[0x01, 0x00])));
        assert!(forward(&tx, beacon(&[0x02, 0x00])));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.manufacturer_data.values().next(), Some(&vec![0x01, 0x00]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_forward_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(!forward(&tx, Advertisement::new(TEST_ADDRESS)));
    }

    #[tokio::test]
    async fn test_scan_handle_stop_aborts_task() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _done = done_tx;
            std::future::pending::<()>().await;
        });

        let handle = ScanHandle::new(task);
        assert!(!handle.is_finished());
        handle.stop();

        // The sender is dropped together with the aborted task.
        assert!(done_rx.await.is_err());
    }
}
