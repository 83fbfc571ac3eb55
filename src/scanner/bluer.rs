//! BlueZ D-Bus backend for advertisement scanning.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! - Active mode runs LE discovery and reports every device whose
//!   advertised properties change.
//! - Passive mode registers an advertisement monitor matching the
//!   configured company id.

use super::{
    ADVERTISEMENT_CHANNEL_BUFFER_SIZE, MANUFACTURER_DATA_TYPE, ScanError, ScanHandle, ScanMode,
    ScanOptions, ScanSession, forward,
};
use crate::advertisement::Advertisement;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start scanning for advertisements using the BlueZ D-Bus backend.
///
/// Powers the default adapter on and spawns the event loop. Observed
/// advertisements are sent through the returned session. Runs until the
/// session handle is stopped or the receiver is dropped.
pub async fn start_scan(options: ScanOptions) -> Result<ScanSession, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    tracing::debug!(adapter = adapter.name(), mode = %options.mode, "BlueZ adapter ready");

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    let task = match options.mode {
        ScanMode::Active => spawn_discovery(session, adapter, tx).await?,
        ScanMode::Passive => spawn_monitor(session, adapter, options.company_id, tx).await?,
    };

    Ok(ScanSession {
        advertisements: rx,
        handle: ScanHandle::new(task),
    })
}

async fn spawn_discovery(
    session: Session,
    adapter: Adapter,
    tx: mpsc::Sender<Advertisement>,
) -> Result<JoinHandle<()>, ScanError> {
    // Report repeated advertisements, not only the first sighting
    let filter = DiscoveryFilter {
        transport: DiscoveryTransport::Le,
        duplicate_data: true,
        ..Default::default()
    };
    adapter.set_discovery_filter(filter).await?;

    let events = adapter.discover_devices_with_changes().await?;

    // Spawn a task that owns all Bluetooth state and runs the event loop.
    // Dropping the event stream ends discovery.
    Ok(tokio::spawn(async move {
        let _session = session;
        let mut events = std::pin::pin!(events);

        while let Some(event) = events.next().await {
            if let AdapterEvent::DeviceAdded(address) = event
                && !report_device(&adapter, address, &tx).await
            {
                break;
            }
        }
    }))
}

async fn spawn_monitor(
    session: Session,
    adapter: Adapter,
    company_id: u16,
    tx: mpsc::Sender<Advertisement>,
) -> Result<JoinHandle<()>, ScanError> {
    // Manufacturer data starts with the company id in little-endian order
    let pattern = Pattern {
        data_type: MANUFACTURER_DATA_TYPE,
        start_position: 0,
        content: company_id.to_le_bytes().to_vec(),
    };

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(vec![pattern]),
            ..Default::default()
        })
        .await?;

    Ok(tokio::spawn(async move {
        // Keep all Bluetooth state alive by moving it into this task
        let _session = session;
        let _monitor_manager = monitor_manager;

        while let Some(event) = monitor_handle.next().await {
            if let MonitorEvent::DeviceFound(device_id) = event
                && !report_device(&adapter, device_id.device, &tx).await
            {
                break;
            }
        }
    }))
}

/// Read a device's advertised properties and forward them.
///
/// Returns `false` once the receiving side is gone.
async fn report_device(
    adapter: &Adapter,
    address: Address,
    tx: &mpsc::Sender<Advertisement>,
) -> bool {
    match read_advertisement(adapter, address).await {
        Ok(advertisement) => forward(tx, advertisement),
        Err(error) => {
            tracing::debug!(%address, %error, "could not read device properties");
            true
        }
    }
}

async fn read_advertisement(adapter: &Adapter, address: Address) -> Result<Advertisement, ScanError> {
    let device = adapter.device(address)?;

    Ok(Advertisement {
        address: address.into(),
        name: device.name().await?,
        manufacturer_data: device.manufacturer_data().await?.unwrap_or_default(),
    })
}
