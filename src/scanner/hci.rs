//! Raw HCI socket backend for advertisement scanning.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.

use super::{
    ADVERTISEMENT_CHANNEL_BUFFER_SIZE, MANUFACTURER_DATA_TYPE, ScanError, ScanHandle, ScanMode,
    ScanOptions, ScanSession, forward,
};
use crate::advertisement::{Advertisement, DeviceAddress};
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_FILTER: c_int = 2;
const SOL_HCI: c_int = 0;
const HCI_DEV_ID: u16 = 0;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan types
const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_SCAN_ACTIVE: u8 = 0x01;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

// AD types
const AD_TYPE_SHORTENED_LOCAL_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;

/// Max HCI event size: 1 byte packet type + 2 byte header + 255 bytes params
const HCI_MAX_EVENT_SIZE: usize = 258;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// `LE Set Scan Parameters` with a 10ms interval and window.
fn scan_parameters_packet(mode: ScanMode) -> Vec<u8> {
    let scan_type = match mode {
        ScanMode::Active => LE_SCAN_ACTIVE,
        ScanMode::Passive => LE_SCAN_PASSIVE,
    };
    // Interval and window are in 0.625ms units
    let interval: u16 = 0x0010;
    let window: u16 = 0x0010;

    let mut params = Vec::with_capacity(7);
    params.push(scan_type);
    params.extend_from_slice(&interval.to_le_bytes());
    params.extend_from_slice(&window.to_le_bytes());
    params.push(LE_PUBLIC_ADDRESS);
    params.push(FILTER_POLICY_ACCEPT_ALL);

    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &params)
}

/// `LE Set Scan Enable`. Duplicates are not filtered so every advertisement is reported.
fn scan_enable_packet(enable: bool) -> Vec<u8> {
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[u8::from(enable), 0x00])
}

/// Open a raw HCI socket
fn open_hci_socket() -> Result<OwnedFd, ScanError> {
    // Create a raw Bluetooth HCI socket using libc directly
    // since nix doesn't support BTPROTO_HCI
    // SOCK_NONBLOCK is required for AsyncFd to work properly
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };

    if fd < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to create HCI socket: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Bind HCI socket to a device
fn bind_hci_socket(fd: &OwnedFd, dev_id: u16) -> Result<(), ScanError> {
    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: 0, // HCI_CHANNEL_RAW
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to bind HCI socket: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Only let LE meta events through to the event socket
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_HCI,
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to set HCI filter: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Send an HCI command
fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> Result<(), ScanError> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to send HCI command: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Command socket with LE scanning enabled. Disables scanning when dropped.
struct ActiveScan {
    cmd_fd: OwnedFd,
}

impl ActiveScan {
    fn start(cmd_fd: OwnedFd, mode: ScanMode) -> Result<Self, ScanError> {
        send_hci_command(&cmd_fd, &scan_parameters_packet(mode))?;
        send_hci_command(&cmd_fd, &scan_enable_packet(true))?;
        Ok(Self { cmd_fd })
    }
}

impl Drop for ActiveScan {
    fn drop(&mut self) {
        if let Err(error) = send_hci_command(&self.cmd_fd, &scan_enable_packet(false)) {
            tracing::warn!(%error, "failed to disable LE scanning");
        } else {
            tracing::debug!("LE scanning disabled");
        }
    }
}

/// Parse the AD structures of one advertising report.
///
/// Complete local names win over shortened ones. Manufacturer data entries
/// are keyed by their little-endian company id with the id stripped.
fn parse_ad_structures(address: DeviceAddress, ad_data: &[u8]) -> Advertisement {
    let mut advertisement = Advertisement::new(address);
    let mut complete_name = false;

    let mut offset = 0;
    while offset + 2 <= ad_data.len() {
        let len = ad_data[offset] as usize;
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }

        let ad_type = ad_data[offset + 1];
        let value = &ad_data[offset + 2..offset + 1 + len];

        match ad_type {
            AD_TYPE_COMPLETE_LOCAL_NAME => {
                advertisement.name = Some(String::from_utf8_lossy(value).into_owned());
                complete_name = true;
            }
            AD_TYPE_SHORTENED_LOCAL_NAME if !complete_name => {
                advertisement.name = Some(String::from_utf8_lossy(value).into_owned());
            }
            MANUFACTURER_DATA_TYPE if value.len() >= 2 => {
                let company_id = u16::from_le_bytes([value[0], value[1]]);
                advertisement
                    .manufacturer_data
                    .insert(company_id, value[2..].to_vec());
            }
            _ => {}
        }

        offset += 1 + len;
    }

    advertisement
}

/// Upper bound on devices remembered by [`DeviceCache`].
const MAX_CACHED_DEVICES: usize = 256;

/// Per-device view merged across reports.
///
/// In active mode a device may send its name in the scan response and its
/// manufacturer data in the advertising PDU. Each report only carries one
/// of them, so the last seen value of each field is kept per address.
#[derive(Debug, Default)]
struct DeviceCache {
    devices: HashMap<DeviceAddress, Advertisement>,
}

impl DeviceCache {
    fn merge(&mut self, report: Advertisement) -> Advertisement {
        if self.devices.len() >= MAX_CACHED_DEVICES && !self.devices.contains_key(&report.address) {
            self.devices.clear();
        }

        let known = self
            .devices
            .entry(report.address)
            .or_insert_with(|| Advertisement::new(report.address));

        if report.name.is_some() {
            known.name = report.name;
        }
        known.manufacturer_data.extend(report.manufacturer_data);

        known.clone()
    }
}

/// Parse every report in an LE Advertising Report event packet.
///
/// Layout: packet type, event code, parameter length, subevent, report
/// count, then per report: event type, address type, address (6, little
/// endian), data length, data, RSSI. Truncated reports end parsing.
fn parse_advertising_reports(packet: &[u8]) -> Vec<Advertisement> {
    let Some((&num_reports, mut rest)) = packet.get(4..).and_then(<[u8]>::split_first) else {
        return Vec::new();
    };

    let mut advertisements = Vec::with_capacity(num_reports as usize);
    for _ in 0..num_reports {
        // event type(1) + address type(1) + address(6) + data length(1)
        if rest.len() < 9 {
            break;
        }

        let mut addr = [0u8; 6];
        addr.copy_from_slice(&rest[2..8]);
        let data_len = rest[8] as usize;

        let Some(ad_data) = rest.get(9..9 + data_len) else {
            break;
        };
        advertisements.push(parse_ad_structures(
            DeviceAddress::from_le_bytes(addr),
            ad_data,
        ));

        // Skip the trailing RSSI byte
        rest = rest.get(9 + data_len + 1..).unwrap_or_default();
    }

    advertisements
}

fn is_advertising_report(packet: &[u8]) -> bool {
    packet.len() >= 4
        && packet[0] == HCI_EVENT_PKT
        && packet[1] == EVT_LE_META_EVENT
        && packet[3] == EVT_LE_ADVERTISING_REPORT
}

/// Start scanning for advertisements using raw HCI sockets.
///
/// This function opens a raw HCI socket, configures LE scanning, and
/// processes advertising reports. Observed advertisements are sent through
/// the returned session. Stopping the session disables LE scanning.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (typically hci0)
pub async fn start_scan(options: ScanOptions) -> Result<ScanSession, ScanError> {
    // Open and configure HCI socket for receiving events
    let fd = open_hci_socket()?;
    bind_hci_socket(&fd, HCI_DEV_ID)?;
    set_hci_filter(&fd)?;

    // We need a separate socket for sending commands (bound to specific device)
    let cmd_fd = open_hci_socket()?;
    bind_hci_socket(&cmd_fd, HCI_DEV_ID)?;
    let active_scan = ActiveScan::start(cmd_fd, options.mode)?;

    tracing::debug!(device = HCI_DEV_ID, mode = %options.mode, "HCI LE scan enabled");

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    // Wrap in AsyncFd for async I/O
    let async_fd = AsyncFd::new(fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

    let task = tokio::spawn(async move {
        let _active_scan = active_scan;
        let mut devices = DeviceCache::default();
        let mut buf = [0u8; HCI_MAX_EVENT_SIZE];

        'events: loop {
            // Wait for the socket to be readable
            let mut guard = match async_fd.readable().await {
                Ok(guard) => guard,
                Err(error) => {
                    tracing::warn!(%error, "HCI socket failed");
                    break;
                }
            };

            // Drain all available packets before waiting again
            loop {
                let n = match guard.try_io(|inner| {
                    let ret = unsafe {
                        libc::read(
                            inner.as_raw_fd(),
                            buf.as_mut_ptr() as *mut c_void,
                            buf.len(),
                        )
                    };
                    if ret < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(ret as usize)
                    }
                }) {
                    Ok(Ok(n)) if n > 0 => n,
                    Ok(Ok(_)) => break,  // EOF or empty read
                    Ok(Err(_)) => break, // Read error
                    Err(_) => break,     // WouldBlock - no more data
                };

                if !is_advertising_report(&buf[..n]) {
                    continue;
                }

                for report in parse_advertising_reports(&buf[..n]) {
                    if !forward(&tx, devices.merge(report)) {
                        break 'events;
                    }
                }
            }
        }
    });

    Ok(ScanSession {
        advertisements: rx,
        handle: ScanHandle::new(task),
    })
}
