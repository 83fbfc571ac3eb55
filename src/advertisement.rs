//! Advertisement data as delivered by the scanner backends.
//!
//! An [`Advertisement`] only lives for one trip through the pipeline: the
//! backend builds it, the run loop decodes it, and it is dropped.

use std::collections::HashMap;
use std::fmt;

/// Manufacturer-specific data keyed by the 16-bit company identifier.
pub type ManufacturerData = HashMap<u16, Vec<u8>>;

/// Bluetooth device address in display (most significant byte first) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceAddress(pub [u8; 6]);

impl DeviceAddress {
    /// Build an address from the little-endian byte order used in HCI packets.
    pub fn from_le_bytes(mut bytes: [u8; 6]) -> Self {
        bytes.reverse();
        Self(bytes)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for DeviceAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

/// One observed BLE advertisement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Advertisement {
    /// Address of the advertising device
    pub address: DeviceAddress,
    /// Advertised local name, if the packet carried one
    pub name: Option<String>,
    /// Manufacturer data entries
    pub manufacturer_data: ManufacturerData,
}

impl Advertisement {
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_manufacturer_data(mut self, company_id: u16, data: impl Into<Vec<u8>>) -> Self {
        self.manufacturer_data.insert(company_id, data.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let addr = DeviceAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(addr.to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_display_pads_with_zeros() {
        let addr = DeviceAddress([0x00, 0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(addr.to_string(), "00:01:02:03:04:05");
    }

    #[test]
    fn test_from_le_bytes_reverses() {
        let addr = DeviceAddress::from_le_bytes([0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(addr, DeviceAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]));
    }

    #[test]
    fn test_builder() {
        let adv = Advertisement::new(DeviceAddress::default())
            .with_name("Lab4-Adv")
            .with_manufacturer_data(0x0059, [0x36, 0x09]);

        assert_eq!(adv.name.as_deref(), Some("Lab4-Adv"));
        assert_eq!(adv.manufacturer_data.get(&0x0059), Some(&vec![0x36, 0x09]));
        assert_eq!(adv.manufacturer_data.len(), 1);
    }

    #[cfg(feature = "bluer")]
    #[test]
    fn test_from_bluer_address() {
        let addr = bluer::Address([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let device: DeviceAddress = addr.into();
        assert_eq!(device, DeviceAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]));
    }
}
