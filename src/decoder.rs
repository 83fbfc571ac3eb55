//! Beacon payload decoding.
//!
//! The beacon advertises a compact little-endian struct in its manufacturer
//! data entry:
//!
//! | offset | type  | meaning                              |
//! |--------|-------|--------------------------------------|
//! | 0..2   | `i16` | temperature in hundredths of a degree |
//! | 2      | `u8`  | group identifier (optional)          |
//!
//! The shape is detected from the payload length, so both the two-byte and
//! the three-byte beacon firmware decode without configuration.

use crate::advertisement::Advertisement;
use std::fmt;
use thiserror::Error;

/// Smallest payload that still carries a temperature.
pub const MIN_PAYLOAD_LEN: usize = 2;

/// Which advertisements belong to the beacon we forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconFilter {
    /// Advertised name, compared exactly (case-sensitive)
    pub target_name: String,
    /// Company identifier whose manufacturer data carries the payload
    pub company_id: u16,
}

impl BeaconFilter {
    pub fn new(target_name: impl Into<String>, company_id: u16) -> Self {
        Self {
            target_name: target_name.into(),
            company_id,
        }
    }

    fn matches_name(&self, name: Option<&str>) -> bool {
        name == Some(self.target_name.as_str())
    }
}

/// A decoded beacon reading.
///
/// `group_id` is only present when the beacon sends the three-byte payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Temperature in degrees Celsius with centi-degree resolution
    pub temperature_celsius: f64,
    /// Group identifier of the sending beacon
    pub group_id: Option<u8>,
}

/// Why an advertisement was not for us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NameMismatch,
    MissingCompanyId,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NameMismatch => write!(f, "name does not match target"),
            SkipReason::MissingCompanyId => write!(f, "no manufacturer data for company id"),
        }
    }
}

/// Errors returned by [`decode`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Not the target beacon. Nothing to do, not a failure.
    #[error("Skipped: {0}")]
    Skipped(SkipReason),
    /// The payload is too short to hold a temperature
    #[error("Malformed payload: expected at least {MIN_PAYLOAD_LEN} bytes, got {len}")]
    MalformedPayload { len: usize },
}

impl DecodeError {
    pub fn is_skipped(&self) -> bool {
        matches!(self, DecodeError::Skipped(_))
    }
}

/// Decode an advertisement into a [`Reading`] if it comes from the target beacon.
///
/// Pure function of its inputs; safe to call at any rate from any task.
pub fn decode(advertisement: &Advertisement, filter: &BeaconFilter) -> Result<Reading, DecodeError> {
    let payload = target_payload(advertisement, filter).map_err(DecodeError::Skipped)?;
    decode_payload(payload)
}

/// Raw manufacturer data of the target beacon, before any decoding.
pub fn target_payload<'a>(
    advertisement: &'a Advertisement,
    filter: &BeaconFilter,
) -> Result<&'a [u8], SkipReason> {
    if !filter.matches_name(advertisement.name.as_deref()) {
        return Err(SkipReason::NameMismatch);
    }

    advertisement
        .manufacturer_data
        .get(&filter.company_id)
        .map(Vec::as_slice)
        .ok_or(SkipReason::MissingCompanyId)
}

/// Decode the raw manufacturer data bytes (company id already stripped).
///
/// Bytes past the group id are ignored.
pub fn decode_payload(data: &[u8]) -> Result<Reading, DecodeError> {
    let [lo, hi, rest @ ..] = data else {
        return Err(DecodeError::MalformedPayload { len: data.len() });
    };

    let centi_degrees = i16::from_le_bytes([*lo, *hi]);

    Ok(Reading {
        temperature_celsius: f64::from(centi_degrees) / 100.0,
        group_id: rest.first().copied(),
    })
}

/// Space separated lowercase hex, e.g. `36 09 07`.
pub fn hex_payload(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
