//! Gateway defaults and configuration value parsers.
//!
//! Every setting is a CLI flag (see [`crate::app::Options`]) whose default is
//! one of the constants below. Values are read once at startup.

use std::time::Duration;

/// Advertised name of the beacon firmware.
pub const DEFAULT_TARGET_NAME: &str = "Lab4-Adv";

/// Nordic Semiconductor ASA, the company id the beacon firmware advertises under.
pub const DEFAULT_COMPANY_ID: u16 = 0x0059;

/// ThingsBoard demo instance HTTP device API.
pub const DEFAULT_BASE_URL: &str = "https://demo.thingsboard.io/api/v1";

pub const DEFAULT_UPLOAD_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(2);

/// Environment variable holding the device access token.
pub const ACCESS_TOKEN_ENV: &str = "GATEWAY_ACCESS_TOKEN";

/// Parse a 16-bit company identifier, written as hex (`0x0059`) or decimal (`89`).
///
/// # Examples
/// ```
/// use beacon_gateway::config::parse_company_id;
///
/// assert_eq!(parse_company_id("0x0059").unwrap(), 0x0059);
/// assert_eq!(parse_company_id("89").unwrap(), 0x0059);
/// ```
pub fn parse_company_id(src: &str) -> Result<u16, String> {
    let src = src.trim();

    let parsed = match src
        .strip_prefix("0x")
        .or_else(|| src.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => src.parse::<u16>(),
    };

    parsed.map_err(|e| format!("invalid company id '{src}': {e}"))
}
