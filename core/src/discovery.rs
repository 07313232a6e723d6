// SPDX-License-Identifier: MIT OR Apache-2.0

//! Discovery announcement datagrams
//!
//! A host advertises itself with a bare `GD_LAN:<display name>` payload.
//! There is no length prefix and no checksum; anything else arriving on the
//! discovery port is unrelated traffic.

use crate::ProtocolError;

/// Literal prefix of every announcement
pub const DISCOVERY_PREFIX: &str = "GD_LAN:";

/// Name announced when the host has none
pub const FALLBACK_DISPLAY_NAME: &str = "Unknown Level";

/// Build the datagram payload announcing `display_name`
pub fn encode_announcement(display_name: &str) -> Vec<u8> {
    let name = display_name.trim();
    let name = if name.is_empty() {
        FALLBACK_DISPLAY_NAME
    } else {
        name
    };
    format!("{}{}", DISCOVERY_PREFIX, name).into_bytes()
}

/// Extract the display name from an announcement datagram
pub fn parse_announcement(payload: &[u8]) -> Result<String, ProtocolError> {
    let rest = payload
        .strip_prefix(DISCOVERY_PREFIX.as_bytes())
        .ok_or(ProtocolError::NotAnAnnouncement)?;
    let name = std::str::from_utf8(rest).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok(name
        .trim_end_matches(|c| c == '\0' || c == '\r' || c == '\n')
        .to_string())
}
