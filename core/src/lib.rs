// SPDX-License-Identifier: MIT OR Apache-2.0

//! LAN Link Core - Wire formats for the local session protocol
//!
//! This crate provides the I/O-free pieces shared by every peer:
//! - Session message framing (`type,field,field,...` lines)
//! - Object placement events (message type `1`)
//! - Discovery announcements (`GD_LAN:<name>` datagrams)

#![deny(unsafe_code)]
#![deny(clippy::all)]

pub mod discovery;
pub mod message;

use thiserror::Error;

/// Default TCP port for session traffic
pub const SESSION_PORT: u16 = 54321;

/// Default UDP port for discovery beacons
pub const DISCOVERY_PORT: u16 = 54322;

/// Errors produced while encoding or decoding wire data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The line carried no type field at all
    #[error("Empty message line")]
    EmptyLine,

    /// A field required by the message type was absent
    #[error("Message type {kind} is missing field `{field}`")]
    MissingField {
        /// Message type code
        kind: String,
        /// Name of the absent field
        field: &'static str,
    },

    /// A field was present but could not be parsed
    #[error("Invalid value {value:?} for field `{field}`")]
    InvalidField {
        /// Name of the offending field
        field: &'static str,
        /// Raw text that failed to parse
        value: String,
    },

    /// Outgoing text contained the line delimiter
    #[error("Message text contains a line delimiter")]
    EmbeddedDelimiter,

    /// Datagram does not start with the discovery prefix
    #[error("Datagram is not a discovery announcement")]
    NotAnAnnouncement,

    /// Payload bytes were not valid UTF-8
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,
}

pub use discovery::{encode_announcement, parse_announcement, DISCOVERY_PREFIX};
pub use message::{Message, ObjectPlacement, DELIMITER};
