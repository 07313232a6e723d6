// SPDX-License-Identifier: MIT OR Apache-2.0

//! LAN session networking
//!
//! This crate provides:
//! - UDP presence beacons and a discovery listener feeding an address book
//! - A host that accepts any number of TCP connections and relays lines between them
//! - A client holding a single connection to a host
//! - A session controller owning the lifecycle of all background tasks

#![deny(unsafe_code)]

pub mod address_book;
pub mod beacon;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod net_util;
pub mod port;
pub mod relay;
pub mod session;
pub mod transport;

use lanlink_core::ProtocolError;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use address_book::{AddressBook, PeerAnnouncement};
pub use config::SessionConfig;
pub use connection::{ConnectionId, ConnectionState};
pub use lanlink_core::{Message, ObjectPlacement};
pub use relay::{MessageHandler, ReceivedMessage};
pub use session::{Role, Session, SessionEvent};

/// Errors returned by session operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// A listening socket could not be set up
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying error
        source: std::io::Error,
    },
    /// Name resolution failed
    #[error("Failed to resolve {target}: {source}")]
    Resolve {
        /// Target as given
        target: String,
        /// Underlying error
        source: std::io::Error,
    },
    /// Name resolution returned nothing
    #[error("No address found for {target}")]
    NoAddress {
        /// Target as given
        target: String,
    },
    /// The connect attempt failed
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        /// Resolved address
        addr: SocketAddr,
        /// Underlying error
        source: std::io::Error,
    },
    /// The connect attempt did not finish in time
    #[error("Connecting to {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Resolved address
        addr: SocketAddr,
        /// Configured limit
        timeout: Duration,
    },
    /// No open connection to send on
    #[error("Not connected")]
    NotConnected,
    /// The session already plays another role
    #[error("Session is already active as {active}")]
    RoleConflict {
        /// Role currently held
        active: Role,
    },
    /// The outgoing message could not be framed
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// Other socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
