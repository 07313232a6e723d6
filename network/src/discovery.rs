// SPDX-License-Identifier: MIT OR Apache-2.0

//! Discovery listener: turns beacons heard on the LAN into address book entries

use crate::address_book::{AddressBook, PeerAnnouncement};
use crate::net_util::CancellationToken;
use crate::session::SessionEvent;
use lanlink_core::parse_announcement;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

/// Largest datagram read from the discovery channel
const DATAGRAM_BUFFER: usize = 1024;

/// Record one datagram in `book` if it is an announcement.
///
/// Returns the announcement and whether its address was new, or `None` for
/// unrelated traffic.
pub fn apply_datagram(
    book: &AddressBook,
    from: SocketAddr,
    payload: &[u8],
) -> Option<(PeerAnnouncement, bool)> {
    match parse_announcement(payload) {
        Ok(name) => {
            let announcement = PeerAnnouncement::new(from.ip(), name);
            let is_new = book.upsert(from.ip(), announcement.clone());
            Some((announcement, is_new))
        }
        Err(e) => {
            tracing::trace!(%from, len = payload.len(), "Ignoring datagram: {}", e);
            None
        }
    }
}

/// Receive announcements until cancelled
pub async fn run_listener(
    socket: UdpSocket,
    book: AddressBook,
    events: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
) {
    let local = socket.local_addr().ok();
    tracing::info!(addr = ?local, "Discovery listener started");

    let mut buf = [0u8; DATAGRAM_BUFFER];
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            r = socket.recv_from(&mut buf) => r,
        };

        match received {
            Ok((n, from)) => {
                if let Some((announcement, is_new)) = apply_datagram(&book, from, &buf[..n]) {
                    if is_new {
                        tracing::info!(peer = %announcement, "Discovered host");
                        // No subscribers is fine
                        let _ = events.send(SessionEvent::PeerDiscovered(announcement));
                    } else {
                        tracing::trace!(peer = %announcement, "Refreshed host");
                    }
                }
            }
            Err(e) => {
                // Some platforms surface ICMP errors on UDP reads; keep listening
                tracing::debug!("Discovery receive failed: {}", e);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                }
            }
        }
    }

    tracing::info!(addr = ?local, "Discovery listener stopped");
}
