// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host presence beacon

use crate::net_util::CancellationToken;
use lanlink_core::encode_announcement;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Announce `display_name` to `target` every `interval` until cancelled.
///
/// Send failures are logged and retried on the next tick.
pub async fn run_beacon(
    socket: UdpSocket,
    target: SocketAddr,
    display_name: String,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let payload = encode_announcement(&display_name);
    tracing::info!(%target, name = %display_name, "Beacon started");

    let mut sent: u64 = 0;
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        match socket.send_to(&payload, target).await {
            Ok(_) => {
                sent += 1;
                tracing::trace!(%target, sent, "Beacon sent");
            }
            Err(e) => {
                tracing::warn!(%target, "Beacon send failed: {}", e);
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::info!(%target, sent, "Beacon stopped");
}
