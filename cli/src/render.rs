// SPDX-License-Identifier: MIT OR Apache-2.0

//! Text rendering of session activity for the CLI.

use anyhow::Result;
use lanlink_core::Message;
use lanlink_network::{PeerAnnouncement, ReceivedMessage, SessionEvent};

/// One received message as printed to stdout
pub fn render_message(received: &ReceivedMessage) -> String {
    match &received.message {
        Message::PlaceObject(p) => format!(
            "[{}] place #{} at ({}, {})",
            received.from, p.object_id, p.x, p.y
        ),
        Message::Other { kind, fields } => {
            format!("[{}] {}: {}", received.from, kind, fields.join(","))
        }
    }
}

/// Status line for a session event
pub fn render_event(event: &SessionEvent) -> String {
    match event {
        SessionEvent::HostingStarted { addr } => format!("Hosting LAN Server! ({})", addr),
        SessionEvent::ConnectedToHost { addr } => format!("Connected! ({})", addr),
        SessionEvent::PeerConnected { id, addr } => format!("+ {} {}", id, addr),
        SessionEvent::PeerDisconnected { id, addr } => format!("- {} {}", id, addr),
        SessionEvent::PeerDiscovered(peer) => format!("Found {}", peer),
        SessionEvent::Stopped => "Session stopped".to_string(),
    }
}

/// Peer list for the search mode, one host per line
pub fn render_peers(peers: &[PeerAnnouncement]) -> String {
    if peers.is_empty() {
        return "No sessions found yet.".to_string();
    }

    let mut output = String::new();
    for (i, peer) in peers.iter().enumerate() {
        output.push_str(&format!("{:2}. {}\n", i + 1, peer));
    }
    output.pop();
    output
}

/// Peer list as a JSON array
pub fn render_peers_json(peers: &[PeerAnnouncement]) -> Result<String> {
    Ok(serde_json::to_string(peers)?)
}
