// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session transport: live connection set, host accept loop and client connect

use crate::connection::{Connection, ConnectionId};
use crate::net_util::{CancellationToken, TaskSet};
use crate::relay::RelayEngine;
use crate::session::SessionEvent;
use crate::SessionError;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Connections currently registered with a session.
///
/// Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSet {
    inner: Arc<RwLock<HashMap<ConnectionId, Arc<Connection>>>>,
}

impl ConnectionSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection
    pub fn insert(&self, conn: Arc<Connection>) {
        self.inner.write().insert(conn.id(), conn);
    }

    /// Unregister a connection, returning it if it was present
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.inner.write().remove(&id)
    }

    /// Number of registered connections that are still open
    pub fn len(&self) -> usize {
        self.inner.read().values().filter(|c| c.is_open()).count()
    }

    /// Whether no registered connection is open
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue `frame` on every open connection except `except`.
    ///
    /// Returns how many connections accepted the frame. A connection whose
    /// queue is full is closed without affecting the others.
    pub fn broadcast(&self, frame: Bytes, except: Option<ConnectionId>) -> usize {
        // Bytes clones share the buffer, so each enqueue is a refcount bump
        let targets: Vec<_> = self
            .inner
            .read()
            .values()
            .filter(|c| Some(c.id()) != except)
            .cloned()
            .collect();

        targets
            .iter()
            .filter(|conn| conn.enqueue(frame.clone()))
            .count()
    }

    /// Close and forget every connection
    pub fn close_all(&self) {
        let drained: Vec<_> = self.inner.write().drain().map(|(_, c)| c).collect();
        for conn in drained {
            conn.close();
        }
    }
}

/// Wires accepted or connected streams into a relay engine
#[derive(Debug, Clone)]
pub struct Transport {
    connections: ConnectionSet,
    relay: Arc<RelayEngine>,
    queue_capacity: usize,
    tasks: Arc<TaskSet>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
}

impl Transport {
    /// Create a transport whose connections are registered in `connections`
    pub fn new(
        connections: ConnectionSet,
        relay: Arc<RelayEngine>,
        queue_capacity: usize,
        tasks: Arc<TaskSet>,
        events: broadcast::Sender<SessionEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            connections,
            relay,
            queue_capacity,
            tasks,
            events,
            shutdown,
        }
    }

    /// Register `stream` and start its receive loop.
    ///
    /// The connection is removed from the set once the loop ends.
    pub fn attach(&self, stream: TcpStream) -> std::io::Result<Arc<Connection>> {
        let (conn, reader) = Connection::open(stream, self.queue_capacity, &self.tasks, &self.shutdown)?;
        let id = conn.id();
        let addr = conn.peer();
        self.connections.insert(conn.clone());

        let relay = self.relay.clone();
        let connections = self.connections.clone();
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        let reader_conn = conn.clone();
        self.tasks.spawn(format!("{}-reader", id), async move {
            relay.run_receive_loop(reader_conn, reader, shutdown).await;
            connections.remove(id);
            tracing::info!(conn_id = %id, peer = %addr, "Peer disconnected");
            let _ = events.send(SessionEvent::PeerDisconnected { id, addr });
        });

        tracing::info!(conn_id = %id, peer = %addr, "Peer connected");
        let _ = self.events.send(SessionEvent::PeerConnected { id, addr });
        Ok(conn)
    }

    /// Accept connections on `listener` until cancelled
    pub async fn run_accept_loop(self, listener: TcpListener) {
        let local = listener.local_addr().ok();
        tracing::info!(addr = ?local, "Accept loop started");

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                r = listener.accept() => r,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = self.attach(stream) {
                        tracing::warn!(%peer, "Failed to set up accepted connection: {}", e);
                    }
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                    }
                }
            }
        }

        tracing::info!(addr = ?local, "Accept loop stopped");
    }
}

/// Turn a connect target into a socket address.
///
/// Accepts `ip`, `ip:port`, `[v6]:port`, `host` and `host:port`; a missing
/// port becomes `default_port`.
pub async fn resolve(target: &str, default_port: u16) -> Result<SocketAddr, SessionError> {
    let target = target.trim();

    if let Ok(addr) = target.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    let host_port = match target.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => target.to_string(),
        _ => format!("{}:{}", target, default_port),
    };

    let mut addrs = tokio::net::lookup_host(&host_port)
        .await
        .map_err(|source| SessionError::Resolve {
            target: target.to_string(),
            source,
        })?;

    addrs.next().ok_or_else(|| SessionError::NoAddress {
        target: target.to_string(),
    })
}

/// Open a TCP stream to `addr`, giving up after `timeout`
pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, SessionError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(SessionError::Connect { addr, source }),
        Err(_) => Err(SessionError::ConnectTimeout { addr, timeout }),
    }
}
