// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session controller: role selection and lifecycle of the background loops
//!   * start_host / start_searching / connect_to_server
//!   * send / send_line to the open connection(s)
//!   * broadcast SessionEvent via tokio::sync::broadcast

use crate::address_book::{AddressBook, PeerAnnouncement};
use crate::beacon::run_beacon;
use crate::config::SessionConfig;
use crate::connection::ConnectionId;
use crate::discovery::run_listener;
use crate::net_util::{CancellationToken, TaskSet};
use crate::port;
use crate::relay::{HandlerRegistry, ReceivedMessage, RelayEngine};
use crate::transport::{self, ConnectionSet, Transport};
use crate::SessionError;
use bytes::Bytes;
use lanlink_core::message::frame_line;
use lanlink_core::Message;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::broadcast;

/// Which side of a session this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    /// Accepts connections, beacons, relays between clients
    Host,
    /// Holds one connection to a host
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Host => f.write_str("host"),
            Role::Client => f.write_str("client"),
        }
    }
}

/// Events emitted by a session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The host listener is bound and the beacon is running
    HostingStarted {
        /// Bound session address
        addr: SocketAddr,
    },
    /// The client connection to a host is open
    ConnectedToHost {
        /// Host address
        addr: SocketAddr,
    },
    /// A connection was opened
    PeerConnected {
        /// Connection id
        id: ConnectionId,
        /// Remote endpoint
        addr: SocketAddr,
    },
    /// A connection closed
    PeerDisconnected {
        /// Connection id
        id: ConnectionId,
        /// Remote endpoint
        addr: SocketAddr,
    },
    /// An announcement arrived from an address not seen before
    PeerDiscovered(PeerAnnouncement),
    /// Shutdown finished
    Stopped,
}

/// Mutable state of one run; replaced wholesale on shutdown
#[derive(Debug, Default)]
struct SessionState {
    role: Option<Role>,
    running: bool,
    searching: bool,
    session_addr: Option<SocketAddr>,
    discovery_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    connections: ConnectionSet,
}

/// A LAN session: discovery, host or client transport, and message relay.
///
/// Every public operation returns promptly; network activity runs on
/// background tasks that stop on [`Session::shutdown`] or drop.
pub struct Session {
    config: SessionConfig,
    book: AddressBook,
    handlers: HandlerRegistry,
    events_tx: broadcast::Sender<SessionEvent>,
    state: Mutex<SessionState>,
    tasks: Arc<TaskSet>,
    /// Serializes start and stop operations
    lifecycle: tokio::sync::Mutex<()>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Session")
            .field("role", &state.role)
            .field("running", &state.running)
            .field("searching", &state.searching)
            .field("connections", &state.connections.len())
            .field("peers", &self.book.len())
            .finish()
    }
}

impl Session {
    /// Create an idle session
    pub fn new(config: SessionConfig) -> Self {
        let _span = tracing::info_span!("network.session.new").entered();

        let (events_tx, _) = broadcast::channel(config.event_buffer.max(1));

        Self {
            config,
            book: AddressBook::new(),
            handlers: HandlerRegistry::new(),
            events_tx,
            state: Mutex::new(SessionState::default()),
            tasks: Arc::new(TaskSet::new()),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Configuration this session was built with
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get a receiver for session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Register a callback for every received message.
    ///
    /// Callbacks run on the receive task of the connection the message
    /// arrived on and must not block.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&ReceivedMessage) + Send + Sync + 'static,
    {
        self.handlers.register(Arc::new(handler));
    }

    /// Start hosting under `display_name`.
    ///
    /// Binds the session listener, then starts the accept loop and the
    /// beacon. Calling it again while hosting does nothing.
    #[tracing::instrument(name = "network.session.start_host", skip(self))]
    pub async fn start_host(&self, display_name: &str) -> Result<(), SessionError> {
        let _guard = self.lifecycle.lock().await;

        {
            let state = self.state.lock();
            match state.role {
                Some(Role::Host) => {
                    tracing::debug!("Already hosting");
                    return Ok(());
                }
                Some(Role::Client) if !state.connections.is_empty() => {
                    return Err(SessionError::RoleConflict {
                        active: Role::Client,
                    });
                }
                _ => {}
            }
        }

        let bind = self.config.session_bind;
        let listener = port::create_session_listener(bind)
            .and_then(TcpListener::from_std)
            .map_err(|source| SessionError::Bind { addr: bind, source })?;
        let local = listener.local_addr()?;
        let beacon_target = self.config.beacon_target;
        let beacon = port::create_beacon_socket(beacon_target)
            .and_then(UdpSocket::from_std)
            .map_err(|source| SessionError::Bind {
                addr: beacon_target,
                source,
            })?;

        let (shutdown, connections) = {
            let mut state = self.state.lock();
            state.role = Some(Role::Host);
            state.running = true;
            state.session_addr = Some(local);
            (state.shutdown.clone(), state.connections.clone())
        };

        let relay = Arc::new(RelayEngine::new(
            self.handlers.clone(),
            connections.clone(),
            true,
            self.config.max_line_len,
        ));
        let transport = Transport::new(
            connections,
            relay,
            self.config.outbound_queue,
            self.tasks.clone(),
            self.events_tx.clone(),
            shutdown.clone(),
        );

        self.tasks.spawn("accept", transport.run_accept_loop(listener));
        self.tasks.spawn(
            "beacon",
            run_beacon(
                beacon,
                self.config.beacon_target,
                display_name.to_string(),
                self.config.beacon_interval,
                shutdown,
            ),
        );

        tracing::info!(addr = %local, "Hosting LAN session");
        let _ = self.events_tx.send(SessionEvent::HostingStarted { addr: local });
        Ok(())
    }

    /// Start listening for host beacons. Calling it again while searching does nothing.
    #[tracing::instrument(name = "network.session.start_searching", skip(self))]
    pub async fn start_searching(&self) -> Result<(), SessionError> {
        let _guard = self.lifecycle.lock().await;

        if self.state.lock().searching {
            tracing::debug!("Already searching");
            return Ok(());
        }

        let bind = self.config.discovery_bind;
        let socket = port::create_discovery_socket(bind)
            .and_then(UdpSocket::from_std)
            .map_err(|source| SessionError::Bind { addr: bind, source })?;
        let local = socket.local_addr()?;

        let shutdown = {
            let mut state = self.state.lock();
            state.searching = true;
            state.running = true;
            state.discovery_addr = Some(local);
            state.shutdown.clone()
        };

        self.tasks.spawn(
            "discovery",
            run_listener(socket, self.book.clone(), self.events_tx.clone(), shutdown),
        );
        tracing::info!(addr = %local, "Searching for LAN sessions");
        Ok(())
    }

    /// Connect to the host at `address` and become a client.
    ///
    /// Waits at most the configured connect timeout. On failure the role
    /// is left unchanged and nothing is spawned.
    #[tracing::instrument(name = "network.session.connect_to_server", skip(self))]
    pub async fn connect_to_server(&self, address: &str) -> Result<(), SessionError> {
        let _guard = self.lifecycle.lock().await;

        {
            let state = self.state.lock();
            match state.role {
                Some(Role::Host) => {
                    return Err(SessionError::RoleConflict { active: Role::Host });
                }
                Some(Role::Client) if !state.connections.is_empty() => {
                    return Err(SessionError::RoleConflict {
                        active: Role::Client,
                    });
                }
                _ => {}
            }
        }

        let addr = transport::resolve(address, self.config.session_port).await?;
        let stream = transport::connect(addr, self.config.connect_timeout).await?;

        let (shutdown, connections) = {
            let state = self.state.lock();
            (state.shutdown.clone(), state.connections.clone())
        };
        let relay = Arc::new(RelayEngine::new(
            self.handlers.clone(),
            connections.clone(),
            false,
            self.config.max_line_len,
        ));
        let transport = Transport::new(
            connections,
            relay,
            self.config.outbound_queue,
            self.tasks.clone(),
            self.events_tx.clone(),
            shutdown,
        );
        transport.attach(stream)?;

        {
            let mut state = self.state.lock();
            state.role = Some(Role::Client);
            state.running = true;
        }

        tracing::info!(%addr, "Connected to host");
        let _ = self.events_tx.send(SessionEvent::ConnectedToHost { addr });
        Ok(())
    }

    /// Send a message to every open connection.
    ///
    /// Returns how many connections it was queued on.
    pub fn send(&self, message: &Message) -> Result<usize, SessionError> {
        self.send_frame(Bytes::from(message.to_frame()?))
    }

    /// Send a raw line, which must not contain a line break
    pub fn send_line(&self, line: &str) -> Result<usize, SessionError> {
        self.send_frame(Bytes::from(frame_line(line)?))
    }

    fn send_frame(&self, frame: Bytes) -> Result<usize, SessionError> {
        let connections = {
            let state = self.state.lock();
            if state.role.is_none() {
                return Err(SessionError::NotConnected);
            }
            state.connections.clone()
        };

        match connections.broadcast(frame, None) {
            0 => Err(SessionError::NotConnected),
            sent => {
                tracing::trace!(sent, "Queued outgoing message");
                Ok(sent)
            }
        }
    }

    /// Current copy of the discovered hosts
    pub fn snapshot_peers(&self) -> Vec<PeerAnnouncement> {
        self.book.snapshot()
    }

    /// Address book fed by the discovery listener
    pub fn address_book(&self) -> &AddressBook {
        &self.book
    }

    /// Role of the current run, if any
    pub fn role(&self) -> Option<Role> {
        self.state.lock().role
    }

    /// Whether any background activity was started and not shut down
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Whether the discovery listener is running
    pub fn is_searching(&self) -> bool {
        self.state.lock().searching
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Bound address of the host listener
    pub fn local_session_addr(&self) -> Option<SocketAddr> {
        self.state.lock().session_addr
    }

    /// Bound address of the discovery listener
    pub fn local_discovery_addr(&self) -> Option<SocketAddr> {
        self.state.lock().discovery_addr
    }

    /// Stop every background task and close all connections.
    ///
    /// Waits up to the configured shutdown timeout for tasks to finish. The
    /// session can be started again afterwards.
    #[tracing::instrument(name = "network.session.shutdown", skip(self))]
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;

        let previous = std::mem::take(&mut *self.state.lock());
        previous.shutdown.cancel();
        previous.connections.close_all();

        let aborted = self.tasks.join_all(self.config.shutdown_timeout).await;
        if aborted > 0 {
            tracing::warn!(aborted, "Some tasks had to be aborted");
        }

        if previous.running {
            tracing::info!(role = ?previous.role, "Session stopped");
            let _ = self.events_tx.send(SessionEvent::Stopped);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.shutdown.cancel();
        state.connections.close_all();
    }
}
