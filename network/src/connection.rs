// SPDX-License-Identifier: MIT OR Apache-2.0

//! A single session connection
//!
//! The read half belongs to exactly one receive loop. Writes from any number
//! of call sites go through an ordered queue drained by a dedicated writer
//! task, so nothing ever writes to a handle that is being closed.

use crate::net_util::{CancellationToken, TaskSet};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn default_for_tests() -> Self {
        Self::next()
    }

    /// Raw numeric value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of a connection; it never goes back to an earlier state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Stream accepted or connected, writer not running yet
    Connecting,
    /// Reading and writing
    Open,
    /// Peer closed, I/O failed, or the session stopped
    Closed,
}

/// Shared handle to a live connection
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    state: Arc<Mutex<ConnectionState>>,
    outbound: mpsc::Sender<Bytes>,
    closed: CancellationToken,
}

impl Connection {
    /// Take ownership of `stream` and start its writer task.
    ///
    /// At most `queue_capacity` frames wait for the writer; a peer that lets
    /// the queue fill up is closed. Returns the shared handle and the read
    /// half, which the caller must hand to exactly one receive loop.
    pub fn open(
        stream: TcpStream,
        queue_capacity: usize,
        tasks: &TaskSet,
        shutdown: &CancellationToken,
    ) -> std::io::Result<(Arc<Connection>, OwnedReadHalf)> {
        let peer = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, "Failed to set TCP_NODELAY: {}", e);
        }
        let (reader, writer) = stream.into_split();
        let (outbound, queue) = mpsc::channel(queue_capacity.max(1));

        let conn = Arc::new(Connection {
            id: ConnectionId::next(),
            peer,
            state: Arc::new(Mutex::new(ConnectionState::Connecting)),
            outbound,
            closed: CancellationToken::new(),
        });

        tasks.spawn(
            format!("{}-writer", conn.id),
            run_writer(
                conn.id,
                peer,
                writer,
                queue,
                conn.state.clone(),
                conn.closed.clone(),
                shutdown.clone(),
            ),
        );
        conn.transition(ConnectionState::Open);

        Ok((conn, reader))
    }

    /// Identifier of this connection
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote endpoint
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether frames can still be queued
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue a frame for the writer task.
    ///
    /// Returns false if the connection is closed. A full queue means the peer
    /// stopped reading, so the frame is dropped and the connection closed.
    pub fn enqueue(&self, frame: Bytes) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    conn_id = %self.id,
                    peer = %self.peer,
                    "Outbound queue full, closing connection"
                );
                self.close();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Move to `Closed` and stop the writer. Safe to call more than once.
    pub fn close(&self) {
        mark_closed(&self.state, &self.closed);
    }

    /// Resolves once the connection is closed
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    fn transition(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if *state != ConnectionState::Closed {
            *state = next;
        }
    }
}

fn mark_closed(state: &Mutex<ConnectionState>, closed: &CancellationToken) {
    *state.lock() = ConnectionState::Closed;
    closed.cancel();
}

async fn run_writer(
    id: ConnectionId,
    peer: SocketAddr,
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::Receiver<Bytes>,
    state: Arc<Mutex<ConnectionState>>,
    closed: CancellationToken,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            _ = shutdown.cancelled() => break,
            frame = queue.recv() => frame,
        };

        let Some(frame) = frame else { break };
        if let Err(e) = writer.write_all(&frame).await {
            tracing::warn!(conn_id = %id, %peer, "Write failed, closing connection: {}", e);
            break;
        }
    }

    mark_closed(&state, &closed);
    // Best effort FIN; the read half is released by its receive loop
    let _ = writer.shutdown().await;
    tracing::debug!(conn_id = %id, %peer, "Writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_frames_are_written_in_order() {
        let (local, mut remote) = pair().await;
        let tasks = TaskSet::new();
        let shutdown = CancellationToken::new();
        let (conn, _reader) = Connection::open(local, 16, &tasks, &shutdown).unwrap();

        assert!(conn.is_open());
        for i in 0..5 {
            assert!(conn.enqueue(Bytes::from(format!("9,{}\n", i))));
        }

        let mut buf = vec![0u8; 20];
        tokio::time::timeout(Duration::from_secs(1), remote.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf, b"9,0\n9,1\n9,2\n9,3\n9,4\n".to_vec());
    }

    #[tokio::test]
    async fn test_close_is_terminal_and_idempotent() {
        let (local, mut remote) = pair().await;
        let tasks = TaskSet::new();
        let shutdown = CancellationToken::new();
        let (conn, _reader) = Connection::open(local, 16, &tasks, &shutdown).unwrap();

        conn.close();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.enqueue(Bytes::from_static(b"1,1,1,1\n")));

        // Writer shuts down its half, so the peer sees EOF
        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(Duration::from_secs(1), remote.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(tasks.join_all(Duration::from_secs(1)).await, 0);
    }

    #[tokio::test]
    async fn test_full_queue_closes_the_connection() {
        let (local, _remote) = pair().await;
        let tasks = TaskSet::new();
        let shutdown = CancellationToken::new();
        let (conn, _reader) = Connection::open(local, 2, &tasks, &shutdown).unwrap();

        // The writer cannot run before this synchronous loop yields
        assert!(conn.enqueue(Bytes::from_static(b"9,a\n")));
        assert!(conn.enqueue(Bytes::from_static(b"9,b\n")));
        assert!(!conn.enqueue(Bytes::from_static(b"9,c\n")));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.enqueue(Bytes::from_static(b"9,d\n")));
    }

    #[tokio::test]
    async fn test_write_failure_closes_the_connection() {
        let (local, remote) = pair().await;
        let tasks = TaskSet::new();
        let shutdown = CancellationToken::new();
        let (conn, _reader) = Connection::open(local, 16, &tasks, &shutdown).unwrap();

        // Zero linger makes the drop send a reset
        socket2::SockRef::from(&remote)
            .set_linger(Some(Duration::ZERO))
            .unwrap();
        drop(remote);

        let frame = Bytes::from(vec![b'x'; 1024]);
        for _ in 0..200 {
            if !conn.is_open() {
                break;
            }
            conn.enqueue(frame.clone());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(tasks.join_all(Duration::from_secs(1)).await, 0);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }
}
