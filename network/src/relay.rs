// SPDX-License-Identifier: MIT OR Apache-2.0

//! Relay engine: line framing, dispatch to consumers and host fan-out
//!
//! Every connection's byte stream is cut into lines by [`LineCodec`]. Each
//! complete line is parsed and handed to the registered handlers; on the host
//! it is then re-sent byte for byte to every other open connection.

use crate::connection::{Connection, ConnectionId};
use crate::net_util::CancellationToken;
use crate::transport::ConnectionSet;
use bytes::{Buf, Bytes, BytesMut};
use futures::StreamExt;
use lanlink_core::message::DELIMITER;
use lanlink_core::Message;
use parking_lot::RwLock;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::OwnedReadHalf;
use tokio_util::codec::{Decoder, FramedRead};

/// Initial read buffer capacity per connection
const READ_CHUNK: usize = 4096;

/// A message delivered to the application
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Connection the line arrived on
    pub connection: ConnectionId,
    /// Remote endpoint of that connection
    pub from: SocketAddr,
    /// Decoded message
    pub message: Message,
    /// Line as received, without its `\n` or a trailing `\r`
    pub raw: String,
}

/// Callback invoked for every received message
pub type MessageHandler = Arc<dyn Fn(&ReceivedMessage) + Send + Sync>;

/// Handlers shared between a session and its relay engines
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<Vec<MessageHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler; handlers run in registration order
    pub fn register(&self, handler: MessageHandler) {
        self.handlers.write().push(handler);
    }

    fn len(&self) -> usize {
        self.handlers.read().len()
    }

    fn dispatch(&self, received: &ReceivedMessage) {
        // Clone the list so a handler may register another without deadlocking
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            handler(received);
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}

/// What the line codec yields for each delimiter-terminated chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineFrame {
    /// A complete line exactly as received, delimiter included
    Line(Bytes),
    /// A line longer than the limit; its bytes are skipped up to the next delimiter
    Oversized,
}

/// Splits a byte stream into `\n`-terminated lines of bounded length.
///
/// Lines are returned untouched so the host can relay them byte for byte.
/// An oversized line is reported once and its remainder is discarded.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_line_len: usize,
    // Bytes of the buffer already searched for a delimiter
    next_index: usize,
    discarding: bool,
}

impl LineCodec {
    /// Create a codec for lines of at most `max_line_len` bytes, delimiter excluded
    pub fn new(max_line_len: usize) -> Self {
        Self {
            max_line_len,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Decoder for LineCodec {
    type Item = LineFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<LineFrame>> {
        loop {
            let read_to = src.len().min(self.max_line_len.saturating_add(1));
            let newline = src[self.next_index..read_to]
                .iter()
                .position(|&b| b == DELIMITER)
                .map(|offset| self.next_index + offset);

            match (self.discarding, newline) {
                (true, Some(end)) => {
                    // Tail of a line already reported as oversized
                    src.advance(end + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    src.advance(read_to);
                    self.next_index = 0;
                    if src.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(end)) => {
                    self.next_index = 0;
                    return Ok(Some(LineFrame::Line(src.split_to(end + 1).freeze())));
                }
                (false, None) if src.len() > self.max_line_len => {
                    self.discarding = true;
                    return Ok(Some(LineFrame::Oversized));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<LineFrame>> {
        let frame = self.decode(src)?;
        if frame.is_none() && !src.is_empty() {
            tracing::debug!(pending = src.len(), "Discarding partial line");
            src.clear();
            self.next_index = 0;
        }
        Ok(frame)
    }
}

/// Line content without its `\n` and an optional trailing `\r`
fn line_content(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(&[DELIMITER]).unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Per-role message handling shared by all connections of one session run
#[derive(Debug)]
pub struct RelayEngine {
    handlers: HandlerRegistry,
    connections: ConnectionSet,
    fan_out: bool,
    max_line_len: usize,
}

impl RelayEngine {
    /// Create an engine; `fan_out` is true only on the host
    pub fn new(
        handlers: HandlerRegistry,
        connections: ConnectionSet,
        fan_out: bool,
        max_line_len: usize,
    ) -> Self {
        Self {
            handlers,
            connections,
            fan_out,
            max_line_len,
        }
    }

    /// Handle one complete line, delimiter included, from `from` on connection `source`.
    ///
    /// A line that parses is delivered to the handlers. On the host every
    /// non-blank line is then relayed byte for byte, whether it parsed or not.
    /// Returns the number of connections the line was relayed to.
    pub fn handle_line(&self, source: ConnectionId, from: SocketAddr, line: Bytes) -> usize {
        let content = line_content(&line);
        if content.is_empty() {
            tracing::trace!(conn_id = %source, "Ignoring blank line");
            return 0;
        }

        match std::str::from_utf8(content) {
            Ok(text) => match Message::parse(text) {
                Ok(message) => {
                    tracing::debug!(conn_id = %source, peer = %from, kind = message.kind(), "Received message");
                    self.handlers.dispatch(&ReceivedMessage {
                        connection: source,
                        from,
                        message,
                        raw: text.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(conn_id = %source, peer = %from, "Malformed message: {}", e);
                }
            },
            Err(_) => {
                tracing::warn!(conn_id = %source, peer = %from, "Line is not valid UTF-8");
            }
        }

        if !self.fan_out {
            return 0;
        }

        let relayed = self.connections.broadcast(line, Some(source));
        tracing::trace!(conn_id = %source, relayed, "Relayed line");
        relayed
    }

    /// Read `reader` until the peer closes, an error occurs, or `shutdown` fires.
    ///
    /// Closes `conn` on exit.
    pub async fn run_receive_loop(
        &self,
        conn: Arc<Connection>,
        reader: OwnedReadHalf,
        shutdown: CancellationToken,
    ) {
        let id = conn.id();
        let peer = conn.peer();
        let mut lines =
            FramedRead::with_capacity(reader, LineCodec::new(self.max_line_len), READ_CHUNK);

        tracing::debug!(conn_id = %id, %peer, "Receive loop started");
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = conn.closed() => break,
                frame = lines.next() => frame,
            };

            match frame {
                Some(Ok(LineFrame::Line(line))) => {
                    self.handle_line(id, peer, line);
                }
                Some(Ok(LineFrame::Oversized)) => {
                    tracing::warn!(
                        conn_id = %id,
                        %peer,
                        max = self.max_line_len,
                        "Dropping oversized line"
                    );
                }
                Some(Err(e)) => {
                    tracing::warn!(conn_id = %id, %peer, "Read failed: {}", e);
                    break;
                }
                None => {
                    tracing::debug!(conn_id = %id, %peer, "Peer closed connection");
                    break;
                }
            }
        }

        conn.close();
        tracing::debug!(conn_id = %id, %peer, "Receive loop stopped");
    }
}

/// Wrap a closure as a [`MessageHandler`]
pub fn handler<F>(f: F) -> MessageHandler
where
    F: Fn(&ReceivedMessage) + Send + Sync + 'static,
{
    Arc::new(f)
}
