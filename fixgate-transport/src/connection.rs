/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Per-connection reader and writer tasks.
//!
//! A [`Connection`] wraps any byte stream. It can read frames directly
//! (an acceptor reads the first message to learn which session the
//! connection belongs to) and is then split into two tasks: the reader
//! forwards [`ConnectionEvent`]s to the owner's channel, the writer drains
//! the commands of a [`ConnectionHandle`].

use crate::codec::{CodecError, FixCodec, Frame};
use bytes::{Bytes, BytesMut};
use fixgate_session::Responder;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a connection for the lifetime of the process.
pub type ConnectionId = u64;

/// Something a connection's reader task reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A complete message arrived.
    Frame {
        /// Originating connection.
        connection: ConnectionId,
        /// The raw message.
        data: Bytes,
    },
    /// Bytes were discarded by the framer.
    Garbled {
        /// Originating connection.
        connection: ConnectionId,
        /// Why they were discarded.
        error: CodecError,
    },
    /// The connection is gone; reported exactly once.
    Closed {
        /// Originating connection.
        connection: ConnectionId,
        /// The error that ended it, if any.
        reason: Option<String>,
    },
}

/// Reads frames from a byte stream.
struct FrameReader<R> {
    io: R,
    buffer: BytesMut,
    codec: FixCodec,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Returns the next frame, or `None` once the peer closed the stream.
    async fn read_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(frame));
            }
            if self.io.read_buf(&mut self.buffer).await? == 0 {
                return self.codec.decode_eof(&mut self.buffer);
            }
        }
    }
}

/// A connected byte stream that has not been handed to its tasks yet.
pub struct Connection<S> {
    id: ConnectionId,
    peer: String,
    reader: FrameReader<S>,
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("buffered", &self.reader.buffer.len())
            .finish()
    }
}

impl Connection<TcpStream> {
    /// Connects to `host:port` with Nagle's algorithm disabled.
    ///
    /// # Errors
    /// Returns the I/O error of the connect attempt.
    pub async fn connect(host: &str, port: u16, codec: FixCodec) -> std::io::Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self::from_tcp(stream, codec))
    }

    /// Wraps an accepted or connected TCP stream.
    #[must_use]
    pub fn from_tcp(stream: TcpStream, codec: FixCodec) -> Self {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(error = %err, "failed to set TCP_NODELAY");
        }
        let peer = stream
            .peer_addr()
            .map_or_else(|_| "unknown".to_owned(), |addr| addr.to_string());
        Self::new(stream, peer, codec)
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wraps a byte stream.
    ///
    /// # Arguments
    /// * `stream` - The connected stream
    /// * `peer` - Description of the remote end, for logs
    /// * `codec` - Framing settings
    #[must_use]
    pub fn new(stream: S, peer: impl Into<String>, codec: FixCodec) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer: peer.into(),
            reader: FrameReader {
                io: stream,
                buffer: BytesMut::with_capacity(4096),
                codec,
            },
        }
    }

    /// Returns the connection id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote end description.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Reads the next frame before the connection is spawned.
    ///
    /// # Errors
    /// Returns a `CodecError::Io` when the stream fails.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, CodecError>
    where
        S: Unpin,
    {
        self.reader.read_frame().await
    }

    /// Starts the reader and writer tasks.
    ///
    /// Events are converted into the owner's event type and sent on
    /// `events`; the returned handle writes and closes.
    pub fn spawn<E>(self, events: mpsc::UnboundedSender<E>) -> ConnectionHandle
    where
        E: From<ConnectionEvent> + Send + 'static,
    {
        let id = self.id;
        let FrameReader { io, buffer, codec } = self.reader;
        let (read_half, mut write_half) = tokio::io::split(io);
        let mut reader = FrameReader {
            io: read_half,
            buffer,
            codec: codec.clone(),
        };
        let (commands, mut command_rx) = mpsc::unbounded_channel();
        let closing = CancellationToken::new();

        let reader_closing = closing.clone();
        tokio::spawn(async move {
            let reason = loop {
                let frame = tokio::select! {
                    frame = reader.read_frame() => frame,
                    () = reader_closing.cancelled() => break None,
                };
                let event = match frame {
                    Ok(Some(Frame::Message(data))) => ConnectionEvent::Frame {
                        connection: id,
                        data,
                    },
                    Ok(Some(Frame::Garbled { data, error })) => {
                        trace!(connection = id, discarded = data.len(), %error, "garbled bytes");
                        ConnectionEvent::Garbled {
                            connection: id,
                            error,
                        }
                    }
                    Ok(None) => break None,
                    Err(err) => break Some(err.to_string()),
                };
                if events.send(event.into()).is_err() {
                    break None;
                }
            };
            debug!(
                connection = id,
                reason = reason.as_deref().unwrap_or("closed"),
                "reader finished"
            );
            let _ = events.send(
                ConnectionEvent::Closed {
                    connection: id,
                    reason,
                }
                .into(),
            );
        });

        let mut codec = codec;
        tokio::spawn(async move {
            let mut out = BytesMut::with_capacity(4096);
            while let Some(command) = command_rx.recv().await {
                let Command::Send(message) = command else {
                    break;
                };
                out.clear();
                if let Err(err) = codec.encode(message, &mut out) {
                    error!(connection = id, error = %err, "encode failed");
                    break;
                }
                if let Err(err) = write_half.write_all(&out).await {
                    error!(connection = id, error = %err, "write failed");
                    break;
                }
            }
            let _ = write_half.shutdown().await;
            closing.cancel();
        });

        ConnectionHandle {
            id,
            peer: Arc::from(self.peer),
            commands,
        }
    }
}

enum Command {
    Send(Bytes),
    Close,
}

/// Write side of a spawned connection.
///
/// Cloneable; closing through any clone closes the connection once every
/// message queued before the close was written.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish()
    }
}

impl ConnectionHandle {
    /// Returns the connection id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote end description.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Returns true once the writer task has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

impl Responder for ConnectionHandle {
    fn send(&self, message: Bytes) -> bool {
        self.commands.send(Command::Send(message)).is_ok()
    }

    fn disconnect(&self) {
        let _ = self.commands.send(Command::Close);
    }
}
