/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Per-session actor task.
//!
//! Each session is owned by one task that consumes a single event channel:
//! frames and closes from the current connection, new connections, sends,
//! logout and shutdown requests, plus a one second timer. State changes are
//! therefore serialized without locks.

use crate::registry::SessionStatus;
use bytes::Bytes;
use chrono::Utc;
use fixgate_core::error::Result;
use fixgate_core::message::Message;
use fixgate_session::Session;
use fixgate_transport::{Connection, ConnectionEvent, ConnectionHandle, ConnectionId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Timer resolution of every session.
pub(crate) const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Input of a session actor.
#[derive(Debug)]
pub enum SessionEvent {
    /// An initiator connection was established.
    Connected(Connection<TcpStream>),
    /// An acceptor routed a connection here after reading its first frame.
    Accepted {
        /// The connection, not yet spawned.
        connection: Connection<TcpStream>,
        /// The first message, already framed.
        first: Bytes,
    },
    /// Reported by the reader of a connection.
    Connection(ConnectionEvent),
    /// Application message to send.
    Send(Box<Message>),
    /// Local logout with optional Text.
    Logout(Option<String>),
    /// Log out if needed, then finish.
    Shutdown,
}

impl From<ConnectionEvent> for SessionEvent {
    fn from(event: ConnectionEvent) -> Self {
        Self::Connection(event)
    }
}

/// A session together with its event channel, ready to be spawned.
#[derive(Debug)]
pub(crate) struct SessionActor {
    session: Session,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    /// Handed to connections so their readers feed this actor.
    loopback: mpsc::UnboundedSender<SessionEvent>,
    status: Arc<SessionStatus>,
    processed: Arc<AtomicU64>,
    connection: Option<ConnectionHandle>,
    stopping: bool,
}

impl SessionActor {
    pub(crate) fn new(
        session: Session,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        loopback: mpsc::UnboundedSender<SessionEvent>,
        status: Arc<SessionStatus>,
        processed: Arc<AtomicU64>,
    ) -> Self {
        Self {
            session,
            events,
            loopback,
            status,
            processed,
            connection: None,
            stopping: false,
        }
    }

    /// Runs until shutdown completes or every sender is gone.
    pub(crate) async fn run(mut self) {
        let id = self.session.session_id().clone();
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(session = %id, "session task started");

        loop {
            let result = tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else { break };
                    self.processed.fetch_add(1, Ordering::Relaxed);
                    self.handle(event).await
                }
                _ = ticker.tick() => {
                    self.session.on_tick(Instant::now(), Utc::now()).await
                }
            };
            if let Err(err) = result {
                error!(session = %id, error = %err, "session error");
            }
            self.sync_connection();
            self.publish();
            if self.stopping && !self.session.is_connected() {
                break;
            }
        }

        if let Some(handle) = self.connection.take() {
            fixgate_session::Responder::disconnect(&handle);
        }
        self.status.update(false, false, self.session.is_enabled());
        info!(session = %id, "session task finished");
    }

    async fn handle(&mut self, event: SessionEvent) -> Result<()> {
        let now = Instant::now();
        match event {
            SessionEvent::Connected(connection) => self.attach(connection, None, now).await,
            SessionEvent::Accepted { connection, first } => {
                self.attach(connection, Some(first), now).await
            }
            SessionEvent::Connection(event) => self.on_connection_event(event, now).await,
            SessionEvent::Send(message) => {
                if !self.session.send(*message, now).await? {
                    debug!(session = %self.session.session_id(), "outbound message suppressed");
                }
                Ok(())
            }
            SessionEvent::Logout(text) => self.session.logout(text.as_deref(), now).await,
            SessionEvent::Shutdown => {
                self.stopping = true;
                self.session.logout(Some("Shutting down"), now).await
            }
        }
    }

    async fn attach(
        &mut self,
        connection: Connection<TcpStream>,
        first: Option<Bytes>,
        now: Instant,
    ) -> Result<()> {
        let id = self.session.session_id().clone();
        if self.stopping || self.session.is_connected() {
            warn!(
                session = %id,
                peer = connection.peer(),
                "session already connected, dropping connection"
            );
            return Ok(());
        }
        info!(session = %id, peer = connection.peer(), "connection attached");
        let handle = connection.spawn(self.loopback.clone());
        self.connection = Some(handle.clone());
        self.session.connect(Arc::new(handle), now).await?;
        match first {
            Some(first) => self.session.next(&first, now).await,
            None => Ok(()),
        }
    }

    async fn on_connection_event(&mut self, event: ConnectionEvent, now: Instant) -> Result<()> {
        let current = self.connection.as_ref().map(ConnectionHandle::id);
        let source: ConnectionId = match &event {
            ConnectionEvent::Frame { connection, .. }
            | ConnectionEvent::Garbled { connection, .. }
            | ConnectionEvent::Closed { connection, .. } => *connection,
        };
        if current != Some(source) {
            debug!(
                session = %self.session.session_id(),
                connection = source,
                "event from stale connection ignored"
            );
            return Ok(());
        }
        match event {
            ConnectionEvent::Frame { data, .. } => self.session.next(&data, now).await,
            ConnectionEvent::Garbled { error, .. } => {
                warn!(session = %self.session.session_id(), %error, "garbled data discarded");
                Ok(())
            }
            ConnectionEvent::Closed { reason, .. } => {
                self.connection = None;
                if let Some(reason) = reason {
                    info!(
                        session = %self.session.session_id(),
                        reason = %reason,
                        "connection failed"
                    );
                }
                self.session.disconnected(now).await
            }
        }
    }

    /// Forgets the connection once the session dropped it.
    fn sync_connection(&mut self) {
        if !self.session.is_connected() {
            self.connection = None;
        }
    }

    fn publish(&self) {
        self.status.update(
            self.session.is_logged_on(),
            self.session.is_connected(),
            self.session.is_enabled(),
        );
    }
}
