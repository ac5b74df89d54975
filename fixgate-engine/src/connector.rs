/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Acceptor and initiator lifecycle.
//!
//! A connector owns one tokio runtime and the session actors it spawns on
//! it. Its lifecycle is `CREATED → STARTED → STOPPED`; a stopped connector
//! cannot be started again.

use crate::actor::{SessionActor, SessionEvent, TICK_INTERVAL};
use crate::registry::{SessionEntry, SessionRegistry, SessionSender};
use bytes::Bytes;
use chrono::Utc;
use fixgate_core::error::{Result, SessionError};
use fixgate_core::message::Message;
use fixgate_core::session_id::SessionId;
use fixgate_session::{ConnectionType, SessionConfig};
use fixgate_tagvalue::peek_header;
use fixgate_transport::{Connection, FixCodec, Frame};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a connector schedules its sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectorMode {
    /// One current-thread runtime; sessions only progress inside
    /// [`ConnectionHandler::block`] and [`ConnectionHandler::poll`].
    Single,
    /// A multi-thread runtime; sessions progress independently of the caller.
    #[default]
    Threaded,
}

/// Lifecycle of an acceptor or initiator.
///
/// Every method is synchronous and drives the connector's own runtime, so
/// none of them may be called from inside an async context.
pub trait ConnectionHandler {
    /// Binds listeners or launches connect loops, then returns.
    ///
    /// # Errors
    /// - `SessionError::InvalidState` unless the connector was just created
    /// - `FixError::Io` if a listener cannot be bound
    fn start(&self) -> Result<()>;

    /// Drives the sessions until [`ConnectionHandler::stop`] is called.
    ///
    /// # Errors
    /// Returns `SessionError::InvalidState` if the connector was never started.
    fn block(&self) -> Result<()>;

    /// Runs one non-blocking iteration.
    ///
    /// # Returns
    /// True if any session event was processed since the previous call.
    ///
    /// # Errors
    /// Returns `SessionError::InvalidState` if the connector was never started.
    fn poll(&self) -> Result<bool>;

    /// Logs out every logged-on session, waits up to LogoutTimeout, then
    /// closes connections and listeners. Calling it again does nothing.
    ///
    /// # Errors
    /// Currently infallible; the signature leaves room for transports that
    /// fail to close.
    fn stop(&self) -> Result<()>;

    /// Returns true if any session is logged on.
    fn is_logged_on(&self) -> bool;

    /// Returns true once stopped.
    fn is_stopped(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectorState {
    Created,
    Started,
    Stopped,
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "CREATED",
            Self::Started => "STARTED",
            Self::Stopped => "STOPPED",
        })
    }
}

/// State shared by acceptors and initiators.
pub(crate) struct Connector {
    kind: ConnectionType,
    mode: ConnectorMode,
    runtime: Runtime,
    registry: Arc<SessionRegistry>,
    configs: Vec<SessionConfig>,
    pending: Mutex<Vec<SessionActor>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    state: Mutex<ConnectorState>,
    shutdown: CancellationToken,
    processed: Arc<AtomicU64>,
    polled: AtomicU64,
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("kind", &self.kind)
            .field("mode", &self.mode)
            .field("state", &*self.state.lock())
            .field("sessions", &self.configs.len())
            .finish_non_exhaustive()
    }
}

impl Connector {
    pub(crate) fn new(
        kind: ConnectionType,
        mode: ConnectorMode,
        runtime: Runtime,
        registry: Arc<SessionRegistry>,
        configs: Vec<SessionConfig>,
        actors: Vec<SessionActor>,
        processed: Arc<AtomicU64>,
    ) -> Self {
        Self {
            kind,
            mode,
            runtime,
            registry,
            configs,
            pending: Mutex::new(actors),
            tasks: Mutex::new(Vec::new()),
            state: Mutex::new(ConnectorState::Created),
            shutdown: CancellationToken::new(),
            processed,
            polled: AtomicU64::new(0),
        }
    }

    fn invalid_state(expected: &str, current: ConnectorState) -> SessionError {
        SessionError::InvalidState {
            expected: expected.to_owned(),
            current: current.to_string(),
        }
    }

    fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != ConnectorState::Created {
            return Err(Self::invalid_state("CREATED", *state).into());
        }

        let listeners = match self.kind {
            ConnectionType::Acceptor => self.bind_listeners()?,
            ConnectionType::Initiator => Vec::new(),
        };

        let mut tasks = self.tasks.lock();
        for actor in self.pending.lock().drain(..) {
            tasks.push(self.runtime.spawn(actor.run()));
        }
        for (listener, sessions, codec, logon_timeout) in listeners {
            self.runtime.spawn(accept_loop(
                listener,
                sessions,
                codec,
                logon_timeout,
                Arc::clone(&self.registry),
                self.shutdown.clone(),
            ));
        }
        if self.kind == ConnectionType::Initiator {
            for config in &self.configs {
                let Some(entry) = self.registry.get(&config.session_id()) else {
                    continue;
                };
                self.runtime
                    .spawn(connect_loop(config.clone(), entry, self.shutdown.clone()));
            }
        }

        *state = ConnectorState::Started;
        info!(
            kind = ?self.kind,
            mode = ?self.mode,
            sessions = self.configs.len(),
            "connector started"
        );
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn bind_listeners(&self) -> Result<Vec<(TcpListener, HashSet<SessionId>, FixCodec, Duration)>> {
        let mut by_endpoint: BTreeMap<(String, u16), Vec<&SessionConfig>> = BTreeMap::new();
        for config in &self.configs {
            let Some(port) = config.socket_accept_port else {
                continue;
            };
            let address = config
                .socket_accept_address
                .clone()
                .unwrap_or_else(|| "0.0.0.0".to_owned());
            by_endpoint.entry((address, port)).or_default().push(config);
        }

        let mut listeners = Vec::with_capacity(by_endpoint.len());
        for ((address, port), configs) in by_endpoint {
            let listener = self
                .runtime
                .block_on(TcpListener::bind((address.as_str(), port)))?;
            info!(address = %address, port, sessions = configs.len(), "listening");
            let sessions = configs.iter().map(|config| config.session_id()).collect();
            let max_message_size = configs
                .iter()
                .map(|config| config.max_message_size)
                .max()
                .unwrap_or_default();
            let codec = FixCodec::new()
                .with_max_message_size(max_message_size)
                .with_checksum_validation(configs.iter().all(|config| config.validate_checksum));
            let logon_timeout = configs
                .iter()
                .map(|config| config.logon_timeout)
                .max()
                .unwrap_or(Duration::from_secs(10));
            listeners.push((listener, sessions, codec, logon_timeout));
        }
        Ok(listeners)
    }

    fn block(&self) -> Result<()> {
        let state = *self.state.lock();
        if state == ConnectorState::Created {
            return Err(Self::invalid_state("STARTED", state).into());
        }
        self.runtime.block_on(self.shutdown.cancelled());
        Ok(())
    }

    fn poll(&self) -> Result<bool> {
        let state = *self.state.lock();
        match state {
            ConnectorState::Created => return Err(Self::invalid_state("STARTED", state).into()),
            ConnectorState::Stopped => return Ok(false),
            ConnectorState::Started => {}
        }
        if self.mode == ConnectorMode::Single {
            self.runtime.block_on(tokio::task::yield_now());
        }
        let processed = self.processed.load(Ordering::Relaxed);
        Ok(self.polled.swap(processed, Ordering::Relaxed) != processed)
    }

    fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                ConnectorState::Stopped => return Ok(()),
                ConnectorState::Created => {
                    *state = ConnectorState::Stopped;
                    self.pending.lock().clear();
                    self.shutdown.cancel();
                    return Ok(());
                }
                ConnectorState::Started => *state = ConnectorState::Stopped,
            }
        }

        // Listeners and connect loops first so nothing reconnects.
        self.shutdown.cancel();
        for (_, entry) in self.registry.entries() {
            let _ = entry.events.send(SessionEvent::Shutdown);
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        let grace = self
            .configs
            .iter()
            .map(|config| config.logout_timeout)
            .max()
            .unwrap_or_default()
            + TICK_INTERVAL * 2;
        self.runtime.block_on(async {
            let wait = async {
                for task in tasks {
                    let _ = task.await;
                }
            };
            if tokio::time::timeout(grace, wait).await.is_err() {
                warn!("sessions still running after logout timeout");
            }
        });
        info!(kind = ?self.kind, "connector stopped");
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        *self.state.lock() == ConnectorState::Stopped
    }
}

/// Builds the local identity of the session a counterparty message is for.
fn incoming_session_id(data: &[u8]) -> Option<SessionId> {
    let header = peek_header(data).ok()?;
    Some(SessionId::new(
        header.begin_string,
        header.target_comp_id?,
        header.sender_comp_id?,
    ))
}

async fn accept_loop(
    listener: TcpListener,
    sessions: HashSet<SessionId>,
    codec: FixCodec,
    logon_timeout: Duration,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
) {
    let sessions = Arc::new(sessions);
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            () = shutdown.cancelled() => break,
        };
        match accepted {
            Ok((stream, addr)) => {
                debug!(peer = %addr, "connection accepted");
                tokio::spawn(route_connection(
                    Connection::from_tcp(stream, codec.clone()),
                    Arc::clone(&sessions),
                    logon_timeout,
                    Arc::clone(&registry),
                    shutdown.clone(),
                ));
            }
            Err(err) => warn!(error = %err, "accept failed"),
        }
    }
    debug!("listener closed");
}

/// Reads the first message of an accepted connection and hands the
/// connection to the session it names.
async fn route_connection(
    mut connection: Connection<TcpStream>,
    sessions: Arc<HashSet<SessionId>>,
    logon_timeout: Duration,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
) {
    let peer = connection.peer().to_owned();
    let first = tokio::select! {
        first = tokio::time::timeout(logon_timeout, first_message(&mut connection)) => first,
        () = shutdown.cancelled() => return,
    };
    let first = match first {
        Ok(Some(first)) => first,
        Ok(None) => {
            debug!(peer = %peer, "connection closed before its first message");
            return;
        }
        Err(_) => {
            warn!(peer = %peer, "no message within logon timeout, dropping connection");
            return;
        }
    };

    let Some(id) = incoming_session_id(&first) else {
        warn!(peer = %peer, "first message names no session, dropping connection");
        return;
    };
    let routed = registry
        .route(&id)
        .filter(|(found, _)| sessions.contains(found));
    let Some((found, entry)) = routed else {
        warn!(peer = %peer, session = %id, "unknown session, dropping connection");
        return;
    };
    debug!(peer = %peer, session = %found, "routing connection");
    if entry
        .events
        .send(SessionEvent::Accepted { connection, first })
        .is_err()
    {
        debug!(peer = %peer, session = %found, "session stopped, dropping connection");
    }
}

async fn first_message(connection: &mut Connection<TcpStream>) -> Option<Bytes> {
    loop {
        match connection.read_frame().await {
            Ok(Some(Frame::Message(data))) => return Some(data),
            Ok(Some(Frame::Garbled { error, .. })) => {
                debug!(peer = connection.peer(), %error, "garbled bytes before first message");
            }
            Ok(None) => return None,
            Err(err) => {
                debug!(peer = connection.peer(), error = %err, "read failed");
                return None;
            }
        }
    }
}

/// Connects an initiator session whenever it is disconnected, enabled and
/// inside its schedule, retrying every ReconnectInterval.
async fn connect_loop(config: SessionConfig, entry: SessionEntry, shutdown: CancellationToken) {
    let id = config.session_id();
    let (Some(host), Some(port)) = (config.socket_connect_host.clone(), config.socket_connect_port)
    else {
        warn!(session = %id, "initiator without connect address");
        return;
    };
    let codec = FixCodec::new()
        .with_max_message_size(config.max_message_size)
        .with_checksum_validation(config.validate_checksum);
    let mut ticker = tokio::time::interval(config.reconnect_interval.max(TICK_INTERVAL));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = shutdown.cancelled() => break,
        }
        let status = &entry.status;
        if status.is_connected()
            || !status.is_enabled()
            || !config.schedule.is_session_time(Utc::now())
        {
            continue;
        }
        debug!(session = %id, host = %host, port, "connecting");
        let attempt = tokio::time::timeout(
            config.logon_timeout,
            Connection::connect(&host, port, codec.clone()),
        )
        .await;
        match attempt {
            Ok(Ok(connection)) => {
                if entry.events.send(SessionEvent::Connected(connection)).is_err() {
                    break;
                }
            }
            Ok(Err(err)) => {
                warn!(session = %id, host = %host, port, error = %err, "connect failed");
            }
            Err(_) => warn!(session = %id, host = %host, port, "connect timed out"),
        }
    }
    debug!(session = %id, "connect loop finished");
}

macro_rules! connector_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name {
            inner: Connector,
        }

        impl $name {
            pub(crate) const fn from_connector(inner: Connector) -> Self {
                Self { inner }
            }

            /// Returns a cloneable sender for this connector's sessions.
            #[must_use]
            pub fn sender(&self) -> SessionSender {
                SessionSender::new(Arc::clone(&self.inner.registry))
            }

            /// Queues a message for a session.
            ///
            /// # Errors
            /// Returns `SessionError::SessionNotFound` for an unknown session.
            pub fn send_to_target(&self, message: Message, session_id: &SessionId) -> Result<()> {
                self.sender().send_to_target(message, session_id)
            }

            /// Queues a message for the session named by its header.
            ///
            /// # Errors
            /// Returns `SessionError::SessionNotFound` for an unknown session.
            pub fn send_to_target_from_header(&self, message: Message) -> Result<()> {
                self.sender().send_to_target_from_header(message)
            }

            /// Returns the configured sessions.
            #[must_use]
            pub fn session_ids(&self) -> Vec<SessionId> {
                self.inner.configs.iter().map(SessionConfig::session_id).collect()
            }

            /// Returns true if the session is logged on.
            #[must_use]
            pub fn is_session_logged_on(&self, session_id: &SessionId) -> bool {
                self.sender().is_logged_on(session_id)
            }

            /// Returns the scheduling mode.
            #[must_use]
            pub const fn mode(&self) -> ConnectorMode {
                self.inner.mode
            }
        }

        impl ConnectionHandler for $name {
            fn start(&self) -> Result<()> {
                self.inner.start()
            }

            fn block(&self) -> Result<()> {
                self.inner.block()
            }

            fn poll(&self) -> Result<bool> {
                self.inner.poll()
            }

            fn stop(&self) -> Result<()> {
                self.inner.stop()
            }

            fn is_logged_on(&self) -> bool {
                self.inner.registry.any_logged_on()
            }

            fn is_stopped(&self) -> bool {
                self.inner.is_stopped()
            }
        }
    };
}

connector_handle!(
    /// Accepts connections and routes each to the session named by its
    /// first message.
    SocketAcceptor
);

connector_handle!(
    /// Connects out for each initiator session and reconnects after
    /// failures while in session time.
    SocketInitiator
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incoming_session_id() {
        let raw = b"8=FIX.4.4\x019=55\x0135=A\x0134=1\x0149=CLIENT\x0152=20260127-10:00:00\x0156=EXEC\x0198=0\x01108=30\x0110=000\x01";
        let id = incoming_session_id(raw).unwrap();
        assert_eq!(id, SessionId::new("FIX.4.4", "EXEC", "CLIENT"));

        assert!(incoming_session_id(b"8=FIX.4.4\x019=5\x0135=0\x0110=000\x01").is_none());
        assert!(incoming_session_id(b"garbage").is_none());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectorState::Created.to_string(), "CREATED");
        assert_eq!(ConnectorState::Stopped.to_string(), "STOPPED");
    }

    #[test]
    fn test_default_mode() {
        assert_eq!(ConnectorMode::default(), ConnectorMode::Threaded);
    }
}
