/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Connector builder for fluent configuration.
//!
//! This module provides a builder API that turns [`SessionSettings`] into a
//! [`SocketAcceptor`] or [`SocketInitiator`]. Every session is created
//! (store opened, log created, `on_create` called) when the connector is
//! built, so configuration errors surface before any socket opens.

use crate::actor::SessionActor;
use crate::connector::{Connector, ConnectorMode, SocketAcceptor, SocketInitiator};
use crate::registry::{SessionEntry, SessionRegistry, SessionSender, SessionStatus};
use fixgate_core::error::{ConfigError, Result};
use fixgate_session::{
    Application, ConnectionType, FileLog, Log, LogFactory, NoOpApplication, Session,
    SessionConfig, SessionSettings, TracingLog,
};
use fixgate_store::{FileStore, MemoryStore, MessageStore, MessageStoreFactory};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;

/// Builder for configuring a connector.
pub struct ConnectorBuilder {
    /// Parsed session settings.
    settings: SessionSettings,
    /// Application callback handler.
    application: Arc<dyn Application>,
    /// Store factory; FileStorePath or memory stores when unset.
    store_factory: Option<Arc<dyn MessageStoreFactory>>,
    /// Log factory; FileLogPath or tracing logs when unset.
    log_factory: Option<Arc<dyn LogFactory>>,
    /// Scheduling mode.
    mode: ConnectorMode,
    /// Registry shared with senders handed out before building.
    registry: Arc<SessionRegistry>,
}

impl fmt::Debug for ConnectorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorBuilder")
            .field("sessions", &self.settings.len())
            .field("mode", &self.mode)
            .field("store_factory", &self.store_factory.is_some())
            .field("log_factory", &self.log_factory.is_some())
            .finish_non_exhaustive()
    }
}

impl ConnectorBuilder {
    /// Creates a builder with a no-op application, default stores and
    /// logs, and the threaded mode.
    #[must_use]
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            application: Arc::new(NoOpApplication),
            store_factory: None,
            log_factory: None,
            mode: ConnectorMode::default(),
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    /// Sets the application callback handler.
    #[must_use]
    pub fn with_application<A: Application + 'static>(self, application: A) -> Self {
        self.with_shared_application(Arc::new(application))
    }

    /// Sets an application that is also used elsewhere.
    #[must_use]
    pub fn with_shared_application(mut self, application: Arc<dyn Application>) -> Self {
        self.application = application;
        self
    }

    /// Sets the message store factory used for every session.
    #[must_use]
    pub fn with_store_factory<F: MessageStoreFactory + 'static>(mut self, factory: F) -> Self {
        self.store_factory = Some(Arc::new(factory));
        self
    }

    /// Sets the log factory used for every session.
    #[must_use]
    pub fn with_log_factory<F: LogFactory + 'static>(mut self, factory: F) -> Self {
        self.log_factory = Some(Arc::new(factory));
        self
    }

    /// Sets the scheduling mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: ConnectorMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns a sender for the sessions of the connector being built.
    ///
    /// Useful for applications that answer from their callbacks: create the
    /// sender, hand it to the application, then build.
    #[must_use]
    pub fn sender(&self) -> SessionSender {
        SessionSender::new(Arc::clone(&self.registry))
    }

    /// Returns the settings.
    #[must_use]
    pub const fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Returns the scheduling mode.
    #[must_use]
    pub const fn mode(&self) -> ConnectorMode {
        self.mode
    }

    /// Builds an acceptor from the sessions with `ConnectionType=acceptor`.
    ///
    /// # Errors
    /// - `ConfigError` for invalid settings or when no acceptor session is
    ///   configured
    /// - store or I/O errors while creating sessions
    pub fn build_acceptor(self) -> Result<SocketAcceptor> {
        self.build(ConnectionType::Acceptor)
            .map(SocketAcceptor::from_connector)
    }

    /// Builds an initiator from the sessions with `ConnectionType=initiator`.
    ///
    /// # Errors
    /// The same as [`ConnectorBuilder::build_acceptor`].
    pub fn build_initiator(self) -> Result<SocketInitiator> {
        self.build(ConnectionType::Initiator)
            .map(SocketInitiator::from_connector)
    }

    fn runtime(mode: ConnectorMode) -> std::io::Result<Runtime> {
        match mode {
            ConnectorMode::Single => Builder::new_current_thread().enable_all().build(),
            ConnectorMode::Threaded => Builder::new_multi_thread()
                .enable_all()
                .thread_name("fixgate")
                .build(),
        }
    }

    fn build(self, kind: ConnectionType) -> Result<Connector> {
        let mut configs = Vec::new();
        for (_, section) in self.settings.sessions() {
            let config = SessionConfig::from_settings(section)?;
            if config.connection_type == kind {
                configs.push(config);
            }
        }
        if configs.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "ConnectionType".to_owned(),
                value: format!("{kind:?}").to_ascii_lowercase(),
                reason: "no session of this type is configured".to_owned(),
            }
            .into());
        }

        let runtime = Self::runtime(self.mode)?;
        let processed = Arc::new(AtomicU64::new(0));
        let actors = runtime.block_on(async {
            let mut actors = Vec::with_capacity(configs.len());
            for config in &configs {
                actors.push(self.create_session(config, &processed).await?);
            }
            Ok::<_, fixgate_core::error::FixError>(actors)
        })?;

        Ok(Connector::new(
            kind,
            self.mode,
            runtime,
            self.registry,
            configs,
            actors,
            processed,
        ))
    }

    async fn create_session(
        &self,
        config: &SessionConfig,
        processed: &Arc<AtomicU64>,
    ) -> Result<SessionActor> {
        let id = config.session_id();
        let store: Arc<dyn MessageStore> = match (&self.store_factory, &config.file_store_path) {
            (Some(factory), _) => factory.create(&id).await?,
            (None, Some(path)) => Arc::new(FileStore::open(path, &id).await?),
            (None, None) => Arc::new(MemoryStore::new()),
        };
        let log: Arc<dyn Log> = match (&self.log_factory, &config.file_log_path) {
            (Some(factory), _) => factory.create(&id)?,
            (None, Some(path)) => Arc::new(FileLog::open(path, &id)?),
            (None, None) => Arc::new(TracingLog::new(&id)),
        };

        let session = Session::new(config.clone(), store, log, Arc::clone(&self.application)).await;
        let (events, receiver) = mpsc::unbounded_channel();
        let status = Arc::new(SessionStatus::new());
        self.registry.insert(
            id,
            SessionEntry {
                events: events.clone(),
                status: Arc::clone(&status),
            },
        )?;
        Ok(SessionActor::new(
            session,
            receiver,
            events,
            status,
            Arc::clone(processed),
        ))
    }
}
