/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Session registry and the public send API.
//!
//! The registry maps each [`SessionId`] to the event channel of its actor
//! together with a few status flags the actor publishes. It never owns a
//! session; dropping the actor closes the channel.

use crate::actor::SessionEvent;
use fixgate_core::error::{Result, SessionError};
use fixgate_core::message::Message;
use fixgate_core::session_id::SessionId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Flags published by a session actor after every event.
#[derive(Debug, Default)]
pub struct SessionStatus {
    logged_on: AtomicBool,
    connected: AtomicBool,
    enabled: AtomicBool,
}

impl SessionStatus {
    pub(crate) fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub(crate) fn update(&self, logged_on: bool, connected: bool, enabled: bool) {
        self.logged_on.store(logged_on, Ordering::Release);
        self.connected.store(connected, Ordering::Release);
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Returns true while the session is logged on.
    #[must_use]
    pub fn is_logged_on(&self) -> bool {
        self.logged_on.load(Ordering::Acquire)
    }

    /// Returns true while a transport is attached.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Returns false after a local logout.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SessionEntry {
    pub(crate) events: mpsc::UnboundedSender<SessionEvent>,
    pub(crate) status: Arc<SessionStatus>,
}

/// Lookup table from session id to actor.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, id: SessionId, entry: SessionEntry) -> Result<()> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&id) {
            return Err(SessionError::DuplicateSession {
                session_id: id.to_string(),
            }
            .into());
        }
        sessions.insert(id, entry);
        Ok(())
    }

    pub(crate) fn get(&self, id: &SessionId) -> Option<SessionEntry> {
        self.sessions.read().get(id).cloned()
    }

    /// Finds the session an inbound connection belongs to.
    ///
    /// An exact match wins; otherwise a qualified session with the same
    /// version and CompIDs is used when it is the only candidate.
    pub(crate) fn route(&self, id: &SessionId) -> Option<(SessionId, SessionEntry)> {
        let sessions = self.sessions.read();
        if let Some(entry) = sessions.get(id) {
            return Some((id.clone(), entry.clone()));
        }
        let mut candidates = sessions
            .iter()
            .filter(|(candidate, _)| candidate.unqualified() == *id);
        let found = candidates.next()?;
        if candidates.next().is_some() {
            return None;
        }
        Some((found.0.clone(), found.1.clone()))
    }

    /// Returns true if the session is configured.
    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Returns the configured session ids.
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Returns the published status of a session.
    #[must_use]
    pub fn status(&self, id: &SessionId) -> Option<Arc<SessionStatus>> {
        self.sessions.read().get(id).map(|entry| Arc::clone(&entry.status))
    }

    /// Returns true if any session is logged on.
    #[must_use]
    pub fn any_logged_on(&self) -> bool {
        self.sessions
            .read()
            .values()
            .any(|entry| entry.status.is_logged_on())
    }

    pub(crate) fn entries(&self) -> Vec<(SessionId, SessionEntry)> {
        self.sessions
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect()
    }

    fn dispatch(&self, id: &SessionId, event: SessionEvent) -> Result<()> {
        let Some(entry) = self.get(id) else {
            return Err(SessionError::SessionNotFound {
                session_id: id.to_string(),
            }
            .into());
        };
        entry.events.send(event).map_err(|_| {
            SessionError::InvalidState {
                expected: "running".to_owned(),
                current: "stopped".to_owned(),
            }
            .into()
        })
    }
}

/// Cloneable handle for sending messages to configured sessions.
///
/// Sending only enqueues: the session's actor assigns the seqnum, persists
/// and transmits. It is therefore safe to call from application callbacks.
#[derive(Debug, Clone)]
pub struct SessionSender {
    registry: Arc<SessionRegistry>,
}

impl SessionSender {
    pub(crate) const fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Queues a message for a session.
    ///
    /// # Arguments
    /// * `message` - Message whose header the session completes
    /// * `session_id` - Target session
    ///
    /// # Errors
    /// - `SessionError::SessionNotFound` if the session is not configured
    /// - `SessionError::InvalidState` once the connector has stopped
    pub fn send_to_target(&self, message: Message, session_id: &SessionId) -> Result<()> {
        self.registry
            .dispatch(session_id, SessionEvent::Send(Box::new(message)))
    }

    /// Queues a message for the session named by its own header.
    ///
    /// BeginString, SenderCompID and TargetCompID are read from the header
    /// with SenderCompID as the local side.
    ///
    /// # Errors
    /// Returns `SessionError::SessionNotFound` if the header lacks one of
    /// these fields or names no configured session, otherwise the errors of
    /// [`SessionSender::send_to_target`].
    pub fn send_to_target_from_header(&self, message: Message) -> Result<()> {
        let Some(id) = SessionId::from_outgoing_header(message.header()) else {
            return Err(SessionError::SessionNotFound {
                session_id: "<incomplete header>".to_owned(),
            }
            .into());
        };
        self.send_to_target(message, &id)
    }

    /// Starts a logout of a session and keeps it from logging on again.
    ///
    /// # Errors
    /// The same as [`SessionSender::send_to_target`].
    pub fn logout(&self, session_id: &SessionId, text: Option<&str>) -> Result<()> {
        self.registry.dispatch(
            session_id,
            SessionEvent::Logout(text.map(ToOwned::to_owned)),
        )
    }

    /// Returns true if the session is configured and logged on.
    #[must_use]
    pub fn is_logged_on(&self, session_id: &SessionId) -> bool {
        self.registry
            .status(session_id)
            .is_some_and(|status| status.is_logged_on())
    }

    /// Returns the registry behind this sender.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}
