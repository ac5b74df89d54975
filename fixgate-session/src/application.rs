/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Application callback interface.
//!
//! This module defines the callback interface for handling FIX messages,
//! following the QuickFIX pattern with async support. Every hook has a
//! no-op default, so applications implement only what they need.

use async_trait::async_trait;
use fixgate_core::message::Message;
use fixgate_core::session_id::SessionId;
use std::fmt;

/// Reason for rejecting an inbound message.
///
/// The session turns it into the matching Reject, BusinessMessageReject or
/// Logout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// A required field is absent (Reject, 373=1).
    FieldNotFound {
        /// The missing tag.
        tag: u32,
    },
    /// A field has an unacceptable value (Reject, 373=5).
    IncorrectTagValue {
        /// The offending tag.
        tag: u32,
    },
    /// A field value has the wrong format (Reject, 373=6).
    IncorrectDataFormat {
        /// The offending tag.
        tag: u32,
    },
    /// The message type is not handled (BusinessMessageReject, 380=3).
    UnsupportedMessageType,
    /// Refuses a Logon; the session logs out and disconnects.
    RejectLogon {
        /// Text (58) of the Logout.
        text: String,
    },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldNotFound { tag } => write!(f, "field not found: {tag}"),
            Self::IncorrectTagValue { tag } => write!(f, "incorrect tag value: {tag}"),
            Self::IncorrectDataFormat { tag } => write!(f, "incorrect data format: {tag}"),
            Self::UnsupportedMessageType => f.write_str("unsupported message type"),
            Self::RejectLogon { text } => write!(f, "logon rejected: {text}"),
        }
    }
}

/// Returned by [`Application::to_app`] to suppress an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DoNotSend;

/// Application callback interface for handling FIX messages.
///
/// Implement this trait to receive callbacks for session events
/// and message processing. Callbacks of one session are never invoked
/// concurrently.
#[async_trait]
pub trait Application: Send + Sync {
    /// Called when a session is created.
    ///
    /// # Arguments
    /// * `session_id` - The session identifier
    async fn on_create(&self, _session_id: &SessionId) {}

    /// Called on successful logon.
    ///
    /// # Arguments
    /// * `session_id` - The session identifier
    async fn on_logon(&self, _session_id: &SessionId) {}

    /// Called on logout or disconnect of a logged on session.
    ///
    /// # Arguments
    /// * `session_id` - The session identifier
    async fn on_logout(&self, _session_id: &SessionId) {}

    /// Called before sending an admin message.
    ///
    /// Allows modification of outgoing admin messages (Logon, Heartbeat, etc.).
    ///
    /// # Arguments
    /// * `message` - The message to be sent (mutable)
    /// * `session_id` - The session identifier
    async fn to_admin(&self, _message: &mut Message, _session_id: &SessionId) {}

    /// Called when an admin message is received.
    ///
    /// # Returns
    /// `Ok(())` to accept, `Err(RejectReason)` to reject. On a Logon,
    /// `RejectReason::RejectLogon` refuses the connection.
    #[allow(clippy::wrong_self_convention)]
    async fn from_admin(
        &self,
        _message: &Message,
        _session_id: &SessionId,
    ) -> Result<(), RejectReason> {
        Ok(())
    }

    /// Called before sending an application message, including resends.
    ///
    /// # Returns
    /// `Err(DoNotSend)` suppresses the message; during a resend it is
    /// replaced by a gap fill.
    async fn to_app(&self, _message: &mut Message, _session_id: &SessionId) -> Result<(), DoNotSend> {
        Ok(())
    }

    /// Called when an application message is received.
    ///
    /// # Returns
    /// `Ok(())` to accept, `Err(RejectReason)` to reject.
    #[allow(clippy::wrong_self_convention)]
    async fn from_app(
        &self,
        _message: &Message,
        _session_id: &SessionId,
    ) -> Result<(), RejectReason> {
        Ok(())
    }
}

/// Default no-op application implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpApplication;

#[async_trait]
impl Application for NoOpApplication {}

#[cfg(test)]
mod tests {
    use super::*;
    use fixgate_core::message::MsgType;

    #[test]
    fn test_reject_reason_display() {
        assert_eq!(
            RejectReason::FieldNotFound { tag: 55 }.to_string(),
            "field not found: 55"
        );
        assert_eq!(
            RejectReason::RejectLogon {
                text: "bad password".into()
            }
            .to_string(),
            "logon rejected: bad password"
        );
    }

    #[tokio::test]
    async fn test_noop_application() {
        let app = NoOpApplication;
        let session_id = SessionId::new("FIX.4.4", "SENDER", "TARGET");
        let mut message = Message::with_msg_type(&MsgType::NewOrderSingle);

        app.on_create(&session_id).await;
        app.on_logon(&session_id).await;
        app.to_admin(&mut message, &session_id).await;
        assert_eq!(app.to_app(&mut message, &session_id).await, Ok(()));
        assert_eq!(app.from_app(&message, &session_id).await, Ok(()));
        assert_eq!(app.from_admin(&message, &session_id).await, Ok(()));
        app.on_logout(&session_id).await;
    }
}
