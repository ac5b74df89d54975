/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Session states.
//!
//! ```text
//! DISCONNECTED --send Logon--> LOGON_SENT --recv Logon--> LOGGED_ON
//! DISCONNECTED --recv Logon--> LOGON_RECEIVED --send Logon--> LOGGED_ON
//! LOGGED_ON --send Logout--> LOGOUT_SENT --recv Logout / timeout--> DISCONNECTED
//! ```

use std::fmt;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No transport, or transport up without any logon exchanged.
    #[default]
    Disconnected,
    /// Our Logon is out, waiting for the counterparty's.
    LogonSent,
    /// The counterparty's Logon was accepted, our reply is pending.
    LogonReceived,
    /// Logon completed on both sides.
    LoggedOn,
    /// Our Logout is out, waiting for the acknowledgement.
    LogoutSent,
}

impl SessionState {
    /// Returns the state name used in logs and errors.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::LogonSent => "LOGON_SENT",
            Self::LogonReceived => "LOGON_RECEIVED",
            Self::LoggedOn => "LOGGED_ON",
            Self::LogoutSent => "LOGOUT_SENT",
        }
    }

    /// Returns true once logon completed and until Logout is sent.
    #[inline]
    #[must_use]
    pub const fn is_logged_on(&self) -> bool {
        matches!(self, Self::LoggedOn)
    }

    /// Returns true while a logon handshake is in flight.
    #[inline]
    #[must_use]
    pub const fn is_logging_on(&self) -> bool {
        matches!(self, Self::LogonSent | Self::LogonReceived)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
