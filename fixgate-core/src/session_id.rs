/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Session identifier.

use crate::field::tags;
use crate::message::FieldMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies a counterparty relationship.
///
/// Equality and hashing cover all four parts; the qualifier tells apart
/// sessions that share comp IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId {
    /// BeginString (FIX version).
    pub begin_string: String,
    /// Our CompID.
    pub sender_comp_id: String,
    /// The counterparty's CompID.
    pub target_comp_id: String,
    /// Optional qualifier.
    pub session_qualifier: Option<String>,
}

impl SessionId {
    /// Creates a new session ID.
    #[must_use]
    pub fn new(
        begin_string: impl Into<String>,
        sender_comp_id: impl Into<String>,
        target_comp_id: impl Into<String>,
    ) -> Self {
        Self {
            begin_string: begin_string.into(),
            sender_comp_id: sender_comp_id.into(),
            target_comp_id: target_comp_id.into(),
            session_qualifier: None,
        }
    }

    /// Sets the session qualifier.
    #[must_use]
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.session_qualifier = Some(qualifier.into());
        self
    }

    /// Returns true for FIXT transport sessions (FIX 5.0 and later).
    #[must_use]
    pub fn is_fixt(&self) -> bool {
        self.begin_string.starts_with("FIXT")
    }

    /// Builds the local session id matching a header received from the
    /// counterparty (their sender is our target).
    ///
    /// # Returns
    /// `None` if BeginString, SenderCompID or TargetCompID is missing.
    #[must_use]
    pub fn from_incoming_header(header: &FieldMap) -> Option<Self> {
        Some(Self::new(
            header.get_field(tags::BEGIN_STRING)?,
            header.get_field(tags::TARGET_COMP_ID)?,
            header.get_field(tags::SENDER_COMP_ID)?,
        ))
    }

    /// Builds the session id of an outgoing header (our sender is 49).
    ///
    /// # Returns
    /// `None` if BeginString, SenderCompID or TargetCompID is missing.
    #[must_use]
    pub fn from_outgoing_header(header: &FieldMap) -> Option<Self> {
        Some(Self::new(
            header.get_field(tags::BEGIN_STRING)?,
            header.get_field(tags::SENDER_COMP_ID)?,
            header.get_field(tags::TARGET_COMP_ID)?,
        ))
    }

    /// Returns the identity without its qualifier.
    #[must_use]
    pub fn unqualified(&self) -> Self {
        Self::new(
            self.begin_string.clone(),
            self.sender_comp_id.clone(),
            self.target_comp_id.clone(),
        )
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}->{}",
            self.begin_string, self.sender_comp_id, self.target_comp_id
        )?;
        if let Some(qualifier) = &self.session_qualifier {
            write!(f, ":{}", qualifier)?;
        }
        Ok(())
    }
}

/// Error returned when a string is not `BEGIN:SENDER->TARGET[:QUALIFIER]`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid session id: {0}")]
pub struct ParseSessionIdError(pub String);

impl FromStr for SessionId {
    type Err = ParseSessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseSessionIdError(s.to_string());
        let (begin_string, rest) = s.split_once(':').ok_or_else(err)?;
        let (sender, rest) = rest.split_once("->").ok_or_else(err)?;
        let (target, qualifier) = match rest.split_once(':') {
            Some((target, qualifier)) => (target, Some(qualifier)),
            None => (rest, None),
        };
        if begin_string.is_empty() || sender.is_empty() || target.is_empty() {
            return Err(err());
        }
        let id = Self::new(begin_string, sender, target);
        Ok(match qualifier {
            Some(q) if !q.is_empty() => id.with_qualifier(q),
            Some(_) => return Err(err()),
            None => id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_session_id_display() {
        let id = SessionId::new("FIX.4.4", "SENDER", "TARGET");
        assert_eq!(id.to_string(), "FIX.4.4:SENDER->TARGET");
        assert_eq!(
            id.with_qualifier("Q1").to_string(),
            "FIX.4.4:SENDER->TARGET:Q1"
        );
    }

    #[test]
    fn test_session_id_from_str() {
        let id: SessionId = "FIXT.1.1:A->B:ALT".parse().unwrap();
        assert_eq!(id.begin_string, "FIXT.1.1");
        assert_eq!(id.sender_comp_id, "A");
        assert_eq!(id.target_comp_id, "B");
        assert_eq!(id.session_qualifier.as_deref(), Some("ALT"));
        assert!(id.is_fixt());

        assert!("FIX.4.4:A-B".parse::<SessionId>().is_err());
        assert!("FIX.4.4:A->".parse::<SessionId>().is_err());
    }

    #[test]
    fn test_qualifier_distinguishes_sessions() {
        let mut set = HashSet::new();
        set.insert(SessionId::new("FIX.4.2", "A", "B"));
        set.insert(SessionId::new("FIX.4.2", "A", "B").with_qualifier("2"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_from_incoming_header() {
        let mut header = FieldMap::new();
        header.set_field(tags::BEGIN_STRING, "FIX.4.2");
        header.set_field(tags::SENDER_COMP_ID, "CLIENT");
        header.set_field(tags::TARGET_COMP_ID, "EXEC");

        let local = SessionId::from_incoming_header(&header).unwrap();
        assert_eq!(local, SessionId::new("FIX.4.2", "EXEC", "CLIENT"));
        let remote = SessionId::from_outgoing_header(&header).unwrap();
        assert_eq!(remote, SessionId::new("FIX.4.2", "CLIENT", "EXEC"));
    }
}
