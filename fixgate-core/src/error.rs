/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Error types for the fixgate FIX session engine.
//!
//! Every layer reports failures through a dedicated `thiserror` enum so that
//! callers can tell recoverable protocol conditions apart from fatal
//! configuration or transport faults. [`FixError`] unifies them.

use thiserror::Error;

/// Result type alias using [`FixError`] as the error type.
pub type Result<T> = std::result::Result<T, FixError>;

/// Top-level error type for all fixgate operations.
#[derive(Debug, Error)]
pub enum FixError {
    /// Error during message decoding.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Error during message encoding.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Error in session layer operations.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Error in message store operations.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid or incomplete configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error from underlying transport.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that occur during FIX message decoding.
///
/// Decoding is all-or-nothing: any of these means no message was produced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Message buffer is incomplete, need more data.
    #[error("incomplete message, need more data")]
    Incomplete,

    /// Invalid BeginString field (tag 8).
    #[error("invalid begin string: expected 8=FIX.x.y as first field")]
    InvalidBeginString,

    /// Missing BodyLength field (tag 9).
    #[error("missing body length field (tag 9)")]
    MissingBodyLength,

    /// Invalid BodyLength value.
    #[error("invalid body length value")]
    InvalidBodyLength,

    /// Declared BodyLength does not match the bytes on the wire.
    #[error("body length mismatch: declared {declared}, actual {actual}")]
    BodyLengthMismatch {
        /// Value carried in tag 9.
        declared: usize,
        /// Byte count between tag 9 and tag 10.
        actual: usize,
    },

    /// Missing MsgType field (tag 35).
    #[error("missing msg type field (tag 35)")]
    MissingMsgType,

    /// Invalid MsgType value.
    #[error("invalid msg type: {0}")]
    InvalidMsgType(String),

    /// Missing or misplaced CheckSum field (tag 10).
    #[error("missing checksum field (tag 10)")]
    MissingChecksum,

    /// Checksum mismatch between calculated and declared values.
    #[error("checksum mismatch: calculated {calculated}, declared {declared}")]
    ChecksumMismatch {
        /// Calculated checksum value.
        calculated: u8,
        /// Declared checksum value in message.
        declared: u8,
    },

    /// Invalid tag format (not a valid integer).
    #[error("invalid tag format: {0}")]
    InvalidTag(String),

    /// Missing required field.
    #[error("missing required field: tag {tag}")]
    MissingRequiredField {
        /// The tag number of the missing field.
        tag: u32,
    },

    /// Invalid field value for the expected type.
    #[error("invalid field value for tag {tag}: {reason}")]
    InvalidFieldValue {
        /// The tag number of the field.
        tag: u32,
        /// Description of why the value is invalid.
        reason: String,
    },

    /// Field present without a value.
    #[error("tag {tag} specified without a value")]
    EmptyValue {
        /// The tag number of the field.
        tag: u32,
    },

    /// Value does not match the data type of the field.
    #[error("incorrect data format for tag {tag}")]
    IncorrectDataFormat {
        /// The tag number of the field.
        tag: u32,
    },

    /// Tag number unknown to the data dictionary.
    #[error("undefined tag {tag}")]
    UndefinedTag {
        /// The unknown tag.
        tag: u32,
    },

    /// Tag known to the dictionary but not declared for this message type.
    #[error("tag {tag} not defined for this message type")]
    TagNotDefinedForMessage {
        /// The unexpected tag.
        tag: u32,
    },

    /// Header field after the body started, or body field inside the trailer.
    #[error("tag {tag} specified out of required order")]
    TagOutOfOrder {
        /// The misplaced tag.
        tag: u32,
    },

    /// A non-group field appears more than once.
    #[error("tag {tag} appears more than once")]
    RepeatedTag {
        /// The repeated tag.
        tag: u32,
    },

    /// Repeating group count mismatch.
    #[error("group count mismatch for tag {count_tag}: expected {expected}, found {actual}")]
    GroupCountMismatch {
        /// The tag containing the group count.
        count_tag: u32,
        /// Expected number of group entries.
        expected: u32,
        /// Actual number of group entries found.
        actual: u32,
    },

    /// Group or field layout does not follow the data dictionary.
    #[error("incorrect message structure at tag {tag}: {reason}")]
    IncorrectMessageStructure {
        /// Tag at which the mismatch was detected.
        tag: u32,
        /// Description of the mismatch.
        reason: String,
    },

    /// Invalid UTF-8 in string field.
    #[error("invalid utf-8 in field: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Message exceeds maximum allowed size.
    #[error("message too large: {size} bytes exceeds maximum {max_size}")]
    MessageTooLarge {
        /// Actual message size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max_size: usize,
    },
}

impl DecodeError {
    /// Returns the tag the error refers to, when there is one.
    #[must_use]
    pub const fn ref_tag(&self) -> Option<u32> {
        match self {
            Self::MissingRequiredField { tag }
            | Self::InvalidFieldValue { tag, .. }
            | Self::EmptyValue { tag }
            | Self::IncorrectDataFormat { tag }
            | Self::UndefinedTag { tag }
            | Self::TagNotDefinedForMessage { tag }
            | Self::TagOutOfOrder { tag }
            | Self::RepeatedTag { tag }
            | Self::IncorrectMessageStructure { tag, .. } => Some(*tag),
            Self::GroupCountMismatch { count_tag, .. } => Some(*count_tag),
            _ => None,
        }
    }

    /// Returns true for failures of the framing integrity checks.
    ///
    /// Such messages cannot be trusted at all and are dropped without reply.
    #[must_use]
    pub const fn is_garbled(&self) -> bool {
        matches!(
            self,
            Self::Incomplete
                | Self::InvalidBeginString
                | Self::MissingBodyLength
                | Self::InvalidBodyLength
                | Self::BodyLengthMismatch { .. }
                | Self::MissingMsgType
                | Self::MissingChecksum
                | Self::ChecksumMismatch { .. }
                | Self::InvalidTag(_)
                | Self::MessageTooLarge { .. }
        )
    }
}

/// Errors that occur during FIX message encoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Missing required field during encoding.
    #[error("missing required field: tag {tag}")]
    MissingRequiredField {
        /// The tag number of the missing field.
        tag: u32,
    },

    /// Invalid field value for encoding.
    #[error("invalid field value for tag {tag}: {reason}")]
    InvalidFieldValue {
        /// The tag number of the field.
        tag: u32,
        /// Description of why the value is invalid.
        reason: String,
    },
}

/// Errors in FIX session layer operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Session or connector is not in the correct state for the operation.
    #[error("invalid state: expected {expected}, current {current}")]
    InvalidState {
        /// Expected state for the operation.
        expected: String,
        /// Current state.
        current: String,
    },

    /// Logon was rejected.
    #[error("logon rejected: {reason}")]
    LogonRejected {
        /// Reason for rejection.
        reason: String,
    },

    /// Heartbeat timeout - no response to TestRequest.
    #[error("heartbeat timeout after {elapsed_ms} milliseconds")]
    HeartbeatTimeout {
        /// Elapsed time in milliseconds since last message.
        elapsed_ms: u64,
    },

    /// Sequence number too low without PossDupFlag.
    #[error("sequence too low: expected >= {expected}, received {received}")]
    SequenceTooLow {
        /// Minimum expected sequence number.
        expected: u64,
        /// Received sequence number.
        received: u64,
    },

    /// No session with this identifier is configured.
    #[error("session not found: {session_id}")]
    SessionNotFound {
        /// Display form of the requested session id.
        session_id: String,
    },

    /// Two configured sessions share one identifier.
    #[error("duplicate session: {session_id}")]
    DuplicateSession {
        /// Display form of the duplicated session id.
        session_id: String,
    },

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),
}

/// Errors in message store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Failed to store message.
    #[error("failed to store message seq={seq_num}: {reason}")]
    StoreFailed {
        /// Sequence number of the message.
        seq_num: u64,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to retrieve message.
    #[error("failed to retrieve message seq={seq_num}: {reason}")]
    RetrieveFailed {
        /// Sequence number of the message.
        seq_num: u64,
        /// Reason for failure.
        reason: String,
    },

    /// Store is corrupted.
    #[error("store corrupted: {reason}")]
    Corrupted {
        /// Description of the corruption.
        reason: String,
    },

    /// I/O error in persistent store.
    #[error("store i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Configuration errors, reported before any socket is opened.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Malformed settings text.
    #[error("parse error at line {line}: {reason}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// What was wrong with the line.
        reason: String,
    },

    /// A required key is absent from a section and from `[DEFAULT]`.
    #[error("missing setting {key} in {section}")]
    MissingSetting {
        /// Section description (session id or `DEFAULT`).
        section: String,
        /// The missing key.
        key: String,
    },

    /// A key is present but its value cannot be used.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// The offending key.
        key: String,
        /// The raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Two sections describe the same session.
    #[error("duplicate session {0}")]
    DuplicateSession(String),

    /// Data dictionary could not be loaded.
    #[error("data dictionary: {0}")]
    Dictionary(String),

    /// Settings or dictionary file could not be read.
    #[error("config i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
