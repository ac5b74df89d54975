/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Reject reason codes.
//!
//! [`SessionRejectReason`] is the SessionRejectReason (373) code of a session
//! level Reject; [`BusinessRejectReason`] is the BusinessRejectReason (380)
//! code of a BusinessMessageReject.

use fixgate_core::error::DecodeError;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

/// SessionRejectReason (tag 373).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromPrimitive, ToPrimitive,
)]
#[repr(u8)]
pub enum SessionRejectReason {
    /// Invalid tag number.
    InvalidTagNumber = 0,
    /// Required tag missing.
    RequiredTagMissing = 1,
    /// Tag not defined for this message type.
    TagNotDefinedForMessageType = 2,
    /// Undefined tag.
    UndefinedTag = 3,
    /// Tag specified without a value.
    TagSpecifiedWithoutValue = 4,
    /// Value is incorrect (out of range) for this tag.
    ValueIsIncorrect = 5,
    /// Incorrect data format for value.
    IncorrectDataFormat = 6,
    /// Decryption problem.
    DecryptionProblem = 7,
    /// Signature problem.
    SignatureProblem = 8,
    /// CompID problem.
    CompIdProblem = 9,
    /// SendingTime accuracy problem.
    SendingTimeAccuracyProblem = 10,
    /// Invalid MsgType.
    InvalidMsgType = 11,
    /// XML validation error.
    XmlValidationError = 12,
    /// Tag appears more than once.
    TagAppearsMoreThanOnce = 13,
    /// Tag specified out of required order.
    TagSpecifiedOutOfRequiredOrder = 14,
    /// Repeating group fields out of order.
    RepeatingGroupFieldsOutOfOrder = 15,
    /// Incorrect NumInGroup count for repeating group.
    IncorrectNumInGroupCount = 16,
    /// Non "data" value includes field delimiter (SOH).
    NonDataValueIncludesFieldDelimiter = 17,
    /// Other.
    Other = 99,
}

impl SessionRejectReason {
    /// Returns the numeric code written in tag 373.
    #[must_use]
    pub fn code(self) -> u32 {
        self.to_u32().unwrap_or(99)
    }

    /// Looks up a reason by its numeric code.
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        Self::from_u32(code)
    }

    /// Default Text (58) for the reason.
    #[must_use]
    pub const fn text(self) -> &'static str {
        match self {
            Self::InvalidTagNumber => "Invalid tag number",
            Self::RequiredTagMissing => "Required tag missing",
            Self::TagNotDefinedForMessageType => "Tag not defined for this message type",
            Self::UndefinedTag => "Undefined Tag",
            Self::TagSpecifiedWithoutValue => "Tag specified without a value",
            Self::ValueIsIncorrect => "Value is incorrect (out of range) for this tag",
            Self::IncorrectDataFormat => "Incorrect data format for value",
            Self::DecryptionProblem => "Decryption problem",
            Self::SignatureProblem => "Signature problem",
            Self::CompIdProblem => "CompID problem",
            Self::SendingTimeAccuracyProblem => "SendingTime accuracy problem",
            Self::InvalidMsgType => "Invalid MsgType",
            Self::XmlValidationError => "XML Validation error",
            Self::TagAppearsMoreThanOnce => "Tag appears more than once",
            Self::TagSpecifiedOutOfRequiredOrder => "Tag specified out of required order",
            Self::RepeatingGroupFieldsOutOfOrder => "Repeating group fields out of order",
            Self::IncorrectNumInGroupCount => "Incorrect NumInGroup count for repeating group",
            Self::NonDataValueIncludesFieldDelimiter => {
                "Non Data value includes field delimiter (SOH character)"
            }
            Self::Other => "Other",
        }
    }

    /// Maps a structural decode failure to the reason reported to the
    /// counterparty.
    ///
    /// # Returns
    /// `None` for framing failures, which are dropped without a Reject.
    #[must_use]
    pub fn from_decode_error(error: &DecodeError) -> Option<Self> {
        if error.is_garbled() {
            return None;
        }
        Some(match error {
            DecodeError::MissingRequiredField { .. } => Self::RequiredTagMissing,
            DecodeError::TagNotDefinedForMessage { .. } => Self::TagNotDefinedForMessageType,
            DecodeError::UndefinedTag { .. } => Self::InvalidTagNumber,
            DecodeError::EmptyValue { .. } => Self::TagSpecifiedWithoutValue,
            DecodeError::InvalidFieldValue { .. } => Self::ValueIsIncorrect,
            DecodeError::IncorrectDataFormat { .. } => Self::IncorrectDataFormat,
            DecodeError::InvalidMsgType(_) => Self::InvalidMsgType,
            DecodeError::RepeatedTag { .. } => Self::TagAppearsMoreThanOnce,
            DecodeError::TagOutOfOrder { .. } => Self::TagSpecifiedOutOfRequiredOrder,
            DecodeError::IncorrectMessageStructure { .. } => Self::RepeatingGroupFieldsOutOfOrder,
            DecodeError::GroupCountMismatch { .. } => Self::IncorrectNumInGroupCount,
            _ => Self::Other,
        })
    }
}

/// BusinessRejectReason (tag 380).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromPrimitive, ToPrimitive,
)]
#[repr(u8)]
pub enum BusinessRejectReason {
    /// Other.
    Other = 0,
    /// Unknown ID.
    UnknownId = 1,
    /// Unknown security.
    UnknownSecurity = 2,
    /// Unsupported message type.
    UnsupportedMessageType = 3,
    /// Application not available.
    ApplicationNotAvailable = 4,
    /// Conditionally required field missing.
    ConditionallyRequiredFieldMissing = 5,
    /// Not authorized.
    NotAuthorized = 6,
    /// DeliverTo firm not available at this time.
    DeliverToFirmNotAvailable = 7,
}

impl BusinessRejectReason {
    /// Returns the numeric code written in tag 380.
    #[must_use]
    pub fn code(self) -> u32 {
        self.to_u32().unwrap_or(0)
    }

    /// Looks up a reason by its numeric code.
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        Self::from_u32(code)
    }

    /// Default Text (58) for the reason.
    #[must_use]
    pub const fn text(self) -> &'static str {
        match self {
            Self::Other => "Other",
            Self::UnknownId => "Unknown ID",
            Self::UnknownSecurity => "Unknown Security",
            Self::UnsupportedMessageType => "Unsupported Message Type",
            Self::ApplicationNotAvailable => "Application not available",
            Self::ConditionallyRequiredFieldMissing => "Conditionally Required Field Missing",
            Self::NotAuthorized => "Not authorized",
            Self::DeliverToFirmNotAvailable => "DeliverTo firm not available at this time",
        }
    }
}
