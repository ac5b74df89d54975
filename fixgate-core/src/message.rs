/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Message model for FIX protocol.
//!
//! This module provides:
//! - [`MsgType`]: Session-level message types plus application passthrough
//! - [`FieldMap`]: Ordered field container with attached repeating groups
//! - [`Group`]: One instance of a repeating group
//! - [`Message`]: Header, body and trailer field maps

use crate::error::DecodeError;
use crate::field::{Field, tags};
use crate::types::Timestamp;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// FIX message types.
///
/// Session-level types are enumerated because the engine acts on them;
/// application types the engine only sequences are kept as `App`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsgType {
    /// Heartbeat (0).
    Heartbeat,
    /// Test Request (1).
    TestRequest,
    /// Resend Request (2).
    ResendRequest,
    /// Reject (3).
    Reject,
    /// Sequence Reset (4).
    SequenceReset,
    /// Logout (5).
    Logout,
    /// Logon (A).
    Logon,
    /// Execution Report (8).
    ExecutionReport,
    /// New Order Single (D).
    NewOrderSingle,
    /// Business Message Reject (j).
    BusinessMessageReject,
    /// Any other message type.
    App(String),
}

impl MsgType {
    /// Returns the wire value of the message type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Heartbeat => "0",
            Self::TestRequest => "1",
            Self::ResendRequest => "2",
            Self::Reject => "3",
            Self::SequenceReset => "4",
            Self::Logout => "5",
            Self::Logon => "A",
            Self::ExecutionReport => "8",
            Self::NewOrderSingle => "D",
            Self::BusinessMessageReject => "j",
            Self::App(value) => value,
        }
    }

    /// Returns true for session-level (administrative) messages.
    #[inline]
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(
            self,
            Self::Heartbeat
                | Self::TestRequest
                | Self::ResendRequest
                | Self::Reject
                | Self::SequenceReset
                | Self::Logout
                | Self::Logon
        )
    }
}

impl FromStr for MsgType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "0" => Self::Heartbeat,
            "1" => Self::TestRequest,
            "2" => Self::ResendRequest,
            "3" => Self::Reject,
            "4" => Self::SequenceReset,
            "5" => Self::Logout,
            "A" => Self::Logon,
            "8" => Self::ExecutionReport,
            "D" => Self::NewOrderSingle,
            "j" => Self::BusinessMessageReject,
            other => Self::App(other.to_string()),
        })
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered collection of fields with repeating groups attached to their
/// count tag.
///
/// Setting an existing tag replaces its value in place, so the original
/// position is kept on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMap {
    fields: Vec<Field>,
    groups: BTreeMap<u32, Vec<Group>>,
}

impl FieldMap {
    /// Creates an empty field map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, replacing any previous value for the tag.
    pub fn set_field(&mut self, tag: u32, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|f| f.tag == tag) {
            Some(field) => field.value = value,
            None => self.fields.push(Field { tag, value }),
        }
    }

    /// Appends a field without looking for an existing value.
    ///
    /// Used when rebuilding messages whose layout is not known from a
    /// dictionary and the same tag may legitimately repeat.
    pub fn append_field(&mut self, tag: u32, value: impl Into<String>) {
        self.fields.push(Field::new(tag, value));
    }

    /// Sets an unsigned integer field.
    pub fn set_uint(&mut self, tag: u32, value: u64) {
        let mut buf = itoa::Buffer::new();
        self.set_field(tag, buf.format(value));
    }

    /// Sets a signed integer field.
    pub fn set_int(&mut self, tag: u32, value: i64) {
        let mut buf = itoa::Buffer::new();
        self.set_field(tag, buf.format(value));
    }

    /// Sets a boolean field (Y/N).
    pub fn set_bool(&mut self, tag: u32, value: bool) {
        self.set_field(tag, if value { "Y" } else { "N" });
    }

    /// Sets a single character field.
    pub fn set_char(&mut self, tag: u32, value: char) {
        self.set_field(tag, value.to_string());
    }

    /// Sets a decimal field.
    pub fn set_decimal(&mut self, tag: u32, value: Decimal) {
        self.set_field(tag, value.normalize().to_string());
    }

    /// Sets a UTCTimestamp field with millisecond precision.
    pub fn set_timestamp(&mut self, tag: u32, value: Timestamp) {
        self.set_field(tag, value.format_millis().as_str());
    }

    /// Returns the raw value of a field.
    #[must_use]
    pub fn get_field(&self, tag: u32) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.tag == tag)
            .map(|f| f.value.as_str())
    }

    /// Returns a field by tag.
    #[must_use]
    pub fn field(&self, tag: u32) -> Option<&Field> {
        self.fields.iter().find(|f| f.tag == tag)
    }

    /// Returns a required field parsed as `T`.
    ///
    /// # Errors
    /// `MissingRequiredField` if absent, `InvalidFieldValue` if unparsable.
    pub fn get<T: FromStr>(&self, tag: u32) -> Result<T, DecodeError> {
        self.require(tag)?.parse()
    }

    /// Returns a required boolean field.
    ///
    /// # Errors
    /// `MissingRequiredField` if absent, `InvalidFieldValue` if not Y/N.
    pub fn get_bool(&self, tag: u32) -> Result<bool, DecodeError> {
        self.require(tag)?.as_bool()
    }

    /// Returns a required single character field.
    ///
    /// # Errors
    /// `MissingRequiredField` if absent, `InvalidFieldValue` otherwise.
    pub fn get_char(&self, tag: u32) -> Result<char, DecodeError> {
        self.require(tag)?.as_char()
    }

    /// Returns a required decimal field.
    ///
    /// # Errors
    /// `MissingRequiredField` if absent, `InvalidFieldValue` otherwise.
    pub fn get_decimal(&self, tag: u32) -> Result<Decimal, DecodeError> {
        self.require(tag)?.as_decimal()
    }

    /// Returns a required UTCTimestamp field.
    ///
    /// # Errors
    /// `MissingRequiredField` if absent, `InvalidFieldValue` otherwise.
    pub fn get_timestamp(&self, tag: u32) -> Result<Timestamp, DecodeError> {
        let field = self.require(tag)?;
        Timestamp::parse(&field.value).ok_or_else(|| DecodeError::InvalidFieldValue {
            tag,
            reason: format!("'{}' is not a UTCTimestamp", field.value),
        })
    }

    /// Returns an optional boolean flag, treating absence as `false`.
    #[must_use]
    pub fn flag(&self, tag: u32) -> bool {
        self.get_field(tag) == Some("Y")
    }

    fn require(&self, tag: u32) -> Result<&Field, DecodeError> {
        self.field(tag)
            .ok_or(DecodeError::MissingRequiredField { tag })
    }

    /// Returns true if the tag is present.
    #[must_use]
    pub fn has_field(&self, tag: u32) -> bool {
        self.fields.iter().any(|f| f.tag == tag)
    }

    /// Removes a field and any groups counted by it.
    pub fn remove_field(&mut self, tag: u32) -> Option<String> {
        self.groups.remove(&tag);
        let pos = self.fields.iter().position(|f| f.tag == tag)?;
        Some(self.fields.remove(pos).value)
    }

    /// Returns the fields in wire order, without group members.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// Returns the number of top-level fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Appends a group instance and updates its count field.
    pub fn add_group(&mut self, group: Group) {
        let count_tag = group.count_tag;
        let instances = self.groups.entry(count_tag).or_default();
        instances.push(group);
        let count = instances.len() as u64;
        self.set_uint(count_tag, count);
    }

    /// Returns the instances of a repeating group.
    #[must_use]
    pub fn groups(&self, count_tag: u32) -> &[Group] {
        self.groups.get(&count_tag).map_or(&[], Vec::as_slice)
    }

    /// Returns one instance of a repeating group (0-based).
    #[must_use]
    pub fn group(&self, count_tag: u32, index: usize) -> Option<&Group> {
        self.groups.get(&count_tag).and_then(|g| g.get(index))
    }

    /// Returns true if the tag counts a repeating group in this map.
    #[must_use]
    pub fn has_groups(&self, count_tag: u32) -> bool {
        self.groups.contains_key(&count_tag)
    }
}

/// One instance of a repeating group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    count_tag: u32,
    delimiter: u32,
    fields: FieldMap,
}

impl Group {
    /// Creates an empty group instance.
    ///
    /// # Arguments
    /// * `count_tag` - The NumInGroup tag that counts instances
    /// * `delimiter` - The tag every instance starts with
    #[must_use]
    pub fn new(count_tag: u32, delimiter: u32) -> Self {
        Self {
            count_tag,
            delimiter,
            fields: FieldMap::new(),
        }
    }

    /// Returns the count tag.
    #[must_use]
    pub const fn count_tag(&self) -> u32 {
        self.count_tag
    }

    /// Returns the delimiter tag.
    #[must_use]
    pub const fn delimiter(&self) -> u32 {
        self.delimiter
    }

    /// Returns the fields of this instance.
    #[must_use]
    pub const fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Returns the fields of this instance mutably.
    pub fn fields_mut(&mut self) -> &mut FieldMap {
        &mut self.fields
    }

    /// Sets a field and returns the group, for literal construction.
    #[must_use]
    pub fn with_field(mut self, tag: u32, value: impl Into<String>) -> Self {
        self.fields.set_field(tag, value);
        self
    }

    /// Adds a nested group instance and returns the group.
    #[must_use]
    pub fn with_group(mut self, group: Group) -> Self {
        self.fields.add_group(group);
        self
    }
}

/// A FIX message: header, body and trailer.
///
/// BodyLength (9) and CheckSum (10) are never stored by the decoder; the
/// encoder computes them on every serialization.
///
/// Equality follows the wire layout: two messages are equal when they
/// serialize to the same fields in the same order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    header: FieldMap,
    body: FieldMap,
    trailer: FieldMap,
}

impl Message {
    /// Creates an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a message with MsgType set in the header.
    #[must_use]
    pub fn with_msg_type(msg_type: &MsgType) -> Self {
        let mut message = Self::new();
        message.header.set_field(tags::MSG_TYPE, msg_type.as_str());
        message
    }

    /// Builds a message from its three parts.
    #[must_use]
    pub fn from_parts(header: FieldMap, body: FieldMap, trailer: FieldMap) -> Self {
        Self {
            header,
            body,
            trailer,
        }
    }

    /// Returns the header.
    #[must_use]
    pub const fn header(&self) -> &FieldMap {
        &self.header
    }

    /// Returns the header mutably.
    pub fn header_mut(&mut self) -> &mut FieldMap {
        &mut self.header
    }

    /// Returns the body.
    #[must_use]
    pub const fn body(&self) -> &FieldMap {
        &self.body
    }

    /// Returns the body mutably.
    pub fn body_mut(&mut self) -> &mut FieldMap {
        &mut self.body
    }

    /// Returns the trailer.
    #[must_use]
    pub const fn trailer(&self) -> &FieldMap {
        &self.trailer
    }

    /// Returns the trailer mutably.
    pub fn trailer_mut(&mut self) -> &mut FieldMap {
        &mut self.trailer
    }

    /// Returns the MsgType from the header.
    #[must_use]
    pub fn msg_type(&self) -> Option<MsgType> {
        self.header
            .get_field(tags::MSG_TYPE)
            .and_then(|v| v.parse().ok())
    }

    /// Returns true for session-level messages.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.msg_type().is_some_and(|t| t.is_admin())
    }

    /// Returns MsgSeqNum from the header, if present and numeric.
    #[must_use]
    pub fn seq_num(&self) -> Option<u64> {
        self.header.get(tags::MSG_SEQ_NUM).ok()
    }

    /// Returns true if PossDupFlag is set.
    #[must_use]
    pub fn is_poss_dup(&self) -> bool {
        self.header.flag(tags::POSS_DUP_FLAG)
    }

    /// Returns a body field.
    #[must_use]
    pub fn get_field(&self, tag: u32) -> Option<&str> {
        self.body.get_field(tag)
    }

    /// Sets a body field.
    pub fn set_field(&mut self, tag: u32, value: impl Into<String>) {
        self.body.set_field(tag, value);
    }

    /// Builder-style body field setter.
    #[must_use]
    pub fn with_field(mut self, tag: u32, value: impl Into<String>) -> Self {
        self.body.set_field(tag, value);
        self
    }
}

/// Header tags written first, in this order.
const HEADER_LEAD: [u32; 2] = [tags::BEGIN_STRING, tags::MSG_TYPE];
/// Trailer tags written before any other trailer field.
const TRAILER_LEAD: [u32; 2] = [tags::SIGNATURE_LENGTH, tags::SIGNATURE];

/// Yields fields in the order the encoder writes them.
fn wire_order<'a>(
    map: &'a FieldMap,
    lead: &'a [u32],
    computed: u32,
) -> impl Iterator<Item = &'a Field> {
    lead.iter().filter_map(|tag| map.field(*tag)).chain(
        map.fields
            .iter()
            .filter(move |f| f.tag != computed && !lead.contains(&f.tag)),
    )
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        wire_order(&self.header, &HEADER_LEAD, tags::BODY_LENGTH)
            .eq(wire_order(&other.header, &HEADER_LEAD, tags::BODY_LENGTH))
            && self.header.groups == other.header.groups
            && self.body == other.body
            && wire_order(&self.trailer, &TRAILER_LEAD, tags::CHECKSUM)
                .eq(wire_order(&other.trailer, &TRAILER_LEAD, tags::CHECKSUM))
            && self.trailer.groups == other.trailer.groups
    }
}

impl Eq for Message {}
