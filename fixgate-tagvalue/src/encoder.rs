/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! FIX message encoder.
//!
//! [`Encoder`] appends tag=value fields to a body buffer and frames them with
//! BeginString, BodyLength and CheckSum. [`encode`] serializes a complete
//! [`Message`] on top of it.

use crate::checksum::{calculate_checksum, format_checksum};
use crate::decoder::is_data_tag;
use bytes::{BufMut, BytesMut};
use fixgate_core::error::EncodeError;
use fixgate_core::field::tags;
use fixgate_core::message::{FieldMap, Message};

/// SOH (Start of Header) delimiter used in FIX messages.
pub const SOH: u8 = 0x01;

/// Incremental FIX message builder.
///
/// Fields are appended in call order. BeginString, BodyLength and CheckSum
/// are added by [`Encoder::finish`].
#[derive(Debug, Clone)]
pub struct Encoder {
    /// Fields between BodyLength and CheckSum.
    body: BytesMut,
    /// The BeginString value (e.g., "FIX.4.4").
    begin_string: String,
}

impl Encoder {
    /// Creates a new encoder with the specified BeginString.
    ///
    /// # Arguments
    /// * `begin_string` - The FIX version string (e.g., "FIX.4.4")
    #[must_use]
    pub fn new(begin_string: impl Into<String>) -> Self {
        Self::with_capacity(begin_string, 256)
    }

    /// Creates a new encoder with pre-allocated capacity.
    ///
    /// # Arguments
    /// * `begin_string` - The FIX version string
    /// * `capacity` - Initial buffer capacity in bytes
    #[must_use]
    pub fn with_capacity(begin_string: impl Into<String>, capacity: usize) -> Self {
        Self {
            body: BytesMut::with_capacity(capacity),
            begin_string: begin_string.into(),
        }
    }

    /// Appends a field with a string value.
    #[inline]
    pub fn put_str(&mut self, tag: u32, value: &str) {
        self.put_raw(tag, value.as_bytes());
    }

    /// Appends a field with an integer value.
    #[inline]
    pub fn put_int(&mut self, tag: u32, value: i64) {
        let mut buf = itoa::Buffer::new();
        self.put_raw(tag, buf.format(value).as_bytes());
    }

    /// Appends a field with an unsigned integer value.
    #[inline]
    pub fn put_uint(&mut self, tag: u32, value: u64) {
        let mut buf = itoa::Buffer::new();
        self.put_raw(tag, buf.format(value).as_bytes());
    }

    /// Appends a field with a boolean value (Y/N).
    #[inline]
    pub fn put_bool(&mut self, tag: u32, value: bool) {
        self.put_raw(tag, if value { b"Y" } else { b"N" });
    }

    /// Appends a field with a single character value.
    #[inline]
    pub fn put_char(&mut self, tag: u32, value: char) {
        let mut buf = [0u8; 4];
        self.put_raw(tag, value.encode_utf8(&mut buf).as_bytes());
    }

    /// Appends a field with raw bytes.
    ///
    /// # Arguments
    /// * `tag` - The field tag number
    /// * `value` - The field value bytes, not validated
    #[inline]
    pub fn put_raw(&mut self, tag: u32, value: &[u8]) {
        let mut tag_buf = itoa::Buffer::new();
        self.body.put_slice(tag_buf.format(tag).as_bytes());
        self.body.put_u8(b'=');
        self.body.put_slice(value);
        self.body.put_u8(SOH);
    }

    /// Frames the appended fields into a complete message.
    ///
    /// Prepends `8=` and `9=` and appends `10=` computed over every
    /// preceding byte.
    #[must_use]
    pub fn finish(self) -> BytesMut {
        let mut len_buf = itoa::Buffer::new();
        let body_len = len_buf.format(self.body.len());

        let mut message =
            BytesMut::with_capacity(self.begin_string.len() + body_len.len() + self.body.len() + 16);
        message.put_slice(b"8=");
        message.put_slice(self.begin_string.as_bytes());
        message.put_u8(SOH);
        message.put_slice(b"9=");
        message.put_slice(body_len.as_bytes());
        message.put_u8(SOH);
        message.put_slice(&self.body);

        let checksum = format_checksum(calculate_checksum(&message));
        message.put_slice(b"10=");
        message.put_slice(&checksum);
        message.put_u8(SOH);
        message
    }

    /// Returns the current body length.
    #[inline]
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Clears the encoder for reuse.
    #[inline]
    pub fn clear(&mut self) {
        self.body.clear();
    }

    fn put_checked(&mut self, tag: u32, value: &str) -> Result<(), EncodeError> {
        if !is_data_tag(tag) && value.as_bytes().contains(&SOH) {
            return Err(EncodeError::InvalidFieldValue {
                tag,
                reason: "value contains SOH".to_string(),
            });
        }
        self.put_str(tag, value);
        Ok(())
    }

    fn put_map(&mut self, map: &FieldMap, skip: &[u32]) -> Result<(), EncodeError> {
        for field in map.fields().filter(|f| !skip.contains(&f.tag)) {
            self.put_checked(field.tag, &field.value)?;
            for group in map.groups(field.tag) {
                self.put_map(group.fields(), &[])?;
            }
        }
        Ok(())
    }
}

/// Serializes a message to the wire format.
///
/// Header fields follow `8`, `9` and `35` in insertion order, then the
/// body, then the trailer with `10` always last. Groups are written at the
/// position of their count field.
///
/// # Errors
/// Returns `EncodeError::MissingRequiredField` when BeginString or MsgType
/// is absent, and `EncodeError::InvalidFieldValue` for values containing SOH
/// outside raw data fields.
pub fn encode(message: &Message) -> Result<BytesMut, EncodeError> {
    let header = message.header();
    let begin_string =
        header
            .get_field(tags::BEGIN_STRING)
            .ok_or(EncodeError::MissingRequiredField {
                tag: tags::BEGIN_STRING,
            })?;
    let msg_type = header
        .get_field(tags::MSG_TYPE)
        .ok_or(EncodeError::MissingRequiredField {
            tag: tags::MSG_TYPE,
        })?;

    let mut encoder = Encoder::new(begin_string);
    encoder.put_checked(tags::MSG_TYPE, msg_type)?;
    encoder.put_map(
        header,
        &[tags::BEGIN_STRING, tags::BODY_LENGTH, tags::MSG_TYPE],
    )?;
    encoder.put_map(message.body(), &[])?;

    let trailer = message.trailer();
    for tag in [tags::SIGNATURE_LENGTH, tags::SIGNATURE] {
        if let Some(value) = trailer.get_field(tag) {
            encoder.put_checked(tag, value)?;
        }
    }
    encoder.put_map(
        trailer,
        &[tags::SIGNATURE_LENGTH, tags::SIGNATURE, tags::CHECKSUM],
    )?;
    Ok(encoder.finish())
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new("FIX.4.4")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::parse_checksum;
    use fixgate_core::message::{Group, MsgType};

    fn as_text(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).replace('\x01', "|")
    }

    #[test]
    fn test_encoder_basic() {
        let mut encoder = Encoder::new("FIX.4.4");
        encoder.put_str(35, "0");

        let text = as_text(&encoder.finish());
        assert!(text.starts_with("8=FIX.4.4|9=5|35=0|10="));
    }

    #[test]
    fn test_encoder_typed_fields() {
        let mut encoder = Encoder::new("FIX.4.2");
        encoder.put_uint(34, 12);
        encoder.put_int(5001, -3);
        encoder.put_bool(141, true);
        encoder.put_bool(43, false);
        encoder.put_char(54, '1');

        let text = as_text(&encoder.finish());
        assert!(text.contains("|34=12|5001=-3|141=Y|43=N|54=1|"));
    }

    #[test]
    fn test_encoder_clear() {
        let mut encoder = Encoder::new("FIX.4.4");
        encoder.put_str(35, "0");
        assert!(encoder.body_len() > 0);

        encoder.clear();
        assert_eq!(encoder.body_len(), 0);
    }

    #[test]
    fn test_checksum_covers_preceding_bytes() {
        let mut encoder = Encoder::new("FIX.4.4");
        encoder.put_str(35, "A");
        encoder.put_str(98, "0");
        let bytes = encoder.finish();

        let cut = bytes.len() - 7;
        assert_eq!(&bytes[cut..cut + 3], b"10=");
        assert_eq!(
            parse_checksum(&bytes[cut + 3..cut + 6]),
            Some(calculate_checksum(&bytes[..cut]))
        );
    }

    #[test]
    fn test_encode_orders_sections() {
        let mut message = Message::with_msg_type(&MsgType::NewOrderSingle);
        message.trailer_mut().set_field(tags::SIGNATURE, "sig");
        message.trailer_mut().set_field(tags::SIGNATURE_LENGTH, "3");
        message.set_field(tags::CL_ORD_ID, "ORD1");
        message.header_mut().set_field(tags::SENDER_COMP_ID, "CLIENT");
        message.header_mut().set_field(tags::BEGIN_STRING, "FIX.4.2");

        let text = as_text(&encode(&message).unwrap());
        assert!(
            text.starts_with("8=FIX.4.2|9=35|35=D|49=CLIENT|11=ORD1|93=3|89=sig|10="),
            "{text}"
        );
    }

    #[test]
    fn test_encode_nested_groups_in_place() {
        let mut message = Message::with_msg_type(&MsgType::App("W".into()));
        message.header_mut().set_field(tags::BEGIN_STRING, "FIX.4.4");
        message.set_field(55, "EUR/USD");
        message.body_mut().add_group(
            Group::new(268, 269)
                .with_field(269, "0")
                .with_field(270, "1.1")
                .with_group(Group::new(453, 448).with_field(448, "BANK")),
        );
        message
            .body_mut()
            .add_group(Group::new(268, 269).with_field(269, "1"));
        message.set_field(58, "done");

        let text = as_text(&encode(&message).unwrap());
        assert!(
            text.contains("|55=EUR/USD|268=2|269=0|270=1.1|453=1|448=BANK|269=1|58=done|"),
            "{text}"
        );
    }

    #[test]
    fn test_encode_requires_begin_string_and_msg_type() {
        let message = Message::with_msg_type(&MsgType::Heartbeat);
        assert_eq!(
            encode(&message).unwrap_err(),
            EncodeError::MissingRequiredField { tag: 8 }
        );

        let mut message = Message::new();
        message.header_mut().set_field(tags::BEGIN_STRING, "FIX.4.4");
        assert_eq!(
            encode(&message).unwrap_err(),
            EncodeError::MissingRequiredField { tag: 35 }
        );
    }

    #[test]
    fn test_encode_rejects_soh_in_value() {
        let mut message = Message::with_msg_type(&MsgType::Heartbeat);
        message.header_mut().set_field(tags::BEGIN_STRING, "FIX.4.4");
        message.set_field(tags::TEXT, "a\x01b");
        assert!(matches!(
            encode(&message),
            Err(EncodeError::InvalidFieldValue { tag: 58, .. })
        ));
    }

    #[test]
    fn test_encode_ignores_stored_length_and_checksum() {
        let mut message = Message::with_msg_type(&MsgType::Heartbeat);
        message.header_mut().set_field(tags::BEGIN_STRING, "FIX.4.4");
        message.header_mut().set_field(tags::BODY_LENGTH, "999");
        message.trailer_mut().set_field(tags::CHECKSUM, "000");

        let text = as_text(&encode(&message).unwrap());
        assert!(text.starts_with("8=FIX.4.4|9=5|35=0|10="));
        assert_eq!(text.matches("10=").count(), 1);
    }
}
