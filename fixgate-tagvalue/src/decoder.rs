/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! FIX message decoder.
//!
//! [`Decoder`] tokenizes a buffer into zero-copy [`FieldRef`]s. [`decode`]
//! validates the framing of one complete message and assembles an owned
//! [`Message`], rebuilding repeating groups when a [`Dictionary`] is given.
//! [`peek_header`] is a tolerant scan used for routing.

use crate::checksum::{calculate_checksum, parse_checksum};
use fixgate_core::error::DecodeError;
use fixgate_core::field::{FieldRef, FieldTag, tags};
use fixgate_core::message::{FieldMap, Group, Message};
use fixgate_core::types::Timestamp;
use fixgate_dictionary::{Dictionary, FieldType, GroupDef, MessageDef};
use memchr::memchr;
use smallvec::SmallVec;

/// SOH (Start of Header) delimiter used in FIX messages.
pub const SOH: u8 = 0x01;

/// Equals sign delimiter between tag and value.
pub const EQUALS: u8 = b'=';

/// Standard (length tag, data tag) pairs whose data may contain SOH.
const DATA_FIELDS: [(u32, u32); 16] = [
    (90, 91),
    (93, 89),
    (95, 96),
    (212, 213),
    (348, 349),
    (350, 351),
    (352, 353),
    (354, 355),
    (356, 357),
    (358, 359),
    (360, 361),
    (362, 363),
    (364, 365),
    (445, 446),
    (618, 619),
    (621, 622),
];

/// Returns the data tag whose byte length the given tag carries.
#[inline]
#[must_use]
pub fn data_tag_for(length_tag: u32) -> Option<u32> {
    DATA_FIELDS
        .iter()
        .find(|(len, _)| *len == length_tag)
        .map(|(_, data)| *data)
}

/// Returns true for raw data tags, whose values may contain SOH.
#[inline]
#[must_use]
pub fn is_data_tag(tag: u32) -> bool {
    DATA_FIELDS.iter().any(|(_, data)| *data == tag)
}

/// Validation switches applied by [`decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Compare the declared CheckSum with the computed one.
    pub validate_checksum: bool,
    /// Compare the declared BodyLength with the actual one.
    pub validate_length: bool,
    /// Reject header tags after the body and body tags in the trailer.
    pub validate_order: bool,
    /// Reject fields present without a value.
    pub validate_values_present: bool,
    /// Largest accepted message in bytes, 0 for no limit.
    pub max_message_size: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            validate_checksum: true,
            validate_length: true,
            validate_order: true,
            validate_values_present: true,
            max_message_size: 0,
        }
    }
}

/// Zero-copy FIX field tokenizer.
///
/// Yields fields as references into the input buffer. Values of raw data
/// fields are sliced by the preceding length field, so they may contain SOH.
#[derive(Debug)]
pub struct Decoder<'a> {
    /// Input buffer.
    input: &'a [u8],
    /// Current position in the buffer.
    offset: usize,
    /// Data tag and byte length announced by the last length field.
    pending_data: Option<(u32, usize)>,
}

impl<'a> Decoder<'a> {
    /// Creates a new decoder for the given input buffer.
    #[inline]
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            offset: 0,
            pending_data: None,
        }
    }

    /// Parses the next field from the buffer.
    ///
    /// # Returns
    /// `None` once the buffer is exhausted. After an error the decoder is
    /// exhausted too.
    pub fn next_field(&mut self) -> Option<Result<FieldRef<'a>, DecodeError>> {
        if self.offset >= self.input.len() {
            return None;
        }
        let result = self.scan();
        if result.is_err() {
            self.offset = self.input.len();
        }
        Some(result)
    }

    fn scan(&mut self) -> Result<FieldRef<'a>, DecodeError> {
        let remaining = &self.input[self.offset..];
        let eq_pos = memchr(EQUALS, remaining).ok_or(DecodeError::Incomplete)?;
        let tag_bytes = &remaining[..eq_pos];
        let tag = parse_tag(tag_bytes)
            .ok_or_else(|| DecodeError::InvalidTag(String::from_utf8_lossy(tag_bytes).into()))?;

        let value_start = eq_pos + 1;
        let value_len = match self.pending_data.take() {
            Some((data_tag, len)) if data_tag == tag => {
                if remaining.len() <= value_start + len {
                    return Err(DecodeError::Incomplete);
                }
                if remaining[value_start + len] != SOH {
                    return Err(DecodeError::InvalidFieldValue {
                        tag,
                        reason: format!("data is not {len} bytes long"),
                    });
                }
                len
            }
            _ => memchr(SOH, &remaining[value_start..]).ok_or(DecodeError::Incomplete)?,
        };
        let value = &remaining[value_start..value_start + value_len];
        self.offset += value_start + value_len + 1;

        if let Some(data_tag) = data_tag_for(tag) {
            self.pending_data = std::str::from_utf8(value)
                .ok()
                .and_then(|v| v.parse().ok())
                .map(|len| (data_tag, len));
        }
        Ok(FieldRef::new(tag, value))
    }

    /// Returns the current offset in the buffer.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the remaining bytes in the buffer.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.input[self.offset..]
    }

    /// Returns true if the buffer has been fully consumed.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offset >= self.input.len()
    }

    fn expect(&mut self, tag: u32, missing: DecodeError) -> Result<FieldRef<'a>, DecodeError> {
        match self.next_field() {
            Some(Ok(field)) if field.tag == tag => Ok(field),
            Some(Err(err)) => Err(err),
            _ => Err(missing),
        }
    }
}

impl<'a> Iterator for Decoder<'a> {
    type Item = Result<FieldRef<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_field()
    }
}

/// Decodes one complete FIX message.
///
/// # Arguments
/// * `input` - Exactly one framed message, `8=` through the `10=` field
/// * `dictionary` - Enables group reconstruction and field validation
/// * `options` - Validation switches
///
/// # Errors
/// Returns the first `DecodeError` found; nothing is partially decoded.
pub fn decode(
    input: &[u8],
    dictionary: Option<&Dictionary>,
    options: &DecodeOptions,
) -> Result<Message, DecodeError> {
    if options.max_message_size > 0 && input.len() > options.max_message_size {
        return Err(DecodeError::MessageTooLarge {
            size: input.len(),
            max_size: options.max_message_size,
        });
    }

    let mut decoder = Decoder::new(input);
    let begin_string = decoder.expect(tags::BEGIN_STRING, DecodeError::InvalidBeginString)?;
    let begin_string = begin_string.as_str()?;
    if !begin_string.starts_with("FIX") {
        return Err(DecodeError::InvalidBeginString);
    }
    let body_length: usize = decoder
        .expect(tags::BODY_LENGTH, DecodeError::MissingBodyLength)?
        .as_str()
        .ok()
        .and_then(|v| v.parse().ok())
        .ok_or(DecodeError::InvalidBodyLength)?;
    let body_start = decoder.offset();
    let msg_type = decoder
        .expect(tags::MSG_TYPE, DecodeError::MissingMsgType)?
        .as_str()?;
    if msg_type.is_empty() {
        return Err(DecodeError::MissingMsgType);
    }

    let mut fields: SmallVec<[FieldRef<'_>; 32]> = SmallVec::new();
    let (checksum_start, checksum) = loop {
        let start = decoder.offset();
        match decoder.next_field() {
            Some(Ok(field)) if field.tag == tags::CHECKSUM => break (start, field),
            Some(Ok(field)) => fields.push(field),
            Some(Err(err)) => return Err(err),
            None => return Err(DecodeError::MissingChecksum),
        }
    };
    if !decoder.is_empty() {
        return Err(DecodeError::MissingChecksum);
    }

    let actual = checksum_start - body_start;
    if options.validate_length && actual != body_length {
        return Err(DecodeError::BodyLengthMismatch {
            declared: body_length,
            actual,
        });
    }
    let declared = parse_checksum(checksum.value).ok_or(DecodeError::MissingChecksum)?;
    let calculated = calculate_checksum(&input[..checksum_start]);
    if options.validate_checksum && calculated != declared {
        return Err(DecodeError::ChecksumMismatch {
            calculated,
            declared,
        });
    }

    let message_def = match dictionary {
        Some(dict) => Some(
            dict.get_message(msg_type)
                .ok_or_else(|| DecodeError::InvalidMsgType(msg_type.to_string()))?,
        ),
        None => None,
    };

    let assembler = Assembler {
        dictionary,
        message_def,
        options,
    };
    let mut header = FieldMap::new();
    header.set_field(tags::BEGIN_STRING, begin_string);
    header.set_field(tags::MSG_TYPE, msg_type);
    let mut body = FieldMap::new();
    let mut trailer = FieldMap::new();

    let mut section = Section::Header;
    let mut i = 0;
    while i < fields.len() {
        let tag = fields[i].tag;
        i = match assembler.section_of(tag) {
            Section::Header => {
                if section != Section::Header && options.validate_order {
                    return Err(DecodeError::TagOutOfOrder { tag });
                }
                let group = dictionary.and_then(|d| d.header_group(tag));
                assembler.place(&fields, i, &mut header, group)?
            }
            Section::Body => {
                if section == Section::Trailer && options.validate_order {
                    return Err(DecodeError::TagOutOfOrder { tag });
                }
                section = Section::Body;
                assembler.check_defined(tag)?;
                let group = message_def.and_then(|m| m.group(tag));
                assembler.place(&fields, i, &mut body, group)?
            }
            Section::Trailer => {
                section = Section::Trailer;
                assembler.place(&fields, i, &mut trailer, None)?
            }
        };
    }

    assembler.check_required(&header, &body)?;
    Ok(Message::from_parts(header, body, trailer))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Body,
    Trailer,
}

struct Assembler<'d, 'o> {
    dictionary: Option<&'d Dictionary>,
    message_def: Option<&'d MessageDef>,
    options: &'o DecodeOptions,
}

impl Assembler<'_, '_> {
    fn section_of(&self, tag: u32) -> Section {
        match self.dictionary {
            Some(dict) if dict.is_header_field(tag) => Section::Header,
            Some(dict) if dict.is_trailer_field(tag) => Section::Trailer,
            Some(_) => Section::Body,
            None if FieldTag::new(tag).is_standard_header() => Section::Header,
            None if FieldTag::new(tag).is_standard_trailer() => Section::Trailer,
            None => Section::Body,
        }
    }

    /// Validates one value and appends it, consuming its group when the tag
    /// counts one. Returns the index of the next unconsumed field.
    fn place(
        &self,
        fields: &[FieldRef<'_>],
        index: usize,
        map: &mut FieldMap,
        group: Option<&GroupDef>,
    ) -> Result<usize, DecodeError> {
        let field = &fields[index];
        let value = self.value_of(field)?;
        if self.dictionary.is_some() && map.has_field(field.tag) {
            return Err(DecodeError::RepeatedTag { tag: field.tag });
        }
        map.append_field(field.tag, value);
        match group {
            Some(def) => {
                let count: u32 = value.parse().map_err(|_| DecodeError::IncorrectDataFormat {
                    tag: field.tag,
                })?;
                self.read_group(fields, index + 1, map, def, count)
            }
            None => Ok(index + 1),
        }
    }

    fn read_group(
        &self,
        fields: &[FieldRef<'_>],
        mut index: usize,
        map: &mut FieldMap,
        def: &GroupDef,
        count: u32,
    ) -> Result<usize, DecodeError> {
        let mut instances = 0u32;
        while index < fields.len() && fields[index].tag == def.delimiter_tag {
            instances += 1;
            let mut group = Group::new(def.count_tag, def.delimiter_tag);
            let mut last_position = None;
            while index < fields.len() {
                let tag = fields[index].tag;
                let Some(position) = def.position(tag) else {
                    break;
                };
                if tag == def.delimiter_tag && !group.fields().is_empty() {
                    break;
                }
                if last_position.is_some_and(|last| position < last) {
                    if group.fields().has_field(tag) {
                        return Err(DecodeError::RepeatedTag { tag });
                    }
                    if self.options.validate_order {
                        return Err(DecodeError::IncorrectMessageStructure {
                            tag,
                            reason: format!("out of order in group {}", def.count_tag),
                        });
                    }
                }
                last_position = Some(position);
                index = self.place(fields, index, group.fields_mut(), def.group(tag))?;
            }
            map.add_group(group);
        }

        if instances < count
            && index < fields.len()
            && def.contains(fields[index].tag)
        {
            return Err(DecodeError::IncorrectMessageStructure {
                tag: fields[index].tag,
                reason: format!(
                    "group {} instance must start with tag {}",
                    def.count_tag, def.delimiter_tag
                ),
            });
        }
        if instances != count {
            return Err(DecodeError::GroupCountMismatch {
                count_tag: def.count_tag,
                expected: count,
                actual: instances,
            });
        }
        Ok(index)
    }

    fn value_of<'v>(&self, field: &FieldRef<'v>) -> Result<&'v str, DecodeError> {
        let value = field.as_str()?;
        if value.is_empty() {
            if self.options.validate_values_present {
                return Err(DecodeError::EmptyValue { tag: field.tag });
            }
            return Ok(value);
        }
        let Some(dict) = self.dictionary else {
            return Ok(value);
        };
        let Some(def) = dict.get_field(field.tag) else {
            if FieldTag::new(field.tag).is_user_defined() {
                return Ok(value);
            }
            return Err(DecodeError::UndefinedTag { tag: field.tag });
        };
        if !has_format(def.field_type, value) {
            return Err(DecodeError::IncorrectDataFormat { tag: field.tag });
        }
        if !def.accepts(value) {
            return Err(DecodeError::InvalidFieldValue {
                tag: field.tag,
                reason: format!("'{value}' is not an allowed value"),
            });
        }
        Ok(value)
    }

    fn check_defined(&self, tag: u32) -> Result<(), DecodeError> {
        let (Some(dict), Some(def)) = (self.dictionary, self.message_def) else {
            return Ok(());
        };
        if FieldTag::new(tag).is_user_defined() {
            Ok(())
        } else if dict.get_field(tag).is_none() {
            Err(DecodeError::UndefinedTag { tag })
        } else if !def.has_field(tag) {
            Err(DecodeError::TagNotDefinedForMessage { tag })
        } else {
            Ok(())
        }
    }

    fn check_required(&self, header: &FieldMap, body: &FieldMap) -> Result<(), DecodeError> {
        let (Some(dict), Some(def)) = (self.dictionary, self.message_def) else {
            return Ok(());
        };
        let header_tags = dict
            .header
            .iter()
            .filter(|f| f.required && f.tag != tags::BODY_LENGTH)
            .map(|f| f.tag);
        for tag in header_tags {
            if !header.has_field(tag) {
                return Err(DecodeError::MissingRequiredField { tag });
            }
        }
        match def.required_fields().find(|tag| !body.has_field(*tag)) {
            Some(tag) => Err(DecodeError::MissingRequiredField { tag }),
            None => Ok(()),
        }
    }
}

fn has_format(field_type: FieldType, value: &str) -> bool {
    match field_type {
        FieldType::Int | FieldType::Length | FieldType::SeqNum | FieldType::NumInGroup => {
            value.parse::<i64>().is_ok()
        }
        FieldType::Float => {
            let digits = value.strip_prefix('-').unwrap_or(value);
            !digits.is_empty()
                && digits.bytes().filter(|&b| b == b'.').count() <= 1
                && digits.bytes().all(|b| b.is_ascii_digit() || b == b'.')
                && digits.bytes().any(|b| b.is_ascii_digit())
        }
        FieldType::Char => value.chars().count() == 1,
        FieldType::Boolean => value == "Y" || value == "N",
        FieldType::UtcTimestamp => Timestamp::parse(value).is_some(),
        FieldType::String | FieldType::MultipleValue | FieldType::Data => true,
    }
}

/// Routing fields found by [`peek_header`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeekedHeader<'a> {
    /// BeginString (8).
    pub begin_string: &'a str,
    /// MsgType (35).
    pub msg_type: Option<&'a str>,
    /// MsgSeqNum (34), when numeric.
    pub seq_num: Option<u64>,
    /// SenderCompID (49).
    pub sender_comp_id: Option<&'a str>,
    /// TargetCompID (56).
    pub target_comp_id: Option<&'a str>,
    /// PossDupFlag (43) set to `Y`.
    pub poss_dup: bool,
}

/// Scans the routing fields of a message without validating it.
///
/// Stops at the first malformed field or at CheckSum.
///
/// # Errors
/// Returns `DecodeError::InvalidBeginString` unless the input starts with a
/// readable `8=` field.
pub fn peek_header(input: &[u8]) -> Result<PeekedHeader<'_>, DecodeError> {
    let mut decoder = Decoder::new(input);
    let begin_string = decoder
        .expect(tags::BEGIN_STRING, DecodeError::InvalidBeginString)?
        .as_str()
        .map_err(|_| DecodeError::InvalidBeginString)?;
    let mut header = PeekedHeader {
        begin_string,
        ..PeekedHeader::default()
    };

    for field in decoder.map_while(Result::ok) {
        match field.tag {
            tags::MSG_TYPE => header.msg_type = field.as_str().ok(),
            tags::MSG_SEQ_NUM => header.seq_num = field.as_u64().ok(),
            tags::SENDER_COMP_ID => header.sender_comp_id = field.as_str().ok(),
            tags::TARGET_COMP_ID => header.target_comp_id = field.as_str().ok(),
            tags::POSS_DUP_FLAG => header.poss_dup = field.value == b"Y",
            tags::CHECKSUM => break,
            _ => {}
        }
    }
    Ok(header)
}

/// Parses a tag number from ASCII bytes.
#[inline]
fn parse_tag(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() || bytes.len() > 10 || bytes[0] == b'0' {
        return None;
    }

    let mut result: u32 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        result = result.checked_mul(10)?.checked_add(u32::from(b - b'0'))?;
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{Encoder, encode};
    use fixgate_core::message::MsgType;
    use fixgate_dictionary::{FieldDef, FieldRef as DictFieldRef, MessageCategory, Version};

    fn frame(begin_string: &str, body: &str) -> Vec<u8> {
        let mut encoder = Encoder::new(begin_string);
        for pair in body.split('|').filter(|p| !p.is_empty()) {
            let (tag, value) = pair.split_once('=').unwrap();
            encoder.put_str(tag.parse().unwrap(), value);
        }
        encoder.finish().to_vec()
    }

    fn req(tag: u32, required: bool) -> DictFieldRef {
        DictFieldRef { tag, required }
    }

    fn market_data_dictionary() -> Dictionary {
        let mut dict = Dictionary::new(Version::Fix44);
        for (tag, name, ty) in [
            (8, "BeginString", FieldType::String),
            (9, "BodyLength", FieldType::Length),
            (10, "CheckSum", FieldType::String),
            (34, "MsgSeqNum", FieldType::SeqNum),
            (35, "MsgType", FieldType::String),
            (49, "SenderCompID", FieldType::String),
            (52, "SendingTime", FieldType::UtcTimestamp),
            (55, "Symbol", FieldType::String),
            (56, "TargetCompID", FieldType::String),
            (58, "Text", FieldType::String),
            (268, "NoMDEntries", FieldType::NumInGroup),
            (270, "MDEntryPx", FieldType::Float),
            (448, "PartyID", FieldType::String),
            (452, "PartyRole", FieldType::Int),
            (453, "NoPartyIDs", FieldType::NumInGroup),
        ] {
            dict.add_field(FieldDef::new(tag, name, ty));
        }
        dict.add_field(
            FieldDef::new(269, "MDEntryType", FieldType::Char).with_values(["0", "1", "2"]),
        );
        dict.header = vec![
            req(8, true),
            req(9, true),
            req(35, true),
            req(49, true),
            req(56, true),
            req(34, true),
            req(52, true),
        ];
        dict.trailer = vec![req(10, true)];

        let parties = GroupDef {
            count_tag: 453,
            delimiter_tag: 448,
            fields: vec![req(448, false), req(452, false)],
            groups: Vec::new(),
            required: false,
        };
        let entries = GroupDef {
            count_tag: 268,
            delimiter_tag: 269,
            fields: vec![req(269, true), req(270, false), req(453, false)],
            groups: vec![parties],
            required: true,
        };
        dict.add_message(MessageDef {
            msg_type: "W".to_string(),
            name: "MarketDataSnapshotFullRefresh".to_string(),
            category: MessageCategory::App,
            fields: vec![req(55, true), req(268, true), req(58, false)],
            groups: vec![entries],
        });
        dict
    }

    const MD_HEADER: &str = "35=W|49=BANK|56=CLIENT|34=7|52=20240102-10:11:12.123|";

    #[test]
    fn test_next_field() {
        let mut decoder = Decoder::new(b"8=FIX.4.4\x019=5\x0135=0\x01");

        let field = decoder.next_field().unwrap().unwrap();
        assert_eq!((field.tag, field.as_str().unwrap()), (8, "FIX.4.4"));
        let field = decoder.next_field().unwrap().unwrap();
        assert_eq!((field.tag, field.as_str().unwrap()), (9, "5"));
        let field = decoder.next_field().unwrap().unwrap();
        assert_eq!((field.tag, field.as_str().unwrap()), (35, "0"));
        assert!(decoder.next_field().is_none());
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_next_field_errors() {
        let mut decoder = Decoder::new(b"8=FIX.4.4");
        assert_eq!(decoder.next_field(), Some(Err(DecodeError::Incomplete)));
        assert!(decoder.next_field().is_none());

        let mut decoder = Decoder::new(b"x8=FIX\x01");
        assert!(matches!(
            decoder.next_field(),
            Some(Err(DecodeError::InvalidTag(_)))
        ));
    }

    #[test]
    fn test_data_field_may_contain_soh() {
        let mut decoder = Decoder::new(b"95=3\x0196=a\x01b\x0158=x\x01");
        assert_eq!(decoder.next_field().unwrap().unwrap().tag, 95);
        let raw = decoder.next_field().unwrap().unwrap();
        assert_eq!((raw.tag, raw.value), (96, &b"a\x01b"[..]));
        assert_eq!(decoder.next_field().unwrap().unwrap().tag, 58);
    }

    #[test]
    fn test_parse_tag() {
        assert_eq!(parse_tag(b"8"), Some(8));
        assert_eq!(parse_tag(b"12345"), Some(12345));
        assert_eq!(parse_tag(b""), None);
        assert_eq!(parse_tag(b"012"), None);
        assert_eq!(parse_tag(b"12a"), None);
    }

    #[test]
    fn test_decode_heartbeat() {
        let bytes = frame("FIX.4.2", "35=0|49=A|56=B|34=2|52=20240102-10:11:12|112=T1|");
        let message = decode(&bytes, None, &DecodeOptions::default()).unwrap();

        assert_eq!(message.msg_type(), Some(MsgType::Heartbeat));
        assert_eq!(message.seq_num(), Some(2));
        assert_eq!(message.header().get_field(49), Some("A"));
        assert_eq!(message.get_field(112), Some("T1"));
        assert!(!message.header().has_field(9));
        assert!(!message.trailer().has_field(10));
    }

    #[test]
    fn test_decode_round_trip_without_dictionary() {
        let mut message = Message::with_msg_type(&MsgType::NewOrderSingle);
        message.header_mut().set_field(8, "FIX.4.4");
        message.header_mut().set_field(49, "CLIENT");
        message.header_mut().set_uint(34, 5);
        message.set_field(11, "ORD1");
        message.set_field(55, "IBM");
        message.trailer_mut().set_field(93, "3");
        message.trailer_mut().set_field(89, "s\x01g");

        let bytes = encode(&message).unwrap();
        let decoded = decode(&bytes, None, &DecodeOptions::default()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_decode_round_trip_nested_groups() {
        let dict = market_data_dictionary();
        let mut message = Message::with_msg_type(&MsgType::App("W".into()));
        for (tag, value) in [
            (8, "FIX.4.4"),
            (49, "BANK"),
            (56, "CLIENT"),
            (34, "7"),
            (52, "20240102-10:11:12.123"),
        ] {
            message.header_mut().set_field(tag, value);
        }
        message.set_field(55, "EUR/USD");
        message.body_mut().add_group(
            Group::new(268, 269)
                .with_field(269, "0")
                .with_field(270, "1.0842")
                .with_group(
                    Group::new(453, 448)
                        .with_field(448, "DESK1")
                        .with_field(452, "1"),
                )
                .with_group(Group::new(453, 448).with_field(448, "DESK2")),
        );
        message
            .body_mut()
            .add_group(Group::new(268, 269).with_field(269, "1"));
        message.set_field(58, "snapshot");

        let bytes = encode(&message).unwrap();
        let decoded = decode(&bytes, Some(&dict), &DecodeOptions::default()).unwrap();
        assert_eq!(decoded, message);

        let first = decoded.body().group(268, 0).unwrap();
        assert_eq!(first.fields().groups(453).len(), 2);
        assert_eq!(
            first.fields().group(453, 1).unwrap().fields().get_field(448),
            Some("DESK2")
        );
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let mut bytes = frame("FIX.4.4", "35=0|");
        let n = bytes.len();
        bytes[n - 2] = if bytes[n - 2] == b'9' { b'0' } else { bytes[n - 2] + 1 };

        let err = decode(&bytes, None, &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, DecodeError::ChecksumMismatch { .. }));
        assert!(err.is_garbled());

        let lenient = DecodeOptions {
            validate_checksum: false,
            ..DecodeOptions::default()
        };
        assert!(decode(&bytes, None, &lenient).is_ok());
    }

    #[test]
    fn test_decode_rejects_body_length_mismatch() {
        let good = frame("FIX.4.4", "35=0|");
        let text = String::from_utf8(good).unwrap().replace("9=5", "9=6");
        let checksum_at = text.len() - 7;
        let sum = calculate_checksum(&text.as_bytes()[..checksum_at]);
        let bytes = format!("{}10={:03}\x01", &text[..checksum_at], sum);

        assert_eq!(
            decode(bytes.as_bytes(), None, &DecodeOptions::default()),
            Err(DecodeError::BodyLengthMismatch {
                declared: 6,
                actual: 5
            })
        );
    }

    #[test]
    fn test_decode_requires_header_prefix() {
        let opts = DecodeOptions::default();
        assert_eq!(
            decode(b"9=5\x0135=0\x0110=000\x01", None, &opts),
            Err(DecodeError::InvalidBeginString)
        );
        assert_eq!(
            decode(b"8=FIX.4.4\x0135=0\x0110=000\x01", None, &opts),
            Err(DecodeError::MissingBodyLength)
        );
        assert_eq!(
            decode(b"8=FIX.4.4\x019=5\x0149=A\x0110=000\x01", None, &opts),
            Err(DecodeError::MissingMsgType)
        );
        assert_eq!(
            decode(b"8=FIX.4.4\x019=5\x0135=0\x01", None, &opts),
            Err(DecodeError::MissingChecksum)
        );
    }

    #[test]
    fn test_decode_field_order() {
        let bytes = frame("FIX.4.4", "35=D|11=ORD1|49=LATE|");
        assert_eq!(
            decode(&bytes, None, &DecodeOptions::default()),
            Err(DecodeError::TagOutOfOrder { tag: 49 })
        );

        let lenient = DecodeOptions {
            validate_order: false,
            ..DecodeOptions::default()
        };
        let message = decode(&bytes, None, &lenient).unwrap();
        assert_eq!(message.header().get_field(49), Some("LATE"));
    }

    #[test]
    fn test_decode_empty_value() {
        let bytes = frame("FIX.4.4", "35=D|58=|");
        assert_eq!(
            decode(&bytes, None, &DecodeOptions::default()),
            Err(DecodeError::EmptyValue { tag: 58 })
        );
    }

    #[test]
    fn test_decode_message_too_large() {
        let bytes = frame("FIX.4.4", "35=0|");
        let opts = DecodeOptions {
            max_message_size: 10,
            ..DecodeOptions::default()
        };
        assert!(matches!(
            decode(&bytes, None, &opts),
            Err(DecodeError::MessageTooLarge { max_size: 10, .. })
        ));
    }

    #[test]
    fn test_dictionary_group_count_mismatch() {
        let dict = market_data_dictionary();
        let body = format!("{MD_HEADER}55=X|268=2|269=0|270=1.5|");
        assert_eq!(
            decode(&frame("FIX.4.4", &body), Some(&dict), &DecodeOptions::default()),
            Err(DecodeError::GroupCountMismatch {
                count_tag: 268,
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_dictionary_group_without_delimiter() {
        let dict = market_data_dictionary();
        let body = format!("{MD_HEADER}55=X|268=1|270=1.5|269=0|");
        assert!(matches!(
            decode(&frame("FIX.4.4", &body), Some(&dict), &DecodeOptions::default()),
            Err(DecodeError::IncorrectMessageStructure { tag: 270, .. })
        ));
    }

    #[test]
    fn test_dictionary_repeated_tag() {
        let dict = market_data_dictionary();
        let body = format!("{MD_HEADER}55=X|268=0|55=Y|");
        assert_eq!(
            decode(&frame("FIX.4.4", &body), Some(&dict), &DecodeOptions::default()),
            Err(DecodeError::RepeatedTag { tag: 55 })
        );
    }

    #[test]
    fn test_dictionary_value_checks() {
        let dict = market_data_dictionary();
        let opts = DecodeOptions::default();

        let body = format!("{MD_HEADER}55=X|268=1|269=9|");
        assert!(matches!(
            decode(&frame("FIX.4.4", &body), Some(&dict), &opts),
            Err(DecodeError::InvalidFieldValue { tag: 269, .. })
        ));

        let body = format!("{MD_HEADER}55=X|268=1|269=0|270=abc|");
        assert_eq!(
            decode(&frame("FIX.4.4", &body), Some(&dict), &opts),
            Err(DecodeError::IncorrectDataFormat { tag: 270 })
        );

        let body = format!("{MD_HEADER}55=X|268=0|4999=1|");
        assert_eq!(
            decode(&frame("FIX.4.4", &body), Some(&dict), &opts),
            Err(DecodeError::UndefinedTag { tag: 4999 })
        );

        let body = format!("{MD_HEADER}55=X|268=0|5001=custom|");
        assert!(decode(&frame("FIX.4.4", &body), Some(&dict), &opts).is_ok());
    }

    #[test]
    fn test_dictionary_required_and_defined() {
        let dict = market_data_dictionary();
        let opts = DecodeOptions::default();

        let body = format!("{MD_HEADER}268=0|");
        assert_eq!(
            decode(&frame("FIX.4.4", &body), Some(&dict), &opts),
            Err(DecodeError::MissingRequiredField { tag: 55 })
        );

        let body = format!("{MD_HEADER}55=X|268=0|452=1|");
        assert_eq!(
            decode(&frame("FIX.4.4", &body), Some(&dict), &opts),
            Err(DecodeError::TagNotDefinedForMessage { tag: 452 })
        );

        let body = "35=ZZ|49=BANK|56=CLIENT|34=7|52=20240102-10:11:12|";
        assert_eq!(
            decode(&frame("FIX.4.4", body), Some(&dict), &opts),
            Err(DecodeError::InvalidMsgType("ZZ".to_string()))
        );
    }

    #[test]
    fn test_peek_header() {
        let bytes = frame("FIX.4.2", "35=A|49=CLIENT|56=EXEC|34=1|43=Y|52=20240102-10:11:12|");
        let header = peek_header(&bytes).unwrap();
        assert_eq!(header.begin_string, "FIX.4.2");
        assert_eq!(header.msg_type, Some("A"));
        assert_eq!(header.seq_num, Some(1));
        assert_eq!(header.sender_comp_id, Some("CLIENT"));
        assert_eq!(header.target_comp_id, Some("EXEC"));
        assert!(header.poss_dup);

        assert_eq!(
            peek_header(b"35=A\x01"),
            Err(DecodeError::InvalidBeginString)
        );
    }

    #[test]
    fn test_peek_header_tolerates_garbage() {
        let header = peek_header(b"8=FIX.4.4\x0135=D\x0149=X\x01??\x01").unwrap();
        assert_eq!(header.msg_type, Some("D"));
        assert_eq!(header.sender_comp_id, Some("X"));
        assert_eq!(header.target_comp_id, None);
    }
}
