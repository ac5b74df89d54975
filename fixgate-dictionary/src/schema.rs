/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Schema definitions for FIX data dictionaries.
//!
//! This module defines the structures that represent a FIX specification:
//! - [`FieldDef`]: Field definitions with tag, name, type and allowed values
//! - [`MessageDef`]: Message layout with components already flattened
//! - [`GroupDef`]: Repeating group layout, possibly nested
//! - [`Dictionary`]: Complete dictionary for one BeginString

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// FIX protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Version {
    /// FIX 4.0
    Fix40,
    /// FIX 4.1
    Fix41,
    /// FIX 4.2
    Fix42,
    /// FIX 4.3
    Fix43,
    /// FIX 4.4
    Fix44,
    /// FIX 5.0
    Fix50,
    /// FIX 5.0 SP1
    Fix50Sp1,
    /// FIX 5.0 SP2
    Fix50Sp2,
    /// FIXT 1.1 (transport layer for FIX 5.0+)
    Fixt11,
}

impl Version {
    /// Returns the BeginString value for this version.
    #[must_use]
    pub const fn begin_string(&self) -> &'static str {
        match self {
            Self::Fix40 => "FIX.4.0",
            Self::Fix41 => "FIX.4.1",
            Self::Fix42 => "FIX.4.2",
            Self::Fix43 => "FIX.4.3",
            Self::Fix44 => "FIX.4.4",
            Self::Fix50 | Self::Fix50Sp1 | Self::Fix50Sp2 | Self::Fixt11 => "FIXT.1.1",
        }
    }

    /// Resolves the version from the attributes of a QuickFIX `<fix>` root.
    ///
    /// # Arguments
    /// * `kind` - `FIX` or `FIXT`
    /// * `major` / `minor` / `service_pack` - version numbers
    #[must_use]
    pub fn from_parts(kind: &str, major: u32, minor: u32, service_pack: u32) -> Option<Self> {
        Some(match (kind, major, minor, service_pack) {
            ("FIXT", 1, 1, _) => Self::Fixt11,
            ("FIX", 4, 0, _) => Self::Fix40,
            ("FIX", 4, 1, _) => Self::Fix41,
            ("FIX", 4, 2, _) => Self::Fix42,
            ("FIX", 4, 3, _) => Self::Fix43,
            ("FIX", 4, 4, _) => Self::Fix44,
            ("FIX", 5, 0, 0) => Self::Fix50,
            ("FIX", 5, 0, 1) => Self::Fix50Sp1,
            ("FIX", 5, 0, 2) => Self::Fix50Sp2,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.begin_string())
    }
}

/// FIX field data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// Integer value.
    Int,
    /// Length field (for data fields).
    Length,
    /// Sequence number.
    SeqNum,
    /// Number of entries in a repeating group.
    NumInGroup,
    /// Floating point number (Price, Qty, Amt...).
    Float,
    /// Single character.
    Char,
    /// Boolean (Y/N).
    Boolean,
    /// String.
    String,
    /// Space-separated multiple values.
    MultipleValue,
    /// UTC timestamp.
    UtcTimestamp,
    /// Raw data (binary).
    Data,
}

impl std::str::FromStr for FieldType {
    type Err = std::convert::Infallible;

    /// Maps a QuickFIX type name to the type the engine distinguishes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_uppercase().as_str() {
            "INT" | "TAGNUM" | "DAYOFMONTH" => Self::Int,
            "LENGTH" => Self::Length,
            "SEQNUM" => Self::SeqNum,
            "NUMINGROUP" => Self::NumInGroup,
            "FLOAT" | "QTY" | "QUANTITY" | "PRICE" | "PRICEOFFSET" | "AMT" | "AMOUNT"
            | "PERCENTAGE" => Self::Float,
            "CHAR" => Self::Char,
            "BOOLEAN" => Self::Boolean,
            "MULTIPLEVALUESTRING" | "MULTIPLECHARVALUE" | "MULTIPLESTRINGVALUE" => {
                Self::MultipleValue
            }
            "UTCTIMESTAMP" | "TIME" => Self::UtcTimestamp,
            "DATA" | "XMLDATA" => Self::Data,
            _ => Self::String,
        })
    }
}

/// Definition of a FIX field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field tag number.
    pub tag: u32,
    /// Field name.
    pub name: String,
    /// Field data type.
    pub field_type: FieldType,
    /// Valid values for enumerated fields.
    pub values: Option<HashSet<String>>,
}

impl FieldDef {
    /// Creates a new field definition.
    #[must_use]
    pub fn new(tag: u32, name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            tag,
            name: name.into(),
            field_type,
            values: None,
        }
    }

    /// Restricts the field to an enumerated set of values.
    #[must_use]
    pub fn with_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Returns true if the value is acceptable for this field.
    ///
    /// Multiple-value fields are checked word by word.
    #[must_use]
    pub fn accepts(&self, value: &str) -> bool {
        let Some(values) = &self.values else {
            return true;
        };
        if self.field_type == FieldType::MultipleValue {
            value.split(' ').all(|v| values.contains(v))
        } else {
            values.contains(value)
        }
    }
}

/// Reference to a field within a message or group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    /// Field tag number.
    pub tag: u32,
    /// Whether the field is required.
    pub required: bool,
}

/// Definition of a repeating group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDef {
    /// Tag of the count field (NumInGroup).
    pub count_tag: u32,
    /// Tag of the first field in each group entry (delimiter).
    pub delimiter_tag: u32,
    /// Fields of each entry in declared order, nested count tags included.
    pub fields: Vec<FieldRef>,
    /// Nested groups within this group.
    pub groups: Vec<GroupDef>,
    /// Whether the group is required.
    pub required: bool,
}

impl GroupDef {
    /// Returns the declared position of a tag within an entry.
    #[must_use]
    pub fn position(&self, tag: u32) -> Option<usize> {
        self.fields.iter().position(|f| f.tag == tag)
    }

    /// Returns true if the tag belongs to an entry of this group.
    #[must_use]
    pub fn contains(&self, tag: u32) -> bool {
        self.position(tag).is_some()
    }

    /// Returns the nested group counted by the tag.
    #[must_use]
    pub fn group(&self, count_tag: u32) -> Option<&GroupDef> {
        self.groups.iter().find(|g| g.count_tag == count_tag)
    }
}

/// Message category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageCategory {
    /// Administrative message (session level).
    Admin,
    /// Application message.
    App,
}

/// Definition of a FIX message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDef {
    /// Message type value (tag 35).
    pub msg_type: String,
    /// Message name.
    pub name: String,
    /// Message category (admin or app).
    pub category: MessageCategory,
    /// Body fields with components flattened, group count tags included.
    pub fields: Vec<FieldRef>,
    /// Top-level repeating groups of the body.
    pub groups: Vec<GroupDef>,
}

impl MessageDef {
    /// Returns the group counted by the tag.
    #[must_use]
    pub fn group(&self, count_tag: u32) -> Option<&GroupDef> {
        self.groups.iter().find(|g| g.count_tag == count_tag)
    }

    /// Returns true if the tag is declared in the body.
    #[must_use]
    pub fn has_field(&self, tag: u32) -> bool {
        self.fields.iter().any(|f| f.tag == tag)
    }

    /// Returns the required body tags.
    pub fn required_fields(&self) -> impl Iterator<Item = u32> + '_ {
        self.fields.iter().filter(|f| f.required).map(|f| f.tag)
    }
}

/// Complete FIX dictionary for a specific version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dictionary {
    /// FIX version.
    pub version: Version,
    /// Field definitions indexed by tag.
    pub fields: HashMap<u32, FieldDef>,
    /// Field tags indexed by name.
    pub fields_by_name: HashMap<String, u32>,
    /// Message definitions indexed by msg_type.
    pub messages: HashMap<String, MessageDef>,
    /// Header fields.
    pub header: Vec<FieldRef>,
    /// Header repeating groups.
    pub header_groups: Vec<GroupDef>,
    /// Trailer fields.
    pub trailer: Vec<FieldRef>,
}

impl Dictionary {
    /// Creates a new empty dictionary for the specified version.
    #[must_use]
    pub fn new(version: Version) -> Self {
        Self {
            version,
            fields: HashMap::new(),
            fields_by_name: HashMap::new(),
            messages: HashMap::new(),
            header: Vec::new(),
            header_groups: Vec::new(),
            trailer: Vec::new(),
        }
    }

    /// Adds a field definition.
    pub fn add_field(&mut self, field: FieldDef) {
        self.fields_by_name.insert(field.name.clone(), field.tag);
        self.fields.insert(field.tag, field);
    }

    /// Adds a message definition.
    pub fn add_message(&mut self, message: MessageDef) {
        self.messages.insert(message.msg_type.clone(), message);
    }

    /// Gets a field definition by tag.
    #[must_use]
    pub fn get_field(&self, tag: u32) -> Option<&FieldDef> {
        self.fields.get(&tag)
    }

    /// Gets a field tag by name.
    #[must_use]
    pub fn tag_of(&self, name: &str) -> Option<u32> {
        self.fields_by_name.get(name).copied()
    }

    /// Gets a message definition by type.
    #[must_use]
    pub fn get_message(&self, msg_type: &str) -> Option<&MessageDef> {
        self.messages.get(msg_type)
    }

    /// Returns true if the tag is declared in the header.
    #[must_use]
    pub fn is_header_field(&self, tag: u32) -> bool {
        self.header.iter().any(|f| f.tag == tag)
    }

    /// Returns true if the tag is declared in the trailer.
    #[must_use]
    pub fn is_trailer_field(&self, tag: u32) -> bool {
        self.trailer.iter().any(|f| f.tag == tag)
    }

    /// Returns the header group counted by the tag.
    #[must_use]
    pub fn header_group(&self, count_tag: u32) -> Option<&GroupDef> {
        self.header_groups.iter().find(|g| g.count_tag == count_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_begin_string() {
        assert_eq!(Version::Fix42.begin_string(), "FIX.4.2");
        assert_eq!(Version::Fix44.begin_string(), "FIX.4.4");
        assert_eq!(Version::Fix50Sp2.begin_string(), "FIXT.1.1");
    }

    #[test]
    fn test_version_from_parts() {
        assert_eq!(Version::from_parts("FIX", 4, 2, 0), Some(Version::Fix42));
        assert_eq!(Version::from_parts("FIX", 5, 0, 2), Some(Version::Fix50Sp2));
        assert_eq!(Version::from_parts("FIXT", 1, 1, 0), Some(Version::Fixt11));
        assert_eq!(Version::from_parts("FIX", 3, 9, 0), None);
    }

    #[test]
    fn test_field_type_from_str() {
        assert_eq!("INT".parse::<FieldType>().unwrap(), FieldType::Int);
        assert_eq!("PRICE".parse::<FieldType>().unwrap(), FieldType::Float);
        assert_eq!(
            "MULTIPLEVALUESTRING".parse::<FieldType>().unwrap(),
            FieldType::MultipleValue
        );
        assert_eq!("unknown".parse::<FieldType>().unwrap(), FieldType::String);
    }

    #[test]
    fn test_field_def_accepts() {
        let side = FieldDef::new(54, "Side", FieldType::Char).with_values(["1", "2"]);
        assert!(side.accepts("1"));
        assert!(!side.accepts("9"));

        let inst = FieldDef::new(18, "ExecInst", FieldType::MultipleValue)
            .with_values(["1", "2", "G"]);
        assert!(inst.accepts("1 G"));
        assert!(!inst.accepts("1 Z"));

        let free = FieldDef::new(58, "Text", FieldType::String);
        assert!(free.accepts("anything"));
    }

    #[test]
    fn test_dictionary_field_operations() {
        let mut dict = Dictionary::new(Version::Fix44);
        dict.add_field(FieldDef::new(35, "MsgType", FieldType::String));

        assert!(dict.get_field(35).is_some());
        assert_eq!(dict.tag_of("MsgType"), Some(35));
        assert!(dict.get_field(999).is_none());
    }
}
