/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! QuickFIX XML data dictionary loader.
//!
//! Components are expanded in place while loading, so every message and
//! group definition carries its complete ordered field list.

use crate::schema::{
    Dictionary, FieldDef, FieldRef, FieldType, GroupDef, MessageCategory, MessageDef, Version,
};
use roxmltree::{Document, Node};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Maximum component nesting depth accepted while expanding.
const MAX_COMPONENT_DEPTH: usize = 32;

/// Errors raised while loading a dictionary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DictionaryError {
    /// The document is not well-formed XML.
    #[error("xml error: {0}")]
    Xml(String),

    /// An element lacks a mandatory attribute.
    #[error("<{element}> is missing attribute '{attribute}'")]
    MissingAttribute {
        /// Element tag name.
        element: String,
        /// Missing attribute name.
        attribute: String,
    },

    /// A numeric attribute could not be parsed.
    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    /// The `<fix>` root describes an unsupported version.
    #[error("unsupported version {0}")]
    UnsupportedVersion(String),

    /// A field name is referenced but never defined.
    #[error("unknown field '{0}'")]
    UnknownField(String),

    /// A component name is referenced but never defined.
    #[error("unknown component '{0}'")]
    UnknownComponent(String),

    /// A group has no field to act as delimiter.
    #[error("group '{0}' has no fields")]
    EmptyGroup(String),

    /// Components reference each other too deeply (likely a cycle).
    #[error("component '{0}' nests too deeply")]
    RecursionLimit(String),

    /// The file could not be read.
    #[error("io error: {0}")]
    Io(String),
}

type DResult<T> = Result<T, DictionaryError>;

impl Dictionary {
    /// Loads a dictionary from a QuickFIX XML file.
    ///
    /// # Errors
    /// Returns `DictionaryError` if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> DResult<Self> {
        let xml = std::fs::read_to_string(path.as_ref())
            .map_err(|e| DictionaryError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_xml(&xml)
    }

    /// Parses a dictionary from QuickFIX XML text.
    ///
    /// # Errors
    /// Returns `DictionaryError` on malformed XML or dangling references.
    pub fn from_xml(xml: &str) -> DResult<Self> {
        let doc = Document::parse(xml).map_err(|e| DictionaryError::Xml(e.to_string()))?;
        let root = doc.root_element();

        let kind = attribute(&root, "type")?;
        let major = number(attribute(&root, "major")?)?;
        let minor = number(attribute(&root, "minor")?)?;
        let service_pack = match root.attribute("servicepack") {
            Some(sp) => number(sp)?,
            None => 0,
        };
        let version = Version::from_parts(kind, major, minor, service_pack).ok_or_else(|| {
            DictionaryError::UnsupportedVersion(format!("{kind}.{major}.{minor} SP{service_pack}"))
        })?;

        let mut dict = Dictionary::new(version);
        if let Some(fields) = child(&root, "fields") {
            for node in elements(&fields).filter(|n| n.has_tag_name("field")) {
                dict.add_field(field_def(&node)?);
            }
        }

        let components: HashMap<&str, Node> = match child(&root, "components") {
            Some(section) => elements(&section)
                .filter(|n| n.has_tag_name("component"))
                .map(|n| attribute(&n, "name").map(|name| (name, n)))
                .collect::<DResult<_>>()?,
            None => HashMap::new(),
        };
        let expander = Expander {
            dict: &dict,
            components: &components,
        };

        let mut header = Layout::default();
        if let Some(node) = child(&root, "header") {
            expander.expand(&node, true, 0, &mut header)?;
        }
        let mut trailer = Layout::default();
        if let Some(node) = child(&root, "trailer") {
            expander.expand(&node, true, 0, &mut trailer)?;
        }

        let mut messages = Vec::new();
        if let Some(section) = child(&root, "messages") {
            for node in elements(&section).filter(|n| n.has_tag_name("message")) {
                let mut layout = Layout::default();
                expander.expand(&node, true, 0, &mut layout)?;
                let category = match node.attribute("msgcat") {
                    Some("admin") => MessageCategory::Admin,
                    _ => MessageCategory::App,
                };
                messages.push(MessageDef {
                    msg_type: attribute(&node, "msgtype")?.to_string(),
                    name: attribute(&node, "name")?.to_string(),
                    category,
                    fields: layout.fields,
                    groups: layout.groups,
                });
            }
        }

        dict.header = header.fields;
        dict.header_groups = header.groups;
        dict.trailer = trailer.fields;
        for message in messages {
            dict.add_message(message);
        }
        Ok(dict)
    }
}

#[derive(Default)]
struct Layout {
    fields: Vec<FieldRef>,
    groups: Vec<GroupDef>,
}

struct Expander<'d, 'a, 'i> {
    dict: &'d Dictionary,
    components: &'d HashMap<&'a str, Node<'a, 'i>>,
}

impl Expander<'_, '_, '_> {
    fn expand(&self, node: &Node, required: bool, depth: usize, out: &mut Layout) -> DResult<()> {
        for item in elements(node) {
            let name = attribute(&item, "name")?;
            let item_required = required && item.attribute("required") == Some("Y");
            match item.tag_name().name() {
                "field" => out.fields.push(FieldRef {
                    tag: self.tag(name)?,
                    required: item_required,
                }),
                "group" => {
                    let count_tag = self.tag(name)?;
                    let mut inner = Layout::default();
                    self.expand(&item, true, depth, &mut inner)?;
                    let delimiter_tag = inner
                        .fields
                        .first()
                        .map(|f| f.tag)
                        .ok_or_else(|| DictionaryError::EmptyGroup(name.to_string()))?;
                    out.fields.push(FieldRef {
                        tag: count_tag,
                        required: item_required,
                    });
                    out.groups.push(GroupDef {
                        count_tag,
                        delimiter_tag,
                        fields: inner.fields,
                        groups: inner.groups,
                        required: item_required,
                    });
                }
                "component" => {
                    if depth >= MAX_COMPONENT_DEPTH {
                        return Err(DictionaryError::RecursionLimit(name.to_string()));
                    }
                    let component = self
                        .components
                        .get(name)
                        .ok_or_else(|| DictionaryError::UnknownComponent(name.to_string()))?;
                    self.expand(component, item_required, depth + 1, out)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn tag(&self, name: &str) -> DResult<u32> {
        self.dict
            .tag_of(name)
            .ok_or_else(|| DictionaryError::UnknownField(name.to_string()))
    }
}

fn field_def(node: &Node) -> DResult<FieldDef> {
    let tag = number(attribute(node, "number")?)?;
    let name = attribute(node, "name")?;
    let field_type: FieldType = attribute(node, "type")?
        .parse()
        .unwrap_or(FieldType::String);
    let values: Vec<&str> = elements(node)
        .filter(|n| n.has_tag_name("value"))
        .map(|n| attribute(&n, "enum"))
        .collect::<DResult<_>>()?;

    let def = FieldDef::new(tag, name, field_type);
    Ok(if values.is_empty() {
        def
    } else {
        def.with_values(values)
    })
}

fn elements<'a, 'i>(node: &Node<'a, 'i>) -> impl Iterator<Item = Node<'a, 'i>> {
    node.children().filter(Node::is_element)
}

fn child<'a, 'i>(node: &Node<'a, 'i>, name: &str) -> Option<Node<'a, 'i>> {
    elements(node).find(|n| n.has_tag_name(name))
}

fn attribute<'a>(node: &Node<'a, '_>, name: &str) -> DResult<&'a str> {
    node.attribute(name)
        .ok_or_else(|| DictionaryError::MissingAttribute {
            element: node.tag_name().name().to_string(),
            attribute: name.to_string(),
        })
}

fn number(value: &str) -> DResult<u32> {
    value
        .parse()
        .map_err(|_| DictionaryError::InvalidNumber(value.to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Small FIX.4.4 dictionary with a component and a nested group.
    pub(crate) const SAMPLE: &str = r#"<fix type="FIX" major="4" minor="4" servicepack="0">
  <header>
    <field name="BeginString" required="Y"/>
    <field name="BodyLength" required="Y"/>
    <field name="MsgType" required="Y"/>
    <field name="SenderCompID" required="Y"/>
    <field name="TargetCompID" required="Y"/>
    <field name="MsgSeqNum" required="Y"/>
    <field name="PossDupFlag" required="N"/>
    <field name="SendingTime" required="Y"/>
    <field name="OrigSendingTime" required="N"/>
  </header>
  <trailer>
    <field name="SignatureLength" required="N"/>
    <field name="Signature" required="N"/>
    <field name="CheckSum" required="Y"/>
  </trailer>
  <messages>
    <message name="Heartbeat" msgtype="0" msgcat="admin">
      <field name="TestReqID" required="N"/>
    </message>
    <message name="MarketDataSnapshotFullRefresh" msgtype="W" msgcat="app">
      <component name="Instrument" required="Y"/>
      <group name="NoMDEntries" required="Y">
        <field name="MDEntryType" required="Y"/>
        <field name="MDEntryPx" required="N"/>
        <group name="NoPartyIDs" required="N">
          <field name="PartyID" required="N"/>
          <field name="PartyRole" required="N"/>
        </group>
        <field name="MDEntrySize" required="N"/>
      </group>
      <field name="Text" required="N"/>
    </message>
  </messages>
  <components>
    <component name="Instrument">
      <field name="Symbol" required="Y"/>
      <field name="SecurityID" required="N"/>
    </component>
  </components>
  <fields>
    <field number="8" name="BeginString" type="STRING"/>
    <field number="9" name="BodyLength" type="LENGTH"/>
    <field number="10" name="CheckSum" type="STRING"/>
    <field number="34" name="MsgSeqNum" type="SEQNUM"/>
    <field number="35" name="MsgType" type="STRING"/>
    <field number="43" name="PossDupFlag" type="BOOLEAN"/>
    <field number="48" name="SecurityID" type="STRING"/>
    <field number="49" name="SenderCompID" type="STRING"/>
    <field number="52" name="SendingTime" type="UTCTIMESTAMP"/>
    <field number="55" name="Symbol" type="STRING"/>
    <field number="56" name="TargetCompID" type="STRING"/>
    <field number="58" name="Text" type="STRING"/>
    <field number="89" name="Signature" type="DATA"/>
    <field number="93" name="SignatureLength" type="LENGTH"/>
    <field number="112" name="TestReqID" type="STRING"/>
    <field number="122" name="OrigSendingTime" type="UTCTIMESTAMP"/>
    <field number="268" name="NoMDEntries" type="NUMINGROUP"/>
    <field number="269" name="MDEntryType" type="CHAR">
      <value enum="0" description="BID"/>
      <value enum="1" description="OFFER"/>
      <value enum="2" description="TRADE"/>
    </field>
    <field number="270" name="MDEntryPx" type="PRICE"/>
    <field number="271" name="MDEntrySize" type="QTY"/>
    <field number="448" name="PartyID" type="STRING"/>
    <field number="452" name="PartyRole" type="INT"/>
    <field number="453" name="NoPartyIDs" type="NUMINGROUP"/>
  </fields>
</fix>"#;

    #[test]
    fn test_load_sample() {
        let dict = Dictionary::from_xml(SAMPLE).unwrap();
        assert_eq!(dict.version, Version::Fix44);
        assert_eq!(dict.tag_of("Symbol"), Some(55));
        assert!(dict.is_header_field(49));
        assert!(dict.is_trailer_field(10));
        assert!(!dict.is_header_field(55));
        assert_eq!(
            dict.get_message("0").map(|m| m.category),
            Some(MessageCategory::Admin)
        );
    }

    #[test]
    fn test_components_are_flattened() {
        let dict = Dictionary::from_xml(SAMPLE).unwrap();
        let snapshot = dict.get_message("W").unwrap();
        let tags: Vec<u32> = snapshot.fields.iter().map(|f| f.tag).collect();
        assert_eq!(tags, vec![55, 48, 268, 58]);
        let required: Vec<u32> = snapshot.required_fields().collect();
        assert_eq!(required, vec![55, 268]);
    }

    #[test]
    fn test_nested_groups() {
        let dict = Dictionary::from_xml(SAMPLE).unwrap();
        let entries = dict.get_message("W").and_then(|m| m.group(268)).unwrap();
        assert_eq!(entries.delimiter_tag, 269);
        assert_eq!(entries.position(271), Some(3));

        let parties = entries.group(453).unwrap();
        assert_eq!(parties.delimiter_tag, 448);
        assert!(parties.contains(452));
        assert!(!entries.contains(448));
    }

    #[test]
    fn test_enum_values_loaded() {
        let dict = Dictionary::from_xml(SAMPLE).unwrap();
        let entry_type = dict.get_field(269).unwrap();
        assert!(entry_type.accepts("2"));
        assert!(!entry_type.accepts("7"));
    }

    #[test]
    fn test_unknown_field_reference() {
        let xml = r#"<fix type="FIX" major="4" minor="2">
  <messages><message name="X" msgtype="X" msgcat="app"><field name="Nope" required="N"/></message></messages>
  <fields><field number="8" name="BeginString" type="STRING"/></fields>
</fix>"#;
        assert_eq!(
            Dictionary::from_xml(xml).unwrap_err(),
            DictionaryError::UnknownField("Nope".to_string())
        );
    }

    #[test]
    fn test_malformed_xml() {
        assert!(matches!(
            Dictionary::from_xml("<fix"),
            Err(DictionaryError::Xml(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Dictionary::load("/nonexistent/FIX44.xml"),
            Err(DictionaryError::Io(_))
        ));
    }
}
