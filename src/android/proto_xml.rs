/* aapt2 protobuf XML (Resources.proto `XmlNode`), as found in bundle module manifests */

use crate::android::chunk::{malformed, ResourceError, ResourceResult};
use crate::android::manifest::{XmlAttribute, XmlElement, XmlNode};
use std::collections::BTreeMap;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LENGTH_DELIMITED: u8 = 2;
const WIRE_FIXED32: u8 = 5;

/// Minimal protobuf wire format reader over one message.
pub(crate) struct ProtoReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ProtoReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ProtoReader { data, pos: 0 }
    }

    pub fn read_varint(&mut self) -> ResourceResult<u64> {
        let mut result = 0u64;
        let mut shift = 0;
        loop {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or_else(|| ResourceError::MalformedDocument("Truncated protobuf varint".to_string()))?;
            self.pos += 1;
            if shift >= 64 {
                return malformed("Protobuf varint too long");
            }
            result |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    fn read_slice(&mut self, length: usize) -> ResourceResult<&'a [u8]> {
        let end = self.pos.checked_add(length).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => malformed("Truncated protobuf field"),
        }
    }

    /// Next `(field number, wire type)`, or `None` at the end of the message.
    pub fn next_field(&mut self) -> ResourceResult<Option<(u32, u8)>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let key = self.read_varint()?;
        Ok(Some(((key >> 3) as u32, (key & 0x7) as u8)))
    }

    pub fn read_bytes(&mut self) -> ResourceResult<&'a [u8]> {
        let length = self.read_varint()? as usize;
        self.read_slice(length)
    }

    pub fn read_string(&mut self) -> ResourceResult<String> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|err| ResourceError::MalformedDocument(err.to_string()))
    }

    pub fn read_fixed32(&mut self) -> ResourceResult<u32> {
        let bytes = self.read_slice(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn skip(&mut self, wire_type: u8) -> ResourceResult<()> {
        match wire_type {
            WIRE_VARINT => self.read_varint().map(|_| ()),
            WIRE_FIXED64 => self.read_slice(8).map(|_| ()),
            WIRE_LENGTH_DELIMITED => self.read_bytes().map(|_| ()),
            WIRE_FIXED32 => self.read_slice(4).map(|_| ()),
            other => malformed(format!("Unsupported protobuf wire type {}", other)),
        }
    }
}

/// Decoded `XmlAttribute` before names are qualified.
struct ProtoAttribute {
    namespace_uri: String,
    name: String,
    value: String,
    compiled: Option<String>,
}

struct ProtoElement {
    namespaces: Vec<(String, String)>,
    namespace_uri: String,
    name: String,
    attributes: Vec<ProtoAttribute>,
    children: Vec<ProtoNode>,
}

enum ProtoNode {
    Element(ProtoElement),
    Text(String),
}

fn parse_node(bytes: &[u8]) -> ResourceResult<ProtoNode> {
    let mut reader = ProtoReader::new(bytes);
    let mut node = ProtoNode::Text(String::new());
    while let Some((field, wire_type)) = reader.next_field()? {
        match (field, wire_type) {
            (1, WIRE_LENGTH_DELIMITED) => node = ProtoNode::Element(parse_element(reader.read_bytes()?)?),
            (2, WIRE_LENGTH_DELIMITED) => node = ProtoNode::Text(reader.read_string()?),
            (_, wire_type) => reader.skip(wire_type)?,
        }
    }
    Ok(node)
}

fn parse_element(bytes: &[u8]) -> ResourceResult<ProtoElement> {
    let mut reader = ProtoReader::new(bytes);
    let mut element = ProtoElement {
        namespaces: Vec::new(),
        namespace_uri: String::new(),
        name: String::new(),
        attributes: Vec::new(),
        children: Vec::new(),
    };
    while let Some((field, wire_type)) = reader.next_field()? {
        match (field, wire_type) {
            (1, WIRE_LENGTH_DELIMITED) => element.namespaces.push(parse_namespace(reader.read_bytes()?)?),
            (2, WIRE_LENGTH_DELIMITED) => element.namespace_uri = reader.read_string()?,
            (3, WIRE_LENGTH_DELIMITED) => element.name = reader.read_string()?,
            (4, WIRE_LENGTH_DELIMITED) => element.attributes.push(parse_attribute(reader.read_bytes()?)?),
            (5, WIRE_LENGTH_DELIMITED) => element.children.push(parse_node(reader.read_bytes()?)?),
            (_, wire_type) => reader.skip(wire_type)?,
        }
    }
    Ok(element)
}

fn parse_namespace(bytes: &[u8]) -> ResourceResult<(String, String)> {
    let mut reader = ProtoReader::new(bytes);
    let (mut prefix, mut uri) = (String::new(), String::new());
    while let Some((field, wire_type)) = reader.next_field()? {
        match (field, wire_type) {
            (1, WIRE_LENGTH_DELIMITED) => prefix = reader.read_string()?,
            (2, WIRE_LENGTH_DELIMITED) => uri = reader.read_string()?,
            (_, wire_type) => reader.skip(wire_type)?,
        }
    }
    Ok((prefix, uri))
}

fn parse_attribute(bytes: &[u8]) -> ResourceResult<ProtoAttribute> {
    let mut reader = ProtoReader::new(bytes);
    let mut attribute = ProtoAttribute { namespace_uri: String::new(), name: String::new(), value: String::new(), compiled: None };
    while let Some((field, wire_type)) = reader.next_field()? {
        match (field, wire_type) {
            (1, WIRE_LENGTH_DELIMITED) => attribute.namespace_uri = reader.read_string()?,
            (2, WIRE_LENGTH_DELIMITED) => attribute.name = reader.read_string()?,
            (3, WIRE_LENGTH_DELIMITED) => attribute.value = reader.read_string()?,
            (6, WIRE_LENGTH_DELIMITED) => attribute.compiled = parse_item(reader.read_bytes()?)?,
            (_, wire_type) => reader.skip(wire_type)?,
        }
    }
    Ok(attribute)
}

/// Renders a compiled `Item`. Only references, strings and primitives have a textual form here.
fn parse_item(bytes: &[u8]) -> ResourceResult<Option<String>> {
    let mut reader = ProtoReader::new(bytes);
    let mut rendered = None;
    while let Some((field, wire_type)) = reader.next_field()? {
        match (field, wire_type) {
            (1, WIRE_LENGTH_DELIMITED) => rendered = Some(parse_reference(reader.read_bytes()?)?),
            (2, WIRE_LENGTH_DELIMITED) | (3, WIRE_LENGTH_DELIMITED) => rendered = Some(parse_string_value(reader.read_bytes()?)?),
            (7, WIRE_LENGTH_DELIMITED) => rendered = parse_primitive(reader.read_bytes()?)?,
            (_, wire_type) => reader.skip(wire_type)?,
        }
    }
    Ok(rendered)
}

fn parse_reference(bytes: &[u8]) -> ResourceResult<String> {
    let mut reader = ProtoReader::new(bytes);
    let (mut id, mut name) = (0u32, String::new());
    while let Some((field, wire_type)) = reader.next_field()? {
        match (field, wire_type) {
            (2, WIRE_VARINT) => id = reader.read_varint()? as u32,
            (3, WIRE_LENGTH_DELIMITED) => name = reader.read_string()?,
            (_, wire_type) => reader.skip(wire_type)?,
        }
    }
    if name.is_empty() {
        Ok((id as i32).to_string())
    } else {
        Ok(format!("@{}", name))
    }
}

fn parse_string_value(bytes: &[u8]) -> ResourceResult<String> {
    let mut reader = ProtoReader::new(bytes);
    let mut value = String::new();
    while let Some((field, wire_type)) = reader.next_field()? {
        match (field, wire_type) {
            (1, WIRE_LENGTH_DELIMITED) => value = reader.read_string()?,
            (_, wire_type) => reader.skip(wire_type)?,
        }
    }
    Ok(value)
}

fn parse_primitive(bytes: &[u8]) -> ResourceResult<Option<String>> {
    let mut reader = ProtoReader::new(bytes);
    let mut rendered = None;
    while let Some((field, wire_type)) = reader.next_field()? {
        rendered = match (field, wire_type) {
            (1, WIRE_LENGTH_DELIMITED) => {
                reader.read_bytes()?;
                Some("null".to_string())
            }
            (2, WIRE_LENGTH_DELIMITED) => {
                reader.read_bytes()?;
                Some(String::new())
            }
            (3, WIRE_FIXED32) => Some(f32::from_bits(reader.read_fixed32()?).to_string()),
            (6, WIRE_VARINT) => Some((reader.read_varint()? as i32).to_string()),
            (7, WIRE_VARINT) => Some(format!("0x{:x}", reader.read_varint()? as u32)),
            (8, WIRE_VARINT) => Some((reader.read_varint()? != 0).to_string()),
            (9, WIRE_VARINT) => Some(format!("#{:08x}", reader.read_varint()? as u32)),
            (10, WIRE_VARINT) => Some(format!("#{:06x}", reader.read_varint()? as u32)),
            (11, WIRE_VARINT) => Some(format!("#{:04x}", reader.read_varint()? as u32)),
            (12, WIRE_VARINT) => Some(format!("#{:03x}", reader.read_varint()? as u32)),
            (13, WIRE_VARINT) | (14, WIRE_VARINT) => Some((reader.read_varint()? as u32).to_string()),
            (_, wire_type) => {
                reader.skip(wire_type)?;
                rendered
            }
        };
    }
    Ok(rendered)
}

fn qualify(scopes: &[BTreeMap<String, String>], uri: &str, name: &str) -> String {
    match scopes.iter().rev().find_map(|frame| frame.get(uri)) {
        Some(prefix) if !uri.is_empty() && !prefix.is_empty() => format!("{}:{}", prefix, name),
        _ => name.to_string(),
    }
}

/// `scopes` holds one uri to prefix frame per open element; declarations only reach descendants.
fn convert(element: ProtoElement, scopes: &mut Vec<BTreeMap<String, String>>) -> XmlElement {
    scopes.push(element.namespaces.iter().map(|(prefix, uri)| (uri.clone(), prefix.clone())).collect());
    let optional = |uri: String| if uri.is_empty() { None } else { Some(uri) };

    let name = qualify(scopes, &element.namespace_uri, &element.name);
    let mut converted = XmlElement::new(optional(element.namespace_uri), name);
    for (prefix, uri) in element.namespaces {
        let attribute = if prefix.is_empty() { "xmlns".to_string() } else { format!("xmlns:{}", prefix) };
        converted.attributes.push(XmlAttribute::new(None, attribute, uri));
    }
    for attribute in element.attributes {
        let name = qualify(scopes, &attribute.namespace_uri, &attribute.name);
        let value = match attribute.compiled {
            Some(compiled) if attribute.value.is_empty() => compiled,
            _ => attribute.value,
        };
        converted.attributes.push(XmlAttribute::new(optional(attribute.namespace_uri), name, value));
    }
    for child in element.children {
        match child {
            ProtoNode::Element(child) => converted.children.push(XmlNode::Element(convert(child, scopes))),
            ProtoNode::Text(text) => converted.children.push(XmlNode::Text(text)),
        }
    }
    scopes.pop();
    converted
}

/// Decodes a serialized `XmlNode` whose root is an element.
pub fn decode(bytes: &[u8]) -> ResourceResult<XmlElement> {
    match parse_node(bytes)? {
        ProtoNode::Element(root) => {
            let mut root = convert(root, &mut Vec::new());
            root.strip_whitespace();
            Ok(root)
        }
        ProtoNode::Text(_) => malformed("Protobuf XML root is not an element"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::android::manifest::{AndroidManifest, ANDROID_NAMESPACE_URI};
    use crate::tests::ProtoWriter;

    fn attribute(namespace_uri: &str, name: &str, value: &str, compiled: Option<Vec<u8>>) -> Vec<u8> {
        let mut writer = ProtoWriter::new();
        if !namespace_uri.is_empty() {
            writer.string(1, namespace_uri);
        }
        writer.string(2, name);
        if !value.is_empty() {
            writer.string(3, value);
        }
        writer.varint(5, 0x0101_021b);
        if let Some(item) = compiled {
            writer.message(6, &item);
        }
        writer.finish()
    }

    fn element(name: &str, namespaces: &[(&str, &str)], attributes: Vec<Vec<u8>>, children: Vec<Vec<u8>>) -> Vec<u8> {
        let mut writer = ProtoWriter::new();
        for (prefix, uri) in namespaces {
            let mut ns = ProtoWriter::new();
            ns.string(1, prefix);
            ns.string(2, uri);
            writer.message(1, &ns.finish());
        }
        writer.string(3, name);
        for attribute in attributes {
            writer.message(4, &attribute);
        }
        for child in children {
            writer.message(5, &child);
        }
        writer.finish()
    }

    fn node(element: Vec<u8>) -> Vec<u8> {
        let mut writer = ProtoWriter::new();
        writer.message(1, &element);
        writer.finish()
    }

    fn text_node(text: &str) -> Vec<u8> {
        let mut writer = ProtoWriter::new();
        writer.string(2, text);
        writer.finish()
    }

    fn primitive(field: u32, value: u64) -> Vec<u8> {
        let mut prim = ProtoWriter::new();
        prim.varint(field, value);
        let mut item = ProtoWriter::new();
        item.message(7, &prim.finish());
        item.finish()
    }

    #[test]
    fn test_proto_manifest() {
        let mut reference = ProtoWriter::new();
        reference.varint(2, 0x7f01_0000);
        reference.string(3, "string/app_name");
        let mut label = ProtoWriter::new();
        label.message(1, &reference.finish());

        let application = element(
            "application",
            &[],
            vec![
                attribute(ANDROID_NAMESPACE_URI, "label", "", Some(label.finish())),
                attribute(ANDROID_NAMESPACE_URI, "debuggable", "", Some(primitive(8, 1))),
            ],
            vec![text_node("\n    ")],
        );
        let root = element(
            "manifest",
            &[("android", ANDROID_NAMESPACE_URI)],
            vec![
                attribute("", "package", "com.example.app", None),
                attribute(ANDROID_NAMESPACE_URI, "versionCode", "", Some(primitive(6, 12))),
                attribute(ANDROID_NAMESPACE_URI, "versionName", "2.0", None),
            ],
            vec![node(application)],
        );

        let manifest = AndroidManifest::from_proto(&node(root)).unwrap();
        assert_eq!(manifest.package_name, "com.example.app");
        assert_eq!(manifest.version_code, Some(12));
        assert_eq!(manifest.version_name.as_deref(), Some("2.0"));
        assert_eq!(
            manifest.xml,
            "<manifest\n    xmlns:android=\"http://schemas.android.com/apk/res/android\"\n    package=\"com.example.app\"\n    android:versionCode=\"12\"\n    android:versionName=\"2.0\"\n    >\n  <application\n      android:label=\"@string/app_name\"\n      android:debuggable=\"true\"\n      />\n</manifest>\n"
        );
    }

    #[test]
    fn test_primitives() {
        assert_eq!(parse_item(&primitive(7, 0x30)).unwrap().as_deref(), Some("0x30"));
        assert_eq!(parse_item(&primitive(9, 0xff00_ff00)).unwrap().as_deref(), Some("#ff00ff00"));
        assert_eq!(parse_item(&primitive(12, 0xf0f)).unwrap().as_deref(), Some("#f0f"));
        assert_eq!(parse_item(&primitive(6, (-1i32) as u32 as u64)).unwrap().as_deref(), Some("-1"));
    }

    #[test]
    fn test_namespace_declarations_are_scoped() {
        const TOOLS: &str = "http://schemas.android.com/tools";
        let nested = element("meta-data", &[], vec![attribute(TOOLS, "node", "remove", None)], vec![]);
        let first = element("activity", &[("tools", TOOLS)], vec![attribute(TOOLS, "ignore", "All", None)], vec![node(nested)]);
        let second = element("service", &[], vec![attribute(TOOLS, "ignore", "All", None)], vec![]);
        let root = element("manifest", &[], vec![attribute("", "package", "p", None)], vec![node(first), node(second)]);

        let root = decode(&node(root)).unwrap();
        let children: Vec<_> = root.elements().collect();
        assert_eq!(children[0].attributes[1].name, "tools:ignore");
        assert_eq!(children[0].elements().next().unwrap().attributes[0].name, "tools:node");
        assert_eq!(children[1].attributes[0].name, "ignore");
        assert_eq!(children[1].attributes[0].namespace_uri.as_deref(), Some(TOOLS));
    }

    #[test]
    fn test_malformed_proto() {
        assert!(decode(&text_node("just text")).is_err());
        // Length prefix runs past the end
        assert!(decode(&[0x0a, 0x10, 0x1a]).is_err());
        assert!(decode(&[0x0b]).is_err());
    }
}
