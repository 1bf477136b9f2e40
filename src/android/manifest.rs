/* AndroidManifest.xml in any of its three encodings, normalized to one pretty printed form */

use crate::android::arsc::Arsc;
use crate::android::chunk::{ResourceError, ResourceResult};
use crate::android::{binary_xml, proto_xml};
use log::debug;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use std::collections::BTreeMap;

pub const ANDROID_NAMESPACE_URI: &str = "http://schemas.android.com/apk/res/android";

/// An attribute with its qualified name, e.g. `android:name` or `xmlns:tools`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlAttribute {
    pub namespace_uri: Option<String>,
    pub name: String,
    pub value: String,
}

impl XmlAttribute {
    pub fn new(namespace_uri: Option<String>, name: impl Into<String>, value: impl Into<String>) -> Self {
        XmlAttribute { namespace_uri, name: name.into(), value: value.into() }
    }

    pub fn local_name(&self) -> &str {
        match self.name.split_once(':') {
            Some((_, local)) => local,
            None => &self.name,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// Neutral element tree that every manifest encoding decodes into.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlElement {
    pub namespace_uri: Option<String>,
    /// Qualified name.
    pub name: String,
    /// Source order, namespace declarations included.
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(namespace_uri: Option<String>, name: impl Into<String>) -> Self {
        XmlElement { namespace_uri, name: name.into(), attributes: Vec::new(), children: Vec::new() }
    }

    pub fn attribute(&self, namespace_uri: Option<&str>, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| {
                attr.namespace_uri.as_deref() == namespace_uri
                    && attr.local_name() == local_name
                    && !attr.name.starts_with("xmlns")
            })
            .map(|attr| attr.value.as_str())
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|child| match child {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// Drops whitespace-only text nodes throughout the tree.
    pub(crate) fn strip_whitespace(&mut self) {
        self.children.retain(|child| match child {
            XmlNode::Text(text) => !text.trim().is_empty(),
            XmlNode::Element(_) => true,
        });
        for child in &mut self.children {
            if let XmlNode::Element(e) = child {
                e.strip_whitespace();
            }
        }
    }

    /// Two spaces per level, one attribute per line, children in source order.
    pub fn to_formatted_xml(&self) -> String {
        let mut out = String::new();
        append_element(&mut out, self, 0);
        out
    }
}

fn append_indent(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push_str("  ");
    }
}

fn append_element(out: &mut String, element: &XmlElement, indent: usize) {
    append_indent(out, indent);
    out.push('<');
    out.push_str(&element.name);
    if !element.attributes.is_empty() {
        for attribute in &element.attributes {
            out.push('\n');
            append_indent(out, indent + 2);
            out.push_str(&attribute.name);
            out.push_str("=\"");
            out.push_str(&quick_xml::escape::escape(attribute.value.as_str()));
            out.push('"');
        }
        out.push('\n');
        append_indent(out, indent + 2);
    }
    if element.children.is_empty() {
        out.push('/');
    }
    out.push_str(">\n");

    if !element.children.is_empty() {
        for child in &element.children {
            match child {
                XmlNode::Element(e) => append_element(out, e, indent + 1),
                XmlNode::Text(text) => {
                    append_indent(out, indent + 1);
                    out.push_str(&quick_xml::escape::escape(text.trim()));
                    out.push('\n');
                }
            }
        }
        append_indent(out, indent);
        out.push_str("</");
        out.push_str(&element.name);
        out.push_str(">\n");
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AndroidManifest {
    /// Normalized pretty printed document, stable enough to diff line by line.
    pub xml: String,
    pub package_name: String,
    pub version_name: Option<String>,
    /// `versionCodeMajor << 32 | versionCode`, absent without a `versionCode`.
    pub version_code: Option<i64>,
}

impl AndroidManifest {
    pub const NAME: &'static str = "AndroidManifest.xml";

    /// Text manifests, as found in AARs.
    pub fn parse_xml(text: &str) -> ResourceResult<AndroidManifest> {
        AndroidManifest::from_element(&parse_xml_element(text)?)
    }

    /// Legacy binary XML. References resolve to names when `arsc` is given.
    pub fn from_binary(bytes: &[u8], arsc: Option<&Arsc>) -> ResourceResult<AndroidManifest> {
        AndroidManifest::from_element(&binary_xml::decode(bytes, arsc)?)
    }

    /// aapt2 protobuf `XmlNode`, as found in bundle modules.
    pub fn from_proto(bytes: &[u8]) -> ResourceResult<AndroidManifest> {
        AndroidManifest::from_element(&proto_xml::decode(bytes)?)
    }

    pub fn from_element(root: &XmlElement) -> ResourceResult<AndroidManifest> {
        if root.name != "manifest" {
            return Err(ResourceError::MissingManifest(root.name.clone()));
        }
        let package_name = root.attribute(None, "package").ok_or(ResourceError::MissingPackage)?.to_string();
        let version_name = root.attribute(Some(ANDROID_NAMESPACE_URI), "versionName").map(str::to_string);

        let version_code_minor = root
            .attribute(Some(ANDROID_NAMESPACE_URI), "versionCode")
            .map(parse_int)
            .transpose()?;
        let version_code_major = root
            .attribute(Some(ANDROID_NAMESPACE_URI), "versionCodeMajor")
            .map(parse_int)
            .transpose()?
            .unwrap_or(0);
        let version_code = version_code_minor.map(|minor| ((version_code_major as i64) << 32) + minor as i64);

        debug!("Decoded manifest for {} ({:?}, {:?})", package_name, version_name, version_code);
        Ok(AndroidManifest { xml: root.to_formatted_xml(), package_name, version_name, version_code })
    }
}

fn parse_int(text: &str) -> ResourceResult<i32> {
    let trimmed = text.trim();
    let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).map(|v| v as i32),
        None => trimmed.parse::<i32>(),
    };
    parsed.map_err(|_| ResourceError::MalformedDocument(format!("Invalid integer attribute value {:?}", text)))
}

fn lookup_namespace_uri(stack: &[BTreeMap<String, String>], prefix: Option<&str>) -> Option<String> {
    let key = prefix.unwrap_or("");
    stack.iter().rev().find_map(|frame| frame.get(key).cloned())
}

fn start_element(start: &BytesStart<'_>, ns_stack: &mut Vec<BTreeMap<String, String>>) -> ResourceResult<XmlElement> {
    let mut declarations = BTreeMap::new();
    let mut raw_attributes = Vec::new();
    for attr in start.attributes().with_checks(false) {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|err| ResourceError::MalformedDocument(err.to_string()))?
            .to_string();
        let value = attr.unescape_value()?.into_owned();
        if key == "xmlns" {
            declarations.insert(String::new(), value.clone());
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            declarations.insert(prefix.to_string(), value.clone());
        }
        raw_attributes.push((key, value));
    }
    ns_stack.push(declarations);

    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|err| ResourceError::MalformedDocument(err.to_string()))?
        .to_string();
    let element_prefix = name.split_once(':').map(|(prefix, _)| prefix);
    let mut element = XmlElement::new(lookup_namespace_uri(ns_stack, element_prefix), name.as_str());
    for (key, value) in raw_attributes {
        // Unprefixed attributes have no namespace
        let namespace_uri = match key.split_once(':') {
            Some(("xmlns", _)) => None,
            Some((prefix, _)) => lookup_namespace_uri(ns_stack, Some(prefix)),
            None => None,
        };
        element.attributes.push(XmlAttribute::new(namespace_uri, key, value));
    }
    Ok(element)
}

fn attach(stack: &mut Vec<XmlElement>, root: &mut Option<XmlElement>, element: XmlElement) -> ResourceResult<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(XmlNode::Element(element));
    } else if root.is_none() {
        *root = Some(element);
    } else {
        return Err(ResourceError::MalformedDocument("Multiple root elements in manifest".to_string()));
    }
    Ok(())
}

pub(crate) fn parse_xml_element(xml: &str) -> ResourceResult<XmlElement> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;
    let mut ns_stack: Vec<BTreeMap<String, String>> = vec![BTreeMap::new()];

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                let element = start_element(&start, &mut ns_stack)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = start_element(&start, &mut ns_stack)?;
                ns_stack.pop();
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| ResourceError::MalformedDocument("Unbalanced end tag in manifest".to_string()))?;
                ns_stack.pop();
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let content = text.unescape()?;
                if let Some(current) = stack.last_mut() {
                    if !content.trim().is_empty() {
                        current.children.push(XmlNode::Text(content.into_owned()));
                    }
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    let content = String::from_utf8_lossy(data.as_ref()).into_owned();
                    if !content.trim().is_empty() {
                        current.children.push(XmlNode::Text(content));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ResourceError::MalformedDocument("Unclosed XML elements in manifest".to_string()));
    }
    root.ok_or_else(|| ResourceError::MalformedDocument("Manifest does not have a root element".to_string()))
}
