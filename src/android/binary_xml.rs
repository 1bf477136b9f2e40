/* Legacy AAPT binary XML, as compiled into APK manifests */

use crate::android::arsc::Arsc;
use crate::android::chunk::{malformed, ChunkReader, ResourceError, ResourceResult, StringPool, RES_STRING_POOL_TYPE, RES_XML_TYPE};
use crate::android::manifest::{XmlAttribute, XmlElement, XmlNode};
use log::trace;
use std::collections::BTreeMap;

pub(crate) const RES_XML_START_NAMESPACE_TYPE: u16 = 0x0100;
pub(crate) const RES_XML_END_NAMESPACE_TYPE: u16 = 0x0101;
pub(crate) const RES_XML_START_ELEMENT_TYPE: u16 = 0x0102;
pub(crate) const RES_XML_END_ELEMENT_TYPE: u16 = 0x0103;
pub(crate) const RES_XML_CDATA_TYPE: u16 = 0x0104;
pub(crate) const RES_XML_RESOURCE_MAP_TYPE: u16 = 0x0180;

pub(crate) const TYPE_NULL: u8 = 0x00;
pub(crate) const TYPE_REFERENCE: u8 = 0x01;
pub(crate) const TYPE_STRING: u8 = 0x03;
pub(crate) const TYPE_INT_DEC: u8 = 0x10;
pub(crate) const TYPE_INT_HEX: u8 = 0x11;
pub(crate) const TYPE_INT_BOOLEAN: u8 = 0x12;
pub(crate) const TYPE_INT_COLOR_ARGB8: u8 = 0x1c;
pub(crate) const TYPE_INT_COLOR_RGB8: u8 = 0x1d;
pub(crate) const TYPE_INT_COLOR_ARGB4: u8 = 0x1e;
pub(crate) const TYPE_INT_COLOR_RGB4: u8 = 0x1f;

/// Renders a typed resource value the way it would be written in source.
pub(crate) fn render_value(data_type: u8, data: u32, raw: Option<&str>, strings: &StringPool, arsc: Option<&Arsc>) -> String {
    match data_type {
        TYPE_INT_BOOLEAN => if data == 0 { "false".to_string() } else { "true".to_string() },
        TYPE_INT_COLOR_ARGB4 => format!("#{:04x}", data),
        TYPE_INT_COLOR_ARGB8 => format!("#{:08x}", data),
        TYPE_INT_COLOR_RGB4 => format!("#{:03x}", data),
        TYPE_INT_COLOR_RGB8 => format!("#{:06x}", data),
        TYPE_INT_DEC => (data as i32).to_string(),
        TYPE_INT_HEX => format!("0x{:x}", data),
        TYPE_REFERENCE => match arsc.and_then(|table| table.entry(data)) {
            Some(entry) => format!("@{}", entry),
            None => (data as i32).to_string(),
        },
        TYPE_NULL => "null".to_string(),
        TYPE_STRING => raw
            .or_else(|| strings.get(data))
            .unwrap_or_default()
            .to_string(),
        _ => (data as i32).to_string(),
    }
}

struct Decoder<'a> {
    arsc: Option<&'a Arsc>,
    strings: StringPool,
    /// Declarations waiting to be written onto the next element.
    pending_namespaces: Vec<(String, String)>,
    /// Namespace uri to `prefix:`.
    prefixes: BTreeMap<String, String>,
    stack: Vec<XmlElement>,
    root: Option<XmlElement>,
}

impl<'a> Decoder<'a> {
    fn string(&self, idx: u32) -> ResourceResult<&str> {
        self.strings
            .get(idx)
            .ok_or_else(|| ResourceError::MalformedDocument(format!("String index {} out of range", idx)))
    }

    fn qualify(&self, namespace_uri: Option<&str>, name: &str) -> String {
        match namespace_uri.and_then(|uri| self.prefixes.get(uri)) {
            Some(prefix) => format!("{}{}", prefix, name),
            None => name.to_string(),
        }
    }

    fn start_namespace(&mut self, reader: &mut ChunkReader<'_>) -> ResourceResult<()> {
        reader.read_u32()?; // line number
        reader.read_u32()?; // comment
        let prefix = self.strings.get(reader.read_u32()?).map(str::to_string);
        let uri = self.string(reader.read_u32()?)?.to_string();
        let scoped = match &prefix {
            Some(prefix) if !prefix.is_empty() => format!("{}:", prefix),
            _ => String::new(),
        };
        self.prefixes.insert(uri.clone(), scoped);
        self.pending_namespaces.push((prefix.unwrap_or_default(), uri));
        Ok(())
    }

    /// Empty namespace strings mean no namespace.
    fn namespace_uri(&self, index: u32) -> Option<String> {
        self.strings.get(index).filter(|uri| !uri.is_empty()).map(str::to_string)
    }

    fn start_element(&mut self, reader: &mut ChunkReader<'_>, body_start: usize) -> ResourceResult<()> {
        reader.read_u32()?; // line number
        reader.read_u32()?; // comment
        let namespace_uri = self.namespace_uri(reader.read_u32()?);
        let name = self.string(reader.read_u32()?)?.to_string();
        let attribute_start = reader.read_u16()? as usize;
        let attribute_size = reader.read_u16()? as usize;
        let attribute_count = reader.read_u16()? as usize;
        if attribute_count > 0 && attribute_size < 20 {
            return malformed(format!("Attribute size {} too small on <{}>", attribute_size, name));
        }

        let qualified = self.qualify(namespace_uri.as_deref(), &name);
        let mut element = XmlElement::new(namespace_uri, qualified);
        for (prefix, uri) in self.pending_namespaces.drain(..) {
            let attribute = if prefix.is_empty() { "xmlns".to_string() } else { format!("xmlns:{}", prefix) };
            element.attributes.push(XmlAttribute::new(None, attribute, uri));
        }

        for i in 0..attribute_count {
            reader.seek(body_start + attribute_start + i * attribute_size)?;
            let namespace_uri = self.namespace_uri(reader.read_u32()?);
            let name = self.string(reader.read_u32()?)?.to_string();
            let raw = self.strings.get(reader.read_u32()?);
            reader.read_u16()?; // value size
            reader.read_u8()?; // res0
            let data_type = reader.read_u8()?;
            let data = reader.read_u32()?;
            let value = render_value(data_type, data, raw, &self.strings, self.arsc);
            let qualified = self.qualify(namespace_uri.as_deref(), &name);
            element.attributes.push(XmlAttribute::new(namespace_uri, qualified, value));
        }
        self.stack.push(element);
        Ok(())
    }

    fn end_element(&mut self) -> ResourceResult<()> {
        let element = self
            .stack
            .pop()
            .ok_or_else(|| ResourceError::MalformedDocument("End element without matching start".to_string()))?;
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(XmlNode::Element(element)),
            None if self.root.is_none() => self.root = Some(element),
            None => return malformed("Multiple root elements in document"),
        }
        Ok(())
    }

    fn cdata(&mut self, reader: &mut ChunkReader<'_>) -> ResourceResult<()> {
        reader.read_u32()?; // line number
        reader.read_u32()?; // comment
        let text = self.strings.get(reader.read_u32()?).map(str::to_string);
        if let (Some(text), Some(current)) = (text, self.stack.last_mut()) {
            current.children.push(XmlNode::Text(text));
        }
        Ok(())
    }
}

/// Decodes a binary XML document into an element tree. Reference values resolve against `arsc` when present.
pub fn decode(bytes: &[u8], arsc: Option<&Arsc>) -> ResourceResult<XmlElement> {
    let mut reader = ChunkReader::new(bytes);
    let xml_header = reader.read_chunk_header()?;
    if xml_header.chunk_type != RES_XML_TYPE {
        return malformed(format!("Binary XML does not start with a RES_XML_TYPE header, found {:#06x}", xml_header.chunk_type));
    }
    reader.seek(xml_header.body_start())?;

    let mut decoder = Decoder {
        arsc,
        strings: StringPool::default(),
        pending_namespaces: Vec::new(),
        prefixes: BTreeMap::new(),
        stack: Vec::new(),
        root: None,
    };

    while reader.position() < xml_header.end() {
        let chunk = reader.read_chunk_header()?;
        trace!("xml chunk {:#06x}", chunk.chunk_type);
        match chunk.chunk_type {
            RES_STRING_POOL_TYPE => {
                decoder.strings = StringPool::parse(&mut reader, &chunk)?;
            }
            RES_XML_START_NAMESPACE_TYPE => decoder.start_namespace(&mut reader)?,
            RES_XML_START_ELEMENT_TYPE => decoder.start_element(&mut reader, chunk.body_start())?,
            RES_XML_END_ELEMENT_TYPE => decoder.end_element()?,
            RES_XML_CDATA_TYPE => decoder.cdata(&mut reader)?,
            // Resource map and namespace ends carry nothing the tree needs
            RES_XML_RESOURCE_MAP_TYPE | RES_XML_END_NAMESPACE_TYPE => {}
            _ => {}
        }
        reader.seek(chunk.end())?;
    }

    if !decoder.stack.is_empty() {
        return malformed("Unclosed XML elements at end of document");
    }
    let mut root = decoder
        .root
        .ok_or_else(|| ResourceError::MalformedDocument("Binary XML document is empty".to_string()))?;
    root.strip_whitespace();
    Ok(root)
}
