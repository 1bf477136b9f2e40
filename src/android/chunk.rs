/* AAPT resource chunks shared by resources.arsc and binary XML: headers, a bounds checked reader and string pools */

use bitflags::bitflags;
use log::trace;
use thiserror::Error;

pub(crate) const RES_STRING_POOL_TYPE: u16 = 0x0001;
pub(crate) const RES_TABLE_TYPE: u16 = 0x0002;
pub(crate) const RES_XML_TYPE: u16 = 0x0003;

pub(crate) const NO_ENTRY_INDEX: u32 = 0xFFFF_FFFF;

/// Result alias for resource chunk decoding.
pub type ResourceResult<T> = Result<T, ResourceError>;

/// Errors surfaced while decoding resource tables and manifests.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The document is missing the expected structure.
    #[error("Malformed resource: {0}")]
    MalformedDocument(String),
    #[error("Root element is not <manifest>, found <{0}>")]
    MissingManifest(String),
    #[error("Manifest does not declare a package attribute")]
    MissingPackage,
    /// Text XML parsing failure.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl From<quick_xml::events::attributes::AttrError> for ResourceError {
    fn from(value: quick_xml::events::attributes::AttrError) -> Self {
        ResourceError::Xml(quick_xml::Error::InvalidAttr(value))
    }
}

pub(crate) fn malformed<T>(msg: impl Into<String>) -> ResourceResult<T> {
    Err(ResourceError::MalformedDocument(msg.into()))
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) struct StringPoolFlags: u32 {
        const SORTED = 0x0000_0001;
        const UTF8 = 0x0000_0100;
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ChunkHeader {
    pub chunk_type: u16,
    pub header_size: u16,
    pub chunk_size: u32,
    pub start: usize,
}

impl ChunkHeader {
    pub fn end(&self) -> usize {
        self.start + self.chunk_size as usize
    }

    pub fn body_start(&self) -> usize {
        self.start + self.header_size as usize
    }
}

pub(crate) struct ChunkReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ChunkReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ChunkReader { data, pos: 0 }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn read_u8(&mut self) -> ResourceResult<u8> {
        if self.pos + 1 > self.data.len() {
            return malformed("Unexpected end of chunk data");
        }
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> ResourceResult<u16> {
        if self.pos + 2 > self.data.len() {
            return malformed("Unexpected end of chunk data");
        }
        let value = u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> ResourceResult<u32> {
        if self.pos + 4 > self.data.len() {
            return malformed("Unexpected end of chunk data");
        }
        let value = u32::from_le_bytes([
            self.data[self.pos],
            self.data[self.pos + 1],
            self.data[self.pos + 2],
            self.data[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(value)
    }

    pub fn read_bytes(&mut self, length: usize) -> ResourceResult<&'a [u8]> {
        if self.remaining() < length {
            return malformed("Unexpected end of chunk data");
        }
        let bytes = &self.data[self.pos..self.pos + length];
        self.pos += length;
        Ok(bytes)
    }

    pub fn seek(&mut self, offset: usize) -> ResourceResult<()> {
        if offset > self.data.len() {
            return malformed("Attempted to seek past end of document");
        }
        self.pos = offset;
        Ok(())
    }

    pub fn read_chunk_header(&mut self) -> ResourceResult<ChunkHeader> {
        let start = self.position();
        if self.remaining() < 8 {
            return malformed("Truncated chunk header");
        }
        let chunk_type = self.read_u16()?;
        let header_size = self.read_u16()?;
        let chunk_size = self.read_u32()?;
        if header_size < 8 || chunk_size < header_size as u32 {
            return malformed(format!(
                "Invalid sizing for chunk {:#06x}: header {} chunk {}",
                chunk_type, header_size, chunk_size
            ));
        }
        let end = start
            .checked_add(chunk_size as usize)
            .ok_or_else(|| ResourceError::MalformedDocument("Chunk size overflow".to_string()))?;
        if end > self.data.len() {
            return malformed(format!("Chunk {:#06x} extends past end of document", chunk_type));
        }
        trace!("chunk {:#06x} at {} ({} bytes)", chunk_type, start, chunk_size);
        Ok(ChunkHeader { chunk_type, header_size, chunk_size, start })
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct StringPool {
    strings: Vec<String>,
}

impl StringPool {
    /// Parses the pool whose header has just been read.
    pub fn parse(reader: &mut ChunkReader<'_>, header: &ChunkHeader) -> ResourceResult<Self> {
        let string_count = reader.read_u32()? as usize;
        let style_count = reader.read_u32()? as usize;
        let flags = StringPoolFlags::from_bits_truncate(reader.read_u32()?);
        let strings_start = reader.read_u32()? as usize;
        reader.read_u32()?; // stylesStart

        reader.seek(header.body_start())?;
        let mut string_offsets = Vec::with_capacity(string_count.min(reader.remaining() / 4));
        for _ in 0..string_count {
            string_offsets.push(reader.read_u32()? as usize);
        }
        for _ in 0..style_count {
            reader.read_u32()?;
        }

        let strings_base = header.start + strings_start;
        let chunk_end = header.end();

        let mut strings = Vec::with_capacity(string_offsets.len());
        for offset in string_offsets {
            let absolute = strings_base + offset;
            let text = if flags.contains(StringPoolFlags::UTF8) {
                read_utf8_string(reader.data(), absolute, chunk_end)?
            } else {
                read_utf16_string(reader.data(), absolute, chunk_end)?
            };
            strings.push(text);
        }

        reader.seek(chunk_end)?;
        Ok(StringPool { strings })
    }

    pub fn get(&self, idx: u32) -> Option<&str> {
        if idx == NO_ENTRY_INDEX {
            return None;
        }
        self.strings.get(idx as usize).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }
}

fn read_utf8_string(data: &[u8], offset: usize, limit: usize) -> ResourceResult<String> {
    let mut cursor = offset;
    if cursor >= limit {
        return malformed("String offset exceeds chunk bounds");
    }
    // UTF-16 length first, then the UTF-8 byte length
    let (_, len_bytes) = read_utf8_length(data, cursor, limit)?;
    cursor += len_bytes;
    let (byte_len, byte_len_size) = read_utf8_length(data, cursor, limit)?;
    cursor += byte_len_size;
    if cursor + byte_len > limit {
        return malformed("UTF-8 string exceeds chunk bounds");
    }
    let slice = &data[cursor..cursor + byte_len];
    let text = std::str::from_utf8(slice)
        .map_err(|err| ResourceError::MalformedDocument(err.to_string()))?;
    Ok(text.to_string())
}

fn read_utf16_string(data: &[u8], offset: usize, limit: usize) -> ResourceResult<String> {
    let mut cursor = offset;
    let (char_count, header_bytes) = read_utf16_length(data, cursor, limit)?;
    cursor += header_bytes;
    let byte_len = char_count * 2;
    if cursor + byte_len > limit {
        return malformed("UTF-16 string exceeds chunk bounds");
    }
    let units: Vec<u16> = data[cursor..cursor + byte_len]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|err| ResourceError::MalformedDocument(err.to_string()))
}

fn read_utf8_length(data: &[u8], offset: usize, limit: usize) -> ResourceResult<(usize, usize)> {
    if offset >= limit {
        return malformed("Invalid UTF-8 length offset");
    }
    let first = data[offset];
    if (first & 0x80) == 0 {
        Ok((first as usize, 1))
    } else {
        if offset + 1 >= limit {
            return malformed("Truncated UTF-8 length");
        }
        let second = data[offset + 1];
        Ok(((((first & 0x7F) as usize) << 8) | second as usize, 2))
    }
}

fn read_utf16_length(data: &[u8], offset: usize, limit: usize) -> ResourceResult<(usize, usize)> {
    if offset + 2 > limit {
        return malformed("Invalid UTF-16 length offset");
    }
    let first = u16::from_le_bytes([data[offset], data[offset + 1]]);
    if (first & 0x8000) == 0 {
        Ok((first as usize, 2))
    } else {
        if offset + 4 > limit {
            return malformed("Truncated UTF-16 length");
        }
        let second = u16::from_le_bytes([data[offset + 2], data[offset + 3]]);
        Ok(((((first & 0x7FFF) as usize) << 16) | second as usize, 4))
    }
}

/// Reads a fixed size, zero padded UTF-16 field such as a package name.
pub(crate) fn read_fixed_utf16(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|unit| *unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}
