/* resources.arsc: the compiled resource table. Only configuration names and entry names are decoded. */

use crate::android::chunk::{
    malformed, read_fixed_utf16, ChunkHeader, ChunkReader, ResourceResult, StringPool, RES_STRING_POOL_TYPE,
    RES_TABLE_TYPE,
};
use bitflags::bitflags;
use log::{debug, trace, warn};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

const RES_TABLE_PACKAGE_TYPE: u16 = 0x0200;
const RES_TABLE_TYPE_TYPE: u16 = 0x0201;
const RES_TABLE_TYPE_SPEC_TYPE: u16 = 0x0202;
const RES_TABLE_LIBRARY_TYPE: u16 = 0x0203;
const RES_TABLE_OVERLAYABLE_TYPE: u16 = 0x0204;
const RES_TABLE_OVERLAYABLE_POLICY_TYPE: u16 = 0x0205;
const RES_TABLE_STAGED_ALIAS_TYPE: u16 = 0x0206;

const NO_ENTRY: u32 = 0xFFFF_FFFF;
const NO_ENTRY_16: u16 = 0xFFFF;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct TypeFlags: u8 {
        const SPARSE = 0x01;
        const OFFSET16 = 0x02;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct EntryFlags: u16 {
        const COMPLEX = 0x0001;
        const PUBLIC = 0x0002;
        const WEAK = 0x0004;
        const COMPACT = 0x0008;
    }
}

/// Packs a resource identifier the way the Android runtime does: `0xPPTTEEEE`.
pub fn resource_id(package_id: u32, type_id: u32, entry_index: u32) -> u32 {
    ((package_id & 0xFF) << 24) | ((type_id & 0xFF) << 16) | (entry_index & 0xFFFF)
}

/// A named resource such as `drawable/icon`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Entry {
    #[serde(rename = "type")]
    pub entry_type: String,
    pub name: String,
}

impl Entry {
    pub fn new(entry_type: impl Into<String>, name: impl Into<String>) -> Entry {
        Entry { entry_type: entry_type.into(), name: name.into() }
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entry_type.cmp(&other.entry_type).then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entry_type, self.name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Arsc {
    /// One name per type chunk, e.g. `layout` or `drawable-hdpi`, in table order.
    pub configs: Vec<String>,
    pub entries: BTreeMap<u32, Entry>,
}

impl Arsc {
    pub const NAME: &'static str = "resources.arsc";

    pub fn from_bytes(bytes: &[u8]) -> ResourceResult<Arsc> {
        let mut reader = ChunkReader::new(bytes);
        let table = reader.read_chunk_header()?;
        if table.chunk_type != RES_TABLE_TYPE {
            return malformed(format!("Root arsc chunk is not a resource table ({:#06x})", table.chunk_type));
        }
        let package_count = reader.read_u32()?;
        reader.seek(table.body_start())?;

        let mut arsc = Arsc::default();
        while reader.position() < table.end() {
            let chunk = reader.read_chunk_header()?;
            match chunk.chunk_type {
                RES_STRING_POOL_TYPE => {}
                RES_TABLE_PACKAGE_TYPE => arsc.read_package(&mut reader, &chunk)?,
                other => warn!("Skipping unknown resource table chunk {:#06x}", other),
            }
            reader.seek(chunk.end())?;
        }

        debug!(
            "Decoded resource table: {} packages, {} configs, {} entries",
            package_count,
            arsc.configs.len(),
            arsc.entries.len()
        );
        Ok(arsc)
    }

    fn read_package(&mut self, reader: &mut ChunkReader<'_>, package: &ChunkHeader) -> ResourceResult<()> {
        let package_id = reader.read_u32()?;
        let name = read_fixed_utf16(reader.read_bytes(256)?);
        let type_strings = reader.read_u32()? as usize;
        reader.read_u32()?; // lastPublicType
        let key_strings = reader.read_u32()? as usize;
        trace!("package {:#04x} {}", package_id, name);

        let type_pool = Self::read_pool_at(reader, package.start + type_strings)?;
        let key_pool = Self::read_pool_at(reader, package.start + key_strings)?;

        reader.seek(package.body_start())?;
        while reader.position() < package.end() {
            let chunk = reader.read_chunk_header()?;
            match chunk.chunk_type {
                RES_TABLE_TYPE_TYPE => self.read_type(reader, &chunk, package_id, &type_pool, &key_pool)?,
                RES_STRING_POOL_TYPE
                | RES_TABLE_TYPE_SPEC_TYPE
                | RES_TABLE_LIBRARY_TYPE
                | RES_TABLE_OVERLAYABLE_TYPE
                | RES_TABLE_OVERLAYABLE_POLICY_TYPE
                | RES_TABLE_STAGED_ALIAS_TYPE => {}
                other => warn!("Skipping unknown package chunk {:#06x}", other),
            }
            reader.seek(chunk.end())?;
        }
        Ok(())
    }

    fn read_pool_at(reader: &mut ChunkReader<'_>, offset: usize) -> ResourceResult<StringPool> {
        reader.seek(offset)?;
        let header = reader.read_chunk_header()?;
        if header.chunk_type != RES_STRING_POOL_TYPE {
            return malformed(format!("Expected string pool at {} but found {:#06x}", offset, header.chunk_type));
        }
        StringPool::parse(reader, &header)
    }

    fn read_type(
        &mut self,
        reader: &mut ChunkReader<'_>,
        chunk: &ChunkHeader,
        package_id: u32,
        type_pool: &StringPool,
        key_pool: &StringPool,
    ) -> ResourceResult<()> {
        let type_id = reader.read_u8()?;
        let flags = TypeFlags::from_bits_truncate(reader.read_u8()?);
        reader.read_u16()?; // reserved
        let entry_count = reader.read_u32()? as usize;
        let entries_start = reader.read_u32()? as usize;
        let config_start = reader.position();
        let config_size = reader.read_u32()? as usize;
        reader.seek(config_start)?;
        let config_bytes = reader.read_bytes(config_size.min(chunk.end().saturating_sub(config_start)))?;
        let config = ResConfig::parse(config_bytes);

        let type_name = match type_id.checked_sub(1).and_then(|ix| type_pool.get(ix as u32)) {
            Some(name) => name.to_string(),
            None => return malformed(format!("Type chunk references unknown type id {}", type_id)),
        };
        if config.is_default() {
            self.configs.push(type_name.clone());
        } else {
            self.configs.push(format!("{}-{}", type_name, config));
        }

        reader.seek(chunk.body_start())?;
        let mut offsets = Vec::with_capacity(entry_count.min(reader.remaining() / 2));
        for index in 0..entry_count {
            if flags.contains(TypeFlags::SPARSE) {
                let entry_index = reader.read_u16()? as u32;
                let offset = reader.read_u16()? as u32 * 4;
                offsets.push((entry_index, offset));
            } else if flags.contains(TypeFlags::OFFSET16) {
                let offset = reader.read_u16()?;
                if offset != NO_ENTRY_16 {
                    offsets.push((index as u32, offset as u32 * 4));
                }
            } else {
                let offset = reader.read_u32()?;
                if offset != NO_ENTRY {
                    offsets.push((index as u32, offset));
                }
            }
        }

        for (entry_index, offset) in offsets {
            reader.seek(chunk.start + entries_start + offset as usize)?;
            let first = reader.read_u16()?;
            let entry_flags = EntryFlags::from_bits_truncate(reader.read_u16()?);
            let key = if entry_flags.contains(EntryFlags::COMPACT) {
                first as u32
            } else {
                reader.read_u32()?
            };
            let name = match key_pool.get(key) {
                Some(name) => name.to_string(),
                None => return malformed(format!("Entry {} of {} has no key string {}", entry_index, type_name, key)),
            };
            let id = resource_id(package_id, type_id as u32, entry_index);
            self.entries.insert(id, Entry::new(type_name.clone(), name));
        }
        Ok(())
    }

    pub fn entry(&self, id: u32) -> Option<&Entry> {
        self.entries.get(&id)
    }
}

/// The qualifiers of a type chunk. Fields past the recorded size read as zero.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ResConfig {
    mcc: u16,
    mnc: u16,
    language: [u8; 2],
    country: [u8; 2],
    orientation: u8,
    touchscreen: u8,
    density: u16,
    keyboard: u8,
    navigation: u8,
    input_flags: u8,
    screen_width: u16,
    screen_height: u16,
    sdk_version: u16,
    minor_version: u16,
    screen_layout: u8,
    ui_mode: u8,
    smallest_screen_width_dp: u16,
    screen_width_dp: u16,
    screen_height_dp: u16,
    locale_script: [u8; 4],
    locale_variant: [u8; 8],
    screen_layout2: u8,
    color_mode: u8,
}

impl ResConfig {
    pub(crate) fn parse(bytes: &[u8]) -> ResConfig {
        let u8_at = |offset: usize| bytes.get(offset).copied().unwrap_or(0);
        let u16_at = |offset: usize| u16::from_le_bytes([u8_at(offset), u8_at(offset + 1)]);
        let mut locale_script = [0u8; 4];
        for (i, b) in locale_script.iter_mut().enumerate() {
            *b = u8_at(36 + i);
        }
        let mut locale_variant = [0u8; 8];
        for (i, b) in locale_variant.iter_mut().enumerate() {
            *b = u8_at(40 + i);
        }
        ResConfig {
            mcc: u16_at(4),
            mnc: u16_at(6),
            language: [u8_at(8), u8_at(9)],
            country: [u8_at(10), u8_at(11)],
            orientation: u8_at(12),
            touchscreen: u8_at(13),
            density: u16_at(14),
            keyboard: u8_at(16),
            navigation: u8_at(17),
            input_flags: u8_at(18),
            screen_width: u16_at(20),
            screen_height: u16_at(22),
            sdk_version: u16_at(24),
            minor_version: u16_at(26),
            screen_layout: u8_at(28),
            ui_mode: u8_at(29),
            smallest_screen_width_dp: u16_at(30),
            screen_width_dp: u16_at(32),
            screen_height_dp: u16_at(34),
            locale_script,
            locale_variant,
            screen_layout2: u8_at(48),
            color_mode: u8_at(49),
        }
    }

    pub(crate) fn is_default(&self) -> bool {
        *self == ResConfig::default()
    }

    fn unpack_locale(packed: [u8; 2], base: u8) -> String {
        if packed[0] & 0x80 != 0 {
            // Three letter codes are packed into 15 bits
            let first = packed[1] & 0x1f;
            let second = ((packed[1] & 0xe0) >> 5) | ((packed[0] & 0x03) << 3);
            let third = (packed[0] & 0x7c) >> 2;
            [first, second, third].iter().map(|c| (base + c) as char).collect()
        } else {
            packed.iter().take_while(|b| **b != 0).map(|b| *b as char).collect()
        }
    }

    fn locale(&self) -> Option<String> {
        let language = Self::unpack_locale(self.language, b'a');
        let country = Self::unpack_locale(self.country, b'0');
        let script: String = self.locale_script.iter().take_while(|b| **b != 0).map(|b| *b as char).collect();
        let variant: String = self.locale_variant.iter().take_while(|b| **b != 0).map(|b| *b as char).collect();
        if language.is_empty() && country.is_empty() {
            return None;
        }
        if script.is_empty() && variant.is_empty() {
            if country.is_empty() {
                return Some(language);
            }
            let language = if language.is_empty() { "any".to_string() } else { language };
            return Some(format!("{}-r{}", language, country));
        }
        let mut tag = format!("b+{}", language);
        for part in [script, country, variant] {
            if !part.is_empty() {
                tag.push('+');
                tag.push_str(&part);
            }
        }
        Some(tag)
    }
}

impl fmt::Display for ResConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = vec![];
        let mut push = |s: &str| parts.push(s.to_string());

        if self.mcc != 0 {
            push(&format!("mcc{}", self.mcc));
        }
        if self.mnc != 0 {
            push(&format!("mnc{}", self.mnc));
        }
        if let Some(locale) = self.locale() {
            push(&locale);
        }
        match self.screen_layout & 0xc0 {
            0x40 => push("ldltr"),
            0x80 => push("ldrtl"),
            _ => {}
        }
        if self.smallest_screen_width_dp != 0 {
            push(&format!("sw{}dp", self.smallest_screen_width_dp));
        }
        if self.screen_width_dp != 0 {
            push(&format!("w{}dp", self.screen_width_dp));
        }
        if self.screen_height_dp != 0 {
            push(&format!("h{}dp", self.screen_height_dp));
        }
        match self.screen_layout & 0x0f {
            1 => push("small"),
            2 => push("normal"),
            3 => push("large"),
            4 => push("xlarge"),
            _ => {}
        }
        match self.screen_layout & 0x30 {
            0x10 => push("notlong"),
            0x20 => push("long"),
            _ => {}
        }
        match self.screen_layout2 & 0x03 {
            1 => push("notround"),
            2 => push("round"),
            _ => {}
        }
        match self.color_mode & 0x03 {
            1 => push("nowidecg"),
            2 => push("widecg"),
            _ => {}
        }
        match self.color_mode & 0x0c {
            0x04 => push("lowdr"),
            0x08 => push("highdr"),
            _ => {}
        }
        match self.orientation {
            1 => push("port"),
            2 => push("land"),
            3 => push("square"),
            _ => {}
        }
        match self.ui_mode & 0x0f {
            2 => push("desk"),
            3 => push("car"),
            4 => push("television"),
            5 => push("appliance"),
            6 => push("watch"),
            7 => push("vrheadset"),
            _ => {}
        }
        match self.ui_mode & 0x30 {
            0x10 => push("notnight"),
            0x20 => push("night"),
            _ => {}
        }
        match self.density {
            0 => {}
            120 => push("ldpi"),
            160 => push("mdpi"),
            213 => push("tvdpi"),
            240 => push("hdpi"),
            320 => push("xhdpi"),
            480 => push("xxhdpi"),
            640 => push("xxxhdpi"),
            0xfffe => push("anydpi"),
            0xffff => push("nodpi"),
            other => push(&format!("{}dpi", other)),
        }
        match self.touchscreen {
            1 => push("notouch"),
            2 => push("stylus"),
            3 => push("finger"),
            _ => {}
        }
        match self.input_flags & 0x03 {
            1 => push("keysexposed"),
            2 => push("keyshidden"),
            3 => push("keyssoft"),
            _ => {}
        }
        match self.keyboard {
            1 => push("nokeys"),
            2 => push("qwerty"),
            3 => push("12key"),
            _ => {}
        }
        match self.input_flags & 0x0c {
            0x04 => push("navexposed"),
            0x08 => push("navhidden"),
            _ => {}
        }
        match self.navigation {
            1 => push("nonav"),
            2 => push("dpad"),
            3 => push("trackball"),
            4 => push("wheel"),
            _ => {}
        }
        if self.screen_width != 0 || self.screen_height != 0 {
            push(&format!("{}x{}", self.screen_width, self.screen_height));
        }
        if self.sdk_version != 0 {
            if self.minor_version != 0 {
                push(&format!("v{}.{}", self.sdk_version, self.minor_version));
            } else {
                push(&format!("v{}", self.sdk_version));
            }
        }
        write!(f, "{}", parts.join("-"))
    }
}
