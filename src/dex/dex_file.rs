/* Dex file format structures: the header and the id tables referenced by members */

use crate::dex::error::DexError;
use crate::dex::{read_u1, read_u2, read_u4, read_uleb128, read_x};
use log::{trace, warn};

/* Constants */
pub const DEX_FILE_MAGIC_PREFIX: [u8; 4] = [ 0x64, 0x65, 0x78, 0x0a ];
pub const ENDIAN_CONSTANT: u32 = 0x12345678;
pub const REVERSE_ENDIAN_CONSTANT: u32 = 0x78563412;
pub const HEADER_SIZE: usize = 0x70;

type StringId = usize;
type TypeId = usize;
type ProtoId = usize;

#[derive(Debug, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 8],
    pub checksum: u32,
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub string_ids_size: u32,
    pub string_ids_off: u32,
    pub type_ids_size: u32,
    pub type_ids_off: u32,
    pub proto_ids_size: u32,
    pub proto_ids_off: u32,
    pub field_ids_size: u32,
    pub field_ids_off: u32,
    pub method_ids_size: u32,
    pub method_ids_off: u32,
    pub class_defs_size: u32,
    pub class_defs_off: u32,
}

impl Header
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<Header, DexError>
    {
        if bytes.len() < HEADER_SIZE {
            fail!("Not enough bytes for header: {}", bytes.len());
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&read_x(bytes, ix, 8)?);
        if magic[..4] != DEX_FILE_MAGIC_PREFIX || magic[7] != 0 {
            fail!("Invalid magic value {:02x?}", magic);
        }

        let checksum = read_u4(bytes, ix)?;
        *ix += 20; // SHA-1 signature
        let file_size = read_u4(bytes, ix)?;
        let header_size = read_u4(bytes, ix)?;
        let endian_tag = read_u4(bytes, ix)?;
        if endian_tag == REVERSE_ENDIAN_CONSTANT {
            fail!("Big-endian dex files are not supported");
        }
        if endian_tag != ENDIAN_CONSTANT {
            fail!("Invalid endian tag {:#010x}", endian_tag);
        }
        read_u4(bytes, ix)?; // link_size
        read_u4(bytes, ix)?; // link_off
        read_u4(bytes, ix)?; // map_off

        Ok(Header {
            magic,
            checksum,
            file_size,
            header_size,
            endian_tag,
            string_ids_size: read_u4(bytes, ix)?,
            string_ids_off: read_u4(bytes, ix)?,
            type_ids_size: read_u4(bytes, ix)?,
            type_ids_off: read_u4(bytes, ix)?,
            proto_ids_size: read_u4(bytes, ix)?,
            proto_ids_off: read_u4(bytes, ix)?,
            field_ids_size: read_u4(bytes, ix)?,
            field_ids_off: read_u4(bytes, ix)?,
            method_ids_size: read_u4(bytes, ix)?,
            method_ids_off: read_u4(bytes, ix)?,
            class_defs_size: read_u4(bytes, ix)?,
            class_defs_off: read_u4(bytes, ix)?,
        })
    }

    /// The three digit format version, e.g. 35 for `dex\n035\0`.
    pub fn version(&self) -> u32
    {
        self.magic[4..7]
            .iter()
            .fold(0, |acc, b| acc * 10 + (b.wrapping_sub(b'0') as u32))
    }
}

#[derive(Debug, Eq, PartialEq, Clone)]
pub enum DexString
{
    Decoded(String),
    Raw(u32, Vec<u8>),
}

impl DexString
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<DexString, DexError>
    {
        let utf16_size = read_uleb128(bytes, ix)?;
        let mut v = vec![];

        loop
        {
            let u = read_u1(bytes, ix)?;
            if u != 0 { v.push(u); }
            else { break; }
        }

        Ok(match cesu8::from_java_cesu8(v.as_slice())
        {
            Ok(converted_str) => DexString::Decoded(converted_str.to_string()),
            _ => DexString::Raw(utf16_size, v)
        })
    }

    /// Raw strings are not valid modified UTF-8; they are kept lossily.
    pub fn into_string(self) -> String
    {
        match self
        {
            DexString::Decoded(s) => s,
            DexString::Raw(_, v) => {
                warn!("Invalid modified UTF-8 string in dex, decoding lossily");
                String::from_utf8_lossy(&v).into_owned()
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct TypeList(pub Vec<TypeId>);

impl TypeList
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<TypeList, DexError>
    {
        let size = read_u4(bytes, ix)?;
        let mut v = Vec::with_capacity(size.min(0xFFFF) as usize);
        for _ in 0..size { v.push(read_u2(bytes, ix)? as TypeId); }
        Ok(TypeList(v))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct PrototypeItem {
    // The proto_id_item struct
    pub shorty_idx: StringId,
    pub return_type_idx: TypeId,
    pub parameters: TypeList
}

impl PrototypeItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<PrototypeItem, DexError>
    {
        let shorty_idx = read_u4(bytes, ix)? as StringId;
        let return_type_idx = read_u4(bytes, ix)? as TypeId;
        let mut parameters_offset = read_u4(bytes, ix)? as usize;
        let parameters = if parameters_offset == 0 { TypeList(vec![]) }
            else { TypeList::read(bytes, &mut parameters_offset)? };
        Ok(PrototypeItem { shorty_idx, return_type_idx, parameters })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct FieldItem {
    // The field_id_item struct
    pub class_idx: TypeId,
    pub type_idx: TypeId,
    pub name_idx: StringId
}

impl FieldItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<FieldItem, DexError>
    {
        Ok(FieldItem {
            class_idx: read_u2(bytes, ix)? as TypeId,
            type_idx: read_u2(bytes, ix)? as TypeId,
            name_idx: read_u4(bytes, ix)? as StringId,
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct MethodItem {
    // The method_id_item struct
    pub class_idx: TypeId,
    pub proto_idx: ProtoId,
    pub name_idx: StringId
}

impl MethodItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<MethodItem, DexError>
    {
        Ok(MethodItem {
            class_idx: read_u2(bytes, ix)? as TypeId,
            proto_idx: read_u2(bytes, ix)? as ProtoId,
            name_idx: read_u4(bytes, ix)? as StringId,
        })
    }
}

/// The leading fields of a class_def_item. Class bodies are not needed to tell
/// declared members from referenced ones.
#[derive(Debug, PartialEq, Eq)]
pub struct ClassDefItem
{
    pub class_idx: TypeId,
    pub access_flags: u32,
    pub superclass_idx: u32,
}

impl ClassDefItem
{
    pub const SIZE: usize = 0x20;

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<ClassDefItem, DexError>
    {
        let start = *ix;
        let class_idx = read_u4(bytes, ix)? as TypeId;
        let access_flags = read_u4(bytes, ix)?;
        let superclass_idx = read_u4(bytes, ix)?;
        if bytes.len() < start + Self::SIZE {
            fail!("Truncated class_def_item at index {}", start);
        }
        *ix = start + Self::SIZE;
        Ok(ClassDefItem { class_idx, access_flags, superclass_idx })
    }
}

/// Checks that `count` items of `item_size` bytes at `off` lie inside the file.
fn table_len(bytes: &[u8], name: &str, off: u32, count: u32, item_size: u64) -> Result<usize, DexError>
{
    let end = off as u64 + count as u64 * item_size;
    if end > bytes.len() as u64
    {
        fail!("{} table of {} items at {:#x} extends past the end of the file ({} bytes)", name, count, off, bytes.len());
    }
    Ok(count as usize)
}

#[derive(Debug)]
pub struct DexFile {
    pub header: Header,
    pub strings: Vec<String>,
    pub types: Vec<StringId>,
    pub prototypes: Vec<PrototypeItem>,
    pub fields: Vec<FieldItem>,
    pub methods: Vec<MethodItem>,
    pub class_defs: Vec<ClassDefItem>,
}

impl DexFile {

    fn read(bytes: &[u8], ix: &mut usize) -> Result<DexFile, DexError>
    {
        let header = Header::read(bytes, ix)?;
        trace!("dex version {} with {} strings, {} types, {} methods, {} fields, {} classes",
            header.version(), header.string_ids_size, header.type_ids_size,
            header.method_ids_size, header.field_ids_size, header.class_defs_size);

        // Read the strings
        let mut strings = Vec::with_capacity(table_len(bytes, "string_ids", header.string_ids_off, header.string_ids_size, 4)?);
        *ix = header.string_ids_off as usize;
        for i in 0..header.string_ids_size
        {
            let mut string_data_off = read_u4(bytes, ix)? as usize;
            let ds = DexString::read(bytes, &mut string_data_off)
                .map_err(|e| e.context(format!("string_ids[{}]", i)))?;
            strings.push(ds.into_string());
        }

        // Read the type_ids
        let mut types = Vec::with_capacity(table_len(bytes, "type_ids", header.type_ids_off, header.type_ids_size, 4)?);
        *ix = header.type_ids_off as usize;
        for i in 0..header.type_ids_size
        {
            let descriptor_idx = read_u4(bytes, ix)? as StringId;
            if descriptor_idx >= strings.len() {
                fail!("type_ids[{}] references missing string {}", i, descriptor_idx);
            }
            types.push(descriptor_idx);
        }

        // Read the prototypes
        let mut prototypes = Vec::with_capacity(table_len(bytes, "proto_ids", header.proto_ids_off, header.proto_ids_size, 12)?);
        *ix = header.proto_ids_off as usize;
        for i in 0..header.proto_ids_size
        {
            let p = PrototypeItem::read(bytes, ix).map_err(|e| e.context(format!("proto_ids[{}]", i)))?;
            prototypes.push(p);
        }

        // Read the field ids
        let mut fields = Vec::with_capacity(table_len(bytes, "field_ids", header.field_ids_off, header.field_ids_size, 8)?);
        *ix = header.field_ids_off as usize;
        for _ in 0..header.field_ids_size
        {
            fields.push(FieldItem::read(bytes, ix)?);
        }

        // Read the method ids
        let mut methods = Vec::with_capacity(table_len(bytes, "method_ids", header.method_ids_off, header.method_ids_size, 8)?);
        *ix = header.method_ids_off as usize;
        for _ in 0..header.method_ids_size
        {
            methods.push(MethodItem::read(bytes, ix)?);
        }

        // Read the class defs
        let mut class_defs = Vec::with_capacity(table_len(bytes, "class_defs", header.class_defs_off, header.class_defs_size, 32)?);
        *ix = header.class_defs_off as usize;
        for _ in 0..header.class_defs_size
        {
            class_defs.push(ClassDefItem::read(bytes, ix)?);
        }

        Ok(DexFile { header, strings, types, prototypes, fields, methods, class_defs })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<DexFile, DexError>
    {
        let mut ix = 0;
        DexFile::read(bytes, &mut ix)
    }

    /// Descriptor string for a type index.
    pub fn type_name(&self, type_idx: TypeId) -> Result<&str, DexError>
    {
        match self.types.get(type_idx) {
            Some(string_idx) => Ok(&self.strings[*string_idx]),
            None => Err(err!("Type index {} out of range", type_idx)),
        }
    }

    pub fn string(&self, string_idx: StringId) -> Result<&str, DexError>
    {
        self.strings
            .get(string_idx)
            .map(|s| s.as_str())
            .ok_or_else(|| err!("String index {} out of range", string_idx))
    }

    pub fn prototype(&self, proto_idx: ProtoId) -> Result<&PrototypeItem, DexError>
    {
        self.prototypes
            .get(proto_idx)
            .ok_or_else(|| err!("Proto index {} out of range", proto_idx))
    }
}
