#[macro_use]
pub mod error;

pub(crate) mod dex_file;
pub(crate) mod leb;

use crate::api_mapping::ApiMapping;
use crate::dex::dex_file::DexFile;
use crate::dex::error::DexError;
use crate::dex::leb::decode_uleb128;
use crate::error::{ArtifactContext, Result};
use crate::types::{Field, Member, Method, TypeDescriptor};
use log::debug;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashSet;

// Basic type reading and writing
pub(crate) fn read_u1(bytes: &[u8], ix: &mut usize) -> std::result::Result<u8, DexError>
{
    if bytes.len() < *ix + 1
    {
        fail!("Unexpected end of stream reading u1 at index {}", *ix);
    }
    let result = bytes[*ix];
    *ix += 1;
    Ok(result)
}

pub(crate) fn read_u2(bytes: &[u8], ix: &mut usize) -> std::result::Result<u16, DexError>
{
    if bytes.len() < *ix + 2
    {
        fail!("Unexpected end of stream reading u2 at index {}", *ix);
    }
    let result = ((bytes[*ix + 1] as u16) << 8) | (bytes[*ix] as u16);
    *ix += 2;
    Ok(result)
}

pub(crate) fn read_u4(bytes: &[u8], ix: &mut usize) -> std::result::Result<u32, DexError>
{
    if bytes.len() < *ix + 4
    {
        fail!("Unexpected end of stream reading u4 at index {}", *ix);
    }
    let result =
        ((bytes[*ix + 3] as u32) << 24) | ((bytes[*ix + 2] as u32) << 16) | ((bytes[*ix + 1] as u32) << 8) | (bytes[*ix] as u32);
    *ix += 4;
    Ok(result)
}

pub(crate) fn read_uleb128(bytes: &[u8], ix: &mut usize) -> std::result::Result<u32, DexError>
{
    if *ix > bytes.len()
    {
        fail!("Unexpected end of stream reading uleb128 at index {}", *ix);
    }
    match decode_uleb128(&bytes[*ix..])
    {
        Some((val, size)) => {
            *ix += size;
            Ok(val)
        }
        None => fail!("Unexpected end of stream reading uleb128 at index {}", *ix),
    }
}

pub(crate) fn read_x(bytes: &[u8], ix: &mut usize, length: usize) -> std::result::Result<Vec<u8>, DexError>
{
    if *ix <= bytes.len() && bytes.len() - *ix >= length
    {
        let mut v = Vec::with_capacity(length);
        v.extend_from_slice(&bytes[*ix..*ix + length]);
        *ix += length;
        Ok(v)
    }
    else
    {
        Err(DexError::new("buffer too short for array read"))
    }
}

#[cfg(test)]
pub(crate) fn write_u2(buffer: &mut Vec<u8>, val: u16) -> usize
{
    buffer.extend_from_slice(&val.to_le_bytes());
    2
}

#[cfg(test)]
pub(crate) fn write_u4(buffer: &mut Vec<u8>, val: u32) -> usize
{
    buffer.extend_from_slice(&val.to_le_bytes());
    4
}

#[cfg(test)]
pub(crate) fn write_uleb128(buffer: &mut Vec<u8>, val: u32) -> usize
{
    let encoded = leb::encode_uleb128(val);
    let c = encoded.len();
    buffer.extend(encoded);
    c
}

/// The reference tables of one DEX file.
///
/// Members whose declaring type has a class definition in this file are declared,
/// all others are referenced. Multidex merging is left to the diff engine.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Dex
{
    pub filename: String,
    pub strings: Vec<String>,
    pub types: Vec<TypeDescriptor>,
    pub classes: Vec<TypeDescriptor>,
    pub declared_members: Vec<Member>,
    pub referenced_members: Vec<Member>,
    /// Declared followed by referenced.
    pub members: Vec<Member>,
}

impl Dex
{
    pub fn from_bytes(filename: impl Into<String>, bytes: &[u8]) -> Result<Dex>
    {
        let filename = filename.into();
        Dex::decode(filename.clone(), bytes).in_artifact(&filename)
    }

    fn decode(filename: String, bytes: &[u8]) -> Result<Dex>
    {
        let dex = DexFile::from_bytes(bytes)?;

        let strings = dex.strings.clone();
        let types = dex.types
            .iter()
            .map(|string_idx| TypeDescriptor::new(dex.strings[*string_idx].as_str()))
            .collect::<Result<Vec<_>>>()?;

        let type_at = |type_idx: usize| -> Result<TypeDescriptor> {
            match types.get(type_idx) {
                Some(t) => Ok(t.clone()),
                None => Err(err!("Type index {} out of range", type_idx).into()),
            }
        };

        let mut defined = HashSet::new();
        let mut classes = Vec::with_capacity(dex.class_defs.len());
        for class_def in &dex.class_defs
        {
            defined.insert(class_def.class_idx);
            classes.push(type_at(class_def.class_idx)?);
        }

        let mut declared_methods = vec![];
        let mut referenced_methods = vec![];
        for (i, item) in dex.methods.iter().enumerate()
        {
            let proto = dex.prototype(item.proto_idx).map_err(|e| e.context(format!("method_ids[{}]", i)))?;
            let parameter_types = proto.parameters.0
                .iter()
                .map(|t| type_at(*t))
                .collect::<Result<Vec<_>>>()?;
            let method = Method::new(
                type_at(item.class_idx)?,
                dex.string(item.name_idx)?,
                parameter_types,
                type_at(proto.return_type_idx)?,
            );
            if defined.contains(&item.class_idx) { declared_methods.push(Member::Method(method)); }
            else { referenced_methods.push(Member::Method(method)); }
        }

        let mut declared_fields = vec![];
        let mut referenced_fields = vec![];
        for item in &dex.fields
        {
            let field = Field::new(type_at(item.class_idx)?, dex.string(item.name_idx)?, type_at(item.type_idx)?);
            if defined.contains(&item.class_idx) { declared_fields.push(Member::Field(field)); }
            else { referenced_fields.push(Member::Field(field)); }
        }

        let mut declared_members = declared_methods;
        declared_members.extend(declared_fields);
        let mut referenced_members = referenced_methods;
        referenced_members.extend(referenced_fields);

        debug!("Decoded {}: {} strings, {} types, {} classes, {} declared and {} referenced members",
            filename, strings.len(), types.len(), classes.len(), declared_members.len(), referenced_members.len());

        Ok(Dex::new(filename, strings, types, classes, declared_members, referenced_members))
    }

    pub fn new(
        filename: String,
        strings: Vec<String>,
        types: Vec<TypeDescriptor>,
        classes: Vec<TypeDescriptor>,
        declared_members: Vec<Member>,
        referenced_members: Vec<Member>,
    ) -> Dex
    {
        let mut members = Vec::with_capacity(declared_members.len() + referenced_members.len());
        members.extend(declared_members.iter().cloned());
        members.extend(referenced_members.iter().cloned());
        Dex { filename, strings, types, classes, declared_members, referenced_members, members }
    }

    /// Deobfuscates class names and members. An empty mapping returns `self` untouched.
    pub fn with_mapping(&self, mapping: &ApiMapping) -> Cow<'_, Dex>
    {
        if mapping.is_empty()
        {
            return Cow::Borrowed(self);
        }
        let classes = self.classes.iter().map(|c| mapping.type_descriptor(c).into_owned()).collect();
        let declared = self.declared_members.iter().map(|m| mapping.member(m).into_owned()).collect();
        let referenced = self.referenced_members.iter().map(|m| mapping.member(m).into_owned()).collect();
        Cow::Owned(Dex::new(
            self.filename.clone(),
            self.strings.clone(),
            self.types.clone(),
            classes,
            declared,
            referenced,
        ))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::tests::DexBuilder;

    fn td(raw: &str) -> TypeDescriptor
    {
        TypeDescriptor::new(raw).unwrap()
    }

    fn sample() -> Vec<u8>
    {
        DexBuilder::new()
            .class("Lcom/example/Foo;")
            .method("Lcom/example/Foo;", "<init>", &[], "V")
            .method("Lcom/example/Foo;", "bar", &["I", "[Ljava/lang/String;"], "Lcom/example/Foo;")
            .field("Lcom/example/Foo;", "count", "J")
            .method("Ljava/lang/Object;", "<init>", &[], "V")
            .field("Landroid/os/Build$VERSION;", "SDK_INT", "I")
            .build()
    }

    #[test]
    fn test_read_helpers()
    {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let mut ix = 0;
        assert_eq!(read_u1(&bytes, &mut ix).unwrap(), 0x01);
        assert_eq!(read_u2(&bytes, &mut ix).unwrap(), 0x0302);
        assert_eq!(read_u4(&bytes, &mut ix).unwrap(), 0x07060504);
        assert_eq!(ix, 7);
        let e = read_u1(&bytes, &mut ix).unwrap_err();
        assert_eq!(e.to_string(), "Unexpected end of stream reading u1 at index 7");
        assert!(read_uleb128(&[0x80], &mut 0).is_err());
        assert!(read_x(&bytes, &mut 5, 3).is_err());
    }

    #[test]
    fn test_declared_and_referenced()
    {
        let dex = Dex::from_bytes("classes.dex", &sample()).unwrap();
        assert_eq!(dex.filename, "classes.dex");
        assert_eq!(dex.classes, vec![td("Lcom/example/Foo;")]);

        let foo = td("Lcom/example/Foo;");
        assert_eq!(dex.declared_members.len(), 3);
        assert!(dex.declared_members.iter().all(|m| m.declaring_type() == &foo));
        // Methods come before fields
        assert!(dex.declared_members[2].as_field().is_some());
        assert!(dex.declared_members.contains(&Member::Method(Method::new(
            foo.clone(), "bar", vec![td("I"), td("[Ljava/lang/String;")], foo.clone()))));

        assert_eq!(dex.referenced_members, vec![
            Member::Method(Method::new(td("Ljava/lang/Object;"), "<init>", vec![], td("V"))),
            Member::Field(Field::new(td("Landroid/os/Build$VERSION;"), "SDK_INT", td("I"))),
        ]);
    }

    #[test]
    fn test_partition_is_disjoint_and_exhaustive()
    {
        let dex = Dex::from_bytes("classes.dex", &sample()).unwrap();
        let declared: HashSet<_> = dex.declared_members.iter().collect();
        let referenced: HashSet<_> = dex.referenced_members.iter().collect();
        assert!(declared.is_disjoint(&referenced));
        assert_eq!(dex.members.len(), declared.len() + referenced.len());
        for m in &dex.members
        {
            assert!(declared.contains(m) ^ referenced.contains(m), "{}", m);
        }
    }

    #[test]
    fn test_unknown_descriptor_propagates()
    {
        let bytes = DexBuilder::new().class("Lcom/example/Foo;").raw_type("Q").build();
        let e = Dex::from_bytes("classes2.dex", &bytes).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::UnknownDescriptor);
        assert!(e.to_string().starts_with("classes2.dex: "), "{}", e);
    }

    #[test]
    fn test_malformed_names_artifact()
    {
        let e = Dex::from_bytes("classes3.dex", b"not a dex").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Malformed);
        assert_eq!(e.to_string(), "classes3.dex: Not enough bytes for header: 9");
    }

    #[test]
    fn test_oversized_count_is_malformed()
    {
        let mut bytes = DexBuilder::new().class("Lcom/example/Foo;").build();
        bytes[0x58..0x5c].copy_from_slice(&0x7fff_ffffu32.to_le_bytes()); // method_ids_size
        let e = Dex::from_bytes("classes.dex", &bytes).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Malformed);
        assert!(e.to_string().starts_with("classes.dex: method_ids table"), "{}", e);
    }

    #[test]
    fn test_with_mapping()
    {
        let dex = Dex::from_bytes("classes.dex", &sample()).unwrap();
        let empty = ApiMapping::empty();
        assert!(matches!(dex.with_mapping(&empty), Cow::Borrowed(d) if std::ptr::eq(d, &dex)));

        let mapping = ApiMapping::parse("com.example.Real -> com.example.Foo:\n    long total -> count\n").unwrap();
        let mapped = dex.with_mapping(&mapping);
        let real = td("Lcom/example/Real;");
        assert_eq!(mapped.classes, vec![real.clone()]);
        assert!(mapped.declared_members.contains(&Member::Field(Field::new(real.clone(), "total", td("J")))));
        assert_eq!(mapped.referenced_members, dex.referenced_members);
        assert_eq!(mapped.members.len(), dex.members.len());
        // The original is untouched
        assert_eq!(dex.classes, vec![td("Lcom/example/Foo;")]);
    }
}
