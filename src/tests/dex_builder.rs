use crate::dex::dex_file::HEADER_SIZE;
use crate::dex::{write_u2, write_u4, write_uleb128};
use std::collections::BTreeSet;

const NO_INDEX: u32 = 0xFFFF_FFFF;

struct MethodDef
{
    class: String,
    name: String,
    parameters: Vec<String>,
    return_type: String,
}

struct FieldDef
{
    class: String,
    name: String,
    field_type: String,
}

/// Writes the id tables of a version 035 dex file. Class definitions carry no class data.
#[derive(Default)]
pub(crate) struct DexBuilder
{
    classes: Vec<String>,
    methods: Vec<MethodDef>,
    fields: Vec<FieldDef>,
    extra_types: Vec<String>,
}

fn shorty_char(descriptor: &str) -> char
{
    match descriptor.chars().next() {
        Some('L') | Some('[') => 'L',
        Some(c) => c,
        None => 'V',
    }
}

fn pad4(buffer: &mut Vec<u8>)
{
    while buffer.len() % 4 != 0 { buffer.push(0); }
}

impl DexBuilder
{
    pub(crate) fn new() -> DexBuilder
    {
        DexBuilder::default()
    }

    pub(crate) fn class(mut self, descriptor: &str) -> DexBuilder
    {
        self.classes.push(descriptor.to_string());
        self
    }

    pub(crate) fn method(mut self, class: &str, name: &str, parameters: &[&str], return_type: &str) -> DexBuilder
    {
        self.methods.push(MethodDef {
            class: class.to_string(),
            name: name.to_string(),
            parameters: parameters.iter().map(|p| p.to_string()).collect(),
            return_type: return_type.to_string(),
        });
        self
    }

    pub(crate) fn field(mut self, class: &str, name: &str, field_type: &str) -> DexBuilder
    {
        self.fields.push(FieldDef { class: class.to_string(), name: name.to_string(), field_type: field_type.to_string() });
        self
    }

    /// A type id that nothing else uses, valid or not.
    pub(crate) fn raw_type(mut self, descriptor: &str) -> DexBuilder
    {
        self.extra_types.push(descriptor.to_string());
        self
    }

    fn shorty(method: &MethodDef) -> String
    {
        std::iter::once(shorty_char(&method.return_type))
            .chain(method.parameters.iter().map(|p| shorty_char(p)))
            .collect()
    }

    pub(crate) fn build(&self) -> Vec<u8>
    {
        // Types and strings are sorted, as dx and d8 write them
        let mut types = BTreeSet::new();
        types.extend(self.classes.iter().cloned());
        types.extend(self.extra_types.iter().cloned());
        for m in &self.methods
        {
            types.insert(m.class.clone());
            types.insert(m.return_type.clone());
            types.extend(m.parameters.iter().cloned());
        }
        for f in &self.fields
        {
            types.insert(f.class.clone());
            types.insert(f.field_type.clone());
        }
        let types: Vec<String> = types.into_iter().collect();

        let mut strings: BTreeSet<String> = types.iter().cloned().collect();
        for m in &self.methods
        {
            strings.insert(m.name.clone());
            strings.insert(Self::shorty(m));
        }
        strings.extend(self.fields.iter().map(|f| f.name.clone()));
        let strings: Vec<String> = strings.into_iter().collect();

        let string_idx = |s: &str| strings.iter().position(|x| x == s).unwrap() as u32;
        let type_idx = |s: &str| types.iter().position(|x| x == s).unwrap() as u32;

        let mut protos: Vec<(String, String, Vec<String>)> = vec![];
        for m in &self.methods
        {
            let proto = (Self::shorty(m), m.return_type.clone(), m.parameters.clone());
            if !protos.contains(&proto) { protos.push(proto); }
        }
        let proto_idx = |m: &MethodDef| {
            protos.iter().position(|p| p.1 == m.return_type && p.2 == m.parameters).unwrap() as u32
        };

        let string_ids_off = HEADER_SIZE;
        let type_ids_off = string_ids_off + 4 * strings.len();
        let proto_ids_off = type_ids_off + 4 * types.len();
        let field_ids_off = proto_ids_off + 12 * protos.len();
        let method_ids_off = field_ids_off + 8 * self.fields.len();
        let class_defs_off = method_ids_off + 8 * self.methods.len();
        let data_off = class_defs_off + 32 * self.classes.len();

        // Data section: parameter lists first, they need 4-byte alignment
        let mut data = vec![];
        let mut parameter_offsets = vec![];
        for (_, _, parameters) in &protos
        {
            if parameters.is_empty() {
                parameter_offsets.push(0);
                continue;
            }
            parameter_offsets.push((data_off + data.len()) as u32);
            write_u4(&mut data, parameters.len() as u32);
            for p in parameters { write_u2(&mut data, type_idx(p) as u16); }
            pad4(&mut data);
        }
        let mut string_data_offsets = vec![];
        for s in &strings
        {
            string_data_offsets.push((data_off + data.len()) as u32);
            write_uleb128(&mut data, s.encode_utf16().count() as u32);
            data.extend_from_slice(&cesu8::to_java_cesu8(s));
            data.push(0);
        }
        pad4(&mut data);
        let file_size = data_off + data.len();

        let table = |size: usize, offset: usize| -> (u32, u32) {
            if size == 0 { (0, 0) } else { (size as u32, offset as u32) }
        };

        let mut out = Vec::with_capacity(file_size);
        out.extend_from_slice(b"dex\n035\0");
        write_u4(&mut out, 0); // checksum
        out.extend_from_slice(&[0; 20]); // signature
        write_u4(&mut out, file_size as u32);
        write_u4(&mut out, HEADER_SIZE as u32);
        write_u4(&mut out, crate::dex::dex_file::ENDIAN_CONSTANT);
        write_u4(&mut out, 0); // link_size
        write_u4(&mut out, 0); // link_off
        write_u4(&mut out, 0); // map_off
        for (size, offset) in [
            table(strings.len(), string_ids_off),
            table(types.len(), type_ids_off),
            table(protos.len(), proto_ids_off),
            table(self.fields.len(), field_ids_off),
            table(self.methods.len(), method_ids_off),
            table(self.classes.len(), class_defs_off),
            table(data.len(), data_off),
        ]
        {
            write_u4(&mut out, size);
            write_u4(&mut out, offset);
        }
        assert_eq!(out.len(), HEADER_SIZE);

        for offset in string_data_offsets { write_u4(&mut out, offset); }
        for t in &types { write_u4(&mut out, string_idx(t)); }
        for ((shorty, return_type, _), parameters_off) in protos.iter().zip(parameter_offsets)
        {
            write_u4(&mut out, string_idx(shorty));
            write_u4(&mut out, type_idx(return_type));
            write_u4(&mut out, parameters_off);
        }
        for f in &self.fields
        {
            write_u2(&mut out, type_idx(&f.class) as u16);
            write_u2(&mut out, type_idx(&f.field_type) as u16);
            write_u4(&mut out, string_idx(&f.name));
        }
        for m in &self.methods
        {
            write_u2(&mut out, type_idx(&m.class) as u16);
            write_u2(&mut out, proto_idx(m) as u16);
            write_u4(&mut out, string_idx(&m.name));
        }
        for c in &self.classes
        {
            write_u4(&mut out, type_idx(c));
            write_u4(&mut out, 0x0001); // public
            write_u4(&mut out, NO_INDEX); // superclass
            write_u4(&mut out, 0); // interfaces
            write_u4(&mut out, NO_INDEX); // source file
            write_u4(&mut out, 0); // annotations
            write_u4(&mut out, 0); // class data
            write_u4(&mut out, 0); // static values
        }
        assert_eq!(out.len(), data_off);
        out.extend(data);
        out
    }
}
