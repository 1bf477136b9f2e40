/* Java class file reader: constant pool, member declarations and the member references made by bytecode */

use crate::dex::error::DexError;
use log::{trace, warn};

pub const CLASS_FILE_MAGIC: u32 = 0xCAFEBABE;

const CONSTANT_UTF8: u8 = 1;
const CONSTANT_INTEGER: u8 = 3;
const CONSTANT_FLOAT: u8 = 4;
const CONSTANT_LONG: u8 = 5;
const CONSTANT_DOUBLE: u8 = 6;
const CONSTANT_CLASS: u8 = 7;
const CONSTANT_STRING: u8 = 8;
const CONSTANT_FIELDREF: u8 = 9;
const CONSTANT_METHODREF: u8 = 10;
const CONSTANT_INTERFACE_METHODREF: u8 = 11;
const CONSTANT_NAME_AND_TYPE: u8 = 12;
const CONSTANT_METHOD_HANDLE: u8 = 15;
const CONSTANT_METHOD_TYPE: u8 = 16;
const CONSTANT_DYNAMIC: u8 = 17;
const CONSTANT_INVOKE_DYNAMIC: u8 = 18;
const CONSTANT_MODULE: u8 = 19;
const CONSTANT_PACKAGE: u8 = 20;

const REF_INVOKE_STATIC: u8 = 6;

const LAMBDA_METAFACTORY_OWNER: &str = "java/lang/invoke/LambdaMetafactory";
const LAMBDA_METAFACTORY_NAME: &str = "metafactory";
const LAMBDA_METAFACTORY_DESCRIPTOR: &str = "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodHandle;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;";

// Big-endian readers, the class file counterpart of the dex readers
fn read_u1(bytes: &[u8], ix: &mut usize) -> Result<u8, DexError>
{
    match bytes.get(*ix) {
        Some(b) => {
            *ix += 1;
            Ok(*b)
        }
        None => fail!("Unexpected end of stream reading u1 at index {}", *ix),
    }
}

fn read_u2(bytes: &[u8], ix: &mut usize) -> Result<u16, DexError>
{
    if bytes.len() < *ix + 2
    {
        fail!("Unexpected end of stream reading u2 at index {}", *ix);
    }
    let result = ((bytes[*ix] as u16) << 8) | (bytes[*ix + 1] as u16);
    *ix += 2;
    Ok(result)
}

fn read_u4(bytes: &[u8], ix: &mut usize) -> Result<u32, DexError>
{
    if bytes.len() < *ix + 4
    {
        fail!("Unexpected end of stream reading u4 at index {}", *ix);
    }
    let result = u32::from_be_bytes([bytes[*ix], bytes[*ix + 1], bytes[*ix + 2], bytes[*ix + 3]]);
    *ix += 4;
    Ok(result)
}

fn read_slice<'a>(bytes: &'a [u8], ix: &mut usize, length: usize) -> Result<&'a [u8], DexError>
{
    if *ix > bytes.len() || bytes.len() - *ix < length
    {
        fail!("Unexpected end of stream reading {} bytes at index {}", length, *ix);
    }
    let result = &bytes[*ix..*ix + length];
    *ix += length;
    Ok(result)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Constant
{
    Utf8(String),
    Class(u16),
    NameAndType { name: u16, descriptor: u16 },
    MemberRef { tag: u8, class: u16, name_and_type: u16 },
    MethodHandle { kind: u8, reference: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Other,
    // The second slot of a long or double
    Unusable,
}

/// A member reference as it appears in the constant pool, owner being an internal name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawRef
{
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

#[derive(Debug)]
pub struct ClassFile
{
    pub minor_version: u16,
    pub major_version: u16,
    pub access_flags: u16,
    pub this_class: String,
    /// (name, descriptor)
    pub fields: Vec<(String, String)>,
    pub methods: Vec<(String, String)>,
    /// Field accesses, invocations and bootstrap handles in encounter order.
    pub references: Vec<RawRef>,
}

struct ConstantPool(Vec<Constant>);

impl ConstantPool
{
    fn read(bytes: &[u8], ix: &mut usize) -> Result<ConstantPool, DexError>
    {
        let count = read_u2(bytes, ix)? as usize;
        let mut constants = Vec::with_capacity(count);
        constants.push(Constant::Unusable);
        while constants.len() < count
        {
            let index = constants.len();
            let tag = read_u1(bytes, ix)?;
            let constant = match tag
            {
                CONSTANT_UTF8 => {
                    let length = read_u2(bytes, ix)? as usize;
                    let raw = read_slice(bytes, ix, length)?;
                    match cesu8::from_java_cesu8(raw) {
                        Ok(s) => Constant::Utf8(s.into_owned()),
                        Err(_) => {
                            warn!("Invalid modified UTF-8 in constant pool entry {}", index);
                            Constant::Utf8(String::from_utf8_lossy(raw).into_owned())
                        }
                    }
                }
                CONSTANT_INTEGER | CONSTANT_FLOAT => {
                    read_u4(bytes, ix)?;
                    Constant::Other
                }
                CONSTANT_LONG | CONSTANT_DOUBLE => {
                    read_u4(bytes, ix)?;
                    read_u4(bytes, ix)?;
                    constants.push(Constant::Other);
                    Constant::Unusable
                }
                CONSTANT_CLASS => Constant::Class(read_u2(bytes, ix)?),
                CONSTANT_STRING | CONSTANT_METHOD_TYPE | CONSTANT_MODULE | CONSTANT_PACKAGE => {
                    read_u2(bytes, ix)?;
                    Constant::Other
                }
                CONSTANT_FIELDREF | CONSTANT_METHODREF | CONSTANT_INTERFACE_METHODREF => Constant::MemberRef {
                    tag,
                    class: read_u2(bytes, ix)?,
                    name_and_type: read_u2(bytes, ix)?,
                },
                CONSTANT_NAME_AND_TYPE => Constant::NameAndType {
                    name: read_u2(bytes, ix)?,
                    descriptor: read_u2(bytes, ix)?,
                },
                CONSTANT_METHOD_HANDLE => Constant::MethodHandle {
                    kind: read_u1(bytes, ix)?,
                    reference: read_u2(bytes, ix)?,
                },
                CONSTANT_DYNAMIC => {
                    read_u2(bytes, ix)?;
                    read_u2(bytes, ix)?;
                    Constant::Other
                }
                CONSTANT_INVOKE_DYNAMIC => Constant::InvokeDynamic {
                    bootstrap: read_u2(bytes, ix)?,
                    name_and_type: read_u2(bytes, ix)?,
                },
                _ => fail!("Unknown constant pool tag {} at entry {}", tag, index),
            };
            constants.push(constant);
        }
        // A long or double in the final slot pushes one entry too many
        constants.truncate(count.max(1));
        Ok(ConstantPool(constants))
    }

    fn get(&self, index: u16) -> Result<&Constant, DexError>
    {
        match self.0.get(index as usize) {
            Some(Constant::Unusable) | None => Err(err!("Invalid constant pool index {}", index)),
            Some(c) => Ok(c),
        }
    }

    fn utf8(&self, index: u16) -> Result<&str, DexError>
    {
        match self.get(index)? {
            Constant::Utf8(s) => Ok(s),
            other => Err(err!("Expected Utf8 at constant {} but found {:?}", index, other)),
        }
    }

    fn class_name(&self, index: u16) -> Result<&str, DexError>
    {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            other => Err(err!("Expected Class at constant {} but found {:?}", index, other)),
        }
    }

    fn name_and_type(&self, index: u16) -> Result<(&str, &str), DexError>
    {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => Ok((self.utf8(*name)?, self.utf8(*descriptor)?)),
            other => Err(err!("Expected NameAndType at constant {} but found {:?}", index, other)),
        }
    }

    fn member_ref(&self, index: u16) -> Result<RawRef, DexError>
    {
        match self.get(index)? {
            Constant::MemberRef { class, name_and_type, .. } => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok(RawRef {
                    owner: self.class_name(*class)?.to_string(),
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                })
            }
            other => Err(err!("Expected member reference at constant {} but found {:?}", index, other)),
        }
    }

    /// The reference kind and target of a method handle.
    fn method_handle(&self, index: u16) -> Result<(u8, RawRef), DexError>
    {
        match self.get(index)? {
            Constant::MethodHandle { kind, reference } => Ok((*kind, self.member_ref(*reference)?)),
            other => Err(err!("Expected MethodHandle at constant {} but found {:?}", index, other)),
        }
    }
}

struct BootstrapMethod
{
    handle: u16,
    arguments: Vec<u16>,
}

/// Instruction length at `pc`, including the opcode byte.
fn instruction_length(code: &[u8], pc: usize) -> Result<usize, DexError>
{
    let opcode = code[pc];
    let length = match opcode
    {
        0x00..=0x0f | 0x1a..=0x35 | 0x3b..=0x83 | 0x85..=0x98 | 0xac..=0xb1 | 0xbe | 0xbf | 0xc2 | 0xc3 | 0xca | 0xfe | 0xff => 1,
        0x10 | 0x12 | 0x15..=0x19 | 0x36..=0x3a | 0xa9 | 0xbc => 2,
        0x11 | 0x13 | 0x14 | 0x84 | 0x99..=0xa8 | 0xb2..=0xb8 | 0xbb | 0xbd | 0xc0 | 0xc1 | 0xc6 | 0xc7 => 3,
        0xc5 => 4,
        0xb9 | 0xba | 0xc8 | 0xc9 => 5,
        0xc4 => match code.get(pc + 1) {
            Some(0x84) => 6,
            Some(_) => 4,
            None => fail!("Truncated wide instruction at {}", pc),
        },
        0xaa | 0xab => {
            // Operands start on the next 4-byte boundary of the code array
            let mut ix = (pc + 4) & !3;
            let _default = read_u4(code, &mut ix)?;
            if opcode == 0xaa {
                let low = read_u4(code, &mut ix)? as i32;
                let high = read_u4(code, &mut ix)? as i32;
                if high < low {
                    fail!("Invalid tableswitch bounds {}..{} at {}", low, high, pc);
                }
                ix += ((high as i64 - low as i64 + 1) * 4) as usize;
            } else {
                let pairs = read_u4(code, &mut ix)? as usize;
                ix += pairs * 8;
            }
            ix - pc
        }
        _ => fail!("Unknown opcode {:#04x} at {}", opcode, pc),
    };
    Ok(length)
}

impl ClassFile
{
    pub fn from_bytes(bytes: &[u8]) -> Result<ClassFile, DexError>
    {
        let mut ix = 0;
        let magic = read_u4(bytes, &mut ix)?;
        if magic != CLASS_FILE_MAGIC
        {
            fail!("Invalid class file magic {:#010x}", magic);
        }
        let minor_version = read_u2(bytes, &mut ix)?;
        let major_version = read_u2(bytes, &mut ix)?;
        let pool = ConstantPool::read(bytes, &mut ix).map_err(|e| e.context("constant pool"))?;

        let access_flags = read_u2(bytes, &mut ix)?;
        let this_class = pool.class_name(read_u2(bytes, &mut ix)?)?.to_string();
        read_u2(bytes, &mut ix)?; // super_class
        let interfaces = read_u2(bytes, &mut ix)? as usize;
        ix += interfaces * 2;

        let mut fields = vec![];
        for _ in 0..read_u2(bytes, &mut ix)?
        {
            let (name, descriptor, _) = Self::read_member(bytes, &mut ix, &pool)?;
            fields.push((name, descriptor));
        }

        let mut methods = vec![];
        let mut code_blocks = vec![];
        for _ in 0..read_u2(bytes, &mut ix)?
        {
            let (name, descriptor, code) = Self::read_member(bytes, &mut ix, &pool)?;
            if let Some(code) = code {
                code_blocks.push((methods.len(), code));
            }
            methods.push((name, descriptor));
        }

        let mut bootstrap_methods = vec![];
        for _ in 0..read_u2(bytes, &mut ix)?
        {
            let name = pool.utf8(read_u2(bytes, &mut ix)?)?;
            let length = read_u4(bytes, &mut ix)? as usize;
            let data = read_slice(bytes, &mut ix, length)?;
            if name == "BootstrapMethods" {
                bootstrap_methods = Self::read_bootstrap_methods(data)?;
            }
        }

        let mut references = vec![];
        for (method_ix, code) in code_blocks
        {
            Self::scan_code(code, &pool, &bootstrap_methods, &mut references)
                .map_err(|e| e.context(format!("{}.{}{}", this_class, methods[method_ix].0, methods[method_ix].1)))?;
        }

        trace!("Read class {} (version {}.{}) with {} fields, {} methods and {} references",
            this_class, major_version, minor_version, fields.len(), methods.len(), references.len());

        Ok(ClassFile { minor_version, major_version, access_flags, this_class, fields, methods, references })
    }

    /// Reads a field_info or method_info, returning its code array when present.
    fn read_member<'a>(bytes: &'a [u8], ix: &mut usize, pool: &ConstantPool)
        -> Result<(String, String, Option<&'a [u8]>), DexError>
    {
        read_u2(bytes, ix)?; // access_flags
        let name = pool.utf8(read_u2(bytes, ix)?)?.to_string();
        let descriptor = pool.utf8(read_u2(bytes, ix)?)?.to_string();
        let mut code = None;
        for _ in 0..read_u2(bytes, ix)?
        {
            let attribute_name = pool.utf8(read_u2(bytes, ix)?)?;
            let length = read_u4(bytes, ix)? as usize;
            let data = read_slice(bytes, ix, length)?;
            if attribute_name == "Code"
            {
                let mut code_ix = 4; // max_stack, max_locals
                let code_length = read_u4(data, &mut code_ix)? as usize;
                code = Some(read_slice(data, &mut code_ix, code_length)?);
            }
        }
        Ok((name, descriptor, code))
    }

    fn read_bootstrap_methods(data: &[u8]) -> Result<Vec<BootstrapMethod>, DexError>
    {
        let mut ix = 0;
        let count = read_u2(data, &mut ix)?;
        let mut result = Vec::with_capacity(count as usize);
        for _ in 0..count
        {
            let handle = read_u2(data, &mut ix)?;
            let argument_count = read_u2(data, &mut ix)?;
            let mut arguments = Vec::with_capacity(argument_count as usize);
            for _ in 0..argument_count {
                arguments.push(read_u2(data, &mut ix)?);
            }
            result.push(BootstrapMethod { handle, arguments });
        }
        Ok(result)
    }

    fn scan_code(code: &[u8], pool: &ConstantPool, bootstrap_methods: &[BootstrapMethod], references: &mut Vec<RawRef>)
        -> Result<(), DexError>
    {
        let mut pc = 0;
        while pc < code.len()
        {
            let opcode = code[pc];
            let length = instruction_length(code, pc)?;
            if pc + length > code.len() {
                fail!("Instruction at {} runs past the end of the code", pc);
            }
            match opcode
            {
                // getstatic, putstatic, getfield, putfield, invokevirtual, invokespecial,
                // invokestatic, invokeinterface
                0xb2..=0xb9 => {
                    let index = ((code[pc + 1] as u16) << 8) | code[pc + 2] as u16;
                    references.push(pool.member_ref(index)?);
                }
                // invokedynamic
                0xba => {
                    let index = ((code[pc + 1] as u16) << 8) | code[pc + 2] as u16;
                    let bootstrap = match pool.get(index)? {
                        Constant::InvokeDynamic { bootstrap, .. } => *bootstrap as usize,
                        other => fail!("Expected InvokeDynamic at constant {} but found {:?}", index, other),
                    };
                    let method = match bootstrap_methods.get(bootstrap) {
                        Some(m) => m,
                        None => fail!("Missing bootstrap method {}", bootstrap),
                    };
                    let (kind, handle) = pool.method_handle(method.handle)?;
                    let is_metafactory = kind == REF_INVOKE_STATIC
                        && handle.owner == LAMBDA_METAFACTORY_OWNER
                        && handle.name == LAMBDA_METAFACTORY_NAME
                        && handle.descriptor == LAMBDA_METAFACTORY_DESCRIPTOR;
                    references.push(handle);
                    if is_metafactory
                    {
                        // The second static argument is the lambda body
                        let implementation = match method.arguments.get(1) {
                            Some(i) => *i,
                            None => fail!("LambdaMetafactory bootstrap without an implementation handle"),
                        };
                        references.push(pool.method_handle(implementation)?.1);
                    }
                }
                _ => {}
            }
            pc += length;
        }
        Ok(())
    }
}
