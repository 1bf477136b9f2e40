/* Value types shared by every decoder: type descriptors, members and sizes. */
/* Descriptors are kept in their raw JVM/DEX form e.g. [Ljava/lang/Object; */

use crate::error::{DiffuseError, Result};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::one_of;
use nom::combinator::{all_consuming, recognize};
use nom::multi::{many0, many0_count};
use nom::sequence::{delimited, pair, tuple};
use nom::IResult;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Neg, Sub};

pub(crate) fn parse_descriptor(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        many0_count(tag("[")),
        alt((
            recognize(one_of("BCDFIJSVZ")),
            recognize(delimited(tag("L"), take_while1(|c: char| c != ';'), tag(";"))),
        )),
    ))(input)
}

fn parse_method_descriptor(input: &str) -> IResult<&str, (Vec<&str>, &str)> {
    let (rest, (_, parameters, _, return_type)) =
        tuple((tag("("), many0(parse_descriptor), tag(")"), parse_descriptor))(input)?;
    Ok((rest, (parameters, return_type)))
}

/// A JVM/DEX type descriptor such as `I`, `Ljava/lang/String;` or `[[Lfoo/Bar;`.
///
/// # Examples
///
/// ```
///  use diffuse::types::TypeDescriptor;
///
///  let t = TypeDescriptor::new("[Ljava/lang/String;").unwrap();
///  assert_eq!(t.source_name(), "java.lang.String[]");
///  assert_eq!(t.simple_name(), "String[]");
///  assert_eq!(t.array_arity(), 1);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TypeDescriptor(String);

impl TypeDescriptor {
    /// Validates `raw` against the descriptor grammar.
    pub fn new(raw: impl Into<String>) -> Result<TypeDescriptor> {
        let raw = raw.into();
        let valid = all_consuming(parse_descriptor)(raw.as_str()).is_ok();
        if valid {
            Ok(TypeDescriptor(raw))
        } else {
            Err(DiffuseError::UnknownDescriptor(raw))
        }
    }

    /// Inverse of [`TypeDescriptor::source_name`], e.g. `int[][]` or `com.example.Foo`.
    pub fn from_human_name(name: &str) -> Result<TypeDescriptor> {
        let component = name.trim_end_matches(|c| c == '[' || c == ']');
        let arity = (name.len() - component.len()) / 2;
        let descriptor = match component {
            "void" => "V".to_string(),
            "boolean" => "Z".to_string(),
            "byte" => "B".to_string(),
            "char" => "C".to_string(),
            "double" => "D".to_string(),
            "float" => "F".to_string(),
            "int" => "I".to_string(),
            "long" => "J".to_string(),
            "short" => "S".to_string(),
            _ => format!("L{};", component.replace('.', "/")),
        };
        Ok(TypeDescriptor::new(descriptor)?.as_array(arity))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn array_arity(&self) -> usize {
        self.0.bytes().take_while(|b| *b == b'[').count()
    }

    pub fn component_descriptor(&self) -> TypeDescriptor {
        TypeDescriptor(self.0[self.array_arity()..].to_string())
    }

    pub fn as_array(&self, arity: usize) -> TypeDescriptor {
        let mut raw = "[".repeat(arity);
        raw.push_str(&self.0);
        TypeDescriptor(raw)
    }

    pub fn is_void(&self) -> bool {
        self.0 == "V"
    }

    pub fn source_name(&self) -> String {
        let arity = self.array_arity();
        let component = &self.0[arity..];
        let mut name = match component {
            "B" => "byte".to_string(),
            "C" => "char".to_string(),
            "D" => "double".to_string(),
            "F" => "float".to_string(),
            "I" => "int".to_string(),
            "J" => "long".to_string(),
            "S" => "short".to_string(),
            "V" => "void".to_string(),
            "Z" => "boolean".to_string(),
            object => object
                .strip_prefix('L')
                .and_then(|o| o.strip_suffix(';'))
                .unwrap_or(object)
                .replace('/', "."),
        };
        for _ in 0..arity {
            name.push_str("[]");
        }
        name
    }

    pub fn simple_name(&self) -> String {
        let source_name = self.source_name();
        match source_name.rfind('.') {
            Some(ix) => source_name[ix + 1..].to_string(),
            None => source_name,
        }
    }
}

impl Ord for TypeDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.source_name()
            .cmp(&other.source_name())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for TypeDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.source_name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Field {
    pub declaring_type: TypeDescriptor,
    pub name: String,
    pub field_type: TypeDescriptor,
}

impl Field {
    pub fn new(declaring_type: TypeDescriptor, name: impl Into<String>, field_type: TypeDescriptor) -> Field {
        Field { declaring_type, name: name.into(), field_type }
    }
}

impl Ord for Field {
    fn cmp(&self, other: &Self) -> Ordering {
        self.declaring_type
            .cmp(&other.declaring_type)
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.field_type.cmp(&other.field_type))
    }
}

impl PartialOrd for Field {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}: {}", self.declaring_type.source_name(), self.name, self.field_type.simple_name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Method {
    pub declaring_type: TypeDescriptor,
    pub name: String,
    pub parameter_types: Vec<TypeDescriptor>,
    pub return_type: TypeDescriptor,
}

impl Method {
    pub fn new(
        declaring_type: TypeDescriptor,
        name: impl Into<String>,
        parameter_types: Vec<TypeDescriptor>,
        return_type: TypeDescriptor,
    ) -> Method {
        Method { declaring_type, name: name.into(), parameter_types, return_type }
    }

    /// Builds a method from a JVM method descriptor such as `(I[Ljava/lang/String;)V`.
    pub fn from_descriptor(declaring_type: TypeDescriptor, name: &str, descriptor: &str) -> Result<Method> {
        let parsed = all_consuming(parse_method_descriptor)(descriptor)
            .map(|(_, parsed)| parsed)
            .map_err(|_| DiffuseError::UnknownDescriptor(descriptor.to_string()))?;
        let (parameters, return_type) = parsed;
        Ok(Method {
            declaring_type,
            name: name.to_string(),
            parameter_types: parameters.into_iter().map(|p| TypeDescriptor(p.to_string())).collect(),
            return_type: TypeDescriptor(return_type.to_string()),
        })
    }
}

impl Ord for Method {
    fn cmp(&self, other: &Self) -> Ordering {
        self.declaring_type
            .cmp(&other.declaring_type)
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.parameter_types.cmp(&other.parameter_types))
            .then_with(|| self.return_type.cmp(&other.return_type))
    }
}

impl PartialOrd for Method {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}(", self.declaring_type.source_name(), self.name)?;
        for (ix, parameter) in self.parameter_types.iter().enumerate() {
            if ix > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", parameter.simple_name())?;
        }
        write!(f, ")")?;
        if !self.return_type.is_void() {
            write!(f, " → {}", self.return_type.simple_name())?;
        }
        Ok(())
    }
}

/// A field or method, either declared by or referenced from a dex or class file.
///
/// Members order by declaring type first, with methods ahead of fields of the same type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Member {
    Method(Method),
    Field(Field),
}

impl Member {
    pub fn declaring_type(&self) -> &TypeDescriptor {
        match self {
            Member::Method(m) => &m.declaring_type,
            Member::Field(f) => &f.declaring_type,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Member::Method(m) => &m.name,
            Member::Field(f) => &f.name,
        }
    }

    pub fn as_method(&self) -> Option<&Method> {
        match self {
            Member::Method(m) => Some(m),
            Member::Field(_) => None,
        }
    }

    pub fn as_field(&self) -> Option<&Field> {
        match self {
            Member::Field(f) => Some(f),
            Member::Method(_) => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Member::Method(_) => 0,
            Member::Field(_) => 1,
        }
    }
}

impl Ord for Member {
    fn cmp(&self, other: &Self) -> Ordering {
        self.declaring_type()
            .cmp(other.declaring_type())
            .then_with(|| self.rank().cmp(&other.rank()))
            .then_with(|| match (self, other) {
                (Member::Method(a), Member::Method(b)) => a.cmp(b),
                (Member::Field(a), Member::Field(b)) => a.cmp(b),
                _ => Ordering::Equal,
            })
    }
}

impl PartialOrd for Member {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Member::Method(m) => m.fmt(f),
            Member::Field(field) => field.fmt(f),
        }
    }
}

impl From<Method> for Member {
    fn from(value: Method) -> Self {
        Member::Method(value)
    }
}

impl From<Field> for Member {
    fn from(value: Field) -> Self {
        Member::Field(value)
    }
}

/// A signed byte count. Negative values show up as diff deltas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Size(i64);

impl Size {
    pub const ZERO: Size = Size(0);

    pub const fn new(bytes: i64) -> Size {
        Size(bytes)
    }

    pub fn bytes(self) -> i64 {
        self.0
    }

    pub fn abs(self) -> Size {
        Size(self.0.abs())
    }
}

impl Add for Size {
    type Output = Size;

    fn add(self, rhs: Size) -> Size {
        Size(self.0 + rhs.0)
    }
}

impl Sub for Size {
    type Output = Size;

    fn sub(self, rhs: Size) -> Size {
        Size(self.0 - rhs.0)
    }
}

impl Neg for Size {
    type Output = Size;

    fn neg(self) -> Size {
        Size(-self.0)
    }
}

impl Sum for Size {
    fn sum<I: Iterator<Item = Size>>(iter: I) -> Size {
        iter.fold(Size::ZERO, Add::add)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        if magnitude < 1024 {
            return write!(f, "{sign}{magnitude} B");
        }
        let mut count = magnitude as f64;
        let mut unit = 0;
        while count >= 1024.0 && unit < UNITS.len() - 1 {
            count /= 1024.0;
            unit += 1;
        }
        let rounded = (count * 10.0).round() / 10.0;
        if rounded.fract() == 0.0 {
            write!(f, "{sign}{} {}", rounded as u64, UNITS[unit])
        } else {
            write!(f, "{sign}{:.1} {}", rounded, UNITS[unit])
        }
    }
}
