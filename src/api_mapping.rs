/* ProGuard / R8 mapping files, used to turn obfuscated members back into their original names. */

use crate::error::{DiffuseError, Result};
use crate::types::{Field, Member, Method, TypeDescriptor};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashMap;

static TYPE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+?) -> (.+?):$").unwrap());
static MEMBER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+(?:\d+:\d+:)?(.+?) (.+?)(\(.*?\))?(?::\d+:\d+)? -> (.+)$").unwrap()
});

/// Methods are looked up by their deobfuscated types and obfuscated name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct MethodSignature {
    return_type: TypeDescriptor,
    name: String,
    parameter_types: Vec<TypeDescriptor>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct TypeMapping {
    original: TypeDescriptor,
    fields: HashMap<String, String>,
    methods: HashMap<MethodSignature, String>,
}

impl TypeMapping {
    fn new(original: TypeDescriptor) -> TypeMapping {
        TypeMapping { original, fields: HashMap::new(), methods: HashMap::new() }
    }
}

/// Obfuscated type descriptor to original type, field names and method names.
///
/// Lookups that hit nothing borrow their input back so callers can tell a pass-through
/// apart from a rewrite.
///
/// # Examples
///
/// ```
///  use diffuse::api_mapping::ApiMapping;
///  use diffuse::types::TypeDescriptor;
///
///  let mapping = ApiMapping::parse("com.example.Foo -> a.a:\n").unwrap();
///  let obfuscated = TypeDescriptor::new("[La/a;").unwrap();
///  assert_eq!(mapping.type_descriptor(&obfuscated).source_name(), "com.example.Foo[]");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApiMapping {
    types: HashMap<TypeDescriptor, TypeMapping>,
}

impl ApiMapping {
    pub fn empty() -> ApiMapping {
        ApiMapping::default()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn types(&self) -> usize {
        self.types.len()
    }

    pub fn methods(&self) -> usize {
        self.types.values().map(|t| t.methods.len()).sum()
    }

    pub fn fields(&self) -> usize {
        self.types.values().map(|t| t.fields.len()).sum()
    }

    /// Parses the text format written by ProGuard and R8. `#` comments and blank lines are skipped.
    pub fn parse(text: &str) -> Result<ApiMapping> {
        let mut types = HashMap::new();
        let mut current: Option<(TypeDescriptor, TypeMapping)> = None;

        for (index, line) in text.split('\n').enumerate() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            let malformed = || DiffuseError::Mapping { line: index + 1, text: line.to_string() };

            if line.starts_with(|c: char| c.is_whitespace()) {
                let captures = MEMBER_LINE.captures(line).ok_or_else(malformed)?;
                let (_, mapping) = current.as_mut().ok_or_else(malformed)?;
                let member_type = &captures[1];
                let original_name = &captures[2];
                let obfuscated_name = &captures[4];

                match captures.get(3) {
                    Some(parameters) => {
                        let parameters = &parameters.as_str()[1..parameters.as_str().len() - 1];
                        let parameter_types = if parameters.is_empty() {
                            vec![]
                        } else {
                            parameters
                                .split(',')
                                .map(TypeDescriptor::from_human_name)
                                .collect::<Result<Vec<_>>>()
                                .map_err(|_| malformed())?
                        };
                        let signature = MethodSignature {
                            return_type: TypeDescriptor::from_human_name(member_type).map_err(|_| malformed())?,
                            name: obfuscated_name.to_string(),
                            parameter_types,
                        };
                        mapping.methods.insert(signature, original_name.to_string());
                    }
                    None => {
                        mapping.fields.insert(obfuscated_name.to_string(), original_name.to_string());
                    }
                }
            } else {
                let captures = TYPE_LINE.captures(line).ok_or_else(malformed)?;
                let original = TypeDescriptor::from_human_name(&captures[1]).map_err(|_| malformed())?;
                let obfuscated = TypeDescriptor::from_human_name(&captures[2]).map_err(|_| malformed())?;
                if let Some((key, mapping)) = current.replace((obfuscated, TypeMapping::new(original))) {
                    types.insert(key, mapping);
                }
            }
        }
        if let Some((key, mapping)) = current {
            types.insert(key, mapping);
        }

        let mapping = ApiMapping { types };
        debug!(
            "Parsed mapping with {} types, {} methods and {} fields",
            mapping.types(),
            mapping.methods(),
            mapping.fields()
        );
        Ok(mapping)
    }

    /// The original type, keeping array arity, or `ty` itself when unmapped.
    pub fn type_descriptor<'a>(&self, ty: &'a TypeDescriptor) -> Cow<'a, TypeDescriptor> {
        match self.types.get(&ty.component_descriptor()) {
            Some(mapping) => Cow::Owned(mapping.original.as_array(ty.array_arity())),
            None => Cow::Borrowed(ty),
        }
    }

    pub fn member<'a>(&self, member: &'a Member) -> Cow<'a, Member> {
        match member {
            Member::Field(f) => match self.field(f) {
                Cow::Borrowed(_) => Cow::Borrowed(member),
                Cow::Owned(f) => Cow::Owned(Member::Field(f)),
            },
            Member::Method(m) => match self.method(m) {
                Cow::Borrowed(_) => Cow::Borrowed(member),
                Cow::Owned(m) => Cow::Owned(Member::Method(m)),
            },
        }
    }

    /// Only fields of mapped declaring types are rewritten.
    pub fn field<'a>(&self, field: &'a Field) -> Cow<'a, Field> {
        let declaring = match self.types.get(&field.declaring_type.component_descriptor()) {
            Some(mapping) => mapping,
            None => return Cow::Borrowed(field),
        };
        let name = declaring.fields.get(&field.name).unwrap_or(&field.name);
        Cow::Owned(Field::new(
            declaring.original.as_array(field.declaring_type.array_arity()),
            name.clone(),
            self.type_descriptor(&field.field_type).into_owned(),
        ))
    }

    pub fn method<'a>(&self, method: &'a Method) -> Cow<'a, Method> {
        let declaring = match self.types.get(&method.declaring_type.component_descriptor()) {
            Some(mapping) => mapping,
            None => return Cow::Borrowed(method),
        };
        let signature = MethodSignature {
            return_type: self.type_descriptor(&method.return_type).into_owned(),
            name: method.name.clone(),
            parameter_types: method
                .parameter_types
                .iter()
                .map(|p| self.type_descriptor(p).into_owned())
                .collect(),
        };
        let name = declaring.methods.get(&signature).unwrap_or(&method.name).clone();
        let MethodSignature { return_type, parameter_types, .. } = signature;
        Cow::Owned(Method::new(
            declaring.original.as_array(method.declaring_type.array_arity()),
            name,
            parameter_types,
            return_type,
        ))
    }
}
