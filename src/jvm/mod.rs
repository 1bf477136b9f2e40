pub mod class_file;

use crate::error::{ArtifactContext, Result};
use crate::jvm::class_file::{ClassFile, RawRef};
use crate::types::{Field, Member, Method, TypeDescriptor};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// One decoded `.class` file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Class
{
    pub descriptor: TypeDescriptor,
    /// Major class file version, e.g. 52 for Java 8.
    pub bytecode_version: u16,
    /// Sorted.
    pub declared_members: Vec<Member>,
    /// Sorted and deduplicated. May still contain members of this class.
    pub referenced_members: Vec<Member>,
}

impl Class
{
    pub fn from_bytes(name: &str, bytes: &[u8]) -> Result<Class>
    {
        Class::decode(bytes).in_artifact(name)
    }

    fn decode(bytes: &[u8]) -> Result<Class>
    {
        let class_file = ClassFile::from_bytes(bytes)?;
        let descriptor = owner_type(&class_file.this_class)?;

        let mut declared_members = Vec::with_capacity(class_file.fields.len() + class_file.methods.len());
        for (name, field_type) in &class_file.fields
        {
            declared_members.push(Member::Field(Field::new(descriptor.clone(), name.as_str(), TypeDescriptor::new(field_type.as_str())?)));
        }
        for (name, method_descriptor) in &class_file.methods
        {
            declared_members.push(Member::Method(Method::from_descriptor(descriptor.clone(), name, method_descriptor)?));
        }
        declared_members.sort();

        let referenced_members = class_file.references
            .iter()
            .map(member_of)
            .collect::<Result<BTreeSet<_>>>()?
            .into_iter()
            .collect();

        Ok(Class { descriptor, bytecode_version: class_file.major_version, declared_members, referenced_members })
    }
}

/// Internal names of array classes are already descriptors.
fn owner_type(owner: &str) -> Result<TypeDescriptor>
{
    if owner.starts_with('[') { TypeDescriptor::new(owner) }
    else { TypeDescriptor::new(format!("L{};", owner)) }
}

fn member_of(reference: &RawRef) -> Result<Member>
{
    let owner = owner_type(&reference.owner)?;
    if reference.descriptor.starts_with('(')
    {
        Ok(Member::Method(Method::from_descriptor(owner, &reference.name, &reference.descriptor)?))
    }
    else
    {
        Ok(Member::Field(Field::new(owner, reference.name.as_str(), TypeDescriptor::new(reference.descriptor.as_str())?)))
    }
}

/// Converts class files into DEX, the job of D8 or dx.
///
/// Implementations receive every class of a jar and return the DEX files produced.
pub trait DexCompiler
{
    fn compile(&self, classes: &[Vec<u8>], min_api: u32, libraries: &[PathBuf]) -> Result<Vec<Vec<u8>>>;
}
