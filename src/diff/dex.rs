use crate::api_mapping::ApiMapping;
use crate::dex::Dex;
use crate::diff::{component_diff, ComponentDiff};
use crate::types::{Field, Member, Method, TypeDescriptor};
use serde::Serialize;
use std::borrow::Cow;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DexDiff {
    pub old_dex_count: usize,
    pub new_dex_count: usize,
    pub strings: ComponentDiff<String>,
    pub types: ComponentDiff<TypeDescriptor>,
    pub classes: ComponentDiff<TypeDescriptor>,
    pub methods: ComponentDiff<Method>,
    pub declared_methods: ComponentDiff<Method>,
    pub referenced_methods: ComponentDiff<Method>,
    pub fields: ComponentDiff<Field>,
    pub declared_fields: ComponentDiff<Field>,
    pub referenced_fields: ComponentDiff<Field>,
}

fn methods(members: &[Member]) -> Vec<Method> {
    members.iter().filter_map(Member::as_method).cloned().collect()
}

fn fields(members: &[Member]) -> Vec<Field> {
    members.iter().filter_map(Member::as_field).cloned().collect()
}

impl DexDiff {
    /// Each side is deobfuscated with its own mapping first.
    pub fn new(old: &[Dex], old_mapping: &ApiMapping, new: &[Dex], new_mapping: &ApiMapping) -> DexDiff {
        let old: Vec<Cow<Dex>> = old.iter().map(|dex| dex.with_mapping(old_mapping)).collect();
        let new: Vec<Cow<Dex>> = new.iter().map(|dex| dex.with_mapping(new_mapping)).collect();

        DexDiff {
            old_dex_count: old.len(),
            new_dex_count: new.len(),
            strings: component_diff(&old, &new, |dex| dex.strings.clone()),
            types: component_diff(&old, &new, |dex| dex.types.clone()),
            classes: component_diff(&old, &new, |dex| dex.classes.clone()),
            methods: component_diff(&old, &new, |dex| methods(&dex.members)),
            declared_methods: component_diff(&old, &new, |dex| methods(&dex.declared_members)),
            referenced_methods: component_diff(&old, &new, |dex| methods(&dex.referenced_members)),
            fields: component_diff(&old, &new, |dex| fields(&dex.members)),
            declared_fields: component_diff(&old, &new, |dex| fields(&dex.declared_members)),
            referenced_fields: component_diff(&old, &new, |dex| fields(&dex.referenced_members)),
        }
    }

    pub fn is_multidex(&self) -> bool {
        self.old_dex_count > 1 || self.new_dex_count > 1
    }

    pub fn changed(&self) -> bool {
        self.strings.changed() || self.types.changed() || self.methods.changed() || self.fields.changed()
    }
}
