use crate::api_mapping::ApiMapping;
use crate::artifact::Jar;
use crate::diff::ComponentDiff;
use crate::types::{Field, Member, Method, TypeDescriptor};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JarsDiff {
    pub classes: ComponentDiff<TypeDescriptor>,
    pub methods: ComponentDiff<Method>,
    pub declared_methods: ComponentDiff<Method>,
    pub referenced_methods: ComponentDiff<Method>,
    pub fields: ComponentDiff<Field>,
    pub declared_fields: ComponentDiff<Field>,
    pub referenced_fields: ComponentDiff<Field>,
}

/// One jar seen through a mapping.
struct MappedJar {
    classes: Vec<TypeDescriptor>,
    declared: Vec<Member>,
    referenced: Vec<Member>,
}

impl MappedJar {
    fn new(jar: &Jar, mapping: &ApiMapping) -> MappedJar {
        let map_members = |members: &[Member]| -> Vec<Member> { members.iter().map(|m| mapping.member(m).into_owned()).collect() };
        MappedJar {
            classes: jar.classes.iter().map(|c| mapping.type_descriptor(&c.descriptor).into_owned()).collect(),
            declared: map_members(&jar.declared_members),
            referenced: map_members(&jar.referenced_members),
        }
    }

    fn methods<'a>(members: impl Iterator<Item = &'a Member>) -> Vec<Method> {
        members.filter_map(Member::as_method).cloned().collect()
    }

    fn fields<'a>(members: impl Iterator<Item = &'a Member>) -> Vec<Field> {
        members.filter_map(Member::as_field).cloned().collect()
    }

    fn members(&self) -> impl Iterator<Item = &Member> {
        self.declared.iter().chain(self.referenced.iter())
    }
}

impl JarsDiff {
    pub fn new(old: &[&Jar], old_mapping: &ApiMapping, new: &[&Jar], new_mapping: &ApiMapping) -> JarsDiff {
        let old: Vec<MappedJar> = old.iter().map(|jar| MappedJar::new(jar, old_mapping)).collect();
        let new: Vec<MappedJar> = new.iter().map(|jar| MappedJar::new(jar, new_mapping)).collect();

        fn diff<T: Ord + Clone>(old: &[MappedJar], new: &[MappedJar], selector: impl Fn(&MappedJar) -> Vec<T>) -> ComponentDiff<T> {
            ComponentDiff::from_groups(old.iter().map(&selector), new.iter().map(&selector))
        }

        JarsDiff {
            classes: diff(&old, &new, |jar| jar.classes.clone()),
            methods: diff(&old, &new, |jar| MappedJar::methods(jar.members())),
            declared_methods: diff(&old, &new, |jar| MappedJar::methods(jar.declared.iter())),
            referenced_methods: diff(&old, &new, |jar| MappedJar::methods(jar.referenced.iter())),
            fields: diff(&old, &new, |jar| MappedJar::fields(jar.members())),
            declared_fields: diff(&old, &new, |jar| MappedJar::fields(jar.declared.iter())),
            referenced_fields: diff(&old, &new, |jar| MappedJar::fields(jar.referenced.iter())),
        }
    }

    pub fn changed(&self) -> bool {
        self.methods.changed() || self.fields.changed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{ClassBuilder, ZipBuilder};

    fn jar(classes: &[(&str, &[&str])]) -> Jar {
        let mut zip = ZipBuilder::new();
        for (name, methods) in classes {
            let mut class = ClassBuilder::new(name, 52);
            for method in methods.iter() {
                class = class.method(method, "()V", |code| {
                    code.invokevirtual("java/lang/Object", "hashCode", "()I");
                    code.return_void();
                });
            }
            zip = zip.deflated(&format!("{}.class", name), &class.build());
        }
        Jar::from_bytes("lib.jar", zip.build()).unwrap()
    }

    fn td(raw: &str) -> TypeDescriptor {
        TypeDescriptor::new(raw).unwrap()
    }

    #[test]
    fn test_declared_methods() {
        let old = jar(&[("a/A", &["run", "stop"])]);
        let new = jar(&[("a/A", &["run"]), ("a/B", &["go"])]);
        let diff = JarsDiff::new(&[&old], &ApiMapping::empty(), &[&new], &ApiMapping::empty());

        assert_eq!(diff.classes.added, vec![td("La/B;")]);
        assert_eq!(diff.declared_methods.added, vec![Method::new(td("La/B;"), "go", vec![], td("V"))]);
        assert_eq!(diff.declared_methods.removed, vec![Method::new(td("La/A;"), "stop", vec![], td("V"))]);
        assert!(!diff.referenced_methods.changed());
        assert_eq!(diff.methods.old_count, 3);
        assert!(diff.changed());
        assert!(!diff.fields.changed());
    }

    #[test]
    fn test_mapping() {
        let old = jar(&[("a/a", &["a"])]);
        let new = jar(&[("com/example/Foo", &["run"])]);
        let mapping = ApiMapping::parse("com.example.Foo -> a.a:\n    void run() -> a\n").unwrap();
        let diff = JarsDiff::new(&[&old], &mapping, &[&new], &ApiMapping::empty());
        assert!(!diff.classes.changed());
        assert!(!diff.changed());
    }
}
