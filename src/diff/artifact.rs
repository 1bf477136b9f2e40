use crate::api_mapping::ApiMapping;
use crate::artifact::{Aab, AabModule, Aar, Apk, Jar};
use crate::diff::archive::ArchiveFilesDiff;
use crate::diff::arsc::ArscDiff;
use crate::diff::dex::DexDiff;
use crate::diff::jars::JarsDiff;
use crate::diff::lint::{self, Notice};
use crate::diff::manifest::ManifestDiff;
use crate::diff::signatures::SignaturesDiff;
use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApkDiff {
    pub archive: ArchiveFilesDiff,
    pub signatures: SignaturesDiff,
    pub dex: DexDiff,
    pub arsc: ArscDiff,
    pub manifest: ManifestDiff,
    /// Sorted.
    pub lint_messages: Vec<Notice>,
}

impl ApkDiff {
    pub fn new(old: &Apk, old_mapping: &ApiMapping, new: &Apk, new_mapping: &ApiMapping) -> ApkDiff {
        let archive = ArchiveFilesDiff::new(&old.files, &new.files, true);
        let mut lint_messages: Vec<Notice> = lint::resources_arsc_compression(&archive).into_iter().collect();
        lint_messages.sort();

        let diff = ApkDiff {
            signatures: SignaturesDiff::new(&old.signatures, &new.signatures),
            dex: DexDiff::new(&old.dexes, old_mapping, &new.dexes, new_mapping),
            arsc: ArscDiff::new(&old.arsc, &new.arsc),
            manifest: ManifestDiff::new(&old.manifest, &new.manifest),
            archive,
            lint_messages,
        };
        debug!("Compared {} with {}: {} file changes", old.filename, new.filename, diff.archive.changes.len());
        diff
    }

    pub fn changed(&self) -> bool {
        self.archive.changed() || self.signatures.changed() || self.dex.changed() || self.arsc.changed() || self.manifest.changed()
    }
}

/// One bundle module on both sides. DEX code is deobfuscated with each bundle's own mapping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModuleDiff {
    pub archive: ArchiveFilesDiff,
    pub dex: DexDiff,
    pub manifest: ManifestDiff,
}

impl ModuleDiff {
    fn new(old: &AabModule, old_mapping: &ApiMapping, new: &AabModule, new_mapping: &ApiMapping) -> ModuleDiff {
        ModuleDiff {
            archive: ArchiveFilesDiff::new(&old.files, &new.files, false),
            dex: DexDiff::new(&old.dexes, old_mapping, &new.dexes, new_mapping),
            manifest: ManifestDiff::new(&old.manifest, &new.manifest),
        }
    }

    pub fn changed(&self) -> bool {
        self.archive.changed() || self.dex.changed() || self.manifest.changed()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AabDiff {
    pub base: ModuleDiff,
    /// Every feature module on either side, sorted.
    pub feature_module_names: Vec<String>,
    pub added_feature_modules: Vec<String>,
    pub removed_feature_modules: Vec<String>,
    /// Modules present on both sides, whether or not they changed.
    pub changed_feature_modules: BTreeMap<String, ModuleDiff>,
}

impl AabDiff {
    pub fn new(old: &Aab, new: &Aab) -> AabDiff {
        let names: BTreeSet<&String> = old.features.keys().chain(new.features.keys()).collect();
        let mut added_feature_modules = Vec::new();
        let mut removed_feature_modules = Vec::new();
        let mut changed_feature_modules = BTreeMap::new();
        for name in &names {
            match (old.features.get(*name), new.features.get(*name)) {
                (Some(old_module), Some(new_module)) => {
                    let diff = ModuleDiff::new(old_module, &old.api_mapping, new_module, &new.api_mapping);
                    changed_feature_modules.insert(name.to_string(), diff);
                }
                (None, Some(_)) => added_feature_modules.push(name.to_string()),
                (Some(_), None) => removed_feature_modules.push(name.to_string()),
                (None, None) => {}
            }
        }

        AabDiff {
            base: ModuleDiff::new(&old.base, &old.api_mapping, &new.base, &new.api_mapping),
            feature_module_names: names.into_iter().cloned().collect(),
            added_feature_modules,
            removed_feature_modules,
            changed_feature_modules,
        }
    }

    pub fn changed(&self) -> bool {
        self.base.changed()
            || !self.added_feature_modules.is_empty()
            || !self.removed_feature_modules.is_empty()
            || self.changed_feature_modules.values().any(ModuleDiff::changed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AarDiff {
    pub archive: ArchiveFilesDiff,
    pub jars: JarsDiff,
    pub manifest: ManifestDiff,
}

impl AarDiff {
    pub fn new(old: &Aar, old_mapping: &ApiMapping, new: &Aar, new_mapping: &ApiMapping) -> AarDiff {
        AarDiff {
            archive: ArchiveFilesDiff::new(&old.files, &new.files, false),
            jars: JarsDiff::new(&old.jars(), old_mapping, &new.jars(), new_mapping),
            manifest: ManifestDiff::new(&old.manifest, &new.manifest),
        }
    }

    pub fn changed(&self) -> bool {
        self.archive.changed() || self.jars.changed() || self.manifest.changed()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JarDiff {
    pub archive: ArchiveFilesDiff,
    pub jars: JarsDiff,
}

impl JarDiff {
    pub fn new(old: &Jar, old_mapping: &ApiMapping, new: &Jar, new_mapping: &ApiMapping) -> JarDiff {
        JarDiff {
            archive: ArchiveFilesDiff::new(&old.files, &new.files, false),
            jars: JarsDiff::new(&[old], old_mapping, &[new], new_mapping),
        }
    }

    pub fn changed(&self) -> bool {
        self.jars.changed() || self.archive.changed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::lint::NoticeKind;
    use crate::tests::{sample_aab, sample_aar, sample_apk, sample_apk_with};

    #[test]
    fn test_apk_diff() {
        let old = Apk::from_bytes("old.apk", sample_apk("1")).unwrap();
        let new = Apk::from_bytes("new.apk", sample_apk("2")).unwrap();
        let diff = ApkDiff::new(&old, &ApiMapping::empty(), &new, &ApiMapping::empty());
        assert!(diff.manifest.parsed_properties_changed);
        assert!(diff.changed());
        assert!(!diff.dex.changed());
        assert!(diff.dex.is_multidex());
        assert!(!diff.arsc.changed());
        assert!(!diff.signatures.changed());
        assert!(diff.lint_messages.is_empty());

        let same = ApkDiff::new(&old, &ApiMapping::empty(), &old, &ApiMapping::empty());
        assert!(!same.changed());
    }

    #[test]
    fn test_apk_lint() {
        let old = Apk::from_bytes("old.apk", sample_apk("1")).unwrap();
        let new = Apk::from_bytes("new.apk", sample_apk_with("1", true)).unwrap();
        let diff = ApkDiff::new(&old, &ApiMapping::empty(), &new, &ApiMapping::empty());
        assert_eq!(diff.lint_messages.len(), 1);
        assert_eq!(diff.lint_messages[0].kind, NoticeKind::Warning);
    }

    #[test]
    fn test_aab_diff() {
        let old = Aab::from_bytes("old.aab", sample_aab("1", &["camera", "maps"], false)).unwrap();
        let new = Aab::from_bytes("new.aab", sample_aab("1", &["camera", "video"], false)).unwrap();
        let diff = AabDiff::new(&old, &new);
        assert_eq!(diff.feature_module_names, vec!["camera", "maps", "video"]);
        assert_eq!(diff.added_feature_modules, vec!["video"]);
        assert_eq!(diff.removed_feature_modules, vec!["maps"]);
        assert_eq!(diff.changed_feature_modules.keys().collect::<Vec<_>>(), vec!["camera"]);
        assert!(!diff.changed_feature_modules["camera"].changed());
        assert!(!diff.base.changed());
        assert!(diff.changed());
    }

    #[test]
    fn test_aar_diff() {
        let old = Aar::from_bytes("old.aar", sample_aar("1", &[])).unwrap();
        let new = Aar::from_bytes("new.aar", sample_aar("1", &["extra"])).unwrap();
        let diff = AarDiff::new(&old, &ApiMapping::empty(), &new, &ApiMapping::empty());
        assert_eq!(diff.jars.declared_methods.added.len(), 1);
        assert_eq!(diff.jars.declared_methods.added[0].name, "extra");
        assert!(!diff.manifest.changed());
        assert!(diff.changed());
    }

    #[test]
    fn test_jar_diff() {
        let old = Aar::from_bytes("old.aar", sample_aar("1", &[])).unwrap();
        let diff = JarDiff::new(&old.classes, &ApiMapping::empty(), &old.classes, &ApiMapping::empty());
        assert!(!diff.changed());
        assert_eq!(diff.jars.classes.old_count, 1);
    }
}
