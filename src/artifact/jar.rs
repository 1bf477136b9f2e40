use crate::android::archive_files::{ArchiveFileType, ArchiveFiles};
use crate::android::zip::{Archive, Zip};
use crate::dex::Dex;
use crate::error::{ArtifactContext, Result};
use crate::jvm::{Class, DexCompiler};
use crate::types::Member;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// A JAR with every class decoded.
#[derive(Clone, Debug)]
pub struct Jar {
    pub filename: String,
    pub files: ArchiveFiles,
    /// In entry order.
    pub classes: Vec<Class>,
    /// Most common class file major version, absent for a jar without classes.
    pub bytecode_version: Option<u16>,
    /// Sorted.
    pub declared_members: Vec<Member>,
    /// Sorted. References to members declared anywhere in this jar are dropped.
    pub referenced_members: Vec<Member>,
    class_bytes: Vec<Vec<u8>>,
}

impl Jar {
    pub fn load(path: &Path) -> Result<Jar> {
        Jar::from_zip(&Zip::open(path)?)
    }

    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> Result<Jar> {
        Jar::from_zip(&Zip::from_bytes(name, bytes)?)
    }

    pub(crate) fn from_zip(zip: &Zip) -> Result<Jar> {
        let files = ArchiveFiles::from_archive(zip, ArchiveFileType::from_jar_path);

        let mut classes = Vec::new();
        let mut class_bytes = Vec::new();
        for entry in zip.entries().iter().filter(|entry| entry.path.ends_with(".class")) {
            let bytes = zip.read(&entry.path).in_artifact(zip.name())?;
            classes.push(Class::from_bytes(&entry.path, &bytes).in_artifact(zip.name())?);
            class_bytes.push(bytes);
        }

        let declared: BTreeSet<Member> = classes.iter().flat_map(|class| class.declared_members.iter().cloned()).collect();
        let referenced: BTreeSet<Member> = classes
            .iter()
            .flat_map(|class| class.referenced_members.iter())
            .filter(|member| !declared.contains(*member))
            .cloned()
            .collect();

        let mut versions: BTreeMap<u16, usize> = BTreeMap::new();
        for class in &classes {
            *versions.entry(class.bytecode_version).or_default() += 1;
        }
        // Ties go to the newer version
        let bytecode_version = versions.into_iter().max_by_key(|(version, count)| (*count, *version)).map(|(version, _)| version);

        debug!(
            "Decoded {}: {} classes, {} declared and {} referenced members",
            zip.name(),
            classes.len(),
            declared.len(),
            referenced.len()
        );
        Ok(Jar {
            filename: zip.name().to_string(),
            files,
            classes,
            bytecode_version,
            declared_members: declared.into_iter().collect(),
            referenced_members: referenced.into_iter().collect(),
            class_bytes,
        })
    }

    /// Every class compiled to DEX by `compiler`, decoded.
    pub fn dex_with(&self, compiler: &dyn DexCompiler, min_api: u32, libraries: &[PathBuf]) -> Result<Vec<Dex>> {
        let outputs = compiler.compile(&self.class_bytes, min_api, libraries).in_artifact(&self.filename)?;
        outputs
            .iter()
            .enumerate()
            .map(|(i, bytes)| {
                let name = if i == 0 { "classes.dex".to_string() } else { format!("classes{}.dex", i + 1) };
                Dex::from_bytes(name, bytes)
            })
            .collect()
    }
}
