use crate::api_mapping::ApiMapping;
use crate::artifact::{load_dex, Aab, Aar, Apk, Jar};
use crate::diff::{AabDiff, AarDiff, ApkDiff, DexDiff, JarDiff};
use crate::error::{ArtifactContext, DiffuseError, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Apk,
    Aab,
    Aar,
    Jar,
    Dex,
}

impl ArtifactKind {
    /// Case-insensitive match on the file extension.
    pub fn from_path(path: &Path) -> Result<ArtifactKind> {
        let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("apk") => Ok(ArtifactKind::Apk),
            Some("aab") => Ok(ArtifactKind::Aab),
            Some("aar") => Ok(ArtifactKind::Aar),
            Some("jar") => Ok(ArtifactKind::Jar),
            Some("dex") => Ok(ArtifactKind::Dex),
            _ => Err(DiffuseError::Config(format!("Unable to infer the artifact type of {}", path.display()))),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArtifactKind::Apk => "apk",
            ArtifactKind::Aab => "aab",
            ArtifactKind::Aar => "aar",
            ArtifactKind::Jar => "jar",
            ArtifactKind::Dex => "dex",
        };
        f.write_str(name)
    }
}

/// What to compare. Mappings deobfuscate DEX and class member names before comparison.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiffConfig {
    /// Inferred from the extension of `old` when absent.
    #[serde(default)]
    pub kind: Option<ArtifactKind>,
    pub old: PathBuf,
    pub new: PathBuf,
    #[serde(default)]
    pub old_mapping: Option<PathBuf>,
    #[serde(default)]
    pub new_mapping: Option<PathBuf>,
}

impl DiffConfig {
    pub fn new(old: impl Into<PathBuf>, new: impl Into<PathBuf>) -> DiffConfig {
        DiffConfig { kind: None, old: old.into(), new: new.into(), old_mapping: None, new_mapping: None }
    }

    pub fn kind(&self) -> Result<ArtifactKind> {
        match self.kind {
            Some(kind) => Ok(kind),
            None => ArtifactKind::from_path(&self.old),
        }
    }
}

/// The comparison matching the artifact kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BinaryDiff {
    Apk(ApkDiff),
    Aab(AabDiff),
    Aar(AarDiff),
    Jar(JarDiff),
    Dex(DexDiff),
}

impl BinaryDiff {
    pub fn changed(&self) -> bool {
        match self {
            BinaryDiff::Apk(diff) => diff.changed(),
            BinaryDiff::Aab(diff) => diff.changed(),
            BinaryDiff::Aar(diff) => diff.changed(),
            BinaryDiff::Jar(diff) => diff.changed(),
            BinaryDiff::Dex(diff) => diff.changed(),
        }
    }
}

fn load_mapping(path: Option<&Path>) -> Result<ApiMapping> {
    match path {
        Some(path) => {
            let name = path.display().to_string();
            let text = fs::read_to_string(path).in_artifact(&name)?;
            ApiMapping::parse(&text).in_artifact(&name)
        }
        None => Ok(ApiMapping::empty()),
    }
}

/// Loads both artifacts and compares them.
pub fn diff_artifacts(config: &DiffConfig) -> Result<BinaryDiff> {
    let kind = config.kind()?;
    let old_mapping = load_mapping(config.old_mapping.as_deref())?;
    let new_mapping = load_mapping(config.new_mapping.as_deref())?;
    info!("Comparing {} {} with {}", kind, config.old.display(), config.new.display());

    let diff = match kind {
        ArtifactKind::Apk => {
            BinaryDiff::Apk(ApkDiff::new(&Apk::load(&config.old)?, &old_mapping, &Apk::load(&config.new)?, &new_mapping))
        }
        // Bundles carry their own mappings
        ArtifactKind::Aab => BinaryDiff::Aab(AabDiff::new(&Aab::load(&config.old)?, &Aab::load(&config.new)?)),
        ArtifactKind::Aar => {
            BinaryDiff::Aar(AarDiff::new(&Aar::load(&config.old)?, &old_mapping, &Aar::load(&config.new)?, &new_mapping))
        }
        ArtifactKind::Jar => {
            BinaryDiff::Jar(JarDiff::new(&Jar::load(&config.old)?, &old_mapping, &Jar::load(&config.new)?, &new_mapping))
        }
        ArtifactKind::Dex => {
            let old = [load_dex(&config.old)?];
            let new = [load_dex(&config.new)?];
            BinaryDiff::Dex(DexDiff::new(&old, &old_mapping, &new, &new_mapping))
        }
    };
    info!("{} changed: {}", kind, diff.changed());
    Ok(diff)
}
