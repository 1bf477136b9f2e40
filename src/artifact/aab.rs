use crate::android::archive_files::{ArchiveFileType, ArchiveFiles, AAB_MANIFEST_PATH};
use crate::android::manifest::AndroidManifest;
use crate::android::zip::{Archive, DirectoryView, Zip};
use crate::api_mapping::ApiMapping;
use crate::dex::Dex;
use crate::error::{ArtifactContext, DiffuseError, Result};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

const BASE_MODULE: &str = "base";
const BUNDLE_METADATA: &str = "BUNDLE-METADATA";
const META_INF: &str = "META-INF";
const PROGUARD_MAP: &str = "BUNDLE-METADATA/com.android.tools.build.obfuscation/proguard.map";

/// An Android App Bundle.
#[derive(Clone, Debug)]
pub struct Aab {
    pub filename: String,
    /// Empty unless the bundle carries its R8 mapping.
    pub api_mapping: ApiMapping,
    pub base: AabModule,
    /// Keyed and sorted by module name.
    pub features: BTreeMap<String, AabModule>,
}

/// One module directory of a bundle. Paths are relative to the module.
#[derive(Clone, Debug)]
pub struct AabModule {
    pub name: String,
    pub files: ArchiveFiles,
    pub manifest: AndroidManifest,
    pub dexes: Vec<Dex>,
}

impl Aab {
    pub fn load(path: &Path) -> Result<Aab> {
        Aab::from_zip(&Zip::open(path)?)
    }

    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> Result<Aab> {
        Aab::from_zip(&Zip::from_bytes(name, bytes)?)
    }

    fn from_zip(zip: &Zip) -> Result<Aab> {
        Aab::decode(zip).in_artifact(zip.name())
    }

    fn decode(zip: &Zip) -> Result<Aab> {
        let api_mapping = match zip.read_if_exists(PROGUARD_MAP)? {
            Some(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                ApiMapping::parse(&text).in_artifact(PROGUARD_MAP)?
            }
            None => ApiMapping::empty(),
        };

        let base = AabModule::decode(zip, BASE_MODULE)?;

        let names: BTreeSet<&str> = zip
            .entries()
            .iter()
            .filter_map(|entry| entry.path.split_once('/').map(|(directory, _)| directory))
            .filter(|directory| ![BASE_MODULE, BUNDLE_METADATA, META_INF].contains(directory))
            .collect();
        let features = names
            .into_iter()
            .map(|name| Ok((name.to_string(), AabModule::decode(zip, name)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        debug!("Decoded {}: base and {} feature modules, {} mapped types", zip.name(), features.len(), api_mapping.types());
        Ok(Aab { filename: zip.name().to_string(), api_mapping, base, features })
    }
}

impl AabModule {
    fn decode(zip: &Zip, name: &str) -> Result<AabModule> {
        AabModule::from_archive(&zip.directory_view(name), name).in_artifact(name)
    }

    fn from_archive(module: &DirectoryView, name: &str) -> Result<AabModule> {
        let files = ArchiveFiles::from_archive(module, ArchiveFileType::from_aab_path);
        let manifest_bytes = module
            .read_if_exists(AAB_MANIFEST_PATH)?
            .ok_or_else(|| DiffuseError::NotFound(AAB_MANIFEST_PATH.to_string()))?;
        let manifest = AndroidManifest::from_proto(&manifest_bytes).in_artifact(AAB_MANIFEST_PATH)?;
        let dexes = module
            .entries()
            .iter()
            .filter(|entry| entry.path.starts_with("dex/"))
            .map(|entry| Dex::from_bytes(entry.path.as_str(), &module.read(&entry.path)?))
            .collect::<Result<Vec<_>>>()?;
        Ok(AabModule { name: name.to_string(), files, manifest, dexes })
    }
}
