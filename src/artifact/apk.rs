use crate::android::archive_files::{ArchiveFileType, ArchiveFiles, CLASSES_DEX};
use crate::android::arsc::Arsc;
use crate::android::manifest::AndroidManifest;
use crate::android::signatures::Signatures;
use crate::android::zip::{Archive, Zip};
use crate::dex::Dex;
use crate::error::{ArtifactContext, Result};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct Apk {
    pub filename: String,
    pub files: ArchiveFiles,
    /// Every `classes*.dex`, in entry order.
    pub dexes: Vec<Dex>,
    pub arsc: Arsc,
    pub manifest: AndroidManifest,
    pub signatures: Signatures,
}

impl Apk {
    /// Also picks up the v4 signature from an `<apk>.idsig` file next to `path`.
    pub fn load(path: &Path) -> Result<Apk> {
        let mut apk = Apk::from_zip(&Zip::open(path)?)?;

        let idsig = idsig_path(path);
        if idsig.is_file() {
            let name = idsig.display().to_string();
            let bytes = fs::read(&idsig).in_artifact(&name)?;
            apk.signatures = apk.signatures.with_v4(&bytes).in_artifact(&name)?;
        }
        Ok(apk)
    }

    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> Result<Apk> {
        Apk::from_zip(&Zip::from_bytes(name, bytes)?)
    }

    fn from_zip(zip: &Zip) -> Result<Apk> {
        Apk::decode(zip).in_artifact(zip.name())
    }

    fn decode(zip: &Zip) -> Result<Apk> {
        let files = ArchiveFiles::from_archive(zip, ArchiveFileType::from_apk_path);
        let arsc = Arsc::from_bytes(&zip.read(Arsc::NAME)?).in_artifact(Arsc::NAME)?;
        let manifest = AndroidManifest::from_binary(&zip.read(AndroidManifest::NAME)?, Some(&arsc)).in_artifact(AndroidManifest::NAME)?;
        let dexes = zip
            .entries()
            .iter()
            .filter(|entry| CLASSES_DEX.is_match(&entry.path))
            .map(|entry| Dex::from_bytes(entry.path.as_str(), &zip.read(&entry.path)?))
            .collect::<Result<Vec<_>>>()?;
        let signatures = Signatures::from_apk(zip)?;

        debug!("Decoded {} ({}): {} files, {} dex", zip.name(), manifest.package_name, files.len(), dexes.len());
        Ok(Apk { filename: zip.name().to_string(), files, dexes, arsc, manifest, signatures })
    }
}

fn idsig_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".idsig");
    PathBuf::from(name)
}
