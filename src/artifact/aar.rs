use crate::android::archive_files::{ArchiveFileType, ArchiveFiles, LIBS_JAR};
use crate::android::chunk::ResourceError;
use crate::android::manifest::AndroidManifest;
use crate::android::zip::{Archive, Zip};
use crate::artifact::jar::Jar;
use crate::error::{ArtifactContext, Result};
use log::debug;
use std::path::Path;

const CLASSES_JAR: &str = "classes.jar";

/// An Android library archive.
#[derive(Clone, Debug)]
pub struct Aar {
    pub filename: String,
    pub files: ArchiveFiles,
    pub manifest: AndroidManifest,
    pub classes: Jar,
    /// `libs/*.jar`, in entry order.
    pub libs: Vec<Jar>,
}

impl Aar {
    pub fn load(path: &Path) -> Result<Aar> {
        Aar::from_zip(&Zip::open(path)?)
    }

    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> Result<Aar> {
        Aar::from_zip(&Zip::from_bytes(name, bytes)?)
    }

    fn from_zip(zip: &Zip) -> Result<Aar> {
        Aar::decode(zip).in_artifact(zip.name())
    }

    fn decode(zip: &Zip) -> Result<Aar> {
        let files = ArchiveFiles::from_archive(zip, ArchiveFileType::from_aar_path);

        let manifest_bytes = zip.read(AndroidManifest::NAME)?;
        let text = String::from_utf8(manifest_bytes)
            .map_err(|e| ResourceError::MalformedDocument(format!("Manifest is not UTF-8: {}", e)))
            .in_artifact(AndroidManifest::NAME)?;
        let manifest = AndroidManifest::parse_xml(&text).in_artifact(AndroidManifest::NAME)?;

        let classes = Jar::from_bytes(CLASSES_JAR, zip.read(CLASSES_JAR)?)?;
        let libs = zip
            .entries()
            .iter()
            .filter(|entry| LIBS_JAR.is_match(&entry.path))
            .map(|entry| Jar::from_bytes(&entry.path, zip.read(&entry.path)?))
            .collect::<Result<Vec<_>>>()?;

        debug!("Decoded {} ({}): {} files, {} libs", zip.name(), manifest.package_name, files.len(), libs.len());
        Ok(Aar { filename: zip.name().to_string(), files, manifest, classes, libs })
    }

    /// `classes.jar` followed by the bundled libraries.
    pub fn jars(&self) -> Vec<&Jar> {
        let mut jars = Vec::with_capacity(1 + self.libs.len());
        jars.push(&self.classes);
        jars.extend(self.libs.iter());
        jars
    }
}
