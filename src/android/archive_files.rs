use crate::android::zip::Archive;
use crate::types::Size;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

pub(crate) static CLASSES_DEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^classes\d*\.dex$").unwrap());
pub(crate) static LIBS_JAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^libs/[^/]+\.jar$").unwrap());

/// Path of the manifest inside a bundle module.
pub const AAB_MANIFEST_PATH: &str = "manifest/AndroidManifest.xml";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ArchiveFileType {
    Dex,
    Jar,
    ApiJar,
    LintJar,
    JarLibs,
    Class,
    Arsc,
    Manifest,
    Res,
    Asset,
    Native,
    Other,
}

use ArchiveFileType::*;

impl ArchiveFileType {
    pub const APK_TYPES: &'static [ArchiveFileType] = &[Dex, Arsc, Manifest, Res, Native, Asset, Other];
    pub const AAB_TYPES: &'static [ArchiveFileType] = &[Dex, Manifest, Res, Native, Asset, Other];
    pub const AAR_TYPES: &'static [ArchiveFileType] = &[Jar, Manifest, Res, Native, JarLibs, ApiJar, LintJar, Other];
    pub const JAR_TYPES: &'static [ArchiveFileType] = &[Class, Other];

    pub fn display_name(self) -> &'static str {
        match self {
            Dex => "dex",
            Jar => "jar",
            ApiJar => "api-jar",
            LintJar => "lint-jar",
            JarLibs => "libs",
            Class => "class",
            Arsc => "arsc",
            Manifest => "manifest",
            Res => "res",
            Asset => "asset",
            Native => "native",
            Other => "other",
        }
    }

    fn common(path: &str) -> Option<ArchiveFileType> {
        if path.starts_with("assets/") {
            Some(Asset)
        } else if path.starts_with("res/") {
            Some(Res)
        } else {
            None
        }
    }

    pub fn from_apk_path(path: &str) -> ArchiveFileType {
        if CLASSES_DEX.is_match(path) {
            Dex
        } else if path == "AndroidManifest.xml" {
            Manifest
        } else if path == "resources.arsc" {
            Arsc
        } else if path.starts_with("lib/") {
            Native
        } else {
            ArchiveFileType::common(path).unwrap_or(Other)
        }
    }

    /// Paths are relative to the module directory.
    pub fn from_aab_path(path: &str) -> ArchiveFileType {
        if path == AAB_MANIFEST_PATH {
            Manifest
        } else if path.starts_with("dex/") {
            Dex
        } else if path.starts_with("lib/") {
            Native
        } else {
            ArchiveFileType::common(path).unwrap_or(Other)
        }
    }

    pub fn from_aar_path(path: &str) -> ArchiveFileType {
        match path {
            "classes.jar" => Jar,
            "api.jar" => ApiJar,
            "lint.jar" => LintJar,
            "AndroidManifest.xml" => Manifest,
            _ if path.starts_with("jni/") => Native,
            _ if LIBS_JAR.is_match(path) => JarLibs,
            _ => ArchiveFileType::common(path).unwrap_or(Other),
        }
    }

    pub fn from_jar_path(path: &str) -> ArchiveFileType {
        if path.ends_with(".class") { Class } else { Other }
    }
}

impl fmt::Display for ArchiveFileType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ArchiveFile {
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: ArchiveFileType,
    /// On-disk impact inside the archive, headers included.
    pub size: Size,
    pub uncompressed_size: Size,
    pub is_compressed: bool,
}

/// Every file of an archive keyed by path, plus `/` standing in for the end of central directory record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ArchiveFiles {
    files: BTreeMap<String, ArchiveFile>,
}

impl ArchiveFiles {
    pub const END_OF_CENTRAL_DIRECTORY: &'static str = "/";

    pub fn from_archive(archive: &dyn Archive, classifier: fn(&str) -> ArchiveFileType) -> ArchiveFiles {
        let mut files: BTreeMap<String, ArchiveFile> = archive
            .entries()
            .iter()
            .map(|entry| {
                let file = ArchiveFile {
                    path: entry.path.clone(),
                    file_type: classifier(&entry.path),
                    size: entry.zip_size,
                    uncompressed_size: entry.uncompressed_size,
                    is_compressed: entry.is_compressed,
                };
                (entry.path.clone(), file)
            })
            .collect();
        files.insert(
            ArchiveFiles::END_OF_CENTRAL_DIRECTORY.to_string(),
            ArchiveFile {
                path: ArchiveFiles::END_OF_CENTRAL_DIRECTORY.to_string(),
                file_type: Other,
                size: Size::new(22),
                uncompressed_size: Size::ZERO,
                is_compressed: false,
            },
        );
        ArchiveFiles { files }
    }

    pub fn get(&self, path: &str) -> Option<&ArchiveFile> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Sorted by path.
    pub fn iter(&self) -> impl Iterator<Item = &ArchiveFile> {
        self.files.values()
    }

    pub fn size(&self) -> Size {
        self.iter().map(|file| file.size).sum()
    }

    pub fn uncompressed_size(&self) -> Size {
        self.iter().map(|file| file.uncompressed_size).sum()
    }

    /// `(size, uncompressed size)` totals per file type.
    pub fn by_type(&self) -> BTreeMap<ArchiveFileType, (Size, Size)> {
        let mut totals: BTreeMap<ArchiveFileType, (Size, Size)> = BTreeMap::new();
        for file in self.iter() {
            let total = totals.entry(file.file_type).or_default();
            total.0 = total.0 + file.size;
            total.1 = total.1 + file.uncompressed_size;
        }
        totals
    }
}
