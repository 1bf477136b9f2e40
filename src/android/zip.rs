/* ZIP containers with per-entry on-disk size accounting */

use crate::error::{ArtifactContext, DiffuseError, Result};
use crate::types::Size;
use log::{debug, trace};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use zip::read::ZipArchive;
use zip::CompressionMethod;

const LOCAL_HEADER_SIGNATURE: u32 = 0x04034b50;
const LOCAL_HEADER_SIZE: i64 = 30;
const CENTRAL_HEADER_SIZE: i64 = 46;
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

/// One entry of a ZIP container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZipEntry {
    pub path: String,
    /// Size of the entry contents once inflated.
    pub uncompressed_size: Size,
    /// Size of the entry contents as stored.
    pub compressed_size: Size,
    /// Impact on the overall zip size: [`ZipEntry::compressed_size`] plus both headers.
    pub zip_size: Size,
    /// Any method other than store.
    pub is_compressed: bool,
}

/// Read access to a ZIP-like set of entries.
pub trait Archive {
    fn entries(&self) -> &[ZipEntry];

    fn read(&self, path: &str) -> Result<Vec<u8>>;

    fn find(&self, path: &str) -> Option<&ZipEntry> {
        self.entries().iter().find(|entry| entry.path == path)
    }

    /// Like [`Archive::find`], but a missing entry is a [`DiffuseError::NotFound`].
    fn get(&self, path: &str) -> Result<&ZipEntry> {
        self.find(path).ok_or_else(|| DiffuseError::NotFound(path.to_string()))
    }

    fn read_if_exists(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match self.find(path) {
            Some(_) => self.read(path).map(Some),
            None => Ok(None),
        }
    }
}

pub struct Zip {
    name: String,
    entries: Vec<ZipEntry>,
    indices: BTreeMap<String, usize>,
    data: Arc<[u8]>,
    archive: RefCell<ZipArchive<Cursor<Arc<[u8]>>>>,
}

impl Zip {
    /// Reads the whole file up front so no handle outlives this call.
    pub fn open(path: &Path) -> Result<Zip> {
        let name = path.display().to_string();
        let bytes = fs::read(path).in_artifact(&name)?;
        Zip::from_bytes(name, bytes)
    }

    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Result<Zip> {
        let name = name.into();
        Zip::parse(name.clone(), bytes.into()).in_artifact(&name)
    }

    fn parse(name: String, data: Arc<[u8]>) -> Result<Zip> {
        let mut archive = ZipArchive::new(Cursor::new(Arc::clone(&data)))?;
        let mut entries = Vec::with_capacity(archive.len());
        let mut indices = BTreeMap::new();
        for index in 0..archive.len() {
            let file = archive.by_index_raw(index)?;
            let path = file.name().to_string();
            let local = LocalHeader::probe(&data, file.header_start())?;

            let uncompressed_size = file.size();
            let compressed_size = file.compressed_size() as i64;
            let name_size = path.len() as i64;
            let data_descriptor_size = if local.has_data_descriptor() { data_descriptor_size(uncompressed_size) } else { 0 };
            let zip_size = compressed_size
                + LOCAL_HEADER_SIZE + name_size + local.extra_length as i64 + data_descriptor_size
                + CENTRAL_HEADER_SIZE + name_size + file.extra_data().len() as i64 + file.comment().len() as i64;
            trace!("{} {}: {} stored, {} on disk", name, path, compressed_size, zip_size);

            indices.entry(path.clone()).or_insert(index);
            entries.push(ZipEntry {
                path,
                uncompressed_size: Size::new(uncompressed_size as i64),
                compressed_size: Size::new(compressed_size),
                zip_size: Size::new(zip_size),
                is_compressed: file.compression() != CompressionMethod::Stored,
            });
        }
        debug!("Opened {} with {} entries", name, entries.len());
        Ok(Zip { name, entries, indices, data, archive: RefCell::new(archive) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw container bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Entries under `name/`, with that prefix removed from their paths.
    pub fn directory_view(&self, name: &str) -> DirectoryView<'_> {
        DirectoryView::new(self, name)
    }
}

impl Archive for Zip {
    fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let index = *self.indices.get(path).ok_or_else(|| DiffuseError::NotFound(path.to_string()))?;
        let mut archive = self.archive.borrow_mut();
        let mut file = archive.by_index(index).in_artifact(&self.name)?;
        // The declared size is only a hint
        let mut bytes = Vec::with_capacity(file.size().min(self.data.len() as u64) as usize);
        file.read_to_end(&mut bytes).in_artifact(&self.name)?;
        Ok(bytes)
    }
}

/// Data descriptors are assumed to carry the optional 4-byte signature. ZIP64 is inferred
/// from a size that cannot fit 32 bits; smaller entries could still have used it.
fn data_descriptor_size(uncompressed_size: u64) -> i64 {
    if uncompressed_size > u32::MAX as u64 { 24 } else { 16 }
}

/// The few local file header fields that the central directory does not repeat.
struct LocalHeader {
    flags: u16,
    extra_length: u16,
}

impl LocalHeader {
    fn probe(data: &[u8], offset: u64) -> Result<LocalHeader> {
        let start = offset as usize;
        let header = data
            .get(start..start + LOCAL_HEADER_SIZE as usize)
            .ok_or_else(|| zip::result::ZipError::InvalidArchive("Local file header past end of archive"))?;
        let u16_at = |at: usize| u16::from_le_bytes([header[at], header[at + 1]]);
        let signature = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if signature != LOCAL_HEADER_SIGNATURE {
            return Err(zip::result::ZipError::InvalidArchive("Invalid local file header").into());
        }
        Ok(LocalHeader { flags: u16_at(6), extra_length: u16_at(28) })
    }

    fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }
}

/// A directory of another archive presented as an archive of its own, as used for bundle modules.
pub struct DirectoryView<'a> {
    parent: &'a dyn Archive,
    prefix: String,
    entries: Vec<ZipEntry>,
}

impl<'a> DirectoryView<'a> {
    pub fn new(parent: &'a dyn Archive, name: &str) -> DirectoryView<'a> {
        let prefix = format!("{}/", name);
        let entries = parent
            .entries()
            .iter()
            .filter_map(|entry| {
                entry.path.strip_prefix(&prefix).map(|relative| ZipEntry { path: relative.to_string(), ..entry.clone() })
            })
            .collect();
        DirectoryView { parent, prefix, entries }
    }
}

impl Archive for DirectoryView<'_> {
    fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.parent.read(&format!("{}{}", self.prefix, path))
    }
}
