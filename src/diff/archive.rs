use crate::android::archive_files::{ArchiveFile, ArchiveFiles};
use crate::types::Size;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
}

/// One path whose file differs between the two archives. Sizes describe the new file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ArchiveFileChange {
    pub path: String,
    pub size: Size,
    pub size_diff: Size,
    pub uncompressed_size: Size,
    pub uncompressed_size_diff: Size,
    pub kind: ChangeKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ArchiveFilesDiff {
    pub old: ArchiveFiles,
    pub new: ArchiveFiles,
    /// Whether compressed sizes take part in the comparison.
    pub include_compressed: bool,
    /// Largest absolute size difference first.
    pub changes: Vec<ArchiveFileChange>,
}

impl ArchiveFilesDiff {
    pub fn new(old: &ArchiveFiles, new: &ArchiveFiles, include_compressed: bool) -> ArchiveFilesDiff {
        let mut changes = Vec::new();

        for file in new.iter().filter(|file| !old.contains(&file.path)) {
            changes.push(ArchiveFileChange {
                path: file.path.clone(),
                size: file.size,
                size_diff: file.size,
                uncompressed_size: file.uncompressed_size,
                uncompressed_size_diff: file.uncompressed_size,
                kind: ChangeKind::Added,
            });
        }
        for file in old.iter().filter(|file| !new.contains(&file.path)) {
            changes.push(ArchiveFileChange {
                path: file.path.clone(),
                size: Size::ZERO,
                size_diff: -file.size,
                uncompressed_size: Size::ZERO,
                uncompressed_size_diff: -file.uncompressed_size,
                kind: ChangeKind::Removed,
            });
        }
        for old_file in old.iter() {
            let Some(new_file) = new.get(&old_file.path) else { continue };
            let new_file = if include_compressed {
                new_file.clone()
            } else {
                ArchiveFile { size: old_file.size, is_compressed: old_file.is_compressed, ..new_file.clone() }
            };
            if &new_file != old_file {
                changes.push(ArchiveFileChange {
                    path: new_file.path.clone(),
                    size: new_file.size,
                    size_diff: new_file.size - old_file.size,
                    uncompressed_size: new_file.uncompressed_size,
                    uncompressed_size_diff: new_file.uncompressed_size - old_file.uncompressed_size,
                    kind: ChangeKind::Changed,
                });
            }
        }

        // Stable, so equal differences keep added, removed, changed order
        changes.sort_by(|a, b| b.size_diff.abs().cmp(&a.size_diff.abs()));

        ArchiveFilesDiff { old: old.clone(), new: new.clone(), include_compressed, changes }
    }

    pub fn changed(&self) -> bool {
        self.old != self.new
    }

    pub fn size_diff(&self) -> Size {
        self.new.size() - self.old.size()
    }

    pub fn uncompressed_size_diff(&self) -> Size {
        self.new.uncompressed_size() - self.old.uncompressed_size()
    }
}
