use crate::android::arsc::Arsc;
use crate::diff::archive::ArchiveFilesDiff;
use serde::Serialize;
use std::fmt;

/// Declaration order is sort order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum NoticeKind {
    Resolution,
    Warning,
    Informational,
}

/// Ordered by kind, then message.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Notice {
        Notice { kind, message: message.into() }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// `resources.arsc` must be stored uncompressed so it can be memory mapped.
pub fn resources_arsc_compression(diff: &ArchiveFilesDiff) -> Option<Notice> {
    let old_compressed = diff.old.get(Arsc::NAME)?.is_compressed;
    let new_compressed = diff.new.get(Arsc::NAME)?.is_compressed;
    match (old_compressed, new_compressed) {
        (false, false) => None,
        (false, true) => Some(Notice::new(
            NoticeKind::Warning,
            "resources.arsc changed from correctly uncompressed to incorrectly compressed",
        )),
        (true, true) => Some(Notice::new(
            NoticeKind::Warning,
            "resources.arsc remains incorrectly compressed instead of correctly uncompressed",
        )),
        (true, false) => Some(Notice::new(
            NoticeKind::Resolution,
            "resources.arsc changed from incorrectly compressed to correctly uncompressed",
        )),
    }
}
