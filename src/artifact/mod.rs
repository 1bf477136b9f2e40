//! Whole artifacts assembled from the decoders in [`crate::android`], [`crate::dex`] and [`crate::jvm`].

pub mod aab;
pub mod aar;
pub mod apk;
pub mod jar;

pub use aab::{Aab, AabModule};
pub use aar::Aar;
pub use apk::Apk;
pub use jar::Jar;

use crate::dex::Dex;
use crate::error::{ArtifactContext, Result};
use std::fs;
use std::path::Path;

/// A standalone `.dex` file.
pub fn load_dex(path: &Path) -> Result<Dex> {
    let name = path.display().to_string();
    let bytes = fs::read(path).in_artifact(&name)?;
    Dex::from_bytes(name, &bytes)
}
