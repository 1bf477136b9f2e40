//! # Diffuse
//!
//! A library for comparing two versions of an Android build artifact: APKs, App Bundles,
//! AARs, JARs and standalone DEX files.
//!
//! Each artifact is decoded into its parts (archive entries, DEX reference tables, class
//! files, the resource table, the manifest and signing certificates) and the parts are
//! compared set-wise, optionally after deobfuscation with an R8/ProGuard mapping.
//!
//! # Examples
//!
//! ```no_run
//!  use diffuse::{diff_artifacts, DiffConfig};
//!
//!  let mut config = DiffConfig::new("old/app-release.apk", "new/app-release.apk");
//!  config.new_mapping = Some("new/mapping.txt".into());
//!  let diff = diff_artifacts(&config).unwrap();
//!  println!("changed: {}", diff.changed());
//! ```
//!
#[macro_use]
pub mod dex;

pub mod android;
pub mod api_mapping;
pub mod artifact;
pub mod config;
pub mod diff;
pub mod error;
pub mod jvm;
pub mod types;

#[cfg(test)]
mod tests;

pub use config::{diff_artifacts, ArtifactKind, BinaryDiff, DiffConfig};
pub use error::{DiffuseError, ErrorKind, Result};
