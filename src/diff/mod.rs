//! Comparison of two decoded artifacts.
//!
//! Every collection of symbols (strings, types, classes, members, resource entries) is
//! reconciled with [`component_diff`] so multidex and multi-jar inputs count the same way:
//! raw counts keep duplicates across items, everything else works on unique sets.

pub mod archive;
pub mod artifact;
pub mod arsc;
pub mod dex;
pub mod jars;
pub mod lint;
pub mod manifest;
pub mod signatures;

pub use archive::{ArchiveFileChange, ArchiveFilesDiff, ChangeKind};
pub use artifact::{AabDiff, AarDiff, ApkDiff, JarDiff, ModuleDiff};
pub use arsc::ArscDiff;
pub use dex::DexDiff;
pub use jars::JarsDiff;
pub use lint::{Notice, NoticeKind};
pub use manifest::ManifestDiff;
pub use signatures::SignaturesDiff;

use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentDiff<T: Ord> {
    /// Sum of every item's collection, duplicates included.
    pub old_raw_count: usize,
    pub new_raw_count: usize,
    /// Distinct elements.
    pub old_count: usize,
    pub new_count: usize,
    /// Sorted.
    pub added: Vec<T>,
    /// Sorted.
    pub removed: Vec<T>,
}

impl<T: Ord + Clone> ComponentDiff<T> {
    /// Reconciles already projected items, one collection per dex or jar.
    pub fn from_groups<O, N>(old: O, new: N) -> ComponentDiff<T>
    where
        O: IntoIterator<Item = Vec<T>>,
        N: IntoIterator<Item = Vec<T>>,
    {
        let (old_raw_count, old_set) = flatten(old);
        let (new_raw_count, new_set) = flatten(new);
        ComponentDiff {
            old_raw_count,
            new_raw_count,
            old_count: old_set.len(),
            new_count: new_set.len(),
            added: new_set.difference(&old_set).cloned().collect(),
            removed: old_set.difference(&new_set).cloned().collect(),
        }
    }
}

impl<T: Ord> ComponentDiff<T> {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Net change in distinct elements.
    pub fn delta(&self) -> i64 {
        self.added.len() as i64 - self.removed.len() as i64
    }
}

fn flatten<T: Ord, I: IntoIterator<Item = Vec<T>>>(groups: I) -> (usize, BTreeSet<T>) {
    let mut raw_count = 0;
    let mut set = BTreeSet::new();
    for group in groups {
        raw_count += group.len();
        set.extend(group);
    }
    (raw_count, set)
}

/// Projects every item with `selector` and reconciles the results.
///
/// # Examples
///
/// ```
///  use diffuse::diff::component_diff;
///
///  let old = vec![vec!["A", "B"], vec!["C", "A"]];
///  let new = vec![vec!["B", "C", "D"]];
///  let diff = component_diff(&old, &new, |names| names.clone());
///  assert_eq!(diff.old_raw_count, 4);
///  assert_eq!(diff.old_count, 3);
///  assert_eq!(diff.added, vec!["D"]);
///  assert_eq!(diff.removed, vec!["A"]);
/// ```
pub fn component_diff<R, T, F>(old: &[R], new: &[R], selector: F) -> ComponentDiff<T>
where
    T: Ord + Clone,
    F: Fn(&R) -> Vec<T>,
{
    ComponentDiff::from_groups(old.iter().map(&selector), new.iter().map(&selector))
}
