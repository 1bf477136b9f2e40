use crate::android::manifest::AndroidManifest;
use serde::Serialize;
use similar::TextDiff;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ManifestDiff {
    pub old: AndroidManifest,
    pub new: AndroidManifest,
    /// Package, version name or version code differ.
    pub parsed_properties_changed: bool,
    /// Unified diff of the normalized documents, file headers included. Empty when identical.
    pub diff: Vec<String>,
}

impl ManifestDiff {
    pub fn new(old: &AndroidManifest, new: &AndroidManifest) -> ManifestDiff {
        let parsed_properties_changed = old.package_name != new.package_name
            || old.version_name != new.version_name
            || old.version_code != new.version_code;

        let diff = if old.xml == new.xml {
            Vec::new()
        } else {
            TextDiff::from_lines(&old.xml, &new.xml)
                .unified_diff()
                .context_radius(1)
                .header(AndroidManifest::NAME, AndroidManifest::NAME)
                .to_string()
                .lines()
                .map(str::to_string)
                .collect()
        };

        ManifestDiff { old: old.clone(), new: new.clone(), parsed_properties_changed, diff }
    }

    pub fn changed(&self) -> bool {
        self.parsed_properties_changed || !self.diff.is_empty()
    }
}
