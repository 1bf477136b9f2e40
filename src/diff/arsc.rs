use crate::android::arsc::{Arsc, Entry};
use crate::diff::ComponentDiff;
use serde::Serialize;

/// Configurations and entries compared by value, so renumbered ids do not count as changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ArscDiff {
    pub configs: ComponentDiff<String>,
    pub entries: ComponentDiff<Entry>,
}

impl ArscDiff {
    pub fn new(old: &Arsc, new: &Arsc) -> ArscDiff {
        ArscDiff {
            configs: ComponentDiff::from_groups([old.configs.clone()], [new.configs.clone()]),
            entries: ComponentDiff::from_groups(
                [old.entries.values().cloned().collect()],
                [new.entries.values().cloned().collect()],
            ),
        }
    }

    pub fn configs_added(&self) -> &[String] {
        &self.configs.added
    }

    pub fn configs_removed(&self) -> &[String] {
        &self.configs.removed
    }

    pub fn entries_added(&self) -> &[Entry] {
        &self.entries.added
    }

    pub fn entries_removed(&self) -> &[Entry] {
        &self.entries.removed
    }

    pub fn changed(&self) -> bool {
        self.configs.changed() || self.entries.changed()
    }
}
