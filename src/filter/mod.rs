//! Keyspace include/exclude resolution.
//!
//! Names match exactly and case-sensitively against on-disk directory names.
//! Without an include list every discovered keyspace is selected unless
//! excluded; with one, only `include \ exclude` is selected.

use std::collections::BTreeSet;

/// Store-internal keyspaces excluded when the endpoint does not say otherwise.
pub const DEFAULT_EXCLUDED_KEYSPACES: [&str; 5] = [
    "system_schema",
    "system_distributed",
    "system_auth",
    "system",
    "system_traces",
];

/// Resolved include/exclude configuration. Immutable once built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyspaceFilter {
    include: Option<BTreeSet<String>>,
    exclude: BTreeSet<String>,
}

/// The effective include set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Selection<'a> {
    /// Exactly these keyspaces, already stripped of excluded names.
    Explicit(&'a BTreeSet<String>),
    /// Every discovered keyspace that is not in the given exclusion set.
    AllExcept(&'a BTreeSet<String>),
}

impl KeyspaceFilter {
    /// Builds a filter from raw endpoint lists.
    ///
    /// An absent or empty include list means "no explicit include". An
    /// explicit include list that is emptied by exclusion selects nothing.
    #[must_use]
    pub fn new(include_names: Option<Vec<String>>, exclude_names: Vec<String>) -> Self {
        let exclude: BTreeSet<String> = exclude_names.into_iter().collect();
        let include = include_names
            .filter(|names| !names.is_empty())
            .map(|names| {
                names
                    .into_iter()
                    .filter(|name| !exclude.contains(name))
                    .collect()
            });
        Self { include, exclude }
    }

    /// A filter selecting every keyspace except the store-internal ones.
    #[must_use]
    pub fn with_default_exclusions() -> Self {
        Self::new(
            None,
            DEFAULT_EXCLUDED_KEYSPACES
                .iter()
                .map(|name| (*name).to_owned())
                .collect(),
        )
    }

    /// Returns the effective include set.
    #[must_use]
    pub fn selection(&self) -> Selection<'_> {
        self.include
            .as_ref()
            .map_or(Selection::AllExcept(&self.exclude), Selection::Explicit)
    }

    /// Decides whether a discovered keyspace directory takes part in the run.
    #[must_use]
    pub fn selects(&self, keyspace: &str) -> bool {
        match self.selection() {
            Selection::Explicit(names) => names.contains(keyspace),
            Selection::AllExcept(excluded) => !excluded.contains(keyspace),
        }
    }

    /// Keyspaces to name on the snapshot command line, if the include list
    /// is explicit.
    #[must_use]
    pub fn explicit_keyspaces(&self) -> Option<Vec<&str>> {
        self.include
            .as_ref()
            .map(|names| names.iter().map(String::as_str).collect())
    }

    /// Sorted exclusion list.
    #[must_use]
    pub const fn excluded(&self) -> &BTreeSet<String> {
        &self.exclude
    }
}
