//! Per-entity manual query table.
//!
//! The built-in table ships with the binary; an optional file from the config
//! replaces entries key by key.

use std::collections::HashMap;
use std::path::Path;

use log::{info, warn};

use crate::text_parser::collapse_whitespace;

const BUILTIN_OVERRIDES: &str = include_str!("../config/query_overrides.toml");

#[derive(Debug, Default, serde::Deserialize)]
struct OverrideFile {
    #[serde(default)]
    overrides: HashMap<String, Vec<String>>,
}

/// Read-only lookup from normalized entity name to its hand-written queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOverrides {
    entries: HashMap<String, Vec<String>>,
}

fn override_key(name: &str) -> String {
    collapse_whitespace(name).to_uppercase()
}

impl QueryOverrides {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses an override table in TOML form (`[overrides]` of name -> query list).
    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        let parsed: OverrideFile =
            toml::from_str(text).map_err(|err| format!("invalid override table: {err}"))?;
        let mut overrides = Self::empty();
        overrides.merge(parsed.overrides);
        Ok(overrides)
    }

    pub fn builtin() -> Self {
        match Self::from_toml_str(BUILTIN_OVERRIDES) {
            Ok(overrides) => overrides,
            Err(err) => {
                log::error!("Built-in query override table is unusable: {}", err);
                Self::empty()
            }
        }
    }

    /// Built-in table with entries from `extra_file` layered on top.
    pub fn load(extra_file: Option<&Path>) -> Self {
        let mut overrides = Self::builtin();
        let Some(path) = extra_file else {
            return overrides;
        };

        match std::fs::read_to_string(path) {
            Ok(text) => match Self::from_toml_str(&text) {
                Ok(extra) => {
                    info!(
                        "Loaded {} query overrides from {}",
                        extra.len(),
                        path.display()
                    );
                    overrides.merge(extra.entries);
                }
                Err(err) => warn!("Ignoring override file {}: {}", path.display(), err),
            },
            Err(err) => warn!("Failed to read override file {}: {}", path.display(), err),
        }
        overrides
    }

    fn merge(&mut self, entries: HashMap<String, Vec<String>>) {
        for (name, queries) in entries {
            let queries: Vec<String> = queries
                .iter()
                .map(|query| collapse_whitespace(query))
                .filter(|query| !query.is_empty())
                .collect();
            let key = override_key(&name);
            if key.is_empty() || queries.is_empty() {
                continue;
            }
            self.entries.insert(key, queries);
        }
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries.get(&override_key(name)).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::QueryOverrides;

    #[test]
    fn test_builtin_table_parses_and_is_keyed_case_insensitively() {
        let overrides = QueryOverrides::builtin();
        assert!(!overrides.is_empty());
        let william = overrides.get("william  i").expect("WILLIAM I override");
        assert_eq!(william[0], "Bayeux tapestry William Duke Normandy");
        assert!(overrides.get("LOVELACE").is_none());
    }

    #[test]
    fn test_extra_file_replaces_entries_per_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("extra.toml");
        std::fs::write(
            &path,
            "[overrides]\n\"William I\" = [\"William Conqueror statue Falaise\"]\n\"LOVELACE\" = [\"Ada Lovelace Chalon portrait\", \"  \"]\n",
        )
        .expect("write extra overrides");

        let overrides = QueryOverrides::load(Some(&path));
        assert_eq!(
            overrides.get("WILLIAM I"),
            Some(&["William Conqueror statue Falaise".to_string()][..])
        );
        assert_eq!(
            overrides.get("Lovelace"),
            Some(&["Ada Lovelace Chalon portrait".to_string()][..])
        );
        assert!(overrides.get("FREDERICK II").is_some());
    }

    #[test]
    fn test_unreadable_extra_file_keeps_builtin_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[overrides\n").expect("write broken overrides");

        assert_eq!(QueryOverrides::load(Some(&path)), QueryOverrides::builtin());
        assert_eq!(
            QueryOverrides::load(Some(&dir.path().join("missing.toml"))),
            QueryOverrides::builtin()
        );
    }
}
