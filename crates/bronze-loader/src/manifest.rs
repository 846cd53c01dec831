//! Load manifest handling (manifest.yml)
//!
//! The manifest lists, in load order, every bronze table to refresh and the
//! file it is refreshed from. Entries are written either as structured records
//! or in the compact `schema.table:path` form:
//!
//! ```yaml
//! source_root: /var/lib/bronze/datasets
//! entries:
//!   - bronze.location:location.csv
//!   - schema: bronze
//!     table: death
//!     source_path: death.csv
//! ```

use bronze_common::{BronzeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// PostgreSQL truncates identifiers longer than this.
const MAX_IDENTIFIER_LEN: usize = 63;

/// One destination table and the file it is loaded from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoadEntry {
    pub schema: String,
    pub table: String,
    pub source_path: String,
}

impl LoadEntry {
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        source_path: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            source_path: source_path.into(),
        }
    }

    /// `schema.table`, as it appears in progress lines
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// Check identifiers and source path
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.schema) {
            return Err(BronzeError::manifest(format!(
                "'{}' is not a valid schema name in entry '{}'",
                self.schema, self
            )));
        }
        if !is_identifier(&self.table) {
            return Err(BronzeError::manifest(format!(
                "'{}' is not a valid table name in entry '{}'",
                self.table, self
            )));
        }
        if self.source_path.trim().is_empty() {
            return Err(BronzeError::manifest(format!(
                "entry '{}' has an empty source path",
                self.qualified_name()
            )));
        }
        Ok(())
    }

    fn rooted_at(mut self, root: &Path) -> Self {
        if Path::new(&self.source_path).is_relative() {
            self.source_path = root.join(&self.source_path).to_string_lossy().into_owned();
        }
        self
    }
}

impl fmt::Display for LoadEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.schema, self.table, self.source_path)
    }
}

impl FromStr for LoadEntry {
    type Err = BronzeError;

    /// Parse `schema.table:path`. The path may itself contain `:` or `.`.
    fn from_str(s: &str) -> Result<Self> {
        let malformed =
            || BronzeError::manifest(format!("'{}' is not of the form schema.table:path", s));

        let (schema, rest) = s.split_once('.').ok_or_else(malformed)?;
        let (table, path) = rest.split_once(':').ok_or_else(malformed)?;

        Ok(Self::new(schema.trim(), table.trim(), path.trim()))
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    first_ok
        && name.len() <= MAX_IDENTIFIER_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Compact(String),
    Structured(LoadEntry),
}

#[derive(Deserialize)]
struct ManifestFile {
    #[serde(default)]
    source_root: Option<PathBuf>,
    #[serde(default)]
    entries: Vec<RawEntry>,
}

/// Ordered list of load entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<LoadEntry>,
}

impl Manifest {
    /// Create an empty manifest
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<LoadEntry>) -> Self {
        Self { entries }
    }

    /// Load manifest from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BronzeError::manifest(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse manifest YAML
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let file: ManifestFile = serde_yaml::from_str(content)?;

        let entries = file
            .entries
            .into_iter()
            .map(|raw| {
                let entry = match raw {
                    RawEntry::Compact(s) => s.parse()?,
                    RawEntry::Structured(entry) => entry,
                };
                Ok(match &file.source_root {
                    Some(root) => entry.rooted_at(root),
                    None => entry,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { entries })
    }

    /// Reject malformed entries and duplicate destination tables
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.entries {
            entry.validate()?;
            if !seen.insert((entry.schema.as_str(), entry.table.as_str())) {
                return Err(BronzeError::manifest(format!(
                    "table '{}' appears more than once",
                    entry.qualified_name()
                )));
            }
        }
        Ok(())
    }

    pub fn entries(&self) -> &[LoadEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LoadEntry> {
        self.entries.iter()
    }
}

impl FromIterator<LoadEntry> for Manifest {
    fn from_iter<I: IntoIterator<Item = LoadEntry>>(iter: I) -> Self {
        Self::from_entries(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a LoadEntry;
    type IntoIter = std::slice::Iter<'a, LoadEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
