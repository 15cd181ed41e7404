use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Relative to the sandbox root; `/` separates directories.
    pub path: String,
    pub content: String,
}

/// A validated, ordered, non-empty set of files for one job.
///
/// Every path is relative, stays inside the sandbox root and is unique
/// after normalization, so materialization can never write outside the
/// workspace or silently overwrite an earlier entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FileEntry>", into = "Vec<FileEntry>")]
pub struct FileSet(Vec<FileEntry>);

impl FileSet {
    pub fn new(entries: Vec<FileEntry>) -> Result<Self, EngineError> {
        if entries.is_empty() {
            return Err(EngineError::InvalidInput("files must not be empty".into()));
        }
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if entry.path.contains('\0') {
                return Err(EngineError::InvalidInput(format!(
                    "invalid path: {:?}",
                    entry.path
                )));
            }
            // Resolve against a dummy root: the same check the sandboxes
            // apply when writing.
            let normalized = sandbox::workspace_path(Path::new("."), &entry.path)
                .map_err(|_| EngineError::InvalidInput(format!("invalid path: {}", entry.path)))?;
            if !seen.insert(normalized) {
                return Err(EngineError::InvalidInput(format!(
                    "duplicate path: {}",
                    entry.path
                )));
            }
        }
        Ok(Self(entries))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileEntry> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<FileEntry>> for FileSet {
    type Error = EngineError;

    fn try_from(entries: Vec<FileEntry>) -> Result<Self, Self::Error> {
        Self::new(entries)
    }
}

impl From<FileSet> for Vec<FileEntry> {
    fn from(set: FileSet) -> Self {
        set.0
    }
}

impl<'a> IntoIterator for &'a FileSet {
    type Item = &'a FileEntry;
    type IntoIter = std::slice::Iter<'a, FileEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
