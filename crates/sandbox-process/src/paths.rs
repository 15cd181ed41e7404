use std::path::{Path, PathBuf};

/// Directory layout under the factory base directory.
#[derive(Debug, Clone)]
pub struct FactoryPaths {
    base_dir: PathBuf,
}

impl FactoryPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn workspaces(&self) -> PathBuf {
        self.base_dir.join("workspaces")
    }

    pub fn workspace(&self, id: &str) -> PathBuf {
        self.workspaces().join(id)
    }
}
