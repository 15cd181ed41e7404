use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SandboxError};

/// Resolve `relative` beneath `root`, rejecting anything that could land
/// outside it (absolute paths, `..`, drive prefixes, empty paths).
pub fn workspace_path(root: &Path, relative: &str) -> Result<PathBuf> {
    let candidate = Path::new(relative);
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in candidate.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SandboxError::InvalidPath(relative.to_string()));
            }
        }
    }
    if depth == 0 {
        return Err(SandboxError::InvalidPath(relative.to_string()));
    }
    Ok(resolved)
}
