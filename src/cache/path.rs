use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::BaseDirs;

use crate::hash::sha1_hex;

pub const CACHE_FILE: &str = "cache.yaml";

/// Cache root: explicit override, then `PRECOMP_CACHE_DIR`, then the platform cache dir.
pub fn cache_root(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    if let Some(custom) = env::var_os("PRECOMP_CACHE_DIR").filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(custom));
    }

    let base_dirs = BaseDirs::new().context("failed to determine user directories")?;
    Ok(base_dirs.cache_dir().join("precomp"))
}

/// Stable id of a project: the SHA-1 of its canonical directory.
pub fn project_id(project_dir: &Path) -> String {
    let canonical = project_dir
        .canonicalize()
        .unwrap_or_else(|_| project_dir.to_path_buf());
    sha1_hex(&canonical.to_string_lossy())
}

pub fn project_dir(root: &Path, project_id: &str) -> PathBuf {
    root.join(project_id)
}

pub fn cache_file(root: &Path, project_id: &str) -> PathBuf {
    project_dir(root, project_id).join(CACHE_FILE)
}

pub fn ensure_structure(root: &Path, project_id: &str) -> Result<()> {
    let dir = project_dir(root, project_id);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create cache directory {}", dir.display()))
}
