//! Project and content-type resolution for files

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::config::BinderConfig;
use crate::models::workspace::{canonical_dir, file_extension};

/// Directory entries that mark a project root
pub const ROOT_MARKERS: &[&str] = &[
    ".lspbind",
    ".git",
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "go.mod",
    "pom.xml",
];

/// Finds the project a file belongs to
#[derive(Debug, Clone)]
pub struct ProjectLocator {
    markers: Vec<String>,
}

impl Default for ProjectLocator {
    fn default() -> Self {
        Self::new(ROOT_MARKERS.iter().map(|m| m.to_string()).collect())
    }
}

impl ProjectLocator {
    pub fn new(markers: Vec<String>) -> Self {
        Self { markers }
    }

    /// Nearest ancestor of `file` containing a root marker.
    pub fn find_root(&self, file: &Path) -> Option<PathBuf> {
        let start = if file.is_dir() {
            canonical_dir(file)
        } else {
            canonical_dir(file.parent()?)
        };

        start
            .ancestors()
            .find(|dir| self.markers.iter().any(|m| dir.join(m).exists()))
            .map(Path::to_path_buf)
    }
}

/// Extension to content-type mapping
#[derive(Debug, Clone, Default)]
pub struct ContentTypes {
    by_extension: BTreeMap<String, String>,
}

impl ContentTypes {
    pub fn new(by_extension: BTreeMap<String, String>) -> Self {
        let by_extension = by_extension
            .into_iter()
            .map(|(ext, ct)| (ext.trim_start_matches('.').to_ascii_lowercase(), ct))
            .collect();
        Self { by_extension }
    }

    pub fn from_config(config: &BinderConfig) -> Self {
        Self::new(config.content_types.clone())
    }

    pub fn for_file(&self, file: &Path) -> Option<&str> {
        let ext = file_extension(file)?;
        self.by_extension.get(&ext).map(String::as_str)
    }

    pub fn extensions_for(&self, content_type: &str) -> Vec<&str> {
        self.by_extension
            .iter()
            .filter(|(_, ct)| ct.as_str() == content_type)
            .map(|(ext, _)| ext.as_str())
            .collect()
    }

    pub fn insert(&mut self, extension: &str, content_type: &str) {
        self.by_extension.insert(
            extension.trim_start_matches('.').to_ascii_lowercase(),
            content_type.to_string(),
        );
    }
}
