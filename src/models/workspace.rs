//! Workspace identity: roots, URIs and session keys.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Key of a content-type session: one live server per (root, content type).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub root_uri: String,
    pub content_type: String,
}

impl SessionKey {
    pub fn new(root: &Path, content_type: impl Into<String>) -> Self {
        Self {
            root_uri: path_to_uri(&canonical_dir(root)),
            content_type: content_type.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.root_uri, self.content_type)
    }
}

/// Canonical form of a directory, falling back to an absolute path when the
/// directory does not exist (yet).
pub fn canonical_dir(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| absolute(path))
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    }
}

/// Directory that serves as the session root for a file with no known owner.
pub fn parent_dir(file: &Path) -> PathBuf {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Whether `file` lies strictly below `root`.
pub fn is_under(root: &Path, file: &Path) -> bool {
    let root = canonical_dir(root);
    let file = canonical_dir(file);
    file != root && file.starts_with(&root)
}

pub fn file_extension(file: &Path) -> Option<String> {
    file.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn path_to_uri(path: &Path) -> String {
    let abs_path = absolute(path);

    let path_str = abs_path.to_string_lossy();
    let encoded: String = path_str
        .chars()
        .map(|c| match c {
            '/' | '.' | '-' | '_' | '~' => c.to_string(),
            c if c.is_ascii_alphanumeric() => c.to_string(),
            c => {
                let mut buf = [0u8; 4];
                c.encode_utf8(&mut buf)
                    .bytes()
                    .map(|b| format!("%{:02X}", b))
                    .collect()
            }
        })
        .collect();

    format!("file://{encoded}")
}

pub fn uri_to_path(uri: &str) -> PathBuf {
    let path = match uri.strip_prefix("file://") {
        Some(p) => p,
        None => {
            tracing::warn!("Invalid file URI (missing file:// prefix): {}", uri);
            return PathBuf::from(uri);
        }
    };

    #[cfg(windows)]
    let path = path.strip_prefix('/').unwrap_or(path);

    PathBuf::from(percent_decode(path))
}

fn percent_decode(input: &str) -> String {
    let mut result = Vec::with_capacity(input.len());
    let mut bytes = input.bytes();

    while let Some(byte) = bytes.next() {
        if byte == b'%' {
            let high = bytes.next().and_then(hex_value);
            let low = bytes.next().and_then(hex_value);
            if let (Some(h), Some(l)) = (high, low) {
                result.push((h << 4) | l);
                continue;
            }
        }
        result.push(byte);
    }

    String::from_utf8_lossy(&result).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_with_spaces() {
        let path = PathBuf::from("/path with spaces/file.rs");
        let uri = path_to_uri(&path);
        assert!(uri.contains("%20"));
        assert_eq!(uri_to_path(&uri), path);
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("hello%20world"), "hello world");
        assert_eq!(percent_decode("test%2Fpath"), "test/path");
        assert_eq!(percent_decode("normal"), "normal");
    }

    #[test]
    fn test_session_key_canonicalizes_root() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a");
        std::fs::create_dir(&nested).unwrap();

        let direct = SessionKey::new(dir.path(), "text/x-foo");
        let dotted = SessionKey::new(&nested.join(".."), "text/x-foo");
        assert_eq!(direct, dotted);

        let other_type = SessionKey::new(dir.path(), "text/x-bar");
        assert_ne!(direct, other_type);
    }

    #[test]
    fn test_is_under() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("src").join("main.foo");
        assert!(is_under(dir.path(), &file));
        assert!(!is_under(dir.path(), dir.path()));
        assert!(!is_under(&dir.path().join("src"), dir.path()));
    }

    #[test]
    fn test_file_extension_lowercased() {
        assert_eq!(file_extension(Path::new("/x/Main.RS")).as_deref(), Some("rs"));
        assert_eq!(file_extension(Path::new("/x/Makefile")), None);
    }

    #[test]
    fn test_parent_dir_of_bare_name() {
        assert_eq!(parent_dir(Path::new("file.rs")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("/a/b.rs")), PathBuf::from("/a"));
    }
}
