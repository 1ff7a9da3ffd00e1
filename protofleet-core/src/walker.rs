//! Artifact discovery under a ledger root.
//!
//! Walks the backing directory and yields every artifact file with its
//! `/`-separated path relative to the root.

use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for artifact discovery
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Only keep files with this extension (without the dot). None = every file.
    pub extension: Option<String>,

    /// File names skipped wherever they appear (the snapshot and its temp file)
    pub skip_names: Vec<String>,
}

/// An artifact discovered during the walk
#[derive(Debug, Clone)]
pub struct ArtifactFile {
    /// Full path on disk
    pub path: PathBuf,

    /// Ledger key: relative path joined with `/`
    pub key: String,
}

/// Walk `root` and collect all artifact files, sorted by key.
pub fn discover(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<ArtifactFile>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry?;

        if !entry.file_type().is_file() {
            continue;
        }

        if !wanted(&entry, options) {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if let Some(key) = to_key(relative) {
            files.push(ArtifactFile {
                path: entry.path().to_path_buf(),
                key,
            });
        }
    }

    files.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(files)
}

fn wanted(entry: &DirEntry, options: &WalkOptions) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    if options.skip_names.iter().any(|name| *name == file_name) {
        return false;
    }

    match &options.extension {
        Some(ext) => entry
            .path()
            .extension()
            .is_some_and(|e| e.to_string_lossy() == ext.as_str()),
        None => true,
    }
}

/// Convert a relative filesystem path to a ledger key.
fn to_key(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_discover_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let files = discover(temp_dir.path(), &WalkOptions::default())?;
        assert!(files.is_empty());
        Ok(())
    }

    #[test]
    fn test_discover_nested_keys() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir_all(temp_dir.path().join("acme/v1"))?;
        fs::write(temp_dir.path().join("root.proto"), b"a")?;
        fs::write(temp_dir.path().join("acme/v1/user.proto"), b"b")?;

        let files = discover(temp_dir.path(), &WalkOptions::default())?;
        let keys: Vec<_> = files.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["acme/v1/user.proto", "root.proto"]);

        Ok(())
    }

    #[test]
    fn test_extension_and_skip_filters() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::write(temp_dir.path().join("keep.proto"), b"keep")?;
        fs::write(temp_dir.path().join("notes.txt"), b"drop")?;
        fs::write(temp_dir.path().join(".sums"), b"keep.proto:x")?;

        let options = WalkOptions {
            extension: Some("proto".to_string()),
            skip_names: vec![".sums".to_string()],
        };
        let files = discover(temp_dir.path(), &options)?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].key, "keep.proto");

        let options = WalkOptions {
            extension: None,
            skip_names: vec![".sums".to_string()],
        };
        assert_eq!(discover(temp_dir.path(), &options)?.len(), 2);

        Ok(())
    }
}
