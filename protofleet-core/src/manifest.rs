//! Manifests: the ordered `(path, tag)` list a subscriber declares.
//!
//! The text form is one record per line, `path[:tag]`. Paths may contain the
//! separator themselves, so a line is always split at its **last** `:`.
//! The same line format is used by the ledger snapshot file.

use tracing::debug;

/// Separator between a path and its tag.
pub const SEPARATOR: char = ':';

/// One declared artifact. An empty `tag` means "no known version".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    pub path: String,
    pub tag: String,
}

impl ManifestRecord {
    pub fn new(path: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            tag: tag.into(),
        }
    }
}

/// Ordered manifest. Order is the subscriber's delivery priority.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    records: Vec<ManifestRecord>,
}

impl Manifest {
    pub fn new(records: Vec<ManifestRecord>) -> Self {
        Self { records }
    }

    /// Parse manifest text. Blank lines are skipped and records with an
    /// empty path are ignored.
    pub fn parse(text: &str) -> Self {
        let records = text.lines().filter_map(parse_line).collect();
        Self { records }
    }

    pub fn records(&self) -> &[ManifestRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remembered tag for `path` (first matching record).
    pub fn tag_of(&self, path: &str) -> Option<&str> {
        self.records
            .iter()
            .find(|r| r.path == path)
            .map(|r| r.tag.as_str())
    }

    /// Overwrite the tag of every record declaring `path`.
    pub fn set_tag(&mut self, path: &str, tag: &str) {
        for record in self.records.iter_mut().filter(|r| r.path == path) {
            record.tag = tag.to_string();
        }
    }

    pub fn push(&mut self, path: impl Into<String>, tag: impl Into<String>) {
        self.records.push(ManifestRecord::new(path, tag));
    }

    /// Render back to text. Records without a tag are written as a bare path.
    pub fn render(&self) -> String {
        self.records
            .iter()
            .map(|r| {
                if r.tag.is_empty() {
                    r.path.clone()
                } else {
                    format!("{}{}{}", r.path, SEPARATOR, r.tag)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl FromIterator<ManifestRecord> for Manifest {
    fn from_iter<I: IntoIterator<Item = ManifestRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

/// Parse a single `path[:tag]` line.
pub fn parse_line(line: &str) -> Option<ManifestRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (path, tag) = match line.rsplit_once(SEPARATOR) {
        Some((path, tag)) => (path, tag),
        None => (line, ""),
    };

    if path.is_empty() {
        debug!("Ignoring manifest record with empty path: {:?}", line);
        return None;
    }

    Some(ManifestRecord::new(path, tag))
}
