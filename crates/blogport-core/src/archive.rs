//! Path-addressed archive codec.
//!
//! An [`Archive`] is an ordered mapping from `/`-separated UTF-8 paths to
//! raw byte payloads. It is the wire format for a whole export or import:
//! [`Archive::to_bytes`] builds a zip container, [`Archive::from_bytes`]
//! parses one back. Both directions are pure byte transforms with no I/O.
//!
//! Paths are stored without a leading `/` and iterate in sorted order, so
//! every listing produced by this module is deterministic.
//!
//! # Example
//!
//! ```rust
//! use blogport_core::archive::Archive;
//!
//! let mut archive = Archive::new();
//! archive.insert_text("posts/hello/index.md", "# Hello").unwrap();
//! archive.insert("posts/hello/images/a.png", vec![1, 2, 3]).unwrap();
//!
//! let bytes = archive.to_bytes().unwrap();
//! let parsed = Archive::from_bytes(&bytes).unwrap();
//! assert_eq!(parsed, archive);
//! assert_eq!(parsed.list_subdirectories("posts"), vec!["hello".to_string()]);
//! ```

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use serde::de::DeserializeOwned;
use tracing::warn;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Errors raised while building or parsing an archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive is not a readable zip container: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("failed to read or write archive entry {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid archive path: {0:?}")]
    InvalidPath(String),
    #[error("duplicate archive path: {0}")]
    DuplicatePath(String),
}

/// An in-memory, path-addressed container of byte payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Archive {
    entries: BTreeMap<String, Vec<u8>>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an archive from `(path, bytes)` pairs.
    ///
    /// Fails on the first invalid or duplicated path.
    pub fn from_entries<I, P, B>(entries: I) -> Result<Self, ArchiveError>
    where
        I: IntoIterator<Item = (P, B)>,
        P: Into<String>,
        B: Into<Vec<u8>>,
    {
        let mut archive = Self::new();
        for (path, bytes) in entries {
            archive.insert(path, bytes)?;
        }
        Ok(archive)
    }

    /// Add a binary payload. Zero-length payloads are allowed.
    pub fn insert(
        &mut self,
        path: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Result<(), ArchiveError> {
        let path = normalize_path(&path.into())?;
        if self.entries.contains_key(&path) {
            return Err(ArchiveError::DuplicatePath(path));
        }
        self.entries.insert(path, bytes.into());
        Ok(())
    }

    /// Add a UTF-8 text payload.
    pub fn insert_text(&mut self, path: impl Into<String>, text: &str) -> Result<(), ArchiveError> {
        self.insert(path, text.as_bytes().to_vec())
    }

    /// Serialize to a deflate-compressed zip container.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ArchiveError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for (path, bytes) in &self.entries {
            writer.start_file(path.as_str(), options)?;
            writer.write_all(bytes).map_err(|source| ArchiveError::Io {
                path: path.clone(),
                source,
            })?;
        }

        Ok(writer.finish()?.into_inner())
    }

    /// Parse a zip container. Directory entries are dropped; when the
    /// container repeats a path, the first occurrence wins.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ArchiveError> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = BTreeMap::new();

        for i in 0..zip.len() {
            let mut file = zip.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let raw_name = file.name().to_string();
            let path = match normalize_path(&raw_name) {
                Ok(p) => p,
                Err(_) => {
                    warn!(entry = %raw_name, "skipping archive entry with unusable path");
                    continue;
                }
            };

            let mut buf = Vec::with_capacity(preallocation(file.size()));
            file.read_to_end(&mut buf)
                .map_err(|source| ArchiveError::Io {
                    path: path.clone(),
                    source,
                })?;

            if entries.contains_key(&path) {
                warn!(entry = %path, "archive repeats a path; keeping the first copy");
                continue;
            }
            entries.insert(path, buf);
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Raw payload at `path`.
    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.entries.get(path).map(|b| b.as_slice())
    }

    /// Payload at `path` decoded as UTF-8; `None` when absent or not valid text.
    pub fn read_text(&self, path: &str) -> Option<String> {
        let bytes = self.entries.get(path)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Some(s.strip_prefix('\u{feff}').unwrap_or(s).to_string()),
            Err(e) => {
                warn!(path, error = %e, "archive entry is not valid UTF-8");
                None
            }
        }
    }

    /// Deserialize the JSON payload at `path` and check it with `validate`.
    ///
    /// Malformed JSON, a shape mismatch, or a rejected value all log a
    /// warning and yield `None`. This never fails.
    pub fn read_validated_json<T, F>(&self, path: &str, validate: F) -> Option<T>
    where
        T: DeserializeOwned,
        F: FnOnce(&T) -> Result<(), String>,
    {
        let text = self.read_text(path)?;
        let value: T = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                warn!(path, error = %e, "archive entry is not valid JSON for its schema");
                return None;
            }
        };
        if let Err(reason) = validate(&value) {
            warn!(path, %reason, "archive entry failed validation");
            return None;
        }
        Some(value)
    }

    /// [`read_validated_json`](Self::read_validated_json) with no extra checks.
    pub fn read_json<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        self.read_validated_json(path, |_| Ok(()))
    }

    /// All paths under `prefix` in archive order. An empty prefix lists everything.
    pub fn list_paths(&self, prefix: &str) -> Vec<&str> {
        let prefix = dir_prefix(prefix);
        self.entries
            .keys()
            .filter(|p| p.starts_with(&prefix))
            .map(|p| p.as_str())
            .collect()
    }

    /// Distinct first path segments below `prefix` that are themselves
    /// directories (have at least one deeper path).
    pub fn list_subdirectories(&self, prefix: &str) -> Vec<String> {
        let prefix = dir_prefix(prefix);
        let mut dirs: Vec<String> = Vec::new();
        for path in self.entries.keys() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            if let Some((first, _)) = rest.split_once('/') {
                if !first.is_empty() && !dirs.iter().any(|d| d == first) {
                    dirs.push(first.to_string());
                }
            }
        }
        dirs
    }

    /// Iterate over `(path, bytes)` in archive order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(p, b)| (p.as_str(), b.as_slice()))
    }

    pub fn into_entries(self) -> BTreeMap<String, Vec<u8>> {
        self.entries
    }
}

/// Build a zip container from a path → bytes mapping.
/// Upfront buffer size for an entry. The size in the zip header is
/// untrusted input, so it only seeds the buffer up to a cap.
fn preallocation(declared: u64) -> usize {
    const MAX_PREALLOC: u64 = 8 * 1024 * 1024;
    declared.min(MAX_PREALLOC) as usize
}

pub fn build(entries: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>, ArchiveError> {
    Archive::from_entries(entries.iter().map(|(p, b)| (p.clone(), b.clone())))?.to_bytes()
}

/// Parse a zip container into a path → bytes mapping.
pub fn parse(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u8>>, ArchiveError> {
    Ok(Archive::from_bytes(bytes)?.into_entries())
}

fn normalize_path(raw: &str) -> Result<String, ArchiveError> {
    let trimmed = raw.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.ends_with('/') {
        return Err(ArchiveError::InvalidPath(raw.to_string()));
    }
    Ok(trimmed.to_string())
}

fn dir_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}
