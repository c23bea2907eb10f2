//! Storage models.
//!
//! These types describe what a content store knows about a blob: its
//! metadata, the digests it was deployed with, and its property bag.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::PathBuf;
use time::OffsetDateTime;

/// File metadata returned by storage backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Relative path from storage root
    pub path: PathBuf,
    pub is_dir: bool,
    /// File size in bytes
    pub size: u64,
    pub mime_type: Option<String>,
    /// Digests recorded by the store, when it keeps any. Listings may
    /// leave this empty even when [`stat()`](crate::StorageBackend::stat)
    /// would return them.
    pub checksums: Option<Checksums>,
    pub created: OffsetDateTime,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
}
impl FileInfo {
    /// Create a new file entry (no checksums yet).
    pub fn new(path: impl Into<PathBuf>, size: u64, created: OffsetDateTime, modified: OffsetDateTime) -> Self {
        Self {
            path: path.into(),
            is_dir: false,
            size,
            mime_type: None,
            checksums: None,
            created,
            modified,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_checksums(mut self, checksums: Checksums) -> Self {
        self.checksums = Some(checksums);
        self
    }

    /// Mark the entry as a directory.
    pub fn into_dir(mut self) -> Self {
        self.is_dir = true;
        self
    }

    /// Final path component, if any.
    pub fn filename(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}

/// Lowercase hex digests accompanying a deploy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

/// A store's raw property bag: every key maps to a list of values.
///
/// Typed interpretation of the bag belongs to the caller; this type only
/// stores strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, Vec<String>>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `key` with a single value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), vec![value.into()]);
    }

    /// First value stored under `key`.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|values| values.first()).map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }
}
impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut properties = Self::new();
        for (key, value) in iter {
            properties.insert(key, value);
        }
        properties
    }
}
impl From<BTreeMap<String, Vec<String>>> for Properties {
    fn from(map: BTreeMap<String, Vec<String>>) -> Self {
        Self(map)
    }
}

/// A credential attached to outgoing store calls.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Sent as a bearer token.
    AccessToken(String),
    /// Sent in the store's API key header.
    ApiKey(String),
}
impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        // Never print the secret.
        match self {
            Self::AccessToken(_) => f.write_str("AccessToken(..)"),
            Self::ApiKey(_) => f.write_str("ApiKey(..)"),
        }
    }
}
