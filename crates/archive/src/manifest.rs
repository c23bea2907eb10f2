use crate::Compression;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Read;

/// Name of the manifest document at the root of every collection archive.
pub const MANIFEST_FILENAME: &str = "MANIFEST.json";

/// The `collection_info` block of a manifest.
///
/// Only the identity fields are typed; everything else (authors, tags,
/// dependencies, ...) is carried through untouched in `rest`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub namespace: String,
    pub name: String,
    pub version: String,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl CollectionInfo {
    /// `namespace.name`
    pub fn fqcn(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub collection_info: CollectionInfo,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_manifest_entry(path: &str) -> bool {
    let path = path.strip_prefix("./").unwrap_or(path);
    path.eq_ignore_ascii_case(MANIFEST_FILENAME)
}

/// Read the manifest out of a gzipped collection tarball.
///
/// Only a top-level entry named `MANIFEST.json` (optionally prefixed with
/// `./`, compared case-insensitively) is considered.
#[tracing::instrument(level = "debug", skip_all)]
pub fn read_manifest<R: Read>(reader: R) -> Result<Manifest> {
    let mut archive = tar::Archive::new(Compression::Gzip.wrap_reader(reader));
    let entries = archive.entries().or_raise(|| ErrorKind::ManifestParse("unreadable archive".to_string()))?;
    for entry in entries {
        let mut entry = entry.or_raise(|| ErrorKind::ManifestParse("corrupt archive entry".to_string()))?;
        let matched = {
            let path = entry.path().or_raise(|| ErrorKind::InvalidData)?;
            is_manifest_entry(&path.to_string_lossy())
        };
        if !matched {
            continue;
        }
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).or_raise(|| ErrorKind::Io)?;
        let manifest: Manifest =
            serde_json::from_slice(&contents).or_raise(|| ErrorKind::ManifestParse(MANIFEST_FILENAME.to_string()))?;
        tracing::debug!(fqcn = %manifest.collection_info.fqcn(), version = %manifest.collection_info.version, "Read manifest");
        return Ok(manifest);
    }
    exn::bail!(ErrorKind::ManifestNotFound)
}
