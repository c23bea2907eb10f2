use crate::error::{ErrorKind, Result};
use depot_storage::FileInfo;
use exn::ResultExt;
use semver::Version;
use serde_json::Value;
use std::cmp::Ordering;
use time::OffsetDateTime;

/// Order two versions the way collections are ranked.
///
/// Semantic-version precedence (build metadata ignored), except that a
/// prerelease always orders below a release regardless of the numbers.
///
/// ```
/// use semver::Version;
/// use std::cmp::Ordering;
///
/// let dev = Version::parse("1.0.0-dev0").unwrap();
/// let old = Version::parse("0.0.1").unwrap();
/// assert_eq!(depot_catalog::precedence(&dev, &old), Ordering::Less);
/// ```
pub fn precedence(a: &Version, b: &Version) -> Ordering {
    match (a.pre.is_empty(), b.pre.is_empty()) {
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => a.cmp_precedence(b),
    }
}

/// One deployed collection archive and the metadata it was published with.
///
/// Records compare equal when their content checksums are equal, whatever
/// else differs. They only order against records of the same collection:
/// comparing `a.b` with `c.d` is neither `<` nor `>`.
#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    namespace: String,
    name: String,
    version: String,
    checksum: String,
    created: OffsetDateTime,
    modified: OffsetDateTime,
    size: u64,
    mime_type: Option<String>,
    filename: String,
    collection_info: Value,
}

impl ArtifactRecord {
    /// The version isn't validated here; see [`semver()`](Self::semver).
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        checksum: impl Into<String>,
    ) -> Self {
        let (namespace, name, version) = (namespace.into(), name.into(), version.into());
        let now = OffsetDateTime::now_utc();
        Self {
            filename: format!("{namespace}-{name}-{version}.tar.gz"),
            namespace,
            name,
            version,
            checksum: checksum.into(),
            created: now,
            modified: now,
            size: 0,
            mime_type: None,
            collection_info: Value::Null,
        }
    }

    /// Take file name, size, MIME type and timestamps from a store entry.
    pub fn with_file(mut self, info: &FileInfo) -> Self {
        if let Some(filename) = info.filename() {
            self.filename = filename.to_string();
        }
        self.size = info.size;
        self.mime_type = info.mime_type.clone();
        self.created = info.created;
        self.modified = info.modified;
        self
    }

    pub fn with_collection_info(mut self, collection_info: Value) -> Self {
        self.collection_info = collection_info;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// `namespace.name`
    pub fn fqcn(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    /// sha256 of the archive, lowercase hex.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn created(&self) -> OffsetDateTime {
        self.created
    }

    pub fn modified(&self) -> OffsetDateTime {
        self.modified
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The manifest's `collection_info` document.
    pub fn collection_info(&self) -> &Value {
        &self.collection_info
    }

    pub fn semver(&self) -> Result<Version> {
        Ok(Version::parse(&self.version).or_raise(|| ErrorKind::InvalidVersion(self.version.clone()))?)
    }

    pub fn is_prerelease(&self) -> Result<bool> {
        Ok(!self.semver()?.pre.is_empty())
    }

    fn same_collection(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.name == other.name
    }
}

impl PartialEq for ArtifactRecord {
    fn eq(&self, other: &Self) -> bool {
        self.checksum == other.checksum
    }
}

impl PartialOrd for ArtifactRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if !self.same_collection(other) {
            return None;
        }
        Some(precedence(&self.semver().ok()?, &other.semver().ok()?))
    }
}

impl PartialEq<Version> for ArtifactRecord {
    fn eq(&self, other: &Version) -> bool {
        self.semver().is_ok_and(|version| version.cmp_precedence(other) == Ordering::Equal)
    }
}

impl PartialOrd<Version> for ArtifactRecord {
    fn partial_cmp(&self, other: &Version) -> Option<Ordering> {
        Some(precedence(&self.semver().ok()?, other))
    }
}
