use crate::error::{ErrorKind, Result};
use crate::record::{ArtifactRecord, precedence};
use semver::Version;
use std::collections::BTreeMap;

/// Every known version of one collection, plus a pointer to the latest.
///
/// `latest` is maintained incrementally: inserts compare against it, and it
/// is only recomputed when the latest record itself is removed.
#[derive(Debug, Clone)]
pub struct VersionGroup {
    namespace: String,
    name: String,
    versions: BTreeMap<Version, ArtifactRecord>,
    latest: Option<Version>,
}

impl VersionGroup {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            versions: BTreeMap::new(),
            latest: None,
        }
    }

    /// A group seeded with its first record.
    pub fn from_record(record: ArtifactRecord) -> Result<Self> {
        let mut group = Self::new(record.namespace(), record.name());
        group.insert(record)?;
        Ok(group)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fqcn(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    /// Add a record, replacing (and returning) any record with the same
    /// version.
    ///
    /// Fails with [`IdentityMismatch`](ErrorKind::IdentityMismatch) if the
    /// record belongs to another collection, or
    /// [`InvalidVersion`](ErrorKind::InvalidVersion) if its version doesn't
    /// parse.
    pub fn insert(&mut self, record: ArtifactRecord) -> Result<Option<ArtifactRecord>> {
        if record.namespace() != self.namespace || record.name() != self.name {
            exn::bail!(ErrorKind::IdentityMismatch { expected: self.fqcn(), found: record.fqcn() });
        }
        let version = record.semver()?;
        let newer = match &self.latest {
            Some(latest) => precedence(&version, latest).is_gt(),
            None => true,
        };
        if newer {
            self.latest = Some(version.clone());
        }
        Ok(self.versions.insert(version, record))
    }

    /// Remove a version, recomputing the latest if it was the one removed.
    pub fn remove(&mut self, version: &Version) -> Option<ArtifactRecord> {
        let removed = self.versions.remove(version)?;
        if self.latest.as_ref() == Some(version) {
            self.latest = self.versions.keys().max_by(|a, b| precedence(a, b)).cloned();
        }
        Some(removed)
    }

    pub fn get(&self, version: &Version) -> Option<&ArtifactRecord> {
        self.versions.get(version)
    }

    /// Look up a version by its string form; unparseable input finds nothing.
    pub fn find(&self, version: &str) -> Option<&ArtifactRecord> {
        Version::parse(version).ok().and_then(|version| self.get(&version))
    }

    pub fn latest(&self) -> Option<&ArtifactRecord> {
        self.latest.as_ref().and_then(|version| self.versions.get(version))
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Records in ascending semantic-version order.
    pub fn iter(&self) -> impl Iterator<Item = (&Version, &ArtifactRecord)> {
        self.versions.iter()
    }

    pub fn records(&self) -> impl Iterator<Item = &ArtifactRecord> {
        self.versions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn record(version: &str) -> ArtifactRecord {
        ArtifactRecord::new("ns", "name", version, format!("sha-{version}"))
    }

    fn group(versions: &[&str]) -> VersionGroup {
        let mut group = VersionGroup::new("ns", "name");
        for version in versions {
            group.insert(record(version)).unwrap();
        }
        group
    }

    #[rstest]
    #[case(&["1.0.0", "1.1.0-beta"], "1.0.0")]
    #[case(&["1.1.0-beta", "1.0.0"], "1.0.0")]
    #[case(&["1.0.0-dev0"], "1.0.0-dev0")]
    #[case(&["1.0.0-alpha", "1.0.0-beta"], "1.0.0-beta")]
    #[case(&["0.0.1", "1.0.0-dev0", "0.2.0", "0.10.0"], "0.10.0")]
    fn test_latest(#[case] versions: &[&str], #[case] expected: &str) {
        assert_eq!(group(versions).latest().unwrap().version(), expected);
    }

    #[test]
    fn test_empty_group_has_no_latest() {
        let group = VersionGroup::new("ns", "name");
        assert!(group.latest().is_none());
        assert!(group.is_empty());
    }

    #[test]
    fn test_remove_latest_recomputes() {
        let mut group = group(&["1.0.0", "2.0.0", "2.1.0-rc.1", "1.5.0"]);
        assert_eq!(group.latest().unwrap().version(), "2.0.0");
        group.remove(&Version::parse("2.0.0").unwrap()).unwrap();
        assert_eq!(group.latest().unwrap().version(), "1.5.0");
        group.remove(&Version::parse("1.5.0").unwrap()).unwrap();
        group.remove(&Version::parse("1.0.0").unwrap()).unwrap();
        // Only a prerelease remains.
        assert_eq!(group.latest().unwrap().version(), "2.1.0-rc.1");
        group.remove(&Version::parse("2.1.0-rc.1").unwrap()).unwrap();
        assert!(group.latest().is_none());
    }

    #[test]
    fn test_remove_other_keeps_latest() {
        let mut group = group(&["1.0.0", "2.0.0"]);
        group.remove(&Version::parse("1.0.0").unwrap()).unwrap();
        assert_eq!(group.latest().unwrap().version(), "2.0.0");
        assert!(group.remove(&Version::parse("1.0.0").unwrap()).is_none());
    }

    #[test]
    fn test_rejects_other_identity() {
        let mut group = group(&["1.0.0"]);
        let err = group.insert(ArtifactRecord::new("ns", "other", "3.0.0", "x")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::IdentityMismatch { .. }));
        assert_eq!(group.len(), 1);
        assert_eq!(group.latest().unwrap().version(), "1.0.0");
    }

    #[test]
    fn test_rejects_invalid_version() {
        let mut group = VersionGroup::new("ns", "name");
        let err = group.insert(record("one-point-oh")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidVersion(_)));
        assert!(group.is_empty());
    }

    #[test]
    fn test_insert_same_version_replaces() {
        let mut group = group(&["1.0.0"]);
        let replaced = group.insert(ArtifactRecord::new("ns", "name", "1.0.0", "new")).unwrap();
        assert_eq!(replaced.unwrap().checksum(), "sha-1.0.0");
        assert_eq!(group.len(), 1);
        assert_eq!(group.find("1.0.0").unwrap().checksum(), "new");
        assert!(group.find("bogus").is_none());
    }
}
