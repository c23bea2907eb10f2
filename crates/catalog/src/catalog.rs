use crate::error::ErrorKind;
use crate::group::VersionGroup;
use crate::record::ArtifactRecord;
use futures::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// Version groups keyed by `namespace.name`.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    groups: BTreeMap<String, VersionGroup>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group records by collection. Records whose version doesn't parse are
    /// skipped with a warning.
    pub fn from_records(records: impl IntoIterator<Item = ArtifactRecord>) -> Self {
        let mut catalog = Self::new();
        for record in records {
            catalog.insert(record);
        }
        catalog
    }

    /// Drain a record stream (usually [`discover()`](crate::discover)) into
    /// a catalog.
    pub async fn collect(records: impl Stream<Item = ArtifactRecord>) -> Self {
        let mut catalog = Self::new();
        let mut records = std::pin::pin!(records);
        while let Some(record) = records.next().await {
            catalog.insert(record);
        }
        catalog
    }

    /// Add one record to its group, creating the group if needed.
    ///
    /// Returns `false` if the record was skipped.
    pub fn insert(&mut self, record: ArtifactRecord) -> bool {
        let fqcn = record.fqcn();
        let (record_namespace, record_name) = (record.namespace().to_string(), record.name().to_string());
        let result = match self.groups.entry(fqcn.clone()) {
            Entry::Occupied(mut group) => group.get_mut().insert(record).map(|_| ()),
            Entry::Vacant(slot) => VersionGroup::from_record(record).map(|group| {
                slot.insert(group);
            }),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                match &*e {
                    ErrorKind::InvalidVersion(version) => {
                        tracing::warn!(fqcn, version, "Skipping collection with an invalid version");
                    },
                    ErrorKind::IdentityMismatch { expected, found } => {
                        tracing::warn!(
                            fqcn,
                            namespace = %record_namespace,
                            name = %record_name,
                            %expected,
                            %found,
                            "Skipping collection whose namespace and name clash with another collection"
                        );
                    },
                    _ => tracing::warn!(fqcn, error = ?e, "Skipping collection"),
                }
                false
            },
        }
    }

    pub fn get(&self, fqcn: &str) -> Option<&VersionGroup> {
        self.groups.get(fqcn)
    }

    /// Groups in `namespace.name` order.
    pub fn groups(&self) -> impl Iterator<Item = &VersionGroup> {
        self.groups.values()
    }

    pub fn into_groups(self) -> impl Iterator<Item = VersionGroup> {
        self.groups.into_values()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
