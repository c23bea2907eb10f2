use crate::error::{Error, ErrorKind, Result};
use depot_storage::Properties;
use exn::{OptionExt, ResultExt};
use serde_json::Value;

const NAMESPACE: &str = "namespace";
const NAME: &str = "name";
const VERSION: &str = "version";
const FQCN: &str = "fqcn";
const COLLECTION_INFO: &str = "collection_info";

/// The identity a collection archive was published with, decoded from the
/// store's property bag.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionProperties {
    pub namespace: String,
    pub name: String,
    pub version: String,
    /// The manifest's `collection_info` document.
    pub collection_info: Value,
    /// Written on publish, but not required for discovery.
    pub fqcn: Option<String>,
}

impl CollectionProperties {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        collection_info: Value,
    ) -> Self {
        let (namespace, name) = (namespace.into(), name.into());
        Self {
            fqcn: Some(format!("{namespace}.{name}")),
            namespace,
            name,
            version: version.into(),
            collection_info,
        }
    }
}

impl TryFrom<&Properties> for CollectionProperties {
    type Error = Error;

    fn try_from(properties: &Properties) -> Result<Self> {
        let required = |key: &'static str| -> Result<String> {
            Ok(properties.first(key).ok_or_raise(|| ErrorKind::MissingProperty(key.to_string()))?.to_string())
        };
        let namespace = required(NAMESPACE)?;
        let name = required(NAME)?;
        let version = required(VERSION)?;
        let collection_info = serde_json::from_str(&required(COLLECTION_INFO)?)
            .or_raise(|| ErrorKind::InvalidProperty(COLLECTION_INFO.to_string()))?;
        Ok(Self {
            namespace,
            name,
            version,
            collection_info,
            fqcn: properties.first(FQCN).map(str::to_string),
        })
    }
}

impl From<&CollectionProperties> for Properties {
    fn from(collection: &CollectionProperties) -> Self {
        let mut properties = Properties::new();
        properties.insert(COLLECTION_INFO, collection.collection_info.to_string());
        properties.insert(NAMESPACE, &collection.namespace);
        properties.insert(NAME, &collection.name);
        properties.insert(VERSION, &collection.version);
        properties.insert(FQCN, format!("{}.{}", collection.namespace, collection.name));
        properties
    }
}
