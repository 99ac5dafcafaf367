//! Object metadata shared by every resource kind.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifying metadata of a resource object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Unique name within the namespace.
    #[serde(default)]
    pub name: String,
    /// Namespace; `None` or empty for cluster-scoped objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Opaque version assigned by the source on every change.
    #[serde(default)]
    pub resource_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Create metadata for a cluster-scoped object.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Create metadata for a namespaced object.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    /// Set the resource version.
    #[must_use]
    pub fn with_resource_version(mut self, version: impl Into<String>) -> Self {
        self.resource_version = version.into();
        self
    }

    /// The namespace, treating an empty string as cluster-scoped.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }
}

/// A resource kind the informer can cache.
pub trait Resource: Clone + fmt::Debug + Send + Sync + 'static {
    /// Kind name used in logs and errors.
    const KIND: &'static str;

    /// The object's metadata.
    fn meta(&self) -> &ObjectMeta;

    /// Mutable access to the object's metadata.
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Shortcut for `meta().resource_version`.
    fn resource_version(&self) -> &str {
        &self.meta().resource_version
    }
}
