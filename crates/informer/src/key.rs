//! Resource keys and the functions deriving them from objects.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::DeletedObject;
use crate::meta::{ObjectMeta, Resource};

/// Identifies one resource instance: `namespace/name`, or `name` when
/// cluster-scoped.
///
/// Every notification about the same object yields an equal key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceKey {
    namespace: Option<String>,
    name: String,
}

impl ResourceKey {
    /// Key of a namespaced object.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: (!namespace.is_empty()).then_some(namespace),
            name: name.into(),
        }
    }

    /// Key of a cluster-scoped object.
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Derive the key from object metadata.
    pub fn from_meta(kind: &str, meta: &ObjectMeta) -> Result<Self> {
        if meta.name.is_empty() {
            return Err(Error::key_derivation(kind, "object has no name"));
        }
        if meta.name.contains('/') {
            return Err(Error::key_derivation(
                kind,
                format!("name '{}' contains '/'", meta.name),
            ));
        }
        match meta.namespace() {
            Some(ns) if ns.contains('/') => Err(Error::key_derivation(
                kind,
                format!("namespace '{ns}' contains '/'"),
            )),
            Some(ns) => Ok(Self::namespaced(ns, meta.name.clone())),
            None => Ok(Self::cluster(meta.name.clone())),
        }
    }

    /// The namespace, if the object is namespaced.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Split into `(namespace, name)`; cluster-scoped keys yield an empty namespace.
    pub fn split(&self) -> (&str, &str) {
        (self.namespace.as_deref().unwrap_or(""), &self.name)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for ResourceKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) if !name.is_empty() => Ok(Self::cluster(name)),
            (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => {
                Ok(Self::namespaced(ns, name))
            }
            (_, _, Some(_)) => Err(Error::invalid_key(s, "unexpected key format")),
            _ => Err(Error::invalid_key(s, "empty namespace or name")),
        }
    }
}

impl TryFrom<String> for ResourceKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ResourceKey> for String {
    fn from(key: ResourceKey) -> Self {
        key.to_string()
    }
}

/// Key of a live object.
pub fn meta_namespace_key<T: Resource>(obj: &T) -> Result<ResourceKey> {
    ResourceKey::from_meta(T::KIND, obj.meta())
}

/// Key of a deleted object; tombstones yield the key recorded when the
/// deletion was detected, even without the object's final state.
pub fn deletion_handling_key<T: Resource>(deleted: &DeletedObject<T>) -> Result<ResourceKey> {
    match deleted {
        DeletedObject::Tombstone(tombstone) => Ok(tombstone.key.clone()),
        DeletedObject::Final(obj) => meta_namespace_key(obj.as_ref()),
    }
}
