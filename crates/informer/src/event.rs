//! Change notifications delivered to subscribers.

use std::sync::Arc;

use crate::key::ResourceKey;

/// Placeholder for an object whose deletion was detected without seeing its
/// final state, e.g. it vanished between two full listings.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedFinalStateUnknown<T> {
    /// Key the object was cached under.
    pub key: ResourceKey,
    /// Last known state, if any.
    pub obj: Option<Arc<T>>,
}

/// What a delete notification carries.
#[derive(Debug, Clone, PartialEq)]
pub enum DeletedObject<T> {
    /// The object as it was when deleted.
    Final(Arc<T>),
    /// Deletion inferred from a relist.
    Tombstone(DeletedFinalStateUnknown<T>),
}

impl<T> DeletedObject<T> {
    /// The last known state of the object, if any.
    pub fn object(&self) -> Option<&Arc<T>> {
        match self {
            Self::Final(obj) => Some(obj),
            Self::Tombstone(tombstone) => tombstone.obj.as_ref(),
        }
    }

    /// True if the final state was not observed.
    pub const fn is_tombstone(&self) -> bool {
        matches!(self, Self::Tombstone(_))
    }
}

/// A typed change to the cached collection.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<T> {
    /// An object appeared.
    Added(Arc<T>),
    /// An object was replaced; resyncs deliver `old` and `new` at the same version.
    Updated { old: Arc<T>, new: Arc<T> },
    /// An object disappeared.
    Deleted(DeletedObject<T>),
}

impl<T> WatchEvent<T> {
    /// Short name for logging.
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Updated { .. } => "updated",
            Self::Deleted(_) => "deleted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_expose_last_known_state() {
        let final_state = DeletedObject::Final(Arc::new(7_u32));
        assert_eq!(final_state.object().map(|obj| **obj), Some(7));
        assert!(!final_state.is_tombstone());

        let known = DeletedObject::Tombstone(DeletedFinalStateUnknown {
            key: ResourceKey::namespaced("ns", "a"),
            obj: Some(Arc::new(3_u32)),
        });
        assert_eq!(known.object().map(|obj| **obj), Some(3));
        assert!(known.is_tombstone());

        let unknown: DeletedObject<u32> = DeletedObject::Tombstone(DeletedFinalStateUnknown {
            key: ResourceKey::namespaced("ns", "a"),
            obj: None,
        });
        assert!(unknown.object().is_none());
    }
}
