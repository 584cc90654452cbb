//! Session metadata store with fixed slots.

use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Fixed metadata slots on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaKey {
    /// Communication client bound to the session
    Client,
    /// Last error observed by the session's I/O loop
    LastError,
}

/// Value stored in a metadata slot
pub type MetaValue = Arc<dyn Any + Send + Sync>;

/// Small associative store keyed by [`MetaKey`]
#[derive(Default)]
pub struct SessionMeta {
    slots: DashMap<MetaKey, MetaValue>,
}

impl SessionMeta {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, returning the previous occupant of the slot
    pub fn attach(&self, key: MetaKey, value: MetaValue) -> Option<MetaValue> {
        self.slots.insert(key, value)
    }

    /// Clear a slot, returning its value
    pub fn remove(&self, key: MetaKey) -> Option<MetaValue> {
        self.slots.remove(&key).map(|(_, v)| v)
    }

    /// Untyped read of a slot
    pub fn get_raw(&self, key: MetaKey) -> Option<MetaValue> {
        self.slots.get(&key).map(|e| e.value().clone())
    }

    /// Typed read of a slot
    pub fn get<T: Any + Send + Sync>(&self, key: MetaKey) -> Option<Arc<T>> {
        self.get_raw(key)?.downcast::<T>().ok()
    }
}

impl fmt::Debug for SessionMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<MetaKey> = self.slots.iter().map(|e| *e.key()).collect();
        f.debug_struct("SessionMeta").field("slots", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_replace_remove() {
        let meta = SessionMeta::new();
        assert!(meta.attach(MetaKey::LastError, Arc::new(7u64)).is_none());

        let prev = meta.attach(MetaKey::LastError, Arc::new(8u64)).unwrap();
        assert_eq!(*prev.downcast::<u64>().unwrap(), 7);
        assert_eq!(*meta.get::<u64>(MetaKey::LastError).unwrap(), 8);

        assert!(meta.remove(MetaKey::LastError).is_some());
        assert!(meta.get_raw(MetaKey::LastError).is_none());
        assert!(meta.remove(MetaKey::LastError).is_none());
    }

    #[test]
    fn test_typed_get_mismatch() {
        let meta = SessionMeta::new();
        meta.attach(MetaKey::Client, Arc::new(String::from("client-1")));
        assert!(meta.get::<u64>(MetaKey::Client).is_none());
        assert_eq!(meta.get::<String>(MetaKey::Client).unwrap().as_str(), "client-1");
    }
}
