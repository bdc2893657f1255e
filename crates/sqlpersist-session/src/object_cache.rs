//! Per-transaction object cache.
//!
//! Holds every object a transaction touched, in the order it first saw them,
//! and indexes those whose key is complete so each row maps to exactly one
//! [`ObjectHandle`]. New objects waiting for a server-generated key are
//! tracked but only indexed once [`ObjectCache::register`] sees the key.

use sqlpersist_core::{ObjectHandle, ObjectKey, ObjectState, Value};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ObjectCache {
    /// First-seen order; removed objects leave a hole until compaction
    tracked: Vec<Option<ObjectHandle>>,
    /// Handle identity to its slot in `tracked`
    slots: HashMap<usize, usize>,
    by_key: HashMap<ObjectKey, ObjectHandle>,
    /// Handle identity to the key it is indexed under
    keys: HashMap<usize, ObjectKey>,
}

fn complete_key(handle: &ObjectHandle) -> Option<ObjectKey> {
    let key = handle.read().object_key();
    if key.values().iter().any(Value::is_null) {
        None
    } else {
        Some(key)
    }
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ObjectKey) -> Option<&ObjectHandle> {
        self.by_key.get(key)
    }

    pub fn contains(&self, handle: &ObjectHandle) -> bool {
        self.slots.contains_key(&handle.identity())
    }

    fn push(&mut self, handle: &ObjectHandle) {
        self.slots.insert(handle.identity(), self.tracked.len());
        self.tracked.push(Some(handle.clone()));
    }

    fn index(&mut self, key: ObjectKey, handle: &ObjectHandle) {
        let identity = handle.identity();
        if let Some(previous) = self.keys.insert(identity, key.clone())
            && previous != key
            && self.by_key.get(&previous).is_some_and(|h| h.ptr_eq(handle))
        {
            self.by_key.remove(&previous);
        }
        self.by_key.insert(key, handle.clone());
    }

    /// Start tracking `handle`. Returns the already cached object instead
    /// when one with the same key exists.
    pub fn track(&mut self, handle: ObjectHandle) -> ObjectHandle {
        if self.contains(&handle) {
            return handle;
        }
        if let Some(key) = complete_key(&handle) {
            if let Some(existing) = self.by_key.get(&key) {
                return existing.clone();
            }
            self.index(key, &handle);
        }
        self.push(&handle);
        handle
    }

    /// Index `handle` under its current key, e.g. after the server
    /// assigned it.
    pub fn register(&mut self, handle: &ObjectHandle) {
        if let Some(key) = complete_key(handle) {
            self.index(key, handle);
        }
        if !self.contains(handle) {
            self.push(handle);
        }
    }

    /// Stop tracking `handle`.
    pub fn remove(&mut self, handle: &ObjectHandle) {
        let identity = handle.identity();
        if let Some(slot) = self.slots.remove(&identity) {
            self.tracked[slot] = None;
        }
        if let Some(key) = self.keys.remove(&identity)
            && self.by_key.get(&key).is_some_and(|h| h.ptr_eq(handle))
        {
            self.by_key.remove(&key);
        }
        if self.tracked.len() > 32 && self.slots.len() < self.tracked.len() / 2 {
            self.compact();
        }
    }

    fn compact(&mut self) {
        self.tracked.retain(Option::is_some);
        self.slots.clear();
        for (slot, handle) in self.tracked.iter().flatten().enumerate() {
            self.slots.insert(handle.identity(), slot);
        }
    }

    /// Tracked objects in the order they were first seen.
    pub fn objects(&self) -> impl Iterator<Item = &ObjectHandle> {
        self.tracked.iter().flatten()
    }

    fn matching(&self, predicate: impl Fn(ObjectState) -> bool) -> Vec<ObjectHandle> {
        self.objects()
            .filter(|h| predicate(h.state()))
            .cloned()
            .collect()
    }

    /// Objects waiting to be inserted.
    pub fn new_objects(&self) -> Vec<ObjectHandle> {
        self.matching(|s| s.is_new() && !s.is_deleted())
    }

    /// Persisted objects with pending changes.
    pub fn changed_objects(&self) -> Vec<ObjectHandle> {
        self.matching(|s| {
            !s.is_new()
                && !s.is_deleted()
                && (s.is_changed() || s.contains(ObjectState::SERVER_SIDE_PROPERTIES_HYDRATED))
        })
    }

    /// Persisted objects marked for deletion. New objects that were deleted
    /// before being inserted are not included.
    pub fn deleted_objects(&self) -> Vec<ObjectHandle> {
        self.matching(|s| s.is_deleted() && !s.is_new())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracked.clear();
        self.slots.clear();
        self.by_key.clear();
        self.keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlpersist_core::{
        DataObject, PropertyDescriptor, SqlType, TypeDescriptor, TypeModel, TypeRegistry,
    };
    use std::sync::Arc;

    fn model() -> Arc<TypeModel> {
        let registry = TypeRegistry::builder()
            .register(
                TypeDescriptor::new("Student")
                    .property(
                        PropertyDescriptor::scalar("Id", SqlType::BigInt)
                            .primary_key()
                            .auto_increment(),
                    )
                    .property(PropertyDescriptor::scalar("Name", SqlType::Text)),
            )
            .build()
            .unwrap();
        Arc::clone(registry.model("Student").unwrap())
    }

    fn student(model: &Arc<TypeModel>, id: Option<i64>) -> ObjectHandle {
        let mut object = DataObject::new(Arc::clone(model));
        if let Some(id) = id {
            object.set("Id", id).unwrap();
        }
        ObjectHandle::new(object)
    }

    #[test]
    fn test_same_key_yields_cached_instance() {
        let model = model();
        let mut cache = ObjectCache::new();
        let first = cache.track(student(&model, Some(1)));
        let second = cache.track(student(&model, Some(1)));
        assert!(first.ptr_eq(&second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_pending_key_is_indexed_after_register() {
        let model = model();
        let mut cache = ObjectCache::new();
        let handle = cache.track(student(&model, None));
        let key = ObjectKey::new(Arc::clone(model.name_arc()), vec![Value::BigInt(9)]);
        assert!(cache.get(&key).is_none());

        handle.write().set("Id", 9_i64).unwrap();
        cache.register(&handle);
        assert!(cache.get(&key).unwrap().ptr_eq(&handle));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_state_partitions() {
        let model = model();
        let mut cache = ObjectCache::new();
        let fresh = cache.track(student(&model, Some(1)));
        let stored = cache.track(student(&model, Some(2)));
        stored.write().reset_modified();
        stored.write().set("Name", "Changed").unwrap();
        let doomed = cache.track(student(&model, Some(3)));
        doomed.write().reset_modified();
        doomed.write().mark_deleted();

        assert!(cache.new_objects()[0].ptr_eq(&fresh));
        assert!(cache.changed_objects()[0].ptr_eq(&stored));
        assert!(cache.deleted_objects()[0].ptr_eq(&doomed));

        cache.remove(&doomed);
        assert!(cache.deleted_objects().is_empty());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_removal_keeps_order_and_indexes() {
        let model = model();
        let mut cache = ObjectCache::new();
        let handles: Vec<ObjectHandle> = (1..=100)
            .map(|id| cache.track(student(&model, Some(id))))
            .collect();

        // Keep every third student
        for (i, handle) in handles.iter().enumerate() {
            if (i + 1) % 3 != 0 {
                cache.remove(handle);
            }
        }

        assert_eq!(cache.len(), 33);
        let ids: Vec<Value> = cache
            .objects()
            .map(|h| h.read().get_value("Id").unwrap().clone())
            .collect();
        assert_eq!(ids, (1..=33).map(|n| Value::BigInt(n * 3)).collect::<Vec<_>>());
        assert!(cache.contains(&handles[2]));
        assert!(!cache.contains(&handles[0]));

        let removed = ObjectKey::new(Arc::clone(model.name_arc()), vec![Value::BigInt(1)]);
        assert!(cache.get(&removed).is_none());
        let kept = ObjectKey::new(Arc::clone(model.name_arc()), vec![Value::BigInt(99)]);
        assert!(cache.get(&kept).unwrap().ptr_eq(&handles[98]));

        // A removed object can be tracked again, after the survivors
        let again = cache.track(handles[0].clone());
        assert!(again.ptr_eq(&handles[0]));
        assert!(cache.objects().last().unwrap().ptr_eq(&handles[0]));
        assert_eq!(cache.len(), 34);
    }

    #[test]
    fn test_rekeyed_object_drops_its_old_index() {
        let model = model();
        let mut cache = ObjectCache::new();
        let handle = cache.track(student(&model, Some(4)));
        handle.write().set("Id", 5_i64).unwrap();
        cache.register(&handle);

        let old = ObjectKey::new(Arc::clone(model.name_arc()), vec![Value::BigInt(4)]);
        let new = ObjectKey::new(Arc::clone(model.name_arc()), vec![Value::BigInt(5)]);
        assert!(cache.get(&old).is_none());
        assert!(cache.get(&new).unwrap().ptr_eq(&handle));

        cache.remove(&handle);
        assert!(cache.get(&new).is_none());
        assert!(cache.is_empty());
    }
}
