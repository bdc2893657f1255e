//! Copy-on-write cache of formatted insert and update templates.
//!
//! Readers clone the current `Arc<HashMap>` and look up without holding the
//! lock. Writers build a new map with the extra entry and swap it in, so a
//! published map is never mutated.

use parking_lot::RwLock;
use sqlpersist_core::{Error, ObjectPropertyValue, Result, TypeModel, Value};
use sqlpersist_query::FormatResult;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const IDENTITY_INSERT_SALT: u64 = 26_542_323;

/// Identifies a template by type, changed columns and identity insert.
#[derive(Debug, Clone)]
pub struct CommandKey {
    type_name: Arc<str>,
    columns: Arc<[Arc<str>]>,
    requires_identity_insert: bool,
    hash: u64,
}

impl CommandKey {
    /// Key for `model` writing `columns` in the given order.
    pub fn new(
        model: &TypeModel,
        columns: &[ObjectPropertyValue],
        requires_identity_insert: bool,
    ) -> Self {
        let mut hash = model.name_hash() ^ columns.len() as u64;
        if let Some(first) = columns.first() {
            hash ^= first.name_hash;
        }
        if columns.len() > 1
            && let Some(last) = columns.last()
        {
            hash ^= last.name_hash;
        }
        if requires_identity_insert {
            hash ^= IDENTITY_INSERT_SALT;
        }

        Self {
            type_name: Arc::clone(model.name_arc()),
            columns: columns.iter().map(|c| Arc::clone(&c.column_name)).collect(),
            requires_identity_insert,
            hash,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn columns(&self) -> &[Arc<str>] {
        &self.columns
    }

    pub fn requires_identity_insert(&self) -> bool {
        self.requires_identity_insert
    }
}

impl PartialEq for CommandKey {
    fn eq(&self, other: &Self) -> bool {
        (Arc::ptr_eq(&self.type_name, &other.type_name) || self.type_name == other.type_name)
            && self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|(a, b)| Arc::ptr_eq(a, b) || a == b)
            && self.requires_identity_insert == other.requires_identity_insert
    }
}

impl Eq for CommandKey {}

impl Hash for CommandKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// A formatted template plus where each input lands in it.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedCommand {
    pub format: Arc<FormatResult>,
    /// Placeholder slot of each written column, in column order
    pub value_placeholders: Vec<usize>,
    /// Placeholder slot of each key column, in key order
    pub key_placeholders: Vec<usize>,
}

impl CachedCommand {
    pub fn new(format: FormatResult, value_count: usize, key_count: usize) -> Self {
        Self {
            format: Arc::new(format),
            value_placeholders: (0..value_count).collect(),
            key_placeholders: (value_count..value_count + key_count).collect(),
        }
    }

    /// Parameters for one object's column values and key.
    pub fn bind(&self, values: &[Value], key: &[Value]) -> Result<Vec<Value>> {
        if values.len() != self.value_placeholders.len() || key.len() != self.key_placeholders.len()
        {
            return Err(Error::shape(format!(
                "template expects {} values and {} key values, got {} and {}",
                self.value_placeholders.len(),
                self.key_placeholders.len(),
                values.len(),
                key.len()
            )));
        }

        let slots = self.value_placeholders.len() + self.key_placeholders.len();
        let mut bound = vec![Value::Null; slots];
        for (slot, value) in self.value_placeholders.iter().zip(values) {
            bound[*slot] = value.clone();
        }
        for (slot, value) in self.key_placeholders.iter().zip(key) {
            bound[*slot] = value.clone();
        }
        self.format.rebind(&bound)
    }
}

/// Shared template cache.
#[derive(Debug, Default)]
pub struct CommandCache {
    map: RwLock<Arc<HashMap<CommandKey, Arc<CachedCommand>>>>,
}

impl CommandCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_get(&self, key: &CommandKey) -> Option<Arc<CachedCommand>> {
        let snapshot = Arc::clone(&self.map.read());
        let hit = snapshot.get(key).cloned();
        tracing::trace!(
            type_name = key.type_name(),
            columns = key.columns.len(),
            hit = hit.is_some(),
            "Command cache lookup"
        );
        hit
    }

    /// Publish a template, returning whichever one the cache holds
    /// afterwards. An entry published first is never replaced.
    pub fn publish(&self, key: CommandKey, command: CachedCommand) -> Arc<CachedCommand> {
        let mut guard = self.map.write();
        if let Some(existing) = guard.get(&key) {
            return Arc::clone(existing);
        }
        let command = Arc::new(command);
        let mut next = HashMap::clone(&guard);
        next.insert(key, Arc::clone(&command));
        *guard = Arc::new(next);
        command
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        *self.map.write() = Arc::new(HashMap::new());
    }
}

/// Insert and update templates for one database.
#[derive(Debug, Default)]
pub struct CommandCaches {
    pub insert: CommandCache,
    pub update: CommandCache,
}
