//! Persisted objects and their change-tracking state machine.
//!
//! A [`DataObject`] holds one value per declared property, a changed flag per
//! property and an [`ObjectState`]. Objects are shared through
//! [`ObjectHandle`] so that a reference observes the referenced object's
//! server-generated key as soon as it is assigned.
//!
//! State transitions:
//!
//! ```text
//! Unchanged --set--> Changed --reset_modified--> Unchanged
//! New       --set--> NewChanged --inserted--> Unchanged
//! any       --mark_deleted--> Deleted
//! ```

use crate::error::{Error, MissingObjectError, ObjectErrorKind, Result};
use crate::registry::{ColumnSource, PropertyModel, TemplatePart, TypeModel};
use crate::row::Row;
use crate::types::SqlType;
use crate::value::Value;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

// ==================== State ====================

/// Object lifecycle flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObjectState(u8);

impl ObjectState {
    pub const UNCHANGED: Self = Self(0);
    pub const NEW: Self = Self(1);
    pub const CHANGED: Self = Self(2);
    pub const NEW_CHANGED: Self = Self(1 | 2);
    pub const DELETED: Self = Self(4);
    pub const SERVER_SIDE_PROPERTIES_HYDRATED: Self = Self(8);

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Are all flags of `other` set?
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_new(self) -> bool {
        self.contains(Self::NEW)
    }

    pub const fn is_changed(self) -> bool {
        self.contains(Self::CHANGED)
    }

    pub const fn is_deleted(self) -> bool {
        self.contains(Self::DELETED)
    }

    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for ObjectState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ObjectState {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "Unchanged");
        }
        let names = [
            (Self::NEW, "New"),
            (Self::CHANGED, "Changed"),
            (Self::DELETED, "Deleted"),
            (Self::SERVER_SIDE_PROPERTIES_HYDRATED, "ServerSidePropertiesHydrated"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

// ==================== Values ====================

/// Value held by one property.
#[derive(Debug, Clone)]
pub enum PropertyValue {
    Scalar(Value),
    Reference(Option<ObjectHandle>),
}

impl PropertyValue {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            PropertyValue::Scalar(v) => Some(v),
            PropertyValue::Reference(_) => None,
        }
    }

    pub fn as_reference(&self) -> Option<&ObjectHandle> {
        match self {
            PropertyValue::Reference(r) => r.as_ref(),
            PropertyValue::Scalar(_) => None,
        }
    }
}

/// One changed property or key component, flattened to a column.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPropertyValue {
    pub sql_type: SqlType,
    pub property_name: String,
    pub column_name: Arc<str>,
    pub name_hash: u64,
    pub value: Value,
}

/// Equality conditions identifying a deflated object by something other
/// than its key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeflatedPredicate {
    /// (property name, value) pairs, all of which must match
    pub conditions: Vec<(String, Value)>,
}

impl DeflatedPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((property.into(), value.into()));
        self
    }
}

/// Identity of an object in a transaction's object cache.
#[derive(Debug, Clone)]
pub struct ObjectKey {
    type_name: Arc<str>,
    values: Vec<Value>,
    hash: u64,
}

impl ObjectKey {
    pub fn new(type_name: Arc<str>, values: Vec<Value>) -> Self {
        let mut hasher = DefaultHasher::new();
        type_name.hash(&mut hasher);
        for value in &values {
            value.hash_into(&mut hasher);
        }
        Self {
            type_name,
            values,
            hash: hasher.finish(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl PartialEq for ObjectKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.type_name == other.type_name
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| a.key_eq(b))
    }
}

impl Eq for ObjectKey {}

impl Hash for ObjectKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

// ==================== Handle ====================

/// Shared, lockable reference to a [`DataObject`].
#[derive(Clone)]
pub struct ObjectHandle(Arc<RwLock<DataObject>>);

impl ObjectHandle {
    pub fn new(object: DataObject) -> Self {
        Self(Arc::new(RwLock::new(object)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, DataObject> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, DataObject> {
        self.0.write()
    }

    /// Same underlying object?
    pub fn ptr_eq(&self, other: &ObjectHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared object; equal exactly when [`ptr_eq`](Self::ptr_eq)
    /// holds, for as long as either handle is alive.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }

    pub fn model(&self) -> Arc<TypeModel> {
        Arc::clone(&self.read().model)
    }

    pub fn state(&self) -> ObjectState {
        self.read().state
    }
}

impl fmt::Debug for ObjectHandle {
    // References may form cycles, so only the type and state are printed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Some(object) => write!(f, "ObjectHandle({}, {:?})", object.model.name(), object.state),
            None => write!(f, "ObjectHandle(<locked>)"),
        }
    }
}

// ==================== Object ====================

/// A tracked instance of a persisted type.
#[derive(Debug, Clone)]
pub struct DataObject {
    model: Arc<TypeModel>,
    values: Vec<PropertyValue>,
    changed: Vec<bool>,
    state: ObjectState,
    deflated: bool,
    predicate: Option<DeflatedPredicate>,
}

fn empty_value(property: &PropertyModel) -> PropertyValue {
    if property.is_reference() {
        PropertyValue::Reference(None)
    } else {
        PropertyValue::Scalar(Value::Null)
    }
}

/// Render a value for computed text.
fn text_of(value: &Value) -> String {
    match value {
        Value::Text(s) | Value::Decimal(s) => s.clone(),
        other => other.to_string(),
    }
}

impl DataObject {
    /// A new object; properties with declared defaults start out changed.
    pub fn new(model: Arc<TypeModel>) -> Self {
        let mut values = Vec::with_capacity(model.properties().len());
        let mut changed = Vec::with_capacity(model.properties().len());
        for property in model.properties() {
            match &property.descriptor.default {
                Some(default) if !property.is_reference() => {
                    values.push(PropertyValue::Scalar(default.clone()));
                    changed.push(true);
                }
                _ => {
                    values.push(empty_value(property));
                    changed.push(false);
                }
            }
        }
        Self {
            model,
            values,
            changed,
            state: ObjectState::NEW,
            deflated: false,
            predicate: None,
        }
    }

    /// A key-only reference. `key` holds the flattened key values.
    ///
    /// `resolve` produces handles for key properties that are themselves
    /// references, given the target type and its flattened key values.
    pub fn new_deflated<F>(model: Arc<TypeModel>, key: &[Value], resolve: &mut F) -> Result<Self>
    where
        F: FnMut(&str, Vec<Value>) -> Result<ObjectHandle>,
    {
        if key.len() != model.key_columns().len() {
            return Err(Error::object(
                ObjectErrorKind::InvalidState,
                model.name(),
                format!(
                    "expected {} key values, got {}",
                    model.key_columns().len(),
                    key.len()
                ),
            ));
        }

        let mut values: Vec<PropertyValue> = model.properties().iter().map(empty_value).collect();
        let mut offset = 0;
        for &index in model.key_properties() {
            let property = &model.properties()[index];
            let width = property.columns.len();
            let part = &key[offset..offset + width];
            values[index] = match &property.target {
                Some(target) => PropertyValue::Reference(Some(resolve(target, part.to_vec())?)),
                None => PropertyValue::Scalar(part[0].clone()),
            };
            offset += width;
        }

        let changed = vec![false; values.len()];
        Ok(Self {
            model,
            values,
            changed,
            state: ObjectState::UNCHANGED,
            deflated: true,
            predicate: None,
        })
    }

    /// A reference identified by a predicate rather than a key.
    pub fn new_deflated_by_predicate(model: Arc<TypeModel>, predicate: DeflatedPredicate) -> Self {
        let values: Vec<PropertyValue> = model.properties().iter().map(empty_value).collect();
        let changed = vec![false; values.len()];
        Self {
            model,
            values,
            changed,
            state: ObjectState::UNCHANGED,
            deflated: true,
            predicate: Some(predicate),
        }
    }

    /// Materialize an unchanged object from a row.
    pub fn from_row<F>(model: Arc<TypeModel>, row: &Row, resolve: &mut F) -> Result<Self>
    where
        F: FnMut(&str, Vec<Value>) -> Result<ObjectHandle>,
    {
        let mut object = Self::new_deflated_by_predicate(model, DeflatedPredicate::new());
        object.inflate(row, resolve)?;
        Ok(object)
    }

    // ----- accessors -----

    pub fn model(&self) -> &Arc<TypeModel> {
        &self.model
    }

    pub fn state(&self) -> ObjectState {
        self.state
    }

    pub fn is_deflated(&self) -> bool {
        self.deflated
    }

    pub fn predicate(&self) -> Option<&DeflatedPredicate> {
        self.predicate.as_ref()
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.model.property_index(name).ok_or_else(|| {
            Error::object(
                ObjectErrorKind::UnknownProperty,
                self.model.name(),
                format!("no property named '{}'", name),
            )
        })
    }

    /// Read a property. Deflated objects only answer key properties.
    pub fn get(&self, name: &str) -> Result<&PropertyValue> {
        let index = self.index_of(name)?;
        if self.deflated && !self.model.properties()[index].descriptor.primary_key {
            return Err(Error::object(
                ObjectErrorKind::Deflated,
                self.model.name(),
                format!("property '{}' read before the object was inflated", name),
            ));
        }
        Ok(&self.values[index])
    }

    /// Read a scalar property.
    pub fn get_value(&self, name: &str) -> Result<&Value> {
        match self.get(name)? {
            PropertyValue::Scalar(v) => Ok(v),
            PropertyValue::Reference(_) => Err(Error::object(
                ObjectErrorKind::UnknownProperty,
                self.model.name(),
                format!("property '{}' is a reference", name),
            )),
        }
    }

    /// Read a reference property.
    pub fn get_reference(&self, name: &str) -> Result<Option<&ObjectHandle>> {
        match self.get(name)? {
            PropertyValue::Reference(r) => Ok(r.as_ref()),
            PropertyValue::Scalar(_) => Err(Error::object(
                ObjectErrorKind::UnknownProperty,
                self.model.name(),
                format!("property '{}' is not a reference", name),
            )),
        }
    }

    pub fn is_property_changed(&self, name: &str) -> bool {
        self.model
            .property_index(name)
            .is_some_and(|i| self.changed[i])
    }

    // ----- mutation -----

    fn ensure_mutable(&self) -> Result<()> {
        if self.state.is_deleted() {
            return Err(Error::object(
                ObjectErrorKind::InvalidState,
                self.model.name(),
                "deleted objects cannot be modified",
            ));
        }
        Ok(())
    }

    fn mark_changed(&mut self, index: usize) {
        self.changed[index] = true;
        self.state |= ObjectState::CHANGED;
    }

    /// Set a scalar property.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.ensure_mutable()?;
        let index = self.index_of(name)?;
        if self.model.properties()[index].is_reference() {
            return Err(Error::object(
                ObjectErrorKind::UnknownProperty,
                self.model.name(),
                format!("property '{}' is a reference", name),
            ));
        }
        self.values[index] = PropertyValue::Scalar(value.into());
        self.mark_changed(index);
        Ok(())
    }

    /// Set a reference property.
    pub fn set_reference(&mut self, name: &str, target: Option<ObjectHandle>) -> Result<()> {
        self.ensure_mutable()?;
        let index = self.index_of(name)?;
        let property = &self.model.properties()[index];
        let Some(expected) = property.target.as_deref() else {
            return Err(Error::object(
                ObjectErrorKind::UnknownProperty,
                self.model.name(),
                format!("property '{}' is not a reference", name),
            ));
        };
        if let Some(handle) = &target {
            let actual = handle.model();
            if actual.name() != expected {
                return Err(Error::object(
                    ObjectErrorKind::InvalidState,
                    self.model.name(),
                    format!(
                        "property '{}' references {}, not {}",
                        name,
                        expected,
                        actual.name()
                    ),
                ));
            }
        }
        self.values[index] = PropertyValue::Reference(target);
        self.mark_changed(index);
        Ok(())
    }

    /// Mark for deletion; terminal for mutation.
    pub fn mark_deleted(&mut self) {
        self.state |= ObjectState::DELETED;
    }

    /// Forget pending changes after they were written.
    pub fn reset_modified(&mut self) {
        self.changed.iter_mut().for_each(|c| *c = false);
        self.state = self
            .state
            .without(ObjectState::NEW_CHANGED)
            .without(ObjectState::SERVER_SIDE_PROPERTIES_HYDRATED);
    }

    /// The row exists now; pending changes (if any) still need an update.
    pub fn mark_inserted(&mut self) {
        self.state = self.state.without(ObjectState::NEW);
        if self.changed.iter().any(|c| *c) {
            self.state |= ObjectState::CHANGED;
        } else {
            self.state = self.state.without(ObjectState::CHANGED);
        }
    }

    pub fn mark_server_side_properties_applied(&mut self) {
        self.state |= ObjectState::SERVER_SIDE_PROPERTIES_HYDRATED;
    }

    /// Load every property from `row` and clear the deflated flag.
    pub fn inflate<F>(&mut self, row: &Row, resolve: &mut F) -> Result<()>
    where
        F: FnMut(&str, Vec<Value>) -> Result<ObjectHandle>,
    {
        let model = Arc::clone(&self.model);
        for (index, property) in model.properties().iter().enumerate() {
            let mut flattened = Vec::with_capacity(property.columns.len());
            for column in &model.columns()[property.columns.clone()] {
                let value = row.get_by_name(&column.name).cloned().ok_or_else(|| {
                    Error::shape(format!(
                        "row for {} has no column '{}'",
                        model.name(),
                        column.name
                    ))
                })?;
                flattened.push(value);
            }
            self.values[index] = match &property.target {
                Some(_) if flattened.iter().all(Value::is_null) => PropertyValue::Reference(None),
                Some(target) => PropertyValue::Reference(Some(resolve(target, flattened)?)),
                None => PropertyValue::Scalar(flattened.swap_remove(0)),
            };
            self.changed[index] = false;
        }
        self.deflated = false;
        self.predicate = None;
        Ok(())
    }

    // ==================== Derived facts ====================

    /// Value of flattened column `column_index`.
    fn column_value(&self, column_index: usize) -> Value {
        let column = &self.model.columns()[column_index];
        match (&self.values[column.property_index], column.source) {
            (PropertyValue::Scalar(v), _) => v.clone(),
            (PropertyValue::Reference(None), _) => Value::Null,
            (PropertyValue::Reference(Some(handle)), ColumnSource::ReferenceKey { component }) => {
                handle
                    .read()
                    .key_values()
                    .into_iter()
                    .nth(component)
                    .unwrap_or(Value::Null)
            }
            (PropertyValue::Reference(Some(_)), ColumnSource::Direct) => Value::Null,
        }
    }

    fn property_value(&self, column_index: usize) -> ObjectPropertyValue {
        let column = &self.model.columns()[column_index];
        ObjectPropertyValue {
            sql_type: column.sql_type.clone(),
            property_name: self.model.properties()[column.property_index]
                .name()
                .to_string(),
            column_name: Arc::clone(&column.name),
            name_hash: column.name_hash,
            value: self.column_value(column_index),
        }
    }

    /// Flattened key values, in key order.
    pub fn key_values(&self) -> Vec<Value> {
        self.model
            .key_columns()
            .iter()
            .map(|&i| self.column_value(i))
            .collect()
    }

    /// Key components with their column metadata.
    pub fn key_properties(&self) -> Vec<ObjectPropertyValue> {
        self.model
            .key_columns()
            .iter()
            .map(|&i| self.property_value(i))
            .collect()
    }

    pub fn object_key(&self) -> ObjectKey {
        ObjectKey::new(Arc::clone(self.model.name_arc()), self.key_values())
    }

    /// Key as (column, value) pairs for error reporting.
    pub fn key_description(&self) -> Vec<(String, Value)> {
        self.key_properties()
            .into_iter()
            .map(|p| (p.column_name.to_string(), p.value))
            .collect()
    }

    /// Changed properties expanded to their columns, in declaration order.
    ///
    /// Server-generated properties are only included when they were set
    /// explicitly.
    pub fn changed_properties_flattened(&self) -> Vec<ObjectPropertyValue> {
        let mut result = Vec::new();
        for (index, property) in self.model.properties().iter().enumerate() {
            if !self.changed[index] {
                continue;
            }
            for column in property.columns.clone() {
                result.push(self.property_value(column));
            }
        }
        result
    }

    /// Was a server-generated key property set explicitly?
    ///
    /// Inserting such an object requires an identity insert.
    pub fn has_any_changed_primary_key_server_side_properties(&self) -> bool {
        self.model.key_properties().iter().any(|&i| {
            self.changed[i] && self.model.properties()[i].is_server_generated()
        })
    }

    /// Does inserting this object require reading server values back?
    pub fn defines_any_direct_properties_generated_on_the_server_side(&self) -> bool {
        self.model
            .server_generated_columns()
            .iter()
            .any(|&c| !self.changed[self.model.columns()[c].property_index])
    }

    /// Has the server not yet supplied this object's generated values?
    pub fn has_pending_server_side_properties(&self) -> bool {
        self.state.is_new()
            && !self.state.contains(ObjectState::SERVER_SIDE_PROPERTIES_HYDRATED)
            && self.defines_any_direct_properties_generated_on_the_server_side()
    }

    fn references<P>(&self, key_only: bool, predicate: P) -> bool
    where
        P: Fn(&DataObject) -> bool,
    {
        self.model
            .properties()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_reference() && (!key_only || p.descriptor.primary_key))
            .any(|(i, _)| match &self.values[i] {
                PropertyValue::Reference(Some(handle)) => {
                    // A self-reference never blocks its own insert.
                    match handle.0.try_read() {
                        Some(target) => !std::ptr::eq(&*target, self) && predicate(&target),
                        None => false,
                    }
                }
                _ => false,
            })
    }

    /// Does the key depend on a new object whose key the server has not
    /// assigned yet?
    pub fn primary_key_references_new_object_with_server_side_properties(&self) -> bool {
        self.references(true, |target| {
            target.has_pending_server_side_properties()
                || target.primary_key_references_new_object_with_server_side_properties()
        })
    }

    /// Does any reference point at an object not yet inserted?
    pub fn references_new_object(&self) -> bool {
        self.references(false, |target| target.state.is_new())
    }

    /// Does any reference point at an object whose generated values are
    /// still pending?
    pub fn references_new_object_with_server_side_properties(&self) -> bool {
        self.references(false, |target| {
            target.has_pending_server_side_properties()
                || target.primary_key_references_new_object_with_server_side_properties()
        })
    }

    /// Check server-generated key values for zero or sentinel values.
    pub fn validate_server_side_generated_ids(&self) -> bool {
        self.model.key_properties().iter().all(|&i| {
            let property = &self.model.properties()[i];
            if !property.is_server_generated() {
                return true;
            }
            match &self.values[i] {
                PropertyValue::Scalar(v) => {
                    !v.is_zero()
                        && property
                            .descriptor
                            .generated_id_sentinel
                            .as_ref()
                            .is_none_or(|sentinel| !sentinel.key_eq(v))
                }
                PropertyValue::Reference(_) => true,
            }
        })
    }

    fn compute_templates(&mut self, server_dependent: bool) -> bool {
        let model = Arc::clone(&self.model);
        let mut any = false;
        for (index, property) in model.properties().iter().enumerate() {
            let Some(parts) = &property.template else {
                continue;
            };
            if property.depends_on_server_generated != server_dependent {
                continue;
            }
            let mut text = String::new();
            for part in parts {
                match part {
                    TemplatePart::Literal(s) => text.push_str(s),
                    TemplatePart::Property(p) => {
                        if let PropertyValue::Scalar(v) = &self.values[*p] {
                            text.push_str(&text_of(v));
                        }
                    }
                }
            }
            let value = Value::Text(text);
            if self.values[index].as_scalar() != Some(&value) {
                self.values[index] = PropertyValue::Scalar(value);
                self.mark_changed(index);
                any = true;
            }
        }
        any
    }

    /// Evaluate computed text properties that need no server values.
    pub fn compute_computed_text_properties(&mut self) -> bool {
        self.compute_templates(false)
    }

    /// Evaluate computed text properties that mention server-generated
    /// properties. Returns whether any value changed.
    pub fn compute_server_generated_id_dependent_computed_text_properties(&mut self) -> bool {
        self.compute_templates(true)
    }

    /// Copy server-generated values out of `row`, without marking them
    /// changed.
    pub fn apply_server_values(&mut self, row: &Row) -> Result<()> {
        let model = Arc::clone(&self.model);
        for &column_index in model.server_generated_columns() {
            let column = &model.columns()[column_index];
            if self.changed[column.property_index] {
                continue;
            }
            let value = row.get_by_name(&column.name).ok_or_else(|| {
                Error::shape(format!(
                    "server values for {} lack column '{}'",
                    model.name(),
                    column.name
                ))
            })?;
            self.values[column.property_index] = PropertyValue::Scalar(value.clone());
        }
        Ok(())
    }

    /// Error describing this object as missing from the store.
    pub fn missing(&self, sql: Option<String>) -> Error {
        Error::MissingObject(MissingObjectError {
            type_name: self.model.name().to_string(),
            key: self.key_description(),
            sql,
        })
    }
}
