//! Type registry: resolved per-type layouts.
//!
//! [`TypeRegistry::builder`] collects [`TypeDescriptor`]s and validates them
//! once. Each registered type gets a [`TypeModel`], the per-type table used
//! by every write path: flattened columns (references expanded to the
//! referenced type's key columns), key layout, interned column names with
//! precomputed hashes, and the server-generated column set.

use crate::error::{Error, Result, SchemaErrorKind};
use crate::model::{PropertyDescriptor, PropertyKind, TypeDescriptor};
use crate::types::SqlType;
use crate::value::Value;
use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::{Arc, OnceLock};

/// Stable hash of a column or type name.
pub fn hash_name(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

/// Where a flattened column takes its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSource {
    /// The owning property's own scalar value
    Direct,
    /// Component `n` of the referenced object's key
    ReferenceKey { component: usize },
}

/// One physical column of a type.
#[derive(Debug, Clone)]
pub struct ColumnModel {
    /// Interned column name; command cache keys compare these by pointer first
    pub name: Arc<str>,
    pub name_hash: u64,
    /// Index of the owning property
    pub property_index: usize,
    pub source: ColumnSource,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub server_generated: bool,
    pub unique: bool,
    pub default: Option<Value>,
}

/// One piece of a computed text template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    Literal(String),
    /// Index of a scalar property
    Property(usize),
}

/// A resolved property.
#[derive(Debug, Clone)]
pub struct PropertyModel {
    pub descriptor: PropertyDescriptor,
    /// Range into [`TypeModel::columns`]
    pub columns: Range<usize>,
    /// Referenced type, for reference properties
    pub target: Option<Arc<str>>,
    /// Parsed template, for computed text properties
    pub template: Option<Vec<TemplatePart>>,
    /// Template mentions at least one server-generated property
    pub depends_on_server_generated: bool,
}

impl PropertyModel {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn is_reference(&self) -> bool {
        self.target.is_some()
    }

    pub fn is_server_generated(&self) -> bool {
        self.descriptor.server_generated
    }
}

/// Resolved layout of a persisted type.
#[derive(Debug)]
pub struct TypeModel {
    name: Arc<str>,
    name_hash: u64,
    descriptor: TypeDescriptor,
    properties: Vec<PropertyModel>,
    columns: Vec<ColumnModel>,
    key_columns: Vec<usize>,
    key_properties: Vec<usize>,
    server_generated_columns: Vec<usize>,
}

impl TypeModel {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Interned type name.
    pub fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    pub fn name_hash(&self) -> u64 {
        self.name_hash
    }

    pub fn table_name(&self) -> &str {
        &self.descriptor.table_name
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn properties(&self) -> &[PropertyModel] {
        &self.properties
    }

    pub fn property(&self, index: usize) -> Option<&PropertyModel> {
        self.properties.get(index)
    }

    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name() == name)
    }

    /// All flattened columns in property declaration order.
    pub fn columns(&self) -> &[ColumnModel] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&ColumnModel> {
        self.columns.get(index)
    }

    /// Indexes of the flattened key columns, in key order.
    pub fn key_columns(&self) -> &[usize] {
        &self.key_columns
    }

    /// Key column models, in key order.
    pub fn key_column_models(&self) -> impl Iterator<Item = &ColumnModel> {
        self.key_columns.iter().map(|&i| &self.columns[i])
    }

    /// Indexes of the primary key properties.
    pub fn key_properties(&self) -> &[usize] {
        &self.key_properties
    }

    /// Columns the server fills in on insert.
    pub fn server_generated_columns(&self) -> &[usize] {
        &self.server_generated_columns
    }

    /// Does inserting this type require reading values back?
    pub fn defines_any_direct_properties_generated_on_the_server_side(&self) -> bool {
        !self.server_generated_columns.is_empty()
    }

    /// Is any key property assigned by the server?
    pub fn has_server_generated_key(&self) -> bool {
        self.key_properties
            .iter()
            .any(|&i| self.properties[i].is_server_generated())
    }

    /// Does any column auto-increment?
    pub fn has_auto_increment(&self) -> bool {
        self.columns.iter().any(|c| c.auto_increment)
    }
}

/// Registered types, in declaration order.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: Vec<Arc<TypeModel>>,
    by_name: HashMap<String, usize>,
}

impl TypeRegistry {
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::default()
    }

    /// Look up a type by name.
    pub fn get(&self, name: &str) -> Option<&Arc<TypeModel>> {
        self.by_name.get(name).map(|&i| &self.types[i])
    }

    /// Look up a type by name, failing with a schema error when unknown.
    pub fn model(&self, name: &str) -> Result<&Arc<TypeModel>> {
        self.get(name).ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::UnknownType,
                format!("type '{}' is not registered", name),
            )
        })
    }

    /// Types in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TypeModel>> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Collects descriptors and validates them into a [`TypeRegistry`].
#[derive(Debug, Default)]
pub struct TypeRegistryBuilder {
    descriptors: Vec<TypeDescriptor>,
}

/// (column suffix, sql type) pairs of a type's flattened key.
type KeyLayout = Vec<(String, SqlType)>;

impl TypeRegistryBuilder {
    pub fn register(mut self, descriptor: TypeDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Validate all descriptors and resolve their layouts.
    #[tracing::instrument(level = "debug", skip(self), fields(types = self.descriptors.len()))]
    pub fn build(self) -> Result<TypeRegistry> {
        let mut by_name = HashMap::new();
        for (i, descriptor) in self.descriptors.iter().enumerate() {
            if by_name.insert(descriptor.name.clone(), i).is_some() {
                return Err(Error::schema(
                    SchemaErrorKind::DuplicateType,
                    format!("type '{}' is registered twice", descriptor.name),
                ));
            }
        }

        for descriptor in &self.descriptors {
            validate_descriptor(descriptor, &by_name)?;
        }

        let mut layouts: HashMap<String, KeyLayout> = HashMap::new();
        let mut types = Vec::with_capacity(self.descriptors.len());
        for descriptor in &self.descriptors {
            let mut visiting = HashSet::new();
            key_layout(
                &descriptor.name,
                &self.descriptors,
                &by_name,
                &mut layouts,
                &mut visiting,
            )?;
            types.push(Arc::new(resolve_type(descriptor, &layouts)?));
        }

        tracing::debug!(count = types.len(), "Type registry built");
        Ok(TypeRegistry { types, by_name })
    }
}

fn invalid(message: String) -> Error {
    Error::schema(SchemaErrorKind::Invalid, message)
}

fn validate_descriptor(descriptor: &TypeDescriptor, by_name: &HashMap<String, usize>) -> Result<()> {
    if !descriptor.properties.iter().any(|p| p.primary_key) {
        return Err(invalid(format!(
            "type '{}' declares no primary key",
            descriptor.name
        )));
    }

    let mut seen = HashSet::new();
    for property in &descriptor.properties {
        if !seen.insert(property.name.as_str()) {
            return Err(invalid(format!(
                "property '{}.{}' is declared twice",
                descriptor.name, property.name
            )));
        }
        match &property.kind {
            PropertyKind::Reference { target, .. } => {
                if !by_name.contains_key(target) {
                    return Err(Error::schema(
                        SchemaErrorKind::UnknownType,
                        format!(
                            "property '{}.{}' references unknown type '{}'",
                            descriptor.name, property.name, target
                        ),
                    ));
                }
                if property.server_generated {
                    return Err(invalid(format!(
                        "reference property '{}.{}' cannot be server generated",
                        descriptor.name, property.name
                    )));
                }
            }
            PropertyKind::Scalar(sql_type) => {
                if property.auto_increment && !sql_type.is_integer() {
                    return Err(invalid(format!(
                        "auto-increment property '{}.{}' must be an integer",
                        descriptor.name, property.name
                    )));
                }
            }
            PropertyKind::ComputedText { .. } => {}
        }
    }

    for index in &descriptor.indexes {
        if index.columns.is_empty() {
            return Err(invalid(format!("index '{}' has no columns", index.name)));
        }
        for column in &index.columns {
            if descriptor.find_property(&column.property).is_none() {
                return Err(invalid(format!(
                    "index '{}' names unknown property '{}'",
                    index.name, column.property
                )));
            }
        }
    }
    Ok(())
}

/// Compute (memoized) the flattened key layout of `name`.
///
/// Keys that reference other types flatten recursively; a key that reaches
/// its own type again can never be resolved.
fn key_layout(
    name: &str,
    descriptors: &[TypeDescriptor],
    by_name: &HashMap<String, usize>,
    layouts: &mut HashMap<String, KeyLayout>,
    visiting: &mut HashSet<String>,
) -> Result<KeyLayout> {
    if let Some(layout) = layouts.get(name) {
        return Ok(layout.clone());
    }
    if !visiting.insert(name.to_string()) {
        return Err(invalid(format!(
            "primary key of '{}' depends on itself through references",
            name
        )));
    }

    let descriptor = by_name.get(name).map(|&i| &descriptors[i]).ok_or_else(|| {
        Error::schema(
            SchemaErrorKind::UnknownType,
            format!("type '{}' is not registered", name),
        )
    })?;

    let mut layout = Vec::new();
    for property in descriptor.properties.iter().filter(|p| p.primary_key) {
        match &property.kind {
            PropertyKind::Scalar(sql_type) => {
                layout.push((property.column_name.clone(), sql_type.clone()));
            }
            PropertyKind::ComputedText { .. } => {
                layout.push((property.column_name.clone(), SqlType::Text));
            }
            PropertyKind::Reference { target, .. } => {
                let target_layout = key_layout(target, descriptors, by_name, layouts, visiting)?;
                for (suffix, sql_type) in target_layout {
                    layout.push((format!("{}{}", property.column_name, suffix), sql_type));
                }
            }
        }
    }

    visiting.remove(name);
    layouts.insert(name.to_string(), layout.clone());
    Ok(layout)
}

fn placeholder_regex() -> Result<&'static Regex> {
    static RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}"))
        .as_ref()
        .map_err(|e| invalid(format!("invalid template pattern: {e}")))
}

/// Split a computed text template into literal and property parts.
fn parse_template(
    descriptor: &TypeDescriptor,
    property: &PropertyDescriptor,
    template: &str,
) -> Result<Vec<TemplatePart>> {
    let mut parts = Vec::new();
    let mut last = 0;
    for captures in placeholder_regex()?.captures_iter(template) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        if whole.start() > last {
            parts.push(TemplatePart::Literal(template[last..whole.start()].to_string()));
        }
        let index = descriptor
            .properties
            .iter()
            .position(|p| p.name == name.as_str())
            .ok_or_else(|| {
                invalid(format!(
                    "template of '{}.{}' names unknown property '{}'",
                    descriptor.name,
                    property.name,
                    name.as_str()
                ))
            })?;
        if !matches!(descriptor.properties[index].kind, PropertyKind::Scalar(_)) {
            return Err(invalid(format!(
                "template of '{}.{}' may only name scalar properties",
                descriptor.name, property.name
            )));
        }
        parts.push(TemplatePart::Property(index));
        last = whole.end();
    }
    if last < template.len() {
        parts.push(TemplatePart::Literal(template[last..].to_string()));
    }
    Ok(parts)
}

fn column(
    name: String,
    property_index: usize,
    source: ColumnSource,
    sql_type: SqlType,
    property: &PropertyDescriptor,
) -> ColumnModel {
    let direct = source == ColumnSource::Direct;
    ColumnModel {
        name_hash: hash_name(&name),
        name: Arc::from(name),
        property_index,
        source,
        sql_type,
        nullable: property.nullable,
        primary_key: property.primary_key,
        auto_increment: direct && property.auto_increment,
        server_generated: direct && property.server_generated,
        unique: property.unique,
        default: if direct { property.default.clone() } else { None },
    }
}

fn resolve_type(descriptor: &TypeDescriptor, layouts: &HashMap<String, KeyLayout>) -> Result<TypeModel> {
    let mut properties = Vec::with_capacity(descriptor.properties.len());
    let mut columns = Vec::new();

    for (index, property) in descriptor.properties.iter().enumerate() {
        let start = columns.len();
        let mut target = None;
        let mut template = None;
        match &property.kind {
            PropertyKind::Scalar(sql_type) => {
                columns.push(column(
                    property.column_name.clone(),
                    index,
                    ColumnSource::Direct,
                    sql_type.clone(),
                    property,
                ));
            }
            PropertyKind::ComputedText { template: text } => {
                template = Some(parse_template(descriptor, property, text)?);
                columns.push(column(
                    property.column_name.clone(),
                    index,
                    ColumnSource::Direct,
                    SqlType::Text,
                    property,
                ));
            }
            PropertyKind::Reference { target: name, .. } => {
                let layout = layouts.get(name).ok_or_else(|| {
                    Error::schema(
                        SchemaErrorKind::UnknownType,
                        format!("type '{}' is not registered", name),
                    )
                })?;
                for (component, (suffix, sql_type)) in layout.iter().enumerate() {
                    columns.push(column(
                        format!("{}{}", property.column_name, suffix),
                        index,
                        ColumnSource::ReferenceKey { component },
                        sql_type.clone(),
                        property,
                    ));
                }
                target = Some(Arc::from(name.as_str()));
            }
        }

        let depends_on_server_generated = template.as_ref().is_some_and(|parts: &Vec<TemplatePart>| {
            parts.iter().any(|part| match part {
                TemplatePart::Property(i) => descriptor.properties[*i].server_generated,
                TemplatePart::Literal(_) => false,
            })
        });

        properties.push(PropertyModel {
            descriptor: property.clone(),
            columns: start..columns.len(),
            target,
            template,
            depends_on_server_generated,
        });
    }

    let key_properties: Vec<usize> = descriptor
        .properties
        .iter()
        .enumerate()
        .filter(|(_, p)| p.primary_key)
        .map(|(i, _)| i)
        .collect();
    let key_columns = key_properties
        .iter()
        .flat_map(|&i| properties[i].columns.clone())
        .collect();
    let server_generated_columns = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.server_generated)
        .map(|(i, _)| i)
        .collect();

    Ok(TypeModel {
        name_hash: hash_name(&descriptor.name),
        name: Arc::from(descriptor.name.as_str()),
        descriptor: descriptor.clone(),
        properties,
        columns,
        key_columns,
        key_properties,
        server_generated_columns,
    })
}
