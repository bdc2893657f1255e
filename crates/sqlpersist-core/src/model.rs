//! Declarative schema descriptors.
//!
//! A [`TypeDescriptor`] declares one persisted type: its table, its
//! properties and its indexes. Descriptors are plain data; they are
//! validated and resolved into per-type layouts by
//! [`TypeRegistry`](crate::registry::TypeRegistry).

use crate::types::SqlType;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Referential action for foreign key constraints (ON DELETE / ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReferentialAction {
    /// Raise an error if any references exist.
    #[default]
    NoAction,
    /// Same as NO ACTION, checked immediately.
    Restrict,
    /// Delete or update referencing rows.
    Cascade,
    /// Set referencing columns to NULL.
    SetNull,
    /// Set referencing columns to their default values.
    SetDefault,
}

impl ReferentialAction {
    /// Get the SQL representation of this action.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }

    /// Parse a referential action from a string (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "NO ACTION" | "NOACTION" | "NO_ACTION" => Some(ReferentialAction::NoAction),
            "RESTRICT" => Some(ReferentialAction::Restrict),
            "CASCADE" => Some(ReferentialAction::Cascade),
            "SET NULL" | "SETNULL" | "SET_NULL" => Some(ReferentialAction::SetNull),
            "SET DEFAULT" | "SETDEFAULT" | "SET_DEFAULT" => Some(ReferentialAction::SetDefault),
            _ => None,
        }
    }
}

/// What a property holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyKind {
    /// A single column of the given type.
    Scalar(SqlType),
    /// A reference to another persisted type.
    ///
    /// Persisted as the referenced type's flattened key columns, each
    /// prefixed with this property's column name.
    Reference {
        target: String,
        on_delete: ReferentialAction,
        on_update: ReferentialAction,
    },
    /// Text computed from other properties of the same object.
    ///
    /// `{Property}` placeholders in the template are replaced with the
    /// property's current value.
    ComputedText { template: String },
}

/// Declaration of one persisted property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Logical property name
    pub name: String,
    /// Column name, or column prefix for references
    pub column_name: String,
    pub kind: PropertyKind,
    /// Part of the primary key
    pub primary_key: bool,
    pub nullable: bool,
    /// Server assigns an increasing integer on insert
    pub auto_increment: bool,
    /// Server assigns the value on insert (defaults, sequences, identity)
    pub server_generated: bool,
    pub unique: bool,
    /// Value given to new objects
    pub default: Option<Value>,
    /// Value the server returns when it failed to generate a real id
    pub generated_id_sentinel: Option<Value>,
}

impl PropertyDescriptor {
    fn with_kind(name: impl Into<String>, kind: PropertyKind) -> Self {
        let name = name.into();
        Self {
            column_name: name.clone(),
            name,
            kind,
            primary_key: false,
            nullable: false,
            auto_increment: false,
            server_generated: false,
            unique: false,
            default: None,
            generated_id_sentinel: None,
        }
    }

    /// A scalar property stored in a column of the same name.
    pub fn scalar(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self::with_kind(name, PropertyKind::Scalar(sql_type))
    }

    /// A reference to `target`, nullable unless part of the key.
    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        let mut property = Self::with_kind(
            name,
            PropertyKind::Reference {
                target: target.into(),
                on_delete: ReferentialAction::NoAction,
                on_update: ReferentialAction::NoAction,
            },
        );
        property.nullable = true;
        property
    }

    /// A text property computed from `template`.
    pub fn computed_text(name: impl Into<String>, template: impl Into<String>) -> Self {
        let mut property = Self::with_kind(
            name,
            PropertyKind::ComputedText {
                template: template.into(),
            },
        );
        property.nullable = true;
        property
    }

    /// Set the column name (or column prefix for references).
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.column_name = name.into();
        self
    }

    /// Mark as part of the primary key. Key properties are never nullable.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Mark as auto-increment. Implies server generation.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self.server_generated = true;
        self
    }

    pub fn server_generated(mut self) -> Self {
        self.server_generated = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Treat `value` as an invalid server-generated id.
    pub fn generated_id_sentinel(mut self, value: impl Into<Value>) -> Self {
        self.generated_id_sentinel = Some(value.into());
        self
    }

    /// Set referential actions for a reference property.
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        if let PropertyKind::Reference { on_delete, .. } = &mut self.kind {
            *on_delete = action;
        }
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        if let PropertyKind::Reference { on_update, .. } = &mut self.kind {
            *on_update = action;
        }
        self
    }

    /// Is this a reference to another type?
    pub fn is_reference(&self) -> bool {
        matches!(self.kind, PropertyKind::Reference { .. })
    }
}

/// One column of an index, by property name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub property: String,
    pub descending: bool,
}

/// Declaration of an index over one or more properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub columns: Vec<IndexColumn>,
    pub unique: bool,
}

impl IndexDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            unique: false,
        }
    }

    /// Add an ascending column.
    pub fn on(mut self, property: impl Into<String>) -> Self {
        self.columns.push(IndexColumn {
            property: property.into(),
            descending: false,
        });
        self
    }

    /// Add a descending column.
    pub fn on_desc(mut self, property: impl Into<String>) -> Self {
        self.columns.push(IndexColumn {
            property: property.into(),
            descending: true,
        });
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Declaration of a persisted type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Type name, unique within a registry
    pub name: String,
    pub table_name: String,
    /// Properties in declaration order; key order follows this order
    pub properties: Vec<PropertyDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
}

impl TypeDescriptor {
    /// A type stored in a table of the same name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table_name: name.clone(),
            name,
            properties: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    pub fn index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(index);
        self
    }

    /// Find a property by name.
    pub fn find_property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }
}
