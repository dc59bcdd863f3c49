//! Static field declarations emitted by `#[derive(Model)]`.
//!
//! Every declaration is built with `const` builder calls so the whole list
//! lives in a `static` and costs nothing at runtime. The metadata extractor
//! turns these raw declarations into a validated `TableMetadata`.

use crate::value::Value;

/// Coarse shape of a field's Rust type, detected from its syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    /// Plain value (`String`, `i64`, a struct, ...)
    Scalar,
    /// `Option<T>`
    Optional,
    /// `Vec<T>`
    Sequence,
    /// `HashMap<K, T>` or `BTreeMap<K, T>`
    Mapping,
}

/// Which audit stamp a column receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditRole {
    CreatedBy,
    UpdatedBy,
    CreatedAt,
    UpdatedAt,
}

impl AuditRole {
    /// Parse the attribute spelling (`created_by`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created_by" => Some(AuditRole::CreatedBy),
            "updated_by" => Some(AuditRole::UpdatedBy),
            "created_at" => Some(AuditRole::CreatedAt),
            "updated_at" => Some(AuditRole::UpdatedAt),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            AuditRole::CreatedBy => "created_by",
            AuditRole::UpdatedBy => "updated_by",
            AuditRole::CreatedAt => "created_at",
            AuditRole::UpdatedAt => "updated_at",
        }
    }

    /// Whether the stamp is rewritten on update (the `created_*` pair is not).
    pub const fn stamps_on_update(&self) -> bool {
        matches!(self, AuditRole::UpdatedBy | AuditRole::UpdatedAt)
    }
}

/// A lookup field whose value lives on a related table.
///
/// The identity query joins `table` on `table.key = this.via`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelatedLookup {
    pub table: &'static str,
    pub column: &'static str,
    pub via: &'static str,
    pub key: &'static str,
}

impl RelatedLookup {
    pub const fn new(table: &'static str, column: &'static str, via: &'static str) -> Self {
        Self {
            table,
            column,
            via,
            key: "id",
        }
    }

    /// Override the related table's key column (defaults to `id`).
    pub const fn key(mut self, key: &'static str) -> Self {
        self.key = key;
        self
    }
}

/// A constant written into a child field and used to scope orphan detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MappingLiteral {
    Text(&'static str),
    Int(i64),
    Bool(bool),
}

impl MappingLiteral {
    pub fn to_value(self) -> Value {
        match self {
            MappingLiteral::Text(s) => Value::Text(s.to_string()),
            MappingLiteral::Int(i) => Value::BigInt(i),
            MappingLiteral::Bool(b) => Value::Bool(b),
        }
    }
}

/// Declaration of a child relation (`#[tenantry(child(...))]`).
#[derive(Debug, Clone, Copy)]
pub struct ChildInfo {
    /// Name of the element record type
    pub element_type: &'static str,
    /// Table of the element record type
    pub element_table: Option<&'static str>,
    /// Field declarations of the element record type
    pub element_fields: fn() -> &'static [FieldInfo],
    /// Child field receiving the parent's primary key
    pub foreign_key: Option<&'static str>,
    /// `(child_field, parent_field)` pairs copied from parent to child
    pub grouping: &'static [(&'static str, &'static str)],
    /// Child field receiving the map key (mapping-shaped relations only)
    pub key_mapping: Option<&'static str>,
    /// `(child_field, literal)` pairs written into every child
    pub value_mappings: &'static [(&'static str, MappingLiteral)],
    /// Delete existing children missing from the new set
    pub delete_orphans: bool,
}

impl ChildInfo {
    pub const fn new(
        element_type: &'static str,
        element_table: Option<&'static str>,
        element_fields: fn() -> &'static [FieldInfo],
    ) -> Self {
        Self {
            element_type,
            element_table,
            element_fields,
            foreign_key: None,
            grouping: &[],
            key_mapping: None,
            value_mappings: &[],
            delete_orphans: false,
        }
    }

    pub const fn foreign_key(mut self, field: &'static str) -> Self {
        self.foreign_key = Some(field);
        self
    }

    pub const fn grouping(mut self, pairs: &'static [(&'static str, &'static str)]) -> Self {
        self.grouping = pairs;
        self
    }

    pub const fn key_mapping(mut self, field: &'static str) -> Self {
        self.key_mapping = Some(field);
        self
    }

    pub const fn value_mappings(
        mut self,
        pairs: &'static [(&'static str, MappingLiteral)],
    ) -> Self {
        self.value_mappings = pairs;
        self
    }

    pub const fn delete_orphans(mut self, value: bool) -> Self {
        self.delete_orphans = value;
        self
    }
}

/// Raw declaration of one annotated record field.
#[derive(Debug, Clone, Copy)]
pub struct FieldInfo {
    /// Rust field name
    pub name: &'static str,
    /// Column name, `None` for fields that are not stored on this table
    pub column_name: Option<&'static str>,
    /// Field type as written in the declaration
    pub rust_type: &'static str,
    /// Shape of the field type
    pub shape: FieldShape,
    pub primary_key: bool,
    pub multitenancy_key: bool,
    pub lookup: bool,
    pub required: bool,
    pub encrypted: bool,
    pub jsonb: bool,
    pub audit: Option<AuditRole>,
    /// Belongs-to reference (`table.column`)
    pub foreign_key: Option<&'static str>,
    pub related: Option<RelatedLookup>,
    pub child: Option<ChildInfo>,
    /// The field holds the record's `DefinedFields`
    pub defined_fields: bool,
}

impl FieldInfo {
    /// Create a new field declaration that is not stored in any column.
    pub const fn new(name: &'static str, rust_type: &'static str, shape: FieldShape) -> Self {
        Self {
            name,
            column_name: None,
            rust_type,
            shape,
            primary_key: false,
            multitenancy_key: false,
            lookup: false,
            required: false,
            encrypted: false,
            jsonb: false,
            audit: None,
            foreign_key: None,
            related: None,
            child: None,
            defined_fields: false,
        }
    }

    /// Set the database column name.
    pub const fn column(mut self, name: &'static str) -> Self {
        self.column_name = Some(name);
        self
    }

    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    pub const fn multitenancy_key(mut self, value: bool) -> Self {
        self.multitenancy_key = value;
        self
    }

    pub const fn lookup(mut self, value: bool) -> Self {
        self.lookup = value;
        self
    }

    pub const fn required(mut self, value: bool) -> Self {
        self.required = value;
        self
    }

    pub const fn encrypted(mut self, value: bool) -> Self {
        self.encrypted = value;
        self
    }

    pub const fn jsonb(mut self, value: bool) -> Self {
        self.jsonb = value;
        self
    }

    pub const fn audit(mut self, role: AuditRole) -> Self {
        self.audit = Some(role);
        self
    }

    pub const fn foreign_key(mut self, reference: &'static str) -> Self {
        self.foreign_key = Some(reference);
        self
    }

    pub const fn related(mut self, related: RelatedLookup) -> Self {
        self.related = Some(related);
        self
    }

    pub const fn child(mut self, child: ChildInfo) -> Self {
        self.child = Some(child);
        self
    }

    pub const fn defined_fields(mut self, value: bool) -> Self {
        self.defined_fields = value;
        self
    }
}
