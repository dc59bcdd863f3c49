//! Metadata extraction.
//!
//! Turns the raw `FieldInfo` declarations of a record type into a validated
//! [`TableMetadata`]. Extraction is a pure function of the declarations, so
//! [`MetadataRegistry`] memoizes it by type.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::Result;
use crate::error::{ConfigError, Error};
use crate::field::{AuditRole, FieldInfo, FieldShape, RelatedLookup};
use crate::identifiers::is_valid_identifier;
use crate::model::Model;
use crate::value::Value;

/// Role a stored column plays in generated statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    PrimaryKey,
    MultitenancyKey,
    Audit(AuditRole),
    Data,
}

/// Target of a belongs-to foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKeyRef {
    pub table: &'static str,
    pub column: &'static str,
}

/// A field stored in a column of this table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub field: &'static str,
    pub column: &'static str,
    pub role: ColumnRole,
    pub required: bool,
    pub encrypted: bool,
    pub jsonb: bool,
    pub foreign_key: Option<ForeignKeyRef>,
}

/// A field + column pair for the primary or multitenancy key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyField {
    pub field: &'static str,
    pub column: &'static str,
}

/// Where a lookup component is read from in the identity query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupSource {
    /// A column of this table
    Column(&'static str),
    /// A column of a joined table
    Related { join: usize, column: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupField {
    pub field: &'static str,
    pub source: LookupSource,
}

/// A JOIN added to the identity query for related lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupJoin {
    pub alias: String,
    pub table: &'static str,
    pub key: &'static str,
    pub via: &'static str,
}

/// What a linked child field is copied from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentSource {
    /// The parent's primary key, known only after the parent is persisted
    PrimaryKey,
    /// Another parent field
    Field(&'static str),
}

/// One child field that ties a child row to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentLink {
    pub child_field: &'static str,
    pub child_column: &'static str,
    pub source: ParentSource,
}

/// A constant written into every child of a relation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueMapping {
    pub child_field: &'static str,
    pub child_column: &'static str,
    pub value: Value,
}

/// A validated child relation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildRelation {
    pub field: &'static str,
    pub element_type: &'static str,
    pub element_table: &'static str,
    pub shape: FieldShape,
    pub links: Vec<ParentLink>,
    pub key_mapping: Option<&'static str>,
    pub value_mappings: Vec<ValueMapping>,
    pub delete_orphans: bool,
    pub child_primary_key: Option<&'static str>,
    pub child_multitenancy_key: Option<&'static str>,
}

impl ChildRelation {
    /// Child fields the reconciler writes, which partial mode must still persist.
    pub fn forced_fields(&self) -> Vec<&'static str> {
        let mut fields: Vec<&'static str> = self.links.iter().map(|l| l.child_field).collect();
        fields.extend(self.key_mapping);
        fields.extend(self.value_mappings.iter().map(|m| m.child_field));
        fields
    }
}

/// Immutable, validated description of one record type.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMetadata {
    pub type_name: &'static str,
    pub table: &'static str,
    pub primary_key: Option<KeyField>,
    pub multitenancy_key: Option<KeyField>,
    /// Stored columns in declaration order
    pub columns: Vec<ColumnMeta>,
    pub lookup_fields: Vec<LookupField>,
    pub lookup_joins: Vec<LookupJoin>,
    pub children: Vec<ChildRelation>,
}

impl TableMetadata {
    pub fn column_for_field(&self, field: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.field == field)
    }

    pub fn child(&self, field: &str) -> Option<&ChildRelation> {
        self.children.iter().find(|c| c.field == field)
    }

    /// Whether records of this type can be matched against existing rows.
    pub fn has_identity(&self) -> bool {
        self.primary_key.is_some()
    }

    pub fn qualified_field(&self, field: &str) -> String {
        format!("{}.{}", self.type_name, field)
    }
}

fn config_error(message: String) -> Error {
    Error::Config(ConfigError::new(message))
}

/// Extract metadata for a record type.
#[allow(clippy::result_large_err)]
pub fn extract_metadata<M: Model>() -> Result<TableMetadata> {
    extract_from_fields(M::TYPE_NAME, M::TABLE_NAME, M::fields())
}

/// Extract metadata from raw declarations.
#[allow(clippy::result_large_err)]
pub fn extract_from_fields(
    type_name: &'static str,
    table: Option<&'static str>,
    fields: &'static [FieldInfo],
) -> Result<TableMetadata> {
    let table = match table {
        Some(table) if is_valid_identifier(table) => table,
        Some(table) => {
            return Err(config_error(format!(
                "`{}` declares invalid table name `{}`",
                type_name, table
            )));
        }
        None => {
            return Err(config_error(format!(
                "`{}` has no table name; add #[tenantry(table = \"...\")]",
                type_name
            )));
        }
    };

    let mut primary_key = None;
    let mut multitenancy_key = None;
    let mut columns = Vec::new();
    let mut seen_columns = HashSet::new();

    for field in fields {
        classify_conflicts(type_name, field)?;
        let Some(column) = field.column_name else {
            continue;
        };
        if !is_valid_identifier(column) {
            return Err(config_error(format!(
                "field `{}` of `{}` declares invalid column name `{}`",
                field.name, type_name, column
            )));
        }
        if !seen_columns.insert(column) {
            return Err(config_error(format!(
                "column `{}` is declared twice on `{}`",
                column, type_name
            )));
        }

        let role = if field.primary_key {
            if primary_key.is_some() {
                return Err(config_error(format!(
                    "`{}` declares more than one primary key",
                    type_name
                )));
            }
            primary_key = Some(KeyField {
                field: field.name,
                column,
            });
            ColumnRole::PrimaryKey
        } else if field.multitenancy_key {
            if multitenancy_key.is_some() {
                return Err(config_error(format!(
                    "`{}` declares more than one multitenancy key",
                    type_name
                )));
            }
            multitenancy_key = Some(KeyField {
                field: field.name,
                column,
            });
            ColumnRole::MultitenancyKey
        } else if let Some(audit) = field.audit {
            ColumnRole::Audit(audit)
        } else {
            ColumnRole::Data
        };

        columns.push(ColumnMeta {
            field: field.name,
            column,
            role,
            required: field.required,
            encrypted: field.encrypted,
            jsonb: field.jsonb,
            foreign_key: field
                .foreign_key
                .map(|reference| parse_foreign_key(type_name, field.name, reference))
                .transpose()?,
        });
    }

    let (lookup_fields, lookup_joins) = extract_lookups(type_name, fields, &columns)?;

    let mut children = Vec::new();
    for field in fields {
        if field.child.is_some() {
            children.push(extract_child(type_name, field, fields, primary_key)?);
        }
    }

    tracing::trace!(
        model = type_name,
        table = table,
        columns = columns.len(),
        lookups = lookup_fields.len(),
        children = children.len(),
        "Extracted record metadata"
    );

    Ok(TableMetadata {
        type_name,
        table,
        primary_key,
        multitenancy_key,
        columns,
        lookup_fields,
        lookup_joins,
        children,
    })
}

#[allow(clippy::result_large_err)]
fn classify_conflicts(type_name: &str, field: &FieldInfo) -> Result<()> {
    let conflict = |what: &str| {
        config_error(format!(
            "field `{}` of `{}` cannot be both {}",
            field.name, type_name, what
        ))
    };
    if field.primary_key && field.multitenancy_key {
        return Err(conflict("primary key and multitenancy key"));
    }
    if field.child.is_some() && (field.column_name.is_some() || field.lookup) {
        return Err(conflict("a child relation and a column"));
    }
    if field.defined_fields && (field.column_name.is_some() || field.child.is_some()) {
        return Err(conflict("the defined-fields holder and a column or relation"));
    }
    if field.audit.is_some() && (field.primary_key || field.multitenancy_key) {
        return Err(conflict("an audit column and a key"));
    }
    if field.related.is_some() && field.column_name.is_some() {
        return Err(conflict("a related lookup and a column"));
    }
    if field.lookup && (field.encrypted || field.jsonb) {
        return Err(conflict("a lookup field and an encrypted or JSONB column"));
    }
    if field.lookup && has_inexact_text(field.rust_type) {
        return Err(config_error(format!(
            "lookup field `{}` of `{}` has type `{}`, which the store renders differently as text",
            field.name, type_name, field.rust_type
        )));
    }
    if field.lookup && field.column_name.is_none() && field.related.is_none() {
        return Err(config_error(format!(
            "lookup field `{}` of `{}` is neither a column nor a related lookup",
            field.name, type_name
        )));
    }
    Ok(())
}

/// Float fields, optional or not, cannot be part of a text lookup key.
fn has_inexact_text(rust_type: &str) -> bool {
    let mut ty: String = rust_type.chars().filter(|c| !c.is_whitespace()).collect();
    while let Some(inner) = ty.strip_prefix("Option<").and_then(|t| t.strip_suffix('>')) {
        ty = inner.to_string();
    }
    matches!(ty.rsplit("::").next(), Some("f32" | "f64"))
}

#[allow(clippy::result_large_err)]
fn parse_foreign_key(
    type_name: &str,
    field: &str,
    reference: &'static str,
) -> Result<ForeignKeyRef> {
    match reference.split_once('.') {
        Some((table, column)) if is_valid_identifier(table) && is_valid_identifier(column) => {
            Ok(ForeignKeyRef { table, column })
        }
        _ => Err(config_error(format!(
            "field `{}` of `{}` has malformed foreign key `{}` (expected `table.column`)",
            field, type_name, reference
        ))),
    }
}

#[allow(clippy::result_large_err)]
fn extract_lookups(
    type_name: &str,
    fields: &'static [FieldInfo],
    columns: &[ColumnMeta],
) -> Result<(Vec<LookupField>, Vec<LookupJoin>)> {
    let mut lookups = Vec::new();
    let mut joins: Vec<LookupJoin> = Vec::new();

    for field in fields.iter().filter(|f| f.lookup) {
        let source = match (field.related, field.column_name) {
            (Some(related), _) => {
                let join = related_join(type_name, field.name, related, columns, &mut joins)?;
                LookupSource::Related {
                    join,
                    column: related.column,
                }
            }
            (None, Some(column)) => LookupSource::Column(column),
            (None, None) => continue,
        };
        lookups.push(LookupField {
            field: field.name,
            source,
        });
    }
    Ok((lookups, joins))
}

#[allow(clippy::result_large_err)]
fn related_join(
    type_name: &str,
    field: &str,
    related: RelatedLookup,
    columns: &[ColumnMeta],
    joins: &mut Vec<LookupJoin>,
) -> Result<usize> {
    for name in [related.table, related.column, related.key] {
        if !is_valid_identifier(name) {
            return Err(config_error(format!(
                "related lookup `{}` of `{}` names invalid identifier `{}`",
                field, type_name, name
            )));
        }
    }
    if !columns.iter().any(|c| c.column == related.via) {
        return Err(config_error(format!(
            "related lookup `{}` of `{}` joins via `{}`, which is not a column of `{}`",
            field, type_name, related.via, type_name
        )));
    }
    if let Some(index) = joins
        .iter()
        .position(|j| j.table == related.table && j.via == related.via && j.key == related.key)
    {
        return Ok(index);
    }
    joins.push(LookupJoin {
        alias: format!("j{}", joins.len()),
        table: related.table,
        key: related.key,
        via: related.via,
    });
    Ok(joins.len() - 1)
}

#[allow(clippy::result_large_err)]
fn extract_child(
    type_name: &str,
    field: &FieldInfo,
    parent_fields: &'static [FieldInfo],
    parent_primary_key: Option<KeyField>,
) -> Result<ChildRelation> {
    let Some(child) = field.child else {
        return Err(config_error(format!(
            "field `{}` of `{}` is not a child relation",
            field.name, type_name
        )));
    };
    if !matches!(field.shape, FieldShape::Sequence | FieldShape::Mapping) {
        return Err(config_error(format!(
            "child field `{}` of `{}` must be a Vec or map of records, found `{}`",
            field.name, type_name, field.rust_type
        )));
    }
    let Some(element_table) = child.element_table else {
        return Err(config_error(format!(
            "child field `{}` of `{}` holds `{}`, which has no table name",
            field.name, type_name, child.element_type
        )));
    };

    let element_fields = (child.element_fields)();
    let child_column = |child_field: &str, role: &str| -> Result<&'static str> {
        element_fields
            .iter()
            .find(|f| f.name == child_field)
            .and_then(|f| f.column_name)
            .ok_or_else(|| {
                config_error(format!(
                    "{} `{}` of child field `{}` on `{}` is not a column of `{}`",
                    role, child_field, field.name, type_name, child.element_type
                ))
            })
    };

    let mut links = Vec::new();
    if let Some(fk) = child.foreign_key {
        if parent_primary_key.is_none() {
            return Err(config_error(format!(
                "child field `{}` of `{}` links by foreign key but `{}` has no primary key",
                field.name, type_name, type_name
            )));
        }
        links.push(ParentLink {
            child_field: fk,
            child_column: child_column(fk, "foreign key")?,
            source: ParentSource::PrimaryKey,
        });
    }
    for &(child_field, parent_field) in child.grouping {
        let source = match parent_primary_key {
            Some(pk) if pk.field == parent_field => ParentSource::PrimaryKey,
            _ => {
                let declared = parent_fields
                    .iter()
                    .any(|f| f.name == parent_field && f.column_name.is_some());
                if !declared {
                    return Err(config_error(format!(
                        "grouping of child field `{}` on `{}` references `{}`, which is not a column of `{}`",
                        field.name, type_name, parent_field, type_name
                    )));
                }
                ParentSource::Field(parent_field)
            }
        };
        links.push(ParentLink {
            child_field,
            child_column: child_column(child_field, "grouping field")?,
            source,
        });
    }
    if links.is_empty() {
        return Err(config_error(format!(
            "child field `{}` of `{}` must declare `foreign_key` or `grouping`",
            field.name, type_name
        )));
    }

    if let Some(key_field) = child.key_mapping {
        if field.shape != FieldShape::Mapping {
            return Err(config_error(format!(
                "child field `{}` of `{}` uses key_mapping but is not a map",
                field.name, type_name
            )));
        }
        child_column(key_field, "key mapping")?;
    }

    let mut value_mappings = Vec::new();
    for &(child_field, literal) in child.value_mappings {
        value_mappings.push(ValueMapping {
            child_field,
            child_column: child_column(child_field, "value mapping")?,
            value: literal.to_value(),
        });
    }

    let child_primary_key = element_fields
        .iter()
        .find(|f| f.primary_key)
        .and_then(|f| f.column_name);
    let child_multitenancy_key = element_fields
        .iter()
        .find(|f| f.multitenancy_key)
        .and_then(|f| f.column_name);

    if child.delete_orphans && child_primary_key.is_none() {
        return Err(config_error(format!(
            "child field `{}` of `{}` deletes orphans but `{}` has no primary key",
            field.name, type_name, child.element_type
        )));
    }

    Ok(ChildRelation {
        field: field.name,
        element_type: child.element_type,
        element_table,
        shape: field.shape,
        links,
        key_mapping: child.key_mapping,
        value_mappings,
        delete_orphans: child.delete_orphans,
        child_primary_key,
        child_multitenancy_key,
    })
}

/// Memoized metadata, keyed by record type.
///
/// Owned by whoever drives the engine; there is no process-wide instance.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    cache: RwLock<HashMap<TypeId, Arc<TableMetadata>>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata for `M`, extracting it on first use.
    #[allow(clippy::result_large_err)]
    pub fn get<M: Model>(&self) -> Result<Arc<TableMetadata>> {
        let key = TypeId::of::<M>();
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(meta) = cache.get(&key) {
                return Ok(Arc::clone(meta));
            }
        }

        let meta = Arc::new(extract_metadata::<M>()?);
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        Ok(Arc::clone(cache.entry(key).or_insert(meta)))
    }

    /// Number of cached record types.
    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
