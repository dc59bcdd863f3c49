//! Model trait for record types persisted by the deploy engine.
//!
//! `Model` is normally derived with `#[derive(Model)]` from `tenantry-macros`.
//! It exposes the static field declarations plus by-name accessors, which is
//! everything the engine needs to move values in and out of a record without
//! knowing its concrete type.

use crate::Result;
use crate::defined::DefinedFields;
use crate::error::{ConfigError, Error};
use crate::field::FieldInfo;
use crate::value::Value;

/// A record type that maps to one table.
///
/// # Example
///
/// ```ignore
/// use tenantry::prelude::*;
///
/// #[derive(Model, Default)]
/// #[tenantry(table = "products")]
/// struct Product {
///     #[tenantry(primary_key)]
///     id: Option<i64>,
///     #[tenantry(multitenancy_key)]
///     tenant_id: i64,
///     #[tenantry(lookup, required)]
///     sku: String,
///     #[tenantry(column)]
///     name: String,
/// }
/// ```
pub trait Model: Sized + 'static {
    /// The table this record is stored in. `None` is a configuration error
    /// reported by metadata extraction.
    const TABLE_NAME: Option<&'static str>;

    /// The Rust type name, used in diagnostics.
    const TYPE_NAME: &'static str;

    /// Declarations of every annotated field, in declaration order.
    fn fields() -> &'static [FieldInfo];

    /// Read a field by its Rust name.
    #[allow(clippy::result_large_err)]
    fn get_field(&self, name: &str) -> Result<Value>;

    /// Write a field by its Rust name.
    #[allow(clippy::result_large_err)]
    fn set_field(&mut self, name: &str, value: Value) -> Result<()>;

    /// Fields explicitly present in the source payload.
    ///
    /// `None` means the record is in full-replace mode.
    fn defined_fields(&self) -> Option<&DefinedFields> {
        None
    }

    /// Hand every child relation of `parents` to `visitor`.
    ///
    /// Children are flattened across all parents, one `visit` call per relation.
    #[allow(clippy::result_large_err)]
    fn visit_children<V: ChildVisitor>(parents: &mut [&mut Self], visitor: &mut V) -> Result<()> {
        let _ = (parents, visitor);
        Ok(())
    }
}

/// One child record together with the parent that owns it.
#[derive(Debug)]
pub struct ChildEntry<'a, C> {
    /// Index of the owning parent in the batch passed to `visit_children`
    pub parent_index: usize,
    /// Map key for mapping-shaped relations
    pub map_key: Option<Value>,
    pub record: &'a mut C,
}

impl<'a, C> ChildEntry<'a, C> {
    pub fn new(parent_index: usize, map_key: Option<Value>, record: &'a mut C) -> Self {
        Self {
            parent_index,
            map_key,
            record,
        }
    }
}

/// Receives the flattened children of one relation.
pub trait ChildVisitor {
    #[allow(clippy::result_large_err)]
    fn visit<C: Model>(
        &mut self,
        relation: &'static str,
        children: Vec<ChildEntry<'_, C>>,
    ) -> Result<()>;
}

/// Error for a by-name access to a field the record does not expose.
pub fn unknown_field(type_name: &str, field: &str) -> Error {
    Error::Config(ConfigError::new(format!(
        "`{}` has no accessible field `{}`",
        type_name, field
    )))
}
