//! In-memory undo for a failed call.
//!
//! The pipeline writes generated keys, the tenant and parent links into the
//! records it persists. Once the transaction rolls back those values name
//! rows that do not exist, so the touched fields of the whole tree are
//! captured before the call and written back when it fails.
//!
//! Capture and restore walk the tree in the same order, so the saved values
//! are replayed positionally.

use std::vec::IntoIter;

use tenantry_core::{
    ChildEntry, ChildVisitor, MetadataRegistry, Model, Result, TableMetadata, Value,
};

/// Prior values of every field the pipeline may write, in walk order.
#[derive(Debug, Default)]
pub(crate) struct FieldUndo {
    values: Vec<Value>,
}

impl FieldUndo {
    #[allow(clippy::result_large_err)]
    pub fn capture<M: Model>(registry: &MetadataRegistry, records: &mut [&mut M]) -> Result<Self> {
        let mut values = Vec::new();
        walk(registry, records, &[], &mut Pass::Capture(&mut values))?;
        tracing::trace!(fields = values.len(), "Captured undo values");
        Ok(Self { values })
    }

    #[allow(clippy::result_large_err)]
    pub fn restore<M: Model>(
        self,
        registry: &MetadataRegistry,
        records: &mut [&mut M],
    ) -> Result<()> {
        let mut values = self.values.into_iter();
        walk(registry, records, &[], &mut Pass::Restore(&mut values))
    }
}

enum Pass<'v> {
    Capture(&'v mut Vec<Value>),
    Restore(&'v mut IntoIter<Value>),
}

impl Pass<'_> {
    #[allow(clippy::result_large_err)]
    fn apply<M: Model>(&mut self, record: &mut M, field: &str) -> Result<()> {
        match self {
            Pass::Capture(values) => values.push(record.get_field(field)?),
            Pass::Restore(values) => {
                if let Some(value) = values.next() {
                    record.set_field(field, value)?;
                }
            }
        }
        Ok(())
    }
}

/// Fields of `meta` the pipeline writes, plus those the parent relation sets.
fn touched_fields(meta: &TableMetadata, linked: &[&'static str]) -> Vec<&'static str> {
    meta.primary_key
        .iter()
        .chain(meta.multitenancy_key.iter())
        .map(|key| key.field)
        .chain(linked.iter().copied())
        .collect()
}

#[allow(clippy::result_large_err)]
fn walk<M: Model>(
    registry: &MetadataRegistry,
    records: &mut [&mut M],
    linked: &[&'static str],
    pass: &mut Pass<'_>,
) -> Result<()> {
    let meta = registry.get::<M>()?;
    let fields = touched_fields(&meta, linked);
    for record in records.iter_mut() {
        for field in &fields {
            pass.apply(&mut **record, field)?;
        }
    }

    if !meta.children.is_empty() {
        let mut walker = Walker {
            registry,
            parent: &meta,
            pass,
        };
        M::visit_children(records, &mut walker)?;
    }
    Ok(())
}

struct Walker<'r, 'p, 'v> {
    registry: &'r MetadataRegistry,
    parent: &'r TableMetadata,
    pass: &'p mut Pass<'v>,
}

impl ChildVisitor for Walker<'_, '_, '_> {
    fn visit<C: Model>(
        &mut self,
        relation: &'static str,
        children: Vec<ChildEntry<'_, C>>,
    ) -> Result<()> {
        let linked = self
            .parent
            .child(relation)
            .map(|r| r.forced_fields())
            .unwrap_or_default();
        let mut records: Vec<&mut C> = children.into_iter().map(|entry| entry.record).collect();
        walk(self.registry, &mut records, &linked, self.pass)
    }
}
