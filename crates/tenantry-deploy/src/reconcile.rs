//! Child reconciliation.
//!
//! Runs after a parent batch is written, when every parent primary key is
//! known. For each relation it copies the parent link values into the
//! children, persists the flattened child batch through the same pipeline,
//! and deletes orphans: existing child rows of an updated parent whose
//! primary key is not among that parent's new children.

use std::collections::{HashMap, HashSet};

use tenantry_core::error::{ConfigError, Error, Operation};
use tenantry_core::lookup::key_component;
use tenantry_core::metadata::{ChildRelation, ParentLink, ParentSource};
use tenantry_core::{
    ChildEntry, ChildVisitor, DefinedFields, Model, Result, TableMetadata, TransactionOps, Value,
    quote_ident,
};

use crate::executor::Statement;
use crate::pipeline::{DeployResult, Pipeline, WriteMode};
use crate::resolver::{Resolution, record_primary_key};

/// What the reconciler needs to remember about one parent record.
#[derive(Debug, Clone)]
struct ParentState {
    primary_key: Option<Value>,
    updated: bool,
    /// Parent fields referenced by grouping links
    fields: HashMap<&'static str, Value>,
    defined: Option<DefinedFields>,
}

impl ParentState {
    fn link_value(&self, link: &ParentLink) -> Value {
        match link.source {
            ParentSource::PrimaryKey => self.primary_key.clone().unwrap_or(Value::Null),
            ParentSource::Field(field) => self.fields.get(field).cloned().unwrap_or(Value::Null),
        }
    }

    fn link_values(&self, relation: &ChildRelation) -> Vec<Value> {
        relation.links.iter().map(|l| self.link_value(l)).collect()
    }

    /// Whether this parent's existing children are subject to orphan removal.
    fn owns_relation(&self, relation: &ChildRelation) -> bool {
        self.updated
            && self
                .defined
                .as_ref()
                .is_none_or(|d| d.contains(relation.field))
    }
}

/// Identity of a parent as seen from the child table.
fn tuple_key(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| key_component(&v.to_text().unwrap_or_default()))
        .collect()
}

pub(crate) struct Reconciler<'p, 'a, T> {
    pipeline: &'p Pipeline<'a>,
    tx: &'p T,
    parent: &'p TableMetadata,
    parents: Vec<ParentState>,
    mode: WriteMode,
    result: DeployResult,
}

impl<'p, 'a, T: TransactionOps> Reconciler<'p, 'a, T> {
    #[allow(clippy::result_large_err)]
    pub fn new<M: Model>(
        pipeline: &'p Pipeline<'a>,
        tx: &'p T,
        parent: &'p TableMetadata,
        records: &[&mut M],
        resolution: &Resolution,
        mode: WriteMode,
    ) -> Result<Self> {
        let grouped: Vec<&'static str> = parent
            .children
            .iter()
            .flat_map(|relation| relation.links.iter())
            .filter_map(|link| match link.source {
                ParentSource::Field(field) => Some(field),
                ParentSource::PrimaryKey => None,
            })
            .collect();

        let mut parents = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            let mut fields = HashMap::new();
            for field in &grouped {
                fields.insert(*field, record.get_field(field)?);
            }
            parents.push(ParentState {
                primary_key: record_primary_key(&**record, parent)?,
                updated: resolution.existing.get(index).is_some_and(Option::is_some),
                fields,
                defined: record.defined_fields().cloned(),
            });
        }

        Ok(Self {
            pipeline,
            tx,
            parent,
            parents,
            mode,
            result: DeployResult::default(),
        })
    }

    pub fn into_result(self) -> DeployResult {
        self.result
    }

    #[allow(clippy::result_large_err)]
    fn delete_orphans<C: Model>(
        &mut self,
        relation: &ChildRelation,
        child_meta: &TableMetadata,
        owners: &[usize],
        children: &[&mut C],
    ) -> Result<()> {
        let Some(child_pk) = child_meta.primary_key else {
            return Ok(());
        };
        let scoped: Vec<Vec<Value>> = self
            .parents
            .iter()
            .filter(|p| p.owns_relation(relation))
            .map(|p| p.link_values(relation))
            .filter(|values| values.iter().all(|v| !v.is_null()))
            .collect();
        if scoped.is_empty() {
            return Ok(());
        }
        let scoped_keys: HashSet<String> = scoped.iter().map(|v| tuple_key(v)).collect();

        let mut kept: HashMap<String, HashSet<String>> = HashMap::new();
        for (owner, child) in owners.iter().zip(children) {
            let Some(pk) = record_primary_key(&**child, child_meta)?.and_then(|v| v.to_text())
            else {
                continue;
            };
            let key = tuple_key(&self.parents[*owner].link_values(relation));
            kept.entry(key).or_default().insert(pk);
        }

        let tenant = &self.pipeline.context.tenant;
        let query = build_orphan_query(relation, child_meta, &scoped, tenant);
        tracing::debug!(sql = %query.sql, parents = scoped.len(), "Finding orphans");
        let rows = self
            .tx
            .query(&query.sql, &query.params)
            .map_err(|e| e.in_operation(child_meta.table, Operation::FindOrphans))?;

        let mut orphans = Vec::new();
        for row in &rows {
            let Some(pk) = row.get(0).filter(|v| !v.is_null()) else {
                continue;
            };
            let owner: Vec<Value> = (1..=relation.links.len())
                .map(|i| row.get(i).cloned().unwrap_or(Value::Null))
                .collect();
            let owner = tuple_key(&owner);
            if !scoped_keys.contains(&owner) {
                continue;
            }
            let still_present = pk
                .to_text()
                .is_some_and(|text| kept.get(&owner).is_some_and(|set| set.contains(&text)));
            if !still_present {
                orphans.push(pk.clone());
            }
        }

        if orphans.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            table = child_meta.table,
            orphans = orphans.len(),
            "Deleting orphans"
        );
        for chunk in orphans.chunks(self.pipeline.config.batch_size.max(1)) {
            let statement = build_orphan_delete(child_meta, child_pk.column, chunk, tenant);
            self.result.deleted += self
                .tx
                .execute(&statement.sql, &statement.params)
                .map_err(|e| e.in_operation(child_meta.table, Operation::DeleteOrphans))?;
        }
        Ok(())
    }
}

impl<T: TransactionOps> ChildVisitor for Reconciler<'_, '_, T> {
    fn visit<C: Model>(
        &mut self,
        relation: &'static str,
        children: Vec<ChildEntry<'_, C>>,
    ) -> Result<()> {
        let relation = self.parent.child(relation).cloned().ok_or_else(|| {
            Error::Config(ConfigError::new(format!(
                "`{}` has no child relation `{}`",
                self.parent.type_name, relation
            )))
        })?;
        let child_meta = self.pipeline.registry.get::<C>()?;

        let mut owners = Vec::with_capacity(children.len());
        let mut records: Vec<&mut C> = Vec::with_capacity(children.len());
        for ChildEntry {
            parent_index,
            map_key,
            record,
        } in children
        {
            let parent = self.parents.get(parent_index).ok_or_else(|| {
                Error::Custom(format!(
                    "child of `{}` refers to parent {} outside the batch",
                    relation.field, parent_index
                ))
            })?;
            for link in &relation.links {
                record.set_field(link.child_field, parent.link_value(link))?;
            }
            if let (Some(field), Some(key)) = (relation.key_mapping, map_key) {
                record.set_field(field, key)?;
            }
            for mapping in &relation.value_mappings {
                record.set_field(mapping.child_field, mapping.value.clone())?;
            }
            owners.push(parent_index);
            records.push(record);
        }

        tracing::trace!(
            relation = relation.field,
            children = records.len(),
            "Reconciling children"
        );
        if !records.is_empty() {
            let forced = relation.forced_fields();
            self.result += self.pipeline.persist::<C, T>(
                self.tx,
                &mut records,
                self.mode.for_children(),
                &forced,
            )?;
        }

        if relation.delete_orphans {
            self.delete_orphans(&relation, &child_meta, &owners, &records)?;
        }
        Ok(())
    }
}

/// SELECT the existing children of the scoped parents.
pub fn build_orphan_query(
    relation: &ChildRelation,
    child_meta: &TableMetadata,
    parents: &[Vec<Value>],
    tenant: &Value,
) -> Statement {
    let pk_column = child_meta.primary_key.map_or("id", |pk| pk.column);
    let mut columns = vec![quote_ident(pk_column)];
    columns.extend(relation.links.iter().map(|l| quote_ident(l.child_column)));

    let mut params = Vec::new();
    let mut predicates = Vec::new();
    for (i, link) in relation.links.iter().enumerate() {
        let mut seen = HashSet::new();
        let values: Vec<Value> = parents
            .iter()
            .filter_map(|p| p.get(i))
            .filter(|v| v.to_text().is_some_and(|t| seen.insert(t)))
            .cloned()
            .collect();
        params.push(Value::Array(values));
        predicates.push(format!(
            "{} = ANY(${})",
            quote_ident(link.child_column),
            params.len()
        ));
    }
    for mapping in &relation.value_mappings {
        params.push(mapping.value.clone());
        predicates.push(format!(
            "{} = ${}",
            quote_ident(mapping.child_column),
            params.len()
        ));
    }
    if let Some(tenant_key) = child_meta.multitenancy_key {
        params.push(tenant.clone());
        predicates.push(format!(
            "{} = ${}",
            quote_ident(tenant_key.column),
            params.len()
        ));
    }

    Statement {
        sql: format!(
            "SELECT {} FROM {} WHERE {}",
            columns.join(", "),
            quote_ident(child_meta.table),
            predicates.join(" AND ")
        ),
        params,
    }
}

/// DELETE the given child rows, tenant-scoped.
pub fn build_orphan_delete(
    child_meta: &TableMetadata,
    pk_column: &str,
    ids: &[Value],
    tenant: &Value,
) -> Statement {
    let mut params: Vec<Value> = ids.to_vec();
    let placeholders = (1..=ids.len())
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "DELETE FROM {} WHERE {} IN ({})",
        quote_ident(child_meta.table),
        quote_ident(pk_column),
        placeholders
    );
    if let Some(tenant_key) = child_meta.multitenancy_key {
        params.push(tenant.clone());
        sql.push_str(&format!(
            " AND {} = ${}",
            quote_ident(tenant_key.column),
            params.len()
        ));
    }
    Statement { sql, params }
}
