//! Identity resolution.
//!
//! Finds which records of a batch already exist under the tenant with ONE
//! SELECT. Records carrying a primary key are matched by it first and fall
//! back to their composite lookup key when the key names no row; the rest
//! are matched by lookup key alone. The query recomputes the key in SQL with
//! the same length-prefixed encoding used in memory.

use std::collections::{HashMap, HashSet};

use tenantry_core::error::QueryError;
use tenantry_core::lookup::lookup_key_sql;
use tenantry_core::metadata::LookupSource;
use tenantry_core::{
    Model, Result, TableMetadata, TransactionOps, Value, quote_ident, quote_qualified,
    record_lookup_key,
};

const PK_ALIAS: &str = "__pk";
const LOOKUP_ALIAS: &str = "__lookup";

/// Outcome of identity resolution, parallel to the batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Primary key of the matching row, `None` when the record is new
    pub existing: Vec<Option<Value>>,
    /// Primary key the caller put on the record, if any
    pub supplied: Vec<Option<Value>>,
}

impl Resolution {
    /// A batch where nothing matches.
    pub fn all_new(len: usize) -> Self {
        Self {
            existing: vec![None; len],
            supplied: vec![None; len],
        }
    }

    /// Records whose supplied primary key matched no row.
    ///
    /// A record that only resolved through its lookup key still counts.
    pub fn unresolved_supplied(&self) -> impl Iterator<Item = (usize, &Value)> {
        self.supplied
            .iter()
            .zip(&self.existing)
            .enumerate()
            .filter_map(|(i, (supplied, existing))| match (supplied, existing) {
                (Some(pk), Some(found)) if pk.to_text() == found.to_text() => None,
                (Some(pk), _) => Some((i, pk)),
                _ => None,
            })
    }
}

/// A caller-supplied key counts only when it is non-null and non-empty.
pub fn supplied_key(value: Value) -> Option<Value> {
    if value.is_null() || value.is_zero() {
        None
    } else {
        Some(value)
    }
}

/// Primary key currently held by `record`.
#[allow(clippy::result_large_err)]
pub fn record_primary_key<M: Model>(record: &M, meta: &TableMetadata) -> Result<Option<Value>> {
    match meta.primary_key {
        Some(pk) => Ok(supplied_key(record.get_field(pk.field)?)),
        None => Ok(None),
    }
}

/// The identity SELECT and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Build the identity query, or `None` when there is nothing to look up.
pub fn build_identity_query(
    meta: &TableMetadata,
    primary_keys: Vec<Value>,
    lookup_keys: Vec<String>,
    tenant: &Value,
) -> Option<IdentityQuery> {
    let pk = meta.primary_key?;
    if primary_keys.is_empty() && lookup_keys.is_empty() {
        return None;
    }

    let table = meta.table;
    let pk_expr = quote_qualified(table, pk.column);
    let key_expr = if meta.lookup_fields.is_empty() {
        None
    } else {
        let components: Vec<String> = meta
            .lookup_fields
            .iter()
            .map(|lookup| match &lookup.source {
                LookupSource::Column(column) => quote_qualified(table, column),
                LookupSource::Related { join, column } => format!(
                    "{}.{}",
                    quote_ident(&meta.lookup_joins[*join].alias),
                    quote_ident(column)
                ),
            })
            .collect();
        Some(lookup_key_sql(&components))
    };

    let mut sql = format!("SELECT {} AS {}", pk_expr, quote_ident(PK_ALIAS));
    if let Some(expr) = &key_expr {
        sql.push_str(&format!(", {} AS {}", expr, quote_ident(LOOKUP_ALIAS)));
    }
    sql.push_str(&format!(" FROM {}", quote_ident(table)));
    for join in &meta.lookup_joins {
        sql.push_str(&format!(
            " LEFT JOIN {} AS {} ON {}.{} = {}",
            quote_ident(join.table),
            quote_ident(&join.alias),
            quote_ident(&join.alias),
            quote_ident(join.key),
            quote_qualified(table, join.via),
        ));
    }

    let mut params = Vec::new();
    let mut predicates = Vec::new();
    if !primary_keys.is_empty() {
        params.push(Value::Array(primary_keys));
        predicates.push(format!("{} = ANY(${})", pk_expr, params.len()));
    }
    if let Some(expr) = key_expr.filter(|_| !lookup_keys.is_empty()) {
        params.push(Value::Array(
            lookup_keys.into_iter().map(Value::Text).collect(),
        ));
        predicates.push(format!("{} = ANY(${})", expr, params.len()));
    }
    if predicates.is_empty() {
        return None;
    }

    sql.push_str(" WHERE ");
    if predicates.len() > 1 {
        sql.push_str(&format!("({})", predicates.join(" OR ")));
    } else {
        sql.push_str(&predicates[0]);
    }
    if let Some(tenant_key) = meta.multitenancy_key {
        params.push(tenant.clone());
        sql.push_str(&format!(
            " AND {} = ${}",
            quote_qualified(table, tenant_key.column),
            params.len()
        ));
    }

    Some(IdentityQuery { sql, params })
}

/// Resolve which records of the batch already exist.
#[tracing::instrument(level = "debug", skip(tx, records, meta, tenant), fields(table = meta.table))]
#[allow(clippy::result_large_err)]
pub fn resolve<M: Model, T: TransactionOps>(
    tx: &T,
    records: &[&mut M],
    meta: &TableMetadata,
    tenant: &Value,
) -> Result<Resolution> {
    let mut resolution = Resolution::all_new(records.len());
    if meta.primary_key.is_none() {
        return Ok(resolution);
    }

    let mut lookup: Vec<Option<String>> = vec![None; records.len()];
    let mut primary_keys = Vec::new();
    let mut lookup_keys = Vec::new();
    let mut seen_keys = HashSet::new();

    for (i, record) in records.iter().enumerate() {
        if let Some(pk) = record_primary_key(&**record, meta)? {
            primary_keys.push(pk.clone());
            resolution.supplied[i] = Some(pk);
        }
        if let Some(key) = record_lookup_key(&**record, meta)? {
            if seen_keys.insert(key.clone()) {
                lookup_keys.push(key.clone());
            }
            lookup[i] = Some(key);
        }
    }

    let Some(query) = build_identity_query(meta, primary_keys, lookup_keys, tenant) else {
        tracing::debug!(records = records.len(), "No identities to resolve");
        return Ok(resolution);
    };

    tracing::debug!(sql = %query.sql, records = records.len(), "Resolving identities");
    let rows = tx.query(&query.sql, &query.params)?;

    let mut by_pk: HashMap<String, Value> = HashMap::new();
    let mut by_key: HashMap<String, Value> = HashMap::new();
    for row in &rows {
        let pk = row
            .get_by_name(PK_ALIAS)
            .or_else(|| row.get(0))
            .cloned()
            .ok_or_else(|| QueryError::unexpected("identity row has no primary key", &query.sql))?;
        let Some(pk_text) = pk.to_text() else {
            continue;
        };
        if let Some(key) = row
            .get_by_name(LOOKUP_ALIAS)
            .or_else(|| row.get(1))
            .and_then(Value::to_text)
        {
            by_key.entry(key).or_insert_with(|| pk.clone());
        }
        by_pk.insert(pk_text, pk);
    }

    for (i, existing) in resolution.existing.iter_mut().enumerate() {
        let by_supplied = resolution.supplied[i]
            .as_ref()
            .and_then(Value::to_text)
            .and_then(|text| by_pk.get(&text).cloned());
        let by_lookup = lookup[i].as_ref().and_then(|key| by_key.get(key).cloned());
        *existing = by_supplied.or(by_lookup);
    }

    tracing::debug!(
        rows = rows.len(),
        matched = resolution.existing.iter().filter(|e| e.is_some()).count(),
        "Resolved identities"
    );
    Ok(resolution)
}
