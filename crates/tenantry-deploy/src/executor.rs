//! Batch execution.
//!
//! Inserts go out as multi-row statements of at most `batch_size` rows over
//! the union of the chunk's columns; a row that lacks one of them sends
//! `DEFAULT`. Generated primary keys come back through `RETURNING` and are
//! written into the source records. Updates run one statement per row.
//! Nothing here begins or ends a transaction.

use std::collections::HashSet;

use tenantry_core::error::QueryError;
use tenantry_core::{Model, Result, TableMetadata, TransactionOps, Value, quote_ident};

use crate::planner::DbChange;

/// A rendered statement and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Build one multi-row INSERT for `changes`.
pub fn build_insert(meta: &TableMetadata, changes: &[&DbChange]) -> Statement {
    let mut columns: Vec<&'static str> = Vec::new();
    let mut seen = HashSet::new();
    for change in changes {
        for column in change.columns() {
            if seen.insert(column) {
                columns.push(column);
            }
        }
    }
    // Keep declaration order across rows with different column sets.
    columns.sort_by_key(|c| meta.columns.iter().position(|m| m.column == *c));

    let returning = meta
        .primary_key
        .map(|pk| format!(" RETURNING {}", quote_ident(pk.column)))
        .unwrap_or_default();

    if columns.is_empty() {
        return Statement {
            sql: format!("INSERT INTO {} DEFAULT VALUES{}", quote_ident(meta.table), returning),
            params: Vec::new(),
        };
    }

    let col_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!("INSERT INTO {} ({}) VALUES ", quote_ident(meta.table), col_list);
    let mut params = Vec::new();

    for (i, change) in changes.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        let cells: Vec<String> = columns
            .iter()
            .map(|column| match change.get(column) {
                Some(value) => {
                    params.push(value.clone());
                    format!("${}", params.len())
                }
                None => "DEFAULT".to_string(),
            })
            .collect();
        sql.push('(');
        sql.push_str(&cells.join(", "));
        sql.push(')');
    }
    sql.push_str(&returning);

    Statement { sql, params }
}

/// Build the UPDATE for one change. `None` when there is nothing to set.
pub fn build_update(meta: &TableMetadata, change: &DbChange, tenant: &Value) -> Option<Statement> {
    let pk = meta.primary_key?;
    let primary_key = change.primary_key.clone()?;

    let mut params = Vec::new();
    let mut assignments = Vec::new();
    for (column, value) in &change.changes {
        if *column == pk.column {
            continue;
        }
        params.push(value.clone());
        assignments.push(format!("{} = ${}", quote_ident(column), params.len()));
    }
    if assignments.is_empty() {
        return None;
    }

    let mut predicates = Vec::new();
    if let Some(tenant_key) = meta.multitenancy_key {
        params.push(tenant.clone());
        predicates.push(format!("{} = ${}", quote_ident(tenant_key.column), params.len()));
    }
    params.push(primary_key);
    predicates.push(format!("{} = ${}", quote_ident(pk.column), params.len()));

    Some(Statement {
        sql: format!(
            "UPDATE {} SET {} WHERE {}",
            quote_ident(meta.table),
            assignments.join(", "),
            predicates.join(" AND ")
        ),
        params,
    })
}

/// Execute the inserts and back-fill generated primary keys.
#[tracing::instrument(level = "debug", skip_all, fields(table = meta.table, rows = changes.len()))]
#[allow(clippy::result_large_err)]
pub fn execute_inserts<M: Model, T: TransactionOps>(
    tx: &T,
    meta: &TableMetadata,
    records: &mut [&mut M],
    changes: &[DbChange],
    batch_size: usize,
) -> Result<u64> {
    if changes.is_empty() {
        return Ok(0);
    }

    let mut inserted = 0u64;
    for chunk in changes.chunks(batch_size.max(1)) {
        // DEFAULT VALUES takes a single row, so column-less rows go one by one.
        let groups: Vec<Vec<&DbChange>> = if chunk.iter().all(|c| c.changes.is_empty()) {
            chunk.iter().map(|c| vec![c]).collect()
        } else {
            vec![chunk.iter().collect()]
        };

        for group in groups {
            let statement = build_insert(meta, &group);
            tracing::debug!(sql = %statement.sql, rows = group.len(), "Executing insert batch");

            let Some(pk) = meta.primary_key else {
                tx.execute(&statement.sql, &statement.params)?;
                inserted += group.len() as u64;
                continue;
            };

            let rows = tx.query(&statement.sql, &statement.params)?;
            if rows.len() != group.len() {
                return Err(QueryError::unexpected(
                    format!(
                        "INSERT returned {} keys for {} rows",
                        rows.len(),
                        group.len()
                    ),
                    &statement.sql,
                )
                .into());
            }
            for (change, row) in group.iter().zip(&rows) {
                let key = row
                    .get_by_name(pk.column)
                    .filter(|v| !v.is_null())
                    .cloned()
                    .ok_or_else(|| {
                        QueryError::unexpected(
                            format!("INSERT returned no `{}` for a row", pk.column),
                            &statement.sql,
                        )
                    })?;
                if let Some(record) = records.get_mut(change.record_index) {
                    record.set_field(pk.field, key)?;
                }
            }
            inserted += group.len() as u64;
        }
    }

    tracing::debug!(inserted = inserted, "Insert batches complete");
    Ok(inserted)
}

/// Execute one UPDATE per change.
///
/// Returns the affected row count per change, in order. A change with
/// nothing to set counts as one affected row without touching the store.
#[tracing::instrument(level = "debug", skip_all, fields(table = meta.table, rows = changes.len()))]
#[allow(clippy::result_large_err)]
pub fn execute_updates<T: TransactionOps>(
    tx: &T,
    meta: &TableMetadata,
    changes: &[DbChange],
    tenant: &Value,
) -> Result<Vec<u64>> {
    let mut affected = Vec::with_capacity(changes.len());
    for change in changes {
        let Some(statement) = build_update(meta, change, tenant) else {
            tracing::trace!(index = change.record_index, "Nothing to update");
            affected.push(1);
            continue;
        };
        tracing::debug!(sql = %statement.sql, "Executing update");
        let count = tx.execute(&statement.sql, &statement.params)?;
        if count == 0 {
            tracing::debug!(index = change.record_index, "Update matched no row");
        }
        affected.push(count);
    }
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::ChangeKind;
    use crate::testing::{MockConnection, Widget, widget_meta};
    use tenantry_core::{Connection, Error};

    fn insert(index: usize, changes: Vec<(&'static str, Value)>) -> DbChange {
        DbChange {
            kind: ChangeKind::Insert,
            record_index: index,
            primary_key: None,
            changes,
        }
    }

    #[test]
    fn test_insert_uses_column_union_and_default() {
        let meta = widget_meta();
        let a = insert(0, vec![("code", Value::Text("a".into())), ("name", Value::Null)]);
        let b = insert(1, vec![("tenant_id", Value::BigInt(1)), ("code", Value::Text("b".into()))]);

        let statement = build_insert(&meta, &[&a, &b]);
        assert_eq!(
            statement.sql,
            "INSERT INTO \"widgets\" (\"tenant_id\", \"code\", \"name\") \
             VALUES (DEFAULT, $1, $2), ($3, $4, DEFAULT) RETURNING \"id\""
        );
        assert_eq!(statement.params.len(), 4);
    }

    #[test]
    fn test_update_sets_changed_columns_only() {
        let meta = widget_meta();
        let change = DbChange {
            kind: ChangeKind::Update,
            record_index: 0,
            primary_key: Some(Value::BigInt(9)),
            changes: vec![
                ("id", Value::BigInt(9)),
                ("tenant_id", Value::BigInt(1)),
                ("name", Value::Text("x".into())),
            ],
        };
        let statement = build_update(&meta, &change, &Value::BigInt(1)).unwrap();
        assert_eq!(
            statement.sql,
            "UPDATE \"widgets\" SET \"tenant_id\" = $1, \"name\" = $2 \
             WHERE \"tenant_id\" = $3 AND \"id\" = $4"
        );
        assert_eq!(statement.params[3], Value::BigInt(9));
    }

    #[test]
    fn test_inserts_are_chunked_and_keys_back_filled() {
        let conn = MockConnection::new();
        conn.push_rows(&["id"], vec![vec![Value::BigInt(1)], vec![Value::BigInt(2)]]);
        conn.push_rows(&["id"], vec![vec![Value::BigInt(3)]]);

        let mut widgets = vec![Widget::new("a"), Widget::new("b"), Widget::new("c")];
        let mut records: Vec<&mut Widget> = widgets.iter_mut().collect();
        let changes: Vec<DbChange> = (0..3)
            .map(|i| insert(i, vec![("code", Value::Text(format!("c{i}")))]))
            .collect();

        let tx = conn.begin().unwrap();
        let inserted = execute_inserts(&tx, &widget_meta(), &mut records, &changes, 2).unwrap();

        assert_eq!(inserted, 3);
        assert_eq!(conn.queries().len(), 2);
        assert_eq!(
            widgets.iter().map(|w| w.id).collect::<Vec<_>>(),
            vec![Some(1), Some(2), Some(3)]
        );
    }

    #[test]
    fn test_insert_key_count_mismatch_is_an_error() {
        let conn = MockConnection::new();
        conn.push_rows(&["id"], vec![]);
        let mut widget = Widget::new("a");
        let mut records = vec![&mut widget];
        let changes = vec![insert(0, vec![("code", Value::Text("a".into()))])];

        let tx = conn.begin().unwrap();
        assert!(execute_inserts(&tx, &widget_meta(), &mut records, &changes, 10).is_err());
    }

    #[test]
    fn test_insert_without_returned_key_is_an_error() {
        let conn = MockConnection::new();
        conn.push_rows(&["code"], vec![vec![Value::Text("a".into())]]);
        let mut widget = Widget::new("a");
        let mut records = vec![&mut widget];
        let changes = vec![insert(0, vec![("code", Value::Text("a".into()))])];

        let tx = conn.begin().unwrap();
        let err = execute_inserts(&tx, &widget_meta(), &mut records, &changes, 10).unwrap_err();
        assert!(matches!(err, Error::Query(_)));
        assert_eq!(widget.id, None);
    }

    #[test]
    fn test_null_returned_key_is_an_error() {
        let conn = MockConnection::new();
        conn.push_rows(&["id"], vec![vec![Value::Null]]);
        let mut widget = Widget::new("a");
        let mut records = vec![&mut widget];
        let changes = vec![insert(0, vec![("code", Value::Text("a".into()))])];

        let tx = conn.begin().unwrap();
        assert!(execute_inserts(&tx, &widget_meta(), &mut records, &changes, 10).is_err());
    }

    #[test]
    fn test_update_reports_zero_rows_without_error() {
        let conn = MockConnection::new();
        conn.push_affected(0);
        let change = DbChange {
            kind: ChangeKind::Update,
            record_index: 0,
            primary_key: Some(Value::BigInt(9)),
            changes: vec![("name", Value::Text("x".into()))],
        };

        let tx = conn.begin().unwrap();
        let affected =
            execute_updates(&tx, &widget_meta(), &[change], &Value::BigInt(1)).unwrap();
        assert_eq!(affected, vec![0]);
    }
}
