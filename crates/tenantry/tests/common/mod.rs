//! In-memory store that understands the statements the deployer emits.
#![allow(dead_code)]

pub mod models;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use regex::Regex;
use tenantry::{Connection, Error, IsolationLevel, QueryError, QueryErrorKind, Result, Row, Value};

pub type StoredRow = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default)]
struct Tables {
    tables: BTreeMap<String, Vec<StoredRow>>,
    next_id: i64,
}

#[derive(Debug, Default)]
struct Inner {
    data: Tables,
    log: Vec<String>,
    fail_on: Option<String>,
}

/// Shared handle; clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

pub struct MemoryTx {
    inner: Arc<Mutex<Inner>>,
    snapshot: Tables,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row directly, assigning `id` when the row has none.
    pub fn seed(&self, table: &str, row: &[(&str, Value)]) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let mut stored: StoredRow = row
            .iter()
            .map(|(c, v)| ((*c).to_string(), v.clone()))
            .collect();
        let id = match stored.get("id").and_then(as_i64) {
            Some(id) => id,
            None => {
                inner.data.next_id += 1;
                let id = inner.data.next_id;
                stored.insert("id".to_string(), Value::BigInt(id));
                id
            }
        };
        inner.data.tables.entry(table.to_string()).or_default().push(stored);
        id
    }

    pub fn rows(&self, table: &str) -> Vec<StoredRow> {
        let inner = self.inner.lock().unwrap();
        inner.data.tables.get(table).cloned().unwrap_or_default()
    }

    /// Rows of `table` as fetched rows, for hydration.
    pub fn fetch(&self, table: &str) -> Vec<Row> {
        self.rows(table)
            .into_iter()
            .map(|row| {
                let (names, values): (Vec<String>, Vec<Value>) = row.into_iter().unzip();
                Row::new(names, values)
            })
            .collect()
    }

    pub fn statements(&self) -> Vec<String> {
        self.inner.lock().unwrap().log.clone()
    }

    pub fn count_statements(&self, prefix: &str) -> usize {
        self.statements()
            .iter()
            .filter(|sql| sql.starts_with(prefix))
            .count()
    }

    pub fn clear_log(&self) {
        self.inner.lock().unwrap().log.clear();
    }

    pub fn fail_on(&self, needle: &str) {
        self.inner.lock().unwrap().fail_on = Some(needle.to_string());
    }
}

impl Connection for MemoryStore {
    type Tx<'conn>
        = MemoryTx
    where
        Self: 'conn;

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        run(&self.inner, sql, params).map(|(rows, _)| rows)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        run(&self.inner, sql, params).map(|(_, count)| count)
    }

    fn begin_with(&self, _isolation: IsolationLevel) -> Result<Self::Tx<'_>> {
        let snapshot = self.inner.lock().unwrap().data.clone();
        Ok(MemoryTx {
            inner: Arc::clone(&self.inner),
            snapshot,
        })
    }
}

impl tenantry::TransactionOps for MemoryTx {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        run(&self.inner, sql, params).map(|(rows, _)| rows)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        run(&self.inner, sql, params).map(|(_, count)| count)
    }

    fn commit(self) -> Result<()> {
        Ok(())
    }

    fn rollback(self) -> Result<()> {
        self.inner.lock().unwrap().data = self.snapshot;
        Ok(())
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    value.to_text().and_then(|t| t.parse().ok())
}

fn same(a: &Value, b: &Value) -> bool {
    match (a.to_text(), b.to_text()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

fn param(params: &[Value], index: &str) -> Value {
    let index: usize = index.parse().unwrap();
    params[index - 1].clone()
}

fn items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

fn unquote(ident: &str) -> String {
    ident.trim().trim_matches('"').to_string()
}

fn failure(sql: &str, message: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Database,
        sql: Some(sql.to_string()),
        sqlstate: None,
        message: message.to_string(),
        source: None,
    })
}

enum Predicate {
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Predicate {
    fn matches(&self, row: &StoredRow) -> bool {
        match self {
            Predicate::Eq(column, value) => row.get(column).is_some_and(|v| same(v, value)),
            Predicate::In(column, values) => row
                .get(column)
                .is_some_and(|v| values.iter().any(|candidate| same(v, candidate))),
        }
    }
}

fn predicates(clause: &str, params: &[Value]) -> Vec<Predicate> {
    let any = re(r#"^"(\w+)" = ANY\(\$(\d+)\)$"#);
    let list = re(r#"^"(\w+)" IN \(([^)]*)\)$"#);
    let eq = re(r#"^"(\w+)" = \$(\d+)$"#);
    clause
        .split(" AND ")
        .map(|part| {
            let part = part.trim();
            if let Some(c) = any.captures(part) {
                Predicate::In(c[1].to_string(), items(param(params, &c[2])))
            } else if let Some(c) = list.captures(part) {
                let values = c[2]
                    .split(", ")
                    .map(|p| param(params, p.trim_start_matches('$')))
                    .collect();
                Predicate::In(c[1].to_string(), values)
            } else if let Some(c) = eq.captures(part) {
                Predicate::Eq(c[1].to_string(), param(params, &c[2]))
            } else {
                panic!("unsupported predicate: {part}");
            }
        })
        .collect()
}

fn run(inner: &Mutex<Inner>, sql: &str, params: &[Value]) -> Result<(Vec<Row>, u64)> {
    let mut inner = inner.lock().unwrap();
    inner.log.push(sql.to_string());
    if let Some(needle) = &inner.fail_on {
        if sql.contains(needle.as_str()) {
            return Err(failure(sql, "scripted failure"));
        }
    }
    let data = &mut inner.data;
    if sql.contains("AS \"__pk\"") {
        Ok((identity(data, sql, params), 0))
    } else if sql.starts_with("SELECT") {
        Ok((select(data, sql, params), 0))
    } else if sql.starts_with("INSERT") {
        let rows = insert(data, sql, params);
        let count = rows.len() as u64;
        Ok((rows, count))
    } else if sql.starts_with("UPDATE") {
        Ok((Vec::new(), update(data, sql, params)))
    } else if sql.starts_with("DELETE") {
        Ok((Vec::new(), delete(data, sql, params)))
    } else {
        Err(failure(sql, "unsupported statement"))
    }
}

fn identity(data: &Tables, sql: &str, params: &[Value]) -> Vec<Row> {
    let table = re(r#"FROM "(\w+)""#).captures(sql).unwrap()[1].to_string();
    let pk_column = re(r#"^SELECT "\w+"\."(\w+)" AS "__pk""#).captures(sql).unwrap()[1].to_string();
    let joins: Vec<(String, String, String, String)> =
        re(r#"LEFT JOIN "(\w+)" AS "(\w+)" ON "\w+"\."(\w+)" = "\w+"\."(\w+)""#)
            .captures_iter(sql)
            .map(|c| (c[1].to_string(), c[2].to_string(), c[3].to_string(), c[4].to_string()))
            .collect();
    let select_list = sql.split(" FROM ").next().unwrap_or_default();
    let components: Vec<(String, String)> = re(r#"char_length\(COALESCE\("(\w+)"\."(\w+)"::text"#)
        .captures_iter(select_list)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect();

    let pks = re(r#"WHERE \(?"\w+"\."\w+" = ANY\(\$(\d+)\)"#)
        .captures(sql)
        .map(|c| items(param(params, &c[1])))
        .unwrap_or_default();
    let keys = re(r#"''\) = ANY\(\$(\d+)\)"#)
        .captures(sql)
        .map(|c| items(param(params, &c[1])))
        .unwrap_or_default();
    let tenant = re(r#"AND "\w+"\."(\w+)" = \$(\d+)$"#)
        .captures(sql)
        .map(|c| (c[1].to_string(), param(params, &c[2])));

    let empty = Vec::new();
    let rows = data.tables.get(&table).unwrap_or(&empty);
    let mut out = Vec::new();
    for row in rows {
        if let Some((column, value)) = &tenant {
            if !row.get(column).is_some_and(|v| same(v, value)) {
                continue;
            }
        }
        let pk = row.get(&pk_column).cloned().unwrap_or(Value::Null);
        let mut key = String::new();
        for (qualifier, column) in &components {
            let value = if *qualifier == table {
                row.get(column).cloned()
            } else {
                joins
                    .iter()
                    .find(|(_, alias, _, _)| alias == qualifier)
                    .and_then(|(join_table, _, join_key, via)| {
                        let via_value = row.get(via)?;
                        data.tables
                            .get(join_table)?
                            .iter()
                            .find(|j| j.get(join_key).is_some_and(|k| same(k, via_value)))
                            .and_then(|j| j.get(column).cloned())
                    })
            };
            let text = value.and_then(|v| v.to_text()).unwrap_or_default();
            key.push_str(&format!("{}:{}", text.chars().count(), text));
        }
        let key_value = Value::Text(key);
        let by_pk = pks.iter().any(|p| same(p, &pk));
        let by_key = !components.is_empty() && keys.iter().any(|k| same(k, &key_value));
        if by_pk || by_key {
            out.push(Row::new(
                vec!["__pk".to_string(), "__lookup".to_string()],
                vec![pk, key_value],
            ));
        }
    }
    out
}

fn select(data: &Tables, sql: &str, params: &[Value]) -> Vec<Row> {
    let c = re(r#"^SELECT (.*) FROM "(\w+)" WHERE (.*)$"#).captures(sql).unwrap();
    let columns: Vec<String> = c[1].split(", ").map(unquote).collect();
    let filters = predicates(&c[3], params);
    data.tables
        .get(&c[2])
        .map(|rows| {
            rows.iter()
                .filter(|row| filters.iter().all(|p| p.matches(row)))
                .map(|row| {
                    let values = columns
                        .iter()
                        .map(|col| row.get(col).cloned().unwrap_or(Value::Null))
                        .collect();
                    Row::new(columns.clone(), values)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn insert(data: &mut Tables, sql: &str, params: &[Value]) -> Vec<Row> {
    let returning = re(r#" RETURNING "(\w+)"$"#)
        .captures(sql)
        .map(|c| c[1].to_string());
    let body = re(r#" RETURNING "\w+"$"#).replace(sql, "").to_string();

    let (table, new_rows): (String, Vec<StoredRow>) =
        if let Some(c) = re(r#"^INSERT INTO "(\w+)" DEFAULT VALUES$"#).captures(&body) {
            (c[1].to_string(), vec![StoredRow::new()])
        } else {
            let c = re(r#"^INSERT INTO "(\w+)" \(([^)]*)\) VALUES (.*)$"#)
                .captures(&body)
                .unwrap();
            let columns: Vec<String> = c[2].split(", ").map(unquote).collect();
            let rows = re(r"\(([^()]*)\)")
                .captures_iter(&c[3])
                .map(|tuple| {
                    let mut row = StoredRow::new();
                    for (column, cell) in columns.iter().zip(tuple[1].split(", ")) {
                        if let Some(index) = cell.strip_prefix('$') {
                            row.insert(column.clone(), param(params, index));
                        }
                    }
                    row
                })
                .collect();
            (c[1].to_string(), rows)
        };

    let mut out = Vec::new();
    for mut row in new_rows {
        if let Some(pk) = &returning {
            let key = match row.get(pk).cloned() {
                Some(value) if !value.is_null() => value,
                _ => {
                    data.next_id += 1;
                    let value = Value::BigInt(data.next_id);
                    row.insert(pk.clone(), value.clone());
                    value
                }
            };
            out.push(Row::new(vec![pk.clone()], vec![key]));
        }
        data.tables.entry(table.clone()).or_default().push(row);
    }
    out
}

fn update(data: &mut Tables, sql: &str, params: &[Value]) -> u64 {
    let c = re(r#"^UPDATE "(\w+)" SET (.*) WHERE (.*)$"#).captures(sql).unwrap();
    let assignment = re(r#"^"(\w+)" = \$(\d+)$"#);
    let sets: Vec<(String, Value)> = c[2]
        .split(", ")
        .map(|part| {
            let a = assignment.captures(part.trim()).unwrap();
            (a[1].to_string(), param(params, &a[2]))
        })
        .collect();
    let filters = predicates(&c[3], params);
    let mut count = 0;
    if let Some(rows) = data.tables.get_mut(&c[1]) {
        for row in rows.iter_mut().filter(|row| filters.iter().all(|p| p.matches(row))) {
            for (column, value) in &sets {
                row.insert(column.clone(), value.clone());
            }
            count += 1;
        }
    }
    count
}

fn delete(data: &mut Tables, sql: &str, params: &[Value]) -> u64 {
    let c = re(r#"^DELETE FROM "(\w+)" WHERE (.*)$"#).captures(sql).unwrap();
    let filters = predicates(&c[2], params);
    let Some(rows) = data.tables.get_mut(&c[1]) else {
        return 0;
    };
    let before = rows.len();
    rows.retain(|row| !filters.iter().all(|p| p.matches(row)));
    (before - rows.len()) as u64
}
