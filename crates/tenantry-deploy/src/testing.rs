//! Test doubles: a scripted connection and two hand-written models.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tenantry_core::error::{QueryError, QueryErrorKind};
use tenantry_core::field::FieldShape;
use tenantry_core::model::unknown_field;
use tenantry_core::{
    AuditRole, ChildEntry, ChildInfo, ChildVisitor, Connection, DefinedFields, Error, FieldInfo,
    IsolationLevel, Model, Result, Row, TableMetadata, TransactionOps, Value, extract_metadata,
};

#[derive(Debug, Default)]
struct MockState {
    queries: Vec<(String, Vec<Value>)>,
    executes: Vec<(String, Vec<Value>)>,
    query_results: VecDeque<Vec<Row>>,
    execute_results: VecDeque<u64>,
    fail_on: Option<String>,
    begins: usize,
    commits: usize,
    rollbacks: usize,
}

impl MockState {
    fn check(&self, sql: &str) -> Result<()> {
        match &self.fail_on {
            Some(needle) if sql.contains(needle.as_str()) => Err(Error::Query(QueryError {
                kind: QueryErrorKind::Database,
                sql: Some(sql.to_string()),
                sqlstate: Some("XX000".to_string()),
                message: "scripted failure".to_string(),
                source: None,
            })),
            _ => Ok(()),
        }
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.queries.push((sql.to_string(), params.to_vec()));
        self.check(sql)?;
        Ok(self.query_results.pop_front().unwrap_or_default())
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.executes.push((sql.to_string(), params.to_vec()));
        self.check(sql)?;
        Ok(self.execute_results.pop_front().unwrap_or(1))
    }
}

/// Records every statement and answers from scripted result queues.
///
/// Queries pop the next pushed row set (empty when none is left); executes
/// pop the next pushed count (1 when none is left).
#[derive(Debug, Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_rows(&self, columns: &[&str], rows: Vec<Vec<Value>>) {
        let names: Vec<String> = columns.iter().map(|c| (*c).to_string()).collect();
        let rows = rows
            .into_iter()
            .map(|values| Row::new(names.clone(), values))
            .collect();
        self.state.lock().unwrap().query_results.push_back(rows);
    }

    pub fn push_affected(&self, count: u64) {
        self.state.lock().unwrap().execute_results.push_back(count);
    }

    /// Fail every statement containing `needle`.
    pub fn fail_on(&self, needle: &str) {
        self.state.lock().unwrap().fail_on = Some(needle.to_string());
    }

    pub fn queries(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().unwrap().queries.clone()
    }

    pub fn executes(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().unwrap().executes.clone()
    }

    pub fn begins(&self) -> usize {
        self.state.lock().unwrap().begins
    }

    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }
}

impl Connection for MockConnection {
    type Tx<'conn>
        = MockTransaction
    where
        Self: 'conn;

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.state.lock().unwrap().query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.state.lock().unwrap().execute(sql, params)
    }

    fn begin_with(&self, _isolation: IsolationLevel) -> Result<Self::Tx<'_>> {
        self.state.lock().unwrap().begins += 1;
        Ok(MockTransaction {
            state: Arc::clone(&self.state),
        })
    }
}

pub struct MockTransaction {
    state: Arc<Mutex<MockState>>,
}

impl TransactionOps for MockTransaction {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.state.lock().unwrap().query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.state.lock().unwrap().execute(sql, params)
    }

    fn commit(self) -> Result<()> {
        self.state.lock().unwrap().commits += 1;
        Ok(())
    }

    fn rollback(self) -> Result<()> {
        self.state.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}

/// Parent record: tenant scoped, looked up by `code`, owns `parts`.
#[derive(Debug, Clone, Default)]
pub struct Widget {
    pub id: Option<i64>,
    pub tenant_id: i64,
    pub code: String,
    pub name: Option<String>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub updated_at: Option<i64>,
    pub parts: Vec<Part>,
    pub defined: Option<DefinedFields>,
}

impl Widget {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            ..Self::default()
        }
    }
}

impl Model for Widget {
    const TABLE_NAME: Option<&'static str> = Some("widgets");
    const TYPE_NAME: &'static str = "Widget";

    fn fields() -> &'static [FieldInfo] {
        static FIELDS: &[FieldInfo] = &[
            FieldInfo::new("id", "Option<i64>", FieldShape::Optional)
                .column("id")
                .primary_key(true),
            FieldInfo::new("tenant_id", "i64", FieldShape::Scalar)
                .column("tenant_id")
                .multitenancy_key(true),
            FieldInfo::new("code", "String", FieldShape::Scalar)
                .column("code")
                .lookup(true)
                .required(true),
            FieldInfo::new("name", "Option<String>", FieldShape::Optional).column("name"),
            FieldInfo::new("created_by", "Option<String>", FieldShape::Optional)
                .column("created_by")
                .audit(AuditRole::CreatedBy),
            FieldInfo::new("updated_by", "Option<String>", FieldShape::Optional)
                .column("updated_by")
                .audit(AuditRole::UpdatedBy),
            FieldInfo::new("updated_at", "Option<i64>", FieldShape::Optional)
                .column("updated_at")
                .audit(AuditRole::UpdatedAt),
            FieldInfo::new("parts", "Vec<Part>", FieldShape::Sequence).child(
                ChildInfo::new(Part::TYPE_NAME, Part::TABLE_NAME, Part::fields)
                    .foreign_key("widget_id")
                    .delete_orphans(true),
            ),
            FieldInfo::new("defined", "Option<DefinedFields>", FieldShape::Optional)
                .defined_fields(true),
        ];
        FIELDS
    }

    fn get_field(&self, name: &str) -> Result<Value> {
        match name {
            "id" => Ok(Value::from(self.id)),
            "tenant_id" => Ok(Value::from(self.tenant_id)),
            "code" => Ok(Value::from(self.code.clone())),
            "name" => Ok(Value::from(self.name.clone())),
            "created_by" => Ok(Value::from(self.created_by.clone())),
            "updated_by" => Ok(Value::from(self.updated_by.clone())),
            "updated_at" => Ok(Value::from(self.updated_at)),
            _ => Err(unknown_field(Self::TYPE_NAME, name)),
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<()> {
        match name {
            "id" => self.id = Option::<i64>::try_from(value)?,
            "tenant_id" => self.tenant_id = i64::try_from(value)?,
            "code" => self.code = String::try_from(value)?,
            "name" => self.name = Option::<String>::try_from(value)?,
            "created_by" => self.created_by = Option::<String>::try_from(value)?,
            "updated_by" => self.updated_by = Option::<String>::try_from(value)?,
            "updated_at" => self.updated_at = Option::<i64>::try_from(value)?,
            _ => return Err(unknown_field(Self::TYPE_NAME, name)),
        }
        Ok(())
    }

    fn defined_fields(&self) -> Option<&DefinedFields> {
        self.defined.as_ref()
    }

    fn visit_children<V: ChildVisitor>(parents: &mut [&mut Self], visitor: &mut V) -> Result<()> {
        let mut entries = Vec::new();
        for (index, parent) in parents.iter_mut().enumerate() {
            for part in &mut parent.parts {
                entries.push(ChildEntry::new(index, None, part));
            }
        }
        visitor.visit::<Part>("parts", entries)
    }
}

/// Child record of [`Widget`].
#[derive(Debug, Clone, Default)]
pub struct Part {
    pub id: Option<i64>,
    pub tenant_id: i64,
    pub widget_id: Option<i64>,
    pub label: String,
}

impl Part {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..Self::default()
        }
    }
}

impl Model for Part {
    const TABLE_NAME: Option<&'static str> = Some("parts");
    const TYPE_NAME: &'static str = "Part";

    fn fields() -> &'static [FieldInfo] {
        static FIELDS: &[FieldInfo] = &[
            FieldInfo::new("id", "Option<i64>", FieldShape::Optional)
                .column("id")
                .primary_key(true),
            FieldInfo::new("tenant_id", "i64", FieldShape::Scalar)
                .column("tenant_id")
                .multitenancy_key(true),
            FieldInfo::new("widget_id", "Option<i64>", FieldShape::Optional)
                .column("widget_id")
                .foreign_key("widgets.id"),
            FieldInfo::new("label", "String", FieldShape::Scalar)
                .column("label")
                .lookup(true),
        ];
        FIELDS
    }

    fn get_field(&self, name: &str) -> Result<Value> {
        match name {
            "id" => Ok(Value::from(self.id)),
            "tenant_id" => Ok(Value::from(self.tenant_id)),
            "widget_id" => Ok(Value::from(self.widget_id)),
            "label" => Ok(Value::from(self.label.clone())),
            _ => Err(unknown_field(Self::TYPE_NAME, name)),
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<()> {
        match name {
            "id" => self.id = Option::<i64>::try_from(value)?,
            "tenant_id" => self.tenant_id = i64::try_from(value)?,
            "widget_id" => self.widget_id = Option::<i64>::try_from(value)?,
            "label" => self.label = String::try_from(value)?,
            _ => return Err(unknown_field(Self::TYPE_NAME, name)),
        }
        Ok(())
    }
}

pub fn widget_meta() -> TableMetadata {
    extract_metadata::<Widget>().unwrap()
}

pub fn part_meta() -> TableMetadata {
    extract_metadata::<Part>().unwrap()
}
