//! Change planning.
//!
//! Classifies every record of a resolved batch as an insert or an update and
//! builds its column values: codec applied, tenant and audit columns stamped,
//! partial-mode filtering done. Required-field failures are collected over
//! the whole batch and reported once.

use tenantry_core::error::{Error, ValidationError};
use tenantry_core::metadata::ColumnRole;
use tenantry_core::{AuditRole, ColumnCodec, Model, Result, TableMetadata, Value};

use crate::resolver::{Resolution, record_primary_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
}

/// Column-level representation of one record's write.
#[derive(Debug, Clone, PartialEq)]
pub struct DbChange {
    pub kind: ChangeKind,
    /// Index of the source record in the batch
    pub record_index: usize,
    /// Row identity; always set for updates
    pub primary_key: Option<Value>,
    /// `(column, value)` pairs in declaration order
    pub changes: Vec<(&'static str, Value)>,
}

impl DbChange {
    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.changes.iter().map(|(column, _)| *column)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.changes
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, value)| value)
    }
}

/// Inserts and updates for one batch, each in batch order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub inserts: Vec<DbChange>,
    pub updates: Vec<DbChange>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }
}

/// Everything the planner needs besides the batch itself.
#[derive(Debug, Clone)]
pub struct PlanInput<'a> {
    pub tenant: &'a Value,
    pub actor: &'a Value,
    pub now: Value,
    pub codec: &'a ColumnCodec,
    /// Fields written even when a partial record does not define them
    pub forced_fields: &'a [&'static str],
    pub validate_required: bool,
}

/// Missing, or present but empty.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null | Value::Default => true,
        Value::Text(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Json(json) => json.is_null(),
        _ => false,
    }
}

/// Plan the writes for a resolved batch.
///
/// Updates get the resolved primary key written back into the record, and
/// every record gets the context tenant, so child links read them later.
#[tracing::instrument(level = "debug", skip_all, fields(table = meta.table, records = records.len()))]
#[allow(clippy::result_large_err)]
pub fn plan<M: Model>(
    records: &mut [&mut M],
    resolution: &Resolution,
    meta: &TableMetadata,
    input: &PlanInput<'_>,
) -> Result<Plan> {
    let mut plan = Plan::default();
    let mut errors = ValidationError::new();

    for (index, record) in records.iter_mut().enumerate() {
        let existing = resolution.existing.get(index).cloned().flatten();
        let kind = if existing.is_some() {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };

        if let (Some(pk), Some(value)) = (meta.primary_key, &existing) {
            record.set_field(pk.field, value.clone())?;
        }
        if let Some(tenant_key) = meta.multitenancy_key {
            record.set_field(tenant_key.field, input.tenant.clone())?;
        }

        let primary_key = match kind {
            ChangeKind::Update => existing,
            ChangeKind::Insert => record_primary_key(&**record, meta)?,
        };
        let defined = record.defined_fields();
        let included = |field: &str| {
            defined.is_none_or(|d| d.contains(field) || input.forced_fields.contains(&field))
        };

        let mut changes = Vec::with_capacity(meta.columns.len());
        let mut valid = true;
        for column in &meta.columns {
            let value = match column.role {
                ColumnRole::PrimaryKey => match &primary_key {
                    Some(pk) => pk.clone(),
                    None => continue,
                },
                ColumnRole::MultitenancyKey => input.tenant.clone(),
                ColumnRole::Audit(role) => {
                    if kind == ChangeKind::Update && !role.stamps_on_update() {
                        continue;
                    }
                    match role {
                        AuditRole::CreatedBy | AuditRole::UpdatedBy => input.actor.clone(),
                        AuditRole::CreatedAt | AuditRole::UpdatedAt => input.now.clone(),
                    }
                }
                ColumnRole::Data => {
                    let check = input.validate_required && column.required;
                    if !included(column.field) {
                        if check && kind == ChangeKind::Insert {
                            errors.add_required(meta.qualified_field(column.field));
                            valid = false;
                        }
                        continue;
                    }
                    let value = record.get_field(column.field)?;
                    if check && is_blank(&value) {
                        errors.add_required(meta.qualified_field(column.field));
                        valid = false;
                        continue;
                    }
                    if kind == ChangeKind::Insert && column.foreign_key.is_some() && value.is_null()
                    {
                        continue;
                    }
                    value
                }
            };
            if let Some(encoded) = input.codec.encode(meta.table, column, value)? {
                changes.push((column.column, encoded));
            }
        }

        if !valid {
            continue;
        }

        tracing::trace!(
            index = index,
            kind = ?kind,
            columns = changes.len(),
            "Planned change"
        );
        let change = DbChange {
            kind,
            record_index: index,
            primary_key,
            changes,
        };
        match kind {
            ChangeKind::Insert => plan.inserts.push(change),
            ChangeKind::Update => plan.updates.push(change),
        }
    }

    if !errors.is_empty() {
        tracing::debug!(failures = errors.errors.len(), "Batch failed validation");
        return Err(Error::Validation(errors));
    }

    tracing::debug!(
        inserts = plan.inserts.len(),
        updates = plan.updates.len(),
        "Planned batch"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Widget, widget_meta};
    use tenantry_core::DefinedFields;

    const NOW: i64 = 1_700_000_000_000_000;

    fn input<'a>(codec: &'a ColumnCodec, tenant: &'a Value, actor: &'a Value) -> PlanInput<'a> {
        PlanInput {
            tenant,
            actor,
            now: Value::TimestampTz(NOW),
            codec,
            forced_fields: &[],
            validate_required: true,
        }
    }

    #[test]
    fn test_insert_stamps_all_audit_columns_and_tenant() {
        let codec = ColumnCodec::default();
        let (tenant, actor) = (Value::BigInt(7), Value::Text("alice".into()));
        let mut w = Widget::new("abc");
        w.tenant_id = 99;
        let mut records = vec![&mut w];

        let plan = plan(
            &mut records,
            &Resolution::all_new(1),
            &widget_meta(),
            &input(&codec, &tenant, &actor),
        )
        .unwrap();

        assert!(plan.updates.is_empty());
        let change = &plan.inserts[0];
        assert_eq!(
            change.columns().collect::<Vec<_>>(),
            vec!["tenant_id", "code", "name", "created_by", "updated_by", "updated_at"]
        );
        assert_eq!(change.get("tenant_id"), Some(&Value::BigInt(7)));
        assert_eq!(change.get("created_by"), Some(&actor));
        assert_eq!(change.get("updated_at"), Some(&Value::TimestampTz(NOW)));
        assert_eq!(w.tenant_id, 7);
    }

    #[test]
    fn test_update_writes_back_pk_and_skips_created_columns() {
        let codec = ColumnCodec::default();
        let (tenant, actor) = (Value::BigInt(7), Value::Text("bob".into()));
        let mut w = Widget::new("abc");
        let mut records = vec![&mut w];
        let resolution = Resolution {
            existing: vec![Some(Value::BigInt(41))],
            supplied: vec![None],
        };

        let plan = plan(
            &mut records,
            &resolution,
            &widget_meta(),
            &input(&codec, &tenant, &actor),
        )
        .unwrap();

        let change = &plan.updates[0];
        assert_eq!(change.primary_key, Some(Value::BigInt(41)));
        assert!(change.get("created_by").is_none());
        assert_eq!(change.get("updated_by"), Some(&actor));
        assert_eq!(w.id, Some(41));
    }

    #[test]
    fn test_partial_update_keeps_only_defined_and_forced_fields() {
        let codec = ColumnCodec::default();
        let (tenant, actor) = (Value::BigInt(7), Value::Text("bob".into()));
        let mut w = Widget::new("abc");
        w.defined = Some(DefinedFields::from_names(["name"]));
        let mut records = vec![&mut w];
        let resolution = Resolution {
            existing: vec![Some(Value::BigInt(41))],
            supplied: vec![None],
        };

        let plan = plan(
            &mut records,
            &resolution,
            &widget_meta(),
            &input(&codec, &tenant, &actor),
        )
        .unwrap();

        assert_eq!(
            plan.updates[0].columns().collect::<Vec<_>>(),
            vec!["id", "tenant_id", "name", "updated_by", "updated_at"]
        );
    }

    #[test]
    fn test_required_failures_are_aggregated_and_deduplicated() {
        let codec = ColumnCodec::default();
        let (tenant, actor) = (Value::BigInt(7), Value::Text("bob".into()));
        let mut a = Widget::new("");
        let mut b = Widget::new("  ");
        let mut c = Widget::new("ok");
        let mut records = vec![&mut a, &mut b, &mut c];

        let err = plan(
            &mut records,
            &Resolution::all_new(3),
            &widget_meta(),
            &input(&codec, &tenant, &actor),
        )
        .unwrap_err();

        let Error::Validation(validation) = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert_eq!(validation.errors.len(), 1);
        assert_eq!(validation.errors[0].field, "Widget.code");
    }

    #[test]
    fn test_validation_can_be_disabled() {
        let codec = ColumnCodec::default();
        let (tenant, actor) = (Value::BigInt(7), Value::Text("bob".into()));
        let mut a = Widget::new("");
        let mut records = vec![&mut a];
        let mut no_check = input(&codec, &tenant, &actor);
        no_check.validate_required = false;

        let plan = plan(&mut records, &Resolution::all_new(1), &widget_meta(), &no_check).unwrap();
        assert_eq!(plan.inserts.len(), 1);
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(&Value::Null));
        assert!(is_blank(&Value::Text(" ".into())));
        assert!(is_blank(&Value::Array(vec![])));
        assert!(!is_blank(&Value::BigInt(0)));
        assert!(!is_blank(&Value::Bool(false)));
    }
}
