//! Composite lookup keys.
//!
//! Components are length-prefixed (`<chars>:<text>`) and concatenated, so no
//! field content can forge a different component split. The identity query
//! computes the same string in SQL with [`lookup_key_sql`].

use crate::Result;
use crate::error::{ConfigError, Error};
use crate::metadata::TableMetadata;
use crate::model::Model;
use crate::value::Value;

/// Encode one key component.
pub fn key_component(text: &str) -> String {
    format!("{}:{}", text.chars().count(), text)
}

/// Encode a full key from component values.
///
/// Returns `None` when any component is NULL or empty; such records never
/// match an existing row.
pub fn lookup_key(values: &[Value]) -> Option<String> {
    if values.is_empty() {
        return None;
    }
    let mut key = String::new();
    for value in values {
        let text = value.to_text()?;
        if text.is_empty() {
            return None;
        }
        key.push_str(&key_component(&text));
    }
    Some(key)
}

/// Whether `value` renders the same in memory and through a SQL `::text` cast.
///
/// Timestamps, floats, decimals and structured values do not: the store
/// formats them differently, so keys built from them would never match.
pub fn has_stable_text(value: &Value) -> bool {
    !matches!(
        value,
        Value::Double(_)
            | Value::Decimal(_)
            | Value::TimestampTz(_)
            | Value::Json(_)
            | Value::Array(_)
    )
}

/// Lookup key of a record, read through its field accessors.
#[allow(clippy::result_large_err)]
pub fn record_lookup_key<M: Model>(record: &M, meta: &TableMetadata) -> Result<Option<String>> {
    if meta.lookup_fields.is_empty() {
        return Ok(None);
    }
    let mut values = Vec::with_capacity(meta.lookup_fields.len());
    for lookup in &meta.lookup_fields {
        let value = record.get_field(lookup.field)?;
        if !has_stable_text(&value) {
            return Err(Error::Config(ConfigError::new(format!(
                "lookup field `{}` of `{}` holds a {} value, which cannot be matched as text",
                lookup.field,
                meta.type_name,
                value.type_name()
            ))));
        }
        values.push(value);
    }
    Ok(lookup_key(&values))
}

/// SQL expression computing the lookup key from quoted column expressions.
pub fn lookup_key_sql(columns: &[String]) -> String {
    columns
        .iter()
        .map(|col| {
            format!(
                "char_length(COALESCE({col}::text, '')) || ':' || COALESCE({col}::text, '')"
            )
        })
        .collect::<Vec<_>>()
        .join(" || ")
}
