//! Compile-time validation for Model derive macro.
//!
//! Everything that can be decided from the struct alone is reported here with
//! a span on the offending field. Checks that need the element type of a child
//! relation run when metadata is extracted at runtime.

use std::collections::HashSet;

use proc_macro2::Span;
use syn::{Error, Type};

use crate::parse::{FieldDef, ModelDef};

/// Validate a parsed model definition.
///
/// Performs all validations and returns combined errors if any issues are found.
pub fn validate_model(model: &ModelDef) -> Result<(), Error> {
    let mut errors = Vec::new();

    validate_has_fields(model, &mut errors);
    if let Some(table) = &model.table_name {
        validate_table_name(&table.value(), table.span(), &mut errors);
    }
    validate_no_duplicate_columns(model, &mut errors);
    validate_single_role(model, "primary_key", |f| f.primary_key, &mut errors);
    validate_single_role(model, "multitenancy_key", |f| f.multitenancy_key, &mut errors);
    validate_single_role(model, "defined_fields", |f| f.defined_fields, &mut errors);

    for field in &model.fields {
        validate_field(field, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        let mut combined = errors.remove(0);
        for err in errors {
            combined.combine(err);
        }
        Err(combined)
    }
}

fn validate_has_fields(model: &ModelDef, errors: &mut Vec<Error>) {
    if model.fields.is_empty() {
        errors.push(Error::new(
            model.name.span(),
            "Model struct must have at least one field",
        ));
    }
}

/// Table names are interpolated into SQL, so they must be plain identifiers.
fn validate_table_name(table_name: &str, span: Span, errors: &mut Vec<Error>) {
    if table_name.is_empty() {
        errors.push(Error::new(span, "table name cannot be empty"));
        return;
    }

    if let Some(ch) = table_name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '_')
    {
        errors.push(Error::new(
            span,
            format!(
                "table name contains invalid character '{ch}'; \
                 table names should only contain alphanumeric characters and underscores"
            ),
        ));
        return;
    }

    if let Some(first) = table_name.chars().next() {
        if first.is_ascii_digit() {
            errors.push(Error::new(
                span,
                format!("table name must start with a letter or underscore, got '{first}'"),
            ));
        }
    }
}

fn validate_no_duplicate_columns(model: &ModelDef, errors: &mut Vec<Error>) {
    let mut seen_columns: HashSet<&str> = HashSet::new();

    for field in &model.fields {
        let Some(column) = field.column_name.as_deref() else {
            continue;
        };
        if !seen_columns.insert(column) {
            errors.push(Error::new(
                field.name.span(),
                format!(
                    "duplicate column name '{}'; another field already maps to this column",
                    column
                ),
            ));
        }
    }
}

fn validate_single_role(
    model: &ModelDef,
    role: &str,
    has_role: impl Fn(&FieldDef) -> bool,
    errors: &mut Vec<Error>,
) {
    for field in model.fields.iter().filter(|f| has_role(f)).skip(1) {
        errors.push(Error::new(
            field.name.span(),
            format!("only one field may be marked `{role}`"),
        ));
    }
}

fn validate_field(field: &FieldDef, errors: &mut Vec<Error>) {
    let span = field.name.span();

    if field.is_accessible() || field.child.is_some() {
        validate_type(&field.ty, span, errors);
    }

    if field.child.is_some() && (field.column_name.is_some() || field.lookup) {
        errors.push(Error::new(
            span,
            "a child relation cannot also be a column or lookup field",
        ));
    }

    if field.defined_fields && (field.column_name.is_some() || field.child.is_some()) {
        errors.push(Error::new(
            span,
            "the defined_fields holder cannot also be a column or child relation",
        ));
    }

    if field.related.is_some() {
        if !field.lookup {
            errors.push(Error::new(span, "related(...) requires `lookup` on the same field"));
        }
        if field.column_name.is_some() {
            errors.push(Error::new(
                span,
                "a related lookup is read from another table and cannot also be a column",
            ));
        }
    }

    if field.lookup && (field.encrypted || field.jsonb) {
        errors.push(Error::new(
            span,
            "lookup fields cannot be encrypted or jsonb; their values must compare in SQL",
        ));
    }

    if let Some(child) = &field.child {
        if child.foreign_key.is_none() && child.grouping.is_empty() {
            errors.push(Error::new(
                span,
                "child(...) requires `foreign_key = \"...\"` or `grouping(...)`",
            ));
        }
    }
}

fn validate_type(ty: &Type, span: Span, errors: &mut Vec<Error>) {
    if is_reference_type(ty) {
        errors.push(Error::new(
            span,
            "reference types are not supported in Model fields; use an owned type instead",
        ));
    }

    if is_raw_pointer(ty) {
        errors.push(Error::new(
            span,
            "raw pointer types are not supported in Model fields",
        ));
    }
}

fn is_reference_type(ty: &Type) -> bool {
    matches!(ty, Type::Reference(_))
}

fn is_raw_pointer(ty: &Type) -> bool {
    matches!(ty, Type::Ptr(_))
}
