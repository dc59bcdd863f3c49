//! Parsing logic for the Model derive macro.
//!
//! This module extracts struct-level and field-level `#[tenantry(...)]`
//! attributes from the derive input to build `ModelDef` and `FieldDef`
//! structures used for code generation.

use quote::ToTokens;
use syn::meta::ParseNestedMeta;
use syn::{
    Attribute, Data, DeriveInput, Error, Field, Fields, GenericArgument, Generics, Ident, Lit,
    LitStr, PathArguments, Result, Type,
};

/// Parsed model definition from a struct with `#[derive(Model)]`.
#[derive(Debug)]
pub struct ModelDef {
    /// The struct name (e.g., `Order`).
    pub name: Ident,
    /// The SQL table name, if declared.
    pub table_name: Option<LitStr>,
    /// Parsed field definitions.
    pub fields: Vec<FieldDef>,
    /// Generic parameters from the struct.
    pub generics: Generics,
}

/// Syntactic shape of a field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    Optional,
    Sequence,
    Mapping,
}

/// Literal written into every child of a relation.
#[derive(Debug, Clone)]
pub enum MappingLit {
    Text(String),
    Int(i64),
    Bool(bool),
}

/// `related(table = "...", column = "...", via = "...", key = "...")`
#[derive(Debug, Clone)]
pub struct RelatedAttr {
    pub table: String,
    pub column: String,
    pub via: String,
    pub key: Option<String>,
}

/// `child(...)`
#[derive(Debug, Clone, Default)]
pub struct ChildAttr {
    pub foreign_key: Option<String>,
    pub grouping: Vec<(String, String)>,
    pub key_mapping: Option<String>,
    pub value_mappings: Vec<(String, MappingLit)>,
    pub delete_orphans: bool,
}

/// Parsed field definition from a struct field.
#[derive(Debug)]
pub struct FieldDef {
    /// The Rust field name.
    pub name: Ident,
    /// The Rust type of the field.
    pub ty: Type,
    pub shape: Shape,
    /// Column name; `None` for fields not stored on this table.
    pub column_name: Option<String>,
    pub primary_key: bool,
    pub multitenancy_key: bool,
    pub lookup: bool,
    pub required: bool,
    pub encrypted: bool,
    pub jsonb: bool,
    pub audit: Option<String>,
    /// Belongs-to reference (e.g., `"customers.id"`).
    pub foreign_key: Option<String>,
    pub related: Option<RelatedAttr>,
    pub child: Option<ChildAttr>,
    pub defined_fields: bool,
}

impl FieldDef {
    /// Whether the generated accessors expose this field by name.
    pub fn is_accessible(&self) -> bool {
        self.column_name.is_some() || self.related.is_some()
    }

    /// Element type of a child relation (`T` in `Vec<T>` or `HashMap<K, T>`).
    pub fn element_type(&self) -> &Type {
        last_generic_type(&self.ty).unwrap_or(&self.ty)
    }
}

impl ModelDef {
    /// Fields carrying a child relation whose shape allows traversal.
    pub fn traversable_children(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| {
            f.child.is_some() && matches!(f.shape, Shape::Sequence | Shape::Mapping)
        })
    }
}

/// Field-level attributes as written, before column resolution.
#[derive(Default)]
struct FieldAttrs {
    column: bool,
    column_name: Option<String>,
    primary_key: bool,
    multitenancy_key: bool,
    lookup: bool,
    required: bool,
    encrypted: bool,
    jsonb: bool,
    audit: Option<String>,
    foreign_key: Option<String>,
    related: Option<RelatedAttr>,
    child: Option<ChildAttr>,
    defined_fields: bool,
}

impl FieldAttrs {
    fn is_column(&self) -> bool {
        self.column
            || self.primary_key
            || self.multitenancy_key
            || self.required
            || self.encrypted
            || self.jsonb
            || self.audit.is_some()
            || self.foreign_key.is_some()
            || (self.lookup && self.related.is_none())
    }
}

/// Parse a `DeriveInput` into a `ModelDef`.
pub fn parse_model(input: &DeriveInput) -> Result<ModelDef> {
    let name = input.ident.clone();
    let generics = input.generics.clone();
    let table_name = parse_struct_attrs(&input.attrs)?;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => fields
                .named
                .iter()
                .map(parse_field)
                .collect::<Result<Vec<_>>>()?,
            _ => {
                return Err(Error::new_spanned(
                    input,
                    "Model can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs",
            ));
        }
    };

    Ok(ModelDef {
        name,
        table_name,
        fields,
        generics,
    })
}

fn parse_struct_attrs(attrs: &[Attribute]) -> Result<Option<LitStr>> {
    let mut table_name: Option<LitStr> = None;

    for attr in attrs {
        if !attr.path().is_ident("tenantry") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                if table_name.is_some() {
                    return Err(Error::new_spanned(
                        meta.path,
                        "duplicate tenantry attribute: table",
                    ));
                }
                table_name = Some(parse_str(&meta, "table")?);
                Ok(())
            } else {
                Err(meta.error("unknown tenantry struct attribute, expected `table = \"...\"`"))
            }
        })?;
    }

    Ok(table_name)
}

fn parse_field(field: &Field) -> Result<FieldDef> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;
    let attrs = parse_field_attrs(&field.attrs)?;

    let column_name = if attrs.is_column() {
        Some(
            attrs
                .column_name
                .clone()
                .unwrap_or_else(|| unraw(&name)),
        )
    } else {
        None
    };

    Ok(FieldDef {
        shape: detect_shape(&field.ty),
        ty: field.ty.clone(),
        column_name,
        primary_key: attrs.primary_key,
        multitenancy_key: attrs.multitenancy_key,
        lookup: attrs.lookup,
        required: attrs.required,
        encrypted: attrs.encrypted,
        jsonb: attrs.jsonb,
        audit: attrs.audit,
        foreign_key: attrs.foreign_key,
        related: attrs.related,
        child: attrs.child,
        defined_fields: attrs.defined_fields,
        name,
    })
}

fn parse_field_attrs(attrs: &[Attribute]) -> Result<FieldAttrs> {
    let mut out = FieldAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("tenantry") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            let path = &meta.path;
            if path.is_ident("column") {
                out.column = true;
                if meta.input.peek(syn::Token![=]) {
                    out.column_name = Some(parse_str(&meta, "column")?.value());
                }
            } else if path.is_ident("primary_key") {
                out.primary_key = true;
            } else if path.is_ident("multitenancy_key") {
                out.multitenancy_key = true;
            } else if path.is_ident("lookup") {
                out.lookup = true;
            } else if path.is_ident("required") {
                out.required = true;
            } else if path.is_ident("encrypted") {
                out.encrypted = true;
            } else if path.is_ident("jsonb") {
                out.jsonb = true;
            } else if path.is_ident("defined_fields") {
                out.defined_fields = true;
            } else if path.is_ident("audit") {
                let lit = parse_str(&meta, "audit")?;
                let role = lit.value();
                if !["created_by", "updated_by", "created_at", "updated_at"]
                    .contains(&role.as_str())
                {
                    return Err(Error::new_spanned(
                        lit,
                        "audit must be one of: 'created_by', 'updated_by', 'created_at', 'updated_at'",
                    ));
                }
                out.audit = Some(role);
            } else if path.is_ident("foreign_key") {
                let lit = parse_str(&meta, "foreign_key")?;
                let reference = lit.value();
                if reference.split('.').count() != 2 || reference.split('.').any(str::is_empty) {
                    return Err(Error::new_spanned(
                        lit,
                        "foreign_key must have the form \"table.column\"",
                    ));
                }
                out.foreign_key = Some(reference);
            } else if path.is_ident("related") {
                out.related = Some(parse_related(&meta)?);
            } else if path.is_ident("child") {
                out.child = Some(parse_child(&meta)?);
            } else {
                return Err(meta.error("unknown tenantry field attribute"));
            }
            Ok(())
        })?;
    }

    Ok(out)
}

fn parse_related(meta: &ParseNestedMeta) -> Result<RelatedAttr> {
    let mut table = None;
    let mut column = None;
    let mut via = None;
    let mut key = None;

    meta.parse_nested_meta(|inner| {
        let slot = if inner.path.is_ident("table") {
            &mut table
        } else if inner.path.is_ident("column") {
            &mut column
        } else if inner.path.is_ident("via") {
            &mut via
        } else if inner.path.is_ident("key") {
            &mut key
        } else {
            return Err(inner.error("expected one of: table, column, via, key"));
        };
        *slot = Some(parse_str(&inner, "related")?.value());
        Ok(())
    })?;

    let missing = |what: &str| {
        Error::new_spanned(
            &meta.path,
            format!("related lookup requires `{}`", what),
        )
    };
    Ok(RelatedAttr {
        table: table.ok_or_else(|| missing("table"))?,
        column: column.ok_or_else(|| missing("column"))?,
        via: via.ok_or_else(|| missing("via"))?,
        key,
    })
}

fn parse_child(meta: &ParseNestedMeta) -> Result<ChildAttr> {
    let mut child = ChildAttr::default();

    meta.parse_nested_meta(|inner| {
        if inner.path.is_ident("foreign_key") {
            child.foreign_key = Some(parse_str(&inner, "foreign_key")?.value());
        } else if inner.path.is_ident("key_mapping") {
            child.key_mapping = Some(parse_str(&inner, "key_mapping")?.value());
        } else if inner.path.is_ident("delete_orphans") {
            child.delete_orphans = true;
        } else if inner.path.is_ident("grouping") {
            inner.parse_nested_meta(|pair| {
                let child_field = path_name(&pair)?;
                let parent_field = parse_str(&pair, "grouping")?.value();
                child.grouping.push((child_field, parent_field));
                Ok(())
            })?;
        } else if inner.path.is_ident("value_mappings") {
            inner.parse_nested_meta(|pair| {
                let child_field = path_name(&pair)?;
                let lit: Lit = pair.value()?.parse()?;
                let literal = match &lit {
                    Lit::Str(s) => MappingLit::Text(s.value()),
                    Lit::Int(i) => MappingLit::Int(i.base10_parse()?),
                    Lit::Bool(b) => MappingLit::Bool(b.value),
                    _ => {
                        return Err(Error::new_spanned(
                            lit,
                            "value mapping must be a string, integer, or bool literal",
                        ));
                    }
                };
                child.value_mappings.push((child_field, literal));
                Ok(())
            })?;
        } else {
            return Err(inner.error(
                "expected one of: foreign_key, grouping, key_mapping, value_mappings, delete_orphans",
            ));
        }
        Ok(())
    })?;

    Ok(child)
}

fn parse_str(meta: &ParseNestedMeta, what: &str) -> Result<LitStr> {
    let value: Lit = meta.value()?.parse()?;
    match value {
        Lit::Str(lit) => Ok(lit),
        other => Err(Error::new_spanned(
            other,
            format!("expected string literal for {}", what),
        )),
    }
}

fn path_name(meta: &ParseNestedMeta) -> Result<String> {
    meta.path
        .get_ident()
        .map(unraw)
        .ok_or_else(|| Error::new_spanned(&meta.path, "expected a field name"))
}

fn unraw(ident: &Ident) -> String {
    let s = ident.to_string();
    s.strip_prefix("r#").map(str::to_string).unwrap_or(s)
}

fn last_segment_ident(ty: &Type) -> Option<&syn::PathSegment> {
    match ty {
        Type::Path(type_path) if type_path.qself.is_none() => type_path.path.segments.last(),
        _ => None,
    }
}

/// Detect the shape of a type from its last path segment.
pub fn detect_shape(ty: &Type) -> Shape {
    match last_segment_ident(ty).map(|seg| seg.ident.to_string()).as_deref() {
        Some("Option") => Shape::Optional,
        Some("Vec") => Shape::Sequence,
        Some("HashMap" | "BTreeMap" | "IndexMap") => Shape::Mapping,
        _ => Shape::Scalar,
    }
}

fn last_generic_type(ty: &Type) -> Option<&Type> {
    let segment = last_segment_ident(ty)?;
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    args.args.iter().rev().find_map(|arg| match arg {
        GenericArgument::Type(inner) => Some(inner),
        _ => None,
    })
}

/// Render a type the way it is written, without token spacing.
pub fn type_string(ty: &Type) -> String {
    ty.to_token_stream().to_string().replace(' ', "")
}
