//! Procedural macros for tenantry.
//!
//! `tenantry-macros` is the **compile-time codegen layer**. `#[derive(Model)]`
//! turns a plain struct into a record the deploy engine can persist: it emits
//! a static list of field declarations, by-name accessors, and a child visitor
//! that walks nested relations without knowing their concrete types.
//!
//! The macro is used by application crates via the `tenantry` facade.

use proc_macro::TokenStream;
use quote::{format_ident, quote};

mod parse;
mod validate;

use parse::{FieldDef, MappingLit, ModelDef, Shape, parse_model, type_string};

/// Derive macro for the `Model` trait.
///
/// # Attributes
///
/// Struct level:
///
/// - `#[tenantry(table = "name")]` - Table the record is stored in
///
/// Field level:
///
/// - `#[tenantry(column)]` / `#[tenantry(column = "name")]` - Stored column
/// - `#[tenantry(primary_key)]` - Primary key column
/// - `#[tenantry(multitenancy_key)]` - Tenant column, always set from the context
/// - `#[tenantry(lookup)]` - Part of the natural key used for identity resolution
/// - `#[tenantry(lookup, related(table = "t", column = "c", via = "fk", key = "id"))]`
///   - Lookup value read from a related table
/// - `#[tenantry(required)]` - Must be non-null on insert
/// - `#[tenantry(encrypted)]` - Stored as AES-256-GCM ciphertext
/// - `#[tenantry(jsonb)]` - Stored as JSON
/// - `#[tenantry(audit = "created_by" | "updated_by" | "created_at" | "updated_at")]`
/// - `#[tenantry(foreign_key = "table.column")]` - Belongs-to reference
/// - `#[tenantry(child(foreign_key = "f", grouping(child_f = "parent_f"), key_mapping = "f",
///   value_mappings(kind = "home"), delete_orphans))]` - Nested child relation
/// - `#[tenantry(defined_fields)]` - Holder of the record's `DefinedFields`
///
/// # Example
///
/// ```ignore
/// use tenantry::prelude::*;
///
/// #[derive(Model, Default)]
/// #[tenantry(table = "orders")]
/// struct Order {
///     #[tenantry(primary_key)]
///     id: Option<i64>,
///
///     #[tenantry(multitenancy_key)]
///     tenant_id: i64,
///
///     #[tenantry(lookup, required)]
///     number: String,
///
///     #[tenantry(child(foreign_key = "order_id", delete_orphans))]
///     lines: Vec<OrderLine>,
/// }
/// ```
#[proc_macro_derive(Model, attributes(tenantry))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    // Parse the struct and its attributes
    let model = match parse_model(&input) {
        Ok(m) => m,
        Err(e) => return e.to_compile_error().into(),
    };

    // Validate the parsed model
    if let Err(e) = validate::validate_model(&model) {
        return e.to_compile_error().into();
    }

    generate_model_impl(&model).into()
}

/// Generate the Model trait implementation from parsed model definition.
fn generate_model_impl(model: &ModelDef) -> proc_macro2::TokenStream {
    let name = &model.name;
    let name_str = name.to_string();
    let (impl_generics, ty_generics, where_clause) = model.generics.split_for_impl();

    let table_name = match &model.table_name {
        Some(table) => quote! { Some(#table) },
        None => quote! { None },
    };
    let field_infos = generate_field_infos(model);
    let get_field = generate_get_field(model);
    let set_field = generate_set_field(model);
    let defined_fields = generate_defined_fields(model);
    let visit_children = generate_visit_children(model);

    quote! {
        impl #impl_generics tenantry_core::Model for #name #ty_generics #where_clause {
            const TABLE_NAME: Option<&'static str> = #table_name;
            const TYPE_NAME: &'static str = #name_str;

            fn fields() -> &'static [tenantry_core::FieldInfo] {
                static FIELDS: &[tenantry_core::FieldInfo] = &[
                    #(#field_infos),*
                ];
                FIELDS
            }

            #get_field

            #set_field

            #defined_fields

            #visit_children
        }
    }
}

fn shape_ts(shape: Shape) -> proc_macro2::TokenStream {
    match shape {
        Shape::Scalar => quote! { tenantry_core::FieldShape::Scalar },
        Shape::Optional => quote! { tenantry_core::FieldShape::Optional },
        Shape::Sequence => quote! { tenantry_core::FieldShape::Sequence },
        Shape::Mapping => quote! { tenantry_core::FieldShape::Mapping },
    }
}

fn audit_ts(role: &str) -> proc_macro2::TokenStream {
    match role {
        "created_by" => quote! { tenantry_core::AuditRole::CreatedBy },
        "updated_by" => quote! { tenantry_core::AuditRole::UpdatedBy },
        "created_at" => quote! { tenantry_core::AuditRole::CreatedAt },
        _ => quote! { tenantry_core::AuditRole::UpdatedAt },
    }
}

fn mapping_lit_ts(lit: &MappingLit) -> proc_macro2::TokenStream {
    match lit {
        MappingLit::Text(s) => quote! { tenantry_core::MappingLiteral::Text(#s) },
        MappingLit::Int(i) => quote! { tenantry_core::MappingLiteral::Int(#i) },
        MappingLit::Bool(b) => quote! { tenantry_core::MappingLiteral::Bool(#b) },
    }
}

/// One `FieldInfo` builder chain per field, only non-default settings emitted.
fn generate_field_infos(model: &ModelDef) -> Vec<proc_macro2::TokenStream> {
    model.fields.iter().map(field_info_ts).collect()
}

fn field_info_ts(field: &FieldDef) -> proc_macro2::TokenStream {
    let field_name = field.name.to_string();
    let field_name = field_name.strip_prefix("r#").unwrap_or(&field_name);
    let rust_type = type_string(&field.ty);
    let shape = shape_ts(field.shape);

    let mut chain = Vec::new();
    if let Some(column) = &field.column_name {
        chain.push(quote! { .column(#column) });
    }
    for (flag, method) in [
        (field.primary_key, format_ident!("primary_key")),
        (field.multitenancy_key, format_ident!("multitenancy_key")),
        (field.lookup, format_ident!("lookup")),
        (field.required, format_ident!("required")),
        (field.encrypted, format_ident!("encrypted")),
        (field.jsonb, format_ident!("jsonb")),
        (field.defined_fields, format_ident!("defined_fields")),
    ] {
        if flag {
            chain.push(quote! { .#method(true) });
        }
    }
    if let Some(role) = &field.audit {
        let role = audit_ts(role);
        chain.push(quote! { .audit(#role) });
    }
    if let Some(reference) = &field.foreign_key {
        chain.push(quote! { .foreign_key(#reference) });
    }
    if let Some(related) = &field.related {
        let (table, column, via) = (&related.table, &related.column, &related.via);
        let key = related.key.as_ref().map(|k| quote! { .key(#k) });
        chain.push(quote! {
            .related(tenantry_core::RelatedLookup::new(#table, #column, #via) #key)
        });
    }
    if let Some(child) = &field.child {
        let elem = field.element_type();
        let mut child_chain = Vec::new();
        if let Some(fk) = &child.foreign_key {
            child_chain.push(quote! { .foreign_key(#fk) });
        }
        if !child.grouping.is_empty() {
            let pairs = child.grouping.iter().map(|(c, p)| quote! { (#c, #p) });
            child_chain.push(quote! { .grouping(&[#(#pairs),*]) });
        }
        if let Some(km) = &child.key_mapping {
            child_chain.push(quote! { .key_mapping(#km) });
        }
        if !child.value_mappings.is_empty() {
            let pairs = child.value_mappings.iter().map(|(f, lit)| {
                let lit = mapping_lit_ts(lit);
                quote! { (#f, #lit) }
            });
            child_chain.push(quote! { .value_mappings(&[#(#pairs),*]) });
        }
        if child.delete_orphans {
            child_chain.push(quote! { .delete_orphans(true) });
        }
        chain.push(quote! {
            .child(
                tenantry_core::ChildInfo::new(
                    <#elem as tenantry_core::Model>::TYPE_NAME,
                    <#elem as tenantry_core::Model>::TABLE_NAME,
                    <#elem as tenantry_core::Model>::fields,
                )
                #(#child_chain)*
            )
        });
    }

    quote! {
        tenantry_core::FieldInfo::new(#field_name, #rust_type, #shape)
            #(#chain)*
    }
}

fn generate_get_field(model: &ModelDef) -> proc_macro2::TokenStream {
    let arms = model.fields.iter().filter(|f| f.is_accessible()).map(|field| {
        let ident = &field.name;
        let name = ident.to_string();
        let name = name.strip_prefix("r#").unwrap_or(&name).to_string();
        if field.jsonb {
            quote! { #name => tenantry_core::codec::to_json_value(&self.#ident), }
        } else {
            quote! {
                #name => Ok(tenantry_core::Value::from(::std::clone::Clone::clone(&self.#ident))),
            }
        }
    });

    quote! {
        fn get_field(&self, name: &str) -> tenantry_core::Result<tenantry_core::Value> {
            match name {
                #(#arms)*
                _ => Err(tenantry_core::model::unknown_field(Self::TYPE_NAME, name)),
            }
        }
    }
}

fn generate_set_field(model: &ModelDef) -> proc_macro2::TokenStream {
    let arms = model.fields.iter().filter(|f| f.is_accessible()).map(|field| {
        let ident = &field.name;
        let ty = &field.ty;
        let name = ident.to_string();
        let name = name.strip_prefix("r#").unwrap_or(&name).to_string();
        if field.jsonb {
            quote! {
                #name => {
                    self.#ident = tenantry_core::codec::from_json_value(value)?;
                    Ok(())
                }
            }
        } else {
            quote! {
                #name => {
                    self.#ident =
                        <#ty as ::std::convert::TryFrom<tenantry_core::Value>>::try_from(value)?;
                    Ok(())
                }
            }
        }
    });

    quote! {
        fn set_field(
            &mut self,
            name: &str,
            value: tenantry_core::Value,
        ) -> tenantry_core::Result<()> {
            let _ = &value;
            match name {
                #(#arms)*
                _ => Err(tenantry_core::model::unknown_field(Self::TYPE_NAME, name)),
            }
        }
    }
}

/// The holder may be `DefinedFields` or `Option<DefinedFields>`.
fn generate_defined_fields(model: &ModelDef) -> proc_macro2::TokenStream {
    let Some(field) = model.fields.iter().find(|f| f.defined_fields) else {
        return quote! {};
    };
    let ident = &field.name;
    let body = if field.shape == Shape::Optional {
        quote! { self.#ident.as_ref() }
    } else {
        quote! { Some(&self.#ident) }
    };

    quote! {
        fn defined_fields(&self) -> Option<&tenantry_core::DefinedFields> {
            #body
        }
    }
}

fn generate_visit_children(model: &ModelDef) -> proc_macro2::TokenStream {
    let relations: Vec<_> = model
        .traversable_children()
        .map(|field| {
            let ident = &field.name;
            let name = ident.to_string();
            let name = name.strip_prefix("r#").unwrap_or(&name).to_string();
            let elem = field.element_type();
            let push = if field.shape == Shape::Mapping {
                quote! {
                    for (key, record) in parent.#ident.iter_mut() {
                        entries.push(tenantry_core::ChildEntry::new(
                            parent_index,
                            Some(tenantry_core::Value::from(::std::clone::Clone::clone(key))),
                            record,
                        ));
                    }
                }
            } else {
                quote! {
                    for record in parent.#ident.iter_mut() {
                        entries.push(tenantry_core::ChildEntry::new(parent_index, None, record));
                    }
                }
            };
            quote! {
                {
                    let mut entries: ::std::vec::Vec<tenantry_core::ChildEntry<'_, #elem>> =
                        ::std::vec::Vec::new();
                    for (parent_index, parent) in parents.iter_mut().enumerate() {
                        #push
                    }
                    visitor.visit::<#elem>(#name, entries)?;
                }
            }
        })
        .collect();

    if relations.is_empty() {
        return quote! {};
    }

    quote! {
        fn visit_children<V: tenantry_core::ChildVisitor>(
            parents: &mut [&mut Self],
            visitor: &mut V,
        ) -> tenantry_core::Result<()> {
            #(#relations)*
            Ok(())
        }
    }
}
