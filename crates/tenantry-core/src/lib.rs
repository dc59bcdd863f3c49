//! Core types and traits for Tenantry.
//!
//! This crate provides the building blocks the deploy engine works with:
//!
//! - `Model` trait and static `FieldInfo` declarations for record types
//! - `TableMetadata` extraction and the per-engine `MetadataRegistry`
//! - `Value` and `Row` for moving data to and from the store
//! - `Connection` / `TransactionOps` traits implemented by store collaborators
//! - `ColumnCodec` for JSONB and encrypted columns
//! - Collision-free composite lookup keys

pub mod codec;
pub mod connection;
pub mod defined;
pub mod error;
pub mod field;
pub mod identifiers;
pub mod lookup;
pub mod metadata;
pub mod model;
pub mod row;
pub mod value;

pub use codec::{AesGcmCipher, Cipher, ColumnCodec, KEY_LEN, hydrate};
pub use connection::{Connection, IsolationLevel, TransactionOps};
pub use defined::DefinedFields;
pub use error::{
    CodecError, CodecErrorKind, ConfigError, Error, FieldValidationError, NotFoundError,
    Operation, QueryError, QueryErrorKind, Result, ValidationError, ValidationErrorKind,
};
pub use field::{AuditRole, ChildInfo, FieldInfo, FieldShape, MappingLiteral, RelatedLookup};
pub use identifiers::{is_valid_identifier, quote_ident, quote_qualified};
pub use lookup::{lookup_key, record_lookup_key};
pub use metadata::{
    ChildRelation, ColumnMeta, ColumnRole, MetadataRegistry, TableMetadata, extract_metadata,
};
pub use model::{ChildEntry, ChildVisitor, Model};
pub use row::Row;
pub use value::Value;
