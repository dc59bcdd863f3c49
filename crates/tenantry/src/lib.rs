//! Tenantry - multi-tenant upsert and reconciliation for annotated Rust records.
//!
//! Tenantry writes whole record trees into a relational store:
//!
//! - Records are matched to existing rows by primary key or by a composite
//!   business key, one SELECT per batch
//! - New rows are inserted in multi-row batches, existing rows updated
//! - Tenant and audit columns are filled from the deploy context
//! - Child collections get their parent keys, are written recursively, and
//!   stale children are deleted
//! - Selected columns are stored as JSONB or encrypted with AES-256-GCM
//!
//! # Quick Start
//!
//! ```ignore
//! use tenantry::prelude::*;
//!
//! #[derive(Model, Debug, Default)]
//! #[tenantry(table = "invoices")]
//! struct Invoice {
//!     #[tenantry(primary_key)]
//!     id: Option<i64>,
//!     #[tenantry(multitenancy_key)]
//!     tenant_id: i64,
//!     #[tenantry(lookup, required)]
//!     number: String,
//!     #[tenantry(child(foreign_key = "invoice_id", delete_orphans))]
//!     lines: Vec<InvoiceLine>,
//! }
//!
//! fn sync(conn: impl Connection, invoices: &mut [Invoice]) -> Result<DeployResult> {
//!     let deployer = Deployer::new(conn, DeployContext::new(42_i64, "sync"), DeployConfig::from_env()?);
//!     deployer.deploy(invoices)
//! }
//! ```

pub use tenantry_core::{
    AesGcmCipher, AuditRole, ChildEntry, ChildInfo, ChildRelation, ChildVisitor, Cipher,
    CodecError, CodecErrorKind, ColumnCodec, ColumnMeta, ColumnRole, ConfigError, Connection,
    DefinedFields, Error, FieldInfo, FieldShape, FieldValidationError, IsolationLevel, KEY_LEN,
    MappingLiteral, MetadataRegistry, Model, NotFoundError, Operation, QueryError, QueryErrorKind,
    RelatedLookup, Result, Row, TableMetadata, TransactionOps, ValidationError,
    ValidationErrorKind, Value, extract_metadata, hydrate, lookup_key, quote_ident,
    record_lookup_key,
};

pub use tenantry_macros::Model;

pub use tenantry_deploy::{
    ChangeKind, Clock, DEFAULT_BATCH_SIZE, DbChange, DeployConfig, DeployContext, DeployResult,
    Deployer, DeployerBuilder, ENV_BATCH_SIZE, ENV_ENCRYPTION_KEY, FixedClock, Plan, Resolution,
    Statement, SystemClock, WriteMode,
};

/// Lower-level building blocks, for custom pipelines and tests.
pub mod internals {
    pub use tenantry_core::{codec, lookup, metadata};
    pub use tenantry_deploy::{executor, planner, reconcile, resolver};
}

/// Everything needed to declare records and deploy them.
pub mod prelude {
    pub use crate::{
        Connection, DefinedFields, DeployConfig, DeployContext, DeployResult, Deployer, Error,
        Model, Result, Row, TransactionOps, Value, WriteMode,
    };
}
