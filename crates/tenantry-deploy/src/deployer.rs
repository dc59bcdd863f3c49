//! The upsert orchestrator.

use std::sync::Arc;

use tenantry_core::error::{ConfigError, Error, Operation};
use tenantry_core::metadata::ColumnRole;
use tenantry_core::{
    AesGcmCipher, Cipher, ColumnCodec, Connection, MetadataRegistry, Model, Result, Row,
    TableMetadata, TransactionOps, Value, hydrate, quote_ident,
};

use crate::config::DeployConfig;
use crate::context::{Clock, DeployContext, SystemClock};
use crate::executor::Statement;
use crate::pipeline::{DeployResult, Pipeline, WriteMode};
use crate::undo::FieldUndo;

/// Entry point for writing record trees.
///
/// A `Deployer` owns its connection, tenant context, cipher key, clock and
/// metadata cache; independent instances share nothing. Every operation runs
/// in one transaction that is committed at the end or rolled back on the
/// first error at any depth. A rolled back call also rewinds the keys, tenant
/// and links it wrote into the records, so the same records can be retried.
///
/// # Example
///
/// ```ignore
/// let deployer = Deployer::new(conn, DeployContext::new(tenant_id, "importer"), DeployConfig::default());
/// let result = deployer.deploy(&mut orders)?;
/// tracing::info!(inserted = result.inserted, "orders imported");
/// ```
pub struct Deployer<C: Connection> {
    conn: C,
    context: DeployContext,
    config: DeployConfig,
    codec: ColumnCodec,
    clock: Arc<dyn Clock>,
    registry: MetadataRegistry,
}

impl<C: Connection> std::fmt::Debug for Deployer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployer")
            .field("context", &self.context)
            .field("config", &self.config)
            .field("codec", &self.codec)
            .field("cached_types", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// Builder for a [`Deployer`] with a custom cipher or clock.
pub struct DeployerBuilder<C: Connection> {
    conn: C,
    context: DeployContext,
    config: DeployConfig,
    cipher: Arc<dyn Cipher>,
    clock: Arc<dyn Clock>,
}

impl<C: Connection> DeployerBuilder<C> {
    #[must_use]
    pub fn config(mut self, config: DeployConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn cipher(mut self, cipher: impl Cipher + 'static) -> Self {
        self.cipher = Arc::new(cipher);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> Deployer<C> {
        let codec = ColumnCodec::new(self.cipher, self.config.encryption_key.clone());
        Deployer {
            conn: self.conn,
            context: self.context,
            config: self.config,
            codec,
            clock: self.clock,
            registry: MetadataRegistry::new(),
        }
    }
}

impl<C: Connection> Deployer<C> {
    /// Create a deployer with AES-256-GCM and the system clock.
    pub fn new(conn: C, context: DeployContext, config: DeployConfig) -> Self {
        Self::builder(conn, context).config(config).build()
    }

    pub fn builder(conn: C, context: DeployContext) -> DeployerBuilder<C> {
        DeployerBuilder {
            conn,
            context,
            config: DeployConfig::default(),
            cipher: Arc::new(AesGcmCipher),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn context(&self) -> &DeployContext {
        &self.context
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn codec(&self) -> &ColumnCodec {
        &self.codec
    }

    /// Validated metadata for `M`, cached after the first call.
    #[allow(clippy::result_large_err)]
    pub fn metadata<M: Model>(&self) -> Result<Arc<TableMetadata>> {
        self.registry.get::<M>()
    }

    fn pipeline(&self) -> Pipeline<'_> {
        Pipeline {
            registry: &self.registry,
            codec: &self.codec,
            clock: self.clock.as_ref(),
            context: &self.context,
            config: &self.config,
        }
    }

    /// Insert `record` and its children without looking for existing rows.
    #[tracing::instrument(level = "debug", skip_all, fields(model = M::TYPE_NAME))]
    #[allow(clippy::result_large_err)]
    pub fn create_model<M: Model>(&self, record: &mut M) -> Result<DeployResult> {
        self.run(WriteMode::Create, std::slice::from_mut(record))
    }

    /// Upsert `record` and its children.
    ///
    /// A supplied primary key that does not exist under the tenant, or whose
    /// UPDATE affects no row, fails with `Error::NotFound`.
    #[tracing::instrument(level = "debug", skip_all, fields(model = M::TYPE_NAME))]
    #[allow(clippy::result_large_err)]
    pub fn save_model<M: Model>(&self, record: &mut M) -> Result<DeployResult> {
        self.run(WriteMode::Save, std::slice::from_mut(record))
    }

    /// Upsert a homogeneous batch and all of its children.
    #[tracing::instrument(level = "debug", skip_all, fields(model = M::TYPE_NAME, records = records.len()))]
    #[allow(clippy::result_large_err)]
    pub fn deploy<M: Model>(&self, records: &mut [M]) -> Result<DeployResult> {
        if records.is_empty() {
            return Ok(DeployResult::default());
        }
        self.run(WriteMode::Deploy, records)
    }

    #[allow(clippy::result_large_err)]
    fn run<M: Model>(&self, mode: WriteMode, records: &mut [M]) -> Result<DeployResult> {
        let meta = self.registry.get::<M>()?;
        let mut batch: Vec<&mut M> = records.iter_mut().collect();
        let pipeline = self.pipeline();
        let undo = FieldUndo::capture(&self.registry, &mut batch)?;

        let outcome = self.in_transaction(meta.table, |tx| {
            pipeline.persist(tx, &mut batch, mode, &[])
        });
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                if let Err(restore_err) = undo.restore(&self.registry, &mut batch) {
                    tracing::warn!(
                        table = meta.table,
                        error = %restore_err,
                        "Restoring records after rollback failed"
                    );
                }
                return Err(err);
            }
        };

        tracing::info!(
            table = meta.table,
            mode = ?mode,
            inserted = result.inserted,
            updated = result.updated,
            deleted = result.deleted,
            "Deploy complete"
        );
        Ok(result)
    }

    /// Delete every row matching the non-empty fields of `filter`.
    ///
    /// Encrypted and JSONB fields never take part in the filter, and the
    /// tenant always comes from the context. A filter that would match the
    /// whole of an unscoped table is refused.
    #[tracing::instrument(level = "debug", skip_all, fields(model = M::TYPE_NAME))]
    #[allow(clippy::result_large_err)]
    pub fn delete_model<M: Model>(&self, filter: &M) -> Result<u64> {
        let meta = self.registry.get::<M>()?;
        let statement = build_delete(&meta, filter, &self.context.tenant)?;
        tracing::debug!(sql = %statement.sql, "Deleting by filter");

        let deleted = self.in_transaction(meta.table, |tx| {
            tx.execute(&statement.sql, &statement.params)
                .map_err(|e| e.in_operation(meta.table, Operation::Delete))
        })?;

        tracing::info!(table = meta.table, deleted = deleted, "Delete complete");
        Ok(deleted)
    }

    /// Populate `record` from a fetched row, decrypting and parsing as declared.
    #[allow(clippy::result_large_err)]
    pub fn hydrate<M: Model>(&self, record: &mut M, row: &Row) -> Result<()> {
        let meta = self.registry.get::<M>()?;
        hydrate(record, row, &meta, &self.codec)
    }

    #[allow(clippy::result_large_err)]
    fn in_transaction<'c, R>(
        &'c self,
        table: &str,
        work: impl FnOnce(&C::Tx<'c>) -> Result<R>,
    ) -> Result<R> {
        let tx = self
            .conn
            .begin()
            .map_err(|e| e.in_operation(table, Operation::Begin))?;

        match work(&tx) {
            Ok(value) => {
                tx.commit()
                    .map_err(|e| e.in_operation(table, Operation::Commit))?;
                Ok(value)
            }
            Err(err) => {
                tracing::debug!(table = table, error = %err, "Rolling back");
                if let Err(rollback_err) = tx.rollback() {
                    tracing::warn!(
                        table = table,
                        error = %rollback_err,
                        "Rollback failed"
                    );
                }
                Err(err)
            }
        }
    }
}

/// Build the filter DELETE for `delete_model`.
#[allow(clippy::result_large_err)]
pub fn build_delete<M: Model>(
    meta: &TableMetadata,
    filter: &M,
    tenant: &Value,
) -> Result<Statement> {
    let mut params = Vec::new();
    let mut predicates = Vec::new();

    for column in &meta.columns {
        if column.role == ColumnRole::MultitenancyKey || column.encrypted || column.jsonb {
            continue;
        }
        let value = filter.get_field(column.field)?;
        if value.is_zero() {
            continue;
        }
        params.push(value);
        predicates.push(format!("{} = ${}", quote_ident(column.column), params.len()));
    }
    let scoped = meta.multitenancy_key.is_some();
    if let Some(tenant_key) = meta.multitenancy_key {
        params.push(tenant.clone());
        predicates.push(format!("{} = ${}", quote_ident(tenant_key.column), params.len()));
    }
    if predicates.is_empty() || (!scoped && params.is_empty()) {
        return Err(Error::Config(ConfigError::new(format!(
            "refusing to delete every row of `{}`: the filter sets no field",
            meta.table
        ))));
    }

    Ok(Statement {
        sql: format!(
            "DELETE FROM {} WHERE {}",
            quote_ident(meta.table),
            predicates.join(" AND ")
        ),
        params,
    })
}
