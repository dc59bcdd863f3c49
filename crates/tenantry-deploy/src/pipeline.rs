//! The per-type persistence pipeline.
//!
//! resolve → plan → insert → update → reconcile children. The reconciler
//! re-enters [`Pipeline::persist`] for every child relation, so a whole
//! record tree is written depth-first inside the caller's transaction.

use std::ops::AddAssign;

use tenantry_core::error::{Error, NotFoundError, Operation};
use tenantry_core::{ColumnCodec, MetadataRegistry, Model, Result, TransactionOps};

use crate::config::DeployConfig;
use crate::context::{Clock, DeployContext};
use crate::executor;
use crate::planner::{self, PlanInput};
use crate::reconcile::Reconciler;
use crate::resolver::{self, Resolution};

/// How a batch is matched against existing rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Insert everything without looking for existing rows
    Create,
    /// Upsert one record; a supplied primary key must exist
    Save,
    /// Upsert a batch; an unknown supplied primary key is inserted
    Deploy,
}

impl WriteMode {
    /// Mode used for the children of a batch written in this mode.
    pub fn for_children(self) -> Self {
        match self {
            WriteMode::Create => WriteMode::Create,
            WriteMode::Save | WriteMode::Deploy => WriteMode::Deploy,
        }
    }
}

/// Row counts summed over every level of a record tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeployResult {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl DeployResult {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }
}

impl AddAssign for DeployResult {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
    }
}

/// Borrowed dependencies of one deployer call.
pub(crate) struct Pipeline<'a> {
    pub registry: &'a MetadataRegistry,
    pub codec: &'a ColumnCodec,
    pub clock: &'a dyn Clock,
    pub context: &'a DeployContext,
    pub config: &'a DeployConfig,
}

impl Pipeline<'_> {
    /// Persist one homogeneous batch and, recursively, its children.
    ///
    /// `forced_fields` are written even when a partial record does not
    /// define them (the links the parent just set).
    #[tracing::instrument(level = "debug", skip_all, fields(model = M::TYPE_NAME, records = records.len(), mode = ?mode))]
    #[allow(clippy::result_large_err)]
    pub fn persist<M: Model, T: TransactionOps>(
        &self,
        tx: &T,
        records: &mut [&mut M],
        mode: WriteMode,
        forced_fields: &[&'static str],
    ) -> Result<DeployResult> {
        let meta = self.registry.get::<M>()?;
        let table = meta.table;
        let tenant = &self.context.tenant;

        let resolution = match mode {
            WriteMode::Create => Resolution::all_new(records.len()),
            WriteMode::Save | WriteMode::Deploy => resolver::resolve(tx, records, &meta, tenant)
                .map_err(|e| e.in_operation(table, Operation::Resolve))?,
        };
        if mode == WriteMode::Save {
            if let Some((_, pk)) = resolution.unresolved_supplied().next() {
                return Err(not_found(table, pk.to_text()));
            }
        }

        let input = PlanInput {
            tenant,
            actor: &self.context.actor,
            now: self.clock.now(),
            codec: self.codec,
            forced_fields,
            validate_required: self.config.validate_required,
        };
        let plan = planner::plan(records, &resolution, &meta, &input)?;

        let mut result = DeployResult::default();
        result.inserted = executor::execute_inserts(
            tx,
            &meta,
            records,
            &plan.inserts,
            self.config.batch_size,
        )
        .map_err(|e| e.in_operation(table, Operation::Insert))?;

        let affected = executor::execute_updates(tx, &meta, &plan.updates, tenant)
            .map_err(|e| e.in_operation(table, Operation::Update))?;
        if mode == WriteMode::Save {
            if let Some((change, _)) = plan.updates.iter().zip(&affected).find(|(_, n)| **n == 0) {
                return Err(not_found(
                    table,
                    change.primary_key.as_ref().and_then(|pk| pk.to_text()),
                ));
            }
        }
        result.updated = affected.iter().filter(|n| **n > 0).count() as u64;

        if !meta.children.is_empty() {
            let mut reconciler = Reconciler::new(self, tx, &meta, records, &resolution, mode)?;
            M::visit_children(records, &mut reconciler)?;
            result += reconciler.into_result();
        }

        tracing::debug!(
            table = table,
            inserted = result.inserted,
            updated = result.updated,
            deleted = result.deleted,
            "Persisted batch"
        );
        Ok(result)
    }
}

fn not_found(table: &str, primary_key: Option<String>) -> Error {
    Error::NotFound(NotFoundError {
        table: table.to_string(),
        primary_key: primary_key.unwrap_or_default(),
    })
}
