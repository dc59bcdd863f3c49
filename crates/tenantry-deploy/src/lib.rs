//! Upsert and reconciliation engine for Tenantry.
//!
//! `tenantry-deploy` writes whole record trees into a relational store under
//! one tenant. For every homogeneous batch it:
//!
//! - **Resolves** which records already exist, by primary key or by their
//!   composite lookup key, in a single SELECT per batch
//! - **Plans** inserts and updates, stamping tenant and audit columns and
//!   honoring partial records
//! - **Executes** multi-row inserts (collecting generated keys) and
//!   tenant-scoped updates
//! - **Reconciles** children: propagates parent keys, recurses, and deletes
//!   orphaned child rows of updated parents
//!
//! Everything one call does happens in one transaction.
//!
//! # Example
//!
//! ```ignore
//! let deployer = Deployer::new(conn, DeployContext::new(tenant_id, "sync"), DeployConfig::from_env()?);
//! let result = deployer.deploy(&mut invoices)?;
//! assert_eq!(result.total(), result.inserted + result.updated + result.deleted);
//! ```

pub mod config;
pub mod context;
pub mod deployer;
pub mod executor;
pub mod pipeline;
pub mod planner;
pub mod reconcile;
pub mod resolver;
mod undo;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{DEFAULT_BATCH_SIZE, DeployConfig, ENV_BATCH_SIZE, ENV_ENCRYPTION_KEY};
pub use context::{Clock, DeployContext, FixedClock, SystemClock};
pub use deployer::{Deployer, DeployerBuilder, build_delete};
pub use executor::Statement;
pub use pipeline::{DeployResult, WriteMode};
pub use planner::{ChangeKind, DbChange, Plan};
pub use resolver::Resolution;
