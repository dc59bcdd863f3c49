//! Store collaborator traits.
//!
//! The engine never speaks a wire protocol itself. It drives whatever
//! implements these traits:
//!
//! - [`Connection`] - opens transactions and runs standalone statements
//! - [`TransactionOps`] - statements inside one transaction, then commit or rollback
//! - [`IsolationLevel`] - SQL transaction isolation levels
//!
//! Statements use `$N` positional placeholders. Every call blocks until the
//! store answers.

use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// Transaction isolation level.
///
/// The engine assumes at least read-committed isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Only committed data is visible
    #[default]
    ReadCommitted,

    /// Rows read once keep their values for the whole transaction
    RepeatableRead,

    /// Full serializability
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL representation of this isolation level.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// A database connection capable of executing statements.
///
/// # Example
///
/// ```rust,ignore
/// let tx = conn.begin()?;
/// tx.execute("DELETE FROM \"logs\" WHERE \"tenant_id\" = $1", &[Value::BigInt(7)])?;
/// tx.commit()?;
/// ```
pub trait Connection: Send + Sync {
    /// The transaction type returned by this connection.
    type Tx<'conn>: TransactionOps
    where
        Self: 'conn;

    /// Execute a query and return all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement and return the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Begin a transaction with the default isolation level.
    fn begin(&self) -> Result<Self::Tx<'_>> {
        self.begin_with(IsolationLevel::default())
    }

    /// Begin a transaction with a specific isolation level.
    fn begin_with(&self, isolation: IsolationLevel) -> Result<Self::Tx<'_>>;
}

/// Statements executed inside an open transaction.
///
/// `commit` and `rollback` consume the transaction so it cannot be reused.
pub trait TransactionOps {
    /// Execute a query within this transaction.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement within this transaction.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Commit the transaction.
    fn commit(self) -> Result<()>;

    /// Roll back the transaction.
    fn rollback(self) -> Result<()>;
}
