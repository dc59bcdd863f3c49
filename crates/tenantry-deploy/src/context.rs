//! Tenant/actor context and the audit clock.

use std::time::{SystemTime, UNIX_EPOCH};

use tenantry_core::Value;

/// Who is writing, and on behalf of which tenant.
///
/// The tenant value overrides whatever the records carry in their
/// multitenancy key field; the actor is stamped into `*_by` audit columns.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployContext {
    pub tenant: Value,
    pub actor: Value,
}

impl DeployContext {
    pub fn new(tenant: impl Into<Value>, actor: impl Into<Value>) -> Self {
        Self {
            tenant: tenant.into(),
            actor: actor.into(),
        }
    }
}

/// Source of `*_at` audit timestamps.
pub trait Clock: Send + Sync {
    /// Current time as a `TIMESTAMPTZ` value.
    fn now(&self) -> Value;
}

/// Wall clock, microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Value {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX));
        Value::TimestampTz(micros)
    }
}

/// A clock stopped at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now(&self) -> Value {
        Value::TimestampTz(self.0)
    }
}
