//! Application state management

use std::sync::Arc;

use crate::audit::{self, AuditLogStore, StoreHealth};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::throttle::ThrottleGate;

/// Application state shared across handlers
///
/// Cheap to clone: every field is reference counted.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<dyn AuditLogStore>,
    gate: ThrottleGate,
    health: Arc<StoreHealth>,
    clock: Arc<dyn Clock>,
}

impl AppState {
    /// Assemble state around an existing store
    ///
    /// The gate and the pruner share one [`StoreHealth`].
    pub fn new(config: Config, store: Arc<dyn AuditLogStore>, clock: Arc<dyn Clock>) -> Self {
        let health = Arc::new(StoreHealth::default());
        let gate = ThrottleGate::new(config.throttle.clone(), Arc::clone(&store), Arc::clone(&clock))
            .with_health(Arc::clone(&health));

        Self {
            config: Arc::new(config),
            store,
            gate,
            health,
            clock,
        }
    }

    /// Connect the configured store and assemble state on the system clock
    pub async fn connect(config: Config) -> Result<Self> {
        let store = audit::connect(&config).await?;
        Ok(Self::new(config, store, Arc::new(SystemClock)))
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the audit store
    pub fn store(&self) -> &Arc<dyn AuditLogStore> {
        &self.store
    }

    /// Get the throttle gate
    pub fn gate(&self) -> &ThrottleGate {
        &self.gate
    }

    /// Get the shared store health tracker
    pub fn health(&self) -> &Arc<StoreHealth> {
        &self.health
    }

    /// Get the clock
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use serde_json::Value;

    #[tokio::test]
    async fn test_gate_shares_health_with_state() {
        let store = Arc::new(crate::audit::storage::FlakyAuditLog::new());
        store.fail_appends(true);
        let state = AppState::new(Config::default(), store, Arc::new(SystemClock));

        state.gate().record_failure("a@example.com", Value::Null).await;
        assert_eq!(state.health().snapshot().audit_gaps, 1);
    }

    #[tokio::test]
    async fn test_gate_uses_configured_threshold() {
        let mut config = Config::default();
        config.throttle.threshold = 9;
        let state = AppState::new(config, Arc::new(MemoryAuditLog::new()), Arc::new(SystemClock));
        assert_eq!(state.gate().config().threshold, 9);
        assert_eq!(state.store().backend(), "memory");
    }
}
