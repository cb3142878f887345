use crate::config::AgentConfig;
use crate::error::{ExchangeError, Result};
use crate::ledger::LedgerRegistry;
use crate::model::AgentRole;
use crate::runtime::{AgentHandle, AgentRuntime, InMemoryNetwork};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Summary returned by a successful initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub label: String,
    pub wallet_id: String,
    pub endpoints: Vec<String>,
}

enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready(AgentHandle),
}

/// Owns the exclusive handle to one agent runtime and enforces
/// single-initialization for its role. There is no transition back to
/// `Uninitialized`; the handle lives for the rest of the process.
pub struct AgentLifecycleManager {
    role: AgentRole,
    state: RwLock<Lifecycle>,
}

impl AgentLifecycleManager {
    pub fn new(role: AgentRole) -> Self {
        Self {
            role,
            state: RwLock::new(Lifecycle::Uninitialized),
        }
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    /// Constructs the runtime, registers its transport, and transitions to
    /// `Ready`. A second call fails with `ConflictError`; the caller decides
    /// whether to treat that as idempotent success.
    pub async fn initialize(
        &self,
        config: &AgentConfig,
        network: InMemoryNetwork,
        ledger: Arc<LedgerRegistry>,
    ) -> Result<AgentSummary> {
        {
            let mut state = self.state.write().await;
            match *state {
                Lifecycle::Uninitialized => *state = Lifecycle::Initializing,
                Lifecycle::Initializing | Lifecycle::Ready(_) => {
                    return Err(ExchangeError::Conflict(self.role));
                }
            }
        }

        let handle = match AgentRuntime::start(config, network, ledger) {
            Ok(handle) => handle,
            Err(e) => {
                // Startup failed before a handle existed; allow a retry.
                *self.state.write().await = Lifecycle::Uninitialized;
                error!(role = %self.role, error = %e, "Agent initialization failed");
                return Err(e.into());
            }
        };

        let summary = AgentSummary {
            label: handle.label().to_string(),
            wallet_id: handle.wallet_id().to_string(),
            endpoints: vec![handle.endpoint().to_string()],
        };

        *self.state.write().await = Lifecycle::Ready(handle);
        info!(role = %self.role, label = %summary.label, "Agent initialized");

        Ok(summary)
    }

    /// Borrows the handle for the duration of one orchestrator call.
    pub async fn get_handle(&self) -> Result<AgentHandle> {
        match &*self.state.read().await {
            Lifecycle::Ready(handle) => Ok(handle.clone()),
            _ => Err(ExchangeError::agent_not_initialized(self.role)),
        }
    }
}

/// Role → lifecycle manager mapping, constructed once at startup and passed
/// by reference into the orchestrators.
pub struct AgentRegistry {
    acme: AgentLifecycleManager,
    bob: AgentLifecycleManager,
    network: InMemoryNetwork,
    ledger: Arc<LedgerRegistry>,
}

impl AgentRegistry {
    pub fn new(ledger: Arc<LedgerRegistry>) -> Self {
        Self {
            acme: AgentLifecycleManager::new(AgentRole::Acme),
            bob: AgentLifecycleManager::new(AgentRole::Bob),
            network: InMemoryNetwork::new(),
            ledger,
        }
    }

    pub async fn initialize(&self, role: AgentRole, config: &AgentConfig) -> Result<AgentSummary> {
        self.manager(role)
            .initialize(config, self.network.clone(), Arc::clone(&self.ledger))
            .await
    }

    pub async fn get_handle(&self, role: AgentRole) -> Result<AgentHandle> {
        self.manager(role).get_handle().await
    }

    fn manager(&self, role: AgentRole) -> &AgentLifecycleManager {
        match role {
            AgentRole::Acme => &self.acme,
            AgentRole::Bob => &self.bob,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    fn registry() -> AgentRegistry {
        AgentRegistry::new(Arc::new(LedgerRegistry::new()))
    }

    fn config(endpoint: &str) -> AgentConfig {
        AgentConfig {
            label: "test-agent".to_string(),
            wallet_id: "test-wallet".to_string(),
            wallet_key: "k".to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    #[tokio::test]
    async fn get_handle_before_initialize_is_not_found() {
        let registry = registry();
        let err = registry.get_handle(AgentRole::Acme).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
        assert!(err.to_string().contains("not initialized"));
    }

    #[tokio::test]
    async fn second_initialize_conflicts() {
        let registry = registry();
        let summary = registry
            .initialize(AgentRole::Acme, &config("http://localhost:3202"))
            .await
            .unwrap();
        assert_eq!(summary.label, "test-agent");
        assert_eq!(summary.endpoints, vec!["http://localhost:3202".to_string()]);

        let err = registry
            .initialize(AgentRole::Acme, &config("http://localhost:3204"))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 409);

        // The original handle survives the failed second attempt.
        assert!(registry.get_handle(AgentRole::Acme).await.is_ok());
    }

    #[tokio::test]
    async fn roles_are_independent() {
        let registry = registry();
        registry
            .initialize(AgentRole::Acme, &config("http://localhost:3206"))
            .await
            .unwrap();

        assert!(registry.get_handle(AgentRole::Bob).await.is_err());
        registry
            .initialize(AgentRole::Bob, &config("http://localhost:3207"))
            .await
            .unwrap();
        assert!(registry.get_handle(AgentRole::Bob).await.is_ok());
    }
}
