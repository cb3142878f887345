use crate::agent::AgentRegistry;
use crate::error::{ExchangeError, Result};
use crate::model::{AgentRole, CredentialExchangeRecord};
use crate::RecordId;
use std::sync::Arc;
use tracing::info;

/// Read-only, role-scoped record access for reporting and UI collaborators,
/// plus the one administrative mutation: credential delete-by-id.
#[derive(Clone)]
pub struct RecordQueryService {
    agents: Arc<AgentRegistry>,
}

impl RecordQueryService {
    pub fn new(agents: Arc<AgentRegistry>) -> Self {
        Self { agents }
    }

    pub async fn credential_records(&self, role: &str) -> Result<Vec<CredentialExchangeRecord>> {
        let role: AgentRole = role.parse().map_err(ExchangeError::BadRequest)?;
        let agent = self.agents.get_handle(role).await?;
        Ok(agent.list_credentials())
    }

    pub async fn credential_record_by_id(
        &self,
        role: &str,
        credential_record_id: RecordId,
    ) -> Result<CredentialExchangeRecord> {
        let role: AgentRole = role.parse().map_err(ExchangeError::BadRequest)?;
        let agent = self.agents.get_handle(role).await?;

        agent.get_credential(credential_record_id).ok_or_else(|| {
            ExchangeError::NotFound(format!(
                "Credential record not found: {credential_record_id}"
            ))
        })
    }

    /// Deletes a credential record from the Bob agent's store. Absent
    /// records are a caller error, not a silent no-op.
    pub async fn delete_credential(&self, credential_record_id: RecordId) -> Result<()> {
        let agent = self.agents.get_handle(AgentRole::Bob).await?;

        if agent.get_credential(credential_record_id).is_none() {
            return Err(ExchangeError::BadRequest(format!(
                "Credential for {credential_record_id} does not exist"
            )));
        }

        agent.delete_credential(credential_record_id)?;
        info!(%credential_record_id, "Credential record deleted");
        Ok(())
    }
}
