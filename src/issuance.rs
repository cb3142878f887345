use crate::agent::AgentRegistry;
use crate::error::{ExchangeError, Result};
use crate::model::{
    AgentRole, CredentialAttribute, CredentialExchangeRecord, CredentialState, CredentialSummary,
    ProtocolVersion,
};
use crate::runtime::OfferCredentialOptions;
use crate::{ConnectionId, RecordId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferOutcome {
    pub credential_record_id: RecordId,
    pub state: CredentialState,
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptOutcome {
    pub credential_record_id: RecordId,
    pub state: CredentialState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<CredentialAttribute>>,
}

/// Drives credential offer → accept → issued across both agents.
#[derive(Clone)]
pub struct CredentialExchangeOrchestrator {
    agents: Arc<AgentRegistry>,
}

impl CredentialExchangeOrchestrator {
    pub fn new(agents: Arc<AgentRegistry>) -> Self {
        Self { agents }
    }

    /// Offers a credential over an established connection with an
    /// auto-accept policy, so the remaining automatable steps of the
    /// exchange proceed without further calls.
    pub async fn offer(
        &self,
        connection_id: ConnectionId,
        credential_definition_id: &str,
        protocol_version: &str,
        attributes: Vec<CredentialAttribute>,
    ) -> Result<OfferOutcome> {
        let agent = self.agents.get_handle(AgentRole::Acme).await?;

        let protocol_version: ProtocolVersion = protocol_version
            .parse()
            .map_err(ExchangeError::Validation)?;
        if attributes.is_empty() {
            return Err(ExchangeError::Validation(
                "attributes must be a non-empty list".to_string(),
            ));
        }
        for attribute in &attributes {
            if attribute.name.is_empty() {
                return Err(ExchangeError::Validation(
                    "attribute name cannot be empty".to_string(),
                ));
            }
        }

        info!(%connection_id, credential_definition_id, "Starting credential offer");

        let record = agent.offer_credential(OfferCredentialOptions {
            connection_id,
            credential_definition_id: credential_definition_id.to_string(),
            protocol_version,
            attributes,
            auto_accept: true,
        })?;

        info!(credential_record_id = %record.id, "Credential offered");
        Ok(OfferOutcome {
            credential_record_id: record.id,
            state: record.state,
            connection_id: record.connection_id,
        })
    }

    /// Accepts a pending offer on the Bob agent. The record must currently
    /// be in `offer-received`.
    pub async fn accept(&self, credential_record_id: RecordId) -> Result<AcceptOutcome> {
        let accepted = self.accept_pending(credential_record_id).await?;
        Ok(AcceptOutcome {
            credential_record_id: accepted.id,
            state: accepted.state,
            attributes: None,
        })
    }

    /// `accept` addressed by the holder-side record id; same precondition.
    pub async fn accept_by_record_id(&self, credential_record_id: RecordId) -> Result<AcceptOutcome> {
        self.accept(credential_record_id).await
    }

    /// Accepts the first pending offer in the Bob agent's listing order.
    pub async fn auto_accept(&self) -> Result<AcceptOutcome> {
        let agent = self.agents.get_handle(AgentRole::Bob).await?;

        let pending = agent
            .list_credentials()
            .into_iter()
            .find(|c| c.state == CredentialState::OfferReceived)
            .ok_or_else(|| {
                ExchangeError::BadRequest(
                    "No pending credential offers found for Bob agent".to_string(),
                )
            })?;

        info!(credential_record_id = %pending.id, "Auto-accepting credential offer");
        let accepted = self.accept_pending(pending.id).await?;
        Ok(AcceptOutcome {
            credential_record_id: accepted.id,
            state: accepted.state,
            attributes: Some(accepted.attributes),
        })
    }

    async fn accept_pending(&self, credential_record_id: RecordId) -> Result<CredentialExchangeRecord> {
        let agent = self.agents.get_handle(AgentRole::Bob).await?;

        let record = agent.get_credential(credential_record_id).ok_or_else(|| {
            ExchangeError::NotFound(format!(
                "Credential record not found: {credential_record_id}"
            ))
        })?;
        if record.state != CredentialState::OfferReceived {
            return Err(ExchangeError::State {
                id: credential_record_id.to_string(),
                expected: CredentialState::OfferReceived.to_string(),
                actual: record.state.to_string(),
            });
        }

        let accepted = agent.accept_offer(credential_record_id)?;
        info!(credential_record_id = %accepted.id, state = %accepted.state, "Credential offer accepted");
        Ok(accepted)
    }

    /// Role-indexed listing. The Bob side tolerates an uninitialized agent
    /// by returning an empty list so read paths stay usable before the
    /// holder starts; the Acme side propagates the not-found error.
    pub async fn list_records(&self, role: &str) -> Result<Vec<CredentialSummary>> {
        let role: AgentRole = role.parse().map_err(ExchangeError::BadRequest)?;

        let agent = match self.agents.get_handle(role).await {
            Ok(agent) => agent,
            Err(ExchangeError::NotFound(_)) if role == AgentRole::Bob => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        Ok(agent
            .list_credentials()
            .iter()
            .map(|c| CredentialSummary::new(c, false))
            .collect())
    }

    /// Bob-side listing narrowed to in-flight exchanges, thread id included.
    pub async fn list_bob_records(&self) -> Result<Vec<CredentialSummary>> {
        let agent = match self.agents.get_handle(AgentRole::Bob).await {
            Ok(agent) => agent,
            Err(ExchangeError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(agent
            .list_credentials()
            .iter()
            .filter(|c| {
                matches!(
                    c.state,
                    CredentialState::OfferReceived
                        | CredentialState::RequestSent
                        | CredentialState::CredentialIssued
                )
            })
            .map(|c| CredentialSummary::new(c, true))
            .collect())
    }

    pub async fn get_by_id(
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
}
