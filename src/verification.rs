use crate::agent::AgentRegistry;
use crate::error::{ExchangeError, Result};
use crate::ledger::LedgerRegistry;
use crate::model::{AgentRole, ProofState, ProofSummary};
use crate::runtime::{RequestProofOptions, RequestedAttribute};
use crate::{ConnectionId, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofRequestOutcome {
    pub proof_record_id: RecordId,
    pub state: ProofState,
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationOutcome {
    pub proof_record_id: RecordId,
    pub state: ProofState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub proof_record_id: RecordId,
    pub state: ProofState,
    /// Always a concrete verdict once verification ran.
    pub is_verified: bool,
    pub verified_at: DateTime<Utc>,
}

/// Drives proof request → present → verify across both agents.
#[derive(Clone)]
pub struct ProofExchangeOrchestrator {
    agents: Arc<AgentRegistry>,
    ledger: Arc<LedgerRegistry>,
}

impl ProofExchangeOrchestrator {
    pub fn new(agents: Arc<AgentRegistry>, ledger: Arc<LedgerRegistry>) -> Self {
        Self { agents, ledger }
    }

    /// Requests a proof over the connection: one named-attribute restriction
    /// per schema attribute of the credential definition, each bound to that
    /// definition, with an always-accept policy for the automatable steps.
    pub async fn request(
        &self,
        connection_id: ConnectionId,
        credential_definition_id: &str,
    ) -> Result<ProofRequestOutcome> {
        let agent = self.agents.get_handle(AgentRole::Acme).await?;

        let attr_names = self
            .ledger
            .schema_attributes(credential_definition_id)
            .ok_or_else(|| {
                ExchangeError::BadRequest(format!(
                    "Credential definition not found on ledger: {credential_definition_id}"
                ))
            })?;

        let requested_attributes = attr_names
            .into_iter()
            .map(|name| RequestedAttribute {
                name,
                credential_definition_id: credential_definition_id.to_string(),
            })
            .collect();

        info!(%connection_id, credential_definition_id, "Requesting proof");
        let record = agent.request_proof(RequestProofOptions {
            connection_id,
            name: "Verify Credentials".to_string(),
            requested_attributes,
            auto_accept: true,
        })?;

        Ok(ProofRequestOutcome {
            proof_record_id: record.id,
            state: record.state,
            connection_id: record.connection_id,
        })
    }

    /// Holder side: selects matching wallet credentials and submits the
    /// presentation. The record must currently be in `request-received`.
    pub async fn accept_and_present(&self, proof_record_id: RecordId) -> Result<PresentationOutcome> {
        let agent = self.agents.get_handle(AgentRole::Bob).await?;

        let record = agent.get_proof(proof_record_id).ok_or_else(|| {
            ExchangeError::NotFound(format!("Proof record not found: {proof_record_id}"))
        })?;
        if record.state != ProofState::RequestReceived {
            return Err(ExchangeError::State {
                id: proof_record_id.to_string(),
                expected: ProofState::RequestReceived.to_string(),
                actual: record.state.to_string(),
            });
        }

        let credential = agent.select_credentials_for_request(proof_record_id)?;
        let presented = agent.accept_request(proof_record_id, credential)?;

        info!(proof_record_id = %presented.id, "Proof presentation submitted");
        Ok(PresentationOutcome {
            proof_record_id: presented.id,
            state: presented.state,
        })
    }

    /// Verifier side: accepts the received presentation and reports the
    /// verdict. `is_verified` is never absent.
    pub async fn verify(&self, proof_record_id: RecordId) -> Result<VerificationOutcome> {
        let agent = self.agents.get_handle(AgentRole::Acme).await?;

        let verified = agent.accept_presentation(proof_record_id)?;
        info!(
            proof_record_id = %verified.id,
            is_verified = verified.is_verified.unwrap_or(false),
            "Proof verification completed"
        );

        Ok(VerificationOutcome {
            proof_record_id: verified.id,
            state: verified.state,
            is_verified: verified.is_verified.unwrap_or(false),
            verified_at: Utc::now(),
        })
    }

    pub async fn list_records(&self, role: &str) -> Result<Vec<ProofSummary>> {
        let role: AgentRole = role.parse().map_err(ExchangeError::BadRequest)?;
        let agent = self.agents.get_handle(role).await?;

        Ok(agent.list_proofs().iter().map(ProofSummary::from).collect())
    }

    pub async fn list_by_thread(&self, role: &str, thread_id: RecordId) -> Result<Vec<ProofSummary>> {
        let role: AgentRole = role.parse().map_err(ExchangeError::BadRequest)?;
        let agent = self.agents.get_handle(role).await?;

        Ok(agent
            .find_proofs_by_thread_id(thread_id)
            .iter()
            .map(ProofSummary::from)
            .collect())
    }
}
