use crate::agent::AgentRegistry;
use crate::convergence::{await_converged, WaitOptions};
use crate::error::{ExchangeError, Result};
use crate::model::{AgentRole, ConnectionState, ConnectionSummary};
use crate::{ConnectionId, RecordId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationCreated {
    pub invitation_url: String,
    pub out_of_band_id: RecordId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationAccepted {
    pub connection_id: ConnectionId,
    pub out_of_band_id: RecordId,
}

/// Drives a pairwise connection from out-of-band invitation to the
/// `complete` state on both agents.
#[derive(Clone)]
pub struct ConnectionOrchestrator {
    agents: Arc<AgentRegistry>,
    wait: WaitOptions,
}

impl ConnectionOrchestrator {
    pub fn new(agents: Arc<AgentRegistry>, wait: WaitOptions) -> Self {
        Self { agents, wait }
    }

    /// Mints an out-of-band invitation on the Acme agent. The runtime
    /// creates the pending connection record as a side effect.
    pub async fn create_invitation(&self) -> Result<InvitationCreated> {
        let agent = self.agents.get_handle(AgentRole::Acme).await?;
        let invitation = agent.create_invitation()?;

        info!(out_of_band_id = %invitation.out_of_band_id, "Invitation created");
        Ok(InvitationCreated {
            invitation_url: invitation.invitation_url,
            out_of_band_id: invitation.out_of_band_id,
        })
    }

    /// Dispatches an invitation URL to the Bob agent and suspends until the
    /// resulting connection reaches `complete` or the bounded wait expires.
    pub async fn receive_invitation(&self, invitation_url: &str) -> Result<InvitationAccepted> {
        // An uninitialized holder takes precedence over URL validation.
        let agent = self.agents.get_handle(AgentRole::Bob).await?;
        validate_invitation_url(invitation_url)?;

        let (connection_id, out_of_band_id) = agent.receive_invitation(invitation_url)?;

        let connected = await_converged(
            &format!("connection {connection_id} to complete"),
            self.wait,
            || {
                agent
                    .get_connection(connection_id)
                    .filter(|c| c.state == ConnectionState::Complete)
            },
        )
        .await?;

        info!(connection_id = %connected.id, "Invitation accepted, connection complete");
        Ok(InvitationAccepted {
            connection_id: connected.id,
            out_of_band_id,
        })
    }

    /// Resolves the Acme-side connection behind an out-of-band id, waiting
    /// for the first match to reach `complete`.
    pub async fn get_connection_id_by_oob_id(&self, out_of_band_id: RecordId) -> Result<ConnectionId> {
        let agent = self.agents.get_handle(AgentRole::Acme).await?;

        let connections = agent.find_connections_by_oob_id(out_of_band_id);
        let first = connections.first().ok_or_else(|| {
            ExchangeError::BadRequest(format!("No connection found for oobId: {out_of_band_id}"))
        })?;
        let connection_id = first.id;

        let connected = await_converged(
            &format!("connection {connection_id} to complete"),
            self.wait,
            || {
                agent
                    .get_connection(connection_id)
                    .filter(|c| c.state == ConnectionState::Complete)
            },
        )
        .await?;

        Ok(connected.id)
    }

    pub async fn list_connections(&self, role: &str) -> Result<Vec<ConnectionSummary>> {
        let role: AgentRole = role.parse().map_err(ExchangeError::BadRequest)?;
        let agent = self.agents.get_handle(role).await?;

        Ok(agent
            .list_connections()
            .iter()
            .map(ConnectionSummary::from)
            .collect())
    }
}

/// Structural checks performed before any runtime dispatch.
fn validate_invitation_url(invitation_url: &str) -> Result<()> {
    if invitation_url.is_empty() {
        return Err(ExchangeError::Validation(
            "Invitation URL cannot be empty".to_string(),
        ));
    }
    if !invitation_url.starts_with("http://") && !invitation_url.starts_with("https://") {
        return Err(ExchangeError::Validation(
            "Invitation URL must use an http(s) scheme".to_string(),
        ));
    }
    let query = invitation_url
        .split_once('?')
        .map(|(_, q)| q)
        .unwrap_or_default();
    let has_invitation_param = query
        .split('&')
        .any(|pair| pair.starts_with("oob=") || pair.starts_with("c_i="));
    if !has_invitation_param {
        return Err(ExchangeError::Validation(
            "Invitation URL is missing the oob or c_i parameter".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_structurally_invalid_urls() {
        assert!(validate_invitation_url("").is_err());
        assert!(validate_invitation_url("not-a-url").is_err());
        assert!(validate_invitation_url("http://host/path").is_err());
        assert!(validate_invitation_url("ftp://host?oob=XYZ").is_err());
    }

    #[test]
    fn accepts_urls_with_invitation_param() {
        assert!(validate_invitation_url("http://host?oob=XYZ").is_ok());
        assert!(validate_invitation_url("https://host/invite?c_i=abc").is_ok());
        assert!(validate_invitation_url("http://host?x=1&oob=XYZ").is_ok());
    }
}
