use crate::{ConnectionId, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which of the two agents an operation is addressed to.
///
/// `Acme` is the issuer/verifier role, `Bob` the holder role. The REST
/// surface keeps the original names as query parameter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Acme,
    Bob,
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentRole::Acme => write!(f, "Acme"),
            AgentRole::Bob => write!(f, "Bob"),
        }
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "acme" | "issuer" => Ok(AgentRole::Acme),
            "bob" | "holder" => Ok(AgentRole::Bob),
            other => Err(format!("Invalid agent type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    V1,
    V2,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V1 => write!(f, "v1"),
            ProtocolVersion::V2 => write!(f, "v2"),
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v1" => Ok(ProtocolVersion::V1),
            "v2" => Ok(ProtocolVersion::V2),
            other => Err(format!("protocolVersion must be v1 or v2, got: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    InvitationCreated,
    RequestReceived,
    Responded,
    Complete,
}

impl ConnectionState {
    fn sequence(self) -> u8 {
        match self {
            ConnectionState::InvitationCreated => 0,
            ConnectionState::RequestReceived => 1,
            ConnectionState::Responded => 2,
            ConnectionState::Complete => 3,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::InvitationCreated => "invitation-created",
            ConnectionState::RequestReceived => "request-received",
            ConnectionState::Responded => "responded",
            ConnectionState::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialState {
    OfferSent,
    OfferReceived,
    RequestSent,
    CredentialIssued,
    Done,
}

impl CredentialState {
    fn sequence(self) -> u8 {
        match self {
            CredentialState::OfferSent | CredentialState::OfferReceived => 0,
            CredentialState::RequestSent => 1,
            CredentialState::CredentialIssued => 2,
            CredentialState::Done => 3,
        }
    }
}

impl fmt::Display for CredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CredentialState::OfferSent => "offer-sent",
            CredentialState::OfferReceived => "offer-received",
            CredentialState::RequestSent => "request-sent",
            CredentialState::CredentialIssued => "credential-issued",
            CredentialState::Done => "done",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProofState {
    RequestSent,
    RequestReceived,
    PresentationSent,
    Done,
}

impl ProofState {
    fn sequence(self) -> u8 {
        match self {
            ProofState::RequestSent | ProofState::RequestReceived => 0,
            ProofState::PresentationSent => 1,
            ProofState::Done => 2,
        }
    }
}

impl fmt::Display for ProofState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProofState::RequestSent => "request-sent",
            ProofState::RequestReceived => "request-received",
            ProofState::PresentationSent => "presentation-sent",
            ProofState::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// One `{name, value}` pair of a credential. Order is preserved end to end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialAttribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub state: ConnectionState,
    pub their_label: Option<String>,
    pub out_of_band_id: RecordId,
    pub created_at: DateTime<Utc>,
}

impl ConnectionRecord {
    /// Moves to `next` unless that would step backwards in the protocol
    /// sequence. Inbound messages can be observed out of order; a record
    /// never reports an earlier state than one already seen.
    pub fn advance(&mut self, next: ConnectionState) {
        if next.sequence() >= self.state.sequence() {
            self.state = next;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialExchangeRecord {
    pub id: RecordId,
    pub state: CredentialState,
    pub connection_id: ConnectionId,
    pub protocol_version: ProtocolVersion,
    pub credential_definition_id: String,
    pub attributes: Vec<CredentialAttribute>,
    pub thread_id: RecordId,
    pub created_at: DateTime<Utc>,
}

impl CredentialExchangeRecord {
    pub fn advance(&mut self, next: CredentialState) {
        if next.sequence() >= self.state.sequence() {
            self.state = next;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofExchangeRecord {
    pub id: RecordId,
    pub state: ProofState,
    pub connection_id: ConnectionId,
    pub thread_id: RecordId,
    pub is_verified: Option<bool>,
    pub created_at: DateTime<Utc>,
}

impl ProofExchangeRecord {
    pub fn advance(&mut self, next: ProofState) {
        if next.sequence() >= self.state.sequence() {
            self.state = next;
        }
    }
}

/// Listing projection of a connection record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub id: ConnectionId,
    pub state: ConnectionState,
    pub their_label: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&ConnectionRecord> for ConnectionSummary {
    fn from(record: &ConnectionRecord) -> Self {
        Self {
            id: record.id,
            state: record.state,
            their_label: record.their_label.clone(),
            created_at: record.created_at,
        }
    }
}

/// Listing projection of a credential exchange record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSummary {
    pub id: RecordId,
    pub state: CredentialState,
    pub connection_id: ConnectionId,
    pub protocol_version: ProtocolVersion,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<RecordId>,
}

impl CredentialSummary {
    pub fn new(record: &CredentialExchangeRecord, with_thread: bool) -> Self {
        Self {
            id: record.id,
            state: record.state,
            connection_id: record.connection_id,
            protocol_version: record.protocol_version,
            created_at: record.created_at,
            thread_id: with_thread.then_some(record.thread_id),
        }
    }
}

/// Listing projection of a proof exchange record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofSummary {
    pub id: RecordId,
    pub state: ProofState,
    pub connection_id: ConnectionId,
    pub thread_id: RecordId,
    pub is_verified: Option<bool>,
    pub created_at: DateTime<Utc>,
}

impl From<&ProofExchangeRecord> for ProofSummary {
    fn from(record: &ProofExchangeRecord) -> Self {
        Self {
            id: record.id,
            state: record.state,
            connection_id: record.connection_id,
            thread_id: record.thread_id,
            is_verified: record.is_verified,
            created_at: record.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn agent_role_parses_both_namings() {
        assert_eq!("acme".parse::<AgentRole>().unwrap(), AgentRole::Acme);
        assert_eq!("issuer".parse::<AgentRole>().unwrap(), AgentRole::Acme);
        assert_eq!("bob".parse::<AgentRole>().unwrap(), AgentRole::Bob);
        assert_eq!("holder".parse::<AgentRole>().unwrap(), AgentRole::Bob);
        assert!("carol".parse::<AgentRole>().is_err());
    }

    #[test]
    fn protocol_version_rejects_unknown() {
        assert_eq!("v1".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::V1);
        assert_eq!("v2".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::V2);
        assert!("v3".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn states_serialize_kebab_case() {
        let json = serde_json::to_string(&CredentialState::OfferReceived).unwrap();
        assert_eq!(json, "\"offer-received\"");
        let json = serde_json::to_string(&ConnectionState::InvitationCreated).unwrap();
        assert_eq!(json, "\"invitation-created\"");
        let json = serde_json::to_string(&ProofState::PresentationSent).unwrap();
        assert_eq!(json, "\"presentation-sent\"");
    }

    #[test]
    fn connection_state_is_monotonic() {
        let mut record = ConnectionRecord {
            id: Uuid::new_v4(),
            state: ConnectionState::InvitationCreated,
            their_label: None,
            out_of_band_id: Uuid::new_v4(),
            created_at: Utc::now(),
        };

        record.advance(ConnectionState::Responded);
        assert_eq!(record.state, ConnectionState::Responded);

        // A late request message must not move the record backwards.
        record.advance(ConnectionState::RequestReceived);
        assert_eq!(record.state, ConnectionState::Responded);

        record.advance(ConnectionState::Complete);
        assert_eq!(record.state, ConnectionState::Complete);
    }

    #[test]
    fn credential_state_is_monotonic() {
        let mut record = CredentialExchangeRecord {
            id: Uuid::new_v4(),
            state: CredentialState::OfferReceived,
            connection_id: Uuid::new_v4(),
            protocol_version: ProtocolVersion::V2,
            credential_definition_id: "cred-def-1".into(),
            attributes: vec![],
            thread_id: Uuid::new_v4(),
            created_at: Utc::now(),
        };

        record.advance(CredentialState::Done);
        record.advance(CredentialState::RequestSent);
        assert_eq!(record.state, CredentialState::Done);
    }

    #[test]
    fn proof_record_starts_unverified() {
        let record = ProofExchangeRecord {
            id: Uuid::new_v4(),
            state: ProofState::RequestSent,
            connection_id: Uuid::new_v4(),
            thread_id: Uuid::new_v4(),
            is_verified: None,
            created_at: Utc::now(),
        };
        assert!(record.is_verified.is_none());
    }
}
