//! In-process agent runtime consumed by the orchestrators.
//!
//! Models the agent-to-agent protocol as asynchronous message passing over an
//! in-memory transport: each runtime registers its endpoint on the shared
//! network and processes inbound protocol messages on a spawned inbox task,
//! advancing its connection/credential/proof records as the flows progress.
//! The orchestration layer treats this surface as a black box and only ever
//! observes record state.

use crate::config::AgentConfig;
use crate::ledger::LedgerRegistry;
use crate::model::{
    ConnectionRecord, ConnectionState, CredentialAttribute, CredentialExchangeRecord,
    CredentialState, ProofExchangeRecord, ProofState, ProtocolVersion,
};
use crate::{ConnectionId, RecordId};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ExchangeError;

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Low-level protocol failures reported by the runtime. The orchestration
/// layer maps these onto its own taxonomy at the call boundary.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("No credentials found for proof request: {0}")]
    NoMatchingCredentials(String),

    #[error("Connection {0} is not ready for an exchange")]
    ConnectionNotReady(ConnectionId),

    #[error("Malformed invitation: {0}")]
    InvalidInvitation(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Other(String),
}

impl From<RuntimeError> for ExchangeError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::RecordNotFound(msg) => ExchangeError::NotFound(msg),
            RuntimeError::SchemaMismatch(msg) => ExchangeError::BadRequest(msg),
            RuntimeError::NoMatchingCredentials(msg) => ExchangeError::BadRequest(msg),
            RuntimeError::ConnectionNotReady(id) => {
                ExchangeError::BadRequest(format!("Connection {id} is not ready for an exchange"))
            }
            RuntimeError::InvalidInvitation(msg) => ExchangeError::Validation(msg),
            RuntimeError::Transport(msg) | RuntimeError::Other(msg) => {
                ExchangeError::Internal(msg)
            }
        }
    }
}

/// In-memory transport shared by the two agents. Routes protocol messages by
/// endpoint to the owning runtime's inbox.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    routes: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<ProtocolMessage>>>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(
        &self,
        endpoint: &str,
        sender: mpsc::UnboundedSender<ProtocolMessage>,
    ) -> RuntimeResult<()> {
        let mut routes = self.routes.write();
        if routes.contains_key(endpoint) {
            return Err(RuntimeError::Transport(format!(
                "Endpoint already registered: {endpoint}"
            )));
        }
        routes.insert(endpoint.to_string(), sender);
        Ok(())
    }

    fn deliver(&self, endpoint: &str, message: ProtocolMessage) -> RuntimeResult<()> {
        let routes = self.routes.read();
        let sender = routes.get(endpoint).ok_or_else(|| {
            RuntimeError::Transport(format!("No transport registered for endpoint: {endpoint}"))
        })?;
        sender
            .send(message)
            .map_err(|_| RuntimeError::Transport(format!("Inbox closed for endpoint: {endpoint}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InvitationPayload {
    out_of_band_id: RecordId,
    connection_id: ConnectionId,
    endpoint: String,
    label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestedAttribute {
    pub name: String,
    pub credential_definition_id: String,
}

/// A credential sitting in the holder's wallet after issuance completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeldCredential {
    pub credential_definition_id: String,
    pub attributes: Vec<CredentialAttribute>,
}

#[derive(Debug, Clone)]
enum ProtocolMessage {
    ConnectionRequest {
        connection_id: ConnectionId,
        out_of_band_id: RecordId,
        their_label: String,
        reply_to: String,
    },
    ConnectionResponse {
        connection_id: ConnectionId,
        their_label: String,
    },
    ConnectionAck {
        connection_id: ConnectionId,
    },
    CredentialOffer {
        thread_id: RecordId,
        connection_id: ConnectionId,
        credential_definition_id: String,
        protocol_version: ProtocolVersion,
        attributes: Vec<CredentialAttribute>,
    },
    CredentialRequest {
        thread_id: RecordId,
    },
    CredentialIssue {
        thread_id: RecordId,
        credential_definition_id: String,
        attributes: Vec<CredentialAttribute>,
    },
    CredentialAck {
        thread_id: RecordId,
    },
    ProofRequest {
        thread_id: RecordId,
        connection_id: ConnectionId,
        requested_attributes: Vec<RequestedAttribute>,
    },
    ProofPresentation {
        thread_id: RecordId,
        credential: HeldCredential,
    },
    ProofAck {
        thread_id: RecordId,
        verified: bool,
    },
}

pub struct CreatedInvitation {
    pub invitation_url: String,
    pub out_of_band_id: RecordId,
    pub connection_id: ConnectionId,
}

pub struct OfferCredentialOptions {
    pub connection_id: ConnectionId,
    pub credential_definition_id: String,
    pub protocol_version: ProtocolVersion,
    pub attributes: Vec<CredentialAttribute>,
    /// Continue runtime-automatable steps of this exchange without further
    /// manual calls.
    pub auto_accept: bool,
}

pub struct RequestProofOptions {
    pub connection_id: ConnectionId,
    pub name: String,
    pub requested_attributes: Vec<RequestedAttribute>,
    pub auto_accept: bool,
}

/// Opaque capability handle over one initialized runtime. Cheap to clone for
/// the duration of a single orchestrator call; the lifecycle manager keeps
/// the owning reference for the life of the process.
#[derive(Clone)]
pub struct AgentHandle(Arc<AgentRuntime>);

impl AgentHandle {
    pub fn label(&self) -> &str {
        &self.0.label
    }

    pub fn wallet_id(&self) -> &str {
        &self.0.wallet_id
    }

    pub fn endpoint(&self) -> &str {
        &self.0.endpoint
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("label", &self.0.label)
            .field("wallet_id", &self.0.wallet_id)
            .field("endpoint", &self.0.endpoint)
            .finish()
    }
}

impl std::ops::Deref for AgentHandle {
    type Target = AgentRuntime;

    fn deref(&self) -> &AgentRuntime {
        &self.0
    }
}

pub struct AgentRuntime {
    label: String,
    wallet_id: String,
    endpoint: String,
    network: InMemoryNetwork,
    ledger: Arc<LedgerRegistry>,
    connections: RwLock<Vec<ConnectionRecord>>,
    credentials: RwLock<Vec<CredentialExchangeRecord>>,
    proofs: RwLock<Vec<ProofExchangeRecord>>,
    wallet: RwLock<Vec<HeldCredential>>,
    // Thread-scoped state: the outstanding request per proof exchange and,
    // on the verifier side, the presentation awaiting verification.
    proof_requests: RwLock<HashMap<RecordId, Vec<RequestedAttribute>>>,
    presentations: RwLock<HashMap<RecordId, HeldCredential>>,
    peers: RwLock<HashMap<ConnectionId, String>>,
    // Threads whose automatable continuation steps proceed without a manual
    // call, set when the initiating operation requested the policy.
    auto_accept_threads: RwLock<HashSet<RecordId>>,
}

impl AgentRuntime {
    /// Constructs the runtime, registers its inbound transport on the
    /// network, and starts the inbox task.
    pub fn start(
        config: &AgentConfig,
        network: InMemoryNetwork,
        ledger: Arc<LedgerRegistry>,
    ) -> RuntimeResult<AgentHandle> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        network.register(&config.endpoint, tx)?;

        let runtime = Arc::new(AgentRuntime {
            label: config.label.clone(),
            wallet_id: config.wallet_id.clone(),
            endpoint: config.endpoint.clone(),
            network,
            ledger,
            connections: RwLock::new(Vec::new()),
            credentials: RwLock::new(Vec::new()),
            proofs: RwLock::new(Vec::new()),
            wallet: RwLock::new(Vec::new()),
            proof_requests: RwLock::new(HashMap::new()),
            presentations: RwLock::new(HashMap::new()),
            peers: RwLock::new(HashMap::new()),
            auto_accept_threads: RwLock::new(HashSet::new()),
        });

        let inbox = Arc::clone(&runtime);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = inbox.handle_message(message) {
                    warn!(agent = %inbox.label, error = %e, "Failed to process inbound message");
                }
            }
        });

        Ok(AgentHandle(runtime))
    }

    // --- out-of-band ---

    /// Mints an out-of-band invitation and the pending connection record
    /// behind it. The invitation URL carries the payload the peer needs to
    /// bootstrap the pairwise connection.
    pub fn create_invitation(&self) -> RuntimeResult<CreatedInvitation> {
        let out_of_band_id = Uuid::new_v4();
        let connection_id = Uuid::new_v4();

        self.connections.write().push(ConnectionRecord {
            id: connection_id,
            state: ConnectionState::InvitationCreated,
            their_label: None,
            out_of_band_id,
            created_at: Utc::now(),
        });

        let payload = InvitationPayload {
            out_of_band_id,
            connection_id,
            endpoint: self.endpoint.clone(),
            label: self.label.clone(),
        };
        let encoded = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).map_err(|e| {
            RuntimeError::Other(format!("Failed to encode invitation: {e}"))
        })?);

        Ok(CreatedInvitation {
            invitation_url: format!("{}?oob={}", self.endpoint, encoded),
            out_of_band_id,
            connection_id,
        })
    }

    /// Accepts an out-of-band invitation: records the pairwise connection
    /// under the inviter's connection id and sends the connection request.
    /// The record converges to `complete` asynchronously.
    pub fn receive_invitation(&self, invitation_url: &str) -> RuntimeResult<(ConnectionId, RecordId)> {
        let payload = decode_invitation(invitation_url)?;

        {
            let mut connections = self.connections.write();
            // Re-receiving the same invitation must not mint a second record
            // under an already-used id.
            if connections.iter().any(|c| c.id == payload.connection_id) {
                return Ok((payload.connection_id, payload.out_of_band_id));
            }
            connections.push(ConnectionRecord {
                id: payload.connection_id,
                state: ConnectionState::InvitationCreated,
                their_label: Some(payload.label),
                out_of_band_id: payload.out_of_band_id,
                created_at: Utc::now(),
            });
        }
        self.peers
            .write()
            .insert(payload.connection_id, payload.endpoint.clone());

        self.network.deliver(
            &payload.endpoint,
            ProtocolMessage::ConnectionRequest {
                connection_id: payload.connection_id,
                out_of_band_id: payload.out_of_band_id,
                their_label: self.label.clone(),
                reply_to: self.endpoint.clone(),
            },
        )?;

        Ok((payload.connection_id, payload.out_of_band_id))
    }

    // --- connections ---

    pub fn get_connection(&self, id: ConnectionId) -> Option<ConnectionRecord> {
        self.connections.read().iter().find(|c| c.id == id).cloned()
    }

    pub fn find_connections_by_oob_id(&self, out_of_band_id: RecordId) -> Vec<ConnectionRecord> {
        self.connections
            .read()
            .iter()
            .filter(|c| c.out_of_band_id == out_of_band_id)
            .cloned()
            .collect()
    }

    pub fn list_connections(&self) -> Vec<ConnectionRecord> {
        self.connections.read().clone()
    }

    // --- credentials ---

    pub fn offer_credential(
        &self,
        options: OfferCredentialOptions,
    ) -> RuntimeResult<CredentialExchangeRecord> {
        let peer = self.exchange_peer(options.connection_id)?;

        let schema_attrs = self
            .ledger
            .schema_attributes(&options.credential_definition_id)
            .ok_or_else(|| {
                RuntimeError::SchemaMismatch(format!(
                    "Credential definition not found on ledger: {}",
                    options.credential_definition_id
                ))
            })?;

        for attribute in &options.attributes {
            if !schema_attrs.iter().any(|a| a == &attribute.name) {
                return Err(RuntimeError::SchemaMismatch(format!(
                    "Attribute '{}' is not part of the schema behind {}",
                    attribute.name, options.credential_definition_id
                )));
            }
        }

        let record = CredentialExchangeRecord {
            id: Uuid::new_v4(),
            state: CredentialState::OfferSent,
            connection_id: options.connection_id,
            protocol_version: options.protocol_version,
            credential_definition_id: options.credential_definition_id.clone(),
            attributes: options.attributes.clone(),
            thread_id: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        self.credentials.write().push(record.clone());
        if options.auto_accept {
            self.auto_accept_threads.write().insert(record.thread_id);
        }

        self.network.deliver(
            &peer,
            ProtocolMessage::CredentialOffer {
                thread_id: record.thread_id,
                connection_id: options.connection_id,
                credential_definition_id: options.credential_definition_id,
                protocol_version: options.protocol_version,
                attributes: options.attributes,
            },
        )?;

        Ok(record)
    }

    pub fn accept_offer(&self, credential_record_id: RecordId) -> RuntimeResult<CredentialExchangeRecord> {
        let record = self.get_credential(credential_record_id).ok_or_else(|| {
            RuntimeError::RecordNotFound(format!(
                "Credential record not found: {credential_record_id}"
            ))
        })?;
        // Resolve the peer before touching the record; a failure here must
        // leave the exchange in its current state.
        let peer = self.exchange_peer(record.connection_id)?;

        {
            let mut credentials = self.credentials.write();
            if let Some(record) = credentials.iter_mut().find(|c| c.id == credential_record_id) {
                record.advance(CredentialState::RequestSent);
            }
        }
        self.network.deliver(
            &peer,
            ProtocolMessage::CredentialRequest {
                thread_id: record.thread_id,
            },
        )?;

        self.get_credential(credential_record_id).ok_or_else(|| {
            RuntimeError::RecordNotFound(format!(
                "Credential record not found: {credential_record_id}"
            ))
        })
    }

    pub fn get_credential(&self, id: RecordId) -> Option<CredentialExchangeRecord> {
        self.credentials.read().iter().find(|c| c.id == id).cloned()
    }

    /// Listing order is creation order.
    pub fn list_credentials(&self) -> Vec<CredentialExchangeRecord> {
        self.credentials.read().clone()
    }

    pub fn delete_credential(&self, id: RecordId) -> RuntimeResult<()> {
        let mut credentials = self.credentials.write();
        let before = credentials.len();
        credentials.retain(|c| c.id != id);
        if credentials.len() == before {
            return Err(RuntimeError::RecordNotFound(format!(
                "Credential record not found: {id}"
            )));
        }
        Ok(())
    }

    // --- proofs ---

    pub fn request_proof(&self, options: RequestProofOptions) -> RuntimeResult<ProofExchangeRecord> {
        let peer = self.exchange_peer(options.connection_id)?;

        let record = ProofExchangeRecord {
            id: Uuid::new_v4(),
            state: ProofState::RequestSent,
            connection_id: options.connection_id,
            thread_id: Uuid::new_v4(),
            is_verified: None,
            created_at: Utc::now(),
        };
        self.proofs.write().push(record.clone());
        self.proof_requests
            .write()
            .insert(record.thread_id, options.requested_attributes.clone());
        if options.auto_accept {
            self.auto_accept_threads.write().insert(record.thread_id);
        }

        self.network.deliver(
            &peer,
            ProtocolMessage::ProofRequest {
                thread_id: record.thread_id,
                connection_id: options.connection_id,
                requested_attributes: options.requested_attributes,
            },
        )?;
        debug!(agent = %self.label, request = %options.name, proof_record_id = %record.id, "Proof requested");

        Ok(record)
    }

    /// Picks the first wallet credential satisfying the request's
    /// credential-definition restrictions.
    pub fn select_credentials_for_request(
        &self,
        proof_record_id: RecordId,
    ) -> RuntimeResult<HeldCredential> {
        let record = self.get_proof(proof_record_id).ok_or_else(|| {
            RuntimeError::RecordNotFound(format!("Proof record not found: {proof_record_id}"))
        })?;

        let requests = self.proof_requests.read();
        let requested = requests.get(&record.thread_id).ok_or_else(|| {
            RuntimeError::Other(format!(
                "No proof request stored for thread {}",
                record.thread_id
            ))
        })?;

        let wallet = self.wallet.read();
        wallet
            .iter()
            .find(|held| {
                requested
                    .iter()
                    .all(|r| r.credential_definition_id == held.credential_definition_id)
            })
            .cloned()
            .ok_or_else(|| {
                RuntimeError::NoMatchingCredentials(format!(
                    "proof record {proof_record_id}"
                ))
            })
    }

    pub fn accept_request(
        &self,
        proof_record_id: RecordId,
        credential: HeldCredential,
    ) -> RuntimeResult<ProofExchangeRecord> {
        let record = self.get_proof(proof_record_id).ok_or_else(|| {
            RuntimeError::RecordNotFound(format!("Proof record not found: {proof_record_id}"))
        })?;
        // Same ordering as accept_offer: peer resolution may fail and the
        // record must not have moved when it does.
        let peer = self.exchange_peer(record.connection_id)?;

        {
            let mut proofs = self.proofs.write();
            if let Some(record) = proofs.iter_mut().find(|p| p.id == proof_record_id) {
                record.advance(ProofState::PresentationSent);
            }
        }
        self.network.deliver(
            &peer,
            ProtocolMessage::ProofPresentation {
                thread_id: record.thread_id,
                credential,
            },
        )?;

        self.get_proof(proof_record_id).ok_or_else(|| {
            RuntimeError::RecordNotFound(format!("Proof record not found: {proof_record_id}"))
        })
    }

    /// Verifier side: checks the received presentation against the stored
    /// request and closes the exchange. The verdict is a concrete boolean.
    pub fn accept_presentation(&self, proof_record_id: RecordId) -> RuntimeResult<ProofExchangeRecord> {
        let thread_id = self
            .get_proof(proof_record_id)
            .ok_or_else(|| {
                RuntimeError::RecordNotFound(format!("Proof record not found: {proof_record_id}"))
            })?
            .thread_id;

        let presentation = self
            .presentations
            .read()
            .get(&thread_id)
            .cloned()
            .ok_or_else(|| {
                RuntimeError::Other(format!(
                    "No presentation received for proof record {proof_record_id}"
                ))
            })?;

        let requested = self
            .proof_requests
            .read()
            .get(&thread_id)
            .cloned()
            .unwrap_or_default();

        let verified = requested.iter().all(|r| {
            r.credential_definition_id == presentation.credential_definition_id
                && presentation.attributes.iter().any(|a| a.name == r.name)
        });

        {
            let mut proofs = self.proofs.write();
            if let Some(record) = proofs.iter_mut().find(|p| p.id == proof_record_id) {
                record.advance(ProofState::Done);
                record.is_verified = Some(verified);
            }
        }

        let connection_id = self
            .get_proof(proof_record_id)
            .map(|p| p.connection_id)
            .ok_or_else(|| {
                RuntimeError::RecordNotFound(format!("Proof record not found: {proof_record_id}"))
            })?;
        let peer = self.exchange_peer(connection_id)?;
        self.network.deliver(
            &peer,
            ProtocolMessage::ProofAck {
                thread_id,
                verified,
            },
        )?;

        self.get_proof(proof_record_id).ok_or_else(|| {
            RuntimeError::RecordNotFound(format!("Proof record not found: {proof_record_id}"))
        })
    }

    pub fn get_proof(&self, id: RecordId) -> Option<ProofExchangeRecord> {
        self.proofs.read().iter().find(|p| p.id == id).cloned()
    }

    pub fn list_proofs(&self) -> Vec<ProofExchangeRecord> {
        self.proofs.read().clone()
    }

    pub fn find_proofs_by_thread_id(&self, thread_id: RecordId) -> Vec<ProofExchangeRecord> {
        self.proofs
            .read()
            .iter()
            .filter(|p| p.thread_id == thread_id)
            .cloned()
            .collect()
    }

    // --- internals ---

    fn exchange_peer(&self, connection_id: ConnectionId) -> RuntimeResult<String> {
        let connection = self.get_connection(connection_id).ok_or_else(|| {
            RuntimeError::RecordNotFound(format!("Connection not found: {connection_id}"))
        })?;
        if connection.state != ConnectionState::Complete {
            return Err(RuntimeError::ConnectionNotReady(connection_id));
        }
        self.peers
            .read()
            .get(&connection_id)
            .cloned()
            .ok_or_else(|| RuntimeError::ConnectionNotReady(connection_id))
    }

    fn handle_message(&self, message: ProtocolMessage) -> RuntimeResult<()> {
        match message {
            ProtocolMessage::ConnectionRequest {
                connection_id,
                out_of_band_id: _,
                their_label,
                reply_to,
            } => {
                {
                    let mut connections = self.connections.write();
                    let record = connections
                        .iter_mut()
                        .find(|c| c.id == connection_id)
                        .ok_or_else(|| {
                            RuntimeError::RecordNotFound(format!(
                                "No pending connection for request: {connection_id}"
                            ))
                        })?;
                    record.advance(ConnectionState::RequestReceived);
                    record.their_label = Some(their_label);
                    // Connections auto-accept, as the agents are configured.
                    record.advance(ConnectionState::Responded);
                }
                self.peers.write().insert(connection_id, reply_to.clone());
                self.network.deliver(
                    &reply_to,
                    ProtocolMessage::ConnectionResponse {
                        connection_id,
                        their_label: self.label.clone(),
                    },
                )?;
                debug!(agent = %self.label, %connection_id, "Connection request accepted");
            }

            ProtocolMessage::ConnectionResponse {
                connection_id,
                their_label,
            } => {
                {
                    let mut connections = self.connections.write();
                    let record = connections
                        .iter_mut()
                        .find(|c| c.id == connection_id)
                        .ok_or_else(|| {
                            RuntimeError::RecordNotFound(format!(
                                "No connection for response: {connection_id}"
                            ))
                        })?;
                    record.their_label = Some(their_label);
                    record.advance(ConnectionState::Complete);
                }
                let peer = self.exchange_peer(connection_id)?;
                self.network
                    .deliver(&peer, ProtocolMessage::ConnectionAck { connection_id })?;
            }

            ProtocolMessage::ConnectionAck { connection_id } => {
                let mut connections = self.connections.write();
                if let Some(record) = connections.iter_mut().find(|c| c.id == connection_id) {
                    record.advance(ConnectionState::Complete);
                }
            }

            ProtocolMessage::CredentialOffer {
                thread_id,
                connection_id,
                credential_definition_id,
                protocol_version,
                attributes,
            } => {
                self.credentials.write().push(CredentialExchangeRecord {
                    id: Uuid::new_v4(),
                    state: CredentialState::OfferReceived,
                    connection_id,
                    protocol_version,
                    credential_definition_id,
                    attributes,
                    thread_id,
                    created_at: Utc::now(),
                });
            }

            ProtocolMessage::CredentialRequest { thread_id } => {
                // Issuer side: the offer was accepted. Under the auto-accept
                // policy the credential is issued without further calls.
                let auto_accept = self.auto_accept_threads.read().contains(&thread_id);
                let issued = {
                    let mut credentials = self.credentials.write();
                    let record = credentials
                        .iter_mut()
                        .find(|c| c.thread_id == thread_id)
                        .ok_or_else(|| {
                            RuntimeError::RecordNotFound(format!(
                                "No credential exchange for thread: {thread_id}"
                            ))
                        })?;
                    record.advance(CredentialState::RequestSent);
                    if !auto_accept {
                        return Ok(());
                    }
                    record.advance(CredentialState::CredentialIssued);
                    (
                        record.id,
                        record.connection_id,
                        record.credential_definition_id.clone(),
                        record.attributes.clone(),
                    )
                };
                let (record_id, connection_id, credential_definition_id, attributes) = issued;
                let peer = self.exchange_peer(connection_id)?;
                self.network.deliver(
                    &peer,
                    ProtocolMessage::CredentialIssue {
                        thread_id,
                        credential_definition_id,
                        attributes,
                    },
                )?;
                debug!(agent = %self.label, credential_record_id = %record_id, "Credential issued");
            }

            ProtocolMessage::CredentialIssue {
                thread_id,
                credential_definition_id,
                attributes,
            } => {
                let connection_id = {
                    let mut credentials = self.credentials.write();
                    let record = credentials
                        .iter_mut()
                        .find(|c| c.thread_id == thread_id)
                        .ok_or_else(|| {
                            RuntimeError::RecordNotFound(format!(
                                "No credential exchange for thread: {thread_id}"
                            ))
                        })?;
                    record.advance(CredentialState::Done);
                    record.connection_id
                };
                self.wallet.write().push(HeldCredential {
                    credential_definition_id,
                    attributes,
                });
                let peer = self.exchange_peer(connection_id)?;
                self.network
                    .deliver(&peer, ProtocolMessage::CredentialAck { thread_id })?;
            }

            ProtocolMessage::CredentialAck { thread_id } => {
                let mut credentials = self.credentials.write();
                if let Some(record) = credentials.iter_mut().find(|c| c.thread_id == thread_id) {
                    record.advance(CredentialState::Done);
                }
            }

            ProtocolMessage::ProofRequest {
                thread_id,
                connection_id,
                requested_attributes,
            } => {
                self.proofs.write().push(ProofExchangeRecord {
                    id: Uuid::new_v4(),
                    state: ProofState::RequestReceived,
                    connection_id,
                    thread_id,
                    is_verified: None,
                    created_at: Utc::now(),
                });
                self.proof_requests
                    .write()
                    .insert(thread_id, requested_attributes);
            }

            ProtocolMessage::ProofPresentation {
                thread_id,
                credential,
            } => {
                {
                    let mut proofs = self.proofs.write();
                    let record = proofs
                        .iter_mut()
                        .find(|p| p.thread_id == thread_id)
                        .ok_or_else(|| {
                            RuntimeError::RecordNotFound(format!(
                                "No proof exchange for thread: {thread_id}"
                            ))
                        })?;
                    record.advance(ProofState::PresentationSent);
                }
                self.presentations.write().insert(thread_id, credential);
            }

            ProtocolMessage::ProofAck {
                thread_id,
                verified,
            } => {
                let mut proofs = self.proofs.write();
                if let Some(record) = proofs.iter_mut().find(|p| p.thread_id == thread_id) {
                    record.advance(ProofState::Done);
                    record.is_verified = Some(verified);
                }
            }
        }

        Ok(())
    }
}

fn decode_invitation(invitation_url: &str) -> RuntimeResult<InvitationPayload> {
    let query = invitation_url
        .split_once('?')
        .map(|(_, q)| q)
        .unwrap_or_default();
    let encoded = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("oob=").or_else(|| pair.strip_prefix("c_i=")))
        .ok_or_else(|| {
            RuntimeError::InvalidInvitation(
                "Invitation URL is missing the oob parameter".to_string(),
            )
        })?;

    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| RuntimeError::InvalidInvitation(format!("Invalid invitation encoding: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| RuntimeError::InvalidInvitation(format!("Invalid invitation payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use std::time::Duration;

    fn agent_config(label: &str, endpoint: &str) -> AgentConfig {
        AgentConfig {
            label: label.to_string(),
            wallet_id: format!("{label}-wallet"),
            wallet_key: "k".to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    async fn wait_for<F: Fn() -> bool>(predicate: F) {
        for _ in 0..200 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn start_pair() -> (AgentHandle, AgentHandle, Arc<LedgerRegistry>) {
        let network = InMemoryNetwork::new();
        let ledger = Arc::new(LedgerRegistry::new());
        let acme = AgentRuntime::start(
            &agent_config("acme", "http://localhost:3102"),
            network.clone(),
            Arc::clone(&ledger),
        )
        .unwrap();
        let bob = AgentRuntime::start(
            &agent_config("bob", "http://localhost:3103"),
            network.clone(),
            Arc::clone(&ledger),
        )
        .unwrap();
        (acme, bob, ledger)
    }

    async fn connect(acme: &AgentHandle, bob: &AgentHandle) -> ConnectionId {
        let invitation = acme.create_invitation().unwrap();
        let (connection_id, _) = bob.receive_invitation(&invitation.invitation_url).unwrap();

        let acme_done = acme.clone();
        let bob_done = bob.clone();
        wait_for(move || {
            let done = |handle: &AgentHandle| {
                handle
                    .get_connection(connection_id)
                    .map(|c| c.state == ConnectionState::Complete)
                    .unwrap_or(false)
            };
            done(&acme_done) && done(&bob_done)
        })
        .await;
        connection_id
    }

    #[tokio::test]
    async fn connection_flow_converges_with_shared_id() {
        let (acme, bob, _) = start_pair();
        let invitation = acme.create_invitation().unwrap();
        assert!(invitation.invitation_url.contains("oob="));

        let (connection_id, oob_id) = bob.receive_invitation(&invitation.invitation_url).unwrap();
        assert_eq!(connection_id, invitation.connection_id);
        assert_eq!(oob_id, invitation.out_of_band_id);

        let acme2 = acme.clone();
        let bob2 = bob.clone();
        wait_for(move || {
            let complete = |h: &AgentHandle| {
                h.get_connection(connection_id)
                    .map(|c| c.state == ConnectionState::Complete)
                    .unwrap_or(false)
            };
            complete(&acme2) && complete(&bob2)
        })
        .await;

        let record = acme.get_connection(connection_id).unwrap();
        assert_eq!(record.their_label.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn endpoint_cannot_be_registered_twice() {
        let network = InMemoryNetwork::new();
        let ledger = Arc::new(LedgerRegistry::new());
        let config = agent_config("acme", "http://localhost:3112");
        AgentRuntime::start(&config, network.clone(), Arc::clone(&ledger)).unwrap();
        assert!(AgentRuntime::start(&config, network, ledger).is_err());
    }

    #[tokio::test]
    async fn repeated_invitation_receive_keeps_one_record() {
        let (acme, bob, _) = start_pair();
        let invitation = acme.create_invitation().unwrap();

        let first = bob.receive_invitation(&invitation.invitation_url).unwrap();
        let second = bob.receive_invitation(&invitation.invitation_url).unwrap();
        assert_eq!(first, second);
        assert_eq!(bob.list_connections().len(), 1);
    }

    #[tokio::test]
    async fn accept_offer_leaves_record_untouched_when_connection_is_missing() {
        let (_acme, bob, _) = start_pair();
        let record = CredentialExchangeRecord {
            id: Uuid::new_v4(),
            state: CredentialState::OfferReceived,
            connection_id: Uuid::new_v4(),
            protocol_version: ProtocolVersion::V2,
            credential_definition_id: "cd-1".into(),
            attributes: vec![],
            thread_id: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        bob.credentials.write().push(record.clone());

        let err = bob.accept_offer(record.id).unwrap_err();
        assert!(matches!(err, RuntimeError::RecordNotFound(_)));
        assert_eq!(
            bob.get_credential(record.id).unwrap().state,
            CredentialState::OfferReceived
        );
    }

    #[tokio::test]
    async fn accept_request_leaves_record_untouched_when_connection_is_missing() {
        let (_acme, bob, _) = start_pair();
        let record = ProofExchangeRecord {
            id: Uuid::new_v4(),
            state: ProofState::RequestReceived,
            connection_id: Uuid::new_v4(),
            thread_id: Uuid::new_v4(),
            is_verified: None,
            created_at: Utc::now(),
        };
        bob.proofs.write().push(record.clone());

        let err = bob
            .accept_request(
                record.id,
                HeldCredential {
                    credential_definition_id: "cd-1".into(),
                    attributes: vec![],
                },
            )
            .unwrap_err();
        assert!(matches!(err, RuntimeError::RecordNotFound(_)));
        assert_eq!(
            bob.get_proof(record.id).unwrap().state,
            ProofState::RequestReceived
        );
    }

    #[tokio::test]
    async fn offer_rejects_attribute_outside_schema() {
        let (acme, bob, ledger) = start_pair();
        let connection_id = connect(&acme, &bob).await;

        ledger.import_did("did:indy:test:iss").unwrap();
        let schema = ledger
            .register_schema("did:indy:test:iss", "Login", "1.0", vec!["Name".into()])
            .unwrap();
        let cred_def = ledger
            .register_credential_definition(&schema.schema_id, "default")
            .unwrap();

        let err = acme
            .offer_credential(OfferCredentialOptions {
                connection_id,
                credential_definition_id: cred_def.credential_definition_id.clone(),
                protocol_version: ProtocolVersion::V2,
                attributes: vec![CredentialAttribute {
                    name: "Age".into(),
                    value: "30".into(),
                }],
                auto_accept: true,
            })
            .unwrap_err();
        assert!(matches!(err, RuntimeError::SchemaMismatch(_)));
        assert!(acme.list_credentials().is_empty());
    }

    #[tokio::test]
    async fn issuance_flow_reaches_done_and_fills_wallet() {
        let (acme, bob, ledger) = start_pair();
        let connection_id = connect(&acme, &bob).await;

        let schema = ledger
            .register_schema("did:indy:test:iss", "Login", "1.0", vec!["Name".into()])
            .unwrap();
        let cred_def = ledger
            .register_credential_definition(&schema.schema_id, "default")
            .unwrap();

        let offered = acme
            .offer_credential(OfferCredentialOptions {
                connection_id,
                credential_definition_id: cred_def.credential_definition_id.clone(),
                protocol_version: ProtocolVersion::V2,
                attributes: vec![CredentialAttribute {
                    name: "Name".into(),
                    value: "John".into(),
                }],
                auto_accept: true,
            })
            .unwrap();
        assert_eq!(offered.state, CredentialState::OfferSent);

        let bob2 = bob.clone();
        wait_for(move || !bob2.list_credentials().is_empty()).await;
        let holder_record = bob.list_credentials().remove(0);
        assert_eq!(holder_record.state, CredentialState::OfferReceived);
        assert_eq!(holder_record.thread_id, offered.thread_id);

        bob.accept_offer(holder_record.id).unwrap();

        let bob3 = bob.clone();
        let holder_id = holder_record.id;
        wait_for(move || {
            bob3.get_credential(holder_id)
                .map(|c| c.state == CredentialState::Done)
                .unwrap_or(false)
        })
        .await;

        let acme2 = acme.clone();
        let issuer_id = offered.id;
        wait_for(move || {
            acme2
                .get_credential(issuer_id)
                .map(|c| c.state == CredentialState::Done)
                .unwrap_or(false)
        })
        .await;

        let wallet = bob.wallet.read().clone();
        assert_eq!(wallet.len(), 1);
        assert_eq!(wallet[0].attributes[0].value, "John");
    }

    #[tokio::test]
    async fn proof_selection_fails_with_empty_wallet() {
        let (acme, bob, _ledger) = start_pair();
        let connection_id = connect(&acme, &bob).await;

        acme.request_proof(RequestProofOptions {
            connection_id,
            name: "Verify".into(),
            requested_attributes: vec![RequestedAttribute {
                name: "Name".into(),
                credential_definition_id: "cd-1".into(),
            }],
            auto_accept: true,
        })
        .unwrap();

        let bob2 = bob.clone();
        wait_for(move || !bob2.list_proofs().is_empty()).await;
        let holder_proof = bob.list_proofs().remove(0);
        assert_eq!(holder_proof.state, ProofState::RequestReceived);

        let err = bob.select_credentials_for_request(holder_proof.id).unwrap_err();
        assert!(matches!(err, RuntimeError::NoMatchingCredentials(_)));
    }
}
