//! REST surface: one route per exchange operation, every response wrapped in
//! the uniform `{statusCode, message, data}` envelope (errors included).

use crate::agent::AgentRegistry;
use crate::config::AppConfig;
use crate::connection::ConnectionOrchestrator;
use crate::convergence::WaitOptions;
use crate::error::ExchangeError;
use crate::issuance::CredentialExchangeOrchestrator;
use crate::ledger::{LedgerRegistry, LedgerService};
use crate::model::{AgentRole, CredentialAttribute};
use crate::records::RecordQueryService;
use crate::verification::ProofExchangeOrchestrator;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub agents: Arc<AgentRegistry>,
    pub connections: ConnectionOrchestrator,
    pub issuance: CredentialExchangeOrchestrator,
    pub verification: ProofExchangeOrchestrator,
    pub records: RecordQueryService,
    pub ledger: LedgerService,
}

/// Wires the full object graph behind the router. One registry, one ledger,
/// shared by every orchestrator; nothing global.
pub fn build_state(config: AppConfig) -> AppState {
    let config = Arc::new(config);
    let ledger = Arc::new(LedgerRegistry::new());
    let agents = Arc::new(AgentRegistry::new(Arc::clone(&ledger)));
    let wait = WaitOptions::from_config(&config.convergence);

    AppState {
        connections: ConnectionOrchestrator::new(Arc::clone(&agents), wait),
        issuance: CredentialExchangeOrchestrator::new(Arc::clone(&agents)),
        verification: ProofExchangeOrchestrator::new(Arc::clone(&agents), Arc::clone(&ledger)),
        records: RecordQueryService::new(Arc::clone(&agents)),
        ledger: LedgerService::new(Arc::clone(&agents), ledger),
        agents,
        config,
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/acme-agent/initialize", get(initialize_acme))
        .route("/bob-agent/initialize", get(initialize_bob))
        .route("/connection/create-invitation", post(create_invitation))
        .route("/connection/receive-invitation-bob", get(receive_invitation))
        .route("/connection/connection-id", get(connection_id_by_oob))
        .route("/connection/connections", get(list_connections))
        .route("/issuance/offer-cred", post(offer_credential))
        .route("/issuance/accept-cred", post(accept_credential))
        .route("/issuance/accept-cred-bob", post(accept_credential_bob))
        .route("/issuance/auto-accept-cred", post(auto_accept_credential))
        .route("/issuance/credentials", get(list_credentials))
        .route("/issuance/bob-credentials", get(list_bob_credentials))
        .route("/verification/request-proof", post(request_proof))
        .route("/verification/accept-present-proof", post(accept_present_proof))
        .route("/verification/verify-proof", post(verify_proof))
        .route("/verification/all-proofrecords", get(list_proof_records))
        .route("/verification/proofrecords-threadId", get(proof_records_by_thread))
        .route("/records/agent-records", get(agent_records))
        .route("/records/recordById", get(record_by_id))
        .route("/records/delete-credential", delete(delete_credential))
        .route("/ledger/register-schema", post(register_schema))
        .route("/ledger/register-cred-def", post(register_cred_def))
        .route("/ledger/import-did", post(import_did))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T> {
    pub status_code: u16,
    pub message: String,
    pub data: T,
}

/// Successful handler reply: status line plus the enveloped payload.
pub struct ApiReply<T> {
    status: StatusCode,
    message: String,
    data: T,
}

impl<T> ApiReply<T> {
    fn new(status: StatusCode, message: impl Into<String>, data: T) -> Self {
        Self {
            status,
            message: message.into(),
            data,
        }
    }

    fn ok(message: impl Into<String>, data: T) -> Self {
        Self::new(StatusCode::OK, message, data)
    }

    fn created(message: impl Into<String>, data: T) -> Self {
        Self::new(StatusCode::CREATED, message, data)
    }

    fn accepted(message: impl Into<String>, data: T) -> Self {
        Self::new(StatusCode::ACCEPTED, message, data)
    }
}

impl<T: Serialize> IntoResponse for ApiReply<T> {
    fn into_response(self) -> Response {
        let envelope = ApiEnvelope {
            status_code: self.status.as_u16(),
            message: self.message,
            data: self.data,
        };
        (self.status, Json(envelope)).into_response()
    }
}

impl IntoResponse for ExchangeError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = ApiEnvelope {
            status_code: status.as_u16(),
            message: self.to_string(),
            data: serde_json::Value::Null,
        };
        (status, Json(envelope)).into_response()
    }
}

type ApiResult<T> = std::result::Result<ApiReply<T>, ExchangeError>;

/// Record ids arrive as strings so a malformed id yields an enveloped 400
/// instead of a bare extractor rejection.
fn parse_id(value: &str, what: &str) -> Result<Uuid, ExchangeError> {
    value
        .parse()
        .map_err(|_| ExchangeError::Validation(format!("Invalid {what}: {value}")))
}

// ---------------------------------------------------------------------------
// Agents

async fn initialize_acme(State(state): State<AppState>) -> ApiResult<impl Serialize> {
    let summary = state
        .agents
        .initialize(AgentRole::Acme, &state.config.acme)
        .await?;
    Ok(ApiReply::ok("Acme agent initialized successfully", summary))
}

async fn initialize_bob(State(state): State<AppState>) -> ApiResult<impl Serialize> {
    let summary = state
        .agents
        .initialize(AgentRole::Bob, &state.config.bob)
        .await?;
    Ok(ApiReply::ok("Bob agent initialized successfully", summary))
}

// ---------------------------------------------------------------------------
// Connections

async fn create_invitation(State(state): State<AppState>) -> ApiResult<impl Serialize> {
    let created = state.connections.create_invitation().await?;
    Ok(ApiReply::created("Invitation created successfully", created))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiveInvitationQuery {
    invitation_url: String,
}

async fn receive_invitation(
    State(state): State<AppState>,
    Query(query): Query<ReceiveInvitationQuery>,
) -> ApiResult<impl Serialize> {
    let accepted = state
        .connections
        .receive_invitation(&query.invitation_url)
        .await?;
    Ok(ApiReply::ok("Invitation accepted successfully", accepted))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OobQuery {
    oob_id: String,
}

async fn connection_id_by_oob(
    State(state): State<AppState>,
    Query(query): Query<OobQuery>,
) -> ApiResult<impl Serialize> {
    let oob_id = parse_id(&query.oob_id, "oobId")?;
    let connection_id = state.connections.get_connection_id_by_oob_id(oob_id).await?;
    Ok(ApiReply::ok(
        "Connection ID retrieved successfully",
        serde_json::json!({ "connectionId": connection_id }),
    ))
}

#[derive(Debug, Deserialize)]
struct AgentQuery {
    agent: String,
}

async fn list_connections(
    State(state): State<AppState>,
    Query(query): Query<AgentQuery>,
) -> ApiResult<impl Serialize> {
    let connections = state.connections.list_connections(&query.agent).await?;
    Ok(ApiReply::ok("Connections retrieved successfully", connections))
}

// ---------------------------------------------------------------------------
// Issuance

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferCredentialRequest {
    protocol_version: String,
    connection_id: String,
    credential_definition_id: String,
    attributes: Vec<CredentialAttribute>,
}

async fn offer_credential(
    State(state): State<AppState>,
    Json(body): Json<OfferCredentialRequest>,
) -> ApiResult<impl Serialize> {
    let connection_id = parse_id(&body.connection_id, "connectionId")?;
    let outcome = state
        .issuance
        .offer(
            connection_id,
            &body.credential_definition_id,
            &body.protocol_version,
            body.attributes,
        )
        .await?;
    Ok(ApiReply::created("Credential offered successfully", outcome))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialRecordIdRequest {
    credential_record_id: String,
}

async fn accept_credential(
    State(state): State<AppState>,
    Json(body): Json<CredentialRecordIdRequest>,
) -> ApiResult<impl Serialize> {
    let record_id = parse_id(&body.credential_record_id, "credentialRecordId")?;
    let outcome = state.issuance.accept(record_id).await?;
    Ok(ApiReply::accepted("Credential offer accepted", outcome))
}

async fn accept_credential_bob(
    State(state): State<AppState>,
    Json(body): Json<CredentialRecordIdRequest>,
) -> ApiResult<impl Serialize> {
    let record_id = parse_id(&body.credential_record_id, "credentialRecordId")?;
    let outcome = state.issuance.accept_by_record_id(record_id).await?;
    Ok(ApiReply::accepted("Credential offer accepted", outcome))
}

async fn auto_accept_credential(State(state): State<AppState>) -> ApiResult<impl Serialize> {
    let outcome = state.issuance.auto_accept().await?;
    Ok(ApiReply::accepted("Credential offer accepted", outcome))
}

async fn list_credentials(
    State(state): State<AppState>,
    Query(query): Query<AgentQuery>,
) -> ApiResult<impl Serialize> {
    let records = state.issuance.list_records(&query.agent).await?;
    Ok(ApiReply::ok("Credential records retrieved successfully", records))
}

async fn list_bob_credentials(State(state): State<AppState>) -> ApiResult<impl Serialize> {
    let records = state.issuance.list_bob_records().await?;
    Ok(ApiReply::ok("Credential records retrieved successfully", records))
}

// ---------------------------------------------------------------------------
// Verification

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestProofBody {
    connection_id: String,
    credential_def_id: String,
}

async fn request_proof(
    State(state): State<AppState>,
    Json(body): Json<RequestProofBody>,
) -> ApiResult<impl Serialize> {
    let connection_id = parse_id(&body.connection_id, "connectionId")?;
    let outcome = state
        .verification
        .request(connection_id, &body.credential_def_id)
        .await?;
    Ok(ApiReply::created("Proof requested successfully", outcome))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProofRecordIdRequest {
    proof_record_id: String,
}

async fn accept_present_proof(
    State(state): State<AppState>,
    Json(body): Json<ProofRecordIdRequest>,
) -> ApiResult<impl Serialize> {
    let record_id = parse_id(&body.proof_record_id, "proofRecordId")?;
    let outcome = state.verification.accept_and_present(record_id).await?;
    Ok(ApiReply::created(
        "Proof request accepted and presentation sent",
        outcome,
    ))
}

async fn verify_proof(
    State(state): State<AppState>,
    Json(body): Json<ProofRecordIdRequest>,
) -> ApiResult<impl Serialize> {
    let record_id = parse_id(&body.proof_record_id, "proofRecordId")?;
    let outcome = state.verification.verify(record_id).await?;
    Ok(ApiReply::ok("Verified the credentials successfully", outcome))
}

async fn list_proof_records(
    State(state): State<AppState>,
    Query(query): Query<AgentQuery>,
) -> ApiResult<impl Serialize> {
    let records = state.verification.list_records(&query.agent).await?;
    Ok(ApiReply::ok("Proof records retrieved successfully", records))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadQuery {
    agent: String,
    thread_id: String,
}

async fn proof_records_by_thread(
    State(state): State<AppState>,
    Query(query): Query<ThreadQuery>,
) -> ApiResult<impl Serialize> {
    let thread_id = parse_id(&query.thread_id, "threadId")?;
    let records = state
        .verification
        .list_by_thread(&query.agent, thread_id)
        .await?;
    Ok(ApiReply::ok("Proof records retrieved successfully", records))
}

// ---------------------------------------------------------------------------
// Records

async fn agent_records(
    State(state): State<AppState>,
    Query(query): Query<AgentQuery>,
) -> ApiResult<impl Serialize> {
    let records = state.records.credential_records(&query.agent).await?;
    Ok(ApiReply::ok("Agent records retrieved successfully", records))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordByIdQuery {
    agent: String,
    cred_id: String,
}

async fn record_by_id(
    State(state): State<AppState>,
    Query(query): Query<RecordByIdQuery>,
) -> ApiResult<impl Serialize> {
    let record_id = parse_id(&query.cred_id, "credId")?;
    let record = state
        .records
        .credential_record_by_id(&query.agent, record_id)
        .await?;
    Ok(ApiReply::ok("Record retrieved successfully", record))
}

async fn delete_credential(
    State(state): State<AppState>,
    Json(body): Json<CredentialRecordIdRequest>,
) -> ApiResult<impl Serialize> {
    let record_id = parse_id(&body.credential_record_id, "credentialRecordId")?;
    state.records.delete_credential(record_id).await?;
    Ok(ApiReply::ok(
        "Credential record deleted successfully",
        serde_json::json!({ "credentialRecordId": record_id }),
    ))
}

// ---------------------------------------------------------------------------
// Ledger

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterSchemaRequest {
    issuer_id: String,
    name: String,
    version: String,
    attr_names: Vec<String>,
}

async fn register_schema(
    State(state): State<AppState>,
    Json(body): Json<RegisterSchemaRequest>,
) -> ApiResult<impl Serialize> {
    let schema = state
        .ledger
        .register_schema(&body.issuer_id, &body.name, &body.version, body.attr_names)
        .await?;
    Ok(ApiReply::created("Schema registered successfully", schema))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterCredDefRequest {
    schema_id: String,
    #[serde(default = "default_cred_def_tag")]
    tag: String,
}

fn default_cred_def_tag() -> String {
    "default".to_string()
}

async fn register_cred_def(
    State(state): State<AppState>,
    Json(body): Json<RegisterCredDefRequest>,
) -> ApiResult<impl Serialize> {
    let cred_def = state
        .ledger
        .register_credential_definition(&body.schema_id, &body.tag)
        .await?;
    Ok(ApiReply::created(
        "Credential definition registered successfully",
        cred_def,
    ))
}

#[derive(Debug, Deserialize)]
struct ImportDidRequest {
    did: String,
}

async fn import_did(
    State(state): State<AppState>,
    Json(body): Json<ImportDidRequest>,
) -> ApiResult<impl Serialize> {
    let did = state.ledger.import_did(&body.did).await?;
    Ok(ApiReply::ok(
        "DID imported successfully",
        serde_json::json!({ "did": did }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_camel_case() {
        let envelope = ApiEnvelope {
            status_code: 201,
            message: "Invitation created successfully".to_string(),
            data: serde_json::json!({ "x": 1 }),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["statusCode"], 201);
        assert_eq!(json["message"], "Invitation created successfully");
        assert_eq!(json["data"]["x"], 1);
    }

    #[test]
    fn malformed_ids_map_to_validation() {
        let err = parse_id("not-a-uuid", "connectionId").unwrap_err();
        assert_eq!(err.http_status(), 400);
        assert!(err.to_string().contains("connectionId"));
    }
}
