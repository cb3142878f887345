//! # vc-exchange
//!
//! Orchestration service coordinating two decentralized-identity agents —
//! "Acme" (issuer/verifier) and "Bob" (holder) — through a three-stage
//! verifiable-credential exchange: pairwise connection establishment over
//! out-of-band invitations, credential issuance, and proof
//! presentation/verification.
//!
//! ## Architecture
//!
//! - **Agent lifecycle** (`agent`): one manager per role owning the exclusive
//!   runtime handle, single-initialization enforced
//! - **Orchestrators** (`connection`, `issuance`, `verification`): sequence
//!   the multi-step asynchronous flows and track record convergence
//! - **Record queries** (`records`): read-only role-scoped access plus the
//!   administrative credential delete
//! - **Agent runtime** (`runtime`): in-process protocol engine the
//!   orchestrators drive, message passing over an in-memory transport
//! - **Ledger** (`ledger`): schema / credential-definition registry the
//!   runtimes resolve during issuance and verification
//! - **REST surface** (`rest`): one axum route per operation, uniform
//!   `{statusCode, message, data}` envelope

pub mod agent;
pub mod config;
pub mod connection;
pub mod convergence;
pub mod error;
pub mod issuance;
pub mod ledger;
pub mod model;
pub mod records;
pub mod rest;
pub mod runtime;
pub mod verification;

pub use agent::{AgentLifecycleManager, AgentRegistry, AgentSummary};
pub use config::AppConfig;
pub use connection::ConnectionOrchestrator;
pub use error::{ExchangeError, Result};
pub use issuance::CredentialExchangeOrchestrator;
pub use ledger::{LedgerRegistry, LedgerService};
pub use model::{AgentRole, ProtocolVersion};
pub use records::RecordQueryService;
pub use runtime::{AgentHandle, InMemoryNetwork};
pub use verification::ProofExchangeOrchestrator;

pub type ConnectionId = uuid::Uuid;
pub type RecordId = uuid::Uuid;
