use crate::agent::AgentRegistry;
use crate::error::{ExchangeError, Result};
use crate::model::AgentRole;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Ledger-anchored objects the agents resolve during issuance and
/// verification: schemas and the credential definitions binding them to an
/// issuer. Registration happens once, up front, through the peripheral
/// ledger service; after that the registry is read-only for the runtimes.
#[derive(Debug, Default)]
pub struct LedgerRegistry {
    schemas: RwLock<HashMap<String, SchemaRecord>>,
    credential_definitions: RwLock<HashMap<String, CredentialDefinitionRecord>>,
    issuer_dids: RwLock<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaRecord {
    pub schema_id: String,
    pub issuer_id: String,
    pub name: String,
    pub version: String,
    pub attr_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDefinitionRecord {
    pub credential_definition_id: String,
    pub schema_id: String,
    pub issuer_id: String,
    pub tag: String,
}

impl LedgerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_schema(
        &self,
        issuer_id: &str,
        name: &str,
        version: &str,
        attr_names: Vec<String>,
    ) -> Result<SchemaRecord> {
        if attr_names.is_empty() {
            return Err(ExchangeError::BadRequest(
                "Schema must declare at least one attribute".to_string(),
            ));
        }

        let schema_id = format!("{issuer_id}:2:{name}:{version}");
        let record = SchemaRecord {
            schema_id: schema_id.clone(),
            issuer_id: issuer_id.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            attr_names,
        };

        self.schemas.write().insert(schema_id, record.clone());
        Ok(record)
    }

    pub fn register_credential_definition(
        &self,
        schema_id: &str,
        tag: &str,
    ) -> Result<CredentialDefinitionRecord> {
        let schemas = self.schemas.read();
        let schema = schemas.get(schema_id).ok_or_else(|| {
            ExchangeError::BadRequest(format!("Schema not found on ledger: {schema_id}"))
        })?;

        let credential_definition_id =
            format!("{}:3:CL:{}:{tag}", schema.issuer_id, schema.name);
        let record = CredentialDefinitionRecord {
            credential_definition_id: credential_definition_id.clone(),
            schema_id: schema_id.to_string(),
            issuer_id: schema.issuer_id.clone(),
            tag: tag.to_string(),
        };
        drop(schemas);

        self.credential_definitions
            .write()
            .insert(credential_definition_id, record.clone());
        Ok(record)
    }

    pub fn import_did(&self, did: &str) -> Result<()> {
        if did.is_empty() {
            return Err(ExchangeError::BadRequest("DID cannot be empty".to_string()));
        }
        let mut dids = self.issuer_dids.write();
        if !dids.iter().any(|d| d == did) {
            dids.push(did.to_string());
        }
        Ok(())
    }

    pub fn resolve_did(&self, did: &str) -> bool {
        self.issuer_dids.read().iter().any(|d| d == did)
    }

    /// Schema attribute names behind a credential definition, or `None` if
    /// either the definition or its schema is unknown.
    pub fn schema_attributes(&self, credential_definition_id: &str) -> Option<Vec<String>> {
        let defs = self.credential_definitions.read();
        let def = defs.get(credential_definition_id)?;
        let schemas = self.schemas.read();
        schemas.get(&def.schema_id).map(|s| s.attr_names.clone())
    }
}

/// Peripheral ledger service: registration endpoints consumed before the
/// exchange flows run. Requires the Acme agent to be initialized so the
/// registrations are attributable to the issuer.
#[derive(Clone)]
pub struct LedgerService {
    agents: Arc<AgentRegistry>,
    ledger: Arc<LedgerRegistry>,
}

impl LedgerService {
    pub fn new(agents: Arc<AgentRegistry>, ledger: Arc<LedgerRegistry>) -> Self {
        Self { agents, ledger }
    }

    pub async fn register_schema(
        &self,
        issuer_id: &str,
        name: &str,
        version: &str,
        attr_names: Vec<String>,
    ) -> Result<SchemaRecord> {
        self.agents.get_handle(AgentRole::Acme).await?;

        if !self.ledger.resolve_did(issuer_id) {
            return Err(ExchangeError::BadRequest(format!(
                "Cannot resolve issuer DID: {issuer_id}. Please import it first."
            )));
        }

        let record = self
            .ledger
            .register_schema(issuer_id, name, version, attr_names)?;
        info!(schema_id = %record.schema_id, "Schema registered");
        Ok(record)
    }

    pub async fn register_credential_definition(
        &self,
        schema_id: &str,
        tag: &str,
    ) -> Result<CredentialDefinitionRecord> {
        self.agents.get_handle(AgentRole::Acme).await?;

        let record = self.ledger.register_credential_definition(schema_id, tag)?;
        info!(
            credential_definition_id = %record.credential_definition_id,
            "Credential definition registered"
        );
        Ok(record)
    }

    pub async fn import_did(&self, did: &str) -> Result<String> {
        self.agents.get_handle(AgentRole::Acme).await?;

        self.ledger.import_did(did)?;
        info!(%did, "Issuer DID imported");
        Ok(did.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_then_cred_def_registration() {
        let ledger = LedgerRegistry::new();
        let schema = ledger
            .register_schema(
                "did:indy:test:issuer1",
                "CDB_Login",
                "1.0",
                vec!["Name".into(), "Email ID".into()],
            )
            .unwrap();
        assert!(schema.schema_id.contains("CDB_Login"));

        let cred_def = ledger
            .register_credential_definition(&schema.schema_id, "default")
            .unwrap();

        let attrs = ledger
            .schema_attributes(&cred_def.credential_definition_id)
            .unwrap();
        assert_eq!(attrs, vec!["Name".to_string(), "Email ID".to_string()]);
    }

    #[test]
    fn cred_def_requires_registered_schema() {
        let ledger = LedgerRegistry::new();
        let err = ledger
            .register_credential_definition("missing:2:X:1.0", "tag")
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn empty_schema_rejected() {
        let ledger = LedgerRegistry::new();
        assert!(ledger
            .register_schema("did:indy:test:issuer1", "Empty", "1.0", vec![])
            .is_err());
    }

    #[test]
    fn did_import_and_resolve() {
        let ledger = LedgerRegistry::new();
        assert!(!ledger.resolve_did("did:indy:test:abc"));
        ledger.import_did("did:indy:test:abc").unwrap();
        assert!(ledger.resolve_did("did:indy:test:abc"));
    }
}
