//! # Iteration Credentials
//!
//! Tokens generated fresh for each matrix iteration. A `CredentialSet` is moved into
//! the iteration that created it and dropped with it; nothing here is persisted.

use std::fmt;
use uuid::Uuid;

#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSet {
    /// Backend management token, used by the harness itself
    root_token: String,
    /// Backend agent token, handed to the orchestrator
    agent_token: String,
    /// Active CA root reported by the backend once Connect is ready
    ca_root_id: Option<String>,
}

impl CredentialSet {
    pub fn generate() -> Self {
        Self {
            root_token: Uuid::new_v4().to_string(),
            agent_token: Uuid::new_v4().to_string(),
            ca_root_id: None,
        }
    }

    pub fn root_token(&self) -> &str {
        &self.root_token
    }

    pub fn agent_token(&self) -> &str {
        &self.agent_token
    }

    pub fn ca_root_id(&self) -> Option<&str> {
        self.ca_root_id.as_deref()
    }

    pub fn set_ca_root(&mut self, root_id: impl Into<String>) {
        self.ca_root_id = Some(root_id.into());
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("root_token", &mask(&self.root_token))
            .field("agent_token", &mask(&self.agent_token))
            .field("ca_root_id", &self.ca_root_id)
            .finish()
    }
}

/// Keep the first and last two characters for correlation in logs
pub fn mask(secret: &str) -> String {
    if secret.is_empty() {
        "[EMPTY]".to_string()
    } else if secret.len() > 4 && secret.is_ascii() {
        format!("[MASKED: {}***{}]", &secret[..2], &secret[secret.len() - 2..])
    } else {
        "[MASKED]".to_string()
    }
}
