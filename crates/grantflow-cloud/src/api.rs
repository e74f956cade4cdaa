//! Remote grant API abstraction
//!
//! Bindings (AWS KMS, the in-memory fake used by tests) implement
//! [`GrantApi`]; the controller only ever talks to this trait.

use crate::error::RemoteError;
use crate::paginate::Page;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Remote API for a create-only grant resource
///
/// There is no update call. Grants are created once, listed per key, and
/// revoked.
#[async_trait]
pub trait GrantApi: Send + Sync {
    /// Create a grant; the remote side assigns its identifier
    async fn create_grant(&self, request: &CreateGrantRequest)
    -> Result<CreatedGrant, RemoteError>;

    /// List one page of grants on `key_id`, starting at `marker`
    async fn list_grants(
        &self,
        key_id: &str,
        marker: Option<String>,
        limit: u32,
    ) -> Result<Page<GrantListEntry>, RemoteError>;

    /// Revoke a grant
    async fn revoke_grant(&self, key_id: &str, grant_id: &str) -> Result<(), RemoteError>;
}

/// Wire form of grant constraints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_context_equals: Option<HashMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_context_subset: Option<HashMap<String, String>>,
}

/// Create request sent to the remote API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGrantRequest {
    pub key_id: String,
    pub grantee_principal: String,
    pub operations: Vec<String>,
    pub name: Option<String>,
    pub retiring_principal: Option<String>,
    pub constraints: Option<GrantConstraints>,
    pub grant_tokens: Vec<String>,
}

/// Identifier and token assigned by a successful create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedGrant {
    pub grant_id: String,
    pub grant_token: Option<String>,
}

/// A grant as reported by the listing call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantListEntry {
    pub grant_id: String,
    pub key_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub grantee_principal: String,
    #[serde(default)]
    pub retiring_principal: Option<String>,
    #[serde(default)]
    pub operations: Vec<String>,
    #[serde(default)]
    pub constraints: Option<GrantConstraints>,
}
