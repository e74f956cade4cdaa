//! Desired grant specification and the managed grant entity

use crate::api::{CreateGrantRequest, GrantListEntry};
use crate::constraint::{self, ConstraintSet};
use crate::error::ValidationError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Prefix of a canonical principal; anything else is a remote-internal form
pub const CANONICAL_PRINCIPAL_PREFIX: &str = "arn:aws";

/// Operations a KMS grant may permit
pub const GRANT_OPERATIONS: &[&str] = &[
    "Decrypt",
    "Encrypt",
    "GenerateDataKey",
    "GenerateDataKeyWithoutPlaintext",
    "ReEncryptFrom",
    "ReEncryptTo",
    "Sign",
    "Verify",
    "GetPublicKey",
    "CreateGrant",
    "RetireGrant",
    "DescribeKey",
    "GenerateDataKeyPair",
    "GenerateDataKeyPairWithoutPlaintext",
    "GenerateMac",
    "VerifyMac",
    "DeriveSharedSecret",
];

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9:/_-]+$").expect("valid grant name pattern"));

static ARN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:[\w-]+:[a-zA-Z0-9-]+:[a-z0-9-]*:\d*:.+$").expect("valid ARN pattern")
});

/// Immutable creation parameters of a grant
///
/// There is no update API, so a change to any field means the grant is
/// revoked and created again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Target key id or ARN
    pub key_id: String,

    pub grantee_principal: String,

    pub operations: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "ConstraintSet::is_empty")]
    pub constraints: ConstraintSet,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retiring_principal: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub grant_creation_tokens: BTreeSet<String>,
}

impl GrantSpec {
    pub fn new(
        key_id: impl Into<String>,
        grantee_principal: impl Into<String>,
        operations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: None,
            key_id: key_id.into(),
            grantee_principal: grantee_principal.into(),
            operations: operations.into_iter().map(Into::into).collect(),
            constraints: ConstraintSet::new(),
            retiring_principal: None,
            grant_creation_tokens: BTreeSet::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_constraints(mut self, constraints: ConstraintSet) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_retiring_principal(mut self, principal: impl Into<String>) -> Self {
        self.retiring_principal = Some(principal.into());
        self
    }

    pub fn with_grant_token(mut self, token: impl Into<String>) -> Self {
        self.grant_creation_tokens.insert(token.into());
        self
    }

    /// Check every field before anything is sent to the remote API
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            if name.is_empty() || name.len() > 256 || !NAME_RE.is_match(name) {
                return Err(ValidationError::InvalidName(name.clone()));
            }
        }

        if self.key_id.is_empty() {
            return Err(ValidationError::Empty("key_id"));
        }

        validate_arn("grantee_principal", &self.grantee_principal)?;
        if let Some(retiring) = &self.retiring_principal {
            validate_arn("retiring_principal", retiring)?;
        }

        if self.operations.is_empty() {
            return Err(ValidationError::NoOperations);
        }
        if let Some(unknown) = self
            .operations
            .iter()
            .find(|op| !GRANT_OPERATIONS.contains(&op.as_str()))
        {
            return Err(ValidationError::UnknownOperation(unknown.clone()));
        }

        constraint::validate(&self.constraints)
    }

    /// Build the create request
    pub fn to_request(&self) -> CreateGrantRequest {
        CreateGrantRequest {
            key_id: self.key_id.clone(),
            grantee_principal: self.grantee_principal.clone(),
            operations: self.operations.iter().cloned().collect(),
            name: self.name.clone(),
            retiring_principal: self.retiring_principal.clone(),
            constraints: self.constraints.to_wire(),
            grant_tokens: self.grant_creation_tokens.iter().cloned().collect(),
        }
    }

    /// Attributes that differ between `self` and `other`
    ///
    /// Constraint sets compare by fingerprint, so map ordering never counts.
    pub fn changed_attributes(&self, other: &GrantSpec) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.name != other.name {
            changed.push("name");
        }
        if self.key_id != other.key_id {
            changed.push("key_id");
        }
        if self.grantee_principal != other.grantee_principal {
            changed.push("grantee_principal");
        }
        if self.operations != other.operations {
            changed.push("operations");
        }
        if self.constraints.fingerprint() != other.constraints.fingerprint() {
            changed.push("constraints");
        }
        if self.retiring_principal != other.retiring_principal {
            changed.push("retiring_principal");
        }
        if self.grant_creation_tokens != other.grant_creation_tokens {
            changed.push("grant_creation_tokens");
        }
        changed
    }
}

fn validate_arn(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if ARN_RE.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidArn {
            field,
            value: value.to_string(),
        })
    }
}

/// Lifecycle of a managed grant; there is deliberately no updating state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Absent,
    Creating,
    Active,
    Revoking,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lifecycle::Absent => write!(f, "absent"),
            Lifecycle::Creating => write!(f, "creating"),
            Lifecycle::Active => write!(f, "active"),
            Lifecycle::Revoking => write!(f, "revoking"),
        }
    }
}

/// A managed grant
///
/// `spec` is the recorded configuration, refreshed from the remote side on
/// read. `observed` keeps the raw last-read listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    /// Server-assigned identifier; `None` while absent
    pub grant_id: Option<String>,

    pub grant_token: Option<String>,

    pub spec: GrantSpec,

    pub lifecycle: Lifecycle,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<GrantListEntry>,
}

impl Grant {
    pub fn absent(spec: GrantSpec) -> Self {
        Self {
            grant_id: None,
            grant_token: None,
            spec,
            lifecycle: Lifecycle::Absent,
            observed: None,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.spec.key_id
    }

    pub fn is_absent(&self) -> bool {
        self.grant_id.is_none()
    }

    /// Forget the remote grant, keeping the recorded configuration
    pub fn clear(&mut self) {
        self.grant_id = None;
        self.grant_token = None;
        self.observed = None;
        self.lifecycle = Lifecycle::Absent;
    }
}
