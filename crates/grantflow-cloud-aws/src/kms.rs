//! `GrantApi` over the KMS CreateGrant / ListGrants / RevokeGrant calls

use crate::error::{AwsError, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_kms::Client;
use aws_sdk_kms::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kms::types;
use grantflow_cloud::{
    CreateGrantRequest, CreatedGrant, ErrorCategory, GrantApi, GrantConstraints, GrantListEntry,
    Page, RemoteError,
};

/// KMS grant API
#[derive(Debug, Clone)]
pub struct KmsGrantApi {
    client: Client,
}

impl KmsGrantApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the default provider chain
    pub async fn from_env(region: Option<String>, profile: Option<String>) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;

        let Some(region) = config.region() else {
            return Err(AwsError::NoRegion);
        };
        tracing::debug!("Using KMS in region {}", region);

        Ok(Self::new(Client::new(&config)))
    }
}

#[async_trait]
impl GrantApi for KmsGrantApi {
    async fn create_grant(
        &self,
        request: &CreateGrantRequest,
    ) -> std::result::Result<CreatedGrant, RemoteError> {
        let operations = request
            .operations
            .iter()
            .map(|op| types::GrantOperation::from(op.as_str()))
            .collect::<Vec<_>>();

        let output = self
            .client
            .create_grant()
            .key_id(&request.key_id)
            .grantee_principal(&request.grantee_principal)
            .set_operations(Some(operations))
            .set_name(request.name.clone())
            .set_retiring_principal(request.retiring_principal.clone())
            .set_constraints(request.constraints.as_ref().map(to_sdk_constraints))
            .set_grant_tokens(
                (!request.grant_tokens.is_empty()).then(|| request.grant_tokens.clone()),
            )
            .send()
            .await
            .map_err(remote_error)?;

        let grant_id = output.grant_id().ok_or(AwsError::MalformedResponse {
            operation: "CreateGrant",
            field: "GrantId",
        })?;

        Ok(CreatedGrant {
            grant_id: grant_id.to_string(),
            grant_token: output.grant_token().map(str::to_string),
        })
    }

    async fn list_grants(
        &self,
        key_id: &str,
        marker: Option<String>,
        limit: u32,
    ) -> std::result::Result<Page<GrantListEntry>, RemoteError> {
        let output = self
            .client
            .list_grants()
            .key_id(key_id)
            .limit(i32::try_from(limit).unwrap_or(i32::MAX))
            .set_marker(marker)
            .send()
            .await
            .map_err(remote_error)?;

        let items = output
            .grants()
            .iter()
            .filter_map(|entry| from_sdk_entry(key_id, entry))
            .collect();

        Ok(Page {
            items,
            next_cursor: output.next_marker().map(str::to_string),
            truncated: output.truncated(),
        })
    }

    async fn revoke_grant(
        &self,
        key_id: &str,
        grant_id: &str,
    ) -> std::result::Result<(), RemoteError> {
        self.client
            .revoke_grant()
            .key_id(key_id)
            .grant_id(grant_id)
            .send()
            .await
            .map_err(remote_error)?;
        Ok(())
    }
}

fn to_sdk_constraints(constraints: &GrantConstraints) -> types::GrantConstraints {
    types::GrantConstraints::builder()
        .set_encryption_context_equals(constraints.encryption_context_equals.clone())
        .set_encryption_context_subset(constraints.encryption_context_subset.clone())
        .build()
}

fn from_sdk_entry(key_id: &str, entry: &types::GrantListEntry) -> Option<GrantListEntry> {
    // Entries without an id cannot be addressed, so they never match.
    let grant_id = entry.grant_id()?;

    Some(GrantListEntry {
        grant_id: grant_id.to_string(),
        key_id: entry.key_id().unwrap_or(key_id).to_string(),
        name: entry.name().map(str::to_string),
        grantee_principal: entry.grantee_principal().unwrap_or_default().to_string(),
        retiring_principal: entry.retiring_principal().map(str::to_string),
        operations: entry
            .operations()
            .iter()
            .map(|op| op.as_str().to_string())
            .collect(),
        constraints: entry.constraints().map(|c| GrantConstraints {
            encryption_context_equals: c.encryption_context_equals().cloned(),
            encryption_context_subset: c.encryption_context_subset().cloned(),
        }),
    })
}

/// Map an SDK failure onto a categorized [`RemoteError`]
fn remote_error<E, R>(err: SdkError<E, R>) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug + 'static,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => RemoteError::new(
            ErrorCategory::Transport,
            "TransportError",
            DisplayErrorContext(&err).to_string(),
        ),
        _ => {
            let code = err.code().unwrap_or("Unknown").to_string();
            let message = err
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
            RemoteError::from_code(code, message)
        }
    }
}
