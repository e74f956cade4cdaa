//! Convergence controller for create-only grants
//!
//! ```text
//! absent ──create──▶ creating ──await visible──▶ active
//!    ▲                                             │
//!    └──────await gone────── revoking ◀──revoke────┘
//! ```
//!
//! There is no update transition. A changed spec is reported as requiring
//! replacement and is carried out as revoke + create by [`ConvergenceController::apply`].

use crate::action::{ActionType, ApplyResult, Change, Plan};
use crate::api::{GrantApi, GrantListEntry};
use crate::constraint::ConstraintSet;
use crate::error::{ErrorCategory, GrantError, RemoteError, Result, ValidationError};
use crate::paginate::{DEFAULT_PAGE_SIZE, PaginatedFinder};
use crate::retry::{self, Attempt, Backoff, Retry, RetryPolicy};
use crate::spec::{CANONICAL_PRINCIPAL_PREFIX, Grant, GrantSpec, Lifecycle};
use crate::state::GlobalState;
use grantflow_config::{BackoffKind, MAX_PAGE_SIZE, Settings};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// Controller tuning
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub retry: RetryPolicy,
    pub page_size: u32,

    /// Principals without this prefix are remote-internal forms
    pub canonical_prefix: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
            canonical_prefix: CANONICAL_PRINCIPAL_PREFIX.to_string(),
        }
    }
}

impl ControllerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let retry = &settings.retry;
        let backoff = match retry.backoff {
            BackoffKind::Fixed => Backoff::Fixed(Duration::from_millis(retry.initial_delay_ms)),
            BackoffKind::Exponential => Backoff::Exponential {
                initial: Duration::from_millis(retry.initial_delay_ms),
                max: Duration::from_millis(retry.max_delay_ms),
                multiplier: retry.multiplier,
            },
        };

        Self {
            retry: RetryPolicy {
                deadline: Duration::from_secs(retry.deadline_secs),
                backoff,
                jitter: retry.jitter,
                cancel: None,
            },
            page_size: settings.page_size.clamp(1, MAX_PAGE_SIZE),
            canonical_prefix: settings.canonical_principal_prefix.clone(),
        }
    }
}

/// Result of reading a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Found and refreshed
    Present,
    /// Gone remotely; the local record was cleared
    Absent,
}

/// Create failures worth retrying: dependency lag and principal propagation
///
/// Transport failures are not retried since the grant may have been created.
pub fn classify_create_error(err: &RemoteError) -> Retry {
    match err.category {
        ErrorCategory::DependencyTimeout
        | ErrorCategory::Internal
        | ErrorCategory::InvalidReference => Retry::Retryable,
        ErrorCategory::NotFound | ErrorCategory::Transport | ErrorCategory::Other => Retry::Fatal,
    }
}

/// Split an import key `<key-id>:<grant-id>`
///
/// Key ids may be ARNs, so the split happens on the last colon.
pub fn parse_import_key(key: &str) -> std::result::Result<(String, String), ValidationError> {
    match key.rsplit_once(':') {
        Some((key_id, grant_id)) if !key_id.is_empty() && !grant_id.is_empty() => {
            Ok((key_id.to_string(), grant_id.to_string()))
        }
        _ => Err(ValidationError::InvalidImportKey(key.to_string())),
    }
}

fn accepts_principal(prefix: &str, local: &str, remote: &str) -> bool {
    remote.starts_with(prefix) || local.is_empty()
}

/// Drives grants through their lifecycle against a [`GrantApi`]
pub struct ConvergenceController {
    api: Arc<dyn GrantApi>,
    config: ControllerConfig,
}

impl ConvergenceController {
    pub fn new(api: Arc<dyn GrantApi>) -> Self {
        Self::with_config(api, ControllerConfig::default())
    }

    pub fn with_config(api: Arc<dyn GrantApi>, config: ControllerConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    fn finder(&self) -> PaginatedFinder<'_> {
        PaginatedFinder::new(&self.config.retry).with_page_size(self.config.page_size)
    }

    /// Create a grant and wait until it is listed
    pub async fn create(&self, spec: GrantSpec) -> Result<Grant> {
        spec.validate()?;

        let request = spec.to_request();
        tracing::debug!("Adding new KMS grant: {:?}", request);
        tracing::info!("Creating grant on key {}", request.key_id);

        let created = retry::execute_classified(&self.config.retry, classify_create_error, || {
            self.api.create_grant(&request)
        })
        .await
        .map_err(|e| {
            GrantError::from_remote_retry(
                e,
                &format!("Error adding new grant for key {}", request.key_id),
            )
        })?;

        tracing::debug!("Created new KMS grant: {}", created.grant_id);
        let mut grant = Grant {
            grant_id: Some(created.grant_id.clone()),
            grant_token: created.grant_token,
            spec,
            lifecycle: Lifecycle::Creating,
            observed: None,
        };

        let entry = match self.await_visible(grant.key_id(), &created.grant_id).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(
                    "Grant {} was created on key {} but never became visible",
                    created.grant_id,
                    grant.key_id()
                );
                return Err(e);
            }
        };

        self.apply_observed(&mut grant, entry);
        grant.lifecycle = Lifecycle::Active;
        tracing::info!("Grant {} is active", created.grant_id);
        Ok(grant)
    }

    /// Refresh a grant from the remote listing
    ///
    /// A grant that is no longer listed is cleared locally and reported as
    /// [`ReadOutcome::Absent`]; that is not an error.
    pub async fn read(&self, grant: &mut Grant) -> Result<ReadOutcome> {
        let Some(grant_id) = grant.grant_id.clone() else {
            return Ok(ReadOutcome::Absent);
        };

        tracing::debug!("Looking for grant id: {}", grant_id);
        match self.find(grant.key_id(), &grant_id).await {
            Ok(entry) => {
                self.apply_observed(grant, entry);
                if grant.lifecycle != Lifecycle::Revoking {
                    grant.lifecycle = Lifecycle::Active;
                }
                Ok(ReadOutcome::Present)
            }
            Err(GrantError::Missing(_)) => {
                tracing::warn!(
                    "{} grant id not found for key id {}, removing from state",
                    grant_id,
                    grant.key_id()
                );
                grant.clear();
                Ok(ReadOutcome::Absent)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether a grant is currently listed
    pub async fn exists(&self, key_id: &str, grant_id: &str) -> Result<bool> {
        match self.find(key_id, grant_id).await {
            Ok(_) => Ok(true),
            Err(GrantError::Missing(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Revoke a grant and wait until it is no longer listed
    ///
    /// Revoking (rather than retiring) needs no special principal. The revoke
    /// call itself is not retried.
    pub async fn delete(&self, grant: &mut Grant) -> Result<()> {
        let Some(grant_id) = grant.grant_id.clone() else {
            return Ok(());
        };
        let key_id = grant.key_id().to_string();

        tracing::info!("Revoking grant {} on key {}", grant_id, key_id);
        let previous = grant.lifecycle;
        grant.lifecycle = Lifecycle::Revoking;

        match self.api.revoke_grant(&key_id, &grant_id).await {
            Ok(()) => {}
            Err(e) if e.category == ErrorCategory::NotFound => {
                tracing::debug!("Grant {} already gone: {}", grant_id, e);
            }
            Err(e) => {
                grant.lifecycle = previous;
                return Err(GrantError::remote(
                    format!("Error revoking grant {} on key {}", grant_id, key_id),
                    e,
                ));
            }
        }

        tracing::debug!("Checking if grant is revoked: {}", grant_id);
        self.await_gone(&key_id, &grant_id).await?;

        grant.clear();
        Ok(())
    }

    /// Grants cannot be modified; succeed only when nothing changed
    pub fn update(&self, grant: &Grant, desired: &GrantSpec) -> Result<()> {
        match Change::between(desired, Some(grant)) {
            Change::NoChange => Ok(()),
            Change::Create => Err(GrantError::missing(format!(
                "Grant for key {} does not exist and cannot be updated",
                desired.key_id
            ))),
            Change::RequiresReplacement { attributes } => Err(GrantError::RequiresReplacement {
                grant_id: grant.grant_id.clone().unwrap_or_default(),
                attributes,
            }),
        }
    }

    /// Adopt an existing grant from `<key-id>:<grant-id>`
    pub async fn import(&self, import_key: &str) -> Result<Grant> {
        let (key_id, grant_id) = parse_import_key(import_key)?;
        tracing::info!("Importing grant {} on key {}", grant_id, key_id);

        let mut grant = Grant {
            grant_id: Some(grant_id.clone()),
            grant_token: None,
            spec: GrantSpec::new(key_id.clone(), String::new(), Vec::<String>::new()),
            lifecycle: Lifecycle::Active,
            observed: None,
        };

        match self.read(&mut grant).await? {
            ReadOutcome::Present => Ok(grant),
            ReadOutcome::Absent => Err(GrantError::missing(format!(
                "Cannot import non-existent grant {} for key {}",
                grant_id, key_id
            ))),
        }
    }

    /// Poll until the grant is listed
    pub async fn await_visible(&self, key_id: &str, grant_id: &str) -> Result<GrantListEntry> {
        retry::execute(&self.config.retry, move || async move {
            match self.find(key_id, grant_id).await {
                Ok(entry) => Ok(entry),
                Err(e @ GrantError::Missing(_)) => Err(Attempt::Retryable(e)),
                Err(e) => Err(Attempt::Fatal(e)),
            }
        })
        .await
        .map_err(GrantError::from)
    }

    /// Poll until the grant is no longer listed
    pub async fn await_gone(&self, key_id: &str, grant_id: &str) -> Result<()> {
        retry::execute(&self.config.retry, move || async move {
            match self.find(key_id, grant_id).await {
                Err(GrantError::Missing(_)) => Ok(()),
                Ok(entry) => Err(Attempt::Retryable(GrantError::StillPresent {
                    key_id: key_id.to_string(),
                    grant_id: entry.grant_id,
                })),
                Err(e) => Err(Attempt::Fatal(e)),
            }
        })
        .await
        .map_err(GrantError::from)
    }

    async fn find(&self, key_id: &str, grant_id: &str) -> Result<GrantListEntry> {
        self.finder()
            .find_one(
                &format!("grant {} for key id {}", grant_id, key_id),
                |marker, limit| self.api.list_grants(key_id, marker, limit),
                |entry| entry.grant_id == grant_id,
            )
            .await
    }

    /// Record what the remote side reports
    ///
    /// Principals reported in a non-canonical form (e.g. a role's unique id
    /// instead of its ARN) never overwrite the recorded value.
    fn apply_observed(&self, grant: &mut Grant, entry: GrantListEntry) {
        let prefix = self.config.canonical_prefix.as_str();

        if accepts_principal(prefix, &grant.spec.grantee_principal, &entry.grantee_principal) {
            grant.spec.grantee_principal = entry.grantee_principal.clone();
        } else {
            tracing::warn!(
                "Unable to update grantee principal state {} for grant id {} for key id {}",
                entry.grantee_principal,
                entry.grant_id,
                grant.key_id()
            );
        }

        if let Some(remote) = &entry.retiring_principal {
            let local = grant.spec.retiring_principal.as_deref().unwrap_or("");
            if accepts_principal(prefix, local, remote) {
                grant.spec.retiring_principal = Some(remote.clone());
            } else {
                tracing::warn!(
                    "Unable to update retiring principal state {} for grant id {} for key id {}",
                    remote,
                    entry.grant_id,
                    grant.key_id()
                );
            }
        }

        grant.spec.operations = entry.operations.iter().cloned().collect::<BTreeSet<_>>();
        if let Some(name) = entry.name.as_deref().filter(|n| !n.is_empty()) {
            grant.spec.name = Some(name.to_string());
        }
        if let Some(constraints) = &entry.constraints {
            grant.spec.constraints = ConstraintSet::from_wire(constraints);
        }

        grant.observed = Some(entry);
    }

    /// Read every recorded grant, dropping the ones that are gone
    ///
    /// Returns the names removed from state.
    pub async fn refresh(&self, state: &mut GlobalState) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        let names: Vec<String> = state.grants.keys().cloned().collect();

        for name in names {
            let Some(grant) = state.get_grant_mut(&name) else {
                continue;
            };
            if self.read(grant).await? == ReadOutcome::Absent {
                state.remove_grant(&name);
                removed.push(name);
            }
        }

        Ok(removed)
    }

    /// Carry out a plan, recording results in `state`
    pub async fn apply(
        &self,
        plan: &Plan,
        desired: &BTreeMap<String, GrantSpec>,
        state: &mut GlobalState,
    ) -> ApplyResult {
        let mut result = ApplyResult::new();
        let start = std::time::Instant::now();

        for action in &plan.actions {
            let outcome = match action.action_type {
                ActionType::NoOp => continue,
                ActionType::Create => self.create_named(&action.name, desired, state).await,
                ActionType::Replace => match self.delete_named(&action.name, state).await {
                    Ok(()) => self.create_named(&action.name, desired, state).await,
                    Err(e) => Err(e),
                },
                ActionType::Delete => self
                    .delete_named(&action.name, state)
                    .await
                    .map(|()| format!("Revoked grant {}", action.name)),
            };

            match outcome {
                Ok(message) => result.add_success(action.id.clone(), message),
                Err(e) => {
                    tracing::error!("Action {} failed: {}", action.id, e);
                    result.add_failure(action.id.clone(), e.to_string());
                }
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    async fn create_named(
        &self,
        name: &str,
        desired: &BTreeMap<String, GrantSpec>,
        state: &mut GlobalState,
    ) -> Result<String> {
        let spec = desired.get(name).cloned().ok_or_else(|| {
            GrantError::StateError(format!("Grant {} is not in the manifest", name))
        })?;
        let grant = self.create(spec).await?;
        let message = format!(
            "Created grant {} ({})",
            name,
            grant.grant_id.as_deref().unwrap_or_default()
        );
        state.set_grant(name.to_string(), grant);
        Ok(message)
    }

    async fn delete_named(&self, name: &str, state: &mut GlobalState) -> Result<()> {
        if let Some(grant) = state.get_grant_mut(name) {
            self.delete(grant).await?;
        }
        state.remove_grant(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::GrantConstraints;
    use crate::constraint::ConstraintVariant;
    use crate::testing::MemoryGrantApi;
    use tokio::time::Instant;

    const ROLE: &str = "arn:aws:iam::123:role/X";

    fn policy() -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_secs(180), Duration::from_secs(5))
    }

    fn controller(api: &Arc<MemoryGrantApi>) -> ConvergenceController {
        ConvergenceController::with_config(
            api.clone(),
            ControllerConfig {
                retry: policy(),
                ..ControllerConfig::default()
            },
        )
    }

    fn scenario_spec() -> GrantSpec {
        GrantSpec::new("key-1", ROLE, ["Encrypt"]).with_constraints(
            ConstraintSet::new().with(ConstraintVariant::equals([("ctx", "prod")])),
        )
    }

    fn entry(key_id: &str, grant_id: &str) -> GrantListEntry {
        GrantListEntry {
            grant_id: grant_id.to_string(),
            key_id: key_id.to_string(),
            name: Some(String::new()),
            grantee_principal: ROLE.to_string(),
            retiring_principal: None,
            operations: vec!["Decrypt".to_string()],
            constraints: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_waits_until_visible() {
        let api = Arc::new(MemoryGrantApi::new());
        api.assign_next_id("abc123");
        api.hide_new_grants_for(2);
        let controller = controller(&api);
        let start = Instant::now();

        let grant = controller.create(scenario_spec()).await.unwrap();

        assert_eq!(grant.grant_id.as_deref(), Some("abc123"));
        assert_eq!(grant.grant_token.as_deref(), Some("token-abc123"));
        assert_eq!(grant.lifecycle, Lifecycle::Active);
        assert_eq!(grant.spec, scenario_spec());
        // missing, missing, found
        assert_eq!(api.list_calls(), 3);
        assert!(start.elapsed() <= policy().deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_rejects_conflicting_constraints_before_submission() {
        let api = Arc::new(MemoryGrantApi::new());
        let controller = controller(&api);
        let spec = GrantSpec::new("key-1", ROLE, ["Encrypt"]).with_constraints(
            ConstraintSet::new()
                .with(ConstraintVariant::equals([("x", "1")]))
                .with(ConstraintVariant::subset([("y", "2")])),
        );

        let err = controller.create(spec).await.unwrap_err();

        assert!(matches!(
            err,
            GrantError::Validation(ValidationError::ConflictingConstraints { .. })
        ));
        assert_eq!(api.create_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_retries_principal_propagation() {
        let api = Arc::new(MemoryGrantApi::new());
        api.fail_next_create(RemoteError::from_code(
            "InvalidArnException",
            "role not visible yet",
        ));
        api.fail_next_create(RemoteError::from_code("DependencyTimeoutException", "slow"));
        let controller = controller(&api);

        let grant = controller.create(scenario_spec()).await.unwrap();

        assert!(grant.grant_id.is_some());
        assert_eq!(api.create_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_fatal_error_is_not_retried() {
        let api = Arc::new(MemoryGrantApi::new());
        api.fail_next_create(RemoteError::from_code("AccessDeniedException", "denied"));
        let controller = controller(&api);

        let err = controller.create(scenario_spec()).await.unwrap_err();

        match err {
            GrantError::Remote { context, source } => {
                assert!(context.contains("key-1"));
                assert_eq!(source.code, "AccessDeniedException");
            }
            other => panic!("unexpected: {other}"),
        }
        assert_eq!(api.create_calls(), 1);
        assert_eq!(api.list_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_times_out_when_never_visible() {
        let api = Arc::new(MemoryGrantApi::new());
        api.hide_new_grants_for(u32::MAX);
        let controller = ConvergenceController::with_config(
            api.clone(),
            ControllerConfig {
                retry: RetryPolicy::fixed(Duration::from_secs(30), Duration::from_secs(10)),
                ..ControllerConfig::default()
            },
        );

        let err = controller.create(scenario_spec()).await.unwrap_err();

        match err {
            GrantError::DeadlineExceeded { attempts, last, .. } => {
                assert_eq!(attempts, 4);
                assert!(last.is_missing());
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_refreshes_and_keeps_canonical_principal() {
        let api = Arc::new(MemoryGrantApi::new());
        api.seed(GrantListEntry {
            name: Some("app".to_string()),
            constraints: Some(GrantConstraints {
                encryption_context_equals: None,
                encryption_context_subset: Some(
                    [("team".to_string(), "payments".to_string())].into(),
                ),
            }),
            ..entry("key-1", "g1")
        });
        api.alias_grantee("g1", "AROAJYCVIVUZIMTXXXXX");
        let controller = controller(&api);

        let mut grant = Grant {
            grant_id: Some("g1".to_string()),
            grant_token: None,
            spec: GrantSpec::new("key-1", ROLE, ["Encrypt"]),
            lifecycle: Lifecycle::Active,
            observed: None,
        };

        let outcome = controller.read(&mut grant).await.unwrap();

        assert_eq!(outcome, ReadOutcome::Present);
        assert_eq!(grant.spec.grantee_principal, ROLE);
        assert_eq!(grant.spec.name.as_deref(), Some("app"));
        assert!(grant.spec.operations.contains("Decrypt"));
        assert_eq!(grant.spec.constraints.len(), 1);
        assert_eq!(
            grant.observed.as_ref().unwrap().grantee_principal,
            "AROAJYCVIVUZIMTXXXXX"
        );
        assert_eq!(api.list_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_missing_clears_without_error() {
        let api = Arc::new(MemoryGrantApi::new());
        let controller = controller(&api);
        let mut grant = Grant {
            grant_id: Some("gone".to_string()),
            grant_token: Some("t".to_string()),
            spec: scenario_spec(),
            lifecycle: Lifecycle::Active,
            observed: None,
        };

        let outcome = controller.read(&mut grant).await.unwrap();

        assert_eq!(outcome, ReadOutcome::Absent);
        assert!(grant.is_absent());
        assert_eq!(grant.lifecycle, Lifecycle::Absent);
        // single lookup, not retried
        assert_eq!(api.list_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_then_read_is_absent() {
        let api = Arc::new(MemoryGrantApi::new());
        api.linger_revoked_for(2);
        let controller = controller(&api);
        let mut grant = controller.create(scenario_spec()).await.unwrap();
        let grant_id = grant.grant_id.clone().unwrap();

        controller.delete(&mut grant).await.unwrap();

        assert!(grant.is_absent());
        assert_eq!(api.revoke_calls(), 1);
        assert!(!controller.exists("key-1", &grant_id).await.unwrap());

        let mut stale = Grant {
            grant_id: Some(grant_id),
            ..grant.clone()
        };
        assert_eq!(
            controller.read(&mut stale).await.unwrap(),
            ReadOutcome::Absent
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_waits_for_lingering_grant() {
        let api = Arc::new(MemoryGrantApi::new());
        api.seed(entry("key-1", "g1"));
        api.linger_revoked_for(2);
        let controller = controller(&api);
        let mut grant = Grant {
            grant_id: Some("g1".to_string()),
            grant_token: None,
            spec: scenario_spec(),
            lifecycle: Lifecycle::Active,
            observed: None,
        };

        controller.delete(&mut grant).await.unwrap();

        // still found, still found, gone
        assert_eq!(api.list_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_already_absent_succeeds_on_first_poll() {
        let api = Arc::new(MemoryGrantApi::new());
        let controller = controller(&api);
        let mut grant = Grant {
            grant_id: Some("g-missing".to_string()),
            grant_token: None,
            spec: scenario_spec(),
            lifecycle: Lifecycle::Active,
            observed: None,
        };

        controller.delete(&mut grant).await.unwrap();

        assert!(grant.is_absent());
        assert_eq!(api.list_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_revoke_is_fatal() {
        let api = Arc::new(MemoryGrantApi::new());
        api.seed(entry("key-1", "g1"));
        api.fail_next_revoke(RemoteError::from_code("KMSInternalException", "boom"));
        let controller = controller(&api);
        let mut grant = Grant {
            grant_id: Some("g1".to_string()),
            grant_token: None,
            spec: scenario_spec(),
            lifecycle: Lifecycle::Active,
            observed: None,
        };

        let err = controller.delete(&mut grant).await.unwrap_err();

        assert!(matches!(err, GrantError::Remote { .. }));
        assert_eq!(api.revoke_calls(), 1);
        assert_eq!(grant.grant_id.as_deref(), Some("g1"));
        assert_eq!(grant.lifecycle, Lifecycle::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_requires_replacement() {
        let api = Arc::new(MemoryGrantApi::new());
        let controller = controller(&api);
        let grant = controller.create(scenario_spec()).await.unwrap();

        assert!(controller.update(&grant, &scenario_spec()).is_ok());

        let mut desired = scenario_spec();
        desired.operations.insert("Decrypt".to_string());
        match controller.update(&grant, &desired).unwrap_err() {
            GrantError::RequiresReplacement { attributes, .. } => {
                assert_eq!(attributes, vec!["operations"]);
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_import() {
        let api = Arc::new(MemoryGrantApi::new());
        let key_arn = "arn:aws:kms:us-east-1:123456789012:key/1234abcd";
        api.seed(entry(key_arn, "g1"));
        let controller = controller(&api);

        let grant = controller.import(&format!("{}:g1", key_arn)).await.unwrap();

        assert_eq!(grant.grant_id.as_deref(), Some("g1"));
        assert_eq!(grant.key_id(), key_arn);
        assert_eq!(grant.spec.grantee_principal, ROLE);

        let err = controller.import(&format!("{}:nope", key_arn)).await.unwrap_err();
        assert!(err.is_missing());

        assert!(matches!(
            controller.import("no-separator").await,
            Err(GrantError::Validation(ValidationError::InvalidImportKey(_)))
        ));
    }

    #[test]
    fn test_parse_import_key() {
        assert_eq!(
            parse_import_key("key-1:g1").unwrap(),
            ("key-1".to_string(), "g1".to_string())
        );
        assert!(parse_import_key(":g1").is_err());
        assert!(parse_import_key("key-1:").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_plan() {
        let api = Arc::new(MemoryGrantApi::new());
        let controller = controller(&api);
        let mut state = GlobalState::new();

        let mut desired = BTreeMap::new();
        desired.insert("app".to_string(), scenario_spec());
        let plan = Plan::build(&desired, &state);
        let result = controller.apply(&plan, &desired, &mut state).await;
        assert!(result.is_success());
        assert_eq!(api.grant_count("key-1"), 1);
        let first_id = state.get_grant("app").unwrap().grant_id.clone();

        // A changed spec replaces the grant.
        desired.get_mut("app").unwrap().operations.insert("Decrypt".to_string());
        let plan = Plan::build(&desired, &state);
        assert_eq!(plan.summary().replace, 1);
        let result = controller.apply(&plan, &desired, &mut state).await;
        assert!(result.is_success());
        assert_eq!(api.grant_count("key-1"), 1);
        assert_ne!(state.get_grant("app").unwrap().grant_id, first_id);

        // Dropping it from the manifest revokes it.
        desired.clear();
        let plan = Plan::build(&desired, &state);
        let result = controller.apply(&plan, &desired, &mut state).await;
        assert!(result.is_success());
        assert_eq!(api.grant_count("key-1"), 0);
        assert!(state.grants.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_drops_externally_deleted() {
        let api = Arc::new(MemoryGrantApi::new());
        let controller = controller(&api);
        let mut state = GlobalState::new();
        let grant = controller.create(scenario_spec()).await.unwrap();
        let grant_id = grant.grant_id.clone().unwrap();
        state.set_grant("app".to_string(), grant);

        api.remove("key-1", &grant_id);
        let removed = controller.refresh(&mut state).await.unwrap();

        assert_eq!(removed, vec!["app".to_string()]);
        assert!(state.grants.is_empty());
    }

    #[test]
    fn test_config_from_settings() {
        let settings = Settings::default();
        let config = ControllerConfig::from_settings(&settings);
        assert_eq!(config.retry.deadline, Duration::from_secs(180));
        assert_eq!(config.page_size, 100);
        assert_eq!(config.canonical_prefix, "arn:aws");
        assert_eq!(config.retry.backoff, Backoff::default());

        let oversized = Settings {
            page_size: 500,
            ..Settings::default()
        };
        assert_eq!(ControllerConfig::from_settings(&oversized).page_size, 100);
    }
}
