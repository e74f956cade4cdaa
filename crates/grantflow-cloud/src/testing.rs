//! In-memory [`GrantApi`] for tests
//!
//! Simulates the eventual consistency of a real grant API: new grants can be
//! hidden from listings for a number of polls, and revoked grants can linger.

use crate::api::{CreateGrantRequest, CreatedGrant, GrantApi, GrantListEntry};
use crate::error::RemoteError;
use crate::paginate::Page;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    grants: BTreeMap<String, Vec<GrantListEntry>>,
    assigned_ids: VecDeque<String>,
    next_id: u64,
    hide_new_for: u32,
    linger_revoked_for: u32,
    hidden: HashMap<String, u32>,
    lingering: HashMap<String, (GrantListEntry, u32)>,
    principal_aliases: HashMap<String, String>,
    create_failures: VecDeque<RemoteError>,
    list_failures: VecDeque<RemoteError>,
    revoke_failures: VecDeque<RemoteError>,
    create_calls: u32,
    list_calls: u32,
    revoke_calls: u32,
}

/// In-memory grant API
#[derive(Default)]
pub struct MemoryGrantApi {
    inner: Mutex<Inner>,
}

impl MemoryGrantApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an existing grant
    pub fn seed(&self, entry: GrantListEntry) {
        self.lock()
            .grants
            .entry(entry.key_id.clone())
            .or_default()
            .push(entry);
    }

    /// Identifier handed out by the next create
    pub fn assign_next_id(&self, grant_id: impl Into<String>) {
        self.lock().assigned_ids.push_back(grant_id.into());
    }

    /// Hide newly created grants from the next `polls` listings of their key
    pub fn hide_new_grants_for(&self, polls: u32) {
        self.lock().hide_new_for = polls;
    }

    /// Keep revoked grants listed for `polls` more listings of their key
    pub fn linger_revoked_for(&self, polls: u32) {
        self.lock().linger_revoked_for = polls;
    }

    /// Report `alias` instead of the grantee principal of `grant_id`
    pub fn alias_grantee(&self, grant_id: impl Into<String>, alias: impl Into<String>) {
        self.lock()
            .principal_aliases
            .insert(grant_id.into(), alias.into());
    }

    pub fn fail_next_create(&self, err: RemoteError) {
        self.lock().create_failures.push_back(err);
    }

    pub fn fail_next_list(&self, err: RemoteError) {
        self.lock().list_failures.push_back(err);
    }

    pub fn fail_next_revoke(&self, err: RemoteError) {
        self.lock().revoke_failures.push_back(err);
    }

    /// Remove a grant behind the controller's back
    pub fn remove(&self, key_id: &str, grant_id: &str) {
        if let Some(grants) = self.lock().grants.get_mut(key_id) {
            grants.retain(|g| g.grant_id != grant_id);
        }
    }

    pub fn grant_count(&self, key_id: &str) -> usize {
        self.lock().grants.get(key_id).map_or(0, Vec::len)
    }

    pub fn create_calls(&self) -> u32 {
        self.lock().create_calls
    }

    pub fn list_calls(&self) -> u32 {
        self.lock().list_calls
    }

    pub fn revoke_calls(&self) -> u32 {
        self.lock().revoke_calls
    }
}

#[async_trait]
impl GrantApi for MemoryGrantApi {
    async fn create_grant(
        &self,
        request: &CreateGrantRequest,
    ) -> Result<CreatedGrant, RemoteError> {
        let mut inner = self.lock();
        inner.create_calls += 1;
        if let Some(err) = inner.create_failures.pop_front() {
            return Err(err);
        }

        let grant_id = match inner.assigned_ids.pop_front() {
            Some(id) => id,
            None => {
                inner.next_id += 1;
                format!("grant-{:04}", inner.next_id)
            }
        };

        let entry = GrantListEntry {
            grant_id: grant_id.clone(),
            key_id: request.key_id.clone(),
            name: Some(request.name.clone().unwrap_or_default()),
            grantee_principal: request.grantee_principal.clone(),
            retiring_principal: request.retiring_principal.clone(),
            operations: request.operations.clone(),
            constraints: request.constraints.clone(),
        };
        inner
            .grants
            .entry(request.key_id.clone())
            .or_default()
            .push(entry);

        if inner.hide_new_for > 0 {
            let polls = inner.hide_new_for;
            inner.hidden.insert(grant_id.clone(), polls);
        }

        Ok(CreatedGrant {
            grant_token: Some(format!("token-{}", grant_id)),
            grant_id,
        })
    }

    async fn list_grants(
        &self,
        key_id: &str,
        marker: Option<String>,
        limit: u32,
    ) -> Result<Page<GrantListEntry>, RemoteError> {
        let mut inner = self.lock();
        inner.list_calls += 1;
        if let Some(err) = inner.list_failures.pop_front() {
            return Err(err);
        }

        let mut visible: Vec<GrantListEntry> = inner
            .grants
            .get(key_id)
            .into_iter()
            .flatten()
            .filter(|g| !inner.hidden.contains_key(&g.grant_id))
            .cloned()
            .collect();
        visible.extend(
            inner
                .lingering
                .values()
                .filter(|(g, _)| g.key_id == key_id)
                .map(|(g, _)| g.clone()),
        );
        for entry in &mut visible {
            if let Some(alias) = inner.principal_aliases.get(&entry.grant_id) {
                entry.grantee_principal = alias.clone();
            }
        }

        // Eventual consistency counts whole polls, not pages.
        if marker.is_none() {
            let key_grants: Vec<String> = inner
                .grants
                .get(key_id)
                .into_iter()
                .flatten()
                .map(|g| g.grant_id.clone())
                .collect();
            inner.hidden.retain(|id, polls| {
                if key_grants.contains(id) {
                    *polls -= 1;
                }
                *polls > 0
            });
            inner.lingering.retain(|_, (g, polls)| {
                if g.key_id == key_id {
                    *polls -= 1;
                }
                *polls > 0
            });
        }

        let start: usize = marker.as_deref().and_then(|m| m.parse().ok()).unwrap_or(0);
        let end = (start + limit as usize).min(visible.len());
        let items = visible.get(start..end).map(<[_]>::to_vec).unwrap_or_default();

        if end < visible.len() {
            Ok(Page::more(items, end.to_string()))
        } else {
            Ok(Page::last(items))
        }
    }

    async fn revoke_grant(&self, key_id: &str, grant_id: &str) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.revoke_calls += 1;
        if let Some(err) = inner.revoke_failures.pop_front() {
            return Err(err);
        }

        let removed = inner.grants.get_mut(key_id).and_then(|grants| {
            let index = grants.iter().position(|g| g.grant_id == grant_id)?;
            Some(grants.remove(index))
        });

        match removed {
            Some(entry) => {
                if inner.linger_revoked_for > 0 {
                    let polls = inner.linger_revoked_for;
                    inner.lingering.insert(grant_id.to_string(), (entry, polls));
                }
                Ok(())
            }
            None => Err(RemoteError::from_code(
                "NotFoundException",
                format!("Grant {} not found for key {}", grant_id, key_id),
            )),
        }
    }
}
