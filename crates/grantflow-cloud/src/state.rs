//! State management for managed grants
//!
//! `.grantflow/state.json` records every grant created from a manifest, keyed
//! by its logical name. Grant ids are server-assigned and cannot be recovered
//! from the manifest, so losing this file orphans live grants: saves go
//! through a temporary file and a rename, and a corrupt state file falls back
//! to the previous save.

use crate::error::{GrantError, Result};
use crate::spec::Grant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".grantflow";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const STATE_TMP: &str = "state.json.tmp";
const LOCK_FILE: &str = "lock.json";

/// Age after which a lock left by a crashed run is taken over
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Recorded grants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    /// State file version
    pub version: u32,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Grants indexed by logical name
    pub grants: BTreeMap<String, Grant>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            grants: BTreeMap::new(),
        }
    }
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a grant
    pub fn set_grant(&mut self, name: String, grant: Grant) {
        self.grants.insert(name, grant);
        self.updated_at = Utc::now();
    }

    /// Remove a grant
    pub fn remove_grant(&mut self, name: &str) -> Option<Grant> {
        let result = self.grants.remove(name);
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }

    pub fn get_grant(&self, name: &str) -> Option<&Grant> {
        self.grants.get(name)
    }

    pub fn get_grant_mut(&mut self, name: &str) -> Option<&mut Grant> {
        self.grants.get_mut(name)
    }
}

/// Reads and writes the state of one project directory
pub struct StateManager {
    project_root: PathBuf,
    lock_timeout: Duration,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn path(&self, file: &str) -> PathBuf {
        self.project_root.join(STATE_DIR).join(file)
    }

    /// Load recorded grants
    ///
    /// A missing file is an empty state. A state file that fails to parse is
    /// replaced by the backup of the previous save, if that one parses.
    pub async fn load(&self) -> Result<GlobalState> {
        let path = self.path(STATE_FILE);
        let state = match read_state(&path).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                tracing::debug!("No state file, starting with no recorded grants");
                return Ok(GlobalState::new());
            }
            Err(e) => {
                let backup = self.path(STATE_BACKUP);
                match read_state(&backup).await {
                    Ok(Some(state)) => {
                        tracing::warn!(
                            "State file {} is unreadable ({}), using backup from {}",
                            path.display(),
                            e,
                            state.updated_at
                        );
                        state
                    }
                    _ => {
                        return Err(GrantError::StateError(format!(
                            "{} is unreadable and has no usable backup: {}",
                            path.display(),
                            e
                        )));
                    }
                }
            }
        };

        if state.version > STATE_VERSION {
            return Err(GrantError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!("Loaded {} recorded grants", state.grants.len());
        Ok(state)
    }

    /// Save recorded grants, keeping the previous save as backup
    pub async fn save(&self, state: &GlobalState) -> Result<()> {
        fs::create_dir_all(self.project_root.join(STATE_DIR)).await?;

        let content = serde_json::to_vec_pretty(state)?;
        let tmp = self.path(STATE_TMP);
        fs::write(&tmp, content).await?;

        let path = self.path(STATE_FILE);
        if fs::try_exists(&path).await? {
            fs::rename(&path, self.path(STATE_BACKUP)).await?;
        }
        fs::rename(&tmp, &path).await?;

        tracing::debug!("Saved {} recorded grants", state.grants.len());
        Ok(())
    }

    /// Take the project lock for `command`
    ///
    /// The lock file is created exclusively, so two runs racing for it cannot
    /// both succeed. A lock older than the lock timeout is taken over.
    pub async fn acquire_lock(&self, command: &str) -> Result<StateLock> {
        fs::create_dir_all(self.project_root.join(STATE_DIR)).await?;

        let lock_path = self.path(LOCK_FILE);
        let info = LockInfo {
            holder: lock_holder(),
            command: command.to_string(),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_vec_pretty(&info)?;

        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(&content).await?;
                    file.flush().await?;
                    tracing::debug!("Acquired state lock for {}", command);
                    return Ok(StateLock {
                        lock_path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    self.check_existing_lock(&lock_path).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(GrantError::LockError(format!(
            "Could not take over {}",
            lock_path.display()
        )))
    }

    /// Error if the existing lock is live, remove it if stale
    async fn check_existing_lock(&self, lock_path: &Path) -> Result<()> {
        let existing: LockInfo = serde_json::from_slice(&fs::read(lock_path).await?)
            .map_err(|e| {
                GrantError::LockError(format!(
                    "Unreadable lock {} ({}); remove it if no other run is active",
                    lock_path.display(),
                    e
                ))
            })?;

        let age = Utc::now()
            .signed_duration_since(existing.acquired_at)
            .to_std()
            .unwrap_or_default();
        if age < self.lock_timeout {
            return Err(GrantError::LockError(format!(
                "State is locked by {} running `{}` since {}",
                existing.holder, existing.command, existing.acquired_at
            )));
        }

        tracing::warn!(
            "Taking over stale lock of {} (`{}` since {})",
            existing.holder,
            existing.command,
            existing.acquired_at
        );
        match fs::remove_file(lock_path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

async fn read_state(path: &Path) -> Result<Option<GlobalState>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn lock_holder() -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}:{}", host, std::process::id())
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    /// `<host>:<pid>`
    holder: String,
    command: String,
    acquired_at: DateTime<Utc>,
}

/// Held project lock; removed on release or drop
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => {
                tracing::debug!("Released state lock");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
