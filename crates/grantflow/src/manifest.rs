//! Grant manifest (`grants.yaml`)
//!
//! ```yaml
//! grants:
//!   app-decrypt:
//!     key_id: alias/app
//!     grantee_principal: arn:aws:iam::123456789012:role/app
//!     operations: [Decrypt]
//!     constraints:
//!       - kind: subset
//!         context:
//!           team: payments
//! ```

use anyhow::Context;
use grantflow_cloud::{GrantSpec, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_MANIFEST: &str = "grants.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub grants: BTreeMap<String, GrantSpec>,
}

impl Manifest {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validation failures per grant name
    pub fn validate(&self) -> Vec<(&str, ValidationError)> {
        self.grants
            .iter()
            .filter_map(|(name, spec)| spec.validate().err().map(|e| (name.as_str(), e)))
            .collect()
    }
}
