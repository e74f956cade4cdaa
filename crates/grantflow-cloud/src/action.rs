//! Planned actions for managed grants

use crate::spec::GrantSpec;
use crate::state::GlobalState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Represents a planned action for a grant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Unique identifier for the action
    pub id: String,

    /// Type of action to perform
    pub action_type: ActionType,

    /// Logical grant name (manifest/state key)
    pub name: String,

    /// Description of the action
    pub description: String,

    /// Attributes whose change forces a replacement
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<String>,
}

/// Type of action to perform
///
/// There is no in-place update: a changed grant is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new grant
    Create,
    /// Revoke the existing grant and create it again
    Replace,
    /// Revoke a grant
    Delete,
    /// No changes needed
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Replace => write!(f, "replace"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Difference between a desired spec and the recorded grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    NoChange,
    Create,
    RequiresReplacement { attributes: Vec<&'static str> },
}

impl Change {
    /// Compare a desired spec with what is recorded for it
    pub fn between(desired: &GrantSpec, recorded: Option<&crate::spec::Grant>) -> Self {
        match recorded {
            None => Change::Create,
            Some(grant) if grant.is_absent() => Change::Create,
            Some(grant) => {
                let attributes = grant.spec.changed_attributes(desired);
                if attributes.is_empty() {
                    Change::NoChange
                } else {
                    Change::RequiresReplacement { attributes }
                }
            }
        }
    }
}

/// Result of applying actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Successfully applied actions
    pub succeeded: Vec<ActionResult>,

    /// Failed actions
    pub failed: Vec<ActionResult>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn new() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn add_success(&mut self, action_id: String, message: String) {
        self.succeeded.push(ActionResult {
            action_id,
            success: true,
            message,
            error: None,
        });
    }

    pub fn add_failure(&mut self, action_id: String, error: String) {
        self.failed.push(ActionResult {
            action_id,
            success: false,
            message: String::new(),
            error: Some(error),
        });
    }
}

impl Default for ApplyResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a single action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_id: String,
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
}

/// Plan containing all actions to be applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<Action>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let has_changes = actions.iter().any(|a| a.action_type != ActionType::NoOp);
        Self {
            actions,
            has_changes,
        }
    }

    pub fn empty() -> Self {
        Self {
            actions: Vec::new(),
            has_changes: false,
        }
    }

    /// Diff desired grants against recorded state
    ///
    /// Grants recorded in state but absent from `desired` are deleted.
    pub fn build(desired: &BTreeMap<String, GrantSpec>, state: &GlobalState) -> Self {
        let mut actions = Vec::new();

        for (name, spec) in desired {
            let action = match Change::between(spec, state.get_grant(name)) {
                Change::Create => Action {
                    id: format!("create-{}", name),
                    action_type: ActionType::Create,
                    name: name.clone(),
                    description: format!("Create grant {} on key {}", name, spec.key_id),
                    changed: Vec::new(),
                },
                Change::NoChange => Action {
                    id: format!("noop-{}", name),
                    action_type: ActionType::NoOp,
                    name: name.clone(),
                    description: format!("Grant {} is up to date", name),
                    changed: Vec::new(),
                },
                Change::RequiresReplacement { attributes } => Action {
                    id: format!("replace-{}", name),
                    action_type: ActionType::Replace,
                    name: name.clone(),
                    description: format!(
                        "Replace grant {} ({} changed)",
                        name,
                        attributes.join(", ")
                    ),
                    changed: attributes.into_iter().map(String::from).collect(),
                },
            };
            actions.push(action);
        }

        for (name, grant) in &state.grants {
            if !desired.contains_key(name) {
                actions.push(Action {
                    id: format!("delete-{}", name),
                    action_type: ActionType::Delete,
                    name: name.clone(),
                    description: format!(
                        "Revoke grant {} ({})",
                        name,
                        grant.grant_id.as_deref().unwrap_or("unknown id")
                    ),
                    changed: Vec::new(),
                });
            }
        }

        Self::new(actions)
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            replace: self.actions_by_type(ActionType::Replace).len(),
            delete: self.actions_by_type(ActionType::Delete).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub replace: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to replace, {} to delete, {} unchanged",
            self.create, self.replace, self.delete, self.no_change
        )
    }
}
