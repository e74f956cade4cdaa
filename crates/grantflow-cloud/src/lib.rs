//! Grantflow engine
//!
//! Converges create-only KMS grants: every grant is created once, observed
//! through a paginated listing that is only eventually consistent, and
//! revoked. Nothing is ever updated in place.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  grant CLI                       │
//! │          (plan / apply / read / destroy)         │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                grantflow-cloud                   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │         ConvergenceController             │   │
//! │  └──────┬───────────────┬───────────────────┘   │
//! │  ┌──────▼──────┐ ┌──────▼───────┐ ┌─────────┐   │
//! │  │  retry      │ │  paginate    │ │  state  │   │
//! │  └─────────────┘ └──────────────┘ └─────────┘   │
//! │  ┌─────────────┐ ┌──────────────┐               │
//! │  │ constraint  │ │    hash      │               │
//! │  └─────────────┘ └──────────────┘               │
//! │           trait GrantApi { ... }                 │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//!           ┌───────▼────────┐
//!           │ grantflow-     │
//!           │ cloud-aws (KMS)│
//!           └────────────────┘
//! ```

pub mod action;
pub mod api;
pub mod constraint;
pub mod controller;
pub mod error;
pub mod hash;
pub mod paginate;
pub mod retry;
pub mod spec;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports
pub use action::{Action, ActionType, ApplyResult, Change, Plan, PlanSummary};
pub use api::{CreateGrantRequest, CreatedGrant, GrantApi, GrantConstraints, GrantListEntry};
pub use constraint::{ConstraintKind, ConstraintSet, ConstraintVariant};
pub use controller::{ControllerConfig, ConvergenceController, ReadOutcome, parse_import_key};
pub use error::{ErrorCategory, GrantError, RemoteError, Result, ValidationError};
pub use hash::Fingerprint;
pub use paginate::{Page, PaginatedFinder};
pub use retry::{Backoff, CancellationToken, RetryPolicy};
pub use spec::{Grant, GrantSpec, Lifecycle};
pub use state::{GlobalState, StateLock, StateManager};
