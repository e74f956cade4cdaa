//! AWS KMS binding for grantflow
//!
//! Implements [`grantflow_cloud::GrantApi`] with `aws-sdk-kms`. Credentials
//! and region resolve through the standard AWS provider chain, optionally
//! pinned by the `aws` section of the settings file.

pub mod error;
pub mod kms;

pub use error::{AwsError, Result};
pub use kms::KmsGrantApi;
