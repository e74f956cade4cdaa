use grantflow_cloud::{ErrorCategory, RemoteError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AwsError {
    #[error("No AWS region configured (set AWS_REGION or aws.region in settings)")]
    NoRegion,

    #[error("Malformed {operation} response: missing {field}")]
    MalformedResponse {
        operation: &'static str,
        field: &'static str,
    },
}

impl From<AwsError> for RemoteError {
    fn from(err: AwsError) -> Self {
        RemoteError::new(ErrorCategory::Other, "MalformedResponse", err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AwsError>;
