//! Error types for the S3 claim operator

use thiserror::Error;

use crate::rgw::RgwError;

/// Main error type for operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Ceph RGW admin or S3 API error
    #[error("rgw error: {0}")]
    Rgw(#[from] RgwError),

    /// Input that cannot be acted upon until an operator fixes it
    #[error("validation error: {0}")]
    Validation(String),

    /// Malformed resource quantity
    #[error("invalid quantity: {0}")]
    Quantity(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend did not report a key for a user or subuser
    #[error("missing key: {0}")]
    MissingKey(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation exceeded its deadline
    #[error("timed out: {0}")]
    Timeout(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a quantity error with the given message
    pub fn quantity(msg: impl Into<String>) -> Self {
        Self::Quantity(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a missing key error for the given user or subuser id
    pub fn missing_key(id: impl Into<String>) -> Self {
        Self::MissingKey(id.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a timeout error with the given message
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Returns true if this is an optimistic-concurrency conflict (HTTP 409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }

    /// Returns true if the API server reported the object as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 404)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
