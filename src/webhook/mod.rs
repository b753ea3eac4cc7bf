//! Validating Admission Webhooks
//!
//! Served over HTTPS by axum. The API server posts an `AdmissionReview` for
//! every S3UserClaim and S3Bucket write and the handlers answer allow or deny:
//!
//! - `POST /validate-s3userclaim` - quota, class immutability and delete gate
//! - `POST /validate-s3bucket` - owning claim must exist and never changes
//!
//! Every decision is bounded by the validation timeout. Anything that keeps
//! the gate from deciding denies the write with a generic internal error.

pub mod bucket;
pub mod claim;

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use kube::core::admission::{AdmissionRequest, AdmissionResponse};
use kube::Resource;
use tracing::{error, info, warn};

use crate::config::WebhookConfig;
use crate::quota::{Dimension, Scope};
use crate::store::ObjectStore;
use crate::Error;

pub use bucket::BucketAdmissionGate;
pub use claim::AdmissionGate;

/// Message returned for every failure that is not the tenant's fault
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error";

/// Shared state for webhook handlers
pub struct WebhookState {
    /// Object store used for quota and reference lookups
    pub store: Arc<dyn ObjectStore>,
    /// User class assumed for claims that leave it empty
    pub default_class: String,
    /// Upper bound on a single admission decision
    pub validation_timeout: Duration,
}

impl WebhookState {
    /// Create webhook state
    pub fn new(
        store: Arc<dyn ObjectStore>,
        default_class: impl Into<String>,
        validation_timeout: Duration,
    ) -> Self {
        Self {
            store,
            default_class: default_class.into(),
            validation_timeout,
        }
    }
}

/// Error type for the webhook server itself
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// No handler is registered for the path
    #[error("no webhook registered at {0}")]
    UnknownPath(String),

    /// Certificate or key could not be loaded
    #[error("TLS config error: {0}")]
    Tls(String),

    /// The HTTPS server stopped with an error
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::UnknownPath(_) => StatusCode::NOT_FOUND,
            WebhookError::Tls(_) | WebhookError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

/// A single reason a write is refused
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    /// `spec.s3UserClass` changed on update
    ImmutableClass,
    /// A quota quantity could not be parsed
    InvalidQuantity {
        /// Offending field
        field: &'static str,
        /// Parser message
        message: String,
    },
    /// The scope's total would exceed its hard limit
    Exceeded {
        /// Namespace or team
        scope: Scope,
        /// Violated dimension
        dimension: Dimension,
        /// Total including the claim, in base units
        used: i128,
        /// Hard limit, in base units
        limit: i128,
    },
    /// The team has no ClusterResourceQuota
    QuotaNotDefined {
        /// Team resolved from the namespace label
        team: String,
    },
    /// Buckets still reference the claim
    DependentBuckets {
        /// Names of the referencing buckets
        buckets: Vec<String>,
    },
    /// A bucket names a claim that does not exist
    UserRefNotFound {
        /// Referenced claim name
        claim: String,
    },
    /// `spec.s3UserRef` changed on update
    UserRefImmutable,
}

impl Violation {
    /// Field path the violation is reported against
    pub fn field(&self) -> &'static str {
        match self {
            Self::ImmutableClass => "spec.s3UserClass",
            Self::InvalidQuantity { field, .. } => field,
            Self::Exceeded { dimension, .. } => dimension.field_path(),
            Self::QuotaNotDefined { .. } => "spec.quota",
            Self::DependentBuckets { .. } => "metadata.name",
            Self::UserRefNotFound { .. } | Self::UserRefImmutable => "spec.s3UserRef",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = self.field();
        match self {
            Self::ImmutableClass => write!(f, "{field}: Forbidden: s3UserClass is immutable"),
            Self::InvalidQuantity { message, .. } => write!(f, "{field}: Invalid: {message}"),
            Self::Exceeded {
                scope, used, limit, ..
            } => write!(
                f,
                "{field}: Forbidden: exceeded {} (requested total {used}, limit {limit})",
                scope.quota_name()
            ),
            Self::QuotaNotDefined { team } => write!(
                f,
                "{field}: Forbidden: quota not defined for team '{team}', please contact the cloud team"
            ),
            Self::DependentBuckets { buckets } => write!(
                f,
                "{field}: Forbidden: s3UserClaim is still referenced by buckets [{}], delete them first",
                buckets.join(", ")
            ),
            Self::UserRefNotFound { claim } => write!(
                f,
                "{field}: Forbidden: there is no s3UserClaim named '{claim}' in this namespace"
            ),
            Self::UserRefImmutable => write!(f, "{field}: Forbidden: s3UserRef is immutable"),
        }
    }
}

/// Why a write was refused
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Policy violations the tenant can fix
    Denied(Vec<Violation>),
    /// The gate could not reach a decision; the cause is logged, not returned
    Internal(String),
}

impl Rejection {
    /// Message returned to the API server
    pub fn message(&self) -> String {
        match self {
            Self::Denied(violations) => violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
            Self::Internal(_) => INTERNAL_ERROR_MESSAGE.to_string(),
        }
    }
}

impl From<Error> for Rejection {
    fn from(e: Error) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Run a check, turning a missed deadline into an internal rejection
pub(crate) async fn bounded<F>(timeout: Duration, check: F) -> Result<(), Rejection>
where
    F: Future<Output = Result<(), Rejection>>,
{
    tokio::time::timeout(timeout, check)
        .await
        .unwrap_or_else(|_| {
            Err(Rejection::Internal(format!(
                "validation did not finish within {timeout:?}"
            )))
        })
}

/// Build the admission response for a decision
pub(crate) fn respond<K: Resource>(
    req: &AdmissionRequest<K>,
    outcome: Result<(), Rejection>,
) -> AdmissionResponse {
    let response = AdmissionResponse::from(req);
    match outcome {
        Ok(()) => response,
        Err(Rejection::Internal(cause)) => {
            error!(uid = %req.uid, %cause, "validation failed, denying");
            response.deny(INTERNAL_ERROR_MESSAGE)
        }
        Err(rejection) => {
            let message = rejection.message();
            warn!(uid = %req.uid, reason = %message, "write denied");
            response.deny(message)
        }
    }
}

/// Create the webhook router with all validation endpoints
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/validate-s3userclaim", post(claim::validate_handler))
        .route("/validate-s3bucket", post(bucket::validate_handler))
        .fallback(|uri: Uri| async move { WebhookError::UnknownPath(uri.path().to_string()) })
        .with_state(state)
}

/// Serve the webhooks over HTTPS until the server stops
pub async fn serve(config: &WebhookConfig, state: Arc<WebhookState>) -> Result<(), WebhookError> {
    let tls_config = RustlsConfig::from_pem_file(&config.cert_path, &config.key_path)
        .await
        .map_err(|e| {
            WebhookError::Tls(format!(
                "loading {} / {}: {e}",
                config.cert_path.display(),
                config.key_path.display()
            ))
        })?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "starting admission webhook server");

    axum_server::bind_rustls(addr, tls_config)
        .serve(webhook_router(state).into_make_service())
        .await?;
    Ok(())
}
