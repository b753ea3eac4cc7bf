//! s3-claim-operator - quota-aware S3 user provisioning for Ceph RGW
//!
//! Tenants declare an `S3UserClaim` in their namespace. The operator converges
//! that intent onto a Ceph RGW user (quota, subusers, keys), publishes the
//! credentials as secrets, mirrors the effective state into a cluster-scoped
//! `S3User`, and keeps namespace and team quota usage up to date.
//!
//! # Architecture
//!
//! - Admission webhooks reject claims that would exceed namespace or team
//!   quota before they are persisted
//! - The claim controller runs an ordered, idempotent provisioning workflow,
//!   or a finalizer-gated cleanup workflow once deletion is requested
//! - A companion controller garbage-collects `S3User` objects whose claim is gone
//! - A bucket controller manages `S3Bucket` objects using the claim's admin keys
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (S3UserClaim, S3User, S3Bucket, ClusterResourceQuota)
//! - [`controller`] - Reconciliation logic for claims, users and buckets
//! - [`webhook`] - Validating admission webhooks
//! - [`quota`] - Quota aggregation and usage projection
//! - [`rgw`] - Ceph RGW admin and S3 bucket clients
//! - [`store`] - Kubernetes object store abstraction
//! - [`config`] - Layered operator configuration
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod naming;
pub mod quantity;
pub mod quota;
pub mod retry;
pub mod rgw;
pub mod store;
pub mod telemetry;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Well-known names
// =============================================================================

/// API group shared by all operator CRDs
pub const API_GROUP: &str = "s3.platform.dev";

/// Field manager used for server-side writes
pub const FIELD_MANAGER: &str = "s3-claim-operator";

/// Namespace label naming the team a namespace belongs to
pub const TEAM_LABEL: &str = "platform.dev/team";

/// Label stamped on every secret the operator manages
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Finalizer gating S3UserClaim deletion until the RGW user is removed
pub const CLAIM_FINALIZER: &str = "s3.platform.dev/cleanup-s3userclaim";

/// Finalizer gating S3Bucket deletion until the bucket is removed or retained
pub const BUCKET_FINALIZER: &str = "s3.platform.dev/cleanup-s3bucket";

/// Quota resource name for total object size
pub const RESOURCE_SIZE: &str = "s3/size";

/// Quota resource name for object count
pub const RESOURCE_OBJECTS: &str = "s3/objects";

/// Quota resource name for bucket count
pub const RESOURCE_BUCKETS: &str = "s3/buckets";

/// Secret data key holding the S3 access key
pub const ACCESS_KEY: &str = "accessKey";

/// Secret data key holding the S3 secret key
pub const SECRET_KEY: &str = "secretKey";

/// Default user class served by this operator instance
pub const DEFAULT_S3_USER_CLASS: &str = "ceph-default";

/// Default port for the admission webhook HTTPS server
pub const DEFAULT_WEBHOOK_PORT: u16 = 9443;
