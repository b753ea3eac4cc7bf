//! Custom Resource Definitions for the S3 claim operator
//!
//! `S3UserClaim`, `S3User` and `S3Bucket` are owned by this operator.
//! `ClusterResourceQuota` is an external OpenShift type the operator reads
//! team limits from and reports usage to.

mod bucket;
mod claim;
mod quota;
mod types;
mod user;

pub use bucket::{S3Bucket, S3BucketSpec, S3BucketStatus};
pub use claim::{S3UserClaim, S3UserClaimSpec, S3UserClaimStatus};
pub use quota::{
    ClusterResourceQuota, ClusterResourceQuotaSelector, ClusterResourceQuotaSpec,
    ClusterResourceQuotaStatus, ResourceQuotaStatusByNamespace,
};
pub use types::{BucketAccess, DeletionPolicy, SubuserBinding, UserQuota};
pub use user::{S3User, S3UserSpec};
