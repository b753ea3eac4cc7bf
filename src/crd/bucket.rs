//! S3Bucket Custom Resource Definition
//!
//! A bucket owned by the RGW user of the claim named in `s3UserRef`.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{DeletionPolicy, SubuserBinding};

/// Specification for an S3Bucket
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "s3.platform.dev",
    version = "v1alpha1",
    kind = "S3Bucket",
    plural = "s3buckets",
    shortname = "s3b",
    status = "S3BucketStatus",
    namespaced,
    printcolumn = r#"{"name":"User","type":"string","jsonPath":".spec.s3UserRef"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct S3BucketSpec {
    /// Name of the S3UserClaim (same namespace) owning this bucket. Immutable.
    pub s3_user_ref: String,

    /// Whether the RGW bucket is deleted along with this object
    #[serde(default)]
    pub s3_deletion_policy: DeletionPolicy,

    /// Subuser access grants written into the bucket policy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub s3_subuser_binding: Vec<SubuserBinding>,
}

/// Status for an S3Bucket
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3BucketStatus {
    /// True once the bucket exists with the desired policy
    #[serde(default)]
    pub ready: bool,

    /// Last failure reported by the backend
    #[serde(default)]
    pub reason: Option<String>,
}

impl S3Bucket {
    /// Returns true once deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Returns true if the bucket carries the given finalizer
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }
}
