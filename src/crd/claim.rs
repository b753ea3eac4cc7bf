//! S3UserClaim Custom Resource Definition
//!
//! A tenant-owned request for an RGW user with a quota, a set of subusers and
//! two credential secrets (admin and read-only).

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::UserQuota;
use crate::naming::{self, CephIdentity, READONLY_SUBUSER};

/// Specification for an S3UserClaim
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "s3.platform.dev",
    version = "v1alpha1",
    kind = "S3UserClaim",
    plural = "s3userclaims",
    shortname = "s3uc",
    status = "S3UserClaimStatus",
    namespaced,
    printcolumn = r#"{"name":"Class","type":"string","jsonPath":".spec.s3UserClass"}"#,
    printcolumn = r#"{"name":"User","type":"string","jsonPath":".status.s3UserName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct S3UserClaimSpec {
    /// User class selecting which operator instance serves this claim.
    /// Empty means the operator's default class. Immutable.
    #[serde(default)]
    pub s3_user_class: String,

    /// Name of the secret receiving the read-only subuser's keys
    pub readonly_secret: String,

    /// Name of the secret receiving the user's own keys
    pub admin_secret: String,

    /// Requested quota
    #[serde(default)]
    pub quota: UserQuota,

    /// Extra subusers to create (short names)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_users: Vec<String>,
}

/// Status for an S3UserClaim
///
/// Every field is always serialized so a merge patch fully replaces it.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3UserClaimStatus {
    /// Quota applied to the RGW user
    #[serde(default)]
    pub quota: Option<UserQuota>,

    /// Name of the S3User mirroring this claim
    #[serde(default)]
    pub s3_user_name: Option<String>,

    /// Subusers currently provisioned (short names)
    #[serde(default)]
    pub sub_users: Vec<String>,
}

impl S3UserClaimStatus {
    /// Compare by quantity value instead of string spelling
    pub fn semantically_eq(&self, other: &S3UserClaimStatus) -> bool {
        let quota_eq = match (&self.quota, &other.quota) {
            (Some(a), Some(b)) => a.semantically_eq(b),
            (None, None) => true,
            _ => false,
        };
        quota_eq && self.s3_user_name == other.s3_user_name && self.sub_users == other.sub_users
    }
}

impl S3UserClaim {
    /// Namespace of the claim (empty if unset, which the API server never allows)
    pub fn namespace_or_default(&self) -> String {
        self.namespace().unwrap_or_default()
    }

    /// Effective user class, substituting the default for an empty field
    pub fn user_class<'a>(&'a self, default: &'a str) -> &'a str {
        if self.spec.s3_user_class.is_empty() {
            default
        } else {
            &self.spec.s3_user_class
        }
    }

    /// RGW identity for this claim on the given cluster
    pub fn ceph_identity(&self, cluster: &str) -> CephIdentity {
        CephIdentity::new(cluster, &self.namespace_or_default(), &self.name_any())
    }

    /// Name of the S3User mirroring this claim
    pub fn s3_user_name(&self) -> String {
        naming::s3_user_name(&self.namespace_or_default(), &self.name_any())
    }

    /// Desired subuser short names including the implicit read-only one
    ///
    /// Sorted and deduplicated.
    pub fn desired_subusers(&self) -> Vec<String> {
        let mut subusers: Vec<String> = self.spec.sub_users.clone();
        subusers.push(READONLY_SUBUSER.to_string());
        subusers.sort();
        subusers.dedup();
        subusers
    }

    /// Returns true once deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Returns true if the claim carries the given finalizer
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }
}
