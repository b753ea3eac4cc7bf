//! S3User Custom Resource Definition
//!
//! Cluster-scoped, operator-owned mirror of a claim's effective RGW user.
//! Named `{namespace}.{claim}` and linked back to the claim through `claimRef`.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::claim::S3UserClaim;
use super::types::UserQuota;

/// Specification for an S3User
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "s3.platform.dev",
    version = "v1alpha1",
    kind = "S3User",
    plural = "s3users",
    shortname = "s3u",
    printcolumn = r#"{"name":"Class","type":"string","jsonPath":".spec.s3UserClass"}"#,
    printcolumn = r#"{"name":"Claim","type":"string","jsonPath":".spec.claimRef.name"}"#,
    printcolumn = r#"{"name":"Namespace","type":"string","jsonPath":".spec.claimRef.namespace"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct S3UserSpec {
    /// User class of the owning claim
    #[serde(default)]
    pub s3_user_class: String,

    /// Quota applied to the RGW user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<UserQuota>,

    /// Claim this user was resolved from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_ref: Option<ObjectReference>,
}

impl S3UserSpec {
    /// Build the desired spec for a claim
    pub fn for_claim(claim: &S3UserClaim, class: &str) -> Self {
        Self {
            s3_user_class: class.to_string(),
            quota: Some(claim.spec.quota.clone()),
            claim_ref: Some(ObjectReference {
                api_version: Some("s3.platform.dev/v1alpha1".to_string()),
                kind: Some("S3UserClaim".to_string()),
                name: Some(claim.name_any()),
                namespace: claim.namespace(),
                uid: claim.uid(),
                ..Default::default()
            }),
        }
    }

    /// Compare by quantity value instead of string spelling
    pub fn semantically_eq(&self, other: &S3UserSpec) -> bool {
        let quota_eq = match (&self.quota, &other.quota) {
            (Some(a), Some(b)) => a.semantically_eq(b),
            (None, None) => true,
            _ => false,
        };
        quota_eq && self.s3_user_class == other.s3_user_class && self.claim_ref == other.claim_ref
    }
}

impl S3User {
    /// Namespace and name of the owning claim, if recorded
    pub fn claim_key(&self) -> Option<(String, String)> {
        let claim_ref = self.spec.claim_ref.as_ref()?;
        Some((claim_ref.namespace.clone()?, claim_ref.name.clone()?))
    }
}
