//! Supporting types shared by the S3 CRDs

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::quantity;

fn default_max_size() -> Quantity {
    Quantity("5Gi".to_string())
}

fn default_max_objects() -> Quantity {
    Quantity("10k".to_string())
}

/// Quota requested for a single RGW user
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserQuota {
    /// Maximum total size of all objects
    #[serde(default = "default_max_size")]
    pub max_size: Quantity,

    /// Maximum number of objects
    #[serde(default = "default_max_objects")]
    pub max_objects: Quantity,

    /// Maximum number of buckets the user may own
    #[serde(default)]
    pub max_buckets: i64,
}

impl Default for UserQuota {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            max_objects: default_max_objects(),
            max_buckets: 0,
        }
    }
}

impl UserQuota {
    /// Compare by quantity value instead of string spelling
    pub fn semantically_eq(&self, other: &UserQuota) -> bool {
        self.max_buckets == other.max_buckets
            && quantity::semantically_equal(&self.max_size, &other.max_size)
            && quantity::semantically_equal(&self.max_objects, &other.max_objects)
    }
}

/// What happens to the RGW bucket when its S3Bucket is deleted
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Delete the bucket (fails while it still holds objects)
    #[default]
    Delete,
    /// Leave the bucket in place
    Retain,
}

/// Access level granted to a subuser on a bucket
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum BucketAccess {
    /// List and get objects
    Read,
    /// Read plus put and delete objects
    Write,
}

impl BucketAccess {
    /// S3 policy actions granted by this access level
    pub fn actions(&self) -> Vec<&'static str> {
        let mut actions = vec!["s3:ListBucket", "s3:GetObject"];
        if matches!(self, Self::Write) {
            actions.extend(["s3:DeleteObject", "s3:PutObject"]);
        }
        actions
    }
}

/// Grants one subuser of the owning claim access to a bucket
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubuserBinding {
    /// Subuser short name as listed in the claim
    pub name: String,
    /// Granted access level
    pub access: BucketAccess,
}
