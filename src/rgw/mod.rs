//! Ceph RGW clients
//!
//! Two narrow interfaces sit between the controllers and the storage cluster:
//!
//! - [`StorageAdmin`]: the RGW admin-ops API (users, quotas, subusers),
//!   authenticated as the operator's admin user
//! - [`BucketAdmin`]: the S3 API (buckets and bucket policies), authenticated
//!   per call with the owning claim's keys
//!
//! Both are traits so controllers can be exercised against mocks and fakes.

mod admin;
mod s3;
pub mod sigv4;
mod transport;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use admin::RgwAdminClient;
pub use s3::S3BucketClient;

/// Errors reported by RGW
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RgwError {
    /// The user does not exist
    #[error("no such user")]
    NoSuchUser,

    /// The bucket does not exist
    #[error("no such bucket")]
    NoSuchBucket,

    /// The bucket already exists and belongs to the caller
    #[error("bucket already owned by you")]
    BucketAlreadyOwned,

    /// Any other API-level failure
    #[error("{code} (HTTP {status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// RGW error code, e.g. `BucketNotEmpty`
        code: String,
        /// Response body or message
        message: String,
    },

    /// Transport failure
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
}

/// Access key pair belonging to a user or subuser
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct UserKey {
    /// Owner of the key: a user id or a full subuser id
    pub user: String,
    /// S3 access key
    pub access_key: String,
    /// S3 secret key
    pub secret_key: String,
}

/// A subuser as reported by RGW
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Subuser {
    /// Full subuser id (`tenant$user:short`)
    pub id: String,
    /// Granted permission
    #[serde(default)]
    pub permissions: String,
}

/// An RGW user as reported by the admin API
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct RgwUser {
    /// Full user id
    pub user_id: String,
    /// Display name
    #[serde(default)]
    pub display_name: String,
    /// Bucket cap
    #[serde(default)]
    pub max_buckets: i64,
    /// S3 keys of the user and all its subusers
    #[serde(default)]
    pub keys: Vec<UserKey>,
    /// Subusers
    #[serde(default)]
    pub subusers: Vec<Subuser>,
}

impl RgwUser {
    /// Key owned by the given user or subuser id
    pub fn key_for(&self, owner: &str) -> Option<&UserKey> {
        self.keys.iter().find(|k| k.user == owner)
    }
}

/// Parameters for creating an RGW user
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUser {
    /// Full user id (`tenant$name`)
    pub user_id: String,
    /// Display name
    pub display_name: String,
    /// Bucket cap
    pub max_buckets: i64,
}

/// Per-user quota as understood by RGW
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct QuotaSpec {
    /// Whether the quota is enforced
    #[serde(default)]
    pub enabled: bool,
    /// Maximum size in bytes (-1 = unlimited)
    #[serde(default)]
    pub max_size: i64,
    /// Maximum object count (-1 = unlimited)
    #[serde(default)]
    pub max_objects: i64,
}

impl QuotaSpec {
    /// Compare the fields RGW reliably echoes back
    ///
    /// The read response carries derived fields (`max_size_kb`, `check_on_raw`)
    /// that were never written, so whole-struct equality is not meaningful.
    pub fn matches(&self, other: &QuotaSpec) -> bool {
        self.enabled == other.enabled
            && self.max_size == other.max_size
            && self.max_objects == other.max_objects
    }
}

/// Access level of a subuser
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubuserAccess {
    /// No implicit access; bucket policies grant it
    None,
    /// Read-only access to everything the user owns
    Read,
}

impl SubuserAccess {
    /// Wire value of the access parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Read => "read",
        }
    }
}

/// S3 credentials used to act as a specific user
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    /// Access key
    pub access_key: String,
    /// Secret key
    pub secret_key: String,
}

/// Ceph RGW admin-ops operations used by the claim workflows
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StorageAdmin: Send + Sync {
    /// Fetch a user, failing with [`RgwError::NoSuchUser`] if absent
    async fn get_user(&self, user_id: &str) -> Result<RgwUser, RgwError>;

    /// Create a user with a generated S3 key
    async fn create_user(&self, user: &NewUser) -> Result<RgwUser, RgwError>;

    /// Change a user's bucket cap
    async fn modify_user(&self, user_id: &str, max_buckets: i64) -> Result<RgwUser, RgwError>;

    /// Remove a user, optionally purging its buckets and objects
    async fn remove_user(&self, user_id: &str, purge_data: bool) -> Result<(), RgwError>;

    /// Read a user's quota
    async fn get_user_quota(&self, user_id: &str) -> Result<QuotaSpec, RgwError>;

    /// Replace a user's quota
    async fn set_user_quota(&self, user_id: &str, quota: &QuotaSpec) -> Result<(), RgwError>;

    /// Create a subuser with a generated S3 key
    async fn create_subuser(
        &self,
        user_id: &str,
        subuser_id: &str,
        access: SubuserAccess,
    ) -> Result<(), RgwError>;

    /// Remove a subuser and its keys
    async fn remove_subuser(&self, user_id: &str, subuser_id: &str) -> Result<(), RgwError>;
}

/// S3 bucket operations used by the bucket controller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BucketAdmin: Send + Sync {
    /// Create a bucket; [`RgwError::BucketAlreadyOwned`] if it already exists for the caller
    async fn create_bucket(&self, credentials: &Credentials, bucket: &str) -> Result<(), RgwError>;

    /// Delete an empty bucket; [`RgwError::NoSuchBucket`] if it is gone
    async fn delete_bucket(&self, credentials: &Credentials, bucket: &str) -> Result<(), RgwError>;

    /// Replace the bucket policy with the given JSON document
    async fn set_bucket_policy(
        &self,
        credentials: &Credentials,
        bucket: &str,
        policy: &str,
    ) -> Result<(), RgwError>;
}
