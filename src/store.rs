//! Kubernetes object store abstraction
//!
//! Every read and write the controllers and webhooks perform goes through
//! [`ObjectStore`], so reconcile logic can be tested against mocks and
//! in-memory fakes. [`KubeObjectStore`] is the production implementation.
//!
//! Claim listing takes an explicit [`ReadConsistency`]: admission uses a
//! quorum read so two concurrent claims always see each other, while the
//! reconcile path is content with the API server's watch cache.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, ResourceQuota, Secret};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde_json::json;

use crate::crd::{
    ClusterResourceQuota, ClusterResourceQuotaStatus, S3Bucket, S3BucketStatus, S3User,
    S3UserClaim, S3UserClaimStatus,
};
use crate::{Error, FIELD_MANAGER};

/// How fresh a list must be
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadConsistency {
    /// Quorum read straight from etcd
    Strong,
    /// Served from the API server's watch cache; may lag
    Cached,
}

impl ReadConsistency {
    fn list_params(self) -> ListParams {
        match self {
            Self::Strong => ListParams::default(),
            Self::Cached => ListParams::default().match_any(),
        }
    }
}

/// Typed access to the Kubernetes objects the operator reads and writes
///
/// Getters return `Ok(None)` for missing objects. Deletes treat a missing
/// object as success. Status patches carry the object's `resourceVersion`
/// and fail with a 409 conflict if it changed.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List claims in a namespace
    async fn list_claims(
        &self,
        namespace: &str,
        consistency: ReadConsistency,
    ) -> Result<Vec<S3UserClaim>, Error>;

    /// Get a claim
    async fn get_claim(&self, namespace: &str, name: &str) -> Result<Option<S3UserClaim>, Error>;

    /// Replace a claim's status, guarded by its resourceVersion
    async fn patch_claim_status(
        &self,
        claim: &S3UserClaim,
        status: &S3UserClaimStatus,
    ) -> Result<(), Error>;

    /// Add a finalizer to a claim if absent
    async fn add_claim_finalizer(&self, claim: &S3UserClaim, finalizer: &str)
        -> Result<(), Error>;

    /// Remove a finalizer from a claim if present
    async fn remove_claim_finalizer(
        &self,
        claim: &S3UserClaim,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Get a namespace
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error>;

    /// List namespaces matching a label selector
    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<Namespace>, Error>;

    /// List ResourceQuotas in a namespace
    async fn list_resource_quotas(&self, namespace: &str) -> Result<Vec<ResourceQuota>, Error>;

    /// Get a ResourceQuota
    async fn get_resource_quota(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ResourceQuota>, Error>;

    /// Merge the given entries into `status.used`, guarded by resourceVersion
    async fn patch_resource_quota_used(
        &self,
        quota: &ResourceQuota,
        used: &BTreeMap<String, Quantity>,
    ) -> Result<(), Error>;

    /// Get the team quota (a ClusterResourceQuota named after the team)
    async fn get_team_quota(&self, team: &str) -> Result<Option<ClusterResourceQuota>, Error>;

    /// Replace a team quota's status, guarded by resourceVersion
    async fn patch_team_quota_status(
        &self,
        quota: &ClusterResourceQuota,
        status: &ClusterResourceQuotaStatus,
    ) -> Result<(), Error>;

    /// Get a secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Create a secret
    async fn create_secret(&self, secret: &Secret) -> Result<(), Error>;

    /// Replace a secret, guarded by its resourceVersion
    async fn replace_secret(&self, secret: &Secret) -> Result<(), Error>;

    /// Delete a secret
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Get an S3User
    async fn get_s3_user(&self, name: &str) -> Result<Option<S3User>, Error>;

    /// Create an S3User
    async fn create_s3_user(&self, user: &S3User) -> Result<(), Error>;

    /// Replace an S3User, guarded by its resourceVersion
    async fn replace_s3_user(&self, user: &S3User) -> Result<(), Error>;

    /// Delete an S3User
    async fn delete_s3_user(&self, name: &str) -> Result<(), Error>;

    /// List S3Buckets in a namespace
    async fn list_buckets(&self, namespace: &str) -> Result<Vec<S3Bucket>, Error>;

    /// Replace a bucket's status
    async fn patch_bucket_status(
        &self,
        bucket: &S3Bucket,
        status: &S3BucketStatus,
    ) -> Result<(), Error>;

    /// Add a finalizer to a bucket if absent
    async fn add_bucket_finalizer(&self, bucket: &S3Bucket, finalizer: &str) -> Result<(), Error>;

    /// Remove a finalizer from a bucket if present
    async fn remove_bucket_finalizer(
        &self,
        bucket: &S3Bucket,
        finalizer: &str,
    ) -> Result<(), Error>;
}

/// [`ObjectStore`] backed by the Kubernetes API
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    /// Create a new store wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Map a 404 to `None`
fn optional<T>(result: Result<T, kube::Error>) -> Result<Option<T>, Error> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Map a 404 to success
fn ignore_not_found<T>(result: Result<T, kube::Error>) -> Result<(), Error> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Finalizer list with `finalizer` added or removed, or `None` if unchanged
fn edit_finalizers(current: &[String], finalizer: &str, present: bool) -> Option<Vec<String>> {
    let has = current.iter().any(|f| f == finalizer);
    match (has, present) {
        (false, true) => {
            let mut next = current.to_vec();
            next.push(finalizer.to_string());
            Some(next)
        }
        (true, false) => Some(
            current
                .iter()
                .filter(|f| f.as_str() != finalizer)
                .cloned()
                .collect(),
        ),
        _ => None,
    }
}

/// Merge patch setting finalizers, guarded by resourceVersion
fn finalizer_patch(resource_version: Option<String>, finalizers: Vec<String>) -> serde_json::Value {
    json!({
        "metadata": {
            "resourceVersion": resource_version,
            "finalizers": finalizers
        }
    })
}

impl KubeObjectStore {
    async fn set_claim_finalizer(
        &self,
        claim: &S3UserClaim,
        finalizer: &str,
        present: bool,
    ) -> Result<(), Error> {
        let Some(finalizers) = edit_finalizers(claim.finalizers(), finalizer, present) else {
            return Ok(());
        };
        let api: Api<S3UserClaim> =
            Api::namespaced(self.client.clone(), &claim.namespace().unwrap_or_default());
        let patch = finalizer_patch(claim.resource_version(), finalizers);
        api.patch(
            &claim.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn set_bucket_finalizer(
        &self,
        bucket: &S3Bucket,
        finalizer: &str,
        present: bool,
    ) -> Result<(), Error> {
        let Some(finalizers) = edit_finalizers(bucket.finalizers(), finalizer, present) else {
            return Ok(());
        };
        let api: Api<S3Bucket> =
            Api::namespaced(self.client.clone(), &bucket.namespace().unwrap_or_default());
        let patch = finalizer_patch(bucket.resource_version(), finalizers);
        api.patch(
            &bucket.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn list_claims(
        &self,
        namespace: &str,
        consistency: ReadConsistency,
    ) -> Result<Vec<S3UserClaim>, Error> {
        let api: Api<S3UserClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&consistency.list_params()).await?.items)
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<Option<S3UserClaim>, Error> {
        let api: Api<S3UserClaim> = Api::namespaced(self.client.clone(), namespace);
        optional(api.get(name).await)
    }

    async fn patch_claim_status(
        &self,
        claim: &S3UserClaim,
        status: &S3UserClaimStatus,
    ) -> Result<(), Error> {
        let api: Api<S3UserClaim> =
            Api::namespaced(self.client.clone(), &claim.namespace().unwrap_or_default());
        let patch = json!({
            "metadata": {"resourceVersion": claim.resource_version()},
            "status": status
        });
        api.patch_status(
            &claim.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn add_claim_finalizer(
        &self,
        claim: &S3UserClaim,
        finalizer: &str,
    ) -> Result<(), Error> {
        self.set_claim_finalizer(claim, finalizer, true).await
    }

    async fn remove_claim_finalizer(
        &self,
        claim: &S3UserClaim,
        finalizer: &str,
    ) -> Result<(), Error> {
        self.set_claim_finalizer(claim, finalizer, false).await
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        optional(api.get(name).await)
    }

    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<Namespace>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api
            .list(&ListParams::default().labels(label_selector))
            .await?
            .items)
    }

    async fn list_resource_quotas(&self, namespace: &str) -> Result<Vec<ResourceQuota>, Error> {
        let api: Api<ResourceQuota> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_resource_quota(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ResourceQuota>, Error> {
        let api: Api<ResourceQuota> = Api::namespaced(self.client.clone(), namespace);
        optional(api.get(name).await)
    }

    async fn patch_resource_quota_used(
        &self,
        quota: &ResourceQuota,
        used: &BTreeMap<String, Quantity>,
    ) -> Result<(), Error> {
        let api: Api<ResourceQuota> =
            Api::namespaced(self.client.clone(), &quota.namespace().unwrap_or_default());
        let patch = json!({
            "metadata": {"resourceVersion": quota.resource_version()},
            "status": {"used": used}
        });
        api.patch_status(
            &quota.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn get_team_quota(&self, team: &str) -> Result<Option<ClusterResourceQuota>, Error> {
        let api: Api<ClusterResourceQuota> = Api::all(self.client.clone());
        optional(api.get(team).await)
    }

    async fn patch_team_quota_status(
        &self,
        quota: &ClusterResourceQuota,
        status: &ClusterResourceQuotaStatus,
    ) -> Result<(), Error> {
        let api: Api<ClusterResourceQuota> = Api::all(self.client.clone());
        let patch = json!({
            "metadata": {"resourceVersion": quota.resource_version()},
            "status": status
        });
        api.patch_status(
            &quota.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        optional(api.get(name).await)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), Error> {
        let api: Api<Secret> =
            Api::namespaced(self.client.clone(), &secret.namespace().unwrap_or_default());
        api.create(&PostParams::default(), secret).await?;
        Ok(())
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<(), Error> {
        let api: Api<Secret> =
            Api::namespaced(self.client.clone(), &secret.namespace().unwrap_or_default());
        api.replace(&secret.name_any(), &PostParams::default(), secret)
            .await?;
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)
    }

    async fn get_s3_user(&self, name: &str) -> Result<Option<S3User>, Error> {
        let api: Api<S3User> = Api::all(self.client.clone());
        optional(api.get(name).await)
    }

    async fn create_s3_user(&self, user: &S3User) -> Result<(), Error> {
        let api: Api<S3User> = Api::all(self.client.clone());
        api.create(&PostParams::default(), user).await?;
        Ok(())
    }

    async fn replace_s3_user(&self, user: &S3User) -> Result<(), Error> {
        let api: Api<S3User> = Api::all(self.client.clone());
        api.replace(&user.name_any(), &PostParams::default(), user)
            .await?;
        Ok(())
    }

    async fn delete_s3_user(&self, name: &str) -> Result<(), Error> {
        let api: Api<S3User> = Api::all(self.client.clone());
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)
    }

    async fn list_buckets(&self, namespace: &str) -> Result<Vec<S3Bucket>, Error> {
        let api: Api<S3Bucket> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_bucket_status(
        &self,
        bucket: &S3Bucket,
        status: &S3BucketStatus,
    ) -> Result<(), Error> {
        let api: Api<S3Bucket> =
            Api::namespaced(self.client.clone(), &bucket.namespace().unwrap_or_default());
        let patch = json!({ "status": status });
        api.patch_status(
            &bucket.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn add_bucket_finalizer(&self, bucket: &S3Bucket, finalizer: &str) -> Result<(), Error> {
        self.set_bucket_finalizer(bucket, finalizer, true).await
    }

    async fn remove_bucket_finalizer(
        &self,
        bucket: &S3Bucket,
        finalizer: &str,
    ) -> Result<(), Error> {
        self.set_bucket_finalizer(bucket, finalizer, false).await
    }
}
