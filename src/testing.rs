//! Shared fixtures and in-memory fakes for unit tests
//!
//! Mocks cover single interactions. Multi-step workflow stories run against
//! [`FakeStore`], [`FakeRgw`] and [`FakeBuckets`] instead, which keep state
//! between calls and count every write so idempotence can be asserted.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Namespace, ResourceQuota, ResourceQuotaSpec, ResourceQuotaStatus, Secret,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::core::{ErrorResponse, ObjectMeta};
use kube::ResourceExt;

use crate::crd::{
    ClusterResourceQuota, ClusterResourceQuotaSpec, ClusterResourceQuotaStatus,
    ResourceQuotaStatusByNamespace, S3Bucket, S3BucketSpec, S3BucketStatus, S3User, S3UserClaim,
    S3UserClaimSpec, S3UserClaimStatus, UserQuota,
};
use crate::rgw::{
    BucketAdmin, Credentials, NewUser, QuotaSpec, RgwError, RgwUser, StorageAdmin, Subuser,
    SubuserAccess, UserKey,
};
use crate::store::{ObjectStore, ReadConsistency};
use crate::{Error, TEAM_LABEL};

// =============================================================================
// Fixtures
// =============================================================================

fn quantities(entries: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
        .collect()
}

/// Claim with the given quota and default secrets
pub fn claim_with_quota(
    name: &str,
    namespace: &str,
    max_size: &str,
    max_objects: &str,
    max_buckets: i64,
) -> S3UserClaim {
    S3UserClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{namespace}-{name}")),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: S3UserClaimSpec {
            s3_user_class: String::new(),
            readonly_secret: format!("{name}-readonly-secret"),
            admin_secret: format!("{name}-admin-secret"),
            quota: UserQuota {
                max_size: Quantity(max_size.to_string()),
                max_objects: Quantity(max_objects.to_string()),
                max_buckets,
            },
            sub_users: Vec::new(),
        },
        status: None,
    }
}

/// Namespace, optionally labeled with a team
pub fn namespace(name: &str, team: Option<&str>) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: team.map(|t| BTreeMap::from([(TEAM_LABEL.to_string(), t.to_string())])),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// ResourceQuota with the given hard limits and used values
pub fn resource_quota(
    namespace: &str,
    name: &str,
    hard: &[(&str, &str)],
    used: &[(&str, &str)],
) -> ResourceQuota {
    ResourceQuota {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: Some(ResourceQuotaSpec {
            hard: Some(quantities(hard)),
            ..Default::default()
        }),
        status: (!used.is_empty()).then(|| ResourceQuotaStatus {
            used: Some(quantities(used)),
            ..Default::default()
        }),
    }
}

/// Team quota with hard limits and per-namespace used values
pub fn team_quota(
    team: &str,
    hard: &[(&str, &str)],
    namespaces: &[(&str, &[(&str, &str)])],
) -> ClusterResourceQuota {
    let mut quota = ClusterResourceQuota::new(
        team,
        ClusterResourceQuotaSpec {
            quota: ResourceQuotaSpec {
                hard: Some(quantities(hard)),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    quota.metadata.resource_version = Some("1".to_string());
    quota.status = Some(ClusterResourceQuotaStatus {
        total: ResourceQuotaStatus::default(),
        namespaces: namespaces
            .iter()
            .map(|(ns, used)| ResourceQuotaStatusByNamespace {
                namespace: ns.to_string(),
                status: ResourceQuotaStatus {
                    used: Some(quantities(used)),
                    ..Default::default()
                },
            })
            .collect(),
    });
    quota
}

/// Bucket owned by the named claim
pub fn bucket(name: &str, namespace: &str, claim: &str) -> S3Bucket {
    let mut bucket = S3Bucket::new(
        name,
        S3BucketSpec {
            s3_user_ref: claim.to_string(),
            s3_deletion_policy: Default::default(),
            s3_subuser_binding: Vec::new(),
        },
    );
    bucket.metadata.namespace = Some(namespace.to_string());
    bucket
}

/// Kubernetes API error with the given status code
pub fn api_error(code: u16, reason: &str) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} error"),
        reason: reason.to_string(),
        code,
    }))
}

// =============================================================================
// In-memory object store
// =============================================================================

/// Objects held by [`FakeStore`]
#[derive(Default)]
pub struct FakeState {
    pub claims: BTreeMap<(String, String), S3UserClaim>,
    pub namespaces: BTreeMap<String, Namespace>,
    pub resource_quotas: BTreeMap<(String, String), ResourceQuota>,
    pub team_quotas: BTreeMap<String, ClusterResourceQuota>,
    pub secrets: BTreeMap<(String, String), Secret>,
    pub s3_users: BTreeMap<String, S3User>,
    pub buckets: BTreeMap<(String, String), S3Bucket>,
}

/// In-memory [`ObjectStore`] that counts writes
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<FakeState>,
    writes: AtomicUsize,
    finalizer_failures: AtomicUsize,
}

fn key(namespace: Option<String>, name: String) -> (String, String) {
    (namespace.unwrap_or_default(), name)
}

fn bump(meta: &mut ObjectMeta) {
    let next = meta
        .resource_version
        .as_deref()
        .and_then(|rv| rv.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    meta.resource_version = Some(next.to_string());
}

fn set_finalizer(meta: &mut ObjectMeta, finalizer: &str, present: bool) {
    let finalizers = meta.finalizers.get_or_insert_with(Vec::new);
    finalizers.retain(|f| f != finalizer);
    if present {
        finalizers.push(finalizer.to_string());
    }
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_claim(self, claim: S3UserClaim) -> Self {
        self.state()
            .claims
            .insert(key(claim.namespace(), claim.name_any()), claim);
        self
    }

    pub fn with_namespace(self, name: &str, team: Option<&str>) -> Self {
        self.state()
            .namespaces
            .insert(name.to_string(), namespace(name, team));
        self
    }

    pub fn with_resource_quota(self, quota: ResourceQuota) -> Self {
        self.state()
            .resource_quotas
            .insert(key(quota.namespace(), quota.name_any()), quota);
        self
    }

    pub fn with_team_quota(self, quota: ClusterResourceQuota) -> Self {
        self.state().team_quotas.insert(quota.name_any(), quota);
        self
    }

    pub fn with_bucket(self, bucket: S3Bucket) -> Self {
        self.state()
            .buckets
            .insert(key(bucket.namespace(), bucket.name_any()), bucket);
        self
    }

    pub fn with_s3_user(self, user: S3User) -> Self {
        self.state().s3_users.insert(user.name_any(), user);
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Number of write calls made so far
    /// Fail the next `count` claim finalizer removals with a server error
    pub fn failing_finalizer_removals(self, count: usize) -> Self {
        self.finalizer_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn claim(&self, namespace: &str, name: &str) -> Option<S3UserClaim> {
        self.state()
            .claims
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// `status.used[resource]` of a ResourceQuota
    pub fn quota_used(&self, namespace: &str, name: &str, resource: &str) -> Option<String> {
        self.state()
            .resource_quotas
            .get(&(namespace.to_string(), name.to_string()))
            .and_then(|q| q.status.as_ref())
            .and_then(|s| s.used.as_ref())
            .and_then(|u| u.get(resource))
            .map(|q| q.0.clone())
    }

    /// `status.total.used[resource]` of a team quota
    pub fn team_used(&self, team: &str, resource: &str) -> Option<String> {
        self.state()
            .team_quotas
            .get(team)
            .and_then(|q| q.status.as_ref())
            .and_then(|s| s.total.used.as_ref())
            .and_then(|u| u.get(resource))
            .map(|q| q.0.clone())
    }

    fn write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn list_claims(
        &self,
        namespace: &str,
        _consistency: ReadConsistency,
    ) -> Result<Vec<S3UserClaim>, Error> {
        Ok(self
            .state()
            .claims
            .values()
            .filter(|c| c.namespace().as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<Option<S3UserClaim>, Error> {
        Ok(self.claim(namespace, name))
    }

    async fn patch_claim_status(
        &self,
        claim: &S3UserClaim,
        status: &S3UserClaimStatus,
    ) -> Result<(), Error> {
        self.write();
        let mut state = self.state();
        let stored = state
            .claims
            .get_mut(&key(claim.namespace(), claim.name_any()))
            .ok_or_else(|| api_error(404, "NotFound"))?;
        stored.status = Some(status.clone());
        bump(&mut stored.metadata);
        Ok(())
    }

    async fn add_claim_finalizer(
        &self,
        claim: &S3UserClaim,
        finalizer: &str,
    ) -> Result<(), Error> {
        self.write();
        let mut state = self.state();
        if let Some(stored) = state.claims.get_mut(&key(claim.namespace(), claim.name_any())) {
            set_finalizer(&mut stored.metadata, finalizer, true);
            bump(&mut stored.metadata);
        }
        Ok(())
    }

    async fn remove_claim_finalizer(
        &self,
        claim: &S3UserClaim,
        finalizer: &str,
    ) -> Result<(), Error> {
        let failing = self
            .finalizer_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(api_error(500, "InternalError"));
        }
        self.write();
        let mut state = self.state();
        let k = key(claim.namespace(), claim.name_any());
        if let Some(stored) = state.claims.get_mut(&k) {
            set_finalizer(&mut stored.metadata, finalizer, false);
            // the API server drops a deleting object once its last finalizer is gone
            let released = stored.metadata.deletion_timestamp.is_some()
                && stored.finalizers().is_empty();
            if released {
                state.claims.remove(&k);
            }
        }
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, Error> {
        Ok(self.state().namespaces.get(name).cloned())
    }

    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<Namespace>, Error> {
        let (label, value) = label_selector.split_once('=').unwrap_or((label_selector, ""));
        Ok(self
            .state()
            .namespaces
            .values()
            .filter(|ns| ns.labels().get(label).map(String::as_str) == Some(value))
            .cloned()
            .collect())
    }

    async fn list_resource_quotas(&self, namespace: &str) -> Result<Vec<ResourceQuota>, Error> {
        Ok(self
            .state()
            .resource_quotas
            .values()
            .filter(|q| q.namespace().as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn get_resource_quota(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ResourceQuota>, Error> {
        Ok(self
            .state()
            .resource_quotas
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn patch_resource_quota_used(
        &self,
        quota: &ResourceQuota,
        used: &BTreeMap<String, Quantity>,
    ) -> Result<(), Error> {
        self.write();
        let mut state = self.state();
        let stored = state
            .resource_quotas
            .get_mut(&key(quota.namespace(), quota.name_any()))
            .ok_or_else(|| api_error(404, "NotFound"))?;
        if stored.metadata.resource_version != quota.metadata.resource_version {
            return Err(api_error(409, "Conflict"));
        }
        stored
            .status
            .get_or_insert_with(Default::default)
            .used
            .get_or_insert_with(BTreeMap::new)
            .extend(used.clone());
        bump(&mut stored.metadata);
        Ok(())
    }

    async fn get_team_quota(&self, team: &str) -> Result<Option<ClusterResourceQuota>, Error> {
        Ok(self.state().team_quotas.get(team).cloned())
    }

    async fn patch_team_quota_status(
        &self,
        quota: &ClusterResourceQuota,
        status: &ClusterResourceQuotaStatus,
    ) -> Result<(), Error> {
        self.write();
        let mut state = self.state();
        let stored = state
            .team_quotas
            .get_mut(&quota.name_any())
            .ok_or_else(|| api_error(404, "NotFound"))?;
        if stored.metadata.resource_version != quota.metadata.resource_version {
            return Err(api_error(409, "Conflict"));
        }
        stored.status = Some(status.clone());
        bump(&mut stored.metadata);
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), Error> {
        self.write();
        let mut state = self.state();
        let k = key(secret.namespace(), secret.name_any());
        if state.secrets.contains_key(&k) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let mut secret = secret.clone();
        secret.metadata.resource_version = Some("1".to_string());
        state.secrets.insert(k, secret);
        Ok(())
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<(), Error> {
        self.write();
        let mut state = self.state();
        let k = key(secret.namespace(), secret.name_any());
        if !state.secrets.contains_key(&k) {
            return Err(api_error(404, "NotFound"));
        }
        let mut secret = secret.clone();
        bump(&mut secret.metadata);
        state.secrets.insert(k, secret);
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.write();
        self.state()
            .secrets
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn get_s3_user(&self, name: &str) -> Result<Option<S3User>, Error> {
        Ok(self.state().s3_users.get(name).cloned())
    }

    async fn create_s3_user(&self, user: &S3User) -> Result<(), Error> {
        self.write();
        let mut state = self.state();
        if state.s3_users.contains_key(&user.name_any()) {
            return Err(api_error(409, "AlreadyExists"));
        }
        state.s3_users.insert(user.name_any(), user.clone());
        Ok(())
    }

    async fn replace_s3_user(&self, user: &S3User) -> Result<(), Error> {
        self.write();
        self.state().s3_users.insert(user.name_any(), user.clone());
        Ok(())
    }

    async fn delete_s3_user(&self, name: &str) -> Result<(), Error> {
        self.write();
        self.state().s3_users.remove(name);
        Ok(())
    }

    async fn list_buckets(&self, namespace: &str) -> Result<Vec<S3Bucket>, Error> {
        Ok(self
            .state()
            .buckets
            .values()
            .filter(|b| b.namespace().as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn patch_bucket_status(
        &self,
        bucket: &S3Bucket,
        status: &S3BucketStatus,
    ) -> Result<(), Error> {
        self.write();
        if let Some(stored) = self
            .state()
            .buckets
            .get_mut(&key(bucket.namespace(), bucket.name_any()))
        {
            stored.status = Some(status.clone());
        }
        Ok(())
    }

    async fn add_bucket_finalizer(&self, bucket: &S3Bucket, finalizer: &str) -> Result<(), Error> {
        self.write();
        if let Some(stored) = self
            .state()
            .buckets
            .get_mut(&key(bucket.namespace(), bucket.name_any()))
        {
            set_finalizer(&mut stored.metadata, finalizer, true);
        }
        Ok(())
    }

    async fn remove_bucket_finalizer(
        &self,
        bucket: &S3Bucket,
        finalizer: &str,
    ) -> Result<(), Error> {
        self.write();
        if let Some(stored) = self
            .state()
            .buckets
            .get_mut(&key(bucket.namespace(), bucket.name_any()))
        {
            set_finalizer(&mut stored.metadata, finalizer, false);
        }
        Ok(())
    }
}

// =============================================================================
// In-memory RGW
// =============================================================================

#[derive(Clone, Default)]
struct FakeUser {
    user: RgwUser,
    quota: QuotaSpec,
}

/// In-memory [`StorageAdmin`] that counts mutating calls
#[derive(Default)]
pub struct FakeRgw {
    users: Mutex<BTreeMap<String, FakeUser>>,
    mutations: AtomicUsize,
    next_key: AtomicUsize,
}

impl FakeRgw {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of create/modify/remove/set calls made so far
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn user(&self, user_id: &str) -> Option<RgwUser> {
        self.users.lock().unwrap().get(user_id).map(|u| u.user.clone())
    }

    pub fn quota(&self, user_id: &str) -> Option<QuotaSpec> {
        self.users.lock().unwrap().get(user_id).map(|u| u.quota)
    }

    /// Replace the key of a user or subuser, as an out-of-band rotation would
    pub fn rotate_key(&self, user_id: &str, owner: &str) {
        let access = self.generate_key("ROTATED");
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.get_mut(user_id) {
            for key in user.user.keys.iter_mut().filter(|k| k.user == owner) {
                key.access_key = access.clone();
                key.secret_key = format!("{access}-secret");
            }
        }
    }

    fn mutate(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    fn generate_key(&self, prefix: &str) -> String {
        let n = self.next_key.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}{n:04}")
    }

    fn key_for(&self, owner: &str) -> UserKey {
        let access_key = self.generate_key("AK");
        UserKey {
            user: owner.to_string(),
            secret_key: format!("{access_key}-secret"),
            access_key,
        }
    }
}

#[async_trait]
impl StorageAdmin for FakeRgw {
    async fn get_user(&self, user_id: &str) -> Result<RgwUser, RgwError> {
        self.user(user_id).ok_or(RgwError::NoSuchUser)
    }

    async fn create_user(&self, user: &NewUser) -> Result<RgwUser, RgwError> {
        self.mutate();
        let created = RgwUser {
            user_id: user.user_id.clone(),
            display_name: user.display_name.clone(),
            max_buckets: user.max_buckets,
            keys: vec![self.key_for(&user.user_id)],
            subusers: Vec::new(),
        };
        self.users.lock().unwrap().insert(
            user.user_id.clone(),
            FakeUser {
                user: created.clone(),
                quota: QuotaSpec {
                    enabled: false,
                    max_size: -1,
                    max_objects: -1,
                },
            },
        );
        Ok(created)
    }

    async fn modify_user(&self, user_id: &str, max_buckets: i64) -> Result<RgwUser, RgwError> {
        self.mutate();
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(user_id).ok_or(RgwError::NoSuchUser)?;
        user.user.max_buckets = max_buckets;
        Ok(user.user.clone())
    }

    async fn remove_user(&self, user_id: &str, _purge_data: bool) -> Result<(), RgwError> {
        self.mutate();
        self.users
            .lock()
            .unwrap()
            .remove(user_id)
            .map(|_| ())
            .ok_or(RgwError::NoSuchUser)
    }

    async fn get_user_quota(&self, user_id: &str) -> Result<QuotaSpec, RgwError> {
        self.quota(user_id).ok_or(RgwError::NoSuchUser)
    }

    async fn set_user_quota(&self, user_id: &str, quota: &QuotaSpec) -> Result<(), RgwError> {
        self.mutate();
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(user_id).ok_or(RgwError::NoSuchUser)?;
        user.quota = *quota;
        Ok(())
    }

    async fn create_subuser(
        &self,
        user_id: &str,
        subuser_id: &str,
        access: SubuserAccess,
    ) -> Result<(), RgwError> {
        self.mutate();
        let key = self.key_for(subuser_id);
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(user_id).ok_or(RgwError::NoSuchUser)?;
        user.user.subusers.push(Subuser {
            id: subuser_id.to_string(),
            permissions: access.as_str().to_string(),
        });
        user.user.keys.push(key);
        Ok(())
    }

    async fn remove_subuser(&self, user_id: &str, subuser_id: &str) -> Result<(), RgwError> {
        self.mutate();
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(user_id).ok_or(RgwError::NoSuchUser)?;
        user.user.subusers.retain(|s| s.id != subuser_id);
        user.user.keys.retain(|k| k.user != subuser_id);
        Ok(())
    }
}

/// In-memory [`BucketAdmin`]
#[derive(Default)]
pub struct FakeBuckets {
    pub buckets: Mutex<BTreeMap<String, Option<String>>>,
}

#[async_trait]
impl BucketAdmin for FakeBuckets {
    async fn create_bucket(&self, _credentials: &Credentials, bucket: &str) -> Result<(), RgwError> {
        let mut buckets = self.buckets.lock().unwrap();
        if buckets.contains_key(bucket) {
            return Err(RgwError::BucketAlreadyOwned);
        }
        buckets.insert(bucket.to_string(), None);
        Ok(())
    }

    async fn delete_bucket(&self, _credentials: &Credentials, bucket: &str) -> Result<(), RgwError> {
        self.buckets
            .lock()
            .unwrap()
            .remove(bucket)
            .map(|_| ())
            .ok_or(RgwError::NoSuchBucket)
    }

    async fn set_bucket_policy(
        &self,
        _credentials: &Credentials,
        bucket: &str,
        policy: &str,
    ) -> Result<(), RgwError> {
        let mut buckets = self.buckets.lock().unwrap();
        let slot = buckets.get_mut(bucket).ok_or(RgwError::NoSuchBucket)?;
        *slot = Some(policy.to_string());
        Ok(())
    }
}
