//! Claim provisioning workflow
//!
//! Converges a live S3UserClaim onto RGW and the cluster, in order:
//!
//! 1. RGW user exists with the claim's bucket cap
//! 2. RGW user quota matches the claim
//! 3. Subusers match the claim (plus the implicit `readonly`)
//! 4. Fresh user info is read back for its keys
//! 5. Admin and read-only credential secrets hold the current keys
//! 6. Every extra subuser has its own credential secret
//! 7. The cluster-scoped S3User mirrors the claim
//! 8. Claim status reflects the provisioned state
//! 9. Namespace and team quota usage include the claim
//! 10. The cleanup finalizer is present
//!
//! Every step reads before it writes, so a second run over a converged
//! claim performs no mutating calls at all.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument};

use super::subuser::SubuserReconciler;
use super::{Context, Flow};
use crate::crd::{S3User, S3UserClaim, S3UserClaimStatus, S3UserSpec};
use crate::naming::{subuser_secret_name, CephIdentity, READONLY_SUBUSER};
use crate::quantity;
use crate::quota::StatusProjector;
use crate::rgw::{NewUser, QuotaSpec, RgwError, RgwUser};
use crate::{Error, Result, ACCESS_KEY, CLAIM_FINALIZER, FIELD_MANAGER, MANAGED_BY_LABEL, SECRET_KEY};

/// Ordered provisioning steps for one claim
pub struct ProvisionWorkflow<'a> {
    ctx: &'a Context,
    claim: &'a S3UserClaim,
    identity: CephIdentity,
    namespace: String,
    name: String,
}

impl<'a> ProvisionWorkflow<'a> {
    /// Create the workflow for a claim
    pub fn new(ctx: &'a Context, claim: &'a S3UserClaim) -> Self {
        Self {
            ctx,
            claim,
            identity: claim.ceph_identity(&ctx.cluster_name),
            namespace: claim.namespace_or_default(),
            name: claim.name_any(),
        }
    }

    /// Run every step in order
    ///
    /// Returns [`Flow::Halt`] when a step asked to stop early, e.g. after a
    /// status write lost an optimistic-concurrency race.
    #[instrument(skip(self), fields(claim = %self.name, namespace = %self.namespace, user = %self.identity.user_id))]
    pub async fn run(&self) -> Result<Flow> {
        let user = self.ensure_user().await?;
        self.ensure_quota().await?;
        self.ensure_subusers(&user).await?;

        let user = self.ctx.storage.get_user(&self.identity.user_id).await?;
        self.ensure_credential_secrets(&user).await?;
        self.ensure_subuser_secrets(&user).await?;
        self.ensure_s3_user().await?;

        if self.update_status().await? == Flow::Halt {
            return Ok(Flow::Halt);
        }

        StatusProjector::new(self.ctx.store.as_ref(), self.ctx.retry.clone())
            .publish(self.claim, true)
            .await?;

        self.ensure_finalizer().await?;
        Ok(Flow::Continue)
    }

    /// Step 1: the RGW user exists with the desired bucket cap
    async fn ensure_user(&self) -> Result<RgwUser> {
        let max_buckets = self.claim.spec.quota.max_buckets;
        let storage = self.ctx.storage.as_ref();

        match storage.get_user(&self.identity.user_id).await {
            Ok(user) if user.max_buckets == max_buckets => Ok(user),
            Ok(user) => {
                info!(from = user.max_buckets, to = max_buckets, "updating bucket cap");
                Ok(storage
                    .modify_user(&self.identity.user_id, max_buckets)
                    .await?)
            }
            Err(RgwError::NoSuchUser) => {
                info!("creating RGW user");
                let user = storage
                    .create_user(&NewUser {
                        user_id: self.identity.user_id.clone(),
                        display_name: self.identity.display_name.clone(),
                        max_buckets,
                    })
                    .await?;
                Ok(user)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Step 2: the RGW user quota matches the claim
    async fn ensure_quota(&self) -> Result<()> {
        let desired = desired_quota(self.claim)?;
        let storage = self.ctx.storage.as_ref();
        let current = storage.get_user_quota(&self.identity.user_id).await?;

        if current.matches(&desired) {
            debug!("user quota unchanged");
            return Ok(());
        }
        storage.set_user_quota(&self.identity.user_id, &desired).await?;
        info!(
            max_size = desired.max_size,
            max_objects = desired.max_objects,
            "user quota updated"
        );
        Ok(())
    }

    /// Step 3: subusers match the claim
    async fn ensure_subusers(&self, user: &RgwUser) -> Result<()> {
        let actual: Vec<String> = user.subusers.iter().map(|s| s.id.clone()).collect();
        SubuserReconciler::new(
            self.ctx.storage.as_ref(),
            self.ctx.store.as_ref(),
            &self.identity,
            &self.namespace,
            &self.name,
        )
        .reconcile(&self.claim.desired_subusers(), &actual)
        .await?;
        Ok(())
    }

    /// Step 5: admin and read-only secrets
    async fn ensure_credential_secrets(&self, user: &RgwUser) -> Result<()> {
        self.ensure_secret(user, &self.claim.spec.admin_secret, &self.identity.user_id)
            .await?;
        self.ensure_secret(
            user,
            &self.claim.spec.readonly_secret,
            &self.identity.subuser_id(READONLY_SUBUSER),
        )
        .await
    }

    /// Step 6: one secret per extra subuser
    async fn ensure_subuser_secrets(&self, user: &RgwUser) -> Result<()> {
        for short in &self.claim.spec.sub_users {
            let secret_name = subuser_secret_name(&self.name, short);
            self.ensure_secret(user, &secret_name, &self.identity.subuser_id(short))
                .await?;
        }
        Ok(())
    }

    /// Create or repair one credential secret holding `owner`'s key
    async fn ensure_secret(&self, user: &RgwUser, secret_name: &str, owner: &str) -> Result<()> {
        let key = user
            .key_for(owner)
            .ok_or_else(|| Error::missing_key(format!("no key found for user {owner}")))?;
        let desired = credential_secret(self.claim, secret_name, &key.access_key, &key.secret_key);
        let store = self.ctx.store.as_ref();

        let Some(mut existing) = store.get_secret(&self.namespace, secret_name).await? else {
            store.create_secret(&desired).await?;
            info!(secret = %secret_name, "credential secret created");
            return Ok(());
        };

        let drifted = existing.data != desired.data;
        let owned = is_controlled_by(&existing, self.claim);
        if !drifted && owned {
            return Ok(());
        }

        existing.data = desired.data;
        existing.string_data = None;
        take_ownership(&mut existing, self.claim);
        store.replace_secret(&existing).await?;
        info!(secret = %secret_name, drifted, owned, "credential secret repaired");
        Ok(())
    }

    /// Step 7: the S3User mirrors the claim
    async fn ensure_s3_user(&self) -> Result<()> {
        let name = self.claim.s3_user_name();
        let class = self.claim.user_class(&self.ctx.s3_user_class);
        let desired = S3UserSpec::for_claim(self.claim, class);
        let store = self.ctx.store.as_ref();

        match store.get_s3_user(&name).await? {
            None => {
                store.create_s3_user(&S3User::new(&name, desired)).await?;
                info!(s3user = %name, "S3User created");
            }
            Some(mut existing) if !existing.spec.semantically_eq(&desired) => {
                existing.spec = desired;
                store.replace_s3_user(&existing).await?;
                info!(s3user = %name, "S3User updated");
            }
            Some(_) => debug!(s3user = %name, "S3User unchanged"),
        }
        Ok(())
    }

    /// Step 8: claim status reflects what was provisioned
    async fn update_status(&self) -> Result<Flow> {
        let desired = S3UserClaimStatus {
            quota: Some(self.claim.spec.quota.clone()),
            s3_user_name: Some(self.claim.s3_user_name()),
            sub_users: self.claim.spec.sub_users.clone(),
        };
        let current = self.claim.status.clone().unwrap_or_default();
        if current.semantically_eq(&desired) {
            return Ok(Flow::Continue);
        }

        match self.ctx.store.patch_claim_status(self.claim, &desired).await {
            Ok(()) => Ok(Flow::Continue),
            Err(e) if e.is_conflict() => {
                info!(error = %e, "re-queuing claim due to optimistic locking on status");
                Ok(Flow::Halt)
            }
            Err(e) => Err(e),
        }
    }

    /// Step 10: the cleanup finalizer is present
    async fn ensure_finalizer(&self) -> Result<()> {
        if self.claim.has_finalizer(CLAIM_FINALIZER) {
            return Ok(());
        }
        // the status write above moved the resourceVersion on
        let store = self.ctx.store.as_ref();
        let Some(current) = store.get_claim(&self.namespace, &self.name).await? else {
            return Ok(());
        };
        store.add_claim_finalizer(&current, CLAIM_FINALIZER).await?;
        debug!("cleanup finalizer added");
        Ok(())
    }
}

/// RGW quota for a claim
pub fn desired_quota(claim: &S3UserClaim) -> Result<QuotaSpec> {
    let to_i64 = |field: &str, value: i128| {
        i64::try_from(value).map_err(|_| Error::quantity(format!("{field} {value} is out of range")))
    };
    Ok(QuotaSpec {
        enabled: true,
        max_size: to_i64("maxSize", quantity::parse(&claim.spec.quota.max_size)?)?,
        max_objects: to_i64("maxObjects", quantity::parse(&claim.spec.quota.max_objects)?)?,
    })
}

/// Opaque secret holding one key pair, controlled by the claim
pub fn credential_secret(
    claim: &S3UserClaim,
    name: &str,
    access_key: &str,
    secret_key: &str,
) -> Secret {
    let mut secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: claim.namespace(),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::from([
            (ACCESS_KEY.to_string(), ByteString(access_key.as_bytes().to_vec())),
            (SECRET_KEY.to_string(), ByteString(secret_key.as_bytes().to_vec())),
        ])),
        ..Default::default()
    };
    take_ownership(&mut secret, claim);
    secret
}

/// Returns true if the claim is the secret's controller
fn is_controlled_by(secret: &Secret, claim: &S3UserClaim) -> bool {
    let Some(uid) = claim.uid() else {
        return false;
    };
    secret
        .owner_references()
        .iter()
        .any(|r| r.controller == Some(true) && r.uid == uid)
}

/// Make the claim the secret's controller and stamp the managed-by label
fn take_ownership(secret: &mut Secret, claim: &S3UserClaim) {
    let refs = secret.metadata.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.controller != Some(true));
    refs.extend(claim.controller_owner_ref(&()));

    secret
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(MANAGED_BY_LABEL.to_string(), FIELD_MANAGER.to_string());
}
