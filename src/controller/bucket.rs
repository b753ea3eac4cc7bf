//! S3Bucket reconciliation
//!
//! Buckets are created and deleted through the S3 API as the owning claim's
//! RGW user, using the keys from the claim's admin secret. Subuser bindings
//! become a bucket policy granting read or write access.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use super::{Context, TRANSIENT_REQUEUE};
use crate::crd::{BucketAccess, DeletionPolicy, S3Bucket, S3BucketStatus, S3UserClaim, SubuserBinding};
use crate::rgw::{Credentials, RgwError};
use crate::{Error, Result, ACCESS_KEY, BUCKET_FINALIZER, SECRET_KEY};

/// Bucket policy granting each bound subuser its access level
///
/// Subusers with the same access share one statement.
pub fn bucket_policy(tenant: &str, claim: &str, bucket: &str, bindings: &[SubuserBinding]) -> Value {
    let mut principals: BTreeMap<BucketAccess, Vec<String>> = BTreeMap::new();
    for binding in bindings {
        principals
            .entry(binding.access)
            .or_default()
            .push(format!("arn:aws:iam::{tenant}:user/{claim}:{}", binding.name));
    }

    let statements: Vec<Value> = principals
        .into_iter()
        .map(|(access, aws)| {
            json!({
                "Sid": "BucketAllow",
                "Effect": "Allow",
                "Principal": {"AWS": aws},
                "Action": access.actions(),
                "Resource": [
                    format!("arn:aws:s3::{tenant}:{bucket}"),
                    format!("arn:aws:s3::{tenant}:{bucket}/*"),
                ],
            })
        })
        .collect();

    json!({
        "Version": "2012-10-17",
        "Id": "S3Policy",
        "Statement": statements,
    })
}

/// Keys from the claim's admin secret
async fn admin_credentials(ctx: &Context, claim: &S3UserClaim) -> Result<Credentials> {
    let namespace = claim.namespace_or_default();
    let secret_name = &claim.spec.admin_secret;
    let secret = ctx
        .store
        .get_secret(&namespace, secret_name)
        .await?
        .ok_or_else(|| Error::missing_key(format!("admin secret {namespace}/{secret_name} not found")))?;

    let field = |key: &str| {
        secret
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .map(|v| String::from_utf8_lossy(&v.0).into_owned())
            .ok_or_else(|| Error::missing_key(format!("{key} in secret {namespace}/{secret_name}")))
    };
    Ok(Credentials {
        access_key: field(ACCESS_KEY)?,
        secret_key: field(SECRET_KEY)?,
    })
}

/// Reconcile an S3Bucket
#[instrument(skip(bucket, ctx), fields(bucket = %bucket.name_any(), namespace = ?bucket.namespace()))]
pub async fn reconcile(bucket: Arc<S3Bucket>, ctx: Arc<Context>) -> std::result::Result<Action, Error> {
    let namespace = bucket.namespace().unwrap_or_default();
    let claim = ctx
        .store
        .get_claim(&namespace, &bucket.spec.s3_user_ref)
        .await?;

    if bucket.is_deleting() {
        return cleanup(&bucket, claim.as_ref(), &ctx).await;
    }

    let Some(claim) = claim else {
        return Err(Error::validation(format!(
            "s3UserClaim '{}' referenced by bucket does not exist",
            bucket.spec.s3_user_ref
        )));
    };
    provision(&bucket, &claim, &ctx).await
}

async fn provision(bucket: &S3Bucket, claim: &S3UserClaim, ctx: &Context) -> Result<Action> {
    let name = bucket.name_any();
    let credentials = admin_credentials(ctx, claim).await?;

    if !bucket.has_finalizer(BUCKET_FINALIZER) {
        ctx.store.add_bucket_finalizer(bucket, BUCKET_FINALIZER).await?;
    }

    match ctx.buckets.create_bucket(&credentials, &name).await {
        Ok(()) => info!("bucket created"),
        Err(RgwError::BucketAlreadyOwned) => debug!("bucket already exists"),
        Err(e) => return Err(e.into()),
    }

    let identity = claim.ceph_identity(&ctx.cluster_name);
    let policy = bucket_policy(
        &identity.tenant,
        &claim.name_any(),
        &name,
        &bucket.spec.s3_subuser_binding,
    );
    ctx.buckets
        .set_bucket_policy(&credentials, &name, &policy.to_string())
        .await?;

    let ready = S3BucketStatus {
        ready: true,
        reason: None,
    };
    if bucket.status.as_ref() != Some(&ready) {
        ctx.store.patch_bucket_status(bucket, &ready).await?;
    }
    Ok(Action::await_change())
}

async fn cleanup(bucket: &S3Bucket, claim: Option<&S3UserClaim>, ctx: &Context) -> Result<Action> {
    if !bucket.has_finalizer(BUCKET_FINALIZER) {
        return Ok(Action::await_change());
    }

    match (bucket.spec.s3_deletion_policy, claim) {
        (DeletionPolicy::Retain, _) => info!("retaining bucket"),
        // the claim's cleanup purged the user together with its buckets
        (DeletionPolicy::Delete, None) => info!("owning claim is gone, nothing to delete"),
        (DeletionPolicy::Delete, Some(claim)) => {
            let credentials = admin_credentials(ctx, claim).await?;
            match ctx.buckets.delete_bucket(&credentials, &bucket.name_any()).await {
                Ok(()) => info!("bucket deleted"),
                Err(RgwError::NoSuchBucket) => info!("bucket already gone"),
                Err(e) => {
                    warn!(error = %e, "failed to delete bucket");
                    let failed = S3BucketStatus {
                        ready: false,
                        reason: Some(e.to_string()),
                    };
                    ctx.store.patch_bucket_status(bucket, &failed).await?;
                    return Ok(Action::requeue(TRANSIENT_REQUEUE));
                }
            }
        }
    }

    ctx.store
        .remove_bucket_finalizer(bucket, BUCKET_FINALIZER)
        .await?;
    Ok(Action::await_change())
}
