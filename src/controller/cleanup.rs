//! Claim cleanup workflow
//!
//! Runs once a claim carrying the cleanup finalizer is marked for deletion.
//! Each step tolerates its target being gone already, so a cleanup that
//! failed halfway simply starts over from the first step.

use kube::ResourceExt;
use tracing::{info, instrument};

use super::Context;
use crate::crd::S3UserClaim;
use crate::quota::StatusProjector;
use crate::rgw::RgwError;
use crate::{Result, CLAIM_FINALIZER};

/// Ordered deprovisioning steps for one claim
pub struct CleanupWorkflow<'a> {
    ctx: &'a Context,
    claim: &'a S3UserClaim,
}

impl<'a> CleanupWorkflow<'a> {
    /// Create the workflow for a claim
    pub fn new(ctx: &'a Context, claim: &'a S3UserClaim) -> Self {
        Self { ctx, claim }
    }

    /// Remove the RGW user and S3User, release quota, then the finalizer
    #[instrument(skip(self), fields(claim = %self.claim.name_any(), namespace = ?self.claim.namespace()))]
    pub async fn run(&self) -> Result<()> {
        self.remove_rgw_user().await?;

        let s3_user = self.claim.s3_user_name();
        self.ctx.store.delete_s3_user(&s3_user).await?;
        info!(s3user = %s3_user, "S3User removed");

        StatusProjector::new(self.ctx.store.as_ref(), self.ctx.retry.clone())
            .publish(self.claim, false)
            .await?;

        self.ctx
            .store
            .remove_claim_finalizer(self.claim, CLAIM_FINALIZER)
            .await?;
        info!("cleanup finished, finalizer removed");
        Ok(())
    }

    /// Remove the user together with its buckets and objects
    async fn remove_rgw_user(&self) -> Result<()> {
        let user_id = self.claim.ceph_identity(&self.ctx.cluster_name).user_id;
        match self.ctx.storage.remove_user(&user_id, true).await {
            Ok(()) => {
                info!(user = %user_id, "RGW user removed");
                Ok(())
            }
            Err(RgwError::NoSuchUser) => {
                info!(user = %user_id, "RGW user already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
