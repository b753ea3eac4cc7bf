//! S3UserClaim reconciliation
//!
//! Dispatches each claim to the provisioning or cleanup workflow and bounds
//! the whole reconcile by the configured timeout.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::{CleanupWorkflow, Context, Flow, ProvisionWorkflow, HALT_REQUEUE};
use crate::crd::S3UserClaim;
use crate::{Error, CLAIM_FINALIZER};

/// Reconcile an S3UserClaim
///
/// Claims of another user class belong to another operator instance and are
/// left alone. A deleting claim runs cleanup only while it still carries our
/// finalizer; everything else is provisioned.
#[instrument(skip(claim, ctx), fields(claim = %claim.name_any(), namespace = ?claim.namespace()))]
pub async fn reconcile(claim: Arc<S3UserClaim>, ctx: Arc<Context>) -> Result<Action, Error> {
    if !ctx.serves_class(&claim.spec.s3_user_class) {
        debug!(class = %claim.spec.s3_user_class, "claim belongs to another user class");
        return Ok(Action::await_change());
    }

    let work = async {
        if claim.is_deleting() {
            if !claim.has_finalizer(CLAIM_FINALIZER) {
                debug!("claim is deleting and already cleaned up");
                return Ok::<_, Error>(Action::await_change());
            }
            info!("running cleanup");
            CleanupWorkflow::new(&ctx, &claim).run().await?;
            return Ok(Action::await_change());
        }

        match ProvisionWorkflow::new(&ctx, &claim).run().await? {
            Flow::Continue => Ok(Action::await_change()),
            Flow::Halt => Ok(Action::requeue(HALT_REQUEUE)),
        }
    };

    tokio::time::timeout(ctx.reconcile_timeout, work)
        .await
        .map_err(|_| {
            Error::timeout(format!(
                "reconcile of claim {} did not finish within {:?}",
                claim.name_any(),
                ctx.reconcile_timeout
            ))
        })?
}
