//! S3User garbage collection
//!
//! An S3User outlives its claim when the claim disappears without running
//! cleanup, e.g. after its finalizer was stripped by hand. This controller
//! notices, removes the RGW user and deletes the S3User.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::Context;
use crate::crd::S3User;
use crate::naming::CephIdentity;
use crate::rgw::RgwError;
use crate::Error;

/// Reconcile an S3User
#[instrument(skip(user, ctx), fields(s3user = %user.name_any()))]
pub async fn reconcile(user: Arc<S3User>, ctx: Arc<Context>) -> Result<Action, Error> {
    if user.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }
    if !ctx.serves_class(&user.spec.s3_user_class) {
        debug!(class = %user.spec.s3_user_class, "S3User belongs to another user class");
        return Ok(Action::await_change());
    }
    let Some((namespace, claim)) = user.claim_key() else {
        warn!("S3User has no claimRef, leaving it alone");
        return Ok(Action::await_change());
    };

    if ctx.store.get_claim(&namespace, &claim).await?.is_some() {
        return Ok(Action::await_change());
    }

    info!(claim = %claim, namespace = %namespace, "claim is gone, collecting orphaned S3User");
    let user_id = CephIdentity::new(&ctx.cluster_name, &namespace, &claim).user_id;
    match ctx.storage.remove_user(&user_id, false).await {
        Ok(()) | Err(RgwError::NoSuchUser) => {}
        Err(e) => return Err(e.into()),
    }
    ctx.store.delete_s3_user(&user.name_any()).await?;
    Ok(Action::await_change())
}
