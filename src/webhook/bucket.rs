//! S3Bucket validating webhook
//!
//! A bucket must name an existing claim in its own namespace, and that
//! reference can never be changed afterwards.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, Json};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::ResourceExt;
use tracing::{debug, error, info, instrument};

use super::{bounded, respond, Rejection, Violation, WebhookState};
use crate::crd::S3Bucket;
use crate::store::ObjectStore;

/// Validates S3Bucket writes against their owning claim
pub struct BucketAdmissionGate<'a> {
    store: &'a dyn ObjectStore,
    timeout: Duration,
}

impl<'a> BucketAdmissionGate<'a> {
    /// Create a gate reading through `store`
    pub fn new(store: &'a dyn ObjectStore, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// The referenced claim must exist
    pub async fn validate_create(&self, bucket: &S3Bucket) -> Result<(), Rejection> {
        bounded(self.timeout, async {
            let claim = &bucket.spec.s3_user_ref;
            let namespace = bucket.namespace().unwrap_or_default();
            match self.store.get_claim(&namespace, claim).await? {
                Some(_) => Ok(()),
                None => Err(Rejection::Denied(vec![Violation::UserRefNotFound {
                    claim: claim.clone(),
                }])),
            }
        })
        .await
    }

    /// The claim reference is immutable
    pub async fn validate_update(
        &self,
        bucket: &S3Bucket,
        previous: &S3Bucket,
    ) -> Result<(), Rejection> {
        if bucket.spec.s3_user_ref != previous.spec.s3_user_ref {
            return Err(Rejection::Denied(vec![Violation::UserRefImmutable]));
        }
        Ok(())
    }
}

/// Handle validating admission review for S3Buckets
pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<S3Bucket>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<S3Bucket> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(review_bucket(&state, &req).await.into_review())
}

#[instrument(skip_all, fields(uid = %req.uid, bucket = %req.name, namespace = ?req.namespace))]
async fn review_bucket(state: &WebhookState, req: &AdmissionRequest<S3Bucket>) -> AdmissionResponse {
    let gate = BucketAdmissionGate::new(state.store.as_ref(), state.validation_timeout);

    let outcome = match (&req.operation, &req.object, &req.old_object) {
        (Operation::Create, Some(bucket), _) => {
            info!("validate create");
            gate.validate_create(bucket).await
        }
        (Operation::Update, Some(bucket), Some(previous)) => {
            info!("validate update");
            gate.validate_update(bucket, previous).await
        }
        (operation, _, _) => {
            debug!(?operation, "nothing to validate");
            Ok(())
        }
    };

    respond(req, outcome)
}
