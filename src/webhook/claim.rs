//! S3UserClaim validating webhook
//!
//! Rejects claims whose quota would push the namespace or the team past its
//! hard limits, changes to the immutable user class, and deletes that would
//! orphan buckets. Every violated dimension is reported, not only the first.
//!
//! Sibling claims are listed with a quorum read so two claims admitted at the
//! same time always see each other.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, Json};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::ResourceExt;
use tracing::{debug, error, info, instrument};

use super::{bounded, respond, Rejection, Violation, WebhookState};
use crate::crd::S3UserClaim;
use crate::quantity;
use crate::quota::{exceeded, namespace_usage, resolve_team, team_usage, Dimension, Scope};
use crate::store::{ObjectStore, ReadConsistency};

/// Validates S3UserClaim writes against namespace and team quota
pub struct AdmissionGate<'a> {
    store: &'a dyn ObjectStore,
    default_class: &'a str,
    timeout: Duration,
}

impl<'a> AdmissionGate<'a> {
    /// Create a gate reading through `store`, bounding each decision by `timeout`
    pub fn new(store: &'a dyn ObjectStore, default_class: &'a str, timeout: Duration) -> Self {
        Self {
            store,
            default_class,
            timeout,
        }
    }

    /// Validate a new claim
    pub async fn validate_create(&self, claim: &S3UserClaim) -> Result<(), Rejection> {
        bounded(self.timeout, self.check_quota(claim)).await
    }

    /// Validate a change to an existing claim
    pub async fn validate_update(
        &self,
        claim: &S3UserClaim,
        previous: &S3UserClaim,
    ) -> Result<(), Rejection> {
        if claim.user_class(self.default_class) != previous.user_class(self.default_class) {
            return Err(Rejection::Denied(vec![Violation::ImmutableClass]));
        }
        bounded(self.timeout, self.check_quota(claim)).await
    }

    /// Refuse deleting a claim that buckets still depend on
    pub async fn validate_delete(&self, claim: &S3UserClaim) -> Result<(), Rejection> {
        bounded(self.timeout, self.check_dependents(claim)).await
    }

    async fn check_quota(&self, claim: &S3UserClaim) -> Result<(), Rejection> {
        let invalid = invalid_quantities(claim);
        if !invalid.is_empty() {
            return Err(Rejection::Denied(invalid));
        }

        let mut violations = Vec::new();
        let namespace = claim.namespace_or_default();

        // namespace scope
        let totals = namespace_usage(self.store, claim, true, ReadConsistency::Strong).await?;
        for quota in self.store.list_resource_quotas(&namespace).await? {
            let hard = quota.spec.as_ref().and_then(|s| s.hard.as_ref());
            for (dimension, limit) in exceeded(&totals, hard)? {
                let violation = Violation::Exceeded {
                    scope: Scope::Namespace,
                    dimension,
                    used: totals.get(dimension),
                    limit,
                };
                if !violations.contains(&violation) {
                    violations.push(violation);
                }
            }
        }

        // team scope
        let team = resolve_team(self.store, &namespace).await?;
        match self.store.get_team_quota(&team).await? {
            None => violations.push(Violation::QuotaNotDefined { team }),
            Some(team_quota) => {
                let totals =
                    team_usage(self.store, &team, claim, true, ReadConsistency::Strong).await?;
                for (dimension, limit) in exceeded(&totals, team_quota.hard())? {
                    violations.push(Violation::Exceeded {
                        scope: Scope::Team,
                        dimension,
                        used: totals.get(dimension),
                        limit,
                    });
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(Rejection::Denied(violations))
        }
    }

    async fn check_dependents(&self, claim: &S3UserClaim) -> Result<(), Rejection> {
        let name = claim.name_any();
        let mut buckets: Vec<String> = self
            .store
            .list_buckets(&claim.namespace_or_default())
            .await?
            .iter()
            .filter(|b| b.spec.s3_user_ref == name)
            .map(|b| b.name_any())
            .collect();
        if buckets.is_empty() {
            return Ok(());
        }
        buckets.sort();
        Err(Rejection::Denied(vec![Violation::DependentBuckets { buckets }]))
    }
}

fn invalid_quantities(claim: &S3UserClaim) -> Vec<Violation> {
    let quota = &claim.spec.quota;
    let mut violations = Vec::new();
    for (dimension, value) in [
        (Dimension::Size, &quota.max_size),
        (Dimension::Objects, &quota.max_objects),
    ] {
        match quantity::parse(value) {
            Ok(v) if v < 0 => violations.push(Violation::InvalidQuantity {
                field: dimension.field_path(),
                message: format!("'{}' must not be negative", value.0),
            }),
            Ok(_) => {}
            Err(e) => violations.push(Violation::InvalidQuantity {
                field: dimension.field_path(),
                message: e.to_string(),
            }),
        }
    }
    if quota.max_buckets < 0 {
        violations.push(Violation::InvalidQuantity {
            field: Dimension::Buckets.field_path(),
            message: format!("{} must not be negative", quota.max_buckets),
        });
    }
    violations
}

/// Handle validating admission review for S3UserClaims
pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<S3UserClaim>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<S3UserClaim> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(review_claim(&state, &req).await.into_review())
}

#[instrument(skip_all, fields(uid = %req.uid, claim = %req.name, namespace = ?req.namespace))]
async fn review_claim(state: &WebhookState, req: &AdmissionRequest<S3UserClaim>) -> AdmissionResponse {
    let gate = AdmissionGate::new(
        state.store.as_ref(),
        &state.default_class,
        state.validation_timeout,
    );

    let outcome = match (&req.operation, &req.object, &req.old_object) {
        (Operation::Create, Some(claim), _) => {
            info!("validate create");
            gate.validate_create(claim).await
        }
        (Operation::Update, Some(claim), Some(previous)) => {
            info!("validate update");
            gate.validate_update(claim, previous).await
        }
        (Operation::Delete, _, Some(claim)) => {
            info!("validate delete");
            gate.validate_delete(claim).await
        }
        (operation, _, _) => {
            debug!(?operation, "nothing to validate");
            Ok(())
        }
    };

    respond(req, outcome)
}
