//! Publishing quota usage onto quota-tracking objects
//!
//! Namespace usage goes into `status.used` of every `ResourceQuota` in the
//! namespace that limits an `s3/*` resource. Team usage goes into the team's
//! `ClusterResourceQuota`: the team total into `status.total.used`, and the
//! namespace's own usage into its `status.namespaces[]` entry.
//!
//! Writes are skipped when the stored values are already equal by quantity
//! value. Conflicting writes are re-read and retried a bounded number of times.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ResourceQuota, ResourceQuotaStatus};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::{namespace_usage, resolve_team, team_usage, Dimension, QuotaTotals};
use crate::crd::{ClusterResourceQuotaStatus, ResourceQuotaStatusByNamespace, S3UserClaim};
use crate::retry::{retry_with_backoff_if, RetryConfig};
use crate::store::{ObjectStore, ReadConsistency};
use crate::{Error, Result};

/// Writes aggregate usage to namespace and team quota objects
pub struct StatusProjector<'a> {
    store: &'a dyn ObjectStore,
    retry: RetryConfig,
}

/// Returns true if the quota limits at least one s3 resource
fn tracks_s3(quota: &ResourceQuota) -> bool {
    quota
        .spec
        .as_ref()
        .and_then(|s| s.hard.as_ref())
        .map(|hard| Dimension::ALL.iter().any(|d| hard.contains_key(d.resource_name())))
        .unwrap_or(false)
}

fn merge_used(status: &mut ResourceQuotaStatus, totals: &QuotaTotals) {
    status
        .used
        .get_or_insert_with(BTreeMap::new)
        .extend(totals.to_resource_list());
}

impl<'a> StatusProjector<'a> {
    /// Create a projector writing through `store`
    pub fn new(store: &'a dyn ObjectStore, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Recompute usage around a claim and publish it at both scopes
    ///
    /// `include_target` is true while the claim is live and false once it is
    /// being cleaned up. Sibling claims are read with a quorum list.
    pub async fn publish(&self, claim: &S3UserClaim, include_target: bool) -> Result<()> {
        let namespace = claim.namespace_or_default();

        let namespace_totals =
            namespace_usage(self.store, claim, include_target, ReadConsistency::Strong).await?;
        self.project_namespace(&namespace, &namespace_totals).await?;

        let team = resolve_team(self.store, &namespace).await?;
        let team_totals =
            team_usage(self.store, &team, claim, include_target, ReadConsistency::Strong).await?;
        self.project_team(&team, &namespace, &team_totals, &namespace_totals)
            .await
    }

    /// Write namespace usage into every s3-tracking ResourceQuota
    pub async fn project_namespace(&self, namespace: &str, totals: &QuotaTotals) -> Result<()> {
        let quotas = self.store.list_resource_quotas(namespace).await?;
        for quota in quotas.iter().filter(|q| tracks_s3(q)) {
            let name = quota.name_any();
            let store = self.store;
            let name_ref = name.as_str();

            retry_with_backoff_if(
                &self.retry,
                "project_namespace_quota",
                |e: &Error| e.is_conflict(),
                || async move {
                    let Some(current) = store.get_resource_quota(namespace, name_ref).await? else {
                        return Ok(());
                    };
                    let used = current.status.as_ref().and_then(|s| s.used.as_ref());
                    if totals.matches_resource_list(used) {
                        debug!(namespace = %namespace, quota = %name_ref, "namespace usage unchanged");
                        return Ok(());
                    }
                    store
                        .patch_resource_quota_used(&current, &totals.to_resource_list())
                        .await?;
                    info!(namespace = %namespace, quota = %name_ref, "namespace usage updated");
                    Ok(())
                },
            )
            .await?;
        }
        Ok(())
    }

    /// Write team usage into the team's ClusterResourceQuota
    ///
    /// A team without a quota object is skipped with a warning; admission
    /// already refuses claims for such teams.
    pub async fn project_team(
        &self,
        team: &str,
        namespace: &str,
        team_totals: &QuotaTotals,
        namespace_totals: &QuotaTotals,
    ) -> Result<()> {
        let store = self.store;

        retry_with_backoff_if(
            &self.retry,
            "project_team_quota",
            |e: &Error| e.is_conflict(),
            || async move {
                let Some(quota) = store.get_team_quota(team).await? else {
                    warn!(team = %team, "team has no quota object, skipping usage update");
                    return Ok(());
                };

                let current = quota.status.clone().unwrap_or_default();
                let entry = current.namespaces.iter().find(|n| n.namespace == namespace);
                let unchanged = team_totals.matches_resource_list(current.total.used.as_ref())
                    && entry
                        .map(|e| namespace_totals.matches_resource_list(e.status.used.as_ref()))
                        .unwrap_or(false);
                if unchanged {
                    debug!(team = %team, namespace = %namespace, "team usage unchanged");
                    return Ok(());
                }

                let next = with_usage(current, namespace, team_totals, namespace_totals);
                store.patch_team_quota_status(&quota, &next).await?;
                info!(team = %team, namespace = %namespace, "team usage updated");
                Ok(())
            },
        )
        .await
    }
}

/// Team status with the total and the namespace's breakdown entry updated
fn with_usage(
    mut status: ClusterResourceQuotaStatus,
    namespace: &str,
    team_totals: &QuotaTotals,
    namespace_totals: &QuotaTotals,
) -> ClusterResourceQuotaStatus {
    merge_used(&mut status.total, team_totals);
    match status.namespaces.iter_mut().find(|n| n.namespace == namespace) {
        Some(entry) => merge_used(&mut entry.status, namespace_totals),
        None => {
            let mut entry = ResourceQuotaStatusByNamespace {
                namespace: namespace.to_string(),
                status: ResourceQuotaStatus::default(),
            };
            merge_used(&mut entry.status, namespace_totals);
            status.namespaces.push(entry);
        }
    }
    status
}
