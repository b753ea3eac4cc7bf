//! Reading quota usage from the object store

use kube::ResourceExt;

use super::{aggregate, QuotaTotals, Scope};
use crate::crd::S3UserClaim;
use crate::store::{ObjectStore, ReadConsistency};
use crate::{Error, Result, TEAM_LABEL};

/// Team a namespace belongs to, from its team label
///
/// A missing namespace or label is a validation error: the claim cannot be
/// accounted until someone labels the namespace.
pub async fn resolve_team(store: &dyn ObjectStore, namespace: &str) -> Result<String> {
    let ns = store
        .get_namespace(namespace)
        .await?
        .ok_or_else(|| Error::validation(format!("namespace '{namespace}' not found")))?;

    ns.labels()
        .get(TEAM_LABEL)
        .filter(|team| !team.is_empty())
        .cloned()
        .ok_or_else(|| {
            Error::validation(format!(
                "namespace '{namespace}' has no '{TEAM_LABEL}' label"
            ))
        })
}

/// Names of every namespace labeled with the team
pub async fn team_namespaces(store: &dyn ObjectStore, team: &str) -> Result<Vec<String>> {
    let selector = format!("{TEAM_LABEL}={team}");
    Ok(store
        .list_namespaces(&selector)
        .await?
        .iter()
        .map(|ns| ns.name_any())
        .collect())
}

/// Quota requested by every claim in the target's namespace
pub async fn namespace_usage(
    store: &dyn ObjectStore,
    target: &S3UserClaim,
    include_target: bool,
    consistency: ReadConsistency,
) -> Result<QuotaTotals> {
    let namespace = target.namespace_or_default();
    let siblings = store.list_claims(&namespace, consistency).await?;
    aggregate(&siblings, target, Scope::Namespace, include_target)
}

/// Quota requested by every claim in every namespace of the team
pub async fn team_usage(
    store: &dyn ObjectStore,
    team: &str,
    target: &S3UserClaim,
    include_target: bool,
    consistency: ReadConsistency,
) -> Result<QuotaTotals> {
    let mut siblings = Vec::new();
    for namespace in team_namespaces(store, team).await? {
        siblings.extend(store.list_claims(&namespace, consistency).await?);
    }
    aggregate(&siblings, target, Scope::Team, include_target)
}
