//! Subuser set reconciliation
//!
//! Converges the subusers RGW reports for a user onto the set a claim asks
//! for. The diff is computed over full subuser ids and returned sorted, so
//! the resulting actions never depend on the order RGW lists subusers in.

use std::collections::BTreeMap;

use tracing::info;

use crate::naming::{subuser_secret_name, CephIdentity, READONLY_SUBUSER};
use crate::rgw::{StorageAdmin, SubuserAccess};
use crate::store::ObjectStore;
use crate::Result;

/// A single change to a user's subuser set
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SubuserAction {
    /// Create the subuser with this full id
    Create(String),
    /// Remove the subuser with this full id
    Remove(String),
}

impl SubuserAction {
    /// Full subuser id the action applies to
    pub fn id(&self) -> &str {
        match self {
            Self::Create(id) | Self::Remove(id) => id,
        }
    }
}

/// Actions turning `actual` into `desired`, sorted by subuser id
pub fn diff<D, A>(desired: D, actual: A) -> Vec<SubuserAction>
where
    D: IntoIterator,
    D::Item: Into<String>,
    A: IntoIterator,
    A::Item: Into<String>,
{
    let mut actions: BTreeMap<String, SubuserAction> = desired
        .into_iter()
        .map(Into::into)
        .map(|id| (id.clone(), SubuserAction::Create(id)))
        .collect();

    for id in actual.into_iter().map(Into::into) {
        if actions.remove(&id).is_none() {
            actions.insert(id.clone(), SubuserAction::Remove(id));
        }
    }

    actions.into_values().collect()
}

/// Default access for a subuser; bucket policies grant everything else
pub fn access_for(short_name: &str) -> SubuserAccess {
    if short_name == READONLY_SUBUSER {
        SubuserAccess::Read
    } else {
        SubuserAccess::None
    }
}

/// Applies subuser actions for one claim
pub struct SubuserReconciler<'a> {
    storage: &'a dyn StorageAdmin,
    store: &'a dyn ObjectStore,
    identity: &'a CephIdentity,
    namespace: &'a str,
    claim: &'a str,
}

impl<'a> SubuserReconciler<'a> {
    /// Create a reconciler for the claim `namespace/claim`
    pub fn new(
        storage: &'a dyn StorageAdmin,
        store: &'a dyn ObjectStore,
        identity: &'a CephIdentity,
        namespace: &'a str,
        claim: &'a str,
    ) -> Self {
        Self {
            storage,
            store,
            identity,
            namespace,
            claim,
        }
    }

    /// Converge the user's subusers onto `desired` short names
    ///
    /// Returns the number of actions applied.
    pub async fn reconcile(&self, desired: &[String], actual: &[String]) -> Result<usize> {
        let desired_ids = desired.iter().map(|short| self.identity.subuser_id(short));
        let actions = diff(desired_ids, actual.iter().cloned());
        for action in &actions {
            self.apply(action).await?;
        }
        Ok(actions.len())
    }

    /// Apply a single action
    ///
    /// Removing a subuser also deletes its credential secret.
    pub async fn apply(&self, action: &SubuserAction) -> Result<()> {
        let user_id = &self.identity.user_id;
        let short = self.identity.subuser_short_name(action.id()).unwrap_or(action.id());

        match action {
            SubuserAction::Create(id) => {
                let access = access_for(short);
                self.storage.create_subuser(user_id, id, access).await?;
                info!(subuser = %id, access = access.as_str(), "subuser created");
            }
            SubuserAction::Remove(id) => {
                self.storage.remove_subuser(user_id, id).await?;
                self.store
                    .delete_secret(self.namespace, &subuser_secret_name(self.claim, short))
                    .await?;
                info!(subuser = %id, "subuser removed");
            }
        }
        Ok(())
    }
}
