//! Controller implementations for the S3 CRDs
//!
//! Three controllers share one [`Context`]:
//!
//! - [`claim`] reconciles S3UserClaims by running the provisioning workflow,
//!   or the cleanup workflow once deletion is requested
//! - [`s3user`] garbage-collects S3Users whose claim no longer exists
//! - [`bucket`] creates, configures and deletes S3Buckets with the owning
//!   claim's admin credentials
//!
//! Workflow steps are strictly sequential. A step either lets the workflow
//! continue or halts it for this round; errors are returned to the runtime,
//! which redelivers the object through [`error_policy`].

pub mod bucket;
pub mod claim;
pub mod cleanup;
pub mod provision;
pub mod s3user;
pub mod subuser;

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tracing::error;

use crate::config::Config;
use crate::retry::RetryConfig;
use crate::rgw::{BucketAdmin, RgwAdminClient, S3BucketClient, StorageAdmin};
use crate::store::{KubeObjectStore, ObjectStore};
use crate::{Error, Result};

pub use cleanup::CleanupWorkflow;
pub use provision::ProvisionWorkflow;
pub use subuser::SubuserAction;

/// Requeue delay for transient failures
pub const TRANSIENT_REQUEUE: Duration = Duration::from_secs(5);

/// Requeue delay for failures that need an operator to fix something
pub const VALIDATION_REQUEUE: Duration = Duration::from_secs(300);

/// Requeue delay after a step halted the workflow, e.g. on a status conflict
pub const HALT_REQUEUE: Duration = Duration::from_secs(1);

/// Outcome of a single workflow step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Run the next step
    Continue,
    /// Stop here and requeue shortly
    Halt,
}

/// Controller context containing shared state and clients
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client, &config).build()?;
/// ```
pub struct Context {
    /// Kubernetes object access (trait object for testability)
    pub store: Arc<dyn ObjectStore>,
    /// RGW admin-ops client
    pub storage: Arc<dyn StorageAdmin>,
    /// RGW S3 client for bucket operations
    pub buckets: Arc<dyn BucketAdmin>,
    /// Cluster name used to derive RGW tenants
    pub cluster_name: String,
    /// User class served by this operator instance
    pub s3_user_class: String,
    /// Upper bound on a single claim reconcile
    pub reconcile_timeout: Duration,
    /// Retry policy for conflicting quota status writes
    pub retry: RetryConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, config: &Config) -> ContextBuilder {
        ContextBuilder::new(client, config)
    }

    /// Create a context for testing with in-memory or mock clients
    #[cfg(test)]
    pub fn for_testing(
        store: Arc<dyn ObjectStore>,
        storage: Arc<dyn StorageAdmin>,
        buckets: Arc<dyn BucketAdmin>,
    ) -> Self {
        Self {
            store,
            storage,
            buckets,
            cluster_name: "okd4-main".to_string(),
            s3_user_class: crate::DEFAULT_S3_USER_CLASS.to_string(),
            reconcile_timeout: Duration::from_secs(60),
            retry: RetryConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                ..RetryConfig::conflict()
            },
        }
    }

    /// Returns true if this operator instance serves the claim's user class
    pub fn serves_class(&self, class: &str) -> bool {
        let class = if class.is_empty() {
            self.s3_user_class.as_str()
        } else {
            class
        };
        class == self.s3_user_class
    }
}

/// Builder for constructing [`Context`] instances
///
/// Clients default to the production implementations built from the
/// configuration; the override setters swap them out.
pub struct ContextBuilder {
    client: Client,
    config: Config,
    store: Option<Arc<dyn ObjectStore>>,
    storage: Option<Arc<dyn StorageAdmin>>,
    buckets: Option<Arc<dyn BucketAdmin>>,
    retry: RetryConfig,
}

impl ContextBuilder {
    /// Create a new builder with the given Kubernetes client and configuration
    fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            config: config.clone(),
            store: None,
            storage: None,
            buckets: None,
            retry: RetryConfig::conflict(),
        }
    }

    /// Override the object store (primarily for testing)
    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the RGW admin client
    pub fn storage_admin(mut self, storage: Arc<dyn StorageAdmin>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Override the RGW bucket client
    pub fn bucket_admin(mut self, buckets: Arc<dyn BucketAdmin>) -> Self {
        self.buckets = Some(buckets);
        self
    }

    /// Set the retry policy for quota status conflicts
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Build the Context
    pub fn build(self) -> Result<Context> {
        let storage: Arc<dyn StorageAdmin> = match self.storage {
            Some(storage) => storage,
            None => Arc::new(RgwAdminClient::new(&self.config.rgw)?),
        };
        let buckets: Arc<dyn BucketAdmin> = match self.buckets {
            Some(buckets) => buckets,
            None => Arc::new(S3BucketClient::new(&self.config.rgw)?),
        };

        Ok(Context {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(KubeObjectStore::new(self.client.clone()))),
            storage,
            buckets,
            reconcile_timeout: self.config.reconcile_timeout(),
            cluster_name: self.config.cluster_name,
            s3_user_class: self.config.s3_user_class,
            retry: self.retry,
        })
    }
}

/// Requeue delay for a failed reconcile
pub fn requeue_after(error: &Error) -> Duration {
    match error {
        Error::Validation(_) | Error::Quantity(_) => VALIDATION_REQUEUE,
        _ => TRANSIENT_REQUEUE,
    }
}

/// Error policy shared by every controller
///
/// Logs the failure and requeues. Errors that need an operator to fix the
/// input (a namespace without a team label, a malformed quantity) back off
/// for minutes instead of seconds.
pub fn error_policy<K>(object: Arc<K>, error: &Error, _ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    error!(
        ?error,
        kind = %K::kind(&()),
        name = %object.name_any(),
        namespace = ?object.namespace(),
        "reconciliation failed"
    );
    Action::requeue(requeue_after(error))
}
