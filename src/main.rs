//! s3-claim-operator - quota-aware S3 user provisioning for Ceph RGW

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing::{debug, error, info};

use s3_claim_operator::config::Config;
use s3_claim_operator::controller::{self, error_policy, Context};
use s3_claim_operator::crd::{S3Bucket, S3User, S3UserClaim};
use s3_claim_operator::retry::{retry_with_backoff, RetryConfig};
use s3_claim_operator::webhook::{self, WebhookState};
use s3_claim_operator::{telemetry, FIELD_MANAGER};

/// Server-side timeout for watch requests, below common proxy idle timeouts
const WATCH_TIMEOUT_SECS: u32 = 25;

/// s3-claim-operator - self-service S3 users with namespace and team quotas
#[derive(Parser, Debug)]
#[command(name = "s3-claim-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Path to a YAML configuration file
    #[arg(long, global = true, env = "S3CO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers and the admission webhook (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install the aws-lc-rs crypto provider: {e:?}");
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        for crd in [S3UserClaim::crd(), S3User::crd(), S3Bucket::crd()] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {e}"))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))?;
    telemetry::init(config.log_format).map_err(|e| anyhow::anyhow!("{e}"))?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(config).await,
    }
}

/// Ensure the operator's CRDs are installed
///
/// The operator applies its own CRDs on startup so their schema always
/// matches the running version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in [S3UserClaim::crd(), S3User::crd(), S3Bucket::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        info!(crd = %name, "installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install CRD {name}: {e}"))?;
    }
    Ok(())
}

/// Log the outcome of one reconcile
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    kind: &'static str,
    result: Result<T, E>,
) {
    match result {
        Ok(object) => debug!(kind, ?object, "reconciliation completed"),
        Err(e) => error!(kind, error = ?e, "reconciliation error"),
    }
}

async fn run_controller(config: Config) -> anyhow::Result<()> {
    info!(
        cluster = %config.cluster_name,
        class = %config.s3_user_class,
        rgw = %config.rgw.endpoint,
        "s3-claim-operator starting"
    );

    let client = retry_with_backoff(
        &RetryConfig::with_max_attempts(10),
        "create_kube_client",
        Client::try_default,
    )
    .await
    .map_err(|e| anyhow::anyhow!("failed to create Kubernetes client: {e}"))?;

    ensure_crds_installed(&client).await?;

    let ctx = Arc::new(
        Context::builder(client.clone(), &config)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build controller context: {e}"))?,
    );

    let watcher = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    let claims: Api<S3UserClaim> = Api::all(client.clone());
    let users: Api<S3User> = Api::all(client.clone());
    let buckets: Api<S3Bucket> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());

    info!("starting controllers: S3UserClaim, S3User, S3Bucket");

    let claim_controller = Controller::new(claims, watcher())
        .owns(secrets, watcher())
        .watches(users.clone(), watcher(), |user: S3User| {
            user.claim_key()
                .map(|(namespace, name)| ObjectRef::<S3UserClaim>::new(&name).within(&namespace))
        })
        .shutdown_on_signal()
        .run(controller::claim::reconcile, error_policy, ctx.clone())
        .for_each(|result| async move { log_reconcile_result("S3UserClaim", result) });

    let user_controller = Controller::new(users, watcher())
        .shutdown_on_signal()
        .run(controller::s3user::reconcile, error_policy, ctx.clone())
        .for_each(|result| async move { log_reconcile_result("S3User", result) });

    let bucket_controller = Controller::new(buckets, watcher())
        .shutdown_on_signal()
        .run(controller::bucket::reconcile, error_policy, ctx.clone())
        .for_each(|result| async move { log_reconcile_result("S3Bucket", result) });

    let webhook_server = async {
        if !config.webhook.enabled {
            info!("admission webhooks disabled");
            return std::future::pending().await;
        }
        let state = Arc::new(WebhookState::new(
            ctx.store.clone(),
            config.s3_user_class.clone(),
            config.validation_timeout(),
        ));
        webhook::serve(&config.webhook, state).await
    };

    tokio::select! {
        _ = claim_controller => info!("S3UserClaim controller completed"),
        _ = user_controller => info!("S3User controller completed"),
        _ = bucket_controller => info!("S3Bucket controller completed"),
        result = webhook_server => {
            result.map_err(|e| anyhow::anyhow!("webhook server failed: {e}"))?;
        }
    }

    info!("s3-claim-operator shutting down");
    Ok(())
}
