//! Tracing subscriber setup
//!
//! `RUST_LOG` controls filtering; without it the operator logs at info and
//! keeps noisy HTTP internals at warn.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogFormat;
use crate::{Error, Result};

const DEFAULT_FILTER: &str = "info,kube=info,tower=warn,hyper=warn,reqwest=warn";

/// Install the global tracing subscriber
pub fn init(format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match format {
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
    };

    result.map_err(|e| Error::config(format!("failed to initialize tracing: {e}")))
}
