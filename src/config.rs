//! Operator configuration
//!
//! Configuration is assembled from three layers with fixed precedence:
//!
//! 1. built-in defaults ([`Config::default`])
//! 2. an optional YAML file (camelCase keys, every field optional)
//! 3. environment variables (`S3CO_*`, plus `ENABLE_WEBHOOKS`)
//!
//! Each layer is a [`PartialConfig`] merged onto the previous result, so a
//! later layer only overrides the fields it actually sets.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, DEFAULT_S3_USER_CLASS, DEFAULT_WEBHOOK_PORT};

/// Log output format
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(Error::config(format!(
                "invalid log format: {s}, expected one of: text, json"
            ))),
        }
    }
}

/// Ceph RGW connection settings
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RgwConfig {
    /// Base URL of the RGW endpoint (admin API and S3)
    pub endpoint: String,
    /// Access key of the RGW admin user
    pub access_key: String,
    /// Secret key of the RGW admin user
    pub secret_key: String,
    /// Region used for request signing
    pub region: String,
}

impl Default for RgwConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            region: "us-east-1".to_string(),
        }
    }
}

/// Admission webhook server settings
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct WebhookConfig {
    /// Whether the webhook server runs at all
    pub enabled: bool,
    /// HTTPS listen port
    pub port: u16,
    /// PEM certificate served by the webhook
    pub cert_path: PathBuf,
    /// PEM private key for the certificate
    pub key_path: PathBuf,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_WEBHOOK_PORT,
            cert_path: PathBuf::from("/tmp/k8s-webhook-server/serving-certs/tls.crt"),
            key_path: PathBuf::from("/tmp/k8s-webhook-server/serving-certs/tls.key"),
        }
    }
}

/// Fully resolved operator configuration
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Config {
    /// Name of the Kubernetes cluster, part of every RGW tenant
    pub cluster_name: String,
    /// User class this operator instance serves
    pub s3_user_class: String,
    /// Deadline for a single admission review
    pub validation_webhook_timeout_secs: u64,
    /// Deadline for a single reconcile
    pub reconcile_timeout_secs: u64,
    /// RGW connection
    pub rgw: RgwConfig,
    /// Webhook server
    pub webhook: WebhookConfig,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_name: "okd4-main".to_string(),
            s3_user_class: DEFAULT_S3_USER_CLASS.to_string(),
            validation_webhook_timeout_secs: 10,
            reconcile_timeout_secs: 60,
            rgw: RgwConfig::default(),
            webhook: WebhookConfig::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// RGW layer overrides
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PartialRgwConfig {
    /// Override for [`RgwConfig::endpoint`]
    pub endpoint: Option<String>,
    /// Override for [`RgwConfig::access_key`]
    pub access_key: Option<String>,
    /// Override for [`RgwConfig::secret_key`]
    pub secret_key: Option<String>,
    /// Override for [`RgwConfig::region`]
    pub region: Option<String>,
}

/// Webhook layer overrides
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PartialWebhookConfig {
    /// Override for [`WebhookConfig::enabled`]
    pub enabled: Option<bool>,
    /// Override for [`WebhookConfig::port`]
    pub port: Option<u16>,
    /// Override for [`WebhookConfig::cert_path`]
    pub cert_path: Option<PathBuf>,
    /// Override for [`WebhookConfig::key_path`]
    pub key_path: Option<PathBuf>,
}

/// One configuration layer; unset fields leave the lower layer untouched
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PartialConfig {
    /// Override for [`Config::cluster_name`]
    pub cluster_name: Option<String>,
    /// Override for [`Config::s3_user_class`]
    pub s3_user_class: Option<String>,
    /// Override for [`Config::validation_webhook_timeout_secs`]
    #[serde(alias = "validationWebhookTimeoutSeconds")]
    pub validation_webhook_timeout_secs: Option<u64>,
    /// Override for [`Config::reconcile_timeout_secs`]
    #[serde(alias = "reconcileTimeoutSeconds")]
    pub reconcile_timeout_secs: Option<u64>,
    /// RGW overrides
    pub rgw: Option<PartialRgwConfig>,
    /// Webhook overrides
    pub webhook: Option<PartialWebhookConfig>,
    /// Override for [`Config::log_format`]
    pub log_format: Option<LogFormat>,
}

impl PartialConfig {
    /// Parse a YAML configuration layer
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| Error::config(format!("failed to parse config: {e}")))
    }

    /// Read a YAML configuration layer from disk
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    /// Build the environment layer from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Build the environment layer from an arbitrary lookup
    pub fn from_env_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let rgw = PartialRgwConfig {
            endpoint: get("S3CO_RGW_ENDPOINT"),
            access_key: get("S3CO_RGW_ACCESS_KEY"),
            secret_key: get("S3CO_RGW_SECRET_KEY"),
            region: get("S3CO_RGW_REGION"),
        };
        let webhook = PartialWebhookConfig {
            enabled: get("ENABLE_WEBHOOKS").map(|v| v != "false"),
            port: get("S3CO_WEBHOOK_PORT")
                .map(|v| parse_env("S3CO_WEBHOOK_PORT", &v))
                .transpose()?,
            cert_path: get("S3CO_WEBHOOK_CERT_PATH").map(PathBuf::from),
            key_path: get("S3CO_WEBHOOK_KEY_PATH").map(PathBuf::from),
        };

        Ok(Self {
            cluster_name: get("S3CO_CLUSTER_NAME"),
            s3_user_class: get("S3CO_S3_USER_CLASS"),
            validation_webhook_timeout_secs: get("S3CO_VALIDATION_WEBHOOK_TIMEOUT_SECS")
                .map(|v| parse_env("S3CO_VALIDATION_WEBHOOK_TIMEOUT_SECS", &v))
                .transpose()?,
            reconcile_timeout_secs: get("S3CO_RECONCILE_TIMEOUT_SECS")
                .map(|v| parse_env("S3CO_RECONCILE_TIMEOUT_SECS", &v))
                .transpose()?,
            rgw: (rgw != PartialRgwConfig::default()).then_some(rgw),
            webhook: (webhook != PartialWebhookConfig::default()).then_some(webhook),
            log_format: get("S3CO_LOG_FORMAT").map(|v| v.parse()).transpose()?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::config(format!("{key} has invalid value '{value}'")))
}

impl Config {
    /// Load configuration: defaults, then the optional file, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.map(PartialConfig::from_file).transpose()?;
        Self::layered(file, PartialConfig::from_env()?)
    }

    /// Merge the file and environment layers onto the defaults and validate
    pub fn layered(file: Option<PartialConfig>, env: PartialConfig) -> Result<Self> {
        let mut config = Self::default();
        if let Some(file) = file {
            config.merge(file);
        }
        config.merge(env);
        config.validate()?;
        Ok(config)
    }

    /// Overlay a layer onto this configuration
    pub fn merge(&mut self, layer: PartialConfig) {
        if let Some(v) = layer.cluster_name {
            self.cluster_name = v;
        }
        if let Some(v) = layer.s3_user_class {
            self.s3_user_class = v;
        }
        if let Some(v) = layer.validation_webhook_timeout_secs {
            self.validation_webhook_timeout_secs = v;
        }
        if let Some(v) = layer.reconcile_timeout_secs {
            self.reconcile_timeout_secs = v;
        }
        if let Some(v) = layer.log_format {
            self.log_format = v;
        }
        if let Some(rgw) = layer.rgw {
            if let Some(v) = rgw.endpoint {
                self.rgw.endpoint = v;
            }
            if let Some(v) = rgw.access_key {
                self.rgw.access_key = v;
            }
            if let Some(v) = rgw.secret_key {
                self.rgw.secret_key = v;
            }
            if let Some(v) = rgw.region {
                self.rgw.region = v;
            }
        }
        if let Some(webhook) = layer.webhook {
            if let Some(v) = webhook.enabled {
                self.webhook.enabled = v;
            }
            if let Some(v) = webhook.port {
                self.webhook.port = v;
            }
            if let Some(v) = webhook.cert_path {
                self.webhook.cert_path = v;
            }
            if let Some(v) = webhook.key_path {
                self.webhook.key_path = v;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(Error::config("clusterName must not be empty"));
        }
        if self.s3_user_class.trim().is_empty() {
            return Err(Error::config("s3UserClass must not be empty"));
        }
        if !(self.rgw.endpoint.starts_with("http://") || self.rgw.endpoint.starts_with("https://"))
        {
            return Err(Error::config(format!(
                "rgw.endpoint '{}' must be an http(s) URL",
                self.rgw.endpoint
            )));
        }
        if self.validation_webhook_timeout_secs == 0 || self.reconcile_timeout_secs == 0 {
            return Err(Error::config("timeouts must be at least one second"));
        }
        Ok(())
    }

    /// Deadline for a single admission review
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_webhook_timeout_secs)
    }

    /// Deadline for a single reconcile
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }
}
