//! RGW admin-ops REST client

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;

use super::transport::Transport;
use super::{Credentials, NewUser, QuotaSpec, RgwError, RgwUser, StorageAdmin, SubuserAccess};
use crate::config::RgwConfig;
use crate::Result;

const ADMIN_USER_PATH: &str = "/admin/user";

/// [`StorageAdmin`] backed by the RGW admin-ops API
///
/// Constructed once at startup from [`RgwConfig`] and shared by every
/// controller through the context.
#[derive(Clone, Debug)]
pub struct RgwAdminClient {
    transport: Transport,
    credentials: Credentials,
}

impl RgwAdminClient {
    /// Create a client authenticated as the configured admin user
    pub fn new(config: &RgwConfig) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(&config.endpoint, &config.region)?,
            credentials: Credentials {
                access_key: config.access_key.clone(),
                secret_key: config.secret_key.clone(),
            },
        })
    }

    async fn call(
        &self,
        method: Method,
        section: Option<&str>,
        params: &[(&str, String)],
    ) -> std::result::Result<Vec<u8>, RgwError> {
        let mut query: Vec<(String, String)> = vec![("format".into(), "json".into())];
        if let Some(section) = section {
            query.push((section.to_string(), String::new()));
        }
        query.extend(params.iter().map(|(k, v)| (k.to_string(), v.clone())));

        self.transport
            .send(&self.credentials, method, ADMIN_USER_PATH, &query, Vec::new())
            .await
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        method: Method,
        section: Option<&str>,
        params: &[(&str, String)],
    ) -> std::result::Result<T, RgwError> {
        let body = self.call(method, section, params).await?;
        serde_json::from_slice(&body).map_err(|e| RgwError::Decode(e.to_string()))
    }
}

#[async_trait]
impl StorageAdmin for RgwAdminClient {
    async fn get_user(&self, user_id: &str) -> std::result::Result<RgwUser, RgwError> {
        self.call_json(Method::GET, None, &[("uid", user_id.to_string())])
            .await
    }

    async fn create_user(&self, user: &NewUser) -> std::result::Result<RgwUser, RgwError> {
        self.call_json(
            Method::PUT,
            None,
            &[
                ("uid", user.user_id.clone()),
                ("display-name", user.display_name.clone()),
                ("max-buckets", user.max_buckets.to_string()),
            ],
        )
        .await
    }

    async fn modify_user(
        &self,
        user_id: &str,
        max_buckets: i64,
    ) -> std::result::Result<RgwUser, RgwError> {
        self.call_json(
            Method::POST,
            None,
            &[
                ("uid", user_id.to_string()),
                ("max-buckets", max_buckets.to_string()),
            ],
        )
        .await
    }

    async fn remove_user(&self, user_id: &str, purge_data: bool) -> std::result::Result<(), RgwError> {
        self.call(
            Method::DELETE,
            None,
            &[
                ("uid", user_id.to_string()),
                ("purge-data", purge_data.to_string()),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn get_user_quota(&self, user_id: &str) -> std::result::Result<QuotaSpec, RgwError> {
        self.call_json(
            Method::GET,
            Some("quota"),
            &[
                ("uid", user_id.to_string()),
                ("quota-type", "user".to_string()),
            ],
        )
        .await
    }

    async fn set_user_quota(
        &self,
        user_id: &str,
        quota: &QuotaSpec,
    ) -> std::result::Result<(), RgwError> {
        self.call(
            Method::PUT,
            Some("quota"),
            &[
                ("uid", user_id.to_string()),
                ("quota-type", "user".to_string()),
                ("enabled", quota.enabled.to_string()),
                ("max-size", quota.max_size.to_string()),
                ("max-objects", quota.max_objects.to_string()),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn create_subuser(
        &self,
        user_id: &str,
        subuser_id: &str,
        access: SubuserAccess,
    ) -> std::result::Result<(), RgwError> {
        self.call(
            Method::PUT,
            Some("subuser"),
            &[
                ("uid", user_id.to_string()),
                ("subuser", subuser_id.to_string()),
                ("access", access.as_str().to_string()),
                ("key-type", "s3".to_string()),
                ("generate-secret", "true".to_string()),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn remove_subuser(
        &self,
        user_id: &str,
        subuser_id: &str,
    ) -> std::result::Result<(), RgwError> {
        self.call(
            Method::DELETE,
            Some("subuser"),
            &[
                ("uid", user_id.to_string()),
                ("subuser", subuser_id.to_string()),
                ("purge-keys", "true".to_string()),
            ],
        )
        .await
        .map(|_| ())
    }
}
