//! Path-style S3 client for bucket lifecycle

use async_trait::async_trait;
use reqwest::Method;

use super::transport::Transport;
use super::{BucketAdmin, Credentials, RgwError};
use crate::config::RgwConfig;
use crate::Result;

/// [`BucketAdmin`] speaking path-style S3 to the RGW endpoint
///
/// Credentials are supplied per call since every bucket is owned by a
/// different tenant user.
#[derive(Clone, Debug)]
pub struct S3BucketClient {
    transport: Transport,
}

impl S3BucketClient {
    /// Create a client for the configured endpoint
    pub fn new(config: &RgwConfig) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(&config.endpoint, &config.region)?,
        })
    }
}

fn bucket_path(bucket: &str) -> String {
    format!("/{bucket}")
}

#[async_trait]
impl BucketAdmin for S3BucketClient {
    async fn create_bucket(
        &self,
        credentials: &Credentials,
        bucket: &str,
    ) -> std::result::Result<(), RgwError> {
        self.transport
            .send(credentials, Method::PUT, &bucket_path(bucket), &[], Vec::new())
            .await
            .map(|_| ())
    }

    async fn delete_bucket(
        &self,
        credentials: &Credentials,
        bucket: &str,
    ) -> std::result::Result<(), RgwError> {
        self.transport
            .send(credentials, Method::DELETE, &bucket_path(bucket), &[], Vec::new())
            .await
            .map(|_| ())
    }

    async fn set_bucket_policy(
        &self,
        credentials: &Credentials,
        bucket: &str,
        policy: &str,
    ) -> std::result::Result<(), RgwError> {
        let query = [("policy".to_string(), String::new())];
        self.transport
            .send(
                credentials,
                Method::PUT,
                &bucket_path(bucket),
                &query,
                policy.as_bytes().to_vec(),
            )
            .await
            .map(|_| ())
    }
}
