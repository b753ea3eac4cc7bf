//! Signed HTTP transport shared by the admin and S3 clients

use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use super::sigv4::{self, SigningRequest};
use super::{Credentials, RgwError};
use crate::{Error, Result};

/// HTTP client bound to one RGW endpoint
#[derive(Clone, Debug)]
pub(super) struct Transport {
    http: reqwest::Client,
    base: String,
    host: String,
    region: String,
}

impl Transport {
    pub(super) fn new(endpoint: &str, region: &str) -> Result<Self> {
        let url = Url::parse(endpoint)
            .map_err(|e| Error::config(format!("invalid rgw endpoint '{endpoint}': {e}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(Error::config(format!(
                    "rgw endpoint '{endpoint}' has no host"
                )))
            }
        };
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base: format!("{}://{}", url.scheme(), host),
            host,
            region: region.to_string(),
        })
    }

    /// Send a signed request and return the body of a successful response
    pub(super) async fn send(
        &self,
        credentials: &Credentials,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Vec<u8>,
    ) -> std::result::Result<Vec<u8>, RgwError> {
        let signed = sigv4::sign(
            &credentials.access_key,
            &credentials.secret_key,
            &self.region,
            &SigningRequest {
                method: method.as_str(),
                host: &self.host,
                path,
                query,
                payload: &body,
            },
            chrono::Utc::now(),
        );

        let mut url = format!("{}{}", self.base, sigv4::canonical_uri(path));
        if !query.is_empty() {
            url.push('?');
            url.push_str(&sigv4::canonical_query(query));
        }

        debug!(method = %method, path = %path, "rgw request");

        let response = self
            .http
            .request(method, url)
            .header("authorization", signed.authorization)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if status.is_success() {
            Ok(bytes.to_vec())
        } else {
            Err(classify_error(status, &bytes))
        }
    }
}

#[derive(Deserialize)]
struct JsonErrorBody {
    #[serde(rename = "Code")]
    code: String,
}

/// Map an error response to a distinguished [`RgwError`] where one exists
///
/// The admin API answers in JSON, the S3 API in XML.
pub(super) fn classify_error(status: StatusCode, body: &[u8]) -> RgwError {
    let text = String::from_utf8_lossy(body).to_string();
    let code = serde_json::from_slice::<JsonErrorBody>(body)
        .map(|b| b.code)
        .ok()
        .or_else(|| xml_code(&text))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string());

    match code.as_str() {
        "NoSuchUser" => RgwError::NoSuchUser,
        "NoSuchBucket" => RgwError::NoSuchBucket,
        "BucketAlreadyOwnedByYou" => RgwError::BucketAlreadyOwned,
        _ => RgwError::Api {
            status: status.as_u16(),
            code,
            message: text,
        },
    }
}

/// Text of the first `Code` element of an S3 XML error document
fn xml_code(body: &str) -> Option<String> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut in_code = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => in_code = e.local_name().as_ref() == b"Code",
            Ok(Event::Text(e)) if in_code => {
                return e.unescape().ok().map(|code| code.into_owned());
            }
            Ok(Event::End(_)) => in_code = false,
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}
