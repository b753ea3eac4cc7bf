//! AWS Signature Version 4 request signing
//!
//! RGW authenticates both the admin-ops API and the S3 API with SigV4. The
//! signer produces the `Authorization`, `x-amz-date` and
//! `x-amz-content-sha256` headers for a request whose path and query are
//! already known. Query parameters are encoded here as well, so the URL that
//! is sent is byte-identical to the one that was signed.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

/// Headers to attach to a signed request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedHeaders {
    /// Value of the `Authorization` header
    pub authorization: String,
    /// Value of the `x-amz-date` header
    pub amz_date: String,
    /// Value of the `x-amz-content-sha256` header
    pub content_sha256: String,
}

/// A request to be signed
#[derive(Clone, Debug)]
pub struct SigningRequest<'a> {
    /// HTTP method
    pub method: &'a str,
    /// Host header value (including a non-default port)
    pub host: &'a str,
    /// Absolute path, unencoded
    pub path: &'a str,
    /// Query parameters, unencoded; an empty value renders as `key=`
    pub query: &'a [(String, String)],
    /// Request body
    pub payload: &'a [u8],
}

/// Sign a request with the given credentials
pub fn sign(
    access_key: &str,
    secret_key: &str,
    region: &str,
    request: &SigningRequest<'_>,
    now: DateTime<Utc>,
) -> SignedHeaders {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let content_sha256 = hex::encode(Sha256::digest(request.payload));

    let signed_headers = "host;x-amz-content-sha256;x-amz-date";
    let canonical_headers = format!(
        "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
        request.host.trim(),
        content_sha256,
        amz_date
    );

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        canonical_uri(request.path),
        canonical_query(request.query),
        canonical_headers,
        signed_headers,
        content_sha256
    );

    let string_to_sign = create_string_to_sign(&amz_date, &date, region, &canonical_request);
    let signing_key = calculate_signing_key(secret_key, &date, region, SERVICE);
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    SignedHeaders {
        authorization: format!(
            "{ALGORITHM} Credential={access_key}/{date}/{region}/{SERVICE}/aws4_request, \
             SignedHeaders={signed_headers}, Signature={signature}"
        ),
        amz_date,
        content_sha256,
    }
}

/// Encode a path, keeping `/` separators
pub fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(uri_encode)
        .collect::<Vec<_>>()
        .join("/")
}

/// Encode and sort query parameters
pub fn canonical_query(query: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn create_string_to_sign(
    timestamp: &str,
    date: &str,
    region: &str,
    canonical_request: &str,
) -> String {
    let credential_scope = format!("{date}/{region}/{SERVICE}/aws4_request");
    let hashed_request = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("{ALGORITHM}\n{timestamp}\n{credential_scope}\n{hashed_request}")
}

fn calculate_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(k_secret.as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Percent-encode per RFC 3986; only unreserved characters pass through
fn uri_encode(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char)
            }
            _ => result.push_str(&format!("%{byte:02X}")),
        }
    }
    result
}
