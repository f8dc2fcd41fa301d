//! S3-compatible storage backend.
//!
//! Talks to the S3 REST API directly with AWS Signature V4 authentication,
//! using only pure-Rust dependencies (`hmac`, `sha2`) — no C library
//! dependencies like `aws-lc-sys`, making it compatible with all build
//! environments including Nix. Supports custom endpoints for S3-compatible
//! services (MinIO, LocalStack).
//!
//! # Configuration
//!
//! ```toml
//! [storage]
//! backend = "s3"
//! bucket = "acme-policywatch"
//! region = "us-east-1"
//! prefix = "prod/"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! ```
//!
//! # Environment Variables
//!
//! Credentials are read from environment variables:
//! - `AWS_ACCESS_KEY_ID` — required
//! - `AWS_SECRET_ACCESS_KEY` — required
//! - `AWS_SESSION_TOKEN` — optional (for temporary credentials / IAM roles)
//!
//! # Pagination
//!
//! Prefix listings over 1000 keys are handled automatically via the
//! `ListObjectsV2` continuation token mechanism.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::StorageConfig;
use crate::store::BlobStore;

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Blob store backed by an S3-compatible bucket.
pub struct S3Store {
    bucket: String,
    region: String,
    prefix: String,
    endpoint_url: Option<String>,
    client: reqwest::Client,
    creds: AwsCredentials,
}

impl S3Store {
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .ok_or_else(|| anyhow::anyhow!("storage.bucket required for s3 backend"))?;

        Ok(Self {
            bucket,
            region: config.region.clone(),
            prefix: config.prefix.clone(),
            endpoint_url: config.endpoint_url.clone(),
            client: reqwest::Client::new(),
            creds: AwsCredentials::from_env()?,
        })
    }

    /// Compute the S3 hostname for the configured bucket and region.
    ///
    /// If a custom `endpoint_url` is set (for MinIO, LocalStack, etc.),
    /// that is used instead of the standard `<bucket>.s3.<region>.amazonaws.com`.
    fn host(&self) -> String {
        if let Some(ref endpoint) = self.endpoint_url {
            endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string()
        } else {
            format!("{}.s3.{}.amazonaws.com", self.bucket, self.region)
        }
    }

    fn scheme(&self) -> &str {
        match self.endpoint_url {
            Some(ref endpoint) if endpoint.starts_with("http://") => "http",
            _ => "https",
        }
    }

    fn full_key(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}{}", self.prefix, path)
        }
    }

    /// Build a signed request for one object operation.
    fn signed_request(
        &self,
        method: &str,
        key: &str,
        query_params: &[(String, String)],
        body: &[u8],
    ) -> reqwest::RequestBuilder {
        let host = self.host();
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        let canonical_uri = if key.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", encoded_key)
        };

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        // Canonical query string must be sorted
        let mut sorted_params = query_params.to_vec();
        sorted_params.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_querystring: String = sorted_params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = hex_sha256(body);

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, canonical_uri, canonical_querystring, canonical_headers, signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let url = if canonical_querystring.is_empty() {
            format!("{}://{}{}", self.scheme(), host, canonical_uri)
        } else {
            format!(
                "{}://{}{}?{}",
                self.scheme(),
                host,
                canonical_uri,
                canonical_querystring
            )
        };

        let mut builder = match method {
            "GET" => self.client.get(&url),
            "PUT" => self.client.put(&url).body(body.to_vec()),
            "HEAD" => self.client.head(&url),
            "DELETE" => self.client.delete(&url),
            other => unreachable!("unsupported S3 method: {}", other),
        };

        builder = builder
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);

        if let Some(ref token) = self.creds.session_token {
            builder = builder.header("x-amz-security-token", token);
        }

        builder
    }
}

#[async_trait]
impl BlobStore for S3Store {
    async fn put(&self, path: &str, content: &str) -> Result<()> {
        let key = self.full_key(path);
        let resp = self
            .signed_request("PUT", &key, &[], content.as_bytes())
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to put s3://{}/{}: {}", self.bucket, key, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 PutObject failed (HTTP {}) for key '{}': {}",
                status,
                key,
                body.chars().take(500).collect::<String>()
            );
        }
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<String>> {
        let key = self.full_key(path);
        let resp = self
            .signed_request("GET", &key, &[], b"")
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get s3://{}/{}: {}", self.bucket, key, e))?;

        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        if !resp.status().is_success() {
            bail!(
                "S3 GetObject failed (HTTP {}) for key '{}'",
                resp.status(),
                key
            );
        }

        let bytes = resp.bytes().await?;
        Ok(Some(String::from_utf8_lossy(&bytes).to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = self.full_key(prefix);
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query_params = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !full_prefix.is_empty() {
                query_params.push(("prefix".to_string(), full_prefix.clone()));
            }
            if let Some(ref token) = continuation_token {
                query_params.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = self
                .signed_request("GET", "", &query_params, b"")
                .send()
                .await
                .map_err(|e| {
                    anyhow::anyhow!(
                        "Failed to list S3 objects in s3://{}/{}: {}",
                        self.bucket,
                        full_prefix,
                        e
                    )
                })?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "S3 ListObjectsV2 failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let xml_body = resp.text().await?;
            let (batch, is_truncated, next_token) = parse_list_objects_response(&xml_body);

            for key in batch {
                // Strip the configured prefix so callers see logical paths
                let logical = key
                    .strip_prefix(&self.prefix)
                    .map(|s| s.to_string())
                    .unwrap_or(key);
                keys.push(logical);
            }

            if is_truncated {
                continuation_token = next_token;
            } else {
                break;
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let key = self.full_key(path);
        let resp = self
            .signed_request("HEAD", &key, &[], b"")
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to head s3://{}/{}: {}", self.bucket, key, e))?;

        if resp.status().as_u16() == 404 {
            return Ok(false);
        }
        if !resp.status().is_success() {
            bail!(
                "S3 HeadObject failed (HTTP {}) for key '{}'",
                resp.status(),
                key
            );
        }
        Ok(true)
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let key = self.full_key(path);
        let existed = self.exists(path).await?;

        let resp = self
            .signed_request("DELETE", &key, &[], b"")
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete s3://{}/{}: {}", self.bucket, key, e))?;

        // DeleteObject returns 204 whether or not the key existed
        if !resp.status().is_success() {
            bail!(
                "S3 DeleteObject failed (HTTP {}) for key '{}'",
                resp.status(),
                key
            );
        }
        Ok(existed)
    }
}

// ============ AWS SigV4 Helpers ============

/// Compute the hex-encoded SHA-256 hash of data.
fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute HMAC-SHA256 of data with the given key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compute hex-encoded HMAC-SHA256.
fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986 (used in SigV4 canonical requests).
///
/// Encodes all characters except unreserved characters:
/// `A-Z a-z 0-9 - _ . ~`
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

// ============ XML Parsing (minimal, no extra deps) ============

/// Parse a `ListObjectsV2` XML response into object keys.
///
/// Also returns whether the listing is truncated and the next continuation
/// token for pagination.
fn parse_list_objects_response(xml: &str) -> (Vec<String>, bool, Option<String>) {
    let mut keys = Vec::new();
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        if let Some(end) = remaining[block_start..].find("</Contents>") {
            let block = &remaining[block_start..block_start + end];
            let key = extract_xml_value(block, "Key").unwrap_or_default();
            if !key.is_empty() && !key.ends_with('/') {
                keys.push(key);
            }
            remaining = &remaining[block_start + end + "</Contents>".len()..];
        } else {
            break;
        }
    }

    (keys, is_truncated, next_token)
}

/// Extract the text content of an XML tag (simple, non-nested).
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    if let Some(start) = xml.find(&open) {
        let value_start = start + open.len();
        if let Some(end) = xml[value_start..].find(&close) {
            return Some(xml[value_start..value_start + end].to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_encode_reserved_chars() {
        assert_eq!(uri_encode("tos/acme corp/current.txt"), "tos%2Facme%20corp%2Fcurrent.txt");
        assert_eq!(uri_encode("a-b_c.d~e"), "a-b_c.d~e");
    }

    #[test]
    fn parse_list_response_with_pagination() {
        let xml = r#"<?xml version="1.0"?>
<ListBucketResult>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>abc123</NextContinuationToken>
  <Contents><Key>tos/d1/2024-01-01.txt</Key></Contents>
  <Contents><Key>tos/d1/2024-01-01.json</Key></Contents>
  <Contents><Key>tos/d1/folder/</Key></Contents>
</ListBucketResult>"#;

        let (keys, truncated, token) = parse_list_objects_response(xml);
        assert_eq!(keys, vec!["tos/d1/2024-01-01.txt", "tos/d1/2024-01-01.json"]);
        assert!(truncated);
        assert_eq!(token.as_deref(), Some("abc123"));
    }

    #[test]
    fn signing_key_derivation_is_deterministic() {
        let a = derive_signing_key("secret", "20240101", "us-east-1", "s3");
        let b = derive_signing_key("secret", "20240101", "us-east-1", "s3");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
