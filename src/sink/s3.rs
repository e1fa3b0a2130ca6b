use super::{RetryPolicy, Sink, CHUNK_CONTENT_TYPE, MANIFEST_CONTENT_TYPE};
use crate::config::{S3Config, S3Credentials};
use crate::error::{Result, SegmenterError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use log::debug;
use md5::{Digest as _, Md5};
use reqwest::Client;
use sha2::Sha256;
use std::collections::BTreeMap;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

/// Uploads artifacts as objects with SigV4-signed `PUT` requests.
///
/// AWS buckets are addressed virtual-host style. A custom endpoint (MinIO and
/// other S3-compatible stores) is addressed path style.
pub struct S3Sink {
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<Url>,
    credentials: S3Credentials,
    public_read: bool,
    retry: RetryPolicy,
}

impl S3Sink {
    pub fn new(config: &S3Config, retry: RetryPolicy) -> Result<Self> {
        let credentials = config
            .credentials
            .clone()
            .or_else(S3Credentials::from_env)
            .ok_or_else(|| {
                SegmenterError::Config(
                    "S3 destination needs credentials (flags or AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY)"
                        .into(),
                )
            })?;
        let endpoint = config
            .endpoint
            .as_deref()
            .map(|e| {
                Url::parse(e)
                    .map_err(|err| SegmenterError::Config(format!("bad S3 endpoint {}: {}", e, err)))
            })
            .transpose()?;
        let client = Client::builder().timeout(config.upload_timeout).build()?;

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint,
            credentials,
            public_read: config.public_read,
            retry,
        })
    }

    /// Object URL and the host it is signed for.
    fn object_url(&self, key: &str) -> Result<(Url, String)> {
        let encoded = uri_encode(key, false);
        let url = match &self.endpoint {
            Some(endpoint) => {
                let base = endpoint.as_str().trim_end_matches('/');
                format!("{}/{}/{}", base, uri_encode(&self.bucket, true), encoded)
            }
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, encoded
            ),
        };
        let url = Url::parse(&url)
            .map_err(|e| SegmenterError::Config(format!("bad object URL {}: {}", url, e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(SegmenterError::Config(format!("object URL {} has no host", url)))
            }
        };
        Ok((url, host))
    }

    fn signed_headers(
        &self,
        url: &Url,
        host: &str,
        body: &[u8],
        content_type: &str,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, String> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex::encode(Sha256::digest(body));

        let mut headers = BTreeMap::new();
        headers.insert("content-md5".to_string(), BASE64.encode(Md5::digest(body)));
        headers.insert("content-type".to_string(), content_type.to_string());
        headers.insert("host".to_string(), host.to_string());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        if self.public_read {
            headers.insert("x-amz-acl".to_string(), "public-read".to_string());
        }
        if let Some(token) = &self.credentials.session_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }

        let authorization = authorization(
            &self.credentials,
            &self.region,
            &amz_date,
            &CanonicalRequest {
                method: "PUT",
                path: url.path(),
                query: url.query().unwrap_or(""),
                headers: &headers,
                payload_hash: &payload_hash,
            },
        );
        headers.insert("authorization".to_string(), authorization);
        headers
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &'static str) -> Result<()> {
        let (url, host) = self.object_url(key)?;
        self.retry
            .run(key, || {
                let headers = self.signed_headers(&url, &host, &body, content_type, Utc::now());
                let mut request = self.client.put(url.clone()).body(body.clone());
                for (name, value) in headers.iter().filter(|(name, _)| *name != "host") {
                    request = request.header(name.as_str(), value.as_str());
                }
                async move {
                    request.send().await?.error_for_status()?;
                    Ok(())
                }
            })
            .await?;
        debug!("uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }
}

#[async_trait]
impl Sink for S3Sink {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn write_chunk(&self, name: &str, data: Bytes) -> Result<()> {
        self.put(name, data, CHUNK_CONTENT_TYPE).await
    }

    async fn write_manifest(&self, name: &str, text: &str) -> Result<()> {
        self.put(name, Bytes::copy_from_slice(text.as_bytes()), MANIFEST_CONTENT_TYPE)
            .await
    }
}

pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    /// Already URI-encoded.
    pub path: &'a str,
    pub query: &'a str,
    /// Lowercase names. Every header here is signed.
    pub headers: &'a BTreeMap<String, String>,
    pub payload_hash: &'a str,
}

impl CanonicalRequest<'_> {
    pub fn signed_header_names(&self) -> String {
        self.headers.keys().cloned().collect::<Vec<_>>().join(";")
    }

    pub fn to_canonical_string(&self) -> String {
        let headers: String = self
            .headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
            .collect();
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.path,
            self.query,
            headers,
            self.signed_header_names(),
            self.payload_hash
        )
    }
}

/// `Authorization` header value for `request`, signed at `amz_date`
/// (`YYYYMMDDTHHMMSSZ`).
pub fn authorization(
    credentials: &S3Credentials,
    region: &str,
    amz_date: &str,
    request: &CanonicalRequest<'_>,
) -> String {
    let date = &amz_date[..8.min(amz_date.len())];
    let scope = format!("{}/{}/{}/aws4_request", date, region, SERVICE);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        hex::encode(Sha256::digest(request.to_canonical_string().as_bytes()))
    );
    let key = signing_key(&credentials.secret_access_key, date, region, SERVICE);
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));
    format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM,
        credentials.access_key_id,
        scope,
        request.signed_header_names(),
        signature
    )
}

pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// RFC 3986 percent-encoding as SigV4 wants it. `/` is kept in keys.
fn uri_encode(value: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
