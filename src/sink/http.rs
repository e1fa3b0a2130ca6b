use super::{RetryPolicy, Sink, StreamingUpload, CHUNK_CONTENT_TYPE, MANIFEST_CONTENT_TYPE};
use crate::config::HttpConfig;
use crate::error::{Result, SegmenterError};
use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Body, Client};
use url::Url;

/// Uploads artifacts with `PUT <scheme>://<host>/<name>`.
///
/// Whole artifacts are retried per the [`RetryPolicy`]. In chunked mode
/// chunks are streamed while they grow instead; a streamed body cannot be
/// replayed, so those uploads get a single attempt.
pub struct HttpSink {
    client: Client,
    base: Url,
    retry: RetryPolicy,
    chunked: bool,
}

impl HttpSink {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let base = Url::parse(&format!("{}://{}/", config.scheme, config.host)).map_err(|e| {
            SegmenterError::Config(format!(
                "bad HTTP destination {}://{}: {}",
                config.scheme, config.host, e
            ))
        })?;
        let client = Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .build()?;
        Ok(Self {
            client,
            base,
            retry: config.retry_policy(),
            chunked: false,
        })
    }

    pub fn chunked(mut self, enabled: bool) -> Self {
        self.chunked = enabled;
        self
    }

    pub fn url_for(&self, name: &str) -> Result<Url> {
        self.base
            .join(name)
            .map_err(|e| SegmenterError::Config(format!("bad artifact name {}: {}", name, e)))
    }

    async fn put(&self, name: &str, body: Bytes, content_type: &'static str) -> Result<()> {
        let url = self.url_for(name)?;
        self.retry
            .run(name, || {
                let request = self
                    .client
                    .put(url.clone())
                    .header(CONTENT_TYPE, content_type)
                    .body(body.clone());
                async move {
                    request.send().await?.error_for_status()?;
                    Ok(())
                }
            })
            .await?;
        debug!("uploaded {}", url);
        Ok(())
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &'static str {
        if self.chunked {
            "http-chunked"
        } else {
            "http"
        }
    }

    async fn write_chunk(&self, name: &str, data: Bytes) -> Result<()> {
        self.put(name, data, CHUNK_CONTENT_TYPE).await
    }

    async fn write_manifest(&self, name: &str, text: &str) -> Result<()> {
        self.put(name, Bytes::copy_from_slice(text.as_bytes()), MANIFEST_CONTENT_TYPE)
            .await
    }

    async fn open_stream(&self, name: &str) -> Result<Option<StreamingUpload>> {
        if !self.chunked {
            return Ok(None);
        }
        let url = self.url_for(name)?;
        let client = self.client.clone();
        Ok(Some(StreamingUpload::spawn(name, move |receiver| async move {
            let pieces = futures::stream::unfold(receiver, |mut receiver| async move {
                receiver.recv().await.map(|piece| (piece, receiver))
            });
            client
                .put(url.clone())
                .header(CONTENT_TYPE, CHUNK_CONTENT_TYPE)
                .body(Body::wrap_stream(pieces))
                .send()
                .await?
                .error_for_status()?;
            debug!("streamed {}", url);
            Ok(())
        })))
    }
}
