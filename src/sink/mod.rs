//! Delivery of chunks and manifests.
//!
//! The segmenter only sees the [`Sink`] trait. Which implementation sits
//! behind it is decided once, from [`Config`], by [`build`].

use crate::config::{Config, Destination};
use crate::error::{Result, SegmenterError};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub mod file;
pub mod http;
pub mod memory;
pub mod retry;
pub mod s3;

pub use file::FileSink;
pub use http::HttpSink;
pub use memory::{Delivery, MemorySink};
pub use retry::RetryPolicy;
pub use s3::S3Sink;

pub const CHUNK_CONTENT_TYPE: &str = "video/MP2T";
pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Streamed uploads buffer this many pieces before `send` waits.
const STREAM_BUFFER: usize = 16;

#[async_trait]
pub trait Sink: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &'static str;

    async fn write_chunk(&self, name: &str, data: Bytes) -> Result<()>;

    async fn write_manifest(&self, name: &str, text: &str) -> Result<()>;

    /// Starts an upload of an artifact that is still being produced. Sinks
    /// that cannot stream return `None`, and get the whole chunk through
    /// [`write_chunk`](Self::write_chunk) instead.
    async fn open_stream(&self, _name: &str) -> Result<Option<StreamingUpload>> {
        Ok(None)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl Sink for NullSink {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn write_chunk(&self, _name: &str, _data: Bytes) -> Result<()> {
        Ok(())
    }

    async fn write_manifest(&self, _name: &str, _text: &str) -> Result<()> {
        Ok(())
    }
}

pub type StreamItem = std::result::Result<Bytes, std::io::Error>;

/// Writing end of an upload in progress.
///
/// Dropping it without calling [`finish`](Self::finish) ends the body
/// early; the receiving side decides what a short upload means.
pub struct StreamingUpload {
    name: String,
    sender: mpsc::Sender<StreamItem>,
    task: JoinHandle<Result<()>>,
    sent: usize,
}

impl StreamingUpload {
    /// Spawns `upload` with the receiving end of a new body channel.
    pub fn spawn<F, Fut>(name: &str, upload: F) -> Self
    where
        F: FnOnce(mpsc::Receiver<StreamItem>) -> Fut,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(STREAM_BUFFER);
        Self {
            name: name.to_string(),
            sender,
            task: tokio::spawn(upload(receiver)),
            sent: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes_sent(&self) -> usize {
        self.sent
    }

    pub async fn send(&mut self, data: Bytes) -> Result<()> {
        let len = data.len();
        if self.sender.send(Ok(data)).await.is_err() {
            return Err(SegmenterError::Sink {
                name: self.name.clone(),
                reason: "upload ended before the chunk was complete".into(),
            });
        }
        self.sent += len;
        Ok(())
    }

    /// Ends the body and waits for the upload to complete.
    pub async fn finish(self) -> Result<()> {
        drop(self.sender);
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(SegmenterError::Sink {
                name: self.name,
                reason: format!("upload task failed: {}", e),
            }),
        }
    }
}

/// Sinks for media and for manifests, as selected by the configuration.
pub struct Sinks {
    pub media: Arc<dyn Sink>,
    pub manifest: Arc<dyn Sink>,
}

pub async fn build(config: &Config) -> Result<Sinks> {
    Ok(Sinks {
        media: build_one(config, config.media_destination).await?,
        manifest: build_one(config, config.manifest_destination).await?,
    })
}

async fn build_one(config: &Config, destination: Destination) -> Result<Arc<dyn Sink>> {
    Ok(match destination {
        Destination::None => Arc::new(NullSink),
        Destination::File => Arc::new(FileSink::create(&config.output.base_path).await?),
        Destination::HttpChunked => Arc::new(HttpSink::new(&config.http)?.chunked(true)),
        Destination::Http => Arc::new(HttpSink::new(&config.http)?),
        Destination::S3 => Arc::new(S3Sink::new(&config.s3, config.http.retry_policy())?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_streaming_upload_collects_body() {
        let mut upload = StreamingUpload::spawn("chunk_00000.ts", |mut rx| async move {
            let mut total = 0;
            while let Some(Ok(piece)) = rx.recv().await {
                total += piece.len();
            }
            assert_eq!(total, 5);
            Ok(())
        });
        upload.send(Bytes::from_static(b"abc")).await.unwrap();
        upload.send(Bytes::from_static(b"de")).await.unwrap();
        assert_eq!(upload.bytes_sent(), 5);
        upload.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_receiver_gone_fails() {
        let mut upload = StreamingUpload::spawn("chunk_00001.ts", |rx| async move {
            drop(rx);
            Ok(())
        });
        // let the task drop its receiver
        tokio::task::yield_now().await;
        let mut failed = false;
        for _ in 0..(STREAM_BUFFER + 1) {
            if upload.send(Bytes::from_static(b"x")).await.is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed);
    }

    #[tokio::test]
    async fn test_build_null_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.output.base_path = dir.path().join("out");
        config.manifest_destination = Destination::None;
        let sinks = build(&config).await.unwrap();
        assert_eq!(sinks.media.name(), "file");
        assert_eq!(sinks.manifest.name(), "none");
        assert!(dir.path().join("out").is_dir());
    }
}
