use super::{Sink, StreamingUpload};
use crate::error::{Result, SegmenterError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Chunk {
        name: String,
        data: Bytes,
        streamed: bool,
    },
    Manifest {
        name: String,
        text: String,
    },
}

impl Delivery {
    pub fn name(&self) -> &str {
        match self {
            Delivery::Chunk { name, .. } | Delivery::Manifest { name, .. } => name,
        }
    }
}

/// Records deliveries in order. Can be told to stream chunks or to fail.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
    attempts: Arc<Mutex<u64>>,
    streaming: bool,
    failing: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn streaming() -> Self {
        Self {
            streaming: true,
            ..Self::default()
        }
    }

    /// Rejects every write.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    pub fn attempts(&self) -> u64 {
        *self.attempts.lock()
    }

    pub fn chunks(&self) -> Vec<(String, Bytes)> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Chunk { name, data, .. } => Some((name.clone(), data.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn manifests(&self) -> Vec<String> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Manifest { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_manifest(&self) -> Option<String> {
        self.manifests().pop()
    }

    fn check(&self, name: &str) -> Result<()> {
        *self.attempts.lock() += 1;
        if self.failing {
            return Err(SegmenterError::Sink {
                name: name.to_string(),
                reason: "rejected by test sink".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn write_chunk(&self, name: &str, data: Bytes) -> Result<()> {
        self.check(name)?;
        self.deliveries.lock().push(Delivery::Chunk {
            name: name.to_string(),
            data,
            streamed: false,
        });
        Ok(())
    }

    async fn write_manifest(&self, name: &str, text: &str) -> Result<()> {
        self.check(name)?;
        self.deliveries.lock().push(Delivery::Manifest {
            name: name.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn open_stream(&self, name: &str) -> Result<Option<StreamingUpload>> {
        if !self.streaming {
            return Ok(None);
        }
        self.check(name)?;
        let deliveries = self.deliveries.clone();
        let owned = name.to_string();
        Ok(Some(StreamingUpload::spawn(name, move |mut receiver| async move {
            let mut data = BytesMut::new();
            while let Some(piece) = receiver.recv().await {
                data.extend_from_slice(&piece?);
            }
            deliveries.lock().push(Delivery::Chunk {
                name: owned,
                data: data.freeze(),
                streamed: true,
            });
            Ok(())
        })))
    }
}
