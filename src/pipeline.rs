//! Input reading, segmenting and delivery, wired together.
//!
//! Three stages run concurrently. A reader task pulls bytes from the input.
//! The caller's task runs the [`Segmenter`]. A single delivery worker
//! hands the outputs to the sinks in the order they were produced, so a
//! manifest never goes out before the chunks it lists. The queue to the
//! worker is unbounded: a slow sink delays delivery but never stalls
//! ingest.

use crate::config::Config;
use crate::error::{Result, SegmenterError};
use crate::format::ts::ReaderStats;
use crate::segmenter::{Output, Segmenter};
use crate::sink::{self, Sinks, StreamingUpload};
use bytes::{Bytes, BytesMut};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

const READ_BUFFER: usize = 128 * 1024;
const INPUT_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: u64,
    pub failed: u64,
    /// Manifest versions superseded before they were written.
    pub coalesced: u64,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub delivery: DeliveryReport,
    pub reader: ReaderStats,
    pub chunks: u64,
    /// Set when the input failed; everything read before it was still
    /// segmented and delivered.
    pub input_error: Option<SegmenterError>,
}

pub struct Pipeline {
    segmenter: Segmenter,
    sinks: Sinks,
}

impl Pipeline {
    pub fn new(config: &Config, sinks: Sinks) -> Self {
        Self {
            segmenter: Segmenter::new(config),
            sinks,
        }
    }

    /// Validates `config` and builds its sinks.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let sinks = sink::build(config).await?;
        info!(
            "delivering media to {}, manifests to {}",
            sinks.media.name(),
            sinks.manifest.name()
        );
        Ok(Self::new(config, sinks))
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.segmenter = self.segmenter.with_progress(enabled);
        self
    }

    /// Segments `input` until it ends or fails, then waits for every
    /// queued delivery.
    pub async fn run<R>(self, input: R) -> RunReport
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let Pipeline {
            mut segmenter,
            sinks,
        } = self;

        let (input_tx, mut input_rx) = mpsc::channel(INPUT_QUEUE);
        let reader = tokio::spawn(read_input(input, input_tx));
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(deliver(sinks, jobs_rx));

        let mut report = RunReport::default();
        while let Some(read) = input_rx.recv().await {
            match read {
                Ok(data) => {
                    for output in segmenter.push(&data) {
                        queue(&jobs_tx, output, &mut report);
                    }
                }
                Err(e) => {
                    error!("input failed: {}", e);
                    report.input_error = Some(SegmenterError::Io(e));
                    break;
                }
            }
        }
        drop(input_rx);
        if let Err(e) = reader.await {
            warn!("input reader task ended abnormally: {}", e);
        }

        for output in segmenter.finish() {
            queue(&jobs_tx, output, &mut report);
        }
        drop(jobs_tx);

        report.delivery = match worker.await {
            Ok(delivery) => delivery,
            Err(e) => {
                error!("delivery worker ended abnormally: {}", e);
                DeliveryReport::default()
            }
        };
        report.reader = segmenter.reader_stats();
        info!(
            "done: {} chunks, {} deliveries, {} failed",
            report.chunks, report.delivery.delivered, report.delivery.failed
        );
        report
    }
}

fn queue(jobs: &mpsc::UnboundedSender<Output>, output: Output, report: &mut RunReport) {
    if matches!(output, Output::Chunk { .. }) {
        report.chunks += 1;
    }
    if jobs.send(output).is_err() {
        error!("delivery worker is gone, dropping output");
    }
}

async fn read_input<R>(mut input: R, tx: mpsc::Sender<std::io::Result<Bytes>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_BUFFER);
    loop {
        buf.reserve(READ_BUFFER);
        match input.read_buf(&mut buf).await {
            Ok(0) => {
                debug!("input reached end of stream");
                return;
            }
            Ok(_) => {
                if tx.send(Ok(buf.split().freeze())).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }
}

async fn deliver(sinks: Sinks, mut jobs: mpsc::UnboundedReceiver<Output>) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    let mut streams: HashMap<u64, StreamingUpload> = HashMap::new();
    let mut stashed: Option<Output> = None;

    loop {
        let job = match stashed.take() {
            Some(job) => job,
            None => match jobs.recv().await {
                Some(job) => job,
                None => break,
            },
        };

        match job {
            Output::Manifest { mut name, mut text } => {
                // only the newest of a run of queued manifests matters
                while let Ok(next) = jobs.try_recv() {
                    match next {
                        Output::Manifest {
                            name: newer_name,
                            text: newer_text,
                        } => {
                            name = newer_name;
                            text = newer_text;
                            report.coalesced += 1;
                        }
                        other => {
                            stashed = Some(other);
                            break;
                        }
                    }
                }
                let result = sinks.manifest.write_manifest(&name, &text).await;
                record(&mut report, &name, result);
            }
            Output::InitSegment { name, data } => {
                let result = sinks.media.write_chunk(&name, data).await;
                record(&mut report, &name, result);
            }
            Output::ChunkOpened { name, sequence } => match sinks.media.open_stream(&name).await {
                Ok(Some(upload)) => {
                    streams.insert(sequence, upload);
                }
                Ok(None) => {}
                Err(e) => warn!("could not start streaming {}: {}", name, e),
            },
            Output::ChunkData { sequence, data } => {
                if let Some(upload) = streams.get_mut(&sequence) {
                    if let Err(e) = upload.send(data).await {
                        // the whole chunk is written once it closes
                        warn!("streaming {} broke off: {}", upload.name(), e);
                        streams.remove(&sequence);
                    }
                }
            }
            Output::Chunk { name, chunk } => {
                let result = match streams.remove(&chunk.sequence) {
                    Some(upload) => upload.finish().await,
                    None => sinks.media.write_chunk(&name, chunk.data).await,
                };
                record(&mut report, &name, result);
            }
        }
    }

    for (sequence, upload) in streams {
        warn!("abandoning unfinished stream {} ({})", upload.name(), sequence);
    }
    report
}

fn record(report: &mut DeliveryReport, name: &str, result: Result<()>) {
    match result {
        Ok(()) => {
            debug!("delivered {}", name);
            report.delivered += 1;
        }
        Err(e) => {
            error!("failed to deliver {}: {}", name, e);
            report.failed += 1;
        }
    }
}
