//! The synchronous core: bytes in, artifacts out.

use crate::config::{Config, Destination};
use crate::format::hls::{BuilderEvent, Chunk, ChunkBuilder, ChunkNaming, InitPolicy, ManifestEngine};
use crate::format::ts::{PacketReader, PidResolver, ReaderStats, TsPacket};
use bytes::Bytes;
use log::{debug, info};

/// Something to deliver, in the order it must be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    InitSegment { name: String, data: Bytes },
    /// A chunk started; its bytes will follow as [`Output::ChunkData`].
    /// Only produced when progress streaming is on.
    ChunkOpened { name: String, sequence: u64 },
    ChunkData { sequence: u64, data: Bytes },
    Chunk { name: String, chunk: Chunk },
    Manifest { name: String, text: String },
}

/// Runs bytes through [`PacketReader`], [`PidResolver`], [`ChunkBuilder`]
/// and [`ManifestEngine`].
///
/// Never fails: malformed input is dropped by the layers below.
pub struct Segmenter {
    reader: PacketReader,
    resolver: PidResolver,
    builder: ChunkBuilder,
    engine: ManifestEngine,
    naming: ChunkNaming,
    manifest_name: String,
    streaming: bool,
    events: Vec<BuilderEvent>,
    finished: bool,
}

impl Segmenter {
    pub fn new(config: &Config) -> Self {
        let naming = config.output.naming();
        let policy = config.segment.init_policy;
        let streaming = config.media_destination == Destination::HttpChunked;
        let init_uri = (policy == InitPolicy::InitSegment).then(|| naming.init_name());

        Self {
            reader: PacketReader::new(),
            resolver: PidResolver::new(config.pids),
            builder: ChunkBuilder::new(config.segment.target_duration, policy)
                .with_progress(streaming),
            engine: ManifestEngine::new(
                &config.manifest,
                config.segment.target_duration,
                naming.clone(),
            )
            .with_init_uri(init_uri),
            naming,
            manifest_name: config.output.manifest_filename.clone(),
            streaming,
            events: Vec::new(),
            finished: false,
        }
    }

    /// Streams chunk bytes as they accumulate, whatever the destination.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self.builder = self.builder.with_progress(enabled);
        self
    }

    pub fn push(&mut self, data: &[u8]) -> Vec<Output> {
        if self.finished {
            return Vec::new();
        }
        for packet in self.reader.feed(data) {
            Self::route(&mut self.resolver, &mut self.builder, &packet, &mut self.events);
        }
        self.builder.drain_progress(&mut self.events);
        self.collect()
    }

    /// End of input: flushes the open chunk and renders the final manifest.
    pub fn finish(&mut self) -> Vec<Output> {
        if self.finished {
            return Vec::new();
        }
        for packet in self.reader.finish() {
            Self::route(&mut self.resolver, &mut self.builder, &packet, &mut self.events);
        }
        self.builder.finish(&mut self.events);
        let mut outputs = self.collect();

        outputs.push(Output::Manifest {
            name: self.manifest_name.clone(),
            text: self.engine.finish(),
        });
        self.finished = true;

        let stats = self.reader.stats();
        info!(
            "input finished: {} packets, {} dropped, {} bytes skipped, {} resyncs",
            stats.packets, stats.dropped_packets, stats.skipped_bytes, stats.resyncs
        );
        outputs
    }

    pub fn reader_stats(&self) -> ReaderStats {
        self.reader.stats()
    }

    pub fn resolver(&self) -> &PidResolver {
        &self.resolver
    }

    pub fn engine(&self) -> &ManifestEngine {
        &self.engine
    }

    fn route(
        resolver: &mut PidResolver,
        builder: &mut ChunkBuilder,
        packet: &TsPacket,
        events: &mut Vec<BuilderEvent>,
    ) {
        let class = resolver.resolve(packet);
        if resolver.take_program_change() {
            debug!("program changed, next chunk starts a discontinuity");
            builder.mark_discontinuity();
        }
        builder.accept(
            packet,
            class,
            resolver.timing_pid(),
            resolver.init_data(),
            events,
        );
    }

    fn collect(&mut self) -> Vec<Output> {
        let mut outputs = Vec::with_capacity(self.events.len());
        for event in self.events.drain(..) {
            match event {
                BuilderEvent::InitSegment(data) => outputs.push(Output::InitSegment {
                    name: self.naming.init_name(),
                    data,
                }),
                BuilderEvent::Opened { sequence } => {
                    if self.streaming {
                        outputs.push(Output::ChunkOpened {
                            name: self.naming.chunk_name(sequence),
                            sequence,
                        });
                    }
                    if let Some(text) = self.engine.chunk_opened(sequence) {
                        outputs.push(Output::Manifest {
                            name: self.manifest_name.clone(),
                            text,
                        });
                    }
                }
                BuilderEvent::Appended { sequence, data } => {
                    outputs.push(Output::ChunkData { sequence, data })
                }
                BuilderEvent::Closed(chunk) => {
                    let manifest = self.engine.append(&chunk);
                    outputs.push(Output::Chunk {
                        name: self.naming.chunk_name(chunk.sequence),
                        chunk,
                    });
                    if let Some(text) = manifest {
                        outputs.push(Output::Manifest {
                            name: self.manifest_name.clone(),
                            text,
                        });
                    }
                }
            }
        }
        outputs
    }
}
