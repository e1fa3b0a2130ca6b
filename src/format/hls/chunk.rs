use crate::error::{Result, SegmenterError};
use crate::format::ts::pes::parse_timestamps;
use crate::format::ts::resolver::PacketClass;
use crate::format::ts::types::{pts_delta, TsPacket, PTS_HZ, PTS_MASK};
use bytes::{Bytes, BytesMut};
use log::{debug, info};
use std::time::Duration;

/// A forward jump larger than this many target durations is a discontinuity.
const MAX_JUMP_TARGETS: u64 = 10;

/// Where the PAT/PMT packets go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitPolicy {
    /// Chunks carry media packets only.
    None,
    /// Tables are written once, to a separate init artifact emitted first.
    InitSegment,
    /// Tables are repeated at the start of every chunk.
    #[default]
    PerChunk,
}

impl InitPolicy {
    /// 0 none, 1 init segment, 2 per chunk.
    pub fn from_selector(value: u8) -> Result<Self> {
        match value {
            0 => Ok(InitPolicy::None),
            1 => Ok(InitPolicy::InitSegment),
            2 => Ok(InitPolicy::PerChunk),
            other => Err(SegmenterError::Config(format!("unknown init type {}", other))),
        }
    }
}

/// External names of chunks and the init segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkNaming {
    pub base: String,
    pub digits: usize,
    pub extension: String,
}

impl ChunkNaming {
    pub fn chunk_name(&self, sequence: u64) -> String {
        format!(
            "{}{:0width$}{}",
            self.base,
            sequence,
            self.extension,
            width = self.digits
        )
    }

    pub fn init_name(&self) -> String {
        format!("{}init{}", self.base, self.extension)
    }
}

impl Default for ChunkNaming {
    fn default() -> Self {
        Self {
            base: "chunk_".into(),
            digits: 5,
            extension: ".ts".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Open,
    /// Closed at a boundary.
    Closed,
    /// Closed by end of stream.
    Flushed,
}

/// A finished chunk. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub sequence: u64,
    pub target_duration: Duration,
    pub duration: Duration,
    pub data: Bytes,
    pub init_included: bool,
    /// Timing does not continue from the previous chunk.
    pub discontinuity: bool,
    pub state: ChunkState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderEvent {
    /// Program tables for the dedicated init artifact. Emitted at most once,
    /// before the first chunk opens.
    InitSegment(Bytes),
    Opened { sequence: u64 },
    /// Bytes added to the open chunk since the last report. Only emitted when
    /// progress streaming is on.
    Appended { sequence: u64, data: Bytes },
    Closed(Chunk),
}

struct OpenChunk {
    sequence: u64,
    start: u64,
    last: u64,
    data: BytesMut,
    init_included: bool,
    discontinuity: bool,
}

/// Accumulates resolved packets into chunks and decides where they end.
///
/// Time is measured on the timing PID (video if the program has it) using
/// decode timestamps. A chunk may only end at a packet of the timing PID that
/// starts a PES packet, so every chunk starts on an access unit; once the
/// timing PID has shown a random access indicator, that packet must carry one
/// too. A chunk therefore lasts between the target and the target plus one
/// boundary interval. Unless the policy is [`InitPolicy::None`], no chunk is
/// closed while init data is unavailable, so every chunk gets the tables.
pub struct ChunkBuilder {
    policy: InitPolicy,
    target_ticks: u64,
    target_duration: Duration,
    stream_progress: bool,
    next_sequence: u64,
    open: Option<OpenChunk>,
    progress: BytesMut,
    init_emitted: bool,
    keyframe_aligned: bool,
    pending_discontinuity: bool,
    /// Last forward step between timing timestamps, carried across chunks.
    frame_step: u64,
    finished: bool,
}

impl ChunkBuilder {
    pub fn new(target_duration: Duration, policy: InitPolicy) -> Self {
        let target_ticks = (target_duration.as_micros() * PTS_HZ as u128 / 1_000_000) as u64;
        Self {
            policy,
            target_ticks: target_ticks.max(1),
            target_duration,
            stream_progress: false,
            next_sequence: 0,
            open: None,
            progress: BytesMut::new(),
            init_emitted: false,
            keyframe_aligned: false,
            pending_discontinuity: false,
            frame_step: 0,
            finished: false,
        }
    }

    /// Report chunk bytes as they accumulate, for streaming uploads.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.stream_progress = enabled;
        self
    }

    pub fn policy(&self) -> InitPolicy {
        self.policy
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn open_sequence(&self) -> Option<u64> {
        self.open.as_ref().map(|c| c.sequence)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Forces a boundary at the next opportunity and marks the chunk that
    /// follows it as discontinuous.
    pub fn mark_discontinuity(&mut self) {
        if self.open.is_some() {
            self.pending_discontinuity = true;
        }
    }

    /// Adds one packet. `timing_pid` and `init_data` reflect the resolver
    /// state after the packet was classified.
    pub fn accept(
        &mut self,
        packet: &TsPacket,
        class: PacketClass,
        timing_pid: Option<u16>,
        init_data: Option<&Bytes>,
        events: &mut Vec<BuilderEvent>,
    ) {
        if self.finished || !class.is_media() {
            return;
        }

        let is_timing = timing_pid == Some(packet.pid());
        if is_timing && packet.random_access() && !self.keyframe_aligned {
            debug!("random access indicators present, aligning cuts to them");
            self.keyframe_aligned = true;
        }

        let timestamp = if is_timing && packet.payload_unit_start() {
            parse_timestamps(packet.payload()).map(|ts| ts.decode_time() & PTS_MASK)
        } else {
            None
        };

        let Some(ts) = timestamp else {
            self.append(packet);
            return;
        };

        let current = self.open.as_ref().map(|o| (o.sequence, o.start, o.last));
        let Some((sequence, start, last)) = current else {
            if self.policy != InitPolicy::None && init_data.is_none() {
                return;
            }
            self.open_chunk(ts, false, init_data, events);
            self.append(packet);
            return;
        };

        let step = pts_delta(last, ts);
        let backwards = step > PTS_MASK / 2;
        let jumped = !backwards && step > self.target_ticks * MAX_JUMP_TARGETS;
        // the next chunk could not start with the tables
        let init_missing = self.policy != InitPolicy::None && init_data.is_none();

        if backwards || jumped || packet.discontinuity() || self.pending_discontinuity {
            if init_missing {
                self.pending_discontinuity = true;
            } else {
                debug!(
                    "timing discontinuity at chunk {} (backwards: {}, jump: {})",
                    sequence, backwards, jumped
                );
                self.pending_discontinuity = false;
                self.close_chunk(None, ChunkState::Closed, events);
                self.open_chunk(ts, true, init_data, events);
            }
        } else {
            if step > 0 {
                self.frame_step = step;
            }
            let elapsed = pts_delta(start, ts);
            let at_access_point = !self.keyframe_aligned || packet.random_access();
            if elapsed >= self.target_ticks && at_access_point && !init_missing {
                self.close_chunk(Some(elapsed), ChunkState::Closed, events);
                self.open_chunk(ts, false, init_data, events);
            } else if let Some(open) = self.open.as_mut() {
                open.last = ts;
            }
        }
        self.append(packet);
    }

    fn append(&mut self, packet: &TsPacket) {
        if let Some(open) = self.open.as_mut() {
            open.data.extend_from_slice(&packet.raw);
            if self.stream_progress {
                self.progress.extend_from_slice(&packet.raw);
            }
        }
    }

    /// Emits bytes accumulated since the last report.
    pub fn drain_progress(&mut self, events: &mut Vec<BuilderEvent>) {
        if self.progress.is_empty() {
            return;
        }
        let data = self.progress.split().freeze();
        if let Some(open) = self.open.as_ref() {
            events.push(BuilderEvent::Appended {
                sequence: open.sequence,
                data,
            });
        }
    }

    /// Closes the open chunk, however short, and stops accepting packets.
    pub fn finish(&mut self, events: &mut Vec<BuilderEvent>) {
        if self.finished {
            return;
        }
        self.close_chunk(None, ChunkState::Flushed, events);
        self.finished = true;
    }

    fn open_chunk(
        &mut self,
        start: u64,
        discontinuity: bool,
        init_data: Option<&Bytes>,
        events: &mut Vec<BuilderEvent>,
    ) {
        let mut data = BytesMut::new();
        let mut init_included = false;
        match (self.policy, init_data) {
            (InitPolicy::InitSegment, Some(init)) if !self.init_emitted => {
                events.push(BuilderEvent::InitSegment(init.clone()));
                self.init_emitted = true;
            }
            (InitPolicy::PerChunk, Some(init)) => {
                data.extend_from_slice(init);
                init_included = true;
            }
            _ => {}
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        debug!("opening chunk {}", sequence);
        events.push(BuilderEvent::Opened { sequence });
        if self.stream_progress {
            self.progress.clear();
            self.progress.extend_from_slice(&data);
        }

        self.open = Some(OpenChunk {
            sequence,
            start,
            last: start,
            data,
            init_included,
            discontinuity,
        });
    }

    /// `elapsed` is the span up to the next chunk's start when known;
    /// otherwise the last frame is assumed to last as long as the one before.
    fn close_chunk(
        &mut self,
        elapsed: Option<u64>,
        state: ChunkState,
        events: &mut Vec<BuilderEvent>,
    ) {
        self.drain_progress(events);
        let Some(open) = self.open.take() else {
            return;
        };
        let ticks = elapsed.unwrap_or_else(|| pts_delta(open.start, open.last) + self.frame_step);
        let chunk = Chunk {
            sequence: open.sequence,
            target_duration: self.target_duration,
            duration: ticks_to_duration(ticks),
            data: open.data.freeze(),
            init_included: open.init_included,
            discontinuity: open.discontinuity,
            state,
        };
        info!(
            "closed chunk {} ({:.3}s, {} bytes)",
            chunk.sequence,
            chunk.duration.as_secs_f64(),
            chunk.data.len()
        );
        events.push(BuilderEvent::Closed(chunk));
    }
}

/// Whole microseconds, so rendered durations re-parse exactly.
fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_micros((ticks as u128 * 1_000_000 / PTS_HZ as u128) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::muxer::TSMuxer;
    use crate::format::ts::parser::TSPacketParser;
    use crate::format::ts::types::{STREAM_TYPE_AAC, STREAM_TYPE_H264, TS_PACKET_SIZE};
    use pretty_assertions::assert_eq;

    const VIDEO: u16 = 0x100;
    const AUDIO: u16 = 0x101;
    const FRAME: u64 = 3600;

    struct Harness {
        muxer: TSMuxer,
        init: Bytes,
        parser: TSPacketParser,
    }

    impl Harness {
        fn new() -> Self {
            let mut muxer = TSMuxer::new();
            muxer.add_stream(STREAM_TYPE_H264, VIDEO);
            muxer.add_stream(STREAM_TYPE_AAC, AUDIO);
            let mut init = BytesMut::new();
            muxer.write_tables(&mut init).unwrap();
            Self {
                muxer,
                init: init.freeze(),
                parser: TSPacketParser::new(),
            }
        }

        fn pes(&mut self, pid: u16, ts: u64, key: bool) -> Vec<(TsPacket, PacketClass)> {
            let mut buf = BytesMut::new();
            self.muxer
                .write_pes(pid, ts, None, key, &[0x11; 300], &mut buf)
                .unwrap();
            let class = if pid == VIDEO {
                PacketClass::Video
            } else {
                PacketClass::Audio
            };
            buf.chunks(TS_PACKET_SIZE)
                .map(|c| {
                    let p = self.parser.parse_packet(Bytes::copy_from_slice(c)).unwrap();
                    (p, class)
                })
                .collect()
        }
    }

    fn feed(
        builder: &mut ChunkBuilder,
        harness: &mut Harness,
        frames: impl IntoIterator<Item = (u64, bool)>,
        events: &mut Vec<BuilderEvent>,
    ) {
        let init = harness.init.clone();
        for (ts, key) in frames {
            for (packet, class) in harness.pes(VIDEO, ts, key) {
                builder.accept(&packet, class, Some(VIDEO), Some(&init), events);
            }
        }
    }

    fn closed(events: &[BuilderEvent]) -> Vec<&Chunk> {
        events
            .iter()
            .filter_map(|e| match e {
                BuilderEvent::Closed(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_naming() {
        let naming = ChunkNaming::default();
        assert_eq!(naming.chunk_name(0), "chunk_00000.ts");
        assert_eq!(naming.chunk_name(123456), "chunk_123456.ts");
        assert_eq!(naming.init_name(), "chunk_init.ts");
    }

    #[test]
    fn test_cuts_at_target_and_flushes_tail() {
        let mut harness = Harness::new();
        let mut builder = ChunkBuilder::new(Duration::from_secs(1), InitPolicy::PerChunk);
        let mut events = Vec::new();

        // 2.5 seconds at 25 fps
        feed(&mut builder, &mut harness, (0..63).map(|i| (i * FRAME, false)), &mut events);
        builder.finish(&mut events);

        let chunks = closed(&events);
        assert_eq!(
            chunks.iter().map(|c| c.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(chunks[0].duration, Duration::from_secs(1));
        assert_eq!(chunks[1].duration, Duration::from_secs(1));
        assert_eq!(chunks[2].duration, Duration::from_millis(520));
        assert_eq!(chunks[2].state, ChunkState::Flushed);
        assert!(chunks.iter().all(|c| c.init_included));
        assert!(chunks
            .iter()
            .all(|c| c.data[..harness.init.len()] == harness.init[..]));
    }

    #[test]
    fn test_single_frame_tail_lasts_one_frame() {
        let mut harness = Harness::new();
        let mut builder = ChunkBuilder::new(Duration::from_secs(1), InitPolicy::None);
        let mut events = Vec::new();
        feed(&mut builder, &mut harness, (0..26).map(|i| (i * FRAME, false)), &mut events);
        builder.finish(&mut events);

        let durations: Vec<_> = closed(&events).iter().map(|c| c.duration).collect();
        assert_eq!(durations, vec![Duration::from_secs(1), Duration::from_millis(40)]);
    }

    #[test]
    fn test_no_cut_while_init_data_is_missing() {
        let mut harness = Harness::new();
        let init = harness.init.clone();
        let mut builder = ChunkBuilder::new(Duration::from_secs(1), InitPolicy::PerChunk);
        let mut events = Vec::new();
        feed(&mut builder, &mut harness, (0..20).map(|i| (i * FRAME, false)), &mut events);

        // tables unavailable across the boundary and a timestamp reset
        for i in 20..40 {
            for (p, c) in harness.pes(VIDEO, i * FRAME, false) {
                builder.accept(&p, c, Some(VIDEO), None, &mut events);
            }
        }
        for (p, c) in harness.pes(VIDEO, 0, false) {
            builder.accept(&p, c, Some(VIDEO), None, &mut events);
        }
        assert!(closed(&events).is_empty());
        assert_eq!(builder.open_sequence(), Some(0));

        for i in 1..10 {
            for (p, c) in harness.pes(VIDEO, i * FRAME, false) {
                builder.accept(&p, c, Some(VIDEO), Some(&init), &mut events);
            }
        }
        builder.finish(&mut events);

        let chunks = closed(&events);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].discontinuity);
        assert!(chunks.iter().all(|c| c.init_included));
        assert!(chunks
            .iter()
            .all(|c| c.data[..init.len()] == init[..]));
    }

    #[test]
    fn test_waits_for_init_data_unless_policy_none() {
        let mut harness = Harness::new();
        let packets = harness.pes(VIDEO, 0, true);
        let mut events = Vec::new();

        let mut builder = ChunkBuilder::new(Duration::from_secs(1), InitPolicy::PerChunk);
        builder.accept(&packets[0].0, packets[0].1, Some(VIDEO), None, &mut events);
        assert!(!builder.is_open());

        let mut builder = ChunkBuilder::new(Duration::from_secs(1), InitPolicy::None);
        builder.accept(&packets[0].0, packets[0].1, Some(VIDEO), None, &mut events);
        assert_eq!(builder.open_sequence(), Some(0));
    }

    #[test]
    fn test_init_segment_emitted_once_before_first_chunk() {
        let mut harness = Harness::new();
        let mut builder = ChunkBuilder::new(Duration::from_secs(1), InitPolicy::InitSegment);
        let mut events = Vec::new();
        feed(&mut builder, &mut harness, (0..60).map(|i| (i * FRAME, false)), &mut events);
        builder.finish(&mut events);

        assert_eq!(events[0], BuilderEvent::InitSegment(harness.init.clone()));
        assert_eq!(events[1], BuilderEvent::Opened { sequence: 0 });
        let inits = events
            .iter()
            .filter(|e| matches!(e, BuilderEvent::InitSegment(_)))
            .count();
        assert_eq!(inits, 1);
        assert!(closed(&events).iter().all(|c| !c.init_included));
    }

    #[test]
    fn test_keyframe_alignment() {
        let mut harness = Harness::new();
        let mut builder = ChunkBuilder::new(Duration::from_secs(1), InitPolicy::None);
        let mut events = Vec::new();
        // keyframe every 30 frames (1.2 s)
        feed(
            &mut builder,
            &mut harness,
            (0..90).map(|i| (i * FRAME, i % 30 == 0)),
            &mut events,
        );
        builder.finish(&mut events);

        let durations: Vec<_> = closed(&events).iter().map(|c| c.duration).collect();
        assert_eq!(
            durations,
            vec![
                Duration::from_millis(1200),
                Duration::from_millis(1200),
                Duration::from_millis(1200)
            ]
        );
    }

    #[test]
    fn test_backwards_timestamp_starts_discontinuous_chunk() {
        let mut harness = Harness::new();
        let mut builder = ChunkBuilder::new(Duration::from_secs(4), InitPolicy::None);
        let mut events = Vec::new();
        feed(&mut builder, &mut harness, (0..10).map(|i| (900_000 + i * FRAME, false)), &mut events);
        feed(&mut builder, &mut harness, (0..10).map(|i| (i * FRAME, false)), &mut events);
        builder.finish(&mut events);

        let chunks = closed(&events);
        assert_eq!(chunks.len(), 2);
        assert!(!chunks[0].discontinuity);
        assert_eq!(chunks[0].duration, Duration::from_millis(400));
        assert!(chunks[1].discontinuity);
    }

    #[test]
    fn test_timestamp_wrap_is_not_a_discontinuity() {
        let mut harness = Harness::new();
        let mut builder = ChunkBuilder::new(Duration::from_secs(4), InitPolicy::None);
        let mut events = Vec::new();
        let start = PTS_MASK + 1 - 5 * FRAME;
        feed(
            &mut builder,
            &mut harness,
            (0..10).map(|i| ((start + i * FRAME) & PTS_MASK, false)),
            &mut events,
        );
        builder.finish(&mut events);

        let chunks = closed(&events);
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].discontinuity);
        assert_eq!(chunks[0].duration, Duration::from_millis(400));
    }

    #[test]
    fn test_progress_reports_cover_the_chunk() {
        let mut harness = Harness::new();
        let mut builder =
            ChunkBuilder::new(Duration::from_secs(1), InitPolicy::PerChunk).with_progress(true);
        let mut events = Vec::new();
        feed(&mut builder, &mut harness, (0..10).map(|i| (i * FRAME, false)), &mut events);
        builder.drain_progress(&mut events);
        feed(&mut builder, &mut harness, (10..20).map(|i| (i * FRAME, false)), &mut events);
        builder.finish(&mut events);

        let mut streamed = BytesMut::new();
        for event in &events {
            if let BuilderEvent::Appended { sequence, data } = event {
                assert_eq!(*sequence, 0);
                streamed.extend_from_slice(data);
            }
        }
        let chunks = closed(&events);
        assert_eq!(chunks.len(), 1);
        assert_eq!(&streamed[..], &chunks[0].data[..]);
        assert!(matches!(events.last(), Some(BuilderEvent::Closed(_))));
    }

    #[test]
    fn test_audio_only_before_first_chunk_is_dropped() {
        let mut harness = Harness::new();
        let init = harness.init.clone();
        let mut builder = ChunkBuilder::new(Duration::from_secs(1), InitPolicy::None);
        let mut events = Vec::new();
        for (p, c) in harness.pes(AUDIO, 0, false) {
            builder.accept(&p, c, Some(VIDEO), Some(&init), &mut events);
        }
        assert!(events.is_empty());
        builder.finish(&mut events);
        assert!(events.is_empty());
    }
}
