#![allow(dead_code)]

use bytes::BytesMut;
use tssegmenter::format::ts::{TSMuxer, STREAM_TYPE_AAC, STREAM_TYPE_H264, TS_PACKET_SIZE};

pub const VIDEO_PID: u16 = 0x100;
pub const AUDIO_PID: u16 = 0x101;
pub const FPS: u64 = 25;
const FRAME_TICKS: u64 = 90_000 / FPS;

/// Synthetic A/V program: 25 fps video with a keyframe every
/// `keyframe_interval` frames, AAC-sized audio every other frame, and
/// PAT/PMT before every keyframe.
pub struct StreamBuilder {
    muxer: TSMuxer,
    keyframe_interval: u64,
    first_pts: u64,
    audio: bool,
    tables: bool,
}

impl StreamBuilder {
    pub fn new() -> Self {
        Self::with_muxer(TSMuxer::new())
    }

    /// Same program, announced on another PMT PID.
    pub fn with_pmt_pid(pmt_pid: u16) -> Self {
        Self::with_muxer(TSMuxer::with_pmt_pid(pmt_pid))
    }

    fn with_muxer(mut muxer: TSMuxer) -> Self {
        muxer.add_stream(STREAM_TYPE_H264, VIDEO_PID);
        muxer.add_stream(STREAM_TYPE_AAC, AUDIO_PID);
        Self {
            muxer,
            keyframe_interval: FPS,
            first_pts: 900_000,
            audio: true,
            tables: true,
        }
    }

    pub fn keyframe_interval(mut self, frames: u64) -> Self {
        self.keyframe_interval = frames;
        self
    }

    pub fn first_pts(mut self, pts: u64) -> Self {
        self.first_pts = pts;
        self
    }

    /// Stops or resumes writing PAT/PMT before keyframes.
    pub fn tables(mut self, enabled: bool) -> Self {
        self.tables = enabled;
        self
    }

    /// Adds a stream to the program, which bumps the PMT version.
    pub fn add_stream(&mut self, stream_type: u8, pid: u16) {
        self.muxer.add_stream(stream_type, pid);
    }

    /// The PAT packet alone, without the PMT that follows it.
    pub fn pat_only(&mut self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.muxer.write_tables(&mut buf).unwrap();
        buf[..TS_PACKET_SIZE].to_vec()
    }

    pub fn next_pts(&self) -> u64 {
        self.first_pts
    }

    pub fn seconds(&mut self, seconds: u64) -> Vec<u8> {
        self.frames(seconds * FPS)
    }

    pub fn frames(&mut self, count: u64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for frame in 0..count {
            let pts = self.first_pts + frame * FRAME_TICKS;
            let keyframe = frame % self.keyframe_interval == 0;
            if keyframe && self.tables {
                self.muxer.write_tables(&mut buf).unwrap();
            }
            let size = if keyframe { 6000 } else { 1200 };
            self.muxer
                .write_pes(VIDEO_PID, pts, None, keyframe, &vec![0u8; size], &mut buf)
                .unwrap();
            if self.audio && frame % 2 == 0 {
                self.muxer
                    .write_pes(AUDIO_PID, pts, None, false, &[0x21u8; 370], &mut buf)
                    .unwrap();
            }
        }
        self.first_pts += count * FRAME_TICKS;
        buf.to_vec()
    }
}
