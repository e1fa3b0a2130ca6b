use super::types::PTS_MASK;
use crate::error::Result;
use bytes::{BufMut, BytesMut};

// Stream IDs
pub const STREAM_ID_VIDEO: u8 = 0xe0;
pub const STREAM_ID_AUDIO: u8 = 0xc0;

const STREAM_ID_PROGRAM_STREAM_MAP: u8 = 0xbc;
const STREAM_ID_PADDING: u8 = 0xbe;
const STREAM_ID_PRIVATE_2: u8 = 0xbf;

/// Timestamps carried in a PES header, in 90 kHz ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesTimestamps {
    pub pts: u64,
    pub dts: Option<u64>,
}

impl PesTimestamps {
    /// Decode order time. DTS when present, since PTS reorders around B-frames.
    pub fn decode_time(&self) -> u64 {
        self.dts.unwrap_or(self.pts)
    }
}

/// Reads PTS/DTS from the start of a PES packet (the payload of a packet
/// with payload_unit_start set). Returns `None` for anything that is not a
/// PES header with timestamps, including headers cut short by the packet end.
pub fn parse_timestamps(payload: &[u8]) -> Option<PesTimestamps> {
    if payload.len() < 9 || payload[..3] != [0x00, 0x00, 0x01] {
        return None;
    }

    match payload[3] {
        STREAM_ID_PROGRAM_STREAM_MAP | STREAM_ID_PADDING | STREAM_ID_PRIVATE_2 => return None,
        0xf0 | 0xf1 | 0xf2 | 0xf8 | 0xff => return None,
        _ => {}
    }

    // '10' marker bits of the optional header
    if payload[6] & 0xc0 != 0x80 {
        return None;
    }

    let pts_dts_flags = (payload[7] >> 6) & 0x03;
    if pts_dts_flags & 0b10 == 0 {
        return None;
    }

    let pts = read_timestamp(payload.get(9..14)?)?;
    let dts = if pts_dts_flags == 0b11 {
        Some(read_timestamp(payload.get(14..19)?)?)
    } else {
        None
    };

    Some(PesTimestamps { pts, dts })
}

fn read_timestamp(p: &[u8]) -> Option<u64> {
    if p[0] & 0x01 == 0 || p[2] & 0x01 == 0 || p[4] & 0x01 == 0 {
        return None;
    }
    Some(
        ((p[0] as u64 & 0x0E) << 29)
            | ((p[1] as u64) << 22)
            | ((p[2] as u64 & 0xFE) << 14)
            | ((p[3] as u64) << 7)
            | ((p[4] as u64 & 0xFE) >> 1),
    )
}

/// Minimal PES header writer used by the test muxer.
#[derive(Debug, Clone)]
pub struct PESHeader {
    pub stream_id: u8,
    /// Zero means unbounded, which is the norm for video.
    pub packet_length: u16,
    pub data_alignment: bool,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
}

impl PESHeader {
    pub fn new(stream_id: u8) -> Self {
        Self {
            stream_id,
            packet_length: 0,
            data_alignment: true,
            pts: None,
            dts: None,
        }
    }

    pub fn with_ticks(mut self, pts: u64, dts: Option<u64>) -> Self {
        self.pts = Some(pts & PTS_MASK);
        self.dts = dts.map(|d| d & PTS_MASK);
        self
    }

    pub fn header_data_length(&self) -> u8 {
        match (self.pts, self.dts) {
            (Some(_), Some(_)) => 10,
            (Some(_), None) => 5,
            _ => 0,
        }
    }

    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_slice(&[0x00, 0x00, 0x01]);
        buf.put_u8(self.stream_id);
        buf.put_u16(self.packet_length);

        let mut flags = 0x80u8;
        if self.data_alignment {
            flags |= 0x04;
        }
        buf.put_u8(flags);

        let pts_dts_flags = match (self.pts, self.dts) {
            (Some(_), Some(_)) => 0xc0,
            (Some(_), None) => 0x80,
            _ => 0x00,
        };
        buf.put_u8(pts_dts_flags);
        buf.put_u8(self.header_data_length());

        if let Some(pts) = self.pts {
            let marker = if self.dts.is_some() { 0x30 } else { 0x20 };
            write_timestamp(buf, marker, pts);
            if let Some(dts) = self.dts {
                write_timestamp(buf, 0x10, dts);
            }
        }

        Ok(())
    }
}

fn write_timestamp(buf: &mut BytesMut, marker: u8, ts: u64) {
    let ts = ts & PTS_MASK;
    buf.put_u8(marker | ((ts >> 29) & 0x0E) as u8 | 0x01);
    buf.put_u16((((ts >> 14) & 0xFFFE) | 0x01) as u16);
    buf.put_u16((((ts << 1) & 0xFFFE) | 0x01) as u16);
}
