use super::pes::{PESHeader, STREAM_ID_AUDIO, STREAM_ID_VIDEO};
use super::resolver::StreamKind;
use super::types::*;
use crate::error::{Result, SegmenterError};
use crate::utils::crc::Crc32Mpeg2;
use bytes::{BufMut, BytesMut};

pub const DEFAULT_PMT_PID: u16 = 0x1000;

const MAX_PAYLOAD: usize = TS_PACKET_SIZE - TS_HEADER_SIZE;
/// Pointer field, section header, CRC.
const SECTION_OVERHEAD: usize = 1 + 8 + 4;

struct MuxStream {
    pid: u16,
    stream_id: u8,
    continuity_counter: u8,
}

/// Synchronous single-program transport stream writer.
///
/// Produces well-formed PAT/PMT and PES packets for feeding the segmenter
/// from tests and tools. Each table fits in one packet.
pub struct TSMuxer {
    pat: PAT,
    pmt: PMT,
    pmt_pid: u16,
    streams: Vec<MuxStream>,
    pat_cc: u8,
    pmt_cc: u8,
    crc: Crc32Mpeg2,
    discontinuity: bool,
}

impl TSMuxer {
    pub fn new() -> Self {
        Self::with_pmt_pid(DEFAULT_PMT_PID)
    }

    pub fn with_pmt_pid(pmt_pid: u16) -> Self {
        let mut pat = PAT::new();
        pat.transport_stream_id = 1;
        pat.entries.push(PATEntry {
            program_number: 1,
            network_pid: 0,
            program_map_pid: pmt_pid,
        });
        let pmt = PMT {
            program_number: 1,
            pcr_pid: PID_NULL,
            ..Default::default()
        };
        Self {
            pat,
            pmt,
            pmt_pid,
            streams: Vec::new(),
            pat_cc: 0,
            pmt_cc: 0,
            crc: Crc32Mpeg2::new(),
            discontinuity: false,
        }
    }

    pub fn pmt_pid(&self) -> u16 {
        self.pmt_pid
    }

    pub fn pmt_version(&self) -> u8 {
        self.pmt.version
    }

    /// Adds an elementary stream. The first stream added carries the PCR.
    /// Every addition bumps the PMT version.
    pub fn add_stream(&mut self, stream_type: u8, pid: u16) {
        let stream_id = match StreamKind::from_stream_type(stream_type) {
            StreamKind::Video => STREAM_ID_VIDEO,
            _ => STREAM_ID_AUDIO,
        };
        if self.streams.is_empty() {
            self.pmt.pcr_pid = pid;
        }
        self.pmt.elementary_stream_infos.push(ElementaryStreamInfo {
            stream_type,
            elementary_pid: pid,
            descriptors: Vec::new(),
        });
        self.pmt.version = (self.pmt.version + 1) & 0x1f;
        self.streams.push(MuxStream {
            pid,
            stream_id,
            continuity_counter: 0,
        });
    }

    /// Sets the discontinuity indicator on the next PES written.
    pub fn mark_discontinuity(&mut self) {
        self.discontinuity = true;
    }

    /// Writes one PAT packet followed by one PMT packet.
    pub fn write_tables(&mut self, buf: &mut BytesMut) -> Result<()> {
        let mut body = BytesMut::new();
        self.pat.write_to(&mut body)?;
        let cc = next_cc(&mut self.pat_cc);
        self.write_section(
            buf,
            PID_PAT,
            cc,
            TABLE_ID_PAT,
            self.pat.transport_stream_id,
            self.pat.version,
            &body,
        )?;

        let mut body = BytesMut::new();
        self.pmt.write_to(&mut body)?;
        let cc = next_cc(&mut self.pmt_cc);
        self.write_section(
            buf,
            self.pmt_pid,
            cc,
            TABLE_ID_PMT,
            self.pmt.program_number,
            self.pmt.version,
            &body,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn write_section(
        &self,
        buf: &mut BytesMut,
        pid: u16,
        continuity_counter: u8,
        table_id: u8,
        table_id_extension: u16,
        version: u8,
        body: &[u8],
    ) -> Result<()> {
        if body.len() + SECTION_OVERHEAD > MAX_PAYLOAD {
            return Err(SegmenterError::InvalidData(format!(
                "table body of {} bytes does not fit one packet",
                body.len()
            )));
        }

        let start = buf.len();
        TSHeader {
            payload_unit_start: true,
            pid,
            continuity_counter,
            ..Default::default()
        }
        .write_to(buf)?;
        buf.put_u8(0); // pointer field

        let section_start = buf.len();
        buf.put_u8(table_id);
        // section_length counts everything after itself, CRC included
        buf.put_u16(0xB000 | ((5 + body.len() + 4) as u16 & 0x3FF));
        buf.put_u16(table_id_extension);
        buf.put_u8(0xC1 | ((version & 0x1f) << 1));
        buf.put_u8(0); // section number
        buf.put_u8(0); // last section number
        buf.put_slice(body);

        let crc = self.crc.calculate(&buf[section_start..]);
        buf.put_u32(crc);

        buf.resize(start + TS_PACKET_SIZE, 0xFF);
        Ok(())
    }

    /// Packetizes one PES packet on `pid`.
    ///
    /// The first packet carries the random access indicator when asked to,
    /// and the PCR (derived from the decode time) when `pid` is the PCR PID.
    /// The last packet is padded with adaptation field stuffing.
    pub fn write_pes(
        &mut self,
        pid: u16,
        pts: u64,
        dts: Option<u64>,
        random_access: bool,
        data: &[u8],
        buf: &mut BytesMut,
    ) -> Result<()> {
        let pcr_pid = self.pmt.pcr_pid;
        let mut discontinuity = std::mem::take(&mut self.discontinuity);
        let stream = self
            .streams
            .iter_mut()
            .find(|s| s.pid == pid)
            .ok_or_else(|| SegmenterError::InvalidData(format!("unknown PID {:#06x}", pid)))?;

        let mut pes = BytesMut::with_capacity(data.len() + 19);
        PESHeader::new(stream.stream_id)
            .with_ticks(pts, dts)
            .write_to(&mut pes)?;
        pes.put_slice(data);

        let mut remaining = &pes[..];
        let mut first = true;
        while !remaining.is_empty() {
            let pcr = (first && pid == pcr_pid).then(|| dts.unwrap_or(pts) & PTS_MASK);
            let mut flags = 0u8;
            if discontinuity {
                flags |= 0x80;
            }
            if first && random_access {
                flags |= 0x40;
            }
            if pcr.is_some() {
                flags |= 0x10;
            }

            let fixed = match (flags != 0, pcr.is_some()) {
                (false, _) => 0,
                (true, false) => 2,
                (true, true) => 8,
            };
            let room = MAX_PAYLOAD - fixed;
            let take = remaining.len().min(room);
            let adaptation_len = fixed + (room - take);

            TSHeader {
                payload_unit_start: first,
                pid,
                adaptation_field_exists: adaptation_len > 0,
                continuity_counter: next_cc(&mut stream.continuity_counter),
                ..Default::default()
            }
            .write_to(buf)?;

            if adaptation_len > 0 {
                write_adaptation_field(buf, adaptation_len, flags, pcr);
            }
            buf.put_slice(&remaining[..take]);

            remaining = &remaining[take..];
            first = false;
            discontinuity = false;
        }
        Ok(())
    }

    /// Writes a null packet.
    pub fn write_null(&self, buf: &mut BytesMut) -> Result<()> {
        TSHeader {
            pid: PID_NULL,
            ..Default::default()
        }
        .write_to(buf)?;
        buf.put_bytes(0xFF, MAX_PAYLOAD);
        Ok(())
    }
}

impl Default for TSMuxer {
    fn default() -> Self {
        Self::new()
    }
}

fn next_cc(counter: &mut u8) -> u8 {
    let current = *counter;
    *counter = (current + 1) & 0x0F;
    current
}

/// Writes an adaptation field occupying exactly `total` bytes, length byte
/// included.
fn write_adaptation_field(buf: &mut BytesMut, total: usize, flags: u8, pcr: Option<u64>) {
    buf.put_u8((total - 1) as u8);
    if total == 1 {
        return;
    }
    buf.put_u8(flags);
    let mut used = 2;
    if let Some(base) = pcr {
        buf.put_u8((base >> 25) as u8);
        buf.put_u8((base >> 17) as u8);
        buf.put_u8((base >> 9) as u8);
        buf.put_u8((base >> 1) as u8);
        buf.put_u8((((base & 0x01) as u8) << 7) | 0x7e);
        buf.put_u8(0);
        used += 6;
    }
    buf.put_bytes(0xFF, total - used);
}
