use super::types::*;
use crate::error::{Result, SegmenterError};
use crate::utils::crc::Crc32Mpeg2;
use bytes::Bytes;

/// A long-form PSI section with its CRC already verified.
#[derive(Debug, Clone)]
pub struct Section<'a> {
    pub table_id: u8,
    pub table_id_extension: u16,
    pub version: u8,
    pub current_next: bool,
    /// Table body between the section header and the CRC.
    pub body: &'a [u8],
}

/// Total length in bytes (header + body + CRC) announced by a section header,
/// or `None` when fewer than three bytes are available.
pub fn section_total_len(data: &[u8]) -> Option<usize> {
    if data.len() < 3 {
        return None;
    }
    let section_length = (((data[1] & 0x0f) as usize) << 8) | data[2] as usize;
    Some(3 + section_length)
}

pub struct TSPacketParser {
    crc: Crc32Mpeg2,
}

impl TSPacketParser {
    pub fn new() -> Self {
        Self {
            crc: Crc32Mpeg2::new(),
        }
    }

    pub fn parse_header(&self, data: &[u8]) -> Result<TSHeader> {
        if data.len() < TS_HEADER_SIZE {
            return Err(SegmenterError::InvalidData("TS packet too short".into()));
        }

        if data[0] != TS_SYNC_BYTE {
            return Err(SegmenterError::InvalidData("Invalid sync byte".into()));
        }

        Ok(TSHeader {
            sync_byte: data[0],
            transport_error: (data[1] & 0x80) != 0,
            payload_unit_start: (data[1] & 0x40) != 0,
            transport_priority: (data[1] & 0x20) != 0,
            pid: (((data[1] & 0x1F) as u16) << 8) | data[2] as u16,
            scrambling_control: (data[3] >> 6) & 0x03,
            adaptation_field_exists: (data[3] & 0x20) != 0,
            contains_payload: (data[3] & 0x10) != 0,
            continuity_counter: data[3] & 0x0F,
        })
    }

    /// Parses a complete packet and applies the structural sanity checks:
    /// no transport error, a legal adaptation field control, and an adaptation
    /// field that fits inside the packet.
    pub fn parse_packet(&self, raw: Bytes) -> Result<TsPacket> {
        if raw.len() != TS_PACKET_SIZE {
            return Err(SegmenterError::InvalidData(format!(
                "TS packet has {} bytes",
                raw.len()
            )));
        }

        let header = self.parse_header(&raw)?;
        if header.transport_error {
            return Err(SegmenterError::InvalidData("transport error flag set".into()));
        }
        if !header.adaptation_field_exists && !header.contains_payload {
            return Err(SegmenterError::InvalidData(
                "reserved adaptation field control".into(),
            ));
        }

        let mut payload_offset = TS_HEADER_SIZE;
        let adaptation = if header.adaptation_field_exists {
            let field = self.parse_adaptation_field(&raw, payload_offset)?;
            payload_offset += field.length + 1;
            if header.contains_payload && payload_offset >= TS_PACKET_SIZE {
                return Err(SegmenterError::InvalidData(
                    "adaptation field leaves no room for payload".into(),
                ));
            }
            Some(field)
        } else {
            None
        };

        Ok(TsPacket {
            header,
            adaptation,
            payload_offset,
            raw,
        })
    }

    pub fn parse_adaptation_field(&self, data: &[u8], offset: usize) -> Result<AdaptationField> {
        if data.len() <= offset {
            return Err(SegmenterError::InvalidData("Adaptation field missing".into()));
        }

        let adaptation_field_length = data[offset] as usize;
        if data.len() < offset + adaptation_field_length + 1 {
            return Err(SegmenterError::InvalidData("Adaptation field too short".into()));
        }

        let mut field = AdaptationField {
            length: adaptation_field_length,
            ..Default::default()
        };
        if adaptation_field_length == 0 {
            return Ok(field);
        }

        let flags = data[offset + 1];
        field.discontinuity = (flags & 0x80) != 0;
        field.random_access = (flags & 0x40) != 0;
        field.es_priority = (flags & 0x20) != 0;
        field.pcr_flag = (flags & 0x10) != 0;
        field.opcr_flag = (flags & 0x08) != 0;
        field.splicing_point_flag = (flags & 0x04) != 0;
        field.private_data_flag = (flags & 0x02) != 0;
        field.extension_flag = (flags & 0x01) != 0;

        let end = offset + 1 + adaptation_field_length;
        let mut pos = offset + 2;

        if field.pcr_flag {
            if end < pos + 6 {
                return Err(SegmenterError::InvalidData("PCR data too short".into()));
            }
            field.pcr = Some(read_clock_reference(&data[pos..pos + 6]));
            pos += 6;
        }

        if field.opcr_flag {
            if end < pos + 6 {
                return Err(SegmenterError::InvalidData("OPCR data too short".into()));
            }
            field.opcr = Some(read_clock_reference(&data[pos..pos + 6]));
            pos += 6;
        }

        if field.splicing_point_flag {
            if end < pos + 1 {
                return Err(SegmenterError::InvalidData("Splice countdown too short".into()));
            }
            field.splice_countdown = Some(data[pos] as i8);
        }

        Ok(field)
    }

    /// Verifies and splits a long-form PSI section. `data` starts at the
    /// table id and may carry trailing stuffing.
    pub fn parse_section<'a>(&self, data: &'a [u8]) -> Result<Section<'a>> {
        let total = section_total_len(data)
            .ok_or_else(|| SegmenterError::Parser("PSI section header truncated".into()))?;
        if (data[1] & 0x80) == 0 {
            return Err(SegmenterError::Parser("PSI section is not long form".into()));
        }
        if total < 12 {
            return Err(SegmenterError::Parser("PSI section too short".into()));
        }
        if data.len() < total {
            return Err(SegmenterError::Parser("PSI section truncated".into()));
        }

        let crc_pos = total - 4;
        let stored = u32::from_be_bytes([
            data[crc_pos],
            data[crc_pos + 1],
            data[crc_pos + 2],
            data[crc_pos + 3],
        ]);
        let computed = self.crc.calculate(&data[..crc_pos]);
        if stored != computed {
            return Err(SegmenterError::Parser(format!(
                "PSI CRC mismatch: stored {:08x}, computed {:08x}",
                stored, computed
            )));
        }

        Ok(Section {
            table_id: data[0],
            table_id_extension: ((data[3] as u16) << 8) | data[4] as u16,
            version: (data[5] >> 1) & 0x1f,
            current_next: (data[5] & 0x01) != 0,
            body: &data[8..crc_pos],
        })
    }

    pub fn parse_pat(&self, data: &[u8], offset: usize, length: usize) -> Result<PAT> {
        if offset + length > data.len() {
            return Err(SegmenterError::Parser("PAT body out of range".into()));
        }

        let mut pat = PAT::new();
        let mut pos = offset;
        let end = offset + length;

        while pos + 4 <= end {
            let program_number = ((data[pos] as u16) << 8) | data[pos + 1] as u16;
            let pid = ((data[pos + 2] as u16 & 0x1F) << 8) | data[pos + 3] as u16;
            pat.entries.push(PATEntry {
                program_number,
                network_pid: if program_number == 0 { pid } else { 0 },
                program_map_pid: if program_number != 0 { pid } else { 0 },
            });
            pos += 4;
        }

        Ok(pat)
    }

    pub fn parse_pmt(&self, data: &[u8], offset: usize, length: usize) -> Result<PMT> {
        if offset + length > data.len() {
            return Err(SegmenterError::Parser("PMT body out of range".into()));
        }

        let mut pmt = PMT::new();
        let mut pos = offset;
        let end = offset + length;

        if pos + 2 > end {
            return Err(SegmenterError::Parser("PMT too short for PCR PID".into()));
        }

        pmt.pcr_pid = ((data[pos] as u16 & 0x1F) << 8) | data[pos + 1] as u16;
        pos += 2;

        if pos + 2 > end {
            return Err(SegmenterError::Parser(
                "PMT too short for program info length".into(),
            ));
        }

        let program_info_length = ((data[pos] as usize & 0x0F) << 8) | data[pos + 1] as usize;
        pos += 2;

        if program_info_length > 0 {
            if pos + program_info_length > end {
                return Err(SegmenterError::Parser("Program info data too short".into()));
            }
            pmt.program_descriptors =
                self.parse_descriptors(&data[pos..pos + program_info_length])?;
            pos += program_info_length;
        }

        while pos + 5 <= end {
            let stream_type = data[pos];
            let elementary_pid = ((data[pos + 1] as u16 & 0x1F) << 8) | data[pos + 2] as u16;
            let es_info_length = ((data[pos + 3] as usize & 0x0F) << 8) | data[pos + 4] as usize;
            pos += 5;

            if pos + es_info_length > end {
                return Err(SegmenterError::Parser("ES info data too short".into()));
            }

            let descriptors = self.parse_descriptors(&data[pos..pos + es_info_length])?;
            pos += es_info_length;

            pmt.elementary_stream_infos.push(ElementaryStreamInfo {
                stream_type,
                elementary_pid,
                descriptors,
            });
        }

        Ok(pmt)
    }

    fn parse_descriptors(&self, data: &[u8]) -> Result<Vec<Descriptor>> {
        let mut descriptors = Vec::new();
        let mut pos = 0;

        while pos + 2 <= data.len() {
            let tag = data[pos];
            let length = data[pos + 1] as usize;
            pos += 2;

            if pos + length > data.len() {
                return Err(SegmenterError::Parser("Descriptor data too short".into()));
            }

            descriptors.push(Descriptor {
                tag,
                data: data[pos..pos + length].to_vec(),
            });
            pos += length;
        }

        Ok(descriptors)
    }
}

impl Default for TSPacketParser {
    fn default() -> Self {
        Self::new()
    }
}

/// 33-bit base at 90 kHz plus 9-bit extension, returned in 27 MHz units.
fn read_clock_reference(p: &[u8]) -> u64 {
    let base = ((p[0] as u64) << 25)
        | ((p[1] as u64) << 17)
        | ((p[2] as u64) << 9)
        | ((p[3] as u64) << 1)
        | ((p[4] as u64) >> 7);
    let ext = (((p[4] & 0x01) as u64) << 8) | (p[5] as u64);
    base * 300 + ext
}
