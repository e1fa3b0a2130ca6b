use super::parser::{section_total_len, TSPacketParser};
use super::types::*;
use crate::config::PidMode;
use bytes::{Bytes, BytesMut};
use log::{debug, info, trace};

/// What an elementary stream carries, as far as segmenting cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Other,
}

impl StreamKind {
    pub fn from_stream_type(stream_type: u8) -> Self {
        match stream_type {
            STREAM_TYPE_MPEG1_VIDEO
            | STREAM_TYPE_MPEG2_VIDEO
            | STREAM_TYPE_MPEG4_VIDEO
            | STREAM_TYPE_H264
            | STREAM_TYPE_H265 => StreamKind::Video,
            STREAM_TYPE_MPEG1_AUDIO
            | STREAM_TYPE_MPEG2_AUDIO
            | STREAM_TYPE_AAC
            | STREAM_TYPE_AAC_LATM
            | STREAM_TYPE_AC3
            | STREAM_TYPE_EAC3 => StreamKind::Audio,
            _ => StreamKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedStream {
    pub pid: u16,
    pub stream_type: u8,
    pub kind: StreamKind,
}

/// Elementary streams of the program, from the most recent PMT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramMap {
    pub program_number: u16,
    pub version: u8,
    pub pcr_pid: u16,
    pub streams: Vec<MappedStream>,
}

impl ProgramMap {
    pub fn from_pmt(pmt: &PMT) -> Self {
        Self {
            program_number: pmt.program_number,
            version: pmt.version,
            pcr_pid: pmt.pcr_pid,
            streams: pmt
                .elementary_stream_infos
                .iter()
                .map(|info| MappedStream {
                    pid: info.elementary_pid,
                    stream_type: info.stream_type,
                    kind: StreamKind::from_stream_type(info.stream_type),
                })
                .collect(),
        }
    }

    pub fn kind_of(&self, pid: u16) -> Option<StreamKind> {
        self.streams.iter().find(|s| s.pid == pid).map(|s| s.kind)
    }

    pub fn first(&self, kind: StreamKind) -> Option<u16> {
        self.streams.iter().find(|s| s.kind == kind).map(|s| s.pid)
    }
}

/// Role of a packet once its PID has been looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    Pat,
    Pmt,
    Video,
    Audio,
    /// Carries only the program clock.
    Pcr,
    /// Unresolved, null, or outside the selected program.
    Other,
}

impl PacketClass {
    pub fn is_table(self) -> bool {
        matches!(self, PacketClass::Pat | PacketClass::Pmt)
    }

    pub fn is_media(self) -> bool {
        matches!(self, PacketClass::Video | PacketClass::Audio | PacketClass::Pcr)
    }
}

/// Collects the packets of one PSI section.
#[derive(Debug, Default)]
struct SectionAssembler {
    data: BytesMut,
    packets: Vec<Bytes>,
    active: bool,
}

impl SectionAssembler {
    /// Feeds one packet; returns the section bytes and the packets that
    /// carried them once the section is complete.
    fn push(&mut self, packet: &TsPacket) -> Option<(BytesMut, Vec<Bytes>)> {
        let payload = packet.payload();
        if packet.payload_unit_start() {
            // an unfinished section is abandoned here
            self.data.clear();
            self.packets.clear();
            let pointer = *payload.first()? as usize;
            let start = 1 + pointer;
            if start >= payload.len() {
                self.active = false;
                return None;
            }
            self.data.extend_from_slice(&payload[start..]);
            self.active = true;
        } else if self.active {
            self.data.extend_from_slice(payload);
        } else {
            return None;
        }
        self.packets.push(packet.raw.clone());

        let total = section_total_len(&self.data)?;
        if self.data.len() < total {
            return None;
        }
        self.active = false;
        let mut data = std::mem::take(&mut self.data);
        data.truncate(total);
        Some((data, std::mem::take(&mut self.packets)))
    }
}

/// Tracks PAT/PMT and decides which PIDs feed the chunks.
///
/// In [`PidMode::Auto`] nothing is resolved until a PMT has been seen, and
/// media packets seen before that are classified [`PacketClass::Other`].
/// In [`PidMode::Manual`] the configured PIDs are used as is; PAT and PMT
/// sections are still collected (CRC checked, never interpreted for PIDs) so
/// they can be written into chunks as init data.
pub struct PidResolver {
    mode: PidMode,
    parser: TSPacketParser,
    pmt_pid: Option<u16>,
    program: Option<ProgramMap>,
    video_pid: Option<u16>,
    audio_pid: Option<u16>,
    pat_assembler: SectionAssembler,
    pmt_assembler: SectionAssembler,
    pat_packets: Vec<Bytes>,
    pmt_packets: Vec<Bytes>,
    /// PAT packets naming a new PMT PID whose PMT has not arrived yet.
    pending_pat: Option<Vec<Bytes>>,
    init: Option<Bytes>,
    pat_version: Option<u8>,
    pmt_version: Option<u8>,
    program_changed: bool,
}

impl PidResolver {
    pub fn new(mode: PidMode) -> Self {
        let (video_pid, audio_pid) = match mode {
            PidMode::Auto => (None, None),
            PidMode::Manual { video, audio } => (video, audio),
        };
        Self {
            mode,
            parser: TSPacketParser::new(),
            pmt_pid: None,
            program: None,
            video_pid,
            audio_pid,
            pat_assembler: SectionAssembler::default(),
            pmt_assembler: SectionAssembler::default(),
            pat_packets: Vec::new(),
            pmt_packets: Vec::new(),
            pending_pat: None,
            init: None,
            pat_version: None,
            pmt_version: None,
            program_changed: false,
        }
    }

    pub fn resolve(&mut self, packet: &TsPacket) -> PacketClass {
        let pid = packet.pid();
        if pid == PID_PAT {
            self.on_pat_packet(packet);
            return PacketClass::Pat;
        }
        if Some(pid) == self.pmt_pid {
            self.on_pmt_packet(packet);
            return PacketClass::Pmt;
        }
        if Some(pid) == self.video_pid {
            return PacketClass::Video;
        }
        if Some(pid) == self.audio_pid {
            return PacketClass::Audio;
        }
        if pid != PID_NULL && self.program.as_ref().is_some_and(|p| p.pcr_pid == pid) {
            return PacketClass::Pcr;
        }
        PacketClass::Other
    }

    pub fn video_pid(&self) -> Option<u16> {
        self.video_pid
    }

    pub fn audio_pid(&self) -> Option<u16> {
        self.audio_pid
    }

    pub fn pmt_pid(&self) -> Option<u16> {
        self.pmt_pid
    }

    pub fn program(&self) -> Option<&ProgramMap> {
        self.program.as_ref()
    }

    /// PID whose timestamps measure chunk time: video when there is one.
    pub fn timing_pid(&self) -> Option<u16> {
        self.video_pid.or(self.audio_pid)
    }

    pub fn is_resolved(&self) -> bool {
        self.timing_pid().is_some()
    }

    /// The latest PAT and PMT packets, verbatim, once both are known.
    ///
    /// After the PAT moves the program to another PMT PID, the previous pair
    /// is still returned until a PMT arrives on the new PID.
    pub fn init_data(&self) -> Option<&Bytes> {
        self.init.as_ref()
    }

    fn refresh_init(&mut self) {
        if self.pat_packets.is_empty() || self.pmt_packets.is_empty() {
            self.init = None;
            return;
        }
        let mut data = BytesMut::with_capacity(
            (self.pat_packets.len() + self.pmt_packets.len()) * TS_PACKET_SIZE,
        );
        for packet in self.pat_packets.iter().chain(self.pmt_packets.iter()) {
            data.extend_from_slice(packet);
        }
        self.init = Some(data.freeze());
    }

    /// Reports (once) that the program was redefined after it was first seen.
    pub fn take_program_change(&mut self) -> bool {
        std::mem::take(&mut self.program_changed)
    }

    fn on_pat_packet(&mut self, packet: &TsPacket) {
        let Some((section, packets)) = self.pat_assembler.push(packet) else {
            return;
        };
        let section = match self.parser.parse_section(&section) {
            Ok(s) if s.table_id == TABLE_ID_PAT && s.current_next => s,
            Ok(_) => return,
            Err(e) => {
                debug!("dropping PAT section: {}", e);
                return;
            }
        };
        let pat = match self.parser.parse_pat(section.body, 0, section.body.len()) {
            Ok(pat) => pat,
            Err(e) => {
                debug!("dropping PAT: {}", e);
                return;
            }
        };
        let Some(pmt_pid) = pat.first_program_pmt_pid() else {
            trace!("PAT without programs");
            return;
        };

        if self.pat_version != Some(section.version) || self.pmt_pid != Some(pmt_pid) {
            debug!("PAT version {} points at PMT PID {:#06x}", section.version, pmt_pid);
        }
        if self.pmt_pid.is_some_and(|old| old != pmt_pid) {
            // program moved: the old init data stays until the new PMT arrives
            self.pmt_version = None;
            self.pmt_assembler = SectionAssembler::default();
            self.program_changed = true;
            self.pending_pat = Some(Vec::new());
        }
        self.pmt_pid = Some(pmt_pid);
        self.pat_version = Some(section.version);
        match self.pending_pat.as_mut() {
            Some(pending) => *pending = packets,
            None => {
                self.pat_packets = packets;
                self.refresh_init();
            }
        }
    }

    fn on_pmt_packet(&mut self, packet: &TsPacket) {
        let Some((section, packets)) = self.pmt_assembler.push(packet) else {
            return;
        };
        let section = match self.parser.parse_section(&section) {
            Ok(s) if s.table_id == TABLE_ID_PMT && s.current_next => s,
            Ok(_) => return,
            Err(e) => {
                debug!("dropping PMT section: {}", e);
                return;
            }
        };

        let previous = self.pmt_version.replace(section.version);
        if previous.is_some_and(|v| v != section.version) {
            self.program_changed = true;
        }
        if let Some(pat_packets) = self.pending_pat.take() {
            self.pat_packets = pat_packets;
        }
        self.pmt_packets = packets;
        self.refresh_init();

        if !matches!(self.mode, PidMode::Auto) {
            return;
        }

        let mut pmt = match self.parser.parse_pmt(section.body, 0, section.body.len()) {
            Ok(pmt) => pmt,
            Err(e) => {
                debug!("dropping PMT: {}", e);
                return;
            }
        };
        pmt.program_number = section.table_id_extension;
        pmt.version = section.version;

        let map = ProgramMap::from_pmt(&pmt);
        if self.program.as_ref() != Some(&map) {
            let video = map.first(StreamKind::Video);
            let audio = map.first(StreamKind::Audio);
            info!(
                "program {} resolved: video PID {:?}, audio PID {:?}, PCR PID {:#06x}",
                map.program_number, video, audio, map.pcr_pid
            );
            self.video_pid = video;
            self.audio_pid = audio;
            self.program = Some(map);
        }
    }
}
