//! # MPEG Transport Stream ingest
//!
//! Incremental parsing of a 188-byte packet stream:
//!
//! - [`PacketReader`] cuts packets out of reads of any size and resyncs on
//!   sync byte loss
//! - [`TSPacketParser`] decodes headers, adaptation fields and PSI sections
//! - [`PidResolver`] follows PAT/PMT to find the video and audio PIDs
//! - [`pes`] pulls PTS/DTS out of PES headers
//! - [`TSMuxer`] writes synthetic streams
//!
//! ## Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use tssegmenter::config::PidMode;
//! use tssegmenter::format::ts::{PacketClass, PacketReader, PidResolver, TSMuxer, STREAM_TYPE_H264};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut muxer = TSMuxer::new();
//! muxer.add_stream(STREAM_TYPE_H264, 0x100);
//!
//! let mut data = BytesMut::new();
//! muxer.write_tables(&mut data)?;
//! muxer.write_pes(0x100, 0, None, true, &[0u8; 1000], &mut data)?;
//!
//! let mut reader = PacketReader::new();
//! let mut resolver = PidResolver::new(PidMode::Auto);
//! let mut video = 0;
//! for packet in reader.feed(&data) {
//!     if resolver.resolve(&packet) == PacketClass::Video {
//!         video += 1;
//!     }
//! }
//! video += reader
//!     .finish()
//!     .filter(|p| resolver.resolve(p) == PacketClass::Video)
//!     .count();
//! assert_eq!(video, 6);
//! # Ok(())
//! # }
//! ```

/// Synthetic transport stream writer
pub mod muxer;

/// Packet, adaptation field and PSI parsing
pub mod parser;

/// PES header timestamps
pub mod pes;

/// Packet framing over an unbounded byte feed
pub mod reader;

/// PAT/PMT tracking and PID classification
pub mod resolver;

/// Core TS types and constants
pub mod types;

pub use muxer::TSMuxer;
pub use parser::TSPacketParser;
pub use pes::{parse_timestamps, PesTimestamps};
pub use reader::{PacketReader, ReaderStats};
pub use resolver::{PacketClass, PidResolver, ProgramMap, StreamKind};
pub use types::{
    TSHeader, TsPacket, PID_PAT, PID_NULL, STREAM_TYPE_AAC, STREAM_TYPE_H264, STREAM_TYPE_H265,
    TS_PACKET_SIZE,
};
