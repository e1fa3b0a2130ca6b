//! Common helpers shared by the transport-stream code.

/// CRC calculation for PSI sections
pub mod crc;

pub use crc::Crc32Mpeg2;
