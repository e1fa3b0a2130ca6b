/// HLS chunking and playlists
pub mod hls;

/// MPEG transport stream ingest
pub mod ts;
