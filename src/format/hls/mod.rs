//! HLS output: chunk assembly and media playlists.
//!
//! [`ChunkBuilder`] turns resolved transport packets into [`Chunk`]s.
//! [`ManifestEngine`] keeps the list of chunks a playlist refers to and
//! renders it as a [`Manifest`].

/// Chunk boundaries and init data placement
pub mod chunk;

/// Chunk history, live window and LHLS advertisement
pub mod engine;

/// Playlist model, rendering and parsing
pub mod playlist;

pub use chunk::{BuilderEvent, Chunk, ChunkBuilder, ChunkNaming, ChunkState, InitPolicy};
pub use engine::ManifestEngine;
pub use playlist::{Manifest, ManifestEntry, ManifestKind};
