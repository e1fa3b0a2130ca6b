use super::chunk::{Chunk, ChunkNaming};
use super::playlist::{ceil_secs, Manifest, ManifestEntry, ManifestKind};
use crate::config::ManifestConfig;
use log::debug;
use std::collections::VecDeque;
use std::time::Duration;

/// Owns the chunk history and decides what each manifest render contains.
///
/// Live kinds are re-rendered after every closed chunk, VOD only at the end.
/// With LHLS on (live kinds only), the manifest also advertises the chunk
/// being built and the ones after it, `lhls_advance` names in total. When a
/// chunk closes its advertisement becomes a full entry and one more name is
/// advertised past the end, so names are never withdrawn while the stream
/// runs. At end of stream the names of chunks that will never exist are
/// dropped.
pub struct ManifestEngine {
    kind: ManifestKind,
    window_size: usize,
    lhls_advance: usize,
    target_duration: Duration,
    longest: Duration,
    naming: ChunkNaming,
    init_uri: Option<String>,
    entries: VecDeque<ManifestEntry>,
    media_sequence: u64,
    discontinuity_sequence: u64,
    next_open: Option<u64>,
    terminated: bool,
}

impl ManifestEngine {
    pub fn new(config: &ManifestConfig, target_duration: Duration, naming: ChunkNaming) -> Self {
        Self {
            kind: config.kind,
            window_size: config.window_size,
            lhls_advance: config.lhls_advance,
            target_duration,
            longest: Duration::ZERO,
            naming,
            init_uri: None,
            entries: VecDeque::new(),
            media_sequence: 0,
            discontinuity_sequence: 0,
            next_open: None,
            terminated: false,
        }
    }

    /// References the init segment with `EXT-X-MAP`.
    pub fn with_init_uri(mut self, uri: Option<String>) -> Self {
        self.init_uri = uri;
        self
    }

    pub fn kind(&self) -> ManifestKind {
        self.kind
    }

    pub fn lhls_enabled(&self) -> bool {
        self.lhls_advance > 0 && self.kind.is_live()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn media_sequence(&self) -> u64 {
        self.media_sequence
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// A chunk started growing. Returns a render when the advertised names
    /// changed.
    pub fn chunk_opened(&mut self, sequence: u64) -> Option<String> {
        if !self.lhls_enabled() || self.terminated || self.next_open == Some(sequence) {
            return None;
        }
        self.next_open = Some(sequence);
        Some(self.render())
    }

    /// Records a closed chunk. Returns a render for live kinds.
    pub fn append(&mut self, chunk: &Chunk) -> Option<String> {
        if self.terminated {
            return None;
        }

        self.entries.push_back(ManifestEntry {
            uri: self.naming.chunk_name(chunk.sequence),
            duration: chunk.duration,
            discontinuity: chunk.discontinuity,
        });
        self.longest = self.longest.max(chunk.duration);

        if self.kind == ManifestKind::LiveWindow {
            while self.entries.len() > self.window_size {
                if let Some(evicted) = self.entries.pop_front() {
                    self.media_sequence += 1;
                    if evicted.discontinuity {
                        self.discontinuity_sequence += 1;
                    }
                    debug!("evicted {} from the live window", evicted.uri);
                }
            }
        }

        if self.lhls_enabled() {
            // chunks are opened back to back
            self.next_open = Some(chunk.sequence + 1);
        }

        self.kind.is_live().then(|| self.render())
    }

    /// End of stream. Always returns the final render, without prefetch
    /// names: the chunks they announced will never open.
    pub fn finish(&mut self) -> String {
        self.next_open = None;
        self.terminated = true;
        self.render()
    }

    pub fn manifest(&self) -> Manifest {
        let prefetch = match self.next_open {
            Some(first) if self.lhls_enabled() => (first..first + self.lhls_advance as u64)
                .map(|seq| self.naming.chunk_name(seq))
                .collect(),
            _ => Vec::new(),
        };
        Manifest {
            kind: self.kind,
            target_duration: ceil_secs(self.target_duration.max(self.longest)),
            media_sequence: self.media_sequence,
            discontinuity_sequence: self.discontinuity_sequence,
            init_uri: self.init_uri.clone(),
            entries: self.entries.iter().cloned().collect(),
            prefetch,
            terminated: self.terminated && self.kind != ManifestKind::LiveWindow,
        }
    }

    pub fn render(&self) -> String {
        self.manifest().render()
    }
}
