use crate::error::{Result, SegmenterError};
use std::fmt;
use std::time::Duration;

/// Playlist flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManifestKind {
    /// Rendered once, complete, at end of stream.
    Vod,
    /// Grows without bound; ended at end of stream.
    LiveEvent,
    /// Sliding window over the most recent chunks; never ended.
    #[default]
    LiveWindow,
}

impl ManifestKind {
    /// 0 VOD, 1 live event, 2 live sliding window.
    pub fn from_selector(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ManifestKind::Vod),
            1 => Ok(ManifestKind::LiveEvent),
            2 => Ok(ManifestKind::LiveWindow),
            other => Err(SegmenterError::Config(format!(
                "unknown manifest type {}",
                other
            ))),
        }
    }

    pub fn is_live(self) -> bool {
        !matches!(self, ManifestKind::Vod)
    }

    fn playlist_type(self) -> Option<&'static str> {
        match self {
            ManifestKind::Vod => Some("VOD"),
            ManifestKind::LiveEvent => Some("EVENT"),
            ManifestKind::LiveWindow => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub uri: String,
    pub duration: Duration,
    pub discontinuity: bool,
}

/// A media playlist, as rendered.
///
/// Durations are written with microsecond precision, so a manifest whose
/// entry durations are whole microseconds renders and parses back to an equal
/// value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Manifest {
    pub kind: ManifestKind,
    /// Whole seconds, at least the longest entry.
    pub target_duration: u64,
    pub media_sequence: u64,
    pub discontinuity_sequence: u64,
    /// `EXT-X-MAP` URI of the init segment.
    pub init_uri: Option<String>,
    pub entries: Vec<ManifestEntry>,
    /// LHLS names of chunks not finished yet.
    pub prefetch: Vec<String>,
    pub terminated: bool,
}

impl Manifest {
    /// Protocol version required by the tags in use.
    pub fn version(&self) -> u8 {
        if self.init_uri.is_some() {
            6
        } else {
            3
        }
    }

    pub fn render(&self) -> String {
        self.to_string()
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        if lines.next() != Some("#EXTM3U") {
            return Err(SegmenterError::Manifest("missing #EXTM3U header".into()));
        }

        let mut manifest = Manifest {
            kind: ManifestKind::LiveWindow,
            ..Default::default()
        };
        let mut pending: Option<(Duration, bool)> = None;
        let mut discontinuity = false;

        for line in lines {
            if let Some(value) = line.strip_prefix("#EXT-X-PLAYLIST-TYPE:") {
                manifest.kind = match value {
                    "VOD" => ManifestKind::Vod,
                    "EVENT" => ManifestKind::LiveEvent,
                    other => {
                        return Err(SegmenterError::Manifest(format!(
                            "unknown playlist type {}",
                            other
                        )))
                    }
                };
            } else if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                manifest.target_duration = parse_number(value, "target duration")?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
                manifest.media_sequence = parse_number(value, "media sequence")?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-DISCONTINUITY-SEQUENCE:") {
                manifest.discontinuity_sequence = parse_number(value, "discontinuity sequence")?;
            } else if line == "#EXT-X-DISCONTINUITY" {
                discontinuity = true;
            } else if let Some(value) = line.strip_prefix("#EXT-X-MAP:") {
                let uri = value
                    .strip_prefix("URI=\"")
                    .and_then(|v| v.strip_suffix('"'))
                    .ok_or_else(|| SegmenterError::Manifest(format!("bad map tag {}", value)))?;
                manifest.init_uri = Some(uri.to_string());
            } else if let Some(value) = line.strip_prefix("#EXTINF:") {
                let duration = value.split(',').next().unwrap_or_default();
                pending = Some((parse_duration(duration)?, std::mem::take(&mut discontinuity)));
            } else if let Some(uri) = line.strip_prefix("#EXT-X-PREFETCH:") {
                manifest.prefetch.push(uri.to_string());
            } else if line == "#EXT-X-ENDLIST" {
                manifest.terminated = true;
            } else if line.starts_with('#') {
                // tags this segmenter never writes
            } else {
                let (duration, discontinuity) = pending.take().ok_or_else(|| {
                    SegmenterError::Manifest(format!("URI {} without #EXTINF", line))
                })?;
                manifest.entries.push(ManifestEntry {
                    uri: line.to_string(),
                    duration,
                    discontinuity,
                });
            }
        }

        if pending.is_some() {
            return Err(SegmenterError::Manifest("#EXTINF without URI".into()));
        }
        Ok(manifest)
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "#EXTM3U")?;
        writeln!(f, "#EXT-X-VERSION:{}", self.version())?;
        if let Some(kind) = self.kind.playlist_type() {
            writeln!(f, "#EXT-X-PLAYLIST-TYPE:{}", kind)?;
        }
        writeln!(f, "#EXT-X-TARGETDURATION:{}", self.target_duration)?;
        writeln!(f, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence)?;
        if self.discontinuity_sequence > 0 {
            writeln!(f, "#EXT-X-DISCONTINUITY-SEQUENCE:{}", self.discontinuity_sequence)?;
        }
        if let Some(uri) = &self.init_uri {
            writeln!(f, "#EXT-X-MAP:URI=\"{}\"", uri)?;
        }

        for entry in &self.entries {
            if entry.discontinuity {
                writeln!(f, "#EXT-X-DISCONTINUITY")?;
            }
            writeln!(
                f,
                "#EXTINF:{}.{:06},",
                entry.duration.as_secs(),
                entry.duration.subsec_micros()
            )?;
            writeln!(f, "{}", entry.uri)?;
        }

        for uri in &self.prefetch {
            writeln!(f, "#EXT-X-PREFETCH:{}", uri)?;
        }

        if self.terminated {
            writeln!(f, "#EXT-X-ENDLIST")?;
        }
        Ok(())
    }
}

fn parse_number(value: &str, what: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| SegmenterError::Manifest(format!("bad {}: {}", what, value)))
}

/// Decimal seconds, read without going through floating point.
fn parse_duration(value: &str) -> Result<Duration> {
    let bad = || SegmenterError::Manifest(format!("bad duration: {}", value));
    let (secs, frac) = value.trim().split_once('.').unwrap_or((value.trim(), ""));
    let secs: u64 = secs.parse().map_err(|_| bad())?;
    if frac.len() > 9 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    let nanos = if frac.is_empty() {
        0
    } else {
        frac.parse::<u32>().map_err(|_| bad())? * 10u32.pow(9 - frac.len() as u32)
    };
    Ok(Duration::new(secs, nanos))
}

/// Whole seconds, rounded up.
pub fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(uri: &str, millis: u64, discontinuity: bool) -> ManifestEntry {
        ManifestEntry {
            uri: uri.into(),
            duration: Duration::from_millis(millis),
            discontinuity,
        }
    }

    fn sample() -> Manifest {
        Manifest {
            kind: ManifestKind::LiveWindow,
            target_duration: 5,
            media_sequence: 12,
            discontinuity_sequence: 1,
            init_uri: None,
            entries: vec![
                entry("chunk_00012.ts", 4000, false),
                entry("chunk_00013.ts", 4480, true),
                entry("chunk_00014.ts", 3960, false),
            ],
            prefetch: vec!["chunk_00015.ts".into()],
            terminated: false,
        }
    }

    #[test]
    fn test_render_live_window() {
        let expected = "#EXTM3U\n\
            #EXT-X-VERSION:3\n\
            #EXT-X-TARGETDURATION:5\n\
            #EXT-X-MEDIA-SEQUENCE:12\n\
            #EXT-X-DISCONTINUITY-SEQUENCE:1\n\
            #EXTINF:4.000000,\n\
            chunk_00012.ts\n\
            #EXT-X-DISCONTINUITY\n\
            #EXTINF:4.480000,\n\
            chunk_00013.ts\n\
            #EXTINF:3.960000,\n\
            chunk_00014.ts\n\
            #EXT-X-PREFETCH:chunk_00015.ts\n";
        assert_eq!(sample().render(), expected);
    }

    #[test]
    fn test_render_vod_with_map() {
        let manifest = Manifest {
            kind: ManifestKind::Vod,
            target_duration: 4,
            init_uri: Some("chunk_init.ts".into()),
            entries: vec![entry("chunk_00000.ts", 4000, false)],
            terminated: true,
            ..Default::default()
        };
        let text = manifest.render();
        assert!(text.starts_with("#EXTM3U\n#EXT-X-VERSION:6\n#EXT-X-PLAYLIST-TYPE:VOD\n"));
        assert!(text.contains("#EXT-X-MAP:URI=\"chunk_init.ts\"\n"));
        assert!(text.ends_with("chunk_00000.ts\n#EXT-X-ENDLIST\n"));
    }

    #[test]
    fn test_render_is_idempotent_and_parses_back() {
        let manifest = sample();
        let first = manifest.render();
        assert_eq!(first, manifest.render());

        let parsed = Manifest::parse(&first).unwrap();
        assert_eq!(parsed, manifest);

        let mut ended = Manifest {
            kind: ManifestKind::LiveEvent,
            prefetch: Vec::new(),
            ..sample()
        };
        ended.terminated = true;
        assert_eq!(Manifest::parse(&ended.render()).unwrap(), ended);
    }

    #[test]
    fn test_parse_rejects_broken_text() {
        assert!(Manifest::parse("#EXT-X-VERSION:3\n").is_err());
        assert!(Manifest::parse("#EXTM3U\nchunk_00000.ts\n").is_err());
        assert!(Manifest::parse("#EXTM3U\n#EXTINF:4.0,\n").is_err());
        assert!(Manifest::parse("#EXTM3U\n#EXTINF:four,\nx.ts\n").is_err());
    }

    #[test]
    fn test_parse_foreign_durations() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXT-X-ALLOW-CACHE:NO\n#EXTINF:9.5,title\na.ts\n#EXTINF:10,\nb.ts\n";
        let manifest = Manifest::parse(text).unwrap();
        assert_eq!(manifest.entries[0].duration, Duration::from_millis(9500));
        assert_eq!(manifest.entries[1].duration, Duration::from_secs(10));
        assert!(!manifest.terminated);
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::from_secs(4)), 4);
        assert_eq!(ceil_secs(Duration::from_micros(4_000_001)), 5);
        assert_eq!(ceil_secs(Duration::ZERO), 0);
    }
}
