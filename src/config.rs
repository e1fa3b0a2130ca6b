use crate::error::{Result, SegmenterError};
use crate::format::hls::{ChunkNaming, InitPolicy, ManifestKind};
use crate::sink::retry::RetryPolicy;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Everything the segmenter needs, built once at startup.
///
/// Components receive the parts they need at construction time; nothing
/// reads process-wide state after that.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub output: OutputConfig,
    pub segment: SegmentConfig,
    pub manifest: ManifestConfig,
    pub pids: PidMode,
    pub media_destination: Destination,
    pub manifest_destination: Destination,
    pub http: HttpConfig,
    pub s3: S3Config,
    pub input: InputConfig,
}

impl Config {
    /// Rejects combinations that cannot work. Called before any input is read.
    pub fn validate(&self) -> Result<()> {
        if let PidMode::Manual { video, audio } = self.pids {
            if self.segment.init_policy == InitPolicy::None {
                return Err(SegmenterError::Config(
                    "manual PID mode is not compatible with chunks without init data".into(),
                ));
            }
            if video.is_none() && audio.is_none() {
                return Err(SegmenterError::Config(
                    "manual PID mode needs a video or an audio PID".into(),
                ));
            }
            for pid in [video, audio].into_iter().flatten() {
                if pid == 0 || pid >= 0x1fff {
                    return Err(SegmenterError::Config(format!(
                        "PID {} is outside the elementary stream range",
                        pid
                    )));
                }
            }
        }

        if self.segment.target_duration.is_zero() {
            return Err(SegmenterError::Config(
                "target duration must be greater than zero".into(),
            ));
        }

        if self.manifest.kind == ManifestKind::LiveWindow && self.manifest.window_size == 0 {
            return Err(SegmenterError::Config(
                "live window size must be at least one chunk".into(),
            ));
        }

        if self.output.chunk_base_filename.is_empty() || self.output.manifest_filename.is_empty() {
            return Err(SegmenterError::Config("output filenames must not be empty".into()));
        }

        if self.manifest_destination == Destination::HttpChunked {
            return Err(SegmenterError::Config(
                "chunked transfer is only available for media".into(),
            ));
        }

        let destinations = [self.media_destination, self.manifest_destination];
        if destinations.iter().any(|d| d.is_http()) && self.http.host.is_empty() {
            return Err(SegmenterError::Config("HTTP destination needs a host".into()));
        }
        if destinations.contains(&Destination::S3)
            && (self.s3.bucket.is_empty() || self.s3.region.is_empty())
        {
            return Err(SegmenterError::Config(
                "S3 destination needs a bucket and a region".into(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub base_path: PathBuf,
    pub chunk_base_filename: String,
    pub manifest_filename: String,
    pub sequence_digits: usize,
    pub chunk_extension: String,
}

impl OutputConfig {
    pub fn naming(&self) -> ChunkNaming {
        ChunkNaming {
            base: self.chunk_base_filename.clone(),
            digits: self.sequence_digits,
            extension: self.chunk_extension.clone(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./results"),
            chunk_base_filename: "chunk_".into(),
            manifest_filename: "chunklist.m3u8".into(),
            sequence_digits: 5,
            chunk_extension: ".ts".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SegmentConfig {
    pub target_duration: Duration,
    pub init_policy: InitPolicy,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            target_duration: Duration::from_secs(4),
            init_policy: InitPolicy::PerChunk,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManifestConfig {
    pub kind: ManifestKind,
    pub window_size: usize,
    /// In-progress chunk names advertised ahead; 0 disables LHLS.
    pub lhls_advance: usize,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            kind: ManifestKind::LiveWindow,
            window_size: 3,
            lhls_advance: 0,
        }
    }
}

/// How elementary stream PIDs are found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PidMode {
    /// Learned from PAT/PMT.
    #[default]
    Auto,
    /// Fixed by the operator.
    Manual {
        video: Option<u16>,
        audio: Option<u16>,
    },
}

/// Where an artifact kind is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    None,
    #[default]
    File,
    /// Chunk bytes streamed while the chunk grows. Media only.
    HttpChunked,
    Http,
    S3,
}

impl Destination {
    /// 0 none, 1 file, 2 HTTP chunked, 3 HTTP, 4 S3.
    pub fn from_media_selector(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Destination::None),
            1 => Ok(Destination::File),
            2 => Ok(Destination::HttpChunked),
            3 => Ok(Destination::Http),
            4 => Ok(Destination::S3),
            other => Err(SegmenterError::Config(format!(
                "unknown media destination type {}",
                other
            ))),
        }
    }

    /// 0 none, 1 file, 2 HTTP, 3 S3.
    pub fn from_manifest_selector(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Destination::None),
            1 => Ok(Destination::File),
            2 => Ok(Destination::Http),
            3 => Ok(Destination::S3),
            other => Err(SegmenterError::Config(format!(
                "unknown manifest destination type {}",
                other
            ))),
        }
    }

    pub fn is_http(self) -> bool {
        matches!(self, Destination::Http | Destination::HttpChunked)
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub scheme: String,
    pub host: String,
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    pub insecure: bool,
}

impl HttpConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.initial_retry_delay)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            scheme: "http".into(),
            host: "localhost:9094".into(),
            max_retries: 40,
            initial_retry_delay: Duration::from_millis(5),
            insecure: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// S3-compatible endpoint, addressed path style. AWS when `None`.
    pub endpoint: Option<String>,
    pub credentials: Option<S3Credentials>,
    pub upload_timeout: Duration,
    pub public_read: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: String::new(),
            endpoint: None,
            credentials: None,
            upload_timeout: Duration::from_millis(10_000),
            public_read: false,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl S3Credentials {
    /// Reads the standard AWS environment variables.
    pub fn from_env() -> Option<Self> {
        let access_key_id = env::var("AWS_ACCESS_KEY_ID").ok().filter(|v| !v.is_empty())?;
        let secret_access_key = env::var("AWS_SECRET_ACCESS_KEY")
            .ok()
            .filter(|v| !v.is_empty())?;
        Some(Self {
            access_key_id,
            secret_access_key,
            session_token: env::var("AWS_SESSION_TOKEN").ok().filter(|v| !v.is_empty()),
        })
    }
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputConfig {
    #[default]
    Stdin,
    /// Accepts a single connection on the local port.
    Tcp { port: u16 },
}

impl InputConfig {
    /// 1 stdin, 2 TCP.
    pub fn from_selector(value: u8, port: u16) -> Result<Self> {
        match value {
            1 => Ok(InputConfig::Stdin),
            2 => Ok(InputConfig::Tcp { port }),
            other => Err(SegmenterError::Config(format!("unknown input type {}", other))),
        }
    }
}
