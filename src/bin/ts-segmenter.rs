use anyhow::Context;
use clap::{ArgAction, Parser};
use log::{error, info};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;
use tssegmenter::config::{
    Config, Destination, HttpConfig, InputConfig, ManifestConfig, OutputConfig, PidMode,
    S3Config, S3Credentials, SegmentConfig,
};
use tssegmenter::format::hls::{InitPolicy, ManifestKind};
use tssegmenter::pipeline::Pipeline;

/// Reads an MPEG-TS stream and cuts it into HLS chunks and manifests.
#[derive(Parser, Debug)]
#[clap(name = "ts-segmenter", version)]
struct Opt {
    /// Output directory for file delivery
    #[clap(long, default_value = "./results")]
    dst_path: PathBuf,

    #[clap(long, default_value = "chunk_")]
    chunks_base_filename: String,

    #[clap(long, default_value = "chunklist.m3u8")]
    chunklist_filename: String,

    /// Target chunk duration in seconds
    #[clap(long, default_value_t = 4.0)]
    target_dur: f64,

    /// Chunks kept in a sliding-window manifest
    #[clap(long, default_value_t = 3)]
    live_window_size: usize,

    /// Same as --live-window-size, and wins over it
    #[clap(long)]
    max_chunks: Option<usize>,

    /// Chunks advertised before they exist (LHLS); 0 disables
    #[clap(long, default_value_t = 0)]
    lhls: usize,

    /// 0 VOD, 1 live event, 2 live sliding window
    #[clap(long, default_value_t = 2)]
    manifest_type: u8,

    /// Find PIDs from PAT/PMT
    #[clap(long, action = ArgAction::Set, default_value_t = true)]
    apids: bool,

    /// Video PID when --apids is false (-1 for none)
    #[clap(long, default_value_t = -1, allow_hyphen_values = true)]
    vpid: i32,

    /// Audio PID when --apids is false (-1 for none)
    #[clap(long, default_value_t = -1, allow_hyphen_values = true)]
    apid: i32,

    /// 0 no tables, 1 separate init chunk, 2 tables in every chunk
    #[clap(long, default_value_t = 2)]
    init_type: u8,

    /// 0 none, 1 file, 2 HTTP chunked, 3 HTTP, 4 S3
    #[clap(long, default_value_t = 1)]
    media_destination_type: u8,

    /// 0 none, 1 file, 2 HTTP, 3 S3
    #[clap(long, default_value_t = 1)]
    manifest_destination_type: u8,

    #[clap(long, default_value = "http")]
    protocol: String,

    #[clap(long, default_value = "localhost:9094")]
    host: String,

    /// Attempts per HTTP or S3 upload
    #[clap(long, default_value_t = 40)]
    http_max_retries: u32,

    /// Delay before the first retry in ms; grows linearly
    #[clap(long, default_value_t = 5)]
    initial_http_retry_delay: u64,

    /// Skip TLS certificate verification
    #[clap(long, default_value_t = false)]
    insecure: bool,

    /// 1 stdin, 2 TCP
    #[clap(long, default_value_t = 1)]
    input_type: u8,

    /// Port to accept the TCP input on
    #[clap(long, default_value_t = 2002)]
    local_port: u16,

    /// Also write logs to this file
    #[clap(long)]
    logs_path: Option<PathBuf>,

    #[clap(long, default_value = "")]
    aws_id: String,

    #[clap(long, default_value = "")]
    aws_secret: String,

    #[clap(long, default_value = "")]
    s3_bucket: String,

    #[clap(long, default_value = "")]
    s3_region: String,

    /// S3-compatible endpoint (path-style addressing)
    #[clap(long)]
    s3_endpoint: Option<String>,

    /// S3 request timeout in ms
    #[clap(long, default_value_t = 10_000)]
    s3_upload_timeout: u64,

    #[clap(long, default_value_t = false)]
    s3_is_public_read: bool,

    /// Debug logging unless RUST_LOG says otherwise
    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

fn optional_pid(value: i32, what: &str) -> anyhow::Result<Option<u16>> {
    if value < 0 {
        return Ok(None);
    }
    let pid = u16::try_from(value).with_context(|| format!("{} {} is out of range", what, value))?;
    Ok(Some(pid))
}

impl Opt {
    fn to_config(&self) -> anyhow::Result<Config> {
        let target_duration = Duration::try_from_secs_f64(self.target_dur)
            .with_context(|| format!("bad target duration {}", self.target_dur))?;

        let pids = if self.apids {
            PidMode::Auto
        } else {
            PidMode::Manual {
                video: optional_pid(self.vpid, "video PID")?,
                audio: optional_pid(self.apid, "audio PID")?,
            }
        };

        let credentials = (!self.aws_id.is_empty() && !self.aws_secret.is_empty()).then(|| {
            S3Credentials {
                access_key_id: self.aws_id.clone(),
                secret_access_key: self.aws_secret.clone(),
                session_token: None,
            }
        });

        Ok(Config {
            output: OutputConfig {
                base_path: self.dst_path.clone(),
                chunk_base_filename: self.chunks_base_filename.clone(),
                manifest_filename: self.chunklist_filename.clone(),
                ..OutputConfig::default()
            },
            segment: SegmentConfig {
                target_duration,
                init_policy: InitPolicy::from_selector(self.init_type)?,
            },
            manifest: ManifestConfig {
                kind: ManifestKind::from_selector(self.manifest_type)?,
                window_size: self.max_chunks.unwrap_or(self.live_window_size),
                lhls_advance: self.lhls,
            },
            pids,
            media_destination: Destination::from_media_selector(self.media_destination_type)?,
            manifest_destination: Destination::from_manifest_selector(
                self.manifest_destination_type,
            )?,
            http: HttpConfig {
                scheme: self.protocol.clone(),
                host: self.host.clone(),
                max_retries: self.http_max_retries,
                initial_retry_delay: Duration::from_millis(self.initial_http_retry_delay),
                insecure: self.insecure,
            },
            s3: S3Config {
                bucket: self.s3_bucket.clone(),
                region: self.s3_region.clone(),
                endpoint: self.s3_endpoint.clone(),
                credentials,
                upload_timeout: Duration::from_millis(self.s3_upload_timeout),
                public_read: self.s3_is_public_read,
            },
            input: InputConfig::from_selector(self.input_type, self.local_port)?,
        })
    }
}

fn init_logging(opt: &Opt) -> anyhow::Result<()> {
    let default_level = if opt.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let writer = match &opt.logs_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            BoxMakeWriter::new(std::io::stderr.and(std::sync::Mutex::new(file)))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(writer)
        .init();
    Ok(())
}

async fn run(opt: Opt) -> anyhow::Result<ExitCode> {
    let config = opt.to_config()?;
    let pipeline = Pipeline::from_config(&config)
        .await
        .context("invalid configuration")?;

    let report = match config.input {
        InputConfig::Stdin => {
            info!("reading from stdin");
            pipeline.run(tokio::io::stdin()).await
        }
        InputConfig::Tcp { port } => {
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
                .await
                .with_context(|| format!("cannot listen on port {}", port))?;
            info!("waiting for a connection on port {}", port);
            let (socket, peer) = listener.accept().await.context("accept failed")?;
            info!("reading from {}", peer);
            pipeline.run(socket).await
        }
    };

    Ok(match report.input_error {
        Some(e) => {
            error!("stopped on input error: {}", e);
            ExitCode::FAILURE
        }
        None => ExitCode::SUCCESS,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let opt = Opt::parse();
    if let Err(e) = init_logging(&opt) {
        eprintln!("ts-segmenter: {:#}", e);
        return ExitCode::FAILURE;
    }
    match run(opt).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("ts-segmenter: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
