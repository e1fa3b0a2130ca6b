#![doc(html_root_url = "https://docs.rs/tssegmenter/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # tssegmenter - live MPEG-TS to HLS
//!
//! `tssegmenter` reads a live MPEG transport stream from stdin or a TCP
//! connection, cuts it into HLS media chunks of a target duration, and
//! keeps a manifest up to date as chunks close. Chunks and manifests go
//! to local files, an HTTP server (optionally streaming chunks while they
//! grow), or an S3 bucket.
//!
//! ## Manifests
//!
//! - VOD: written once, when the input ends
//! - live event: every chunk appended, rewritten after each chunk
//! - live window: the newest N chunks only
//! - LHLS: either live kind, advertising chunks still being written with
//!   `#EXT-X-PREFETCH`
//!
//! ## Example
//!
//! ```rust,no_run
//! use tssegmenter::config::Config;
//! use tssegmenter::pipeline::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let pipeline = Pipeline::from_config(&config).await?;
//!     let report = pipeline.run(tokio::io::stdin()).await;
//!     println!("{} chunks", report.chunks);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `format::ts`: packet framing, PSI parsing, PID discovery, timestamps
//! - `format::hls`: chunk boundaries and manifest rendering
//! - `segmenter`: the synchronous core tying the two together
//! - `sink`: file, HTTP and S3 delivery with retries
//! - `pipeline`: async reader, segmenter and delivery worker
//! - `config`: run-time settings and their validation

/// Run-time settings
pub mod config;

/// Error types and utilities
pub mod error;

/// Transport stream and HLS formats
pub mod format;

/// Async wiring of input, segmenter and sinks
pub mod pipeline;

/// Bytes in, chunks and manifests out
pub mod segmenter;

/// Chunk and manifest delivery
pub mod sink;

/// Common utilities and helper functions
pub mod utils;

pub use error::{Result, SegmenterError};
pub use pipeline::{Pipeline, RunReport};
pub use segmenter::{Output, Segmenter};
