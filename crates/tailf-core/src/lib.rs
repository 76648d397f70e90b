//! tailf-core: follow/annotate engine for growing text sources
//!
//! This crate implements `tail -f` for an interactive display: new lines from
//! a file or a subprocess are appended to a host surface, annotated with
//! arrival timestamps and severity tags, and every viewport that is looking
//! at the end of the surface keeps following it.
//!
//! # Architecture
//!
//! ```text
//! FileReader (tick) ─┐
//!                    ├─► LineSplitter → Annotator → host surface
//! ProcessEvent ──────┘                                   ↓
//!                                             ViewportFollow (Pinned only)
//! ```
//!
//! # Modules
//!
//! - `splitter`: byte stream to complete lines plus partial tail
//! - `source`: file offset tracking and source bindings
//! - `process`: subprocess supervision
//! - `timestamps`: stamp formats, recognizers and clocks
//! - `severity`: keyword matcher
//! - `annotate`: idempotent timestamp and severity transforms
//! - `follow`: per-viewport Pinned/Detached policy
//! - `session`: per-surface engine state and snapshots
//! - `registry`: session registry and ingestion pipeline
//! - `scheduler`: tick table and event loop
//! - `surface`: host capability traits and the in-memory host
//! - `config`: configuration management
//! - `logging`: tracing subscriber setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod annotate;
pub mod config;
pub mod error;
pub mod follow;
pub mod logging;
pub mod process;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod severity;
pub mod source;
pub mod splitter;
pub mod surface;
pub mod timestamps;

pub use error::{Error, Result};

/// Version of the tailf-core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
