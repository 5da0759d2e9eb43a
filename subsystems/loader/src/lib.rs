//! # Lazyload Loader
//!
//! Demand-paging loader for statically linked ELF executables. Nothing of
//! the image is mapped up front: the loader installs itself as the
//! process's protection-violation handler, jumps to the entry point, and
//! materializes each page of a loadable segment the first time it is
//! touched.
//!
//! ## Pipeline
//!
//! ```text
//! Image::read -> ElfImage::parse -> FaultHandler::install -> entry()
//!                                         |
//!                      fault -> resolve_fault -> pager::materialize
//! ```
//!
//! ## Modules
//!
//! - [`image`]: whole-file ingestion
//! - [`elf`]: header and program header decoding
//! - [`context`]: per-load state and teardown
//! - [`pager`]: single-page materialization
//! - [`fault`]: trap callback and handler guard
//! - [`launch`]: entry resolution and control transfer
//! - [`metrics`], [`journal`]: counters and deferred fault reporting
//! - [`config`]: loader options

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod elf;
pub mod fault;
pub mod image;
pub mod journal;
pub mod launch;
pub mod metrics;
pub mod pager;

#[cfg(test)]
mod testing;

use std::path::{Path, PathBuf};

pub use config::LoaderConfig;
pub use context::LoaderContext;
pub use elf::{ElfError, ElfHeader, ElfImage, ProgramHeader, SegmentFlags};
pub use fault::FaultHandler;
pub use image::Image;
pub use journal::{FaultJournal, JournalEvent};
pub use launch::{EntryResolution, LaunchOutcome};
pub use metrics::{LoadMetrics, MetricsSnapshot};
pub use pager::PagerError;

use lazyload_hal::HalError;

/// Result type for loader operations
pub type LoadResult<T> = Result<T, LoadError>;

/// Everything that stops a load
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The image could not be opened
    #[error("cannot open {}: {source}", path.display())]
    Open {
        /// Image path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// The image size could not be determined
    #[error("cannot determine size of {}: {source}", path.display())]
    Metadata {
        /// Image path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// Reading the image failed
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// Image path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// Fewer bytes arrived than the file holds
    #[error("short read of {}: expected {expected} bytes, got {actual}", path.display())]
    ShortRead {
        /// Image path
        path: PathBuf,
        /// File size
        expected: u64,
        /// Bytes read
        actual: u64,
    },
    /// No memory for the image buffer
    #[error("cannot allocate {size} bytes for the image")]
    OutOfMemory {
        /// Requested size
        size: u64,
    },
    /// The image is malformed or unsupported
    #[error(transparent)]
    Elf(#[from] ElfError),
    /// A host operation failed
    #[error(transparent)]
    Hal(#[from] HalError),
    /// A page could not be materialized
    #[error(transparent)]
    Pager(#[from] PagerError),
    /// Invalid loader configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LoadError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> u8 {
        1
    }
}

/// What a completed load reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// How the launch ended
    pub outcome: LaunchOutcome,
    /// Final counters
    pub metrics: MetricsSnapshot,
}

/// Load the executable at `path`, run it and report the totals.
///
/// The loader context is released before this returns, on success and on
/// error alike.
pub fn load_and_run(path: impl AsRef<Path>, config: LoaderConfig) -> LoadResult<LoadReport> {
    let ctx = LoaderContext::open(path, config)?;
    let outcome = launch::run(&ctx)?;

    let metrics = ctx.metrics().snapshot();
    metrics.log_summary();
    ctx.teardown();

    Ok(LoadReport { outcome, metrics })
}
