use std::path::PathBuf;

use clap::Parser;
use lazyload_loader::config::DEFAULT_JOURNAL_CAPACITY;
use lazyload_loader::LoaderConfig;
use log::LevelFilter;

/// Run a statically linked ELF executable, mapping each page on first touch.
#[derive(Parser, Debug)]
#[command(name = "lazyload", version, about)]
pub struct Cli {
    /// Executable to load.
    pub image: PathBuf,

    /// Log verbosity (off, error, warn, info, debug, trace).
    #[arg(short, long, env = "LAZYLOAD_LOG", default_value = "info")]
    pub log_level: LevelFilter,

    /// Minimum number of fault events kept for the post-run report.
    #[arg(long, default_value_t = DEFAULT_JOURNAL_CAPACITY)]
    pub journal_capacity: usize,

    /// Refuse to start when the entry point is outside every loadable segment.
    #[arg(long)]
    pub require_entry_in_segment: bool,
}

impl Cli {
    /// Loader options selected on the command line
    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            journal_capacity: self.journal_capacity,
            require_entry_in_segment: self.require_entry_in_segment,
        }
    }
}
