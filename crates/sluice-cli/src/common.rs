//! Common types and utilities shared across modules

use clap::Parser;
use sluice_bridge::SearchPaths;
use std::path::PathBuf;

/// Global CLI options available to all commands
#[derive(Parser, Debug, Clone)]
pub struct GlobalOpts {
    #[arg(short, long, global = true, help = "Decrease verbosity")]
    pub quiet: bool,

    #[arg(short, long, global = true, action = clap::ArgAction::Count, help = "Increase verbosity (-v for debug, -vv for trace)")]
    pub verbose: u8,

    #[arg(
        long,
        global = true,
        help = "Show Python logs on console (always logged to file)"
    )]
    pub log_python: bool,

    #[arg(long, global = true, help = "Suppress console output")]
    pub no_stdout: bool,

    #[arg(
        long,
        global = true,
        value_name = "DIR",
        help = "Directory holding the filter shim (overrides SLUICE_SHIM_DIR)"
    )]
    pub shim_dir: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "DIR",
        help = "Directory holding plugin modules (overrides SLUICE_PLUGIN_DIR)"
    )]
    pub plugin_dir: Option<PathBuf>,
}

impl GlobalOpts {
    /// Get the effective verbosity level
    /// - 0: quiet/warn only
    /// - 1: debug (-v)
    /// - 2: trace (-vv)
    pub fn verbosity_level(&self) -> u8 {
        if self.quiet {
            0
        } else {
            self.verbose
        }
    }

    /// Interpreter search paths, with flags taking precedence over the
    /// environment contract.
    pub fn search_paths(&self) -> SearchPaths {
        let defaults = SearchPaths::from_env();
        let shim_dir = self
            .shim_dir
            .clone()
            .unwrap_or_else(|| defaults.shim_dir().to_path_buf());
        let plugin_dir = self
            .plugin_dir
            .clone()
            .unwrap_or_else(|| defaults.plugin_dir().to_path_buf());
        SearchPaths::new(shim_dir, plugin_dir)
    }
}
