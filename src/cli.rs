//! CLI argument parsing for the offline report tool.
//!
//! The recording runtime has no command-line surface; this binary only
//! decodes and symbolizes already-recorded sessions.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::call_edge::AddressWidth;

/// Output format for the edge report
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table (default)
    Text,
    /// JSON for machine parsing
    Json,
}

/// Address field width of the recorded calls file
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum AddrWidthArg {
    #[value(name = "32")]
    W32,
    #[value(name = "64")]
    W64,
}

impl From<AddrWidthArg> for AddressWidth {
    fn from(arg: AddrWidthArg) -> Self {
        match arg {
            AddrWidthArg::W32 => AddressWidth::W32,
            AddrWidthArg::W64 => AddressWidth::W64,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "recuento")]
#[command(version)]
#[command(about = "Decode and symbolize recorded call-edge profiles", long_about = None)]
pub struct Cli {
    /// Session directory (containing `calls` and `maps`) or a calls file
    pub session: PathBuf,

    /// Maps snapshot to resolve addresses against (default: `maps` next
    /// to the calls file)
    #[arg(long = "maps", value_name = "PATH")]
    pub maps: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Address field width of the calls file; inferred from the file
    /// length when omitted
    #[arg(long = "addr-width", value_enum, value_name = "BITS")]
    pub addr_width: Option<AddrWidthArg>,

    /// Print raw symbol names without demangling
    #[arg(long = "no-demangle")]
    pub no_demangle: bool,

    /// Keep only the N most frequent edges
    #[arg(long = "limit", value_name = "N")]
    pub limit: Option<usize>,

    /// Enable debug logging to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
