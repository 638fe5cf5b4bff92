//! # CLI Interface
//!
//! Defines the command-line argument structure for `tessera-node` using
//! `clap` derive. Supports three subcommands: `demo`, `calibrate`, and
//! `version`.

use clap::{Parser, Subcommand};

/// TESSERA operator binary.
///
/// Drives the temporal fragmentation engine end to end against an
/// in-memory store: fragment a secret, watch the expiry daemon enforce its
/// lifetime, and measure local hardware for time-lock calibration.
#[derive(Parser, Debug)]
#[command(
    name = "tessera-node",
    about = "TESSERA temporal fragmentation engine — operator tools",
    version,
    propagate_version = true
)]
pub struct TesseraNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the TESSERA node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full fragmentation lifecycle in-process: split, validate,
    /// reconstruct, expire, destroy, and dump the signed audit log.
    Demo(DemoArgs),
    /// Measure this host's sequential hash rate and report puzzle
    /// iteration counts for common expiry windows.
    Calibrate(CalibrateArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `demo` subcommand.
#[derive(Parser, Debug)]
pub struct DemoArgs {
    /// The secret to fragment. A throwaway default is used when omitted —
    /// never pass real secrets on a command line.
    #[arg(long, default_value = "the twelve keys to the western vault")]
    pub secret: String,

    /// Total shares to produce (n).
    #[arg(long, short = 'n', default_value_t = 5)]
    pub shares: u8,

    /// Reconstruction threshold (k).
    #[arg(long, short = 'k', default_value_t = 3)]
    pub threshold: u8,

    /// Fragment lifetime in seconds.
    #[arg(long, default_value_t = 3)]
    pub lifetime_secs: u64,

    /// Expiry jitter in milliseconds.
    #[arg(long, default_value_t = 500)]
    pub jitter_ms: u64,

    /// Number of validator nodes in the in-process network.
    #[arg(long, short = 'm', default_value_t = 5)]
    pub validators: usize,

    /// Emit logs as JSON instead of pretty text.
    #[arg(long, env = "TESSERA_LOG_JSON")]
    pub json_logs: bool,
}

/// Arguments for the `calibrate` subcommand.
#[derive(Parser, Debug)]
pub struct CalibrateArgs {
    /// How long to hash for when measuring throughput, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub sample_ms: u64,
}
