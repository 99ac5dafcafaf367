//! Command line flags using clap.

use std::path::PathBuf;

use clap::Parser;

/// Crontab controller
#[derive(Parser, Debug, Default)]
#[command(name = "crontab-controller")]
#[command(version)]
#[command(about = "Reconciles CronTab resources listed in a manifest file")]
pub struct Cli {
    /// TOML config file with [controller] and [informer] tables
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Manifest file to watch [default: $HOME/.kube/crontabs.yaml]
    #[arg(long)]
    pub manifests: Option<PathBuf>,

    /// Number of concurrent workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Seconds between informer resyncs; 0 disables resync
    #[arg(long)]
    pub resync_secs: Option<u64>,

    /// Log filter, e.g. `info` or `reconciler=debug` (overrides RUST_LOG)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Where manifests are read from when neither flag nor config says.
pub fn default_manifest_path() -> PathBuf {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map_or_else(
            || PathBuf::from("crontabs.yaml"),
            |home| PathBuf::from(home).join(".kube").join("crontabs.yaml"),
        )
}
