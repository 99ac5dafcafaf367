#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # crontab-controller
//!
//! Reconciles `CronTab` resources read from a manifest file, using the
//! workspace's informer, work queue and controller crates.

pub mod cli;
pub mod config;
pub mod crontab;
pub mod manifest;
pub mod signals;

pub use config::{AppConfig, ConfigError};
pub use crontab::{CronTab, CronTabReconciler, CronTabSpec};
pub use manifest::{load_manifests, parse_manifests, ManifestError, ManifestSource};
