//! Integration tests for config file loading.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::path::PathBuf;
use std::time::Duration;

use crontab_controller::cli::Cli;
use crontab_controller::{AppConfig, ConfigError};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn write_config(text: &str) -> Result<(tempfile::TempDir, PathBuf), std::io::Error> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("crontab-controller.toml");
    std::fs::write(&path, text)?;
    Ok((dir, path))
}

#[test]
fn test_loads_every_table() -> TestResult {
    let (_dir, path) = write_config(
        r#"
        manifests = "/srv/crontabs.yaml"

        [controller]
        name = "crontabs"
        workers = 4
        base_delay_ms = 50
        max_delay_ms = 60000
        qps = 20.0
        burst = 200
        max_retries = 10

        [informer]
        resync_period_ms = 0
        relist_period_ms = 10000
        "#,
    )?;

    let config = AppConfig::load(&path)?;

    assert_eq!(config.manifest_path(), PathBuf::from("/srv/crontabs.yaml"));
    assert_eq!(config.controller.workers, 4);
    assert_eq!(config.controller.rate_limiter.base_delay(), Duration::from_millis(50));
    assert_eq!(config.controller.rate_limiter.burst, 200);
    assert_eq!(config.controller.max_retries, Some(10));
    assert_eq!(config.informer.resync_period(), Duration::ZERO);
    assert_eq!(config.informer.relist_period(), Duration::from_secs(10));
    Ok(())
}

#[test]
fn test_resolve_applies_flags_over_file() -> TestResult {
    let (_dir, path) = write_config("[controller]\nname = \"crontabs\"\nworkers = 4\n")?;
    let cli = Cli {
        config: Some(path),
        workers: Some(1),
        manifests: Some(PathBuf::from("/tmp/other.yaml")),
        ..Cli::default()
    };

    let config = AppConfig::resolve(&cli)?;

    assert_eq!(config.controller.workers, 1);
    assert_eq!(config.manifest_path(), PathBuf::from("/tmp/other.yaml"));
    Ok(())
}

#[test]
fn test_resolve_rejects_invalid_settings() -> TestResult {
    let (_dir, path) = write_config("[controller]\nworkers = 0\n")?;
    let cli = Cli {
        config: Some(path),
        ..Cli::default()
    };

    let result = AppConfig::resolve(&cli);

    assert!(matches!(result, Err(ConfigError::Invalid(_))));
    Ok(())
}

#[test]
fn test_missing_file_is_read_error() -> TestResult {
    let dir = tempfile::tempdir()?;

    let result = AppConfig::load(&dir.path().join("absent.toml"));

    assert!(matches!(result, Err(ConfigError::Read { .. })));
    Ok(())
}

#[test]
fn test_malformed_file_is_parse_error() -> TestResult {
    let (_dir, path) = write_config("[controller\nworkers = 2\n")?;

    let result = AppConfig::load(&path);

    assert!(matches!(result, Err(ConfigError::Parse { .. })));
    Ok(())
}
