use anyhow::{Context, Result};
use kulla_config::{CliRunOverrides, EnvConfig, RunDefaults, load_file_config, resolve_run_defaults};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Filter variable for diagnostic logging, e.g. `KULLA_LOG=kulla_core=trace`.
const LOG_ENV: &str = "KULLA_LOG";

pub(crate) fn resolve_config(
    config: Option<PathBuf>,
    cli: &CliRunOverrides,
) -> Result<RunDefaults> {
    let cwd = std::env::current_dir().context("failed resolving current directory")?;
    let file_cfg = load_file_config(config.as_deref(), &cwd)?;
    let env_cfg = EnvConfig::from_current_env();
    Ok(resolve_run_defaults(cli, &env_cfg, file_cfg.as_ref()))
}

/// Logs go to stderr so they never mix with snippet output.
pub(crate) fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .try_init();
}
