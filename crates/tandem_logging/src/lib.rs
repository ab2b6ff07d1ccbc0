//! Shared logging setup for processes embedding the Tandem core.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const DEFAULT_LOG_FILTER: &str = "tandem=info,tandem_logging=info";

/// Logging configuration for a process embedding Tandem.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: &'a str,
    /// Directory for the daily rolling log file. `None` logs to stderr only.
    pub log_dir: Option<PathBuf>,
    pub verbose: bool,
}

impl Default for LogConfig<'_> {
    fn default() -> Self {
        Self {
            app_name: "tandem",
            default_filter: DEFAULT_LOG_FILTER,
            log_dir: None,
            verbose: false,
        }
    }
}

/// Initialize tracing with stderr output and an optional rolling file writer.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init_logging(config: LogConfig<'_>) -> Result<Option<WorkerGuard>> {
    let console_filter = if config.verbose {
        EnvFilter::new("debug")
    } else {
        build_filter(config.default_filter)?
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(console_filter);

    match config.log_dir {
        Some(dir) => {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender =
                tracing_appender::rolling::daily(&dir, format!("{}.log", sanitize_name(config.app_name)));
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(console_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_filter(build_filter(config.default_filter)?),
                )
                .try_init()
                .context("Failed to install tracing subscriber")?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(console_layer)
                .try_init()
                .context("Failed to install tracing subscriber")?;
            Ok(None)
        }
    }
}

/// `RUST_LOG` wins; otherwise the configured default must parse.
pub fn build_filter(default_filter: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(default_filter)
        .with_context(|| format!("Invalid log filter: {}", default_filter))
}

/// Get the Tandem home directory: `$TANDEM_HOME` or `~/.tandem`.
pub fn tandem_home() -> Result<PathBuf> {
    home_from(std::env::var_os("TANDEM_HOME"))
}

fn home_from(override_path: Option<OsString>) -> Result<PathBuf> {
    match override_path {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => dirs::home_dir()
            .map(|home| home.join(".tandem"))
            .context("Could not determine home directory"),
    }
}

/// Get the logs directory: `<tandem_home>/logs`
pub fn logs_dir() -> Result<PathBuf> {
    Ok(tandem_home()?.join("logs"))
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("tandem worker/1"), "tandem_worker_1");
        assert_eq!(sanitize_name("ok-name_2"), "ok-name_2");
    }

    #[test]
    fn test_build_filter_rejects_bad_directive() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(build_filter("tandem=info").is_ok());
        assert!(build_filter("tandem=loud").is_err());
    }

    #[test]
    fn test_home_override() {
        let temp = tempfile::TempDir::new().unwrap();
        let home = home_from(Some(temp.path().as_os_str().to_owned())).unwrap();
        assert_eq!(home, temp.path());
        assert_eq!(home.join("logs"), temp.path().join("logs"));
    }

    #[test]
    fn test_home_default() {
        let Some(user_home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(home_from(None).unwrap(), user_home.join(".tandem"));
        // An empty override counts as unset
        assert_eq!(home_from(Some(OsString::new())).unwrap(), user_home.join(".tandem"));
    }

    #[test]
    fn test_init_logging_with_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let log_dir = temp.path().join("logs");
        let guard = init_logging(LogConfig {
            app_name: "tandem test",
            default_filter: "tandem=debug",
            log_dir: Some(log_dir.clone()),
            verbose: false,
        })
        .unwrap();
        assert!(guard.is_some());
        assert!(log_dir.is_dir());

        // A second global subscriber cannot be installed.
        assert!(init_logging(LogConfig::default()).is_err());
    }
}
