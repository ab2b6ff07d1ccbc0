//! Configuration parsing
//!
//! Reads routing settings from `~/.tandem/config.toml` (or `$TANDEM_HOME`).
//! Every field has a default, so an empty or missing file yields a working
//! configuration.

use crate::classifier::{HybridConfidence, KeywordSets, Route};
use serde::Deserialize;
use chrono::TimeDelta;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for config operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config not found at: {0}")]
    NotFound(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for config operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root configuration for the routing core
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TandemConfig {
    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub limits: QueryLimits,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub approvals: ApprovalConfig,

    #[serde(default)]
    pub routing: RoutingPolicy,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TandemConfig {
    /// Reject combinations the orchestrator cannot honour.
    pub fn validate(&self) -> Result<()> {
        let c = &self.classifier;
        if !(0.0..=1.0).contains(&c.confidence_floor) {
            return Err(ConfigError::Invalid(format!(
                "classifier.confidence_floor must be within [0, 1], got {}",
                c.confidence_floor
            )));
        }
        if c.tie_route == Route::Hybrid {
            return Err(ConfigError::Invalid(
                "classifier.tie_route must be \"sql\" or \"documents\"".to_string(),
            ));
        }
        c.keywords.validate().map_err(ConfigError::Invalid)?;

        let l = &self.limits;
        if l.min_query_chars == 0 || l.min_query_chars > l.max_query_chars {
            return Err(ConfigError::Invalid(format!(
                "limits: need 0 < min_query_chars <= max_query_chars, got {}..{}",
                l.min_query_chars, l.max_query_chars
            )));
        }
        if l.default_top_k == 0 || l.default_top_k > l.max_top_k {
            return Err(ConfigError::Invalid(format!(
                "limits: need 0 < default_top_k <= max_top_k, got {} / {}",
                l.default_top_k, l.max_top_k
            )));
        }

        let t = &self.timeouts;
        for (name, ms) in [
            ("retrieval_ms", t.retrieval_ms),
            ("generation_ms", t.generation_ms),
            ("execution_ms", t.execution_ms),
        ] {
            if ms == 0 {
                return Err(ConfigError::Invalid(format!("timeouts.{} must be > 0", name)));
            }
        }

        self.approvals.validate()
    }
}

/// Keyword classifier settings
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub keywords: KeywordSets,

    /// Route chosen when SQL and document matches tie (including no matches)
    #[serde(default = "default_tie_route")]
    pub tie_route: Route,

    /// Confidence reported when nothing matched
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,

    /// Confidence rule for hybrid decisions
    #[serde(default)]
    pub hybrid_confidence: HybridConfidence,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            keywords: KeywordSets::default(),
            tie_route: default_tie_route(),
            confidence_floor: default_confidence_floor(),
            hybrid_confidence: HybridConfidence::default(),
        }
    }
}

/// Input bounds
#[derive(Debug, Clone, Deserialize)]
pub struct QueryLimits {
    #[serde(default = "default_min_query_chars")]
    pub min_query_chars: usize,

    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,

    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            min_query_chars: default_min_query_chars(),
            max_query_chars: default_max_query_chars(),
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
        }
    }
}

/// Per-collaborator call bounds
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_retrieval_ms")]
    pub retrieval_ms: u64,

    #[serde(default = "default_generation_ms")]
    pub generation_ms: u64,

    #[serde(default = "default_execution_ms")]
    pub execution_ms: u64,
}

impl TimeoutConfig {
    pub fn retrieval(&self) -> Duration {
        Duration::from_millis(self.retrieval_ms)
    }

    pub fn generation(&self) -> Duration {
        Duration::from_millis(self.generation_ms)
    }

    pub fn execution(&self) -> Duration {
        Duration::from_millis(self.execution_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            retrieval_ms: default_retrieval_ms(),
            generation_ms: default_generation_ms(),
            execution_ms: default_execution_ms(),
        }
    }
}

/// Approval store settings
#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalConfig {
    /// Directory for the JSON proposal journal. Unset keeps proposals in memory.
    #[serde(default)]
    pub journal_dir: Option<PathBuf>,

    /// Pending proposals older than this are rejected by `expire_stale_proposals`.
    #[serde(default = "default_pending_ttl_minutes")]
    pub pending_ttl_minutes: Option<i64>,

    /// Terminal proposals older than this are removed by `purge_terminal_proposals`.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

/// Upper bound for `pending_ttl_minutes` (one year)
pub const MAX_PENDING_TTL_MINUTES: i64 = 366 * 24 * 60;

/// Upper bound for `retention_days` (ten years)
pub const MAX_RETENTION_DAYS: i64 = 3660;

impl ApprovalConfig {
    /// `None` when expiry is disabled.
    pub fn pending_ttl(&self) -> Result<Option<TimeDelta>> {
        self.pending_ttl_minutes
            .map(|minutes| {
                TimeDelta::try_minutes(minutes).ok_or_else(|| {
                    ConfigError::Invalid(format!("pending_ttl_minutes out of range: {}", minutes))
                })
            })
            .transpose()
    }

    pub fn retention(&self) -> Result<TimeDelta> {
        TimeDelta::try_days(self.retention_days).ok_or_else(|| {
            ConfigError::Invalid(format!("retention_days out of range: {}", self.retention_days))
        })
    }

    fn validate(&self) -> Result<()> {
        if let Some(minutes) = self.pending_ttl_minutes {
            if !(1..=MAX_PENDING_TTL_MINUTES).contains(&minutes) {
                return Err(ConfigError::Invalid(format!(
                    "approvals.pending_ttl_minutes must be within 1..={}, got {}",
                    MAX_PENDING_TTL_MINUTES, minutes
                )));
            }
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
            return Err(ConfigError::Invalid(format!(
                "approvals.retention_days must be within 1..={}, got {}",
                MAX_RETENTION_DAYS, self.retention_days
            )));
        }
        Ok(())
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            journal_dir: None,
            pending_ttl_minutes: default_pending_ttl_minutes(),
            retention_days: default_retention_days(),
        }
    }
}

/// Single-route degradation policy
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutingPolicy {
    /// When the routed pipeline is unavailable, answer from the other one
    /// (annotated) instead of returning a service-unavailable error.
    #[serde(default)]
    pub fallback_to_available: bool,
}

/// Logging settings passed through to `tandem_logging`
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,

    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn as_log_config(&self) -> tandem_logging::LogConfig<'_> {
        tandem_logging::LogConfig {
            app_name: "tandem",
            default_filter: &self.filter,
            log_dir: self.log_dir.clone(),
            verbose: false,
        }
    }

    /// Install the global subscriber. Keep the returned guard alive for as
    /// long as the file writer should flush.
    pub fn init(&self) -> anyhow::Result<Option<tandem_logging::WorkerGuard>> {
        tandem_logging::init_logging(self.as_log_config())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            log_dir: None,
        }
    }
}

fn default_tie_route() -> Route { Route::Documents }
fn default_confidence_floor() -> f64 { 0.33 }
fn default_min_query_chars() -> usize { 3 }
fn default_max_query_chars() -> usize { 1000 }
fn default_top_k() -> usize { 5 }
fn default_max_top_k() -> usize { 50 }
fn default_retrieval_ms() -> u64 { 15_000 }
fn default_generation_ms() -> u64 { 30_000 }
fn default_execution_ms() -> u64 { 30_000 }
fn default_pending_ttl_minutes() -> Option<i64> { Some(24 * 60) }
fn default_retention_days() -> i64 { 7 }
fn default_log_filter() -> String { tandem_logging::DEFAULT_LOG_FILTER.to_string() }

/// Load configuration from a file; a missing file yields defaults.
pub fn load_config(config_path: &Path) -> Result<TandemConfig> {
    if !config_path.exists() {
        return Ok(TandemConfig::default());
    }

    let content = std::fs::read_to_string(config_path)?;
    let config: TandemConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from the default location
pub fn load_default_config() -> Result<TandemConfig> {
    let home = tandem_logging::tandem_home()
        .map_err(|e| ConfigError::NotFound(e.to_string()))?;
    load_config(&home.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = TandemConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.classifier.tie_route, Route::Documents);
        assert_eq!(config.classifier.confidence_floor, 0.33);
        assert_eq!(config.classifier.hybrid_confidence, HybridConfidence::WinningShare);
        assert_eq!(config.limits.min_query_chars, 3);
        assert_eq!(config.limits.max_query_chars, 1000);
        assert_eq!(config.limits.default_top_k, 5);
        assert!(!config.routing.fallback_to_available);
        assert!(config.approvals.journal_dir.is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let config = load_config(&temp.path().join("absent.toml")).unwrap();
        assert_eq!(config.timeouts.retrieval_ms, 15_000);
    }

    #[test]
    fn test_load_empty_file() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.toml");
        std::fs::write(&config_path, "").unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.limits.max_top_k, 50);
    }

    #[test]
    fn test_load_partial_config() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
            [classifier]
            tie_route = "sql"
            hybrid_confidence = "balanced"

            [classifier.keywords]
            sql = ["how many", "revenue"]

            [timeouts]
            retrieval_ms = 500

            [routing]
            fallback_to_available = true
            "#,
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.classifier.tie_route, Route::Sql);
        assert_eq!(config.classifier.hybrid_confidence, HybridConfidence::Balanced);
        assert_eq!(config.classifier.keywords.sql, vec!["how many", "revenue"]);
        // Unlisted sets keep their defaults
        assert!(!config.classifier.keywords.documents.is_empty());
        assert_eq!(config.timeouts.retrieval(), Duration::from_millis(500));
        assert_eq!(config.timeouts.execution_ms, 30_000);
        assert!(config.routing.fallback_to_available);
    }

    #[test]
    fn test_approval_windows() {
        let approvals = ApprovalConfig::default();
        assert_eq!(approvals.pending_ttl().unwrap(), TimeDelta::try_minutes(24 * 60));
        assert_eq!(approvals.retention().unwrap(), TimeDelta::try_days(7).unwrap());

        let disabled = ApprovalConfig {
            pending_ttl_minutes: None,
            ..ApprovalConfig::default()
        };
        assert_eq!(disabled.pending_ttl().unwrap(), None);

        // Unvalidated huge values are an error, not a panic
        let huge = ApprovalConfig {
            retention_days: i64::MAX / 2,
            pending_ttl_minutes: Some(i64::MAX / 2),
            ..ApprovalConfig::default()
        };
        assert!(huge.retention().is_err());
        assert!(huge.pending_ttl().is_err());
    }

    #[test]
    fn test_logging_section() {
        let config: TandemConfig =
            toml::from_str("[logging]\nfilter = \"tandem=debug\"\nlog_dir = \"/var/log/tandem\"\n").unwrap();
        let log_config = config.logging.as_log_config();
        assert_eq!(log_config.default_filter, "tandem=debug");
        assert_eq!(log_config.log_dir, Some(PathBuf::from("/var/log/tandem")));
        assert_eq!(TandemConfig::default().logging.filter, tandem_logging::DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.toml");

        std::fs::write(&config_path, "[classifier]\ntie_route = \"hybrid\"\n").unwrap();
        assert!(matches!(load_config(&config_path), Err(ConfigError::Invalid(_))));

        std::fs::write(&config_path, "[limits]\nmin_query_chars = 20\nmax_query_chars = 10\n").unwrap();
        assert!(matches!(load_config(&config_path), Err(ConfigError::Invalid(_))));

        std::fs::write(&config_path, "[timeouts]\nexecution_ms = 0\n").unwrap();
        assert!(matches!(load_config(&config_path), Err(ConfigError::Invalid(_))));

        std::fs::write(&config_path, "[classifier.keywords]\nhybrid = []\n").unwrap();
        assert!(matches!(load_config(&config_path), Err(ConfigError::Invalid(_))));

        std::fs::write(&config_path, "[approvals]\nretention_days = 4611686018427387903\n").unwrap();
        assert!(matches!(load_config(&config_path), Err(ConfigError::Invalid(_))));

        std::fs::write(&config_path, "[approvals]\nretention_days = -1\n").unwrap();
        assert!(matches!(load_config(&config_path), Err(ConfigError::Invalid(_))));

        std::fs::write(&config_path, "[approvals]\npending_ttl_minutes = -1\n").unwrap();
        assert!(matches!(load_config(&config_path), Err(ConfigError::Invalid(_))));

        std::fs::write(&config_path, "[approvals]\npending_ttl_minutes = 0\n").unwrap();
        assert!(matches!(load_config(&config_path), Err(ConfigError::Invalid(_))));

        std::fs::write(&config_path, "not = [valid").unwrap();
        assert!(matches!(load_config(&config_path), Err(ConfigError::Toml(_))));
    }
}
