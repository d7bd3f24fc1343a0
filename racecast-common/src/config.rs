//! Configuration loading and root folder resolution
//!
//! Resolution priority for both the config file and the root folder:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform config file (`~/.config/racecast/racecast.toml`, `/etc/racecast/racecast.toml`)
//! 4. Compiled defaults
//!
//! Every section carries serde defaults so a partial TOML file is valid.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "RACECAST_CONFIG";

/// Environment variable naming the data root folder
pub const ROOT_ENV_VAR: &str = "RACECAST_ROOT";

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Data root folder (database lives here)
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub sources: SourceConfig,
    pub retry: RetryConfig,
    pub parser: ParserConfig,
    pub features: FeatureConfig,
    pub ensemble: EnsembleConfig,
    /// Model catalogue; empty means "use the built-in catalogue"
    pub models: Vec<ModelDefinition>,
    pub orchestrator: OrchestratorConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by RUST_LOG)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5740,
        }
    }
}

/// Upstream race-data source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL; document paths are appended to it
    pub base_url: String,
    /// Per-request timeout
    pub request_timeout_secs: u64,
    /// Upstream politeness limit
    pub requests_per_second: u32,
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5741/api".to_string(),
            request_timeout_secs: 30,
            requests_per_second: 5,
            user_agent: concat!("racecast/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Fetch retry policy (exponential backoff)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

/// Parser tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Minimum share of recommended entry fields (0.0 disables the gate)
    pub min_card_completeness: f64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            min_card_completeness: 0.0,
        }
    }
}

/// Feature builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Schema tag stored with every vector and prediction
    pub schema_version: String,
    /// Number of most recent starts used for form features
    pub recent_form_window: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            schema_version: "v1".to_string(),
            recent_form_window: 5,
        }
    }
}

/// How ensemble member scores are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CombinationPolicy {
    WeightedAverage,
    RankAggregate,
}

impl CombinationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CombinationPolicy::WeightedAverage => "weighted-average",
            CombinationPolicy::RankAggregate => "rank-aggregate",
        }
    }
}

impl std::str::FromStr for CombinationPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "weighted-average" => Ok(CombinationPolicy::WeightedAverage),
            "rank-aggregate" => Ok(CombinationPolicy::RankAggregate),
            other => Err(Error::Config(format!("Unknown combination policy: {}", other))),
        }
    }
}

/// Ensemble combination configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub policy: CombinationPolicy,
    /// Model id → weight; models without an entry get weight 1.0
    pub weights: BTreeMap<String, f64>,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            policy: CombinationPolicy::WeightedAverage,
            weights: BTreeMap::new(),
        }
    }
}

/// Linear (logistic) scoring model definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub bias: f64,
    /// Feature name → coefficient
    pub coefficients: BTreeMap<String, f64>,
    /// Features that must not be missing for this model to score
    #[serde(default)]
    pub required_features: Vec<String>,
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on concurrently processed races
    pub max_concurrent_races: usize,
    /// Trigger-level deadline
    pub trigger_timeout_secs: u64,
    /// Fixed UTC offset used to resolve "today"
    pub utc_offset_hours: i32,
    /// Reuse stored predictions instead of refetching
    pub reuse_existing: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_races: 8,
            trigger_timeout_secs: 225,
            utc_offset_hours: 9,
            reuse_existing: true,
        }
    }
}

impl PipelineConfig {
    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.multiplier < 1.0 {
            errors.push("retry.multiplier must be >= 1.0".to_string());
        }
        if self.sources.requests_per_second == 0 {
            errors.push("sources.requests_per_second must be at least 1".to_string());
        }
        if self.orchestrator.max_concurrent_races == 0 {
            errors.push("orchestrator.max_concurrent_races must be at least 1".to_string());
        }
        if !(-12..=14).contains(&self.orchestrator.utc_offset_hours) {
            errors.push("orchestrator.utc_offset_hours must be within -12..=14".to_string());
        }
        if !(0.0..=1.0).contains(&self.parser.min_card_completeness) {
            errors.push("parser.min_card_completeness must be within 0.0..=1.0".to_string());
        }
        if self.features.schema_version.trim().is_empty() {
            errors.push("features.schema_version must not be empty".to_string());
        }
        for (model, weight) in &self.ensemble.weights {
            if !weight.is_finite() || *weight <= 0.0 {
                errors.push(format!("ensemble weight for '{}' must be positive", model));
            }
        }
        if !self.models.is_empty() {
            for model in self.ensemble.weights.keys() {
                if !self.models.iter().any(|m| &m.id == model) {
                    errors.push(format!("ensemble weight given for unknown model '{}'", model));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(errors.join("; ")))
        }
    }
}

/// Load configuration following the resolution priority
///
/// A missing file at the CLI/ENV location is an error; a missing platform
/// file silently falls back to defaults.
pub fn load_config(cli_path: Option<&Path>) -> Result<PipelineConfig> {
    let config = if let Some(path) = cli_path {
        read_toml_config(path)?
    } else if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        read_toml_config(Path::new(&path))?
    } else if let Some(path) = platform_config_file() {
        read_toml_config(&path)?
    } else {
        debug!("No config file found, using compiled defaults");
        PipelineConfig::default()
    };

    config.validate()?;
    Ok(config)
}

/// Read and parse a TOML config file
pub fn read_toml_config(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write config as TOML (used by tooling and tests)
pub fn write_toml_config(config: &PipelineConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Root folder resolution: CLI > ENV > config file > OS default
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &PipelineConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(ROOT_ENV_VAR) {
        return PathBuf::from(path);
    }
    if let Some(path) = &config.root_folder {
        return path.clone();
    }
    default_root_folder()
}

/// Database file inside the root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join("racecast.db")
}

fn platform_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("racecast").join("racecast.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/racecast/racecast.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("racecast"))
        .unwrap_or_else(|| PathBuf::from("./racecast_data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.sources.request_timeout_secs, 30);
        assert_eq!(config.orchestrator.trigger_timeout_secs, 225);
        assert_eq!(config.ensemble.policy, CombinationPolicy::WeightedAverage);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [retry]
            max_attempts = 5

            [ensemble]
            policy = "rank-aggregate"
            weights = { form = 2.0, market = 0.5 }
            "#,
        )
        .unwrap();

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.ensemble.policy, CombinationPolicy::RankAggregate);
        assert_eq!(config.ensemble.weights.get("form"), Some(&2.0));
        assert_eq!(config.features.schema_version, "v1");
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let parsed: std::result::Result<PipelineConfig, _> = toml::from_str(
            r#"
            [ensemble]
            policy = "majority-vote"
            "#,
        );
        assert!(parsed.is_err());
        assert!("majority-vote".parse::<CombinationPolicy>().is_err());
        assert_eq!(
            "rank-aggregate".parse::<CombinationPolicy>().unwrap(),
            CombinationPolicy::RankAggregate
        );
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = PipelineConfig::default();
        config.retry.max_attempts = 0;
        config.ensemble.weights.insert("form".to_string(), -1.0);

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_attempts"));
        assert!(err.contains("'form'"));
    }

    #[test]
    fn test_weights_for_unknown_model_rejected() {
        let mut config = PipelineConfig::default();
        config.models.push(ModelDefinition {
            id: "form".to_string(),
            version: "1.0.0".to_string(),
            bias: 0.0,
            coefficients: BTreeMap::new(),
            required_features: vec![],
        });
        config.ensemble.weights.insert("speed".to_string(), 1.0);

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("unknown model 'speed'"));
    }

    #[test]
    #[serial]
    fn test_cli_path_wins_over_env() {
        let temp_dir = TempDir::new().unwrap();
        let cli_path = temp_dir.path().join("cli.toml");
        let env_path = temp_dir.path().join("env.toml");

        let mut cli_config = PipelineConfig::default();
        cli_config.server.port = 6001;
        write_toml_config(&cli_config, &cli_path).unwrap();

        let mut env_config = PipelineConfig::default();
        env_config.server.port = 6002;
        write_toml_config(&env_config, &env_path).unwrap();

        std::env::set_var(CONFIG_ENV_VAR, &env_path);
        let loaded = load_config(Some(&cli_path)).unwrap();
        assert_eq!(loaded.server.port, 6001);

        let loaded = load_config(None).unwrap();
        assert_eq!(loaded.server.port, 6002);
        std::env::remove_var(CONFIG_ENV_VAR);
    }

    #[test]
    #[serial]
    fn test_root_folder_priority() {
        std::env::remove_var(ROOT_ENV_VAR);
        let mut config = PipelineConfig::default();
        config.root_folder = Some(PathBuf::from("/srv/racecast"));

        let cli = PathBuf::from("/tmp/cli-root");
        assert_eq!(resolve_root_folder(Some(&cli), &config), cli);
        assert_eq!(
            resolve_root_folder(None, &config),
            PathBuf::from("/srv/racecast")
        );

        std::env::set_var(ROOT_ENV_VAR, "/tmp/env-root");
        assert_eq!(
            resolve_root_folder(None, &config),
            PathBuf::from("/tmp/env-root")
        );
        std::env::remove_var(ROOT_ENV_VAR);
    }

    #[test]
    fn test_missing_cli_file_is_error() {
        let result = load_config(Some(Path::new("/nonexistent/racecast.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
