//! Configuration management with file persistence
//!
//! The file format is TOML with durations as plain seconds/milliseconds.
//! `detector_config`, `resolver_config` and `scheduler_config` turn it into
//! the runtime configurations the components take.

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::deadlock::{DetectorConfig, ResolutionPolicy, ResolverConfig};
use crate::domain::locking::Priority;
use crate::scheduler::{SchedulerConfig, SchedulingAlgorithm};

/// Lockgate configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub resolution: ResolutionConfig,
    pub scheduling: SchedulingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub enabled: bool,
    pub check_interval_secs: u64,
    pub max_wait_secs: u64,
    pub history_size: usize,
    pub enable_prevention: bool,
    pub resolution_policy: ResolutionPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    pub default_policy: ResolutionPolicy,
    /// Keyed by policy name
    pub policy_weights: BTreeMap<String, f64>,
    pub enable_adaptive_policy: bool,
    pub enable_preemption: bool,
    pub preemption_threshold: Priority,
    pub max_resolution_attempts: usize,
    pub victim_cooldown_secs: u64,
    pub enable_cascade_resolution: bool,
    pub enable_priority_boost: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub algorithm: SchedulingAlgorithm,
    /// Keyed by priority name
    pub priority_weights: BTreeMap<String, f64>,
    pub user_weights: BTreeMap<String, f64>,
    pub project_weights: BTreeMap<String, f64>,
    pub time_slice_ms: u64,
    pub starvation_threshold_secs: u64,
    pub starvation_boost: f64,
    pub enable_load_balancing: bool,
    pub load_balance_window_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lottery_seed: Option<u64>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let runtime = DetectorConfig::default();
        Self {
            enabled: runtime.enabled,
            check_interval_secs: runtime.check_interval.as_secs(),
            max_wait_secs: runtime.max_wait_time.as_secs(),
            history_size: runtime.history_size,
            enable_prevention: runtime.enable_prevention,
            resolution_policy: runtime.resolution_policy,
        }
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        let runtime = ResolverConfig::default();
        Self {
            default_policy: runtime.default_policy,
            policy_weights: runtime
                .policy_weights
                .iter()
                .map(|(policy, weight)| (policy.as_str().to_string(), *weight))
                .collect(),
            enable_adaptive_policy: runtime.enable_adaptive_policy,
            enable_preemption: runtime.enable_preemption,
            preemption_threshold: runtime.preemption_threshold,
            max_resolution_attempts: runtime.max_resolution_attempts,
            victim_cooldown_secs: runtime.victim_history_ttl.as_secs(),
            enable_cascade_resolution: runtime.enable_cascade_resolution,
            enable_priority_boost: runtime.enable_priority_boost,
        }
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        let runtime = SchedulerConfig::default();
        Self {
            algorithm: runtime.algorithm,
            priority_weights: BTreeMap::new(),
            user_weights: BTreeMap::new(),
            project_weights: BTreeMap::new(),
            time_slice_ms: runtime.time_slice.as_millis() as u64,
            starvation_threshold_secs: runtime.starvation_threshold.as_secs(),
            starvation_boost: runtime.starvation_boost,
            enable_load_balancing: runtime.enable_load_balancing,
            load_balance_window_secs: runtime.load_balance_window.as_secs(),
            lottery_seed: runtime.lottery_seed,
        }
    }
}

const KEYS: &[&str] = &[
    "detection.enabled",
    "detection.check_interval_secs",
    "detection.max_wait_secs",
    "detection.history_size",
    "detection.enable_prevention",
    "detection.resolution_policy",
    "resolution.default_policy",
    "resolution.policy_weights",
    "resolution.enable_adaptive_policy",
    "resolution.enable_preemption",
    "resolution.preemption_threshold",
    "resolution.max_resolution_attempts",
    "resolution.victim_cooldown_secs",
    "resolution.enable_cascade_resolution",
    "resolution.enable_priority_boost",
    "scheduling.algorithm",
    "scheduling.priority_weights",
    "scheduling.user_weights",
    "scheduling.project_weights",
    "scheduling.time_slice_ms",
    "scheduling.starvation_threshold_secs",
    "scheduling.starvation_boost",
    "scheduling.enable_load_balancing",
    "scheduling.load_balance_window_secs",
    "scheduling.lottery_seed",
];

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("LOCKGATE_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("lockgate")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default path, or defaults if there is no file
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, or defaults if it doesn't exist
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration by building every runtime config
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.detection.check_interval_secs == 0 {
            return Err(anyhow!("detection.check_interval_secs must be positive"));
        }
        self.resolver_config()?.validate()?;
        self.scheduler_config()?.validate()?;
        Ok(())
    }

    /// Runtime detector configuration
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            enabled: self.detection.enabled,
            check_interval: Duration::from_secs(self.detection.check_interval_secs),
            max_wait_time: Duration::from_secs(self.detection.max_wait_secs),
            resolution_policy: self.detection.resolution_policy,
            history_size: self.detection.history_size,
            enable_prevention: self.detection.enable_prevention,
        }
    }

    /// Runtime resolver configuration
    pub fn resolver_config(&self) -> anyhow::Result<ResolverConfig> {
        let r = &self.resolution;
        Ok(ResolverConfig {
            default_policy: r.default_policy,
            policy_weights: parse_keys(&r.policy_weights)
                .context("Invalid resolution.policy_weights")?,
            enable_adaptive_policy: r.enable_adaptive_policy,
            enable_preemption: r.enable_preemption,
            preemption_threshold: r.preemption_threshold,
            max_resolution_attempts: r.max_resolution_attempts,
            victim_history_ttl: Duration::from_secs(r.victim_cooldown_secs),
            enable_cascade_resolution: r.enable_cascade_resolution,
            enable_priority_boost: r.enable_priority_boost,
        })
    }

    /// Runtime scheduler configuration
    pub fn scheduler_config(&self) -> anyhow::Result<SchedulerConfig> {
        let s = &self.scheduling;
        Ok(SchedulerConfig {
            algorithm: s.algorithm,
            priority_weights: parse_keys(&s.priority_weights)
                .context("Invalid scheduling.priority_weights")?,
            user_weights: s.user_weights.clone().into_iter().collect(),
            project_weights: s.project_weights.clone().into_iter().collect(),
            time_slice: Duration::from_millis(s.time_slice_ms),
            starvation_threshold: Duration::from_secs(s.starvation_threshold_secs),
            starvation_boost: s.starvation_boost,
            enable_load_balancing: s.enable_load_balancing,
            load_balance_window: Duration::from_secs(s.load_balance_window_secs),
            lottery_seed: s.lottery_seed,
        })
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let d = &self.detection;
        let r = &self.resolution;
        let s = &self.scheduling;

        let value = match key {
            "detection.enabled" => d.enabled.to_string(),
            "detection.check_interval_secs" => d.check_interval_secs.to_string(),
            "detection.max_wait_secs" => d.max_wait_secs.to_string(),
            "detection.history_size" => d.history_size.to_string(),
            "detection.enable_prevention" => d.enable_prevention.to_string(),
            "detection.resolution_policy" => d.resolution_policy.to_string(),

            "resolution.default_policy" => r.default_policy.to_string(),
            "resolution.policy_weights" => format_weights(&r.policy_weights),
            "resolution.enable_adaptive_policy" => r.enable_adaptive_policy.to_string(),
            "resolution.enable_preemption" => r.enable_preemption.to_string(),
            "resolution.preemption_threshold" => r.preemption_threshold.to_string(),
            "resolution.max_resolution_attempts" => r.max_resolution_attempts.to_string(),
            "resolution.victim_cooldown_secs" => r.victim_cooldown_secs.to_string(),
            "resolution.enable_cascade_resolution" => r.enable_cascade_resolution.to_string(),
            "resolution.enable_priority_boost" => r.enable_priority_boost.to_string(),

            "scheduling.algorithm" => s.algorithm.to_string(),
            "scheduling.priority_weights" => format_weights(&s.priority_weights),
            "scheduling.user_weights" => format_weights(&s.user_weights),
            "scheduling.project_weights" => format_weights(&s.project_weights),
            "scheduling.time_slice_ms" => s.time_slice_ms.to_string(),
            "scheduling.starvation_threshold_secs" => s.starvation_threshold_secs.to_string(),
            "scheduling.starvation_boost" => s.starvation_boost.to_string(),
            "scheduling.enable_load_balancing" => s.enable_load_balancing.to_string(),
            "scheduling.load_balance_window_secs" => s.load_balance_window_secs.to_string(),
            "scheduling.lottery_seed" => s
                .lottery_seed
                .map_or_else(|| "none".to_string(), |seed| seed.to_string()),

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `lockgate config list` to see available keys.",
                    key
                ));
            }
        };

        Ok(value)
    }

    /// Set a configuration value by key.
    ///
    /// The whole configuration is validated afterwards; on failure the
    /// previous value is kept.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut updated = self.clone();
        updated.apply(key, value)?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    fn apply(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let d = &mut self.detection;
        let r = &mut self.resolution;
        let s = &mut self.scheduling;

        match key {
            "detection.enabled" => d.enabled = parse(key, value)?,
            "detection.check_interval_secs" => d.check_interval_secs = parse(key, value)?,
            "detection.max_wait_secs" => d.max_wait_secs = parse(key, value)?,
            "detection.history_size" => d.history_size = parse(key, value)?,
            "detection.enable_prevention" => d.enable_prevention = parse(key, value)?,
            "detection.resolution_policy" => d.resolution_policy = value.parse()?,

            "resolution.default_policy" => r.default_policy = value.parse()?,
            "resolution.policy_weights" => r.policy_weights = parse_weights(value)?,
            "resolution.enable_adaptive_policy" => r.enable_adaptive_policy = parse(key, value)?,
            "resolution.enable_preemption" => r.enable_preemption = parse(key, value)?,
            "resolution.preemption_threshold" => r.preemption_threshold = value.parse()?,
            "resolution.max_resolution_attempts" => r.max_resolution_attempts = parse(key, value)?,
            "resolution.victim_cooldown_secs" => r.victim_cooldown_secs = parse(key, value)?,
            "resolution.enable_cascade_resolution" => {
                r.enable_cascade_resolution = parse(key, value)?
            }
            "resolution.enable_priority_boost" => r.enable_priority_boost = parse(key, value)?,

            "scheduling.algorithm" => s.algorithm = value.parse()?,
            "scheduling.priority_weights" => s.priority_weights = parse_weights(value)?,
            "scheduling.user_weights" => s.user_weights = parse_weights(value)?,
            "scheduling.project_weights" => s.project_weights = parse_weights(value)?,
            "scheduling.time_slice_ms" => s.time_slice_ms = parse(key, value)?,
            "scheduling.starvation_threshold_secs" => {
                s.starvation_threshold_secs = parse(key, value)?
            }
            "scheduling.starvation_boost" => s.starvation_boost = parse(key, value)?,
            "scheduling.enable_load_balancing" => s.enable_load_balancing = parse(key, value)?,
            "scheduling.load_balance_window_secs" => {
                s.load_balance_window_secs = parse(key, value)?
            }
            "scheduling.lottery_seed" => {
                s.lottery_seed = match value.trim() {
                    "" | "none" => None,
                    seed => Some(parse(key, seed)?),
                }
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `lockgate config list` to see available keys.",
                    key
                ));
            }
        }

        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// Reset configuration to defaults by removing the file
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: {}", key, value))
}

/// Parse `name=weight, name=weight`; an empty string clears the table
fn parse_weights(value: &str) -> anyhow::Result<BTreeMap<String, f64>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, weight) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected name=weight, got '{}'", entry))?;
            let weight: f64 = weight
                .trim()
                .parse()
                .with_context(|| format!("Invalid weight in '{}'", entry))?;
            Ok((name.trim().to_string(), weight))
        })
        .collect()
}

fn format_weights(weights: &BTreeMap<String, f64>) -> String {
    weights
        .iter()
        .map(|(name, weight)| format!("{}={}", name, weight))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convert a name-keyed table into one keyed by a parsed enum
fn parse_keys<K>(table: &BTreeMap<String, f64>) -> anyhow::Result<HashMap<K, f64>>
where
    K: FromStr<Err = crate::error::Error> + Eq + std::hash::Hash,
{
    table
        .iter()
        .map(|(name, weight)| Ok((name.parse::<K>()?, *weight)))
        .collect()
}
