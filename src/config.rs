//! Configuration for convoy, read from `convoy.toml`.
//!
//! Layering, lowest to highest precedence: built-in defaults → file →
//! environment → CLI flags. Every field has a default, so an empty or missing
//! file is a valid configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [timeouts]
//! object_create_secs = 120
//! destroy_secs = 120
//! volume_dir_cleanup_secs = 300
//! node_ready_secs = 300
//! default_secs = 120
//! statefulset_validate_secs = 1200
//! find_files_on_worker_secs = 60
//! delete_tasks_wait_secs = 180
//! retry_interval_secs = 10
//!
//! [cluster]
//! pods_root = "/var/lib/kubelet/pods"
//! scheduler_service = "kubelet"
//! security_config_map = "px-security"
//! security_namespace = "default"
//! pods_per_decommission_step = 40
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```
//!
//! Environment overrides: `CONVOY_LOG_LEVEL`, `CONVOY_LOG_FORMAT`,
//! `CONVOY_SECURITY_CONFIG_MAP`, `CONVOY_RETRY_INTERVAL_SECS`.

use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "convoy.toml";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, one event per line (default)
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

/// Timeouts and the shared poll interval, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Creating (or adopting) one object
    #[serde(default = "default_object_create_secs")]
    pub object_create_secs: u64,
    /// Deleting one object and waiting for it to disappear
    #[serde(default = "default_destroy_secs")]
    pub destroy_secs: u64,
    /// Waiting for a destroyed pod's volume directory to vanish
    #[serde(default = "default_volume_dir_cleanup_secs")]
    pub volume_dir_cleanup_secs: u64,
    /// Waiting for a node to report ready
    #[serde(default = "default_node_ready_secs")]
    pub node_ready_secs: u64,
    /// Everything without a dedicated timeout
    #[serde(default = "default_secs")]
    pub default_secs: u64,
    /// Validating a stateful set, which starts replicas one at a time
    #[serde(default = "default_statefulset_validate_secs")]
    pub statefulset_validate_secs: u64,
    /// One file-existence probe on a worker node
    #[serde(default = "default_find_files_on_worker_secs")]
    pub find_files_on_worker_secs: u64,
    /// Waiting for deleted pods to go away
    #[serde(default = "default_delete_tasks_wait_secs")]
    pub delete_tasks_wait_secs: u64,
    /// Sleep between attempts of every retry loop
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

fn default_object_create_secs() -> u64 {
    120
}

fn default_destroy_secs() -> u64 {
    120
}

fn default_volume_dir_cleanup_secs() -> u64 {
    300
}

fn default_node_ready_secs() -> u64 {
    300
}

fn default_secs() -> u64 {
    120
}

fn default_statefulset_validate_secs() -> u64 {
    1200
}

fn default_find_files_on_worker_secs() -> u64 {
    60
}

fn default_delete_tasks_wait_secs() -> u64 {
    180
}

fn default_retry_interval_secs() -> u64 {
    10
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            object_create_secs: default_object_create_secs(),
            destroy_secs: default_destroy_secs(),
            volume_dir_cleanup_secs: default_volume_dir_cleanup_secs(),
            node_ready_secs: default_node_ready_secs(),
            default_secs: default_secs(),
            statefulset_validate_secs: default_statefulset_validate_secs(),
            find_files_on_worker_secs: default_find_files_on_worker_secs(),
            delete_tasks_wait_secs: default_delete_tasks_wait_secs(),
            retry_interval_secs: default_retry_interval_secs(),
        }
    }
}

impl TimeoutsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    fn policy(&self, secs: u64) -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(secs), self.interval())
    }

    pub fn object_create(&self) -> RetryPolicy {
        self.policy(self.object_create_secs)
    }

    pub fn destroy(&self) -> RetryPolicy {
        self.policy(self.destroy_secs)
    }

    pub fn volume_dir_cleanup(&self) -> RetryPolicy {
        self.policy(self.volume_dir_cleanup_secs)
    }

    pub fn node_ready(&self) -> RetryPolicy {
        self.policy(self.node_ready_secs)
    }

    pub fn default_policy(&self) -> RetryPolicy {
        self.policy(self.default_secs)
    }

    pub fn statefulset_validate(&self) -> RetryPolicy {
        self.policy(self.statefulset_validate_secs)
    }

    pub fn find_files_on_worker(&self) -> Duration {
        Duration::from_secs(self.find_files_on_worker_secs)
    }

    pub fn delete_tasks_wait(&self) -> RetryPolicy {
        self.policy(self.delete_tasks_wait_secs)
    }
}

/// Cluster-side paths and names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Root of the per-pod directories on every node
    #[serde(default = "default_pods_root")]
    pub pods_root: String,
    /// Node-level service that runs scheduled pods
    #[serde(default = "default_scheduler_service")]
    pub scheduler_service: String,
    /// Config map naming the auth secret to annotate objects with
    #[serde(default)]
    pub security_config_map: Option<String>,
    /// Namespace the security config map lives in
    #[serde(default = "default_security_namespace")]
    pub security_namespace: String,
    /// Pods drained per default timeout during decommission
    #[serde(default = "default_pods_per_decommission_step")]
    pub pods_per_decommission_step: usize,
}

fn default_pods_root() -> String {
    "/var/lib/kubelet/pods".to_string()
}

fn default_scheduler_service() -> String {
    "kubelet".to_string()
}

fn default_security_namespace() -> String {
    "default".to_string()
}

fn default_pods_per_decommission_step() -> usize {
    40
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            pods_root: default_pods_root(),
            scheduler_service: default_scheduler_service(),
            security_config_map: None,
            security_namespace: default_security_namespace(),
            pods_per_decommission_step: default_pods_per_decommission_step(),
        }
    }
}

impl ClusterConfig {
    /// `<pods_root>/<pod uid>/volumes`
    pub fn pod_volume_dir(&self, pod_uid: &str) -> String {
        crate::node::pod_volume_dir(&self.pods_root, pod_uid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// The complete convoy.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvoyConfig {
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ConvoyConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse convoy.toml")
    }

    /// Load from `explicit` if given, otherwise from the first existing
    /// default location; fall back to built-in defaults. Environment overrides
    /// are applied last.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => match default_config_paths().into_iter().find(|p| p.exists()) {
                Some(path) => Self::load(&path)?,
                None => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `CONVOY_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("CONVOY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("CONVOY_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        if let Some(name) = lookup("CONVOY_SECURITY_CONFIG_MAP") {
            self.cluster.security_config_map = if name.is_empty() { None } else { Some(name) };
        }
        if let Some(secs) = lookup("CONVOY_RETRY_INTERVAL_SECS") {
            self.timeouts.retry_interval_secs = secs
                .parse()
                .with_context(|| format!("CONVOY_RETRY_INTERVAL_SECS must be an integer, got '{}'", secs))?;
        }
        Ok(())
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize convoy.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.timeouts.retry_interval_secs == 0 {
            warnings.push("retry_interval_secs is 0: retry loops will poll continuously".to_string());
        }

        let t = &self.timeouts;
        for (name, value) in [
            ("object_create_secs", t.object_create_secs),
            ("destroy_secs", t.destroy_secs),
            ("volume_dir_cleanup_secs", t.volume_dir_cleanup_secs),
            ("node_ready_secs", t.node_ready_secs),
            ("default_secs", t.default_secs),
            ("statefulset_validate_secs", t.statefulset_validate_secs),
        ] {
            if value < t.retry_interval_secs {
                warnings.push(format!(
                    "{} ({}s) is shorter than retry_interval_secs ({}s): only one attempt will be made",
                    name, value, t.retry_interval_secs
                ));
            }
        }

        if !self.cluster.pods_root.starts_with('/') {
            warnings.push(format!(
                "pods_root '{}' is not an absolute path",
                self.cluster.pods_root
            ));
        }

        if self.cluster.pods_per_decommission_step == 0 {
            warnings.push("pods_per_decommission_step is 0: decommission timeout will not scale".to_string());
        }

        warnings
    }
}

/// `./convoy.toml`, then `<config dir>/convoy/convoy.toml`.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("convoy").join(CONFIG_FILE_NAME));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_driver_constants() {
        let config = ConvoyConfig::default();
        assert_eq!(config.timeouts.object_create().timeout, Duration::from_secs(120));
        assert_eq!(config.timeouts.volume_dir_cleanup().timeout, Duration::from_secs(300));
        assert_eq!(config.timeouts.statefulset_validate().timeout, Duration::from_secs(1200));
        assert_eq!(config.timeouts.interval(), Duration::from_secs(10));
        assert_eq!(config.cluster.pods_root, "/var/lib/kubelet/pods");
        assert_eq!(config.cluster.scheduler_service, "kubelet");
        assert_eq!(config.cluster.security_namespace, "default");
        assert!(config.cluster.security_config_map.is_none());
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(ConvoyConfig::parse("").unwrap(), ConvoyConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let content = r#"
[timeouts]
object_create_secs = 30

[logging]
format = "json"
"#;
        let config = ConvoyConfig::parse(content).unwrap();
        assert_eq!(config.timeouts.object_create_secs, 30);
        assert_eq!(config.timeouts.destroy_secs, 120);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_format_rejected() {
        let content = r#"
[logging]
format = "xml"
"#;
        assert!(ConvoyConfig::parse(content).is_err());
    }

    #[test]
    fn test_env_overrides_win_over_file() {
        let mut config = ConvoyConfig::parse("[logging]\nlevel = \"warn\"\n").unwrap();
        config
            .apply_overrides(env(&[
                ("CONVOY_LOG_LEVEL", "debug"),
                ("CONVOY_LOG_FORMAT", "json"),
                ("CONVOY_SECURITY_CONFIG_MAP", "px-security"),
                ("CONVOY_RETRY_INTERVAL_SECS", "2"),
            ]))
            .unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.cluster.security_config_map.as_deref(), Some("px-security"));
        assert_eq!(config.timeouts.interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_bad_env_override_is_an_error() {
        let mut config = ConvoyConfig::default();
        let err = config
            .apply_overrides(env(&[("CONVOY_RETRY_INTERVAL_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("CONVOY_RETRY_INTERVAL_SECS"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = ConvoyConfig::default();
        config.cluster.security_config_map = Some("px-security".into());
        config.save(&path).unwrap();

        let loaded = ConvoyConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validate_flags_short_timeouts() {
        let content = r#"
[timeouts]
retry_interval_secs = 30
destroy_secs = 10

[cluster]
pods_root = "relative/pods"
"#;
        let warnings = ConvoyConfig::parse(content).unwrap().validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("destroy_secs"));
        assert!(warnings[1].contains("relative/pods"));
        assert!(ConvoyConfig::default().validate().is_empty());
    }

    #[test]
    fn test_pod_volume_dir() {
        let mut cluster = ClusterConfig::default();
        assert_eq!(cluster.pod_volume_dir("abc"), "/var/lib/kubelet/pods/abc/volumes");
        cluster.pods_root = "/tmp/pods/".into();
        assert_eq!(cluster.pod_volume_dir("abc"), "/tmp/pods/abc/volumes");
    }
}
