//! Configuration management for Autostop
//!
//! Layers, lowest priority first: built-in defaults, a config file,
//! `AUTOSTOP_*` environment variables (`__` separates sections), and the
//! flat variables older deployments already export (`MLFLOW_TRACKING_URI`,
//! `TELEGRAM_BOT_TOKEN`, ...).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::alerting::ChannelSelection;
use crate::error::{Error, Result};
use crate::models::ThresholdTable;

/// File name searched for when no config path is given
pub const CONFIG_FILE_NAME: &str = "autostop.toml";

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "AUTOSTOP_CONFIG";

/// Flat environment variables mapped onto config keys
const LEGACY_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("MLFLOW_TRACKING_URI", "tracking.uri"),
    ("POLL_INTERVAL_SECONDS", "watch.poll_interval_seconds"),
    ("TELEGRAM_BOT_TOKEN", "notifications.telegram.bot_token"),
    ("TELEGRAM_CHAT_ID", "notifications.telegram.chat_id"),
    ("SLACK_WEBHOOK_URL", "notifications.slack.webhook_url"),
    ("MESSAGE_CHANNELS", "notifications.channels"),
];

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracking service configuration
    pub tracking: TrackingConfig,

    /// Watch loop configuration
    pub watch: WatchConfig,

    /// Notification configuration
    pub notifications: NotificationConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from an optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, std::env::vars().collect())
    }

    /// Load configuration using `env` in place of the process environment
    pub fn load_with_env(path: Option<&Path>, env: HashMap<String, String>) -> Result<Self> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            debug!(path = %path.display(), "Reading configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }

        let mut overrides = Vec::new();
        for (var, key) in LEGACY_ENV_OVERRIDES {
            if let Some(value) = env.get(*var).filter(|v| !v.trim().is_empty()) {
                overrides.push((*key, value.clone()));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("AUTOSTOP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(Some(env.into_iter().collect())),
        );

        for (key, value) in overrides {
            builder = builder.set_override(key, value)?;
        }

        let mut config: Self = builder.build()?.try_deserialize()?;

        // The builder folds keys to lowercase; metric names are case sensitive
        if let Some(written) = path.map(written_thresholds).transpose()?.flatten() {
            config.watch.metric_thresholds =
                restore_metric_case(&config.watch.metric_thresholds, &written);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check values the rest of the program relies on
    pub fn validate(&self) -> Result<()> {
        if self.tracking.uri.trim().is_empty() {
            return Err(Error::config("tracking.uri (MLFLOW_TRACKING_URI) is required"));
        }
        url::Url::parse(&self.tracking.uri)
            .map_err(|e| Error::config(format!("invalid tracking.uri '{}': {e}", self.tracking.uri)))?;

        if self.watch.poll_interval_seconds == 0 {
            return Err(Error::config("watch.poll_interval_seconds must be greater than 0"));
        }

        if self.tracking.request_timeout_seconds == 0 {
            return Err(Error::config("tracking.request_timeout_seconds must be greater than 0"));
        }

        if let Some((metric, bound)) = self
            .watch
            .metric_thresholds
            .iter()
            .find(|(_, bound)| !bound.is_finite())
        {
            return Err(Error::config(format!(
                "threshold for metric '{metric}' must be a finite number, got {bound}"
            )));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(Error::config(format!(
                "logging.format must be 'pretty' or 'json', got '{}'",
                self.logging.format
            )));
        }

        Ok(())
    }
}

/// Tracking service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Base URI of the MLflow tracking server
    pub uri: String,
    /// Timeout for every outbound HTTP request
    pub request_timeout_seconds: u64,
}

impl TrackingConfig {
    /// Request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            request_timeout_seconds: 30,
        }
    }
}

/// Watch loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Seconds between polls
    pub poll_interval_seconds: u64,
    /// List a sample of all runs when a global scan finds nothing active
    pub diagnostics: bool,
    /// Upper bound per metric name
    pub metric_thresholds: ThresholdTable,
}

impl WatchConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 30,
            diagnostics: false,
            metric_thresholds: ThresholdTable::default(),
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Channels to notify on a stop
    pub channels: ChannelSelection,
    /// Telegram bot settings
    pub telegram: TelegramConfig,
    /// Slack webhook settings
    pub slack: SlackConfig,
}

/// Telegram bot settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token
    pub bot_token: Option<String>,
    /// Target chat
    pub chat_id: Option<String>,
    /// Bot API base URL
    pub api_base: String,
    /// Message parse mode
    pub parse_mode: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: "https://api.telegram.org".to_string(),
            parse_mode: "HTML".to_string(),
        }
    }
}

/// Slack webhook settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    /// Incoming webhook URL
    pub webhook_url: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Threshold table exactly as written in a TOML or JSON config file.
///
/// Other formats return `None` and keep the builder's keys.
fn written_thresholds(path: &Path) -> Result<Option<ThresholdTable>> {
    #[derive(Default, Deserialize)]
    #[serde(default)]
    struct WrittenWatch {
        metric_thresholds: ThresholdTable,
    }

    #[derive(Default, Deserialize)]
    #[serde(default)]
    struct WrittenFile {
        watch: WrittenWatch,
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    let written: WrittenFile = match extension.as_deref() {
        Some("toml") | None => {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)
                .map_err(|e| Error::config(format!("invalid {}: {e}", path.display())))?
        }
        Some("json") => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        Some(_) => return Ok(None),
    };

    Ok(Some(written.watch.metric_thresholds))
}

/// Put the file's spelling back on metric names the builder lowercased.
///
/// Bounds still come from `merged`, so environment overrides apply. When two
/// written names fold to the same key the written bounds are kept as-is.
/// Keys that only came from the environment stay lowercase.
fn restore_metric_case(merged: &ThresholdTable, written: &ThresholdTable) -> ThresholdTable {
    let mut folded: HashMap<String, usize> = HashMap::new();
    for (name, _) in written.iter() {
        *folded.entry(name.to_lowercase()).or_default() += 1;
    }

    let mut restored: HashMap<String, f64> = written
        .iter()
        .map(|(name, bound)| {
            let key = name.to_lowercase();
            let bound = match merged.get(&key) {
                Some(merged_bound) if folded.get(&key) == Some(&1) => merged_bound,
                _ => bound,
            };
            (name.to_string(), bound)
        })
        .collect();

    for (key, bound) in merged.iter() {
        if !folded.contains_key(&key.to_lowercase()) {
            restored.insert(key.to_string(), bound);
        }
    }

    restored.into()
}

/// Pick the config file to load.
///
/// Reads [`CONFIG_PATH_ENV`] at call time, so a value set by the env file is
/// seen as long as the env file was applied first.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    let from_env = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    resolve_config_path_with(explicit, from_env.as_deref())
}

/// Pick the config file to load from an explicit path or an env value.
///
/// An explicit path wins over the env value; an empty env value counts as
/// unset. Otherwise [`CONFIG_FILE_NAME`] is searched upward from the working
/// directory, then in the platform config directory.
pub fn resolve_config_path_with(explicit: Option<&Path>, from_env: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit.or(from_env.filter(|p| !p.as_os_str().is_empty())) {
        return Some(path.to_path_buf());
    }

    std::env::current_dir()
        .ok()
        .and_then(|cwd| find_upwards(&cwd, CONFIG_FILE_NAME))
        .or_else(|| {
            ProjectDirs::from("", "", "autostop")
                .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
                .filter(|path| path.is_file())
        })
}

/// Find `file_name` in `start` or any of its ancestors
pub fn find_upwards(start: &Path, file_name: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(file_name))
        .find(|candidate| candidate.is_file())
}

/// Apply a dotenv file to the process environment.
///
/// `file_name` is used as-is when it exists, otherwise searched upward from
/// the working directory. Returns the file that was applied, `None` when
/// nothing was found.
pub fn load_dotenv(file_name: &Path) -> Result<Option<PathBuf>> {
    let found = if file_name.is_file() {
        Some(file_name.to_path_buf())
    } else {
        let name = file_name.to_string_lossy();
        std::env::current_dir()?
            .ancestors()
            .map(|dir| dir.join(name.as_ref()))
            .find(|candidate| candidate.is_file())
    };

    let Some(path) = found else {
        return Ok(None);
    };

    dotenvy::from_path(&path)
        .map_err(|e| Error::config(format!("invalid env file {}: {e}", path.display())))?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("autostop.toml");
        fs::write(
            &path,
            r#"
[tracking]
uri = "http://mlflow:5000"

[watch]
poll_interval_seconds = 10

[watch.metric_thresholds]
loss = 0.5
grad_norm = 10.0

[notifications]
channels = "both"

[notifications.slack]
webhook_url = "https://hooks.slack.com/services/x"
"#,
        )
        .unwrap();

        let config = Config::load_with_env(Some(&path), HashMap::new()).unwrap();

        assert_eq!(config.tracking.uri, "http://mlflow:5000");
        assert_eq!(config.watch.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.watch.metric_thresholds.get("loss"), Some(0.5));
        assert_eq!(config.watch.metric_thresholds.get("grad_norm"), Some(10.0));
        assert_eq!(config.notifications.channels, ChannelSelection::Both);
        assert_eq!(config.notifications.telegram.parse_mode, "HTML");
        assert_eq!(config.tracking.request_timeout_seconds, 30);
    }

    #[test]
    fn test_legacy_env_overrides_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("autostop.toml");
        fs::write(&path, "[tracking]\nuri = \"http://from-file:5000\"\n").unwrap();

        let config = Config::load_with_env(
            Some(&path),
            env(&[
                ("MLFLOW_TRACKING_URI", "http://from-env:5000"),
                ("POLL_INTERVAL_SECONDS", "5"),
                ("TELEGRAM_BOT_TOKEN", "token"),
                ("TELEGRAM_CHAT_ID", "-100"),
                ("MESSAGE_CHANNELS", "Slack"),
            ]),
        )
        .unwrap();

        assert_eq!(config.tracking.uri, "http://from-env:5000");
        assert_eq!(config.watch.poll_interval_seconds, 5);
        assert_eq!(config.notifications.telegram.bot_token.as_deref(), Some("token"));
        assert_eq!(config.notifications.telegram.chat_id.as_deref(), Some("-100"));
        assert_eq!(config.notifications.channels, ChannelSelection::Slack);
    }

    #[test]
    fn test_prefixed_env_sections() {
        let config = Config::load_with_env(
            None,
            env(&[
                ("AUTOSTOP_TRACKING__URI", "http://mlflow:5000"),
                ("AUTOSTOP_WATCH__POLL_INTERVAL_SECONDS", "15"),
                ("AUTOSTOP_WATCH__DIAGNOSTICS", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(config.tracking.uri, "http://mlflow:5000");
        assert_eq!(config.watch.poll_interval_seconds, 15);
        assert!(config.watch.diagnostics);
    }

    #[test]
    fn test_missing_tracking_uri_is_rejected() {
        let err = Config::load_with_env(None, HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let err = Config::load_with_env(
            None,
            env(&[
                ("MLFLOW_TRACKING_URI", "http://mlflow:5000"),
                ("POLL_INTERVAL_SECONDS", "0"),
            ]),
        )
        .unwrap_err();

        assert!(err.to_string().contains("poll_interval_seconds"));
    }

    #[test]
    fn test_unknown_channel_selection_fails_to_load() {
        let result = Config::load_with_env(
            None,
            env(&[
                ("MLFLOW_TRACKING_URI", "http://mlflow:5000"),
                ("MESSAGE_CHANNELS", "pigeon"),
            ]),
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");

        assert!(Config::load_with_env(Some(&missing), HashMap::new()).is_err());
    }

    #[test]
    fn test_find_upwards() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "").unwrap();

        assert_eq!(
            find_upwards(&nested, CONFIG_FILE_NAME),
            Some(dir.path().join(CONFIG_FILE_NAME))
        );
        assert_eq!(find_upwards(&nested, "absent.toml"), None);
    }

    #[test]
    fn test_resolve_prefers_explicit_path() {
        let explicit = Path::new("/etc/autostop/custom.toml");
        let from_env = Path::new("/srv/autostop.toml");

        assert_eq!(resolve_config_path(Some(explicit)), Some(explicit.to_path_buf()));
        assert_eq!(
            resolve_config_path_with(Some(explicit), Some(from_env)),
            Some(explicit.to_path_buf())
        );
    }

    #[test]
    fn test_resolve_uses_env_value_without_flag() {
        let from_env = Path::new("/srv/autostop.toml");

        assert_eq!(
            resolve_config_path_with(None, Some(from_env)),
            Some(from_env.to_path_buf())
        );
    }

    #[test]
    fn test_config_path_from_env_file_is_honoured() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("elsewhere.toml");
        let env_path = dir.path().join("watchdog.env");
        fs::write(&env_path, format!("AUTOSTOP_CONFIG={}\n", config_path.display())).unwrap();

        assert_eq!(load_dotenv(&env_path).unwrap(), Some(env_path.clone()));
        assert_eq!(resolve_config_path(None), Some(config_path));
    }

    #[test]
    fn test_mixed_case_metric_names_survive_loading() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("autostop.toml");
        fs::write(
            &path,
            r#"
[tracking]
uri = "http://mlflow:5000"

[watch.metric_thresholds]
val_Loss = 0.5
TrainLoss = 1.0
"#,
        )
        .unwrap();

        let config = Config::load_with_env(Some(&path), HashMap::new()).unwrap();
        let thresholds = &config.watch.metric_thresholds;

        assert_eq!(thresholds.get("val_Loss"), Some(0.5));
        assert_eq!(thresholds.get("TrainLoss"), Some(1.0));
        assert_eq!(thresholds.get("val_loss"), None);
        assert_eq!(thresholds.len(), 2);
    }

    #[test]
    fn test_env_override_keeps_written_metric_case() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("autostop.toml");
        fs::write(
            &path,
            "[tracking]\nuri = \"http://mlflow:5000\"\n\n[watch.metric_thresholds]\nTrainLoss = 1.0\n",
        )
        .unwrap();

        let config = Config::load_with_env(
            Some(&path),
            env(&[
                ("AUTOSTOP_WATCH__METRIC_THRESHOLDS__TRAINLOSS", "2.5"),
                ("AUTOSTOP_WATCH__METRIC_THRESHOLDS__GRAD_NORM", "10"),
            ]),
        )
        .unwrap();
        let thresholds = &config.watch.metric_thresholds;

        assert_eq!(thresholds.get("TrainLoss"), Some(2.5));
        assert_eq!(thresholds.get("grad_norm"), Some(10.0));
        assert_eq!(thresholds.len(), 2);
    }

    #[test]
    fn test_mixed_case_metric_names_from_json_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("autostop.json");
        fs::write(
            &path,
            r#"{ "tracking": { "uri": "http://mlflow:5000" }, "watch": { "metric_thresholds": { "valAcc": 0.99 } } }"#,
        )
        .unwrap();

        let config = Config::load_with_env(Some(&path), HashMap::new()).unwrap();

        assert_eq!(config.watch.metric_thresholds.get("valAcc"), Some(0.99));
    }
}
