//! Configuration for the engine and the `codeius-chat` front end.
//!
//! Settings come from three layers, later ones winning: built-in defaults,
//! an optional YAML file, and command-line flags parsed by `arrrg`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use arrrg_derive::CommandLine;
use serde::{Deserialize, Serialize};

use crate::backend::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
use crate::error::{Error, Result};
use crate::events::DEFAULT_CAPACITY;
use crate::retry::{DEFAULT_BASE_BACKOFF, DEFAULT_MAX_ATTEMPTS, RetryPolicy};
use crate::scroll::DEFAULT_THRESHOLD;

/// Default directory for persisted sessions.
pub const DEFAULT_DATA_DIR: &str = ".codeius";

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "CODEIUS_LOG";

/// Command-line arguments for the codeius-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// YAML configuration file.
    #[arrrg(optional, "YAML config file to load before applying flags", "FILE")]
    pub config: Option<String>,

    /// Backend API root.
    #[arrrg(optional, "Backend API root (default: http://localhost:8080/api/)", "URL")]
    pub backend_url: Option<String>,

    /// Where sessions are stored.
    #[arrrg(optional, "Directory for saved chats (default: .codeius)", "DIR")]
    pub data_dir: Option<String>,

    /// Where `/export` writes by default.
    #[arrrg(optional, "Directory for Markdown exports (default: current dir)", "DIR")]
    pub export_dir: Option<String>,

    /// Request timeout in seconds.
    #[arrrg(optional, "Backend request timeout in seconds (default: 120)", "SECS")]
    pub timeout_secs: Option<u64>,

    /// Attempts for idempotent backend calls.
    #[arrrg(optional, "Attempts for retryable backend calls (default: 4)", "N")]
    pub retries: Option<u32>,

    /// Keep sessions in memory only.
    #[arrrg(flag, "Do not save chats to disk")]
    pub ephemeral: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Resolved engine and front-end settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Backend API root.
    pub backend_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Attempts for idempotent backend calls, including the first.
    pub retry_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub retry_base_ms: u64,
    /// Directory for persisted sessions.
    pub data_dir: PathBuf,
    /// Keep sessions in memory only.
    pub ephemeral: bool,
    /// Directory for Markdown exports.
    pub export_dir: PathBuf,
    /// Pixels from the bottom that still count as "at the bottom".
    pub scroll_threshold: f64,
    /// Events a slow subscriber may fall behind by.
    pub event_capacity: usize,
    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl EngineConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self {
            backend_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            retry_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_ms: DEFAULT_BASE_BACKOFF.as_millis() as u64,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            ephemeral: false,
            export_dir: PathBuf::from("."),
            scroll_threshold: DEFAULT_THRESHOLD,
            event_capacity: DEFAULT_CAPACITY,
            use_color: true,
        }
    }

    /// Loads a YAML file; missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| Error::io(format!("cannot read {}", path.display()), err))?;
        Self::from_yaml_str(&text)
    }

    /// Parses YAML; missing keys keep their defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the config for `args`: defaults, then the file named by
    /// `--config`, then the remaining flags.
    pub fn from_args(args: ChatArgs) -> Result<Self> {
        let base = match &args.config {
            Some(path) => Self::from_yaml_file(Path::new(path))?,
            None => Self::new(),
        };
        let config = base.merge_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would make the engine misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(Error::validation(
                "timeout must be at least one second",
                Some("timeout_secs".to_string()),
            ));
        }
        if !self.scroll_threshold.is_finite() || self.scroll_threshold < 0.0 {
            return Err(Error::validation(
                "scroll threshold must be a non-negative number",
                Some("scroll_threshold".to_string()),
            ));
        }
        url::Url::parse(&self.backend_url)?;
        Ok(())
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry policy for backend calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.retry_attempts)
            .with_base_backoff(Duration::from_millis(self.retry_base_ms))
    }

    /// Sets the backend API root.
    pub fn with_backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = url.into();
        self
    }

    /// Sets the data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Sets the export directory.
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }

    /// Sets the scroll threshold in pixels.
    pub fn with_scroll_threshold(mut self, threshold: f64) -> Self {
        self.scroll_threshold = threshold;
        self
    }

    /// Keeps sessions in memory only.
    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    fn merge_args(mut self, args: ChatArgs) -> Self {
        if let Some(url) = args.backend_url {
            self.backend_url = url;
        }
        if let Some(dir) = args.data_dir {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = args.export_dir {
            self.export_dir = PathBuf::from(dir);
        }
        if let Some(secs) = args.timeout_secs {
            self.timeout_secs = secs;
        }
        if let Some(attempts) = args.retries {
            self.retry_attempts = attempts;
        }
        self.ephemeral |= args.ephemeral;
        if args.no_color {
            self.use_color = false;
        }
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ChatArgs> for EngineConfig {
    /// Applies the flags over the defaults, ignoring `--config`.
    fn from(args: ChatArgs) -> Self {
        EngineConfig::new().merge_args(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EngineConfig::new();
        assert_eq!(config.backend_url, "http://localhost:8080/api/");
        assert_eq!(config.timeout(), Duration::from_secs(120));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.data_dir, PathBuf::from(".codeius"));
        assert_eq!(config.scroll_threshold, 100.0);
        assert!(!config.ephemeral);
        assert!(config.use_color);
        config.validate().unwrap();
    }

    #[test]
    fn config_from_args_custom() {
        let args = ChatArgs {
            backend_url: Some("http://10.0.0.2:8080/api/".to_string()),
            data_dir: Some("/tmp/chats".to_string()),
            timeout_secs: Some(30),
            retries: Some(1),
            no_color: true,
            ephemeral: true,
            ..ChatArgs::default()
        };
        let config = EngineConfig::from(args);
        assert_eq!(config.backend_url, "http://10.0.0.2:8080/api/");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/chats"));
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.retry_policy().max_attempts, 1);
        assert!(config.ephemeral);
        assert!(!config.use_color);
    }

    #[test]
    fn yaml_fills_in_defaults() {
        let config = EngineConfig::from_yaml_str("backend_url: http://example.test/api/\nscroll_threshold: 40\n")
            .unwrap();
        assert_eq!(config.backend_url, "http://example.test/api/");
        assert_eq!(config.scroll_threshold, 40.0);
        assert_eq!(config.retry_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codeius.yaml");
        std::fs::write(&path, "timeout_secs: 10\nuse_color: false\n").unwrap();
        let args = ChatArgs {
            config: Some(path.display().to_string()),
            timeout_secs: Some(20),
            ..ChatArgs::default()
        };
        let config = EngineConfig::from_args(args).unwrap();
        assert_eq!(config.timeout_secs, 20);
        assert!(!config.use_color);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(
            EngineConfig::from_yaml_str("timeout_secs: 0\n")
                .unwrap_err()
                .is_validation()
        );
        assert!(EngineConfig::from_yaml_str("scroll_threshold: -1\n").is_err());
        assert!(EngineConfig::from_yaml_str("backend_url: nope\n").is_err());
        assert!(EngineConfig::from_yaml_str("timeout_secs: [1, 2]\n").is_err());
    }

    #[test]
    fn builder_pattern() {
        let config = EngineConfig::new()
            .with_backend_url("http://127.0.0.1:1/api/")
            .with_data_dir("data")
            .with_export_dir("out")
            .with_scroll_threshold(10.0)
            .ephemeral()
            .without_color();
        assert_eq!(config.export_dir, PathBuf::from("out"));
        assert_eq!(config.scroll_threshold, 10.0);
        assert!(config.ephemeral && !config.use_color);
    }
}
