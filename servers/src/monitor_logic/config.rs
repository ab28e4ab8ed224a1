use clap::Parser;
use feed_core::{ConfigError, ControllerConfig, CoverPolicy, GateTimeline, HttpOptions, ReconnectPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Config file read when `--config-path` is not given.
const DEFAULT_CONFIG_FILE: &str = "feed_monitor.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Console monitor for the live vehicle-detection feed", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "FEED_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "FEED_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "FEED_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "FEED_URL", help = "WebSocket URL of the detection feed.")]
    pub feed_url: Option<String>,

    #[clap(long, env = "FEED_API_URL", help = "Base URL of the REST backend (snapshot and plate corrections).")]
    pub api_url: Option<String>,

    #[clap(long, env = "FEED_API_TOKEN", help = "Bearer token for the REST backend.")]
    pub api_token: Option<String>,

    #[clap(long, env = "FEED_CAPACITY", help = "Number of detections kept in memory.")]
    pub capacity: Option<usize>,

    #[clap(long, env = "FEED_COALESCE_WINDOW_MS", help = "Quiet time in milliseconds before a detection is shown.")]
    pub coalesce_window_ms: Option<u64>,

    #[clap(long, env = "FEED_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds for reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "FEED_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds for reconnect attempts, before jitter.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "FEED_RECONNECT_JITTER_MS", help = "Upper bound of the random jitter added to each reconnect delay.")]
    pub reconnect_jitter_ms: Option<u64>,

    #[clap(long, env = "FEED_RECONNECT_MAX_ATTEMPTS", help = "Give up after this many consecutive failures (default: never).")]
    pub reconnect_max_attempts: Option<u32>,

    #[clap(long, env = "FEED_COVER_POLICY", help = "reveal_once or recover_on_disconnect.")]
    pub cover_policy: Option<String>,

    #[clap(long, env = "FEED_INTRO_MS", help = "Minimum time the cover screen stays up each time it is raised.")]
    pub intro_ms: Option<u64>,

    #[clap(long, env = "FEED_REVEAL_MS", help = "Length of the reveal sequence.")]
    pub reveal_ms: Option<u64>,

    #[clap(long, env = "FEED_HTTP_TIMEOUT_MS", help = "Timeout in milliseconds for REST requests.")]
    pub http_timeout_ms: Option<u64>,

    #[clap(long, env = "FEED_HTTP_RETRIES", help = "Retries for transient REST failures.")]
    pub http_retries: Option<u32>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            feed_url: other.feed_url.or(self.feed_url),
            api_url: other.api_url.or(self.api_url),
            api_token: other.api_token.or(self.api_token),
            capacity: other.capacity.or(self.capacity),
            coalesce_window_ms: other.coalesce_window_ms.or(self.coalesce_window_ms),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            reconnect_jitter_ms: other.reconnect_jitter_ms.or(self.reconnect_jitter_ms),
            reconnect_max_attempts: other.reconnect_max_attempts.or(self.reconnect_max_attempts),
            cover_policy: other.cover_policy.or(self.cover_policy),
            intro_ms: other.intro_ms.or(self.intro_ms),
            reveal_ms: other.reveal_ms.or(self.reveal_ms),
            http_timeout_ms: other.http_timeout_ms.or(self.http_timeout_ms),
            http_retries: other.http_retries.or(self.http_retries),
        }
    }

    fn defaults() -> Config {
        let controller = ControllerConfig::default();
        Config {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            feed_url: Some(controller.feed_url),
            capacity: Some(controller.capacity),
            coalesce_window_ms: Some(controller.coalesce_window_ms),
            reconnect_base_delay_ms: Some(controller.reconnect.base_delay_ms),
            reconnect_max_delay_ms: Some(controller.reconnect.max_delay_ms),
            reconnect_jitter_ms: Some(controller.reconnect.jitter_ms),
            cover_policy: Some("recover_on_disconnect".to_string()),
            // The cover screen's intro runs for about four and a half seconds.
            intro_ms: Some(4500),
            reveal_ms: Some(controller.gate.reveal_ms),
            http_timeout_ms: Some(controller.http.timeout_ms),
            http_retries: Some(controller.http.retries),
            ..Default::default()
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Builds the library configuration from the merged values.
    pub fn to_controller_config(&self) -> Result<ControllerConfig, ConfigError> {
        let base = ControllerConfig::default();
        let cover_policy = match self.cover_policy.as_deref().map(str::trim) {
            None => base.cover_policy,
            Some(raw) => parse_cover_policy(raw)?,
        };

        let config = ControllerConfig {
            feed_url: self.feed_url.clone().unwrap_or(base.feed_url),
            api_url: self.api_url.clone().filter(|u| !u.trim().is_empty()),
            capacity: self.capacity.unwrap_or(base.capacity),
            coalesce_window_ms: self.coalesce_window_ms.unwrap_or(base.coalesce_window_ms),
            reconnect: ReconnectPolicy {
                base_delay_ms: self.reconnect_base_delay_ms.unwrap_or(base.reconnect.base_delay_ms),
                max_delay_ms: self.reconnect_max_delay_ms.unwrap_or(base.reconnect.max_delay_ms),
                jitter_ms: self.reconnect_jitter_ms.unwrap_or(base.reconnect.jitter_ms),
                max_attempts: self.reconnect_max_attempts.or(base.reconnect.max_attempts),
            },
            cover_policy,
            gate: GateTimeline {
                intro_ms: self.intro_ms.unwrap_or(base.gate.intro_ms),
                reveal_ms: self.reveal_ms.unwrap_or(base.gate.reveal_ms),
            },
            http: HttpOptions {
                timeout_ms: self.http_timeout_ms.unwrap_or(base.http.timeout_ms),
                retries: self.http_retries.unwrap_or(base.http.retries),
                auth_token: self.api_token.clone(),
            },
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_cover_policy(raw: &str) -> Result<CoverPolicy, ConfigError> {
    match raw.to_ascii_lowercase().replace('-', "_").as_str() {
        "reveal_once" => Ok(CoverPolicy::RevealOnce),
        "recover_on_disconnect" => Ok(CoverPolicy::RecoverOnDisconnect),
        _ => Err(ConfigError::Invalid {
            field: "cover_policy",
            reason: format!("expected reveal_once or recover_on_disconnect, got {raw}"),
        }),
    }
}

/// Defaults, then the JSON config file, then environment variables and CLI
/// arguments.
pub fn load_config() -> Result<Config, ConfigError> {
    resolve(Config::parse())
}

pub fn resolve(cli: Config) -> Result<Config, ConfigError> {
    let mut current_config = Config::defaults();

    let explicit = cli.config_path.is_some();
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path)?;
        let file_config = serde_json::from_str::<Config>(&config_str).map_err(|source| ConfigError::Parse {
            path: config_file_path.display().to_string(),
            source,
        })?;
        current_config = current_config.merge(file_config);
    } else if explicit {
        return Err(ConfigError::Invalid {
            field: "config_path",
            reason: format!("{} does not exist", config_file_path.display()),
        });
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    // CLI arguments (which include env vars) win over the file.
    Ok(current_config.merge(cli))
}
