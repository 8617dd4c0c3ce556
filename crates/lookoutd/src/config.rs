use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
pub const DEFAULT_FRAME_WIDTH: u32 = 640;
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 33;
pub const DEFAULT_HIDDEN_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_CAPTURE_ATTEMPTS: usize = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Visual skin shown while the guard is alarmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disguise {
    #[default]
    Excel,
    Vscode,
    Notion,
    Outlook,
    Canvas,
}

impl Disguise {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disguise::Excel => "excel",
            Disguise::Vscode => "vscode",
            Disguise::Notion => "notion",
            Disguise::Outlook => "outlook",
            Disguise::Canvas => "canvas",
        }
    }
}

impl fmt::Display for Disguise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Disguise {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "excel" => Ok(Disguise::Excel),
            "vscode" => Ok(Disguise::Vscode),
            "notion" => Ok(Disguise::Notion),
            "outlook" => Ok(Disguise::Outlook),
            "canvas" => Ok(Disguise::Canvas),
            other => Err(format!("unknown disguise '{other}'")),
        }
    }
}

/// Raw contents of `config.toml`; every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub camera_device: Option<String>,
    pub frame_width: Option<u32>,
    pub frame_height: Option<u32>,
    pub match_threshold: Option<f32>,
    pub poll_interval_ms: Option<u64>,
    pub throttle_when_hidden: Option<bool>,
    pub hidden_poll_interval_ms: Option<u64>,
    pub capture_attempts: Option<usize>,
    pub auto_clear_secs: Option<u64>,
    pub disguise: Option<Disguise>,
    pub provider_socket: Option<PathBuf>,
    pub fallback_provider_socket: Option<PathBuf>,
}

impl ConfigFile {
    pub fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Read `path`, treating a missing file as empty.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(path, &contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Daemon configuration: defaults, then `config.toml`, then `LOOKOUT_*`.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Euclidean distance below which a face counts as a match.
    pub match_threshold: f32,
    /// Detection tick while the host window is visible (or throttling is off).
    pub poll_interval: Duration,
    /// Stretch the tick to `hidden_poll_interval` while the host window is hidden.
    pub throttle_when_hidden: bool,
    pub hidden_poll_interval: Duration,
    /// Frames to try when a capture finds the camera not ready.
    pub capture_attempts: usize,
    /// Clear an alarm raised from monitoring after this long. `None` disables it.
    pub auto_clear: Option<Duration>,
    pub disguise: Disguise,
    pub provider_socket: PathBuf,
    pub fallback_provider_socket: Option<PathBuf>,
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path();
        let file = ConfigFile::load(&path)?;
        tracing::debug!(path = %path.display(), "config file resolved");
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge `file` with overrides looked up through `env`.
    pub fn resolve(
        file: ConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let match_threshold = env_parse(&env, "LOOKOUT_MATCH_THRESHOLD")
            .or(file.match_threshold)
            .unwrap_or(DEFAULT_MATCH_THRESHOLD);
        if !match_threshold.is_finite() || match_threshold <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "match_threshold",
                message: format!("{match_threshold} must be a positive finite distance"),
            });
        }

        let disguise = match env("LOOKOUT_DISGUISE") {
            Some(v) => v.parse().map_err(|message| ConfigError::Invalid {
                key: "disguise",
                message,
            })?,
            None => file.disguise.unwrap_or_default(),
        };

        let poll_ms = env_parse(&env, "LOOKOUT_POLL_INTERVAL_MS")
            .or(file.poll_interval_ms)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
            .max(1);
        let hidden_ms = env_parse(&env, "LOOKOUT_HIDDEN_POLL_INTERVAL_MS")
            .or(file.hidden_poll_interval_ms)
            .unwrap_or(DEFAULT_HIDDEN_POLL_INTERVAL_MS)
            .max(1);

        Ok(Self {
            camera_device: env("LOOKOUT_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            frame_width: env_parse(&env, "LOOKOUT_FRAME_WIDTH")
                .or(file.frame_width)
                .unwrap_or(DEFAULT_FRAME_WIDTH),
            frame_height: env_parse(&env, "LOOKOUT_FRAME_HEIGHT")
                .or(file.frame_height)
                .unwrap_or(DEFAULT_FRAME_HEIGHT),
            match_threshold,
            poll_interval: Duration::from_millis(poll_ms),
            throttle_when_hidden: env("LOOKOUT_THROTTLE_WHEN_HIDDEN")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .or(file.throttle_when_hidden)
                .unwrap_or(false),
            hidden_poll_interval: Duration::from_millis(hidden_ms),
            capture_attempts: env_parse(&env, "LOOKOUT_CAPTURE_ATTEMPTS")
                .or(file.capture_attempts)
                .unwrap_or(DEFAULT_CAPTURE_ATTEMPTS)
                .max(1),
            auto_clear: env_parse(&env, "LOOKOUT_AUTO_CLEAR_SECS")
                .or(file.auto_clear_secs)
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs),
            disguise,
            provider_socket: env("LOOKOUT_PROVIDER_SOCKET")
                .map(PathBuf::from)
                .or(file.provider_socket)
                .unwrap_or_else(default_provider_socket),
            fallback_provider_socket: env("LOOKOUT_FALLBACK_PROVIDER_SOCKET")
                .map(PathBuf::from)
                .or(file.fallback_provider_socket),
        })
    }
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("LOOKOUT_CONFIG") {
        return PathBuf::from(path);
    }
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("lookout/config.toml")
}

fn default_provider_socket() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("lookout/embedder.sock")
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}
