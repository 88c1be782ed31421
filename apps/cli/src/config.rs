//! Command-line and file configuration.
//!
//! Settings come from, in order of precedence: flags, `T_*` environment
//! variables, the TOML file and built-in defaults. The file lives at:
//! - Linux: `~/.config/streamup/config.toml`
//! - Windows: `%APPDATA%/streamup/config.toml`
//!
//! Only the account id is ever written back. The API token and the file
//! path are never persisted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use streamup_protocol::constants::{DEFAULT_CHUNK_SIZE, MIB};
use streamup_protocol::{ProtocolError, UploadTarget};
use streamup_transfer::{TransferError, validate_source_file};
use streamup_uploader::{DEFAULT_REQUEST_TIMEOUT, HttpOptions, RetryPolicy};

/// Upload a video to Cloudflare Stream over resumable (tus) uploads.
#[derive(Debug, Clone, Parser)]
#[command(name = "streamup", version)]
pub struct Args {
    /// Cloudflare account id.
    #[arg(long = "acctid", env = "T_ACCTID", value_name = "ID")]
    pub account_id: Option<String>,

    /// API token with Stream edit permission. Never saved.
    #[arg(
        long = "apitoken",
        visible_alias = "token",
        env = "T_APITOKEN",
        hide_env_values = true,
        value_name = "TOKEN"
    )]
    pub api_token: Option<String>,

    /// Video file to upload.
    #[arg(long, env = "T_FILE", value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Chunk size in MiB (5-200).
    #[arg(long = "chunksize", env = "T_CHUNKSIZE", value_name = "MIB")]
    pub chunk_size_mib: Option<u64>,

    /// Upload endpoint, overriding the one derived from the account id.
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Config file path.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Send a SHA-256 checksum with every chunk.
    #[arg(long)]
    pub checksum: bool,

    /// Log progress instead of drawing the terminal display.
    #[arg(long)]
    pub no_tui: bool,

    /// Print the final outcome as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

/// Configuration errors, reported before any network activity.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("no account id: pass --acctid or set T_ACCTID")]
    MissingAccountId,

    #[error("no API token: pass --apitoken or set T_APITOKEN")]
    MissingToken,

    #[error("no file: pass --file or set T_FILE")]
    MissingFile,

    #[error("chunk size of {0} MiB is too large")]
    ChunkSizeOverflow(u64),

    #[error(transparent)]
    Target(#[from] ProtocolError),

    #[error(transparent)]
    Source(#[from] TransferError),
}

/// Persistent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Account id remembered from a previous run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    /// Upload endpoint override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_chunk_size_mib")]
    pub chunk_size_mib: u64,

    /// Timeout for one HTTP request, including a chunk body.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Send `Upload-Checksum` with every chunk.
    #[serde(default)]
    pub checksum: bool,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// `[retry]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_chunk_size_mib() -> u64 {
    DEFAULT_CHUNK_SIZE / MIB
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_max_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_initial_delay_ms() -> u64 {
    RetryPolicy::default().initial_delay.as_millis() as u64
}

fn default_max_delay_ms() -> u64 {
    RetryPolicy::default().max_delay.as_millis() as u64
}

fn default_backoff_factor() -> f64 {
    RetryPolicy::default().backoff_factor
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account_id: None,
            endpoint: None,
            chunk_size_mib: default_chunk_size_mib(),
            request_timeout_secs: default_request_timeout_secs(),
            checksum: false,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_factor: self.backoff_factor,
            max_attempts: self.max_attempts.max(1),
            ..RetryPolicy::default()
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or the defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source: std::io::Error| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_err)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(write_err)?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Everything needed to run one upload.
#[derive(Debug, Clone)]
pub struct Settings {
    pub target: UploadTarget,
    pub retry: RetryPolicy,
    pub http: HttpOptions,
    pub checksum: bool,
    /// The account id came from flags or the environment and is not the
    /// stored one.
    pub account_id_changed: bool,
}

/// Merges flags, environment and file configuration, then validates the
/// result and the source file.
pub fn resolve(args: &Args, config: &Config) -> Result<Settings, ConfigError> {
    let account_id = args
        .account_id
        .as_deref()
        .or(config.account_id.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ConfigError::MissingAccountId)?;
    let token = args
        .api_token
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ConfigError::MissingToken)?;
    let file = args
        .file
        .as_deref()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or(ConfigError::MissingFile)?;

    let chunk_mib = args.chunk_size_mib.unwrap_or(config.chunk_size_mib);
    let chunk_size = chunk_mib
        .checked_mul(MIB)
        .ok_or(ConfigError::ChunkSizeOverflow(chunk_mib))?;

    // Validate the chunk size before touching the file.
    streamup_protocol::ChunkBounds::default().check(chunk_size)?;
    let total_size = validate_source_file(file)?;

    let mut builder = UploadTarget::builder()
        .account_id(account_id)
        .auth_token(token)
        .file_path(file)
        .total_size(total_size)
        .chunk_size(chunk_size);
    if let Some(endpoint) = args.endpoint.as_deref().or(config.endpoint.as_deref()) {
        builder = builder.endpoint(endpoint);
    }
    let target = builder.build()?;

    let account_id_changed = args.account_id.as_deref().map(str::trim).is_some_and(|id| {
        config.account_id.as_deref().map(str::trim) != Some(id)
    });

    Ok(Settings {
        target,
        retry: config.retry.to_policy(),
        http: HttpOptions {
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            ..HttpOptions::default()
        },
        checksum: args.checksum || config.checksum,
        account_id_changed,
    })
}

/// Stores the resolved account id when it differs from the saved one.
pub fn remember_account_id(
    config: &mut Config,
    settings: &Settings,
    path: &Path,
) -> Result<bool, ConfigError> {
    if !settings.account_id_changed {
        return Ok(false);
    }
    config.account_id = Some(settings.target.account_id().to_string());
    config.save_to(path)?;
    tracing::info!(path = %path.display(), "account id saved");
    Ok(true)
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("streamup").join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("streamup")
            .join("config.toml")
    }
}
