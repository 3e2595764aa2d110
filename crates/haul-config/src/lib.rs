//! # haul-config
//!
//! Configuration management for haul.
//!
//! Loads configuration from:
//! 1. `--config <path>`, or `~/.haul/config.toml` (global)
//! 2. `./haul.toml` (project-local, overrides global)
//! 3. `HAUL_*` environment variables (highest priority)

pub mod logging;
pub mod schedule;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub use logging::{init_logging, LogLevel};
pub use schedule::Cadence;

/// File name of the project-local config.
pub const PROJECT_CONFIG: &str = "haul.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub local: LocalConfig,
    pub store: StoreConfig,
    pub engine: EngineConfig,
    pub schedule: ScheduleConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load config from standard locations.
    ///
    /// An explicit path replaces the global file and must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::global_config_path() {
                Some(global) if global.exists() => Self::from_file(&global)?,
                _ => Config::default(),
            },
        };

        let project_path = Path::new(PROJECT_CONFIG);
        if project_path.exists() {
            let project = Self::from_file(project_path)?;
            config.merge(project);
        }

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse a single TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.haul/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".haul/config.toml"))
    }

    /// Merge another config on top of this one.
    ///
    /// Only fields that differ from the defaults in `other` are taken, so a
    /// project file can override a single key without restating the rest.
    pub fn merge(&mut self, other: Config) {
        let defaults = Config::default();

        macro_rules! take {
            ($($section:ident . $field:ident),* $(,)?) => {
                $(
                    if other.$section.$field != defaults.$section.$field {
                        self.$section.$field = other.$section.$field;
                    }
                )*
            };
        }

        take!(
            remote.root,
            remote.mount,
            remote.host,
            remote.port,
            remote.username,
            remote.password,
            remote.private_key,
            remote.insecure_known_hosts,
            local.target,
            local.staging,
            store.path,
            engine.concurrency,
            engine.progress_interval_secs,
            engine.granularity,
            engine.overlap,
            schedule.every_secs,
            schedule.cron,
            log.level,
        );
    }

    /// Apply `HAUL_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HAUL_REMOTE_ROOT") {
            self.remote.root = v;
        }
        if let Some(v) = lookup("HAUL_REMOTE_MOUNT") {
            self.remote.mount = PathBuf::from(v);
        }
        if let Some(v) = lookup("HAUL_REMOTE_HOST") {
            self.remote.host = v;
        }
        if let Some(v) = lookup("HAUL_REMOTE_PORT") {
            self.remote.port = parse_value("remote.port", &v)?;
        }
        if let Some(v) = lookup("HAUL_REMOTE_USERNAME") {
            self.remote.username = v;
        }
        if let Some(v) = lookup("HAUL_REMOTE_PASSWORD") {
            self.remote.password = Some(v);
        }
        if let Some(v) = lookup("HAUL_REMOTE_PRIVATE_KEY") {
            self.remote.private_key = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("HAUL_REMOTE_INSECURE_KNOWN_HOSTS") {
            self.remote.insecure_known_hosts = parse_value("remote.insecure_known_hosts", &v)?;
        }
        if let Some(v) = lookup("HAUL_LOCAL_TARGET") {
            self.local.target = PathBuf::from(v);
        }
        if let Some(v) = lookup("HAUL_LOCAL_STAGING") {
            self.local.staging = PathBuf::from(v);
        }
        if let Some(v) = lookup("HAUL_STORE_PATH") {
            self.store.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("HAUL_CONCURRENCY") {
            self.engine.concurrency = parse_value("engine.concurrency", &v)?;
        }
        if let Some(v) = lookup("HAUL_SCHEDULE_EVERY_SECS") {
            self.schedule.every_secs = parse_value("schedule.every_secs", &v)?;
        }
        if let Some(v) = lookup("HAUL_SCHEDULE_CRON") {
            self.schedule.cron = Some(v);
        }
        if let Some(v) = lookup("HAUL_LOG_LEVEL") {
            self.log.level = v.parse().map_err(|reason| ConfigError::Invalid {
                field: "log.level",
                reason,
            })?;
        }
        Ok(())
    }

    /// Check that every required setting is present and sane.
    pub fn validate(&self) -> Result<()> {
        if self.remote.root.trim().is_empty() {
            return Err(ConfigError::Missing("remote.root"));
        }
        if self.remote.uses_sftp() {
            if self.remote.port == 0 {
                return Err(ConfigError::Invalid {
                    field: "remote.port",
                    reason: "must be greater than zero".to_string(),
                });
            }
            if self.remote.username.trim().is_empty() {
                return Err(ConfigError::Missing("remote.username"));
            }
            if self.remote.password.is_none() && self.remote.private_key.is_none() {
                return Err(ConfigError::Missing("remote.password"));
            }
        } else if self.remote.mount.as_os_str().is_empty() {
            return Err(ConfigError::Missing("remote.mount"));
        }
        if self.local.target.as_os_str().is_empty() {
            return Err(ConfigError::Missing("local.target"));
        }
        if self.local.staging.as_os_str().is_empty() {
            return Err(ConfigError::Missing("local.staging"));
        }
        if self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::Missing("store.path"));
        }
        if self.engine.concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "engine.concurrency",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.engine.progress_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "engine.progress_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        self.schedule.cadence()?;
        if self.local.target == self.local.staging {
            return Err(ConfigError::Invalid {
                field: "local.staging",
                reason: "must differ from local.target".to_string(),
            });
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        // Serializing plain structs of strings and integers cannot fail.
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

fn parse_value<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        field,
        reason: e.to_string(),
    })
}

/// Remote side of the mirror
///
/// Either `mount` or `host` selects the transport. With a host set, haul
/// talks SFTP itself and `mount` is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Remote root whose top level is enumerated each run
    pub root: String,
    /// Local mount point of the remote filesystem (sshfs, NFS, SMB)
    pub mount: PathBuf,
    /// SSH server for the SFTP transport
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Login password, or the passphrase of `private_key`
    pub password: Option<String>,
    pub private_key: Option<PathBuf>,
    /// Accept any server key instead of checking `~/.ssh/known_hosts`
    pub insecure_known_hosts: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            root: String::new(),
            mount: PathBuf::new(),
            host: String::new(),
            port: 22,
            username: String::new(),
            password: None,
            private_key: None,
            insecure_known_hosts: false,
        }
    }
}

impl RemoteConfig {
    pub fn uses_sftp(&self) -> bool {
        !self.host.trim().is_empty()
    }
}

/// Local destinations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Completed entries end up here
    pub target: PathBuf,
    /// In-progress transfers; must share a filesystem with `target`
    pub staging: PathBuf,
}

/// Completion store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// LMDB environment directory
    pub path: PathBuf,
}

/// Retrieval engine tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum simultaneous top-level transfers
    pub concurrency: usize,
    /// Seconds between progress events for a running transfer
    pub progress_interval_secs: u64,
    pub granularity: DedupGranularity,
    pub overlap: OverlapPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            progress_interval_secs: 5,
            granularity: DedupGranularity::default(),
            overlap: OverlapPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}

/// Scheduler cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub every_secs: u64,
    /// Cron expression; replaces `every_secs` when set
    pub cron: Option<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            every_secs: 3600,
            cron: None,
        }
    }
}

impl ScheduleConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.every_secs)
    }

    pub fn cadence(&self) -> Result<Cadence> {
        match self.cron.as_deref() {
            Some(expr) => Cadence::cron(expr),
            None if self.every_secs == 0 => Err(ConfigError::Invalid {
                field: "schedule.every_secs",
                reason: "must be greater than zero".to_string(),
            }),
            None => Ok(Cadence::Every(self.period())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
}

/// What a completion record covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupGranularity {
    /// One record per top-level entry; a directory is one unit of work.
    #[default]
    PerEntry,
    /// Additionally record every file nested under a directory entry, so a
    /// failed directory resumes instead of starting over.
    PerLeaf,
}

/// What a run does when the previous one is still active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlapPolicy {
    #[default]
    Skip,
    Queue,
}
