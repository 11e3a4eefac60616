//! Daemon configuration, loaded from a single JSON file.
//!
//! Every field has a default so a missing file still produces a runnable
//! server. Paths like `logs/` and the rules directory resolve against the
//! process working directory.

use crate::policy::{DirectoryRule, FxpRule, Section};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "amftpd.json";

/// Problems loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid JSON for the schema.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

fn default_bind() -> String {
    "0.0.0.0:2121".to_string()
}

fn default_greeting() -> String {
    crate::server::DEFAULT_GREETING.to_string()
}

fn default_root() -> PathBuf {
    PathBuf::from("site")
}

fn default_passive_ports() -> (u16, u16) {
    (49152, 65534)
}

fn default_idle_timeout_secs() -> u64 {
    30 * 60
}

fn default_ident_timeout_secs() -> u64 {
    5
}

fn default_db_path() -> PathBuf {
    PathBuf::from("amftpd.db")
}

fn default_db_secret() -> String {
    "amftpd".to_string()
}

fn default_wal_compact_bytes() -> u64 {
    crate::users::store::DEFAULT_WAL_COMPACT_BYTES
}

fn default_max_failed_logins() -> u32 {
    5
}

fn default_failure_window_secs() -> u64 {
    600
}

fn default_ban_secs() -> u64 {
    1800
}

fn default_race_recent() -> usize {
    crate::race::DEFAULT_MAX_RECENT
}

fn default_race_max_age_secs() -> u64 {
    24 * 3600
}

fn default_log_file() -> PathBuf {
    PathBuf::from("logs/amftpd.log")
}

fn default_nukes_log() -> PathBuf {
    PathBuf::from("logs/nukes.log")
}

fn default_scripts_file() -> PathBuf {
    PathBuf::from("config/scripts.json")
}

fn default_rules_dir() -> PathBuf {
    PathBuf::from("config/rules")
}

fn default_shutdown_drain_secs() -> u64 {
    10
}

/// TLS certificate material locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsFiles {
    /// PEM certificate chain.
    pub certs_file: PathBuf,
    /// PEM private key.
    pub key_file: PathBuf,
}

/// User store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Snapshot path; WAL and salt live alongside.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Secret the store key is derived from.
    #[serde(default = "default_db_secret")]
    pub secret: String,
    /// WAL size triggering compaction.
    #[serde(default = "default_wal_compact_bytes")]
    pub wal_compact_bytes: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            path: default_db_path(),
            secret: default_db_secret(),
            wal_compact_bytes: default_wal_compact_bytes(),
        }
    }
}

/// Ban policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanConfig {
    /// Failed logins from one address before an auto-ban.
    #[serde(default = "default_max_failed_logins")]
    pub max_failed_logins: u32,
    /// Window the failures are counted over, seconds.
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,
    /// Auto-ban duration, seconds.
    #[serde(default = "default_ban_secs")]
    pub ban_secs: u64,
}

impl Default for BanConfig {
    fn default() -> Self {
        BanConfig {
            max_failed_logins: default_max_failed_logins(),
            failure_window_secs: default_failure_window_secs(),
            ban_secs: default_ban_secs(),
        }
    }
}

/// Race engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceConfig {
    /// Bound of the recent-races list.
    #[serde(default = "default_race_recent")]
    pub max_recent: usize,
    /// Races idle longer than this get aged out, seconds.
    #[serde(default = "default_race_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for RaceConfig {
    fn default() -> Self {
        RaceConfig {
            max_recent: default_race_recent(),
            max_age_secs: default_race_max_age_secs(),
        }
    }
}

/// FXP policy settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FxpConfig {
    /// Ordered rule list; first match wins.
    #[serde(default)]
    pub rules: Vec<FxpRule>,
    /// Administrators bypass the rules.
    #[serde(default)]
    pub exempt_admins: bool,
}

/// The complete daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Control listener address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// 220 banner.
    #[serde(default = "default_greeting")]
    pub greeting: String,
    /// Chroot root of the virtual file system.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Inclusive passive port range `[start, end]`.
    #[serde(default = "default_passive_ports")]
    pub passive_ports: (u16, u16),
    /// TLS material; absent disables AUTH TLS.
    #[serde(default)]
    pub tls: Option<TlsFiles>,
    /// Refuse USER/PASS before AUTH TLS.
    #[serde(default)]
    pub require_tls_for_auth: bool,
    /// Accept anonymous logins.
    #[serde(default)]
    pub allow_anonymous: bool,
    /// Idle timeout default, seconds.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Query identd at login.
    #[serde(default)]
    pub ident_enabled: bool,
    /// Ident query deadline, seconds.
    #[serde(default = "default_ident_timeout_secs")]
    pub ident_timeout_secs: u64,
    /// Refuse logins with zero credits.
    #[serde(default)]
    pub deny_broke_logins: bool,
    /// User store settings.
    #[serde(default)]
    pub db: DbConfig,
    /// Ban policy.
    #[serde(default)]
    pub ban: BanConfig,
    /// Race engine settings.
    #[serde(default)]
    pub race: RaceConfig,
    /// Section definitions.
    #[serde(default)]
    pub sections: Vec<Section>,
    /// Directory rules keyed by virtual-path prefix.
    #[serde(default)]
    pub dir_rules: HashMap<String, DirectoryRule>,
    /// FXP policy.
    #[serde(default)]
    pub fxp: FxpConfig,
    /// Plain-text daemon log.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    /// Nuke audit log.
    #[serde(default = "default_nukes_log")]
    pub nukes_log: PathBuf,
    /// Script wiring description (consumed by the external rules host).
    #[serde(default = "default_scripts_file")]
    pub scripts_file: PathBuf,
    /// Directory of rule files (consumed by the external rules host).
    #[serde(default = "default_rules_dir")]
    pub rules_dir: PathBuf,
    /// Seconds shutdown waits for sessions to drain.
    #[serde(default = "default_shutdown_drain_secs")]
    pub shutdown_drain_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        // An empty JSON object deserializes to all defaults; this cannot
        // fail.
        serde_json::from_str("{}").unwrap_or_else(|_| unreachable!("empty config must deserialize"))
    }
}

impl Config {
    /// Load the configuration from `path`. A missing file yields the
    /// defaults; a present-but-broken file is an error.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(err) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        };
        serde_json::from_str(&contents).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            source: err,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.bind, "0.0.0.0:2121");
        assert_eq!(config.passive_ports, (49152, 65534));
        assert_eq!(config.db.wal_compact_bytes, 5 * 1024 * 1024);
        assert_eq!(config.race.max_recent, 100);
        assert!(config.tls.is_none());
        assert!(!config.allow_anonymous);
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let json = r#"{
            "bind": "127.0.0.1:2121",
            "allow_anonymous": true,
            "sections": [
                {"name": "archive", "virtual_root": "/archive", "ratio_ul_unit": 1, "ratio_dl_unit": 3}
            ],
            "dir_rules": {
                "/archive": {"allow_upload": false}
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.bind, "127.0.0.1:2121");
        assert!(config.allow_anonymous);
        assert_eq!(config.sections.len(), 1);
        assert_eq!(config.sections[0].name, "archive");
        assert_eq!(config.dir_rules["/archive"].allow_upload, Some(false));
        assert_eq!(config.greeting, crate::server::DEFAULT_GREETING);
    }

    #[test]
    fn missing_file_is_defaults_but_garbage_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(Config::load(&missing).is_ok());

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{not json").unwrap();
        assert!(matches!(Config::load(&broken), Err(ConfigError::Parse { .. })));
    }
}
