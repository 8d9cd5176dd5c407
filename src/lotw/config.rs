use crate::error::LotwError;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LotwServiceConfig {
    pub url: String,
    pub qso_begin_date: String,
    pub query_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for LotwServiceConfig {
    fn default() -> Self {
        Self {
            url: "https://lotw.arrl.org/lotwuser/lotwreport.adi".to_string(),
            qso_begin_date: "2018-01-01".to_string(),
            query_timeout_secs: 60,
            max_retries: 3,
            retry_base_delay_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    pub log_file: String,
    pub snapshot_file: String,
    pub backup_enabled: bool,
    pub keep_backup: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./local-data".to_string(),
            log_file: "lotwQso.adif".to_string(),
            snapshot_file: "lotwDxcc.json".to_string(),
            backup_enabled: true,
            keep_backup: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Minimum minutes between two updates; 0 or less disables the check.
    pub min_interval_mins: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LotwConfig {
    pub lotw: LotwServiceConfig,
    pub storage: StorageConfig,
    pub update: UpdateConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PartialLotwConfig {
    lotw: Option<LotwServiceConfig>,
    storage: Option<StorageConfig>,
    update: Option<UpdateConfig>,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_i64(var: &str, fallback: i64) -> i64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<i64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn validate(cfg: &LotwConfig) -> Result<()> {
    if cfg.lotw.url.trim().is_empty() {
        return Err(anyhow!("invalid LoTW url: cannot be empty"));
    }
    if cfg.lotw.query_timeout_secs == 0 {
        return Err(anyhow!("invalid query timeout: must be >= 1 second"));
    }
    if cfg.lotw.max_retries == 0 {
        return Err(anyhow!("invalid max retries: must be >= 1 attempt"));
    }
    if cfg.storage.log_file.trim().is_empty() || cfg.storage.snapshot_file.trim().is_empty() {
        return Err(anyhow!("invalid storage file names: cannot be empty"));
    }
    if cfg.storage.log_file == cfg.storage.snapshot_file {
        return Err(anyhow!(
            "invalid storage file names: log and snapshot must differ"
        ));
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("LOTW_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".lotw-dxcc").join("config.toml"))
}

fn merge_file_config(base: &mut LotwConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)
        .map_err(|err| LotwError::InvalidConfig(format!("{}: {err}", path.display())))?;
    let parsed: PartialLotwConfig = toml::from_str(&raw)
        .map_err(|err| LotwError::InvalidConfig(format!("{}: {err}", path.display())))?;
    if let Some(lotw) = parsed.lotw {
        base.lotw = lotw;
    }
    if let Some(storage) = parsed.storage {
        base.storage = storage;
    }
    if let Some(update) = parsed.update {
        base.update = update;
    }
    Ok(())
}

pub fn load_config() -> Result<LotwConfig> {
    let mut cfg = LotwConfig::default();
    merge_file_config(&mut cfg)?;

    cfg.lotw.url = env_or_string("LOTW_URL", &cfg.lotw.url);
    cfg.lotw.qso_begin_date = env_or_string("LOTW_QSO_BEGIN_DATE", &cfg.lotw.qso_begin_date);
    cfg.lotw.query_timeout_secs =
        env_or_u64("LOTW_QUERY_TIMEOUT_SECS", cfg.lotw.query_timeout_secs);
    cfg.lotw.max_retries =
        env_or_u64("LOTW_MAX_RETRIES", u64::from(cfg.lotw.max_retries)).min(u64::from(u32::MAX))
            as u32;
    cfg.lotw.retry_base_delay_ms =
        env_or_u64("LOTW_RETRY_BASE_DELAY_MS", cfg.lotw.retry_base_delay_ms);
    cfg.storage.data_dir = env_or_string("LOTW_DATA_DIR", &cfg.storage.data_dir);
    cfg.storage.log_file = env_or_string("LOTW_LOG_FILE", &cfg.storage.log_file);
    cfg.storage.snapshot_file = env_or_string("LOTW_SNAPSHOT_FILE", &cfg.storage.snapshot_file);
    cfg.storage.backup_enabled = env_or_bool("LOTW_BACKUP_ENABLED", cfg.storage.backup_enabled);
    cfg.storage.keep_backup = env_or_bool("LOTW_KEEP_BACKUP", cfg.storage.keep_backup);
    cfg.update.min_interval_mins =
        env_or_i64("LOTW_MIN_UPDATE_INTERVAL_MINS", cfg.update.min_interval_mins);

    validate(&cfg)?;
    Ok(cfg)
}

/// Credentials are only required once something must be fetched.
pub fn load_credentials() -> Result<Credentials, LotwError> {
    let username = env::var("LOTW_USERNAME").unwrap_or_default();
    let password = env::var("LOTW_PASSWORD").unwrap_or_default();
    if username.trim().is_empty() || password.is_empty() {
        return Err(LotwError::Credentials);
    }
    Ok(Credentials {
        username: username.trim().to_string(),
        password,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = LotwConfig::default();
        assert!(validate(&cfg).is_ok());
        assert!(cfg.storage.backup_enabled);
        assert!(!cfg.storage.keep_backup);
        assert_eq!(cfg.update.min_interval_mins, 0);
    }

    #[test]
    fn partial_file_sections_fill_missing_keys_with_defaults() {
        let parsed: PartialLotwConfig = toml::from_str(
            "[storage]\nkeep_backup = true\n\n[update]\nmin_interval_mins = 60\n",
        )
        .expect("parse");
        let storage = parsed.storage.expect("storage");
        assert!(storage.keep_backup);
        assert_eq!(storage.log_file, "lotwQso.adif");
        assert_eq!(parsed.update.expect("update").min_interval_mins, 60);
        assert!(parsed.lotw.is_none());
    }

    #[test]
    fn validate_rejects_colliding_file_names() {
        let mut cfg = LotwConfig::default();
        cfg.storage.snapshot_file = cfg.storage.log_file.clone();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn validate_rejects_zero_retries() {
        let mut cfg = LotwConfig::default();
        cfg.lotw.max_retries = 0;
        assert!(validate(&cfg).is_err());
    }
}
