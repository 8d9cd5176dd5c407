use crate::lotw::config::LotwConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LotwPaths {
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
    pub snapshot_file: PathBuf,
    pub audit_log: PathBuf,
}

impl LotwPaths {
    pub fn under(data_dir: &Path, log_file: &str, snapshot_file: &str) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            log_file: data_dir.join(log_file),
            snapshot_file: data_dir.join(snapshot_file),
            audit_log: data_dir.join("audit.log"),
        }
    }
}

pub fn resolve_paths(cfg: &LotwConfig) -> Result<LotwPaths> {
    let configured = PathBuf::from(cfg.storage.data_dir.trim());
    let data_dir = if configured.is_absolute() {
        configured
    } else {
        std::env::current_dir()
            .context("failed to resolve current directory")?
            .join(configured)
    };
    Ok(LotwPaths::under(
        &data_dir,
        &cfg.storage.log_file,
        &cfg.storage.snapshot_file,
    ))
}
