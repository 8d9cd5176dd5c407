use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LotwError {
    #[error("required file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("malformed ADIF text: {0}")]
    Parse(String),
    #[error("LoTW request failed after retries: {0}")]
    TransientNetwork(String),
    #[error("LoTW credentials missing; set LOTW_USERNAME and LOTW_PASSWORD")]
    Credentials,
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
}
