//! `.env` discovery. LoTW credentials usually live next to the config file
//! rather than in the working directory, so every candidate is loaded and
//! the first file to set a variable wins.

use std::env;
use std::path::{Path, PathBuf};

fn dotenv_candidates(
    cwd: Option<&Path>,
    config_path: Option<&Path>,
    home: Option<&Path>,
) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(cwd) = cwd {
        out.push(cwd.join(".env"));
    }
    if let Some(dir) = config_path.and_then(Path::parent) {
        out.push(dir.join(".env"));
    }
    if let Some(home) = home {
        out.push(home.join(".lotw-dxcc").join(".env"));
    }
    out.dedup();
    out
}

/// Loads each existing file in order. Variables already set are kept.
fn load_files(paths: &[PathBuf]) -> usize {
    paths
        .iter()
        .filter(|path| path.is_file())
        .filter(|path| dotenvy::from_path(path).is_ok())
        .count()
}

pub fn load_dotenv() {
    let config_path = env::var_os("LOTW_CONFIG_PATH").map(PathBuf::from);
    let candidates = dotenv_candidates(
        env::current_dir().ok().as_deref(),
        config_path.as_deref(),
        dirs::home_dir().as_deref(),
    );
    load_files(&candidates);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn candidates_run_from_cwd_to_config_dir_to_home() {
        let got = dotenv_candidates(
            Some(Path::new("/work")),
            Some(Path::new("/etc/lotw/config.toml")),
            Some(Path::new("/home/op")),
        );
        assert_eq!(
            got,
            vec![
                PathBuf::from("/work/.env"),
                PathBuf::from("/etc/lotw/.env"),
                PathBuf::from("/home/op/.lotw-dxcc/.env"),
            ]
        );
    }

    #[test]
    fn config_beside_home_file_is_listed_once() {
        let got = dotenv_candidates(
            None,
            Some(Path::new("/home/op/.lotw-dxcc/config.toml")),
            Some(Path::new("/home/op")),
        );
        assert_eq!(got, vec![PathBuf::from("/home/op/.lotw-dxcc/.env")]);
    }

    #[test]
    fn earlier_file_wins_and_missing_files_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let first = tmp.path().join("first.env");
        let second = tmp.path().join("second.env");
        fs::write(&first, "DXCC_ENV_LOADER_CALLSIGN=K1ABC\n").unwrap();
        fs::write(
            &second,
            "DXCC_ENV_LOADER_CALLSIGN=JA1XYZ\nDXCC_ENV_LOADER_GRID=FN42\n",
        )
        .unwrap();

        let loaded = load_files(&[first, tmp.path().join("absent.env"), second]);
        assert_eq!(loaded, 2);
        assert_eq!(env::var("DXCC_ENV_LOADER_CALLSIGN").unwrap(), "K1ABC");
        assert_eq!(env::var("DXCC_ENV_LOADER_GRID").unwrap(), "FN42");
    }
}
