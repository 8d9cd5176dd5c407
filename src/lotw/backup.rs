//! Single-slot backups of the authoritative log around each mutation.
//!
//! A backup is a plain copy named `{stem}_{epoch_ms}.bak{.ext}` next to the
//! original. Only the newest one survives creation of another.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupPolicy {
    pub enabled: bool,
    /// Keep the backup after a successful run instead of deleting it.
    pub keep: bool,
}

fn stem_and_ext(original: &Path) -> (String, String) {
    let stem = original
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("log")
        .to_string();
    let ext = original
        .extension()
        .and_then(|s| s.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    (stem, ext)
}

pub fn backup_path_for(original: &Path, stamp_ms: u128) -> PathBuf {
    let (stem, ext) = stem_and_ext(original);
    let name = format!("{stem}_{stamp_ms}.bak{ext}");
    match original.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

fn is_backup_name(original: &Path, candidate: &str) -> bool {
    let (stem, ext) = stem_and_ext(original);
    let Some(rest) = candidate.strip_prefix(&format!("{stem}_")) else {
        return false;
    };
    let Some(digits) = rest.strip_suffix(&format!(".bak{ext}")) else {
        return false;
    };
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// All backups of `original`, newest first.
pub fn list_backups(original: &Path) -> Result<Vec<PathBuf>> {
    let dir = match original.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !path.is_file() || !is_backup_name(original, name) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(UNIX_EPOCH);
        found.push((modified, path));
    }

    found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    Ok(found.into_iter().map(|(_, p)| p).collect())
}

fn prune_old_backups(original: &Path) {
    let backups = match list_backups(original) {
        Ok(list) => list,
        Err(err) => {
            warn!(file = %original.display(), "failed to list old backups: {err:#}");
            return;
        }
    };
    for stale in backups.iter().skip(1) {
        match fs::remove_file(stale) {
            Ok(()) => debug!(backup = %stale.display(), "deleted old backup"),
            Err(err) => warn!(backup = %stale.display(), "failed to delete old backup: {err}"),
        }
    }
}

/// Copy `original` into a fresh backup slot. Returns `None` when backups
/// are disabled or there is nothing to back up yet.
pub fn create_backup(original: &Path, policy: BackupPolicy) -> Result<Option<PathBuf>> {
    if !policy.enabled {
        debug!(file = %original.display(), "backups disabled, skipping");
        return Ok(None);
    }
    if !original.exists() {
        debug!(file = %original.display(), "no file yet, skipping backup");
        return Ok(None);
    }

    let stamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before UNIX_EPOCH")?
        .as_millis();
    let backup = backup_path_for(original, stamp_ms);
    fs::copy(original, &backup).with_context(|| {
        format!(
            "failed to copy {} to {}",
            original.display(),
            backup.display()
        )
    })?;
    info!(backup = %backup.display(), "backup created");

    prune_old_backups(original);
    Ok(Some(backup))
}

/// Copy `backup` over `original`, then delete the backup.
pub fn restore_backup(backup: &Path, original: &Path) -> Result<()> {
    if !backup.exists() {
        anyhow::bail!("backup file not found: {}", backup.display());
    }
    fs::copy(backup, original).with_context(|| {
        format!(
            "failed to restore {} from {}",
            original.display(),
            backup.display()
        )
    })?;
    fs::remove_file(backup)
        .with_context(|| format!("failed to delete {}", backup.display()))?;
    info!(file = %original.display(), backup = %backup.display(), "backup restored");
    Ok(())
}

/// Scoped protection for one mutation of `original`. Dropping an unresolved
/// guard (for instance while unwinding) restores the backup.
#[derive(Debug)]
pub struct BackupGuard {
    original: PathBuf,
    backup: Option<PathBuf>,
    existed_before: bool,
    keep: bool,
    resolved: bool,
}

impl BackupGuard {
    pub fn acquire(original: &Path, policy: BackupPolicy) -> Result<Self> {
        let existed_before = original.exists();
        let backup = create_backup(original, policy)?;
        Ok(Self {
            original: original.to_path_buf(),
            backup,
            existed_before,
            keep: policy.keep,
            resolved: false,
        })
    }

    pub fn backup_path(&self) -> Option<&Path> {
        self.backup.as_deref()
    }

    /// Success path. Returns the retained backup, if any.
    pub fn commit(mut self) -> Option<PathBuf> {
        self.resolved = true;
        let backup = self.backup.take()?;
        if self.keep {
            info!(backup = %backup.display(), "keeping backup");
            return Some(backup);
        }
        match fs::remove_file(&backup) {
            Ok(()) => debug!(backup = %backup.display(), "deleted backup after success"),
            Err(err) => warn!(backup = %backup.display(), "failed to delete backup: {err}"),
        }
        None
    }

    /// Failure path: put the pre-mutation file back.
    pub fn restore(mut self) -> Result<()> {
        self.resolved = true;
        self.rollback()
    }

    fn rollback(&mut self) -> Result<()> {
        if let Some(backup) = self.backup.take() {
            return restore_backup(&backup, &self.original);
        }
        if !self.existed_before && self.original.exists() {
            fs::remove_file(&self.original).with_context(|| {
                format!("failed to remove partial {}", self.original.display())
            })?;
            info!(file = %self.original.display(), "removed file created by failed run");
            return Ok(());
        }
        if self.existed_before {
            warn!(file = %self.original.display(), "no backup taken; cannot roll back");
        }
        Ok(())
    }
}

impl Drop for BackupGuard {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        if let Err(err) = self.rollback() {
            warn!(file = %self.original.display(), "rollback on drop failed: {err:#}");
        }
    }
}

/// Run `mutate` under a backup of `original`: restore and rethrow on
/// error, commit on success.
pub fn guarded<T>(
    original: &Path,
    policy: BackupPolicy,
    mutate: impl FnOnce(&BackupGuard) -> Result<T>,
) -> Result<T> {
    let guard = BackupGuard::acquire(original, policy)?;
    match mutate(&guard) {
        Ok(value) => {
            guard.commit();
            Ok(value)
        }
        Err(err) => {
            if let Err(restore_err) = guard.restore() {
                return Err(err.context(format!("rollback also failed: {restore_err:#}")));
            }
            Err(err.context(format!("changes to {} rolled back", original.display())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lotw::util::write_atomic;
    use std::thread;
    use std::time::Duration;

    const ON: BackupPolicy = BackupPolicy {
        enabled: true,
        keep: false,
    };

    fn backups_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.contains(".bak"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn backup_names_follow_stem_stamp_ext() {
        let path = backup_path_for(Path::new("/data/lotwQso.adif"), 1_700_000_000_123);
        assert_eq!(path, PathBuf::from("/data/lotwQso_1700000000123.bak.adif"));
        let original = Path::new("/data/lotwQso.adif");
        assert!(is_backup_name(original, "lotwQso_1.bak.adif"));
        assert!(!is_backup_name(original, "lotwQso_.bak.adif"));
        assert!(!is_backup_name(original, "lotwQso_12.bak.json"));
        assert!(!is_backup_name(original, "other_12.bak.adif"));
    }

    #[test]
    fn skipped_when_disabled_or_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("log.adif");
        assert_eq!(create_backup(&log, ON).unwrap(), None);
        fs::write(&log, "x").unwrap();
        let off = BackupPolicy {
            enabled: false,
            keep: false,
        };
        assert_eq!(create_backup(&log, off).unwrap(), None);
        assert!(backups_in(tmp.path()).is_empty());
    }

    #[test]
    fn only_the_newest_backup_is_retained() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("log.adif");
        fs::write(&log, "v1").unwrap();
        let first = create_backup(&log, ON).unwrap().unwrap();
        thread::sleep(Duration::from_millis(20));
        fs::write(&log, "v2").unwrap();
        let second = create_backup(&log, ON).unwrap().unwrap();

        assert!(!first.exists());
        assert_eq!(fs::read_to_string(&second).unwrap(), "v2");
        assert_eq!(backups_in(tmp.path()).len(), 1);
    }

    #[test]
    fn unrelated_files_survive_pruning() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("log.adif");
        fs::write(&log, "v1").unwrap();
        fs::write(tmp.path().join("log_123.bak.json"), "other").unwrap();
        fs::write(tmp.path().join("notes_1.bak.adif"), "other").unwrap();
        create_backup(&log, ON).unwrap().unwrap();
        assert_eq!(backups_in(tmp.path()).len(), 3);
    }

    #[test]
    fn failing_mutation_restores_original_bytes_and_removes_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("log.adif");
        let l0 = b"<eoh>\n<CALL:3>K1A<eor>\n<APP_LoTW_EOF>\n".to_vec();
        fs::write(&log, &l0).unwrap();

        let result: Result<()> = guarded(&log, ON, |guard| {
            assert!(guard.backup_path().is_some());
            fs::write(&log, b"<eoh>\n<CALL:3>K2")?;
            anyhow::bail!("simulated crash mid-write")
        });

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("simulated crash mid-write"));
        assert_eq!(fs::read(&log).unwrap(), l0);
        assert!(backups_in(tmp.path()).is_empty());
    }

    #[test]
    fn success_deletes_or_keeps_backup_per_policy() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("log.adif");
        fs::write(&log, "v1").unwrap();

        guarded(&log, ON, |_| write_atomic(&log, b"v2")).unwrap();
        assert!(backups_in(tmp.path()).is_empty());

        let keep = BackupPolicy {
            enabled: true,
            keep: true,
        };
        guarded(&log, keep, |_| write_atomic(&log, b"v3")).unwrap();
        let left = backups_in(tmp.path());
        assert_eq!(left.len(), 1);
        assert_eq!(fs::read_to_string(tmp.path().join(&left[0])).unwrap(), "v2");
        assert_eq!(fs::read_to_string(&log).unwrap(), "v3");
    }

    #[test]
    fn failed_first_write_removes_the_new_file() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("log.adif");
        let result: Result<()> = guarded(&log, ON, |_| {
            fs::write(&log, "partial")?;
            anyhow::bail!("boom")
        });
        assert!(result.is_err());
        assert!(!log.exists());
    }

    #[test]
    fn dropped_guard_rolls_back() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("log.adif");
        fs::write(&log, "before").unwrap();
        {
            let _guard = BackupGuard::acquire(&log, ON).unwrap();
            fs::write(&log, "half").unwrap();
        }
        assert_eq!(fs::read_to_string(&log).unwrap(), "before");
        assert!(backups_in(tmp.path()).is_empty());
    }
}
