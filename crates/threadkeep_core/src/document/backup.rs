//! Numbered backups of local document files
//!
//! `settings.json` is backed up as `settings (1).json`, `settings (2).json`,
//! ... always one past the highest suffix already on disk.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::{CoreError, Result};

/// Split `settings.json` into (`settings`, `.json`)
fn stem_and_extension(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, extension)
}

/// The numeric suffix of `file_name` if it is a backup of `stem`/`extension`
fn backup_suffix(file_name: &str, stem: &str, extension: &str) -> Option<u32> {
    file_name
        .strip_prefix(stem)?
        .strip_suffix(extension)?
        .strip_prefix(" (")?
        .strip_suffix(')')?
        .parse()
        .ok()
}

/// Next unused backup path for `path`
pub async fn next_backup_path(path: &Path) -> Result<PathBuf> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let (stem, extension) = stem_and_extension(path);

    let mut highest = 0;
    let mut entries = tokio::fs::read_dir(&dir)
        .await
        .map_err(|e| CoreError::io("list backups", &dir, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CoreError::io("list backups", &dir, e))?
    {
        let name = entry.file_name();
        if let Some(n) = backup_suffix(&name.to_string_lossy(), &stem, &extension) {
            highest = highest.max(n);
        }
    }

    let mut n = highest + 1;
    loop {
        let candidate = dir.join(format!("{stem} ({n}){extension}"));
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Rename `path` to its next backup name. Returns `None` if there was no file.
pub async fn backup_file(path: &Path) -> Result<Option<PathBuf>> {
    if !tokio::fs::try_exists(path)
        .await
        .map_err(|e| CoreError::io("check document", path, e))?
    {
        return Ok(None);
    }
    let backup = next_backup_path(path).await?;
    tokio::fs::rename(path, &backup)
        .await
        .map_err(|e| CoreError::io("back up document", path, e))?;
    info!(
        path = %path.display(),
        backup = %backup.display(),
        "backed up local document"
    );
    Ok(Some(backup))
}
