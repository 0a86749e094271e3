use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A file seen in the watch directory during one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingFile {
    pub path: PathBuf,
    pub name: String,
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create dir {}", path.display()))?;
    Ok(())
}

/// Regular files directly inside `dir`; subdirectories and other entries are skipped.
pub fn list_recordings(dir: &Path) -> Result<Vec<RecordingFile>> {
    let entries = fs::read_dir(dir).with_context(|| format!("list dir {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(
                    dir = %dir.display(),
                    error = %err,
                    "unreadable dir entry, skipping"
                );
                continue;
            }
        };
        let path = entry.path();
        // follows symlinks, like a plain isfile check
        let is_file = fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        files.push(RecordingFile {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
        });
    }
    Ok(files)
}

/// Moves `file` into `finished_dir` under the same name, replacing an existing file there.
///
/// An existing file in `finished_dir` is only replaced once the new one is
/// complete; a failed move leaves it as it was.
pub fn relocate(file: &RecordingFile, finished_dir: &Path) -> Result<PathBuf> {
    let file_name = file
        .path
        .file_name()
        .with_context(|| format!("no filename in {}", file.path.display()))?;
    let target = finished_dir.join(file_name);
    if target.is_file() {
        tracing::warn!(target = %target.display(), "replacing existing file in finished dir");
    }
    match rename_over(&file.path, &target) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            let partial = finished_dir.join(format!(".{}.partial", file_name.to_string_lossy()));
            fs::copy(&file.path, &partial).with_context(|| {
                format!("copy {} to {}", file.path.display(), partial.display())
            })?;
            if let Err(err) = rename_over(&partial, &target) {
                let _ = fs::remove_file(&partial);
                return Err(err).with_context(|| {
                    format!("move {} to {}", partial.display(), target.display())
                });
            }
            fs::remove_file(&file.path)
                .with_context(|| format!("remove moved {}", file.path.display()))?;
        }
        Err(err) => {
            return Err(err).with_context(|| {
                format!("move {} to {}", file.path.display(), target.display())
            });
        }
    }
    Ok(target)
}

#[cfg(not(windows))]
fn rename_over(from: &Path, to: &Path) -> io::Result<()> {
    fs::rename(from, to)
}

/// Windows refuses to rename onto an existing file.
#[cfg(windows)]
fn rename_over(from: &Path, to: &Path) -> io::Result<()> {
    fs::metadata(from)?;
    if to.is_file() {
        fs::remove_file(to)?;
    }
    fs::rename(from, to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lists_only_regular_files() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("101-a.mov"), b"a")?;
        fs::write(dir.path().join("notes.txt"), b"b")?;
        ensure_dir(&dir.path().join("finished"))?;
        ensure_dir(&dir.path().join("202-dir.mov"))?;

        let mut names: Vec<_> = list_recordings(dir.path())?
            .into_iter()
            .map(|f| f.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["101-a.mov", "notes.txt"]);
        Ok(())
    }

    #[test]
    fn listing_does_not_recurse() -> Result<()> {
        let dir = tempdir()?;
        let nested = dir.path().join("finished");
        ensure_dir(&nested)?;
        fs::write(nested.join("101.mov"), b"done")?;
        assert!(list_recordings(dir.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn relocate_keeps_name() -> Result<()> {
        let dir = tempdir()?;
        let finished = dir.path().join("finished");
        ensure_dir(&finished)?;
        let path = dir.path().join("101-interview.mov");
        fs::write(&path, b"video")?;
        let file = RecordingFile {
            path: path.clone(),
            name: "101-interview.mov".to_string(),
        };

        let target = relocate(&file, &finished)?;
        assert_eq!(target, finished.join("101-interview.mov"));
        assert!(!path.exists());
        assert_eq!(fs::read(&target)?, b"video");
        Ok(())
    }

    #[test]
    fn relocate_overwrites_existing() -> Result<()> {
        let dir = tempdir()?;
        let finished = dir.path().join("finished");
        ensure_dir(&finished)?;
        fs::write(finished.join("101.mov"), b"old")?;
        let path = dir.path().join("101.mov");
        fs::write(&path, b"new")?;
        let file = RecordingFile {
            path,
            name: "101.mov".to_string(),
        };

        relocate(&file, &finished)?;
        assert_eq!(fs::read(finished.join("101.mov"))?, b"new");
        Ok(())
    }

    #[test]
    fn failed_relocate_keeps_previous_finished_copy() -> Result<()> {
        let dir = tempdir()?;
        let finished = dir.path().join("finished");
        ensure_dir(&finished)?;
        fs::write(finished.join("101.mov"), b"good copy")?;
        let file = RecordingFile {
            path: dir.path().join("101.mov"),
            name: "101.mov".to_string(),
        };

        assert!(relocate(&file, &finished).is_err());
        assert_eq!(fs::read(finished.join("101.mov"))?, b"good copy");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn listing_skips_entries_it_cannot_stat() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("101.mov"), b"a")?;
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("202.mov"))?;

        let names: Vec<_> = list_recordings(dir.path())?
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["101.mov"]);
        Ok(())
    }

    #[test]
    fn relocate_missing_source_fails() -> Result<()> {
        let dir = tempdir()?;
        let file = RecordingFile {
            path: dir.path().join("gone.mov"),
            name: "gone.mov".to_string(),
        };
        assert!(relocate(&file, dir.path()).is_err());
        Ok(())
    }
}
