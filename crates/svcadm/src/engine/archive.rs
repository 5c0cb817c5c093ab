//! Extraction of tar streams copied out of containers

use super::EngineError;
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::debug;

/// Unpack regular files and directories from `reader` below `dest`,
/// preserving their modes. Any other entry type is rejected.
///
/// Returns the paths that were written.
pub fn extract_archive<R: Read>(reader: R, dest: &Path) -> Result<Vec<PathBuf>, EngineError> {
    fs::create_dir_all(dest)?;

    let mut archive = Archive::new(reader);
    let mut written = Vec::new();

    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        let path = entry.path()?.to_path_buf();
        let dest_path = dest.join(sanitize(&path)?);
        let mode = entry.header().mode().ok();

        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                fs::create_dir_all(&dest_path)?;
            }
            tar::EntryType::Regular | tar::EntryType::Continuous => {
                if let Some(parent) = dest_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut file = File::create(&dest_path)?;
                io::copy(&mut entry, &mut file)?;
            }
            other => {
                return Err(EngineError::UnsupportedTarEntry {
                    path: path.display().to_string(),
                    kind: format!("{other:?}"),
                });
            }
        }

        if let Some(mode) = mode {
            fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode))?;
        }
        debug!("Extracted {}", dest_path.display());
        written.push(dest_path);
    }

    Ok(written)
}

/// Strip root and reject parent components so entries stay inside `dest`.
fn sanitize(path: &Path) -> Result<PathBuf, EngineError> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(EngineError::UnsupportedTarEntry {
                    path: path.display().to_string(),
                    kind: "path escaping destination".to_string(),
                });
            }
        }
    }
    Ok(clean)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tar_with(entries: &[(&str, tar::EntryType, &[u8], u32)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, kind, content, mode) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_path(path).unwrap();
            header.set_entry_type(*kind);
            header.set_size(content.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder.append(&header, *content).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_extracts_files_and_directories_with_modes() {
        let dir = tempfile::tempdir().unwrap();
        let data = tar_with(&[
            ("backups", tar::EntryType::Directory, b"", 0o750),
            (
                "backups/2024-01-02-03-04-05.tar.gz",
                tar::EntryType::Regular,
                b"archive",
                0o600,
            ),
        ]);

        let written = extract_archive(data.as_slice(), dir.path()).unwrap();
        assert_eq!(written.len(), 2);

        let file = dir.path().join("backups/2024-01-02-03-04-05.tar.gz");
        assert_eq!(fs::read(&file).unwrap(), b"archive");
        let mode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        let dir_mode = fs::metadata(dir.path().join("backups"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o750);
    }

    #[test]
    fn test_rejects_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let data = tar_with(&[("link", tar::EntryType::Symlink, b"", 0o777)]);

        let err = extract_archive(data.as_slice(), dir.path()).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedTarEntry { path, .. } if path == "link"));
    }

    #[test]
    fn test_rejects_parent_components() {
        assert!(sanitize(Path::new("../etc/passwd")).is_err());
        assert_eq!(
            sanitize(Path::new("/tmp/dump.sql")).unwrap(),
            PathBuf::from("tmp/dump.sql")
        );
    }
}
