//! Filesystem operations used by archive ingestion.
//!
//! Paths handed to a `Storage` are relative to its root and always use `/`
//! as the separator.

use std::fs;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;

use zip::ZipArchive;

use crate::archive::{MAX_ENTRY_BYTES, is_ignored_entry};

/// Durable storage for extracted archives.
pub trait Storage: Send + Sync {
    /// Unpack the flat file entries of `archive` into `dest`.
    fn extract(&self, archive: &[u8], dest: &str) -> io::Result<()>;

    /// Read an extracted file as UTF-8 text.
    fn read_to_string(&self, path: &str) -> io::Result<String>;

    /// Publicly resolvable URL for a stored file.
    fn public_url(&self, path: &str) -> String;

    /// Remove `path` and everything under it. Missing paths are not an error.
    fn delete(&self, path: &str) -> io::Result<()>;
}

/// `Storage` backed by a local media directory served under `base_url`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    base_url: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    /// Resolve a relative storage path, refusing anything that would escape
    /// the root.
    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let mut resolved = self.root.clone();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if part == "." || part == ".." || part.contains('\\') {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid storage path: {path}"),
                ));
            }
            resolved.push(part);
        }
        Ok(resolved)
    }
}

impl Storage for LocalStorage {
    fn extract(&self, archive: &[u8], dest: &str) -> io::Result<()> {
        let dest_dir = self.resolve(dest)?;
        fs::create_dir_all(&dest_dir)?;

        let mut zip = ZipArchive::new(Cursor::new(archive)).map_err(io::Error::other)?;
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i).map_err(io::Error::other)?;
            let name = entry.name().to_string();
            if is_ignored_entry(&name) || entry.is_dir() {
                continue;
            }

            // Only flat entries are ever written; anything nested or unsafe
            // has been rejected before extraction is attempted.
            let file_name = entry
                .enclosed_name()
                .filter(|p| p.components().count() == 1)
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("refusing to extract entry {name}"),
                    )
                })?;

            let mut out = fs::File::create(dest_dir.join(file_name))?;
            let written = io::copy(&mut (&mut entry).take(MAX_ENTRY_BYTES + 1), &mut out)?;
            if written > MAX_ENTRY_BYTES {
                return Err(io::Error::new(
                    io::ErrorKind::FileTooLarge,
                    format!("entry {name} is larger than {MAX_ENTRY_BYTES} bytes"),
                ));
            }
        }

        tracing::debug!(dest = %dest_dir.display(), "Archive extracted");
        Ok(())
    }

    fn read_to_string(&self, path: &str) -> io::Result<String> {
        let bytes = fs::read(self.resolve(path)?)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn delete(&self, path: &str) -> io::Result<()> {
        match fs::remove_dir_all(self.resolve(path)?) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_url_joins_single_slash() {
        let storage = LocalStorage::new("/srv/media", "/media/");
        assert_eq!(
            storage.public_url("archives/abc/logo.png"),
            "/media/archives/abc/logo.png"
        );

        let storage = LocalStorage::new("/srv/media", "https://cdn.example.com/media");
        assert_eq!(
            storage.public_url("/archives/abc/logo.png"),
            "https://cdn.example.com/media/archives/abc/logo.png"
        );
    }

    #[test]
    fn test_resolve_rejects_parent_components() {
        let storage = LocalStorage::new("/srv/media", "/media/");
        assert!(storage.resolve("archives/../../etc").is_err());
        assert_eq!(
            storage.resolve("archives/abc").unwrap(),
            PathBuf::from("/srv/media/archives/abc")
        );
    }

    #[test]
    fn test_extract_refuses_oversized_entry() {
        use std::io::Write;
        use zip::ZipWriter;
        use zip::write::SimpleFileOptions;

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("note.html", SimpleFileOptions::default())
            .unwrap();
        let chunk = vec![b' '; 1024 * 1024];
        for _ in 0..=MAX_ENTRY_BYTES / chunk.len() as u64 {
            writer.write_all(&chunk).unwrap();
        }
        let archive = writer.finish().unwrap().into_inner();

        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "/media/");
        let err = storage.extract(&archive, "archives/big").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::FileTooLarge);
        let written = fs::metadata(dir.path().join("archives/big/note.html"))
            .unwrap()
            .len();
        assert_eq!(written, MAX_ENTRY_BYTES + 1);
    }

    #[test]
    fn test_delete_missing_path_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "/media/");
        assert!(storage.delete("archives/does-not-exist").is_ok());
    }
}
