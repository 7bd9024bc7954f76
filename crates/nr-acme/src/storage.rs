use crate::types::{AcmeError, AcmeResult};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const FULLCHAIN: &str = "fullchain.pem";
const PRIVKEY: &str = "privkey.pem";

/// One archived certificate version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedVersion {
    /// `YYYYMMDDhhmmss[-n]`, sorts chronologically
    pub stamp: String,
    pub chain_path: PathBuf,
}

/// Certificate storage laid out as
/// `live/<primary>/` plus `archive/<stamp>/<primary>/`.
pub struct CertStorage {
    base_path: PathBuf,
}

impl CertStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Path to account credentials file
    pub fn account_path(&self, contact: &str) -> PathBuf {
        self.base_path.join(format!(".{}.pem", contact))
    }

    pub fn live_dir(&self, primary: &str) -> PathBuf {
        self.base_path.join("live").join(primary)
    }

    pub fn fullchain_path(&self, primary: &str) -> PathBuf {
        self.live_dir(primary).join(FULLCHAIN)
    }

    pub fn privkey_path(&self, primary: &str) -> PathBuf {
        self.live_dir(primary).join(PRIVKEY)
    }

    fn archive_root(&self) -> PathBuf {
        self.base_path.join("archive")
    }

    /// Live chain of the primary domain, `None` when never issued
    pub fn read_live_chain(&self, primary: &str) -> AcmeResult<Option<String>> {
        match fs::read_to_string(self.fullchain_path(primary)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the live chain and key
    pub fn write_live(&self, primary: &str, chain_pem: &str, key_pem: &str) -> AcmeResult<()> {
        write_private(&self.privkey_path(primary), key_pem)?;
        write_atomic(&self.fullchain_path(primary), chain_pem)?;
        Ok(())
    }

    /// Store a copy of a newly issued version; returns its directory.
    /// An existing slot is never reused: a second version within the same
    /// second goes to `<stamp>-1`, `<stamp>-2`, ...
    pub fn write_archive(
        &self,
        stamp: &str,
        primary: &str,
        chain_pem: &str,
        key_pem: &str,
    ) -> AcmeResult<PathBuf> {
        let dir = self.claim_archive_slot(stamp, primary)?;
        write_atomic(&dir.join(FULLCHAIN), chain_pem)?;
        write_private(&dir.join(PRIVKEY), key_pem)?;
        Ok(dir)
    }

    fn claim_archive_slot(&self, stamp: &str, primary: &str) -> AcmeResult<PathBuf> {
        for attempt in 0u32.. {
            let slot = match attempt {
                0 => stamp.to_string(),
                n => format!("{}-{}", stamp, n),
            };
            let parent = self.archive_root().join(slot);
            fs::create_dir_all(&parent)?;
            let dir = parent.join(primary);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok(dir),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AcmeError::IoError(ErrorKind::AlreadyExists.into()))
    }

    /// Archived versions of `primary`, oldest first
    pub fn archived_versions(&self, primary: &str) -> AcmeResult<Vec<ArchivedVersion>> {
        let entries = match fs::read_dir(self.archive_root()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry?;
            let chain_path = entry.path().join(primary).join(FULLCHAIN);
            if !chain_path.is_file() {
                continue;
            }
            versions.push(ArchivedVersion {
                stamp: entry.file_name().to_string_lossy().into_owned(),
                chain_path,
            });
        }
        versions.sort_by(|a, b| a.stamp.cmp(&b.stamp));
        Ok(versions)
    }
}

/// Write through a temporary file and rename over the target.
fn write_atomic(path: &Path, content: &str) -> AcmeResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("pem.tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Like [`write_atomic`], readable by the owner only.
pub(crate) fn write_private(path: &Path, content: &str) -> AcmeResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("pem.tmp");
    let _ = fs::remove_file(&temp_path);

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&temp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let storage = CertStorage::new("/etc/letsencrypt");
        assert_eq!(
            storage.account_path("admin@example.com"),
            PathBuf::from("/etc/letsencrypt/.admin@example.com.pem")
        );
        assert_eq!(
            storage.fullchain_path("example.com"),
            PathBuf::from("/etc/letsencrypt/live/example.com/fullchain.pem")
        );
        assert_eq!(
            storage.privkey_path("example.com"),
            PathBuf::from("/etc/letsencrypt/live/example.com/privkey.pem")
        );
    }

    #[test]
    fn test_missing_live_chain() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CertStorage::new(dir.path());
        assert_eq!(storage.read_live_chain("example.com").unwrap(), None);
        assert!(storage.archived_versions("example.com").unwrap().is_empty());
    }

    #[test]
    fn test_archive_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CertStorage::new(dir.path());
        storage.write_archive("20250301000000", "example.com", "c2", "k2").unwrap();
        storage.write_archive("20250101000000", "example.com", "c1", "k1").unwrap();
        storage.write_archive("20250201000000", "other.org", "x", "y").unwrap();

        let stamps: Vec<_> = storage
            .archived_versions("example.com")
            .unwrap()
            .into_iter()
            .map(|v| v.stamp)
            .collect();
        assert_eq!(stamps, vec!["20250101000000", "20250301000000"]);
    }

    #[test]
    fn test_archive_slot_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CertStorage::new(dir.path());
        let first = storage.write_archive("20250301000000", "example.com", "c1", "k1").unwrap();
        let second = storage.write_archive("20250301000000", "example.com", "c2", "k2").unwrap();
        storage.write_archive("20250301000001", "example.com", "c3", "k3").unwrap();

        assert_ne!(first, second);
        assert_eq!(fs::read_to_string(first.join(FULLCHAIN)).unwrap(), "c1");
        assert_eq!(fs::read_to_string(second.join(FULLCHAIN)).unwrap(), "c2");

        let stamps: Vec<_> = storage
            .archived_versions("example.com")
            .unwrap()
            .into_iter()
            .map(|v| v.stamp)
            .collect();
        assert_eq!(stamps, vec!["20250301000000", "20250301000000-1", "20250301000001"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_private_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = CertStorage::new(dir.path());
        storage.write_live("example.com", "chain", "key").unwrap();

        let mode = fs::metadata(storage.privkey_path("example.com")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(storage.read_live_chain("example.com").unwrap().as_deref(), Some("chain"));
    }
}
