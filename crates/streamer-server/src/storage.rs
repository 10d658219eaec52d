use anyhow::{Result, bail};
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

/// Flat directory of stored streams, one file per name.
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Stream storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    /// Path for a stored stream. Names that could escape the storage
    /// directory are rejected.
    pub fn file_path(&self, name: &str) -> Result<PathBuf> {
        if !is_safe_name(name) {
            bail!("Invalid stream name {:?}", name);
        }
        Ok(self.dir.join(name))
    }

    /// Create (or truncate) the file for `name`.
    pub async fn create(&self, name: &str) -> Result<fs::File> {
        let path = self.file_path(name)?;
        Ok(fs::File::create(&path).await?)
    }

    /// Open `name` for reading, with its size. `Ok(None)` when it does not exist.
    pub async fn open(&self, name: &str) -> Result<Option<(fs::File, u64)>> {
        let path = self.file_path(name)?;
        match fs::File::open(&path).await {
            Ok(file) => {
                let len = file.metadata().await?.len();
                Ok(Some((file, len)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete_file(&self, name: &str) -> Result<()> {
        let path = self.file_path(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted stream {}", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Stream {} already gone", name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// A single path component: no separators, no `..`, no NUL.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && name != "." && !name.contains("..") && !name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_names() {
        assert!(is_safe_name("stream.bin"));
        assert!(is_safe_name("photo.v2.jpg"));
        assert!(!is_safe_name("photo..jpg"));
        assert!(!is_safe_name(""));
        assert!(!is_safe_name(".."));
        assert!(!is_safe_name("../etc/passwd"));
        assert!(!is_safe_name("a\\b"));
    }

    #[tokio::test]
    async fn open_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("store")).await.unwrap();
        assert!(storage.open("nothing").await.unwrap().is_none());
        assert!(storage.file_path("../x").is_err());
        storage.delete_file("nothing").await.unwrap();
    }
}
