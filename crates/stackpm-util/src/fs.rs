use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::time::SystemTime;

/// File metadata as seen by the package manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Size in bytes (0 for directories on some platforms).
    pub size: u64,
    /// Whether the path is a directory.
    pub is_dir: bool,
    /// Last modification time, when the platform reports one.
    pub modified: Option<SystemTime>,
}

/// Filesystem operations used by the installer.
///
/// Every path handed to an implementation is absolute or relative to the
/// process working directory; implementations never resolve against anything
/// else.
pub trait FileSystem: Send + Sync {
    /// Whether anything exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Stat `path`.
    ///
    /// # Errors
    /// Returns an error if `path` does not exist or cannot be inspected.
    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// Read the whole file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Create (or truncate) the file at `path` for writing.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    fn create_file(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;

    /// Create `path` and all missing parents.
    ///
    /// # Errors
    /// Returns an error if a directory cannot be created.
    fn mkdir(&self, path: &Path) -> io::Result<()>;

    /// Remove `path` recursively. A missing path is not an error.
    ///
    /// # Errors
    /// Returns an error if an existing path cannot be removed.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Replace the contents of `path` with `bytes`.
    ///
    /// The default goes through [`FileSystem::create_file`]; implementations
    /// backed by a real disk should write atomically.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut file = self.create_file(path)?;
        file.write_all(bytes)?;
        file.flush()
    }
}

/// [`FileSystem`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = fs::metadata(path)?;
        Ok(FileStat {
            size: meta.len(),
            is_dir: meta.is_dir(),
            modified: meta.modified().ok(),
        })
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn create_file(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(File::create(path)?))
    }

    fn mkdir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        atomic_write(path, bytes)
    }
}

/// Atomically write bytes to a file by writing to a temp file then renaming.
///
/// The file either keeps its old contents or gets the new ones, never a
/// partial write.
///
/// # Errors
/// Returns an error if the write or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));

    // Same directory as the target so the rename never crosses filesystems
    let mut temp_path = parent.to_path_buf();
    temp_path.push(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ));

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    match fs::rename(&temp_path, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            // Windows refuses to rename over an existing file
            if cfg!(windows) {
                fs::copy(&temp_path, path)?;
                let _ = fs::remove_file(&temp_path);
                Ok(())
            } else {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }
}
