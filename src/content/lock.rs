//! The concurrent-run interlock: an empty lock file adjacent to the first
//! content path, held under an exclusive advisory lock for the lifetime of a
//! mutating run.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};

pub struct LockFile {
    _file: File,
    path: PathBuf,
}

impl LockFile {
    /// Acquires the lock adjacent to `content_path`, failing immediately
    /// (rather than blocking) if another run already holds it.
    pub fn acquire(content_path: &Path) -> CoreResult<LockFile> {
        let path = lock_path(content_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|source| CoreError::ReadError { path: path.clone(), source })?;

        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret != 0 {
            return Err(CoreError::LockBusy(path));
        }

        Ok(LockFile { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_path(content_path: &Path) -> PathBuf {
    let mut name = content_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

// `flock` is released automatically when `_file`'s descriptor closes on drop.

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_while_the_first_is_held() {
        let dir = tempdir().unwrap();
        let content = dir.path().join("array.content");
        let first = LockFile::acquire(&content).unwrap();
        let second = LockFile::acquire(&content);
        assert!(matches!(second, Err(CoreError::LockBusy(_))));
        drop(first);
        assert!(LockFile::acquire(&content).is_ok());
    }
}
