//! One parity file per level (spec §4.4): positional read/write over a fixed
//! block size, with real allocation where the filesystem supports it and a
//! `ftruncate` fallback where it doesn't.
//!
//! Unix-only: built directly on `pread`/`pwrite` via
//! `std::os::unix::fs::FileExt`, matching spec §4.4's exact contract rather
//! than going through a portable-but-lossier abstraction.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};

pub struct ParityFile {
    path: PathBuf,
    file: File,
    block_size: u64,
    /// Slots `0..valid_size` hold real data; anything past it is either
    /// unallocated or garbage the allocator didn't zero, and reads there are
    /// refused outright rather than handed to the caller.
    valid_size: u64,
}

impl ParityFile {
    /// Opens `path` read-write, creating it if missing, and tries to
    /// preallocate `want_size * block_size` bytes of real disk space before
    /// falling back to a plain `ftruncate` if the filesystem rejects
    /// `posix_fallocate` (common on some network filesystems).
    pub fn create(path: impl Into<PathBuf>, block_size: u64, want_size: u64) -> CoreResult<ParityFile> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| CoreError::ReadError { path: path.clone(), source })?;

        let mut pf = ParityFile {
            path,
            file,
            block_size,
            valid_size: 0,
        };
        pf.grow_allocation(want_size * block_size)?;
        Ok(pf)
    }

    fn grow_allocation(&mut self, bytes: u64) -> CoreResult<()> {
        if fallocate(&self.file, bytes).is_err() {
            self.file
                .set_len(bytes)
                .map_err(|source| CoreError::WriteError { path: self.path.clone(), source })?;
        }
        Ok(())
    }

    /// Grows or shrinks the file to `new_size` slots. Shrinking also clips
    /// the valid extent; growing extends the real allocation where possible.
    pub fn resize(&mut self, new_size: u64) -> CoreResult<()> {
        let bytes = new_size * self.block_size;
        if new_size >= self.current_slots() {
            self.grow_allocation(bytes)?;
        } else {
            self.file
                .set_len(bytes)
                .map_err(|source| CoreError::WriteError { path: self.path.clone(), source })?;
            self.valid_size = self.valid_size.min(new_size);
        }
        Ok(())
    }

    fn current_slots(&self) -> u64 {
        self.file.metadata().map(|m| m.len() / self.block_size).unwrap_or(0)
    }

    /// Reads slot `slot` into `buf` (must be exactly `block_size` bytes).
    /// Refuses to read past the recorded valid extent.
    pub fn read(&self, slot: u64, buf: &mut [u8]) -> CoreResult<()> {
        debug_assert_eq!(buf.len() as u64, self.block_size);
        if slot >= self.valid_size {
            return Err(CoreError::MissingData { path: self.path.clone(), at: slot });
        }
        self.file
            .read_exact_at(buf, slot * self.block_size)
            .map_err(|source| CoreError::ReadError { path: self.path.clone(), source })
    }

    /// Writes slot `slot` from `buf` (must be exactly `block_size` bytes),
    /// extending the valid extent on success.
    pub fn write(&mut self, slot: u64, buf: &[u8]) -> CoreResult<()> {
        debug_assert_eq!(buf.len() as u64, self.block_size);
        self.file.write_all_at(buf, slot * self.block_size).map_err(|source| {
            if source.raw_os_error() == Some(libc::ENOSPC) {
                CoreError::NoSpace(self.path.clone())
            } else {
                CoreError::WriteError { path: self.path.clone(), source }
            }
        })?;
        self.valid_size = self.valid_size.max(slot + 1);
        Ok(())
    }

    /// Flushes this file's data to stable storage. Must be called before a
    /// run is declared successful.
    pub fn sync(&self) -> CoreResult<()> {
        self.file
            .sync_all()
            .map_err(|source| CoreError::FsyncError { path: self.path.clone(), source })
    }

    pub fn valid_size(&self) -> u64 {
        self.valid_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn fallocate(file: &File, len: u64) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let ret = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, len as libc::off_t) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::from_raw_os_error(ret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parity.0");
        let mut pf = ParityFile::create(&path, 64, 4).unwrap();

        let data = vec![0xAB; 64];
        pf.write(2, &data).unwrap();

        let mut out = vec![0u8; 64];
        pf.read(2, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn read_past_valid_extent_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parity.0");
        let pf = ParityFile::create(&path, 64, 4).unwrap();
        let mut out = vec![0u8; 64];
        let err = pf.read(0, &mut out).unwrap_err();
        assert!(matches!(err, CoreError::MissingData { .. }));
    }

    #[test]
    fn shrink_clips_the_valid_extent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parity.0");
        let mut pf = ParityFile::create(&path, 64, 8).unwrap();
        for slot in 0..5 {
            pf.write(slot, &vec![slot as u8; 64]).unwrap();
        }
        assert_eq!(pf.valid_size(), 5);
        pf.resize(2).unwrap();
        assert_eq!(pf.valid_size(), 2);
    }

    #[test]
    fn sync_does_not_error_on_a_freshly_created_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parity.0");
        let pf = ParityFile::create(&path, 64, 1).unwrap();
        pf.sync().unwrap();
    }
}
