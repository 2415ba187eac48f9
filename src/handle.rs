//! Positional read access to a file on a data disk (spec §4.5).

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};

/// BIFF record tag carrying the `.xls` last-saved timestamp; see
/// [`Handle::neutralize_xls_header`].
const XLS_TIMESTAMP_TAG: u16 = 0x0193;

pub struct Handle {
    path: PathBuf,
    file: File,
    /// The size recorded in the content file at the time this handle was
    /// opened; reads past it are refused rather than silently truncated.
    valid_size: u64,
    /// Sticky, set the first time an on-disk size larger than `valid_size`
    /// is observed, so the caller reports it once and doesn't re-warn on
    /// every subsequent block.
    oversize_reported: bool,
    neutralize_xls_headers: bool,
}

impl Handle {
    /// Opens `path` for reading. In fix mode, a prior run may have renamed
    /// the target aside as `<path>.unrecoverable`; `unrecoverable_sidecar`
    /// reopens that instead if it exists, renaming it back in place, falling
    /// back to creating a fresh empty file if neither exists.
    pub fn open(
        path: impl Into<PathBuf>,
        valid_size: u64,
        fix_mode: bool,
        neutralize_xls_headers: bool,
    ) -> CoreResult<Handle> {
        let path = path.into();

        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound && fix_mode => {
                let sidecar = unrecoverable_sidecar(&path);
                if sidecar.exists() {
                    std::fs::rename(&sidecar, &path)
                        .map_err(|source| CoreError::WriteError { path: path.clone(), source })?;
                    File::open(&path).map_err(|source| CoreError::ReadError { path: path.clone(), source })?
                } else {
                    OpenOptions::new()
                        .read(true)
                        .write(true)
                        .create(true)
                        .open(&path)
                        .map_err(|source| CoreError::WriteError { path: path.clone(), source })?
                }
            }
            Err(source) => return Err(CoreError::ReadError { path: path.clone(), source }),
        };

        advise_sequential(&file);

        Ok(Handle {
            path,
            file,
            valid_size,
            oversize_reported: false,
            neutralize_xls_headers,
        })
    }

    /// Reads up to `buf.len()` bytes at `file_pos`, zero-padding any tail
    /// past EOF (a short final block). Refuses to read past `valid_size`.
    /// Returns the number of real (non-padded) bytes read.
    pub fn read(&mut self, file_pos: u64, buf: &mut [u8]) -> CoreResult<usize> {
        if file_pos >= self.valid_size {
            return Err(CoreError::MissingData { path: self.path.clone(), at: file_pos });
        }

        let want = buf.len() as u64;
        let remaining_valid = (self.valid_size - file_pos).min(want);

        let on_disk_len = self
            .file
            .metadata()
            .map(|m| m.len())
            .map_err(|source| CoreError::ReadError { path: self.path.clone(), source })?;
        if on_disk_len > self.valid_size && !self.oversize_reported {
            self.oversize_reported = true;
            tracing::warn!(path = %self.path.display(), on_disk_len, valid_size = self.valid_size, "file grew past its recorded size");
        }

        let readable = remaining_valid.min(on_disk_len.saturating_sub(file_pos));
        let readable = readable as usize;

        for b in buf.iter_mut() {
            *b = 0;
        }
        if readable > 0 {
            self.file
                .read_exact_at(&mut buf[..readable], file_pos)
                .map_err(|source| CoreError::ReadError { path: self.path.clone(), source })?;
        }

        if file_pos == 0 && self.neutralize_xls_headers && is_xls_path(&self.path) {
            neutralize_xls_header(&mut buf[..readable]);
        }

        Ok(remaining_valid as usize)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Renames `path` aside as `<path>.unrecoverable`, for fix mode closing out a
/// block no amount of parity could reconstruct. A no-op if `path` is already
/// gone.
pub fn rename_unrecoverable(path: &Path) -> CoreResult<()> {
    if !path.exists() {
        return Ok(());
    }
    let sidecar = unrecoverable_sidecar(path);
    std::fs::rename(path, &sidecar).map_err(|source| CoreError::WriteError { path: path.to_path_buf(), source })
}

/// Writes a recovered block's bytes back to `path` at `file_pos`, creating
/// the file if fix mode's `Handle::open` never had to (an entirely missing
/// file recovered from parity alone).
pub fn write_block(path: &Path, file_pos: u64, data: &[u8]) -> CoreResult<()> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .open(path)
        .map_err(|source| CoreError::WriteError { path: path.to_path_buf(), source })?;
    file.write_all_at(data, file_pos)
        .map_err(|source| CoreError::WriteError { path: path.to_path_buf(), source })
}

fn unrecoverable_sidecar(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".unrecoverable");
    PathBuf::from(name)
}

fn is_xls_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("xls"))
}

#[cfg(target_os = "linux")]
fn advise_sequential(file: &File) {
    use std::os::unix::io::AsRawFd;
    unsafe {
        libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_SEQUENTIAL);
    }
}

#[cfg(not(target_os = "linux"))]
fn advise_sequential(_file: &File) {}

/// BIFF (`.xls`) files store an 8-byte OLE timestamp inside their last-saved
/// record; some versions of Excel rewrite just that timestamp on open with
/// no other content change, which would otherwise look like silent
/// corruption to every subsequent scrub. This walks the BIFF record stream
/// looking for the tagged record and zeroes its timestamp payload in place,
/// so parity is computed over content that ignores that one field.
fn neutralize_xls_header(buf: &mut [u8]) {
    let mut offset = 0usize;
    while offset + 4 <= buf.len() {
        let tag = u16::from_le_bytes([buf[offset], buf[offset + 1]]);
        let len = u16::from_le_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
        let payload_start = offset + 4;
        let payload_end = payload_start + len;
        if payload_end > buf.len() {
            break;
        }
        if tag == XLS_TIMESTAMP_TAG && len >= 8 {
            for b in &mut buf[payload_start..payload_start + 8] {
                *b = 0;
            }
        }
        offset = payload_end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_pads_a_short_final_block_with_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello").unwrap();
        let mut h = Handle::open(&path, 5, false, false).unwrap();
        let mut buf = [0xFFu8; 16];
        let n = h.read(0, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(&buf[5..], &[0u8; 11]);
    }

    #[test]
    fn read_past_valid_size_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello").unwrap();
        let mut h = Handle::open(&path, 5, false, false).unwrap();
        let mut buf = [0u8; 16];
        let err = h.read(5, &mut buf).unwrap_err();
        assert!(matches!(err, CoreError::MissingData { .. }));
    }

    #[test]
    fn fix_mode_reopens_an_unrecoverable_sidecar() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let sidecar = unrecoverable_sidecar(&path);
        std::fs::write(&sidecar, b"restored").unwrap();

        let mut h = Handle::open(&path, 8, true, false).unwrap();
        let mut buf = [0u8; 8];
        h.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"restored");
        assert!(!sidecar.exists());
    }

    #[test]
    fn neutralize_xls_header_zeroes_only_the_tagged_timestamp() {
        let mut buf = vec![0u8; 20];
        // tag 0x0193, len 8, payload at offset 4..12.
        buf[0..2].copy_from_slice(&0x0193u16.to_le_bytes());
        buf[2..4].copy_from_slice(&8u16.to_le_bytes());
        for (i, b) in buf[4..12].iter_mut().enumerate() {
            *b = i as u8 + 1;
        }
        buf[12] = 0xAB; // past the record, should survive untouched.
        neutralize_xls_header(&mut buf);
        assert_eq!(&buf[4..12], &[0u8; 8]);
        assert_eq!(buf[12], 0xAB);
    }
}
