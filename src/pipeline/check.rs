//! Verifies a steady-state array's stored hashes and parity against what's
//! actually on disk, and — in fix mode — repairs what `codec::recov` can
//! solve for (spec §4.6.2). A slot with any pending `NEW`/`CHG`/`DELETED`
//! block is skipped: sync hasn't folded it in yet, so there's nothing
//! steady to verify.

use std::path::PathBuf;

use crate::blockstore::{BlockState, BlockStore, DiskId, Info};
use crate::codec;
use crate::content;
use crate::error::{CoreResult, Outcome};
use crate::handle::{self, Handle};
use crate::hash::{self, Algorithm};
use crate::parityfile::ParityFile;
use crate::progress::{Clock, Interrupt, Progress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    /// Every data hash and every parity level matched.
    Ok,
    /// One or more disks failed verification but the remaining parity
    /// levels reconstructed them, and (in fix mode) the repair was written.
    Recovered,
    /// More disks failed than the array has parity levels to recover, or a
    /// reconstructed block's hash still didn't match the stored one.
    Unrecoverable,
    /// Every data block was fine but the stored parity itself didn't match
    /// what the data recomputes to — corruption in the parity file, not the
    /// data.
    SilentParityError,
}

#[derive(Debug)]
pub struct SlotResult {
    pub slot: u64,
    pub outcome: SlotOutcome,
    pub bad_disks: Vec<DiskId>,
}

pub struct CheckReport {
    pub results: Vec<SlotResult>,
    pub interrupted: bool,
}

impl CheckReport {
    /// Maps to the run-level exit code contract (spec §7): any slot that
    /// isn't flatly `Ok` is a silent error, whether or not it was fixed.
    pub fn outcome(&self) -> Outcome {
        self.results.iter().fold(Outcome::Success, |acc, r| {
            acc.worse_of(if r.outcome == SlotOutcome::Ok { Outcome::Success } else { Outcome::SilentErrorDetected })
        })
    }

    pub fn bad_slot_count(&self) -> usize {
        self.results.iter().filter(|r| r.outcome != SlotOutcome::Ok).count()
    }
}

/// Verifies (and, if `fix`, repairs) exactly the slots named in `slots`, in
/// the order given. Writes the content file (and fsyncs any parity level
/// this pass rewrote) once at the end.
#[allow(clippy::too_many_arguments)]
pub fn run(
    store: &mut BlockStore,
    parity: &mut [ParityFile],
    algorithm: Algorithm,
    seed: &[u8; 16],
    neutralize_xls_headers: bool,
    fix: bool,
    slots: &[u64],
    content_paths: &[PathBuf],
    prev: Option<(Algorithm, [u8; 16])>,
    interrupt: &Interrupt,
    progress: &Progress,
    clock: &dyn Clock,
) -> CoreResult<CheckReport> {
    let block_size = store.block_size() as usize;
    let disk_ids: Vec<DiskId> = store.disks().map(|(id, _)| id).collect();
    let mut results = Vec::with_capacity(slots.len());
    let mut interrupted = false;
    let mut any_written = false;

    progress.start(clock);

    for &slot in slots {
        if interrupt.is_set() {
            interrupted = true;
            break;
        }

        let states: Vec<BlockState> =
            disk_ids.iter().map(|&d| store.block_get(d, slot).map(|b| b.state).unwrap_or(BlockState::Empty)).collect();
        if states.iter().any(|s| matches!(s, BlockState::New | BlockState::Chg | BlockState::Deleted)) {
            continue;
        }

        let mut buffers: Vec<Vec<u8>> = vec![vec![0u8; block_size]; disk_ids.len()];
        let mut failed: Vec<usize> = Vec::new();

        for (i, (&disk, &state)) in disk_ids.iter().zip(&states).enumerate() {
            if state != BlockState::Blk {
                continue;
            }
            let (file, file_block_index) = store.owner_file(disk, slot).expect("BLK state implies an owner");
            let path = store.disk(disk).unwrap().root.join(&file.path);
            let file_pos = file_block_index as u64 * block_size as u64;
            let stored_hash = store.block_get(disk, slot).unwrap().hash;

            let read = Handle::open(&path, file.size, fix, neutralize_xls_headers).and_then(|mut h| h.read(file_pos, &mut buffers[i]));
            match read {
                Ok(_) => {
                    progress.add_bytes(block_size as u64);
                    if hash::tag(algorithm, seed, &buffers[i]) != stored_hash {
                        failed.push(i);
                    }
                }
                Err(_) => failed.push(i),
            }
        }

        let mut parity_bufs: Vec<Vec<u8>> = Vec::with_capacity(parity.len());
        let mut available_parity: Vec<usize> = Vec::new();
        for (level, p) in parity.iter().enumerate() {
            let mut buf = vec![0u8; block_size];
            if p.read(slot, &mut buf).is_ok() {
                available_parity.push(level);
            }
            parity_bufs.push(buf);
        }

        let (outcome, bad_disks) = if failed.is_empty() {
            let refs: Vec<&[u8]> = buffers.iter().map(|b| b.as_slice()).collect();
            let mut recomputed: Vec<Vec<u8>> = (0..parity.len()).map(|_| vec![0u8; block_size]).collect();
            {
                let mut recomputed_refs: Vec<&mut [u8]> = recomputed.iter_mut().map(|b| b.as_mut_slice()).collect();
                codec::gen(parity.len(), block_size, &refs, &mut recomputed_refs);
            }
            let mut parity_bad = false;
            for level in 0..parity.len() {
                let matches = available_parity.contains(&level) && recomputed[level] == parity_bufs[level];
                if !matches {
                    parity_bad = true;
                    if fix {
                        parity[level].write(slot, &recomputed[level])?;
                        any_written = true;
                    }
                }
            }
            if parity_bad {
                (SlotOutcome::SilentParityError, Vec::new())
            } else {
                (SlotOutcome::Ok, Vec::new())
            }
        } else if failed.len() <= available_parity.len() {
            let c_idx: Vec<usize> = available_parity[..failed.len()].to_vec();
            let parity_refs: Vec<&[u8]> = parity_bufs.iter().map(|b| b.as_slice()).collect();
            {
                let mut data_refs: Vec<&mut [u8]> = buffers.iter_mut().map(|b| b.as_mut_slice()).collect();
                codec::recov(parity.len(), block_size, &failed, &c_idx, &mut data_refs, &parity_refs);
            }

            let mut bad = Vec::new();
            for &i in &failed {
                let disk = disk_ids[i];
                let stored_hash = store.block_get(disk, slot).unwrap().hash;
                let recovered_hash = hash::tag(algorithm, seed, &buffers[i]);
                if recovered_hash != stored_hash {
                    bad.push(disk);
                    if fix {
                        if let Some((file, _)) = store.owner_file(disk, slot) {
                            let path = store.disk(disk).unwrap().root.join(&file.path);
                            handle::rename_unrecoverable(&path)?;
                        }
                    }
                } else if fix {
                    let (file, file_block_index) = store.owner_file(disk, slot).expect("BLK state implies an owner");
                    let path = store.disk(disk).unwrap().root.join(&file.path);
                    let file_pos = file_block_index as u64 * block_size as u64;
                    let valid_len = (file.size.saturating_sub(file_pos)).min(block_size as u64) as usize;
                    handle::write_block(&path, file_pos, &buffers[i][..valid_len])?;
                }
            }
            if bad.is_empty() {
                (SlotOutcome::Recovered, Vec::new())
            } else {
                (SlotOutcome::Unrecoverable, bad)
            }
        } else {
            let mut bad = Vec::new();
            for &i in &failed {
                let disk = disk_ids[i];
                bad.push(disk);
                if fix {
                    if let Some((file, _)) = store.owner_file(disk, slot) {
                        let path = store.disk(disk).unwrap().root.join(&file.path);
                        handle::rename_unrecoverable(&path)?;
                    }
                }
            }
            (SlotOutcome::Unrecoverable, bad)
        };

        let info = store.info_get(slot as usize);
        let is_clean = matches!(outcome, SlotOutcome::Ok | SlotOutcome::Recovered);
        store.info_set(slot as usize, Info::new(clock.now_unix(), !is_clean, info.needs_rehash(), is_clean));

        results.push(SlotResult { slot, outcome, bad_disks });
        progress.slot_done(slot, clock);
    }

    if any_written {
        for p in parity.iter() {
            p.sync()?;
        }
    }
    content::save(content_paths, store, algorithm, seed, prev)?;

    Ok(CheckReport { results, interrupted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SystemClock;
    use tempfile::tempdir;

    fn synced_single_disk(block_size: u64, content: &[u8]) -> (tempfile::TempDir, BlockStore, ParityFile, Vec<PathBuf>, DiskId) {
        let dir = tempdir().unwrap();
        let d0 = dir.path().join("d0");
        std::fs::create_dir_all(&d0).unwrap();
        let path = d0.join("a.bin");
        std::fs::write(&path, content).unwrap();

        let mut store = BlockStore::new(block_size);
        let disk = store.add_disk("d0", &d0);
        store.file_insert(disk, PathBuf::from("a.bin"), content.len() as u64, 0, 0, 1, 0);
        let content_paths = vec![dir.path().join("array.content")];

        let mut p0 = ParityFile::create(dir.path().join("snapraid.parity"), block_size, 0).unwrap();
        let interrupt = Interrupt::new();
        let progress = Progress::new(1);
        let clock = SystemClock;
        crate::pipeline::sync::run(
            &mut store,
            std::slice::from_mut(&mut p0),
            Algorithm::Murmur3,
            &[0u8; 16],
            false,
            &content_paths,
            0,
            None,
            &interrupt,
            &progress,
            &clock,
        )
        .unwrap();

        (dir, store, p0, content_paths, disk)
    }

    #[test]
    fn check_reports_ok_on_an_untouched_array() {
        let (_dir, mut store, mut p0, content_paths, _disk) = synced_single_disk(16, b"0123456789abcdef");
        let interrupt = Interrupt::new();
        let progress = Progress::new(1);
        let clock = SystemClock;
        let report = run(
            &mut store,
            std::slice::from_mut(&mut p0),
            Algorithm::Murmur3,
            &[0u8; 16],
            false,
            false,
            &[0],
            &content_paths,
            None,
            &interrupt,
            &progress,
            &clock,
        )
        .unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].outcome, SlotOutcome::Ok);
        assert_eq!(report.outcome(), Outcome::Success);
    }

    #[test]
    fn check_detects_a_corrupted_data_file_without_touching_it() {
        let (dir, mut store, mut p0, content_paths, disk) = synced_single_disk(16, b"0123456789abcdef");
        let path = store.disk(disk).unwrap().root.join("a.bin");
        std::fs::write(&path, b"XXXXXXXXXXXXXXXX").unwrap();
        let _ = &dir;

        let interrupt = Interrupt::new();
        let progress = Progress::new(1);
        let clock = SystemClock;
        let report = run(
            &mut store,
            std::slice::from_mut(&mut p0),
            Algorithm::Murmur3,
            &[0u8; 16],
            false,
            false,
            &[0],
            &content_paths,
            None,
            &interrupt,
            &progress,
            &clock,
        )
        .unwrap();
        assert_eq!(report.results[0].outcome, SlotOutcome::Recovered);
        assert_eq!(std::fs::read(&path).unwrap(), b"XXXXXXXXXXXXXXXX");
    }

    #[test]
    fn fix_repairs_a_corrupted_data_file_from_parity() {
        let (dir, mut store, mut p0, content_paths, disk) = synced_single_disk(16, b"0123456789abcdef");
        let path = store.disk(disk).unwrap().root.join("a.bin");
        std::fs::write(&path, b"XXXXXXXXXXXXXXXX").unwrap();
        let _ = &dir;

        let interrupt = Interrupt::new();
        let progress = Progress::new(1);
        let clock = SystemClock;
        let report = run(
            &mut store,
            std::slice::from_mut(&mut p0),
            Algorithm::Murmur3,
            &[0u8; 16],
            false,
            true,
            &[0],
            &content_paths,
            None,
            &interrupt,
            &progress,
            &clock,
        )
        .unwrap();
        assert_eq!(report.results[0].outcome, SlotOutcome::Recovered);
        assert_eq!(std::fs::read(&path).unwrap(), b"0123456789abcdef");
    }

    #[test]
    fn check_detects_a_silently_corrupted_parity_file() {
        let (dir, mut store, mut p0, content_paths, _disk) = synced_single_disk(16, b"0123456789abcdef");
        let mut corrupt = vec![0u8; 16];
        p0.read(0, &mut corrupt).unwrap();
        corrupt[0] ^= 0xFF;
        p0.write(0, &corrupt).unwrap();
        let _ = &dir;

        let interrupt = Interrupt::new();
        let progress = Progress::new(1);
        let clock = SystemClock;
        let report = run(
            &mut store,
            std::slice::from_mut(&mut p0),
            Algorithm::Murmur3,
            &[0u8; 16],
            false,
            false,
            &[0],
            &content_paths,
            None,
            &interrupt,
            &progress,
            &clock,
        )
        .unwrap();
        assert_eq!(report.results[0].outcome, SlotOutcome::SilentParityError);
    }
}
