//! Picks a rolling sample of already-synced slots for re-verification
//! between full checks (spec §4.6.3): every slot already flagged `bad`,
//! plus enough of the oldest-last-checked slots to cover `fraction` of the
//! used array, restricted to slots at least `older_than_days` stale.

use std::path::PathBuf;

use crate::blockstore::BlockStore;
use crate::error::CoreResult;
use crate::hash::Algorithm;
use crate::parityfile::ParityFile;
use crate::progress::{Clock, Interrupt, Progress};

use super::check::CheckReport;

pub const DEFAULT_FRACTION: f64 = 0.12;
pub const DEFAULT_OLDER_THAN_DAYS: u32 = 10;

/// Slot selection for one scrub pass. Separated from [`run`] so the
/// selection policy itself is directly testable without touching disk.
pub fn select_slots(store: &BlockStore, now: u32, fraction: f64, older_than_days: u32) -> Vec<u64> {
    let used = store.parity_used_size();
    let older_than_secs = (older_than_days as u64) * 24 * 3600;
    let budget = ((used as f64) * fraction).ceil() as u64;

    let mut bad = Vec::new();
    let mut candidates: Vec<(u64, u32)> = Vec::new();
    for slot in 0..used {
        let info = store.info_get(slot as usize);
        if info.is_bad() {
            bad.push(slot);
            continue;
        }
        if (now.saturating_sub(info.time()) as u64) >= older_than_secs {
            candidates.push((slot, info.time()));
        }
    }
    candidates.sort_by_key(|&(_, time)| time);

    let mut selected = bad;
    let remaining_budget = budget.saturating_sub(selected.len() as u64) as usize;
    selected.extend(candidates.into_iter().take(remaining_budget).map(|(slot, _)| slot));
    selected.sort_unstable();
    selected.dedup();
    selected
}

/// Selects slots via [`select_slots`] and verifies them with
/// [`super::check::run`] in check-only mode (spec §4.6.3: scrub never
/// writes on its own; a bad slot it finds waits for an explicit `fix`).
#[allow(clippy::too_many_arguments)]
pub fn run(
    store: &mut BlockStore,
    parity: &mut [ParityFile],
    algorithm: Algorithm,
    seed: &[u8; 16],
    neutralize_xls_headers: bool,
    fraction: f64,
    older_than_days: u32,
    content_paths: &[PathBuf],
    prev: Option<(Algorithm, [u8; 16])>,
    interrupt: &Interrupt,
    progress: &Progress,
    clock: &dyn Clock,
) -> CoreResult<CheckReport> {
    let slots = select_slots(store, clock.now_unix(), fraction, older_than_days);
    super::check::run(
        store,
        parity,
        algorithm,
        seed,
        neutralize_xls_headers,
        false,
        &slots,
        content_paths,
        prev,
        interrupt,
        progress,
        clock,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockstore::BlockState;
    use std::path::PathBuf;

    #[test]
    fn bad_slots_are_always_selected_regardless_of_fraction() {
        let mut store = BlockStore::new(16);
        let disk = store.add_disk("d0", "/d0");
        store.file_insert(disk, PathBuf::from("a.bin"), 16, 0, 0, 1, 0);
        store.promote_to_blk(disk, 0, [1u8; 16]);
        store.info_set(0, crate::blockstore::Info::new(1000, true, false, false));

        let selected = select_slots(&store, 2000, 0.0, 10);
        assert_eq!(selected, vec![0]);
    }

    #[test]
    fn fresh_non_bad_slots_outside_the_age_window_are_not_selected() {
        let mut store = BlockStore::new(16);
        let disk = store.add_disk("d0", "/d0");
        store.file_insert(disk, PathBuf::from("a.bin"), 16, 0, 0, 1, 0);
        store.promote_to_blk(disk, 0, [1u8; 16]);
        store.info_set(0, crate::blockstore::Info::new(1_000_000, false, false, true));

        let selected = select_slots(&store, 1_000_010, 1.0, 10);
        assert!(selected.is_empty());
        let _ = BlockState::Blk;
    }
}
