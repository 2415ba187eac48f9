//! Orchestration over the block-state machine (spec §4.6): `sync` folds
//! pending allocations and deletions into the parity files and rebinds
//! new/changed blocks to a fresh hash; `check`/`fix` verify and repair an
//! already-synced array; `scrub` re-verifies a rolling sample between full
//! checks.

pub mod check;
pub mod scrub;
pub mod sync;

use crate::blockstore::BlockStore;

/// Marks every currently-`BLK` slot for rehashing, for the "switch content
/// hash algorithm" operation (spec §6). The next `sync` pass recomputes each
/// one's hash under the array's current algorithm instead of trusting the
/// stored value; [`rehash_pending`] tells the caller when it's safe to drop
/// `prevchecksum` from the content file.
pub fn mark_all_for_rehash(store: &mut BlockStore) {
    let used = store.parity_used_size();
    for slot in 0..used {
        let info = store.info_get(slot as usize);
        store.info_set(slot as usize, info.with_rehash(true));
    }
}

/// True if some `BLK` slot still carries the rehash flag.
pub fn rehash_pending(store: &BlockStore) -> bool {
    let used = store.parity_used_size();
    (0..used).any(|slot| store.info_get(slot as usize).needs_rehash())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn mark_all_for_rehash_only_touches_blk_range() {
        let mut store = BlockStore::new(256);
        let a = store.add_disk("a", "/a");
        store.file_insert(a, PathBuf::from("f"), 256, 0, 0, 1, 0);
        assert!(!rehash_pending(&store));
        mark_all_for_rehash(&mut store);
        // Still NEW, not BLK, so parity_used_size is 0: nothing marked yet.
        assert!(!rehash_pending(&store));
    }
}
