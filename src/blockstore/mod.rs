//! The in-memory array state: disks, their files, and the block-state
//! machine tying every disk's slot array to the shared parity positions
//! (spec §3, §4.2).

pub mod block;
pub mod disk;
pub mod file;
pub mod info;

pub use block::{Block, BlockState};
pub use disk::Disk;
pub use file::File;
pub use info::Info;

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiskId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub usize);

pub struct BlockStore {
    block_size: u64,
    disks: Vec<Option<Disk>>,
    info: Vec<Info>,
}

impl BlockStore {
    pub fn new(block_size: u64) -> BlockStore {
        assert!(block_size.is_power_of_two(), "block size must be a power of two");
        BlockStore {
            block_size,
            disks: Vec::new(),
            info: Vec::new(),
        }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Appends a disk, assigning the lowest unused parity position (position
    /// `max+1` if every lower position is occupied).
    pub fn add_disk(&mut self, name: impl Into<String>, root: impl Into<PathBuf>) -> DiskId {
        let position = self.disks.iter().position(|d| d.is_none()).unwrap_or(self.disks.len());
        let disk = Disk::new(name.into(), root.into(), position);
        if position == self.disks.len() {
            self.disks.push(Some(disk));
        } else {
            self.disks[position] = Some(disk);
        }
        DiskId(position)
    }

    /// Adds a disk at an exact, caller-chosen position, for the content file
    /// loader: a disk's position is part of what was saved, not something
    /// re-derived by scanning for the lowest free slot.
    pub(crate) fn add_disk_at(&mut self, position: usize, name: impl Into<String>, root: impl Into<PathBuf>) -> DiskId {
        if position >= self.disks.len() {
            self.disks.resize_with(position + 1, || None);
        }
        self.disks[position] = Some(Disk::new(name.into(), root.into(), position));
        DiskId(position)
    }

    pub fn disk(&self, id: DiskId) -> Option<&Disk> {
        self.disks.get(id.0).and_then(|d| d.as_ref())
    }

    pub fn disk_by_name(&self, name: &str) -> Option<DiskId> {
        self.disks().find(|(_, d)| d.name == name).map(|(id, _)| id)
    }

    pub(crate) fn disk_mut(&mut self, id: DiskId) -> &mut Disk {
        self.disks[id.0].as_mut().expect("unknown DiskId")
    }

    pub fn disks(&self) -> impl Iterator<Item = (DiskId, &Disk)> {
        self.disks
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.as_ref().map(|d| (DiskId(i), d)))
    }

    /// Creates a file and allocates `blockmax` slots per the insertion
    /// lifecycle (spec §3).
    pub fn file_insert(
        &mut self,
        disk: DiskId,
        path: PathBuf,
        size: u64,
        mtime_sec: i64,
        mtime_nsec: i32,
        inode: u64,
        physical: u64,
    ) -> FileId {
        let blockmax = File::blockmax(self.block_size, size);
        let file = File {
            path,
            size,
            mtime_sec,
            mtime_nsec,
            inode,
            physical,
            block_positions: vec![0; blockmax],
        };
        self.disk_mut(disk).insert_file(file)
    }

    pub fn file_remove(&mut self, disk: DiskId, file: FileId) {
        self.disk_mut(disk).remove_file(file);
    }

    pub fn file_rename(&mut self, disk: DiskId, file: FileId, new_path: PathBuf) {
        self.disk_mut(disk).rename_file(file, new_path);
    }

    pub fn block_get(&self, disk: DiskId, parity_pos: u64) -> Option<&Block> {
        self.disk(disk)?.block(parity_pos)
    }

    /// The owning file and its file-block-index for a slot, when the block
    /// has an owner (`Blk`/`New`/`Chg`).
    pub fn owner_file(&self, disk: DiskId, parity_pos: u64) -> Option<(&File, usize)> {
        let d = self.disk(disk)?;
        let (file_id, idx) = d.block(parity_pos)?.owner?;
        d.file(file_id).map(|f| (f, idx))
    }

    pub fn promote_to_blk(&mut self, disk: DiskId, parity_pos: u64, hash: [u8; 16]) {
        self.disk_mut(disk).promote_to_blk(parity_pos, hash);
    }

    pub fn clear_deleted(&mut self, disk: DiskId, parity_pos: u64) {
        self.disk_mut(disk).clear_deleted(parity_pos);
    }

    pub fn set_blk_hash(&mut self, disk: DiskId, parity_pos: u64, hash: [u8; 16]) {
        self.disk_mut(disk).set_blk_hash(parity_pos, hash);
    }

    pub fn info_get(&self, i: usize) -> Info {
        self.info.get(i).copied().unwrap_or_default()
    }

    pub fn info_set(&mut self, i: usize, value: Info) {
        if i >= self.info.len() {
            self.info.resize(i + 1, Info::default());
        }
        self.info[i] = value;
    }

    /// Highest slot `i+1` such that some disk has a non-EMPTY, non-DELETED
    /// entry at `i`; this is the size the parity files are grown/shrunk to.
    pub fn parity_allocated_size(&self) -> u64 {
        self.disks().map(|(_, d)| d.allocated_size()).max().unwrap_or(0)
    }

    /// Same restriction to `BLK` slots only (used by status reporting).
    pub fn parity_used_size(&self) -> u64 {
        self.disks().map(|(_, d)| d.used_size()).max().unwrap_or(0)
    }

    /// True if some slot has both a finalized (`Blk`) block on one disk and
    /// a still-pending (`New`) block on another: the signature of a sync
    /// that was interrupted partway through a slot's cross-disk commit.
    pub fn is_invalid(&self) -> bool {
        let max_pos = self.parity_allocated_size();
        for pos in 0..max_pos {
            let mut has_blk = false;
            let mut has_new = false;
            for (_, disk) in self.disks() {
                match disk.block(pos).map(|b| b.state) {
                    Some(BlockState::Blk) => has_blk = true,
                    Some(BlockState::New) => has_new = true,
                    _ => {}
                }
            }
            if has_blk && has_new {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_disk_reuses_the_lowest_freed_position() {
        let mut store = BlockStore::new(256);
        let a = store.add_disk("a", "/a");
        let _b = store.add_disk("b", "/b");
        assert_eq!(a.0, 0);
        store.disks[0] = None;
        let c = store.add_disk("c", "/c");
        assert_eq!(c.0, 0);
    }

    #[test]
    fn info_get_on_an_unset_position_returns_the_zero_default() {
        let store = BlockStore::new(256);
        assert!(store.info_get(999).is_never_synced());
    }

    #[test]
    fn info_set_grows_the_array_as_needed() {
        let mut store = BlockStore::new(256);
        store.info_set(5, Info::new(123, true, false, false));
        assert_eq!(store.info_get(5).time(), 123);
        assert!(store.info_get(5).is_bad());
        assert!(store.info_get(0).is_never_synced());
    }

    #[test]
    fn parity_sizes_reflect_the_highest_touched_slot_across_disks() {
        let mut store = BlockStore::new(256);
        let a = store.add_disk("a", "/a");
        store.file_insert(a, PathBuf::from("f"), 3 * 256, 0, 0, 1, 0);
        assert_eq!(store.parity_allocated_size(), 3);
        assert_eq!(store.parity_used_size(), 0); // still NEW, not BLK
    }

    #[test]
    fn is_invalid_detects_a_blk_new_mismatch_at_the_same_slot() {
        let mut store = BlockStore::new(256);
        let a = store.add_disk("a", "/a");
        let b = store.add_disk("b", "/b");
        store.file_insert(a, PathBuf::from("f"), 256, 0, 0, 1, 0);
        store.file_insert(b, PathBuf::from("g"), 256, 0, 0, 2, 0);
        // Both fresh inserts land at slot 0 as NEW on both disks: not invalid.
        assert!(!store.is_invalid());

        // Promote disk a's slot 0 straight to BLK, simulating a sync that
        // wrote disk a's parity contribution and was interrupted before b's.
        store.disk_mut(a).test_force_state(0, BlockState::Blk, [1u8; 16]);
        assert!(store.is_invalid());

        // Finishing the sync on disk b too restores consistency.
        store.disk_mut(b).test_force_state(0, BlockState::Blk, [2u8; 16]);
        assert!(!store.is_invalid());
    }
}
