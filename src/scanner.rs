//! The scanner interface (spec §9 design note): the filesystem walk that
//! turns a data disk's current tree into `BlockStore` mutations is external
//! to this core (spec §1), but the event stream it must emit — and how the
//! core applies that stream between sync runs — lives here.

use std::path::PathBuf;

use crate::blockstore::{BlockStore, DiskId};

/// One observation from a filesystem walk. The core applies these to
/// `BlockStore` strictly between pipeline runs, never while a sync/check/fix
/// is in flight (spec §9: "The core applies them to BlockStore between sync
/// runs, not during").
#[derive(Debug, Clone)]
pub enum Event {
    DiskDiscovered { disk: DiskId },
    FileAdded { disk: DiskId, path: PathBuf, size: u64, mtime_sec: i64, mtime_nsec: i32, inode: u64, physical: u64 },
    FileRemoved { disk: DiskId, path: PathBuf },
    FileMoved { disk: DiskId, from: PathBuf, to: PathBuf },
    /// The scanner suspects a file's content changed (size/mtime/inode drift)
    /// without being able to say how; the core doesn't special-case this
    /// beyond what `FileAdded`/`FileRemoved` already express; a scanner that
    /// detects an in-place content change reports it as a matched
    /// remove-then-add pair and this variant exists for scanners that only
    /// want to flag the suspicion for a human (e.g. a `--diff` report)
    /// without committing to a mutation.
    FileContentSuspectChanged { disk: DiskId, path: PathBuf },
}

/// Anything that can produce a stream of [`Event`]s for a disk walk. Not
/// implemented by this crate (the filesystem walk is out of scope per spec
/// §1); production callers implement it against a real filesystem, tests
/// implement it in memory.
pub trait Scanner {
    fn scan(&mut self) -> Vec<Event>;
}

/// Applies a batch of scanner events to `store`, in order. Events referring
/// to an unknown path (e.g. `FileRemoved` for a file the store never heard
/// of) are silently skipped — the scanner is the source of truth for what
/// exists, but a replayed or duplicate event must not panic the core.
pub fn apply(store: &mut BlockStore, events: &[Event]) {
    for event in events {
        match event {
            Event::DiskDiscovered { .. } => {}
            Event::FileAdded { disk, path, size, mtime_sec, mtime_nsec, inode, physical } => {
                if store.disk(*disk).map(|d| d.file_by_path(path).is_some()).unwrap_or(false) {
                    continue;
                }
                store.file_insert(*disk, path.clone(), *size, *mtime_sec, *mtime_nsec, *inode, *physical);
            }
            Event::FileRemoved { disk, path } => {
                let Some(file_id) = store.disk(*disk).and_then(|d| d.file_by_path(path)) else {
                    continue;
                };
                store.file_remove(*disk, file_id);
            }
            Event::FileMoved { disk, from, to } => {
                let Some(file_id) = store.disk(*disk).and_then(|d| d.file_by_path(from)) else {
                    continue;
                };
                store.file_rename(*disk, file_id, to.clone());
            }
            Event::FileContentSuspectChanged { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_inserts_renames_and_removes_in_order() {
        let mut store = BlockStore::new(256);
        let disk = store.add_disk("d0", "/d0");

        apply(
            &mut store,
            &[
                Event::FileAdded {
                    disk,
                    path: PathBuf::from("a.txt"),
                    size: 512,
                    mtime_sec: 0,
                    mtime_nsec: 0,
                    inode: 1,
                    physical: 0,
                },
                Event::FileMoved { disk, from: PathBuf::from("a.txt"), to: PathBuf::from("b.txt") },
            ],
        );
        let id = store.disk(disk).unwrap().file_by_path(std::path::Path::new("b.txt")).unwrap();
        assert_eq!(store.disk(disk).unwrap().file(id).unwrap().size, 512);

        apply(&mut store, &[Event::FileRemoved { disk, path: PathBuf::from("b.txt") }]);
        assert!(store.disk(disk).unwrap().file_by_path(std::path::Path::new("b.txt")).is_none());
    }

    #[test]
    fn removing_an_unknown_path_is_a_no_op() {
        let mut store = BlockStore::new(256);
        let disk = store.add_disk("d0", "/d0");
        apply(&mut store, &[Event::FileRemoved { disk, path: PathBuf::from("ghost.txt") }]);
    }
}
