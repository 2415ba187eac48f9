//! Stand-in for SpookyHash V2: the hash primitive itself is out of scope, and
//! no SpookyHash crate exists in this workspace's dependency stack, so
//! `spooky2` is served by blake3's keyed mode (already a dependency) truncated
//! to 16 bytes. A real migration path still works end to end: a content file
//! can name either algorithm, and [`super::tag`] dispatches on that name.

use super::{MemHash, Tag};

pub struct Spooky2;

impl MemHash for Spooky2 {
    fn hash(seed: &[u8; 16], data: &[u8]) -> Tag {
        let mut key = [0u8; 32];
        key[..16].copy_from_slice(seed);
        key[16..].copy_from_slice(seed);
        let digest = blake3::keyed_hash(&key, data);
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest.as_bytes()[..16]);
        out
    }
}
