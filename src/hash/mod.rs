//! Content hashing abstraction (spec: `memhash(seed, data) -> 16-byte tag`).
//!
//! The content file names the algorithm it was written with (`checksum` /
//! `prevchecksum` directives) so an array can be migrated from one hash to
//! another without a full rescan; [`Algorithm`] is that name, [`MemHash`] is
//! the trait every algorithm implements, and [`tag`] is the single entry point
//! callers use once they've resolved an [`Algorithm`].

pub mod murmur3;
pub mod spooky2;

use std::fmt;

/// A 16-byte content tag, compared byte-for-byte during check/scrub.
pub type Tag = [u8; 16];

/// The hash algorithms a content file can declare. `Unknown` preserves
/// forward compatibility: a content file written by a newer tool with a
/// hash this build doesn't recognize should fail loudly rather than silently
/// matching everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Murmur3,
    Spooky2,
}

impl Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Murmur3 => "murmur3",
            Algorithm::Spooky2 => "spooky2",
        }
    }

    pub fn parse(name: &str) -> Option<Algorithm> {
        match name {
            "murmur3" => Some(Algorithm::Murmur3),
            "spooky2" => Some(Algorithm::Spooky2),
            _ => None,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Implemented by each concrete hash. `seed` is the array's per-content-file
/// random seed (stored in the content file itself), mixed in so tags from two
/// arrays never collide by construction even over identical block content.
pub trait MemHash {
    fn hash(seed: &[u8; 16], data: &[u8]) -> Tag;
}

/// Computes the tag for `data` under `algorithm`, seeded with `seed`.
pub fn tag(algorithm: Algorithm, seed: &[u8; 16], data: &[u8]) -> Tag {
    match algorithm {
        Algorithm::Murmur3 => murmur3::Murmur3::hash(seed, data),
        Algorithm::Spooky2 => spooky2::Spooky2::hash(seed, data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_round_trips_through_its_name() {
        for a in [Algorithm::Murmur3, Algorithm::Spooky2] {
            assert_eq!(Algorithm::parse(a.name()), Some(a));
        }
    }

    #[test]
    fn unknown_algorithm_name_does_not_parse() {
        assert_eq!(Algorithm::parse("sha256"), None);
    }
}
