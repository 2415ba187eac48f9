//! Block-level parity protection for an array of independent data disks.
//!
//! This crate is the computational core: the erasure-code kernel, the array's
//! on-disk/in-memory state model, and the sync/check/fix/scrub pipelines that
//! drive them. It does not parse a command line or a configuration file on its
//! own; see the `snapraid` binary for a thin driver.

pub mod blockstore;
pub mod codec;
pub mod config;
#[cfg(unix)]
pub mod content;
pub mod error;
#[cfg(unix)]
pub mod handle;
pub mod hash;
#[cfg(unix)]
pub mod parityfile;
#[cfg(unix)]
pub mod pipeline;
pub mod progress;
pub mod scanner;
