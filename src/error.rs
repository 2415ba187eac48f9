//! The error taxonomy every other module returns into, and the exit-code
//! contract a CLI wrapper surfaces from it.

use std::path::PathBuf;

use thiserror::Error;

/// Every failure kind the core can report, matching spec §7 by name.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("content file {path} is corrupt: {reason}")]
    ContentCorrupt { path: PathBuf, reason: String },

    #[error("another run holds the lock at {0}")]
    LockBusy(PathBuf),

    #[error("file missing on disk: {0}")]
    MissingFile(PathBuf),

    #[error("{path}: read past the recorded valid extent (slot/offset {at})")]
    MissingData { path: PathBuf, at: u64 },

    #[error("{path}: size changed since last scan ({expected} -> {found})")]
    SizeMismatch { path: PathBuf, expected: u64, found: u64 },

    #[error("{path}: mtime changed since last scan")]
    MtimeMismatch { path: PathBuf },

    #[error("{path}: inode changed since last scan")]
    InodeMismatch { path: PathBuf },

    #[error("read error on {path}: {source}")]
    ReadError { path: PathBuf, #[source] source: std::io::Error },

    #[error("write error on {path}: {source}")]
    WriteError { path: PathBuf, #[source] source: std::io::Error },

    #[error("no space left for {0}")]
    NoSpace(PathBuf),

    #[error("fsync failed on {path}: {source}")]
    FsyncError { path: PathBuf, #[source] source: std::io::Error },

    #[error("hash mismatch at parity slot {slot}")]
    HashMismatch { slot: u64 },

    #[error("slot {slot} unrecoverable: {failed} failures exceed {parity} parity rows")]
    Unrecoverable { slot: u64, failed: usize, parity: usize },
}

/// The run-level outcome a CLI wrapper turns into a process exit code.
///
/// A single run can encounter more than one [`CoreError`]; pipelines collect
/// them and report the most severe outcome rather than bailing on the first
/// one (check/fix/scrub are deliberately lenient — see spec §7's policy
/// note). [`Outcome::worse_of`] implements that "most severe wins" merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Outcome {
    Success = 0,
    OperationalFailure = 1,
    SilentErrorDetected = 2,
    RejectedInput = 3,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        self as i32
    }

    pub fn worse_of(self, other: Outcome) -> Outcome {
        self.max(other)
    }
}

impl CoreError {
    /// Maps this error onto the exit-code contract: which [`Outcome`] a CLI
    /// wrapper should surface if this is the only error encountered during a
    /// run.
    pub fn outcome(&self) -> Outcome {
        match self {
            CoreError::ConfigInvalid(_) => Outcome::RejectedInput,
            CoreError::ContentCorrupt { .. } => Outcome::RejectedInput,
            CoreError::LockBusy(_) => Outcome::OperationalFailure,
            CoreError::MissingFile(_) => Outcome::OperationalFailure,
            CoreError::MissingData { .. } => Outcome::OperationalFailure,
            CoreError::SizeMismatch { .. } => Outcome::RejectedInput,
            CoreError::MtimeMismatch { .. } => Outcome::RejectedInput,
            CoreError::InodeMismatch { .. } => Outcome::RejectedInput,
            CoreError::ReadError { .. } => Outcome::OperationalFailure,
            CoreError::WriteError { .. } => Outcome::OperationalFailure,
            CoreError::NoSpace(_) => Outcome::OperationalFailure,
            CoreError::FsyncError { .. } => Outcome::OperationalFailure,
            CoreError::HashMismatch { .. } => Outcome::SilentErrorDetected,
            CoreError::Unrecoverable { .. } => Outcome::SilentErrorDetected,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worse_of_prefers_higher_severity_regardless_of_argument_order() {
        assert_eq!(
            Outcome::Success.worse_of(Outcome::RejectedInput),
            Outcome::RejectedInput
        );
        assert_eq!(
            Outcome::RejectedInput.worse_of(Outcome::Success),
            Outcome::RejectedInput
        );
    }

    #[test]
    fn exit_codes_match_the_external_contract() {
        assert_eq!(Outcome::Success.exit_code(), 0);
        assert_eq!(Outcome::OperationalFailure.exit_code(), 1);
        assert_eq!(Outcome::SilentErrorDetected.exit_code(), 2);
        assert_eq!(Outcome::RejectedInput.exit_code(), 3);
    }

    #[test]
    fn hash_mismatch_maps_to_silent_error_detected() {
        assert_eq!(
            CoreError::HashMismatch { slot: 42 }.outcome(),
            Outcome::SilentErrorDetected
        );
    }
}
