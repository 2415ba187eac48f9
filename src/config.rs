//! Array configuration: block size, hash algorithm, autosave threshold, and
//! the disk/parity/content-file layout (spec §6, SPEC_FULL.md §6). This is
//! deliberately a thin TOML description, not the full CLI option grammar —
//! that grammar is out of scope per spec §1.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{CoreError, CoreResult};
use crate::hash::Algorithm;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub array: ArrayConfig,
    #[serde(rename = "disk")]
    pub disks: Vec<DiskConfig>,
    #[serde(rename = "parity")]
    pub parities: Vec<ParityConfig>,
    pub content: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct ArrayConfig {
    #[serde(default = "default_block_size")]
    pub block_size: u64,
    #[serde(default = "default_hash")]
    pub hash: String,
    /// Bytes of input processed between ContentFile snapshots; `0` disables
    /// autosave (spec §6).
    #[serde(default)]
    pub autosave_bytes: u64,
    /// Opt-in `.xls` header-neutralization patch (spec §4.5, §9 Open
    /// Question 2); default `false` so hashing always equals the on-disk
    /// bytes unless the operator explicitly accepts the tradeoff.
    #[serde(default)]
    pub neutralize_xls_headers: bool,
}

fn default_block_size() -> u64 {
    256 * 1024
}

fn default_hash() -> String {
    "murmur3".to_string()
}

#[derive(Debug, Deserialize)]
pub struct DiskConfig {
    pub name: String,
    pub path: PathBuf,
    /// Whether this disk's filesystem hands out stable inodes across
    /// remounts (spec §9 Open Question 1). `false` on exFAT/VFAT-style
    /// mounts falls the allocator back to path-based identity.
    #[serde(default = "default_true")]
    pub inode_stable: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ParityConfig {
    pub path: PathBuf,
}

impl Config {
    pub fn load(path: &std::path::Path) -> CoreResult<Config> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::ConfigInvalid(format!("{}: {e}", path.display())))?;
        let config: Config =
            toml::from_str(&text).map_err(|e| CoreError::ConfigInvalid(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> CoreResult<()> {
        if !self.array.block_size.is_power_of_two() {
            return Err(CoreError::ConfigInvalid(format!(
                "array.block_size must be a power of two, got {}",
                self.array.block_size
            )));
        }
        if Algorithm::parse(&self.array.hash).is_none() {
            return Err(CoreError::ConfigInvalid(format!("unknown array.hash {:?}", self.array.hash)));
        }
        if self.disks.is_empty() {
            return Err(CoreError::ConfigInvalid("at least one [[disk]] is required".into()));
        }
        if self.parities.is_empty() || self.parities.len() > 6 {
            return Err(CoreError::ConfigInvalid(format!(
                "parity level count must be 1..=6, got {}",
                self.parities.len()
            )));
        }
        if self.content.is_empty() {
            return Err(CoreError::ConfigInvalid("at least one content path is required".into()));
        }
        Ok(())
    }

    pub fn hash_algorithm(&self) -> Algorithm {
        Algorithm::parse(&self.array.hash).expect("validated at load time")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(body: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_a_minimal_valid_config() {
        let f = write_config(
            r#"
            [array]
            block_size = 262144
            hash = "murmur3"

            [[disk]]
            name = "d1"
            path = "/mnt/d1"

            [[parity]]
            path = "/mnt/parity/snapraid.parity"

            content = ["/mnt/d1/snapraid.content"]
            "#,
        );
        let config = Config::load(f.path()).unwrap();
        assert_eq!(config.array.block_size, 262144);
        assert_eq!(config.disks.len(), 1);
        assert_eq!(config.parities.len(), 1);
        assert_eq!(config.hash_algorithm(), Algorithm::Murmur3);
    }

    #[test]
    fn rejects_a_non_power_of_two_block_size() {
        let f = write_config(
            r#"
            [array]
            block_size = 300000

            [[disk]]
            name = "d1"
            path = "/mnt/d1"

            [[parity]]
            path = "/mnt/parity/snapraid.parity"

            content = ["/mnt/d1/snapraid.content"]
            "#,
        );
        assert!(matches!(Config::load(f.path()), Err(CoreError::ConfigInvalid(_))));
    }

    #[test]
    fn rejects_more_than_six_parity_levels() {
        let mut body = String::from(
            r#"
            [array]
            block_size = 262144

            [[disk]]
            name = "d1"
            path = "/mnt/d1"
            "#,
        );
        for i in 0..7 {
            body.push_str(&format!("\n[[parity]]\npath = \"/mnt/p{i}\"\n"));
        }
        body.push_str("\ncontent = [\"/mnt/d1/snapraid.content\"]\n");
        let f = write_config(&body);
        assert!(matches!(Config::load(f.path()), Err(CoreError::ConfigInvalid(_))));
    }
}
