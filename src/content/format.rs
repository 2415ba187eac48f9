//! Line-oriented directive grammar for the content file (spec §6). Each
//! non-empty line is one directive: a keyword, then space-separated fields,
//! with the last field allowed to contain spaces (paths).

use crate::error::CoreError;
use crate::hash::Algorithm;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Blksize { bytes: u64 },
    Checksum { algorithm: Algorithm, seed: [u8; 16] },
    Prevchecksum { algorithm: Algorithm, seed: [u8; 16] },
    Map { disk: String, position: usize, uuid: String },
    File { disk: String, size: u64, mtime_sec: i64, mtime_nsec: i32, inode: u64, physical: u64, path: String },
    Blk { parity_pos: u64, hash: [u8; 16] },
    New { parity_pos: u64, hash: [u8; 16] },
    Chg { parity_pos: u64, hash: [u8; 16] },
    Off { file_block_index: u64 },
    Hole { disk: String, parity_pos: u64, hash: [u8; 16] },
    Info { count: u64, time: u32, flags: u32 },
    Sign { hex: [u8; 16] },
}

fn hex_encode(bytes: &[u8; 16]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Result<[u8; 16], CoreError> {
    if s.len() != 32 {
        return Err(malformed(format!("expected a 32-char hex hash, got {s:?}")));
    }
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
            .map_err(|_| malformed(format!("invalid hex byte in {s:?}")))?;
    }
    Ok(out)
}

fn malformed(reason: String) -> CoreError {
    CoreError::ContentCorrupt { path: Default::default(), reason }
}

impl Directive {
    pub fn encode(&self) -> String {
        match self {
            Directive::Blksize { bytes } => format!("blksize {bytes}"),
            Directive::Checksum { algorithm, seed } => {
                format!("checksum {} {}", algorithm.name(), hex_encode(seed))
            }
            Directive::Prevchecksum { algorithm, seed } => {
                format!("prevchecksum {} {}", algorithm.name(), hex_encode(seed))
            }
            Directive::Map { disk, position, uuid } => format!("map {disk} {position} {uuid}"),
            Directive::File { disk, size, mtime_sec, mtime_nsec, inode, physical, path } => {
                format!("file {disk} {size} {mtime_sec} {mtime_nsec} {inode} {physical} {path}")
            }
            Directive::Blk { parity_pos, hash } => format!("blk {parity_pos} {}", hex_encode(hash)),
            Directive::New { parity_pos, hash } => format!("new {parity_pos} {}", hex_encode(hash)),
            Directive::Chg { parity_pos, hash } => format!("chg {parity_pos} {}", hex_encode(hash)),
            Directive::Off { file_block_index } => format!("off {file_block_index}"),
            Directive::Hole { disk, parity_pos, hash } => {
                format!("hole {disk} {parity_pos} {}", hex_encode(hash))
            }
            Directive::Info { count, time, flags } => format!("info {count} {time} {flags}"),
            Directive::Sign { hex } => format!("sign {}", hex_encode(hex)),
        }
    }

    pub fn parse(line: &str) -> Result<Directive, CoreError> {
        let (keyword, rest) = line.split_once(' ').unwrap_or((line, ""));
        let fields: Vec<&str> = if rest.is_empty() { Vec::new() } else { rest.splitn(32, ' ').collect() };

        let field = |i: usize| -> Result<&str, CoreError> {
            fields
                .get(i)
                .copied()
                .ok_or_else(|| malformed(format!("{keyword}: missing field {i}")))
        };
        let parse_u64 = |s: &str| s.parse::<u64>().map_err(|_| malformed(format!("{keyword}: bad integer {s:?}")));
        let parse_algorithm = |s: &str| {
            Algorithm::parse(s).ok_or_else(|| malformed(format!("{keyword}: unknown hash algorithm {s:?}")))
        };

        match keyword {
            "blksize" => Ok(Directive::Blksize { bytes: parse_u64(field(0)?)? }),
            "checksum" => Ok(Directive::Checksum {
                algorithm: parse_algorithm(field(0)?)?,
                seed: hex_decode(field(1)?)?,
            }),
            "prevchecksum" => Ok(Directive::Prevchecksum {
                algorithm: parse_algorithm(field(0)?)?,
                seed: hex_decode(field(1)?)?,
            }),
            "map" => Ok(Directive::Map {
                disk: field(0)?.to_string(),
                position: field(1)?.parse().map_err(|_| malformed("map: bad position".into()))?,
                uuid: field(2).unwrap_or("").to_string(),
            }),
            "file" => {
                // The path is the final field and may itself contain spaces,
                // so split it out with a capped splitn rather than the
                // generic `fields` vector above.
                let mut it = rest.splitn(7, ' ');
                let disk = it.next().ok_or_else(|| malformed("file: missing disk".into()))?;
                let size = parse_u64(it.next().ok_or_else(|| malformed("file: missing size".into()))?)?;
                let mtime_sec: i64 = it
                    .next()
                    .ok_or_else(|| malformed("file: missing mtime_sec".into()))?
                    .parse()
                    .map_err(|_| malformed("file: bad mtime_sec".into()))?;
                let mtime_nsec: i32 = it
                    .next()
                    .ok_or_else(|| malformed("file: missing mtime_nsec".into()))?
                    .parse()
                    .map_err(|_| malformed("file: bad mtime_nsec".into()))?;
                let inode = parse_u64(it.next().ok_or_else(|| malformed("file: missing inode".into()))?)?;
                let physical = parse_u64(it.next().ok_or_else(|| malformed("file: missing physical".into()))?)?;
                let path = it.next().ok_or_else(|| malformed("file: missing path".into()))?.to_string();
                Ok(Directive::File { disk: disk.to_string(), size, mtime_sec, mtime_nsec, inode, physical, path })
            }
            "blk" => Ok(Directive::Blk { parity_pos: parse_u64(field(0)?)?, hash: hex_decode(field(1)?)? }),
            "new" => Ok(Directive::New { parity_pos: parse_u64(field(0)?)?, hash: hex_decode(field(1)?)? }),
            "chg" => Ok(Directive::Chg { parity_pos: parse_u64(field(0)?)?, hash: hex_decode(field(1)?)? }),
            "off" => Ok(Directive::Off { file_block_index: parse_u64(field(0)?)? }),
            "hole" => Ok(Directive::Hole {
                disk: field(0)?.to_string(),
                parity_pos: parse_u64(field(1)?)?,
                hash: hex_decode(field(2)?)?,
            }),
            "info" => Ok(Directive::Info {
                count: parse_u64(field(0)?)?,
                time: field(1)?.parse().map_err(|_| malformed("info: bad time".into()))?,
                flags: field(2)?.parse().map_err(|_| malformed("info: bad flags".into()))?,
            }),
            "sign" => Ok(Directive::Sign { hex: hex_decode(field(0)?)? }),
            other => Err(malformed(format!("unknown directive {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(d: Directive) {
        let line = d.encode();
        assert_eq!(Directive::parse(&line).unwrap(), d, "line={line:?}");
    }

    #[test]
    fn every_directive_kind_round_trips_through_text() {
        round_trip(Directive::Blksize { bytes: 262144 });
        round_trip(Directive::Checksum { algorithm: Algorithm::Murmur3, seed: [1u8; 16] });
        round_trip(Directive::Prevchecksum { algorithm: Algorithm::Spooky2, seed: [2u8; 16] });
        round_trip(Directive::Map { disk: "disk1".into(), position: 0, uuid: "abc-123".into() });
        round_trip(Directive::File {
            disk: "disk1".into(),
            size: 4096,
            mtime_sec: 1700000000,
            mtime_nsec: 123,
            inode: 42,
            physical: 0,
            path: "docs/report.txt".into(),
        });
        round_trip(Directive::Blk { parity_pos: 7, hash: [9u8; 16] });
        round_trip(Directive::New { parity_pos: 8, hash: [0u8; 16] });
        round_trip(Directive::Chg { parity_pos: 9, hash: [3u8; 16] });
        round_trip(Directive::Off { file_block_index: 5 });
        round_trip(Directive::Hole { disk: "disk1".into(), parity_pos: 3, hash: [4u8; 16] });
        round_trip(Directive::Info { count: 10, time: 1700000000, flags: 1 });
        round_trip(Directive::Sign { hex: [0xFFu8; 16] });
    }

    #[test]
    fn file_path_with_spaces_is_preserved() {
        round_trip(Directive::File {
            disk: "disk1".into(),
            size: 1,
            mtime_sec: 0,
            mtime_nsec: 0,
            inode: 1,
            physical: 0,
            path: "my documents/a report.txt".into(),
        });
    }

    #[test]
    fn unknown_directive_is_a_hard_error() {
        assert!(Directive::parse("frobnicate 1 2 3").is_err());
    }
}
