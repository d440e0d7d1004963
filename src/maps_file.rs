//! Parser for the recorded address-space snapshot.
//!
//! The snapshot is a verbatim copy of `/proc/<pid>/maps`. Each line
//! describes one mapped region:
//!
//! ```text
//! 55d4f2a00000-55d4f2a21000 r-xp 00021000 08:02 1048601  /usr/bin/target
//! ```
//!
//! The offline tool only cares about executable file-backed regions: an
//! instruction address falls inside exactly one of them, and
//! `addr - region.start + region.offset` is the file offset that
//! symbolization resolves against.

use std::path::Path;

use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MapsParseError {
    #[error("cannot read maps file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("maps line {line_no} is not a region description: {line:?}")]
    BadLine { line_no: usize, line: String },
}

/// One region of the address space at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub start: u64,
    pub end: u64,
    pub perms: String,
    pub offset: u64,
    pub dev_major: u16,
    pub dev_minor: u16,
    pub inode: u64,
    pub pathname: String,
}

impl Region {
    pub fn is_executable(&self) -> bool {
        self.perms.contains('x')
    }

    pub fn is_file_backed(&self) -> bool {
        !self.pathname.is_empty() && !self.pathname.starts_with('[')
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.start <= addr && addr < self.end
    }
}

/// A resolved address: which object it belongs to and at what file offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectOffset {
    pub pathname: String,
    pub offset: u64,
}

/// Executable regions of one snapshot, sorted by start address.
#[derive(Debug, Default)]
pub struct AddressMap {
    regions: Vec<Region>,
}

fn region_pattern() -> Regex {
    // start-end perms offset dev:dev inode [pathname]
    Regex::new(
        r"^([0-9a-f]{1,16})-([0-9a-f]{1,16}) ([\w-]+) ([0-9a-f]{1,16}) ([0-9a-f]{2,}):([0-9a-f]{2,}) (\d+)\s*(.*)$",
    )
    .expect("region pattern is valid")
}

/// Parse one maps line.
pub fn parse_region(line: &str, pattern: &Regex) -> Option<Region> {
    let caps = pattern.captures(line)?;
    Some(Region {
        start: u64::from_str_radix(&caps[1], 16).ok()?,
        end: u64::from_str_radix(&caps[2], 16).ok()?,
        perms: caps[3].to_string(),
        offset: u64::from_str_radix(&caps[4], 16).ok()?,
        dev_major: u16::from_str_radix(&caps[5], 16).ok()?,
        dev_minor: u16::from_str_radix(&caps[6], 16).ok()?,
        inode: caps[7].parse().ok()?,
        pathname: caps[8].trim().to_string(),
    })
}

impl AddressMap {
    /// Parse a snapshot, keeping only executable regions.
    pub fn parse(content: &str) -> Result<Self, MapsParseError> {
        let pattern = region_pattern();
        let mut regions = Vec::new();
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let region = parse_region(line, &pattern).ok_or_else(|| MapsParseError::BadLine {
                line_no: i + 1,
                line: line.to_string(),
            })?;
            if region.is_executable() {
                regions.push(region);
            }
        }
        regions.sort_by_key(|r| r.start);
        Ok(Self { regions })
    }

    /// Load and parse a snapshot file.
    pub fn load(path: &Path) -> Result<Self, MapsParseError> {
        let content = std::fs::read_to_string(path).map_err(|source| MapsParseError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// The executable region containing `addr`, if any.
    pub fn resolve(&self, addr: u64) -> Option<&Region> {
        let idx = self.regions.partition_point(|r| r.start <= addr);
        if idx == 0 {
            return None;
        }
        let region = &self.regions[idx - 1];
        region.contains(addr).then_some(region)
    }

    /// Translate `addr` into an object pathname and file offset.
    pub fn translate(&self, addr: u64) -> Option<ObjectOffset> {
        let region = self.resolve(addr)?;
        Some(ObjectOffset {
            pathname: region.pathname.clone(),
            offset: addr - region.start + region.offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = "\
00400000-00452000 r-xp 00000000 08:02 173521 /usr/bin/target
00651000-00652000 r--p 00051000 08:02 173521 /usr/bin/target
00652000-00655000 rw-p 00052000 08:02 173521 /usr/bin/target
7f2c4e4f3000-7f2c4e6b3000 r-xp 00000000 08:02 1048601 /lib/x86_64-linux-gnu/libc-2.27.so
7f2c4e6b3000-7f2c4e8b3000 ---p 001c0000 08:02 1048601 /lib/x86_64-linux-gnu/libc-2.27.so
7ffc7b8f0000-7ffc7b911000 rw-p 00000000 00:00 0 [stack]
7ffc7b9a4000-7ffc7b9a6000 r-xp 00000000 00:00 0 [vdso]
";

    #[test]
    fn test_parse_keeps_executable_regions_only() {
        let map = AddressMap::parse(SNAPSHOT).unwrap();
        // Two file-backed x regions plus [vdso].
        assert_eq!(map.regions().len(), 3);
        assert!(map.regions().iter().all(Region::is_executable));
    }

    #[test]
    fn test_parse_region_fields() {
        let pattern = region_pattern();
        let region = parse_region(
            "00400000-00452000 r-xp 00021000 08:02 173521 /usr/bin/target",
            &pattern,
        )
        .unwrap();
        assert_eq!(region.start, 0x400000);
        assert_eq!(region.end, 0x452000);
        assert_eq!(region.perms, "r-xp");
        assert_eq!(region.offset, 0x21000);
        assert_eq!(region.dev_major, 0x08);
        assert_eq!(region.dev_minor, 0x02);
        assert_eq!(region.inode, 173521);
        assert_eq!(region.pathname, "/usr/bin/target");
    }

    #[test]
    fn test_parse_anonymous_region() {
        let pattern = region_pattern();
        let region =
            parse_region("7ffc7b8f0000-7ffc7b911000 rw-p 00000000 00:00 0", &pattern).unwrap();
        assert_eq!(region.pathname, "");
        assert!(!region.is_file_backed());
    }

    #[test]
    fn test_resolve_inside_and_outside() {
        let map = AddressMap::parse(SNAPSHOT).unwrap();
        let region = map.resolve(0x400100).unwrap();
        assert_eq!(region.pathname, "/usr/bin/target");

        // Readable-only data region was filtered out.
        assert!(map.resolve(0x651500).is_none());
        // Below every region.
        assert!(map.resolve(0x1000).is_none());
        // One past the end is outside.
        assert!(map.resolve(0x452000).is_none());
    }

    #[test]
    fn test_translate_applies_file_offset() {
        let map = AddressMap::parse(
            "00400000-00452000 r-xp 00021000 08:02 173521 /usr/bin/target\n",
        )
        .unwrap();
        let oo = map.translate(0x400100).unwrap();
        assert_eq!(oo.pathname, "/usr/bin/target");
        assert_eq!(oo.offset, 0x100 + 0x21000);
    }

    #[test]
    fn test_bad_line_is_an_error() {
        let err = AddressMap::parse("this is not a maps line\n");
        assert!(matches!(err, Err(MapsParseError::BadLine { line_no: 1, .. })));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = AddressMap::load(&dir.path().join("absent"));
        assert!(matches!(err, Err(MapsParseError::Io { .. })));
    }
}
