//! One-shot copy of the process address-space map.
//!
//! Symbolization needs to know where each object was loaded, and the
//! mapping is only meaningful while the process is alive, so the snapshot
//! is taken at session start, before any counts accumulate. The copy is an
//! opaque byte stream; parsing happens offline in [`crate::maps_file`].
//!
//! Snapshot failure is non-fatal and independent of counting.

use std::fs::File;
use std::io;
use std::path::Path;

use nix::sys::sendfile::sendfile;

const PROC_SELF_MAPS: &str = "/proc/self/maps";

// procfs files report zero length, so sendfile is driven by a fixed
// chunk size rather than the source size.
const SENDFILE_CHUNK: usize = 1 << 20;

/// Copy `/proc/self/maps` byte-for-byte to `dest`. Returns bytes written.
pub fn snapshot_proc_maps(dest: &Path) -> io::Result<u64> {
    copy_byte_stream(Path::new(PROC_SELF_MAPS), dest)
}

/// Byte-stream copy with a `sendfile` fast path. Some kernels refuse
/// `sendfile` from procfs, in which case the plain read/write loop takes
/// over from wherever the fast path stopped.
pub fn copy_byte_stream(src: &Path, dest: &Path) -> io::Result<u64> {
    let mut input = File::open(src)?;
    let mut output = File::create(dest)?;

    let mut written: u64 = 0;
    loop {
        match sendfile(&output, &input, None, SENDFILE_CHUNK) {
            Ok(0) => return Ok(written),
            Ok(n) => written += n as u64,
            Err(nix::errno::Errno::EINVAL) | Err(nix::errno::Errno::ENOSYS) => break,
            Err(e) => return Err(io::Error::from(e)),
        }
    }

    // Fallback: the file offset of `input` already reflects whatever
    // sendfile consumed, so io::copy picks up where it left off.
    let rest = io::copy(&mut input, &mut output)?;
    Ok(written + rest)
}
