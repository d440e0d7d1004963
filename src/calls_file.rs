//! Offline reader for recorded `calls` files.
//!
//! The stream has no header, so the record width has to come from
//! configuration or from the file length. A length divisible by exactly
//! one of the two record sizes pins the width; when both divide (multiples
//! of 48 bytes), the native width wins and the caller can override.

use std::path::Path;

use thiserror::Error;

use crate::call_edge::AddressWidth;
use crate::record::{decode_record, record_bytes, CallRecord};

#[derive(Error, Debug)]
pub enum CallsFileError {
    #[error("cannot read calls file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("calls file length {len} is not a whole number of {width}-bit records")]
    Truncated { len: u64, width: AddressWidthDisplay },
}

/// Display wrapper so the error message prints `32`/`64`, not the enum.
#[derive(Debug)]
pub struct AddressWidthDisplay(pub AddressWidth);

impl std::fmt::Display for AddressWidthDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pick a record width for a file of `len` bytes. `None` when the length
/// fits neither size.
pub fn infer_width(len: u64) -> Option<AddressWidth> {
    let w32 = record_bytes(AddressWidth::W32) as u64;
    let w64 = record_bytes(AddressWidth::W64) as u64;
    match (len % w32 == 0, len % w64 == 0) {
        (true, false) => Some(AddressWidth::W32),
        (false, true) => Some(AddressWidth::W64),
        (true, true) => {
            // 0 bytes, or a multiple of 48: genuinely ambiguous.
            Some(AddressWidth::native())
        }
        (false, false) => None,
    }
}

/// Read and decode a calls file. `width` overrides inference.
pub fn read_calls_file(
    path: &Path,
    width: Option<AddressWidth>,
) -> Result<Vec<CallRecord>, CallsFileError> {
    let bytes = std::fs::read(path).map_err(|source| CallsFileError::Io {
        path: path.display().to_string(),
        source,
    })?;
    decode_calls(&bytes, width)
}

/// Decode an in-memory record stream.
pub fn decode_calls(
    bytes: &[u8],
    width: Option<AddressWidth>,
) -> Result<Vec<CallRecord>, CallsFileError> {
    let len = bytes.len() as u64;
    let width = match width.or_else(|| infer_width(len)) {
        Some(w) => w,
        None => {
            return Err(CallsFileError::Truncated {
                len,
                width: AddressWidthDisplay(AddressWidth::native()),
            })
        }
    };

    let rec_len = record_bytes(width);
    if bytes.len() % rec_len != 0 {
        return Err(CallsFileError::Truncated {
            len,
            width: AddressWidthDisplay(width),
        });
    }

    Ok(bytes
        .chunks_exact(rec_len)
        .map(|chunk| decode_record(width, chunk))
        .collect())
}
