//! Recording configuration, resolved from the environment once at session
//! initialization.
//!
//! The recorder is a library living inside an instrumented host process, so
//! all knobs are environment variables rather than CLI flags:
//!
//! - `RECUENTO_DIR`: root directory for session output
//!   (default `/tmp/recuento`); each session writes to `<dir>/<pid>/`.
//! - `RECUENTO_ADDR_WIDTH`: `32` or `64`, the serialized address field
//!   width (default: native pointer width).
//! - `RECUENTO_DISABLE`: `1` or `true` turns recording into a no-op for
//!   the whole process lifetime.

use std::path::{Path, PathBuf};

use crate::call_edge::AddressWidth;

pub const ENV_OUTPUT_DIR: &str = "RECUENTO_DIR";
pub const ENV_ADDR_WIDTH: &str = "RECUENTO_ADDR_WIDTH";
pub const ENV_DISABLE: &str = "RECUENTO_DISABLE";

const DEFAULT_OUTPUT_DIR: &str = "/tmp/recuento";

/// File name of the call-count record stream within a session directory.
pub const CALLS_FILE_NAME: &str = "calls";

/// File name of the address-space snapshot within a session directory.
pub const MAPS_FILE_NAME: &str = "maps";

/// Resolved recording configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileConfig {
    /// Root output directory; sessions live in per-pid subdirectories.
    pub output_dir: PathBuf,
    /// Serialized address field width.
    pub address_width: AddressWidth,
    /// When false, the session records nothing and flushes nothing.
    pub enabled: bool,
}

impl ProfileConfig {
    /// Read configuration from the environment. Unparseable values fall
    /// back to defaults with a warning rather than failing the host.
    pub fn from_env() -> Self {
        let output_dir = std::env::var_os(ENV_OUTPUT_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

        let address_width = match std::env::var(ENV_ADDR_WIDTH) {
            Ok(v) if v == "32" => AddressWidth::W32,
            Ok(v) if v == "64" => AddressWidth::W64,
            Ok(v) => {
                tracing::warn!(
                    value = %v,
                    "unrecognized {} (expected 32 or 64), using native width",
                    ENV_ADDR_WIDTH
                );
                AddressWidth::native()
            }
            Err(_) => AddressWidth::native(),
        };

        let enabled = !std::env::var(ENV_DISABLE)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            output_dir,
            address_width,
            enabled,
        }
    }

    /// Session directory for process `pid`.
    pub fn session_dir(&self, pid: u32) -> PathBuf {
        self.output_dir.join(pid.to_string())
    }

    /// Path of the calls file within `session_dir`.
    pub fn calls_path(session_dir: &Path) -> PathBuf {
        session_dir.join(CALLS_FILE_NAME)
    }

    /// Path of the maps snapshot within `session_dir`.
    pub fn maps_path(session_dir: &Path) -> PathBuf {
        session_dir.join(MAPS_FILE_NAME)
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            address_width: AddressWidth::native(),
            enabled: true,
        }
    }
}
