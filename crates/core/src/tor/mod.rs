//! Tor process supervision
//!
//! Binary staging, torrc generation, log classification and the supervisor
//! that ties them together.

pub mod binary;
pub mod identity;
pub mod log_buffer;
pub mod log_parser;
pub mod state;
pub mod supervisor;
pub mod torrc;

pub use binary::{asset_path, reported_abi, select_variant, stage_binary, DEFAULT_VARIANT};
pub use identity::HiddenServiceDir;
pub use log_buffer::LogBuffer;
pub use log_parser::{classify, LogEvent};
pub use state::{Lifecycle, TorStatus};
pub use supervisor::TorSupervisor;
pub use torrc::TorrcParams;

use darkmsg_common::{DarkMsgError, Result};
use std::path::{Path, PathBuf};

/// Resolve `path` against the current directory. Tor is started with its own
/// working directory, so every path handed to it must be absolute.
pub(crate) fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| DarkMsgError::config(format!("cannot resolve {}: {}", path.display(), e)))?;
    Ok(cwd.join(path))
}
