//! Project-wide constants.

use std::path::PathBuf;
use std::time::Duration;

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const HOMEPAGE: &str = env!("CARGO_PKG_HOMEPAGE");
pub const REPO: &str = env!("CARGO_PKG_REPOSITORY");

/// Default listen address. CodeFormer historically owned 8001,
/// Ref-LDM 8002 and GFPGAN 8003.
pub const DEFAULT_BIND: &str = "0.0.0.0:8001";

/// Root under which per-request output directories are created.
pub const DEFAULT_OUTPUT_ROOT: &str = "results";

/// Directory scanned by `/list_images` when none is given.
pub const DEFAULT_IMAGE_DIR: &str = "inputs/whole_imgs";

/// Model inference can take minutes on a cold GPU.
pub const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Connect timeout when a backend lives in another process.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Captured stdout/stderr beyond this many bytes is truncated.
pub const MAX_OUTPUT_BYTES: usize = 50_000;

/// Extensions accepted by `/list_images` (matched case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Default settings database path: `~/.restora/restora.db`.
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".restora")
        .join("restora.db")
}
