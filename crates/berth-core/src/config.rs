//! Persistent configuration for berth.
//!
//! Stores user settings in `~/.berth/config.json`. Both settings are optional
//! and only needed on machines where the defaults do not fit, e.g. several
//! Xcode installs side by side or a small `/tmp`.
//!
//! # Example
//!
//! ```no_run
//! use berth_core::config::BerthConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let config = BerthConfig::load();
//!
//! if let Some(dir) = &config.developer_dir {
//!     println!("Xcode: {}", dir.display());
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

const CONFIG_FILENAME: &str = "config.json";

/// Returns the berth state directory (`~/.berth`), if a home directory exists.
pub fn berth_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".berth"))
}

/// Persistent berth configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct BerthConfig {
    /// Xcode developer directory. Takes precedence over `DEVELOPER_DIR` and
    /// `xcode-select -p`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub developer_dir: Option<PathBuf>,

    /// Parent directory for temporary `.ipa` extraction. Defaults to the
    /// system temp directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
}

impl BerthConfig {
    /// Load config from `~/.berth/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        match berth_dir() {
            Some(dir) => Self::load_from(&dir.join(CONFIG_FILENAME)),
            None => Self::default(),
        }
    }

    /// Load config from an explicit path, with the same fallback as
    /// [`load`](Self::load).
    pub fn load_from(path: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "ignoring invalid config");
            Self::default()
        })
    }
}
