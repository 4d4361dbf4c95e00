use std::{fs, io::ErrorKind, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// The only persisted configuration: whether the daemon should be started
/// at login. Registration with the platform launcher happens outside the
/// core; this is the preference it reads.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub launch_at_login: bool,
}

impl Settings {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(SETTINGS_FILE_NAME);
        let content = match fs::read_to_string(&path) {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).context(format!("Failed to read {path:?}")),
        };
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {path:?}"))
    }

    pub fn store(&self, dir: &Path) -> Result<()> {
        let path = dir.join(SETTINGS_FILE_NAME);
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, serde_json::to_string_pretty(self)?)?;
        // Rename over the old file instead of rewriting it in place.
        fs::rename(&temp, &path)?;
        Ok(())
    }
}
