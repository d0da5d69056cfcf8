use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::regression::RegressionThreshold;

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PersistentSettings {
    #[serde(default)]
    pub thresholds: Vec<RegressionThreshold>,
}

pub fn load_settings(path: &Path) -> PersistentSettings {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Ignoring unreadable settings file {:?}: {}", path, e);
            PersistentSettings::default()
        }),
        Err(_) => PersistentSettings::default(),
    }
}

/// Written to a sibling temp file, then renamed into place.
pub fn save_settings(path: &Path, settings: &PersistentSettings) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
