//! Open-positions snapshot store.
//!
//! Persists the live position map as JSON so a restart resumes open
//! positions instead of orphaning them. Writes go to a temp file first and
//! are renamed into place, so readers never observe a torn snapshot.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::engine::Position;

pub struct OpenPositionsStore {
    path: PathBuf,
}

impl OpenPositionsStore {
    pub fn new(data_dir: &std::path::Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        Ok(Self {
            path: data_dir.join("open_positions.json"),
        })
    }

    /// Replace the snapshot. Positions are persisted keyed by id, whatever
    /// the caller's in-memory keying is.
    pub fn save<'a, I>(&self, positions: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Position>,
    {
        let by_id: HashMap<&str, &Position> = positions
            .into_iter()
            .map(|p| (p.id.as_str(), p))
            .collect();
        let json =
            serde_json::to_string_pretty(&by_id).context("Failed to serialize open positions")?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to move snapshot into {}", self.path.display()))?;
        Ok(())
    }

    /// Load the snapshot, keyed by position id. A missing file means a clean
    /// start; a corrupt file is logged and treated as empty rather than
    /// aborting startup.
    pub fn load(&self) -> HashMap<String, Position> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) if !c.trim().is_empty() => c,
            Ok(_) => return HashMap::new(),
            Err(_) => return HashMap::new(),
        };

        match serde_json::from_str::<HashMap<String, Position>>(&content) {
            Ok(map) => {
                if !map.is_empty() {
                    info!(count = map.len(), "📂 Restored open positions from snapshot");
                }
                map
            }
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "Unreadable positions snapshot, starting empty");
                HashMap::new()
            }
        }
    }
}
