//! Persistence for adapter resume tokens.
//!
//! One JSON file under the data directory maps `adapter_id -> cursor`
//! (log offset, database key, broker offset, API ETag). Written via a
//! temp file and rename so a crash mid-write never corrupts the store.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::IngestError;

const STORE_FILE: &str = "cursors.json";

pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self, IngestError> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;
        Ok(Self {
            path: data_dir.join(STORE_FILE),
        })
    }

    /// Load all persisted cursors. A missing file is an empty store.
    pub fn load(&self) -> Result<HashMap<String, String>, IngestError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, cursors: &HashMap<String, String>) -> Result<(), IngestError> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(cursors)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), count = cursors.len(), "cursors persisted");
        Ok(())
    }
}
