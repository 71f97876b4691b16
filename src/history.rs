//! Generation history persisted as a JSON document in the data directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::apis::Provider;

/// At most this many entries are kept; older ones fall off the end.
pub const HISTORY_CAP: usize = 100;

/// A finished lookup waiting to be recorded.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub input: String,
    pub citation: String,
    pub raw: serde_json::Value,
    pub source: Option<Provider>,
    pub succeeded: bool,
}

/// One stored lookup, newest first in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub input: String,
    pub citation: String,
    pub raw: serde_json::Value,
    pub source: Option<Provider>,
    pub succeeded: bool,
}

/// Envelope written by the export operation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryExport {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub item_count: usize,
    pub items: Vec<HistoryEntry>,
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> io::Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.path)?;
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&data)?)
    }

    fn save(&self, entries: &[HistoryEntry]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, json)
    }

    /// Record one lookup at the front of the list, returning the stored
    /// entry with its assigned id.
    pub fn append(&self, new: NewEntry) -> io::Result<HistoryEntry> {
        let mut entries = self.load()?;
        // Millisecond ids can collide within a fast batch
        let mut id = Utc::now().timestamp_millis();
        while entries.iter().any(|e| e.id == id) {
            id += 1;
        }
        let entry = HistoryEntry {
            id,
            timestamp: Utc::now(),
            input: new.input,
            citation: new.citation,
            raw: new.raw,
            source: new.source,
            succeeded: new.succeeded,
        };
        entries.insert(0, entry.clone());
        entries.truncate(HISTORY_CAP);
        self.save(&entries)?;
        Ok(entry)
    }

    pub fn load_all(&self) -> io::Result<Vec<HistoryEntry>> {
        self.load()
    }

    /// Returns whether an entry with that id existed.
    pub fn delete_by_id(&self, id: i64) -> io::Result<bool> {
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        if entries.len() == before {
            return Ok(false);
        }
        self.save(&entries)?;
        Ok(true)
    }

    pub fn clear(&self) -> io::Result<()> {
        self.save(&[])
    }

    pub fn export(&self) -> io::Result<HistoryExport> {
        let items = self.load()?;
        Ok(HistoryExport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            item_count: items.len(),
            items,
        })
    }
}
