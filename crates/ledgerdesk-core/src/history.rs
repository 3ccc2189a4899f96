//! Local history of ledger results.
//!
//! Every invoke, query, discover and identity lookup is recorded with its
//! outcome so earlier results can be reviewed page by page. The list is
//! bounded, newest first, and persisted as JSON in the data directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::credentials::write_atomic;

const HISTORY_FILE: &str = "history.json";

/// Entries shown per page.
pub const PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Invoke,
    Query,
    Discover,
    Identities,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Invoke => "invoke",
            EntryKind::Query => "query",
            EntryKind::Discover => "discover",
            EntryKind::Identities => "identities",
        }
    }
}

impl From<crate::api::CallKind> for EntryKind {
    fn from(kind: crate::api::CallKind) -> Self {
        match kind {
            crate::api::CallKind::Invoke => EntryKind::Invoke,
            crate::api::CallKind::Query => EntryKind::Query,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum Outcome {
    Success(Value),
    Failure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: u64,
    pub kind: EntryKind,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub chaincode: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub outcome: Outcome,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// An entry not yet numbered; [`History::record`] assigns the id.
    pub fn new(kind: EntryKind, outcome: Outcome) -> Self {
        Self {
            id: 0,
            kind,
            channel: None,
            chaincode: None,
            method: None,
            args: Vec::new(),
            outcome,
            recorded_at: Utc::now(),
        }
    }

    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn on_chaincode(mut self, chaincode: impl Into<String>, method: impl Into<String>, args: Vec<String>) -> Self {
        self.chaincode = Some(chaincode.into());
        self.method = Some(method.into());
        self.args = args;
        self
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.recorded_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Covers clock skew as well
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                // Round up: 1h 30m+ becomes 2h
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }

    /// One-line description, e.g. `query mychannel/basic ReadAsset(asset1)`.
    pub fn summary(&self) -> String {
        let mut line = self.kind.as_str().to_string();
        match (&self.channel, &self.chaincode) {
            (Some(channel), Some(chaincode)) => line.push_str(&format!(" {}/{}", channel, chaincode)),
            (Some(channel), None) => line.push_str(&format!(" {}", channel)),
            _ => {}
        }
        if let Some(ref method) = self.method {
            line.push_str(&format!(" {}({})", method, self.args.join(", ")));
        }
        line
    }
}

/// On-disk form, stamped like the rest of the local data.
#[derive(Debug, Serialize, Deserialize)]
struct StoredHistory {
    entries: Vec<HistoryEntry>,
    saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub number: usize,
    pub total_pages: usize,
    pub entries: Vec<HistoryEntry>,
}

pub struct History {
    path: Option<PathBuf>,
    entries: Vec<HistoryEntry>,
    limit: usize,
    next_id: u64,
}

impl History {
    /// A history that lives only as long as the process.
    pub fn in_memory(limit: usize) -> Self {
        Self {
            path: None,
            entries: Vec::new(),
            limit: limit.max(1),
            next_id: 1,
        }
    }

    /// Open the history in `dir`. An unreadable file is logged and replaced
    /// on the next write rather than blocking startup.
    pub fn open(dir: &Path, limit: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;
        let path = dir.join(HISTORY_FILE);

        let mut history = Self::in_memory(limit);
        match Self::read(&path) {
            Ok(Some(stored)) => {
                history.next_id = stored.entries.iter().map(|e| e.id).max().unwrap_or(0) + 1;
                history.entries = stored.entries;
                history.entries.truncate(history.limit);
                debug!(entries = history.entries.len(), "Loaded history");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Ignoring unreadable history"),
        }
        history.path = Some(path);
        Ok(history)
    }

    fn read(path: &Path) -> Result<Option<StoredHistory>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read history file: {}", path.display()))?;
        let stored = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse history file: {}", path.display()))?;
        Ok(Some(stored))
    }

    fn persist(&self) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let stored = StoredHistory {
            entries: self.entries.clone(),
            saved_at: Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&stored)?;
        write_atomic(path, contents.as_bytes())
            .with_context(|| format!("Failed to write history file: {}", path.display()))
    }

    /// Add an entry at the front, dropping the oldest beyond the limit.
    pub fn record(&mut self, mut entry: HistoryEntry) -> Result<u64> {
        entry.id = self.next_id;
        self.next_id += 1;
        let id = entry.id;

        self.entries.insert(0, entry);
        self.entries.truncate(self.limit);
        self.persist()?;
        Ok(id)
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn get(&self, id: u64) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_pages(&self) -> usize {
        self.entries.len().div_ceil(PAGE_SIZE).max(1)
    }

    /// 1-based page of entries, newest first. Out-of-range pages are empty.
    pub fn page(&self, number: usize) -> Page {
        let number = number.max(1);
        let start = (number - 1).saturating_mul(PAGE_SIZE).min(self.entries.len());
        let end = (start + PAGE_SIZE).min(self.entries.len());
        Page {
            number,
            total_pages: self.total_pages(),
            entries: self.entries[start..end].to_vec(),
        }
    }

    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.persist()
    }
}

// ============================================================================
// Tests
// ============================================================================
