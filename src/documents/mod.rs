//! Document context library
//!
//! Holds precomputed text blobs with an active flag each and assembles the
//! context preamble prepended to a query when a turn opts in. Text
//! extraction from binary formats happens upstream; this library only ever
//! sees text.
//!
//! Layout under the data directory:
//!
//! ~/.local/share/quorum/
//! ├── documents/
//! │   └── {id}.txt
//! └── document_registry.json

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Cap on stored text per document
const MAX_TEXT_CHARS: usize = 500 * 1024;

/// Marker appended when a document's text is cut at the cap
const TRUNCATION_MARKER: &str = "\n\n[... Text truncated due to length ...]";

/// Source of the context blob a turn may prepend to its query
pub trait DocumentContextSource: Send + Sync {
    /// Concatenated text of all active documents, empty when none are active
    fn active_context(&self) -> Result<String>;
}

/// Registry entry for one stored document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub filename: String,
    pub text_len: usize,
    pub truncated: bool,
    pub active: bool,
    pub added_at: DateTime<Utc>,
}

/// File-backed document library
pub struct DocumentLibrary {
    root: PathBuf,
}

impl DocumentLibrary {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("documents"))?;
        Ok(Self { root })
    }

    fn registry_path(&self) -> PathBuf {
        self.root.join("document_registry.json")
    }

    fn text_path(&self, id: &str) -> PathBuf {
        self.root.join("documents").join(format!("{}.txt", id))
    }

    fn load_registry(&self) -> Result<BTreeMap<String, DocumentRecord>> {
        let path = self.registry_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content).context("Failed to parse document registry")
    }

    fn save_registry(&self, registry: &BTreeMap<String, DocumentRecord>) -> Result<()> {
        let content = serde_json::to_string_pretty(registry)?;
        std::fs::write(self.registry_path(), content)?;
        Ok(())
    }

    /// Store a precomputed text blob as a new active document
    pub fn add(&self, filename: &str, text: &str) -> Result<DocumentRecord> {
        let truncated = text.chars().count() > MAX_TEXT_CHARS;
        let stored: String = if truncated {
            let capped: String = text.chars().take(MAX_TEXT_CHARS).collect();
            format!("{}{}", capped, TRUNCATION_MARKER)
        } else {
            text.to_string()
        };

        let record = DocumentRecord {
            id: uuid::Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            text_len: stored.chars().count(),
            truncated,
            active: true,
            added_at: Utc::now(),
        };

        std::fs::write(self.text_path(&record.id), &stored)?;

        let mut registry = self.load_registry()?;
        registry.insert(record.id.clone(), record.clone());
        self.save_registry(&registry)?;

        Ok(record)
    }

    /// List all documents, newest first
    pub fn list(&self) -> Result<Vec<DocumentRecord>> {
        let mut records: Vec<DocumentRecord> = self.load_registry()?.into_values().collect();
        records.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        Ok(records)
    }

    /// Flip a document's active flag; false when the id is unknown
    pub fn set_active(&self, id: &str, active: bool) -> Result<bool> {
        let mut registry = self.load_registry()?;
        let Some(record) = registry.get_mut(id) else {
            return Ok(false);
        };
        record.active = active;
        self.save_registry(&registry)?;
        Ok(true)
    }

    /// Remove a document and its text; false when the id is unknown
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut registry = self.load_registry()?;
        if registry.remove(id).is_none() {
            return Ok(false);
        }
        let path = self.text_path(id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        self.save_registry(&registry)?;
        Ok(true)
    }
}

impl DocumentContextSource for DocumentLibrary {
    fn active_context(&self) -> Result<String> {
        let registry = self.load_registry()?;
        let active: Vec<&DocumentRecord> = registry.values().filter(|r| r.active).collect();
        if active.is_empty() {
            return Ok(String::new());
        }

        let mut parts = vec!["=== UPLOADED DOCUMENTS ===\n".to_string()];
        for record in active {
            let text = std::fs::read_to_string(self.text_path(&record.id))
                .with_context(|| format!("Failed to read document {}", record.id))?;
            parts.push(format!("--- Document: {} ---", record.filename));
            parts.push(text);
            parts.push(String::new());
        }
        parts.push("=== END DOCUMENTS ===".to_string());

        Ok(parts.join("\n"))
    }
}

/// Context source that never contributes anything
pub struct NoDocuments;

impl DocumentContextSource for NoDocuments {
    fn active_context(&self) -> Result<String> {
        Ok(String::new())
    }
}
