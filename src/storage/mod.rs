//! Conversation persistence
//!
//! Conversations are append-only message logs. The deliberation engine
//! writes through the `ConversationStore` trait and never holds partial
//! state in storage: a turn commits exactly one outcome message (council,
//! chairman, or cancelled) or none at all.
//!
//! The file-backed store keeps one JSON document per conversation under the
//! platform data directory:
//!
//! ~/.local/share/quorum/
//! └── conversations/
//!     └── {id}.json

use crate::council::{AggregateRanking, ChairmanResult, ModelAnswer, RankingSubmission};
use crate::personality::PersonalityConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Conversation does not exist
    #[error("Conversation not found: {0}")]
    NotFound(String),

    /// Filesystem failure
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Corrupt or unreadable conversation document
    #[error("Storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A committed message in a conversation
///
/// The council variant carries all four pipeline products together; a
/// message with only some of them cannot be represented, so partial
/// pipeline state can never reach storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    User {
        content: String,
    },
    Council {
        stage1: Vec<ModelAnswer>,
        stage2: Vec<RankingSubmission>,
        stage3: ChairmanResult,
        aggregate: AggregateRanking,
    },
    Chairman {
        model: String,
        response: String,
        ok: bool,
    },
    Cancelled {},
}

/// A stored conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub personalities: Option<PersonalityConfig>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Conversation metadata for list views
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Trait for conversation stores
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a new conversation, returning it with a fresh id
    async fn create(
        &self,
        personalities: Option<PersonalityConfig>,
    ) -> Result<Conversation, StorageError>;

    /// Load a conversation by id
    async fn load(&self, id: &str) -> Result<Option<Conversation>, StorageError>;

    /// Append one message to an existing conversation
    async fn append_message(&self, id: &str, message: Message) -> Result<(), StorageError>;

    /// Set a conversation's title
    async fn update_title(&self, id: &str, title: &str) -> Result<(), StorageError>;

    /// List conversations, newest first
    async fn list(&self) -> Result<Vec<ConversationSummary>, StorageError>;
}

fn new_conversation(personalities: Option<PersonalityConfig>) -> Conversation {
    Conversation {
        id: uuid::Uuid::new_v4().to_string(),
        created_at: Utc::now(),
        title: None,
        personalities,
        messages: Vec::new(),
    }
}

fn summarize(conversation: &Conversation) -> ConversationSummary {
    ConversationSummary {
        id: conversation.id.clone(),
        title: conversation.title.clone(),
        created_at: conversation.created_at,
        message_count: conversation.messages.len(),
    }
}

/// File-backed conversation store (one JSON document per conversation)
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store rooted at the given directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("conversations"))?;
        Ok(Self { root })
    }

    /// Default platform data directory
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quorum")
    }

    fn conversation_path(&self, id: &str) -> PathBuf {
        self.root.join("conversations").join(format!("{}.json", id))
    }

    fn read(&self, id: &str) -> Result<Option<Conversation>, StorageError> {
        let path = self.conversation_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write(&self, conversation: &Conversation) -> Result<(), StorageError> {
        let path = self.conversation_path(&conversation.id);
        let content = serde_json::to_string_pretty(conversation)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for FileStore {
    async fn create(
        &self,
        personalities: Option<PersonalityConfig>,
    ) -> Result<Conversation, StorageError> {
        let conversation = new_conversation(personalities);
        self.write(&conversation)?;
        Ok(conversation)
    }

    async fn load(&self, id: &str) -> Result<Option<Conversation>, StorageError> {
        self.read(id)
    }

    async fn append_message(&self, id: &str, message: Message) -> Result<(), StorageError> {
        let mut conversation = self
            .read(id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        conversation.messages.push(message);
        self.write(&conversation)
    }

    async fn update_title(&self, id: &str, title: &str) -> Result<(), StorageError> {
        let mut conversation = self
            .read(id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        conversation.title = Some(title.to_string());
        self.write(&conversation)
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, StorageError> {
        let dir = self.root.join("conversations");
        let mut summaries = Vec::new();

        for entry in std::fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Ok(content) = std::fs::read_to_string(&path) {
                    if let Ok(conversation) = serde_json::from_str::<Conversation>(&content) {
                        summaries.push(summarize(&conversation));
                    }
                }
            }
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }
}

/// In-memory conversation store, used by tests and one-shot CLI runs
#[derive(Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create(
        &self,
        personalities: Option<PersonalityConfig>,
    ) -> Result<Conversation, StorageError> {
        let conversation = new_conversation(personalities);
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn load(&self, id: &str) -> Result<Option<Conversation>, StorageError> {
        Ok(self.conversations.lock().unwrap().get(id).cloned())
    }

    async fn append_message(&self, id: &str, message: Message) -> Result<(), StorageError> {
        let mut conversations = self.conversations.lock().unwrap();
        let conversation = conversations
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        conversation.messages.push(message);
        Ok(())
    }

    async fn update_title(&self, id: &str, title: &str) -> Result<(), StorageError> {
        let mut conversations = self.conversations.lock().unwrap();
        let conversation = conversations
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        conversation.title = Some(title.to_string());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, StorageError> {
        let mut summaries: Vec<ConversationSummary> = self
            .conversations
            .lock()
            .unwrap()
            .values()
            .map(summarize)
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::council::{label_map, Standing};

    fn council_message() -> Message {
        let stage1 = vec![
            ModelAnswer {
                model: "m-a".to_string(),
                response: "alpha".to_string(),
                ok: true,
            },
            ModelAnswer {
                model: "m-b".to_string(),
                response: "beta".to_string(),
                ok: true,
            },
        ];
        let label_to_model = label_map(&stage1);
        Message::Council {
            stage2: vec![RankingSubmission {
                model: "m-a".to_string(),
                raw_text: "FINAL RANKING:\n1. Response B\n2. Response A".to_string(),
                ranking: vec!["Response B".to_string(), "Response A".to_string()],
                ok: true,
            }],
            stage3: ChairmanResult {
                model: "chair".to_string(),
                response: "final".to_string(),
                ok: true,
            },
            aggregate: AggregateRanking {
                standings: vec![
                    Standing {
                        model: "m-b".to_string(),
                        score: 1,
                    },
                    Standing {
                        model: "m-a".to_string(),
                        score: 0,
                    },
                ],
                label_to_model,
            },
            stage1,
        }
    }

    #[test]
    fn test_message_kind_tags() {
        let user = serde_json::to_value(Message::User {
            content: "hi".to_string(),
        })
        .unwrap();
        assert_eq!(user["kind"], "user");

        let cancelled = serde_json::to_value(Message::Cancelled {}).unwrap();
        assert_eq!(cancelled["kind"], "cancelled");

        let council = serde_json::to_value(council_message()).unwrap();
        assert_eq!(council["kind"], "council");
        assert!(council["stage1"].is_array());
        assert!(council["aggregate"]["standings"].is_array());
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        let conversation = store.create(None).await.unwrap();
        store
            .append_message(
                &conversation.id,
                Message::User {
                    content: "q".to_string(),
                },
            )
            .await
            .unwrap();
        store
            .append_message(&conversation.id, council_message())
            .await
            .unwrap();
        store.update_title(&conversation.id, "A Title").await.unwrap();

        let loaded = store.load(&conversation.id).await.unwrap().unwrap();
        assert_eq!(loaded.title.as_deref(), Some("A Title"));
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[1], council_message());
    }

    #[tokio::test]
    async fn test_file_store_cancelled_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        let conversation = store.create(None).await.unwrap();
        store
            .append_message(&conversation.id, Message::Cancelled {})
            .await
            .unwrap();

        let loaded = store.load(&conversation.id).await.unwrap().unwrap();
        assert_eq!(loaded.messages[0], Message::Cancelled {});
    }

    #[tokio::test]
    async fn test_append_to_missing_conversation_is_not_found() {
        let store = MemoryStore::new();
        let result = store
            .append_message(
                "nope",
                Message::User {
                    content: "q".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let store = MemoryStore::new();
        let first = store.create(None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.create(None).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }
}
