//! quorum: multi-model deliberation service
//!
//! This library provides:
//! - A three-stage deliberation pipeline: parallel answer collection,
//!   anonymized peer ranking with aggregation, and chairman synthesis
//! - A cheap chairman-only path for follow-up turns, with mode routing
//! - An ordered progress-event stream with cancellation
//! - Conversation storage, a document context library, and persona support
//! - An HTTP API exposing all of the above

pub mod config;
pub mod council;
pub mod documents;
pub mod llm;
pub mod personality;
pub mod storage;
pub mod transport;

pub use config::Config;
pub use council::{CouncilEngine, CouncilEvent, TurnMode, TurnRequest};
pub use storage::{ConversationStore, FileStore, MemoryStore};
