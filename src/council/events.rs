//! Pipeline progress events
//!
//! Ordered lifecycle events describing a turn's progress, sent over an mpsc
//! channel and serialized directly as SSE payloads. Council turns emit the
//! stage sequence; chairman turns the short form; both end in exactly one
//! terminal event (`complete`, `error`, or `cancelled`).

use super::ranking::{AggregateRanking, RankingSubmission};
use super::router::TurnMode;
use super::stage1::ModelAnswer;
use super::synthesis::ChairmanResult;
use serde::{Deserialize, Serialize};

/// Events emitted while a turn runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CouncilEvent {
    /// Stage 1 fan-out started
    Stage1Start,

    /// All council answers settled
    Stage1Complete { answers: Vec<ModelAnswer> },

    /// Stage 2 ranking fan-out started
    Stage2Start,

    /// All ranking submissions settled and aggregated
    Stage2Complete {
        rankings: Vec<RankingSubmission>,
        aggregate: AggregateRanking,
    },

    /// Chairman synthesis started
    Stage3Start,

    /// Chairman synthesis settled
    Stage3Complete { result: ChairmanResult },

    /// Conversation title assigned (first turn only)
    TitleComplete { title: String },

    /// Direct chairman call started
    ChairmanStart,

    /// Direct chairman call settled
    ChairmanComplete { result: ChairmanResult },

    /// Terminal: turn committed
    Complete { mode: TurnMode },

    /// Terminal: unrecoverable failure, nothing further is emitted
    Error { message: String },

    /// Terminal: caller cancelled the turn
    Cancelled,
}

impl CouncilEvent {
    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CouncilEvent::Complete { .. } | CouncilEvent::Error { .. } | CouncilEvent::Cancelled
        )
    }
}
