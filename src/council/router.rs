//! Mode routing: which pipeline a turn runs
//!
//! A conversation's first turn always gets the full deliberation, with no
//! history (there is none). Every later turn takes the caller's requested
//! mode, defaulting to the cheap chairman-only path, with history passed.

use serde::{Deserialize, Serialize};

/// Which pipeline handles a turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnMode {
    /// Full three-stage deliberation
    Council,
    /// Direct chairman response
    Chairman,
}

/// Routing decision for one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Routing {
    pub mode: TurnMode,
    pub include_history: bool,
    pub first_turn: bool,
}

/// Decide a turn's mode from prior message count and the caller's request
pub fn route(prior_messages: usize, requested: Option<TurnMode>) -> Routing {
    if prior_messages == 0 {
        Routing {
            mode: TurnMode::Council,
            include_history: false,
            first_turn: true,
        }
    } else {
        Routing {
            mode: requested.unwrap_or(TurnMode::Chairman),
            include_history: true,
            first_turn: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_turn_forces_council() {
        let routing = route(0, Some(TurnMode::Chairman));
        assert_eq!(routing.mode, TurnMode::Council);
        assert!(!routing.include_history);
        assert!(routing.first_turn);
    }

    #[test]
    fn test_later_turns_default_to_chairman() {
        let routing = route(2, None);
        assert_eq!(routing.mode, TurnMode::Chairman);
        assert!(routing.include_history);
        assert!(!routing.first_turn);
    }

    #[test]
    fn test_later_turns_honor_requested_mode() {
        let routing = route(4, Some(TurnMode::Council));
        assert_eq!(routing.mode, TurnMode::Council);
        assert!(routing.include_history);
    }

    #[test]
    fn test_mode_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(TurnMode::Council).unwrap(),
            serde_json::json!("council")
        );
        assert_eq!(
            serde_json::to_value(TurnMode::Chairman).unwrap(),
            serde_json::json!("chairman")
        );
    }
}
