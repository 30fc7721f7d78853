//! History builder: committed messages to model input
//!
//! Two views of a conversation feed the pipeline. Stage 1 and the direct
//! chairman path take the linear chat history as-is. Stages 2 and 3 have
//! structured prompts and take a short plain-text summary of the most recent
//! turns instead, with long entries truncated.

use crate::config::HistoryConfig;
use crate::llm::{ChatMessage, Role};
use crate::storage::Message;

/// Flatten committed messages into a linear chat history
///
/// A council message contributes its synthesized answer, not the raw
/// per-model responses; cancelled turns contribute nothing.
pub fn linear_history(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter_map(|message| match message {
            Message::User { content } => Some(ChatMessage::user(content.clone())),
            Message::Council { stage3, .. } => {
                Some(ChatMessage::assistant(stage3.response.clone()))
            }
            Message::Chairman { response, .. } => {
                Some(ChatMessage::assistant(response.clone()))
            }
            Message::Cancelled {} => None,
        })
        .collect()
}

/// Summarize the most recent turns of a linear history
///
/// Keeps the last `summary_turns` user/assistant pairs and caps each entry
/// at `summary_snippet_chars` characters with an ellipsis marker. Returns
/// `None` for an empty history so callers skip the context section entirely.
pub fn summarize(history: &[ChatMessage], config: &HistoryConfig) -> Option<String> {
    if history.is_empty() {
        return None;
    }

    let keep = config.summary_turns * 2;
    let start = history.len().saturating_sub(keep);

    let lines: Vec<String> = history[start..]
        .iter()
        .map(|entry| {
            let role = match entry.role {
                Role::Assistant => "Assistant",
                _ => "User",
            };
            let content: String = if entry.content.chars().count() > config.summary_snippet_chars {
                let truncated: String = entry
                    .content
                    .chars()
                    .take(config.summary_snippet_chars)
                    .collect();
                format!("{}...", truncated)
            } else {
                entry.content.clone()
            };
            format!("{}: {}", role, content)
        })
        .collect();

    Some(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::council::ranking::{label_map, AggregateRanking, Standing};
    use crate::council::stage1::ModelAnswer;
    use crate::council::synthesis::ChairmanResult;

    fn council_message(final_text: &str) -> Message {
        let stage1 = vec![ModelAnswer {
            model: "m-a".to_string(),
            response: "raw stage1 answer".to_string(),
            ok: true,
        }];
        let label_to_model = label_map(&stage1);
        Message::Council {
            stage2: Vec::new(),
            stage3: ChairmanResult {
                model: "chair".to_string(),
                response: final_text.to_string(),
                ok: true,
            },
            aggregate: AggregateRanking {
                standings: vec![Standing {
                    model: "m-a".to_string(),
                    score: 0,
                }],
                label_to_model,
            },
            stage1,
        }
    }

    #[test]
    fn test_council_message_contributes_stage3_text() {
        let messages = vec![
            Message::User {
                content: "question".to_string(),
            },
            council_message("the synthesis"),
        ];

        let history = linear_history(&messages);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "the synthesis");
        assert!(!history[1].content.contains("raw stage1 answer"));
    }

    #[test]
    fn test_chairman_and_cancelled_messages() {
        let messages = vec![
            Message::User {
                content: "q1".to_string(),
            },
            Message::Cancelled {},
            Message::User {
                content: "q2".to_string(),
            },
            Message::Chairman {
                model: "chair".to_string(),
                response: "quick answer".to_string(),
                ok: true,
            },
        ];

        let history = linear_history(&messages);
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].content, "quick answer");
    }

    #[test]
    fn test_empty_history_has_no_summary() {
        assert!(summarize(&[], &HistoryConfig::default()).is_none());
    }

    #[test]
    fn test_summary_keeps_recent_turns_only() {
        let config = HistoryConfig {
            summary_turns: 1,
            summary_snippet_chars: 500,
        };
        let history = vec![
            ChatMessage::user("old question"),
            ChatMessage::assistant("old answer"),
            ChatMessage::user("new question"),
            ChatMessage::assistant("new answer"),
        ];

        let summary = summarize(&history, &config).unwrap();
        assert_eq!(summary, "User: new question\nAssistant: new answer");
    }

    #[test]
    fn test_summary_truncates_long_entries() {
        let config = HistoryConfig {
            summary_turns: 3,
            summary_snippet_chars: 10,
        };
        let history = vec![ChatMessage::user("a".repeat(25))];

        let summary = summarize(&history, &config).unwrap();
        assert_eq!(summary, format!("User: {}...", "a".repeat(10)));
    }

    #[test]
    fn test_summary_truncation_is_char_safe() {
        let config = HistoryConfig {
            summary_turns: 3,
            summary_snippet_chars: 2,
        };
        let history = vec![ChatMessage::user("héllo wörld")];

        let summary = summarize(&history, &config).unwrap();
        assert_eq!(summary, "User: hé...");
    }
}
