//! Stage 1: independent response collection
//!
//! Every council model is asked the (augmented) query in parallel. The stage
//! waits for all calls to settle and returns exactly one answer per
//! configured model, in configured order, no matter which call finishes
//! first. A single model's failure yields a placeholder answer rather than
//! aborting the stage.

use crate::llm::{ChatMessage, ModelGateway};
use crate::personality::TurnPersonas;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

/// Placeholder text stored when a council model fails to answer
pub const ANSWER_UNAVAILABLE: &str = "[no answer: the model did not respond]";

/// One council model's Stage 1 answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelAnswer {
    pub model: String,
    pub response: String,
    pub ok: bool,
}

/// Build the chat input one council model sees in Stage 1
fn stage1_messages(
    model: &str,
    query: &str,
    history: &[ChatMessage],
    personas: &TurnPersonas,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if let Some(fragment) = personas.response_fragment(model) {
        messages.push(ChatMessage::system(fragment));
    }
    messages.extend_from_slice(history);
    messages.push(ChatMessage::user(query));
    messages
}

/// Collect answers from all council models concurrently
pub async fn collect_responses(
    gateway: &dyn ModelGateway,
    models: &[String],
    query: &str,
    history: &[ChatMessage],
    personas: &TurnPersonas,
) -> Vec<ModelAnswer> {
    let calls = models.iter().map(|model| {
        let messages = stage1_messages(model, query, history, personas);
        async move { gateway.invoke(model, &messages).await }
    });

    // join_all preserves input order, so answers line up with the configured
    // council regardless of completion order.
    let results = join_all(calls).await;

    models
        .iter()
        .zip(results)
        .map(|(model, result)| match result {
            Ok(response) => ModelAnswer {
                model: model.clone(),
                response,
                ok: true,
            },
            Err(e) => {
                tracing::warn!("Council model {} failed in stage 1: {}", model, e);
                ModelAnswer {
                    model: model.clone(),
                    response: ANSWER_UNAVAILABLE.to_string(),
                    ok: false,
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GatewayError, Role};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Gateway that answers with the model name after a per-model delay,
    /// failing models whose name contains "down"
    struct EchoGateway;

    #[async_trait]
    impl ModelGateway for EchoGateway {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(
            &self,
            model: &str,
            _messages: &[ChatMessage],
        ) -> Result<String, GatewayError> {
            // Invert latency relative to list position so completion order
            // differs from presentation order.
            let delay = if model.ends_with("first") { 50 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if model.contains("down") {
                Err(GatewayError::Network("unreachable".to_string()))
            } else {
                Ok(format!("answer from {}", model))
            }
        }
    }

    fn council() -> Vec<String> {
        vec![
            "slow-first".to_string(),
            "down-model".to_string(),
            "fast-last".to_string(),
        ]
    }

    #[tokio::test]
    async fn test_answers_follow_configured_order() {
        let answers = collect_responses(
            &EchoGateway,
            &council(),
            "q",
            &[],
            &TurnPersonas::default(),
        )
        .await;

        let order: Vec<&str> = answers.iter().map(|a| a.model.as_str()).collect();
        assert_eq!(order, vec!["slow-first", "down-model", "fast-last"]);
    }

    #[tokio::test]
    async fn test_failed_model_gets_placeholder() {
        let answers = collect_responses(
            &EchoGateway,
            &council(),
            "q",
            &[],
            &TurnPersonas::default(),
        )
        .await;

        assert_eq!(answers.len(), 3);
        let failed = &answers[1];
        assert!(!failed.ok);
        assert_eq!(failed.response, ANSWER_UNAVAILABLE);
        assert!(answers[0].ok);
        assert!(answers[2].ok);
    }

    #[test]
    fn test_message_assembly_with_history_and_persona() {
        let mut personas = TurnPersonas::default();
        personas.council.insert(
            "m".to_string(),
            crate::personality::StageFragments {
                response: "Answer as a skeptic.".to_string(),
                ranking: String::new(),
            },
        );
        let history = vec![
            ChatMessage::user("earlier question"),
            ChatMessage::assistant("earlier answer"),
        ];

        let messages = stage1_messages("m", "new question", &history, &personas);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "earlier question");
        assert_eq!(messages[3], ChatMessage::user("new question"));
    }

    #[test]
    fn test_message_assembly_without_persona() {
        let messages = stage1_messages("m", "q", &[], &TurnPersonas::default());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }
}
