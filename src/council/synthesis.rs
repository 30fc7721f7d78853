//! Stage 3: chairman synthesis, plus the direct chairman path
//!
//! The chairman sees the original question, every de-anonymized answer, the
//! peer evaluations, and the aggregate standings, and produces one final
//! response. The chairman-only path skips all of that for cheap follow-ups:
//! history plus the new query, one call. Both paths degrade to a fixed
//! sentinel on gateway failure so the turn always commits.

use crate::council::ranking::{AggregateRanking, RankingSubmission};
use crate::council::stage1::ModelAnswer;
use crate::llm::{ChatMessage, ModelGateway};
use serde::{Deserialize, Serialize};

/// Sentinel text stored when the chairman model fails to answer
pub const SYNTHESIS_UNAVAILABLE: &str = "[no synthesis: the chairman model did not respond]";

/// Fallback conversation title when title generation fails
pub const DEFAULT_TITLE: &str = "New Conversation";

/// Maximum title length before truncation
const MAX_TITLE_CHARS: usize = 50;

/// The chairman's final output for a turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChairmanResult {
    pub model: String,
    pub response: String,
    pub ok: bool,
}

fn synthesis_prompt(
    query: &str,
    answers: &[ModelAnswer],
    rankings: &[RankingSubmission],
    aggregate: &AggregateRanking,
    context_summary: Option<&str>,
) -> String {
    let answers_text = answers
        .iter()
        .map(|a| format!("Model: {}\nResponse: {}", a.model, a.response))
        .collect::<Vec<_>>()
        .join("\n\n");

    let rankings_text = rankings
        .iter()
        .filter(|r| !r.raw_text.is_empty())
        .map(|r| format!("Model: {}\nRanking: {}", r.model, r.raw_text))
        .collect::<Vec<_>>()
        .join("\n\n");

    let standings_text = aggregate
        .standings
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {} (score {})", i + 1, s.model, s.score))
        .collect::<Vec<_>>()
        .join("\n");

    let context_section = match context_summary {
        Some(summary) if !summary.is_empty() => format!(
            "CONVERSATION CONTEXT:\nThis is a follow-up question. Here is the recent conversation history:\n{}\n\n",
            summary
        ),
        _ => String::new(),
    };

    format!(
        "{context_section}You are the Chairman of a model council. Multiple AI models have provided responses to a user's question, and then ranked each other's responses.\n\n\
         Original Question: {query}\n\n\
         STAGE 1 - Individual Responses:\n{answers_text}\n\n\
         STAGE 2 - Peer Rankings:\n{rankings_text}\n\n\
         Combined standings (best first):\n{standings_text}\n\n\
         Your task as Chairman is to synthesize all of this information into a single, comprehensive, accurate answer to the user's original question. Consider:\n\
         - The individual responses and their insights\n\
         - The peer rankings and what they reveal about response quality\n\
         - Any patterns of agreement or disagreement\n\n\
         Provide a clear, well-reasoned final answer that represents the council's collective wisdom:"
    )
}

/// Run Stage 3 against the chairman model
pub async fn synthesize(
    gateway: &dyn ModelGateway,
    chairman: &str,
    query: &str,
    answers: &[ModelAnswer],
    rankings: &[RankingSubmission],
    aggregate: &AggregateRanking,
    context_summary: Option<&str>,
    persona_fragment: Option<&str>,
) -> ChairmanResult {
    let prompt = synthesis_prompt(query, answers, rankings, aggregate, context_summary);

    let mut messages = Vec::with_capacity(2);
    if let Some(fragment) = persona_fragment {
        messages.push(ChatMessage::system(fragment));
    }
    messages.push(ChatMessage::user(prompt));

    match gateway.invoke(chairman, &messages).await {
        Ok(response) => ChairmanResult {
            model: chairman.to_string(),
            response,
            ok: true,
        },
        Err(e) => {
            tracing::warn!("Chairman model {} failed in stage 3: {}", chairman, e);
            ChairmanResult {
                model: chairman.to_string(),
                response: SYNTHESIS_UNAVAILABLE.to_string(),
                ok: false,
            }
        }
    }
}

/// Direct chairman reply: history plus the new query, one gateway call
pub async fn chairman_reply(
    gateway: &dyn ModelGateway,
    chairman: &str,
    history: &[ChatMessage],
    query: &str,
) -> ChairmanResult {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.extend_from_slice(history);
    messages.push(ChatMessage::user(query));

    match gateway.invoke(chairman, &messages).await {
        Ok(response) => ChairmanResult {
            model: chairman.to_string(),
            response,
            ok: true,
        },
        Err(e) => {
            tracing::warn!("Chairman model {} failed: {}", chairman, e);
            ChairmanResult {
                model: chairman.to_string(),
                response: SYNTHESIS_UNAVAILABLE.to_string(),
                ok: false,
            }
        }
    }
}

/// Generate a short conversation title from the first user message
///
/// Failure degrades to `DEFAULT_TITLE`; a title never fails a turn.
pub async fn generate_title(gateway: &dyn ModelGateway, title_model: &str, query: &str) -> String {
    let prompt = format!(
        "Generate a very short title (3-5 words maximum) that summarizes the following question.\n\
         The title should be concise and descriptive. Do not use quotes or punctuation in the title.\n\n\
         Question: {}\n\nTitle:",
        query
    );
    let messages = vec![ChatMessage::user(prompt)];

    match gateway.invoke(title_model, &messages).await {
        Ok(raw) => {
            let title = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
            if title.is_empty() {
                return DEFAULT_TITLE.to_string();
            }
            if title.chars().count() > MAX_TITLE_CHARS {
                let truncated: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
                format!("{}...", truncated)
            } else {
                title.to_string()
            }
        }
        Err(e) => {
            tracing::warn!("Title generation via {} failed: {}", title_model, e);
            DEFAULT_TITLE.to_string()
        }
    }
}
