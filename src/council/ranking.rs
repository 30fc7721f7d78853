//! Stage 2: anonymized peer ranking and rank aggregation
//!
//! Stage 1 answers are shown to every council model under opaque labels
//! ("Response A", "Response B", ...). Each model returns a free-text
//! evaluation ending in a structured ranking block, which is parsed and
//! validated as a permutation of the presented labels. Valid submissions are
//! combined into one aggregate ordering; invalid ones are dropped from
//! aggregation but kept for the caller. A model's own answer is included in
//! the set it ranks — the anonymization is the bias mitigation.

use crate::llm::{ChatMessage, ModelGateway};
use crate::personality::TurnPersonas;
use crate::council::stage1::ModelAnswer;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

static NUMBERED_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+\.\s*Response [A-Z]").expect("valid regex"));
static LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"Response [A-Z]").expect("valid regex"));

/// One council model's ranking of the anonymized answer set
///
/// `ranking` holds the parsed label order; `ok` is false when the parse was
/// not a permutation of the presented labels, in which case the submission
/// is excluded from aggregation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankingSubmission {
    pub model: String,
    pub raw_text: String,
    pub ranking: Vec<String>,
    pub ok: bool,
}

/// One model's place in the aggregate ordering
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Standing {
    pub model: String,
    pub score: u32,
}

/// Combined ranking across all valid submissions, best first
///
/// Carries the label map so callers can de-anonymize the submissions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateRanking {
    pub standings: Vec<Standing>,
    pub label_to_model: BTreeMap<String, String>,
}

/// Label for the answer at a Stage 1 presentation index
pub fn label_for(index: usize) -> String {
    format!("Response {}", (b'A' + index as u8) as char)
}

/// Build the private label→model map for a turn
///
/// Never sent to the models being asked to rank.
pub fn label_map(answers: &[ModelAnswer]) -> BTreeMap<String, String> {
    answers
        .iter()
        .enumerate()
        .map(|(i, answer)| (label_for(i), answer.model.clone()))
        .collect()
}

/// Build the ranking prompt shown to every council model
fn ranking_prompt(query: &str, answers: &[ModelAnswer], context_summary: Option<&str>) -> String {
    let responses_text = answers
        .iter()
        .enumerate()
        .map(|(i, answer)| format!("{}:\n{}", label_for(i), answer.response))
        .collect::<Vec<_>>()
        .join("\n\n");

    let context_section = match context_summary {
        Some(summary) if !summary.is_empty() => format!(
            "CONVERSATION CONTEXT:\nThis is a follow-up question. Here is the recent conversation history:\n{}\n\n",
            summary
        ),
        _ => String::new(),
    };

    format!(
        "{context_section}You are evaluating different responses to the following question:\n\n\
         Question: {query}\n\n\
         Here are the responses from different models (anonymized):\n\n\
         {responses_text}\n\n\
         Your task:\n\
         1. First, evaluate each response individually. For each response, explain what it does well and what it does poorly.\n\
         2. Then, at the very end of your response, provide a final ranking.\n\n\
         IMPORTANT: Your final ranking MUST be formatted EXACTLY as follows:\n\
         - Start with the line \"FINAL RANKING:\" (all caps, with colon)\n\
         - Then list the responses from best to worst as a numbered list\n\
         - Each line should be: number, period, space, then ONLY the response label (e.g., \"1. Response A\")\n\
         - Do not add any other text or explanations in the ranking section\n\n\
         Now provide your evaluation and ranking:"
    )
}

/// Parse the ranking block out of a model's free-text evaluation
///
/// Prefers the numbered list after a "FINAL RANKING:" marker; falls back to
/// scanning for bare labels when the model ignored the format.
pub fn parse_ranking(text: &str) -> Vec<String> {
    if let Some((_, section)) = text.split_once("FINAL RANKING:") {
        let numbered: Vec<String> = NUMBERED_LABEL
            .find_iter(section)
            .filter_map(|m| LABEL.find(m.as_str()))
            .map(|m| m.as_str().to_string())
            .collect();
        if !numbered.is_empty() {
            return numbered;
        }
        let bare: Vec<String> = LABEL
            .find_iter(section)
            .map(|m| m.as_str().to_string())
            .collect();
        if !bare.is_empty() {
            return bare;
        }
    }

    LABEL
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Check that a parsed ranking is a permutation of the expected label set
pub fn is_permutation(ranking: &[String], expected: usize) -> bool {
    if ranking.len() != expected {
        return false;
    }
    let mut seen = vec![false; expected];
    for label in ranking {
        let Some(index) = label
            .strip_prefix("Response ")
            .and_then(|s| s.chars().next())
            .map(|c| (c as usize).wrapping_sub('A' as usize))
        else {
            return false;
        };
        if index >= expected || seen[index] {
            return false;
        }
        seen[index] = true;
    }
    true
}

/// Ask every council model to rank the anonymized answers, concurrently
pub async fn collect_rankings(
    gateway: &dyn ModelGateway,
    models: &[String],
    query: &str,
    answers: &[ModelAnswer],
    context_summary: Option<&str>,
    personas: &TurnPersonas,
) -> Vec<RankingSubmission> {
    let prompt = ranking_prompt(query, answers, context_summary);

    let calls = models.iter().map(|model| {
        let mut messages = Vec::with_capacity(2);
        if let Some(fragment) = personas.ranking_fragment(model) {
            messages.push(ChatMessage::system(fragment));
        }
        messages.push(ChatMessage::user(prompt.clone()));
        async move { gateway.invoke(model, &messages).await }
    });

    let results = join_all(calls).await;

    models
        .iter()
        .zip(results)
        .map(|(model, result)| match result {
            Ok(raw_text) => {
                let ranking = parse_ranking(&raw_text);
                let ok = is_permutation(&ranking, answers.len());
                if !ok {
                    tracing::warn!(
                        "Discarding ranking from {}: not a permutation of {} labels",
                        model,
                        answers.len()
                    );
                }
                RankingSubmission {
                    model: model.clone(),
                    raw_text,
                    ranking,
                    ok,
                }
            }
            Err(e) => {
                tracing::warn!("Council model {} failed in stage 2: {}", model, e);
                RankingSubmission {
                    model: model.clone(),
                    raw_text: String::new(),
                    ranking: Vec::new(),
                    ok: false,
                }
            }
        })
        .collect()
}

/// Combine valid submissions into one aggregate ordering
///
/// Borda count: the label ranked best in a submission of n labels earns
/// n − 1 points, the next n − 2, down to 0 for the worst. Scores are summed
/// across valid submissions and models are sorted by score descending; ties
/// keep Stage 1 presentation order (the sort is stable), so identical inputs
/// always produce identical output. With no valid submissions the standings
/// equal Stage 1 order with all scores zero.
pub fn aggregate(
    answers: &[ModelAnswer],
    submissions: &[RankingSubmission],
    label_to_model: &BTreeMap<String, String>,
) -> AggregateRanking {
    let total = answers.len() as u32;
    let mut scores: BTreeMap<&str, u32> = BTreeMap::new();

    for submission in submissions.iter().filter(|s| s.ok) {
        for (position, label) in submission.ranking.iter().enumerate() {
            if let Some(model) = label_to_model.get(label) {
                *scores.entry(model.as_str()).or_insert(0) += total - 1 - position as u32;
            }
        }
    }

    let mut standings: Vec<Standing> = answers
        .iter()
        .map(|answer| Standing {
            model: answer.model.clone(),
            score: scores.get(answer.model.as_str()).copied().unwrap_or(0),
        })
        .collect();
    standings.sort_by(|a, b| b.score.cmp(&a.score));

    AggregateRanking {
        standings,
        label_to_model: label_to_model.clone(),
    }
}
