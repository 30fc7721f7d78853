//! Persona resolution for council turns
//!
//! A conversation may carry a personality configuration: per-model persona
//! assignments, an optional chairman persona, and a pool used when the
//! configuration asks for a fresh random draw every turn. The deliberation
//! pipeline never sees personas directly; it consumes the per-stage prompt
//! fragments resolved here once at the start of each turn.

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A persona that can be assigned to a council member or the chairman
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Personality {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub expertise: Vec<String>,
    #[serde(default)]
    pub perspective: String,
    #[serde(default)]
    pub communication_style: String,
}

/// How personas are spread across the council
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PersonalityMode {
    #[default]
    None,
    AllSame,
    EachDifferent,
}

/// Personality configuration attached to a conversation
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersonalityConfig {
    #[serde(default)]
    pub mode: PersonalityMode,
    /// Fixed persona per council model
    #[serde(default)]
    pub assignments: HashMap<String, Personality>,
    /// Persona applied to the chairman's synthesis
    #[serde(default)]
    pub chairman: Option<Personality>,
    /// Personas drawn from when `shuffle_each_turn` is set
    #[serde(default)]
    pub pool: Vec<Personality>,
    /// Redraw assignments from the pool at the start of every turn
    #[serde(default)]
    pub shuffle_each_turn: bool,
}

/// Which pipeline stage a prompt fragment is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStage {
    Response,
    Ranking,
    Synthesis,
}

/// Per-stage prompt fragments for one council model
#[derive(Debug, Clone, Default)]
pub struct StageFragments {
    pub response: String,
    pub ranking: String,
}

/// Resolved fragments for a single turn
///
/// Turn-scoped: built once when the turn starts, discarded with the turn.
#[derive(Debug, Clone, Default)]
pub struct TurnPersonas {
    /// Fragments per council model; absent models get no system entry
    pub council: HashMap<String, StageFragments>,
    /// Fragment for the chairman's synthesis prompt
    pub chairman: Option<String>,
}

impl TurnPersonas {
    pub fn response_fragment(&self, model: &str) -> Option<&str> {
        self.council
            .get(model)
            .map(|f| f.response.as_str())
            .filter(|f| !f.is_empty())
    }

    pub fn ranking_fragment(&self, model: &str) -> Option<&str> {
        self.council
            .get(model)
            .map(|f| f.ranking.as_str())
            .filter(|f| !f.is_empty())
    }
}

/// Build a system prompt fragment from a persona for one stage
pub fn build_prompt(personality: &Personality, stage: PromptStage) -> String {
    match stage {
        PromptStage::Response => {
            let mut lines = vec![format!(
                "You are responding as a {}. {}",
                personality.name, personality.role
            )];
            if !personality.expertise.is_empty() {
                lines.push(format!(
                    "Your areas of expertise: {}",
                    personality.expertise.join(", ")
                ));
            }
            if !personality.communication_style.is_empty() {
                lines.push(format!(
                    "Communication style: {}",
                    personality.communication_style
                ));
            }
            lines.join("\n")
        }
        PromptStage::Ranking => {
            if personality.perspective.is_empty() {
                format!(
                    "Evaluate these responses from your perspective as a {}.",
                    personality.name
                )
            } else {
                format!(
                    "Evaluate these responses from your perspective as a {}.\nConsider: {}",
                    personality.name, personality.perspective
                )
            }
        }
        PromptStage::Synthesis => format!(
            "You are synthesizing as a {}. {}\nBring your unique perspective to create a balanced final answer.",
            personality.name, personality.role
        ),
    }
}

/// Resolve a conversation's personality configuration into the fragments one
/// turn will use
///
/// With `shuffle_each_turn` set, every model draws a fresh persona from the
/// pool; otherwise the fixed assignments apply. Mode `None` resolves to no
/// fragments at all.
pub fn resolve_for_turn(config: Option<&PersonalityConfig>, models: &[String]) -> TurnPersonas {
    let Some(config) = config else {
        return TurnPersonas::default();
    };
    if config.mode == PersonalityMode::None {
        return TurnPersonas::default();
    }

    let mut council = HashMap::new();

    if config.shuffle_each_turn && !config.pool.is_empty() {
        let mut rng = rand::rng();
        for model in models {
            if let Some(personality) = config.pool.choose(&mut rng) {
                council.insert(model.clone(), fragments_for(personality));
            }
        }
    } else {
        for model in models {
            if let Some(personality) = config.assignments.get(model) {
                council.insert(model.clone(), fragments_for(personality));
            }
        }
    }

    let chairman = config
        .chairman
        .as_ref()
        .map(|p| build_prompt(p, PromptStage::Synthesis));

    TurnPersonas { council, chairman }
}

fn fragments_for(personality: &Personality) -> StageFragments {
    StageFragments {
        response: build_prompt(personality, PromptStage::Response),
        ranking: build_prompt(personality, PromptStage::Ranking),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona(name: &str) -> Personality {
        Personality {
            name: name.to_string(),
            role: "You take the long view.".to_string(),
            expertise: vec!["systems".to_string(), "tradeoffs".to_string()],
            perspective: "Weigh maintainability over novelty.".to_string(),
            communication_style: "Terse.".to_string(),
        }
    }

    fn models() -> Vec<String> {
        vec!["model-a".to_string(), "model-b".to_string()]
    }

    #[test]
    fn test_none_mode_resolves_empty() {
        let config = PersonalityConfig {
            mode: PersonalityMode::None,
            assignments: [("model-a".to_string(), persona("Architect"))].into(),
            ..Default::default()
        };
        let personas = resolve_for_turn(Some(&config), &models());
        assert!(personas.council.is_empty());
        assert!(personas.chairman.is_none());
    }

    #[test]
    fn test_missing_config_resolves_empty() {
        let personas = resolve_for_turn(None, &models());
        assert!(personas.council.is_empty());
    }

    #[test]
    fn test_fixed_assignments_resolve_per_model() {
        let config = PersonalityConfig {
            mode: PersonalityMode::EachDifferent,
            assignments: [
                ("model-a".to_string(), persona("Architect")),
                ("model-b".to_string(), persona("Skeptic")),
            ]
            .into(),
            ..Default::default()
        };
        let personas = resolve_for_turn(Some(&config), &models());
        assert_eq!(personas.council.len(), 2);
        assert!(personas
            .response_fragment("model-a")
            .unwrap()
            .contains("Architect"));
        assert!(personas
            .ranking_fragment("model-b")
            .unwrap()
            .contains("Skeptic"));
    }

    #[test]
    fn test_shuffle_with_single_pool_entry_is_deterministic() {
        let config = PersonalityConfig {
            mode: PersonalityMode::EachDifferent,
            pool: vec![persona("Only")],
            shuffle_each_turn: true,
            ..Default::default()
        };
        let personas = resolve_for_turn(Some(&config), &models());
        for model in models() {
            assert!(personas
                .response_fragment(&model)
                .unwrap()
                .contains("Only"));
        }
    }

    #[test]
    fn test_chairman_fragment_uses_synthesis_framing() {
        let config = PersonalityConfig {
            mode: PersonalityMode::AllSame,
            chairman: Some(persona("Chair")),
            ..Default::default()
        };
        let personas = resolve_for_turn(Some(&config), &models());
        let fragment = personas.chairman.unwrap();
        assert!(fragment.contains("synthesizing as a Chair"));
    }

    #[test]
    fn test_build_prompt_response_includes_expertise() {
        let text = build_prompt(&persona("Architect"), PromptStage::Response);
        assert!(text.contains("responding as a Architect"));
        assert!(text.contains("systems, tradeoffs"));
        assert!(text.contains("Communication style: Terse."));
    }

    #[test]
    fn test_build_prompt_ranking_without_perspective() {
        let mut p = persona("Architect");
        p.perspective.clear();
        let text = build_prompt(&p, PromptStage::Ranking);
        assert!(text.ends_with("as a Architect."));
        assert!(!text.contains("Consider:"));
    }
}
