//! Semantic Scoring with Automatic Penalties
//!
//! Scores a schema-valid candidate on a 0-1 scale. The default
//! [`HeuristicScorer`] starts from a base score and subtracts penalties for
//! weak content indicators:
//! - Empty or placeholder values
//! - Values echoing their own field name
//! - Too-short free text and empty arrays
//! - The same value repeated across fields
//! - Low lexical overlap with the unit's source context
//!
//! Every penalty also yields a critique line that is fed back into the next
//! regeneration prompt.

use std::collections::HashSet;

use serde_json::Value;

use super::schema::{FieldKind, fold_key};
use crate::types::GenerationUnit;

/// Configuration for heuristic scoring
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Score before penalties
    pub base_score: f64,
    pub empty_value_penalty: f64,
    pub placeholder_penalty: f64,
    pub echo_penalty: f64,
    pub too_short_penalty: f64,
    pub empty_array_penalty: f64,
    pub duplicate_penalty: f64,
    pub low_overlap_penalty: f64,
    /// Free-text strings shorter than this are penalized
    pub min_text_chars: usize,
    /// Required share of candidate words found in the source context
    pub min_context_overlap: f64,
    pub min_score: f64,
    pub max_score: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_score: 1.0,
            empty_value_penalty: 0.25,
            placeholder_penalty: 0.25,
            echo_penalty: 0.20,
            too_short_penalty: 0.10,
            empty_array_penalty: 0.10,
            duplicate_penalty: 0.10,
            low_overlap_penalty: 0.15,
            min_text_chars: 3,
            min_context_overlap: 0.2,
            min_score: 0.0,
            max_score: 1.0,
        }
    }
}

/// One applied penalty
#[derive(Debug, Clone, PartialEq)]
pub struct Penalty {
    pub code: &'static str,
    pub field: Option<String>,
    pub weight: f64,
    pub critique: String,
}

/// Scorer output
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticAssessment {
    pub score: f64,
    pub penalties: Vec<Penalty>,
}

impl SemanticAssessment {
    pub fn perfect() -> Self {
        Self {
            score: 1.0,
            penalties: Vec::new(),
        }
    }

    pub fn critique(&self) -> Vec<String> {
        self.penalties.iter().map(|p| p.critique.clone()).collect()
    }
}

/// Semantic similarity/coherence measure. Must be a pure function of its
/// inputs so quality decisions stay reproducible.
pub trait SemanticScorer: Send + Sync {
    fn score(&self, candidate: &Value, unit: &GenerationUnit) -> SemanticAssessment;
}

const PLACEHOLDERS: &[&str] = &[
    "todo",
    "tbd",
    "n/a",
    "na",
    "none",
    "null",
    "unknown",
    "placeholder",
    "lorem ipsum",
    "...",
    "xxx",
    "example",
    "string",
];

fn is_placeholder(s: &str) -> bool {
    let t = s.trim().to_lowercase();
    PLACEHOLDERS.contains(&t.as_str())
        || t.starts_with("lorem ipsum")
        || (t.starts_with('<') && t.ends_with('>'))
        || (t.starts_with("{{") && t.ends_with("}}"))
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 4)
        .map(str::to_lowercase)
}

/// Penalty-based default scorer
#[derive(Debug, Clone, Default)]
pub struct HeuristicScorer {
    config: ScoringConfig,
}

impl HeuristicScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ScoringConfig) -> Self {
        Self { config }
    }

    fn penalize(
        &self,
        penalties: &mut Vec<Penalty>,
        code: &'static str,
        field: Option<&str>,
        weight: f64,
        critique: String,
    ) {
        penalties.push(Penalty {
            code,
            field: field.map(str::to_string),
            weight,
            critique,
        });
    }

    fn score_field(&self, name: &str, kind: FieldKind, has_enum: bool, value: &Value, penalties: &mut Vec<Penalty>) {
        let cfg = &self.config;
        match value {
            Value::Null => self.penalize(
                penalties,
                "empty_value",
                Some(name),
                cfg.empty_value_penalty,
                format!("Field '{name}' is null; provide a real value."),
            ),
            Value::String(s) if s.trim().is_empty() => self.penalize(
                penalties,
                "empty_value",
                Some(name),
                cfg.empty_value_penalty,
                format!("Field '{name}' is empty; provide a real value."),
            ),
            Value::String(s) if is_placeholder(s) && !has_enum => self.penalize(
                penalties,
                "placeholder",
                Some(name),
                cfg.placeholder_penalty,
                format!("Field '{name}' contains the placeholder '{s}'; replace it with content."),
            ),
            Value::String(s) if fold_key(s) == fold_key(name) => self.penalize(
                penalties,
                "echo",
                Some(name),
                cfg.echo_penalty,
                format!("Field '{name}' just repeats its own name."),
            ),
            Value::String(s)
                if kind == FieldKind::String
                    && !has_enum
                    && s.trim().chars().count() < cfg.min_text_chars =>
            {
                self.penalize(
                    penalties,
                    "too_short",
                    Some(name),
                    cfg.too_short_penalty,
                    format!("Field '{name}' is too short to be meaningful."),
                )
            }
            Value::Array(items) if items.is_empty() => self.penalize(
                penalties,
                "empty_array",
                Some(name),
                cfg.empty_array_penalty,
                format!("Field '{name}' is an empty list; include at least one item."),
            ),
            Value::Object(map) if map.is_empty() => self.penalize(
                penalties,
                "empty_value",
                Some(name),
                cfg.empty_value_penalty,
                format!("Field '{name}' is an empty object."),
            ),
            _ => {}
        }
    }
}

impl SemanticScorer for HeuristicScorer {
    fn score(&self, candidate: &Value, unit: &GenerationUnit) -> SemanticAssessment {
        let cfg = &self.config;
        let mut penalties = Vec::new();
        let Some(object) = candidate.as_object() else {
            return SemanticAssessment {
                score: cfg.min_score,
                penalties,
            };
        };

        for spec in &unit.schema.fields {
            if let Some(value) = object.get(&spec.name) {
                self.score_field(&spec.name, spec.kind, !spec.allowed.is_empty(), value, &mut penalties);
            }
        }

        // Duplicated free text across fields
        let mut seen: Vec<(&str, String)> = Vec::new();
        for spec in &unit.schema.fields {
            if let Some(Value::String(s)) = object.get(&spec.name) {
                let normalized = s.trim().to_lowercase();
                if normalized.chars().count() <= 3 || !spec.allowed.is_empty() {
                    continue;
                }
                if let Some((first, _)) = seen.iter().find(|(_, v)| *v == normalized) {
                    self.penalize(
                        &mut penalties,
                        "duplicate",
                        Some(&spec.name),
                        cfg.duplicate_penalty,
                        format!(
                            "Field '{}' duplicates the value of '{}'; each field needs its own content.",
                            spec.name, first
                        ),
                    );
                } else {
                    seen.push((&spec.name, normalized));
                }
            }
        }

        // Grounding in the source context
        if !unit.source_context.trim().is_empty() {
            let context: HashSet<String> = words(&unit.source_context).collect();
            let candidate_words: HashSet<String> = object
                .values()
                .filter_map(Value::as_str)
                .flat_map(words)
                .collect();
            if candidate_words.len() >= 3 {
                let overlap = candidate_words.iter().filter(|w| context.contains(*w)).count();
                let ratio = overlap as f64 / candidate_words.len() as f64;
                if ratio < cfg.min_context_overlap {
                    self.penalize(
                        &mut penalties,
                        "low_overlap",
                        None,
                        cfg.low_overlap_penalty,
                        format!(
                            "Content shares only {:.0}% of its vocabulary with the source; stay grounded in it.",
                            ratio * 100.0
                        ),
                    );
                }
            }
        }

        let total: f64 = penalties.iter().map(|p| p.weight).sum();
        let score = (cfg.base_score - total).clamp(cfg.min_score, cfg.max_score);
        SemanticAssessment { score, penalties }
    }
}
