//! Prompt Construction
//!
//! Every model-calling step builds its prompt here. Repair prompts carry only
//! the broken fragment, the schema, and the specific error; the unit's full
//! source context is sent only by whole-unit regeneration.

use serde_json::{Map, Value};

use crate::ai::client::{ModelPrompt, PromptKind};
use crate::ai::tokenizer::excerpt;
use crate::ai::validation::{FieldSpec, TargetSchema};
use crate::constants::prompt::{FIELD_CONTEXT_EXCERPT_CHARS, MAX_CRITIQUE_LINES, MAX_FRAGMENT_CHARS};
use crate::types::GenerationUnit;

const JSON_SYSTEM: &str =
    "You produce structured data. Respond ONLY with a single valid JSON value, no explanation.";
const PROSE_SYSTEM: &str = "You review structured data and explain concisely what is wrong with it.";

/// Prompt section types
#[derive(Debug, Clone)]
enum PromptSection {
    Role { expertise: String, task: String },
    Objectives(Vec<String>),
    Text { header: Option<String>, content: String },
    Code { language: String, content: String },
    Focus { target: String, restrictions: Vec<String> },
}

/// Builds the user message from ordered sections
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    sections: Vec<PromptSection>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, expertise: &str, task: &str) -> Self {
        self.sections.push(PromptSection::Role {
            expertise: expertise.to_string(),
            task: task.to_string(),
        });
        self
    }

    pub fn objectives(mut self, objectives: &[&str]) -> Self {
        self.sections.push(PromptSection::Objectives(
            objectives.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    /// Text section with header; empty content is skipped
    pub fn section(mut self, header: &str, content: &str) -> Self {
        if !content.trim().is_empty() {
            self.sections.push(PromptSection::Text {
                header: Some(header.to_string()),
                content: content.to_string(),
            });
        }
        self
    }

    pub fn text(mut self, content: &str) -> Self {
        self.sections.push(PromptSection::Text {
            header: None,
            content: content.to_string(),
        });
        self
    }

    pub fn code(mut self, language: &str, content: &str) -> Self {
        self.sections.push(PromptSection::Code {
            language: language.to_string(),
            content: content.to_string(),
        });
        self
    }

    pub fn focus(mut self, target: &str, restrictions: &[&str]) -> Self {
        self.sections.push(PromptSection::Focus {
            target: target.to_string(),
            restrictions: restrictions.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn build(self) -> String {
        let mut prompt = String::new();

        for section in self.sections {
            match section {
                PromptSection::Role { expertise, task } => {
                    prompt.push_str("<ROLE>\n");
                    prompt.push_str(&format!("You are an expert {expertise} specializing in {task}.\n"));
                    prompt.push_str("</ROLE>\n\n");
                }
                PromptSection::Objectives(objectives) => {
                    prompt.push_str("<OBJECTIVES>\n");
                    for (i, obj) in objectives.iter().enumerate() {
                        prompt.push_str(&format!("{}. {}\n", i + 1, obj));
                    }
                    prompt.push_str("</OBJECTIVES>\n\n");
                }
                PromptSection::Text { header, content } => {
                    if let Some(h) = header {
                        prompt.push_str(&format!("# {h}\n\n"));
                    }
                    prompt.push_str(&content);
                    prompt.push_str("\n\n");
                }
                PromptSection::Code { language, content } => {
                    prompt.push_str(&format!("```{language}\n"));
                    prompt.push_str(&content);
                    prompt.push_str("\n```\n\n");
                }
                PromptSection::Focus { target, restrictions } => {
                    prompt.push_str("<FOCUS>\n");
                    prompt.push_str(&format!("IMPORTANT: Focus EXCLUSIVELY on: {target}\n"));
                    for restriction in restrictions {
                        prompt.push_str(&format!("- {restriction}\n"));
                    }
                    prompt.push_str("</FOCUS>\n\n");
                }
            }
        }

        prompt.trim_end().to_string()
    }
}

fn json_prompt(kind: PromptKind, user: String, max_output_tokens: u64) -> ModelPrompt {
    ModelPrompt {
        kind,
        system: JSON_SYSTEM.to_string(),
        user,
        max_output_tokens,
        expects_json: true,
    }
}

fn fragment(raw: &str) -> &str {
    let cut = excerpt(raw, MAX_FRAGMENT_CHARS);
    if cut.trim().is_empty() { "(empty output)" } else { cut }
}

/// Whole-unit regeneration with accumulated critique
pub fn generation(unit: &GenerationUnit, critique: &[String], max_output_tokens: u64) -> ModelPrompt {
    let feedback = critique
        .iter()
        .rev()
        .take(MAX_CRITIQUE_LINES)
        .rev()
        .map(|line| format!("- {line}"))
        .collect::<Vec<_>>()
        .join("\n");

    let user = PromptBuilder::new()
        .role("content generator", &format!("`{}` objects", unit.schema.name))
        .section("Source", &unit.source_context)
        .section("Output Schema", &unit.schema.describe())
        .section("Feedback On Previous Attempts", &feedback)
        .text("Return the complete JSON object.")
        .build();

    json_prompt(PromptKind::Generate, user, max_output_tokens)
}

/// Minimal repair: broken fragment, schema, and the specific error only
pub fn repair(raw: &str, schema: &TargetSchema, error: &str, max_output_tokens: u64) -> ModelPrompt {
    let user = PromptBuilder::new()
        .role("data repair assistant", "fixing malformed JSON")
        .code("json", fragment(raw))
        .section("Validation Error", error)
        .section("Required Schema", &schema.describe())
        .focus(
            "repairing the fragment above",
            &[
                "Keep every value that is already valid",
                "Do NOT invent content beyond what the fix requires",
            ],
        )
        .build();

    json_prompt(PromptKind::Repair, user, max_output_tokens)
}

/// First call of critique/revise: prose explanation of what is wrong
pub fn critique(raw: &str, schema: &TargetSchema, error: &str, max_output_tokens: u64) -> ModelPrompt {
    let user = PromptBuilder::new()
        .role("data reviewer", "schema conformance")
        .code("json", fragment(raw))
        .section("Observed Error", error)
        .section("Required Schema", &schema.describe())
        .objectives(&[
            "Explain precisely why this candidate does not satisfy the schema",
            "Name each field that must change and what it must become",
        ])
        .text("Answer in plain prose, at most a few sentences. Do not output JSON.")
        .build();

    ModelPrompt {
        kind: PromptKind::Critique,
        system: PROSE_SYSTEM.to_string(),
        user,
        max_output_tokens,
        expects_json: false,
    }
}

/// Second call of critique/revise: corrected candidate conditioned on critique
pub fn revise(raw: &str, schema: &TargetSchema, critique: &str, max_output_tokens: u64) -> ModelPrompt {
    let user = PromptBuilder::new()
        .role("data repair assistant", "revising JSON from reviewer feedback")
        .code("json", fragment(raw))
        .section("Reviewer Critique", critique)
        .section("Required Schema", &schema.describe())
        .text("Return the corrected JSON object.")
        .build();

    json_prompt(PromptKind::Revise, user, max_output_tokens)
}

/// Regenerate a single field. The valid sibling fields are shown for
/// consistency but must not be repeated in the answer.
pub fn field(
    unit: &GenerationUnit,
    spec: &FieldSpec,
    siblings: &Map<String, Value>,
    max_output_tokens: u64,
) -> ModelPrompt {
    let mut requirement = format!("\"{}\": {}", spec.name, spec.type_label());
    if !spec.allowed.is_empty() {
        requirement.push_str(&format!(", one of [{}]", spec.allowed.join(", ")));
    }
    if spec.minimum.is_some() || spec.maximum.is_some() {
        requirement.push_str(&format!(
            ", range [{}, {}]",
            spec.minimum.map_or("-inf".into(), |v| v.to_string()),
            spec.maximum.map_or("+inf".into(), |v| v.to_string())
        ));
    }
    if let Some(desc) = &spec.description {
        requirement.push_str(&format!(": {desc}"));
    }

    let others: Map<String, Value> = siblings
        .iter()
        .filter(|(k, _)| **k != spec.name)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let user = PromptBuilder::new()
        .role("content generator", &format!("the `{}` field", spec.name))
        .section("Field", &requirement)
        .section("Source Excerpt", excerpt(&unit.source_context, FIELD_CONTEXT_EXCERPT_CHARS))
        .section("Other Fields (fixed)", &Value::Object(others).to_string())
        .focus(
            &spec.name,
            &[&format!("Respond with a JSON object containing only \"{}\"", spec.name)],
        )
        .build();

    json_prompt(
        PromptKind::FieldRegeneration {
            field: spec.name.clone(),
        },
        user,
        max_output_tokens,
    )
}
