//! Classify Command
//!
//! Diagnose one raw model output against a target schema without repairing
//! it.
//!
//! Usage:
//!   regencascade classify --schema schema.yaml --input raw.txt [-f json]

use std::path::Path;

use serde_json::json;

use crate::ai::validation::{Diagnosis, ErrorClassifier};
use crate::cli::ui::Output;
use crate::cli::util::{load_schema, read_raw_output};
use crate::types::Result;

/// Returns whether the output already satisfies the schema
pub fn run(schema_path: &Path, input: &Path, format: &str) -> Result<bool> {
    let schema = load_schema(schema_path)?;
    let raw = read_raw_output(input)?;
    let diagnosis = ErrorClassifier::new().diagnose(&raw, &schema, None);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&diagnosis_json(&diagnosis))?);
    } else {
        print_text(&schema.name, &diagnosis);
    }
    Ok(diagnosis.is_valid())
}

fn diagnosis_json(diagnosis: &Diagnosis) -> serde_json::Value {
    json!({
        "valid": diagnosis.is_valid(),
        "kind": diagnosis.kind.map(|k| k.as_str()),
        "class": diagnosis.kind.map(|k| format!("{:?}", k.class())),
        "message": diagnosis.message,
        "violations": diagnosis.violations,
    })
}

fn print_text(schema_name: &str, diagnosis: &Diagnosis) {
    let out = Output::new();
    let Some(kind) = diagnosis.kind else {
        out.success(&format!("Output satisfies schema '{}'", schema_name));
        return;
    };

    out.error(&format!("{} ({:?})", kind, kind.class()));
    if !diagnosis.message.is_empty() {
        out.field("Detail", &diagnosis.message);
    }
    if !diagnosis.violations.is_empty() {
        out.section("Violations");
        for violation in &diagnosis.violations {
            println!("  - {}", violation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::validation::{FieldKind, FieldSpec, TargetSchema};

    #[test]
    fn test_diagnosis_json_shape() {
        let schema = TargetSchema::new(
            "page",
            vec![FieldSpec::new("title", FieldKind::String)],
        );
        let diagnosis = ErrorClassifier::new().diagnose(r#"{"title": 3}"#, &schema, None);
        let value = diagnosis_json(&diagnosis);
        assert_eq!(value["valid"], false);
        assert_eq!(value["kind"], "TypeMismatch");
        assert_eq!(value["class"], "RecoverableSemantic");
        assert_eq!(value["violations"][0]["field"], "title");
    }

    #[test]
    fn test_valid_output_has_null_kind() {
        let schema = TargetSchema::new(
            "page",
            vec![FieldSpec::new("title", FieldKind::String)],
        );
        let diagnosis = ErrorClassifier::new().diagnose(r#"{"title": "Intro"}"#, &schema, None);
        let value = diagnosis_json(&diagnosis);
        assert_eq!(value["valid"], true);
        assert!(value["kind"].is_null());
    }
}
