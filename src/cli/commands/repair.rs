//! Repair Command
//!
//! Run the deterministic repair chain on one raw output. No model is
//! called; outputs that need a model-calling strategy are reported as such.
//!
//! Usage:
//!   regencascade repair --schema schema.yaml --input raw.txt [--output fixed.json]

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::ai::validation::ErrorClassifier;
use crate::cascade::strategy::{ChainOutcome, run_chain};
use crate::cli::ui::Output;
use crate::cli::util::{load_schema, read_raw_output, write_output};
use crate::types::Result;

/// Options for the repair command
#[derive(Debug, Clone)]
pub struct RepairOptions {
    pub schema: PathBuf,
    pub input: PathBuf,
    pub output: Option<PathBuf>,
}

/// Returns whether a schema-valid object came out of the chain
pub fn run(options: &RepairOptions) -> Result<bool> {
    let out = Output::new();
    let schema = load_schema(&options.schema)?;
    let raw = read_raw_output(&options.input)?;
    let classifier = ErrorClassifier::new();

    let diagnosis = classifier.diagnose(&raw, &schema, None);
    let value = match diagnosis.kind {
        None => {
            out.success("Output is already valid; nothing to repair");
            diagnosis.value
        }
        Some(kind) => {
            out.info(&format!("Classified as {}: {}", kind, diagnosis.message));
            match run_chain(&raw, &diagnosis, &schema, &classifier) {
                ChainOutcome::Fixed { strategy, value } => {
                    out.success(&format!("Repaired by {}", strategy));
                    Some(value)
                }
                ChainOutcome::Exhausted { diagnosis, .. } => {
                    out.warning(&format!(
                        "Deterministic strategies exhausted ({}); a model-calling strategy is needed",
                        diagnosis
                            .kind
                            .map(|k| k.to_string())
                            .unwrap_or_else(|| "unclassified".to_string())
                    ));
                    if !diagnosis.message.is_empty() {
                        out.field("Detail", &diagnosis.message);
                    }
                    None
                }
            }
        }
    };

    let Some(value) = value else {
        return Ok(false);
    };
    emit(&value, options.output.as_deref(), &out)?;
    Ok(true)
}

fn emit(value: &Value, output: Option<&Path>, out: &Output) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            write_output(path, &text)?;
            out.success(&format!("Wrote {}", path.display()));
        }
        None => println!("{}", text),
    }
    Ok(())
}
