//! Target Schema Contract
//!
//! A deliberately small structural contract for one generation unit:
//! typed fields with aliases, enum/range/length constraints, and declared
//! cross-field couplings. This is not a general JSON-schema validator.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{CascadeError, Result};

// =============================================================================
// Field Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl FieldKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// JSON type name of a value, for diagnostics
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Element type for arrays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<FieldKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            aliases: Vec::new(),
            allowed: Vec::new(),
            minimum: None,
            maximum: None,
            min_length: None,
            max_length: None,
            items: None,
            description: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_enum(mut self, allowed: &[&str]) -> Self {
        self.allowed = allowed.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_range(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    pub fn with_length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    pub fn with_items(mut self, items: FieldKind) -> Self {
        self.items = Some(items);
        self
    }

    /// Human-readable type, e.g. `array<string>`
    pub fn type_label(&self) -> String {
        match (self.kind, self.items) {
            (FieldKind::Array, Some(items)) => format!("array<{}>", items.as_str()),
            (kind, _) => kind.as_str().to_string(),
        }
    }

    /// Does `key` name this field under an alias or another naming convention?
    pub fn answers_to(&self, key: &str) -> bool {
        if key == self.name {
            return false;
        }
        if self.aliases.iter().any(|a| a == key) {
            return true;
        }
        let folded = fold_key(key);
        folded == fold_key(&self.name) || self.aliases.iter().any(|a| fold_key(a) == folded)
    }

    fn check_type(&self, value: &Value) -> Option<ViolationKind> {
        if !self.kind.matches(value) {
            return Some(ViolationKind::WrongType {
                expected: self.type_label(),
                found: json_type_name(value).to_string(),
            });
        }
        if let (Some(items), Some(array)) = (self.items, value.as_array())
            && let Some(bad) = array.iter().find(|v| !items.matches(v))
        {
            return Some(ViolationKind::WrongType {
                expected: self.type_label(),
                found: format!("array containing {}", json_type_name(bad)),
            });
        }
        None
    }

    fn check_constraints(&self, value: &Value) -> Option<ViolationKind> {
        if !self.allowed.is_empty()
            && let Some(s) = value.as_str()
            && !self.allowed.iter().any(|a| a == s)
        {
            return Some(ViolationKind::Constraint {
                detail: format!("'{}' is not one of [{}]", s, self.allowed.join(", ")),
            });
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.minimum
                && n < min
            {
                return Some(ViolationKind::Constraint {
                    detail: format!("{n} is below minimum {min}"),
                });
            }
            if let Some(max) = self.maximum
                && n > max
            {
                return Some(ViolationKind::Constraint {
                    detail: format!("{n} is above maximum {max}"),
                });
            }
        }

        let length = match value {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(a) => Some(a.len()),
            _ => None,
        };
        if let Some(len) = length {
            if let Some(min) = self.min_length
                && len < min
            {
                return Some(ViolationKind::Constraint {
                    detail: format!("length {len} is below minimum {min}"),
                });
            }
            if let Some(max) = self.max_length
                && len > max
            {
                return Some(ViolationKind::Constraint {
                    detail: format!("length {len} is above maximum {max}"),
                });
            }
        }
        None
    }
}

/// Fold a key so naming conventions compare equal:
/// `targetAudience`, `target_audience`, `Target-Audience` all fold to `targetaudience`.
pub fn fold_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' ' | '.'))
        .flat_map(char::to_lowercase)
        .collect()
}

// =============================================================================
// Schema
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossFieldConstraint {
    pub name: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSchema {
    pub name: String,
    pub fields: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cross_field_constraints: Vec<CrossFieldConstraint>,
    /// Explicit declaration that fields can be regenerated in isolation
    #[serde(default)]
    pub fields_independent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ViolationKind {
    Missing,
    Aliased { found: String },
    WrongType { expected: String, found: String },
    Constraint { detail: String },
    NotAnObject,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub field: String,
    #[serde(flatten)]
    pub kind: ViolationKind,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ViolationKind::Missing => write!(f, "required field '{}' is missing", self.field),
            ViolationKind::Aliased { found } => {
                write!(f, "field '{}' appears under the name '{}'", self.field, found)
            }
            ViolationKind::WrongType { expected, found } => write!(
                f,
                "field '{}' should be {} but is {}",
                self.field, expected, found
            ),
            ViolationKind::Constraint { detail } => {
                write!(f, "field '{}' violates a constraint: {}", self.field, detail)
            }
            ViolationKind::NotAnObject => write!(f, "top-level value is not an object"),
        }
    }
}

impl TargetSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.into(),
            fields,
            cross_field_constraints: Vec::new(),
            fields_independent: false,
        }
    }

    pub fn independent(mut self) -> Self {
        self.fields_independent = true;
        self
    }

    pub fn with_constraint(mut self, name: &str, fields: &[&str]) -> Self {
        self.cross_field_constraints.push(CrossFieldConstraint {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Find the field a non-canonical key refers to
    pub fn resolve_alias(&self, key: &str) -> Option<&FieldSpec> {
        if self.field(key).is_some() {
            return None;
        }
        self.fields.iter().find(|f| f.answers_to(key))
    }

    pub fn touches_cross_field(&self, field: &str) -> bool {
        self.cross_field_constraints
            .iter()
            .any(|c| c.fields.iter().any(|f| f == field))
    }

    /// Regenerating `field` alone is safe only under an explicit independence
    /// declaration and when no declared coupling names it.
    pub fn allows_isolated_regeneration(&self, field: &str) -> bool {
        self.fields_independent && !self.touches_cross_field(field)
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.validate(value).is_empty()
    }

    /// Validate a parsed value, returning violations in field order
    pub fn validate(&self, value: &Value) -> Vec<Violation> {
        let Some(object) = value.as_object() else {
            return vec![Violation {
                field: self.name.clone(),
                kind: ViolationKind::NotAnObject,
            }];
        };

        self.fields
            .iter()
            .filter_map(|spec| self.validate_field(spec, object))
            .collect()
    }

    fn validate_field(&self, spec: &FieldSpec, object: &Map<String, Value>) -> Option<Violation> {
        let kind = match object.get(&spec.name) {
            Some(Value::Null) if !spec.required => None,
            Some(value) => spec
                .check_type(value)
                .or_else(|| spec.check_constraints(value)),
            None => match object.keys().find(|k| spec.answers_to(k)) {
                Some(found) => Some(ViolationKind::Aliased {
                    found: found.clone(),
                }),
                None if spec.required => Some(ViolationKind::Missing),
                None => None,
            },
        };
        kind.map(|kind| Violation {
            field: spec.name.clone(),
            kind,
        })
    }

    /// Check the schema definition itself
    pub fn check_definition(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(CascadeError::schema(&self.name, "schema declares no fields"));
        }
        let mut folded = HashSet::new();
        for field in &self.fields {
            if !folded.insert(fold_key(&field.name)) {
                return Err(CascadeError::schema(
                    &self.name,
                    format!("field '{}' collides with another field name", field.name),
                ));
            }
            if let (Some(min), Some(max)) = (field.minimum, field.maximum)
                && min > max
            {
                return Err(CascadeError::schema(
                    &self.name,
                    format!("field '{}' has minimum above maximum", field.name),
                ));
            }
        }
        for constraint in &self.cross_field_constraints {
            if let Some(unknown) = constraint.fields.iter().find(|f| self.field(f).is_none()) {
                return Err(CascadeError::schema(
                    &self.name,
                    format!(
                        "constraint '{}' references unknown field '{}'",
                        constraint.name, unknown
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Compact schema description used in repair prompts
    pub fn describe(&self) -> String {
        let mut out = format!("Schema `{}` (JSON object):\n", self.name);
        for field in &self.fields {
            out.push_str(&format!(
                "- \"{}\": {}{}",
                field.name,
                field.type_label(),
                if field.required { " (required)" } else { "" }
            ));
            if !field.allowed.is_empty() {
                out.push_str(&format!(", one of [{}]", field.allowed.join(", ")));
            }
            if field.minimum.is_some() || field.maximum.is_some() {
                out.push_str(&format!(
                    ", range [{}, {}]",
                    field.minimum.map_or("-inf".into(), |v| v.to_string()),
                    field.maximum.map_or("+inf".into(), |v| v.to_string())
                ));
            }
            if let Some(desc) = &field.description {
                out.push_str(&format!(": {desc}"));
            }
            out.push('\n');
        }
        for constraint in &self.cross_field_constraints {
            out.push_str(&format!(
                "Constraint `{}` couples: {}\n",
                constraint.name,
                constraint.fields.join(", ")
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata_schema() -> TargetSchema {
        TargetSchema::new(
            "metadata",
            vec![
                FieldSpec::new("category", FieldKind::String).with_enum(&["guide", "reference"]),
                FieldSpec::new("targetAudience", FieldKind::String).with_aliases(&["audience"]),
                FieldSpec::new("score", FieldKind::Number).with_range(Some(0.0), Some(1.0)),
                FieldSpec::new("tags", FieldKind::Array)
                    .with_items(FieldKind::String)
                    .optional(),
            ],
        )
    }

    #[test]
    fn test_fold_key_conventions() {
        assert_eq!(fold_key("targetAudience"), "targetaudience");
        assert_eq!(fold_key("target_audience"), "targetaudience");
        assert_eq!(fold_key("Target-Audience"), "targetaudience");
    }

    #[test]
    fn test_valid_object() {
        let schema = metadata_schema();
        let value = json!({"category": "guide", "targetAudience": "devs", "score": 0.5});
        assert!(schema.is_valid(&value));
    }

    #[test]
    fn test_alias_detected_before_type() {
        let schema = metadata_schema();
        let value = json!({"category": "guide", "target_audience": 3, "score": 0.5});
        let violations = schema.validate(&value);
        assert_eq!(violations.len(), 1);
        assert_eq!(
            violations[0].kind,
            ViolationKind::Aliased {
                found: "target_audience".into()
            }
        );
    }

    #[test]
    fn test_explicit_alias() {
        let schema = metadata_schema();
        let spec = schema.resolve_alias("audience").unwrap();
        assert_eq!(spec.name, "targetAudience");
        assert!(schema.resolve_alias("category").is_none());
    }

    #[test]
    fn test_wrong_type_and_constraint() {
        let schema = metadata_schema();
        let value = json!({"category": "poem", "targetAudience": "devs", "score": "high"});
        let violations = schema.validate(&value);
        assert!(matches!(violations[0].kind, ViolationKind::Constraint { .. }));
        assert!(matches!(violations[1].kind, ViolationKind::WrongType { .. }));
    }

    #[test]
    fn test_array_item_type() {
        let schema = metadata_schema();
        let value = json!({"category": "guide", "targetAudience": "x", "score": 1, "tags": ["a", 2]});
        let violations = schema.validate(&value);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "tags");
    }

    #[test]
    fn test_not_an_object() {
        let schema = metadata_schema();
        let violations = schema.validate(&json!(["guide"]));
        assert_eq!(violations[0].kind, ViolationKind::NotAnObject);
    }

    #[test]
    fn test_isolated_regeneration_requires_declaration() {
        let schema = metadata_schema();
        assert!(!schema.allows_isolated_regeneration("score"));
        let schema = schema.independent().with_constraint("ranked", &["score", "tags"]);
        assert!(!schema.allows_isolated_regeneration("score"));
        assert!(schema.allows_isolated_regeneration("category"));
    }

    #[test]
    fn test_check_definition() {
        assert!(metadata_schema().check_definition().is_ok());
        let bad = metadata_schema().with_constraint("x", &["missing"]);
        assert!(bad.check_definition().is_err());
        let dup = TargetSchema::new(
            "dup",
            vec![
                FieldSpec::new("a_b", FieldKind::String),
                FieldSpec::new("aB", FieldKind::String),
            ],
        );
        assert!(dup.check_definition().is_err());
    }

    #[test]
    fn test_deserialize_schema_yaml() {
        let yaml = r#"
name: section
fieldsIndependent: true
fields:
  - name: title
    type: string
  - name: level
    type: integer
    minimum: 1
    maximum: 6
    required: false
"#;
        let schema: TargetSchema = serde_yaml::from_str(yaml).unwrap();
        assert!(schema.fields_independent);
        assert!(schema.fields[0].required);
        assert!(!schema.fields[1].required);
        assert_eq!(schema.fields[1].maximum, Some(6.0));
    }
}
