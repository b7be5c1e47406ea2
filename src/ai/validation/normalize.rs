//! Field name normalization (the `FieldNameNormalize` strategy).
//!
//! Renames keys that refer to a schema field under an alias or a different
//! naming convention to the canonical field name. An existing canonical key
//! is never overwritten, and unknown keys are left alone.

use serde_json::{Map, Value};

use super::schema::TargetSchema;

/// Normalize top-level keys of an object. Non-objects pass through.
pub fn normalize_field_names(value: &Value, schema: &TargetSchema) -> Value {
    let Some(object) = value.as_object() else {
        return value.clone();
    };

    let mut out = Map::with_capacity(object.len());
    let mut renamed = Vec::new();

    for (key, val) in object {
        match schema.resolve_alias(key) {
            Some(spec) if !object.contains_key(&spec.name) && !out.contains_key(&spec.name) => {
                renamed.push((key.clone(), spec.name.clone()));
                out.insert(spec.name.clone(), val.clone());
            }
            _ => {
                if !out.contains_key(key) {
                    out.insert(key.clone(), val.clone());
                }
            }
        }
    }

    if !renamed.is_empty() {
        tracing::debug!(schema = %schema.name, ?renamed, "Field names normalized");
    }

    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::validation::schema::{FieldKind, FieldSpec};
    use proptest::prelude::*;
    use serde_json::json;

    fn schema() -> TargetSchema {
        TargetSchema::new(
            "meta",
            vec![
                FieldSpec::new("category", FieldKind::String),
                FieldSpec::new("targetAudience", FieldKind::String).with_aliases(&["readers"]),
            ],
        )
    }

    #[test]
    fn test_casing_normalized() {
        let out = normalize_field_names(&json!({"Category": "x"}), &schema());
        assert_eq!(out, json!({"category": "x"}));
    }

    #[test]
    fn test_convention_and_alias() {
        let out = normalize_field_names(
            &json!({"target_audience": "devs", "CATEGORY": "guide"}),
            &schema(),
        );
        assert_eq!(out, json!({"targetAudience": "devs", "category": "guide"}));

        let out = normalize_field_names(&json!({"readers": "ops"}), &schema());
        assert_eq!(out, json!({"targetAudience": "ops"}));
    }

    #[test]
    fn test_canonical_never_overwritten() {
        let input = json!({"category": "kept", "Category": "dropped-into-extra"});
        let out = normalize_field_names(&input, &schema());
        assert_eq!(out["category"], "kept");
        assert_eq!(out["Category"], "dropped-into-extra");
    }

    #[test]
    fn test_unknown_keys_and_non_objects() {
        let out = normalize_field_names(&json!({"extra": 1}), &schema());
        assert_eq!(out, json!({"extra": 1}));
        assert_eq!(normalize_field_names(&json!([1]), &schema()), json!([1]));
    }

    proptest! {
        #[test]
        fn prop_normalize_idempotent(
            keys in prop::collection::vec(
                prop::sample::select(vec![
                    "category", "Category", "CATEGORY", "target_audience",
                    "targetAudience", "TargetAudience", "readers", "other",
                ]),
                0..6
            )
        ) {
            let mut object = Map::new();
            for (i, key) in keys.iter().enumerate() {
                object.insert(key.to_string(), json!(i));
            }
            let schema = schema();
            let once = normalize_field_names(&Value::Object(object), &schema);
            let twice = normalize_field_names(&once, &schema);
            prop_assert_eq!(once, twice);
        }
    }
}
