//! Generation units and their identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ai::validation::TargetSchema;

// =============================================================================
// Domain Newtypes
// =============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of one top-level generation job
    JobId
);

string_id!(
    /// Identifier of one generation unit within a job
    UnitId
);

impl JobId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

// =============================================================================
// Criticality
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Critical,
    #[default]
    Standard,
}

impl Criticality {
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical)
    }
}

impl fmt::Display for Criticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => f.write_str("critical"),
            Self::Standard => f.write_str("standard"),
        }
    }
}

// =============================================================================
// Generation Unit
// =============================================================================

/// The thing being produced: a field, a metadata object, or a content section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationUnit {
    pub unit_id: UnitId,
    pub schema: TargetSchema,
    #[serde(default)]
    pub criticality: Criticality,
    /// Prompt inputs, immutable for the unit's lifetime
    #[serde(default)]
    pub source_context: String,
}

impl GenerationUnit {
    pub fn new(unit_id: impl Into<UnitId>, schema: TargetSchema) -> Self {
        Self {
            unit_id: unit_id.into(),
            schema,
            criticality: Criticality::Standard,
            source_context: String::new(),
        }
    }

    pub fn critical(mut self) -> Self {
        self.criticality = Criticality::Critical;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.source_context = context.into();
        self
    }

    pub fn is_critical(&self) -> bool {
        self.criticality.is_critical()
    }
}

/// Token/cost usage reported alongside a caller-supplied raw output
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub latency_ms: u64,
}

/// A unit as submitted with a job, carrying its first raw model output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedUnit {
    #[serde(flatten)]
    pub unit: GenerationUnit,
    pub initial_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_usage: Option<Usage>,
}
