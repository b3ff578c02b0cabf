//! Result shapes produced by a session and the field schema that drives parsing.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    CodeSolution,
    CodeOptimization,
    RecordingAnalysis,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CodeSolution {
    /// Complete, runnable solution code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Step-by-step explanation of the approach.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Big-O time complexity, e.g. `O(n)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_complexity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_complexity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_cases: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_approaches: Option<Vec<BTreeMap<String, String>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CodeOptimization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Individual improvements applied to the original code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improvements: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized_time_complexity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized_space_complexity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RecordingAnalysis {
    /// Answer or solution derived from the transcript.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_summary: Option<String>,
    /// Self-assessed confidence in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultBody {
    CodeSolution(CodeSolution),
    CodeOptimization(CodeOptimization),
    RecordingAnalysis(RecordingAnalysis),
}

impl ResultBody {
    #[must_use]
    pub fn empty(kind: ResultKind) -> Self {
        match kind {
            ResultKind::CodeSolution => Self::CodeSolution(CodeSolution::default()),
            ResultKind::CodeOptimization => Self::CodeOptimization(CodeOptimization::default()),
            ResultKind::RecordingAnalysis => {
                Self::RecordingAnalysis(RecordingAnalysis::default())
            }
        }
    }

    #[must_use]
    pub fn kind(&self) -> ResultKind {
        match self {
            Self::CodeSolution(_) => ResultKind::CodeSolution,
            Self::CodeOptimization(_) => ResultKind::CodeOptimization,
            Self::RecordingAnalysis(_) => ResultKind::RecordingAnalysis,
        }
    }

    /// Build a body from already validated field values.
    #[must_use]
    pub fn from_fields(kind: ResultKind, fields: &BTreeMap<String, Value>) -> Self {
        let object = Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        let built = match kind {
            ResultKind::CodeSolution => serde_json::from_value(object).map(Self::CodeSolution),
            ResultKind::CodeOptimization => {
                serde_json::from_value(object).map(Self::CodeOptimization)
            }
            ResultKind::RecordingAnalysis => {
                serde_json::from_value(object).map(Self::RecordingAnalysis)
            }
        };
        built.unwrap_or_else(|e| {
            tracing::warn!("validated fields did not fit {kind:?}: {e}");
            Self::empty(kind)
        })
    }
}

/// The best-known result at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredResult {
    #[serde(flatten)]
    pub body: ResultBody,
    pub is_complete: bool,
    pub progress: u8,
}

impl StructuredResult {
    #[must_use]
    pub fn empty(kind: ResultKind) -> Self {
        Self {
            body: ResultBody::empty(kind),
            is_complete: false,
            progress: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// Text that heuristic extraction takes from the first fenced block.
    Code,
    TextList,
    Number,
    /// List of string-to-string objects.
    Records,
}

impl FieldKind {
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Text | Self::Code => value.is_string(),
            Self::TextList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            Self::Number => value.is_number(),
            Self::Records => value.as_array().is_some_and(|items| {
                items
                    .iter()
                    .all(|item| item.as_object().is_some_and(|o| o.values().all(Value::is_string)))
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    /// Section headers that introduce this field in free-form output.
    pub aliases: &'static [&'static str],
}

#[derive(Debug)]
pub struct ResultSchema {
    pub kind: ResultKind,
    pub fields: &'static [FieldSpec],
}

const fn field(
    name: &'static str,
    kind: FieldKind,
    required: bool,
    aliases: &'static [&'static str],
) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required,
        aliases,
    }
}

static CODE_SOLUTION: ResultSchema = ResultSchema {
    kind: ResultKind::CodeSolution,
    fields: &[
        field("code", FieldKind::Code, true, &["code", "solution", "solution code", "implementation"]),
        field("language", FieldKind::Text, false, &["language"]),
        field("explanation", FieldKind::Text, false, &["explanation", "approach", "answer"]),
        field("time_complexity", FieldKind::Text, true, &["time complexity", "time"]),
        field("space_complexity", FieldKind::Text, false, &["space complexity", "space"]),
        field("edge_cases", FieldKind::TextList, false, &["edge cases"]),
        field(
            "alternative_approaches",
            FieldKind::Records,
            false,
            &["alternative approaches", "alternatives"],
        ),
    ],
};

static CODE_OPTIMIZATION: ResultSchema = ResultSchema {
    kind: ResultKind::CodeOptimization,
    fields: &[
        field("optimized_code", FieldKind::Code, true, &["optimized code", "code"]),
        field("language", FieldKind::Text, false, &["language"]),
        field("improvements", FieldKind::TextList, false, &["improvements", "changes"]),
        field(
            "optimized_time_complexity",
            FieldKind::Text,
            true,
            &["optimized time complexity", "time complexity", "time"],
        ),
        field(
            "optimized_space_complexity",
            FieldKind::Text,
            false,
            &["optimized space complexity", "space complexity", "space"],
        ),
        field("explanation", FieldKind::Text, false, &["explanation"]),
    ],
};

static RECORDING_ANALYSIS: ResultSchema = ResultSchema {
    kind: ResultKind::RecordingAnalysis,
    fields: &[
        field("solution", FieldKind::Text, true, &["solution", "answer", "response"]),
        field("file_summary", FieldKind::Text, false, &["file summary", "summary"]),
        field("confidence", FieldKind::Number, false, &["confidence"]),
    ],
};

impl ResultSchema {
    #[must_use]
    pub fn for_kind(kind: ResultKind) -> &'static Self {
        match kind {
            ResultKind::CodeSolution => &CODE_SOLUTION,
            ResultKind::CodeOptimization => &CODE_OPTIMIZATION,
            ResultKind::RecordingAnalysis => &RECORDING_ANALYSIS,
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Find the field a section header names, comparing normalized labels.
    #[must_use]
    pub fn field_for_label(&self, label: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|f| f.aliases.iter().any(|alias| *alias == label))
    }

    pub fn required(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }

    /// JSON schema of the result type, embedded in prompts.
    #[must_use]
    pub fn json_schema(&self) -> Value {
        let schema = match self.kind {
            ResultKind::CodeSolution => schemars::schema_for!(CodeSolution),
            ResultKind::CodeOptimization => schemars::schema_for!(CodeOptimization),
            ResultKind::RecordingAnalysis => schemars::schema_for!(RecordingAnalysis),
        };
        serde_json::to_value(&schema).unwrap_or(Value::Null)
    }
}
