//! Prompt construction for each request kind.

use std::collections::BTreeMap;

use base64::Engine as _;
use corvus_llm::{Message, Role};

use crate::parser::ParserMode;
use crate::request::{GenerationRequest, RequestInputs, RequestKind};
use crate::result::{FieldKind, ResultSchema};

pub const SCREENSHOT_SOLUTION: &str = "screenshot_solution";
pub const MCQ: &str = "mcq";
pub const CODE_OPTIMIZATION: &str = "code_optimization";
pub const RECORDING_ANALYSIS: &str = "recording_analysis";

const DEFAULT_SCREENSHOT_SOLUTION: &str = "\
Analyze the programming problem shown in the screenshot(s) and solve it.

Provide the solution in {language}. Do not switch to any other language.

Include:
1. Complete, heavily documented code
2. A concise explanation of the core approach, not a restatement of the problem
3. Time complexity in Big O notation
4. Space complexity in Big O notation
5. Edge cases and how the code handles them
6. Optionally, alternative approaches with a short description each";

const DEFAULT_MCQ: &str = "\
The screenshot(s) contain one or more multiple-choice questions. For each question,
decide whether it is single- or multi-answer, identify the correct option letter(s)
with their text, and explain briefly why each is correct. Label questions Q1, Q2 and
so on. Put all answers and explanations in the explanation field and leave the code
field empty.";

const DEFAULT_CODE_OPTIMIZATION: &str = "\
Analyze and optimize the following {language} code:

```{language}
{code}
```

Find performance bottlenecks, improve time and space complexity, improve
readability, and fix bugs or unhandled edge cases. Report the optimized code,
each improvement made, the new time and space complexity, and an explanation of
the optimization process. Prefer changes with a meaningful effect.";

const DEFAULT_RECORDING_ANALYSIS: &str = "\
Analyze the transcript of the recording below together with any additional file
content, and answer what is being asked.";

/// Builds provider messages from a request and the caller's history snapshot.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    templates: BTreeMap<String, String>,
    default_language: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new("python", BTreeMap::new())
    }
}

impl PromptBuilder {
    /// `overrides` replaces built-in templates by name.
    #[must_use]
    pub fn new(default_language: impl Into<String>, overrides: BTreeMap<String, String>) -> Self {
        let mut templates: BTreeMap<String, String> = [
            (SCREENSHOT_SOLUTION, DEFAULT_SCREENSHOT_SOLUTION),
            (MCQ, DEFAULT_MCQ),
            (CODE_OPTIMIZATION, DEFAULT_CODE_OPTIMIZATION),
            (RECORDING_ANALYSIS, DEFAULT_RECORDING_ANALYSIS),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
        templates.extend(overrides);
        Self {
            templates,
            default_language: default_language.into(),
        }
    }

    #[must_use]
    pub fn template(&self, name: &str) -> &str {
        self.templates.get(name).map_or("", String::as_str)
    }

    /// Assemble system, history, and request messages.
    #[must_use]
    pub fn build(&self, request: &GenerationRequest, transcript: Option<&str>, mode: ParserMode) -> Vec<Message> {
        let language = request
            .language
            .as_deref()
            .unwrap_or(&self.default_language);
        let is_mcq = request.kind == RequestKind::SolutionGeneration && language.eq_ignore_ascii_case("mcq");
        let template_name = match request.kind {
            RequestKind::SolutionGeneration if is_mcq => MCQ,
            RequestKind::SolutionGeneration => SCREENSHOT_SOLUTION,
            RequestKind::Optimization => CODE_OPTIMIZATION,
            RequestKind::RecordingAnalysis => RECORDING_ANALYSIS,
        };

        let schema = ResultSchema::for_kind(request.kind.result_kind());
        let system = format!(
            "You are an expert software engineer helping during a technical interview.\n\n{}",
            format_instructions(schema, mode)
        );

        let mut messages = Vec::with_capacity(request.history.len() * 2 + 2);
        messages.push(Message::text(Role::System, system));
        for entry in request.history.iter() {
            messages.push(Message::text(Role::User, entry.request_summary.clone()));
            let prior = serde_json::to_string(&entry.result.body).unwrap_or_default();
            messages.push(Message::text(Role::Assistant, prior));
        }

        let code = match &request.inputs {
            RequestInputs::SourceCode(code) => code.as_str(),
            _ => "",
        };
        let mut user = self
            .template(template_name)
            .replace("{language}", language)
            .replace("{code}", code);

        let mut message = match &request.inputs {
            RequestInputs::Images(images) => {
                let mut msg = Message::text(Role::User, String::new());
                for image in images {
                    msg = msg.with_image(image.data.clone(), image.mime_type.clone());
                }
                msg
            }
            RequestInputs::SourceCode(_) => Message::text(Role::User, String::new()),
            RequestInputs::Audio {
                instructions,
                context,
                ..
            } => {
                user.push_str("\n\nTranscript:\n");
                user.push_str(transcript.unwrap_or_default());
                if let Some(ctx) = context.as_deref().filter(|c| !c.trim().is_empty()) {
                    user.push_str("\n\nAdditional file content:\n");
                    user.push_str(ctx);
                }
                if let Some(extra) = instructions.as_deref().filter(|i| !i.trim().is_empty()) {
                    user.push_str("\n\nSpecific instructions:\n");
                    user.push_str(extra);
                }
                Message::text(Role::User, String::new())
            }
        };
        message.content = user;
        messages.push(message);
        messages
    }
}

fn format_instructions(schema: &ResultSchema, mode: ParserMode) -> String {
    match mode {
        ParserMode::Json => {
            let schema_json =
                serde_json::to_string_pretty(&schema.json_schema()).unwrap_or_default();
            format!(
                "Respond with exactly one JSON object that validates against this JSON \
                 schema, with no text outside the object:\n{schema_json}"
            )
        }
        ParserMode::Heuristic => {
            let mut out = String::from(
                "Format the answer in Markdown with one `## ` heading per section, using \
                 exactly these headings in this order:\n",
            );
            for field in schema.fields {
                let heading = title_case(field.aliases.first().copied().unwrap_or(field.name));
                let hint = match field.kind {
                    FieldKind::Code => "a single fenced code block",
                    FieldKind::Text => "plain text",
                    FieldKind::TextList => "a bullet list",
                    FieldKind::Number => "a single number between 0 and 1",
                    FieldKind::Records => "a bullet list of `name: description` items",
                };
                out.push_str(&format!("## {heading} ({hint})\n"));
            }
            out
        }
    }
}

fn title_case(label: &str) -> String {
    label
        .split(' ')
        .map(|w| {
            let mut chars = w.chars();
            chars.next().map_or_else(String::new, |c| {
                c.to_ascii_uppercase().to_string() + chars.as_str()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip an optional `data:<mime>;base64,` prefix and decode.
///
/// Returns the bytes and the MIME type from the prefix, if one was present.
///
/// # Errors
///
/// Returns an error if the payload is not valid base64.
pub fn decode_data_url(input: &str) -> Result<(Vec<u8>, Option<String>), base64::DecodeError> {
    let (mime, payload) = match input.strip_prefix("data:") {
        Some(rest) => match rest.split_once(',') {
            Some((meta, payload)) => (
                meta.split(';').next().filter(|m| !m.is_empty()).map(str::to_owned),
                payload,
            ),
            None => (None, rest),
        },
        None => (None, input),
    };
    let bytes = base64::engine::general_purpose::STANDARD.decode(payload.trim())?;
    Ok((bytes, mime))
}
