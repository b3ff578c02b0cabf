//! Progressive structured parser.
//!
//! Text deltas are appended to a buffer and scanned for newly completed
//! fields. Resolved fields are kept for the lifetime of the parser: later
//! fragments can overwrite a field (last writer wins) but never remove one.

mod heuristic;
mod json;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::ParseError;
use crate::result::{ResultBody, ResultKind, ResultSchema, StructuredResult};

use self::heuristic::SectionScanner;
use self::json::{JsonScanner, Member};

/// Progress never reaches 100 before finalization succeeds.
const STREAMING_PROGRESS_CAP: usize = 95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserMode {
    /// Output converges on one JSON object.
    Json,
    /// Output is free-form text with section headers.
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Empty,
    Accumulating,
    FieldResolved(usize),
    Finalized,
}

#[derive(Debug)]
enum Scanner {
    Json(JsonScanner),
    Heuristic(SectionScanner),
}

#[derive(Debug)]
pub struct ProgressiveParser {
    schema: &'static ResultSchema,
    scanner: Scanner,
    buffer: String,
    resolved: BTreeMap<String, Value>,
    malformed: usize,
    state: ParserState,
}

impl ProgressiveParser {
    #[must_use]
    pub fn new(kind: ResultKind, mode: ParserMode) -> Self {
        let scanner = match mode {
            ParserMode::Json => Scanner::Json(JsonScanner::new()),
            ParserMode::Heuristic => Scanner::Heuristic(SectionScanner::new()),
        };
        Self {
            schema: ResultSchema::for_kind(kind),
            scanner,
            buffer: String::new(),
            resolved: BTreeMap::new(),
            malformed: 0,
            state: ParserState::Empty,
        }
    }

    #[must_use]
    pub fn state(&self) -> ParserState {
        self.state
    }

    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Fragments that closed but failed validation. They are never surfaced.
    #[must_use]
    pub fn malformed(&self) -> usize {
        self.malformed
    }

    /// True once a JSON response closed its top-level object.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(&self.scanner, Scanner::Json(s) if s.is_closed())
    }

    /// Append a delta. Returns a snapshot when at least one field resolved.
    pub fn feed(&mut self, delta: &str) -> Option<StructuredResult> {
        if self.state == ParserState::Finalized || delta.is_empty() {
            return None;
        }
        self.buffer.push_str(delta);
        if self.state == ParserState::Empty {
            self.state = ParserState::Accumulating;
        }

        let found: Vec<Member> = match &mut self.scanner {
            Scanner::Json(s) => s.scan(&self.buffer),
            Scanner::Heuristic(s) => s
                .scan(&self.buffer, self.schema)
                .into_iter()
                .map(Member::from)
                .collect(),
        };
        self.apply(found)
    }

    fn apply(&mut self, members: Vec<Member>) -> Option<StructuredResult> {
        let mut changed = false;
        for member in members {
            match member {
                Member::Valid(key, value) => match self.schema.field(&key) {
                    Some(spec) if spec.kind.accepts(&value) => {
                        self.resolved.insert(key, value);
                        changed = true;
                    }
                    Some(_) => {
                        tracing::debug!(field = %key, "discarding value of the wrong shape");
                        self.malformed += 1;
                    }
                    None => {}
                },
                Member::Invalid => self.malformed += 1,
            }
        }
        if !changed {
            return None;
        }
        self.state = ParserState::FieldResolved(self.resolved.len());
        Some(self.snapshot())
    }

    /// Current best-known result, incomplete.
    #[must_use]
    pub fn snapshot(&self) -> StructuredResult {
        StructuredResult {
            body: ResultBody::from_fields(self.schema.kind, &self.resolved),
            is_complete: false,
            progress: self.progress(),
        }
    }

    #[must_use]
    pub fn progress(&self) -> u8 {
        if self.state == ParserState::Finalized && self.missing().is_empty() {
            return 100;
        }
        let total = self.schema.fields.len().max(1);
        let pct = STREAMING_PROGRESS_CAP * self.resolved.len() / total;
        u8::try_from(pct).unwrap_or(100)
    }

    fn missing(&self) -> Vec<String> {
        self.schema
            .required()
            .filter(|f| !self.resolved.contains_key(f.name))
            .map(|f| f.name.to_owned())
            .collect()
    }

    /// Run the end-of-stream pass.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::Malformed` if nothing usable was resolved and
    /// `ParseError::IncompleteAtFinalize` if a required field is still missing.
    pub fn finalize(&mut self) -> Result<StructuredResult, ParseError> {
        if self.state != ParserState::Finalized {
            if let Scanner::Heuristic(s) = &mut self.scanner {
                let tail: Vec<Member> = s
                    .finish(&self.buffer, self.schema)
                    .into_iter()
                    .map(Member::from)
                    .collect();
                self.apply(tail);
            }
            self.state = ParserState::Finalized;
        }

        let missing = self.missing();
        if self.resolved.is_empty() {
            return Err(ParseError::Malformed);
        }
        if !missing.is_empty() {
            return Err(ParseError::IncompleteAtFinalize { missing });
        }

        Ok(StructuredResult {
            body: ResultBody::from_fields(self.schema.kind, &self.resolved),
            is_complete: true,
            progress: 100,
        })
    }
}

impl From<(String, Value)> for Member {
    fn from((key, value): (String, Value)) -> Self {
        Member::Valid(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{CodeOptimization, CodeSolution};
    use proptest::prelude::*;

    const SOLUTION_JSON: &str = r#"Here you go:
```json
{"code": "def f(x):\n    return x", "language": "python",
 "explanation": "identity {not a brace}", "time_complexity": "O(1)",
 "space_complexity": "O(1)", "edge_cases": ["None input"],
 "alternative_approaches": [{"approach": "lambda"}]}
```"#;

    fn feed_all(parser: &mut ProgressiveParser, chunks: &[&str]) -> Vec<StructuredResult> {
        chunks.iter().filter_map(|c| parser.feed(c)).collect()
    }

    #[test]
    fn scenario_deltas_resolve_code_and_complexity() {
        let mut parser = ProgressiveParser::new(ResultKind::CodeSolution, ParserMode::Json);
        let snaps = feed_all(
            &mut parser,
            &[r#"{"code": "def "#, "f(x): return x", r#"", "time_complexity": "O(1)"}"#],
        );
        assert_eq!(snaps.len(), 1);
        assert!(parser.is_closed());

        let done = parser.finalize().unwrap();
        assert!(done.is_complete);
        assert_eq!(done.progress, 100);
        let ResultBody::CodeSolution(sol) = done.body else {
            panic!("wrong kind");
        };
        assert_eq!(sol.code.as_deref(), Some("def f(x): return x"));
        assert_eq!(sol.time_complexity.as_deref(), Some("O(1)"));
    }

    #[test]
    fn state_machine_progression() {
        let mut parser = ProgressiveParser::new(ResultKind::CodeSolution, ParserMode::Json);
        assert_eq!(parser.state(), ParserState::Empty);
        assert!(parser.feed("{\"co").is_none());
        assert_eq!(parser.state(), ParserState::Accumulating);
        assert!(parser.feed("de\": \"x\",").is_some());
        assert_eq!(parser.state(), ParserState::FieldResolved(1));
        parser.feed("\"time_complexity\": \"O(n)\"}");
        let _ = parser.finalize();
        assert_eq!(parser.state(), ParserState::Finalized);
        assert!(parser.feed("more").is_none());
    }

    #[test]
    fn snapshots_report_partial_fields_incomplete() {
        let mut parser = ProgressiveParser::new(ResultKind::CodeSolution, ParserMode::Json);
        let snap = parser.feed(r#"{"explanation": "loop", "code": "#).unwrap();
        assert!(!snap.is_complete);
        assert_eq!(snap.progress, 13);
        let ResultBody::CodeSolution(sol) = snap.body else {
            panic!("wrong kind");
        };
        assert_eq!(sol.explanation.as_deref(), Some("loop"));
        assert!(sol.code.is_none());
    }

    #[test]
    fn last_writer_wins_for_restated_field() {
        let mut parser = ProgressiveParser::new(ResultKind::CodeSolution, ParserMode::Json);
        parser.feed(r#"{"code": "v1", "time_complexity": "O(n)", "code": "v2"}"#);
        let done = parser.finalize().unwrap();
        let ResultBody::CodeSolution(CodeSolution { code, .. }) = done.body else {
            panic!("wrong kind");
        };
        assert_eq!(code.as_deref(), Some("v2"));
    }

    #[test]
    fn invalid_fragment_keeps_last_known_good() {
        let mut parser = ProgressiveParser::new(ResultKind::CodeSolution, ParserMode::Json);
        parser.feed(r#"{"code": "ok", "time_complexity": 5, "edge_cases": [1, "#);
        parser.feed(r#"2]}"#);
        assert_eq!(parser.malformed(), 2);
        let snap = parser.snapshot();
        let ResultBody::CodeSolution(sol) = snap.body else {
            panic!("wrong kind");
        };
        assert_eq!(sol.code.as_deref(), Some("ok"));
        assert!(sol.time_complexity.is_none());
        assert!(sol.edge_cases.is_none());
    }

    #[test]
    fn finalize_missing_required_field() {
        let mut parser = ProgressiveParser::new(ResultKind::CodeOptimization, ParserMode::Json);
        parser.feed(r#"{"optimized_code": "x"}"#);
        let err = parser.finalize().unwrap_err();
        assert_eq!(
            err,
            ParseError::IncompleteAtFinalize {
                missing: vec!["optimized_time_complexity".into()]
            }
        );
        assert!(!parser.snapshot().is_complete);
    }

    #[test]
    fn finalize_with_nothing_is_malformed() {
        let mut parser = ProgressiveParser::new(ResultKind::CodeSolution, ParserMode::Json);
        parser.feed("I cannot help with that.");
        assert_eq!(parser.finalize().unwrap_err(), ParseError::Malformed);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut parser = ProgressiveParser::new(ResultKind::CodeOptimization, ParserMode::Json);
        assert!(parser.feed(r#"{"notes": "hi", "#).is_none());
        assert_eq!(parser.malformed(), 0);
        parser.feed(r#""optimized_code": "y", "optimized_time_complexity": "O(1)"}"#);
        let done = parser.finalize().unwrap();
        let ResultBody::CodeOptimization(CodeOptimization { optimized_code, .. }) = done.body
        else {
            panic!("wrong kind");
        };
        assert_eq!(optimized_code.as_deref(), Some("y"));
    }

    #[test]
    fn heuristic_mode_resolves_trailing_section_at_finalize() {
        let mut parser =
            ProgressiveParser::new(ResultKind::RecordingAnalysis, ParserMode::Heuristic);
        assert!(parser.feed("## Solution\nUse a heap.\n").is_none());
        let snap = parser.feed("## Confidence\n").unwrap();
        assert_eq!(snap.progress, 31);
        parser.feed("0.9");
        let done = parser.finalize().unwrap();
        let ResultBody::RecordingAnalysis(r) = done.body else {
            panic!("wrong kind");
        };
        assert_eq!(r.solution.as_deref(), Some("Use a heap."));
        assert_eq!(r.confidence, Some(0.9));
    }

    #[test]
    fn heuristic_multiple_choice_answer_finalizes_with_empty_code() {
        let mut parser = ProgressiveParser::new(ResultKind::CodeSolution, ParserMode::Heuristic);
        parser.feed("## Code\n\n## Explanation\nQ1 Which lookup is O(1)?\n");
        parser.feed("Answer: B) hash map, constant time lookups\n");
        parser.feed("Q2 Which sort is stable?\nAnswer: C) merge sort\n");
        parser.feed("## Time Complexity\nN/A");
        let done = parser.finalize().unwrap();
        let ResultBody::CodeSolution(CodeSolution {
            code, explanation, ..
        }) = done.body
        else {
            panic!("wrong kind");
        };
        assert_eq!(code.as_deref(), Some(""));
        let explanation = explanation.unwrap();
        assert!(explanation.contains("B) hash map"));
        assert!(explanation.ends_with("Answer: C) merge sort"));
    }

    fn chunked(text: &str, cuts: &[usize]) -> Vec<String> {
        let mut bounds: Vec<usize> = cuts
            .iter()
            .map(|c| c % (text.len() + 1))
            .filter(|c| text.is_char_boundary(*c))
            .collect();
        bounds.push(0);
        bounds.push(text.len());
        bounds.sort_unstable();
        bounds.dedup();
        bounds.windows(2).map(|w| text[w[0]..w[1]].to_owned()).collect()
    }

    fn run(mode: ParserMode, chunks: &[String]) -> (Vec<u8>, Result<StructuredResult, ParseError>) {
        let mut parser = ProgressiveParser::new(ResultKind::CodeSolution, mode);
        let progress = chunks
            .iter()
            .filter_map(|c| parser.feed(c))
            .map(|s| s.progress)
            .collect();
        (progress, parser.finalize())
    }

    const SOLUTION_MARKDOWN: &str = "## Code\n```python\ndef f(x):\n    return x\n```\n\
        ## Time Complexity\nO(1)\n## Edge Cases\n- None input\n- huge x\n## Explanation\nidentity";

    proptest! {
        #[test]
        fn json_chunking_does_not_change_result(cuts in proptest::collection::vec(0usize..400, 0..12)) {
            let whole = run(ParserMode::Json, &[SOLUTION_JSON.to_owned()]).1;
            let (progress, split) = run(ParserMode::Json, &chunked(SOLUTION_JSON, &cuts));
            prop_assert!(whole.is_ok());
            prop_assert_eq!(whole, split);
            prop_assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        }

        #[test]
        fn heuristic_chunking_does_not_change_result(cuts in proptest::collection::vec(0usize..200, 0..12)) {
            let whole = run(ParserMode::Heuristic, &[SOLUTION_MARKDOWN.to_owned()]).1;
            let (progress, split) = run(ParserMode::Heuristic, &chunked(SOLUTION_MARKDOWN, &cuts));
            prop_assert!(whole.is_ok());
            prop_assert_eq!(whole, split);
            prop_assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
