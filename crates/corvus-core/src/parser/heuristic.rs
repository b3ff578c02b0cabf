use serde_json::{Map, Value};

use crate::result::{FieldKind, FieldSpec, ResultSchema};

/// Section-header extraction for providers without a JSON mode.
///
/// Only complete lines are examined while streaming; the trailing partial line
/// is handled by [`SectionScanner::finish`].
#[derive(Debug)]
pub(super) struct SectionScanner {
    pos: usize,
    in_fence: bool,
    current: Option<Section>,
}

#[derive(Debug)]
struct Section {
    field: FieldSpec,
    lines: Vec<String>,
}

impl SectionScanner {
    pub(super) fn new() -> Self {
        Self {
            pos: 0,
            in_fence: false,
            current: None,
        }
    }

    pub(super) fn scan(&mut self, buf: &str, schema: &ResultSchema) -> Vec<(String, Value)> {
        let mut out = Vec::new();
        while let Some(nl) = buf[self.pos..].find('\n') {
            let line = &buf[self.pos..self.pos + nl];
            self.pos += nl + 1;
            self.line(line.trim_end_matches('\r'), schema, &mut out);
        }
        out
    }

    pub(super) fn finish(&mut self, buf: &str, schema: &ResultSchema) -> Vec<(String, Value)> {
        let mut out = self.scan(buf, schema);
        if self.pos < buf.len() {
            let rest = buf[self.pos..].to_owned();
            self.pos = buf.len();
            self.line(rest.trim_end_matches('\r'), schema, &mut out);
        }
        if let Some(section) = self.current.take() {
            out.extend(section.resolve());
        }
        out
    }

    fn line(&mut self, line: &str, schema: &ResultSchema, out: &mut Vec<(String, Value)>) {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            self.in_fence = !self.in_fence;
            self.push(line);
            return;
        }
        if self.in_fence {
            self.push(line);
            return;
        }

        match parse_header(trimmed, schema) {
            Header::Field(field, inline) => {
                if let Some(done) = self.current.take() {
                    out.extend(done.resolve());
                }
                let mut lines = Vec::new();
                if !inline.is_empty() {
                    lines.push(inline.to_owned());
                }
                self.current = Some(Section {
                    field: *field,
                    lines,
                });
            }
            Header::Other => {
                if let Some(done) = self.current.take() {
                    out.extend(done.resolve());
                }
            }
            Header::None => self.push(line),
        }
    }

    fn push(&mut self, line: &str) {
        if let Some(section) = self.current.as_mut() {
            section.lines.push(line.to_owned());
        }
    }
}

enum Header<'a> {
    Field(&'a FieldSpec, &'a str),
    /// A Markdown heading that names no field; ends the current section.
    Other,
    None,
}

fn parse_header<'a>(line: &'a str, schema: &'a ResultSchema) -> Header<'a> {
    if line.starts_with('#') {
        let label = line.trim_start_matches('#');
        let (label, inline) = label.split_once(':').unwrap_or((label, ""));
        return match schema.field_for_label(&normalize(label)) {
            Some(field) => Header::Field(field, inline.trim()),
            None => Header::Other,
        };
    }

    if let Some(rest) = line.strip_prefix("**")
        && let Some(end) = rest.find("**")
    {
        let label = &rest[..end];
        let inline = rest[end + 2..].trim_start_matches(':').trim();
        if let Some(field) = schema.field_for_label(&normalize(label)) {
            return Header::Field(field, inline);
        }
        return Header::None;
    }

    // Bare `Label:` lines only open a section under the field's primary name,
    // so body text such as `Answer: B` stays inside the current section.
    if let Some((label, inline)) = line.split_once(':')
        && label.len() <= 40
        && label.chars().all(|c| c.is_ascii_alphabetic() || c == ' ' || c == '_')
    {
        let label = normalize(label);
        if let Some(field) = schema.field_for_label(&label)
            && field.aliases.first() == Some(&label.as_str())
        {
            return Header::Field(field, inline.trim());
        }
    }

    Header::None
}

fn normalize(label: &str) -> String {
    label
        .replace('_', " ")
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_ascii_alphanumeric())
                .to_ascii_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

impl Section {
    fn resolve(self) -> Option<(String, Value)> {
        let value = match self.field.kind {
            // An empty code section is an explicit "no code" answer.
            FieldKind::Code => Some(Value::String(
                fenced_block(&self.lines)
                    .or_else(|| joined(&self.lines))
                    .unwrap_or_default(),
            )),
            FieldKind::Text => joined(&self.lines).map(Value::String),
            FieldKind::TextList => {
                let items = list_items(&self.lines);
                (!items.is_empty()).then(|| Value::from(items))
            }
            FieldKind::Number => joined(&self.lines).and_then(|t| parse_number(&t)),
            FieldKind::Records => {
                let records: Vec<Value> = list_items(&self.lines)
                    .into_iter()
                    .map(|item| {
                        let mut record = Map::new();
                        match item.split_once(':') {
                            Some((name, details)) => {
                                record.insert("approach".into(), name.trim().into());
                                record.insert("details".into(), details.trim().into());
                            }
                            None => {
                                record.insert("approach".into(), item.into());
                            }
                        }
                        Value::Object(record)
                    })
                    .collect();
                (!records.is_empty()).then(|| Value::from(records))
            }
        }?;
        Some((self.field.name.to_owned(), value))
    }
}

fn joined(lines: &[String]) -> Option<String> {
    let text = lines.join("\n").trim().to_owned();
    (!text.is_empty()).then_some(text)
}

fn fenced_block(lines: &[String]) -> Option<String> {
    let start = lines.iter().position(|l| l.trim_start().starts_with("```"))?;
    let body: Vec<&str> = lines[start + 1..]
        .iter()
        .take_while(|l| !l.trim_start().starts_with("```"))
        .map(String::as_str)
        .collect();
    let code = body.join("\n");
    (!code.trim().is_empty()).then_some(code)
}

fn list_items(lines: &[String]) -> Vec<String> {
    let bullets: Vec<String> = lines
        .iter()
        .filter_map(|l| strip_bullet(l.trim()))
        .map(str::to_owned)
        .collect();
    if bullets.is_empty() {
        lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect()
    } else {
        bullets
    }
}

fn strip_bullet(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return Some(rest.trim());
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(rest.trim());
        }
    }
    None
}

fn parse_number(text: &str) -> Option<Value> {
    let token = text.split_whitespace().next()?;
    let (digits, percent) = match token.strip_suffix('%') {
        Some(d) => (d, true),
        None => (token.trim_end_matches(|c: char| !c.is_ascii_digit()), false),
    };
    let n: f64 = digits.parse().ok()?;
    let n = if percent { n / 100.0 } else { n };
    serde_json::Number::from_f64(n).map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ResultKind;

    fn extract(text: &str, kind: ResultKind) -> Vec<(String, Value)> {
        let schema = ResultSchema::for_kind(kind);
        let mut scanner = SectionScanner::new();
        scanner.finish(text, schema)
    }

    #[test]
    fn markdown_sections_resolve_fields() {
        let text = "## Code\n```python\ndef f(x):\n    return x\n```\n\
                    ## Time Complexity\nO(1)\n\
                    ## Edge Cases\n- empty input\n- negative x\n";
        let fields = extract(text, ResultKind::CodeSolution);
        assert_eq!(fields[0], ("code".into(), Value::from("def f(x):\n    return x")));
        assert_eq!(fields[1], ("time_complexity".into(), Value::from("O(1)")));
        assert_eq!(
            fields[2],
            ("edge_cases".into(), Value::from(vec!["empty input", "negative x"]))
        );
    }

    #[test]
    fn headers_inside_fences_are_code() {
        let text = "## Code\n```\n# Time Complexity\nx = 1\n```\n## Space Complexity\nO(1)\n";
        let fields = extract(text, ResultKind::CodeSolution);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].1, "# Time Complexity\nx = 1");
    }

    #[test]
    fn bold_and_label_headers_with_inline_values() {
        let text = "**Time Complexity:** O(n log n)\nSpace complexity: O(n)\n";
        let fields = extract(text, ResultKind::CodeSolution);
        assert_eq!(fields[0], ("time_complexity".into(), Value::from("O(n log n)")));
        assert_eq!(fields[1], ("space_complexity".into(), Value::from("O(n)")));
    }

    #[test]
    fn section_resolves_only_when_next_header_starts() {
        let schema = ResultSchema::for_kind(ResultKind::RecordingAnalysis);
        let mut scanner = SectionScanner::new();
        let mut buf = String::from("## Solution\nUse two pointers.\n");
        assert!(scanner.scan(&buf, schema).is_empty());
        buf.push_str("## Confidence\n85%");
        let fields = scanner.scan(&buf, schema);
        assert_eq!(fields, vec![("solution".into(), Value::from("Use two pointers."))]);
        let rest = scanner.finish(&buf, schema);
        assert_eq!(rest, vec![("confidence".into(), Value::from(0.85))]);
    }

    #[test]
    fn unknown_heading_closes_section() {
        let text = "## Explanation\nloop once\n## Notes\nignored\n";
        let fields = extract(text, ResultKind::CodeSolution);
        assert_eq!(fields, vec![("explanation".into(), Value::from("loop once"))]);
    }

    #[test]
    fn alternative_approaches_become_records() {
        let text = "## Alternative Approaches\n1. Brute force: try all pairs\n2. Sorting\n";
        let fields = extract(text, ResultKind::CodeSolution);
        let records = fields[0].1.as_array().unwrap();
        assert_eq!(records[0]["approach"], "Brute force");
        assert_eq!(records[0]["details"], "try all pairs");
        assert_eq!(records[1]["approach"], "Sorting");
    }

    #[test]
    fn empty_code_section_resolves_to_empty_string() {
        let text = "## Code\n\n## Time Complexity\nN/A\n";
        let fields = extract(text, ResultKind::CodeSolution);
        assert_eq!(fields[0], ("code".into(), Value::from("")));
        assert_eq!(fields[1], ("time_complexity".into(), Value::from("N/A")));
    }

    #[test]
    fn secondary_alias_label_stays_in_section() {
        let text = "## Explanation\nQ1: which structure?\nAnswer: B) hash map\n\
                    Q2: which sort?\nAnswer: C) merge sort\n## Time Complexity\nN/A\n";
        let fields = extract(text, ResultKind::CodeSolution);
        assert_eq!(fields[0].0, "explanation");
        let explanation = fields[0].1.as_str().unwrap();
        assert!(explanation.starts_with("Q1: which structure?"));
        assert!(explanation.contains("Answer: B) hash map"));
        assert!(explanation.ends_with("Answer: C) merge sort"));
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("  Time_Complexity: "), "time complexity");
        assert_eq!(normalize("**Edge  Cases**"), "edge cases");
    }
}
