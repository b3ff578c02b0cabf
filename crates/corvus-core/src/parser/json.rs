use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Before the top-level `{`.
    Seek,
    Key,
    InKey,
    Colon,
    Value,
    /// Inside a string, object or array value.
    Nested,
    Scalar,
    AfterValue,
    Closed,
}

/// A top-level member whose value has fully arrived.
#[derive(Debug)]
pub(super) enum Member {
    Valid(String, Value),
    Invalid,
}

/// Incremental scanner over a growing buffer. Only the top-level object is
/// tracked; a member is reported once its value closes, so the result does not
/// depend on where chunk boundaries fall.
#[derive(Debug)]
pub(super) struct JsonScanner {
    pos: usize,
    phase: Phase,
    nest: usize,
    in_string: bool,
    escape: bool,
    key_start: usize,
    value_start: usize,
    key: Option<String>,
}

impl JsonScanner {
    pub(super) fn new() -> Self {
        Self {
            pos: 0,
            phase: Phase::Seek,
            nest: 0,
            in_string: false,
            escape: false,
            key_start: 0,
            value_start: 0,
            key: None,
        }
    }

    pub(super) fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Scan the unseen tail of `buf`, returning members completed by it.
    pub(super) fn scan(&mut self, buf: &str) -> Vec<Member> {
        let bytes = buf.as_bytes();
        let mut out = Vec::new();

        while self.pos < bytes.len() {
            let i = self.pos;
            let b = bytes[i];
            self.pos += 1;

            match self.phase {
                Phase::Seek => {
                    if b == b'{' {
                        self.phase = Phase::Key;
                    }
                }
                Phase::Key => match b {
                    b'"' => {
                        self.key_start = i;
                        self.escape = false;
                        self.phase = Phase::InKey;
                    }
                    b'}' => self.phase = Phase::Closed,
                    _ => {}
                },
                Phase::InKey => {
                    if self.string_closes(b) {
                        self.key = serde_json::from_str::<String>(&buf[self.key_start..=i]).ok();
                        self.phase = Phase::Colon;
                    }
                }
                Phase::Colon => {
                    if b == b':' {
                        self.phase = Phase::Value;
                    }
                }
                Phase::Value => {
                    if b.is_ascii_whitespace() {
                        continue;
                    }
                    self.value_start = i;
                    self.escape = false;
                    match b {
                        b'"' => {
                            self.in_string = true;
                            self.nest = 0;
                            self.phase = Phase::Nested;
                        }
                        b'{' | b'[' => {
                            self.in_string = false;
                            self.nest = 1;
                            self.phase = Phase::Nested;
                        }
                        _ => self.phase = Phase::Scalar,
                    }
                }
                Phase::Nested => {
                    let done = if self.in_string {
                        if self.string_closes(b) {
                            self.in_string = false;
                            self.nest == 0
                        } else {
                            false
                        }
                    } else {
                        match b {
                            b'"' => {
                                self.in_string = true;
                                self.escape = false;
                            }
                            b'{' | b'[' => self.nest += 1,
                            b'}' | b']' => self.nest = self.nest.saturating_sub(1),
                            _ => {}
                        }
                        self.nest == 0
                    };
                    if done {
                        out.push(self.member(&buf[self.value_start..=i]));
                        self.phase = Phase::AfterValue;
                    }
                }
                Phase::Scalar => {
                    if b == b',' || b == b'}' || b.is_ascii_whitespace() {
                        out.push(self.member(buf[self.value_start..i].trim()));
                        self.phase = match b {
                            b',' => Phase::Key,
                            b'}' => Phase::Closed,
                            _ => Phase::AfterValue,
                        };
                    }
                }
                Phase::AfterValue => match b {
                    b',' => self.phase = Phase::Key,
                    b'}' => self.phase = Phase::Closed,
                    _ => {}
                },
                Phase::Closed => {
                    self.pos = bytes.len();
                }
            }
        }

        out
    }

    fn string_closes(&mut self, b: u8) -> bool {
        if self.escape {
            self.escape = false;
            return false;
        }
        match b {
            b'\\' => {
                self.escape = true;
                false
            }
            b'"' => true,
            _ => false,
        }
    }

    fn member(&mut self, raw: &str) -> Member {
        match (self.key.take(), serde_json::from_str::<Value>(raw)) {
            (Some(key), Ok(value)) => Member::Valid(key, value),
            _ => Member::Invalid,
        }
    }
}
