use std::collections::HashMap;
use std::time::Duration;

use regex::{Regex, RegexBuilder};

/// Declarative definition of one bench-in-box: an id and its units under
/// test. Loaded from XML, immutable afterwards.
#[derive(Debug, Clone)]
pub struct BibDefinition {
    pub id: String,
    pub description: String,
    pub metadata: HashMap<String, String>,
    pub uuts: Vec<UutDefinition>,
}

impl BibDefinition {
    pub fn uut(&self, id: &str) -> Option<&UutDefinition> {
        self.uuts.iter().find(|u| u.id == id)
    }
}

#[derive(Debug, Clone)]
pub struct UutDefinition {
    pub id: String,
    pub ports: Vec<PortDefinition>,
}

impl UutDefinition {
    pub fn port(&self, index: u32) -> Option<&PortDefinition> {
        self.ports.iter().find(|p| p.index == index)
    }
}

/// One logical serial channel of a UUT with its wire parameters and the
/// three command sequences a workflow executes against it.
#[derive(Debug, Clone)]
pub struct PortDefinition {
    /// 1-based ordinal within the UUT; unique per UUT.
    pub index: u32,
    pub protocol: String,
    pub speed: u32,
    /// Parity/data-bits/stop-bits code, e.g. `n81`.
    pub data_pattern: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Protocol settings not modeled as dedicated fields.
    pub settings: HashMap<String, String>,
    pub start_commands: CommandSequence,
    pub test_commands: CommandSequence,
    pub stop_commands: CommandSequence,
}

#[derive(Debug, Clone, Default)]
pub struct CommandSequence {
    pub commands: Vec<CommandDefinition>,
}

impl CommandSequence {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

/// How a command's response is judged.
///
/// The regex variant carries the compiled pattern; a pattern that fails to
/// compile at load time is downgraded to [`ResponseMatcher::Literal`] and
/// the compile error is recorded on the owning [`CommandDefinition`], so
/// execution falls back to a plain string comparison.
#[derive(Debug, Clone)]
pub enum ResponseMatcher {
    /// No expectation; any response (including none) succeeds.
    Any,
    /// Case-insensitive equality on trimmed strings.
    Literal(String),
    Regex { pattern: String, compiled: Regex },
}

impl ResponseMatcher {
    /// Builds a matcher from the raw expectation. `is_regex` selects regex
    /// compilation; on compile failure the returned matcher is the literal
    /// fallback and the error string is returned alongside.
    pub fn from_expectation(
        expected: Option<String>,
        is_regex: bool,
        options: &RegexOptions,
    ) -> (Self, Option<String>) {
        let Some(expected) = expected.filter(|e| !e.trim().is_empty()) else {
            return (ResponseMatcher::Any, None);
        };
        if !is_regex {
            return (ResponseMatcher::Literal(expected), None);
        }
        match options.compile(&expected) {
            Ok(compiled) => (
                ResponseMatcher::Regex {
                    pattern: expected,
                    compiled,
                },
                None,
            ),
            Err(err) => {
                let msg = err.to_string();
                (ResponseMatcher::Literal(expected), Some(msg))
            }
        }
    }
}

/// One command of a start/test/stop sequence.
#[derive(Debug, Clone)]
pub struct CommandDefinition {
    /// Bytes written to the wire, UTF-8. Line-oriented handlers append a
    /// CRLF terminator when the text does not already end with one.
    pub command: String,
    pub matcher: ResponseMatcher,
    pub timeout: Duration,
    /// Extra attempts after the first; only timeouts and response
    /// mismatches are retried.
    pub retry_count: u32,
    /// Compile error of a regex expectation that failed at load time.
    pub regex_validation_error: Option<String>,
}

impl CommandDefinition {
    pub fn new(command: impl Into<String>) -> Self {
        CommandDefinition {
            command: command.into(),
            matcher: ResponseMatcher::Any,
            timeout: Duration::from_millis(2000),
            retry_count: 0,
            regex_validation_error: None,
        }
    }

    pub fn expecting(mut self, expected: &str) -> Self {
        self.matcher = ResponseMatcher::Literal(expected.to_string());
        self
    }

    pub fn expecting_regex(mut self, pattern: &str) -> Self {
        let (matcher, err) = ResponseMatcher::from_expectation(
            Some(pattern.to_string()),
            true,
            &RegexOptions::default(),
        );
        self.matcher = matcher;
        self.regex_validation_error = err;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }
}

/// Parsed `options` attribute of an `<expected_response>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegexOptions {
    pub ignore_case: bool,
    pub multiline: bool,
    pub singleline: bool,
    pub ignore_pattern_whitespace: bool,
}

impl RegexOptions {
    fn compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        RegexBuilder::new(pattern)
            .case_insensitive(self.ignore_case)
            .multi_line(self.multiline)
            .dot_matches_new_line(self.singleline)
            .ignore_whitespace(self.ignore_pattern_whitespace)
            .build()
    }
}

/// Parses a comma-separated, case-insensitive option list such as
/// `"IgnoreCase,Multiline"` or `"i,m"`.
///
/// `ExplicitCapture`/`n` and `Compiled`/`c` are accepted for compatibility
/// but have no effect here. Unknown names are collected as warnings, never
/// failures.
pub fn parse_regex_options(raw: &str) -> (RegexOptions, Vec<String>) {
    let mut options = RegexOptions::default();
    let mut warnings = Vec::new();
    for name in raw.split(',') {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        match name.to_ascii_lowercase().as_str() {
            "ignorecase" | "i" => options.ignore_case = true,
            "multiline" | "m" => options.multiline = true,
            "singleline" | "s" => options.singleline = true,
            "ignorepatternwhitespace" | "x" => options.ignore_pattern_whitespace = true,
            "explicitcapture" | "n" | "compiled" | "c" => {}
            other => warnings.push(format!("unknown regex option '{other}'")),
        }
    }
    (options, warnings)
}
