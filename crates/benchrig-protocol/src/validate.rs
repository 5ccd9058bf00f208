use std::collections::HashMap;

use benchrig_model::{CommandDefinition, ResponseMatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMethod {
    /// No expectation was configured.
    None,
    /// Case-insensitive literal comparison (also the fallback for a regex
    /// that failed to compile at load time).
    Literal,
    Regex,
}

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub success: bool,
    pub method: ValidationMethod,
    pub captured: Option<HashMap<String, String>>,
    pub reason: Option<String>,
}

impl ValidationOutcome {
    fn pass(method: ValidationMethod, captured: Option<HashMap<String, String>>) -> Self {
        ValidationOutcome {
            success: true,
            method,
            captured,
            reason: None,
        }
    }

    fn fail(method: ValidationMethod, reason: String) -> Self {
        ValidationOutcome {
            success: false,
            method,
            captured: None,
            reason: Some(reason),
        }
    }
}

/// Judges a raw response against a command's expectation.
///
/// The response is trimmed first. An absent expectation always passes. A
/// regex expectation matches against the trimmed response and exposes its
/// capture groups, named groups taking precedence over numbered ones.
pub fn validate_response(command: &CommandDefinition, raw: &str) -> ValidationOutcome {
    let response = raw.trim();
    match &command.matcher {
        ResponseMatcher::Any => ValidationOutcome::pass(ValidationMethod::None, None),
        ResponseMatcher::Literal(expected) => {
            if response.eq_ignore_ascii_case(expected.trim()) {
                ValidationOutcome::pass(ValidationMethod::Literal, None)
            } else {
                ValidationOutcome::fail(
                    ValidationMethod::Literal,
                    format!("expected '{}', got '{response}'", expected.trim()),
                )
            }
        }
        ResponseMatcher::Regex { pattern, compiled } => match compiled.captures(response) {
            Some(captures) => {
                let mut groups = HashMap::new();
                let names: Vec<&str> = compiled.capture_names().flatten().collect();
                if names.is_empty() {
                    for i in 1..captures.len() {
                        if let Some(m) = captures.get(i) {
                            groups.insert(i.to_string(), m.as_str().to_string());
                        }
                    }
                } else {
                    for name in names {
                        if let Some(m) = captures.name(name) {
                            groups.insert(name.to_string(), m.as_str().to_string());
                        }
                    }
                }
                let captured = (!groups.is_empty()).then_some(groups);
                ValidationOutcome::pass(ValidationMethod::Regex, captured)
            }
            None => ValidationOutcome::fail(
                ValidationMethod::Regex,
                format!("response '{response}' does not match /{pattern}/"),
            ),
        },
    }
}
