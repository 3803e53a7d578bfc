//! Line-oriented backend output
//!
//! Older backends print human readable progress with a few fixed markers:
//!
//! ```text
//! Silicon started
//! Silicon finished in 1.52 seconds.
//! The following errors were found:
//!   Assert might fail. [assert.failed] 12:5: Assertion x > 0 might not hold.
//! ```
//!
//! Interleaved with that, the same stream may carry single-line JSON
//! progress objects (`{"type": "MethodVerified", ...}`) and quoted
//! counterexample model lines. [`LineDecoder`] handles one complete line at a
//! time; splitting a stream into lines is the caller's job.

use crate::error::DecodeError;
use crate::events::{Definition, EntityKind, ErrorReport, OutlineMember, VerificationEvent};
use crate::position::{Position, Range};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, trace};

/// Column used as the end of an error range that covers the rest of a line
pub const END_OF_LINE_CHARACTER: u32 = 10_000;

/// Where in its output a line-oriented backend is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineState {
    /// Nothing meaningful seen yet
    #[default]
    Idle,
    Running,
    /// Past the finish marker, printing errors
    Reporting,
    /// Printing its usage, everything else is ignored
    PrintingHelp,
}

/// Decodes complete lines of line-oriented output
#[derive(Debug, Default)]
pub struct LineDecoder {
    state: LineState,
}

fn error_line_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*(\d+):(\d+):\s(.*)$").ok()).as_ref()
}

fn number_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^.*?(\d+)(?:[.,](\d+))?").ok()).as_ref()
}

/// First decimal number in `text`, accepting `.` or `,` as separator
pub fn extract_number(text: &str) -> Option<f64> {
    let caps = number_regex()?.captures(text)?;
    let whole = caps.get(1)?.as_str();
    match caps.get(2) {
        Some(fraction) => format!("{whole}.{}", fraction.as_str()).parse().ok(),
        None => whole.parse().ok(),
    }
}

fn seconds(text: &str) -> Duration {
    extract_number(text)
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .unwrap_or_default()
}

fn is_start_marker(line: &str) -> bool {
    (line.starts_with("Silicon") && !line.starts_with("Silicon finished"))
        || line.starts_with("carbon started")
}

fn is_finish_marker(line: &str) -> bool {
    line.starts_with("Silicon finished") || line.starts_with("carbon finished in")
}

/// Parse one `  line:col: message` error line
pub fn parse_error_line(line: &str) -> Result<ErrorReport, DecodeError> {
    let caps = error_line_regex()
        .and_then(|re| re.captures(line))
        .ok_or_else(|| DecodeError::UnexpectedLine(line.trim().to_string()))?;
    let invalid = || DecodeError::InvalidPosition(line.trim().to_string());
    let line_nr: u32 = caps[1].parse().map_err(|_| invalid())?;
    let char_nr: u32 = caps[2].parse().map_err(|_| invalid())?;
    let line_nr = line_nr.saturating_sub(1);
    let char_nr = char_nr.saturating_sub(1);

    let tag = match (line.find('['), line.find(']')) {
        (Some(open), Some(close)) if open < close => Some(line[open + 1..close].to_string()),
        _ => None,
    };

    Ok(ErrorReport {
        tag,
        start: Position::new(line_nr, char_nr),
        end: Position::new(line_nr, END_OF_LINE_CHARACTER),
        message: caps[3].trim().to_string(),
        cached: false,
    })
}

fn str_field<'a>(value: &'a Value, msg_type: &str, field: &str) -> Result<&'a str, DecodeError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::missing(msg_type, field))
}

/// Read a count that may be sent as a number or as a numeric string
pub(crate) fn count_field(value: &Value, msg_type: &str, field: &str) -> Result<u32, DecodeError> {
    let raw = value.get(field).ok_or_else(|| DecodeError::missing(msg_type, field))?;
    let parsed = match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| DecodeError::missing(msg_type, field))
}

fn position_field(value: &Value, field: &str) -> Result<Position, DecodeError> {
    match value.get(field).and_then(Value::as_str) {
        Some(text) => Ok(Position::parse(text)?.unwrap_or_default()),
        None => Ok(Position::default()),
    }
}

/// Parse `file@start-end` into the file and range
fn located(text: &str) -> (Option<String>, Option<Range>) {
    match text.rsplit_once('@') {
        Some((file, range)) => (Some(file.to_string()), Range::parse(range).ok().flatten()),
        None => (None, Range::parse(text).ok().flatten()),
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LineState {
        self.state
    }

    /// Decode one complete line (without its line terminator)
    pub fn decode_line(&mut self, line: &str) -> Vec<Result<VerificationEvent, DecodeError>> {
        let line = line.trim_end_matches(['\r', '\n']);
        let trimmed = line.trim();
        if trimmed.is_empty() || self.state == LineState::PrintingHelp {
            return Vec::new();
        }

        if trimmed.starts_with("{\"") && trimmed.ends_with('}') {
            return match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => self.decode_json(&value),
                Err(e) => vec![Err(DecodeError::malformed(&e, trimmed))],
            };
        }
        if trimmed.starts_with('"') {
            return vec![Ok(VerificationEvent::Model {
                line: trimmed.to_string(),
            })];
        }

        if is_start_marker(trimmed) {
            if self.state != LineState::Running {
                debug!("Line-oriented backend started");
            }
            self.state = LineState::Running;
            let backend_type = trimmed
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase();
            return vec![Ok(VerificationEvent::Start { backend_type })];
        }
        if is_finish_marker(trimmed) {
            self.state = LineState::Reporting;
            return vec![Ok(VerificationEvent::End {
                elapsed: seconds(trimmed),
            })];
        }

        match self.state {
            LineState::Idle => {
                if trimmed.starts_with("Command-line interface:") {
                    self.state = LineState::PrintingHelp;
                    return vec![Ok(VerificationEvent::UsageHelp)];
                }
                trace!("Ignoring output before start: {}", trimmed);
                Vec::new()
            }
            LineState::Running => {
                trace!("Backend output: {}", trimmed);
                Vec::new()
            }
            LineState::Reporting => {
                if trimmed == "No errors found." || trimmed.starts_with("The following errors were found") {
                    Vec::new()
                } else if line.starts_with("  ") {
                    vec![parse_error_line(line).map(|report| VerificationEvent::Error {
                        errors: vec![report],
                    })]
                } else {
                    vec![Err(DecodeError::UnexpectedLine(trimmed.to_string()))]
                }
            }
            LineState::PrintingHelp => Vec::new(),
        }
    }

    /// Decode a legacy `{"type": ...}` progress object
    pub fn decode_json(&mut self, value: &Value) -> Vec<Result<VerificationEvent, DecodeError>> {
        let Some(msg_type) = value.get("type").and_then(Value::as_str) else {
            return vec![Err(DecodeError::missing("<legacy>", "type"))];
        };
        vec![self.decode_typed(msg_type, value)]
    }

    fn decode_typed(&mut self, msg_type: &str, value: &Value) -> Result<VerificationEvent, DecodeError> {
        let event = match msg_type {
            "Start" => {
                self.state = LineState::Running;
                VerificationEvent::Start {
                    backend_type: value
                        .get("backendType")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }
            }
            "VerificationStart" => {
                self.state = LineState::Running;
                VerificationEvent::VerificationStart {
                    predicates: count_field(value, msg_type, "nofPredicates")?,
                    methods: count_field(value, msg_type, "nofMethods")?,
                    functions: count_field(value, msg_type, "nofFunctions")?,
                }
            }
            "MethodVerified" | "FunctionVerified" | "PredicateVerified" => {
                let kind = match msg_type {
                    "MethodVerified" => EntityKind::Method,
                    "FunctionVerified" => EntityKind::Function,
                    _ => EntityKind::Predicate,
                };
                VerificationEvent::EntityVerified {
                    kind,
                    name: str_field(value, msg_type, "name")?.to_string(),
                }
            }
            "Error" => {
                let errors = value
                    .get("errors")
                    .and_then(Value::as_array)
                    .ok_or_else(|| DecodeError::missing(msg_type, "errors"))?;
                let errors = errors
                    .iter()
                    .map(|err| {
                        Ok(ErrorReport {
                            tag: err.get("tag").and_then(Value::as_str).map(str::to_string),
                            start: position_field(err, "start")?,
                            end: position_field(err, "end")?,
                            message: err
                                .get("message")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            cached: err.get("cached").and_then(Value::as_bool).unwrap_or(false),
                        })
                    })
                    .collect::<Result<Vec<_>, DecodeError>>()?;
                VerificationEvent::Error { errors }
            }
            "End" => {
                self.state = LineState::Reporting;
                let elapsed = match value.get("time") {
                    Some(Value::String(text)) => seconds(text),
                    Some(Value::Number(n)) => n
                        .as_f64()
                        .and_then(|s| Duration::try_from_secs_f64(s).ok())
                        .unwrap_or_default(),
                    _ => Duration::default(),
                };
                VerificationEvent::End { elapsed }
            }
            "Stopped" => VerificationEvent::Stopped,
            "Outline" => {
                let members = value
                    .get("members")
                    .and_then(Value::as_array)
                    .ok_or_else(|| DecodeError::missing(msg_type, "members"))?
                    .iter()
                    .map(|m| {
                        let (file, location) =
                            located(m.get("location").and_then(Value::as_str).unwrap_or_default());
                        OutlineMember {
                            kind: m.get("type").and_then(Value::as_str).unwrap_or_default().to_string(),
                            name: m.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                            file,
                            location,
                        }
                    })
                    .collect();
                VerificationEvent::Outline { members }
            }
            "Definitions" => {
                let definitions = value
                    .get("definitions")
                    .and_then(Value::as_array)
                    .ok_or_else(|| DecodeError::missing(msg_type, "definitions"))?
                    .iter()
                    .map(|d| {
                        let text = |field: &str| d.get(field).and_then(Value::as_str).unwrap_or_default();
                        let (_, location) = located(text("location"));
                        let scope = match (
                            Position::parse(text("scopeStart")).ok().flatten(),
                            Position::parse(text("scopeEnd")).ok().flatten(),
                        ) {
                            (Some(start), Some(end)) => Some(Range::new(start, end)),
                            _ => None,
                        };
                        Definition {
                            kind: text("type").to_string(),
                            name: text("name").to_string(),
                            location,
                            scope,
                        }
                    })
                    .collect();
                VerificationEvent::Definitions { definitions }
            }
            other => VerificationEvent::Unhandled {
                msg_type: other.to_string(),
                body: value.clone(),
            },
        };
        Ok(event)
    }
}
