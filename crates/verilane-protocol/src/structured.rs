//! Structured backend messages
//!
//! HTTP verification servers stream one JSON object per logical message:
//!
//! ```json
//! {"msg_type": "verification_result",
//!  "msg_body": {"status": "failure", "kind": "for_entity", "verifier": "silicon",
//!               "details": {"entity": {...}, "result": {"errors": [...]}}}}
//! ```

use crate::error::DecodeError;
use crate::events::{Definition, EntityKind, ErrorReport, OutlineMember, VerificationEvent};
use crate::position::{Position, Range};
use crate::text::count_field;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// Error tags whose failure concerns the whole program rather than an entity
const GLOBAL_FAILURE_TAGS: &[&str] = &[
    "parser.error",
    "parser.warning",
    "consistency.error",
    "typechecker.error",
    "clioption.error",
    "dependencynotfound.error",
    "timeout.error",
    "exceptional.error",
];

/// What the structured decoder needs to know about the running backend
#[derive(Debug, Clone, Default)]
pub struct StructuredContext {
    /// Backend family of the running job (`silicon`, `carbon`, `other`)
    pub backend_type: String,
}

impl StructuredContext {
    pub fn new(backend_type: impl Into<String>) -> Self {
        Self {
            backend_type: backend_type.into(),
        }
    }
}

fn is_global_failure(ctx: &StructuredContext, verifier: Option<&str>, first_tag: &str) -> bool {
    ctx.backend_type == "other"
        || verifier == Some("carbon")
        || GLOBAL_FAILURE_TAGS.contains(&first_tag)
        || first_tag.contains("internal")
}

fn text<'a>(value: &'a Value, field: &str) -> &'a str {
    value.get(field).and_then(Value::as_str).unwrap_or_default()
}

fn position(value: &Value, field: &str) -> Result<Position, DecodeError> {
    Ok(Position::parse(text(value, field))?.unwrap_or_default())
}

fn range_of(location: Option<&Value>) -> (Option<String>, Option<Range>) {
    let Some(location) = location else {
        return (None, None);
    };
    let file = location.get("file").and_then(Value::as_str).map(str::to_string);
    let start = Position::parse(text(location, "start")).ok().flatten();
    let end = Position::parse(text(location, "end")).ok().flatten();
    let range = match (start, end) {
        (Some(start), Some(end)) => Some(Range::new(start, end)),
        (Some(start), None) => Some(Range::new(start, start)),
        _ => None,
    };
    (file, range)
}

/// Decode one structured message into zero or more events
pub fn decode_message(
    message: &Value,
    ctx: &StructuredContext,
) -> Result<Vec<VerificationEvent>, DecodeError> {
    let msg_type = message
        .get("msg_type")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::missing("<structured>", "msg_type"))?;
    let body = message
        .get("msg_body")
        .ok_or_else(|| DecodeError::missing(msg_type, "msg_body"))?;

    match msg_type {
        "statistics" => Ok(vec![VerificationEvent::VerificationStart {
            predicates: count_field(body, msg_type, "predicates")?,
            methods: count_field(body, msg_type, "methods")?,
            functions: count_field(body, msg_type, "functions")?,
        }]),
        "program_outline" => {
            let members = body
                .get("members")
                .and_then(Value::as_array)
                .ok_or_else(|| DecodeError::missing(msg_type, "members"))?
                .iter()
                .map(|member| {
                    let (file, location) = range_of(member.get("position"));
                    OutlineMember {
                        kind: text(member, "type").to_string(),
                        name: text(member, "name").to_string(),
                        file,
                        location,
                    }
                })
                .collect();
            Ok(vec![VerificationEvent::Outline { members }])
        }
        "program_definitions" => {
            let definitions = body
                .get("definitions")
                .and_then(Value::as_array)
                .ok_or_else(|| DecodeError::missing(msg_type, "definitions"))?
                .iter()
                .map(|def| {
                    let (_, location) = range_of(def.get("location"));
                    let scope = match (
                        Position::parse(text(def, "scopeStart")).ok().flatten(),
                        Position::parse(text(def, "scopeEnd")).ok().flatten(),
                    ) {
                        (Some(start), Some(end)) => Some(Range::new(start, end)),
                        _ => None,
                    };
                    Definition {
                        kind: text(def, "type").to_string(),
                        name: text(def, "name").to_string(),
                        location,
                        scope,
                    }
                })
                .collect();
            Ok(vec![VerificationEvent::Definitions { definitions }])
        }
        "exception_report" => {
            let message = text(body, "message").to_string();
            warn!(
                stacktrace = ?body.get("stacktrace"),
                "Verification server reported an exception: {}",
                message
            );
            Ok(vec![
                VerificationEvent::Error {
                    errors: vec![ErrorReport {
                        tag: Some("exceptional.error".to_string()),
                        start: Position::default(),
                        end: Position::default(),
                        message,
                        cached: false,
                    }],
                },
                VerificationEvent::Stopped,
            ])
        }
        "verification_result" => decode_result(body, ctx),
        other => Ok(vec![VerificationEvent::Unhandled {
            msg_type: other.to_string(),
            body: message.clone(),
        }]),
    }
}

fn decode_result(body: &Value, ctx: &StructuredContext) -> Result<Vec<VerificationEvent>, DecodeError> {
    const MSG: &str = "verification_result";
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::missing(MSG, "status"))?;
    let kind = text(body, "kind");
    let details = body.get("details").unwrap_or(&Value::Null);
    let mut events = Vec::new();

    match status {
        "failure" => {
            let errors = details
                .get("result")
                .and_then(|result| result.get("errors"))
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            // cached failures arrive with no errors in the overall result
            if let Some(first) = errors.first() {
                let first_tag = text(first, "tag");
                let verifier = body.get("verifier").and_then(Value::as_str);
                if kind == "for_entity" || is_global_failure(ctx, verifier, first_tag) {
                    let errors = errors
                        .iter()
                        .map(|err| {
                            let position_of = err.get("position").unwrap_or(&Value::Null);
                            Ok(ErrorReport {
                                tag: err.get("tag").and_then(Value::as_str).map(str::to_string),
                                start: position(position_of, "start")?,
                                end: position(position_of, "end")?,
                                message: text(err, "text").to_string(),
                                cached: err.get("cached").and_then(Value::as_bool).unwrap_or(false),
                            })
                        })
                        .collect::<Result<Vec<_>, DecodeError>>()?;
                    events.push(VerificationEvent::Error { errors });
                }
            }
        }
        "success" if kind == "for_entity" => {
            let entity = details
                .get("entity")
                .ok_or_else(|| DecodeError::missing(MSG, "details.entity"))?;
            let entity_type = text(entity, "type");
            let kind = EntityKind::parse(entity_type)
                .ok_or_else(|| DecodeError::missing(MSG, "details.entity.type"))?;
            events.push(VerificationEvent::EntityVerified {
                kind,
                name: text(entity, "name").to_string(),
            });
        }
        _ => {}
    }

    if kind == "overall" {
        let millis = details.get("time").and_then(Value::as_f64).unwrap_or(0.0);
        let elapsed = Duration::try_from_secs_f64(millis / 1000.0).unwrap_or_default();
        events.push(VerificationEvent::End { elapsed });
    }
    Ok(events)
}
