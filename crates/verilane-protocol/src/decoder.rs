//! Stream decoding without knowing the wire format up front
//!
//! Backend output arrives in arbitrary chunks. [`OutputDecoder`] keeps the
//! partial line or partial JSON object between chunks, so the events it
//! yields do not depend on where the chunks were split.
//!
//! A line that starts with `{` opens a JSON object that is framed by brace
//! depth (string literals and escapes respected) and may span several lines.
//! Objects carrying `msg_type` are structured messages; objects carrying
//! `type` are legacy progress messages. Everything else is decoded line by
//! line.

use crate::error::DecodeError;
use crate::events::VerificationEvent;
use crate::structured::{decode_message, StructuredContext};
use crate::text::{LineDecoder, LineState};
use serde_json::Value;
use tracing::debug;

/// Output format detected on a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// Text lines, possibly with single-line JSON progress objects
    Lines,
    /// One `{msg_type, msg_body}` object per message
    Structured,
}

#[derive(Debug, Default)]
enum Framing {
    /// Collecting a text line
    #[default]
    Line,
    /// Inside a JSON object
    Object {
        depth: usize,
        in_string: bool,
        escaped: bool,
    },
}

/// Largest JSON object buffered before it is dropped as malformed
const MAX_OBJECT_BYTES: usize = 16 * 1024 * 1024;

/// Whether the text after an opening brace can still be a JSON object:
/// nothing yet, a key, or the closing brace
fn opens_json_object(pending: &str) -> bool {
    let rest = pending.strip_prefix('{').unwrap_or(pending).trim_start();
    rest.is_empty() || rest.starts_with('"') || rest.starts_with('}')
}

/// Result of decoding a piece of output
pub type Decoded = Result<VerificationEvent, DecodeError>;

/// Incremental decoder for one stage's stdout
#[derive(Debug)]
pub struct OutputDecoder {
    framing: Framing,
    pending: String,
    lines: LineDecoder,
    context: StructuredContext,
    format: Option<WireFormat>,
}

impl OutputDecoder {
    pub fn new(context: StructuredContext) -> Self {
        Self {
            framing: Framing::Line,
            pending: String::new(),
            lines: LineDecoder::new(),
            context,
            format: None,
        }
    }

    /// The format seen so far, if any message was decoded
    pub fn format(&self) -> Option<WireFormat> {
        self.format
    }

    pub fn line_state(&self) -> LineState {
        self.lines.state()
    }

    /// Feed the next chunk of output
    pub fn feed(&mut self, chunk: &str) -> Vec<Decoded> {
        let mut out = Vec::new();
        for c in chunk.chars() {
            match &mut self.framing {
                Framing::Line => {
                    if c == '{' && self.pending.trim().is_empty() {
                        self.pending.clear();
                        self.pending.push(c);
                        self.framing = Framing::Object {
                            depth: 1,
                            in_string: false,
                            escaped: false,
                        };
                    } else if c == '\n' {
                        let line = std::mem::take(&mut self.pending);
                        self.decode_line(&line, &mut out);
                    } else {
                        self.pending.push(c);
                    }
                }
                Framing::Object {
                    depth,
                    in_string,
                    escaped,
                } => {
                    if c == '\n' && !*in_string && !opens_json_object(&self.pending) {
                        // a text line that merely starts with a brace
                        self.framing = Framing::Line;
                        let line = std::mem::take(&mut self.pending);
                        self.decode_line(&line, &mut out);
                        continue;
                    }
                    self.pending.push(c);
                    if self.pending.len() > MAX_OBJECT_BYTES {
                        let snippet: String = self.pending.chars().take(120).collect();
                        out.push(Err(DecodeError::MalformedJson {
                            message: format!("object exceeds {MAX_OBJECT_BYTES} bytes"),
                            snippet,
                        }));
                        self.pending.clear();
                        self.framing = Framing::Line;
                        continue;
                    }
                    if *in_string {
                        if *escaped {
                            *escaped = false;
                        } else if c == '\\' {
                            *escaped = true;
                        } else if c == '"' {
                            *in_string = false;
                        }
                        continue;
                    }
                    match c {
                        '"' => *in_string = true,
                        '{' => *depth += 1,
                        '}' => {
                            *depth -= 1;
                            if *depth == 0 {
                                self.framing = Framing::Line;
                                let object = std::mem::take(&mut self.pending);
                                self.decode_object(&object, &mut out);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        out
    }

    /// Flush a trailing line without terminator. An unterminated object is
    /// reported as malformed.
    pub fn finish(&mut self) -> Vec<Decoded> {
        let mut out = Vec::new();
        let rest = std::mem::take(&mut self.pending);
        match std::mem::take(&mut self.framing) {
            Framing::Line => self.decode_line(&rest, &mut out),
            Framing::Object { .. } => {
                if !rest.trim().is_empty() {
                    let snippet: String = rest.chars().take(120).collect();
                    out.push(Err(DecodeError::MalformedJson {
                        message: "unterminated object at end of output".to_string(),
                        snippet,
                    }));
                }
            }
        }
        out
    }

    fn decode_line(&mut self, line: &str, out: &mut Vec<Decoded>) {
        if line.trim().is_empty() {
            return;
        }
        self.format.get_or_insert(WireFormat::Lines);
        out.extend(self.lines.decode_line(line));
    }

    fn decode_object(&mut self, object: &str, out: &mut Vec<Decoded>) {
        let value: Value = match serde_json::from_str(object) {
            Ok(value) => value,
            Err(e) => {
                debug!("Dropping malformed message: {}", e);
                out.push(Err(DecodeError::malformed(&e, object)));
                return;
            }
        };
        if value.get("msg_type").is_some() {
            self.format = Some(WireFormat::Structured);
            match decode_message(&value, &self.context) {
                Ok(events) => out.extend(events.into_iter().map(Ok)),
                Err(e) => out.push(Err(e)),
            }
        } else {
            self.format.get_or_insert(WireFormat::Lines);
            out.extend(self.lines.decode_json(&value));
        }
    }
}

impl Default for OutputDecoder {
    fn default() -> Self {
        Self::new(StructuredContext::default())
    }
}

/// Decode a complete output in one go
pub fn decode_all(output: &str, context: StructuredContext) -> Vec<Decoded> {
    let mut decoder = OutputDecoder::new(context);
    let mut events = decoder.feed(output);
    events.extend(decoder.finish());
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EntityKind;
    use std::time::Duration;

    const STRUCTURED: &str = concat!(
        r#"{"msg_type":"statistics","msg_body":{"methods":1,"functions":0,"predicates":0}}"#,
        r#"{"msg_type":"verification_result","msg_body":{"status":"success","kind":"for_entity","details":{"entity":{"type":"method","name":"m{1}"}}}}"#,
        "\n",
        r#"{"msg_type":"verification_result","msg_body":{"status":"success","kind":"overall","details":{"time":100}}}"#,
    );

    #[test]
    fn test_structured_stream_split_mid_object() {
        let mut decoder = OutputDecoder::default();
        let (a, b) = STRUCTURED.split_at(40);
        let mut events = decoder.feed(a);
        assert!(events.is_empty());
        events.extend(decoder.feed(b));
        events.extend(decoder.finish());

        let events: Vec<_> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[1],
            VerificationEvent::EntityVerified {
                kind: EntityKind::Method,
                name: "m{1}".to_string()
            }
        );
        assert_eq!(
            events[2],
            VerificationEvent::End {
                elapsed: Duration::from_millis(100)
            }
        );
        assert_eq!(decoder.format(), Some(WireFormat::Structured));
    }

    #[test]
    fn test_line_stream_with_partial_lines() {
        let mut decoder = OutputDecoder::default();
        let mut events = decoder.feed("Silicon sta");
        events.extend(decoder.feed("rted\n{\"type\":\"MethodVerified\","));
        events.extend(decoder.feed("\"name\":\"main\"}\nSilicon finished in 1 second.\n"));
        events.extend(decoder.finish());

        let events: Vec<_> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], VerificationEvent::Start { .. }));
        assert!(matches!(events[1], VerificationEvent::EntityVerified { .. }));
        assert!(matches!(events[2], VerificationEvent::End { .. }));
        assert_eq!(decoder.format(), Some(WireFormat::Lines));
        assert_eq!(decoder.line_state(), LineState::Reporting);
    }

    #[test]
    fn test_brace_inside_text_line_is_not_an_object() {
        let events = decode_all(
            "Silicon started\nSilicon finished in 1 second.\n  3:4: expected { here\n",
            StructuredContext::default(),
        );
        let VerificationEvent::Error { errors } = events[2].as_ref().unwrap() else {
            panic!("expected error");
        };
        assert_eq!(errors[0].message, "expected { here");
    }

    #[test]
    fn test_malformed_object_does_not_stop_stream() {
        let events = decode_all(
            "{\"msg_type\": statistics}\n{\"msg_type\":\"verification_result\",\"msg_body\":{\"status\":\"success\",\"kind\":\"overall\",\"details\":{\"time\":5}}}",
            StructuredContext::default(),
        );
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Err(DecodeError::MalformedJson { .. })));
        assert!(matches!(events[1], Ok(VerificationEvent::End { .. })));
    }

    #[test]
    fn test_unbalanced_brace_line_falls_back_to_text() {
        let mut decoder = OutputDecoder::default();
        let mut events = decoder.feed("{ unbalanced banner\nSilicon started\n");
        events.extend(decoder.feed("{\n  \"type\": \"MethodVerified\", \"name\": \"m\"\n}\n"));
        events.extend(decoder.finish());

        let events: Vec<_> = events.into_iter().map(Result::unwrap).collect();
        assert!(matches!(events[0], VerificationEvent::Start { .. }));
        assert!(matches!(
            &events[1],
            VerificationEvent::EntityVerified { name, .. } if name == "m"
        ));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_oversized_object_is_dropped() {
        let mut decoder = OutputDecoder::default();
        let mut events = decoder.feed("{\"msg_type\": \"");
        events.extend(decoder.feed(&"x".repeat(MAX_OBJECT_BYTES)));
        assert!(matches!(events[0], Err(DecodeError::MalformedJson { .. })));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_unterminated_object_reported_on_finish() {
        let mut decoder = OutputDecoder::default();
        assert!(decoder.feed("{\"msg_type\": \"statis").is_empty());
        let rest = decoder.finish();
        assert!(matches!(rest[0], Err(DecodeError::MalformedJson { .. })));
    }
}
