//! Per-record source decorations

use crate::trace::ExecutionTrace;
use serde::{Deserialize, Serialize};
use verilane_protocol::{Position, Range};

/// Editor colour theme the colours are picked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// Marker colours. `current` and `previous` are for the client's selection
/// highlight.
pub struct StateColors;

impl StateColors {
    pub fn current(_theme: Theme) -> &'static str {
        "red"
    }

    pub fn previous(_theme: Theme) -> &'static str {
        "green"
    }

    pub fn error(theme: Theme) -> &'static str {
        match theme {
            Theme::Dark => "yellow",
            Theme::Light => "orange",
        }
    }

    pub fn interesting(theme: Theme) -> &'static str {
        match theme {
            Theme::Dark => "yellow",
            Theme::Light => "orange",
        }
    }

    pub fn uninteresting(_theme: Theme) -> &'static str {
        "grey"
    }
}

/// Marker shown in front of an eligible record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decoration {
    pub client_index: usize,
    /// Restarts at 1 in every verifiable unit
    pub display_number: usize,
    pub hover_text: String,
    pub color: String,
    pub range: Range,
    pub original_position: Position,
    pub depth: usize,
    pub unit_index: usize,
    pub is_error_state: bool,
}

impl Decoration {
    pub fn label(&self) -> String {
        format!("({})", self.display_number)
    }
}

/// One decoration per eligible record, in client index order.
///
/// Markers sharing a source line are shifted right one column each, in
/// position order.
pub fn decorations(trace: &ExecutionTrace, theme: Theme) -> Vec<Decoration> {
    let mut out: Vec<Decoration> = Vec::with_capacity(trace.client_count());
    let mut current_unit = None;
    let mut number = 0;

    for record in trace.records() {
        if current_unit != Some(record.unit) {
            current_unit = Some(record.unit);
            number = 0;
        }
        let (Some(client_index), Some(position)) = (record.client_index, record.position) else {
            continue;
        };
        number += 1;
        let mut hover_text = format!("{}\n", record.header());
        if let Some(state) = &record.state {
            hover_text.push_str(&state.describe());
        }
        let color = if record.is_error_state {
            StateColors::error(theme)
        } else {
            StateColors::interesting(theme)
        };
        out.push(Decoration {
            client_index,
            display_number: number,
            hover_text,
            color: color.to_string(),
            range: Range::new(
                Position::new(position.line, 0),
                Position::new(position.line, 0),
            ),
            original_position: position,
            depth: record.depth,
            unit_index: record.unit,
            is_error_state: record.is_error_state,
        });
    }

    let mut line = None;
    let mut in_line: u32 = 0;
    for server_index in trace.eligible_by_position() {
        let Some(client_index) = trace.client_index(server_index) else {
            continue;
        };
        let Some(decoration) = out.get_mut(client_index) else {
            continue;
        };
        let position = decoration.original_position;
        if line == Some(position.line) {
            in_line += 1;
        } else {
            line = Some(position.line);
            in_line = 0;
        }
        let column = position.character + in_line + 1;
        decoration.range = Range::new(
            Position::new(position.line, column),
            Position::new(position.line, column + 1),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::parse_log;

    fn trace() -> ExecutionTrace {
        let log = parse_log(
            r#"[
            {"kind": "Method", "value": "a", "children": [
                {"type": "execute", "pos": "1:5", "value": "s1"},
                {"type": "evaluate", "pos": "1:3", "value": "e1"},
                {"type": "execute", "pos": "2:1", "value": "s2",
                 "prestate": {"store": [{"name": "x", "type": "Int", "value": "x@1"}], "heap": [], "oldHeap": [], "pcs": []}}
            ]},
            {"kind": "Method", "value": "b", "children": [
                {"type": "execute", "pos": "5:1", "value": "s3"}
            ]}]"#,
        )
        .unwrap();
        ExecutionTrace::build(&log).unwrap()
    }

    #[test]
    fn test_numbers_restart_per_unit() {
        let decorations = decorations(&trace(), Theme::Light);
        let numbers: Vec<usize> = decorations.iter().map(|d| d.display_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 1]);
        assert_eq!(decorations[3].label(), "(1)");
        assert!(decorations.iter().enumerate().all(|(i, d)| d.client_index == i));
    }

    #[test]
    fn test_same_line_offsets_follow_position_order() {
        let decorations = decorations(&trace(), Theme::Light);
        // 1:3 comes first on line 0 and keeps its column, 1:5 is shifted by one
        assert_eq!(decorations[1].range.start, Position::new(0, 3));
        assert_eq!(decorations[0].range.start, Position::new(0, 6));
        assert_eq!(decorations[0].range.end, Position::new(0, 7));
        assert_eq!(decorations[2].range.start, Position::new(1, 1));
    }

    #[test]
    fn test_colors_and_hover() {
        let mut trace = trace();
        trace.mark_error_states(&[Position::new(1, 0)], &Default::default());
        let decorations = decorations(&trace, Theme::Dark);
        assert_eq!(decorations[2].color, "yellow");
        assert!(decorations[2].is_error_state);
        assert!(decorations[2].hover_text.starts_with("EXECUTE 2:1 s2\n"));
        assert!(decorations[2].hover_text.contains("x = x@1"));
        assert_eq!(Theme::default(), Theme::Light);
        assert_eq!(StateColors::error(Theme::Light), "orange");
    }
}
