//! Source positions

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A zero-based source position
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }

    /// Parse the backend notation `line:col` (one-based, optional trailing
    /// colon). `<no position>` and the empty string mean no position.
    pub fn parse(text: &str) -> Result<Option<Position>, DecodeError> {
        let text = text.trim();
        let text = text.strip_suffix(':').unwrap_or(text);
        if text.is_empty() || text == "<no position>" {
            return Ok(None);
        }
        let invalid = || DecodeError::InvalidPosition(text.to_string());
        let (line, character) = text.split_once(':').ok_or_else(invalid)?;
        let line: u32 = line.parse().map_err(|_| invalid())?;
        let character: u32 = character.parse().map_err(|_| invalid())?;
        Ok(Some(Position {
            line: line.saturating_sub(1),
            character: character.saturating_sub(1),
        }))
    }

    /// Parse, falling back to `0:0` for missing or malformed positions
    pub fn parse_or_origin(text: &str) -> Position {
        Self::parse(text).ok().flatten().unwrap_or_default()
    }
}

impl fmt::Display for Position {
    /// Backend notation, one-based
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line + 1, self.character + 1)
    }
}

/// A half-open source range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Parse `start-end` as used by outline locations
    pub fn parse(text: &str) -> Result<Option<Range>, DecodeError> {
        let Some((start, end)) = text.split_once('-') else {
            return Ok(Position::parse(text)?.map(|p| Range::new(p, p)));
        };
        match (Position::parse(start)?, Position::parse(end)?) {
            (Some(start), Some(end)) => Ok(Some(Range::new(start, end))),
            (Some(start), None) => Ok(Some(Range::new(start, start))),
            _ => Ok(None),
        }
    }
}
