//! Counterexample models
//!
//! Backends print a model as a quoted list of `name -> value` entries:
//!
//! ```text
//! "x@1 -> 5 y@2 -> (- 3) f@3 -> {1 -> 2 else -> 0}"
//! ```
//!
//! Function interpretations (`-> { ... }`) are skipped.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::warn;

/// Concrete values of symbolic variables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterexampleModel {
    values: BTreeMap<String, String>,
}

fn symbol_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$?[\w.]+@\d+\b").ok()).as_ref()
}

/// Split a model body into tokens, keeping parenthesised and braced groups
/// together
fn tokens(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in body.chars() {
        match c {
            '(' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            c if c.is_whitespace() => {
                if !current.ends_with(' ') {
                    current.push(' ');
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

impl CounterexampleModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Add the entries of one quoted model line
    pub fn extend(&mut self, line: &str) {
        let line = line.trim();
        let Some(body) = line
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
        else {
            warn!("Counterexample model is expected to be quoted: {}", line);
            return;
        };

        let tokens = tokens(body);
        let mut i = 0;
        while i + 2 < tokens.len() {
            let name = &tokens[i];
            let arrow = &tokens[i + 1];
            let value = &tokens[i + 2];
            if arrow != "->" {
                i += 1;
                continue;
            }
            if !value.starts_with('{') {
                self.values.insert(name.clone(), value.clone());
            }
            i += 3;
        }
    }

    /// Replace every symbolic variable in `text` that has a known value
    pub fn fill_in(&self, text: &str) -> String {
        let Some(re) = symbol_regex() else {
            return text.to_string();
        };
        re.replace_all(text, |caps: &regex::Captures<'_>| {
            let symbol = &caps[0];
            self.values
                .get(symbol)
                .cloned()
                .unwrap_or_else(|| symbol.to_string())
        })
        .into_owned()
    }

    /// `name -> value` per line
    pub fn pretty(&self) -> String {
        self.values
            .iter()
            .map(|(name, value)| format!("{name} -> {value}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
