//! Parsed state snapshots
//!
//! Heap chunks arrive as `name -> value # permission` strings and path
//! conditions as one string per assumption, possibly conjoined with `&&`.

use crate::log::{Prestate, StoreEntry};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;
use verilane_protocol::CounterexampleModel;

macro_rules! cached_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> Option<&'static Regex> {
            static RE: OnceLock<Option<Regex>> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).ok()).as_ref()
        }
    };
}

cached_regex!(predicate_regex, r"^\w+\(.*\)$");
cached_regex!(field_regex, r"^(\$?\w+@\d+)(\(=.+?\))?(\.(\w+))+$");
cached_regex!(scalar_value_regex, r"^(\$?\w+(@\d+)?)(\(=.+?\))?$");
cached_regex!(scalar_permission_regex, r"^(W|R|Z|\d+([.,/]\d+)?)$");
cached_regex!(
    comparison_regex,
    r"^([\w$]+@\d+)\s+(==|!=)\s+([\w$]+@\d+|\d+|_|Null)$"
);

fn matches(re: Option<&Regex>, text: &str) -> bool {
    re.is_some_and(|re| re.is_match(text))
}

/// Split a heap chunk into name, value and permission.
///
/// The name ends at the first `->`, the value at the following `#`. Either
/// separator may be missing.
pub fn split_heap_chunk(text: &str) -> (&str, Option<&str>, Option<&str>) {
    let arrow = text.find("->");
    let hash_from = arrow.map_or(0, |a| a + 2);
    let hash = text[hash_from..].find('#').map(|h| h + hash_from);

    let name_end = arrow.or(hash).unwrap_or(text.len());
    let name = text[..name_end].trim();
    let value = arrow.map(|a| text[a + 2..hash.unwrap_or(text.len())].trim());
    let permission = hash.map(|h| text[h + 1..].trim());
    (
        name,
        value.filter(|v| !v.is_empty()),
        permission.filter(|p| !p.is_empty()),
    )
}

/// What a heap chunk's name refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ChunkName {
    /// `x@1.next.val`
    FieldReference { receiver: String, field: String },
    /// `list(x@1)`
    Predicate { predicate: String, arguments: Vec<String> },
    Quantified,
    FunctionApplication,
    Unknown,
}

impl ChunkName {
    pub fn classify(name: &str) -> Self {
        if name.starts_with("QA") {
            return ChunkName::Quantified;
        }
        if name.find('[').is_some_and(|i| i > 0) {
            return ChunkName::FunctionApplication;
        }
        if matches(predicate_regex(), name) {
            let open = name.find('(').unwrap_or(0);
            let inner = &name[open + 1..name.len() - 1];
            let inner = inner.split_once(';').map_or(inner, |(_, args)| args);
            return ChunkName::Predicate {
                predicate: name[..open].to_string(),
                arguments: inner
                    .split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(str::to_string)
                    .collect(),
            };
        }
        if let Some(caps) = field_regex().and_then(|re| re.captures(name)) {
            if let (Some(receiver), Some(field)) = (caps.get(1), caps.get(4)) {
                return ChunkName::FieldReference {
                    receiver: receiver.as_str().to_string(),
                    field: field.as_str().to_string(),
                };
            }
        }
        ChunkName::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueKind {
    NoValue,
    ObjectReferenceOrScalar,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionKind {
    /// `W`, `R`, `Z`, `1`, `1/2`
    Scalar,
    Unknown,
}

/// One heap chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeapChunk {
    pub name: String,
    pub value: Option<String>,
    pub permission: Option<String>,
    pub name_kind: ChunkName,
    pub value_kind: ValueKind,
    pub permission_kind: PermissionKind,
    /// Value from the counterexample model, for error states
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concrete_value: Option<String>,
}

impl HeapChunk {
    pub fn parse(text: &str) -> Self {
        let (name, value, permission) = split_heap_chunk(text);
        let value_kind = match value {
            None => ValueKind::NoValue,
            Some(v) if matches(scalar_value_regex(), v) => ValueKind::ObjectReferenceOrScalar,
            Some(_) => ValueKind::Unknown,
        };
        let permission_kind = match permission {
            Some(p) if matches(scalar_permission_regex(), p) => PermissionKind::Scalar,
            _ => PermissionKind::Unknown,
        };
        Self {
            name: name.to_string(),
            value: value.map(str::to_string),
            permission: permission.map(str::to_string),
            name_kind: ChunkName::classify(name),
            value_kind,
            permission_kind,
            concrete_value: None,
        }
    }

    /// Whether name, value and permission were all understood
    pub fn is_fully_parsed(&self) -> bool {
        !matches!(
            self.name_kind,
            ChunkName::Unknown | ChunkName::Quantified | ChunkName::FunctionApplication
        ) && self.value_kind != ValueKind::Unknown
    }

    fn same_chunk(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value && self.permission == other.permission
    }
}

impl fmt::Display for HeapChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(value) = &self.value {
            write!(f, " -> {value}")?;
        }
        if let Some(permission) = &self.permission {
            write!(f, " # {permission}")?;
        }
        Ok(())
    }
}

/// Split a path condition on top-level `&&`.
///
/// Nothing is split inside parentheses, and nothing is split inside the
/// body of a quantifier (`QA ...` or `∀ ...`) until the parenthesis the
/// quantifier appeared in is closed.
pub fn split_path_conditions(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth: i32 = 0;
    // depth of the innermost open quantifier scope
    let mut quantifier_at: Option<i32> = None;
    let mut start = 0;
    let mut prev: Option<char> = None;

    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if quantifier_at.is_some_and(|q| q > depth) {
                    quantifier_at = None;
                }
            }
            '∀' => {
                quantifier_at.get_or_insert(depth);
            }
            'Q' if text[i..].starts_with("QA ") => {
                quantifier_at.get_or_insert(depth);
            }
            '&' if prev == Some('&') && depth == 0 && quantifier_at.is_none() => {
                let head = text[start..i - 1].trim();
                if !head.is_empty() {
                    parts.push(head.to_string());
                }
                start = i + 1;
                prev = None;
                continue;
            }
            _ => {}
        }
        prev = Some(c);
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        parts.push(tail.to_string());
    }
    parts
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ConditionKind {
    Equality { lhs: String, rhs: String },
    Inequality { lhs: String, rhs: String },
    Nullity { lhs: String, is_null: bool },
    Wildcard { lhs: String },
    Boolean { value: bool },
    Quantified,
    Unknown,
}

/// One path condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathCondition {
    pub raw: String,
    #[serde(flatten)]
    pub kind: ConditionKind,
}

impl PathCondition {
    pub fn parse(text: &str) -> Self {
        let raw = text.trim();
        let kind = if let Some(caps) = comparison_regex().and_then(|re| re.captures(raw)) {
            let lhs = caps[1].to_string();
            let equal = &caps[2] == "==";
            match &caps[3] {
                "Null" => ConditionKind::Nullity { lhs, is_null: equal },
                "_" => ConditionKind::Wildcard { lhs },
                rhs if equal => ConditionKind::Equality {
                    lhs,
                    rhs: rhs.to_string(),
                },
                rhs => ConditionKind::Inequality {
                    lhs,
                    rhs: rhs.to_string(),
                },
            }
        } else if raw == "true" || raw == "false" {
            ConditionKind::Boolean { value: raw == "true" }
        } else if raw.starts_with("QA ") || raw.starts_with('∀') {
            ConditionKind::Quantified
        } else {
            ConditionKind::Unknown
        };
        Self {
            raw: raw.to_string(),
            kind,
        }
    }
}

/// A local variable binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreBinding {
    pub name: String,
    pub value_type: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concrete_value: Option<String>,
}

impl From<&StoreEntry> for StoreBinding {
    fn from(entry: &StoreEntry) -> Self {
        let (name, value) = match &entry.name {
            Some(name) => (name.trim().to_string(), entry.value.trim().to_string()),
            None => match entry.value.split_once("->") {
                Some((name, value)) => (name.trim().to_string(), value.trim().to_string()),
                None => (entry.value.trim().to_string(), "unknown".to_string()),
            },
        };
        Self {
            name,
            value_type: entry.value_type.clone(),
            value,
            concrete_value: None,
        }
    }
}

/// The symbolic state before a record executes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub store: Vec<StoreBinding>,
    pub heap: Vec<HeapChunk>,
    pub old_heap: Vec<HeapChunk>,
    pub path_conditions: Vec<PathCondition>,
}

impl StateSnapshot {
    pub fn from_prestate(prestate: &Prestate) -> Self {
        Self {
            store: prestate.store.iter().map(StoreBinding::from).collect(),
            heap: prestate.heap.iter().map(|c| HeapChunk::parse(c)).collect(),
            old_heap: prestate.old_heap.iter().map(|c| HeapChunk::parse(c)).collect(),
            path_conditions: prestate
                .pcs
                .iter()
                .flat_map(|pc| split_path_conditions(pc))
                .map(|pc| PathCondition::parse(&pc))
                .collect(),
        }
    }

    pub fn heap_unchanged(&self) -> bool {
        self.heap.len() == self.old_heap.len()
            && self.heap.iter().zip(&self.old_heap).all(|(a, b)| a.same_chunk(b))
    }

    /// Attach concrete values from a counterexample model
    pub fn fill_in_concrete_values(&mut self, model: &CounterexampleModel) {
        for binding in &mut self.store {
            binding.concrete_value = model.get(&binding.value).map(str::to_string);
        }
        for chunk in &mut self.heap {
            chunk.concrete_value = chunk
                .value
                .as_deref()
                .and_then(|v| model.get(v))
                .map(str::to_string);
        }
    }

    /// Store and heap as indented text
    pub fn describe(&self) -> String {
        let mut out = String::new();
        if !self.store.is_empty() {
            out.push_str("Store:\n");
            for binding in &self.store {
                out.push_str(&format!("    {} = {}", binding.name, binding.value));
                if let Some(concrete) = &binding.concrete_value {
                    out.push_str(&format!(" ({concrete})"));
                }
                out.push('\n');
            }
        }
        if !self.heap.is_empty() {
            out.push_str("Heap:\n");
            for chunk in &self.heap {
                out.push_str(&format!("    {chunk}\n"));
            }
        }
        out
    }
}


#[cfg(kani)]
mod kani_proofs {
    use super::*;

    /// Proves that the split parts never contain their separators.
    #[kani::proof]
    #[kani::unwind(8)]
    fn verify_split_parts_exclude_separators() {
        let bytes: [u8; 6] = kani::any();
        for b in bytes {
            kani::assume(b == b'a' || b == b'#' || b == b'-' || b == b'>' || b == b' ');
        }
        let Ok(text) = std::str::from_utf8(&bytes) else {
            return;
        };
        let (name, value, permission) = split_heap_chunk(text);
        kani::assert(!name.contains("->"), "name stops at the first arrow");
        kani::assert(
            value.map_or(true, |v| !v.contains('#')),
            "value stops at the hash",
        );
        kani::assert(
            permission.map_or(true, |p| !p.is_empty()),
            "empty permission is absent",
        );
    }

    /// Proves that a chunk without separators is all name.
    #[kani::proof]
    #[kani::unwind(6)]
    fn verify_plain_name() {
        let bytes: [u8; 4] = kani::any();
        for b in bytes {
            kani::assume(b.is_ascii_lowercase());
        }
        let Ok(text) = std::str::from_utf8(&bytes) else {
            return;
        };
        let (name, value, permission) = split_heap_chunk(text);
        kani::assert(name == text, "name is the whole chunk");
        kani::assert(value.is_none() && permission.is_none(), "no value or permission");
    }
}
