//! JSONPath-like read-only addressing.
//!
//! A path starts with `$` (the current state's input) or `$$` (the whole
//! execution context) followed by dotted fields, bracket indexes, quoted
//! bracket fields and the `[*]` wildcard. A wildcard fans out and always
//! yields an array of the values it reached.

use std::fmt;

use serde_json::Value;
use statewise_types::error::{DefinitionError, ExecutionError};

// ---------------------------------------------------------------------------
// Segments
// ---------------------------------------------------------------------------

/// Which document a path addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    /// `$` -- the input of the current state.
    Input,
    /// `$$` -- the execution context.
    Context,
}

/// One step of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    /// Array index; negative values count from the end.
    Index(i64),
    Wildcard,
}

// ---------------------------------------------------------------------------
// Path
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    raw: String,
    root: Root,
    segments: Vec<Segment>,
}

impl Path {
    /// Parse a path expression.
    pub fn parse(expression: &str) -> Result<Self, DefinitionError> {
        let invalid = |reason: &str| DefinitionError::InvalidPath {
            path: expression.to_string(),
            reason: reason.to_string(),
        };

        let (root, rest) = if let Some(rest) = expression.strip_prefix("$$") {
            (Root::Context, rest)
        } else if let Some(rest) = expression.strip_prefix('$') {
            (Root::Input, rest)
        } else {
            return Err(invalid("must start with \"$\""));
        };

        let chars: Vec<char> = rest.chars().collect();
        let mut segments = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '.' => {
                    i += 1;
                    match chars.get(i) {
                        // `$.` and `$.[0]` are accepted as written.
                        None | Some('[') => continue,
                        Some('*') => {
                            segments.push(Segment::Wildcard);
                            i += 1;
                        }
                        Some('.') => return Err(invalid("recursive descent is not supported")),
                        Some(_) => {
                            let start = i;
                            while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                                i += 1;
                            }
                            let name: String = chars[start..i].iter().collect();
                            segments.push(Segment::Field(name));
                        }
                    }
                }
                '[' => {
                    let close = chars[i..]
                        .iter()
                        .position(|c| *c == ']')
                        .map(|offset| i + offset)
                        .ok_or_else(|| invalid("unterminated \"[\""))?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    segments.push(parse_bracket(&inner).map_err(|reason| invalid(&reason))?);
                    i = close + 1;
                }
                other => return Err(invalid(&format!("unexpected character '{other}'"))),
            }
        }

        Ok(Self {
            raw: expression.to_string(),
            root,
            segments,
        })
    }

    /// The identity path `$`.
    pub fn identity() -> Self {
        Self {
            raw: "$".to_string(),
            root: Root::Input,
            segments: Vec::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn root(&self) -> Root {
        self.root
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_identity(&self) -> bool {
        self.root == Root::Input && self.segments.is_empty()
    }

    pub fn has_wildcard(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Wildcard))
    }

    /// Resolve against `context` (for `$$`) or `input` (for `$`).
    ///
    /// Returns `None` when a component does not exist.
    pub fn get(&self, context: &Value, input: &Value) -> Option<Value> {
        let doc = match self.root {
            Root::Input => input,
            Root::Context => context,
        };
        resolve(doc, &self.segments)
    }

    /// Like [`get`](Self::get), but a missing value is a `States.Runtime` error.
    pub fn value(&self, context: &Value, input: &Value) -> Result<Value, ExecutionError> {
        self.get(context, input)
            .ok_or_else(|| ExecutionError::no_such_variable(&self.raw))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_bracket(inner: &str) -> Result<Segment, String> {
    let inner = inner.trim();
    if inner == "*" {
        return Ok(Segment::Wildcard);
    }
    for quote in ['\'', '"'] {
        if let Some(name) = inner
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
        {
            return Ok(Segment::Field(name.to_string()));
        }
    }
    inner
        .parse::<i64>()
        .map(Segment::Index)
        .map_err(|_| format!("unsupported bracket expression [{inner}]"))
}

fn resolve(value: &Value, segments: &[Segment]) -> Option<Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(value.clone());
    };

    match head {
        Segment::Field(name) => resolve(value.as_object()?.get(name)?, rest),
        Segment::Index(index) => {
            let items = value.as_array()?;
            let index = if *index < 0 {
                items.len() as i64 + index
            } else {
                *index
            };
            let index = usize::try_from(index).ok()?;
            resolve(items.get(index)?, rest)
        }
        Segment::Wildcard => {
            let children: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                Value::Object(map) => map.values().collect(),
                _ => return None,
            };
            let nested = rest.iter().any(|s| matches!(s, Segment::Wildcard));
            let mut out = Vec::new();
            for child in children {
                match resolve(child, rest) {
                    Some(Value::Array(inner)) if nested => out.extend(inner),
                    Some(found) => out.push(found),
                    None => {}
                }
            }
            Some(Value::Array(out))
        }
    }
}
