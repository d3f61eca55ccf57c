//! Intrinsic functions (`States.Format(...)`, `States.MathAdd(...)`, ...).
//!
//! Calls are parsed once at load time. Arguments may be string literals in
//! single quotes, numbers, `true`/`false`/`null`, paths, or nested calls.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Number, Value};
use statewise_types::error::{DefinitionError, ExecutionError};
use uuid::Uuid;

use super::path::Path;

/// Upper bound on the size of an array produced by `States.ArrayRange`.
const MAX_RANGE_ITEMS: usize = 1000;

// ---------------------------------------------------------------------------
// Function table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Format,
    StringToJson,
    JsonToString,
    Array,
    ArrayPartition,
    ArrayContains,
    ArrayRange,
    ArrayGetItem,
    ArrayLength,
    ArrayUnique,
    Base64Encode,
    Base64Decode,
    MathAdd,
    StringSplit,
    JsonMerge,
    Uuid,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "States.Format" => Self::Format,
            "States.StringToJson" => Self::StringToJson,
            "States.JsonToString" => Self::JsonToString,
            "States.Array" => Self::Array,
            "States.ArrayPartition" => Self::ArrayPartition,
            "States.ArrayContains" => Self::ArrayContains,
            "States.ArrayRange" => Self::ArrayRange,
            "States.ArrayGetItem" => Self::ArrayGetItem,
            "States.ArrayLength" => Self::ArrayLength,
            "States.ArrayUnique" => Self::ArrayUnique,
            "States.Base64Encode" => Self::Base64Encode,
            "States.Base64Decode" => Self::Base64Decode,
            "States.MathAdd" => Self::MathAdd,
            "States.StringSplit" => Self::StringSplit,
            "States.JsonMerge" => Self::JsonMerge,
            "States.UUID" => Self::Uuid,
            _ => return None,
        })
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Format => "States.Format",
            Self::StringToJson => "States.StringToJson",
            Self::JsonToString => "States.JsonToString",
            Self::Array => "States.Array",
            Self::ArrayPartition => "States.ArrayPartition",
            Self::ArrayContains => "States.ArrayContains",
            Self::ArrayRange => "States.ArrayRange",
            Self::ArrayGetItem => "States.ArrayGetItem",
            Self::ArrayLength => "States.ArrayLength",
            Self::ArrayUnique => "States.ArrayUnique",
            Self::Base64Encode => "States.Base64Encode",
            Self::Base64Decode => "States.Base64Decode",
            Self::MathAdd => "States.MathAdd",
            Self::StringSplit => "States.StringSplit",
            Self::JsonMerge => "States.JsonMerge",
            Self::Uuid => "States.UUID",
        }
    }

    /// Accepted argument counts (min, max).
    fn arity(&self) -> (usize, usize) {
        match self {
            Self::Format => (1, usize::MAX),
            Self::Array => (0, usize::MAX),
            Self::Uuid => (0, 0),
            Self::StringToJson
            | Self::JsonToString
            | Self::ArrayLength
            | Self::ArrayUnique
            | Self::Base64Encode
            | Self::Base64Decode => (1, 1),
            Self::ArrayPartition
            | Self::ArrayContains
            | Self::ArrayGetItem
            | Self::MathAdd
            | Self::StringSplit => (2, 2),
            Self::ArrayRange => (3, 3),
            Self::JsonMerge => (2, 3),
        }
    }
}

// ---------------------------------------------------------------------------
// Call tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Literal(Value),
    Path(Path),
    Call(IntrinsicCall),
}

/// A parsed intrinsic function call.
#[derive(Debug, Clone, PartialEq)]
pub struct IntrinsicCall {
    function: Function,
    args: Vec<Arg>,
}

impl IntrinsicCall {
    /// Whether a template value should be parsed as an intrinsic call.
    pub fn looks_like(expression: &str) -> bool {
        expression.trim_start().starts_with("States.")
    }

    pub fn parse(expression: &str) -> Result<Self, DefinitionError> {
        let mut parser = Parser {
            expression,
            chars: expression.chars().collect(),
            pos: 0,
        };
        parser.skip_ws();
        let call = parser.call()?;
        parser.skip_ws();
        if parser.pos != parser.chars.len() {
            return Err(parser.error("unexpected trailing characters"));
        }
        Ok(call)
    }

    pub fn function(&self) -> Function {
        self.function
    }

    /// Evaluate against the execution context (`$$`) and input (`$`).
    pub fn evaluate(&self, context: &Value, input: &Value) -> Result<Value, ExecutionError> {
        let args = self
            .args
            .iter()
            .map(|arg| match arg {
                Arg::Literal(v) => Ok(v.clone()),
                Arg::Path(p) => p.value(context, input),
                Arg::Call(c) => c.evaluate(context, input),
            })
            .collect::<Result<Vec<_>, _>>()?;
        apply(self.function, args)
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    expression: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> DefinitionError {
        DefinitionError::InvalidIntrinsic {
            expression: self.expression.to_string(),
            reason: format!("{reason} at offset {}", self.pos),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> Result<(), DefinitionError> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{c}'")))
        }
    }

    fn call(&mut self) -> Result<IntrinsicCall, DefinitionError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '.')
        {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        let function = Function::from_name(&name)
            .ok_or_else(|| self.error(&format!("unknown function {name}")))?;

        self.skip_ws();
        self.expect('(')?;
        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            self.pos += 1;
        } else {
            loop {
                self.skip_ws();
                args.push(self.arg()?);
                self.skip_ws();
                match self.peek() {
                    Some(',') => self.pos += 1,
                    Some(')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(self.error("expected ',' or ')'")),
                }
            }
        }

        let (min, max) = function.arity();
        if args.len() < min || args.len() > max {
            return Err(self.error(&format!(
                "{} does not accept {} argument(s)",
                function.name(),
                args.len()
            )));
        }
        Ok(IntrinsicCall { function, args })
    }

    fn arg(&mut self) -> Result<Arg, DefinitionError> {
        match self.peek() {
            Some('\'') => self.string().map(|s| Arg::Literal(Value::String(s))),
            Some('$') => self.path().map(Arg::Path),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number().map(Arg::Literal),
            Some(_) => {
                let rest: String = self.chars[self.pos..].iter().collect();
                for (word, value) in [
                    ("true", Value::Bool(true)),
                    ("false", Value::Bool(false)),
                    ("null", Value::Null),
                ] {
                    if rest.starts_with(word) {
                        self.pos += word.len();
                        return Ok(Arg::Literal(value));
                    }
                }
                if rest.starts_with("States.") {
                    return self.call().map(Arg::Call);
                }
                Err(self.error("unrecognized argument"))
            }
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn string(&mut self) -> Result<String, DefinitionError> {
        self.expect('\'')?;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string literal")),
                Some('\'') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some('\\') => {
                    let escaped = self
                        .chars
                        .get(self.pos + 1)
                        .copied()
                        .ok_or_else(|| self.error("dangling escape"))?;
                    // Braces stay escaped so Format can tell them from placeholders.
                    if escaped == '{' || escaped == '}' {
                        out.push('\\');
                    }
                    out.push(escaped);
                    self.pos += 2;
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn path(&mut self) -> Result<Path, DefinitionError> {
        let start = self.pos;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        while let Some(c) = self.peek() {
            match (quote, c) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '\'' | '"') => quote = Some(c),
                (None, '[') => depth += 1,
                (None, ']') => depth = depth.saturating_sub(1),
                (None, ',' | ')') if depth == 0 => break,
                (None, c) if c.is_whitespace() && depth == 0 => break,
                _ => {}
            }
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        Path::parse(&raw)
    }

    fn number(&mut self) -> Result<Value, DefinitionError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        serde_json::from_str::<Number>(&raw)
            .map(Value::Number)
            .map_err(|_| self.error(&format!("invalid number {raw}")))
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn apply(function: Function, args: Vec<Value>) -> Result<Value, ExecutionError> {
    let name = function.name();
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);

    match function {
        Function::Format => {
            let template = expect_str(name, arg(0))?;
            format(&template, args.get(1..).unwrap_or(&[]))
        }
        Function::StringToJson => {
            let text = expect_str(name, arg(0))?;
            serde_json::from_str(&text)
                .map_err(|e| ExecutionError::intrinsic(format!("{name}: {e}")))
        }
        Function::JsonToString => serde_json::to_string(&arg(0))
            .map(Value::String)
            .map_err(|e| ExecutionError::intrinsic(format!("{name}: {e}"))),
        Function::Array => Ok(Value::Array(args.clone())),
        Function::ArrayPartition => {
            let items = expect_array(name, arg(0))?;
            let size = expect_positive(name, arg(1))?;
            Ok(Value::Array(
                items
                    .chunks(size)
                    .map(|chunk| Value::Array(chunk.to_vec()))
                    .collect(),
            ))
        }
        Function::ArrayContains => {
            let items = expect_array(name, arg(0))?;
            Ok(Value::Bool(items.contains(&arg(1))))
        }
        Function::ArrayRange => {
            let start = expect_i64(name, arg(0))?;
            let end = expect_i64(name, arg(1))?;
            let step = expect_i64(name, arg(2))?;
            if step == 0 {
                return Err(ExecutionError::intrinsic(format!("{name}: step must not be 0")));
            }
            let mut out = Vec::new();
            let mut current = start;
            while (step > 0 && current <= end) || (step < 0 && current >= end) {
                if out.len() == MAX_RANGE_ITEMS {
                    return Err(ExecutionError::intrinsic(format!(
                        "{name}: result exceeds {MAX_RANGE_ITEMS} items"
                    )));
                }
                out.push(Value::from(current));
                current += step;
            }
            Ok(Value::Array(out))
        }
        Function::ArrayGetItem => {
            let items = expect_array(name, arg(0))?;
            let index = expect_i64(name, arg(1))?;
            usize::try_from(index)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .ok_or_else(|| ExecutionError::intrinsic(format!("{name}: index {index} out of range")))
        }
        Function::ArrayLength => {
            let items = expect_array(name, arg(0))?;
            Ok(Value::from(items.len()))
        }
        Function::ArrayUnique => {
            let items = expect_array(name, arg(0))?;
            let mut unique: Vec<Value> = Vec::with_capacity(items.len());
            for item in items {
                if !unique.contains(&item) {
                    unique.push(item);
                }
            }
            Ok(Value::Array(unique))
        }
        Function::Base64Encode => {
            let text = expect_str(name, arg(0))?;
            Ok(Value::String(BASE64.encode(text.as_bytes())))
        }
        Function::Base64Decode => {
            let text = expect_str(name, arg(0))?;
            let bytes = BASE64
                .decode(text.as_bytes())
                .map_err(|e| ExecutionError::intrinsic(format!("{name}: {e}")))?;
            String::from_utf8(bytes)
                .map(Value::String)
                .map_err(|e| ExecutionError::intrinsic(format!("{name}: {e}")))
        }
        Function::MathAdd => {
            let (a, b) = (arg(0), arg(1));
            match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => x
                    .checked_add(y)
                    .map(Value::from)
                    .ok_or_else(|| ExecutionError::intrinsic(format!("{name}: overflow"))),
                _ => {
                    let x = expect_f64(name, a)?;
                    let y = expect_f64(name, b)?;
                    Number::from_f64(x + y)
                        .map(Value::Number)
                        .ok_or_else(|| ExecutionError::intrinsic(format!("{name}: result is not finite")))
                }
            }
        }
        Function::StringSplit => {
            let text = expect_str(name, arg(0))?;
            let delimiters = expect_str(name, arg(1))?;
            Ok(Value::Array(
                text.split(|c: char| delimiters.contains(c))
                    .filter(|part| !part.is_empty())
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            ))
        }
        Function::JsonMerge => {
            let left = expect_object(name, arg(0))?;
            let right = expect_object(name, arg(1))?;
            let deep = arg(2).as_bool().unwrap_or(false);
            Ok(Value::Object(merge(left, right, deep)))
        }
        Function::Uuid => Ok(Value::String(Uuid::new_v4().to_string())),
    }
}

fn format(template: &str, args: &[Value]) -> Result<Value, ExecutionError> {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if matches!(chars.peek(), Some('{') | Some('}')) => {
                if let Some(brace) = chars.next() {
                    out.push(brace);
                }
            }
            '{' if chars.peek() == Some(&'}') => {
                chars.next();
                let arg = args.next().ok_or_else(|| {
                    ExecutionError::intrinsic("States.Format: not enough arguments for template")
                })?;
                match arg {
                    Value::String(s) => out.push_str(s),
                    other => out.push_str(&other.to_string()),
                }
            }
            other => out.push(other),
        }
    }
    if args.next().is_some() {
        return Err(ExecutionError::intrinsic(
            "States.Format: more arguments than placeholders",
        ));
    }
    Ok(Value::String(out))
}

fn merge(mut left: Map<String, Value>, right: Map<String, Value>, deep: bool) -> Map<String, Value> {
    for (key, value) in right {
        match (left.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) if deep => {
                let merged = merge(std::mem::take(existing), incoming, true);
                *existing = merged;
            }
            (_, value) => {
                left.insert(key, value);
            }
        }
    }
    left
}

fn expect_str(name: &str, value: Value) -> Result<String, ExecutionError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(ExecutionError::intrinsic(format!("{name}: expected a string, got {other}"))),
    }
}

fn expect_array(name: &str, value: Value) -> Result<Vec<Value>, ExecutionError> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(ExecutionError::intrinsic(format!("{name}: expected an array, got {other}"))),
    }
}

fn expect_object(name: &str, value: Value) -> Result<Map<String, Value>, ExecutionError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ExecutionError::intrinsic(format!("{name}: expected an object, got {other}"))),
    }
}

fn expect_i64(name: &str, value: Value) -> Result<i64, ExecutionError> {
    value
        .as_i64()
        .ok_or_else(|| ExecutionError::intrinsic(format!("{name}: expected an integer, got {value}")))
}

fn expect_f64(name: &str, value: Value) -> Result<f64, ExecutionError> {
    value
        .as_f64()
        .ok_or_else(|| ExecutionError::intrinsic(format!("{name}: expected a number, got {value}")))
}

fn expect_positive(name: &str, value: Value) -> Result<usize, ExecutionError> {
    value
        .as_u64()
        .filter(|n| *n > 0)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| ExecutionError::intrinsic(format!("{name}: expected a positive integer, got {value}")))
}
