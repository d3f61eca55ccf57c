//! Choice rules: a boolean expression tree over data-test leaves.
//!
//! Boolean nodes (`Not`, `And`, `Or`) recurse; leaves compare the value at
//! `Variable` against a literal or a second path, test its JSON type, or
//! glob-match it. Rules are compiled once at load time.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use statewise_types::error::{DefinitionError, ExecutionError};

use super::definition::Fields;
use super::path::Path;

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    String,
    Numeric,
    Boolean,
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Equals,
    LessThan,
    GreaterThan,
    LessThanEquals,
    GreaterThanEquals,
}

impl Comparison {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Equals => ordering == Ordering::Equal,
            Self::LessThan => ordering == Ordering::Less,
            Self::GreaterThan => ordering == Ordering::Greater,
            Self::LessThanEquals => ordering != Ordering::Greater,
            Self::GreaterThanEquals => ordering != Ordering::Less,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Equals => "==",
            Self::LessThan => "<",
            Self::GreaterThan => ">",
            Self::LessThanEquals => "<=",
            Self::GreaterThanEquals => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeTest {
    IsNull,
    IsPresent,
    IsNumeric,
    IsString,
    IsBoolean,
    IsTimestamp,
}

impl TypeTest {
    fn name(self) -> &'static str {
        match self {
            Self::IsNull => "IsNull",
            Self::IsPresent => "IsPresent",
            Self::IsNumeric => "IsNumeric",
            Self::IsString => "IsString",
            Self::IsBoolean => "IsBoolean",
            Self::IsTimestamp => "IsTimestamp",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Literal(Value),
    Path(Path),
}

#[derive(Debug, Clone, PartialEq)]
enum Test {
    Compare {
        kind: Kind,
        comparison: Comparison,
        operand: Operand,
    },
    Type {
        test: TypeTest,
        expected: bool,
    },
    Matches(String),
}

enum Operator {
    /// `true` for the `...Path` form whose operand is a path.
    Compare(Kind, Comparison, bool),
    Type(TypeTest),
    Matches,
}

/// Map an operator field name onto the test it selects.
fn operator(name: &str) -> Option<Operator> {
    if name == "StringMatches" {
        return Some(Operator::Matches);
    }
    let test = match name {
        "IsNull" => Some(TypeTest::IsNull),
        "IsPresent" => Some(TypeTest::IsPresent),
        "IsNumeric" => Some(TypeTest::IsNumeric),
        "IsString" => Some(TypeTest::IsString),
        "IsBoolean" => Some(TypeTest::IsBoolean),
        "IsTimestamp" => Some(TypeTest::IsTimestamp),
        _ => None,
    };
    if let Some(test) = test {
        return Some(Operator::Type(test));
    }

    let (base, is_path) = match name.strip_suffix("Path") {
        Some(base) => (base, true),
        None => (name, false),
    };
    let (kind, rest) = [
        ("String", Kind::String),
        ("Numeric", Kind::Numeric),
        ("Timestamp", Kind::Timestamp),
        ("Boolean", Kind::Boolean),
    ]
    .into_iter()
    .find_map(|(prefix, kind)| base.strip_prefix(prefix).map(|rest| (kind, rest)))?;
    let comparison = match rest {
        "Equals" => Comparison::Equals,
        "LessThan" if kind != Kind::Boolean => Comparison::LessThan,
        "GreaterThan" if kind != Kind::Boolean => Comparison::GreaterThan,
        "LessThanEquals" if kind != Kind::Boolean => Comparison::LessThanEquals,
        "GreaterThanEquals" if kind != Kind::Boolean => Comparison::GreaterThanEquals,
        _ => return None,
    };
    Some(Operator::Compare(kind, comparison, is_path))
}

// ---------------------------------------------------------------------------
// ChoiceRule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ChoiceRule {
    Not(Box<ChoiceRule>),
    And(Vec<ChoiceRule>),
    Or(Vec<ChoiceRule>),
    Data { variable: Path, test: DataTest },
}

/// Opaque leaf test; see [`ChoiceRule::Data`].
#[derive(Debug, Clone, PartialEq)]
pub struct DataTest(Test);

impl ChoiceRule {
    /// Compile one rule. `top_level` rules must carry `Next`; nested ones must not.
    pub fn parse(fields: &Fields<'_>, top_level: bool) -> Result<Self, DefinitionError> {
        match (top_level, fields.has("Next")) {
            (true, false) => return Err(fields.missing("Next")),
            (false, true) => return Err(fields.error("nested rule must not have \"Next\"")),
            _ => {}
        }

        if let Some(inner) = fields.nested("Not")? {
            return Ok(Self::Not(Box::new(Self::parse(&inner, false)?)));
        }
        for (field, is_and) in [("And", true), ("Or", false)] {
            if let Some(items) = fields.array(field)? {
                let rules = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let scope = format!("{}.{field}[{i}]", fields.scope());
                        Self::parse(&Fields::new(scope, item)?, false)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(if is_and { Self::And(rules) } else { Self::Or(rules) });
            }
        }

        let variable = fields.path("Variable")?.ok_or_else(|| fields.missing("Variable"))?;
        let operators: Vec<&str> = fields
            .keys()
            .filter(|k| !matches!(*k, "Variable" | "Next" | "Comment"))
            .collect();
        let [name] = operators.as_slice() else {
            return Err(fields.error(format!(
                "must have exactly one data-test operator, found {}",
                operators.len()
            )));
        };
        let operand = fields.get(name).cloned().unwrap_or(Value::Null);
        let invalid = |reason: &str| fields.invalid(name, &operand, reason);

        let test = match operator(name) {
            Some(Operator::Compare(kind, comparison, is_path)) => {
                let operand = if is_path {
                    let expr = operand.as_str().ok_or_else(|| invalid("must be a path"))?;
                    Operand::Path(Path::parse(expr)?)
                } else {
                    let ok = match kind {
                        Kind::String => operand.is_string(),
                        Kind::Numeric => operand.is_number(),
                        Kind::Boolean => operand.is_boolean(),
                        Kind::Timestamp => operand.as_str().and_then(parse_timestamp).is_some(),
                    };
                    if !ok {
                        return Err(invalid("is not a valid comparison value"));
                    }
                    Operand::Literal(operand.clone())
                };
                Test::Compare {
                    kind,
                    comparison,
                    operand,
                }
            }
            Some(Operator::Type(test)) => Test::Type {
                test,
                expected: operand.as_bool().ok_or_else(|| invalid("must be a boolean"))?,
            },
            Some(Operator::Matches) => {
                Test::Matches(operand.as_str().ok_or_else(|| invalid("must be a string"))?.to_string())
            }
            None => return Err(fields.error(format!("has unknown operator \"{name}\""))),
        };

        Ok(Self::Data {
            variable,
            test: DataTest(test),
        })
    }

    /// Evaluate against the context (`$$`) and input (`$`).
    ///
    /// Every test except `IsPresent` requires `Variable` to resolve.
    pub fn evaluate(&self, context: &Value, input: &Value) -> Result<bool, ExecutionError> {
        match self {
            Self::Not(inner) => Ok(!inner.evaluate(context, input)?),
            Self::And(rules) => {
                for rule in rules {
                    if !rule.evaluate(context, input)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or(rules) => {
                for rule in rules {
                    if rule.evaluate(context, input)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Data { variable, test } => evaluate_data(variable, &test.0, context, input),
        }
    }

    /// Short human-readable rendering used for graph edges.
    pub fn to_dot_label(&self) -> String {
        match self {
            Self::Not(inner) => format!("!({})", inner.to_dot_label()),
            Self::And(rules) => join_labels(rules, " && "),
            Self::Or(rules) => join_labels(rules, " || "),
            Self::Data { variable, test } => match &test.0 {
                Test::Compare {
                    comparison,
                    operand,
                    ..
                } => {
                    let rhs = match operand {
                        Operand::Literal(value) => value.to_string(),
                        Operand::Path(path) => Value::String(path.to_string()).to_string(),
                    };
                    format!("{variable} {} {rhs}", comparison.symbol())
                }
                Test::Type { test, expected } => format!("{variable} {} {expected}", test.name()),
                Test::Matches(pattern) => {
                    format!("{variable} matches {}", Value::String(pattern.clone()))
                }
            },
        }
    }
}

fn join_labels(rules: &[ChoiceRule], separator: &str) -> String {
    rules
        .iter()
        .map(ChoiceRule::to_dot_label)
        .collect::<Vec<_>>()
        .join(separator)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn evaluate_data(variable: &Path, test: &Test, context: &Value, input: &Value) -> Result<bool, ExecutionError> {
    if let Test::Type {
        test: TypeTest::IsPresent,
        expected,
    } = test
    {
        let present = variable
            .get(context, input)
            .is_some_and(|value| !value.is_null());
        return Ok(present == *expected);
    }

    let lhs = variable.value(context, input)?;
    match test {
        Test::Type { test, expected } => {
            let actual = match test {
                TypeTest::IsNull => lhs.is_null(),
                TypeTest::IsNumeric => lhs.is_number(),
                TypeTest::IsString => lhs.is_string(),
                TypeTest::IsBoolean => lhs.is_boolean(),
                TypeTest::IsTimestamp => lhs.as_str().and_then(parse_timestamp).is_some(),
                TypeTest::IsPresent => true,
            };
            Ok(actual == *expected)
        }
        Test::Matches(pattern) => Ok(lhs.as_str().is_some_and(|s| glob_match(pattern, s))),
        Test::Compare {
            kind,
            comparison,
            operand,
        } => {
            let rhs = match operand {
                Operand::Literal(value) => value.clone(),
                Operand::Path(path) => path.value(context, input)?,
            };
            Ok(compare(*kind, &lhs, &rhs).is_some_and(|ordering| comparison.holds(ordering)))
        }
    }
}

/// Order two values of `kind`; `None` when either has the wrong type.
fn compare(kind: Kind, lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match kind {
        Kind::String => Some(lhs.as_str()?.cmp(rhs.as_str()?)),
        Kind::Numeric => lhs.as_f64()?.partial_cmp(&rhs.as_f64()?),
        Kind::Boolean => Some(lhs.as_bool()?.cmp(&rhs.as_bool()?)),
        Kind::Timestamp => {
            let lhs = parse_timestamp(lhs.as_str()?)?;
            let rhs = parse_timestamp(rhs.as_str()?)?;
            Some(lhs.cmp(&rhs))
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Glob {
    Char(char),
    Star,
}

/// Match `text` against a pattern where `*` matches any run of characters
/// and `\*` is a literal star.
fn glob_match(pattern: &str, text: &str) -> bool {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'*') => {
                chars.next();
                tokens.push(Glob::Char('*'));
            }
            '*' => tokens.push(Glob::Star),
            other => tokens.push(Glob::Char(other)),
        }
    }

    let text: Vec<char> = text.chars().collect();
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match tokens.get(p) {
            Some(Glob::Char(c)) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            Some(Glob::Star) => {
                backtrack = Some((p, t));
                p += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    tokens[p..].iter().all(|token| *token == Glob::Star)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(payload: Value) -> ChoiceRule {
        ChoiceRule::parse(&Fields::new("States.Choose.Choices[0]", &payload).unwrap(), false).unwrap()
    }

    fn eval(payload: Value, input: Value) -> Result<bool, ExecutionError> {
        rule(payload).evaluate(&json!({}), &input)
    }

    // -----------------------------------------------------------------------
    // Boolean expressions
    // -----------------------------------------------------------------------

    #[test]
    fn test_not() {
        let payload = json!({"Not": {"Variable": "$.foo", "StringEquals": "bar"}});
        assert!(eval(payload.clone(), json!({"foo": "foo"})).unwrap());
        assert!(!eval(payload, json!({"foo": "bar"})).unwrap());
    }

    #[test]
    fn test_and_or() {
        let input = json!({"foo": "foo", "bar": "bar"});
        let and_true = json!({"And": [
            {"Variable": "$.foo", "StringEquals": "foo"},
            {"Variable": "$.bar", "StringEquals": "bar"}
        ]});
        let and_false = json!({"And": [
            {"Variable": "$.foo", "StringEquals": "foo"},
            {"Variable": "$.bar", "StringEquals": "foo"}
        ]});
        let or_true = json!({"Or": [
            {"Variable": "$.foo", "StringEquals": "foo"},
            {"Variable": "$.bar", "StringEquals": "foo"}
        ]});
        let or_false = json!({"Or": [
            {"Variable": "$.foo", "StringEquals": "bar"},
            {"Variable": "$.bar", "StringEquals": "foo"}
        ]});
        assert!(eval(and_true, input.clone()).unwrap());
        assert!(!eval(and_false, input.clone()).unwrap());
        assert!(eval(or_true, input.clone()).unwrap());
        assert!(!eval(or_false, input).unwrap());
    }

    // -----------------------------------------------------------------------
    // Data tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_missing_variable_is_an_error() {
        let err = eval(json!({"Variable": "$.foo", "NumericEquals": 1}), json!({})).unwrap_err();
        assert_eq!(err.cause.as_deref(), Some("No such variable [$.foo]"));
    }

    #[test]
    fn test_type_tests() {
        assert!(eval(json!({"Variable": "$.foo", "IsNull": true}), json!({"foo": null})).unwrap());
        assert!(!eval(json!({"Variable": "$.foo", "IsNull": true}), json!({"foo": "bar"})).unwrap());
        assert!(eval(json!({"Variable": "$.foo", "IsNumeric": true}), json!({"foo": 1.5})).unwrap());
        assert!(!eval(json!({"Variable": "$.foo", "IsString": true}), json!({"foo": 1})).unwrap());
        assert!(eval(json!({"Variable": "$.foo", "IsBoolean": true}), json!({"foo": false})).unwrap());
        assert!(eval(json!({"Variable": "$.foo", "IsString": false}), json!({"foo": 1})).unwrap());
    }

    #[test]
    fn test_is_present() {
        let payload = json!({"Variable": "$.foo", "IsPresent": true});
        assert!(!eval(payload.clone(), json!({"foo": null})).unwrap());
        assert!(!eval(payload.clone(), json!({})).unwrap());
        assert!(eval(payload, json!({"foo": "bar"})).unwrap());
        assert!(eval(json!({"Variable": "$.foo", "IsPresent": false}), json!({})).unwrap());
    }

    #[test]
    fn test_is_timestamp() {
        let payload = json!({"Variable": "$.foo", "IsTimestamp": true});
        assert!(eval(payload.clone(), json!({"foo": "2016-03-14T01:59:00Z"})).unwrap());
        assert!(!eval(payload.clone(), json!({"foo": "2016-03-14"})).unwrap());
        assert!(!eval(payload, json!({"foo": 5})).unwrap());
    }

    #[test]
    fn test_numeric_comparisons() {
        let input = json!({"n": 2});
        assert!(eval(json!({"Variable": "$.n", "NumericEquals": 2}), input.clone()).unwrap());
        assert!(eval(json!({"Variable": "$.n", "NumericEquals": 2.0}), input.clone()).unwrap());
        assert!(eval(json!({"Variable": "$.n", "NumericLessThan": 3}), input.clone()).unwrap());
        assert!(!eval(json!({"Variable": "$.n", "NumericGreaterThan": 3}), input.clone()).unwrap());
        assert!(eval(json!({"Variable": "$.n", "NumericLessThanEquals": 2}), input.clone()).unwrap());
        assert!(eval(json!({"Variable": "$.n", "NumericGreaterThanEquals": 1}), input).unwrap());
    }

    #[test]
    fn test_wrong_type_compares_false() {
        assert!(!eval(json!({"Variable": "$.n", "NumericEquals": 1}), json!({"n": "1"})).unwrap());
        assert!(!eval(json!({"Variable": "$.s", "StringEquals": "1"}), json!({"s": 1})).unwrap());
    }

    #[test]
    fn test_path_operands() {
        let input = json!({"a": 1, "b": 2, "s": "x", "t": "x"});
        assert!(eval(json!({"Variable": "$.a", "NumericLessThanPath": "$.b"}), input.clone()).unwrap());
        assert!(eval(json!({"Variable": "$.s", "StringEqualsPath": "$.t"}), input.clone()).unwrap());
        assert!(eval(json!({"Variable": "$.a", "NumericEqualsPath": "$.missing"}), input).is_err());
    }

    #[test]
    fn test_boolean_and_timestamp() {
        assert!(eval(json!({"Variable": "$.b", "BooleanEquals": true}), json!({"b": true})).unwrap());
        let payload = json!({"Variable": "$.t", "TimestampLessThan": "2020-01-01T00:00:00Z"});
        assert!(eval(payload.clone(), json!({"t": "2019-06-01T12:00:00+02:00"})).unwrap());
        assert!(!eval(payload, json!({"t": "2021-01-01T00:00:00Z"})).unwrap());
    }

    #[test]
    fn test_string_matches() {
        let payload = json!({"Variable": "$.f", "StringMatches": "log-*.txt"});
        assert!(eval(payload.clone(), json!({"f": "log-2024.txt"})).unwrap());
        assert!(eval(payload.clone(), json!({"f": "log-.txt"})).unwrap());
        assert!(!eval(payload, json!({"f": "log-2024.csv"})).unwrap());

        assert!(glob_match(r"a\*b", "a*b"));
        assert!(!glob_match(r"a\*b", "axb"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*b*c", "abxbc"));
    }

    // -----------------------------------------------------------------------
    // Parsing
    // -----------------------------------------------------------------------

    #[test]
    fn test_structural_errors() {
        let top = json!({"Variable": "$.a", "StringEquals": "x"});
        let fields = Fields::new("States.C.Choices[0]", &top).unwrap();
        assert!(ChoiceRule::parse(&fields, true).is_err(), "top-level needs Next");

        let nested = json!({"Variable": "$.a", "StringEquals": "x", "Next": "B"});
        let fields = Fields::new("States.C.Choices[0].Not", &nested).unwrap();
        assert!(ChoiceRule::parse(&fields, false).is_err(), "nested must not have Next");

        for bad in [
            json!({"Variable": "$.a"}),
            json!({"Variable": "$.a", "StringEquals": "x", "NumericEquals": 1}),
            json!({"Variable": "$.a", "NumericEquals": "one"}),
            json!({"Variable": "$.a", "TimestampEquals": "yesterday"}),
            json!({"Variable": "$.a", "IsNull": "yes"}),
            json!({"StringEquals": "x"}),
        ] {
            let fields = Fields::new("S", &bad).unwrap();
            assert!(ChoiceRule::parse(&fields, false).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_dot_labels() {
        assert_eq!(rule(json!({"Variable": "$.foo", "StringEquals": "bar"})).to_dot_label(), r#"$.foo == "bar""#);
        assert_eq!(rule(json!({"Variable": "$.foo", "NumericLessThanPath": "$.bar"})).to_dot_label(), r#"$.foo < "$.bar""#);
        assert_eq!(rule(json!({"Variable": "$.foo", "IsNull": true})).to_dot_label(), "$.foo IsNull true");
        assert_eq!(
            rule(json!({"Not": {"Variable": "$.a", "NumericEquals": 1}})).to_dot_label(),
            "!($.a == 1)"
        );
        assert_eq!(
            rule(json!({"And": [
                {"Variable": "$.a", "NumericEquals": 1},
                {"Variable": "$.b", "StringMatches": "x*"}
            ]}))
            .to_dot_label(),
            r#"$.a == 1 && $.b matches "x*""#
        );
    }
}
