//! Loop-node conditions.
//!
//! A condition compares one value from the run store against an expected
//! value. It is written either as an object
//! `{"key": "Hero.mood", "operator": "is", "value": "happy"}` or as the
//! shorthand string `"Hero.mood is happy"`. The key may also be a variable
//! token. The expected value may contain tokens and is resolved before
//! comparing.

use cardflow_variable::{Resolver, VariableLookup, VariableStore, grammar};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "is")]
    Is,
    #[serde(rename = "is_not")]
    IsNot,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "not_contains")]
    NotContains,
    #[serde(rename = "starts_with")]
    StartsWith,
    #[serde(rename = "ends_with")]
    EndsWith,
    #[serde(rename = "empty")]
    Empty,
    #[serde(rename = "not_empty")]
    NotEmpty,
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
}

impl Operator {
    const ALL: [Operator; 14] = [
        Self::Is,
        Self::IsNot,
        Self::Contains,
        Self::NotContains,
        Self::StartsWith,
        Self::EndsWith,
        Self::Empty,
        Self::NotEmpty,
        Self::Equal,
        Self::NotEqual,
        Self::GreaterThan,
        Self::LessThan,
        Self::GreaterOrEqual,
        Self::LessOrEqual,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Is => "is",
            Self::IsNot => "is_not",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::Empty => "empty",
            Self::NotEmpty => "not_empty",
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::GreaterOrEqual => ">=",
            Self::LessOrEqual => "<=",
        }
    }

    /// Whether the operator compares against an expected value.
    #[must_use]
    pub const fn takes_value(&self) -> bool {
        !matches!(self, Self::Empty | Self::NotEmpty)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| ConditionError::UnknownOperator {
                operator: s.to_string(),
            })
    }
}

/// A structured comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comparison {
    /// Store key (`sourceName.field`, `startinput`) or a variable token.
    pub key: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: String,
}

/// A loop condition as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Expression(String),
    Comparison(Comparison),
}

/// Errors from parsing a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    /// The shorthand expression is malformed.
    InvalidExpression { expression: String, reason: &'static str },
    UnknownOperator { operator: String },
}

impl fmt::Display for ConditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidExpression { expression, reason } => {
                write!(f, "invalid condition '{expression}': {reason}")
            }
            Self::UnknownOperator { operator } => write!(f, "unknown condition operator '{operator}'"),
        }
    }
}

impl std::error::Error for ConditionError {}

impl Comparison {
    #[must_use]
    pub fn new(key: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            operator,
            value: value.into(),
        }
    }

    /// Evaluates the comparison against a run store.
    #[must_use]
    pub fn evaluate(&self, store: &VariableStore, resolver: &Resolver) -> bool {
        let actual = lookup_key(&self.key, store, resolver);
        let expected = resolver.resolve_text(&self.value, store);
        let result = compare(self.operator, &actual, &expected);
        tracing::debug!(
            key = %self.key,
            operator = %self.operator,
            actual = %actual,
            expected = %expected,
            result,
            "evaluated loop condition"
        );
        result
    }
}

impl Condition {
    /// Returns the structured form, parsing the shorthand if needed.
    pub fn to_comparison(&self) -> Result<Comparison, ConditionError> {
        match self {
            Self::Comparison(comparison) => Ok(comparison.clone()),
            Self::Expression(expression) => parse_expression(expression),
        }
    }

    /// Parses and evaluates the condition.
    pub fn evaluate(&self, store: &VariableStore, resolver: &Resolver) -> Result<bool, ConditionError> {
        Ok(self.to_comparison()?.evaluate(store, resolver))
    }
}

fn parse_expression(expression: &str) -> Result<Comparison, ConditionError> {
    let invalid = |reason| ConditionError::InvalidExpression {
        expression: expression.to_string(),
        reason,
    };

    let trimmed = expression.trim();
    let (key, rest) = trimmed
        .split_once(char::is_whitespace)
        .ok_or_else(|| invalid("expected '<key> <operator> [value]'"))?;
    let rest = rest.trim_start();
    let (operator, value) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let operator = operator.parse::<Operator>()?;
    let value = unquote(value.trim());

    if operator.takes_value() && value.is_empty() && !value_was_quoted(rest) {
        return Err(invalid("operator needs a value"));
    }
    Ok(Comparison::new(key, operator, value))
}

fn value_was_quoted(rest: &str) -> bool {
    rest.ends_with("\"\"") || rest.ends_with("''")
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

fn lookup_key(key: &str, store: &VariableStore, resolver: &Resolver) -> String {
    if let Some(value) = store.get(key) {
        return value.to_string();
    }
    if let Some(reference) = grammar::parse_token(key)
        && let Some(value) = store.lookup(&reference)
    {
        return resolver.resolve_text(&value, store);
    }
    tracing::debug!(key, "loop condition key is not set, comparing as empty");
    String::new()
}

fn compare(operator: Operator, actual: &str, expected: &str) -> bool {
    let numbers = || Some((actual.trim().parse::<f64>().ok()?, expected.trim().parse::<f64>().ok()?));
    match operator {
        Operator::Is => actual == expected,
        Operator::IsNot => actual != expected,
        Operator::Contains => actual.contains(expected),
        Operator::NotContains => !actual.contains(expected),
        Operator::StartsWith => actual.starts_with(expected),
        Operator::EndsWith => actual.ends_with(expected),
        Operator::Empty => actual.trim().is_empty(),
        Operator::NotEmpty => !actual.trim().is_empty(),
        Operator::Equal => numbers().is_some_and(|(a, b)| a == b),
        Operator::NotEqual => numbers().is_none_or(|(a, b)| a != b),
        Operator::GreaterThan => numbers().is_some_and(|(a, b)| a > b),
        Operator::LessThan => numbers().is_some_and(|(a, b)| a < b),
        Operator::GreaterOrEqual => numbers().is_some_and(|(a, b)| a >= b),
        Operator::LessOrEqual => numbers().is_some_and(|(a, b)| a <= b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardflow_variable::{SourceType, Variable, VariableSnapshot};
    use serde_json::json;

    fn store() -> VariableStore {
        let snapshot = VariableSnapshot::new([
            Variable::new(SourceType::Npc, "n1", "mood", "Alice").with_value("happy today"),
            Variable::new(SourceType::Custom, "c1", "count", "Counter").with_value("3"),
            Variable::new(SourceType::Custom, "c2", "target", "Goal").with_value("5"),
        ]);
        VariableStore::seed(snapshot, "yes please")
    }

    fn eval(expression: &str) -> bool {
        Condition::Expression(expression.to_string())
            .evaluate(&store(), &Resolver::default())
            .unwrap()
    }

    #[test]
    fn string_operators() {
        assert!(eval("Alice.mood contains happy"));
        assert!(eval("Alice.mood starts_with happy"));
        assert!(eval("Alice.mood is \"happy today\""));
        assert!(!eval("Alice.mood is_not 'happy today'"));
        assert!(eval("startinput ends_with please"));
        assert!(eval("Missing.key empty"));
        assert!(eval("Alice.mood not_empty"));
    }

    #[test]
    fn numeric_operators() {
        assert!(eval("Counter.count < 5"));
        assert!(eval("Counter.count >= 3"));
        assert!(eval("Counter.count = 3.0"));
        assert!(!eval("Alice.mood > 1"));
        assert!(eval("Alice.mood != 1"));
    }

    #[test]
    fn expected_value_is_resolved() {
        assert!(eval("Counter.count < @Goal.target"));
        assert!(eval("Counter.count < @gv_custom_c2_target-="));
    }

    #[test]
    fn key_may_be_a_token() {
        assert!(eval("@gv_npc_n1_mood-= contains today"));
    }

    #[test]
    fn structured_form_deserializes() {
        let condition: Condition =
            serde_json::from_value(json!({"key": "Counter.count", "operator": ">", "value": "2"})).unwrap();
        assert!(condition.evaluate(&store(), &Resolver::default()).unwrap());

        let shorthand: Condition = serde_json::from_value(json!("Counter.count > 2")).unwrap();
        assert_eq!(shorthand.to_comparison().unwrap(), condition.to_comparison().unwrap());
    }

    #[test]
    fn malformed_expressions_are_errors() {
        let resolver = Resolver::default();
        let bad = |s: &str| Condition::Expression(s.to_string()).evaluate(&store(), &resolver);
        assert!(matches!(bad("justakey"), Err(ConditionError::InvalidExpression { .. })));
        assert!(matches!(bad("a.b resembles c"), Err(ConditionError::UnknownOperator { .. })));
        assert!(matches!(bad("a.b is"), Err(ConditionError::InvalidExpression { .. })));
        assert!(bad("a.b is ''").is_ok());
    }
}
