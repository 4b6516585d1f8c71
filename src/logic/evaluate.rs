use crate::error::Result;
use crate::model::value::Expression;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Coordinate supplied by callers: axis name → value.
pub type Coordinate = HashMap<String, serde_json::Value>;

/// Output map a lookup writes into; rule execution attaches a [`RuleInfo`]
/// under [`RULE_INFO_KEY`].
pub type Output = std::collections::BTreeMap<String, serde_json::Value>;

pub const RULE_INFO_KEY: &str = "_rule";

/// Port to the expression language. Rule conditions, command cells and
/// reference-axis transforms all evaluate through this seam; the core never
/// interprets source text itself.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(
        &self,
        expr: &Expression,
        input: &Coordinate,
        cube_name: &str,
    ) -> Result<serde_json::Value>;
}

/// One rule column that fired during a lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleExecution {
    /// Axis → rule name (or canonical condition text when unnamed).
    pub rules: std::collections::BTreeMap<String, String>,
    pub value: Option<serde_json::Value>,
}

/// Record of the rule columns evaluated by a single cube lookup, in declared
/// order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuleInfo {
    pub executed: Vec<RuleExecution>,
    pub rules_fired: usize,
}

impl RuleInfo {
    pub fn attach(&self, output: &mut Output) {
        if let Ok(v) = serde_json::to_value(self) {
            output.insert(RULE_INFO_KEY.to_string(), v);
        }
    }
}

/// Default evaluator: treats inline source as a JSON literal, falling back to
/// the raw text. Enough to drive boolean rule conditions and literal command
/// cells; embedders wire a real expression engine through the port.
#[derive(Debug, Default, Clone)]
pub struct LiteralEvaluator;

impl ExpressionEvaluator for LiteralEvaluator {
    fn evaluate(
        &self,
        expr: &Expression,
        _input: &Coordinate,
        _cube_name: &str,
    ) -> Result<serde_json::Value> {
        let source = expr.cmd.as_deref().or(expr.url.as_deref()).unwrap_or("");
        Ok(serde_json::from_str(source)
            .unwrap_or_else(|_| serde_json::Value::String(source.to_string())))
    }
}

/// Truthiness used for rule conditions: false, null, zero and the empty
/// string do not fire.
pub fn is_truthy(v: &serde_json::Value) -> bool {
    match v {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        serde_json::Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_evaluator_parses_json_literals() {
        let ev = LiteralEvaluator;
        let input = Coordinate::new();
        let t = ev
            .evaluate(&Expression::from_source("true"), &input, "t")
            .unwrap();
        assert_eq!(t, serde_json::Value::Bool(true));
        let n = ev
            .evaluate(&Expression::from_source("42"), &input, "t")
            .unwrap();
        assert_eq!(n, serde_json::json!(42));
        let s = ev
            .evaluate(&Expression::from_source("not json"), &input, "t")
            .unwrap();
        assert_eq!(s, serde_json::json!("not json"));
    }

    #[test]
    fn truthiness() {
        assert!(is_truthy(&serde_json::json!(true)));
        assert!(is_truthy(&serde_json::json!(1)));
        assert!(is_truthy(&serde_json::json!("x")));
        assert!(!is_truthy(&serde_json::json!(false)));
        assert!(!is_truthy(&serde_json::json!(0)));
        assert!(!is_truthy(&serde_json::Value::Null));
        assert!(!is_truthy(&serde_json::json!("")));
    }
}
