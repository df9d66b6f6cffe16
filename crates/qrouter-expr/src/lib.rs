//! Default condition evaluator for qrouter route graphs.
//!
//! Guards are array-form expressions: `[operator, arg, ...]`. An array whose
//! first element names a registered operator is evaluated; any other array is
//! a literal. Strings starting with `$.` are paths into the extended state.
//!
//! ```
//! use qrouter_core::{ConditionEvaluator, ExtendedState};
//! use qrouter_expr::ExpressionEvaluator;
//! use serde_json::{json, Map};
//!
//! let answers = json!({"a": {"q1": "scotland"}});
//! let answers = answers.as_object().unwrap();
//! let attributes = Map::new();
//! let state = ExtendedState::new(answers, &[], &attributes);
//!
//! let evaluator = ExpressionEvaluator::new();
//! let cond = json!(["==", "$.answers.a.q1", "scotland"]);
//! assert!(evaluator.evaluate(&cond, &state).unwrap());
//! ```

pub mod date;
pub mod operators;

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tracing::trace;

use qrouter_core::error::{Result, RouterError};
use qrouter_core::{ConditionEvaluator, ExtendedState};

/// An operator receives its unevaluated arguments and evaluates them through
/// the scope as needed, so `and`/`or` can short-circuit.
pub type Operator = fn(&[Value], &Scope<'_>) -> Result<Value>;

/// Nesting limit for role definitions that refer to other roles.
const MAX_ROLE_DEPTH: usize = 16;

/// Operator registry plus the clock used by date predicates.
#[derive(Clone)]
pub struct ExpressionEvaluator {
    operators: HashMap<String, Operator>,
    today: Option<NaiveDate>,
}

impl ExpressionEvaluator {
    /// An evaluator with every built-in operator registered.
    pub fn new() -> Self {
        let mut evaluator = Self {
            operators: HashMap::new(),
            today: None,
        };
        operators::register_builtins(&mut evaluator);
        evaluator
    }

    /// Register (or replace) an operator.
    pub fn register(&mut self, name: impl Into<String>, operator: Operator) {
        self.operators.insert(name.into(), operator);
    }

    /// Pin "today" for date predicates instead of reading the clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn has_operator(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    /// Evaluate a node to a value.
    pub fn eval_value(&self, node: &Value, state: &ExtendedState<'_>) -> Result<Value> {
        Scope {
            evaluator: self,
            state,
            role_depth: 0,
        }
        .eval(node)
    }
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExpressionEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.operators.keys().collect();
        names.sort();
        f.debug_struct("ExpressionEvaluator")
            .field("operators", &names)
            .field("today", &self.today)
            .finish()
    }
}

impl ConditionEvaluator for ExpressionEvaluator {
    fn evaluate(&self, condition: &Value, state: &ExtendedState<'_>) -> Result<bool> {
        if let Value::Array(items) = condition {
            if let Some(Value::String(head)) = items.first() {
                if !self.has_operator(head) {
                    return Err(RouterError::Condition(format!("unknown operator \"{head}\"")));
                }
            }
        }
        let value = self.eval_value(condition, state)?;
        trace!(%condition, %value, "Evaluated condition");
        Ok(truthy(&value))
    }
}

/// Evaluation scope handed to operators.
pub struct Scope<'a> {
    evaluator: &'a ExpressionEvaluator,
    state: &'a ExtendedState<'a>,
    role_depth: usize,
}

impl<'a> Scope<'a> {
    pub fn state(&self) -> &ExtendedState<'a> {
        self.state
    }

    pub fn today(&self) -> NaiveDate {
        self.evaluator
            .today
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Evaluate a node: operator expressions run, `$.` paths resolve,
    /// anything else is a literal.
    pub fn eval(&self, node: &Value) -> Result<Value> {
        match node {
            Value::String(s) if s.starts_with("$.") => {
                Ok(self.state.resolve(s).unwrap_or(Value::Null))
            }
            Value::Array(items) => match items.split_first() {
                Some((Value::String(head), args)) => match self.evaluator.operators.get(head) {
                    Some(operator) => operator(args, self),
                    None => Ok(node.clone()),
                },
                _ => Ok(node.clone()),
            },
            _ => Ok(node.clone()),
        }
    }

    pub fn eval_args(&self, args: &[Value]) -> Result<Vec<Value>> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    /// Evaluate the definition of a named role from
    /// `attributes.q__roles.<role>.condition`.
    pub fn eval_role(&self, role: &str) -> Result<bool> {
        if self.role_depth >= MAX_ROLE_DEPTH {
            return Err(RouterError::Condition(format!(
                "role \"{role}\" nests deeper than {MAX_ROLE_DEPTH} levels"
            )));
        }
        let definition = role_condition(self.state, role)
            .ok_or_else(|| RouterError::Condition(format!("unknown role \"{role}\"")))?;
        let nested = Scope {
            evaluator: self.evaluator,
            state: self.state,
            role_depth: self.role_depth + 1,
        };
        Ok(truthy(&nested.eval(definition)?))
    }
}

fn role_condition<'s>(state: &ExtendedState<'s>, role: &str) -> Option<&'s Value> {
    state
        .attributes
        .get(qrouter_core::ROLES_ATTRIBUTE)?
        .get(role)?
        .get("condition")
}

/// Loose truthiness: `null`, `false`, `0`, `""` and empty arrays are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}
