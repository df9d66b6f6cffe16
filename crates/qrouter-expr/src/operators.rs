//! Built-in operators.

use std::cmp::Ordering;

use regex::Regex;
use serde_json::{json, Value};

use qrouter_core::equality::deep_equal;
use qrouter_core::error::{Result, RouterError};

use crate::date::{self, DateUnit};
use crate::{truthy, ExpressionEvaluator, Scope};

pub(crate) fn register_builtins(evaluator: &mut ExpressionEvaluator) {
    evaluator.register("==", op_equal);
    evaluator.register("===", op_equal);
    evaluator.register("!=", op_not_equal);
    evaluator.register("!==", op_not_equal);
    evaluator.register("<", op_less);
    evaluator.register("<=", op_less_equal);
    evaluator.register(">", op_greater);
    evaluator.register(">=", op_greater_equal);
    evaluator.register("and", op_and);
    evaluator.register("or", op_or);
    evaluator.register("not", op_not);
    evaluator.register("includes", op_includes);
    evaluator.register("matches", op_matches);
    evaluator.register("|answered", op_answered);
    evaluator.register("|answered.count", op_answered_count);
    evaluator.register("dateCompare", op_date_compare);
    evaluator.register("|role.all", op_role_all);
    evaluator.register("|role.any", op_role_any);
    evaluator.register("|role.nota", op_role_nota);
}

fn binary(name: &str, args: &[Value], scope: &Scope<'_>) -> Result<(Value, Value)> {
    match args {
        [lhs, rhs] => Ok((scope.eval(lhs)?, scope.eval(rhs)?)),
        _ => Err(RouterError::Condition(format!(
            "\"{name}\" takes 2 arguments, got {}",
            args.len()
        ))),
    }
}

fn op_equal(args: &[Value], scope: &Scope<'_>) -> Result<Value> {
    let (lhs, rhs) = binary("==", args, scope)?;
    Ok(json!(deep_equal(&lhs, &rhs)))
}

fn op_not_equal(args: &[Value], scope: &Scope<'_>) -> Result<Value> {
    let (lhs, rhs) = binary("!=", args, scope)?;
    Ok(json!(!deep_equal(&lhs, &rhs)))
}

/// Numbers compare numerically, strings lexically; anything else is
/// incomparable and every ordering test on it is false.
fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

fn ordering(name: &str, args: &[Value], scope: &Scope<'_>, accept: fn(Ordering) -> bool) -> Result<Value> {
    let (lhs, rhs) = binary(name, args, scope)?;
    Ok(json!(compare(&lhs, &rhs).is_some_and(accept)))
}

fn op_less(args: &[Value], scope: &Scope<'_>) -> Result<Value> {
    ordering("<", args, scope, Ordering::is_lt)
}

fn op_less_equal(args: &[Value], scope: &Scope<'_>) -> Result<Value> {
    ordering("<=", args, scope, Ordering::is_le)
}

fn op_greater(args: &[Value], scope: &Scope<'_>) -> Result<Value> {
    ordering(">", args, scope, Ordering::is_gt)
}

fn op_greater_equal(args: &[Value], scope: &Scope<'_>) -> Result<Value> {
    ordering(">=", args, scope, Ordering::is_ge)
}

fn op_and(args: &[Value], scope: &Scope<'_>) -> Result<Value> {
    for arg in args {
        if !truthy(&scope.eval(arg)?) {
            return Ok(json!(false));
        }
    }
    Ok(json!(true))
}

fn op_or(args: &[Value], scope: &Scope<'_>) -> Result<Value> {
    for arg in args {
        if truthy(&scope.eval(arg)?) {
            return Ok(json!(true));
        }
    }
    Ok(json!(false))
}

fn op_not(args: &[Value], scope: &Scope<'_>) -> Result<Value> {
    match args {
        [arg] => Ok(json!(!truthy(&scope.eval(arg)?))),
        _ => Err(RouterError::Condition(format!(
            "\"not\" takes 1 argument, got {}",
            args.len()
        ))),
    }
}

/// `["includes", haystack, needle]`: array membership or substring.
fn op_includes(args: &[Value], scope: &Scope<'_>) -> Result<Value> {
    let (haystack, needle) = binary("includes", args, scope)?;
    let found = match (&haystack, &needle) {
        (Value::Array(items), _) => items.iter().any(|item| deep_equal(item, &needle)),
        (Value::String(text), Value::String(part)) => text.contains(part.as_str()),
        _ => false,
    };
    Ok(json!(found))
}

/// `["matches", value, pattern]`: regular expression test on a string.
fn op_matches(args: &[Value], scope: &Scope<'_>) -> Result<Value> {
    let (value, pattern) = binary("matches", args, scope)?;
    let Value::String(pattern) = pattern else {
        return Err(RouterError::Condition("\"matches\" pattern must be a string".into()));
    };
    let regex = Regex::new(&pattern)
        .map_err(|e| RouterError::Condition(format!("invalid pattern \"{pattern}\": {e}")))?;
    Ok(json!(value.as_str().is_some_and(|s| regex.is_match(s))))
}

fn answered_sections(args: &[Value], scope: &Scope<'_>) -> Result<usize> {
    let mut count = 0;
    for section in scope.eval_args(args)? {
        let Value::String(section_id) = section else {
            return Err(RouterError::Condition("answered checks take section ids".into()));
        };
        if scope.state().answer(&section_id).is_some_and(|a| !a.is_null()) {
            count += 1;
        }
    }
    Ok(count)
}

/// `["|answered", section, ...]`: every named section holds an answer.
fn op_answered(args: &[Value], scope: &Scope<'_>) -> Result<Value> {
    Ok(json!(answered_sections(args, scope)? == args.len()))
}

/// `["|answered.count", section, ...]`: how many named sections hold an answer.
fn op_answered_count(args: &[Value], scope: &Scope<'_>) -> Result<Value> {
    Ok(json!(answered_sections(args, scope)?))
}

/// `["dateCompare", date, op, amount, unit]`: compares `date` with today
/// shifted by `amount` `unit`s. `["dateCompare", dob, "<=", "-18", "years"]`
/// holds for anyone at least eighteen.
fn op_date_compare(args: &[Value], scope: &Scope<'_>) -> Result<Value> {
    let [date_arg, op, amount, unit] = args else {
        return Err(RouterError::Condition(format!(
            "\"dateCompare\" takes 4 arguments, got {}",
            args.len()
        )));
    };
    let Some(lhs) = scope.eval(date_arg)?.as_str().and_then(date::parse) else {
        return Ok(json!(false));
    };
    let amount = date::parse_amount(&scope.eval(amount)?)?;
    let unit: DateUnit = scope
        .eval(unit)?
        .as_str()
        .ok_or_else(|| RouterError::Condition("dateCompare unit must be a string".into()))?
        .parse()?;
    let rhs = date::shift(scope.today(), amount, unit)?;

    let holds = match op.as_str() {
        Some("<") => lhs < rhs,
        Some("<=") => lhs <= rhs,
        Some(">") => lhs > rhs,
        Some(">=") => lhs >= rhs,
        Some("==") => lhs == rhs,
        _ => {
            return Err(RouterError::Condition(format!(
                "dateCompare operator {op} is not supported"
            )))
        }
    };
    Ok(json!(holds))
}

fn role_names(args: &[Value], scope: &Scope<'_>) -> Result<Vec<String>> {
    scope
        .eval_args(args)?
        .into_iter()
        .map(|role| match role {
            Value::String(name) => Ok(name),
            other => Err(RouterError::Condition(format!("role name must be a string, got {other}"))),
        })
        .collect()
}

fn op_role_all(args: &[Value], scope: &Scope<'_>) -> Result<Value> {
    for role in role_names(args, scope)? {
        if !scope.eval_role(&role)? {
            return Ok(json!(false));
        }
    }
    Ok(json!(true))
}

fn op_role_any(args: &[Value], scope: &Scope<'_>) -> Result<Value> {
    for role in role_names(args, scope)? {
        if scope.eval_role(&role)? {
            return Ok(json!(true));
        }
    }
    Ok(json!(false))
}

fn op_role_nota(args: &[Value], scope: &Scope<'_>) -> Result<Value> {
    Ok(json!(!truthy(&op_role_any(args, scope)?)))
}
