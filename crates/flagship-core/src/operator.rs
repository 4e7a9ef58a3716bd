// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Targeting rule operators.
//!
//! Operators are a closed enum with one evaluator per tag so the hot path
//! dispatches on a discriminant rather than a string. String operators
//! coerce numbers to their canonical decimal form; `gt`/`lt` require both
//! sides numeric; `regex` uses the linear-time `regex` engine with a
//! compile size limit.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound on a compiled regex, guarding against pathological patterns
/// submitted through the admin API.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Comparison applied between a subject attribute and a rule's operand set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
	Eq,
	Neq,
	In,
	NotIn,
	Contains,
	NotContains,
	StartsWith,
	EndsWith,
	Gt,
	Lt,
	Regex,
}

impl Operator {
	/// Evaluates this operator for a subject attribute value against the
	/// rule's operand set.
	///
	/// Single-operand operators use the first element of `operands`;
	/// `in`/`not_in` match against the whole set. Returns false (rule
	/// non-match) on any type mismatch rather than erroring.
	pub fn evaluate(&self, subject: &Value, operands: &[Value]) -> bool {
		match self {
			Operator::Eq => operands.first().is_some_and(|v| json_eq(subject, v)),
			Operator::Neq => operands.first().is_some_and(|v| !json_eq(subject, v)),
			Operator::In => operands.iter().any(|v| json_eq(subject, v)),
			Operator::NotIn => !operands.iter().any(|v| json_eq(subject, v)),
			Operator::Contains => text_pair(subject, operands)
				.is_some_and(|(subject, operand)| subject.contains(&operand)),
			Operator::NotContains => text_pair(subject, operands)
				.is_some_and(|(subject, operand)| !subject.contains(&operand)),
			Operator::StartsWith => text_pair(subject, operands)
				.is_some_and(|(subject, operand)| subject.starts_with(&operand)),
			Operator::EndsWith => text_pair(subject, operands)
				.is_some_and(|(subject, operand)| subject.ends_with(&operand)),
			Operator::Gt => numeric_pair(subject, operands).is_some_and(|(a, b)| a > b),
			Operator::Lt => numeric_pair(subject, operands).is_some_and(|(a, b)| a < b),
			Operator::Regex => eval_regex(subject, operands),
		}
	}
}

impl std::fmt::Display for Operator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			Operator::Eq => "eq",
			Operator::Neq => "neq",
			Operator::In => "in",
			Operator::NotIn => "not_in",
			Operator::Contains => "contains",
			Operator::NotContains => "not_contains",
			Operator::StartsWith => "starts_with",
			Operator::EndsWith => "ends_with",
			Operator::Gt => "gt",
			Operator::Lt => "lt",
			Operator::Regex => "regex",
		};
		f.write_str(s)
	}
}

/// Equality with numeric/string canonicalization: `"42"` and `42` compare
/// equal through their canonical decimal text, everything else compares as
/// plain JSON.
fn json_eq(a: &Value, b: &Value) -> bool {
	if a == b {
		return true;
	}
	match (as_text(a), as_text(b)) {
		(Some(a), Some(b)) => a == b,
		_ => false,
	}
}

/// Canonical text for string comparisons. Numbers coerce to their decimal
/// form; booleans, arrays and objects do not participate.
fn as_text(value: &Value) -> Option<String> {
	match value {
		Value::String(s) => Some(s.clone()),
		Value::Number(n) => Some(n.to_string()),
		_ => None,
	}
}

fn text_pair(subject: &Value, operands: &[Value]) -> Option<(String, String)> {
	let subject = as_text(subject)?;
	let operand = as_text(operands.first()?)?;
	Some((subject, operand))
}

/// Both sides as f64, accepting JSON numbers and numeric strings.
fn numeric_pair(subject: &Value, operands: &[Value]) -> Option<(f64, f64)> {
	Some((as_number(subject)?, as_number(operands.first()?)?))
}

fn as_number(value: &Value) -> Option<f64> {
	match value {
		Value::Number(n) => n.as_f64(),
		Value::String(s) => s.trim().parse().ok(),
		_ => None,
	}
}

fn eval_regex(subject: &Value, operands: &[Value]) -> bool {
	let Some(subject) = as_text(subject) else {
		return false;
	};
	let Some(Value::String(pattern)) = operands.first() else {
		return false;
	};

	match regex::RegexBuilder::new(pattern)
		.size_limit(REGEX_SIZE_LIMIT)
		.build()
	{
		Ok(re) => re.is_match(&subject),
		Err(e) => {
			tracing::warn!(pattern = %pattern, error = %e, "invalid regex in targeting rule");
			false
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use serde_json::json;

	#[test]
	fn eq_compares_json_values() {
		assert!(Operator::Eq.evaluate(&json!("premium"), &[json!("premium")]));
		assert!(!Operator::Eq.evaluate(&json!("free"), &[json!("premium")]));
		assert!(Operator::Eq.evaluate(&json!(3), &[json!(3)]));
	}

	#[test]
	fn eq_coerces_numbers_to_canonical_text() {
		assert!(Operator::Eq.evaluate(&json!("42"), &[json!(42)]));
		assert!(Operator::Eq.evaluate(&json!(42), &[json!("42")]));
		assert!(!Operator::Eq.evaluate(&json!("042"), &[json!(42)]));
	}

	#[test]
	fn in_matches_against_whole_set() {
		let set = [json!("us"), json!("ca"), json!("mx")];
		assert!(Operator::In.evaluate(&json!("ca"), &set));
		assert!(!Operator::In.evaluate(&json!("de"), &set));
		assert!(Operator::NotIn.evaluate(&json!("de"), &set));
	}

	#[test]
	fn string_operators_coerce_numbers() {
		assert!(Operator::StartsWith.evaluate(&json!(1234), &[json!("12")]));
		assert!(Operator::Contains.evaluate(&json!("build-42"), &[json!(42)]));
		assert!(Operator::EndsWith.evaluate(&json!("v1.9"), &[json!(".9")]));
	}

	#[test]
	fn string_operators_reject_non_text() {
		assert!(!Operator::Contains.evaluate(&json!(true), &[json!("tru")]));
		assert!(!Operator::StartsWith.evaluate(&json!({"a": 1}), &[json!("a")]));
	}

	#[test]
	fn gt_lt_require_numeric_sides() {
		assert!(Operator::Gt.evaluate(&json!(10), &[json!(5)]));
		assert!(Operator::Lt.evaluate(&json!("3.5"), &[json!(4)]));
		assert!(!Operator::Gt.evaluate(&json!("not-a-number"), &[json!(5)]));
		assert!(!Operator::Lt.evaluate(&json!(5), &[json!("abc")]));
	}

	#[test]
	fn regex_matches_and_rejects() {
		assert!(Operator::Regex.evaluate(&json!("user-123"), &[json!(r"^user-\d+$")]));
		assert!(!Operator::Regex.evaluate(&json!("admin-123"), &[json!(r"^user-\d+$")]));
	}

	#[test]
	fn invalid_regex_is_a_non_match() {
		assert!(!Operator::Regex.evaluate(&json!("anything"), &[json!("(unclosed")]));
	}

	#[test]
	fn empty_operands_never_match() {
		for op in [
			Operator::Eq,
			Operator::Contains,
			Operator::StartsWith,
			Operator::Gt,
			Operator::Regex,
		] {
			assert!(!op.evaluate(&json!("x"), &[]));
		}
	}

	#[test]
	fn operator_serde_uses_snake_case() {
		assert_eq!(
			serde_json::to_string(&Operator::NotContains).unwrap(),
			r#""not_contains""#
		);
		let op: Operator = serde_json::from_str(r#""starts_with""#).unwrap();
		assert_eq!(op, Operator::StartsWith);
	}

	proptest! {
		#[test]
		fn neq_is_negation_of_eq(a: i64, b: i64) {
			let eq = Operator::Eq.evaluate(&json!(a), &[json!(b)]);
			let neq = Operator::Neq.evaluate(&json!(a), &[json!(b)]);
			prop_assert_eq!(eq, !neq);
		}

		#[test]
		fn not_in_is_negation_of_in(needle: i64, haystack in prop::collection::vec(0i64..100, 0..8)) {
			let set: Vec<Value> = haystack.iter().map(|v| json!(v)).collect();
			let is_in = Operator::In.evaluate(&json!(needle), &set);
			let not_in = Operator::NotIn.evaluate(&json!(needle), &set);
			prop_assert_eq!(is_in, !not_in);
		}

		#[test]
		fn gt_and_lt_are_exclusive(a: i32, b: i32) {
			let gt = Operator::Gt.evaluate(&json!(a), &[json!(b)]);
			let lt = Operator::Lt.evaluate(&json!(a), &[json!(b)]);
			prop_assert!(!(gt && lt));
		}
	}
}
