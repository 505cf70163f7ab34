//! The closed document query grammar: equality, `$gt`, `$lt`, `$in`.
//!
//! Queries are JSON objects mapping a top-level document field to either a
//! literal (equality) or a single-key operator object. Anything outside this
//! grammar is rejected with `ValidationFailed` rather than silently ignored.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{ClResult, Error};

#[derive(Debug, Clone)]
pub enum Predicate {
	Eq(Value),
	Gt(Value),
	Lt(Value),
	In(Vec<Value>),
}

#[derive(Debug, Clone, Default)]
pub struct Query {
	pub predicates: BTreeMap<String, Predicate>,
}

impl Query {
	pub fn parse(shape: &Value) -> ClResult<Self> {
		let Value::Object(fields) = shape else {
			return Err(Error::ValidationFailed("query must be a JSON object".into()));
		};
		let mut predicates = BTreeMap::new();
		for (field, spec) in fields {
			let predicate = match spec {
				Value::Object(ops) => {
					if ops.len() != 1 {
						return Err(Error::ValidationFailed(format!(
							"query field '{field}' must carry exactly one operator"
						)));
					}
					let (op, arg) = ops.iter().next().expect("checked len == 1");
					match op.as_str() {
						"$gt" => Predicate::Gt(arg.clone()),
						"$lt" => Predicate::Lt(arg.clone()),
						"$in" => {
							let Value::Array(items) = arg else {
								return Err(Error::ValidationFailed(
									"$in requires an array argument".into(),
								));
							};
							Predicate::In(items.clone())
						}
						other => {
							return Err(Error::ValidationFailed(format!(
								"unsupported query operator '{other}'"
							)));
						}
					}
				}
				literal => Predicate::Eq(literal.clone()),
			};
			predicates.insert(field.clone(), predicate);
		}
		Ok(Self { predicates })
	}

	/// Evaluate the query against a stored document in-process (no query planner).
	pub fn matches(&self, doc: &Value) -> bool {
		let Value::Object(fields) = doc else {
			return false;
		};
		self.predicates.iter().all(|(field, predicate)| {
			let Some(value) = fields.get(field) else {
				return false;
			};
			match predicate {
				Predicate::Eq(expected) => value == expected,
				Predicate::Gt(bound) => compare_numeric(value, bound) == Some(std::cmp::Ordering::Greater),
				Predicate::Lt(bound) => compare_numeric(value, bound) == Some(std::cmp::Ordering::Less),
				Predicate::In(options) => options.contains(value),
			}
		})
	}
}

fn compare_numeric(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
	match (a.as_f64(), b.as_f64()) {
		(Some(a), Some(b)) => a.partial_cmp(&b),
		_ => match (a.as_str(), b.as_str()) {
			(Some(a), Some(b)) => Some(a.cmp(b)),
			_ => None,
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn equality_matches() {
		let q = Query::parse(&json!({"status": "active"})).unwrap();
		assert!(q.matches(&json!({"status": "active", "other": 1})));
		assert!(!q.matches(&json!({"status": "disabled"})));
	}

	#[test]
	fn gt_lt_in() {
		let q = Query::parse(&json!({"age": {"$gt": 18}})).unwrap();
		assert!(q.matches(&json!({"age": 21})));
		assert!(!q.matches(&json!({"age": 10})));

		let q = Query::parse(&json!({"tag": {"$in": ["a", "b"]}})).unwrap();
		assert!(q.matches(&json!({"tag": "b"})));
		assert!(!q.matches(&json!({"tag": "c"})));
	}

	#[test]
	fn rejects_unknown_operator() {
		let err = Query::parse(&json!({"age": {"$ne": 1}})).unwrap_err();
		assert!(matches!(err, Error::ValidationFailed(_)));
	}
}

// vim: ts=4
