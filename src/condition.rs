//! # Condition Trees
//!
//! Recursive boolean-predicate representation compiled into WHERE and
//! HAVING clauses. Every entry after the first carries the combinator
//! (`AND`/`OR`) that joins it to the previous sibling; compilation walks
//! the tree depth-first, left-to-right, appending parameters in exactly
//! the order their placeholders appear.

use crate::error::{Error, Result};
use crate::guard;
use crate::value::SqlValue;

/// Boolean combinator joining a condition to its previous sibling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
	And,
	Or,
}

impl Combinator {
	pub fn as_sql(self) -> &'static str {
		match self {
			Self::And => "AND",
			Self::Or => "OR",
		}
	}
}

/// One node of a condition tree
#[derive(Debug, Clone)]
pub enum ConditionNode {
	/// `column operator $n`
	Basic {
		column: String,
		operator: String,
		value: SqlValue,
	},
	/// `column [NOT] IN ($n, ...)`; an empty value set compiles to a
	/// constant predicate instead of invalid SQL
	In {
		column: String,
		values: Vec<SqlValue>,
		negated: bool,
	},
	/// `column IS [NOT] NULL`
	Null { column: String, negated: bool },
	/// `column [NOT] BETWEEN $n AND $m`
	Between {
		column: String,
		low: SqlValue,
		high: SqlValue,
		negated: bool,
	},
	/// Raw SQL fragment with `?` markers rewritten to positional
	/// placeholders, one per binding. The fragment passes the read-only
	/// guard before it reaches the output.
	Raw {
		sql: String,
		bindings: Vec<SqlValue>,
	},
	/// Parenthesized sub-tree; contributes nothing when empty
	Group(ConditionTree),
}

/// Ordered list of conditions with their joining combinators
#[derive(Debug, Clone, Default)]
pub struct ConditionTree {
	entries: Vec<(Combinator, ConditionNode)>,
}

impl ConditionTree {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn push(&mut self, combinator: Combinator, node: ConditionNode) {
		self.entries.push((combinator, node));
	}

	pub fn and_basic(
		&mut self,
		column: impl Into<String>,
		operator: impl Into<String>,
		value: impl Into<SqlValue>,
	) -> &mut Self {
		self.push(
			Combinator::And,
			ConditionNode::Basic {
				column: column.into(),
				operator: operator.into(),
				value: value.into(),
			},
		);
		self
	}

	pub fn or_basic(
		&mut self,
		column: impl Into<String>,
		operator: impl Into<String>,
		value: impl Into<SqlValue>,
	) -> &mut Self {
		self.push(
			Combinator::Or,
			ConditionNode::Basic {
				column: column.into(),
				operator: operator.into(),
				value: value.into(),
			},
		);
		self
	}

	pub fn and_in(&mut self, column: impl Into<String>, values: Vec<SqlValue>) -> &mut Self {
		self.push(
			Combinator::And,
			ConditionNode::In {
				column: column.into(),
				values,
				negated: false,
			},
		);
		self
	}

	pub fn and_not_in(&mut self, column: impl Into<String>, values: Vec<SqlValue>) -> &mut Self {
		self.push(
			Combinator::And,
			ConditionNode::In {
				column: column.into(),
				values,
				negated: true,
			},
		);
		self
	}

	pub fn or_in(&mut self, column: impl Into<String>, values: Vec<SqlValue>) -> &mut Self {
		self.push(
			Combinator::Or,
			ConditionNode::In {
				column: column.into(),
				values,
				negated: false,
			},
		);
		self
	}

	pub fn and_null(&mut self, column: impl Into<String>) -> &mut Self {
		self.push(
			Combinator::And,
			ConditionNode::Null {
				column: column.into(),
				negated: false,
			},
		);
		self
	}

	pub fn and_not_null(&mut self, column: impl Into<String>) -> &mut Self {
		self.push(
			Combinator::And,
			ConditionNode::Null {
				column: column.into(),
				negated: true,
			},
		);
		self
	}

	pub fn or_null(&mut self, column: impl Into<String>) -> &mut Self {
		self.push(
			Combinator::Or,
			ConditionNode::Null {
				column: column.into(),
				negated: false,
			},
		);
		self
	}

	pub fn and_between(
		&mut self,
		column: impl Into<String>,
		low: impl Into<SqlValue>,
		high: impl Into<SqlValue>,
	) -> &mut Self {
		self.push(
			Combinator::And,
			ConditionNode::Between {
				column: column.into(),
				low: low.into(),
				high: high.into(),
				negated: false,
			},
		);
		self
	}

	pub fn and_not_between(
		&mut self,
		column: impl Into<String>,
		low: impl Into<SqlValue>,
		high: impl Into<SqlValue>,
	) -> &mut Self {
		self.push(
			Combinator::And,
			ConditionNode::Between {
				column: column.into(),
				low: low.into(),
				high: high.into(),
				negated: true,
			},
		);
		self
	}

	pub fn and_raw(&mut self, sql: impl Into<String>, bindings: Vec<SqlValue>) -> &mut Self {
		self.push(
			Combinator::And,
			ConditionNode::Raw {
				sql: sql.into(),
				bindings,
			},
		);
		self
	}

	pub fn or_raw(&mut self, sql: impl Into<String>, bindings: Vec<SqlValue>) -> &mut Self {
		self.push(
			Combinator::Or,
			ConditionNode::Raw {
				sql: sql.into(),
				bindings,
			},
		);
		self
	}

	/// Append a parenthesized sub-group built by the closure
	pub fn and_group(&mut self, f: impl FnOnce(&mut ConditionTree)) -> &mut Self {
		let mut inner = ConditionTree::new();
		f(&mut inner);
		self.push(Combinator::And, ConditionNode::Group(inner));
		self
	}

	pub fn or_group(&mut self, f: impl FnOnce(&mut ConditionTree)) -> &mut Self {
		let mut inner = ConditionTree::new();
		f(&mut inner);
		self.push(Combinator::Or, ConditionNode::Group(inner));
		self
	}

	/// Compile this tree into a clause body, appending parameters to
	/// `params` in placeholder order. Returns an empty string when the
	/// tree contributes nothing, so callers can omit the whole clause.
	///
	/// A combinator is only emitted once the previous sibling actually
	/// produced SQL; groups that compile to nothing therefore never
	/// leave a dangling `AND`/`OR` behind.
	pub fn compile_into(&self, params: &mut Vec<SqlValue>) -> Result<String> {
		let mut sql = String::new();
		for (combinator, node) in &self.entries {
			let Some(clause) = Self::compile_node(node, params)? else {
				continue;
			};
			if !sql.is_empty() {
				sql.push(' ');
				sql.push_str(combinator.as_sql());
				sql.push(' ');
			}
			sql.push_str(&clause);
		}
		Ok(sql)
	}

	fn compile_node(
		node: &ConditionNode,
		params: &mut Vec<SqlValue>,
	) -> Result<Option<String>> {
		match node {
			ConditionNode::Basic {
				column,
				operator,
				value,
			} => {
				validate_operator(operator)?;
				params.push(value.clone());
				Ok(Some(format!("{} {} ${}", column, operator, params.len())))
			}
			ConditionNode::In {
				column,
				values,
				negated,
			} => {
				if values.is_empty() {
					// `IN ()` is invalid SQL; an empty set can match
					// nothing, so NOT IN over it matches everything
					let constant = if *negated { "1 = 1" } else { "1 = 0" };
					return Ok(Some(constant.to_string()));
				}
				let placeholders: Vec<String> = values
					.iter()
					.map(|value| {
						params.push(value.clone());
						format!("${}", params.len())
					})
					.collect();
				let keyword = if *negated { "NOT IN" } else { "IN" };
				Ok(Some(format!(
					"{} {} ({})",
					column,
					keyword,
					placeholders.join(", ")
				)))
			}
			ConditionNode::Null { column, negated } => Ok(Some(format!(
				"{} IS{} NULL",
				column,
				if *negated { " NOT" } else { "" }
			))),
			ConditionNode::Between {
				column,
				low,
				high,
				negated,
			} => {
				params.push(low.clone());
				let low_idx = params.len();
				params.push(high.clone());
				let high_idx = params.len();
				Ok(Some(format!(
					"{}{} BETWEEN ${} AND ${}",
					column,
					if *negated { " NOT" } else { "" },
					low_idx,
					high_idx
				)))
			}
			ConditionNode::Raw { sql, bindings } => {
				guard::check_fragment(sql)?;
				Ok(Some(rewrite_raw_placeholders(sql, bindings, params)?))
			}
			ConditionNode::Group(tree) => {
				let inner = tree.compile_into(params)?;
				if inner.is_empty() {
					Ok(None)
				} else {
					Ok(Some(format!("({})", inner)))
				}
			}
		}
	}
}

/// Rewrite `?` markers in a raw fragment to positional placeholders,
/// appending one binding per marker
fn rewrite_raw_placeholders(
	sql: &str,
	bindings: &[SqlValue],
	params: &mut Vec<SqlValue>,
) -> Result<String> {
	let marker_count = sql.matches('?').count();
	if marker_count != bindings.len() {
		return Err(Error::QueryBuild(format!(
			"raw fragment has {} placeholder(s) but {} binding(s): {}",
			marker_count,
			bindings.len(),
			sql
		)));
	}
	let mut out = String::with_capacity(sql.len());
	let mut next = bindings.iter();
	for ch in sql.chars() {
		if ch == '?' {
			// marker_count == bindings.len(), so the iterator cannot run dry
			let value = next.next().expect("binding for placeholder");
			params.push(value.clone());
			out.push('$');
			out.push_str(&params.len().to_string());
		} else {
			out.push(ch);
		}
	}
	Ok(out)
}

const ALLOWED_OPERATORS: &[&str] = &[
	"=", "!=", "<>", "<", "<=", ">", ">=", "LIKE", "NOT LIKE", "ILIKE", "NOT ILIKE",
];

pub(crate) fn validate_operator(operator: &str) -> Result<()> {
	let upper = operator.to_ascii_uppercase();
	if ALLOWED_OPERATORS.contains(&upper.as_str()) {
		Ok(())
	} else {
		Err(Error::QueryBuild(format!(
			"unsupported comparison operator `{}`",
			operator
		)))
	}
}
