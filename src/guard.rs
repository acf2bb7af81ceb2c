//! # Read-Only Guard
//!
//! Rejects anything that is not a plain SELECT before it can reach the
//! executor. The guard runs on every raw condition fragment and again on
//! every fully compiled statement.

use crate::error::{Error, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Compiled patterns for statement screening
struct Patterns {
	write_keyword: Regex,
	leading_select: Regex,
}

impl Patterns {
	fn new() -> Self {
		Self {
			// Any DML/DDL/administrative keyword, case-insensitive
			write_keyword: Regex::new(
				r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|TRUNCATE|REPLACE|MERGE|GRANT|REVOKE|ATTACH|VACUUM|PRAGMA)\b",
			)
			.unwrap(),
			// Outermost statement must start with SELECT
			leading_select: Regex::new(r"(?i)^\s*SELECT\b").unwrap(),
		}
	}
}

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

fn patterns() -> &'static Patterns {
	PATTERNS.get_or_init(Patterns::new)
}

/// Check a raw SQL fragment (a condition body, not a full statement).
///
/// Fragments may not contain statement separators or write keywords;
/// embedded subqueries are fine.
///
/// # Examples
///
/// ```
/// use grappelli::guard::check_fragment;
///
/// assert!(check_fragment("price > discount * 2").is_ok());
/// assert!(check_fragment("1 = 1; DROP TABLE users").is_err());
/// ```
pub fn check_fragment(sql: &str) -> Result<()> {
	if sql.contains(';') {
		return Err(Error::ReadOnlyViolation(format!(
			"statement separator in fragment: {}",
			sql
		)));
	}
	if let Some(m) = patterns().write_keyword.find(sql) {
		return Err(Error::ReadOnlyViolation(format!(
			"forbidden keyword `{}` in fragment: {}",
			m.as_str(),
			sql
		)));
	}
	Ok(())
}

/// Check a fully compiled statement: fragment rules plus the requirement
/// that the outermost statement is a SELECT.
pub fn check_statement(sql: &str) -> Result<()> {
	check_fragment(sql)?;
	if !patterns().leading_select.is_match(sql) {
		return Err(Error::ReadOnlyViolation(format!(
			"statement is not a SELECT: {}",
			sql
		)));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_plain_select_passes() {
		assert!(check_statement("SELECT * FROM users WHERE id = $1").is_ok());
		assert!(check_statement("  select 1").is_ok());
	}

	#[test]
	fn test_write_keywords_rejected() {
		for sql in [
			"INSERT INTO users VALUES (1)",
			"SELECT * FROM users; DELETE FROM users",
			"UPDATE users SET name = 'x'",
			"DROP TABLE users",
			"SELECT * FROM users WHERE id IN (SELECT id FROM t) UNION ALTER TABLE x",
		] {
			assert!(check_statement(sql).is_err(), "accepted: {}", sql);
		}
	}

	#[test]
	fn test_non_select_statement_rejected() {
		assert!(check_statement("WITH x AS (SELECT 1) SELECT * FROM x").is_err());
		assert!(check_statement("EXPLAIN SELECT 1").is_err());
	}

	#[test]
	fn test_fragment_allows_subqueries() {
		assert!(
			check_fragment("price = (SELECT MAX(price) FROM items WHERE owner_id = items.owner_id)")
				.is_ok()
		);
	}

	#[test]
	fn test_keyword_must_be_word_bounded() {
		// Column names containing a keyword as a substring are fine
		assert!(check_fragment("updated_at IS NULL").is_ok());
		assert!(check_fragment("created_by = $1").is_ok());
	}
}
