//! # Values and Rows
//!
//! Scalar values exchanged with the database executor, raw result rows,
//! and the hashable key form used by lookup maps and load bookkeeping.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar value bound as a query parameter or returned in a raw row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
	Null,
	Boolean(bool),
	Integer(i64),
	Float(f64),
	Text(String),
}

impl SqlValue {
	/// Canonical key form of this value, if it can act as a lookup key.
	///
	/// `Null` and `Float` never become keys: a null key matches nothing
	/// and floats are not reliably hashable across drivers.
	pub fn as_key(&self) -> Option<KeyValue> {
		match self {
			Self::Boolean(b) => Some(KeyValue::Boolean(*b)),
			Self::Integer(i) => Some(KeyValue::Integer(*i)),
			Self::Text(s) => Some(KeyValue::Text(s.clone())),
			Self::Null | Self::Float(_) => None,
		}
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Self::Null)
	}

	pub fn as_text(&self) -> Option<&str> {
		match self {
			Self::Text(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_integer(&self) -> Option<i64> {
		match self {
			Self::Integer(i) => Some(*i),
			_ => None,
		}
	}
}

impl fmt::Display for SqlValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Null => write!(f, "NULL"),
			Self::Boolean(b) => write!(f, "{}", b),
			Self::Integer(i) => write!(f, "{}", i),
			Self::Float(v) => write!(f, "{}", v),
			Self::Text(s) => write!(f, "{}", s),
		}
	}
}

impl From<bool> for SqlValue {
	fn from(v: bool) -> Self {
		Self::Boolean(v)
	}
}

impl From<i32> for SqlValue {
	fn from(v: i32) -> Self {
		Self::Integer(i64::from(v))
	}
}

impl From<i64> for SqlValue {
	fn from(v: i64) -> Self {
		Self::Integer(v)
	}
}

impl From<f64> for SqlValue {
	fn from(v: f64) -> Self {
		Self::Float(v)
	}
}

impl From<&str> for SqlValue {
	fn from(v: &str) -> Self {
		Self::Text(v.to_string())
	}
}

impl From<String> for SqlValue {
	fn from(v: String) -> Self {
		Self::Text(v)
	}
}

impl<T> From<Option<T>> for SqlValue
where
	T: Into<SqlValue>,
{
	fn from(v: Option<T>) -> Self {
		v.map_or(Self::Null, Into::into)
	}
}

impl From<KeyValue> for SqlValue {
	fn from(v: KeyValue) -> Self {
		match v {
			KeyValue::Boolean(b) => Self::Boolean(b),
			KeyValue::Integer(i) => Self::Integer(i),
			KeyValue::Text(s) => Self::Text(s),
		}
	}
}

impl From<SqlValue> for serde_json::Value {
	fn from(value: SqlValue) -> Self {
		match value {
			SqlValue::Null => Self::Null,
			SqlValue::Boolean(b) => Self::Bool(b),
			SqlValue::Integer(i) => Self::Number(i.into()),
			SqlValue::Float(f) => serde_json::Number::from_f64(f).map_or(Self::Null, Self::Number),
			SqlValue::Text(s) => Self::String(s),
		}
	}
}

/// Hashable, orderable subset of [`SqlValue`] used to key lookup maps,
/// the load registry and in-flight request keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyValue {
	Boolean(bool),
	Integer(i64),
	Text(String),
}

impl fmt::Display for KeyValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Boolean(b) => write!(f, "{}", b),
			Self::Integer(i) => write!(f, "{}", i),
			Self::Text(s) => write!(f, "{}", s),
		}
	}
}

/// Raw result row: ordered `column -> value` map as produced by the
/// injected executor, before any hydration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRow {
	columns: IndexMap<String, SqlValue>,
}

impl QueryRow {
	pub fn new() -> Self {
		Self {
			columns: IndexMap::new(),
		}
	}

	/// Build a row from `(column, value)` pairs, keeping column order
	///
	/// # Examples
	///
	/// ```
	/// use grappelli::{QueryRow, SqlValue};
	///
	/// let row = QueryRow::from_pairs([("id", SqlValue::Integer(1))]);
	/// assert_eq!(row.get("id"), Some(&SqlValue::Integer(1)));
	/// ```
	pub fn from_pairs<K, I>(pairs: I) -> Self
	where
		K: Into<String>,
		I: IntoIterator<Item = (K, SqlValue)>,
	{
		Self {
			columns: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
		}
	}

	pub fn insert(&mut self, column: impl Into<String>, value: SqlValue) {
		self.columns.insert(column.into(), value);
	}

	pub fn get(&self, column: &str) -> Option<&SqlValue> {
		self.columns.get(column)
	}

	/// Remove a column, returning its value
	pub fn remove(&mut self, column: &str) -> Option<SqlValue> {
		self.columns.shift_remove(column)
	}

	/// Key form of a column value, if present and keyable
	pub fn key(&self, column: &str) -> Option<KeyValue> {
		self.columns.get(column).and_then(SqlValue::as_key)
	}

	pub fn column_names(&self) -> impl Iterator<Item = &str> {
		self.columns.keys().map(String::as_str)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
		self.columns.iter().map(|(k, v)| (k.as_str(), v))
	}

	pub fn len(&self) -> usize {
		self.columns.len()
	}

	pub fn is_empty(&self) -> bool {
		self.columns.is_empty()
	}

	pub fn into_columns(self) -> IndexMap<String, SqlValue> {
		self.columns
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_null_and_float_are_never_keys() {
		assert_eq!(SqlValue::Null.as_key(), None);
		assert_eq!(SqlValue::Float(1.5).as_key(), None);
		assert_eq!(
			SqlValue::Integer(7).as_key(),
			Some(KeyValue::Integer(7))
		);
	}

	#[test]
	fn test_row_preserves_column_order() {
		let row = QueryRow::from_pairs([
			("b", SqlValue::Integer(2)),
			("a", SqlValue::Integer(1)),
		]);
		let names: Vec<_> = row.column_names().collect();
		assert_eq!(names, vec!["b", "a"]);
	}

	#[test]
	fn test_option_converts_to_null() {
		let v: SqlValue = Option::<i64>::None.into();
		assert!(v.is_null());
		let v: SqlValue = Some(3i64).into();
		assert_eq!(v, SqlValue::Integer(3));
	}
}
