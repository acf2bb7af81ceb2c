//! Shared test support: a scripted executor double standing in for the
//! injected connection capability.
//!
//! Responses are served in call order; every call is recorded with its
//! compiled SQL and parameter list so tests can assert on exactly what
//! reached the "database".

#![allow(dead_code)]

use async_trait::async_trait;
use grappelli::{DatabaseExecutor, QueryRow, SqlValue};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

pub struct ScriptedExecutor {
	responses: Mutex<VecDeque<Result<Vec<QueryRow>, String>>>,
	calls: Mutex<Vec<(String, Vec<SqlValue>)>>,
	delay: Option<Duration>,
}

impl ScriptedExecutor {
	pub fn new() -> Self {
		Self {
			responses: Mutex::new(VecDeque::new()),
			calls: Mutex::new(Vec::new()),
			delay: None,
		}
	}

	/// An executor that sleeps before answering, so tests can overlap
	/// concurrent requests deterministically
	pub fn with_delay(delay: Duration) -> Self {
		Self {
			delay: Some(delay),
			..Self::new()
		}
	}

	pub fn push_rows(&self, rows: Vec<QueryRow>) {
		self.responses.lock().push_back(Ok(rows));
	}

	pub fn push_error(&self, message: &str) {
		self.responses.lock().push_back(Err(message.to_string()));
	}

	pub fn calls(&self) -> Vec<(String, Vec<SqlValue>)> {
		self.calls.lock().clone()
	}

	pub fn call_count(&self) -> usize {
		self.calls.lock().len()
	}
}

#[async_trait]
impl DatabaseExecutor for ScriptedExecutor {
	async fn query(
		&self,
		sql: &str,
		params: &[SqlValue],
	) -> Result<Vec<QueryRow>, anyhow::Error> {
		self.calls.lock().push((sql.to_string(), params.to_vec()));
		if let Some(delay) = self.delay {
			tokio::time::sleep(delay).await;
		}
		match self.responses.lock().pop_front() {
			Some(Ok(rows)) => Ok(rows),
			Some(Err(message)) => Err(anyhow::anyhow!(message)),
			// Scripts may omit trailing responses for empty result sets
			None => Ok(Vec::new()),
		}
	}
}

/// Build a row from `(column, value)` pairs
pub fn row(pairs: &[(&str, SqlValue)]) -> QueryRow {
	QueryRow::from_pairs(pairs.iter().map(|(column, value)| (*column, value.clone())))
}

/// Shorthand for an integer cell
pub fn int(value: i64) -> SqlValue {
	SqlValue::Integer(value)
}

/// Shorthand for a text cell
pub fn text(value: &str) -> SqlValue {
	SqlValue::Text(value.to_string())
}
