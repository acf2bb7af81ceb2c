//! # Error Types
//!
//! Error taxonomy for query compilation, relation resolution and loading.
//!
//! Construction-time failures (malformed relation usage, read-only
//! violations) are surfaced synchronously to the immediate caller.
//! Executor failures propagate unmodified inside [`Error::Database`].

use std::sync::Arc;

/// Errors that can occur while compiling queries or loading relations
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// A compiled statement or raw fragment attempted something other
	/// than a plain SELECT (write keyword, semicolon, non-SELECT text)
	#[error("read-only violation: {0}")]
	ReadOnlyViolation(String),

	/// A relation name was requested that the model does not declare
	#[error("relation `{relation}` is not defined on model `{model}`")]
	RelationNotFound { model: String, relation: String },

	/// An operation was applied to a relation of the wrong kind
	#[error("relation `{relation}` is {actual}, expected {expected}")]
	RelationKindMismatch {
		relation: String,
		expected: &'static str,
		actual: &'static str,
	},

	/// A stored morph type tag has no registered concrete model
	#[error("no model registered for morph type `{0}`")]
	PolymorphicModelUnresolved(String),

	/// No database executor has been injected into the engine
	#[error("no database executor configured")]
	ConnectionNotReady,

	/// Query building error
	#[error("query building error: {0}")]
	QueryBuild(String),

	/// Error propagated from the injected database executor
	#[error("database error: {0}")]
	Database(#[from] anyhow::Error),

	/// A failure observed through a deduplicated in-flight load. The
	/// original error is shared by every caller that awaited the same
	/// pending fetch.
	#[error(transparent)]
	Shared(Arc<Error>),
}

impl Error {
	/// Wrap a shared in-flight failure for delivery to one caller
	pub(crate) fn shared(err: &Arc<Error>) -> Self {
		Self::Shared(Arc::clone(err))
	}
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;
