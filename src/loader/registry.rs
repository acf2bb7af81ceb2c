//! # Load Registry and In-Flight Table
//!
//! Bookkeeping for the eager loader: which `(model, id, relation)`
//! triples are already populated, and which `(object set, relation set)`
//! requests are currently being fetched.
//!
//! Both tables live behind one mutex so check-then-act sequences stay
//! atomic under real threads; the pending handle is always inserted
//! before its future is first polled, so a second caller arriving before
//! the fetch's first suspension still joins the in-flight entry.
//!
//! Registry entries grow monotonically and are never evicted; the
//! in-flight table is cleared as each fetch settles.

use crate::error::Error;
use crate::value::KeyValue;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Shared handle to a pending load; every caller awaiting the same key
/// observes the same settlement
pub(crate) type SharedLoad = Shared<BoxFuture<'static, Result<(), Arc<Error>>>>;

/// Structured composite key for one load request: model name, sorted
/// deduplicated instance ids, sorted deduplicated relation names
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
	model: String,
	ids: Vec<KeyValue>,
	relations: Vec<String>,
}

impl RequestKey {
	pub fn new(
		model: impl Into<String>,
		mut ids: Vec<KeyValue>,
		mut relations: Vec<String>,
	) -> Self {
		ids.sort();
		ids.dedup();
		relations.sort();
		relations.dedup();
		Self {
			model: model.into(),
			ids,
			relations,
		}
	}
}

#[derive(Default)]
struct LoadStateInner {
	loaded: HashMap<(String, KeyValue), HashSet<String>>,
	inflight: HashMap<RequestKey, (u64, SharedLoad)>,
	next_token: u64,
}

/// Process-wide load bookkeeping, shared by every loader of an engine
#[derive(Default)]
pub struct LoadState {
	inner: Mutex<LoadStateInner>,
}

impl LoadState {
	pub fn new() -> Self {
		Self::default()
	}

	/// Whether `relation` is marked populated for one instance id
	pub fn is_loaded(&self, model: &str, id: &KeyValue, relation: &str) -> bool {
		self.inner
			.lock()
			.loaded
			.get(&(model.to_string(), id.clone()))
			.is_some_and(|relations| relations.contains(relation))
	}

	/// Whether `relation` is marked populated for every id in the set.
	/// An empty id set counts as loaded: there is nothing to fetch.
	pub fn all_loaded(&self, model: &str, ids: &[KeyValue], relation: &str) -> bool {
		let inner = self.inner.lock();
		ids.iter().all(|id| {
			inner
				.loaded
				.get(&(model.to_string(), id.clone()))
				.is_some_and(|relations| relations.contains(relation))
		})
	}

	/// Mark `relation` populated for the given instance ids
	pub fn mark_loaded<I>(&self, model: &str, ids: I, relation: &str)
	where
		I: IntoIterator<Item = KeyValue>,
	{
		let mut inner = self.inner.lock();
		for id in ids {
			inner
				.loaded
				.entry((model.to_string(), id))
				.or_default()
				.insert(relation.to_string());
		}
	}

	/// Join an in-flight load for `key`, or start one from `make`.
	///
	/// Returns the shared handle plus the entry token identifying the
	/// stored handle; pass the token to [`settle`](Self::settle) once the
	/// await completes. The insertion happens under the table lock and
	/// before the future is first polled, so no second fetch for the same
	/// key can start while one is pending.
	pub(crate) fn join_or_start(
		&self,
		key: &RequestKey,
		make: impl FnOnce() -> BoxFuture<'static, Result<(), Arc<Error>>>,
	) -> (SharedLoad, u64) {
		let mut inner = self.inner.lock();
		if let Some((token, pending)) = inner.inflight.get(key) {
			return (pending.clone(), *token);
		}
		inner.next_token += 1;
		let token = inner.next_token;
		let pending = make().shared();
		inner.inflight.insert(key.clone(), (token, pending.clone()));
		(pending, token)
	}

	/// Remove the in-flight entry once its fetch has settled. Callers
	/// all attempt this after awaiting; only the matching token removes,
	/// so a newer request under the same key is never clobbered.
	pub(crate) fn settle(&self, key: &RequestKey, token: u64) {
		let mut inner = self.inner.lock();
		if inner
			.inflight
			.get(key)
			.is_some_and(|(stored, _)| *stored == token)
		{
			inner.inflight.remove(key);
		}
	}

	#[cfg(test)]
	pub(crate) fn inflight_len(&self) -> usize {
		self.inner.lock().inflight.len()
	}
}
