//! # Eager-Load Orchestrator
//!
//! Populates declared relationships for a batch of instances via
//! additional batched queries, avoiding one query per instance.
//!
//! Requested paths are grouped by their first segment, so `"b.c"` and
//! `"b.d"` fetch `b` once and then recurse into `c` and `d` against the
//! same fetched set. Nested recursion regroups by concrete model first,
//! which also handles the polymorphic fan-out after a `morph_to` hop.
//!
//! Every load is routed through the dedup registry: relations already
//! marked loaded are skipped, and overlapping concurrent requests for
//! the same `(object set, relation)` key collapse into a single fetch.

mod registry;
mod strategies;

pub use registry::{LoadState, RequestKey};
pub use strategies::IN_CHUNK_SIZE;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::model::{InstanceHandle, ModelMeta};
use crate::query::RefineFn;
use crate::value::KeyValue;
use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use std::sync::Arc;

/// One requested relation path: dot-delimited for nesting, colon-suffixed
/// for column restriction, optionally refined by a callback applied to
/// the relation query before it runs
#[derive(Clone)]
pub struct EagerSpec {
	path: String,
	refine: Option<RefineFn>,
}

impl EagerSpec {
	/// # Examples
	///
	/// ```
	/// use grappelli::EagerSpec;
	///
	/// let spec = EagerSpec::new("posts.comments:id,body");
	/// assert_eq!(spec.path(), "posts.comments:id,body");
	/// ```
	pub fn new(path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			refine: None,
		}
	}

	pub fn refined(
		path: impl Into<String>,
		refine: impl Fn(crate::QueryBuilder) -> crate::QueryBuilder + Send + Sync + 'static,
	) -> Self {
		Self {
			path: path.into(),
			refine: Some(Arc::new(refine)),
		}
	}

	pub fn path(&self) -> &str {
		&self.path
	}
}

impl From<&str> for EagerSpec {
	fn from(path: &str) -> Self {
		Self::new(path)
	}
}

impl From<String> for EagerSpec {
	fn from(path: String) -> Self {
		Self::new(path)
	}
}

/// Merged view of every spec sharing one head relation name
#[derive(Default)]
struct PathGroup {
	columns: Option<Vec<String>>,
	saw_unrestricted: bool,
	refine: Option<RefineFn>,
	nested: Vec<EagerSpec>,
}

impl PathGroup {
	fn restriction(&self) -> Option<&[String]> {
		if self.saw_unrestricted {
			None
		} else {
			self.columns.as_deref()
		}
	}
}

/// Split a path into its head segment and the remaining nested path
fn split_head(path: &str) -> (&str, Option<&str>) {
	match path.split_once('.') {
		Some((head, rest)) => (head, Some(rest)),
		None => (path, None),
	}
}

/// Split a head segment into relation name and column restriction
fn split_columns(head: &str) -> (&str, Option<Vec<String>>) {
	match head.split_once(':') {
		Some((name, columns)) => {
			let columns: Vec<String> = columns
				.split(',')
				.map(str::trim)
				.filter(|c| !c.is_empty())
				.map(String::from)
				.collect();
			(name, Some(columns))
		}
		None => (head, None),
	}
}

fn group_paths(specs: &[EagerSpec]) -> IndexMap<String, PathGroup> {
	let mut groups: IndexMap<String, PathGroup> = IndexMap::new();
	for spec in specs {
		let (head, rest) = split_head(&spec.path);
		let (name, columns) = split_columns(head);
		let group = groups.entry(name.to_string()).or_default();

		match columns {
			Some(columns) => match &mut group.columns {
				Some(existing) => {
					for column in columns {
						if !existing.contains(&column) {
							existing.push(column);
						}
					}
				}
				None => group.columns = Some(columns),
			},
			None => group.saw_unrestricted = true,
		}

		match rest {
			// The refinement travels with the deepest segment of its path
			Some(rest) => group.nested.push(EagerSpec {
				path: rest.to_string(),
				refine: spec.refine.clone(),
			}),
			None => {
				if spec.refine.is_some() {
					group.refine = spec.refine.clone();
				}
			}
		}
	}
	groups
}

/// Batched relation loader bound to one engine
pub struct Loader {
	engine: Arc<Engine>,
}

impl Loader {
	pub(crate) fn new(engine: Arc<Engine>) -> Self {
		Self { engine }
	}

	/// Load the given relation paths onto a batch of instances.
	///
	/// Instances may span several models; they are regrouped per model
	/// before descriptors are resolved. Relations already concretely
	/// assigned everywhere (or marked loaded in the registry for every
	/// instance id) are not fetched again.
	pub async fn load<S>(&self, instances: &[InstanceHandle], specs: &[S]) -> Result<()>
	where
		S: Clone + Into<EagerSpec>,
	{
		let specs: Vec<EagerSpec> = specs.iter().cloned().map(Into::into).collect();
		self.load_set(instances.to_vec(), specs).await
	}

	fn load_set(
		&self,
		instances: Vec<InstanceHandle>,
		specs: Vec<EagerSpec>,
	) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			if instances.is_empty() || specs.is_empty() {
				return Ok(());
			}

			let mut by_model: IndexMap<String, Vec<InstanceHandle>> = IndexMap::new();
			for handle in instances {
				let model = handle.read().model().to_string();
				by_model.entry(model).or_default().push(handle);
			}

			for (model, group) in by_model {
				let meta = self.engine.registry().expect(&model)?;
				self.load_model_set(&meta, group, &specs).await?;
			}
			Ok(())
		})
	}

	async fn load_model_set(
		&self,
		meta: &Arc<ModelMeta>,
		instances: Vec<InstanceHandle>,
		specs: &[EagerSpec],
	) -> Result<()> {
		for (name, group) in group_paths(specs) {
			self.ensure_loaded(meta, &instances, &name, &group).await?;

			if group.nested.is_empty() {
				continue;
			}
			// Recurse with the just-fetched related set as the new roots
			let children: Vec<InstanceHandle> = instances
				.iter()
				.filter_map(|handle| handle.read().relation(&name).map(|v| v.handles()))
				.flatten()
				.collect();
			if !children.is_empty() {
				self.load_set(children, group.nested.clone()).await?;
			}
		}
		Ok(())
	}

	/// Fetch one relation for the instance set unless bookkeeping says
	/// it is already populated, collapsing concurrent duplicates into a
	/// single underlying fetch
	async fn ensure_loaded(
		&self,
		meta: &Arc<ModelMeta>,
		instances: &[InstanceHandle],
		name: &str,
		group: &PathGroup,
	) -> Result<()> {
		// Concretely assigned everywhere: nothing to fetch
		if instances
			.iter()
			.all(|handle| handle.read().relation_loaded(name))
		{
			return Ok(());
		}

		let ids: Vec<KeyValue> = instances
			.iter()
			.filter_map(|handle| handle.read().key_of(meta.primary_key()))
			.collect();
		let state = self.engine.load_state();

		// The id-keyed registry covers logical rows refetched as fresh
		// objects: if every id is marked, the relation set was already
		// populated once and is not fetched again
		if !ids.is_empty() && ids.len() == instances.len() && state.all_loaded(meta.name(), &ids, name)
		{
			return Ok(());
		}

		let descriptor = meta.relation(name)?;
		let key = RequestKey::new(meta.name(), ids, vec![name.to_string()]);

		let (pending, token) = state.join_or_start(&key, || {
			let engine = Arc::clone(&self.engine);
			let meta = Arc::clone(meta);
			let name = name.to_string();
			let descriptor = descriptor.clone();
			let instances = instances.to_vec();
			let columns = group.restriction().map(<[String]>::to_vec);
			let refine = group.refine.clone();
			async move {
				tracing::debug!(
					target: "grappelli::loader",
					model = meta.name(),
					relation = %name,
					instances = instances.len(),
					"eager load started"
				);
				let outcome = strategies::fetch_relation(
					&engine,
					&meta,
					&name,
					&descriptor,
					&instances,
					columns.as_deref(),
					refine.as_ref(),
				)
				.await;
				match outcome {
					Ok(related) => {
						let ids: Vec<KeyValue> = instances
							.iter()
							.filter_map(|handle| handle.read().key_of(meta.primary_key()))
							.collect();
						engine.load_state().mark_loaded(meta.name(), ids, &name);
						tracing::debug!(
							target: "grappelli::loader",
							model = meta.name(),
							relation = %name,
							related = related.len(),
							"eager load complete"
						);
						Ok(())
					}
					Err(err) => Err(Arc::new(err)),
				}
			}
			.boxed()
		});

		let outcome = pending.await;
		// Settled either way: a failed key must be retryable
		state.settle(&key, token);
		outcome.map_err(|err| Error::shared(&err))
	}
}
