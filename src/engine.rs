//! # Engine
//!
//! Entry point tying the pieces together: the injected database executor
//! capability, the model registry, the row hook and the load state shared
//! by every loader.
//!
//! The engine never opens or configures a connection. It receives one,
//! pre-established, as an opaque [`DatabaseExecutor`] and fails with
//! [`Error::ConnectionNotReady`] when none has been set.

use crate::error::{Error, Result};
use crate::guard;
use crate::loader::{LoadState, Loader};
use crate::model::{InstanceHandle, ModelInstance, ModelMeta, ModelRegistry};
use crate::query::QueryBuilder;
use crate::value::{QueryRow, SqlValue};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Injected connection capability: the only way SQL leaves this crate.
///
/// Implementations wrap whatever driver the application uses; the engine
/// only ever hands them compiled SELECT text with positional parameters.
#[async_trait]
pub trait DatabaseExecutor: Send + Sync {
	async fn query(
		&self,
		sql: &str,
		params: &[SqlValue],
	) -> std::result::Result<Vec<QueryRow>, anyhow::Error>;
}

/// Optional validation/cast hook applied to each raw row after fetch and
/// before hydration
pub trait RowHook: Send + Sync {
	fn apply(&self, meta: &ModelMeta, row: &mut QueryRow) -> Result<()>;
}

/// Read-only query engine
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use grappelli::{Engine, ModelMeta, ModelRegistry, RelationDescriptor};
///
/// # async fn example() -> grappelli::Result<()> {
/// let registry = Arc::new(ModelRegistry::new());
/// registry.register(
/// 	ModelMeta::new("User", "users")
/// 		.with_relation("posts", RelationDescriptor::has_many("Post", "user_id", "id")),
/// );
/// registry.register(ModelMeta::new("Post", "posts"));
///
/// let engine = Engine::new(registry);
/// # let executor: Arc<dyn grappelli::DatabaseExecutor> = unimplemented!();
/// engine.set_executor(executor);
///
/// let users = engine
/// 	.fetch_all(&engine.query("User")?.filter("active", "=", true).with("posts"))
/// 	.await?;
/// # Ok(())
/// # }
/// ```
pub struct Engine {
	registry: Arc<ModelRegistry>,
	executor: RwLock<Option<Arc<dyn DatabaseExecutor>>>,
	row_hook: RwLock<Option<Arc<dyn RowHook>>>,
	load_state: Arc<LoadState>,
}

impl Engine {
	pub fn new(registry: Arc<ModelRegistry>) -> Arc<Self> {
		Arc::new(Self {
			registry,
			executor: RwLock::new(None),
			row_hook: RwLock::new(None),
			load_state: Arc::new(LoadState::new()),
		})
	}

	pub fn registry(&self) -> &Arc<ModelRegistry> {
		&self.registry
	}

	pub(crate) fn load_state(&self) -> &Arc<LoadState> {
		&self.load_state
	}

	/// Inject the pre-established connection capability
	pub fn set_executor(&self, executor: Arc<dyn DatabaseExecutor>) {
		*self.executor.write() = Some(executor);
	}

	/// Install a row validation/cast hook
	pub fn set_row_hook(&self, hook: Arc<dyn RowHook>) {
		*self.row_hook.write() = Some(hook);
	}

	fn executor(&self) -> Result<Arc<dyn DatabaseExecutor>> {
		self.executor.read().clone().ok_or(Error::ConnectionNotReady)
	}

	/// Start a query against a registered model
	pub fn query(&self, model: &str) -> Result<QueryBuilder> {
		QueryBuilder::for_model(&self.registry, model)
	}

	/// The loader bound to this engine's registry and load state
	pub fn loader(self: &Arc<Self>) -> Loader {
		Loader::new(Arc::clone(self))
	}

	/// Run compiled SQL through the executor. The statement passes the
	/// read-only guard again immediately before dispatch.
	pub async fn run(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<QueryRow>> {
		guard::check_statement(sql)?;
		let executor = self.executor()?;
		debug!(
			target: "grappelli::engine",
			sql,
			params = params.len(),
			"executing query"
		);
		let rows = executor.query(sql, params).await.map_err(Error::Database)?;
		debug!(target: "grappelli::engine", rows = rows.len(), "query complete");
		Ok(rows)
	}

	/// Compile and run a builder, applying the row hook for `meta`
	pub(crate) async fn run_for_model(
		&self,
		meta: &ModelMeta,
		builder: &QueryBuilder,
	) -> Result<Vec<QueryRow>> {
		let (sql, params) = builder.compile()?;
		let mut rows = self.run(&sql, &params).await?;
		if let Some(hook) = self.row_hook.read().clone() {
			for row in &mut rows {
				hook.apply(meta, row)?;
			}
		}
		Ok(rows)
	}

	/// Fetch every matching row as hydrated instances, then eager-load
	/// any relation paths requested on the builder
	pub async fn fetch_all(self: &Arc<Self>, builder: &QueryBuilder) -> Result<Vec<InstanceHandle>> {
		let meta = builder
			.model_meta()
			.cloned()
			.ok_or_else(|| Error::QueryBuild(
				"fetching instances requires a model-backed query".to_string(),
			))?;
		let rows = self.run_for_model(&meta, builder).await?;
		let instances: Vec<InstanceHandle> = rows
			.into_iter()
			.map(|row| ModelInstance::from_row(meta.name(), row).into_handle())
			.collect();
		if !builder.eager_specs().is_empty() {
			self.loader()
				.load(&instances, builder.eager_specs())
				.await?;
		}
		Ok(instances)
	}

	/// Fetch the first matching row, if any
	pub async fn fetch_first(
		self: &Arc<Self>,
		builder: &QueryBuilder,
	) -> Result<Option<InstanceHandle>> {
		let mut instances = self.fetch_all(&builder.clone().limit(1)).await?;
		Ok(if instances.is_empty() {
			None
		} else {
			Some(instances.remove(0))
		})
	}

	/// Count matching rows without hydrating them
	pub async fn count(&self, builder: &QueryBuilder) -> Result<i64> {
		let (sql, params) = builder.for_count().compile()?;
		let rows = self.run(&sql, &params).await?;
		rows.first()
			.and_then(|row| row.get("aggregate"))
			.and_then(SqlValue::as_integer)
			.ok_or_else(|| Error::QueryBuild("count query returned no aggregate".to_string()))
	}

	pub async fn exists(&self, builder: &QueryBuilder) -> Result<bool> {
		Ok(self.count(builder).await? > 0)
	}

	/// Load relation paths onto already-fetched instances
	pub async fn load<S>(self: &Arc<Self>, instances: &[InstanceHandle], paths: &[S]) -> Result<()>
	where
		S: Clone + Into<crate::loader::EagerSpec>,
	{
		self.loader().load(instances, paths).await
	}
}
