//! # Grappelli
//!
//! Read-only relational query engine with batched relationship loading.
//!
//! This crate combines:
//! - **Condition Trees**: Recursive boolean predicates compiled into
//!   WHERE/HAVING clauses with positional parameter binding
//! - **Query Builder**: Chainable SELECT specification with joins,
//!   grouping, unions, soft-delete scoping and relation subqueries
//! - **Relation Descriptors**: Declarative relationship metadata resolved
//!   statically, without touching data
//! - **Eager Loader**: N+1-avoiding batched fetch strategies per
//!   relationship kind, with nested path recursion and polymorphic
//!   fan-out
//! - **Load Dedup**: Bookkeeping of already-populated relations and an
//!   in-flight table collapsing concurrent duplicate loads into one fetch
//!
//! There is deliberately no write path: the engine compiles SELECT
//! statements only, and a read-only guard rejects anything else, both on
//! raw condition fragments and on every fully compiled statement.
//!
//! The physical connection stays outside the crate. Applications inject
//! an implementation of [`DatabaseExecutor`]; the engine only ever hands
//! it compiled SQL text with an ordered parameter list.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use grappelli::{Engine, ModelMeta, ModelRegistry, RelationDescriptor};
//!
//! # async fn example(executor: Arc<dyn grappelli::DatabaseExecutor>) -> grappelli::Result<()> {
//! let registry = Arc::new(ModelRegistry::new());
//! registry.register(
//! 	ModelMeta::new("User", "users")
//! 		.with_relation("posts", RelationDescriptor::has_many("Post", "user_id", "id")),
//! );
//! registry.register(
//! 	ModelMeta::new("Post", "posts")
//! 		.with_relation("comments", RelationDescriptor::has_many("Comment", "post_id", "id")),
//! );
//! registry.register(ModelMeta::new("Comment", "comments"));
//!
//! let engine = Engine::new(registry);
//! engine.set_executor(executor);
//!
//! // One query for users, one for posts, one for comments
//! let users = engine
//! 	.fetch_all(
//! 		&engine
//! 			.query("User")?
//! 			.filter("active", "=", true)
//! 			.with("posts.comments"),
//! 	)
//! 	.await?;
//! # Ok(())
//! # }
//! ```

pub mod condition;
pub mod engine;
pub mod error;
pub mod guard;
pub mod loader;
pub mod model;
pub mod query;
pub mod relations;
pub mod value;

pub use condition::{Combinator, ConditionNode, ConditionTree};
pub use engine::{DatabaseExecutor, Engine, RowHook};
pub use error::{Error, Result};
pub use loader::{EagerSpec, LoadState, Loader, RequestKey, IN_CHUNK_SIZE};
pub use model::{
	InstanceHandle, ModelInstance, ModelMeta, ModelRegistry, PivotData, RelationValue,
};
pub use query::{
	JoinClause, JoinKind, OrderDirection, OrderTerm, QueryBuilder, RefineFn, SoftDeleteMode,
};
pub use relations::{OfManyAggregate, RelationBuilder, RelationDescriptor, RelationKind};
pub use value::{KeyValue, QueryRow, SqlValue};
