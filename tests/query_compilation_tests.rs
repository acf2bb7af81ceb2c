//! Query Compilation Tests
//!
//! End-to-end statement compilation: parameter ordering across clauses,
//! union composition, deep-copy clone semantics and the aggregate
//! helpers that run through the engine.

mod common;

use common::{int, row, ScriptedExecutor};
use grappelli::{
	Engine, Error, ModelMeta, ModelRegistry, QueryBuilder, SqlValue,
};
use std::sync::Arc;

#[test]
fn test_parameters_are_numbered_across_every_clause() {
	let (sql, params) = QueryBuilder::table("orders")
		.select(["user_id", "SUM(total) AS spent"])
		.filter("status", "=", "paid")
		.filter_between("placed_at", 10i64, 20i64)
		.group_by(["user_id"])
		.having("SUM(total)", ">", 100i64)
		.compile()
		.unwrap();
	assert_eq!(
		sql,
		"SELECT user_id, SUM(total) AS spent FROM orders \
		 WHERE status = $1 AND placed_at BETWEEN $2 AND $3 \
		 GROUP BY user_id HAVING SUM(total) > $4"
	);
	assert_eq!(
		params,
		vec![
			SqlValue::Text("paid".into()),
			SqlValue::Integer(10),
			SqlValue::Integer(20),
			SqlValue::Integer(100),
		]
	);
}

#[test]
fn test_union_parameters_continue_across_branches() {
	let branch = QueryBuilder::table("guests").filter_in(
		"region",
		vec![SqlValue::Text("eu".into()), SqlValue::Text("us".into())],
	);
	let (sql, params) = QueryBuilder::table("users")
		.filter("active", "=", true)
		.union(branch)
		.order_by_desc("id")
		.offset(5)
		.compile()
		.unwrap();
	assert_eq!(
		sql,
		"SELECT * FROM users WHERE active = $1 \
		 UNION SELECT * FROM guests WHERE region IN ($2, $3) \
		 ORDER BY id DESC OFFSET 5"
	);
	assert_eq!(params.len(), 3);
}

#[test]
fn test_nested_union_branches_compile_flat() {
	let inner = QueryBuilder::table("c").filter("x", "=", 3i64);
	let middle = QueryBuilder::table("b")
		.filter("x", "=", 2i64)
		.union_all(inner);
	let (sql, params) = QueryBuilder::table("a")
		.filter("x", "=", 1i64)
		.union(middle)
		.compile()
		.unwrap();
	assert_eq!(
		sql,
		"SELECT * FROM a WHERE x = $1 \
		 UNION SELECT * FROM b WHERE x = $2 \
		 UNION ALL SELECT * FROM c WHERE x = $3"
	);
	assert_eq!(params.len(), 3);
}

#[test]
fn test_clone_is_a_deep_copy_of_trees_and_branches() {
	let original = QueryBuilder::table("users")
		.filter("age", ">", 18i64)
		.union(QueryBuilder::table("guests").filter("age", ">", 21i64));
	let compiled = original.compile().unwrap();

	let clone = original.clone();
	assert_eq!(clone.compile().unwrap(), compiled);

	// Mutating the clone (including inside a union branch) never
	// touches the original's compiled output
	let _mutated = clone
		.filter_group(|g| {
			g.and_null("deleted_at");
		})
		.union_all(QueryBuilder::table("bots"));
	assert_eq!(original.compile().unwrap(), compiled);
}

#[test]
fn test_distinct_select_with_limit_and_offset() {
	let (sql, _) = QueryBuilder::table("events")
		.select(["kind"])
		.distinct()
		.order_by("kind")
		.limit(100)
		.offset(200)
		.compile()
		.unwrap();
	assert_eq!(
		sql,
		"SELECT DISTINCT kind FROM events ORDER BY kind ASC LIMIT 100 OFFSET 200"
	);
}

#[test]
fn test_raw_having_fragment_is_guarded() {
	let result = QueryBuilder::table("orders")
		.group_by(["user_id"])
		.having_raw("SUM(total) > ?; TRUNCATE orders", vec![SqlValue::Integer(10)])
		.compile();
	assert!(matches!(result, Err(Error::ReadOnlyViolation(_))));
}

#[tokio::test]
async fn test_count_strips_ordering_and_reads_the_aggregate() {
	let registry = Arc::new(ModelRegistry::new());
	registry.register(ModelMeta::new("Author", "authors"));
	let engine = Engine::new(registry);
	let executor = Arc::new(ScriptedExecutor::new());
	engine.set_executor(executor.clone());
	executor.push_rows(vec![row(&[("aggregate", int(42))])]);

	let builder = engine
		.query("Author")
		.unwrap()
		.filter("name", "LIKE", "a%")
		.order_by("name")
		.limit(10);
	let count = engine.count(&builder).await.unwrap();

	assert_eq!(count, 42);
	assert_eq!(
		executor.calls()[0].0,
		"SELECT COUNT(*) AS aggregate FROM authors WHERE name LIKE $1"
	);
}

#[tokio::test]
async fn test_exists_is_a_counted_probe() {
	let registry = Arc::new(ModelRegistry::new());
	registry.register(ModelMeta::new("Author", "authors"));
	let engine = Engine::new(registry);
	let executor = Arc::new(ScriptedExecutor::new());
	engine.set_executor(executor.clone());
	executor.push_rows(vec![row(&[("aggregate", int(0))])]);

	let builder = engine.query("Author").unwrap().filter("id", "=", 7i64);
	assert!(!engine.exists(&builder).await.unwrap());
}

#[tokio::test]
async fn test_fetch_first_applies_a_limit() {
	let registry = Arc::new(ModelRegistry::new());
	registry.register(ModelMeta::new("Author", "authors"));
	let engine = Engine::new(registry);
	let executor = Arc::new(ScriptedExecutor::new());
	engine.set_executor(executor.clone());
	executor.push_rows(vec![row(&[("id", int(1))])]);

	let first = engine
		.fetch_first(&engine.query("Author").unwrap().order_by("id"))
		.await
		.unwrap();

	assert!(first.is_some());
	assert_eq!(
		executor.calls()[0].0,
		"SELECT * FROM authors ORDER BY id ASC LIMIT 1"
	);
}
