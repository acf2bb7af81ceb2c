//! Eager Loading Tests
//!
//! Batched relationship loading against a scripted executor, covering
//! each relationship kind's fetch strategy and assignment.
//!
//! **Test Coverage:**
//! - Batching: one `IN` query per relation, not one query per instance
//! - Nested Paths: `"a.b"` recursion scoped to actually-fetched parents
//! - Many-to-many: pivot projection and per-parent pivot attribution
//! - Polymorphic: alias fan-out, unregistered-type null handling
//! - Through relations: intermediate-table join and attribution
//! - Column restriction and refinement callbacks

mod common;

use common::{int, row, text, ScriptedExecutor};
use grappelli::{
	EagerSpec, Engine, InstanceHandle, ModelInstance, ModelMeta, ModelRegistry, OfManyAggregate,
	RelationDescriptor, SqlValue,
};
use std::sync::Arc;

fn library_registry() -> Arc<ModelRegistry> {
	let registry = Arc::new(ModelRegistry::new());
	registry.register(
		ModelMeta::new("Author", "authors")
			.with_relation("books", RelationDescriptor::has_many("Book", "author_id", "id")),
	);
	registry.register(
		ModelMeta::new("Book", "books")
			.with_relation("author", RelationDescriptor::belongs_to("Author", "author_id", "id"))
			.with_relation("reviews", RelationDescriptor::has_many("Review", "book_id", "id"))
			.with_relation(
				"tags",
				RelationDescriptor::belongs_to_many("Tag", "books_tags", "book_id", "tag_id")
					.with_pivot_columns(["note", "added_by"]),
			),
	);
	registry.register(ModelMeta::new("Review", "reviews"));
	registry.register(ModelMeta::new("Tag", "tags"));
	registry
}

fn engine_with(registry: Arc<ModelRegistry>) -> (Arc<Engine>, Arc<ScriptedExecutor>) {
	let engine = Engine::new(registry);
	let executor = Arc::new(ScriptedExecutor::new());
	engine.set_executor(executor.clone());
	(engine, executor)
}

fn instance(model: &str, pairs: &[(&str, SqlValue)]) -> InstanceHandle {
	ModelInstance::from_row(model, row(pairs)).into_handle()
}

fn authors(ids: &[i64]) -> Vec<InstanceHandle> {
	ids.iter()
		.map(|&id| instance("Author", &[("id", int(id))]))
		.collect()
}

#[tokio::test]
async fn test_has_many_issues_one_batched_fetch() {
	let (engine, executor) = engine_with(library_registry());
	let parents = authors(&[1, 2, 3]);
	executor.push_rows(vec![
		row(&[("id", int(10)), ("author_id", int(1)), ("title", text("Ten"))]),
		row(&[("id", int(11)), ("author_id", int(1)), ("title", text("Eleven"))]),
		row(&[("id", int(12)), ("author_id", int(2)), ("title", text("Twelve"))]),
	]);

	engine.loader().load(&parents, &["books"]).await.unwrap();

	let calls = executor.calls();
	assert_eq!(calls.len(), 1);
	assert_eq!(calls[0].0, "SELECT * FROM books WHERE author_id IN ($1, $2, $3)");
	assert_eq!(calls[0].1, vec![int(1), int(2), int(3)]);

	let first = parents[0].read();
	let books = first.relation("books").unwrap().as_many();
	let ids: Vec<_> = books
		.iter()
		.map(|b| b.read().get("id").cloned().unwrap())
		.collect();
	assert_eq!(ids, vec![int(10), int(11)]);

	// Parents without matches still end up concretely populated
	let third = parents[2].read();
	assert!(third.relation("books").unwrap().as_many().is_empty());
}

#[tokio::test]
async fn test_belongs_to_deduplicates_foreign_keys() {
	let (engine, executor) = engine_with(library_registry());
	let books = vec![
		instance("Book", &[("id", int(10)), ("author_id", int(1))]),
		instance("Book", &[("id", int(11)), ("author_id", int(1))]),
		instance("Book", &[("id", int(12)), ("author_id", int(2))]),
	];
	executor.push_rows(vec![
		row(&[("id", int(1)), ("name", text("Anna"))]),
		row(&[("id", int(2)), ("name", text("Ben"))]),
	]);

	engine.loader().load(&books, &["author"]).await.unwrap();

	let calls = executor.calls();
	assert_eq!(calls.len(), 1);
	assert_eq!(calls[0].0, "SELECT * FROM authors WHERE id IN ($1, $2)");
	assert_eq!(calls[0].1, vec![int(1), int(2)]);

	let author = books[0].read().relation("author").unwrap().as_one().cloned();
	assert_eq!(
		author.unwrap().read().get("name"),
		Some(&text("Anna"))
	);
}

#[tokio::test]
async fn test_nested_path_only_fetches_for_returned_parents() {
	let (engine, executor) = engine_with(library_registry());
	let parents = authors(&[1, 2]);
	executor.push_rows(vec![
		row(&[("id", int(10)), ("author_id", int(1))]),
		row(&[("id", int(11)), ("author_id", int(2))]),
	]);
	executor.push_rows(vec![
		row(&[("id", int(100)), ("book_id", int(10)), ("stars", int(5))]),
		row(&[("id", int(101)), ("book_id", int(10)), ("stars", int(3))]),
	]);

	engine.loader().load(&parents, &["books.reviews"]).await.unwrap();

	let calls = executor.calls();
	assert_eq!(calls.len(), 2);
	// Reviews are fetched only for the books actually returned
	assert_eq!(calls[1].0, "SELECT * FROM reviews WHERE book_id IN ($1, $2)");
	assert_eq!(calls[1].1, vec![int(10), int(11)]);

	let first = parents[0].read();
	let book = first.relation("books").unwrap().as_many()[0].clone();
	drop(first);
	let book = book.read();
	assert_eq!(book.relation("reviews").unwrap().as_many().len(), 2);
}

#[tokio::test]
async fn test_shared_head_is_fetched_once_for_sibling_paths() {
	let (engine, executor) = engine_with(library_registry());
	let parents = authors(&[1]);
	executor.push_rows(vec![row(&[("id", int(10)), ("author_id", int(1))])]);
	// reviews, then author (group order follows request order)
	executor.push_rows(vec![row(&[("id", int(100)), ("book_id", int(10))])]);
	executor.push_rows(vec![row(&[("id", int(1)), ("name", text("Anna"))])]);

	engine
		.loader()
		.load(&parents, &["books.reviews", "books.author"])
		.await
		.unwrap();

	// One fetch for books, then one per nested relation
	assert_eq!(executor.call_count(), 3);
	assert!(executor.calls()[0].0.starts_with("SELECT * FROM books"));
}

#[tokio::test]
async fn test_belongs_to_many_attributes_pivot_data_per_parent() {
	let (engine, executor) = engine_with(library_registry());
	let books = vec![
		instance("Book", &[("id", int(1))]),
		instance("Book", &[("id", int(2))]),
	];
	// The same tag row is attached to both parents with different notes
	executor.push_rows(vec![
		row(&[
			("id", int(7)),
			("name", text("rust")),
			("pivot_book_id", int(1)),
			("pivot_note", text("first")),
			("pivot_added_by", int(5)),
		]),
		row(&[
			("id", int(7)),
			("name", text("rust")),
			("pivot_book_id", int(2)),
			("pivot_note", text("second")),
			("pivot_added_by", int(6)),
		]),
	]);

	engine.loader().load(&books, &["tags"]).await.unwrap();

	let calls = executor.calls();
	assert_eq!(calls.len(), 1);
	assert_eq!(
		calls[0].0,
		"SELECT tags.*, books_tags.book_id AS pivot_book_id, \
		 books_tags.note AS pivot_note, books_tags.added_by AS pivot_added_by \
		 FROM tags INNER JOIN books_tags ON books_tags.tag_id = tags.id \
		 WHERE books_tags.book_id IN ($1, $2)"
	);

	for (book, expected_note) in books.iter().zip(["first", "second"]) {
		let book = book.read();
		let tags = book.relation("tags").unwrap().as_many().to_vec();
		assert_eq!(tags.len(), 1);
		let tag = tags[0].read();
		// Pivot aliases are stripped from the attributes
		assert_eq!(tag.get("pivot_note"), None);
		let pivot = tag.pivot().unwrap();
		assert_eq!(pivot.accessor, "pivot");
		let keys: Vec<_> = pivot.values.keys().map(String::as_str).collect();
		assert_eq!(keys, vec!["note", "added_by"]);
		assert_eq!(pivot.values["note"], text(expected_note));
	}
}

#[tokio::test]
async fn test_morph_many_fans_out_over_registered_aliases() {
	let registry = Arc::new(ModelRegistry::new());
	registry.register(
		ModelMeta::new("Post", "posts")
			.with_relation("comments", RelationDescriptor::morph_many("Comment", "commentable")),
	);
	registry.register(ModelMeta::new("Comment", "comments"));
	registry.register_morph_alias("post", "Post");
	registry.register_morph_alias("article", "Post");
	let (engine, executor) = engine_with(registry);

	let posts = vec![instance("Post", &[("id", int(1))])];
	executor.push_rows(vec![row(&[
		("id", int(50)),
		("commentable_id", int(1)),
		("commentable_type", text("article")),
	])]);

	engine.loader().load(&posts, &["comments"]).await.unwrap();

	let calls = executor.calls();
	assert_eq!(
		calls[0].0,
		"SELECT * FROM comments WHERE commentable_type IN ($1, $2, $3) \
		 AND commentable_id IN ($4)"
	);
	// Every alias the model is known under, plus its own name
	assert_eq!(
		calls[0].1,
		vec![text("article"), text("post"), text("Post"), int(1)]
	);
	assert_eq!(
		posts[0].read().relation("comments").unwrap().as_many().len(),
		1
	);
}

#[tokio::test]
async fn test_morph_many_against_unregistered_subtype_assigns_empty() {
	let registry = Arc::new(ModelRegistry::new());
	// Video is registered as a model but absent from the morph registry
	registry.register(
		ModelMeta::new("Video", "videos")
			.with_relation("comments", RelationDescriptor::morph_many("Comment", "commentable")),
	);
	registry.register(ModelMeta::new("Comment", "comments"));
	let (engine, executor) = engine_with(registry);

	let videos = vec![
		instance("Video", &[("id", int(1))]),
		instance("Video", &[("id", int(2))]),
	];
	executor.push_rows(vec![]);

	engine.loader().load(&videos, &["comments"]).await.unwrap();

	for video in &videos {
		let video = video.read();
		assert!(video.relation("comments").unwrap().as_many().is_empty());
	}
}

#[tokio::test]
async fn test_morph_to_groups_by_type_and_nulls_unresolved_tags() {
	let registry = Arc::new(ModelRegistry::new());
	registry.register(
		ModelMeta::new("Comment", "comments")
			.with_relation("commentable", RelationDescriptor::morph_to("commentable")),
	);
	registry.register(ModelMeta::new("Post", "posts"));
	registry.register_morph_alias("post", "Post");
	let (engine, executor) = engine_with(registry);

	let comments = vec![
		instance(
			"Comment",
			&[
				("id", int(1)),
				("commentable_type", text("post")),
				("commentable_id", int(10)),
			],
		),
		instance(
			"Comment",
			&[
				("id", int(2)),
				("commentable_type", text("ghost")),
				("commentable_id", int(99)),
			],
		),
		instance(
			"Comment",
			&[
				("id", int(3)),
				("commentable_type", text("post")),
				("commentable_id", int(11)),
			],
		),
	];
	executor.push_rows(vec![
		row(&[("id", int(10)), ("title", text("Ten"))]),
		row(&[("id", int(11)), ("title", text("Eleven"))]),
	]);

	engine.loader().load(&comments, &["commentable"]).await.unwrap();

	// One batched fetch for the resolvable type; none for the ghost tag
	let calls = executor.calls();
	assert_eq!(calls.len(), 1);
	assert_eq!(calls[0].0, "SELECT * FROM posts WHERE id IN ($1, $2)");
	assert_eq!(calls[0].1, vec![int(10), int(11)]);

	assert!(comments[0].read().relation("commentable").unwrap().as_one().is_some());
	assert!(comments[1].read().relation("commentable").unwrap().as_one().is_none());
	assert!(comments[2].read().relation("commentable").unwrap().as_one().is_some());
}

#[tokio::test]
async fn test_morph_one_of_many_adds_aggregate_constraint() {
	let registry = Arc::new(ModelRegistry::new());
	registry.register(ModelMeta::new("User", "users").with_relation(
		"latest_image",
		RelationDescriptor::morph_one_of_many(
			"Image",
			"imageable",
			"created_at",
			OfManyAggregate::Max,
		),
	));
	registry.register(ModelMeta::new("Image", "images"));
	let (engine, executor) = engine_with(registry);

	let users = vec![instance("User", &[("id", int(1))])];
	executor.push_rows(vec![row(&[
		("id", int(5)),
		("imageable_id", int(1)),
		("imageable_type", text("User")),
	])]);

	engine.loader().load(&users, &["latest_image"]).await.unwrap();

	let calls = executor.calls();
	assert_eq!(
		calls[0].0,
		"SELECT * FROM images WHERE imageable_type IN ($1) \
		 AND created_at = (SELECT MAX(created_at) FROM images AS of_many \
		 WHERE of_many.imageable_id = images.imageable_id \
		 AND of_many.imageable_type = images.imageable_type) \
		 AND imageable_id IN ($2)"
	);
	assert!(users[0].read().relation("latest_image").unwrap().as_one().is_some());
}

#[tokio::test]
async fn test_has_many_through_joins_the_intermediate_table() {
	let registry = Arc::new(ModelRegistry::new());
	registry.register(ModelMeta::new("Country", "countries").with_relation(
		"posts",
		RelationDescriptor::has_many_through("Post", "users", "country_id", "user_id"),
	));
	registry.register(ModelMeta::new("Post", "posts"));
	let (engine, executor) = engine_with(registry);

	let countries = vec![
		instance("Country", &[("id", int(1))]),
		instance("Country", &[("id", int(2))]),
	];
	executor.push_rows(vec![
		row(&[("id", int(100)), ("through_country_id", int(1))]),
		row(&[("id", int(101)), ("through_country_id", int(1))]),
	]);

	engine.loader().load(&countries, &["posts"]).await.unwrap();

	let calls = executor.calls();
	assert_eq!(
		calls[0].0,
		"SELECT posts.*, users.country_id AS through_country_id \
		 FROM posts INNER JOIN users ON users.id = posts.user_id \
		 WHERE users.country_id IN ($1, $2)"
	);

	let first = countries[0].read();
	let posts = first.relation("posts").unwrap().as_many();
	assert_eq!(posts.len(), 2);
	// The join alias used for attribution is not part of the instance
	assert_eq!(posts[0].read().get("through_country_id"), None);

	let second = countries[1].read();
	assert!(second.relation("posts").unwrap().as_many().is_empty());
}

#[tokio::test]
async fn test_column_restriction_keeps_matching_keys() {
	let (engine, executor) = engine_with(library_registry());
	let parents = authors(&[1]);
	executor.push_rows(vec![row(&[
		("title", text("Ten")),
		("author_id", int(1)),
		("id", int(10)),
	])]);

	engine.loader().load(&parents, &["books:title"]).await.unwrap();

	let calls = executor.calls();
	assert_eq!(
		calls[0].0,
		"SELECT title, author_id, id FROM books WHERE author_id IN ($1)"
	);
}

#[tokio::test]
async fn test_refinement_callback_constrains_the_relation_query() {
	let (engine, executor) = engine_with(library_registry());
	let parents = authors(&[1]);
	executor.push_rows(vec![row(&[
		("id", int(10)),
		("author_id", int(1)),
		("published", SqlValue::Boolean(true)),
	])]);

	engine
		.loader()
		.load(
			&parents,
			&[EagerSpec::refined("books", |q| q.filter("published", "=", true))],
		)
		.await
		.unwrap();

	let calls = executor.calls();
	assert_eq!(
		calls[0].0,
		"SELECT * FROM books WHERE published = $1 AND author_id IN ($2)"
	);
	assert_eq!(calls[0].1, vec![SqlValue::Boolean(true), int(1)]);
}

#[tokio::test]
async fn test_soft_deleted_related_rows_are_filtered_by_default() {
	let registry = Arc::new(ModelRegistry::new());
	registry.register(
		ModelMeta::new("Author", "authors")
			.with_relation("books", RelationDescriptor::has_many("Book", "author_id", "id")),
	);
	registry.register(ModelMeta::new("Book", "books").with_soft_delete("deleted_at"));
	let (engine, executor) = engine_with(registry);

	let parents = authors(&[1]);
	executor.push_rows(vec![]);

	engine.loader().load(&parents, &["books"]).await.unwrap();

	assert_eq!(
		executor.calls()[0].0,
		"SELECT * FROM books WHERE author_id IN ($1) AND books.deleted_at IS NULL"
	);
}

#[tokio::test]
async fn test_fetch_all_hydrates_and_eager_loads() {
	let (engine, executor) = engine_with(library_registry());
	executor.push_rows(vec![
		row(&[("id", int(1)), ("name", text("Anna"))]),
		row(&[("id", int(2)), ("name", text("Ben"))]),
	]);
	executor.push_rows(vec![row(&[("id", int(10)), ("author_id", int(2))])]);

	let authors = engine
		.fetch_all(
			&engine
				.query("Author")
				.unwrap()
				.filter("name", "LIKE", "%n%")
				.with("books"),
		)
		.await
		.unwrap();

	assert_eq!(authors.len(), 2);
	let calls = executor.calls();
	assert_eq!(calls.len(), 2);
	assert_eq!(calls[0].0, "SELECT * FROM authors WHERE name LIKE $1");
	assert_eq!(calls[1].0, "SELECT * FROM books WHERE author_id IN ($1, $2)");
	assert_eq!(
		authors[1].read().relation("books").unwrap().as_many().len(),
		1
	);
}

#[tokio::test]
async fn test_unknown_relation_path_fails_at_point_of_use() {
	let (engine, _executor) = engine_with(library_registry());
	let parents = authors(&[1]);

	let result = engine.loader().load(&parents, &["ghost"]).await;
	assert!(matches!(
		result,
		Err(grappelli::Error::RelationNotFound { .. })
	));
}
