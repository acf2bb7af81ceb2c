//! # Batched Fetch Strategies
//!
//! One strategy per relationship kind. Every strategy follows the same
//! shape: collect the relevant key values off the parent set, deduplicate,
//! split into bounded chunks, fetch each chunk with an `IN` predicate,
//! merge the results into a key-indexed map, then assign a fully-formed
//! relation value to every parent. Assignment merges by key, so chunk
//! order never matters and no parent ever observes a partial list.

use crate::engine::Engine;
use crate::error::Result;
use crate::model::{
	InstanceHandle, ModelInstance, ModelMeta, PivotData, RelationValue,
};
use crate::query::{QueryBuilder, RefineFn};
use crate::relations::{RelationDescriptor, RelationKind};
use crate::value::{KeyValue, QueryRow, SqlValue};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Maximum number of keys bound into one `IN` predicate, keeping each
/// statement inside driver placeholder limits
pub const IN_CHUNK_SIZE: usize = 1000;

/// Fetch one relation for a batch of parents and assign the results.
/// Returns every related instance that was created, for nested recursion.
pub(crate) async fn fetch_relation(
	engine: &Arc<Engine>,
	meta: &Arc<ModelMeta>,
	name: &str,
	descriptor: &RelationDescriptor,
	instances: &[InstanceHandle],
	columns: Option<&[String]>,
	refine: Option<&RefineFn>,
) -> Result<Vec<InstanceHandle>> {
	match descriptor.kind {
		RelationKind::HasOne | RelationKind::HasMany => {
			load_has(engine, name, descriptor, instances, columns, refine).await
		}
		RelationKind::BelongsTo => {
			load_belongs_to(engine, name, descriptor, instances, columns, refine).await
		}
		RelationKind::BelongsToMany => {
			load_belongs_to_many(engine, name, descriptor, instances, columns, refine).await
		}
		RelationKind::MorphOne | RelationKind::MorphMany | RelationKind::MorphOneOfMany => {
			load_morph(engine, meta, name, descriptor, instances, columns, refine).await
		}
		RelationKind::MorphTo => {
			load_morph_to(engine, name, descriptor, instances, columns, refine).await
		}
		RelationKind::HasOneThrough | RelationKind::HasManyThrough => {
			load_through(engine, name, descriptor, instances, columns, refine).await
		}
	}
}

// ----------------------------------------------------------------------
// Key collection and chunked fetching
// ----------------------------------------------------------------------

/// Distinct key values of `column` across the parent set, in first-seen
/// order. Duplicates are removed before chunking.
fn collect_keys(instances: &[InstanceHandle], column: &str) -> Vec<KeyValue> {
	let mut seen = HashSet::new();
	let mut keys = Vec::new();
	for handle in instances {
		if let Some(key) = handle.read().key_of(column) {
			if seen.insert(key.clone()) {
				keys.push(key);
			}
		}
	}
	keys
}

fn key_params(chunk: &[KeyValue]) -> Vec<SqlValue> {
	chunk.iter().cloned().map(SqlValue::from).collect()
}

async fn fetch_in_chunks(
	engine: &Arc<Engine>,
	related_meta: &ModelMeta,
	base: &QueryBuilder,
	column: &str,
	keys: &[KeyValue],
) -> Result<Vec<QueryRow>> {
	let mut rows = Vec::new();
	for chunk in keys.chunks(IN_CHUNK_SIZE) {
		let query = base.clone().filter_in(column, key_params(chunk));
		rows.extend(engine.run_for_model(related_meta, &query).await?);
	}
	Ok(rows)
}

/// Base query for a related model: soft-delete scoped, restricted to the
/// requested columns (plus the key columns matching needs), refined by
/// the caller's callback
fn base_query(
	engine: &Arc<Engine>,
	related_meta: &Arc<ModelMeta>,
	columns: Option<&[String]>,
	required: &[&str],
	refine: Option<&RefineFn>,
) -> QueryBuilder {
	let mut builder = QueryBuilder::table(related_meta.table().to_string())
		.with_model_context(Arc::clone(engine.registry()), Arc::clone(related_meta));
	if let Some(requested) = columns {
		let mut selected: Vec<String> = requested.to_vec();
		for needed in required.iter().copied().chain([related_meta.primary_key()]) {
			if !selected.iter().any(|c| c.as_str() == needed) {
				selected.push(needed.to_string());
			}
		}
		builder = builder.select(selected);
	}
	if let Some(refine) = refine {
		builder = refine(builder);
	}
	builder
}

// ----------------------------------------------------------------------
// Grouping and assignment
// ----------------------------------------------------------------------

/// Hydrate rows and group the handles by the value of `match_column`
fn group_by_column(
	model: &str,
	rows: Vec<QueryRow>,
	match_column: &str,
) -> (HashMap<KeyValue, Vec<InstanceHandle>>, Vec<InstanceHandle>) {
	let mut map: HashMap<KeyValue, Vec<InstanceHandle>> = HashMap::new();
	let mut all = Vec::new();
	for row in rows {
		let key = row.key(match_column);
		let handle = ModelInstance::from_row(model, row).into_handle();
		all.push(Arc::clone(&handle));
		if let Some(key) = key {
			map.entry(key).or_default().push(handle);
		}
	}
	(map, all)
}

/// Assign the grouped results onto every parent. Parents whose key has
/// no match receive an empty value; a relation is always either fully
/// populated or concretely empty, never partial.
fn assign_grouped(
	instances: &[InstanceHandle],
	parent_column: &str,
	map: &HashMap<KeyValue, Vec<InstanceHandle>>,
	many: bool,
	name: &str,
) {
	for handle in instances {
		let key = handle.read().key_of(parent_column);
		let matches = key.as_ref().and_then(|k| map.get(k));
		let value = if many {
			RelationValue::Many(matches.cloned().unwrap_or_default())
		} else {
			RelationValue::One(matches.and_then(|m| m.first().cloned()))
		};
		handle.write().set_relation(name, value);
	}
}

// ----------------------------------------------------------------------
// Per-kind strategies
// ----------------------------------------------------------------------

async fn load_has(
	engine: &Arc<Engine>,
	name: &str,
	descriptor: &RelationDescriptor,
	instances: &[InstanceHandle],
	columns: Option<&[String]>,
	refine: Option<&RefineFn>,
) -> Result<Vec<InstanceHandle>> {
	let target = descriptor.target.as_deref().unwrap_or_default();
	let related_meta = engine.registry().expect(target)?;
	let base = base_query(
		engine,
		&related_meta,
		columns,
		&[descriptor.foreign_key.as_str()],
		refine,
	);

	let keys = collect_keys(instances, &descriptor.local_key);
	let rows = fetch_in_chunks(engine, &related_meta, &base, &descriptor.foreign_key, &keys).await?;
	let (map, all) = group_by_column(related_meta.name(), rows, &descriptor.foreign_key);
	assign_grouped(
		instances,
		&descriptor.local_key,
		&map,
		descriptor.kind.is_many(),
		name,
	);
	Ok(all)
}

async fn load_belongs_to(
	engine: &Arc<Engine>,
	name: &str,
	descriptor: &RelationDescriptor,
	instances: &[InstanceHandle],
	columns: Option<&[String]>,
	refine: Option<&RefineFn>,
) -> Result<Vec<InstanceHandle>> {
	let target = descriptor.target.as_deref().unwrap_or_default();
	let related_meta = engine.registry().expect(target)?;
	let base = base_query(
		engine,
		&related_meta,
		columns,
		&[descriptor.local_key.as_str()],
		refine,
	);

	// The parent carries the foreign key; the related table is matched
	// on its owner key
	let keys = collect_keys(instances, &descriptor.foreign_key);
	let rows = fetch_in_chunks(engine, &related_meta, &base, &descriptor.local_key, &keys).await?;
	let (map, all) = group_by_column(related_meta.name(), rows, &descriptor.local_key);
	assign_grouped(instances, &descriptor.foreign_key, &map, false, name);
	Ok(all)
}

async fn load_belongs_to_many(
	engine: &Arc<Engine>,
	name: &str,
	descriptor: &RelationDescriptor,
	instances: &[InstanceHandle],
	columns: Option<&[String]>,
	refine: Option<&RefineFn>,
) -> Result<Vec<InstanceHandle>> {
	let target = descriptor.target.as_deref().unwrap_or_default();
	let related_meta = engine.registry().expect(target)?;
	let related_table = related_meta.table().to_string();
	let pivot = descriptor
		.pivot_table
		.clone()
		.unwrap_or_else(|| format!("{}_pivot", related_table));
	let fpk = descriptor
		.foreign_pivot_key
		.clone()
		.unwrap_or_else(|| "parent_id".to_string());
	let rpk = descriptor
		.related_pivot_key
		.clone()
		.unwrap_or_else(|| "related_id".to_string());
	let owner_alias = format!("pivot_{}", fpk);

	// Project related columns, the pivot owner key for attribution, and
	// any requested pivot columns under their aliases
	let mut selected: Vec<String> = match columns {
		Some(requested) => {
			let mut cols: Vec<String> = requested
				.iter()
				.map(|c| format!("{}.{}", related_table, c))
				.collect();
			for needed in [&descriptor.foreign_key, &related_meta.primary_key().to_string()] {
				let qualified = format!("{}.{}", related_table, needed);
				if !cols.contains(&qualified) {
					cols.push(qualified);
				}
			}
			cols
		}
		None => vec![format!("{}.*", related_table)],
	};
	selected.push(format!("{}.{} AS {}", pivot, fpk, owner_alias));
	for column in &descriptor.pivot_columns {
		if column != &fpk {
			selected.push(format!("{}.{} AS pivot_{}", pivot, column, column));
		}
	}

	let mut base = QueryBuilder::table(related_table.clone())
		.with_model_context(Arc::clone(engine.registry()), Arc::clone(&related_meta))
		.select(selected)
		.join(
			&pivot,
			format!("{}.{}", pivot, rpk),
			"=",
			format!("{}.{}", related_table, descriptor.foreign_key),
		);
	if let Some(refine) = refine {
		base = refine(base);
	}

	let keys = collect_keys(instances, &descriptor.local_key);
	let match_column = format!("{}.{}", pivot, fpk);
	let rows = fetch_in_chunks(engine, &related_meta, &base, &match_column, &keys).await?;

	// One instance per (parent, related) pair: the same related row can
	// be attached to several parents, each with its own pivot data
	let mut map: HashMap<KeyValue, Vec<InstanceHandle>> = HashMap::new();
	let mut all = Vec::new();
	for mut row in rows {
		let owner = row.remove(&owner_alias).as_ref().and_then(SqlValue::as_key);
		let mut pivot_values = IndexMap::new();
		for column in &descriptor.pivot_columns {
			let value = if column == &fpk {
				owner.clone().map(SqlValue::from).unwrap_or(SqlValue::Null)
			} else {
				row.remove(&format!("pivot_{}", column)).unwrap_or(SqlValue::Null)
			};
			pivot_values.insert(column.clone(), value);
		}

		let mut instance = ModelInstance::from_row(related_meta.name(), row);
		if !descriptor.pivot_columns.is_empty() {
			instance.set_pivot(PivotData {
				accessor: descriptor.pivot_accessor.clone(),
				values: pivot_values,
			});
		}
		let handle = instance.into_handle();
		all.push(Arc::clone(&handle));
		if let Some(owner) = owner {
			map.entry(owner).or_default().push(handle);
		}
	}
	assign_grouped(instances, &descriptor.local_key, &map, true, name);
	Ok(all)
}

async fn load_morph(
	engine: &Arc<Engine>,
	meta: &Arc<ModelMeta>,
	name: &str,
	descriptor: &RelationDescriptor,
	instances: &[InstanceHandle],
	columns: Option<&[String]>,
	refine: Option<&RefineFn>,
) -> Result<Vec<InstanceHandle>> {
	let target = descriptor.target.as_deref().unwrap_or_default();
	let related_meta = engine.registry().expect(target)?;
	let id_column = descriptor
		.morph_id_column
		.clone()
		.unwrap_or_else(|| descriptor.foreign_key.clone());
	let type_column = descriptor
		.morph_type_column
		.clone()
		.unwrap_or_else(|| "type".to_string());

	// Match every alias the parent model is known under, not just its
	// own name
	let morph_types: Vec<SqlValue> = engine
		.registry()
		.morph_types_for_model(meta.name())
		.into_iter()
		.map(SqlValue::Text)
		.collect();

	let mut base = base_query(
		engine,
		&related_meta,
		columns,
		&[id_column.as_str(), type_column.as_str()],
		refine,
	)
	.filter_in(type_column.clone(), morph_types);

	if let (RelationKind::MorphOneOfMany, Some(column), Some(aggregate)) = (
		descriptor.kind,
		descriptor.of_many_column.as_ref(),
		descriptor.of_many_aggregate,
	) {
		let table = related_meta.table();
		base = base.filter_raw(
			format!(
				"{col} = (SELECT {agg}({col}) FROM {table} AS of_many \
				 WHERE of_many.{id} = {table}.{id} AND of_many.{ty} = {table}.{ty})",
				col = column,
				agg = aggregate.as_sql(),
				table = table,
				id = id_column,
				ty = type_column,
			),
			Vec::new(),
		);
	}

	let keys = collect_keys(instances, &descriptor.local_key);
	let rows = fetch_in_chunks(engine, &related_meta, &base, &id_column, &keys).await?;
	let (map, all) = group_by_column(related_meta.name(), rows, &id_column);
	assign_grouped(
		instances,
		&descriptor.local_key,
		&map,
		descriptor.kind.is_many(),
		name,
	);
	Ok(all)
}

async fn load_morph_to(
	engine: &Arc<Engine>,
	name: &str,
	descriptor: &RelationDescriptor,
	instances: &[InstanceHandle],
	columns: Option<&[String]>,
	refine: Option<&RefineFn>,
) -> Result<Vec<InstanceHandle>> {
	let type_column = descriptor
		.morph_type_column
		.clone()
		.unwrap_or_else(|| "type".to_string());
	let id_column = descriptor
		.morph_id_column
		.clone()
		.unwrap_or_else(|| descriptor.foreign_key.clone());

	// Group owners by their stored type tag; rows without one resolve
	// to a null assignment
	let mut groups: IndexMap<String, Vec<InstanceHandle>> = IndexMap::new();
	let mut untyped = Vec::new();
	for handle in instances {
		let tag = handle
			.read()
			.get(&type_column)
			.and_then(SqlValue::as_text)
			.map(str::to_string);
		match tag {
			Some(tag) => groups.entry(tag).or_default().push(Arc::clone(handle)),
			None => untyped.push(Arc::clone(handle)),
		}
	}
	for handle in &untyped {
		handle.write().set_relation(name, RelationValue::One(None));
	}

	let mut all = Vec::new();
	for (tag, group) in groups {
		let Some(related_meta) = engine.registry().model_for_morph_type(&tag) else {
			// Unregistered tags are not fatal for loading; each owner
			// simply gets a null result
			tracing::warn!(
				target: "grappelli::loader",
				morph_type = %tag,
				relation = name,
				"no model registered for morph type, assigning null"
			);
			for handle in &group {
				handle.write().set_relation(name, RelationValue::One(None));
			}
			continue;
		};

		let base = base_query(
			engine,
			&related_meta,
			columns,
			&[descriptor.local_key.as_str()],
			refine,
		);
		let keys = collect_keys(&group, &id_column);
		let rows =
			fetch_in_chunks(engine, &related_meta, &base, &descriptor.local_key, &keys).await?;
		let (map, created) = group_by_column(related_meta.name(), rows, &descriptor.local_key);
		assign_grouped(&group, &id_column, &map, false, name);
		all.extend(created);
	}
	Ok(all)
}

async fn load_through(
	engine: &Arc<Engine>,
	name: &str,
	descriptor: &RelationDescriptor,
	instances: &[InstanceHandle],
	columns: Option<&[String]>,
	refine: Option<&RefineFn>,
) -> Result<Vec<InstanceHandle>> {
	let target = descriptor.target.as_deref().unwrap_or_default();
	let related_meta = engine.registry().expect(target)?;
	let related_table = related_meta.table().to_string();
	let through = descriptor
		.through_table
		.clone()
		.unwrap_or_else(|| format!("{}_through", related_table));
	let second_key = descriptor
		.through_second_key
		.clone()
		.unwrap_or_else(|| "id".to_string());
	let through_local = descriptor
		.through_local_key
		.clone()
		.unwrap_or_else(|| "id".to_string());
	let owner_alias = format!("through_{}", descriptor.foreign_key);

	let mut selected: Vec<String> = match columns {
		Some(requested) => {
			let mut cols: Vec<String> = requested
				.iter()
				.map(|c| format!("{}.{}", related_table, c))
				.collect();
			let pk = format!("{}.{}", related_table, related_meta.primary_key());
			if !cols.contains(&pk) {
				cols.push(pk);
			}
			cols
		}
		None => vec![format!("{}.*", related_table)],
	};
	selected.push(format!(
		"{}.{} AS {}",
		through, descriptor.foreign_key, owner_alias
	));

	let mut base = QueryBuilder::table(related_table.clone())
		.with_model_context(Arc::clone(engine.registry()), Arc::clone(&related_meta))
		.select(selected)
		.join(
			&through,
			format!("{}.{}", through, through_local),
			"=",
			format!("{}.{}", related_table, second_key),
		);
	if let Some(refine) = refine {
		base = refine(base);
	}

	let keys = collect_keys(instances, &descriptor.local_key);
	let match_column = format!("{}.{}", through, descriptor.foreign_key);
	let rows = fetch_in_chunks(engine, &related_meta, &base, &match_column, &keys).await?;

	let mut map: HashMap<KeyValue, Vec<InstanceHandle>> = HashMap::new();
	let mut all = Vec::new();
	for mut row in rows {
		let owner = row.remove(&owner_alias).as_ref().and_then(SqlValue::as_key);
		let handle = ModelInstance::from_row(related_meta.name(), row).into_handle();
		all.push(Arc::clone(&handle));
		if let Some(owner) = owner {
			map.entry(owner).or_default().push(handle);
		}
	}
	assign_grouped(
		instances,
		&descriptor.local_key,
		&map,
		descriptor.kind.is_many(),
		name,
	);
	Ok(all)
}
