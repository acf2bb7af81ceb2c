//! # Relation Descriptors
//!
//! Declarative description of model relationships, independent of any
//! particular instance. A descriptor carries the relationship kind, the
//! target model (or a polymorphic tag resolved at load time) and every
//! key name the loader needs to batch-fetch and re-attach results.
//!
//! Descriptors are cheap values: they are resolved on demand and never
//! cached, and resolving the same `(model, relation)` pair twice always
//! yields a structurally identical descriptor.

use serde::{Deserialize, Serialize};

/// Relationship kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
	HasOne,
	HasMany,
	BelongsTo,
	BelongsToMany,
	MorphOne,
	MorphMany,
	MorphTo,
	MorphOneOfMany,
	HasOneThrough,
	HasManyThrough,
}

impl RelationKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::HasOne => "has_one",
			Self::HasMany => "has_many",
			Self::BelongsTo => "belongs_to",
			Self::BelongsToMany => "belongs_to_many",
			Self::MorphOne => "morph_one",
			Self::MorphMany => "morph_many",
			Self::MorphTo => "morph_to",
			Self::MorphOneOfMany => "morph_one_of_many",
			Self::HasOneThrough => "has_one_through",
			Self::HasManyThrough => "has_many_through",
		}
	}

	/// Whether the relation resolves to a list rather than a single value
	pub fn is_many(self) -> bool {
		matches!(
			self,
			Self::HasMany | Self::BelongsToMany | Self::MorphMany | Self::HasManyThrough
		)
	}
}

/// Aggregate choice for "one of many" relations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfManyAggregate {
	Min,
	Max,
}

impl OfManyAggregate {
	pub fn as_sql(self) -> &'static str {
		match self {
			Self::Min => "MIN",
			Self::Max => "MAX",
		}
	}
}

/// Declarative relationship descriptor.
///
/// Field meaning varies by kind:
/// - `HasOne`/`HasMany`: `foreign_key` on the related table references
///   `local_key` on the parent.
/// - `BelongsTo`: `foreign_key` on the parent references `local_key`
///   (the owner key) on the related table.
/// - `BelongsToMany`: the pivot table's `foreign_pivot_key` references
///   the parent's `local_key`, its `related_pivot_key` references the
///   related table's `foreign_key`.
/// - `MorphOne`/`MorphMany`/`MorphOneOfMany`: the related table stores
///   `morph_id_column`/`morph_type_column`; `local_key` is on the parent.
/// - `MorphTo`: the parent stores `morph_id_column`/`morph_type_column`;
///   `local_key` is the owner key on whichever concrete table the type
///   tag resolves to, and `target` is `None`.
/// - `HasOneThrough`/`HasManyThrough`: `foreign_key` on the intermediate
///   table references the parent's `local_key`; `through_second_key` on
///   the related table references `through_local_key` on the intermediate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDescriptor {
	pub kind: RelationKind,
	pub target: Option<String>,
	pub foreign_key: String,
	pub local_key: String,
	pub pivot_table: Option<String>,
	pub foreign_pivot_key: Option<String>,
	pub related_pivot_key: Option<String>,
	pub pivot_columns: Vec<String>,
	pub pivot_accessor: String,
	pub morph_type_column: Option<String>,
	pub morph_id_column: Option<String>,
	pub of_many_column: Option<String>,
	pub of_many_aggregate: Option<OfManyAggregate>,
	pub through_table: Option<String>,
	pub through_second_key: Option<String>,
	pub through_local_key: Option<String>,
}

impl RelationDescriptor {
	fn base(kind: RelationKind, target: Option<String>, foreign_key: String, local_key: String) -> Self {
		Self {
			kind,
			target,
			foreign_key,
			local_key,
			pivot_table: None,
			foreign_pivot_key: None,
			related_pivot_key: None,
			pivot_columns: Vec::new(),
			pivot_accessor: "pivot".to_string(),
			morph_type_column: None,
			morph_id_column: None,
			of_many_column: None,
			of_many_aggregate: None,
			through_table: None,
			through_second_key: None,
			through_local_key: None,
		}
	}

	pub fn has_one(
		target: impl Into<String>,
		foreign_key: impl Into<String>,
		local_key: impl Into<String>,
	) -> Self {
		Self::base(
			RelationKind::HasOne,
			Some(target.into()),
			foreign_key.into(),
			local_key.into(),
		)
	}

	pub fn has_many(
		target: impl Into<String>,
		foreign_key: impl Into<String>,
		local_key: impl Into<String>,
	) -> Self {
		Self::base(
			RelationKind::HasMany,
			Some(target.into()),
			foreign_key.into(),
			local_key.into(),
		)
	}

	pub fn belongs_to(
		target: impl Into<String>,
		foreign_key: impl Into<String>,
		owner_key: impl Into<String>,
	) -> Self {
		Self::base(
			RelationKind::BelongsTo,
			Some(target.into()),
			foreign_key.into(),
			owner_key.into(),
		)
	}

	/// Many-to-many via a pivot table. Parent and related key columns
	/// default to `id`; override with [`with_keys`](Self::with_keys).
	pub fn belongs_to_many(
		target: impl Into<String>,
		pivot_table: impl Into<String>,
		foreign_pivot_key: impl Into<String>,
		related_pivot_key: impl Into<String>,
	) -> Self {
		let mut desc = Self::base(
			RelationKind::BelongsToMany,
			Some(target.into()),
			"id".to_string(),
			"id".to_string(),
		);
		desc.pivot_table = Some(pivot_table.into());
		desc.foreign_pivot_key = Some(foreign_pivot_key.into());
		desc.related_pivot_key = Some(related_pivot_key.into());
		desc
	}

	/// Polymorphic one-to-one. `morph_name` expands to the conventional
	/// `{name}_type` / `{name}_id` column pair.
	pub fn morph_one(target: impl Into<String>, morph_name: &str) -> Self {
		let mut desc = Self::base(
			RelationKind::MorphOne,
			Some(target.into()),
			format!("{}_id", morph_name),
			"id".to_string(),
		);
		desc.morph_type_column = Some(format!("{}_type", morph_name));
		desc.morph_id_column = Some(format!("{}_id", morph_name));
		desc
	}

	pub fn morph_many(target: impl Into<String>, morph_name: &str) -> Self {
		let mut desc = Self::morph_one(target, morph_name);
		desc.kind = RelationKind::MorphMany;
		desc
	}

	/// Polymorphic one-of-many: the single related row whose `column`
	/// holds the aggregate extreme among the parent's related rows.
	pub fn morph_one_of_many(
		target: impl Into<String>,
		morph_name: &str,
		column: impl Into<String>,
		aggregate: OfManyAggregate,
	) -> Self {
		let mut desc = Self::morph_one(target, morph_name);
		desc.kind = RelationKind::MorphOneOfMany;
		desc.of_many_column = Some(column.into());
		desc.of_many_aggregate = Some(aggregate);
		desc
	}

	/// Inverse polymorphic relation: the parent row stores the type tag
	/// and id of its owner. The concrete model is resolved per row at
	/// load time; `target` stays `None`.
	pub fn morph_to(morph_name: &str) -> Self {
		let mut desc = Self::base(
			RelationKind::MorphTo,
			None,
			format!("{}_id", morph_name),
			"id".to_string(),
		);
		desc.morph_type_column = Some(format!("{}_type", morph_name));
		desc.morph_id_column = Some(format!("{}_id", morph_name));
		desc
	}

	pub fn has_one_through(
		target: impl Into<String>,
		through_table: impl Into<String>,
		first_key: impl Into<String>,
		second_key: impl Into<String>,
	) -> Self {
		let mut desc = Self::base(
			RelationKind::HasOneThrough,
			Some(target.into()),
			first_key.into(),
			"id".to_string(),
		);
		desc.through_table = Some(through_table.into());
		desc.through_second_key = Some(second_key.into());
		desc.through_local_key = Some("id".to_string());
		desc
	}

	pub fn has_many_through(
		target: impl Into<String>,
		through_table: impl Into<String>,
		first_key: impl Into<String>,
		second_key: impl Into<String>,
	) -> Self {
		let mut desc = Self::has_one_through(target, through_table, first_key, second_key);
		desc.kind = RelationKind::HasManyThrough;
		desc
	}

	/// Override parent/related key columns (many-to-many)
	pub fn with_keys(
		mut self,
		parent_key: impl Into<String>,
		related_key: impl Into<String>,
	) -> Self {
		self.local_key = parent_key.into();
		self.foreign_key = related_key.into();
		self
	}

	/// Override the parent-side local key
	pub fn with_local_key(mut self, local_key: impl Into<String>) -> Self {
		self.local_key = local_key.into();
		self
	}

	/// Override the through-side keys (through relations)
	pub fn with_through_keys(
		mut self,
		local_key: impl Into<String>,
		through_local_key: impl Into<String>,
	) -> Self {
		self.local_key = local_key.into();
		self.through_local_key = Some(through_local_key.into());
		self
	}

	/// Expose pivot columns on loaded instances (many-to-many)
	pub fn with_pivot_columns<I, S>(mut self, columns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.pivot_columns = columns.into_iter().map(Into::into).collect();
		self
	}

	/// Name the pivot data accessor (defaults to `pivot`)
	pub fn as_accessor(mut self, accessor: impl Into<String>) -> Self {
		self.pivot_accessor = accessor.into();
		self
	}

	/// Override the conventional morph column pair
	pub fn with_morph_columns(
		mut self,
		type_column: impl Into<String>,
		id_column: impl Into<String>,
	) -> Self {
		self.morph_type_column = Some(type_column.into());
		let id_column = id_column.into();
		if !matches!(self.kind, RelationKind::MorphTo) {
			self.foreign_key = id_column.clone();
		}
		self.morph_id_column = Some(id_column);
		self
	}
}

/// Placeholder receiver handed to relation declaration closures.
///
/// The first descriptor-constructor call is recorded; any further
/// chained calls refine the captured shape or are tolerated as no-ops,
/// so a declaration that tacks extra ordering or filtering onto the end
/// never fails static resolution. Nothing here ever builds or runs a
/// query.
#[derive(Default)]
pub struct RelationBuilder {
	captured: Option<RelationDescriptor>,
}

macro_rules! capture {
	($self:ident, $desc:expr) => {{
		if $self.captured.is_none() {
			$self.captured = Some($desc);
		}
		$self
	}};
}

impl RelationBuilder {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	pub fn has_one(
		&mut self,
		target: impl Into<String>,
		foreign_key: impl Into<String>,
		local_key: impl Into<String>,
	) -> &mut Self {
		capture!(self, RelationDescriptor::has_one(target, foreign_key, local_key))
	}

	pub fn has_many(
		&mut self,
		target: impl Into<String>,
		foreign_key: impl Into<String>,
		local_key: impl Into<String>,
	) -> &mut Self {
		capture!(self, RelationDescriptor::has_many(target, foreign_key, local_key))
	}

	pub fn belongs_to(
		&mut self,
		target: impl Into<String>,
		foreign_key: impl Into<String>,
		owner_key: impl Into<String>,
	) -> &mut Self {
		capture!(self, RelationDescriptor::belongs_to(target, foreign_key, owner_key))
	}

	pub fn belongs_to_many(
		&mut self,
		target: impl Into<String>,
		pivot_table: impl Into<String>,
		foreign_pivot_key: impl Into<String>,
		related_pivot_key: impl Into<String>,
	) -> &mut Self {
		capture!(
			self,
			RelationDescriptor::belongs_to_many(
				target,
				pivot_table,
				foreign_pivot_key,
				related_pivot_key
			)
		)
	}

	pub fn morph_one(&mut self, target: impl Into<String>, morph_name: &str) -> &mut Self {
		capture!(self, RelationDescriptor::morph_one(target, morph_name))
	}

	pub fn morph_many(&mut self, target: impl Into<String>, morph_name: &str) -> &mut Self {
		capture!(self, RelationDescriptor::morph_many(target, morph_name))
	}

	pub fn morph_one_of_many(
		&mut self,
		target: impl Into<String>,
		morph_name: &str,
		column: impl Into<String>,
		aggregate: OfManyAggregate,
	) -> &mut Self {
		capture!(
			self,
			RelationDescriptor::morph_one_of_many(target, morph_name, column, aggregate)
		)
	}

	pub fn morph_to(&mut self, morph_name: &str) -> &mut Self {
		capture!(self, RelationDescriptor::morph_to(morph_name))
	}

	pub fn has_one_through(
		&mut self,
		target: impl Into<String>,
		through_table: impl Into<String>,
		first_key: impl Into<String>,
		second_key: impl Into<String>,
	) -> &mut Self {
		capture!(
			self,
			RelationDescriptor::has_one_through(target, through_table, first_key, second_key)
		)
	}

	pub fn has_many_through(
		&mut self,
		target: impl Into<String>,
		through_table: impl Into<String>,
		first_key: impl Into<String>,
		second_key: impl Into<String>,
	) -> &mut Self {
		capture!(
			self,
			RelationDescriptor::has_many_through(target, through_table, first_key, second_key)
		)
	}

	pub fn with_keys(
		&mut self,
		parent_key: impl Into<String>,
		related_key: impl Into<String>,
	) -> &mut Self {
		if let Some(desc) = self.captured.take() {
			self.captured = Some(desc.with_keys(parent_key, related_key));
		}
		self
	}

	pub fn with_pivot_columns<I, S>(&mut self, columns: I) -> &mut Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		if let Some(desc) = self.captured.take() {
			self.captured = Some(desc.with_pivot_columns(columns));
		}
		self
	}

	pub fn as_accessor(&mut self, accessor: impl Into<String>) -> &mut Self {
		if let Some(desc) = self.captured.take() {
			self.captured = Some(desc.as_accessor(accessor));
		}
		self
	}

	pub fn with_morph_columns(
		&mut self,
		type_column: impl Into<String>,
		id_column: impl Into<String>,
	) -> &mut Self {
		if let Some(desc) = self.captured.take() {
			self.captured = Some(desc.with_morph_columns(type_column, id_column));
		}
		self
	}

	// Chained query refinement in a declaration has no static shape;
	// it is accepted and ignored so resolution never fails on it.

	pub fn order_by(&mut self, _column: &str) -> &mut Self {
		self
	}

	pub fn order_by_desc(&mut self, _column: &str) -> &mut Self {
		self
	}

	pub fn filter(&mut self, _column: &str, _operator: &str, _value: crate::SqlValue) -> &mut Self {
		self
	}

	pub fn limit(&mut self, _limit: u64) -> &mut Self {
		self
	}

	pub(crate) fn into_descriptor(self) -> Option<RelationDescriptor> {
		self.captured
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_first_constructor_call_wins() {
		let mut builder = RelationBuilder::new();
		builder
			.has_many("Post", "user_id", "id")
			.belongs_to("Team", "team_id", "id");
		let desc = builder.into_descriptor().unwrap();
		assert_eq!(desc.kind, RelationKind::HasMany);
		assert_eq!(desc.target.as_deref(), Some("Post"));
	}

	#[test]
	fn test_chained_refinement_is_tolerated() {
		let mut builder = RelationBuilder::new();
		builder
			.morph_many("Comment", "commentable")
			.order_by("created_at")
			.limit(10);
		let desc = builder.into_descriptor().unwrap();
		assert_eq!(desc.kind, RelationKind::MorphMany);
		assert_eq!(desc.morph_type_column.as_deref(), Some("commentable_type"));
		assert_eq!(desc.morph_id_column.as_deref(), Some("commentable_id"));
	}

	#[test]
	fn test_empty_declaration_captures_nothing() {
		let builder = RelationBuilder::new();
		assert!(builder.into_descriptor().is_none());
	}

	#[test]
	fn test_morph_one_of_many_shape() {
		let desc = RelationDescriptor::morph_one_of_many(
			"Image",
			"imageable",
			"created_at",
			OfManyAggregate::Max,
		);
		assert_eq!(desc.kind, RelationKind::MorphOneOfMany);
		assert_eq!(desc.of_many_column.as_deref(), Some("created_at"));
		assert_eq!(desc.of_many_aggregate, Some(OfManyAggregate::Max));
	}

	#[test]
	fn test_through_descriptor_defaults() {
		let desc =
			RelationDescriptor::has_many_through("Post", "users", "country_id", "user_id");
		assert_eq!(desc.through_table.as_deref(), Some("users"));
		assert_eq!(desc.foreign_key, "country_id");
		assert_eq!(desc.through_second_key.as_deref(), Some("user_id"));
		assert_eq!(desc.through_local_key.as_deref(), Some("id"));
		assert_eq!(desc.local_key, "id");
	}
}
