//! # Query Builder
//!
//! Fluent, chainable specification of a single SELECT statement: columns,
//! joins, condition trees for WHERE and HAVING, grouping, ordering,
//! limit/offset, union branches and the soft-delete filter mode.
//!
//! Compilation produces SQL text plus a positional parameter list;
//! parameters are numbered in exactly the order their placeholders appear,
//! across nested groups, relation subqueries and union branches alike.
//! The compiled statement always passes the read-only guard.
//!
//! Builders are plain values: cloning deep-copies both condition trees
//! and every union branch, so a derived query can never alias its
//! parent's state.

use crate::condition::{validate_operator, Combinator, ConditionTree};
use crate::error::{Error, Result};
use crate::guard;
use crate::loader::EagerSpec;
use crate::model::{ModelMeta, ModelRegistry};
use crate::relations::RelationKind;
use crate::value::SqlValue;
use std::sync::Arc;

/// Refinement callback applied to a relation query before it runs
pub type RefineFn = Arc<dyn Fn(QueryBuilder) -> QueryBuilder + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
	Inner,
	Left,
	Right,
	Cross,
}

impl JoinKind {
	fn as_sql(self) -> &'static str {
		match self {
			Self::Inner => "INNER JOIN",
			Self::Left => "LEFT JOIN",
			Self::Right => "RIGHT JOIN",
			Self::Cross => "CROSS JOIN",
		}
	}
}

/// One join clause; `on` is `None` only for cross joins
#[derive(Debug, Clone)]
pub struct JoinClause {
	pub kind: JoinKind,
	pub table: String,
	pub on: Option<(String, String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
	Asc,
	Desc,
}

impl OrderDirection {
	fn as_sql(self) -> &'static str {
		match self {
			Self::Asc => "ASC",
			Self::Desc => "DESC",
		}
	}
}

#[derive(Debug, Clone)]
pub struct OrderTerm {
	pub column: String,
	pub direction: OrderDirection,
}

/// Soft-delete filter mode for models that declare a deleted-marker column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SoftDeleteMode {
	/// Exclude soft-deleted rows
	#[default]
	Default,
	/// Include soft-deleted rows
	WithTrashed,
	/// Only soft-deleted rows
	OnlyTrashed,
}

/// A resolved relation-existence constraint (`EXISTS (...)`)
#[derive(Clone)]
struct HasSpec {
	combinator: Combinator,
	negated: bool,
	correlation: RelationCorrelation,
	refine: ConditionTree,
}

/// A resolved correlated relation-count select column
#[derive(Clone)]
struct CountSpec {
	relation: String,
	correlation: RelationCorrelation,
	refine: ConditionTree,
}

/// The FROM/WHERE correlation skeleton shared by EXISTS and COUNT
/// subqueries, resolved from a relation descriptor at call time
#[derive(Clone)]
struct RelationCorrelation {
	/// `FROM related [JOIN ...]`
	from: String,
	/// Correlation predicate tying the subquery to the parent row
	correlate: String,
	/// Morph type tags bound as parameters inside the subquery
	morph_types: Vec<String>,
	/// Morph type column filtered by `morph_types`, when polymorphic
	morph_type_column: Option<String>,
	/// Soft-delete predicate for the related table, when it has one
	soft_delete: Option<String>,
}

/// Fluent read-only SELECT specification
///
/// # Examples
///
/// ```
/// use grappelli::QueryBuilder;
///
/// let (sql, params) = QueryBuilder::table("users")
/// 	.filter("age", ">=", 18i64)
/// 	.or_filter_group(|g| {
/// 		g.and_basic("vip", "=", true);
/// 		g.and_not_null("email");
/// 	})
/// 	.order_by("name")
/// 	.limit(10)
/// 	.compile()
/// 	.unwrap();
/// assert_eq!(
/// 	sql,
/// 	"SELECT * FROM users WHERE age >= $1 OR (vip = $2 AND email IS NOT NULL) \
/// 	 ORDER BY name ASC LIMIT 10"
/// );
/// assert_eq!(params.len(), 2);
/// ```
#[derive(Clone)]
pub struct QueryBuilder {
	registry: Option<Arc<ModelRegistry>>,
	model: Option<Arc<ModelMeta>>,
	table: String,
	columns: Vec<String>,
	distinct: bool,
	joins: Vec<JoinClause>,
	wheres: ConditionTree,
	group_by: Vec<String>,
	havings: ConditionTree,
	orders: Vec<OrderTerm>,
	limit: Option<u64>,
	offset: Option<u64>,
	unions: Vec<(QueryBuilder, bool)>,
	soft_delete: SoftDeleteMode,
	has_specs: Vec<HasSpec>,
	count_specs: Vec<CountSpec>,
	eager: Vec<EagerSpec>,
}

impl QueryBuilder {
	/// Query an arbitrary table without model context. Relation
	/// operations (`where_has`, `with_count`, eager paths) require a
	/// model-backed builder created through [`QueryBuilder::for_model`].
	pub fn table(table: impl Into<String>) -> Self {
		Self {
			registry: None,
			model: None,
			table: table.into(),
			columns: Vec::new(),
			distinct: false,
			joins: Vec::new(),
			wheres: ConditionTree::new(),
			group_by: Vec::new(),
			havings: ConditionTree::new(),
			orders: Vec::new(),
			limit: None,
			offset: None,
			unions: Vec::new(),
			soft_delete: SoftDeleteMode::Default,
			has_specs: Vec::new(),
			count_specs: Vec::new(),
			eager: Vec::new(),
		}
	}

	/// Query a registered model's table, enabling relation operations
	/// and the model's soft-delete filter
	pub fn for_model(registry: &Arc<ModelRegistry>, model: &str) -> Result<Self> {
		let meta = registry.expect(model)?;
		let mut builder = Self::table(meta.table());
		builder.registry = Some(Arc::clone(registry));
		builder.model = Some(meta);
		Ok(builder)
	}

	pub(crate) fn with_model_context(
		mut self,
		registry: Arc<ModelRegistry>,
		meta: Arc<ModelMeta>,
	) -> Self {
		self.registry = Some(registry);
		self.model = Some(meta);
		self
	}

	pub fn model_meta(&self) -> Option<&Arc<ModelMeta>> {
		self.model.as_ref()
	}

	pub fn table_name(&self) -> &str {
		&self.table
	}

	pub fn eager_specs(&self) -> &[EagerSpec] {
		&self.eager
	}

	// ------------------------------------------------------------------
	// Projection
	// ------------------------------------------------------------------

	pub fn select<I, S>(mut self, columns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.columns = columns.into_iter().map(Into::into).collect();
		self
	}

	pub fn add_select(mut self, column: impl Into<String>) -> Self {
		self.columns.push(column.into());
		self
	}

	pub fn distinct(mut self) -> Self {
		self.distinct = true;
		self
	}

	// ------------------------------------------------------------------
	// Conditions
	// ------------------------------------------------------------------

	pub fn filter(
		mut self,
		column: impl Into<String>,
		operator: impl Into<String>,
		value: impl Into<SqlValue>,
	) -> Self {
		self.wheres.and_basic(column, operator, value);
		self
	}

	pub fn or_filter(
		mut self,
		column: impl Into<String>,
		operator: impl Into<String>,
		value: impl Into<SqlValue>,
	) -> Self {
		self.wheres.or_basic(column, operator, value);
		self
	}

	pub fn filter_in(mut self, column: impl Into<String>, values: Vec<SqlValue>) -> Self {
		self.wheres.and_in(column, values);
		self
	}

	pub fn filter_not_in(mut self, column: impl Into<String>, values: Vec<SqlValue>) -> Self {
		self.wheres.and_not_in(column, values);
		self
	}

	pub fn or_filter_in(mut self, column: impl Into<String>, values: Vec<SqlValue>) -> Self {
		self.wheres.or_in(column, values);
		self
	}

	pub fn filter_null(mut self, column: impl Into<String>) -> Self {
		self.wheres.and_null(column);
		self
	}

	pub fn filter_not_null(mut self, column: impl Into<String>) -> Self {
		self.wheres.and_not_null(column);
		self
	}

	pub fn or_filter_null(mut self, column: impl Into<String>) -> Self {
		self.wheres.or_null(column);
		self
	}

	pub fn filter_between(
		mut self,
		column: impl Into<String>,
		low: impl Into<SqlValue>,
		high: impl Into<SqlValue>,
	) -> Self {
		self.wheres.and_between(column, low, high);
		self
	}

	pub fn filter_not_between(
		mut self,
		column: impl Into<String>,
		low: impl Into<SqlValue>,
		high: impl Into<SqlValue>,
	) -> Self {
		self.wheres.and_not_between(column, low, high);
		self
	}

	pub fn filter_raw(mut self, sql: impl Into<String>, bindings: Vec<SqlValue>) -> Self {
		self.wheres.and_raw(sql, bindings);
		self
	}

	pub fn or_filter_raw(mut self, sql: impl Into<String>, bindings: Vec<SqlValue>) -> Self {
		self.wheres.or_raw(sql, bindings);
		self
	}

	pub fn filter_group(mut self, f: impl FnOnce(&mut ConditionTree)) -> Self {
		self.wheres.and_group(f);
		self
	}

	pub fn or_filter_group(mut self, f: impl FnOnce(&mut ConditionTree)) -> Self {
		self.wheres.or_group(f);
		self
	}

	// ------------------------------------------------------------------
	// Grouping / having / ordering / paging
	// ------------------------------------------------------------------

	pub fn group_by<I, S>(mut self, columns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.group_by.extend(columns.into_iter().map(Into::into));
		self
	}

	pub fn having(
		mut self,
		column: impl Into<String>,
		operator: impl Into<String>,
		value: impl Into<SqlValue>,
	) -> Self {
		self.havings.and_basic(column, operator, value);
		self
	}

	pub fn or_having(
		mut self,
		column: impl Into<String>,
		operator: impl Into<String>,
		value: impl Into<SqlValue>,
	) -> Self {
		self.havings.or_basic(column, operator, value);
		self
	}

	pub fn having_raw(mut self, sql: impl Into<String>, bindings: Vec<SqlValue>) -> Self {
		self.havings.and_raw(sql, bindings);
		self
	}

	pub fn order_by(mut self, column: impl Into<String>) -> Self {
		self.orders.push(OrderTerm {
			column: column.into(),
			direction: OrderDirection::Asc,
		});
		self
	}

	pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
		self.orders.push(OrderTerm {
			column: column.into(),
			direction: OrderDirection::Desc,
		});
		self
	}

	pub fn limit(mut self, limit: u64) -> Self {
		self.limit = Some(limit);
		self
	}

	pub fn offset(mut self, offset: u64) -> Self {
		self.offset = Some(offset);
		self
	}

	// ------------------------------------------------------------------
	// Joins
	// ------------------------------------------------------------------

	pub fn join(
		mut self,
		table: impl Into<String>,
		first: impl Into<String>,
		operator: impl Into<String>,
		second: impl Into<String>,
	) -> Self {
		self.joins.push(JoinClause {
			kind: JoinKind::Inner,
			table: table.into(),
			on: Some((first.into(), operator.into(), second.into())),
		});
		self
	}

	pub fn left_join(
		mut self,
		table: impl Into<String>,
		first: impl Into<String>,
		operator: impl Into<String>,
		second: impl Into<String>,
	) -> Self {
		self.joins.push(JoinClause {
			kind: JoinKind::Left,
			table: table.into(),
			on: Some((first.into(), operator.into(), second.into())),
		});
		self
	}

	pub fn right_join(
		mut self,
		table: impl Into<String>,
		first: impl Into<String>,
		operator: impl Into<String>,
		second: impl Into<String>,
	) -> Self {
		self.joins.push(JoinClause {
			kind: JoinKind::Right,
			table: table.into(),
			on: Some((first.into(), operator.into(), second.into())),
		});
		self
	}

	pub fn cross_join(mut self, table: impl Into<String>) -> Self {
		self.joins.push(JoinClause {
			kind: JoinKind::Cross,
			table: table.into(),
			on: None,
		});
		self
	}

	// ------------------------------------------------------------------
	// Unions / soft delete
	// ------------------------------------------------------------------

	/// Append a `UNION` branch. Ordering and limiting on the branch are
	/// suppressed: SQL applies them once, after all branches combine.
	pub fn union(mut self, other: QueryBuilder) -> Self {
		self.unions.push((other, false));
		self
	}

	pub fn union_all(mut self, other: QueryBuilder) -> Self {
		self.unions.push((other, true));
		self
	}

	pub fn with_trashed(mut self) -> Self {
		self.soft_delete = SoftDeleteMode::WithTrashed;
		self
	}

	pub fn only_trashed(mut self) -> Self {
		self.soft_delete = SoftDeleteMode::OnlyTrashed;
		self
	}

	pub fn soft_delete_mode(&self) -> SoftDeleteMode {
		self.soft_delete
	}

	/// Derive the COUNT form of this query: same filters and joins, an
	/// aggregate projection, no ordering or paging
	pub(crate) fn for_count(&self) -> Self {
		let mut counted = self.clone();
		counted.columns = vec!["COUNT(*) AS aggregate".to_string()];
		counted.distinct = false;
		counted.orders.clear();
		counted.limit = None;
		counted.offset = None;
		counted.count_specs.clear();
		counted.eager.clear();
		counted
	}

	// ------------------------------------------------------------------
	// Eager paths
	// ------------------------------------------------------------------

	/// Request eager loading of a relation path (`"posts"`,
	/// `"posts.comments"`, `"posts:id,title"`)
	pub fn with(mut self, path: impl Into<String>) -> Self {
		self.eager.push(EagerSpec::new(path));
		self
	}

	/// Request eager loading with a refinement applied to the relation
	/// query before it runs
	pub fn with_refined(
		mut self,
		path: impl Into<String>,
		refine: impl Fn(QueryBuilder) -> QueryBuilder + Send + Sync + 'static,
	) -> Self {
		self.eager.push(EagerSpec::refined(path, refine));
		self
	}

	// ------------------------------------------------------------------
	// Relation subqueries
	// ------------------------------------------------------------------

	/// Constrain to rows having at least one related row
	pub fn where_has(self, relation: &str) -> Result<Self> {
		self.push_has(relation, Combinator::And, false, None)
	}

	/// Constrain to rows having no related row
	pub fn where_doesnt_have(self, relation: &str) -> Result<Self> {
		self.push_has(relation, Combinator::And, true, None)
	}

	/// Constrain on related-row existence with extra conditions applied
	/// to the related table
	pub fn where_has_with(
		self,
		relation: &str,
		f: impl FnOnce(&mut ConditionTree),
	) -> Result<Self> {
		let mut refine = ConditionTree::new();
		f(&mut refine);
		self.push_has(relation, Combinator::And, false, Some(refine))
	}

	fn push_has(
		mut self,
		relation: &str,
		combinator: Combinator,
		negated: bool,
		refine: Option<ConditionTree>,
	) -> Result<Self> {
		let correlation = self.resolve_correlation(relation)?;
		self.has_specs.push(HasSpec {
			combinator,
			negated,
			correlation,
			refine: refine.unwrap_or_default(),
		});
		Ok(self)
	}

	/// Add a `{relation}_count` select column backed by a correlated
	/// COUNT subquery
	pub fn with_count(mut self, relation: &str) -> Result<Self> {
		let correlation = self.resolve_correlation(relation)?;
		self.count_specs.push(CountSpec {
			relation: relation.to_string(),
			correlation,
			refine: ConditionTree::new(),
		});
		Ok(self)
	}

	/// Constrain a `morph_to` relation's owner to one concrete type.
	/// The alias must be registered (or be a model name); an unknown
	/// alias is an error here, unlike during loading.
	pub fn where_morphed_to(mut self, relation: &str, alias: &str) -> Result<Self> {
		let (meta, registry) = self.model_context()?;
		let descriptor = meta.relation(relation)?;
		if descriptor.kind != RelationKind::MorphTo {
			return Err(Error::RelationKindMismatch {
				relation: relation.to_string(),
				expected: RelationKind::MorphTo.as_str(),
				actual: descriptor.kind.as_str(),
			});
		}
		if registry.model_for_morph_type(alias).is_none() {
			return Err(Error::PolymorphicModelUnresolved(alias.to_string()));
		}
		let type_column = descriptor
			.morph_type_column
			.clone()
			.ok_or_else(|| Error::QueryBuild(format!("relation `{}` has no type column", relation)))?;
		self.wheres.and_basic(type_column, "=", alias);
		Ok(self)
	}

	fn model_context(&self) -> Result<(&Arc<ModelMeta>, &Arc<ModelRegistry>)> {
		match (&self.model, &self.registry) {
			(Some(meta), Some(registry)) => Ok((meta, registry)),
			_ => Err(Error::QueryBuild(
				"relation operations require a model-backed query".to_string(),
			)),
		}
	}

	/// Resolve a relation into the correlation skeleton its EXISTS or
	/// COUNT subquery compiles from
	fn resolve_correlation(&self, relation: &str) -> Result<RelationCorrelation> {
		let (meta, registry) = self.model_context()?;
		let descriptor = meta.relation(relation)?;
		let parent = meta.table();

		let target_meta = match &descriptor.target {
			Some(target) => Some(registry.expect(target)?),
			None => None,
		};
		let related = target_meta
			.as_ref()
			.map(|m| m.table().to_string())
			.unwrap_or_default();
		let soft_delete = target_meta
			.as_ref()
			.and_then(|m| m.soft_delete_column())
			.map(|col| format!("{}.{} IS NULL", related, col));

		let correlation = match descriptor.kind {
			RelationKind::HasOne | RelationKind::HasMany => RelationCorrelation {
				from: format!("FROM {}", related),
				correlate: format!(
					"{}.{} = {}.{}",
					related, descriptor.foreign_key, parent, descriptor.local_key
				),
				morph_types: Vec::new(),
				morph_type_column: None,
				soft_delete,
			},
			RelationKind::BelongsTo => RelationCorrelation {
				from: format!("FROM {}", related),
				correlate: format!(
					"{}.{} = {}.{}",
					related, descriptor.local_key, parent, descriptor.foreign_key
				),
				morph_types: Vec::new(),
				morph_type_column: None,
				soft_delete,
			},
			RelationKind::BelongsToMany => {
				let pivot = descriptor
					.pivot_table
					.as_deref()
					.ok_or_else(|| pivot_shape_error(relation))?;
				let fpk = descriptor
					.foreign_pivot_key
					.as_deref()
					.ok_or_else(|| pivot_shape_error(relation))?;
				let rpk = descriptor
					.related_pivot_key
					.as_deref()
					.ok_or_else(|| pivot_shape_error(relation))?;
				RelationCorrelation {
					from: format!(
						"FROM {} INNER JOIN {} ON {}.{} = {}.{}",
						related, pivot, pivot, rpk, related, descriptor.foreign_key
					),
					correlate: format!(
						"{}.{} = {}.{}",
						pivot, fpk, parent, descriptor.local_key
					),
					morph_types: Vec::new(),
					morph_type_column: None,
					soft_delete,
				}
			}
			RelationKind::MorphOne | RelationKind::MorphMany | RelationKind::MorphOneOfMany => {
				let id_column = descriptor
					.morph_id_column
					.as_deref()
					.ok_or_else(|| morph_shape_error(relation))?;
				let type_column = descriptor
					.morph_type_column
					.as_deref()
					.ok_or_else(|| morph_shape_error(relation))?;
				RelationCorrelation {
					from: format!("FROM {}", related),
					correlate: format!(
						"{}.{} = {}.{}",
						related, id_column, parent, descriptor.local_key
					),
					morph_types: registry.morph_types_for_model(meta.name()),
					morph_type_column: Some(format!("{}.{}", related, type_column)),
					soft_delete,
				}
			}
			RelationKind::HasOneThrough | RelationKind::HasManyThrough => {
				let through = descriptor
					.through_table
					.as_deref()
					.ok_or_else(|| through_shape_error(relation))?;
				let second_key = descriptor
					.through_second_key
					.as_deref()
					.ok_or_else(|| through_shape_error(relation))?;
				let through_local = descriptor
					.through_local_key
					.as_deref()
					.ok_or_else(|| through_shape_error(relation))?;
				RelationCorrelation {
					from: format!(
						"FROM {} INNER JOIN {} ON {}.{} = {}.{}",
						related, through, related, second_key, through, through_local
					),
					correlate: format!(
						"{}.{} = {}.{}",
						through, descriptor.foreign_key, parent, descriptor.local_key
					),
					morph_types: Vec::new(),
					morph_type_column: None,
					soft_delete,
				}
			}
			RelationKind::MorphTo => {
				return Err(Error::RelationKindMismatch {
					relation: relation.to_string(),
					expected: "a concretely-targeted relation",
					actual: RelationKind::MorphTo.as_str(),
				});
			}
		};
		Ok(correlation)
	}

	// ------------------------------------------------------------------
	// Compilation
	// ------------------------------------------------------------------

	/// Compile to SQL text and its positional parameter list
	pub fn compile(&self) -> Result<(String, Vec<SqlValue>)> {
		let mut params = Vec::new();
		let sql = self.compile_with(&mut params, true)?;
		guard::check_statement(&sql)?;
		Ok((sql, params))
	}

	fn compile_with(&self, params: &mut Vec<SqlValue>, outermost: bool) -> Result<String> {
		let mut sql = String::from("SELECT ");
		if self.distinct {
			sql.push_str("DISTINCT ");
		}

		let mut columns: Vec<String> = if self.columns.is_empty() {
			vec!["*".to_string()]
		} else {
			self.columns.clone()
		};
		for spec in &self.count_specs {
			columns.push(format!(
				"({}) AS {}_count",
				compile_relation_subquery("COUNT(*)", &spec.correlation, &spec.refine, params)?,
				spec.relation
			));
		}
		sql.push_str(&columns.join(", "));

		sql.push_str(" FROM ");
		sql.push_str(&self.table);

		for join in &self.joins {
			sql.push(' ');
			sql.push_str(join.kind.as_sql());
			sql.push(' ');
			sql.push_str(&join.table);
			match (&join.on, join.kind) {
				(None, JoinKind::Cross) => {}
				(Some((first, operator, second)), _) => {
					validate_operator(operator)?;
					sql.push_str(&format!(" ON {} {} {}", first, operator, second));
				}
				(None, _) => {
					return Err(Error::QueryBuild(format!(
						"join on `{}` is missing its ON clause",
						join.table
					)));
				}
			}
		}

		let mut where_sql = self.wheres.compile_into(params)?;
		for spec in &self.has_specs {
			let exists = format!(
				"{}EXISTS ({})",
				if spec.negated { "NOT " } else { "" },
				compile_relation_subquery("1", &spec.correlation, &spec.refine, params)?
			);
			if where_sql.is_empty() {
				where_sql = exists;
			} else {
				where_sql.push(' ');
				where_sql.push_str(spec.combinator.as_sql());
				where_sql.push(' ');
				where_sql.push_str(&exists);
			}
		}
		if let Some(predicate) = self.soft_delete_predicate() {
			if where_sql.is_empty() {
				where_sql = predicate;
			} else {
				where_sql.push_str(" AND ");
				where_sql.push_str(&predicate);
			}
		}
		if !where_sql.is_empty() {
			sql.push_str(" WHERE ");
			sql.push_str(&where_sql);
		}

		if !self.group_by.is_empty() {
			sql.push_str(" GROUP BY ");
			sql.push_str(&self.group_by.join(", "));
		}

		let having_sql = self.havings.compile_into(params)?;
		if !having_sql.is_empty() {
			sql.push_str(" HAVING ");
			sql.push_str(&having_sql);
		}

		for (branch, all) in &self.unions {
			sql.push_str(if *all { " UNION ALL " } else { " UNION " });
			sql.push_str(&branch.compile_with(params, false)?);
		}

		// Ordering and limiting apply once, after all union branches
		if outermost {
			if !self.orders.is_empty() {
				let terms: Vec<String> = self
					.orders
					.iter()
					.map(|term| format!("{} {}", term.column, term.direction.as_sql()))
					.collect();
				sql.push_str(" ORDER BY ");
				sql.push_str(&terms.join(", "));
			}
			if let Some(limit) = self.limit {
				sql.push_str(&format!(" LIMIT {}", limit));
			}
			if let Some(offset) = self.offset {
				sql.push_str(&format!(" OFFSET {}", offset));
			}
		}

		Ok(sql)
	}

	fn soft_delete_predicate(&self) -> Option<String> {
		let column = self.model.as_ref()?.soft_delete_column()?;
		match self.soft_delete {
			SoftDeleteMode::Default => Some(format!("{}.{} IS NULL", self.table, column)),
			SoftDeleteMode::OnlyTrashed => {
				Some(format!("{}.{} IS NOT NULL", self.table, column))
			}
			SoftDeleteMode::WithTrashed => None,
		}
	}
}

fn compile_relation_subquery(
	select_expr: &str,
	correlation: &RelationCorrelation,
	refine: &ConditionTree,
	params: &mut Vec<SqlValue>,
) -> Result<String> {
	let mut sub = format!(
		"SELECT {} {} WHERE {}",
		select_expr, correlation.from, correlation.correlate
	);
	if let (Some(type_column), false) = (
		&correlation.morph_type_column,
		correlation.morph_types.is_empty(),
	) {
		let placeholders: Vec<String> = correlation
			.morph_types
			.iter()
			.map(|alias| {
				params.push(SqlValue::Text(alias.clone()));
				format!("${}", params.len())
			})
			.collect();
		sub.push_str(&format!(
			" AND {} IN ({})",
			type_column,
			placeholders.join(", ")
		));
	}
	if let Some(predicate) = &correlation.soft_delete {
		sub.push_str(" AND ");
		sub.push_str(predicate);
	}
	let refined = refine.compile_into(params)?;
	if !refined.is_empty() {
		sub.push_str(" AND ");
		sub.push_str(&refined);
	}
	Ok(sub)
}

fn pivot_shape_error(relation: &str) -> Error {
	Error::QueryBuild(format!(
		"relation `{}` is missing its pivot table shape",
		relation
	))
}

fn morph_shape_error(relation: &str) -> Error {
	Error::QueryBuild(format!(
		"relation `{}` is missing its morph column pair",
		relation
	))
}

fn through_shape_error(relation: &str) -> Error {
	Error::QueryBuild(format!(
		"relation `{}` is missing its through-table shape",
		relation
	))
}
