//! # Models, Registry and Instances
//!
//! Runtime model metadata (table, keys, declared relations), the process
//! registry that maps model names and polymorphic type tags to metadata,
//! and the dynamically-typed instances the engine hydrates from raw rows.
//!
//! Relations can be declared two ways: an explicit descriptor attached at
//! definition time, or a declaration closure evaluated on demand against
//! a placeholder [`RelationBuilder`] that records the shape of the call
//! without ever touching data.

use crate::error::{Error, Result};
use crate::relations::{RelationBuilder, RelationDescriptor};
use crate::value::{KeyValue, QueryRow, SqlValue};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type RelationDecl = Arc<dyn Fn(&mut RelationBuilder) + Send + Sync>;

/// Static metadata for one model
pub struct ModelMeta {
	name: String,
	table: String,
	primary_key: String,
	soft_delete_column: Option<String>,
	static_relations: IndexMap<String, RelationDescriptor>,
	declared_relations: IndexMap<String, RelationDecl>,
}

impl fmt::Debug for ModelMeta {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ModelMeta")
			.field("name", &self.name)
			.field("table", &self.table)
			.field("primary_key", &self.primary_key)
			.field("soft_delete_column", &self.soft_delete_column)
			.field("relations", &self.relation_names())
			.finish()
	}
}

impl ModelMeta {
	/// Create metadata for a model backed by `table`, with primary key
	/// `id` and no soft deletes
	///
	/// # Examples
	///
	/// ```
	/// use grappelli::{ModelMeta, RelationDescriptor};
	///
	/// let user = ModelMeta::new("User", "users")
	/// 	.with_soft_delete("deleted_at")
	/// 	.with_relation("posts", RelationDescriptor::has_many("Post", "user_id", "id"));
	/// assert_eq!(user.table(), "users");
	/// ```
	pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			table: table.into(),
			primary_key: "id".to_string(),
			soft_delete_column: None,
			static_relations: IndexMap::new(),
			declared_relations: IndexMap::new(),
		}
	}

	pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
		self.primary_key = column.into();
		self
	}

	pub fn with_soft_delete(mut self, column: impl Into<String>) -> Self {
		self.soft_delete_column = Some(column.into());
		self
	}

	/// Attach an explicit relation descriptor. Explicit descriptors take
	/// precedence over declaration closures of the same name.
	pub fn with_relation(
		mut self,
		name: impl Into<String>,
		descriptor: RelationDescriptor,
	) -> Self {
		self.static_relations.insert(name.into(), descriptor);
		self
	}

	/// Attach a relation declaration closure, evaluated against a
	/// placeholder receiver whenever the relation is resolved
	pub fn with_declared_relation(
		mut self,
		name: impl Into<String>,
		declaration: impl Fn(&mut RelationBuilder) + Send + Sync + 'static,
	) -> Self {
		self.declared_relations
			.insert(name.into(), Arc::new(declaration));
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn table(&self) -> &str {
		&self.table
	}

	pub fn primary_key(&self) -> &str {
		&self.primary_key
	}

	pub fn soft_delete_column(&self) -> Option<&str> {
		self.soft_delete_column.as_deref()
	}

	/// Resolve a relation name into its descriptor.
	///
	/// Explicit descriptors are consulted first; otherwise the declaration
	/// closure runs against a placeholder [`RelationBuilder`]. A closure
	/// that records no descriptor resolves to [`Error::RelationNotFound`],
	/// never a panic. Resolution is pure: the same name always yields a
	/// structurally identical descriptor.
	pub fn relation(&self, name: &str) -> Result<RelationDescriptor> {
		if let Some(descriptor) = self.static_relations.get(name) {
			return Ok(descriptor.clone());
		}
		if let Some(declaration) = self.declared_relations.get(name) {
			let mut builder = RelationBuilder::new();
			declaration(&mut builder);
			return builder.into_descriptor().ok_or_else(|| Error::RelationNotFound {
				model: self.name.clone(),
				relation: name.to_string(),
			});
		}
		Err(Error::RelationNotFound {
			model: self.name.clone(),
			relation: name.to_string(),
		})
	}

	pub fn relation_names(&self) -> Vec<&str> {
		let mut names: Vec<&str> = self.static_relations.keys().map(String::as_str).collect();
		for name in self.declared_relations.keys() {
			if !self.static_relations.contains_key(name) {
				names.push(name);
			}
		}
		names
	}
}

/// Process registry: model name -> metadata, plus the polymorphic
/// alias table mapping stored type tags to concrete models
#[derive(Default)]
pub struct ModelRegistry {
	models: RwLock<HashMap<String, Arc<ModelMeta>>>,
	morph_map: RwLock<HashMap<String, String>>,
}

impl ModelRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, meta: ModelMeta) -> Arc<ModelMeta> {
		let meta = Arc::new(meta);
		self.models
			.write()
			.insert(meta.name().to_string(), Arc::clone(&meta));
		meta
	}

	pub fn get(&self, name: &str) -> Option<Arc<ModelMeta>> {
		self.models.read().get(name).cloned()
	}

	pub(crate) fn expect(&self, name: &str) -> Result<Arc<ModelMeta>> {
		self.get(name)
			.ok_or_else(|| Error::QueryBuild(format!("model `{}` is not registered", name)))
	}

	/// Register a morph alias so rows tagged `alias` resolve to `model`
	pub fn register_morph_alias(&self, alias: impl Into<String>, model: impl Into<String>) {
		self.morph_map.write().insert(alias.into(), model.into());
	}

	/// Resolve a stored type tag to its concrete model. Falls back to a
	/// model registered under the tag itself when no alias matches.
	pub fn model_for_morph_type(&self, alias: &str) -> Option<Arc<ModelMeta>> {
		let mapped = self.morph_map.read().get(alias).cloned();
		match mapped {
			Some(model) => self.get(&model),
			None => self.get(alias),
		}
	}

	/// Every type tag under which `model` is known polymorphically:
	/// all registered aliases plus the model's own name
	pub fn morph_types_for_model(&self, model: &str) -> Vec<String> {
		let map = self.morph_map.read();
		let mut types: Vec<String> = map
			.iter()
			.filter(|(_, target)| target.as_str() == model)
			.map(|(alias, _)| alias.clone())
			.collect();
		types.sort();
		if !types.iter().any(|t| t == model) {
			types.push(model.to_string());
		}
		types
	}
}

/// Shared handle to a hydrated instance. Relation assignment during
/// eager loading mutates instances through this handle.
pub type InstanceHandle = Arc<RwLock<ModelInstance>>;

/// A loaded relation value: single-valued or list-valued
#[derive(Debug, Clone)]
pub enum RelationValue {
	One(Option<InstanceHandle>),
	Many(Vec<InstanceHandle>),
}

impl RelationValue {
	pub fn as_one(&self) -> Option<&InstanceHandle> {
		match self {
			Self::One(handle) => handle.as_ref(),
			Self::Many(_) => None,
		}
	}

	pub fn as_many(&self) -> &[InstanceHandle] {
		match self {
			Self::Many(handles) => handles,
			Self::One(_) => &[],
		}
	}

	/// Every handle carried by this value, regardless of arity
	pub fn handles(&self) -> Vec<InstanceHandle> {
		match self {
			Self::One(Some(handle)) => vec![Arc::clone(handle)],
			Self::One(None) => Vec::new(),
			Self::Many(handles) => handles.clone(),
		}
	}
}

/// Pivot data attached to an instance loaded through a many-to-many
/// relation, exposed under the descriptor's accessor name
#[derive(Debug, Clone, PartialEq)]
pub struct PivotData {
	pub accessor: String,
	pub values: IndexMap<String, SqlValue>,
}

/// Dynamically-typed model instance hydrated from a raw row
#[derive(Debug)]
pub struct ModelInstance {
	model: String,
	attributes: IndexMap<String, SqlValue>,
	relations: HashMap<String, RelationValue>,
	pivot: Option<PivotData>,
}

impl ModelInstance {
	pub fn new(model: impl Into<String>, attributes: IndexMap<String, SqlValue>) -> Self {
		Self {
			model: model.into(),
			attributes,
			relations: HashMap::new(),
			pivot: None,
		}
	}

	pub fn from_row(model: impl Into<String>, row: QueryRow) -> Self {
		Self::new(model, row.into_columns())
	}

	/// Wrap into the shared handle the loader works with
	pub fn into_handle(self) -> InstanceHandle {
		Arc::new(RwLock::new(self))
	}

	pub fn model(&self) -> &str {
		&self.model
	}

	pub fn get(&self, column: &str) -> Option<&SqlValue> {
		self.attributes.get(column)
	}

	pub fn key_of(&self, column: &str) -> Option<KeyValue> {
		self.attributes.get(column).and_then(SqlValue::as_key)
	}

	pub fn attributes(&self) -> &IndexMap<String, SqlValue> {
		&self.attributes
	}

	pub(crate) fn remove_attribute(&mut self, column: &str) -> Option<SqlValue> {
		self.attributes.shift_remove(column)
	}

	/// Whether the relation is concretely assigned on this instance
	pub fn relation_loaded(&self, name: &str) -> bool {
		self.relations.contains_key(name)
	}

	pub fn relation(&self, name: &str) -> Option<&RelationValue> {
		self.relations.get(name)
	}

	pub fn set_relation(&mut self, name: impl Into<String>, value: RelationValue) {
		self.relations.insert(name.into(), value);
	}

	pub fn loaded_relation_names(&self) -> Vec<&str> {
		self.relations.keys().map(String::as_str).collect()
	}

	pub fn pivot(&self) -> Option<&PivotData> {
		self.pivot.as_ref()
	}

	pub(crate) fn set_pivot(&mut self, pivot: PivotData) {
		self.pivot = Some(pivot);
	}

	/// Serialize the instance to JSON: attributes, loaded relations
	/// (nested recursively) and pivot data under its accessor name.
	/// Relations that were never loaded are simply absent.
	pub fn to_json(&self) -> serde_json::Value {
		let mut object = serde_json::Map::new();
		for (column, value) in &self.attributes {
			object.insert(column.clone(), value.clone().into());
		}
		if let Some(pivot) = &self.pivot {
			let mut pivot_object = serde_json::Map::new();
			for (column, value) in &pivot.values {
				pivot_object.insert(column.clone(), value.clone().into());
			}
			object.insert(pivot.accessor.clone(), serde_json::Value::Object(pivot_object));
		}
		for (name, relation) in &self.relations {
			let value = match relation {
				RelationValue::One(Some(handle)) => handle.read().to_json(),
				RelationValue::One(None) => serde_json::Value::Null,
				RelationValue::Many(handles) => serde_json::Value::Array(
					handles.iter().map(|handle| handle.read().to_json()).collect(),
				),
			};
			object.insert(name.clone(), value);
		}
		serde_json::Value::Object(object)
	}
}
