use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

use crate::entities::GtsEntity;
use crate::gts::{GtsError, GtsID};
use crate::schema_cast::{GtsEntityCastResult, SchemaCastError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("JSON entity with GTS ID '{0}' not found in store")]
    EntityNotFound(String),
    #[error("JSON schema with GTS ID '{0}' not found in store")]
    SchemaNotFound(String),
    #[error("Can't determine JSON schema ID for instance with GTS ID '{0}'")]
    SchemaForInstanceNotFound(String),
    #[error("Entity must have a valid GTS ID")]
    InvalidEntity,
    #[error("Schema type_id must end with '~'")]
    InvalidSchemaId,
    #[error("Validation failed: {0}")]
    ValidationFailure(String),
    #[error(transparent)]
    InvalidId(#[from] GtsError),
    #[error(transparent)]
    Cast(#[from] SchemaCastError),
}

/// Pull-based source of entities. Implementations may skip malformed
/// documents silently; `read_by_id` returns `None` when the source has no
/// random access.
pub trait GtsReader: Send {
    fn iter(&mut self) -> Box<dyn Iterator<Item = GtsEntity> + '_>;
    fn read_by_id(&self, entity_id: &str) -> Option<GtsEntity>;
    fn reset(&mut self);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsStoreQueryResult {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub count: usize,
    pub limit: usize,
    pub results: Vec<Value>,
}

/// The registry. Entities are cached by identifier behind a read-write lock,
/// so lookups and registrations are safe under concurrent readers and
/// writers; iteration works on a point-in-time snapshot.
pub struct GtsStore {
    by_id: RwLock<HashMap<String, Arc<GtsEntity>>>,
    reader: Mutex<Option<Box<dyn GtsReader>>>,
}

impl GtsStore {
    #[must_use]
    pub fn new(reader: Option<Box<dyn GtsReader>>) -> Self {
        let store = GtsStore {
            by_id: RwLock::new(HashMap::new()),
            reader: Mutex::new(reader),
        };

        store.populate_from_reader();
        tracing::info!("Populated GtsStore with {} entities", store.len());
        store
    }

    fn read_map(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<GtsEntity>>> {
        self.by_id.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<GtsEntity>>> {
        self.by_id.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn reader_lock(&self) -> MutexGuard<'_, Option<Box<dyn GtsReader>>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn populate_from_reader(&self) {
        let mut reader = self.reader_lock();
        let Some(reader) = reader.as_mut() else {
            return;
        };

        let mut map = self.write_map();
        for entity in reader.iter() {
            if let Some(id) = entity.effective_id() {
                map.insert(id, Arc::new(entity));
            }
        }
    }

    /// Registers an entity under its GTS identifier, replacing any previous
    /// entity with the same identifier.
    ///
    /// # Errors
    /// Returns `StoreError::InvalidEntity` when the entity has no parsed
    /// GTS identifier.
    pub fn register(&self, entity: GtsEntity) -> Result<(), StoreError> {
        let Some(ref gts_id) = entity.gts_id else {
            return Err(StoreError::InvalidEntity);
        };
        let id = gts_id.id.clone();
        self.write_map().insert(id, Arc::new(entity));
        Ok(())
    }

    /// Builds a schema entity from raw content and registers it under `type_id`.
    ///
    /// # Errors
    /// Returns `StoreError::InvalidSchemaId` when `type_id` does not end with
    /// `~` or does not parse.
    pub fn register_schema(&self, type_id: &str, schema: &Value) -> Result<(), StoreError> {
        if !type_id.ends_with('~') {
            return Err(StoreError::InvalidSchemaId);
        }
        let gts_id = GtsID::new(type_id).map_err(|_| StoreError::InvalidSchemaId)?;

        let entity = GtsEntity::new(
            None,
            None,
            schema,
            None,
            Some(gts_id),
            true,
            String::new(),
            None,
            None,
        );
        self.write_map().insert(type_id.to_owned(), Arc::new(entity));
        Ok(())
    }

    /// Cache-then-reader lookup. A reader hit is cached before returning.
    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<Arc<GtsEntity>> {
        if let Some(entity) = self.read_map().get(entity_id) {
            return Some(Arc::clone(entity));
        }

        let fetched = self.reader_lock().as_ref()?.read_by_id(entity_id)?;
        let entity = Arc::new(fetched);
        self.write_map()
            .insert(entity_id.to_owned(), Arc::clone(&entity));
        Some(entity)
    }

    /// Returns the content of the schema registered under `type_id`.
    ///
    /// # Errors
    /// Returns `StoreError::SchemaNotFound` when nothing is registered under
    /// the identifier or the registered content is not an object.
    pub fn get_schema_content(&self, type_id: &str) -> Result<Value, StoreError> {
        let entity = self
            .get(type_id)
            .ok_or_else(|| StoreError::SchemaNotFound(type_id.to_owned()))?;
        if entity.content.is_object() {
            Ok(entity.content.clone())
        } else {
            Err(StoreError::SchemaNotFound(type_id.to_owned()))
        }
    }

    /// Point-in-time snapshot of all `(id, entity)` pairs.
    #[must_use]
    pub fn items(&self) -> Vec<(String, Arc<GtsEntity>)> {
        self.read_map()
            .iter()
            .map(|(id, entity)| (id.clone(), Arc::clone(entity)))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    /// Validates the instance registered under `gts_id` against its schema.
    ///
    /// # Errors
    /// Returns `EntityNotFound`/`SchemaForInstanceNotFound`/`SchemaNotFound`
    /// for failed lookups and `ValidationFailure` carrying the validator
    /// messages.
    pub fn validate_instance(&self, gts_id: &str) -> Result<(), StoreError> {
        let gid = GtsID::new(gts_id)?;

        let entity = self
            .get(&gid.id)
            .ok_or_else(|| StoreError::EntityNotFound(gts_id.to_owned()))?;

        let schema_id = entity
            .schema_id
            .clone()
            .ok_or_else(|| StoreError::SchemaForInstanceNotFound(gid.id.clone()))?;

        let schema = self.get_schema_content(&schema_id)?;

        tracing::info!("Validating instance {gts_id} against schema {schema_id}");

        // Inline registered $ref targets and drop the GTS-flavoured $id and
        // $schema URIs so the compiler never attempts remote resolution.
        let mut resolved = {
            let map = self.read_map();
            Self::inline_refs(&map, &schema, &mut HashSet::new())
        };
        if let Value::Object(ref mut map) = resolved {
            map.remove("$id");
            map.remove("$schema");
        }

        let compiled = jsonschema::JSONSchema::compile(&resolved)
            .map_err(|e| StoreError::ValidationFailure(format!("Invalid schema: {e}")))?;

        compiled.validate(&entity.content).map_err(|errors| {
            let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
            StoreError::ValidationFailure(messages.join(", "))
        })?;

        Ok(())
    }

    /// Replaces `$ref` values that point at registered schemas with their
    /// content. `inlining` guards against reference cycles; unresolvable
    /// non-local references are dropped, local JSON pointers kept for the
    /// compiler.
    fn inline_refs(
        entities: &HashMap<String, Arc<GtsEntity>>,
        schema: &Value,
        inlining: &mut HashSet<String>,
    ) -> Value {
        match schema {
            Value::Object(map) => {
                if let Some(target) = map.get("$ref").and_then(Value::as_str) {
                    if let Some(resolved) = Self::inline_ref_target(entities, map, target, inlining)
                    {
                        return resolved;
                    }
                    if !target.starts_with('#') {
                        let mut out = Map::new();
                        for (key, value) in map {
                            if key != "$ref" {
                                out.insert(key.clone(), Self::inline_refs(entities, value, inlining));
                            }
                        }
                        return Value::Object(out);
                    }
                }

                let mut out = Map::new();
                for (key, value) in map {
                    out.insert(key.clone(), Self::inline_refs(entities, value, inlining));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| Self::inline_refs(entities, item, inlining))
                    .collect(),
            ),
            _ => schema.clone(),
        }
    }

    fn inline_ref_target(
        entities: &HashMap<String, Arc<GtsEntity>>,
        map: &Map<String, Value>,
        target: &str,
        inlining: &mut HashSet<String>,
    ) -> Option<Value> {
        if inlining.contains(target) {
            return None;
        }
        let entity = entities.get(target)?;
        if !entity.is_schema {
            return None;
        }

        inlining.insert(target.to_owned());
        let mut resolved = Self::inline_refs(entities, &entity.content, inlining);
        inlining.remove(target);

        if let Value::Object(ref mut resolved_map) = resolved {
            resolved_map.remove("$id");
            resolved_map.remove("$schema");
        }

        if map.len() == 1 {
            return Some(resolved);
        }

        // Sibling keywords of $ref survive the merge.
        let Value::Object(resolved_map) = resolved else {
            return Some(resolved);
        };
        let mut merged = resolved_map;
        for (key, value) in map {
            if key != "$ref" {
                merged.insert(key.clone(), Self::inline_refs(entities, value, inlining));
            }
        }
        Some(Value::Object(merged))
    }

    /// Casts the instance registered under `from_id` to the schema registered
    /// under `target_schema_id`.
    ///
    /// # Errors
    /// Returns lookup failures and the cast guards of
    /// [`GtsEntity::cast`].
    pub fn cast(
        &self,
        from_id: &str,
        target_schema_id: &str,
    ) -> Result<GtsEntityCastResult, StoreError> {
        let from_entity = self
            .get(from_id)
            .ok_or_else(|| StoreError::EntityNotFound(from_id.to_owned()))?;

        let to_schema = self
            .get(target_schema_id)
            .ok_or_else(|| StoreError::SchemaNotFound(target_schema_id.to_owned()))?;

        Ok(from_entity.cast(&to_schema)?)
    }

    /// Canonical minor-compatibility rule: identical `required` sets and
    /// deeply-equal definitions for every property present in both schemas.
    /// Adding or removing non-required properties is allowed; top-level
    /// keywords outside `properties`/`required` are ignored.
    ///
    /// # Errors
    /// Returns `StoreError::SchemaNotFound` when either schema is missing.
    pub fn is_minor_compatible(
        &self,
        old_schema_id: &str,
        new_schema_id: &str,
    ) -> Result<bool, StoreError> {
        let old = self
            .get(old_schema_id)
            .ok_or_else(|| StoreError::SchemaNotFound(old_schema_id.to_owned()))?;
        let new = self
            .get(new_schema_id)
            .ok_or_else(|| StoreError::SchemaNotFound(new_schema_id.to_owned()))?;

        Ok(Self::minor_compatible(&old.content, &new.content))
    }

    fn minor_compatible(old_schema: &Value, new_schema: &Value) -> bool {
        let empty = Map::new();
        let old_props = old_schema
            .get("properties")
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        let new_props = new_schema
            .get("properties")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let required = |schema: &Value| -> HashSet<String> {
            schema
                .get("required")
                .and_then(Value::as_array)
                .map(|names| {
                    names
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default()
        };

        if required(old_schema) != required(new_schema) {
            return false;
        }

        old_props
            .iter()
            .filter(|(key, _)| new_props.contains_key(*key))
            .all(|(key, definition)| new_props.get(key) == Some(definition))
    }

    /// Builds the reference graph rooted at `gts_id` (see the node shape in
    /// the module docs): `refs` keyed by source path, `schema_id` as a child
    /// node, cycles collapsed to stub nodes via the shared `seen` set.
    #[must_use]
    pub fn build_schema_graph(&self, gts_id: &str) -> Value {
        let mut seen = HashSet::new();
        self.graph_node(gts_id, &mut seen)
    }

    fn graph_node(&self, gts_id: &str, seen: &mut HashSet<String>) -> Value {
        let mut node = Map::new();
        node.insert("id".to_owned(), Value::String(gts_id.to_owned()));

        // Already expanded somewhere in this traversal: stub.
        if !seen.insert(gts_id.to_owned()) {
            return Value::Object(node);
        }

        let Some(entity) = self.get(gts_id) else {
            node.insert(
                "errors".to_owned(),
                Value::Array(vec![Value::String("Entity not found".to_owned())]),
            );
            return Value::Object(node);
        };

        let mut refs = Map::new();
        for r in &entity.gts_refs {
            if r.id == gts_id || Self::is_json_schema_url(&r.id) {
                continue;
            }
            refs.insert(r.source_path.clone(), self.graph_node(&r.id, seen));
        }
        if !refs.is_empty() {
            node.insert("refs".to_owned(), Value::Object(refs));
        }

        match entity.schema_id {
            Some(ref schema_id) if !Self::is_json_schema_url(schema_id) => {
                let child = self.graph_node(schema_id, seen);
                node.insert("schema_id".to_owned(), child);
            }
            Some(_) => {}
            None => {
                node.insert(
                    "errors".to_owned(),
                    Value::Array(vec![Value::String("Schema not recognized".to_owned())]),
                );
            }
        }

        Value::Object(node)
    }

    fn is_json_schema_url(s: &str) -> bool {
        s.starts_with("http://json-schema.org") || s.starts_with("https://json-schema.org")
    }

    /// Runs a query expression `<id-prefix>[k1=v1 k2="v 2" ...]` over the
    /// cached entities and returns the matching raw contents.
    #[must_use]
    pub fn query(&self, expr: &str, limit: usize) -> GtsStoreQueryResult {
        let mut result = GtsStoreQueryResult {
            error: String::new(),
            count: 0,
            limit,
            results: Vec::new(),
        };

        let (prefix, filters) = Self::parse_query(expr);
        if prefix.contains('*') {
            result.error =
                "Invalid query: wildcard patterns are not supported, use a plain id prefix"
                    .to_owned();
            return result;
        }

        for (id, entity) in self.items() {
            if result.results.len() >= limit {
                break;
            }
            let Some(content) = entity.content.as_object() else {
                continue;
            };
            if entity.gts_id.is_none() || !id.starts_with(&prefix) {
                continue;
            }

            // Guard against stale extraction: the field the id was detected
            // in must still hold the id.
            let id_field = entity.selected_entity_field.as_deref().unwrap_or("gtsId");
            if content.get(id_field).and_then(Value::as_str) != Some(id.as_str()) {
                continue;
            }

            if !filters
                .iter()
                .all(|(key, value)| Self::filter_matches(content, key, value))
            {
                continue;
            }

            result.results.push(entity.content.clone());
        }

        result.count = result.results.len();
        result
    }

    fn parse_query(expr: &str) -> (String, Vec<(String, String)>) {
        let (base, filter_text) = match expr.split_once('[') {
            Some((base, rest)) => (base, rest.rsplit_once(']').map_or(rest, |(inner, _)| inner)),
            None => (expr, ""),
        };

        let mut filters = Vec::new();
        for token in Self::shell_tokens(filter_text) {
            if let Some((key, value)) = token.split_once('=') {
                filters.push((key.trim().to_owned(), value.to_owned()));
            }
        }

        (base.trim().to_owned(), filters)
    }

    /// Whitespace-separated tokens; double quotes protect embedded spaces.
    fn shell_tokens(text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;

        for c in text.chars() {
            match c {
                '"' => in_quotes = !in_quotes,
                c if c.is_whitespace() && !in_quotes => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }

        tokens
    }

    fn filter_matches(content: &Map<String, Value>, key: &str, expected: &str) -> bool {
        match content.get(key) {
            Some(Value::String(s)) => s == expected,
            Some(value) => value.to_string() == expected,
            None => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::entities::GtsConfig;
    use serde_json::json;

    fn make_entity(content: Value) -> GtsEntity {
        let cfg = GtsConfig::default();
        GtsEntity::new(
            None,
            None,
            &content,
            Some(&cfg),
            None,
            false,
            String::new(),
            None,
            None,
        )
    }

    /// In-memory reader used to exercise population and cache-miss lookups.
    struct VecReader {
        entities: Vec<Value>,
        extra_by_id: HashMap<String, Value>,
    }

    impl GtsReader for VecReader {
        fn iter(&mut self) -> Box<dyn Iterator<Item = GtsEntity> + '_> {
            let items: Vec<GtsEntity> = self
                .entities
                .iter()
                .map(|content| make_entity(content.clone()))
                .collect();
            Box::new(items.into_iter())
        }

        fn read_by_id(&self, entity_id: &str) -> Option<GtsEntity> {
            self.extra_by_id
                .get(entity_id)
                .map(|content| make_entity(content.clone()))
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn test_new_without_reader_is_empty() {
        let store = GtsStore::new(None);
        assert!(store.is_empty());
        assert!(store.items().is_empty());
    }

    #[test]
    fn test_populate_from_reader() {
        let reader = VecReader {
            entities: vec![
                json!({"id": "gts.acme.app.ns.thing.v1.0"}),
                json!({"id": "gts.acme.app.ns.thing.v1.1"}),
                json!({"name": "no id, dropped"}),
            ],
            extra_by_id: HashMap::new(),
        };
        let store = GtsStore::new(Some(Box::new(reader)));

        assert_eq!(store.len(), 2);
        assert!(store.get("gts.acme.app.ns.thing.v1.0").is_some());
    }

    #[test]
    fn test_get_cache_miss_pulls_from_reader() {
        let reader = VecReader {
            entities: Vec::new(),
            extra_by_id: [(
                "gts.acme.app.ns.thing.v9.0".to_owned(),
                json!({"id": "gts.acme.app.ns.thing.v9.0"}),
            )]
            .into_iter()
            .collect(),
        };
        let store = GtsStore::new(Some(Box::new(reader)));

        assert!(store.is_empty());
        let entity = store.get("gts.acme.app.ns.thing.v9.0");
        assert!(entity.is_some());
        // Cached now.
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_register_requires_gts_id() {
        let store = GtsStore::new(None);
        let entity = make_entity(json!({"name": "anonymous"}));
        assert!(matches!(
            store.register(entity),
            Err(StoreError::InvalidEntity)
        ));
    }

    #[test]
    fn test_register_replaces_previous() {
        let store = GtsStore::new(None);
        let id = "gts.acme.app.ns.thing.v1.0";

        store
            .register(make_entity(json!({"id": id, "rev": 1})))
            .unwrap();
        store
            .register(make_entity(json!({"id": id, "rev": 2})))
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(id).unwrap().content["rev"], json!(2));
    }

    #[test]
    fn test_register_schema_requires_tilde() {
        let store = GtsStore::new(None);
        let result = store.register_schema("gts.acme.app.ns.thing.v1.0", &json!({"type": "object"}));
        assert!(matches!(result, Err(StoreError::InvalidSchemaId)));
    }

    #[test]
    fn test_register_schema_and_get_content() {
        let store = GtsStore::new(None);
        let schema = json!({"type": "object", "properties": {"name": {"type": "string"}}});

        store
            .register_schema("gts.acme.app.ns.thing.v1~", &schema)
            .unwrap();

        let entity = store.get("gts.acme.app.ns.thing.v1~").unwrap();
        assert!(entity.is_schema);
        assert_eq!(
            store.get_schema_content("gts.acme.app.ns.thing.v1~").unwrap(),
            schema
        );
    }

    #[test]
    fn test_get_schema_content_not_found() {
        let store = GtsStore::new(None);
        assert!(matches!(
            store.get_schema_content("gts.acme.app.ns.thing.v1~"),
            Err(StoreError::SchemaNotFound(_))
        ));
    }

    #[test]
    fn test_get_schema_content_rejects_non_object() {
        let store = GtsStore::new(None);
        store
            .register_schema("gts.acme.app.ns.thing.v1~", &json!(true))
            .unwrap();
        assert!(matches!(
            store.get_schema_content("gts.acme.app.ns.thing.v1~"),
            Err(StoreError::SchemaNotFound(_))
        ));
    }

    #[test]
    fn test_validate_instance_ok() {
        let store = GtsStore::new(None);
        store
            .register_schema(
                "gts.acme.app.ns.thing.v1~",
                &json!({
                    "$schema": "http://json-schema.org/draft-07/schema#",
                    "$id": "gts.acme.app.ns.thing.v1~",
                    "type": "object",
                    "properties": {"name": {"type": "string"}},
                    "required": ["name"]
                }),
            )
            .unwrap();
        store
            .register(make_entity(json!({
                "id": "gts.acme.app.ns.thing.v1~acme.app.ns.one.v1.0",
                "name": "widget"
            })))
            .unwrap();

        store
            .validate_instance("gts.acme.app.ns.thing.v1~acme.app.ns.one.v1.0")
            .unwrap();
    }

    #[test]
    fn test_validate_instance_failure_carries_message() {
        let store = GtsStore::new(None);
        store
            .register_schema(
                "gts.acme.app.ns.thing.v1~",
                &json!({
                    "type": "object",
                    "properties": {"name": {"type": "string"}},
                    "required": ["name"]
                }),
            )
            .unwrap();
        store
            .register(make_entity(json!({
                "id": "gts.acme.app.ns.thing.v1~acme.app.ns.bad.v1.0",
                "name": 42
            })))
            .unwrap();

        let err = store
            .validate_instance("gts.acme.app.ns.thing.v1~acme.app.ns.bad.v1.0")
            .unwrap_err();
        match err {
            StoreError::ValidationFailure(message) => {
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_instance_missing_entity() {
        let store = GtsStore::new(None);
        assert!(matches!(
            store.validate_instance("gts.acme.app.ns.thing.v1~acme.app.ns.one.v1.0"),
            Err(StoreError::EntityNotFound(_))
        ));
    }

    #[test]
    fn test_validate_instance_missing_schema_id() {
        let store = GtsStore::new(None);
        store
            .register(make_entity(json!({"id": "gts.acme.app.ns.thing.v1.0"})))
            .unwrap();
        assert!(matches!(
            store.validate_instance("gts.acme.app.ns.thing.v1.0"),
            Err(StoreError::SchemaForInstanceNotFound(_))
        ));
    }

    #[test]
    fn test_validate_instance_missing_schema() {
        let store = GtsStore::new(None);
        store
            .register(make_entity(json!({
                "id": "gts.acme.app.ns.thing.v1~acme.app.ns.one.v1.0"
            })))
            .unwrap();
        assert!(matches!(
            store.validate_instance("gts.acme.app.ns.thing.v1~acme.app.ns.one.v1.0"),
            Err(StoreError::SchemaNotFound(_))
        ));
    }

    #[test]
    fn test_validate_instance_inlines_registered_refs() {
        let store = GtsStore::new(None);
        store
            .register_schema(
                "gts.acme.app.ns.base.v1~",
                &json!({
                    "$id": "gts.acme.app.ns.base.v1~",
                    "type": "object",
                    "properties": {"base_field": {"type": "integer"}},
                    "required": ["base_field"]
                }),
            )
            .unwrap();
        store
            .register_schema(
                "gts.acme.app.ns.thing.v1~",
                &json!({
                    "$id": "gts.acme.app.ns.thing.v1~",
                    "allOf": [{"$ref": "gts.acme.app.ns.base.v1~"}]
                }),
            )
            .unwrap();

        store
            .register(make_entity(json!({
                "id": "gts.acme.app.ns.thing.v1~acme.app.ns.ok.v1.0",
                "base_field": 5
            })))
            .unwrap();
        store
            .validate_instance("gts.acme.app.ns.thing.v1~acme.app.ns.ok.v1.0")
            .unwrap();

        store
            .register(make_entity(json!({
                "id": "gts.acme.app.ns.thing.v1~acme.app.ns.bad.v1.0",
                "base_field": "not an int"
            })))
            .unwrap();
        assert!(store
            .validate_instance("gts.acme.app.ns.thing.v1~acme.app.ns.bad.v1.0")
            .is_err());
    }

    #[test]
    fn test_cast_through_store() {
        let store = GtsStore::new(None);
        store
            .register_schema(
                "gts.acme.app.ns.thing.v1.1~",
                &json!({
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "email": {"type": "string", "default": "unknown@example.com"}
                    },
                    "required": ["name", "email"],
                    "additionalProperties": false
                }),
            )
            .unwrap();
        store
            .register(make_entity(json!({
                "id": "gts.acme.app.ns.thing.v1~acme.app.ns.one.v1.0",
                "name": "widget"
            })))
            .unwrap();

        let result = store
            .cast(
                "gts.acme.app.ns.thing.v1~acme.app.ns.one.v1.0",
                "gts.acme.app.ns.thing.v1.1~",
            )
            .unwrap();

        assert!(result.fully_compatible);
        assert_eq!(result.added_properties, vec!["email"]);
        // The instance's own id field was pruned by additionalProperties.
        assert!(result.removed_properties.contains(&"id".to_owned()));
    }

    #[test]
    fn test_cast_missing_parties() {
        let store = GtsStore::new(None);
        assert!(matches!(
            store.cast("gts.acme.app.ns.thing.v1.0", "gts.acme.app.ns.thing.v1~"),
            Err(StoreError::EntityNotFound(_))
        ));

        store
            .register(make_entity(json!({"id": "gts.acme.app.ns.thing.v1.0"})))
            .unwrap();
        assert!(matches!(
            store.cast("gts.acme.app.ns.thing.v1.0", "gts.acme.app.ns.thing.v1~"),
            Err(StoreError::SchemaNotFound(_))
        ));
    }

    #[test]
    fn test_cast_from_schema_rejected() {
        let store = GtsStore::new(None);
        store
            .register_schema("gts.acme.app.ns.thing.v1~", &json!({"type": "object"}))
            .unwrap();
        store
            .register_schema("gts.acme.app.ns.thing.v2~", &json!({"type": "object"}))
            .unwrap();

        assert!(matches!(
            store.cast("gts.acme.app.ns.thing.v1~", "gts.acme.app.ns.thing.v2~"),
            Err(StoreError::Cast(SchemaCastError::SourceIsSchema))
        ));
    }

    #[test]
    fn test_minor_compatible_adding_optional_property() {
        let store = GtsStore::new(None);
        store
            .register_schema(
                "gts.acme.app.ns.thing.v1.0~",
                &json!({
                    "type": "object",
                    "properties": {"name": {"type": "string"}},
                    "required": ["name"]
                }),
            )
            .unwrap();
        store
            .register_schema(
                "gts.acme.app.ns.thing.v1.1~",
                &json!({
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "email": {"type": "string"}
                    },
                    "required": ["name"]
                }),
            )
            .unwrap();

        assert!(store
            .is_minor_compatible("gts.acme.app.ns.thing.v1.0~", "gts.acme.app.ns.thing.v1.1~")
            .unwrap());
    }

    #[test]
    fn test_minor_compatible_rejects_required_change() {
        let store = GtsStore::new(None);
        store
            .register_schema(
                "gts.acme.app.ns.thing.v1.0~",
                &json!({"properties": {"name": {"type": "string"}}, "required": ["name"]}),
            )
            .unwrap();
        store
            .register_schema(
                "gts.acme.app.ns.thing.v1.1~",
                &json!({
                    "properties": {"name": {"type": "string"}, "email": {"type": "string"}},
                    "required": ["name", "email"]
                }),
            )
            .unwrap();

        assert!(!store
            .is_minor_compatible("gts.acme.app.ns.thing.v1.0~", "gts.acme.app.ns.thing.v1.1~")
            .unwrap());
    }

    #[test]
    fn test_minor_compatible_rejects_changed_definition() {
        let store = GtsStore::new(None);
        store
            .register_schema(
                "gts.acme.app.ns.thing.v1.0~",
                &json!({"properties": {"name": {"type": "string"}}}),
            )
            .unwrap();
        store
            .register_schema(
                "gts.acme.app.ns.thing.v1.1~",
                &json!({"properties": {"name": {"type": "integer"}}}),
            )
            .unwrap();

        assert!(!store
            .is_minor_compatible("gts.acme.app.ns.thing.v1.0~", "gts.acme.app.ns.thing.v1.1~")
            .unwrap());
    }

    #[test]
    fn test_minor_compatible_missing_schema() {
        let store = GtsStore::new(None);
        assert!(matches!(
            store.is_minor_compatible("gts.a.b.c.d.v1~", "gts.a.b.c.d.v2~"),
            Err(StoreError::SchemaNotFound(_))
        ));
    }

    #[test]
    fn test_graph_with_schema_and_refs() {
        let store = GtsStore::new(None);
        store
            .register_schema(
                "gts.acme.app.ns.thing.v1~",
                &json!({"$schema": "http://json-schema.org/draft-07/schema#", "type": "object"}),
            )
            .unwrap();
        store
            .register(make_entity(json!({
                "id": "gts.acme.app.ns.thing.v1~acme.app.ns.one.v1.0",
                "friend": "gts.acme.app.ns.thing.v1~acme.app.ns.two.v1.0"
            })))
            .unwrap();

        let graph = store.build_schema_graph("gts.acme.app.ns.thing.v1~acme.app.ns.one.v1.0");

        assert_eq!(
            graph["id"],
            json!("gts.acme.app.ns.thing.v1~acme.app.ns.one.v1.0")
        );
        // The friend is not registered.
        assert_eq!(
            graph["refs"]["friend"]["errors"],
            json!(["Entity not found"])
        );
        // The schema node is expanded.
        assert_eq!(graph["schema_id"]["id"], json!("gts.acme.app.ns.thing.v1~"));
    }

    #[test]
    fn test_graph_cycle_collapses_to_stub() {
        let store = GtsStore::new(None);
        store
            .register(make_entity(json!({
                "id": "gts.acme.app.ns.thing.v1~acme.app.ns.a.v1.0",
                "ref": "gts.acme.app.ns.thing.v1~acme.app.ns.b.v1.0"
            })))
            .unwrap();
        store
            .register(make_entity(json!({
                "id": "gts.acme.app.ns.thing.v1~acme.app.ns.b.v1.0",
                "ref": "gts.acme.app.ns.thing.v1~acme.app.ns.a.v1.0"
            })))
            .unwrap();

        let graph = store.build_schema_graph("gts.acme.app.ns.thing.v1~acme.app.ns.a.v1.0");

        let b_node = &graph["refs"]["ref"];
        assert_eq!(b_node["id"], json!("gts.acme.app.ns.thing.v1~acme.app.ns.b.v1.0"));
        let inner_a = &b_node["refs"]["ref"];
        assert_eq!(inner_a["id"], json!("gts.acme.app.ns.thing.v1~acme.app.ns.a.v1.0"));
        // The inner A is a stub: no further expansion.
        assert!(inner_a.get("refs").is_none());
    }

    #[test]
    fn test_graph_missing_root() {
        let store = GtsStore::new(None);
        let graph = store.build_schema_graph("gts.acme.app.ns.ghost.v1.0");
        assert_eq!(graph["errors"], json!(["Entity not found"]));
    }

    #[test]
    fn test_query_prefix_and_filters() {
        let store = GtsStore::new(None);
        store
            .register(make_entity(json!({
                "id": "gts.acme.app.ns.thing.v1~acme.app.ns.one.v1.0",
                "color": "red",
                "size": 5
            })))
            .unwrap();
        store
            .register(make_entity(json!({
                "id": "gts.acme.app.ns.thing.v1~acme.app.ns.two.v1.0",
                "color": "blue"
            })))
            .unwrap();
        store
            .register(make_entity(json!({
                "id": "gts.beta.app.ns.thing.v1~beta.app.ns.three.v1.0",
                "color": "red"
            })))
            .unwrap();

        let all_acme = store.query("gts.acme.", 100);
        assert_eq!(all_acme.count, 2);

        let red = store.query("gts.acme.[color=red]", 100);
        assert_eq!(red.count, 1);
        assert_eq!(red.results[0]["size"], json!(5));

        let sized = store.query("gts.acme.[color=red size=5]", 100);
        assert_eq!(sized.count, 1);

        let nothing = store.query("gts.acme.[color=green]", 100);
        assert_eq!(nothing.count, 0);
    }

    #[test]
    fn test_query_quoted_filter_value() {
        let store = GtsStore::new(None);
        store
            .register(make_entity(json!({
                "id": "gts.acme.app.ns.thing.v1~acme.app.ns.one.v1.0",
                "title": "hello world"
            })))
            .unwrap();

        let result = store.query(r#"gts.acme.[title="hello world"]"#, 10);
        assert_eq!(result.count, 1);
    }

    #[test]
    fn test_query_respects_limit() {
        let store = GtsStore::new(None);
        for i in 0..5 {
            store
                .register(make_entity(json!({
                    "id": format!("gts.acme.app.ns.thing.v1~acme.app.ns.item{i}.v1.0")
                })))
                .unwrap();
        }

        let result = store.query("gts.acme.", 2);
        assert_eq!(result.results.len(), 2);
    }

    #[test]
    fn test_query_skips_stale_id_field() {
        let store = GtsStore::new(None);
        // Entity registered under an id its content no longer carries in the
        // selected field.
        let cfg = GtsConfig::default();
        let entity = GtsEntity::new(
            None,
            None,
            &json!({"name": "detached"}),
            Some(&cfg),
            Some(GtsID::new("gts.acme.app.ns.thing.v1.0").unwrap()),
            false,
            String::new(),
            None,
            None,
        );
        store.register(entity).unwrap();

        let result = store.query("gts.acme.", 10);
        assert_eq!(result.count, 0);
    }

    #[test]
    fn test_query_rejects_wildcard_prefix() {
        let store = GtsStore::new(None);
        let result = store.query("gts.acme.*", 10);
        assert!(!result.error.is_empty());
        assert_eq!(result.count, 0);
    }

    #[test]
    fn test_items_is_snapshot() {
        let store = GtsStore::new(None);
        store
            .register(make_entity(json!({"id": "gts.acme.app.ns.thing.v1.0"})))
            .unwrap();

        let snapshot = store.items();
        store
            .register(make_entity(json!({"id": "gts.acme.app.ns.thing.v1.1"})))
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let store = Arc::new(GtsStore::new(None));
        store
            .register(make_entity(json!({"id": "gts.acme.app.ns.thing.v1.0"})))
            .unwrap();

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..50 {
                    store
                        .register(make_entity(json!({
                            "id": format!("gts.acme.app.ns.thing.v2.{i}")
                        })))
                        .unwrap();
                }
            })
        };
        let reader = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    assert!(store.get("gts.acme.app.ns.thing.v1.0").is_some());
                    let _ = store.items();
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(store.len(), 51);
    }
}
