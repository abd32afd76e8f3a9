use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::gts::{GTS_PREFIX, GTS_URI_PREFIX, GtsID};
use crate::path_resolver::JsonPathResolver;
use crate::schema_cast::{GtsEntityCastResult, SchemaCastError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    #[serde(rename = "instancePath")]
    pub instance_path: String,
    #[serde(rename = "schemaPath")]
    pub schema_path: String,
    pub keyword: String,
    pub message: String,
    pub params: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
}

/// A loaded JSON document. When the top-level value is an array, each element
/// is addressable by its sequence index and becomes its own entity.
#[derive(Debug, Clone)]
pub struct GtsFile {
    pub path: String,
    pub name: String,
    pub content: Value,
    pub sequences_count: usize,
    pub sequence_content: HashMap<usize, Value>,
    pub validation: ValidationResult,
}

impl GtsFile {
    #[must_use]
    pub fn new(path: String, name: String, content: Value) -> Self {
        let sequence_content: HashMap<usize, Value> = match content.as_array() {
            Some(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| (i, item.clone()))
                .collect(),
            None => [(0, content.clone())].into_iter().collect(),
        };

        GtsFile {
            path,
            name,
            sequences_count: sequence_content.len(),
            sequence_content,
            content,
            validation: ValidationResult::default(),
        }
    }
}

/// Ordered candidate field names used to detect an entity's own identifier
/// and the identifier of the schema it conforms to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsConfig {
    pub entity_id_fields: Vec<String>,
    pub schema_id_fields: Vec<String>,
}

impl Default for GtsConfig {
    fn default() -> Self {
        GtsConfig {
            entity_id_fields: vec![
                "$id".to_owned(),
                "gtsId".to_owned(),
                "gtsIid".to_owned(),
                "gtsOid".to_owned(),
                "gtsI".to_owned(),
                "gts_id".to_owned(),
                "gts_oid".to_owned(),
                "gts_iid".to_owned(),
                "id".to_owned(),
            ],
            schema_id_fields: vec![
                "$schema".to_owned(),
                "gtsTid".to_owned(),
                "gtsT".to_owned(),
                "gts_t".to_owned(),
                "gts_tid".to_owned(),
                "type".to_owned(),
                "schema".to_owned(),
            ],
        }
    }
}

/// An identifier found inside a document, together with the dotted JSON path
/// it was found at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsRef {
    pub id: String,
    #[serde(rename = "sourcePath")]
    pub source_path: String,
}

/// The registry unit: a JSON document plus everything detected about it.
/// Treated as immutable once constructed.
#[derive(Debug, Clone)]
pub struct GtsEntity {
    /// Parsed GTS identifier, set only when the detected id string is valid.
    pub gts_id: Option<GtsID>,
    /// The detected id string, kept for introspection even when it is not a
    /// valid GTS identifier (falls back to `{file.path}#{seq}` / `{file.path}`).
    pub entity_id: Option<String>,
    pub is_schema: bool,
    pub file: Option<GtsFile>,
    pub list_sequence: Option<usize>,
    pub label: String,
    pub content: Value,
    /// Valid GTS identifier strings embedded anywhere in the content.
    pub gts_refs: Vec<GtsRef>,
    /// `$ref` values, collected for schemas only.
    pub schema_refs: Vec<GtsRef>,
    pub validation: ValidationResult,
    /// The schema this entity claims to conform to.
    pub schema_id: Option<String>,
    pub selected_entity_field: Option<String>,
    pub selected_schema_id_field: Option<String>,
    pub description: String,
}

impl GtsEntity {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        file: Option<GtsFile>,
        list_sequence: Option<usize>,
        content: &Value,
        cfg: Option<&GtsConfig>,
        gts_id: Option<GtsID>,
        is_schema: bool,
        label: String,
        validation: Option<ValidationResult>,
        schema_id: Option<String>,
    ) -> Self {
        let mut entity = GtsEntity {
            gts_id,
            entity_id: None,
            is_schema,
            file,
            list_sequence,
            label,
            content: content.clone(),
            gts_refs: Vec::new(),
            schema_refs: Vec::new(),
            validation: validation.unwrap_or_default(),
            schema_id,
            selected_entity_field: None,
            selected_schema_id_field: None,
            description: String::new(),
        };

        if entity.detect_schema() {
            entity.is_schema = true;
        }

        if let Some(cfg) = cfg {
            entity.detect_entity_id(cfg);
            entity.detect_schema_id(cfg);
        }

        entity.assign_label();

        if let Some(desc) = entity
            .content
            .get("description")
            .and_then(Value::as_str)
        {
            desc.clone_into(&mut entity.description);
        }

        entity.gts_refs = dedup_refs(collect_gts_refs(&entity.content));
        if entity.is_schema {
            entity.schema_refs = dedup_refs(collect_schema_refs(&entity.content));
        }

        entity
    }

    /// A document is a schema when its `$schema` points at json-schema.org or
    /// into the GTS namespace.
    fn detect_schema(&self) -> bool {
        let Some(url) = self.content.get("$schema").and_then(Value::as_str) else {
            return false;
        };
        url.starts_with("http://json-schema.org/")
            || url.starts_with("https://json-schema.org/")
            || url.starts_with(GTS_URI_PREFIX)
            || url.starts_with(GTS_PREFIX)
    }

    fn detect_entity_id(&mut self, cfg: &GtsConfig) {
        if let Some((field, value)) = self.first_id_candidate(&cfg.entity_id_fields) {
            self.selected_entity_field = Some(field);
            self.gts_id = GtsID::new(&value).ok();
            self.entity_id = Some(value);
            return;
        }

        // No usable field: identify the entity by its origin.
        if let Some(ref file) = self.file {
            self.entity_id = Some(match self.list_sequence {
                Some(seq) => format!("{}#{seq}", file.path),
                None => file.path.clone(),
            });
        }
    }

    fn detect_schema_id(&mut self, cfg: &GtsConfig) {
        if self.schema_id.is_some() {
            return;
        }

        if let Some((field, value)) = self.first_id_candidate(&cfg.schema_id_fields) {
            self.selected_schema_id_field = Some(field);
            self.schema_id = Some(value);
            return;
        }

        // The entity's own identifier implies its type: the prefix up to and
        // including the last '~'.
        if let Some(ref entity_id) = self.entity_id
            && GtsID::is_valid(entity_id)
            && let Some(pos) = entity_id.rfind('~')
        {
            if pos + 1 == entity_id.len() {
                self.schema_id = Some(entity_id.clone());
            } else {
                self.selected_schema_id_field = self.selected_entity_field.clone();
                self.schema_id = Some(entity_id[..=pos].to_owned());
            }
        }
    }

    /// Two passes over the candidate fields: first one whose value is a valid
    /// GTS identifier, then first one with any non-empty string value.
    fn first_id_candidate(&self, fields: &[String]) -> Option<(String, String)> {
        for field in fields {
            if let Some(value) = self.string_field(field)
                && GtsID::is_valid(&value)
            {
                return Some((field.clone(), value));
            }
        }
        for field in fields {
            if let Some(value) = self.string_field(field) {
                return Some((field.clone(), value));
            }
        }
        None
    }

    fn string_field(&self, field: &str) -> Option<String> {
        let value = self.content.get(field)?.as_str()?.trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_owned())
        }
    }

    fn assign_label(&mut self) {
        if let Some(ref file) = self.file {
            self.label = match self.list_sequence {
                Some(seq) => format!("{}#{seq}", file.name),
                None => file.name.clone(),
            };
        } else if let Some(ref gts_id) = self.gts_id {
            self.label = gts_id.id.clone();
        }
    }

    /// The identifier this entity is registered and looked up under.
    #[must_use]
    pub fn effective_id(&self) -> Option<String> {
        if let Some(ref gts_id) = self.gts_id {
            return Some(gts_id.id.clone());
        }
        self.entity_id.clone()
    }

    #[must_use]
    pub fn resolve_path(&self, path: &str) -> JsonPathResolver {
        let gts_id = self
            .gts_id
            .as_ref()
            .map(|g| g.id.clone())
            .unwrap_or_default();
        JsonPathResolver::new(gts_id, self.content.clone()).resolve(path)
    }

    /// Casts this instance to the given target schema.
    ///
    /// # Errors
    /// Returns `SchemaCastError` when this entity is itself a schema or the
    /// target entity is not one.
    pub fn cast(&self, to_schema: &GtsEntity) -> Result<GtsEntityCastResult, SchemaCastError> {
        if self.is_schema {
            return Err(SchemaCastError::SourceIsSchema);
        }
        if !to_schema.is_schema {
            return Err(SchemaCastError::TargetNotSchema);
        }

        let from_id = self.effective_id().unwrap_or_default();
        let to_id = to_schema.effective_id().unwrap_or_default();
        Ok(GtsEntityCastResult::cast(
            &from_id,
            &to_id,
            &self.content,
            &to_schema.content,
        ))
    }
}

/// Depth-first walk collecting every string value that parses as a GTS
/// identifier. Paths are dotted, array indices rendered as `[i]`, and a bare
/// string document reports the path `root`.
fn collect_gts_refs(content: &Value) -> Vec<GtsRef> {
    fn walk(node: &Value, path: &str, out: &mut Vec<GtsRef>) {
        match node {
            Value::String(s) => {
                if GtsID::is_valid(s) {
                    out.push(GtsRef {
                        id: s.clone(),
                        source_path: if path.is_empty() {
                            "root".to_owned()
                        } else {
                            path.to_owned()
                        },
                    });
                }
            }
            Value::Array(items) => {
                for (idx, item) in items.iter().enumerate() {
                    walk(item, &format!("{path}[{idx}]"), out);
                }
            }
            Value::Object(map) => {
                for (key, value) in map {
                    let next = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    walk(value, &next, out);
                }
            }
            _ => {}
        }
    }

    let mut found = Vec::new();
    walk(content, "", &mut found);
    found
}

/// Collects `$ref` string values with their paths; paths end in `.$ref`.
fn collect_schema_refs(content: &Value) -> Vec<GtsRef> {
    fn walk(node: &Value, path: &str, out: &mut Vec<GtsRef>) {
        match node {
            Value::Object(map) => {
                if let Some(target) = map.get("$ref").and_then(Value::as_str) {
                    out.push(GtsRef {
                        id: target.to_owned(),
                        source_path: if path.is_empty() {
                            "$ref".to_owned()
                        } else {
                            format!("{path}.$ref")
                        },
                    });
                }
                for (key, value) in map {
                    let next = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    walk(value, &next, out);
                }
            }
            Value::Array(items) => {
                for (idx, item) in items.iter().enumerate() {
                    walk(item, &format!("{path}[{idx}]"), out);
                }
            }
            _ => {}
        }
    }

    let mut found = Vec::new();
    walk(content, "", &mut found);
    found
}

fn dedup_refs(refs: Vec<GtsRef>) -> Vec<GtsRef> {
    let mut seen = HashSet::new();
    refs.into_iter()
        .filter(|r| seen.insert((r.id.clone(), r.source_path.clone())))
        .collect()
}
