use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

use crate::entities::{GtsConfig, GtsEntity};
use crate::files_reader::GtsFileReader;
use crate::gts::{GtsID, GtsWildcard};
use crate::path_resolver::JsonPathResolver;
use crate::schema_cast::GtsEntityCastResult;
use crate::store::{GtsReader, GtsStore, GtsStoreQueryResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsIdValidationResult {
    pub id: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Serializable segment record for API responses, distinct from the internal
/// `crate::gts::GtsIdSegment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsIdSegmentInfo {
    pub vendor: String,
    pub package: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub ver_major: u32,
    pub ver_minor: Option<u32>,
    pub is_type: bool,
}

impl From<&crate::gts::GtsIdSegment> for GtsIdSegmentInfo {
    fn from(seg: &crate::gts::GtsIdSegment) -> Self {
        Self {
            vendor: seg.vendor.clone(),
            package: seg.package.clone(),
            namespace: seg.namespace.clone(),
            type_name: seg.type_name.clone(),
            ver_major: seg.ver_major,
            ver_minor: seg.ver_minor,
            is_type: seg.is_type,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsIdParseResult {
    pub id: String,
    pub ok: bool,
    pub segments: Vec<GtsIdSegmentInfo>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsIdMatchResult {
    pub candidate: String,
    pub pattern: String,
    #[serde(rename = "match")]
    pub is_match: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsUuidResult {
    pub id: String,
    pub uuid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsValidationResult {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Schema graph result - serializes directly as the root node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GtsSchemaGraphResult {
    pub graph: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsCompatibilityResult {
    pub old: String,
    pub new: String,
    pub minor_compatible: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsExtractIdResult {
    pub id: String,
    pub schema_id: Option<String>,
    pub selected_entity_field: Option<String>,
    pub selected_schema_id_field: Option<String>,
    pub is_schema: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsAddEntityResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub schema_id: Option<String>,
    pub is_schema: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsAddEntitiesResult {
    pub ok: bool,
    pub results: Vec<GtsAddEntityResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsAddSchemaResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsGetEntityResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub schema_id: Option<String>,
    pub is_schema: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Programmatic facade over the identifier algebra and the store. Every
/// operation returns a plain serializable record; structural errors are
/// folded into the record's `error` field.
pub struct GtsOps {
    pub verbose: usize,
    pub cfg: GtsConfig,
    pub path: Option<Vec<String>>,
    pub store: GtsStore,
}

impl GtsOps {
    #[must_use]
    pub fn new(path: Option<Vec<String>>, config: Option<String>, verbose: usize) -> Self {
        let cfg = Self::load_config(config.as_deref());
        let reader: Option<Box<dyn GtsReader>> = path
            .as_ref()
            .map(|p| Box::new(GtsFileReader::new(p, Some(cfg.clone()))) as Box<dyn GtsReader>);
        let store = GtsStore::new(reader);

        GtsOps {
            verbose,
            cfg,
            path,
            store,
        }
    }

    fn load_config(config_path: Option<&str>) -> GtsConfig {
        if let Some(path) = config_path
            && let Some(cfg) = Self::load_config_file(Path::new(path))
        {
            return cfg;
        }

        // A gts.config.json next to the working directory overrides the
        // built-in defaults.
        Self::load_config_file(Path::new("gts.config.json")).unwrap_or_default()
    }

    fn load_config_file(path: &Path) -> Option<GtsConfig> {
        let text = fs::read_to_string(path).ok()?;
        let data: Value = serde_json::from_str(&text).ok()?;
        Some(Self::config_from_value(&data))
    }

    /// Missing fields inherit the built-in defaults.
    fn config_from_value(data: &Value) -> GtsConfig {
        let defaults = GtsConfig::default();

        let string_list = |field: &str| -> Option<Vec<String>> {
            data.get(field).and_then(Value::as_array).map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
        };

        GtsConfig {
            entity_id_fields: string_list("entity_id_fields").unwrap_or(defaults.entity_id_fields),
            schema_id_fields: string_list("schema_id_fields").unwrap_or(defaults.schema_id_fields),
        }
    }

    /// Drops the current store and repopulates it from the given paths.
    pub fn reload_from_path(&mut self, path: &[String]) {
        self.path = Some(path.to_vec());
        let reader = Box::new(GtsFileReader::new(path, Some(self.cfg.clone()))) as Box<dyn GtsReader>;
        self.store = GtsStore::new(Some(reader));
    }

    #[must_use]
    pub fn validate_id(&self, gts_id: &str) -> GtsIdValidationResult {
        match GtsID::new(gts_id) {
            Ok(_) => GtsIdValidationResult {
                id: gts_id.to_owned(),
                valid: true,
                error: String::new(),
            },
            Err(e) => GtsIdValidationResult {
                id: gts_id.to_owned(),
                valid: false,
                error: e.to_string(),
            },
        }
    }

    #[must_use]
    pub fn parse_id(&self, gts_id: &str) -> GtsIdParseResult {
        match GtsID::new(gts_id) {
            Ok(id) => GtsIdParseResult {
                id: gts_id.to_owned(),
                ok: true,
                segments: id.gts_id_segments.iter().map(GtsIdSegmentInfo::from).collect(),
                error: String::new(),
            },
            Err(e) => GtsIdParseResult {
                id: gts_id.to_owned(),
                ok: false,
                segments: Vec::new(),
                error: e.to_string(),
            },
        }
    }

    #[must_use]
    pub fn match_id_pattern(&self, candidate: &str, pattern: &str) -> GtsIdMatchResult {
        match (GtsID::new(candidate), GtsWildcard::new(pattern)) {
            (Ok(c), Ok(p)) => GtsIdMatchResult {
                candidate: candidate.to_owned(),
                pattern: pattern.to_owned(),
                is_match: c.wildcard_match(&p),
                error: String::new(),
            },
            (Err(e), _) | (_, Err(e)) => GtsIdMatchResult {
                candidate: candidate.to_owned(),
                pattern: pattern.to_owned(),
                is_match: false,
                error: e.to_string(),
            },
        }
    }

    #[must_use]
    pub fn uuid(&self, gts_id: &str) -> GtsUuidResult {
        match GtsID::new(gts_id) {
            Ok(g) => GtsUuidResult {
                id: g.id.clone(),
                uuid: g.to_uuid().to_string(),
                error: String::new(),
            },
            Err(e) => GtsUuidResult {
                id: gts_id.to_owned(),
                uuid: String::new(),
                error: e.to_string(),
            },
        }
    }

    #[must_use]
    pub fn extract_id(&self, content: &Value) -> GtsExtractIdResult {
        let entity = GtsEntity::new(
            None,
            None,
            content,
            Some(&self.cfg),
            None,
            false,
            String::new(),
            None,
            None,
        );

        GtsExtractIdResult {
            id: entity.effective_id().unwrap_or_default(),
            schema_id: entity.schema_id,
            selected_entity_field: entity.selected_entity_field,
            selected_schema_id_field: entity.selected_schema_id_field,
            is_schema: entity.is_schema,
        }
    }

    pub fn add_entity(&self, content: &Value) -> GtsAddEntityResult {
        let entity = GtsEntity::new(
            None,
            None,
            content,
            Some(&self.cfg),
            None,
            false,
            String::new(),
            None,
            None,
        );

        if entity.gts_id.is_none() {
            return GtsAddEntityResult {
                ok: false,
                id: String::new(),
                schema_id: None,
                is_schema: false,
                error: "Unable to detect GTS ID in entity".to_owned(),
            };
        }

        let id = entity.effective_id().unwrap_or_default();
        let schema_id = entity.schema_id.clone();
        let is_schema = entity.is_schema;

        match self.store.register(entity) {
            Ok(()) => GtsAddEntityResult {
                ok: true,
                id,
                schema_id,
                is_schema,
                error: String::new(),
            },
            Err(e) => GtsAddEntityResult {
                ok: false,
                id: String::new(),
                schema_id: None,
                is_schema: false,
                error: e.to_string(),
            },
        }
    }

    pub fn add_entities(&self, items: &[Value]) -> GtsAddEntitiesResult {
        let results: Vec<GtsAddEntityResult> =
            items.iter().map(|item| self.add_entity(item)).collect();
        let ok = results.iter().all(|r| r.ok);
        GtsAddEntitiesResult { ok, results }
    }

    pub fn add_schema(&self, type_id: String, schema: &Value) -> GtsAddSchemaResult {
        match self.store.register_schema(&type_id, schema) {
            Ok(()) => GtsAddSchemaResult {
                ok: true,
                id: type_id,
                error: String::new(),
            },
            Err(e) => GtsAddSchemaResult {
                ok: false,
                id: String::new(),
                error: e.to_string(),
            },
        }
    }

    pub fn validate_instance(&self, gts_id: &str) -> GtsValidationResult {
        match self.store.validate_instance(gts_id) {
            Ok(()) => GtsValidationResult {
                id: gts_id.to_owned(),
                ok: true,
                error: String::new(),
            },
            Err(e) => GtsValidationResult {
                id: gts_id.to_owned(),
                ok: false,
                error: e.to_string(),
            },
        }
    }

    pub fn schema_graph(&self, gts_id: &str) -> GtsSchemaGraphResult {
        GtsSchemaGraphResult {
            graph: self.store.build_schema_graph(gts_id),
        }
    }

    pub fn compatibility(
        &self,
        old_schema_id: &str,
        new_schema_id: &str,
    ) -> GtsCompatibilityResult {
        match self.store.is_minor_compatible(old_schema_id, new_schema_id) {
            Ok(minor_compatible) => GtsCompatibilityResult {
                old: old_schema_id.to_owned(),
                new: new_schema_id.to_owned(),
                minor_compatible,
                error: String::new(),
            },
            Err(e) => GtsCompatibilityResult {
                old: old_schema_id.to_owned(),
                new: new_schema_id.to_owned(),
                minor_compatible: false,
                error: e.to_string(),
            },
        }
    }

    pub fn cast(&self, from_id: &str, to_schema_id: &str) -> GtsEntityCastResult {
        match self.store.cast(from_id, to_schema_id) {
            Ok(result) => result,
            Err(e) => GtsEntityCastResult::from_error(from_id, to_schema_id, &e.to_string()),
        }
    }

    #[must_use]
    pub fn query(&self, expr: &str, limit: usize) -> GtsStoreQueryResult {
        self.store.query(expr, limit)
    }

    pub fn attr(&self, gts_with_path: &str) -> JsonPathResolver {
        match GtsID::split_at_path(gts_with_path) {
            Ok((gts, Some(path))) => match self.store.get(&gts) {
                Some(entity) => entity.resolve_path(&path),
                None => JsonPathResolver::new(gts.clone(), Value::Null)
                    .failure(&path, &format!("Entity not found: {gts}")),
            },
            Ok((gts, None)) => JsonPathResolver::new(gts, Value::Null)
                .failure("", "Attribute selector requires '@path' in the identifier"),
            Err(e) => JsonPathResolver::new(String::new(), Value::Null).failure("", &e.to_string()),
        }
    }

    pub fn get_entity(&self, gts_id: &str) -> GtsGetEntityResult {
        match self.store.get(gts_id) {
            Some(entity) => GtsGetEntityResult {
                ok: true,
                id: entity.effective_id().unwrap_or_else(|| gts_id.to_owned()),
                schema_id: entity.schema_id.clone(),
                is_schema: entity.is_schema,
                content: Some(entity.content.clone()),
                error: String::new(),
            },
            None => GtsGetEntityResult {
                ok: false,
                id: String::new(),
                schema_id: None,
                is_schema: false,
                content: None,
                error: format!("Entity '{gts_id}' not found"),
            },
        }
    }
}
