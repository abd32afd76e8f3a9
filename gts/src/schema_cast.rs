use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::gts::{GtsID, GtsIdSegment};

#[derive(Debug, Error)]
pub enum SchemaCastError {
    #[error("Instance must be an object for casting")]
    InstanceNotObject,

    #[error("Missing required property '{0}' and no default is defined")]
    MissingRequired(String),

    #[error("Can't cast schema to schema")]
    SourceIsSchema,

    #[error("Can't cast non-schema to schema")]
    TargetNotSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedProperty {
    pub path: String,
    pub change: String,
}

/// Outcome of casting an instance to a target schema.
///
/// Structural problems discovered while transforming (missing required
/// property without a default, non-object instance) and post-transform
/// validator failures are data on this record, not errors: the cast itself
/// always produces a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtsEntityCastResult {
    #[serde(rename = "from")]
    pub from_id: String,
    #[serde(rename = "to")]
    pub to_id: String,
    pub direction: String,
    pub added_properties: Vec<String>,
    pub removed_properties: Vec<String>,
    pub changed_properties: Vec<ChangedProperty>,
    pub fully_compatible: bool,
    pub incompatibility_reasons: Vec<String>,
    #[serde(rename = "result")]
    pub casted_instance: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GtsEntityCastResult {
    /// Structurally adapts `instance` to `target_schema` and revalidates the
    /// outcome against the full target schema.
    #[must_use]
    pub fn cast(from_id: &str, to_id: &str, instance: &Value, target_schema: &Value) -> Self {
        let direction = infer_direction(from_id, to_id);
        let effective = effective_object_schema(target_schema);

        let mut added = Vec::new();
        let mut removed = Vec::new();

        let casted = match transform(instance, effective, "", &mut added, &mut removed) {
            Ok(casted) => casted,
            Err(e) => {
                return GtsEntityCastResult {
                    from_id: from_id.to_owned(),
                    to_id: to_id.to_owned(),
                    direction,
                    added_properties: sorted_unique(added),
                    removed_properties: sorted_unique(removed),
                    changed_properties: Vec::new(),
                    fully_compatible: false,
                    incompatibility_reasons: vec![e.to_string()],
                    casted_instance: None,
                    error: None,
                };
            }
        };

        // The transformed instance must satisfy the FULL target schema, not
        // the effective-object form used while transforming.
        let reasons = validate_against(&casted, target_schema);
        let fully_compatible = reasons.is_empty();

        GtsEntityCastResult {
            from_id: from_id.to_owned(),
            to_id: to_id.to_owned(),
            direction,
            added_properties: sorted_unique(added),
            removed_properties: sorted_unique(removed),
            changed_properties: Vec::new(),
            fully_compatible,
            incompatibility_reasons: reasons,
            casted_instance: fully_compatible.then_some(casted),
            error: None,
        }
    }

    /// A result that carries only an error message, used by the ops facade
    /// when the store lookup already failed.
    #[must_use]
    pub fn from_error(from_id: &str, to_id: &str, error: &str) -> Self {
        GtsEntityCastResult {
            from_id: from_id.to_owned(),
            to_id: to_id.to_owned(),
            direction: "unknown".to_owned(),
            added_properties: Vec::new(),
            removed_properties: Vec::new(),
            changed_properties: Vec::new(),
            fully_compatible: false,
            incompatibility_reasons: Vec::new(),
            casted_instance: None,
            error: Some(error.to_owned()),
        }
    }
}

/// Compares the minor versions of the last segments when both identifiers
/// have the same shape (equal leading segments, last segments equal up to the
/// major version). Anything else is `unknown`.
#[must_use]
pub fn infer_direction(from_id: &str, to_id: &str) -> String {
    let (Ok(from), Ok(to)) = (GtsID::new(from_id), GtsID::new(to_id)) else {
        return "unknown".to_owned();
    };

    if from.gts_id_segments.len() != to.gts_id_segments.len() {
        return "unknown".to_owned();
    }
    let (Some(from_last), Some(to_last)) = (from.gts_id_segments.last(), to.gts_id_segments.last())
    else {
        return "unknown".to_owned();
    };

    let leading = from.gts_id_segments.len() - 1;
    let same_prefix = from.gts_id_segments[..leading]
        .iter()
        .zip(&to.gts_id_segments[..leading])
        .all(|(a, b)| a.segment == b.segment)
        && same_type(from_last, to_last);
    if !same_prefix {
        return "unknown".to_owned();
    }

    match (from_last.ver_minor, to_last.ver_minor) {
        (Some(from_minor), Some(to_minor)) if to_minor > from_minor => "up".to_owned(),
        (Some(from_minor), Some(to_minor)) if to_minor < from_minor => "down".to_owned(),
        (Some(_), Some(_)) => "none".to_owned(),
        _ => "unknown".to_owned(),
    }
}

fn same_type(a: &GtsIdSegment, b: &GtsIdSegment) -> bool {
    a.vendor == b.vendor
        && a.package == b.package
        && a.namespace == b.namespace
        && a.type_name == b.type_name
        && a.ver_major == b.ver_major
}

/// Picks the object-shaped part of a schema: the schema itself when it has
/// `properties` or `required` at top level, else the first such member of
/// `allOf`, else the schema unchanged.
#[must_use]
pub fn effective_object_schema(schema: &Value) -> &Value {
    if has_object_shape(schema) {
        return schema;
    }
    if let Some(all_of) = schema.get("allOf").and_then(Value::as_array) {
        for part in all_of {
            if has_object_shape(part) {
                return part;
            }
        }
    }
    schema
}

fn has_object_shape(schema: &Value) -> bool {
    schema.get("properties").is_some_and(Value::is_object)
        || schema.get("required").is_some_and(Value::is_array)
}

fn join_path(base: &str, prop: &str) -> String {
    if base.is_empty() {
        prop.to_owned()
    } else {
        format!("{base}.{prop}")
    }
}

/// Recursive transformation step: fill defaults, prune extras, descend into
/// nested objects and arrays of objects.
fn transform(
    instance: &Value,
    schema: &Value,
    base_path: &str,
    added: &mut Vec<String>,
    removed: &mut Vec<String>,
) -> Result<Value, SchemaCastError> {
    let Some(instance) = instance.as_object() else {
        return Err(SchemaCastError::InstanceNotObject);
    };

    let empty = Map::new();
    let target_props = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let prune_extras = matches!(schema.get("additionalProperties"), Some(Value::Bool(false)));

    let mut result = instance.clone();

    // Required properties: fill from defaults or fail.
    for prop in &required {
        if !result.contains_key(*prop) {
            let path = join_path(base_path, prop);
            let Some(default) = target_props.get(*prop).and_then(|p| p.get("default")) else {
                return Err(SchemaCastError::MissingRequired(path));
            };
            result.insert((*prop).to_owned(), default.clone());
            added.push(path);
        }
    }

    // Optional properties with defaults: fill when absent.
    for (prop, prop_schema) in target_props {
        if required.contains(&prop.as_str()) || result.contains_key(prop) {
            continue;
        }
        if let Some(default) = prop_schema.get("default") {
            result.insert(prop.clone(), default.clone());
            added.push(join_path(base_path, prop));
        }
    }

    // additionalProperties: false deletes everything the target does not declare.
    if prune_extras {
        let extras: Vec<String> = result
            .keys()
            .filter(|key| !target_props.contains_key(*key))
            .cloned()
            .collect();
        for key in extras {
            result.remove(&key);
            removed.push(join_path(base_path, &key));
        }
    }

    // Recurse into nested objects and arrays of objects.
    for (prop, prop_schema) in target_props {
        let Some(value) = result.get(prop).cloned() else {
            continue;
        };
        match prop_schema.get("type").and_then(Value::as_str) {
            Some("object") if value.is_object() => {
                let nested = effective_object_schema(prop_schema);
                let child = transform(&value, nested, &join_path(base_path, prop), added, removed)?;
                result.insert(prop.clone(), child);
            }
            Some("array") if value.is_array() => {
                let Some(items_schema) = prop_schema.get("items") else {
                    continue;
                };
                if items_schema.get("type").and_then(Value::as_str) != Some("object") {
                    continue;
                }
                let nested = effective_object_schema(items_schema);
                let Some(items) = value.as_array() else {
                    continue;
                };
                let mut casted_items = Vec::with_capacity(items.len());
                for (idx, item) in items.iter().enumerate() {
                    if item.is_object() {
                        let item_path = format!("{}[{idx}]", join_path(base_path, prop));
                        casted_items.push(transform(item, nested, &item_path, added, removed)?);
                    } else {
                        casted_items.push(item.clone());
                    }
                }
                result.insert(prop.clone(), Value::Array(casted_items));
            }
            _ => {}
        }
    }

    Ok(Value::Object(result))
}

/// Runs the full JSON Schema validator; returns the collected messages
/// (empty when the instance conforms). The top-level `$id`/`$schema` are
/// dropped before compiling so GTS-flavoured URIs never reach the resolver.
fn validate_against(instance: &Value, schema: &Value) -> Vec<String> {
    let mut schema_for_compile = schema.clone();
    if let Value::Object(ref mut map) = schema_for_compile {
        map.remove("$id");
        map.remove("$schema");
    }

    let compiled = match jsonschema::JSONSchema::compile(&schema_for_compile) {
        Ok(compiled) => compiled,
        Err(e) => return vec![format!("Invalid target schema: {e}")],
    };

    match compiled.validate(instance) {
        Ok(()) => Vec::new(),
        Err(errors) => errors.map(|e| e.to_string()).collect(),
    }
}

fn sorted_unique(mut paths: Vec<String>) -> Vec<String> {
    paths.sort();
    paths.dedup();
    paths
}
