use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resolves dotted attribute paths with `[i]` subscripts against a JSON
/// document (e.g. `foo.bar[2].baz`). A leading dot is optional. On failure
/// the resolver reports the offending step and the longest prefix that did
/// resolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonPathResolver {
    pub gts_id: String,
    pub content: Value,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_valid_path: String,
}

/// One step of a parsed path: an object key or an array subscript.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathStep {
    Key(String),
    Index(String),
}

impl PathStep {
    fn text(&self) -> String {
        match self {
            PathStep::Key(key) => key.clone(),
            PathStep::Index(raw) => format!("[{raw}]"),
        }
    }
}

impl JsonPathResolver {
    #[must_use]
    pub fn new(gts_id: String, content: Value) -> Self {
        JsonPathResolver {
            gts_id,
            content,
            path: String::new(),
            value: None,
            resolved: false,
            error: None,
            last_valid_path: String::new(),
        }
    }

    fn parse_steps(path: &str) -> Vec<PathStep> {
        let mut steps = Vec::new();
        let mut key = String::new();
        let mut chars = path.chars();

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if !key.is_empty() {
                        steps.push(PathStep::Key(std::mem::take(&mut key)));
                    }
                }
                '[' => {
                    if !key.is_empty() {
                        steps.push(PathStep::Key(std::mem::take(&mut key)));
                    }
                    let mut subscript = String::new();
                    for sub in chars.by_ref() {
                        if sub == ']' {
                            break;
                        }
                        subscript.push(sub);
                    }
                    steps.push(PathStep::Index(subscript));
                }
                _ => key.push(c),
            }
        }

        if !key.is_empty() {
            steps.push(PathStep::Key(key));
        }

        steps
    }

    fn extend_valid(valid: &str, step: &PathStep) -> String {
        match step {
            PathStep::Key(key) if valid.is_empty() => key.clone(),
            PathStep::Key(key) => format!("{valid}.{key}"),
            PathStep::Index(raw) => format!("{valid}[{raw}]"),
        }
    }

    /// Walks the content along `path`. Consumes and returns `self` so the
    /// resolver doubles as the result record.
    #[must_use]
    pub fn resolve(mut self, path: &str) -> Self {
        path.clone_into(&mut self.path);
        self.value = None;
        self.resolved = false;
        self.error = None;
        self.last_valid_path = String::new();

        let mut cur = self.content.clone();
        let mut valid = String::new();

        for step in Self::parse_steps(path) {
            match &cur {
                Value::Object(map) => {
                    let PathStep::Key(key) = &step else {
                        return self.fail_at(&step, &valid, "expected an object key");
                    };
                    let Some(next) = map.get(key) else {
                        return self.fail_at(&step, &valid, "no such field");
                    };
                    cur = next.clone();
                }
                Value::Array(items) => {
                    let raw = match &step {
                        PathStep::Index(raw) => raw.as_str(),
                        // Bare numeric keys index into arrays too.
                        PathStep::Key(key) => key.as_str(),
                    };
                    let Ok(idx) = raw.parse::<usize>() else {
                        return self.fail_at(&step, &valid, "expected a list index");
                    };
                    let Some(next) = items.get(idx) else {
                        return self.fail_at(&step, &valid, "index out of range");
                    };
                    cur = next.clone();
                }
                _ => {
                    return self.fail_at(&step, &valid, "cannot descend into a scalar");
                }
            }
            valid = Self::extend_valid(&valid, &step);
        }

        self.last_valid_path = valid;
        self.value = Some(cur);
        self.resolved = true;
        self
    }

    fn fail_at(mut self, step: &PathStep, valid: &str, cause: &str) -> Self {
        self.error = Some(format!(
            "Path not resolved at segment '{}': {cause}",
            step.text()
        ));
        valid.clone_into(&mut self.last_valid_path);
        self
    }

    /// Marks the resolver as failed with an externally supplied error (used
    /// when the entity itself could not be found).
    #[must_use]
    pub fn failure(mut self, path: &str, error: &str) -> Self {
        path.clone_into(&mut self.path);
        self.value = None;
        self.resolved = false;
        self.error = Some(error.to_owned());
        self.last_valid_path = String::new();
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver(content: Value) -> JsonPathResolver {
        JsonPathResolver::new("gts.a.b.c.d.v1~".to_owned(), content)
    }

    #[test]
    fn test_resolve_top_level_field() {
        let result = resolver(json!({"name": "widget"})).resolve("name");
        assert!(result.resolved);
        assert_eq!(result.value, Some(json!("widget")));
        assert_eq!(result.last_valid_path, "name");
    }

    #[test]
    fn test_resolve_nested_field() {
        let result = resolver(json!({"a": {"b": {"c": 7}}})).resolve("a.b.c");
        assert!(result.resolved);
        assert_eq!(result.value, Some(json!(7)));
    }

    #[test]
    fn test_resolve_leading_dot() {
        let result = resolver(json!({"a": {"b": 1}})).resolve(".a.b");
        assert!(result.resolved);
        assert_eq!(result.value, Some(json!(1)));
    }

    #[test]
    fn test_resolve_array_subscript() {
        let result = resolver(json!({"items": [10, 20, 30]})).resolve("items[1]");
        assert!(result.resolved);
        assert_eq!(result.value, Some(json!(20)));
        assert_eq!(result.last_valid_path, "items[1]");
    }

    #[test]
    fn test_resolve_mixed_path() {
        let content = json!({"foo": {"bar": [{"baz": "x"}, {"baz": "y"}, {"baz": "z"}]}});
        let result = resolver(content).resolve("foo.bar[2].baz");
        assert!(result.resolved);
        assert_eq!(result.value, Some(json!("z")));
    }

    #[test]
    fn test_resolve_nested_subscripts() {
        let result = resolver(json!({"m": [[1, 2], [3, 4]]})).resolve("m[1][0]");
        assert!(result.resolved);
        assert_eq!(result.value, Some(json!(3)));
    }

    #[test]
    fn test_resolve_bare_numeric_key_on_array() {
        let result = resolver(json!({"items": ["a", "b"]})).resolve("items.1");
        assert!(result.resolved);
        assert_eq!(result.value, Some(json!("b")));
    }

    #[test]
    fn test_resolve_empty_path_returns_document() {
        let content = json!({"a": 1});
        let result = resolver(content.clone()).resolve("");
        assert!(result.resolved);
        assert_eq!(result.value, Some(content));
    }

    #[test]
    fn test_missing_field_reports_last_valid_prefix() {
        let result = resolver(json!({"a": {"b": 1}})).resolve("a.missing");
        assert!(!result.resolved);
        assert_eq!(result.last_valid_path, "a");
        assert!(result.error.as_ref().unwrap().contains("'missing'"));
    }

    #[test]
    fn test_index_out_of_range() {
        let result = resolver(json!({"items": [1]})).resolve("items[5]");
        assert!(!result.resolved);
        assert_eq!(result.last_valid_path, "items");
        assert!(result.error.as_ref().unwrap().contains("out of range"));
    }

    #[test]
    fn test_non_numeric_subscript() {
        let result = resolver(json!({"items": [1]})).resolve("items[x]");
        assert!(!result.resolved);
        assert!(result.error.as_ref().unwrap().contains("list index"));
    }

    #[test]
    fn test_subscript_on_object() {
        let result = resolver(json!({"obj": {"k": 1}})).resolve("obj[0]");
        assert!(!result.resolved);
        assert!(result.error.as_ref().unwrap().contains("object key"));
    }

    #[test]
    fn test_descend_into_scalar() {
        let result = resolver(json!({"a": 5})).resolve("a.b");
        assert!(!result.resolved);
        assert_eq!(result.last_valid_path, "a");
        assert!(result.error.as_ref().unwrap().contains("scalar"));
    }

    #[test]
    fn test_failure_builder() {
        let result = resolver(Value::Null).failure("a.b", "Entity not found: gts.x");
        assert!(!result.resolved);
        assert_eq!(result.path, "a.b");
        assert_eq!(result.error, Some("Entity not found: gts.x".to_owned()));
    }

    #[test]
    fn test_result_serialization_skips_empty() {
        let result = resolver(json!({"a": 1})).resolve("a");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["resolved"], json!(true));
        assert!(value.get("error").is_none());
    }
}
