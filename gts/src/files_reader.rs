use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::entities::{GtsConfig, GtsEntity, GtsFile};
use crate::store::GtsReader;

const EXCLUDE_LIST: &[&str] = &["node_modules", "dist", "build"];
const VALID_EXTENSIONS: &[&str] = &["json", "jsonc", "gts", "yaml", "yml"];

/// Reads entities from JSON (and YAML) documents under one or more paths.
/// Malformed files are skipped silently; I/O failures never propagate.
pub struct GtsFileReader {
    paths: Vec<PathBuf>,
    cfg: GtsConfig,
    files: Vec<PathBuf>,
    initialized: bool,
}

impl GtsFileReader {
    #[must_use]
    pub fn new(path: &[String], cfg: Option<GtsConfig>) -> Self {
        let paths = path
            .iter()
            .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
            .collect();

        GtsFileReader {
            paths,
            cfg: cfg.unwrap_or_default(),
            files: Vec::new(),
            initialized: false,
        }
    }

    fn has_valid_extension(path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| VALID_EXTENSIONS.contains(&ext.as_str()))
    }

    fn is_excluded_dir(path: &Path) -> bool {
        path.is_dir()
            && path
                .file_name()
                .is_some_and(|name| EXCLUDE_LIST.contains(&name.to_string_lossy().as_ref()))
    }

    fn collect_files(&mut self) {
        fn push(path: &Path, seen: &mut HashSet<String>, collected: &mut Vec<PathBuf>) {
            let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
            let key = resolved.to_string_lossy().to_string();
            if seen.insert(key) {
                tracing::debug!("- discovered file: {}", resolved.display());
                collected.push(resolved);
            }
        }

        let mut seen = HashSet::new();
        let mut collected = Vec::new();

        for path in &self.paths {
            let resolved = path.canonicalize().unwrap_or_else(|_| path.clone());

            if resolved.is_file() {
                if Self::has_valid_extension(&resolved) {
                    push(&resolved, &mut seen, &mut collected);
                }
            } else if resolved.is_dir() {
                for entry in WalkDir::new(&resolved)
                    .follow_links(true)
                    .into_iter()
                    .filter_entry(|e| !Self::is_excluded_dir(e.path()))
                    .flatten()
                {
                    let entry_path = entry.path();
                    if entry_path.is_file() && Self::has_valid_extension(entry_path) {
                        push(entry_path, &mut seen, &mut collected);
                    }
                }
            }
        }

        self.files = collected;
    }

    fn load_document(file_path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
        let text = fs::read_to_string(file_path)?;

        let extension = file_path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        let value: Value = match extension.as_str() {
            "yaml" | "yml" => serde_saphyr::from_str(&text)?,
            _ => serde_json::from_str(&text)?,
        };

        Ok(value)
    }

    fn process_file(&self, file_path: &Path) -> Vec<GtsEntity> {
        let content = match Self::load_document(file_path) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!("Failed to parse file {}: {e}", file_path.display());
                return Vec::new();
            }
        };

        let json_file = GtsFile::new(
            file_path.to_string_lossy().to_string(),
            file_path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
            content.clone(),
        );

        // Top-level array: one entity per element, sequence index retained.
        let elements: Vec<(Option<usize>, &Value)> = match content.as_array() {
            Some(items) => items.iter().enumerate().map(|(i, v)| (Some(i), v)).collect(),
            None => vec![(None, &content)],
        };

        let mut entities = Vec::new();
        for (seq, element) in elements {
            let entity = GtsEntity::new(
                Some(json_file.clone()),
                seq,
                element,
                Some(&self.cfg),
                None,
                false,
                String::new(),
                None,
                None,
            );
            if let Some(id) = entity.effective_id() {
                tracing::debug!("- discovered entity: {id}");
                entities.push(entity);
            } else {
                tracing::debug!(
                    "- skipped entity from {} (no detectable ID)",
                    file_path.display()
                );
            }
        }

        entities
    }
}

impl GtsReader for GtsFileReader {
    fn iter(&mut self) -> Box<dyn Iterator<Item = GtsEntity> + '_> {
        if !self.initialized {
            self.collect_files();
            self.initialized = true;
        }

        tracing::debug!("Processing {} files from {:?}", self.files.len(), self.paths);

        #[allow(clippy::needless_collect)]
        let entities: Vec<GtsEntity> = self
            .files
            .iter()
            .flat_map(|file_path| self.process_file(file_path))
            .collect();

        Box::new(entities.into_iter())
    }

    fn read_by_id(&self, _entity_id: &str) -> Option<GtsEntity> {
        // No random access over plain files.
        None
    }

    fn reset(&mut self) {
        self.initialized = false;
        self.files.clear();
    }
}
