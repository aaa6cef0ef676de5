//! ConfigLoader - loads source and entity configs from disk.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{EntityConfig, SourceConfig};
use crate::cache::Cache;
use crate::error::{ConfigError, ConfigResult};

const SOURCE_FILE: &str = "source.json";
const ENTITIES_DIR: &str = "entities";

/// Loads `<root>/<source>/source.json` and `<root>/<source>/entities/<entity>.json`.
///
/// Loaded configs are cached; call [`ConfigLoader::invalidate`] after editing files.
pub struct ConfigLoader {
    root: PathBuf,
    sources: Cache<String, SourceConfig>,
    entities: Cache<(String, String), EntityConfig>,
}

impl ConfigLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            sources: Cache::new(),
            entities: Cache::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load a source config. Fails with `NotFound` when the file does not exist.
    pub fn load_source(&self, source: &str) -> ConfigResult<Arc<SourceConfig>> {
        self.sources
            .get_or_try_load(&source.to_string(), || self.read_source(source))
    }

    /// Load an entity config. Fails with `NotFound` when the source or entity is unknown.
    pub fn load_entity(&self, source: &str, entity: &str) -> ConfigResult<Arc<EntityConfig>> {
        let key = (source.to_string(), entity.to_string());
        self.entities
            .get_or_try_load(&key, || self.read_entity(source, entity))
    }

    /// Entity ids configured for a source, sorted.
    pub fn list_entities(&self, source: &str) -> ConfigResult<Vec<String>> {
        let source_dir = self.source_dir(source)?;
        let entities_dir = source_dir.join(ENTITIES_DIR);
        if !entities_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entities: Vec<String> = fs::read_dir(&entities_dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|e| e == "json"))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect();
        entities.sort();
        Ok(entities)
    }

    /// Drop every cached config.
    pub fn invalidate(&self) {
        self.sources.invalidate();
        self.entities.invalidate();
    }

    fn source_dir(&self, source: &str) -> ConfigResult<PathBuf> {
        if !is_safe_id(source) {
            return Err(ConfigError::source_not_found(source));
        }
        let dir = self.root.join(source);
        if !dir.join(SOURCE_FILE).is_file() {
            return Err(ConfigError::source_not_found(source));
        }
        Ok(dir)
    }

    fn read_source(&self, source: &str) -> ConfigResult<SourceConfig> {
        let path = self.source_dir(source)?.join(SOURCE_FILE);
        let content = read_file(&path).map_err(|e| match e {
            ConfigError::Io(io) if io.kind() == ErrorKind::NotFound => {
                ConfigError::source_not_found(source)
            }
            other => other,
        })?;

        let mut config: SourceConfig = serde_json::from_str(&content)?;
        if config.source.is_empty() {
            config.source = source.to_string();
        }
        if config.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "source '{}' has an empty base_url",
                source
            )));
        }
        tracing::debug!(source, base_url = %config.base_url, "loaded source config");
        Ok(config)
    }

    fn read_entity(&self, source: &str, entity: &str) -> ConfigResult<EntityConfig> {
        let source_dir = self.source_dir(source)?;
        if !is_safe_id(entity) {
            return Err(ConfigError::entity_not_found(source, entity));
        }

        let path = source_dir.join(ENTITIES_DIR).join(format!("{}.json", entity));
        let content = read_file(&path).map_err(|e| match e {
            ConfigError::Io(io) if io.kind() == ErrorKind::NotFound => {
                ConfigError::entity_not_found(source, entity)
            }
            other => other,
        })?;

        let mut config: EntityConfig = serde_json::from_str(&content)?;
        if config.entity.is_empty() {
            config.entity = entity.to_string();
        }
        if !config.endpoints.fetch_one.contains("{id}") {
            return Err(ConfigError::Invalid(format!(
                "entity '{}/{}': fetch_one endpoint must contain {{id}}",
                source, entity
            )));
        }
        tracing::debug!(
            source,
            entity,
            rules = config.mapping.len(),
            "loaded entity config"
        );
        Ok(config)
    }
}

fn read_file(path: &Path) -> ConfigResult<String> {
    Ok(fs::read_to_string(path)?)
}

/// Ids are file names: no separators, no parent references.
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
