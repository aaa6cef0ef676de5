//! Collection of raw records from the external API.
//!
//! List endpoints are paged with a skip/limit query convention (`$skip` /
//! `$limit` for DofusDB) and answer `{ "data": [...], "total", "limit", "skip" }`.
//! Pages are requested one after another; nothing runs in parallel.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigLoader, EntityConfig, SourceConfig};
use crate::error::{CollectError, CollectResult, ConfigError};
use crate::settings::Settings;

/// Upper bound on pages per call, in case the API never reports an end.
const DEFAULT_MAX_PAGES: usize = 10_000;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"));

/// Paging options of a `fetch_many` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectOptions {
    /// 0 collects everything
    #[serde(default)]
    pub limit: usize,
    /// Skip value of the first request
    #[serde(default)]
    pub offset: usize,
    /// Items requested per HTTP call; defaults to `limit`, then the entity default
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

fn default_max_pages() -> usize {
    DEFAULT_MAX_PAGES
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            limit: 0,
            offset: 0,
            page_size: None,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl CollectOptions {
    pub fn limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

/// Paging metadata of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectMeta {
    /// Total reported by the last page (or counted when the API gives none)
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
    pub collected: usize,
    /// HTTP calls issued
    pub pages: usize,
}

/// Items plus paging metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectOutput {
    pub items: Vec<Value>,
    pub meta: CollectMeta,
}

/// One page of a list endpoint.
#[derive(Debug, Default, Deserialize)]
struct ListPage {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    limit: Option<u64>,
}

/// Fetches raw records using the entity's endpoint and filter definitions.
pub struct CollectService {
    loader: Arc<ConfigLoader>,
    client: reqwest::Client,
    default_page_size: usize,
}

impl CollectService {
    pub fn new(loader: Arc<ConfigLoader>, settings: &Settings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            loader,
            client,
            default_page_size: settings.page_size.max(1),
        }
    }

    /// Collect a list of raw records, following pages until `limit` items
    /// are gathered (or every page when `limit` is 0).
    ///
    /// Filter keys absent from the entity's `filters.supported` are dropped.
    pub async fn fetch_many(
        &self,
        source: &str,
        entity: &str,
        filters: &Map<String, Value>,
        options: &CollectOptions,
    ) -> CollectResult<CollectOutput> {
        let source_config = self.loader.load_source(source)?;
        let entity_config = self.loader.load_entity(source, entity)?;

        let page_size = self.page_size(&entity_config, options);
        let filter_pairs = filter_query(&entity_config, filters);
        let path = render_template(&entity_config.endpoints.fetch_many, &[])?;

        let mut items: Vec<Value> = Vec::new();
        let mut skip = options.offset;
        let mut total: Option<u64> = None;
        let mut pages = 0;

        tracing::info!(source, entity, limit = options.limit, offset = options.offset, page_size, "collecting");

        loop {
            if pages >= options.max_pages {
                tracing::warn!(source, entity, pages, "max pages reached, stopping collection");
                break;
            }

            let mut url = build_url(&source_config, &path)?;
            {
                let mut query = url.query_pairs_mut();
                for (key, value) in &filter_pairs {
                    query.append_pair(key, value);
                }
                query.append_pair(&entity_config.pagination.skip_param, &skip.to_string());
                query.append_pair(&entity_config.pagination.limit_param, &page_size.to_string());
            }

            tracing::debug!(%url, skip, limit = page_size, "requesting page");
            let page = self.get_page(&source_config, url).await?;
            pages += 1;

            if page.total.is_some() {
                total = page.total;
            }
            let received = page.data.len();
            tracing::debug!(received, total = ?total, "page received");
            if received == 0 {
                break;
            }

            for item in page.data {
                if options.limit > 0 && items.len() >= options.limit {
                    break;
                }
                items.push(item);
            }
            if options.limit > 0 && items.len() >= options.limit {
                break;
            }

            skip += received;
            let exhausted = match total {
                Some(t) => skip as u64 >= t,
                None => {
                    let served = page.limit.map(|l| l as usize).unwrap_or(page_size);
                    received < served
                }
            };
            if exhausted {
                break;
            }
        }

        let collected = items.len();
        tracing::info!(source, entity, collected, pages, "collection done");

        Ok(CollectOutput {
            meta: CollectMeta {
                total: total.unwrap_or((options.offset + collected) as u64),
                limit: options.limit,
                offset: options.offset,
                collected,
                pages,
            },
            items,
        })
    }

    /// Fetch a single raw record by external id.
    pub async fn fetch_one(&self, source: &str, entity: &str, external_id: &str) -> CollectResult<Value> {
        let source_config = self.loader.load_source(source)?;
        let entity_config = self.loader.load_entity(source, entity)?;

        let path = render_template(&entity_config.endpoints.fetch_one, &[("id", external_id)])?;
        let url = build_url(&source_config, &path)?;
        tracing::debug!(%url, "fetching record");

        let body = self.get_json(&source_config, url).await?;
        Ok(body)
    }

    fn page_size(&self, entity: &EntityConfig, options: &CollectOptions) -> usize {
        let requested = options
            .page_size
            .or_else(|| (options.limit > 0).then_some(options.limit))
            .or(entity.pagination.page_size)
            .unwrap_or(self.default_page_size);

        let capped = match entity.pagination.max_page_size {
            Some(max) => requested.min(max),
            None => requested,
        };
        capped.max(1)
    }

    async fn get_page(&self, source: &SourceConfig, url: Url) -> CollectResult<ListPage> {
        let body = self.get_json(source, url).await?;
        match body {
            Value::Array(data) => Ok(ListPage {
                data,
                ..ListPage::default()
            }),
            Value::Object(_) => serde_json::from_value(body)
                .map_err(|e| CollectError::InvalidResponse(e.to_string())),
            other => Err(CollectError::InvalidResponse(format!(
                "expected a list page, got {}",
                type_name(&other)
            ))),
        }
    }

    async fn get_json(&self, source: &SourceConfig, url: Url) -> CollectResult<Value> {
        let mut request = self.client.get(url.clone()).header("Accept", "application/json");
        if let Some(secs) = source.timeout_secs {
            request = request.timeout(Duration::from_secs(secs));
        }

        let response = request
            .send()
            .await
            .map_err(|e| CollectError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%url, status = status.as_u16(), "fetch failed");
            return Err(CollectError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| CollectError::InvalidResponse(e.to_string()))
    }
}

/// Supported filters as query pairs. Arrays become `key[$in][]` pairs.
fn filter_query(entity: &EntityConfig, filters: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in filters {
        if !entity.filters.is_supported(key) {
            tracing::debug!(entity = %entity.entity, filter = %key, "dropping unsupported filter");
            continue;
        }
        match value {
            Value::Array(values) => {
                let array_key = format!("{}[$in][]", key);
                pairs.extend(
                    values
                        .iter()
                        .filter_map(scalar_to_string)
                        .map(|v| (array_key.clone(), v)),
                );
            }
            other => {
                if let Some(v) = scalar_to_string(other) {
                    pairs.push((key.clone(), v));
                }
            }
        }
    }
    pairs
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Substitute `{name}` placeholders. Unknown placeholders are a config error.
fn render_template(template: &str, params: &[(&str, &str)]) -> Result<String, ConfigError> {
    let mut missing = None;
    let rendered = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        let name = &caps[1];
        match params.iter().find(|(k, _)| *k == name) {
            Some((_, v)) => v.to_string(),
            None => {
                missing = Some(name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ConfigError::Invalid(format!(
            "endpoint '{}' has unknown placeholder {{{}}}",
            template, name
        ))),
        None => Ok(rendered.into_owned()),
    }
}

fn build_url(source: &SourceConfig, path: &str) -> Result<Url, ConfigError> {
    let base = source.base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    Url::parse(&format!("{}/{}", base, path))
        .map_err(|e| ConfigError::Invalid(format!("invalid endpoint URL for '{}': {}", source.source, e)))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Endpoints, Filters, Pagination};
    use serde_json::json;

    fn entity(supported: &[&str]) -> EntityConfig {
        EntityConfig {
            entity: "monsters".into(),
            label: String::new(),
            entity_type: "monster".into(),
            id_path: "id".into(),
            sub_entities: Vec::new(),
            endpoints: Endpoints {
                fetch_one: "/monsters/{id}".into(),
                fetch_many: "/monsters".into(),
            },
            pagination: Pagination::default(),
            filters: Filters {
                supported: supported.iter().map(|s| s.to_string()).collect(),
            },
            mapping: Vec::new(),
        }
    }

    #[test]
    fn test_filter_query_drops_unsupported() {
        let filters = json!({ "race": 5, "name": "Bouftou", "color": "red" });
        let pairs = filter_query(&entity(&["race", "name"]), filters.as_object().unwrap());

        assert!(pairs.contains(&("race".to_string(), "5".to_string())));
        assert!(pairs.contains(&("name".to_string(), "Bouftou".to_string())));
        assert!(!pairs.iter().any(|(k, _)| k == "color"));
    }

    #[test]
    fn test_filter_query_arrays() {
        let filters = json!({ "typeId": [1, 2] });
        let pairs = filter_query(&entity(&["typeId"]), filters.as_object().unwrap());
        assert_eq!(
            pairs,
            vec![
                ("typeId[$in][]".to_string(), "1".to_string()),
                ("typeId[$in][]".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_render_template() {
        assert_eq!(render_template("/monsters/{id}", &[("id", "31")]).unwrap(), "/monsters/31");
        assert!(render_template("/monsters/{uid}", &[("id", "31")]).is_err());
    }

    #[test]
    fn test_build_url_joins_slashes() {
        let source = SourceConfig {
            source: "dofusdb".into(),
            label: String::new(),
            base_url: "https://api.dofusdb.fr/".into(),
            default_lang: None,
            timeout_secs: None,
        };
        let url = build_url(&source, "/monsters/31").unwrap();
        assert_eq!(url.as_str(), "https://api.dofusdb.fr/monsters/31");
    }

    #[test]
    fn test_page_size_resolution() {
        let service = CollectService::new(Arc::new(ConfigLoader::new("unused")), &Settings::default());
        let mut config = entity(&[]);

        assert_eq!(service.page_size(&config, &CollectOptions::default()), 50);
        assert_eq!(service.page_size(&config, &CollectOptions::limit(2)), 2);
        assert_eq!(service.page_size(&config, &CollectOptions::limit(2).with_page_size(10)), 10);

        config.pagination.max_page_size = Some(50);
        assert_eq!(service.page_size(&config, &CollectOptions::limit(500)), 50);
    }
}
