//! Resource Registry
//!
//! Named content blobs the model may ask to read. Entries live in
//! `resources.json` as `{"resources": [...]}` and are validated on load.
//!
//! Content is resolved by `ContentType`:
//! - `file`: `Content` holds a path, re-read on every `get`
//! - `url`: `Content` holds an http(s) URL, re-fetched on every `get`
//! - anything else: `Content` is the text itself

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::write_atomic;
use crate::error::{AgentError, Result};

/// Timeout for `url` resources
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One stored resource
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct ResourceEntry {
    pub name: String,
    #[serde(rename = "ID")]
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub content_type: Option<String>,
    pub content: String,
    /// Megabytes, two decimals
    pub size: f64,
    #[serde(default = "now_iso")]
    pub last_modified: String,
    #[serde(default)]
    pub filetype: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// A resource without its `Content`, safe to embed in prompts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceMetadata {
    pub name: String,
    #[serde(rename = "ID")]
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub content_type: Option<String>,
    pub size: f64,
    pub last_modified: String,
    #[serde(default)]
    pub filetype: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl From<&ResourceEntry> for ResourceMetadata {
    fn from(entry: &ResourceEntry) -> Self {
        Self {
            name: entry.name.clone(),
            id: entry.id.clone(),
            description: entry.description.clone(),
            content_type: entry.content_type.clone(),
            size: entry.size,
            last_modified: entry.last_modified.clone(),
            filetype: entry.filetype.clone(),
            tags: entry.tags.clone(),
        }
    }
}

/// Input to `create` and `update`
#[derive(Clone, Debug, Default)]
pub struct ResourceSpec {
    pub name: String,
    pub description: String,
    pub content: String,
    pub content_type: Option<String>,
    /// With a non-`file` type, read `content` as a path once and store the text
    pub local_file: bool,
    pub filetype: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl ResourceSpec {
    pub fn text(
        name: impl Into<String>,
        description: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            content: content.into(),
            content_type: Some("string".into()),
            ..Self::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Resource request parsed from model output: `{"Name": ..., "ID": ...}` plus
/// any extra routing fields the model added
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceRequest(pub Map<String, Value>);

impl ResourceRequest {
    pub fn name(&self) -> Option<&str> {
        self.0.get("Name").and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get("ID").and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    /// Batch de-duplication key
    pub fn key(&self) -> (Option<String>, Option<String>) {
        (self.name().map(str::to_string), self.id().map(str::to_string))
    }
}

/// Result of resolving one resource request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceCallResult {
    Resolved(ResourceEntry),
    Failure { error: String },
}

impl ResourceCallResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    /// Resolved content, if any
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Resolved(entry) => Some(entry.content.as_str()),
            Self::Failure { .. } => None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceCollection {
    #[serde(default)]
    resources: Vec<ResourceEntry>,
}

/// File-backed registry of resources
#[derive(Debug)]
pub struct ResourceRegistry {
    entries: Vec<ResourceEntry>,
    path: Option<PathBuf>,
    http: reqwest::Client,
}

impl ResourceRegistry {
    /// In-memory registry with no backing file
    pub fn new() -> Result<Self> {
        Ok(Self {
            entries: Vec::new(),
            path: None,
            http: http_client()?,
        })
    }

    /// Load and validate `resources.json`; a missing or empty file starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            parse_collection(&text).inspect_err(|e| {
                tracing::error!(path = %path.display(), error = %e, "Resource validation failed");
            })?
        } else {
            tracing::debug!(path = %path.display(), "Resources file not found, starting empty");
            Vec::new()
        };
        tracing::debug!(count = entries.len(), "Loaded resources");
        Ok(Self {
            entries,
            path: Some(path),
            http: http_client()?,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Full stored entries (content unresolved)
    pub fn list(&self) -> &[ResourceEntry] {
        &self.entries
    }

    pub fn list_metadata(&self) -> Vec<ResourceMetadata> {
        self.entries.iter().map(ResourceMetadata::from).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a resource. Returns `Ok(None)` when the name is already taken.
    pub async fn create(&mut self, spec: ResourceSpec) -> Result<Option<ResourceEntry>> {
        if self.position(&spec.name, None).is_some() {
            tracing::info!(resource = %spec.name, "Resource already exists, skipping creation");
            return Ok(None);
        }
        if spec.name.trim().is_empty() {
            return Err(AgentError::InvalidArgument("resource name cannot be empty".into()));
        }

        let (content, size) = self.prepare_content(&spec).await?;
        let entry = ResourceEntry {
            name: spec.name,
            id: uuid::Uuid::new_v4().to_string(),
            description: spec.description,
            content_type: spec.content_type,
            content,
            size,
            last_modified: now_iso(),
            filetype: spec.filetype,
            tags: spec.tags,
        };
        self.entries.push(entry.clone());
        self.persist()?;
        tracing::info!(resource = %entry.name, id = %entry.id, "Resource added");
        Ok(Some(entry))
    }

    /// Replace a resource's content and description, keeping its ID.
    ///
    /// `ContentType`, `Filetype` and `Tags` keep their old values when the
    /// spec leaves them unset, and so does an empty `Description`.
    pub async fn update(&mut self, spec: ResourceSpec) -> Result<ResourceEntry> {
        let index = self
            .position(&spec.name, None)
            .ok_or_else(|| not_found(&spec.name))?;

        let content_type = spec
            .content_type
            .clone()
            .or_else(|| self.entries[index].content_type.clone());
        let resolved_spec = ResourceSpec {
            content_type: content_type.clone(),
            ..spec
        };
        let (content, size) = self.prepare_content(&resolved_spec).await?;

        let entry = &mut self.entries[index];
        if !resolved_spec.description.is_empty() {
            entry.description = resolved_spec.description;
        }
        entry.content = content;
        entry.size = size;
        entry.content_type = content_type;
        entry.last_modified = now_iso();
        if resolved_spec.filetype.is_some() {
            entry.filetype = resolved_spec.filetype;
        }
        if resolved_spec.tags.is_some() {
            entry.tags = resolved_spec.tags;
        }
        let updated = entry.clone();
        self.persist()?;
        tracing::info!(resource = %updated.name, "Resource updated");
        Ok(updated)
    }

    /// Remove by name or ID
    pub fn delete(&mut self, name_or_id: &str) -> Result<ResourceEntry> {
        let index = self
            .position(name_or_id, Some(name_or_id))
            .ok_or_else(|| not_found(name_or_id))?;
        let removed = self.entries.remove(index);
        self.persist()?;
        tracing::info!(resource = %removed.name, remaining = self.entries.len(), "Resource deleted");
        Ok(removed)
    }

    /// Fetch by name or ID with `Content` resolved live
    pub async fn get(&self, name_or_id: &str) -> Result<ResourceEntry> {
        self.get_by(Some(name_or_id), Some(name_or_id)).await
    }

    /// Fetch by name, else by ID
    pub async fn get_by(&self, name: Option<&str>, id: Option<&str>) -> Result<ResourceEntry> {
        let index = name
            .and_then(|n| self.position(n, None))
            .or_else(|| id.and_then(|i| self.position_by_id(i)))
            .ok_or_else(|| not_found(name.or(id).unwrap_or_default()))?;

        let mut entry = self.entries[index].clone();
        entry.content = self
            .resolve_content(entry.content_type.as_deref(), &entry.content)
            .await?;
        entry.size = size_mb(&entry.content);
        tracing::debug!(resource = %entry.name, id = %entry.id, "Resource resolved");
        Ok(entry)
    }

    /// Resolve a parsed request; failures are captured, not raised
    pub async fn resolve_request(&self, request: &ResourceRequest) -> ResourceCallResult {
        if request.name().is_none() && request.id().is_none() {
            return ResourceCallResult::failure("Invalid resource request format");
        }
        match self.get_by(request.name(), request.id()).await {
            Ok(entry) => ResourceCallResult::Resolved(entry),
            Err(e) => {
                tracing::warn!(request = ?request.0, error = %e, "Resource request failed");
                ResourceCallResult::failure(e.to_string())
            }
        }
    }

    fn position(&self, name: &str, id: Option<&str>) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name == name)
            .or_else(|| id.and_then(|i| self.position_by_id(i)))
    }

    fn position_by_id(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    /// Stored content and size for a spec
    async fn prepare_content(&self, spec: &ResourceSpec) -> Result<(String, f64)> {
        let is_linked = spec
            .content_type
            .as_deref()
            .is_some_and(|ct| matches!(ct.to_ascii_lowercase().as_str(), "file" | "url"));

        if is_linked {
            let text = self
                .resolve_content(spec.content_type.as_deref(), &spec.content)
                .await?;
            return Ok((spec.content.clone(), size_mb(&text)));
        }
        if spec.local_file {
            let text = read_local(&spec.content).await?;
            let size = size_mb(&text);
            return Ok((text, size));
        }
        Ok((spec.content.clone(), size_mb(&spec.content)))
    }

    async fn resolve_content(&self, content_type: Option<&str>, content: &str) -> Result<String> {
        match content_type.map(str::to_ascii_lowercase).as_deref() {
            Some("file") => read_local(content).await,
            Some("url") => self.fetch(content).await,
            _ => Ok(content.to_string()),
        }
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| AgentError::Fetch(format!("invalid URL '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AgentError::Fetch(format!("Unsupported file location: {url}")));
        }
        tracing::info!(url, "Fetching resource");
        let response = self
            .http
            .get(parsed)
            .send()
            .await
            .map_err(|e| AgentError::Fetch(format!("{url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::Fetch(format!("{url}: HTTP {status}")));
        }
        response
            .text()
            .await
            .map_err(|e| AgentError::Fetch(format!("{url}: {e}")))
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let collection = ResourceCollection {
            resources: self.entries.clone(),
        };
        let text = serde_json::to_string_pretty(&collection)?;
        write_atomic(path, text.as_bytes())?;
        tracing::debug!(path = %path.display(), "Saved resources");
        Ok(())
    }
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))
}

async fn read_local(path: &str) -> Result<String> {
    if !Path::new(path).is_file() {
        tracing::error!(path, "Resource file not found");
        return Err(AgentError::FileMissing(path.to_string()));
    }
    Ok(tokio::fs::read_to_string(path).await?)
}

fn parse_collection(text: &str) -> Result<Vec<ResourceEntry>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let collection: ResourceCollection =
        serde_json::from_str(text).map_err(|e| AgentError::Validation(e.to_string()))?;

    let mut seen = HashSet::new();
    for entry in &collection.resources {
        if !is_iso_timestamp(&entry.last_modified) {
            return Err(AgentError::Validation(format!(
                "resource '{}': LastModified must be a valid ISO format date",
                entry.name
            )));
        }
        if !seen.insert(entry.name.as_str()) {
            return Err(AgentError::Validation(format!(
                "duplicate resource name '{}'",
                entry.name
            )));
        }
    }
    Ok(collection.resources)
}

fn not_found(what: &str) -> AgentError {
    tracing::error!(resource = what, "Resource not found");
    AgentError::NotFound(format!("resource '{what}'"))
}

/// UTF-8 byte length in megabytes, rounded to two decimals
#[allow(clippy::cast_precision_loss)]
pub fn size_mb(content: &str) -> f64 {
    let mb = content.len() as f64 / BYTES_PER_MB;
    (mb * 100.0).round() / 100.0
}

fn now_iso() -> String {
    chrono::Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

fn is_iso_timestamp(value: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(value).is_ok()
        || chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_in(dir: &tempfile::TempDir) -> ResourceRegistry {
        ResourceRegistry::load(dir.path().join("resources.json")).unwrap()
    }

    #[tokio::test]
    async fn test_string_resource_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_in(&dir);
        let content = "é".repeat(300_000);

        let created = registry
            .create(ResourceSpec::text("notes", "Some notes", content.clone()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.size, size_mb(&content));

        let fetched = registry.get("notes").await.unwrap();
        assert_eq!(fetched.content, content);
        assert!((fetched.size - 0.57).abs() < f64::EPSILON);

        // by ID too, and after reload
        let reloaded = registry_in(&dir);
        assert_eq!(reloaded.get(&created.id).await.unwrap().name, "notes");
    }

    #[tokio::test]
    async fn test_duplicate_name_is_a_silent_noop() {
        let mut registry = ResourceRegistry::new().unwrap();
        let first = registry.create(ResourceSpec::text("X", "d", "one")).await.unwrap();
        let second = registry.create(ResourceSpec::text("X", "d", "two")).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("X").await.unwrap().content, "one");
    }

    #[tokio::test]
    async fn test_file_resource_is_read_live() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.txt");
        std::fs::write(&file, "v1").unwrap();
        let path = file.to_str().unwrap().to_string();

        let mut registry = registry_in(&dir);
        let entry = registry
            .create(ResourceSpec::text("doc", "A doc", path.clone()).with_content_type("file"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.content, path);

        assert_eq!(registry.get("doc").await.unwrap().content, "v1");
        std::fs::write(&file, "version two").unwrap();
        assert_eq!(registry.get("doc").await.unwrap().content, "version two");

        std::fs::remove_file(&file).unwrap();
        assert!(matches!(
            registry.get("doc").await,
            Err(AgentError::FileMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_rejected_on_create() {
        let mut registry = ResourceRegistry::new().unwrap();
        let result = registry
            .create(ResourceSpec::text("ghost", "d", "/no/such/file").with_content_type("file"))
            .await;
        assert!(matches!(result, Err(AgentError::FileMissing(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_local_file_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("snap.txt");
        std::fs::write(&file, "snapshot").unwrap();

        let mut registry = ResourceRegistry::new().unwrap();
        let spec = ResourceSpec {
            local_file: true,
            ..ResourceSpec::text("snap", "d", file.to_str().unwrap())
        };
        registry.create(spec).await.unwrap();
        std::fs::remove_file(&file).unwrap();
        assert_eq!(registry.get("snap").await.unwrap().content, "snapshot");
    }

    #[tokio::test]
    async fn test_update_preserves_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_in(&dir);
        let mut spec = ResourceSpec::text("r", "old", "a");
        spec.tags = Some(vec!["t1".into()]);
        let created = registry.create(spec).await.unwrap().unwrap();

        let updated = registry
            .update(ResourceSpec {
                content_type: None,
                ..ResourceSpec::text("r", "new", "bbb")
            })
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.description, "new");
        assert_eq!(updated.content, "bbb");
        assert_eq!(updated.content_type.as_deref(), Some("string"));
        assert_eq!(updated.tags, Some(vec!["t1".to_string()]));

        assert!(matches!(
            registry.update(ResourceSpec::text("missing", "d", "c")).await,
            Err(AgentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_by_name_or_id() {
        let mut registry = ResourceRegistry::new().unwrap();
        let a = registry.create(ResourceSpec::text("a", "d", "1")).await.unwrap().unwrap();
        registry.create(ResourceSpec::text("b", "d", "2")).await.unwrap();

        registry.delete(&a.id).unwrap();
        registry.delete("b").unwrap();
        assert!(registry.is_empty());
        assert!(matches!(registry.delete("b"), Err(AgentError::NotFound(_))));
        assert!(matches!(registry.get("a").await, Err(AgentError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_metadata_omits_content() {
        let mut registry = ResourceRegistry::new().unwrap();
        registry
            .create(ResourceSpec::text("secret", "d", "payload"))
            .await
            .unwrap();
        let metadata = serde_json::to_value(registry.list_metadata()).unwrap();
        assert_eq!(metadata[0]["Name"], json!("secret"));
        assert!(metadata[0].get("Content").is_none());
        assert!(metadata[0].get("ID").is_some());
    }

    #[test]
    fn test_load_rejects_malformed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.json");

        std::fs::write(&path, r#"{"resources": [{"Name": "x"}]}"#).unwrap();
        assert!(matches!(
            ResourceRegistry::load(&path),
            Err(AgentError::Validation(_))
        ));

        let entry = json!({
            "Name": "x", "ID": "1", "Description": "d", "Content": "c",
            "Size": 0.0, "LastModified": "yesterday"
        });
        std::fs::write(&path, json!({"resources": [entry]}).to_string()).unwrap();
        assert!(matches!(
            ResourceRegistry::load(&path),
            Err(AgentError::Validation(_))
        ));

        let entry = json!({
            "Name": "x", "ID": "1", "Description": "d", "Content": "c",
            "Size": 0.0, "LastModified": "2024-05-01T10:00:00.123456", "Color": "red"
        });
        std::fs::write(&path, json!({"resources": [entry]}).to_string()).unwrap();
        assert!(ResourceRegistry::load(&path).is_err());

        std::fs::write(&path, "").unwrap();
        assert!(ResourceRegistry::load(&path).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_url_scheme_restricted() {
        let mut registry = ResourceRegistry::new().unwrap();
        let result = registry
            .create(ResourceSpec::text("f", "d", "ftp://example.com/x").with_content_type("url"))
            .await;
        assert!(matches!(result, Err(AgentError::Fetch(_))));
    }

    #[tokio::test]
    async fn test_resolve_request() {
        let mut registry = ResourceRegistry::new().unwrap();
        let entry = registry.create(ResourceSpec::text("X", "d", "xx")).await.unwrap().unwrap();

        let by_id = ResourceRequest(serde_json::from_value(json!({"ID": entry.id})).unwrap());
        assert_eq!(registry.resolve_request(&by_id).await.content(), Some("xx"));

        let empty = ResourceRequest(serde_json::from_value(json!({"Other": 1})).unwrap());
        assert_eq!(
            registry.resolve_request(&empty).await,
            ResourceCallResult::failure("Invalid resource request format")
        );

        let missing = ResourceRequest(serde_json::from_value(json!({"Name": "nope"})).unwrap());
        assert!(registry.resolve_request(&missing).await.content().is_none());
    }
}
