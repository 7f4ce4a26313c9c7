use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::endpoints;
use crate::context::{AttachmentInput, FileData, ProviderPart, ProviderTurn, Role};
use crate::error::ChatError;
use crate::llm::gemini::{GeminiClient, SystemInstruction};

/// Server-side processing state of an uploaded file or cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingState {
    #[default]
    #[serde(alias = "STATE_UNSPECIFIED")]
    Processing,
    Active,
    Failed,
}

/// A file stored provider-side, referenced by URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub display_name: Option<String>,
    pub mime_type: String,
    pub uri: String,
    pub size_bytes: Option<u64>,
    pub state: ProcessingState,
}

impl UploadedFile {
    /// The file as a content part for cache creation or a prompt.
    pub fn as_part(&self) -> ProviderPart {
        ProviderPart::FileData {
            file_data: FileData {
                mime_type: self.mime_type.clone(),
                file_uri: self.uri.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHandle {
    pub name: String,
    pub display_name: Option<String>,
    pub model: Option<String>,
    pub state: ProcessingState,
    pub create_time: Option<DateTime<Utc>>,
    pub expire_time: Option<DateTime<Utc>>,
    pub ttl: Option<Duration>,
}

impl CacheHandle {
    /// Time left before the provider evicts the cache.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expire_time
            .and_then(|expire| (expire - now).to_std().ok())
    }
}

/// Parameters for creating a context cache.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    pub model: String,
    pub contents: Vec<ProviderTurn>,
    pub ttl: Duration,
    pub system_instruction: Option<String>,
    pub display_name: Option<String>,
}

impl CacheRequest {
    /// A cache holding a single uploaded file.
    pub fn for_file(model: impl Into<String>, file: &UploadedFile, ttl: Duration) -> Self {
        Self {
            model: model.into(),
            contents: vec![ProviderTurn {
                role: Role::User,
                parts: vec![file.as_part()],
            }],
            ttl,
            system_instruction: None,
            display_name: file.display_name.clone(),
        }
    }

    pub fn with_system_instruction(mut self, instruction: Option<String>) -> Self {
        self.system_instruction = instruction.filter(|s| !s.trim().is_empty());
        self
    }
}

/// Provider-side file storage and context caches.
#[async_trait::async_trait]
pub trait CacheProvider: Send + Sync {
    async fn upload_file(&self, file: &AttachmentInput) -> Result<UploadedFile, ChatError>;

    async fn get_file(&self, name: &str) -> Result<UploadedFile, ChatError>;

    async fn create_cache(&self, request: &CacheRequest) -> Result<CacheHandle, ChatError>;

    async fn get_cache(&self, name: &str) -> Result<CacheHandle, ChatError>;

    async fn list_caches(&self) -> Result<Vec<CacheHandle>, ChatError>;

    async fn delete_cache(&self, name: &str) -> Result<(), ChatError>;
}

/// Format a TTL the way the API expects: whole seconds with an `s` suffix.
pub fn format_ttl(ttl: Duration) -> String {
    format!("{}s", ttl.as_secs())
}

/// Parse `300s`, `90m`, `1h`, `1d` or a bare number of seconds.
pub fn parse_ttl(input: &str) -> Option<Duration> {
    let input = input.trim();
    let (digits, unit) = match input.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => input.split_at(idx),
        None => (input, "s"),
    };
    let value: u64 = digits.parse().ok()?;
    let secs = match unit {
        "s" => value,
        "m" => value.checked_mul(60)?,
        "h" => value.checked_mul(3_600)?,
        "d" => value.checked_mul(86_400)?,
        _ => return None,
    };
    (secs > 0).then(|| Duration::from_secs(secs))
}

// ─── Wire types ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct FileEnvelope {
    file: FileWire,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileWire {
    name: String,
    display_name: Option<String>,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    uri: String,
    size_bytes: Option<String>,
    #[serde(default)]
    state: ProcessingState,
}

impl From<FileWire> for UploadedFile {
    fn from(wire: FileWire) -> Self {
        Self {
            name: wire.name,
            display_name: wire.display_name,
            mime_type: wire.mime_type,
            uri: wire.uri,
            size_bytes: wire.size_bytes.and_then(|s| s.parse().ok()),
            state: wire.state,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateCacheBody<'a> {
    model: String,
    contents: &'a [ProviderTurn],
    ttl: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheWire {
    name: String,
    display_name: Option<String>,
    model: Option<String>,
    create_time: Option<DateTime<Utc>>,
    expire_time: Option<DateTime<Utc>>,
    ttl: Option<String>,
}

impl From<CacheWire> for CacheHandle {
    fn from(wire: CacheWire) -> Self {
        let ttl = wire
            .ttl
            .as_deref()
            .and_then(|t| parse_ttl(t.trim_end_matches(|c: char| c == 's').split('.').next()?))
            .or_else(|| match (wire.create_time, wire.expire_time) {
                (Some(created), Some(expires)) => (expires - created).to_std().ok(),
                _ => None,
            });
        Self {
            name: wire.name,
            display_name: wire.display_name.filter(|d| !d.is_empty()),
            model: wire.model,
            // Cached contents are usable as soon as they are returned.
            state: ProcessingState::Active,
            create_time: wire.create_time,
            expire_time: wire.expire_time,
            ttl,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListCachesResponse {
    #[serde(default)]
    cached_contents: Vec<CacheWire>,
    next_page_token: Option<String>,
}

#[async_trait::async_trait]
impl CacheProvider for GeminiClient {
    async fn upload_file(&self, file: &AttachmentInput) -> Result<UploadedFile, ChatError> {
        let start_url = format!(
            "{}/upload/{}/files",
            self.base_url,
            endpoints::API_VERSION
        );

        let start = self
            .authed(self.client.post(&start_url))
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", file.size().to_string())
            .header("X-Goog-Upload-Header-Content-Type", &file.mime_type)
            .json(&serde_json::json!({ "file": { "display_name": file.name } }))
            .send()
            .await?;
        let start = Self::check_status(start).await?;

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ChatError::provider("Upload session returned no upload URL"))?;

        tracing::info!(name = %file.name, bytes = file.size(), "uploading file");
        let finish = self
            .authed(self.client.post(&upload_url))
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(file.bytes.clone())
            .send()
            .await?;
        let finish = Self::check_status(finish).await?;

        let envelope: FileEnvelope = finish.json().await?;
        Ok(envelope.file.into())
    }

    async fn get_file(&self, name: &str) -> Result<UploadedFile, ChatError> {
        let response = self
            .authed(self.client.get(self.api_url(name)))
            .send()
            .await?;
        let wire: FileWire = Self::check_status(response).await?.json().await?;
        Ok(wire.into())
    }

    async fn create_cache(&self, request: &CacheRequest) -> Result<CacheHandle, ChatError> {
        let model = if request.model.starts_with("models/") {
            request.model.clone()
        } else {
            format!("models/{}", request.model)
        };
        let body = CreateCacheBody {
            model,
            contents: &request.contents,
            ttl: format_ttl(request.ttl),
            system_instruction: request
                .system_instruction
                .as_deref()
                .map(SystemInstruction::text),
            display_name: request.display_name.as_deref(),
        };

        let response = self
            .authed(self.client.post(self.api_url("cachedContents")))
            .json(&body)
            .send()
            .await?;
        let wire: CacheWire = Self::check_status(response).await?.json().await?;
        Ok(wire.into())
    }

    async fn get_cache(&self, name: &str) -> Result<CacheHandle, ChatError> {
        let response = self
            .authed(self.client.get(self.api_url(name)))
            .send()
            .await?;
        let wire: CacheWire = Self::check_status(response).await?.json().await?;
        Ok(wire.into())
    }

    async fn list_caches(&self) -> Result<Vec<CacheHandle>, ChatError> {
        let mut caches = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.authed(self.client.get(self.api_url("cachedContents")));
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: ListCachesResponse =
                Self::check_status(request.send().await?).await?.json().await?;

            caches.extend(page.cached_contents.into_iter().map(CacheHandle::from));
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(caches)
    }

    async fn delete_cache(&self, name: &str) -> Result<(), ChatError> {
        let response = self
            .authed(self.client.delete(self.api_url(name)))
            .send()
            .await?;
        Self::check_status(response).await?;
        tracing::info!(cache = name, "deleted cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_parsing() {
        assert_eq!(parse_ttl("300s"), Some(Duration::from_secs(300)));
        assert_eq!(parse_ttl("1h"), Some(Duration::from_secs(3_600)));
        assert_eq!(parse_ttl("1d"), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_ttl("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_ttl("0s"), None);
        assert_eq!(parse_ttl("1w"), None);
        assert_eq!(parse_ttl(""), None);
        assert_eq!(format_ttl(Duration::from_secs(3_600)), "3600s");
    }

    #[test]
    fn file_state_from_wire() {
        let wire: FileWire = serde_json::from_value(serde_json::json!({
            "name": "files/abc",
            "mimeType": "video/mp4",
            "uri": "https://example/files/abc",
            "sizeBytes": "1048576",
            "state": "PROCESSING"
        }))
        .unwrap();
        let file = UploadedFile::from(wire);
        assert_eq!(file.state, ProcessingState::Processing);
        assert_eq!(file.size_bytes, Some(1_048_576));

        let wire: FileWire =
            serde_json::from_value(serde_json::json!({"name": "files/x", "state": "ACTIVE"}))
                .unwrap();
        assert_eq!(UploadedFile::from(wire).state, ProcessingState::Active);
    }

    #[test]
    fn cache_ttl_derived_from_timestamps() {
        let wire: CacheWire = serde_json::from_value(serde_json::json!({
            "name": "cachedContents/xyz",
            "model": "models/gemini-2.5-flash",
            "createTime": "2025-01-01T00:00:00Z",
            "expireTime": "2025-01-01T01:00:00Z"
        }))
        .unwrap();
        let handle = CacheHandle::from(wire);
        assert_eq!(handle.ttl, Some(Duration::from_secs(3_600)));
        assert_eq!(handle.state, ProcessingState::Active);

        let halfway = "2025-01-01T00:30:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(handle.remaining(halfway), Some(Duration::from_secs(1_800)));
    }

    #[test]
    fn cache_request_for_file_uses_file_data() {
        let file = UploadedFile {
            name: "files/abc".into(),
            display_name: Some("talk.mp4".into()),
            mime_type: "video/mp4".into(),
            uri: "https://example/files/abc".into(),
            size_bytes: None,
            state: ProcessingState::Active,
        };
        let request = CacheRequest::for_file("gemini-2.5-flash", &file, Duration::from_secs(300))
            .with_system_instruction(Some("Answer from the video.".into()));
        let json = serde_json::to_value(&request.contents).unwrap();
        assert_eq!(
            json[0]["parts"][0],
            serde_json::json!({"fileData": {"mimeType": "video/mp4", "fileUri": "https://example/files/abc"}})
        );
        assert_eq!(request.system_instruction.as_deref(), Some("Answer from the video."));
    }
}
