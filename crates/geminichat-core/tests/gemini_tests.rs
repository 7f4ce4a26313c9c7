use geminichat_core::*;
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::*;
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &str = "test-api-key";

async fn client() -> (MockServer, GeminiClient) {
    let server = MockServer::start().await;
    let client = GeminiClient::new(KEY).with_base_url(server.uri());
    (server, client)
}

fn sse(chunks: &[serde_json::Value]) -> String {
    chunks
        .iter()
        .map(|c| format!("data: {c}\r\n\r\n"))
        .collect()
}

async fn collect(
    mut rx: futures::channel::mpsc::UnboundedReceiver<StreamEvent>,
) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.next().await {
        events.push(event);
    }
    events
}

fn history() -> Vec<ProviderTurn> {
    vec![ProviderTurn::user_text("Hello")]
}

#[tokio::test]
async fn test_stream_yields_text_then_final_usage() {
    let (server, client) = client().await;
    let body = sse(&[
        json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Hel"}]}}],
               "usageMetadata": {"promptTokenCount": 4, "totalTokenCount": 4}}),
        json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "lo"}]},
                               "finishReason": "STOP"}],
               "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6}}),
    ]);

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-flash:streamGenerateContent"))
        .and(query_param("alt", "sse"))
        .and(header("x-goog-api-key", KEY))
        .and(body_partial_json(json!({
            "contents": [{"role": "user", "parts": [{"text": "Hello"}]}]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let rx = client
        .generate_stream("gemini-2.5-flash", &history(), &GenerationConfig::default())
        .await
        .unwrap();
    let events = collect(rx).await;

    let texts: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Fragment(f) => f.text.clone(),
            _ => None,
        })
        .collect();
    assert_eq!(texts, ["Hel", "lo"]);

    let usages: Vec<UsageDelta> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Fragment(f) => f.usage,
            _ => None,
        })
        .collect();
    assert_eq!(usages, [UsageDelta::new(4, 2, 6)]);
    assert!(matches!(events.last(), Some(StreamEvent::Done)));
}

#[tokio::test]
async fn test_stream_through_session() {
    let (server, client) = client().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-flash:streamGenerateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[
            json!({"candidates": [{"content": {"parts": [{"text": "Bonjour"}]}, "finishReason": "STOP"}],
                   "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 1, "totalTokenCount": 4}}),
        ])))
        .mount(&server)
        .await;

    let mut session = ChatSession::new(std::sync::Arc::new(client));
    let outcome = session.send_message("Say hi in French", vec![]).await.unwrap();
    assert_eq!(outcome.display_text(), "Bonjour");
    assert_eq!(session.usage().total_tokens, 4);
}

#[tokio::test]
async fn test_last_line_without_newline_is_kept() {
    let (server, client) = client().await;
    let mut body = sse(&[json!({"candidates": [{"content": {"parts": [{"text": "Hel"}]}}]})]);
    // Final event with no trailing newline.
    let last = json!({"candidates": [{"content": {"parts": [{"text": "lo"}]}, "finishReason": "STOP"}],
                      "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6}});
    body.push_str(&format!("data: {last}"));
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-flash:streamGenerateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let mut session = ChatSession::new(std::sync::Arc::new(client));
    let outcome = session.send_message("Hello", vec![]).await.unwrap();
    assert_eq!(outcome.display_text(), "Hello");
    assert_eq!(outcome.usage(), Some(UsageDelta::new(4, 2, 6)));
    assert_eq!(session.usage().total_tokens, 6);
    assert_eq!(session.turns()[1].text(), "Hello");
}

#[tokio::test]
async fn test_prompt_block_reported() {
    let (server, client) = client().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-flash:streamGenerateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[
            json!({"promptFeedback": {"blockReason": "SAFETY"},
                   "usageMetadata": {"promptTokenCount": 5, "totalTokenCount": 5}}),
        ])))
        .mount(&server)
        .await;

    let events = collect(
        client
            .generate_stream("gemini-2.5-flash", &history(), &GenerationConfig::default())
            .await
            .unwrap(),
    )
    .await;
    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::Fragment(Fragment { block_reason: Some(r), .. }) if r == "SAFETY"
    )));
}

#[tokio::test]
async fn test_http_errors_become_provider_errors() {
    let (server, client) = client().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-flash:streamGenerateContent"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "12")
                .set_body_json(json!({
                    "error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"}
                })),
        )
        .mount(&server)
        .await;

    let err = client
        .generate_stream("gemini-2.5-flash", &history(), &GenerationConfig::default())
        .await
        .unwrap_err();
    match err {
        ChatError::Provider {
            status,
            message,
            retryable,
            retry_after,
        } => {
            assert_eq!(status, Some(429));
            assert!(message.contains("Quota exceeded"));
            assert!(retryable);
            assert_eq!(retry_after, Some(Duration::from_secs(12)));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_bad_request_not_retryable() {
    let (server, client) = client().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}
        })))
        .mount(&server)
        .await;

    let err = client
        .generate("gemini-2.5-flash", &history(), &GenerationConfig::default())
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("INVALID_ARGUMENT"));
}

#[tokio::test]
async fn test_cache_query_sends_cached_content() {
    let (server, client) = client().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
        .and(body_partial_json(json!({"cachedContent": "cachedContents/abc"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "The speaker is Ada."}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 2000, "candidatesTokenCount": 6,
                              "totalTokenCount": 2006, "cachedContentTokenCount": 1990}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = caching::query_cache(
        &client,
        "gemini-2.5-flash",
        &GenerationConfig::default(),
        "cachedContents/abc",
        "Who is speaking?",
    )
    .await
    .unwrap();
    assert_eq!(response.text, "The speaker is Ada.");
    assert_eq!(response.usage.map(|u| u.cached_tokens), Some(1990));
}

#[tokio::test]
async fn test_resumable_upload() {
    let (server, client) = client().await;
    let session_url = format!("{}/upload-session/1", server.uri());

    Mock::given(method("POST"))
        .and(path("/upload/v1beta/files"))
        .and(header("x-goog-upload-protocol", "resumable"))
        .and(header("x-goog-upload-command", "start"))
        .and(header("x-goog-upload-header-content-type", "video/mp4"))
        .and(header("x-goog-upload-header-content-length", "4"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-goog-upload-url", session_url.as_str()))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/upload-session/1"))
        .and(header_exists("x-goog-upload-offset"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "file": {
                "name": "files/abc123",
                "displayName": "talk.mp4",
                "mimeType": "video/mp4",
                "sizeBytes": "4",
                "uri": "https://generativelanguage.googleapis.com/v1beta/files/abc123",
                "state": "PROCESSING"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let file = client
        .upload_file(&AttachmentInput::new("talk.mp4", "video/mp4", vec![0, 0, 0, 1]))
        .await
        .unwrap();
    assert_eq!(file.name, "files/abc123");
    assert_eq!(file.state, ProcessingState::Processing);
    assert_eq!(file.size_bytes, Some(4));
}

#[tokio::test]
async fn test_create_cache_body() {
    let (server, client) = client().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/cachedContents"))
        .and(body_partial_json(json!({
            "model": "models/gemini-2.5-flash",
            "ttl": "300s",
            "systemInstruction": {"parts": [{"text": "Answer briefly."}]},
            "contents": [{"role": "user", "parts": [{"fileData": {
                "mimeType": "application/pdf", "fileUri": "https://files/abc"
            }}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "cachedContents/xyz",
            "model": "models/gemini-2.5-flash",
            "createTime": "2025-06-01T12:00:00.123456Z",
            "expireTime": "2025-06-01T12:05:00.123456Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let file = UploadedFile {
        name: "files/abc".into(),
        display_name: None,
        mime_type: "application/pdf".into(),
        uri: "https://files/abc".into(),
        size_bytes: None,
        state: ProcessingState::Active,
    };
    let request = CacheRequest::for_file("gemini-2.5-flash", &file, Duration::from_secs(300))
        .with_system_instruction(Some("Answer briefly.".into()));
    let handle = client.create_cache(&request).await.unwrap();
    assert_eq!(handle.name, "cachedContents/xyz");
    assert_eq!(handle.ttl, Some(Duration::from_secs(300)));
    assert_eq!(handle.state, ProcessingState::Active);
}

#[tokio::test]
async fn test_list_caches_follows_pages() {
    let (server, client) = client().await;
    Mock::given(method("GET"))
        .and(path("/v1beta/cachedContents"))
        .and(query_param("pageToken", "next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cachedContents": [{"name": "cachedContents/two"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1beta/cachedContents"))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cachedContents": [{"name": "cachedContents/one", "displayName": "lecture"}],
            "nextPageToken": "next"
        })))
        .mount(&server)
        .await;

    let caches = client.list_caches().await.unwrap();
    let names: Vec<&str> = caches.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["cachedContents/one", "cachedContents/two"]);
    assert_eq!(caches[0].display_name.as_deref(), Some("lecture"));
}

#[tokio::test]
async fn test_delete_cache() {
    let (server, client) = client().await;
    Mock::given(method("DELETE"))
        .and(path("/v1beta/cachedContents/xyz"))
        .and(header("x-goog-api-key", KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    client.delete_cache("cachedContents/xyz").await.unwrap();
}

#[tokio::test]
async fn test_missing_cache_is_provider_error() {
    let (server, client) = client().await;
    Mock::given(method("GET"))
        .and(path("/v1beta/cachedContents/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": 404, "message": "Not found", "status": "NOT_FOUND"}
        })))
        .mount(&server)
        .await;

    let err = client.get_cache("cachedContents/gone").await.unwrap_err();
    assert!(matches!(err, ChatError::Provider { status: Some(404), .. }));
}
