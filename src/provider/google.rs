use super::{
    ChatChunk, ChunkStream, DocumentHandle, GenerateRequest, PromptPart, Provider, ProviderError,
    ProviderFuture,
};
use crate::config::ModelConfig;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

const HARM_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Clone)]
pub struct GoogleProvider {
    http: reqwest::Client,
    api_key: String,
    api_base: Url,
}

impl GoogleProvider {
    pub fn new(http: reqwest::Client, api_key: String) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured("empty API key".to_string()));
        }
        let api_base = Url::parse("https://generativelanguage.googleapis.com/")
            .map_err(|e| ProviderError::NotConfigured(e.to_string()))?;
        Ok(Self {
            http,
            api_key,
            api_base,
        })
    }

    fn key_for<'a>(&'a self, cfg: &'a ModelConfig) -> &'a str {
        cfg.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .unwrap_or(&self.api_key)
    }

    fn build_url(&self, path: &str, key: &str, sse: bool) -> Result<Url, ProviderError> {
        // v1beta:streamGenerateContent supports Server-Sent Events with alt=sse.
        // Docs: https://ai.google.dev/api/rest/v1beta/models/streamGenerateContent
        let mut url = self
            .api_base
            .join(path)
            .map_err(|e| ProviderError::NotConfigured(e.to_string()))?;
        url.query_pairs_mut().append_pair("key", key);
        if sse {
            url.query_pairs_mut().append_pair("alt", "sse");
        }
        Ok(url)
    }

    async fn post(
        &self,
        url: Url,
        headers: HeaderMap,
        body: reqwest::Body,
        timeout: Duration,
    ) -> Result<reqwest::Response, ProviderError> {
        let send = self.http.post(url).headers(headers).body(body).send();
        let resp = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| ProviderError::Timeout(timeout))?
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }
        Ok(resp)
    }

    async fn post_generate(&self, req: GenerateRequest, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let action = if stream { "streamGenerateContent" } else { "generateContent" };
        let path = format!("v1beta/models/{}:{action}", req.config.model);
        let url = self.build_url(&path, self.key_for(&req.config), stream)?;

        let body = serde_json::to_vec(&GenerateContentRequest::from_request(&req))
            .map_err(|e| ProviderError::InvalidResponse(format!("failed to encode request: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let timeout = if stream {
            req.config.idle_timeout
        } else {
            req.config.request_timeout
        };
        self.post(url, headers, body.into(), timeout).await
    }

    #[cfg(test)]
    fn with_api_base(mut self, api_base: Url) -> Self {
        self.api_base = api_base;
        self
    }
}

/// 429 and `RESOURCE_EXHAUSTED` mean quota; everything else is a plain API error.
fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
        return ProviderError::QuotaExceeded(format!("HTTP {status}"));
    }
    ProviderError::Api {
        status: status.as_u16(),
        message: body.trim().to_string(),
    }
}

fn classify_stream_error(err: &ApiError) -> ProviderError {
    if err.code == Some(429) || err.status.as_deref() == Some("RESOURCE_EXHAUSTED") {
        return ProviderError::QuotaExceeded(err.message.clone().unwrap_or_default());
    }
    ProviderError::Api {
        status: err.code.unwrap_or(0),
        message: err.message.clone().unwrap_or_default(),
    }
}

impl Provider for GoogleProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    fn upload_document(&self, text: String) -> ProviderFuture<DocumentHandle> {
        let this = self.clone();
        Box::pin(async move {
            let url = this.build_url("upload/v1beta/files", &this.api_key, false)?;
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            headers.insert("x-goog-upload-protocol", HeaderValue::from_static("raw"));

            let resp = this
                .post(url, headers, text.into(), Duration::from_secs(120))
                .await?;
            let uploaded: UploadResponse = resp
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse(format!("upload response: {e}")))?;

            tracing::debug!(name = %uploaded.file.name, "uploaded document");
            Ok(DocumentHandle {
                name: uploaded.file.name,
                uri: uploaded.file.uri,
                mime_type: uploaded.file.mime_type.unwrap_or_else(|| "text/plain".to_string()),
            })
        })
    }

    fn generate(&self, req: GenerateRequest) -> ProviderFuture<String> {
        let this = self.clone();
        Box::pin(async move {
            let limit = req.config.request_timeout;
            let call = async move {
                let resp = this.post_generate(req, false).await?;
                resp.json::<GenerateContentResponse>()
                    .await
                    .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
            };
            let r = tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ProviderError::Timeout(limit))??;
            if let Some(err) = &r.error {
                return Err(classify_stream_error(err));
            }
            Ok(extract_text(&r).unwrap_or_default())
        })
    }

    fn stream_generate(&self, req: GenerateRequest) -> ProviderFuture<ChunkStream> {
        let this = self.clone();

        Box::pin(async move {
            let idle = req.config.idle_timeout;
            let resp = this.post_generate(req, true).await?;

            let (tx, rx) = mpsc::channel::<Result<ChatChunk, ProviderError>>(64);

            // Stops on the first failed send, i.e. once the consumer has
            // dropped the stream.
            tokio::spawn(async move {
                let mut stream = resp.bytes_stream();
                let mut parser = SseParser::new();

                loop {
                    let item = match tokio::time::timeout(idle, stream.next()).await {
                        Ok(Some(item)) => item,
                        Ok(None) => return,
                        Err(_) => {
                            let _ = tx.send(Err(ProviderError::Timeout(idle))).await;
                            return;
                        }
                    };
                    let bytes = match item {
                        Ok(b) => b,
                        Err(e) => {
                            let _ = tx.send(Err(ProviderError::Network(e.to_string()))).await;
                            return;
                        }
                    };

                    for ev in parser.push(&bytes) {
                        let data = match ev {
                            Ok(SseEvent::Data(data)) => data,
                            Ok(SseEvent::Other) => continue,
                            Err(e) => {
                                let _ = tx.send(Err(e)).await;
                                return;
                            }
                        };
                        if data.trim().is_empty() {
                            continue;
                        }

                        let r: GenerateContentResponse = match serde_json::from_str(&data) {
                            Ok(r) => r,
                            Err(e) => {
                                let _ = tx
                                    .send(Err(ProviderError::InvalidResponse(format!(
                                        "failed to parse SSE JSON: {e}"
                                    ))))
                                    .await;
                                return;
                            }
                        };
                        if let Some(err) = &r.error {
                            let _ = tx.send(Err(classify_stream_error(err))).await;
                            return;
                        }
                        if let Some(text) = extract_text(&r) {
                            if tx.send(Ok(ChatChunk { text })).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });

            Ok(Box::pin(ReceiverStream::new(rx)) as ChunkStream)
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

impl GenerateContentRequest {
    fn from_request(req: &GenerateRequest) -> Self {
        let cfg = &req.config;
        let parts = req
            .parts
            .iter()
            .map(|p| match p {
                PromptPart::Text(t) => Part {
                    text: Some(t.clone()),
                    file_data: None,
                },
                PromptPart::Document(d) => Part {
                    text: None,
                    file_data: Some(FileData {
                        mime_type: d.mime_type.clone(),
                        file_uri: d.uri.clone(),
                    }),
                },
            })
            .collect();

        let system_instruction = (!cfg.system_instruction.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part {
                text: Some(cfg.system_instruction.clone()),
                file_data: None,
            }],
        });

        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            system_instruction,
            generation_config: GenerationConfig {
                temperature: cfg.temperature,
                top_p: cfg.top_p,
                top_k: cfg.top_k,
                max_output_tokens: cfg.max_output_tokens,
            },
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|c| SafetySetting {
                    category: c.to_string(),
                    threshold: cfg.safety_threshold.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
struct SafetySetting {
    category: String,
    threshold: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    name: String,
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
}

fn extract_text(r: &GenerateContentResponse) -> Option<String> {
    // Concatenate all text parts of the first candidate.
    let cand = r.candidates.first()?;
    let content = cand.content.as_ref()?;
    let mut out = String::new();
    for p in &content.parts {
        if let Some(t) = &p.text {
            out.push_str(t);
        }
    }
    if out.is_empty() { None } else { Some(out) }
}

#[derive(Debug, Clone, PartialEq)]
enum SseEvent {
    Data(String),
    Other,
}

/// Minimal SSE parser.
///
/// - Collects UTF-8 lines
/// - Emits Data events when a blank line ends an event
struct SseParser {
    buf: Vec<u8>,
    cur_data: String,
}

impl SseParser {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            cur_data: String::new(),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<Result<SseEvent, ProviderError>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.drain(..=pos).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }

            if line.is_empty() {
                if !self.cur_data.is_empty() {
                    // Remove trailing newline from data field accumulation.
                    if self.cur_data.ends_with('\n') {
                        self.cur_data.pop();
                    }
                    out.push(Ok(SseEvent::Data(std::mem::take(&mut self.cur_data))));
                }
                continue;
            }

            let s = match std::str::from_utf8(&line) {
                Ok(s) => s,
                Err(e) => {
                    out.push(Err(ProviderError::InvalidResponse(format!(
                        "SSE line is not valid UTF-8: {e}"
                    ))));
                    continue;
                }
            };

            if let Some(rest) = s.strip_prefix("data:") {
                // One optional leading space after the colon.
                let rest = rest.strip_prefix(' ').unwrap_or(rest);
                self.cur_data.push_str(rest);
                self.cur_data.push('\n');
            } else {
                // Ignore other fields: event:, id:, retry:, comments
                out.push(Ok(SseEvent::Other));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(events: Vec<Result<SseEvent, ProviderError>>) -> Vec<String> {
        events
            .into_iter()
            .filter_map(|e| match e.unwrap() {
                SseEvent::Data(d) => Some(d),
                SseEvent::Other => None,
            })
            .collect()
    }

    #[test]
    fn sse_events_split_across_chunks() {
        let mut p = SseParser::new();
        assert!(data(p.push(b"data: {\"a\":")).is_empty());
        assert!(data(p.push(b"1}\r\n")).is_empty());
        assert_eq!(data(p.push(b"\r\ndata: two\n\n")), vec!["{\"a\":1}", "two"]);
    }

    #[test]
    fn sse_multi_line_data_and_other_fields() {
        let mut p = SseParser::new();
        let events = p.push(b"event: message\ndata: one\ndata: two\n\n");
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(SseEvent::Other)));
        assert!(matches!(&events[1], Ok(SseEvent::Data(d)) if d == "one\ntwo"));
    }

    #[test]
    fn status_429_is_quota() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_quota());
        assert!(classify_status(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#
        )
        .is_quota());
        let other = classify_status(StatusCode::INTERNAL_SERVER_ERROR, "oops");
        assert!(matches!(other, ProviderError::Api { status: 500, .. }));
    }

    #[test]
    fn in_stream_error_payload_is_classified() {
        let r: GenerateContentResponse = serde_json::from_str(
            r#"{"error":{"code":429,"message":"Resource has been exhausted","status":"RESOURCE_EXHAUSTED"}}"#,
        )
        .unwrap();
        assert!(classify_stream_error(r.error.as_ref().unwrap()).is_quota());
    }

    #[test]
    fn extract_text_joins_parts() {
        let r: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"},{"text":"lo"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(&r).as_deref(), Some("Hello"));
    }

    #[test]
    fn request_body_carries_config_and_documents() {
        let req = GenerateRequest {
            parts: vec![
                PromptPart::text("intro"),
                PromptPart::Document(DocumentHandle {
                    name: "files/x".into(),
                    uri: "https://example/files/x".into(),
                    mime_type: "text/plain".into(),
                }),
            ],
            config: ModelConfig::default(),
        };
        let body = serde_json::to_value(GenerateContentRequest::from_request(&req)).unwrap();

        assert_eq!(body["contents"][0]["parts"][0]["text"], "intro");
        assert_eq!(
            body["contents"][0]["parts"][1]["fileData"]["fileUri"],
            "https://example/files/x"
        );
        assert_eq!(body["generationConfig"]["topK"], 32);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 8192);
        assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
        assert_eq!(body["safetySettings"][0]["threshold"], "BLOCK_NONE");
        assert!(body["systemInstruction"]["parts"][0]["text"].is_string());
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(GoogleProvider::new(reqwest::Client::new(), " ".into()).is_err());
    }

    fn local_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    /// Serves one HTTP request, answering `body` after `delay`.
    fn slow_server(delay: Duration, body: &'static str) -> Url {
        use std::io::{BufRead, BufReader, Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap();
                    }
                }
            }
            let mut request_body = vec![0; content_length];
            reader.read_exact(&mut request_body).unwrap();

            std::thread::sleep(delay);
            let mut stream = stream;
            // The client may have given up already.
            let _ = write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    #[tokio::test]
    async fn one_shot_waits_past_the_idle_timeout() {
        let base = slow_server(
            Duration::from_millis(600),
            r#"{"candidates":[{"content":{"parts":[{"text":"full answer"}]}}]}"#,
        );
        let provider = GoogleProvider::new(local_client(), "key".into())
            .unwrap()
            .with_api_base(base);

        let mut config = ModelConfig::default();
        config.idle_timeout = Duration::from_millis(100);
        config.request_timeout = Duration::from_secs(10);
        let req = GenerateRequest {
            parts: vec![PromptPart::text("q")],
            config,
        };
        assert_eq!(provider.generate(req).await.unwrap(), "full answer");
    }

    #[tokio::test]
    async fn one_shot_gives_up_after_the_request_timeout() {
        let base = slow_server(Duration::from_millis(800), r#"{"candidates":[]}"#);
        let provider = GoogleProvider::new(local_client(), "key".into())
            .unwrap()
            .with_api_base(base);

        let mut config = ModelConfig::default();
        config.request_timeout = Duration::from_millis(100);
        let req = GenerateRequest {
            parts: vec![PromptPart::text("q")],
            config,
        };
        let err = provider.generate(req).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(d) if d == Duration::from_millis(100)));
    }
}
