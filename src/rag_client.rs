//! Client for the external RAG backend's document CRUD, retrieval, and chat
//! endpoints (the backend itself is out of scope; only its HTTP surface is
//! consumed here).
//!
//! Built on `reqwest`, mirroring the thin "build request → send → classify
//! non-2xx/invalid-JSON into one error enum → return decoded body" shape used
//! throughout this codebase's lineage for outbound HTTP clients.
#![allow(dead_code)]

use crate::error::{RemoteError, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Strip a leading `/` and a `datasets/` prefix from a dataset id, so callers
/// can pass either a bare id or a path-shaped one interchangeably.
pub fn normalize_dataset_id(raw: &str) -> String {
	let trimmed = raw.trim().trim_start_matches('/');
	trimmed.strip_prefix("datasets/").unwrap_or(trimmed).to_string()
}

/// Which side of a synced item a RAG document represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
	Note,
	Transcript,
}

impl DocKind {
	fn suffix(self) -> &'static str {
		match self {
			DocKind::Note => " (note)",
			DocKind::Transcript => " (transcript)",
		}
	}
}

/// `"{title or 'Untitled'} [{platform}:{video_id}:{created_at_ms}] (note|transcript)"`.
pub fn build_document_name(title: Option<&str>, platform: &str, video_id: &str, created_at_ms: i64, kind: DocKind) -> String {
	let title = title.map(str::trim).filter(|t| !t.is_empty()).unwrap_or("Untitled");
	format!("{} [{}:{}:{}]{}", title, platform, video_id, created_at_ms, kind.suffix())
}

/// Query parameters known to be tracking noise, stripped from `[SOURCE]`.
const TRACKING_PARAM_PREFIXES: [&str; 2] = ["utm_", "spm_id_from"];
const TRACKING_PARAM_EXACT: [&str; 1] = ["vd_source"];

/// Strip tracking-query parameters (`utm_*`, `vd_source`, `spm_id_from`, ...)
/// from a source URL, preserving parameter order otherwise.
pub fn clean_source_url(url: &str) -> String {
	let Some(query_start) = url.find('?') else {
		return url.to_string();
	};
	let (base, query) = url.split_at(query_start);
	let query = &query[1..];
	let kept: Vec<&str> = query
		.split('&')
		.filter(|pair| {
			let key = pair.split('=').next().unwrap_or("");
			!TRACKING_PARAM_PREFIXES.iter().any(|p| key.starts_with(p)) && !TRACKING_PARAM_EXACT.contains(&key)
		})
		.collect();
	if kept.is_empty() {
		base.to_string()
	} else {
		format!("{}?{}", base, kept.join("&"))
	}
}

fn doc_header(title: Option<&str>, platform: &str, video_id: &str, source: Option<&str>) -> String {
	let title = title.unwrap_or("");
	let source = source.map(clean_source_url).unwrap_or_default();
	format!("[TITLE]={}\n[PLATFORM]={}\n[VIDEO_ID]={}\n[SOURCE]={}\n", title, platform, video_id, source)
}

/// Build the note document body: header followed by the raw markdown.
pub fn build_note_document_body(title: Option<&str>, platform: &str, video_id: &str, source: Option<&str>, markdown: &str) -> String {
	format!("{}\n{}", doc_header(title, platform, video_id, source), markdown)
}

fn format_hhmmss(seconds: f64) -> String {
	let total = seconds.max(0.0) as i64;
	format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Build the transcript document body: header followed by
/// `[VID=…][PLATFORM=…][TIME=HH:MM:SS-HH:MM:SS] <text>` blocks, one per
/// (possibly merged) segment.
pub fn build_transcript_document_body(
	title: Option<&str>,
	platform: &str,
	video_id: &str,
	source: Option<&str>,
	merged_segments: &[(f64, f64, String)],
) -> String {
	let mut body = doc_header(title, platform, video_id, source);
	body.push('\n');
	for (start, end, text) in merged_segments {
		body.push_str(&format!(
			"[VID={}][PLATFORM={}][TIME={}-{}] {}\n\n",
			video_id,
			platform,
			format_hhmmss(*start),
			format_hhmmss(*end),
			text
		));
	}
	body
}

/// A document as returned by `list_documents`/`create_document_by_text`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagDocument {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub indexing_status: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListDocumentsPage {
	pub documents: Vec<RagDocument>,
	pub has_more: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievedSegment {
	pub content: String,
	pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BatchIndexingStatus {
	pub documents: Vec<RagDocument>,
}

/// Dataset document CRUD, retrieval, and indexing-status polling.
#[async_trait]
pub trait RagKnowledgeClient: Send + Sync {
	async fn list_documents(&self, dataset_id: &str, page: u32, limit: u32) -> Result<ListDocumentsPage, SyncError>;

	async fn retrieve(
		&self,
		dataset_id: &str,
		query: &str,
		top_k: u32,
		score_threshold: Option<f64>,
	) -> Result<Vec<RetrievedSegment>, SyncError>;

	async fn create_document_by_text(
		&self,
		dataset_id: &str,
		name: &str,
		text: &str,
		doc_language: &str,
		indexing_technique: &str,
	) -> Result<RagDocument, SyncError>;

	async fn update_document_by_text(&self, dataset_id: &str, document_id: &str, name: &str, text: &str) -> Result<RagDocument, SyncError>;

	async fn delete_document(&self, dataset_id: &str, document_id: &str) -> Result<(), SyncError>;

	async fn get_batch_indexing_status(&self, dataset_id: &str, batch: &str) -> Result<BatchIndexingStatus, SyncError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatResponseMode {
	Blocking,
	Streaming,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
	pub answer: String,
	#[serde(default)]
	pub conversation_id: Option<String>,
}

#[async_trait]
pub trait RagChatClient: Send + Sync {
	async fn chat(
		&self,
		query: &str,
		conversation_id: Option<&str>,
		user: Option<&str>,
		response_mode: ChatResponseMode,
		inputs: Option<Value>,
	) -> Result<ChatResponse, SyncError>;
}

/// `reqwest`-backed client for both the knowledge and chat surfaces, sharing
/// one transport configured with a single `timeout_seconds`.
pub struct HttpRagClient {
	http: reqwest::Client,
	base_url: String,
	service_api_key: String,
	app_api_key: String,
}

impl HttpRagClient {
	pub fn new(base_url: impl Into<String>, service_api_key: impl Into<String>, app_api_key: impl Into<String>, timeout_seconds: u64) -> Result<Self, SyncError> {
		let http = reqwest::Client::builder()
			.timeout(Duration::from_secs(timeout_seconds.max(1)))
			.build()
			.map_err(|e| SyncError::from(RemoteError::Transport { message: e.to_string() }))?;
		Ok(HttpRagClient { http, base_url: base_url.into().trim_end_matches('/').to_string(), service_api_key: service_api_key.into(), app_api_key: app_api_key.into() })
	}

	fn url(&self, path: &str) -> String {
		format!("{}{}", self.base_url, path)
	}

	async fn classify_response(response: reqwest::Response) -> Result<Value, SyncError> {
		let status = response.status();
		let body_text = response.text().await.unwrap_or_default();
		if !status.is_success() {
			return Err(SyncError::from(RemoteError::Status {
				status: status.as_u16(),
				body_preview: crate::error::body_preview(&body_text, 500),
			}));
		}
		serde_json::from_str(&body_text)
			.map_err(|e| SyncError::from(RemoteError::InvalidResponse { message: format!("{}: {}", e, crate::error::body_preview(&body_text, 200)) }))
	}

	async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, SyncError> {
		let response = request.send().await.map_err(|e| SyncError::from(RemoteError::Transport { message: e.to_string() }))?;
		Self::classify_response(response).await
	}
}

fn parse_document(value: &Value) -> RagDocument {
	RagDocument {
		id: value.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
		name: value.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
		indexing_status: value.get("indexing_status").and_then(|v| v.as_str()).map(str::to_string),
	}
}

#[async_trait]
impl RagKnowledgeClient for HttpRagClient {
	async fn list_documents(&self, dataset_id: &str, page: u32, limit: u32) -> Result<ListDocumentsPage, SyncError> {
		let dataset_id = normalize_dataset_id(dataset_id);
		let body = self
			.send(
				self.http
					.get(self.url(&format!("/v1/datasets/{}/documents", dataset_id)))
					.bearer_auth(&self.service_api_key)
					.query(&[("page", page.to_string()), ("limit", limit.to_string())]),
			)
			.await?;
		let documents = body.get("data").and_then(|v| v.as_array()).map(|arr| arr.iter().map(parse_document).collect()).unwrap_or_default();
		let has_more = body.get("has_more").and_then(|v| v.as_bool()).unwrap_or(false);
		Ok(ListDocumentsPage { documents, has_more })
	}

	async fn retrieve(&self, dataset_id: &str, query: &str, top_k: u32, score_threshold: Option<f64>) -> Result<Vec<RetrievedSegment>, SyncError> {
		let dataset_id = normalize_dataset_id(dataset_id);
		let mut payload = serde_json::json!({
			"query": query,
			"retrieval_model": { "top_k": top_k },
		});
		if let Some(threshold) = score_threshold {
			payload["retrieval_model"]["score_threshold_enabled"] = Value::Bool(true);
			payload["retrieval_model"]["score_threshold"] = serde_json::json!(threshold);
		}
		let body = self
			.send(self.http.post(self.url(&format!("/v1/datasets/{}/retrieve", dataset_id))).bearer_auth(&self.service_api_key).json(&payload))
			.await?;
		let records = body.get("records").and_then(|v| v.as_array()).cloned().unwrap_or_default();
		Ok(records
			.iter()
			.map(|r| RetrievedSegment {
				content: r.get("segment").and_then(|s| s.get("content")).and_then(|v| v.as_str()).unwrap_or_default().to_string(),
				score: r.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0),
			})
			.collect())
	}

	async fn create_document_by_text(&self, dataset_id: &str, name: &str, text: &str, doc_language: &str, indexing_technique: &str) -> Result<RagDocument, SyncError> {
		let dataset_id = normalize_dataset_id(dataset_id);
		let payload = serde_json::json!({
			"name": name,
			"text": text,
			"doc_language": doc_language,
			"indexing_technique": indexing_technique,
			"process_rule": { "mode": "automatic" },
		});
		let body = self
			.send(self.http.post(self.url(&format!("/v1/datasets/{}/document/create-by-text", dataset_id))).bearer_auth(&self.service_api_key).json(&payload))
			.await?;
		Ok(parse_document(body.get("document").unwrap_or(&Value::Null)))
	}

	async fn update_document_by_text(&self, dataset_id: &str, document_id: &str, name: &str, text: &str) -> Result<RagDocument, SyncError> {
		let dataset_id = normalize_dataset_id(dataset_id);
		let payload = serde_json::json!({ "name": name, "text": text });
		let body = self
			.send(
				self.http
					.post(self.url(&format!("/v1/datasets/{}/documents/{}/update-by-text", dataset_id, document_id)))
					.bearer_auth(&self.service_api_key)
					.json(&payload),
			)
			.await?;
		Ok(parse_document(body.get("document").unwrap_or(&Value::Null)))
	}

	async fn delete_document(&self, dataset_id: &str, document_id: &str) -> Result<(), SyncError> {
		let dataset_id = normalize_dataset_id(dataset_id);
		self.send(self.http.delete(self.url(&format!("/v1/datasets/{}/documents/{}", dataset_id, document_id))).bearer_auth(&self.service_api_key)).await?;
		Ok(())
	}

	async fn get_batch_indexing_status(&self, dataset_id: &str, batch: &str) -> Result<BatchIndexingStatus, SyncError> {
		let dataset_id = normalize_dataset_id(dataset_id);
		let body = self
			.send(self.http.get(self.url(&format!("/v1/datasets/{}/documents/{}/indexing-status", dataset_id, batch))).bearer_auth(&self.service_api_key))
			.await?;
		let documents = body.get("data").and_then(|v| v.as_array()).map(|arr| arr.iter().map(parse_document).collect()).unwrap_or_default();
		Ok(BatchIndexingStatus { documents })
	}
}

#[async_trait]
impl RagChatClient for HttpRagClient {
	async fn chat(&self, query: &str, conversation_id: Option<&str>, user: Option<&str>, response_mode: ChatResponseMode, inputs: Option<Value>) -> Result<ChatResponse, SyncError> {
		let mode = match response_mode {
			ChatResponseMode::Blocking => "blocking",
			ChatResponseMode::Streaming => "streaming",
		};
		let payload = serde_json::json!({
			"query": query,
			"conversation_id": conversation_id.unwrap_or(""),
			"user": user.unwrap_or("ragvideo"),
			"response_mode": mode,
			"inputs": inputs.unwrap_or_else(|| serde_json::json!({})),
		});
		let body = self.send(self.http.post(self.url("/v1/chat-messages")).bearer_auth(&self.app_api_key).json(&payload)).await?;
		Ok(ChatResponse {
			answer: body.get("answer").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
			conversation_id: body.get("conversation_id").and_then(|v| v.as_str()).map(str::to_string),
		})
	}
}

/// In-memory fake knowledge client for tests: one `Vec<RagDocument>` per
/// dataset id, with monotonically increasing document ids.
#[derive(Default)]
pub struct InMemoryRagKnowledgeClient {
	datasets: std::sync::Mutex<std::collections::HashMap<String, Vec<(RagDocument, String)>>>,
	next_id: std::sync::atomic::AtomicU64,
}

impl InMemoryRagKnowledgeClient {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn seed_legacy_document(&self, dataset_id: &str, name: &str) {
		let mut datasets = self.datasets.lock().unwrap();
		let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
		datasets.entry(dataset_id.to_string()).or_default().push((
			RagDocument { id: format!("doc-{}", id), name: name.to_string(), indexing_status: Some("completed".to_string()) },
			String::new(),
		));
	}
}

#[async_trait]
impl RagKnowledgeClient for InMemoryRagKnowledgeClient {
	async fn list_documents(&self, dataset_id: &str, _page: u32, _limit: u32) -> Result<ListDocumentsPage, SyncError> {
		let datasets = self.datasets.lock().unwrap();
		let documents = datasets.get(dataset_id).map(|docs| docs.iter().map(|(d, _)| d.clone()).collect()).unwrap_or_default();
		Ok(ListDocumentsPage { documents, has_more: false })
	}

	async fn retrieve(&self, _dataset_id: &str, _query: &str, _top_k: u32, _score_threshold: Option<f64>) -> Result<Vec<RetrievedSegment>, SyncError> {
		Ok(Vec::new())
	}

	async fn create_document_by_text(&self, dataset_id: &str, name: &str, text: &str, _doc_language: &str, _indexing_technique: &str) -> Result<RagDocument, SyncError> {
		let mut datasets = self.datasets.lock().unwrap();
		let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
		let doc = RagDocument { id: format!("doc-{}", id), name: name.to_string(), indexing_status: Some("completed".to_string()) };
		datasets.entry(dataset_id.to_string()).or_default().push((doc.clone(), text.to_string()));
		Ok(doc)
	}

	async fn update_document_by_text(&self, dataset_id: &str, document_id: &str, name: &str, text: &str) -> Result<RagDocument, SyncError> {
		let mut datasets = self.datasets.lock().unwrap();
		let docs = datasets.entry(dataset_id.to_string()).or_default();
		if let Some((doc, body)) = docs.iter_mut().find(|(d, _)| d.id == document_id) {
			doc.name = name.to_string();
			*body = text.to_string();
			return Ok(doc.clone());
		}
		Err(SyncError::not_found(format!("document {} not found", document_id)))
	}

	async fn delete_document(&self, dataset_id: &str, document_id: &str) -> Result<(), SyncError> {
		let mut datasets = self.datasets.lock().unwrap();
		if let Some(docs) = datasets.get_mut(dataset_id) {
			docs.retain(|(d, _)| d.id != document_id);
		}
		Ok(())
	}

	async fn get_batch_indexing_status(&self, _dataset_id: &str, _batch: &str) -> Result<BatchIndexingStatus, SyncError> {
		Ok(BatchIndexingStatus::default())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_normalize_dataset_id_strips_prefix_and_slash() {
		assert_eq!(normalize_dataset_id("/datasets/abc"), "abc");
		assert_eq!(normalize_dataset_id("datasets/abc"), "abc");
		assert_eq!(normalize_dataset_id("abc"), "abc");
	}

	#[test]
	fn test_build_document_name_uses_untitled_fallback() {
		let name = build_document_name(None, "bilibili", "BV1", 1700000000000, DocKind::Note);
		assert_eq!(name, "Untitled [bilibili:BV1:1700000000000] (note)");
	}

	#[test]
	fn test_build_document_name_with_title() {
		let name = build_document_name(Some("My Video"), "youtube", "abc", 42, DocKind::Transcript);
		assert_eq!(name, "My Video [youtube:abc:42] (transcript)");
	}

	#[test]
	fn test_clean_source_url_strips_tracking_params() {
		let cleaned = clean_source_url("https://example.com/watch?v=1&utm_source=x&vd_source=y&keep=z");
		assert_eq!(cleaned, "https://example.com/watch?v=1&keep=z");
	}

	#[test]
	fn test_clean_source_url_drops_all_params_leaves_bare_url() {
		let cleaned = clean_source_url("https://example.com/watch?utm_source=x");
		assert_eq!(cleaned, "https://example.com/watch");
	}

	#[test]
	fn test_clean_source_url_without_query_is_unchanged() {
		assert_eq!(clean_source_url("https://example.com/watch"), "https://example.com/watch");
	}

	#[tokio::test]
	async fn test_in_memory_knowledge_client_create_update_delete() {
		let client = InMemoryRagKnowledgeClient::new();
		let doc = client.create_document_by_text("ds1", "name", "text", "en", "high_quality").await.unwrap();
		assert_eq!(client.list_documents("ds1", 1, 20).await.unwrap().documents.len(), 1);
		client.update_document_by_text("ds1", &doc.id, "renamed", "new text").await.unwrap();
		assert_eq!(client.list_documents("ds1", 1, 20).await.unwrap().documents[0].name, "renamed");
		client.delete_document("ds1", &doc.id).await.unwrap();
		assert!(client.list_documents("ds1", 1, 20).await.unwrap().documents.is_empty());
	}
}

// vim: ts=4
