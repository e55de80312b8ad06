//! The four sync verbs: `push`, `pull`, `copy`, `delete_remote`.
//!
//! Every operation is a short transaction with one clear commit point (an
//! object-store `put_bytes`/`remove_object`). RAG errors observed after that
//! commit are captured as `dify_error` and returned alongside a success
//! envelope rather than aborting — the object store is authoritative, and
//! the next `scan` reconciles RAG on its own.
#![allow(dead_code)]

use crate::bundle::{build_bundle, extract_bundle, merge_transcript_segments, BundleInput, TranscriptSegment};
use crate::error::SyncError;
use crate::identity::{compute_sync_id, make_source_key, parse_source_key};
use crate::local_store::LocalStore;
use crate::object_store::ObjectStore;
use crate::profile::Profile;
use crate::rag_client::{build_document_name, build_note_document_body, build_transcript_document_body, DocKind, RagKnowledgeClient};
use crate::util::sha256_hex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub struct SyncOperations {
	pub local: Arc<LocalStore>,
	pub object_store: Arc<dyn ObjectStore>,
	pub note_knowledge: Arc<dyn RagKnowledgeClient>,
	pub transcript_knowledge: Arc<dyn RagKnowledgeClient>,
}

fn bucket_key_for(sync_id: &str) -> String {
	format!("bundles/{}.zip", sync_id)
}

fn tombstone_key_for(sync_id: &str) -> String {
	format!("tombstones/{}.json", sync_id)
}

fn merged_segments_from_transcript(transcript: &Value, max_chars: usize, max_seconds: f64) -> Vec<(f64, f64, String)> {
	let segments: Vec<TranscriptSegment> = transcript
		.get("segments")
		.and_then(|v| v.as_array())
		.map(|arr| arr.iter().filter_map(|v| serde_json::from_value(v.clone()).ok()).collect())
		.unwrap_or_default();
	merge_transcript_segments(&segments, max_chars, max_seconds)
}

/// Result of [`SyncOperations::push`]: the commit always happens; a
/// per-side RAG failure is surfaced as `dify_error` without aborting.
#[derive(Debug, Clone, Default)]
pub struct PushOutcome {
	pub uploaded: bool,
	pub bundle_sha256: String,
	pub note_document_id: Option<String>,
	pub transcript_document_id: Option<String>,
	pub dify_error: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct PullOutcome {
	pub task_id: String,
	pub wrote_note: bool,
	pub wrote_transcript: bool,
	pub wrote_audio: bool,
}

#[derive(Debug, Clone)]
pub struct CopyOutcome {
	pub task_id: String,
	pub source_key: String,
	pub sync_id: String,
	pub dify_error: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteRemoteOutcome {
	pub dify_error: Option<Value>,
}

impl SyncOperations {
	/// `push(item_id, include_transcript, include_note, update_dify)`.
	pub async fn push(
		&self,
		bucket: &str,
		profile: &Profile,
		item_id: &str,
		include_transcript: bool,
		include_note: bool,
		update_dify: bool,
	) -> Result<PushOutcome, SyncError> {
		let item = self.local.load_task(item_id).await?.ok_or_else(|| SyncError::not_found(format!("local item '{}' not found", item_id)))?;

		let note_markdown = if include_note { item.markdown.as_deref() } else { None };
		let transcript = if include_transcript { item.transcript.as_ref() } else { None };

		let bundle_bytes = build_bundle(BundleInput {
			source_key: &item.source_key,
			sync_id: &item.sync_id,
			audio: Some(&item.audio_meta),
			note_markdown,
			transcript,
			extra_meta: item.request_meta.as_ref(),
		})?;
		let bundle_sha256 = sha256_hex(&bundle_bytes);

		self.object_store.ensure_bucket(bucket).await?;

		let tombstone_key = tombstone_key_for(&item.sync_id);
		if self.object_store.stat(bucket, &tombstone_key).await?.is_some() {
			self.object_store.remove_object(bucket, &tombstone_key).await?;
		}

		let bundle_key = bucket_key_for(&item.sync_id);
		let existing = self.object_store.stat(bucket, &bundle_key).await?;
		let already_current = existing.as_ref().and_then(|s| s.metadata.get("bundle-sha256")).map(|s| s == &bundle_sha256).unwrap_or(false);

		let mut uploaded = false;
		if !already_current {
			let mut metadata = HashMap::new();
			metadata.insert("bundle-sha256".to_string(), bundle_sha256.clone());
			metadata.insert("sync-id".to_string(), item.sync_id.clone());
			metadata.insert("source-key".to_string(), item.source_key.clone());
			if let Some(markdown) = note_markdown {
				metadata.insert("note-sha256".to_string(), sha256_hex(markdown.trim_start_matches('\u{feff}').as_bytes()));
			}
			if let Some(t) = transcript {
				if let Ok(bytes) = crate::util::canonical_json_bytes(t) {
					metadata.insert("transcript-sha256".to_string(), sha256_hex(&bytes));
				}
			}
			self.object_store.put_bytes(bucket, &bundle_key, bundle_bytes, "application/zip", metadata).await?;
			uploaded = true;
		}

		let mut outcome = PushOutcome { uploaded, bundle_sha256, ..Default::default() };

		if update_dify {
			let mut errors = serde_json::Map::new();
			if include_note {
				if let Some(markdown) = &item.markdown {
					match self.find_or_create_doc(&self.note_knowledge, &profile.note_dataset_id, &item.title, &item.platform, &item.video_id, item.created_at_ms, DocKind::Note, markdown, &profile.indexing_technique).await {
						Ok(id) => outcome.note_document_id = Some(id),
						Err(e) => {
							errors.insert("note".to_string(), json!(e.to_string()));
						}
					}
				}
			}
			if include_transcript {
				if let Some(transcript) = &item.transcript {
					let merged = merged_segments_from_transcript(transcript, crate::bundle::DEFAULT_MAX_CHARS, crate::bundle::DEFAULT_MAX_SECONDS);
					let body = build_transcript_document_body(Some(&item.title), &item.platform, &item.video_id, None, &merged);
					match self.find_or_create_doc(&self.transcript_knowledge, &profile.transcript_dataset_id, &item.title, &item.platform, &item.video_id, item.created_at_ms, DocKind::Transcript, &body, &profile.indexing_technique).await {
						Ok(id) => outcome.transcript_document_id = Some(id),
						Err(e) => {
							errors.insert("transcript".to_string(), json!(e.to_string()));
						}
					}
				}
			}
			if !errors.is_empty() {
				outcome.dify_error = Some(Value::Object(errors));
			}
		}

		Ok(outcome)
	}

	#[allow(clippy::too_many_arguments)]
	async fn find_or_create_doc(
		&self,
		client: &Arc<dyn RagKnowledgeClient>,
		dataset_id: &str,
		title: &str,
		platform: &str,
		video_id: &str,
		created_at_ms: i64,
		kind: DocKind,
		body: &str,
		indexing_technique: &str,
	) -> Result<String, SyncError> {
		if dataset_id.is_empty() {
			return Err(SyncError::RemoteConfig { message: "dataset id not configured".to_string() });
		}
		let name = build_document_name(Some(title), platform, video_id, created_at_ms, kind);
		let mut page = 1;
		loop {
			let listing = client.list_documents(dataset_id, page, 100).await?;
			if let Some(existing) = listing.documents.iter().find(|d| d.name == name) {
				let updated = client.update_document_by_text(dataset_id, &existing.id, &name, body).await?;
				return Ok(updated.id);
			}
			if !listing.has_more {
				break;
			}
			page += 1;
		}
		let created = client.create_document_by_text(dataset_id, &name, body, "en", indexing_technique).await?;
		Ok(created.id)
	}

	/// `pull(source_key, overwrite)`.
	pub async fn pull(&self, bucket: &str, source_key: &str, overwrite: bool) -> Result<PullOutcome, SyncError> {
		let (_, _, created_at_ms) = parse_source_key(source_key).ok_or_else(|| SyncError::validation("invalid source_key"))?;
		let sync_id = compute_sync_id(source_key);

		let tombstone_key = tombstone_key_for(&sync_id);
		if self.object_store.stat(bucket, &tombstone_key).await?.is_some() {
			return Err(SyncError::Gone { message: format!("'{}' has been deleted remotely", source_key) });
		}

		let bundle_key = bucket_key_for(&sync_id);
		let stat = self.object_store.stat(bucket, &bundle_key).await?;
		let bytes = self.object_store.get_bytes(bucket, &bundle_key).await?.ok_or_else(|| SyncError::not_found(format!("no bundle for '{}'", source_key)))?;

		let actual_sha256 = sha256_hex(&bytes);
		if let Some(expected) = stat.as_ref().and_then(|s| s.metadata.get("bundle-sha256")) {
			if expected != &actual_sha256 {
				return Err(SyncError::IntegrityFailure { message: "bundle_sha256 mismatch against remote metadata".to_string() });
			}
		}

		let extracted = extract_bundle(&bytes).map_err(|e| SyncError::IntegrityFailure { message: e })?;
		if extracted.meta.source_key != source_key || extracted.meta.sync_id != sync_id {
			return Err(SyncError::IntegrityFailure { message: "meta.source_key/sync_id mismatch against requested identity".to_string() });
		}

		let task_id = self.find_existing_task_id(source_key).await?.unwrap_or_else(|| sync_id.clone());

		let mut wrote_note = false;
		let mut wrote_transcript = false;
		let mut wrote_audio = false;

		if let Some(markdown) = &extracted.note_markdown {
			wrote_note = self.local.write_artifact_if_allowed(&task_id, "_markdown.md", markdown.as_bytes(), overwrite).await?;
		}
		if let Some(transcript) = &extracted.transcript {
			let bytes = serde_json::to_vec_pretty(transcript)?;
			wrote_transcript = self.local.write_artifact_if_allowed(&task_id, "_transcript.json", &bytes, overwrite).await?;
		}
		if let Some(audio) = &extracted.audio {
			let bytes = serde_json::to_vec_pretty(audio)?;
			wrote_audio = self.local.write_artifact_if_allowed(&task_id, "_audio.json", &bytes, overwrite).await?;
		}

		let any_written = wrote_note || wrote_transcript || wrote_audio;
		if !any_written && !overwrite {
			return Err(SyncError::conflict("local artifacts already exist; re-run with overwrite=true"));
		}

		let main_json = json!({
			"platform": extracted.audio.as_ref().and_then(|a| a.get("platform")).cloned().unwrap_or(Value::Null),
			"video_id": extracted.audio.as_ref().and_then(|a| a.get("video_id")).cloned().unwrap_or(Value::Null),
			"created_at_ms": created_at_ms,
		});
		self.local.atomic_merge_json(&self.local.artifact_path(&task_id, ".json"), &main_json).await?;
		self.local.write_result(&task_id, &json!({ "source_key": source_key, "sync_id": sync_id })).await?;
		self.local.write_status(&task_id, &json!({ "status": "SUCCESS", "progress": 100 })).await?;

		let platform = extracted.audio.as_ref().and_then(|a| a.get("platform")).and_then(|v| v.as_str()).unwrap_or("").to_string();
		let video_id = extracted.audio.as_ref().and_then(|a| a.get("video_id")).and_then(|v| v.as_str()).unwrap_or("").to_string();
		if !platform.is_empty() && !video_id.is_empty() {
			self.local.ensure_sync_meta(&task_id, &platform, &video_id, "", Some(created_at_ms)).await?;
		}

		Ok(PullOutcome { task_id, wrote_note, wrote_transcript, wrote_audio })
	}

	async fn find_existing_task_id(&self, source_key: &str) -> Result<Option<String>, SyncError> {
		let items = self.local.scan_local().await?;
		Ok(items.into_iter().find(|i| i.source_key == source_key).map(|i| i.task_id))
	}

	/// `copy(source_key, from_side, include_*, new_created_at_ms?)`. Probes
	/// up to 20 increments to land on an identity unused both locally and
	/// remotely. Only ever creates RAG docs, never updates existing ones.
	#[allow(clippy::too_many_arguments)]
	pub async fn copy(
		&self,
		bucket: &str,
		profile: &Profile,
		source_key: &str,
		from_local: bool,
		include_note: bool,
		include_transcript: bool,
		create_dify_docs: bool,
		new_created_at_ms: Option<i64>,
	) -> Result<CopyOutcome, SyncError> {
		let (platform, video_id, _) = parse_source_key(source_key).ok_or_else(|| SyncError::validation("invalid source_key"))?;

		let (title, audio, markdown, transcript, request_meta) = if from_local {
			let item = self
				.find_local_by_source_key(source_key)
				.await?
				.ok_or_else(|| SyncError::not_found(format!("local item for '{}' not found", source_key)))?;
			(item.title, item.audio_meta, item.markdown, item.transcript, item.request_meta)
		} else {
			let sync_id = compute_sync_id(source_key);
			let bundle_key = bucket_key_for(&sync_id);
			let bytes = self.object_store.get_bytes(bucket, &bundle_key).await?.ok_or_else(|| SyncError::not_found(format!("no bundle for '{}'", source_key)))?;
			let extracted = extract_bundle(&bytes).map_err(|e| SyncError::IntegrityFailure { message: e })?;
			(String::new(), extracted.audio.unwrap_or(Value::Null), extracted.note_markdown, extracted.transcript, extracted.meta.request)
		};

		let base_ts = new_created_at_ms.unwrap_or_else(now_ms);
		let mut new_created_at_ms = base_ts;
		let mut new_task_id = String::new();
		let mut new_source_key = String::new();
		let mut new_sync_id = String::new();
		let mut found = false;
		for attempt in 0..20 {
			let candidate_ts = base_ts + attempt;
			let candidate_source_key = make_source_key(&platform, &video_id, candidate_ts);
			let candidate_sync_id = compute_sync_id(&candidate_source_key);
			let local_taken = self.local.task_dir(&candidate_sync_id).exists();
			let remote_taken = self.object_store.stat(bucket, &bucket_key_for(&candidate_sync_id)).await?.is_some();
			if !local_taken && !remote_taken {
				new_created_at_ms = candidate_ts;
				new_task_id = candidate_sync_id.clone();
				new_source_key = candidate_source_key;
				new_sync_id = candidate_sync_id;
				found = true;
				break;
			}
		}
		if !found {
			return Err(SyncError::Other { message: "could not find a free identity after 20 attempts".to_string() });
		}

		let note_markdown = if include_note { markdown.as_deref() } else { None };
		let transcript_ref = if include_transcript { transcript.as_ref() } else { None };

		let bundle_bytes = build_bundle(BundleInput {
			source_key: &new_source_key,
			sync_id: &new_sync_id,
			audio: Some(&audio),
			note_markdown,
			transcript: transcript_ref,
			extra_meta: request_meta.as_ref(),
		})?;
		let bundle_sha256 = sha256_hex(&bundle_bytes);

		self.object_store.ensure_bucket(bucket).await?;
		let mut metadata = HashMap::new();
		metadata.insert("bundle-sha256".to_string(), bundle_sha256.clone());
		metadata.insert("sync-id".to_string(), new_sync_id.clone());
		metadata.insert("source-key".to_string(), new_source_key.clone());
		self.object_store.put_bytes(bucket, &bucket_key_for(&new_sync_id), bundle_bytes, "application/zip", metadata).await?;

		if let Some(markdown) = note_markdown {
			self.local.write_artifact_if_allowed(&new_task_id, "_markdown.md", markdown.as_bytes(), true).await?;
		}
		if let Some(t) = transcript_ref {
			self.local.write_artifact_if_allowed(&new_task_id, "_transcript.json", &serde_json::to_vec_pretty(t)?, true).await?;
		}
		self.local.write_artifact_if_allowed(&new_task_id, "_audio.json", &serde_json::to_vec_pretty(&audio)?, true).await?;
		self.local
			.atomic_merge_json(
				&self.local.artifact_path(&new_task_id, ".json"),
				&json!({ "platform": platform, "video_id": video_id, "title": title, "created_at_ms": new_created_at_ms }),
			)
			.await?;
		self.local.ensure_sync_meta(&new_task_id, &platform, &video_id, &title, Some(new_created_at_ms)).await?;

		let mut dify_error = None;
		if create_dify_docs {
			let mut errors = serde_json::Map::new();
			if let Some(markdown) = note_markdown {
				let name = build_document_name(Some(&title), &platform, &video_id, new_created_at_ms, DocKind::Note);
				let body = build_note_document_body(Some(&title), &platform, &video_id, None, markdown);
				if let Err(e) = self.note_knowledge.create_document_by_text(&profile.note_dataset_id, &name, &body, "en", &profile.indexing_technique).await {
					errors.insert("note".to_string(), json!(e.to_string()));
				}
			}
			if let Some(t) = transcript_ref {
				let merged = merged_segments_from_transcript(t, crate::bundle::DEFAULT_MAX_CHARS, crate::bundle::DEFAULT_MAX_SECONDS);
				let name = build_document_name(Some(&title), &platform, &video_id, new_created_at_ms, DocKind::Transcript);
				let body = build_transcript_document_body(Some(&title), &platform, &video_id, None, &merged);
				if let Err(e) = self.transcript_knowledge.create_document_by_text(&profile.transcript_dataset_id, &name, &body, "en", &profile.indexing_technique).await {
					errors.insert("transcript".to_string(), json!(e.to_string()));
				}
			}
			if !errors.is_empty() {
				dify_error = Some(Value::Object(errors));
			}
		}

		Ok(CopyOutcome { task_id: new_task_id, source_key: new_source_key, sync_id: new_sync_id, dify_error })
	}

	async fn find_local_by_source_key(&self, source_key: &str) -> Result<Option<crate::local_store::NoteItem>, SyncError> {
		let items = self.local.scan_local().await?;
		Ok(items.into_iter().find(|i| i.source_key == source_key))
	}

	/// `delete_remote(source_key, delete_dify, note_document_id?, transcript_document_id?)`.
	pub async fn delete_remote(
		&self,
		bucket: &str,
		profile_name: &str,
		source_key: &str,
		delete_dify: bool,
		note_dataset_id: &str,
		transcript_dataset_id: &str,
		note_document_id: Option<&str>,
		transcript_document_id: Option<&str>,
	) -> Result<DeleteRemoteOutcome, SyncError> {
		let sync_id = compute_sync_id(source_key);
		let tombstone = json!({
			"version": 1,
			"source_key": source_key,
			"sync_id": sync_id,
			"deleted_at_ms": now_ms(),
			"profile": profile_name,
		});
		self.object_store.ensure_bucket(bucket).await?;
		self.object_store
			.put_bytes(bucket, &tombstone_key_for(&sync_id), serde_json::to_vec_pretty(&tombstone)?, "application/json", HashMap::new())
			.await?;

		let mut outcome = DeleteRemoteOutcome::default();
		if delete_dify {
			let mut errors = serde_json::Map::new();
			if let Some(id) = note_document_id {
				if let Err(e) = self.note_knowledge.delete_document(note_dataset_id, id).await {
					errors.insert("note".to_string(), json!(e.to_string()));
				}
			}
			if let Some(id) = transcript_document_id {
				if let Err(e) = self.transcript_knowledge.delete_document(transcript_dataset_id, id).await {
					errors.insert("transcript".to_string(), json!(e.to_string()));
				}
			}
			if !errors.is_empty() {
				outcome.dify_error = Some(Value::Object(errors));
			}
		}
		Ok(outcome)
	}
}

fn now_ms() -> i64 {
	std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_millis() as i64
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::object_store::InMemoryObjectStore;
	use crate::rag_client::InMemoryRagKnowledgeClient;
	use serde_json::json;
	use tempfile::TempDir;

	fn make_ops(dir: &TempDir) -> SyncOperations {
		SyncOperations {
			local: Arc::new(LocalStore::new(dir.path())),
			object_store: Arc::new(InMemoryObjectStore::new()),
			note_knowledge: Arc::new(InMemoryRagKnowledgeClient::new()),
			transcript_knowledge: Arc::new(InMemoryRagKnowledgeClient::new()),
		}
	}

	async fn seed_local_item(dir: &TempDir, task_id: &str) {
		let task_dir = dir.path().join(task_id);
		tokio::fs::create_dir_all(&task_dir).await.unwrap();
		tokio::fs::write(task_dir.join(format!("{}.json", task_id)), serde_json::to_vec(&json!({"platform": "youtube", "video_id": "abc", "title": "t"})).unwrap()).await.unwrap();
		tokio::fs::write(task_dir.join(format!("{}_markdown.md", task_id)), b"# hi").await.unwrap();
		tokio::fs::write(
			task_dir.join(format!("{}_transcript.json", task_id)),
			serde_json::to_vec(&json!({"segments": [{"start": 0.0, "end": 1.0, "text": "hello world"}]})).unwrap(),
		)
		.await
		.unwrap();
		tokio::fs::write(task_dir.join(format!("{}_audio.json", task_id)), serde_json::to_vec(&json!({"platform": "youtube", "video_id": "abc", "title": "t"})).unwrap()).await.unwrap();
	}

	#[tokio::test]
	async fn test_push_is_idempotent() {
		let dir = TempDir::new().unwrap();
		seed_local_item(&dir, "task1").await;
		let store = Arc::new(InMemoryObjectStore::new());
		let ops = SyncOperations {
			local: Arc::new(LocalStore::new(dir.path())),
			object_store: store.clone(),
			note_knowledge: Arc::new(InMemoryRagKnowledgeClient::new()),
			transcript_knowledge: Arc::new(InMemoryRagKnowledgeClient::new()),
		};
		let profile = Profile::default();

		let first = ops.push("bucket1", &profile, "task1", true, true, false).await.unwrap();
		assert!(first.uploaded);
		let count_after_first = store.put_count();

		let second = ops.push("bucket1", &profile, "task1", true, true, false).await.unwrap();
		assert!(!second.uploaded);
		assert_eq!(first.bundle_sha256, second.bundle_sha256);
		assert_eq!(store.put_count(), count_after_first);
	}

	#[tokio::test]
	async fn test_delete_remote_then_pull_is_gone() {
		let dir = TempDir::new().unwrap();
		let ops = make_ops(&dir);
		let source_key = "youtube:abc:1700000000000";
		ops.delete_remote("bucket1", "default", source_key, false, "", "", None, None).await.unwrap();
		let err = ops.pull("bucket1", source_key, false).await.unwrap_err();
		assert_eq!(err.http_status(), 410);
	}

	#[tokio::test]
	async fn test_pull_roundtrip_after_push() {
		let dir = TempDir::new().unwrap();
		seed_local_item(&dir, "task1").await;
		let ops = make_ops(&dir);
		let profile = Profile::default();
		ops.push("bucket1", &profile, "task1", true, true, false).await.unwrap();

		let items = ops.local.scan_local().await.unwrap();
		let source_key = items[0].source_key.clone();

		let dir2 = TempDir::new().unwrap();
		let ops2 = SyncOperations { local: Arc::new(LocalStore::new(dir2.path())), object_store: ops.object_store.clone(), note_knowledge: ops.note_knowledge.clone(), transcript_knowledge: ops.transcript_knowledge.clone() };
		let outcome = ops2.pull("bucket1", &source_key, false).await.unwrap();
		assert!(outcome.wrote_note);
		assert!(outcome.wrote_transcript);
	}
}

// vim: ts=4
