//! The reconciler: a three-way join of the local store, the object store,
//! and the two RAG datasets into one classified item list.
//!
//! The classified rows are persisted into a small embedded-KV snapshot table
//! (`redb` + `bincode`, keyed by `(profile, source_key)`), the same storage
//! idiom this codebase already uses for its own file-metadata cache,
//! repointed at [`SyncItem`] rows instead of filesystem chunks.
#![allow(dead_code)]

use crate::bundle::{build_bundle, BundleInput};
use crate::error::SyncError;
use crate::identity::parse_dify_sync_tag;
use crate::local_store::{LocalStore, NoteItem};
use crate::object_store::ObjectStore;
use crate::profile::Profile;
use crate::rag_client::RagKnowledgeClient;
use crate::util::{canonical_json_bytes, sha256_hex};
use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

const MAX_PAGES: u32 = 200;
const PAGE_LIMIT: u32 = 100;

/// Mutually exclusive reconciliation status, evaluated in the order listed
/// in the component spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
	Deleted,
	LocalOnly,
	DifyOnlyNoBundle,
	DifyOnly,
	Partial,
	Synced,
	Conflict,
	DifyOnlyLegacy,
}

/// A cached, per-profile reconciliation row merging local/object-store/RAG
/// observations, keyed by `(profile, source_key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncItem {
	pub profile: String,
	pub source_key: String,
	pub sync_id: String,
	pub status: Status,
	pub title: Option<String>,
	pub platform: Option<String>,
	pub video_id: Option<String>,
	pub created_at_ms: Option<i64>,
	pub local_has_note: bool,
	pub local_has_transcript: bool,
	pub remote_has_note: bool,
	pub remote_has_transcript: bool,
	pub note_document_id: Option<String>,
	pub transcript_document_id: Option<String>,
	pub local_note_sha256: Option<String>,
	pub local_transcript_sha256: Option<String>,
	pub local_bundle_sha256: Option<String>,
	pub remote_note_sha256: Option<String>,
	pub remote_transcript_sha256: Option<String>,
	pub remote_bundle_sha256: Option<String>,
	pub updated_at_ms: i64,
}

struct RemoteDoc {
	source_key_tag: Option<crate::identity::DifySyncTag>,
	document_id: String,
}

/// The embedded snapshot store backing `/sync/items`'s cached read path.
pub struct SnapshotCache {
	db: redb::Database,
}

const ITEMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sync_items");

fn row_key(profile: &str, source_key: &str) -> String {
	format!("{}\0{}", profile, source_key)
}

impl SnapshotCache {
	pub fn open(db_path: &Path) -> Result<Self, SyncError> {
		let db = redb::Database::create(db_path).map_err(|e| SyncError::StateCorrupted { message: e.to_string() })?;
		{
			let write_txn = db.begin_write().map_err(|e| SyncError::StateCorrupted { message: e.to_string() })?;
			let _ = write_txn.open_table(ITEMS_TABLE).map_err(|e| SyncError::StateCorrupted { message: e.to_string() })?;
			write_txn.commit().map_err(|e| SyncError::StateCorrupted { message: e.to_string() })?;
		}
		Ok(SnapshotCache { db })
	}

	/// Replace-all: drop every cached row for `profile`, then insert `items`.
	pub fn replace_profile(&self, profile: &str, items: &[SyncItem]) -> Result<(), SyncError> {
		let write_txn = self.db.begin_write().map_err(|e| SyncError::StateCorrupted { message: e.to_string() })?;
		{
			let mut table = write_txn.open_table(ITEMS_TABLE).map_err(|e| SyncError::StateCorrupted { message: e.to_string() })?;
			let prefix = format!("{}\0", profile);
			let stale: Vec<String> = table
				.iter()
				.map_err(|e| SyncError::StateCorrupted { message: e.to_string() })?
				.filter_map(|entry| entry.ok())
				.map(|(k, _)| k.value().to_string())
				.filter(|k| k.starts_with(&prefix))
				.collect();
			for key in stale {
				table.remove(key.as_str()).map_err(|e| SyncError::StateCorrupted { message: e.to_string() })?;
			}
			for item in items {
				let key = row_key(&item.profile, &item.source_key);
				let bytes = bincode::serialize(item).map_err(|e| SyncError::StateCorrupted { message: e.to_string() })?;
				table.insert(key.as_str(), bytes.as_slice()).map_err(|e| SyncError::StateCorrupted { message: e.to_string() })?;
			}
		}
		write_txn.commit().map_err(|e| SyncError::StateCorrupted { message: e.to_string() })?;
		Ok(())
	}

	pub fn list_profile(&self, profile: &str) -> Result<Vec<SyncItem>, SyncError> {
		let read_txn = self.db.begin_read().map_err(|e| SyncError::StateCorrupted { message: e.to_string() })?;
		let table = read_txn.open_table(ITEMS_TABLE).map_err(|e| SyncError::StateCorrupted { message: e.to_string() })?;
		let prefix = format!("{}\0", profile);
		let mut items = Vec::new();
		for entry in table.iter().map_err(|e| SyncError::StateCorrupted { message: e.to_string() })? {
			let (key, value) = entry.map_err(|e| SyncError::StateCorrupted { message: e.to_string() })?;
			if !key.value().starts_with(&prefix) {
				continue;
			}
			let item: SyncItem = bincode::deserialize(value.value()).map_err(|e| SyncError::StateCorrupted { message: e.to_string() })?;
			items.push(item);
		}
		Ok(items)
	}
}

fn bucket_key_for(sync_id: &str) -> String {
	format!("bundles/{}.zip", sync_id)
}

fn tombstone_key_for(sync_id: &str) -> String {
	format!("tombstones/{}.json", sync_id)
}

/// Orchestrates the scan algorithm against a specific profile's object-store
/// bucket and RAG datasets.
pub struct Reconciler {
	pub local: Arc<LocalStore>,
	pub object_store: Arc<dyn ObjectStore>,
	pub note_knowledge: Arc<dyn RagKnowledgeClient>,
	pub transcript_knowledge: Arc<dyn RagKnowledgeClient>,
	pub cache: Arc<SnapshotCache>,
}

impl Reconciler {
	/// Run the full three-way reconcile for `profile`'s bucket/datasets,
	/// persist the classified rows (replace-all), and return them sorted by
	/// `created_at_ms` descending.
	pub async fn scan(&self, profile: &Profile, profile_name: &str, bucket: &str) -> Result<Vec<SyncItem>, SyncError> {
		let local_items = self.local.scan_local().await?;
		let local_by_key: HashMap<String, &NoteItem> = local_items.iter().map(|i| (i.source_key.clone(), i)).collect();

		let note_docs = self.list_all(&self.note_knowledge, &profile.note_dataset_id).await?;
		let transcript_docs = self.list_all(&self.transcript_knowledge, &profile.transcript_dataset_id).await?;

		let mut remote_note: HashMap<String, RemoteDoc> = HashMap::new();
		let mut remote_transcript: HashMap<String, RemoteDoc> = HashMap::new();
		let mut legacy_source_keys: Vec<String> = Vec::new();

		for doc in &note_docs {
			if doc.name.contains("(transcript)") {
				continue;
			}
			let tag = parse_dify_sync_tag(&doc.name);
			match tag {
				Some(t) if t.created_at_ms.is_some() => {
					let source_key = format!("{}:{}:{}", t.platform, t.video_id, t.created_at_ms.unwrap());
					remote_note.insert(source_key, RemoteDoc { source_key_tag: Some(t), document_id: doc.id.clone() });
				}
				_ => legacy_source_keys.push(doc.id.clone()),
			}
		}
		for doc in &transcript_docs {
			if doc.name.contains("(note)") {
				continue;
			}
			let tag = parse_dify_sync_tag(&doc.name);
			match tag {
				Some(t) if t.created_at_ms.is_some() => {
					let source_key = format!("{}:{}:{}", t.platform, t.video_id, t.created_at_ms.unwrap());
					remote_transcript.insert(source_key, RemoteDoc { source_key_tag: Some(t), document_id: doc.id.clone() });
				}
				_ => legacy_source_keys.push(doc.id.clone()),
			}
		}

		let mut source_keys: Vec<String> = local_by_key.keys().cloned().collect();
		for k in remote_note.keys().chain(remote_transcript.keys()) {
			if !source_keys.contains(k) {
				source_keys.push(k.clone());
			}
		}

		let now_ms = now_ms();
		let mut items = Vec::with_capacity(source_keys.len());
		for source_key in source_keys {
			let local = local_by_key.get(&source_key).copied();
			let remote_note_doc = remote_note.get(&source_key);
			let remote_transcript_doc = remote_transcript.get(&source_key);

			let sync_id = local.map(|i| i.sync_id.clone()).unwrap_or_else(|| crate::identity::compute_sync_id(&source_key));

			let bundle_key = bucket_key_for(&sync_id);
			let tombstone_key = tombstone_key_for(&sync_id);
			let bundle_stat = self.object_store.stat(bucket, &bundle_key).await?;
			let tombstone_stat = self.object_store.stat(bucket, &tombstone_key).await?;
			let has_tombstone = tombstone_stat.is_some();

			let local_has_note = local.map(|i| i.has_note()).unwrap_or(false);
			let local_has_transcript = local.map(|i| i.has_transcript()).unwrap_or(false);
			let local_present = local.is_some();
			let remote_has_note = remote_note_doc.is_some();
			let remote_has_transcript = remote_transcript_doc.is_some();
			let remote_doc_present = remote_has_note || remote_has_transcript;

			let (local_note_sha256, local_transcript_sha256, local_bundle_sha256) = match local {
				Some(item) => self.local_hashes(item),
				None => (None, None, None),
			};

			let remote_note_sha256 = bundle_stat.as_ref().and_then(|s| s.metadata.get("note-sha256").cloned());
			let remote_transcript_sha256 = bundle_stat.as_ref().and_then(|s| s.metadata.get("transcript-sha256").cloned());
			let remote_bundle_sha256 = bundle_stat.as_ref().and_then(|s| s.metadata.get("bundle-sha256").cloned());

			let status = classify(
				has_tombstone,
				local_present,
				bundle_stat.is_some(),
				remote_doc_present,
				local_has_note,
				local_has_transcript,
				remote_has_note,
				remote_has_transcript,
				&local_note_sha256,
				&remote_note_sha256,
				&local_transcript_sha256,
				&remote_transcript_sha256,
			);

			items.push(SyncItem {
				profile: profile_name.to_string(),
				source_key: source_key.clone(),
				sync_id,
				status,
				title: local.map(|i| i.title.clone()),
				platform: local.map(|i| i.platform.clone()).or_else(|| remote_note_doc.or(remote_transcript_doc).and_then(|d| d.source_key_tag.as_ref()).map(|t| t.platform.clone())),
				video_id: local.map(|i| i.video_id.clone()).or_else(|| remote_note_doc.or(remote_transcript_doc).and_then(|d| d.source_key_tag.as_ref()).map(|t| t.video_id.clone())),
				created_at_ms: local.map(|i| i.created_at_ms).or_else(|| crate::identity::parse_source_key(&source_key).map(|(_, _, t)| t)),
				local_has_note,
				local_has_transcript,
				remote_has_note,
				remote_has_transcript,
				note_document_id: remote_note_doc.map(|d| d.document_id.clone()),
				transcript_document_id: remote_transcript_doc.map(|d| d.document_id.clone()),
				local_note_sha256,
				local_transcript_sha256,
				local_bundle_sha256,
				remote_note_sha256,
				remote_transcript_sha256,
				remote_bundle_sha256,
				updated_at_ms: now_ms,
			});
		}

		// Legacy remote docs cannot be joined to any source_key; surfaced as
		// their own rows so the UI can still show them.
		for doc_id in legacy_source_keys {
			items.push(SyncItem {
				profile: profile_name.to_string(),
				source_key: format!("legacy:{}", doc_id),
				sync_id: String::new(),
				status: Status::DifyOnlyLegacy,
				title: None,
				platform: None,
				video_id: None,
				created_at_ms: None,
				local_has_note: false,
				local_has_transcript: false,
				remote_has_note: false,
				remote_has_transcript: false,
				note_document_id: Some(doc_id),
				transcript_document_id: None,
				local_note_sha256: None,
				local_transcript_sha256: None,
				local_bundle_sha256: None,
				remote_note_sha256: None,
				remote_transcript_sha256: None,
				remote_bundle_sha256: None,
				updated_at_ms: now_ms,
			});
		}

		items.sort_by(|a, b| b.created_at_ms.unwrap_or(0).cmp(&a.created_at_ms.unwrap_or(0)));
		self.cache.replace_profile(profile_name, &items)?;
		Ok(items)
	}

	/// Cached snapshot fused with a fresh local scan, so locally-edited items
	/// show up without a remote round-trip.
	pub async fn cached_items_fused_with_local(&self, profile_name: &str) -> Result<Vec<SyncItem>, SyncError> {
		let mut cached: BTreeMap<String, SyncItem> = self.cache.list_profile(profile_name)?.into_iter().map(|i| (i.source_key.clone(), i)).collect();
		let local_items = self.local.scan_local().await?;

		for item in &local_items {
			let (local_note_sha256, local_transcript_sha256, local_bundle_sha256) = self.local_hashes(item);
			cached
				.entry(item.source_key.clone())
				.and_modify(|row| {
					row.local_has_note = item.has_note();
					row.local_has_transcript = item.has_transcript();
					row.local_note_sha256 = local_note_sha256.clone();
					row.local_transcript_sha256 = local_transcript_sha256.clone();
					row.local_bundle_sha256 = local_bundle_sha256.clone();
					row.title = Some(item.title.clone());
				})
				.or_insert_with(|| SyncItem {
					profile: profile_name.to_string(),
					source_key: item.source_key.clone(),
					sync_id: item.sync_id.clone(),
					status: Status::LocalOnly,
					title: Some(item.title.clone()),
					platform: Some(item.platform.clone()),
					video_id: Some(item.video_id.clone()),
					created_at_ms: Some(item.created_at_ms),
					local_has_note: item.has_note(),
					local_has_transcript: item.has_transcript(),
					remote_has_note: false,
					remote_has_transcript: false,
					note_document_id: None,
					transcript_document_id: None,
					local_note_sha256,
					local_transcript_sha256,
					local_bundle_sha256,
					remote_note_sha256: None,
					remote_transcript_sha256: None,
					remote_bundle_sha256: None,
					updated_at_ms: now_ms(),
				});
		}

		let mut items: Vec<SyncItem> = cached.into_values().collect();
		items.sort_by(|a, b| b.created_at_ms.unwrap_or(0).cmp(&a.created_at_ms.unwrap_or(0)));
		Ok(items)
	}

	fn local_hashes(&self, item: &NoteItem) -> (Option<String>, Option<String>, Option<String>) {
		let note_sha256 = item.markdown.as_ref().filter(|m| !m.trim().is_empty()).map(|m| sha256_hex(m.trim_start_matches('\u{feff}').as_bytes()));
		let transcript_sha256 = item.transcript.as_ref().and_then(|t| canonical_json_bytes(t).ok()).map(|b| sha256_hex(&b));

		let bundle_bytes = build_bundle(BundleInput {
			source_key: &item.source_key,
			sync_id: &item.sync_id,
			audio: Some(&item.audio_meta),
			note_markdown: item.markdown.as_deref(),
			transcript: item.transcript.as_ref(),
			extra_meta: item.request_meta.as_ref(),
		})
		.ok();
		let bundle_sha256 = bundle_bytes.as_ref().map(|b| sha256_hex(b));

		(note_sha256, transcript_sha256, bundle_sha256)
	}

	async fn list_all(&self, client: &Arc<dyn RagKnowledgeClient>, dataset_id: &str) -> Result<Vec<crate::rag_client::RagDocument>, SyncError> {
		if dataset_id.is_empty() {
			return Ok(Vec::new());
		}
		let mut all = Vec::new();
		for page in 1..=MAX_PAGES {
			let result = client.list_documents(dataset_id, page, PAGE_LIMIT).await?;
			let has_more = result.has_more;
			all.extend(result.documents);
			if !has_more {
				break;
			}
		}
		Ok(all)
	}
}

#[allow(clippy::too_many_arguments)]
fn classify(
	has_tombstone: bool,
	local_present: bool,
	bundle_present: bool,
	remote_doc_present: bool,
	local_has_note: bool,
	local_has_transcript: bool,
	remote_has_note: bool,
	remote_has_transcript: bool,
	local_note_sha256: &Option<String>,
	remote_note_sha256: &Option<String>,
	local_transcript_sha256: &Option<String>,
	remote_transcript_sha256: &Option<String>,
) -> Status {
	if has_tombstone && !local_present {
		return Status::Deleted;
	}
	if has_tombstone && local_present {
		return Status::LocalOnly;
	}
	if !local_present && remote_doc_present && !bundle_present {
		return Status::DifyOnlyNoBundle;
	}
	if local_present && !remote_doc_present && !bundle_present {
		return Status::LocalOnly;
	}
	if !local_present && remote_doc_present {
		return Status::DifyOnly;
	}
	if local_has_note != remote_has_note || local_has_transcript != remote_has_transcript {
		return Status::Partial;
	}

	let note_mismatch = match (local_note_sha256, remote_note_sha256) {
		(Some(a), Some(b)) => a != b,
		_ => false,
	};
	let transcript_mismatch = match (local_transcript_sha256, remote_transcript_sha256) {
		(Some(a), Some(b)) => a != b,
		_ => false,
	};
	if note_mismatch || transcript_mismatch {
		return Status::Conflict;
	}
	Status::Synced
}

fn now_ms() -> i64 {
	std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_millis() as i64
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_classify_deleted_when_tombstone_and_no_local() {
		let status = classify(true, false, false, false, false, false, false, false, &None, &None, &None, &None);
		assert_eq!(status, Status::Deleted);
	}

	#[test]
	fn test_classify_local_only_when_tombstone_survives_locally() {
		let status = classify(true, true, false, false, true, false, false, false, &None, &None, &None, &None);
		assert_eq!(status, Status::LocalOnly);
	}

	#[test]
	fn test_classify_dify_only_no_bundle() {
		let status = classify(false, false, false, true, false, false, true, false, &None, &None, &None, &None);
		assert_eq!(status, Status::DifyOnlyNoBundle);
	}

	#[test]
	fn test_classify_partial_on_capability_mismatch() {
		let status = classify(
			false,
			true,
			true,
			true,
			true,
			false,
			true,
			true,
			&Some("a".to_string()),
			&Some("a".to_string()),
			&None,
			&None,
		);
		assert_eq!(status, Status::Partial);
	}

	#[test]
	fn test_classify_conflict_on_hash_mismatch() {
		let status = classify(
			false,
			true,
			true,
			true,
			true,
			false,
			true,
			false,
			&Some("A".to_string()),
			&Some("B".to_string()),
			&None,
			&None,
		);
		assert_eq!(status, Status::Conflict);
	}

	#[test]
	fn test_classify_synced_when_everything_matches() {
		let status = classify(
			false,
			true,
			true,
			true,
			true,
			true,
			true,
			true,
			&Some("A".to_string()),
			&Some("A".to_string()),
			&Some("B".to_string()),
			&Some("B".to_string()),
		);
		assert_eq!(status, Status::Synced);
	}

	#[test]
	fn test_snapshot_cache_replace_all_semantics() {
		let dir = tempfile::tempdir().unwrap();
		let cache = SnapshotCache::open(&dir.path().join("snap.redb")).unwrap();
		let item = SyncItem {
			profile: "p1".to_string(),
			source_key: "yt:a:1".to_string(),
			sync_id: "s1".to_string(),
			status: Status::Synced,
			title: None,
			platform: None,
			video_id: None,
			created_at_ms: Some(1),
			local_has_note: true,
			local_has_transcript: true,
			remote_has_note: true,
			remote_has_transcript: true,
			note_document_id: None,
			transcript_document_id: None,
			local_note_sha256: None,
			local_transcript_sha256: None,
			local_bundle_sha256: None,
			remote_note_sha256: None,
			remote_transcript_sha256: None,
			remote_bundle_sha256: None,
			updated_at_ms: 0,
		};
		cache.replace_profile("p1", &[item]).unwrap();
		assert_eq!(cache.list_profile("p1").unwrap().len(), 1);
		cache.replace_profile("p1", &[]).unwrap();
		assert!(cache.list_profile("p1").unwrap().is_empty());
	}
}

// vim: ts=4
