//! End-to-end lifecycle tests spanning local store, object store, and the
//! four sync verbs: push an item, reconcile it, pull it onto a second
//! "device", then tombstone it remotely.

use std::sync::Arc;
use tempfile::TempDir;

use libsyncr::local_store::LocalStore;
use libsyncr::object_store::{InMemoryObjectStore, ObjectStore};
use libsyncr::profile::Profile;
use libsyncr::rag_client::InMemoryRagKnowledgeClient;
use libsyncr::reconcile::{Reconciler, SnapshotCache, Status};
use libsyncr::sync_ops::SyncOperations;

async fn seed_task(dir: &TempDir, task_id: &str, markdown: &str) {
	let task_dir = dir.path().join(task_id);
	tokio::fs::create_dir_all(&task_dir).await.unwrap();
	tokio::fs::write(
		task_dir.join(format!("{}.json", task_id)),
		serde_json::to_vec(&serde_json::json!({"platform": "youtube", "video_id": "abc", "title": "My Video"})).unwrap(),
	)
	.await
	.unwrap();
	tokio::fs::write(task_dir.join(format!("{}_markdown.md", task_id)), markdown.as_bytes()).await.unwrap();
	tokio::fs::write(
		task_dir.join(format!("{}_transcript.json", task_id)),
		serde_json::to_vec(&serde_json::json!({"segments": [{"start": 0.0, "end": 1.0, "text": "hello world"}]})).unwrap(),
	)
	.await
	.unwrap();
	tokio::fs::write(
		task_dir.join(format!("{}_audio.json", task_id)),
		serde_json::to_vec(&serde_json::json!({"platform": "youtube", "video_id": "abc", "title": "My Video"})).unwrap(),
	)
	.await
	.unwrap();
}

#[tokio::test]
async fn test_push_scan_pull_round_trip_between_two_local_stores() {
	let device_a = TempDir::new().unwrap();
	seed_task(&device_a, "task1", "# hello").await;

	let object_store = Arc::new(InMemoryObjectStore::new());
	let note_knowledge = Arc::new(InMemoryRagKnowledgeClient::new());
	let transcript_knowledge = Arc::new(InMemoryRagKnowledgeClient::new());

	let ops_a = SyncOperations {
		local: Arc::new(LocalStore::new(device_a.path())),
		object_store: object_store.clone(),
		note_knowledge: note_knowledge.clone(),
		transcript_knowledge: transcript_knowledge.clone(),
	};
	let profile = Profile::default();

	let push_outcome = ops_a.push("bucket1", &profile, "task1", true, true, false).await.unwrap();
	assert!(push_outcome.uploaded);

	let cache_dir = TempDir::new().unwrap();
	let cache = Arc::new(SnapshotCache::open(&cache_dir.path().join("snap.redb")).unwrap());
	let reconciler = Reconciler {
		local: ops_a.local.clone(),
		object_store: object_store.clone(),
		note_knowledge: note_knowledge.clone(),
		transcript_knowledge: transcript_knowledge.clone(),
		cache,
	};
	let items = reconciler.scan(&profile, "default", "bucket1").await.unwrap();
	assert_eq!(items.len(), 1);
	assert_eq!(items[0].status, Status::Synced);

	let source_key = items[0].source_key.clone();

	let device_b = TempDir::new().unwrap();
	let ops_b = SyncOperations {
		local: Arc::new(LocalStore::new(device_b.path())),
		object_store: object_store.clone(),
		note_knowledge: note_knowledge.clone(),
		transcript_knowledge: transcript_knowledge.clone(),
	};
	let pull_outcome = ops_b.pull("bucket1", &source_key, false).await.unwrap();
	assert!(pull_outcome.wrote_note);
	assert!(pull_outcome.wrote_transcript);
	assert!(pull_outcome.wrote_audio);

	let pulled_items = ops_b.local.scan_local().await.unwrap();
	assert_eq!(pulled_items.len(), 1);
	assert_eq!(pulled_items[0].markdown.as_deref(), Some("# hello"));
	assert_eq!(pulled_items[0].source_key, source_key);
}

#[tokio::test]
async fn test_delete_remote_then_scan_shows_deleted_status() {
	let dir = TempDir::new().unwrap();
	let object_store = Arc::new(InMemoryObjectStore::new());
	let note_knowledge = Arc::new(InMemoryRagKnowledgeClient::new());
	let transcript_knowledge = Arc::new(InMemoryRagKnowledgeClient::new());
	let local = Arc::new(LocalStore::new(dir.path()));

	let ops = SyncOperations { local: local.clone(), object_store: object_store.clone(), note_knowledge: note_knowledge.clone(), transcript_knowledge: transcript_knowledge.clone() };
	let source_key = "youtube:abc:1700000000000";
	ops.delete_remote("bucket1", "default", source_key, false, "", "", None, None).await.unwrap();

	let cache_dir = TempDir::new().unwrap();
	let cache = Arc::new(SnapshotCache::open(&cache_dir.path().join("snap.redb")).unwrap());
	let reconciler = Reconciler { local, object_store, note_knowledge, transcript_knowledge, cache };
	let items = reconciler.scan(&Profile::default(), "default", "bucket1").await.unwrap();
	assert_eq!(items.len(), 1);
	assert_eq!(items[0].status, Status::Deleted);

	let pull_err = ops.pull("bucket1", source_key, false).await.unwrap_err();
	assert_eq!(pull_err.http_status(), 410);
}

#[tokio::test]
async fn test_conflict_status_when_remote_note_hash_diverges() {
	let dir = TempDir::new().unwrap();
	seed_task(&dir, "task1", "A").await;

	let object_store = Arc::new(InMemoryObjectStore::new());
	let note_knowledge = Arc::new(InMemoryRagKnowledgeClient::new());
	let transcript_knowledge = Arc::new(InMemoryRagKnowledgeClient::new());
	let local = Arc::new(LocalStore::new(dir.path()));

	let ops = SyncOperations { local: local.clone(), object_store: object_store.clone(), note_knowledge: note_knowledge.clone(), transcript_knowledge: transcript_knowledge.clone() };
	let profile = Profile::default();
	ops.push("bucket1", &profile, "task1", true, true, false).await.unwrap();

	// Simulate a remote-side edit by tampering with the recorded note hash
	// directly, the same way a second device's differing local content would
	// surface on the next scan.
	let items = local.scan_local().await.unwrap();
	let sync_id = items[0].sync_id.clone();
	let bundle_key = format!("bundles/{}.zip", sync_id);
	let existing = object_store.stat("bucket1", &bundle_key).await.unwrap().unwrap();
	let mut metadata = existing.metadata.clone();
	metadata.insert("note-sha256".to_string(), "deadbeef".repeat(8));
	let bytes = object_store.get_bytes("bucket1", &bundle_key).await.unwrap().unwrap();
	object_store.put_bytes("bucket1", &bundle_key, bytes, "application/zip", metadata).await.unwrap();

	let cache_dir = TempDir::new().unwrap();
	let cache = Arc::new(SnapshotCache::open(&cache_dir.path().join("snap.redb")).unwrap());
	let reconciler = Reconciler { local, object_store, note_knowledge, transcript_knowledge, cache };
	let rescanned = reconciler.scan(&profile, "default", "bucket1").await.unwrap();
	assert_eq!(rescanned[0].status, Status::Conflict);
}
