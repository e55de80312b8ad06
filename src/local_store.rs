//! Per-task local filesystem layout for synced items.
//!
//! Each task owns a directory `<root>/<task_id>/` holding the ingestion
//! outputs plus two sidecars this module manages directly: `<id>.sync.json`
//! (pinned identity) and `<id>.status.json` (lifecycle status). A legacy flat
//! layout (`<root>/<task_id>.json` etc, no nested directory) is recognized on
//! read; all writes use the nested form.
#![allow(dead_code)]

use crate::error::SyncError;
use crate::identity::{compute_sync_id, make_source_key};
use crate::util::atomic_write;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identity sidecar pinned on first scan: `(created_at_ms, source_key, sync_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncMeta {
	pub created_at_ms: i64,
	pub source_key: String,
	pub sync_id: String,
}

/// A local synced item, as discovered by [`LocalStore::scan_local`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteItem {
	pub task_id: String,
	#[serde(default)]
	pub title: String,
	pub platform: String,
	pub video_id: String,
	pub created_at_ms: i64,
	pub source_key: String,
	pub sync_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub markdown: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub transcript: Option<Value>,
	#[serde(default)]
	pub audio_meta: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub request_meta: Option<Value>,
}

impl NoteItem {
	pub fn has_note(&self) -> bool {
		self.markdown.as_ref().map(|s| !s.trim().is_empty()).unwrap_or(false)
	}

	pub fn has_transcript(&self) -> bool {
		self.transcript.as_ref().map(|v| !v.is_null()).unwrap_or(false)
	}
}

/// Filesystem layout manager for ingested tasks.
pub struct LocalStore {
	root: PathBuf,
}

impl LocalStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		LocalStore { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn task_dir(&self, task_id: &str) -> PathBuf {
		self.root.join(task_id)
	}

	fn nested_path(&self, task_id: &str, suffix: &str) -> PathBuf {
		self.task_dir(task_id).join(format!("{}{}", task_id, suffix))
	}

	fn legacy_path(&self, task_id: &str, suffix: &str) -> PathBuf {
		self.root.join(format!("{}{}", task_id, suffix))
	}

	/// Read a sidecar, preferring the nested layout, falling back to the
	/// legacy flat layout.
	fn read_sidecar(&self, task_id: &str, suffix: &str) -> Option<String> {
		let nested = self.nested_path(task_id, suffix);
		if let Ok(contents) = std::fs::read_to_string(&nested) {
			return Some(contents);
		}
		let legacy = self.legacy_path(task_id, suffix);
		std::fs::read_to_string(&legacy).ok()
	}

	fn mtime_ms(path: &Path) -> Option<i64> {
		let meta = std::fs::metadata(path).ok()?;
		let modified = meta.modified().ok()?;
		let dur = modified.duration_since(UNIX_EPOCH).ok()?;
		Some(dur.as_millis() as i64)
	}

	/// Read-merge-write-rename a JSON object sidecar: missing file reads as
	/// `{}`, `patch` keys shallow-override, result is written atomically.
	pub async fn atomic_merge_json(&self, path: &Path, patch: &Value) -> Result<Value, SyncError> {
		let mut current: Value = match tokio::fs::read(path).await {
			Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or(Value::Object(Default::default())),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Value::Object(Default::default()),
			Err(e) => return Err(e.into()),
		};

		if let (Value::Object(current_map), Value::Object(patch_map)) = (&mut current, patch) {
			for (k, v) in patch_map {
				current_map.insert(k.clone(), v.clone());
			}
		} else {
			current = patch.clone();
		}

		let bytes = serde_json::to_vec_pretty(&current)?;
		atomic_write(path, &bytes).await?;
		Ok(current)
	}

	/// Pin `(created_at_ms, source_key, sync_id)` into `<id>.sync.json`.
	///
	/// If the sidecar already holds a consistent identity it is returned
	/// unchanged. Otherwise `created_at_ms` is `prefer_created_at_ms`, or the
	/// minimum mtime among the task's existing artifacts, or the current
	/// wall clock as a last resort.
	pub async fn ensure_sync_meta(
		&self,
		task_id: &str,
		platform: &str,
		video_id: &str,
		_title: &str,
		prefer_created_at_ms: Option<i64>,
	) -> Result<SyncMeta, SyncError> {
		let sync_path = self.nested_path(task_id, ".sync.json");
		if let Some(contents) = self.read_sidecar(task_id, ".sync.json") {
			if let Ok(existing) = serde_json::from_str::<SyncMeta>(&contents) {
				let expected_source_key = make_source_key(platform, video_id, existing.created_at_ms);
				if existing.source_key == expected_source_key
					&& existing.sync_id == compute_sync_id(&existing.source_key)
				{
					return Ok(existing);
				}
			}
		}

		let created_at_ms = prefer_created_at_ms
			.or_else(|| self.min_artifact_mtime_ms(task_id))
			.unwrap_or_else(|| SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64);

		let source_key = make_source_key(platform, video_id, created_at_ms);
		let sync_id = compute_sync_id(&source_key);
		let meta = SyncMeta { created_at_ms, source_key, sync_id };
		let bytes = serde_json::to_vec_pretty(&meta)?;
		atomic_write(&sync_path, &bytes).await?;
		Ok(meta)
	}

	fn min_artifact_mtime_ms(&self, task_id: &str) -> Option<i64> {
		[".json", "_markdown.md", "_transcript.json", "_audio.json"]
			.iter()
			.filter_map(|suffix| {
				let nested = self.nested_path(task_id, suffix);
				let legacy = self.legacy_path(task_id, suffix);
				Self::mtime_ms(&nested).or_else(|| Self::mtime_ms(&legacy))
			})
			.min()
	}

	/// List task ids discoverable as either a nested task directory or a
	/// legacy flat `<id>.json` sibling.
	fn discover_task_ids(&self) -> std::io::Result<Vec<String>> {
		let mut ids = std::collections::BTreeSet::new();
		if !self.root.exists() {
			return Ok(Vec::new());
		}
		for entry in std::fs::read_dir(&self.root)? {
			let entry = entry?;
			let path = entry.path();
			let file_type = entry.file_type()?;
			if file_type.is_dir() {
				if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
					ids.insert(name.to_string());
				}
			} else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
				if let Some(id) = name.strip_suffix(".json") {
					if !id.ends_with(".status") && !id.ends_with(".sync") {
						ids.insert(id.to_string());
					}
				}
			}
		}
		Ok(ids.into_iter().collect())
	}

	/// Load a single task's [`NoteItem`] by id, pinning sync-meta on first
	/// encounter. Returns `None` if required fields (`platform`, `video_id`)
	/// are missing.
	pub async fn load_task(&self, task_id: &str) -> Result<Option<NoteItem>, SyncError> {
		let main_json = match self.read_sidecar(task_id, ".json") {
			Some(contents) => serde_json::from_str::<Value>(&contents).unwrap_or(Value::Null),
			None => Value::Null,
		};

		let platform = main_json.get("platform").and_then(|v| v.as_str()).unwrap_or("").trim().to_string();
		let video_id = main_json.get("video_id").and_then(|v| v.as_str()).unwrap_or("").trim().to_string();
		if platform.is_empty() || video_id.is_empty() {
			return Ok(None);
		}
		let title = main_json.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string();
		let request_meta = main_json.get("request_meta").cloned();

		let audio_meta: Value = self
			.read_sidecar(task_id, "_audio.json")
			.and_then(|s| serde_json::from_str(&s).ok())
			.unwrap_or(Value::Null);
		let transcript: Option<Value> =
			self.read_sidecar(task_id, "_transcript.json").and_then(|s| serde_json::from_str(&s).ok());
		let markdown = self.read_sidecar(task_id, "_markdown.md");

		let prefer_created_at_ms = main_json.get("created_at_ms").and_then(|v| v.as_i64());
		let meta = self.ensure_sync_meta(task_id, &platform, &video_id, &title, prefer_created_at_ms).await?;

		Ok(Some(NoteItem {
			task_id: task_id.to_string(),
			title,
			platform,
			video_id,
			created_at_ms: meta.created_at_ms,
			source_key: meta.source_key,
			sync_id: meta.sync_id,
			markdown,
			transcript,
			audio_meta,
			request_meta,
		}))
	}

	/// Discover every task directory (and legacy flat sibling), load its
	/// audio/markdown/transcript payloads, and pin sync-meta. Items missing
	/// `platform`/`video_id` are skipped.
	pub async fn scan_local(&self) -> Result<Vec<NoteItem>, SyncError> {
		let ids = self.discover_task_ids()?;
		let mut items = Vec::with_capacity(ids.len());
		for id in ids {
			if let Some(item) = self.load_task(&id).await? {
				items.push(item);
			}
		}
		Ok(items)
	}

	/// Recursively remove a task directory (and legacy flat siblings),
	/// fixing up read-only file modes before retrying. Errors if residual
	/// paths remain after the attempt.
	pub fn delete_task(&self, task_id: &str) -> Result<(), SyncError> {
		let dir = self.task_dir(task_id);
		if dir.exists() {
			remove_dir_all_writable(&dir).map_err(SyncError::from)?;
		}
		for suffix in [".json", ".status.json", ".sync.json", "_markdown.md", "_transcript.json", "_audio.json"] {
			let legacy = self.legacy_path(task_id, suffix);
			if legacy.exists() {
				std::fs::remove_file(&legacy).map_err(SyncError::from)?;
			}
		}
		if dir.exists() {
			return Err(SyncError::Other { message: format!("residual path after delete: {}", dir.display()) });
		}
		Ok(())
	}

	pub async fn write_status(&self, task_id: &str, status: &Value) -> Result<(), SyncError> {
		let path = self.nested_path(task_id, ".status.json");
		let bytes = serde_json::to_vec_pretty(status)?;
		atomic_write(&path, &bytes).await?;
		Ok(())
	}

	pub async fn write_result(&self, task_id: &str, result: &Value) -> Result<(), SyncError> {
		let path = self.task_dir(task_id).join("result.json");
		let bytes = serde_json::to_vec_pretty(result)?;
		atomic_write(&path, &bytes).await?;
		Ok(())
	}

	/// Write `contents` to `<task_id>_<kind>` unless it already holds
	/// non-empty content and `overwrite` is false. Returns whether the write
	/// happened.
	pub async fn write_artifact_if_allowed(
		&self,
		task_id: &str,
		suffix: &str,
		contents: &[u8],
		overwrite: bool,
	) -> Result<bool, SyncError> {
		let path = self.nested_path(task_id, suffix);
		if !overwrite {
			if let Ok(existing) = std::fs::read(&path) {
				if !existing.is_empty() {
					return Ok(false);
				}
			}
		}
		atomic_write(&path, contents).await?;
		Ok(true)
	}

	pub fn artifact_path(&self, task_id: &str, suffix: &str) -> PathBuf {
		self.nested_path(task_id, suffix)
	}
}

fn remove_dir_all_writable(dir: &Path) -> std::io::Result<()> {
	match std::fs::remove_dir_all(dir) {
		Ok(()) => Ok(()),
		Err(_) => {
			fix_permissions(dir)?;
			std::fs::remove_dir_all(dir)
		}
	}
}

fn fix_permissions(dir: &Path) -> std::io::Result<()> {
	for entry in std::fs::read_dir(dir)? {
		let entry = entry?;
		let path = entry.path();
		let mut perms = std::fs::metadata(&path)?.permissions();
		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			perms.set_mode(0o755);
		}
		#[cfg(not(unix))]
		{
			perms.set_readonly(false);
		}
		let _ = std::fs::set_permissions(&path, perms);
		if path.is_dir() {
			fix_permissions(&path)?;
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_ensure_sync_meta_is_stable_across_calls() {
		let dir = TempDir::new().unwrap();
		let store = LocalStore::new(dir.path());
		let first = store.ensure_sync_meta("task1", "youtube", "abc", "t", Some(123)).await.unwrap();
		let second = store.ensure_sync_meta("task1", "youtube", "abc", "t", Some(999)).await.unwrap();
		assert_eq!(first, second);
		assert_eq!(first.created_at_ms, 123);
	}

	#[tokio::test]
	async fn test_scan_local_skips_items_missing_identity() {
		let dir = TempDir::new().unwrap();
		let store = LocalStore::new(dir.path());
		tokio::fs::create_dir_all(dir.path().join("task1")).await.unwrap();
		tokio::fs::write(dir.path().join("task1").join("task1.json"), b"{\"title\":\"no ids\"}").await.unwrap();
		let items = store.scan_local().await.unwrap();
		assert!(items.is_empty());
	}

	#[tokio::test]
	async fn test_scan_local_loads_complete_item() {
		let dir = TempDir::new().unwrap();
		let store = LocalStore::new(dir.path());
		let task_dir = dir.path().join("task1");
		tokio::fs::create_dir_all(&task_dir).await.unwrap();
		tokio::fs::write(
			task_dir.join("task1.json"),
			serde_json::to_vec(&json!({"platform": "youtube", "video_id": "abc", "title": "My Video"})).unwrap(),
		)
		.await
		.unwrap();
		tokio::fs::write(task_dir.join("task1_markdown.md"), b"# hi").await.unwrap();

		let items = store.scan_local().await.unwrap();
		assert_eq!(items.len(), 1);
		assert_eq!(items[0].platform, "youtube");
		assert_eq!(items[0].markdown.as_deref(), Some("# hi"));
		assert!(items[0].source_key.starts_with("youtube:abc:"));
	}

	#[test]
	fn test_delete_task_removes_nested_directory() {
		let dir = TempDir::new().unwrap();
		let store = LocalStore::new(dir.path());
		let task_dir = dir.path().join("task1");
		std::fs::create_dir_all(&task_dir).unwrap();
		std::fs::write(task_dir.join("task1.json"), b"{}").unwrap();
		store.delete_task("task1").unwrap();
		assert!(!task_dir.exists());
	}

	#[tokio::test]
	async fn test_atomic_merge_json_shallow_overrides() {
		let dir = TempDir::new().unwrap();
		let store = LocalStore::new(dir.path());
		let path = dir.path().join("x.json");
		store.atomic_merge_json(&path, &json!({"a": 1, "b": 2})).await.unwrap();
		let merged = store.atomic_merge_json(&path, &json!({"b": 3, "c": 4})).await.unwrap();
		assert_eq!(merged, json!({"a": 1, "b": 3, "c": 4}));
	}
}

// vim: ts=4
