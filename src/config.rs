//! Layered runtime configuration: `Default` → config file → `RAGVIDEO_*`
//! environment variables → CLI flags, the same priority chain the original
//! filesystem-sync tool used for its own settings.
#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tri-state flag for the two auto-ingest switches: `true`/`false` pin the
/// behavior, `auto` defers to the caller (e.g. "only if a dataset id is
/// configured").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriState {
	True,
	False,
	Auto,
}

impl Default for TriState {
	fn default() -> Self {
		TriState::Auto
	}
}

impl TriState {
	fn parse(raw: &str) -> Option<TriState> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"true" | "1" | "yes" => Some(TriState::True),
			"false" | "0" | "no" => Some(TriState::False),
			"auto" => Some(TriState::Auto),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObjectStoreConfig {
	pub endpoint: String,
	pub access_key: String,
	pub secret_key: String,
	pub use_tls: bool,
	pub region: String,
	pub bucket_prefix: String,
	pub object_prefix: String,
	pub tombstone_prefix: String,
}

impl Default for ObjectStoreConfig {
	fn default() -> Self {
		ObjectStoreConfig {
			endpoint: "127.0.0.1:9000".to_string(),
			access_key: String::new(),
			secret_key: String::new(),
			use_tls: false,
			region: "us-east-1".to_string(),
			bucket_prefix: "rv-".to_string(),
			object_prefix: "bundles/".to_string(),
			tombstone_prefix: "tombstones/".to_string(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RagConfig {
	pub base_url: String,
	pub dataset_id: String,
	pub note_dataset_id: String,
	pub transcript_dataset_id: String,
	pub service_api_key: String,
	pub timeout_seconds: u64,
	pub indexing_technique: String,
}

impl Default for RagConfig {
	fn default() -> Self {
		RagConfig {
			base_url: String::new(),
			dataset_id: String::new(),
			note_dataset_id: String::new(),
			transcript_dataset_id: String::new(),
			service_api_key: String::new(),
			timeout_seconds: 60,
			indexing_technique: "high_quality".to_string(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TranscriptMergeConfig {
	pub max_chars: usize,
	pub max_seconds: f64,
}

impl Default for TranscriptMergeConfig {
	fn default() -> Self {
		TranscriptMergeConfig { max_chars: crate::bundle::DEFAULT_MAX_CHARS, max_seconds: crate::bundle::DEFAULT_MAX_SECONDS }
	}
}

/// Top-level settings covering every part of the sync engine. Mirrors the
/// teacher's single-`Config`-struct idiom rather than fragmenting settings
/// across one type per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	pub local_store_root: PathBuf,
	pub object_store: ObjectStoreConfig,
	pub rag: RagConfig,
	pub auto_minio_bundle_on_generate: TriState,
	pub auto_dify_ingest_on_generate: TriState,
	pub transcript_merge: TranscriptMergeConfig,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			local_store_root: default_local_store_root(),
			object_store: ObjectStoreConfig::default(),
			rag: RagConfig::default(),
			auto_minio_bundle_on_generate: TriState::Auto,
			auto_dify_ingest_on_generate: TriState::Auto,
			transcript_merge: TranscriptMergeConfig::default(),
		}
	}
}

fn default_local_store_root() -> PathBuf {
	crate::profile::config_dir().join("notes")
}

impl Config {
	/// Load from `path` if it exists (falling back to `Default` otherwise),
	/// then apply `RAGVIDEO_*` environment overrides. Does not apply CLI
	/// flags — callers layer those on top of the returned value.
	pub fn load(path: &Path) -> Config {
		let mut config = match std::fs::read_to_string(path) {
			Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
			Err(_) => Config::default(),
		};
		config.apply_env_overrides();
		config
	}

	fn apply_env_overrides(&mut self) {
		if let Ok(v) = std::env::var("RAGVIDEO_LOCAL_STORE_ROOT") {
			self.local_store_root = PathBuf::from(v);
		}
		if let Ok(v) = std::env::var("RAGVIDEO_S3_ENDPOINT") {
			self.object_store.endpoint = v;
		}
		if let Ok(v) = std::env::var("RAGVIDEO_S3_ACCESS_KEY") {
			self.object_store.access_key = v;
		}
		if let Ok(v) = std::env::var("RAGVIDEO_S3_SECRET_KEY") {
			self.object_store.secret_key = v;
		}
		if let Ok(v) = std::env::var("RAGVIDEO_S3_USE_TLS") {
			self.object_store.use_tls = matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes");
		}
		if let Ok(v) = std::env::var("RAGVIDEO_S3_REGION") {
			self.object_store.region = v;
		}
		if let Ok(v) = std::env::var("RAGVIDEO_S3_BUCKET_PREFIX") {
			self.object_store.bucket_prefix = v;
		}
		if let Ok(v) = std::env::var("RAGVIDEO_S3_OBJECT_PREFIX") {
			self.object_store.object_prefix = v;
		}
		if let Ok(v) = std::env::var("RAGVIDEO_S3_TOMBSTONE_PREFIX") {
			self.object_store.tombstone_prefix = v;
		}
		if let Ok(v) = std::env::var("DIFY_BASE_URL") {
			self.rag.base_url = v;
		}
		if let Ok(v) = std::env::var("DIFY_DATASET_ID") {
			self.rag.dataset_id = v;
		}
		if let Ok(v) = std::env::var("DIFY_NOTE_DATASET_ID") {
			self.rag.note_dataset_id = v;
		}
		if let Ok(v) = std::env::var("DIFY_TRANSCRIPT_DATASET_ID") {
			self.rag.transcript_dataset_id = v;
		}
		if let Ok(v) = std::env::var("DIFY_SERVICE_API_KEY") {
			self.rag.service_api_key = v;
		}
		if let Ok(v) = std::env::var("DIFY_TIMEOUT_SECONDS") {
			if let Ok(parsed) = v.parse() {
				self.rag.timeout_seconds = parsed;
			}
		}
		if let Ok(v) = std::env::var("AUTO_MINIO_BUNDLE_ON_GENERATE") {
			if let Some(parsed) = TriState::parse(&v) {
				self.auto_minio_bundle_on_generate = parsed;
			}
		}
		if let Ok(v) = std::env::var("AUTO_DIFY_INGEST_ON_GENERATE") {
			if let Some(parsed) = TriState::parse(&v) {
				self.auto_dify_ingest_on_generate = parsed;
			}
		}
		if let Ok(v) = std::env::var("RAG_TRANSCRIPT_MERGE_MAX_CHARS") {
			if let Ok(parsed) = v.parse() {
				self.transcript_merge.max_chars = parsed;
			}
		}
		if let Ok(v) = std::env::var("RAG_TRANSCRIPT_MERGE_MAX_SECONDS") {
			if let Ok(parsed) = v.parse() {
				self.transcript_merge.max_seconds = parsed;
			}
		}
	}

	/// Resolve a tri-state switch against a concrete default for when the
	/// caller set `auto` (e.g. "on iff a dataset id is configured").
	pub fn resolve_tri_state(value: TriState, auto_default: bool) -> bool {
		match value {
			TriState::True => true,
			TriState::False => false,
			TriState::Auto => auto_default,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_config_has_sane_fallbacks() {
		let config = Config::default();
		assert_eq!(config.object_store.region, "us-east-1");
		assert_eq!(config.rag.indexing_technique, "high_quality");
		assert_eq!(config.transcript_merge.max_chars, crate::bundle::DEFAULT_MAX_CHARS);
	}

	#[test]
	fn test_tri_state_parse() {
		assert_eq!(TriState::parse("true"), Some(TriState::True));
		assert_eq!(TriState::parse("FALSE"), Some(TriState::False));
		assert_eq!(TriState::parse("auto"), Some(TriState::Auto));
		assert_eq!(TriState::parse("garbage"), None);
	}

	#[test]
	fn test_resolve_tri_state() {
		assert!(Config::resolve_tri_state(TriState::True, false));
		assert!(!Config::resolve_tri_state(TriState::False, true));
		assert!(Config::resolve_tri_state(TriState::Auto, true));
	}

	#[test]
	fn test_load_missing_file_is_default() {
		let config = Config::load(Path::new("/nonexistent/ragvideo-config.toml"));
		assert_eq!(config.object_store.region, "us-east-1");
	}
}

// vim: ts=4
