//! Multi-profile configuration registry: `dify.json`.
//!
//! Each profile partitions the world into its own object-store bucket and
//! its own pair of RAG datasets. `default` is a permanent empty template —
//! writes that land on it auto-fork into a derived profile, mirroring the
//! same "read-merge-write-rename" persistence idiom as the local store's
//! sidecars and the old state-lock pattern, applied here to the registry
//! file instead of a sync-state snapshot.
#![allow(dead_code)]

use crate::error::SyncError;
use crate::util::atomic_write;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_PROFILE: &str = "default";
pub const DEFAULT_SCHEME: &str = "default";
const REGISTRY_VERSION: u32 = 2;

/// A selectable RAG "app" credential within a profile, orthogonal to the
/// profile's knowledge-base (dataset) credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppScheme {
	#[serde(skip_serializing_if = "String::is_empty")]
	pub app_api_key: String,
}

/// One isolated configuration unit: object-store bucket + RAG workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
	#[serde(skip_serializing_if = "String::is_empty")]
	pub base_url: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub dataset_id: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub note_dataset_id: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub transcript_dataset_id: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub service_api_key: String,
	pub app_schemes: BTreeMap<String, AppScheme>,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub active_app_scheme: String,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub app_user: String,
	pub indexing_technique: String,
	pub timeout_seconds: u64,
	/// Legacy flat mirror of `app_schemes[active_app_scheme].app_api_key`,
	/// kept in sync for readers that predate scheme support.
	#[serde(skip_serializing_if = "String::is_empty")]
	pub app_api_key: String,
}

impl Default for Profile {
	fn default() -> Self {
		let mut app_schemes = BTreeMap::new();
		app_schemes.insert(DEFAULT_SCHEME.to_string(), AppScheme::default());
		Profile {
			base_url: String::new(),
			dataset_id: String::new(),
			note_dataset_id: String::new(),
			transcript_dataset_id: String::new(),
			service_api_key: String::new(),
			app_schemes,
			active_app_scheme: DEFAULT_SCHEME.to_string(),
			app_user: String::new(),
			indexing_technique: "high_quality".to_string(),
			timeout_seconds: 60,
			app_api_key: String::new(),
		}
	}
}

impl Profile {
	/// Whether the profile carries any user data beyond the empty template
	/// (credentials, dataset ids, or non-default schemes).
	fn has_user_data(&self) -> bool {
		!self.base_url.is_empty()
			|| !self.dataset_id.is_empty()
			|| !self.note_dataset_id.is_empty()
			|| !self.transcript_dataset_id.is_empty()
			|| !self.service_api_key.is_empty()
			|| !self.app_user.is_empty()
			|| !self.app_api_key.is_empty()
			|| self.app_schemes.keys().any(|k| k != DEFAULT_SCHEME)
			|| self.app_schemes.get(DEFAULT_SCHEME).map(|s| !s.app_api_key.is_empty()).unwrap_or(false)
	}

	/// Credentials masked as `first4 + "*"*n + last4`; keys `<=8` chars are
	/// fully masked.
	pub fn masked(&self) -> Profile {
		let mut masked = self.clone();
		masked.service_api_key = mask_secret(&self.service_api_key);
		masked.app_api_key = mask_secret(&self.app_api_key);
		for scheme in masked.app_schemes.values_mut() {
			scheme.app_api_key = mask_secret(&scheme.app_api_key);
		}
		masked
	}
}

pub fn mask_secret(key: &str) -> String {
	if key.is_empty() {
		return String::new();
	}
	if key.len() <= 8 {
		return "*".repeat(key.len());
	}
	let first4 = &key[..4];
	let last4 = &key[key.len() - 4..];
	format!("{}{}{}", first4, "*".repeat(key.len() - 8), last4)
}

/// Caller-supplied patch applied onto a profile; `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
	pub base_url: Option<String>,
	pub dataset_id: Option<String>,
	pub note_dataset_id: Option<String>,
	pub transcript_dataset_id: Option<String>,
	pub service_api_key: Option<String>,
	pub app_user: Option<String>,
	pub indexing_technique: Option<String>,
	pub timeout_seconds: Option<u64>,
}

fn apply_patch(profile: &mut Profile, patch: &ProfilePatch) {
	if let Some(v) = &patch.base_url {
		profile.base_url = v.clone();
	}
	if let Some(v) = &patch.dataset_id {
		profile.dataset_id = v.clone();
	}
	if let Some(v) = &patch.note_dataset_id {
		profile.note_dataset_id = v.clone();
	}
	if let Some(v) = &patch.transcript_dataset_id {
		profile.transcript_dataset_id = v.clone();
	}
	if let Some(v) = &patch.service_api_key {
		profile.service_api_key = v.clone();
	}
	if let Some(v) = &patch.app_user {
		profile.app_user = v.clone();
	}
	if let Some(v) = &patch.indexing_technique {
		profile.indexing_technique = v.clone();
	}
	if let Some(v) = patch.timeout_seconds {
		profile.timeout_seconds = v;
	}
}

/// The persisted registry document: `{version, active_profile, profiles}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Registry {
	pub version: u32,
	pub active_profile: String,
	pub profiles: BTreeMap<String, Profile>,
}

impl Default for Registry {
	fn default() -> Self {
		let mut profiles = BTreeMap::new();
		profiles.insert(DEFAULT_PROFILE.to_string(), Profile::default());
		Registry { version: REGISTRY_VERSION, active_profile: DEFAULT_PROFILE.to_string(), profiles }
	}
}

impl Registry {
	pub async fn load(path: &Path) -> Result<Registry, SyncError> {
		let mut registry = match tokio::fs::read(path).await {
			Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Registry::default(),
			Err(e) => return Err(e.into()),
		};
		Self::normalize(&mut registry);
		Ok(registry)
	}

	pub async fn save(&self, path: &Path) -> Result<(), SyncError> {
		let bytes = serde_json::to_vec_pretty(self)?;
		atomic_write(path, &bytes).await?;
		Ok(())
	}

	/// Enforce the registry invariants described in the module docs. Called
	/// after every load and every mutation; idempotent (normalizing an
	/// already-normalized registry changes nothing).
	pub fn normalize(registry: &mut Registry) {
		registry.version = REGISTRY_VERSION;
		registry.profiles.entry(DEFAULT_PROFILE.to_string()).or_insert_with(Profile::default);

		if registry.profiles.get(DEFAULT_PROFILE).map(|p| p.has_user_data()).unwrap_or(false) {
			let data = registry.profiles.get(DEFAULT_PROFILE).cloned().unwrap();
			let base_name = derive_profile_name(&data).unwrap_or_else(|| "main".to_string());
			let new_name = unique_name(&registry.profiles, &base_name);
			registry.profiles.insert(new_name.clone(), data);
			registry.profiles.insert(DEFAULT_PROFILE.to_string(), Profile::default());
			if registry.active_profile == DEFAULT_PROFILE {
				registry.active_profile = new_name;
			}
		}

		if registry.active_profile.is_empty() || !registry.profiles.contains_key(&registry.active_profile) {
			registry.active_profile = DEFAULT_PROFILE.to_string();
		}

		let names: Vec<String> = registry.profiles.keys().cloned().collect();
		for name in names {
			let profile = registry.profiles.get_mut(&name).unwrap();
			normalize_schemes(profile);
		}
	}

	/// The active profile, with registry invariants already enforced.
	pub fn get(&self) -> &Profile {
		self.profiles.get(&self.active_profile).expect("active_profile always exists after normalize")
	}

	pub fn get_safe(&self) -> Profile {
		self.get().masked()
	}

	pub fn list_profiles(&self) -> Vec<(&String, &Profile)> {
		self.profiles.iter().collect()
	}

	/// Apply `patch` to the active profile, then normalize (which forks
	/// `default` out if it now carries data). Returns the profile name the
	/// data actually landed in.
	pub fn update(&mut self, patch: ProfilePatch) -> Result<String, SyncError> {
		let active = self.active_profile.clone();
		let profile = self.profiles.entry(active.clone()).or_insert_with(Profile::default);
		apply_patch(profile, &patch);
		Self::normalize(self);
		Ok(self.active_profile.clone())
	}

	pub fn set_active_profile(&mut self, name: &str) -> Result<(), SyncError> {
		if !self.profiles.contains_key(name) {
			return Err(SyncError::not_found(format!("unknown profile '{}'", name)));
		}
		self.active_profile = name.to_string();
		Ok(())
	}

	pub fn upsert_profile(&mut self, name: &str, patch: ProfilePatch, clone_from: Option<&str>, activate: bool) -> Result<(), SyncError> {
		if name.trim().is_empty() {
			return Err(SyncError::validation("profile name must not be empty"));
		}
		let mut profile = match (self.profiles.get(name), clone_from.and_then(|src| self.profiles.get(src))) {
			(Some(existing), _) => existing.clone(),
			(None, Some(source)) => source.clone(),
			(None, None) => Profile::default(),
		};
		apply_patch(&mut profile, &patch);
		self.profiles.insert(name.to_string(), profile);
		if activate {
			self.active_profile = name.to_string();
		}
		Self::normalize(self);
		Ok(())
	}

	pub fn delete_profile(&mut self, name: &str) -> Result<(), SyncError> {
		if name == DEFAULT_PROFILE {
			return Err(SyncError::validation("cannot delete the 'default' template profile"));
		}
		if self.profiles.len() <= 1 {
			return Err(SyncError::validation("cannot delete the last remaining profile"));
		}
		if self.profiles.remove(name).is_none() {
			return Err(SyncError::not_found(format!("unknown profile '{}'", name)));
		}
		if self.active_profile == name {
			self.active_profile = DEFAULT_PROFILE.to_string();
		}
		Self::normalize(self);
		Ok(())
	}

	pub fn upsert_app_scheme(&mut self, profile_name: &str, scheme_name: &str, app_api_key: &str, activate: bool) -> Result<(), SyncError> {
		if scheme_name.trim().is_empty() {
			return Err(SyncError::validation("scheme name must not be empty"));
		}
		let profile = self.profiles.get_mut(profile_name).ok_or_else(|| SyncError::not_found(format!("unknown profile '{}'", profile_name)))?;
		let entry = profile.app_schemes.entry(scheme_name.to_string()).or_default();
		if scheme_name != DEFAULT_SCHEME {
			entry.app_api_key = app_api_key.to_string();
		}
		if activate {
			profile.active_app_scheme = scheme_name.to_string();
		}
		Self::normalize(self);
		Ok(())
	}

	pub fn delete_app_scheme(&mut self, profile_name: &str, scheme_name: &str) -> Result<(), SyncError> {
		if scheme_name == DEFAULT_SCHEME {
			return Err(SyncError::validation("cannot delete the 'default' template scheme"));
		}
		let profile = self.profiles.get_mut(profile_name).ok_or_else(|| SyncError::not_found(format!("unknown profile '{}'", profile_name)))?;
		if profile.app_schemes.len() <= 1 {
			return Err(SyncError::validation("cannot delete the last remaining scheme"));
		}
		if profile.app_schemes.remove(scheme_name).is_none() {
			return Err(SyncError::not_found(format!("unknown scheme '{}'", scheme_name)));
		}
		if profile.active_app_scheme == scheme_name {
			profile.active_app_scheme = DEFAULT_SCHEME.to_string();
		}
		Self::normalize(self);
		Ok(())
	}

	pub fn set_active_app_scheme(&mut self, profile_name: &str, scheme_name: &str) -> Result<(), SyncError> {
		let profile = self.profiles.get_mut(profile_name).ok_or_else(|| SyncError::not_found(format!("unknown profile '{}'", profile_name)))?;
		if !profile.app_schemes.contains_key(scheme_name) {
			return Err(SyncError::not_found(format!("unknown scheme '{}'", scheme_name)));
		}
		profile.active_app_scheme = scheme_name.to_string();
		Self::normalize(self);
		Ok(())
	}
}

/// Ensure `app_schemes["default"]` exists and stays empty; migrate a legacy
/// flat `app_api_key` into a non-default scheme (reusing one with a matching
/// key if present); keep the flat mirror synchronized with the active
/// scheme's key.
fn normalize_schemes(profile: &mut Profile) {
	profile.app_schemes.entry(DEFAULT_SCHEME.to_string()).or_default().app_api_key.clear();

	if !profile.app_api_key.is_empty() {
		let legacy_key = profile.app_api_key.clone();
		let reusable = profile.app_schemes.iter().find(|(name, scheme)| *name != DEFAULT_SCHEME && scheme.app_api_key == legacy_key).map(|(name, _)| name.clone());

		let target_scheme = match reusable {
			Some(name) => name,
			None => {
				let name = unique_scheme_name(&profile.app_schemes, "main");
				profile.app_schemes.insert(name.clone(), AppScheme { app_api_key: legacy_key });
				name
			}
		};
		profile.active_app_scheme = target_scheme;
	}

	if profile.active_app_scheme.is_empty() || !profile.app_schemes.contains_key(&profile.active_app_scheme) {
		profile.active_app_scheme = DEFAULT_SCHEME.to_string();
	}

	profile.app_api_key = profile.app_schemes.get(&profile.active_app_scheme).map(|s| s.app_api_key.clone()).unwrap_or_default();
}

fn unique_scheme_name(schemes: &BTreeMap<String, AppScheme>, base: &str) -> String {
	if !schemes.contains_key(base) {
		return base.to_string();
	}
	let mut n = 2;
	loop {
		let candidate = format!("{}-{}", base, n);
		if !schemes.contains_key(&candidate) {
			return candidate;
		}
		n += 1;
	}
}

fn unique_name(profiles: &BTreeMap<String, Profile>, base: &str) -> String {
	if !profiles.contains_key(base) {
		return base.to_string();
	}
	let mut n = 2;
	loop {
		let candidate = format!("{}-{}", base, n);
		if !profiles.contains_key(&candidate) {
			return candidate;
		}
		n += 1;
	}
}

/// Derive a fork name from a profile's connection details:
/// `"{host}-{port}-{dataset_id[0..8]}"`, falling back to just the host:port
/// (or `None` if `base_url` cannot be parsed at all).
fn derive_profile_name(profile: &Profile) -> Option<String> {
	let host_port = parse_host_port(&profile.base_url)?;
	let ds_prefix: String = profile.dataset_id.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '-').take(8).collect();
	if ds_prefix.is_empty() {
		Some(host_port)
	} else {
		Some(format!("{}-{}", host_port, ds_prefix))
	}
}

fn parse_host_port(base_url: &str) -> Option<String> {
	let without_scheme = base_url.splitn(2, "://").last()?;
	let host_port = without_scheme.split('/').next()?;
	if host_port.is_empty() {
		return None;
	}
	Some(host_port.replace(':', "-").to_lowercase())
}

/// Platform-specific config directory, overridable by `RAGVIDEO_CONFIG_DIR`.
pub fn config_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("RAGVIDEO_CONFIG_DIR") {
		return PathBuf::from(dir);
	}
	#[cfg(target_os = "windows")]
	{
		if let Ok(appdata) = std::env::var("APPDATA") {
			return PathBuf::from(appdata).join("RAGVideo");
		}
	}
	#[cfg(target_os = "macos")]
	{
		if let Ok(home) = std::env::var("HOME") {
			return PathBuf::from(home).join("Library").join("Application Support").join("RAGVideo");
		}
	}
	if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
		return PathBuf::from(xdg).join("RAGVideo");
	}
	if let Ok(home) = std::env::var("HOME") {
		return PathBuf::from(home).join(".config").join("RAGVideo");
	}
	PathBuf::from(".ragvideo")
}

pub fn registry_path() -> PathBuf {
	config_dir().join("dify.json")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_registry_has_empty_default_profile() {
		let registry = Registry::default();
		assert_eq!(registry.active_profile, DEFAULT_PROFILE);
		let default_profile = registry.profiles.get(DEFAULT_PROFILE).unwrap();
		assert!(!default_profile.has_user_data());
	}

	#[test]
	fn test_update_on_default_auto_forks() {
		let mut registry = Registry::default();
		let name = registry
			.update(ProfilePatch { base_url: Some("https://api.example.com:8443".to_string()), dataset_id: Some("ds-abcdef1234".to_string()), ..Default::default() })
			.unwrap();
		assert_eq!(name, "api.example.com-8443-ds-abcde");
		assert_eq!(registry.active_profile, "api.example.com-8443-ds-abcde");
		assert!(!registry.profiles.get(DEFAULT_PROFILE).unwrap().has_user_data());
		assert_eq!(registry.get().base_url, "https://api.example.com:8443");
	}

	#[test]
	fn test_normalize_is_idempotent() {
		let mut registry = Registry::default();
		registry.update(ProfilePatch { base_url: Some("https://host:1".to_string()), dataset_id: Some("ds1".to_string()), ..Default::default() }).unwrap();
		let before = serde_json::to_vec(&registry).unwrap();
		Registry::normalize(&mut registry);
		let after = serde_json::to_vec(&registry).unwrap();
		assert_eq!(before, after);
	}

	#[test]
	fn test_legacy_app_api_key_migrates_to_scheme() {
		let mut registry = Registry::default();
		registry.upsert_profile("p1", ProfilePatch::default(), None, true).unwrap();
		registry.profiles.get_mut("p1").unwrap().app_api_key = "legacy-key-1234".to_string();
		Registry::normalize(&mut registry);
		let profile = registry.profiles.get("p1").unwrap();
		assert_ne!(profile.active_app_scheme, DEFAULT_SCHEME);
		assert_eq!(profile.app_schemes[&profile.active_app_scheme].app_api_key, "legacy-key-1234");
		assert_eq!(profile.app_api_key, "legacy-key-1234");
		assert!(profile.app_schemes[DEFAULT_SCHEME].app_api_key.is_empty());
	}

	#[test]
	fn test_delete_profile_rejects_default_and_last() {
		let mut registry = Registry::default();
		assert!(registry.delete_profile(DEFAULT_PROFILE).is_err());
		registry.upsert_profile("only", ProfilePatch::default(), None, true).unwrap();
		assert!(registry.delete_profile(DEFAULT_PROFILE).is_err());
	}

	#[test]
	fn test_delete_app_scheme_rejects_default_and_last() {
		let mut registry = Registry::default();
		registry.upsert_profile("p1", ProfilePatch::default(), None, true).unwrap();
		assert!(registry.delete_app_scheme("p1", DEFAULT_SCHEME).is_err());
		registry.upsert_app_scheme("p1", "scheme-a", "key12345678", true).unwrap();
		assert!(registry.delete_app_scheme("p1", "scheme-a").is_ok());
	}

	#[test]
	fn test_mask_secret_short_key_fully_masked() {
		assert_eq!(mask_secret("short"), "*****");
	}

	#[test]
	fn test_mask_secret_long_key_shows_first_and_last_four() {
		assert_eq!(mask_secret("abcdefghijkl"), "abcd****ijkl");
	}

	#[test]
	fn test_get_safe_masks_credentials() {
		let mut registry = Registry::default();
		registry.update(ProfilePatch { service_api_key: Some("sk-1234567890abcdef".to_string()), ..Default::default() }).unwrap();
		let safe = registry.get_safe();
		assert_ne!(safe.service_api_key, "sk-1234567890abcdef");
		assert!(safe.service_api_key.contains('*'));
	}
}

// vim: ts=4
