//! Registry persistence round-trips against a real file on disk, exercising
//! `Registry::load`/`save` together rather than the in-memory-only paths
//! covered by the unit tests in `src/profile.rs`.

use tempfile::TempDir;

use libsyncr::profile::{Registry, DEFAULT_PROFILE};

#[tokio::test]
async fn test_missing_registry_file_loads_as_default() {
	let dir = TempDir::new().unwrap();
	let path = dir.path().join("dify.json");
	let registry = Registry::load(&path).await.unwrap();
	assert_eq!(registry.active_profile, DEFAULT_PROFILE);
	assert!(!path.exists());
}

#[tokio::test]
async fn test_save_then_load_round_trips_active_profile() {
	let dir = TempDir::new().unwrap();
	let path = dir.path().join("dify.json");

	let mut registry = Registry::load(&path).await.unwrap();
	registry.upsert_profile(
		"work",
		libsyncr::profile::ProfilePatch {
			base_url: Some("https://dify.example.com".to_string()),
			dataset_id: Some("ds-1".to_string()),
			service_api_key: Some("sk-1234567890abcdef".to_string()),
			..Default::default()
		},
		None,
		true,
	).unwrap();
	registry.save(&path).await.unwrap();

	let reloaded = Registry::load(&path).await.unwrap();
	assert_eq!(reloaded.active_profile, "work");
	assert_eq!(reloaded.get().base_url, "https://dify.example.com");
	assert_eq!(reloaded.get().service_api_key, "sk-1234567890abcdef");
}

#[tokio::test]
async fn test_writing_default_profile_directly_auto_forks_on_reload() {
	let dir = TempDir::new().unwrap();
	let path = dir.path().join("dify.json");

	// Simulate an external writer (or an older client) saving data straight
	// into the "default" slot instead of a named profile.
	let mut registry = Registry::load(&path).await.unwrap();
	registry.update(libsyncr::profile::ProfilePatch {
		base_url: Some("https://api.example.com:8443".to_string()),
		dataset_id: Some("ds-abcdef1234".to_string()),
		..Default::default()
	}).unwrap();
	registry.save(&path).await.unwrap();

	let reloaded = Registry::load(&path).await.unwrap();
	assert_eq!(reloaded.active_profile, "api.example.com-8443-ds-abcde");
	assert!(reloaded.profiles.get(DEFAULT_PROFILE).unwrap().base_url.is_empty());
}

#[tokio::test]
async fn test_corrupt_registry_file_falls_back_to_default() {
	let dir = TempDir::new().unwrap();
	let path = dir.path().join("dify.json");
	tokio::fs::write(&path, b"not json").await.unwrap();
	let registry = Registry::load(&path).await.unwrap();
	assert_eq!(registry.active_profile, DEFAULT_PROFILE);
}

#[tokio::test]
async fn test_deleting_active_profile_falls_back_to_default() {
	let dir = TempDir::new().unwrap();
	let path = dir.path().join("dify.json");
	let mut registry = Registry::load(&path).await.unwrap();
	registry.upsert_profile("temp", Default::default(), None, true).unwrap();
	registry.save(&path).await.unwrap();

	let mut reloaded = Registry::load(&path).await.unwrap();
	reloaded.delete_profile("temp").unwrap();
	reloaded.save(&path).await.unwrap();

	let final_registry = Registry::load(&path).await.unwrap();
	assert_eq!(final_registry.active_profile, DEFAULT_PROFILE);
	assert!(!final_registry.profiles.contains_key("temp"));
}
