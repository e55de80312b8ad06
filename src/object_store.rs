//! Bucket-per-profile object store adapter.
//!
//! The production backend is MinIO-compatible S3 reached over a custom
//! endpoint with path-style addressing, built on `aws-sdk-s3` + `aws-config`
//! rather than hand-rolled request signing. `ObjectStore` is the capability
//! trait the rest of the sync engine depends on, so tests can swap in
//! [`InMemoryObjectStore`] instead of talking to a real bucket.
#![allow(dead_code)]

use crate::error::{RemoteError, SyncError};
use async_trait::async_trait;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::sync::Mutex;

/// Result of a `stat` call: object size plus the user metadata recorded at
/// upload time (bundle/content hashes, identity fields).
#[derive(Debug, Clone, Default)]
pub struct ObjectStat {
	pub size: u64,
	pub metadata: HashMap<String, String>,
}

/// Uniform object-store capability the sync engine depends on. Production
/// code uses [`S3ObjectStore`]; tests use [`InMemoryObjectStore`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
	async fn ensure_bucket(&self, bucket: &str) -> Result<(), SyncError>;

	async fn put_bytes(
		&self,
		bucket: &str,
		key: &str,
		data: Vec<u8>,
		content_type: &str,
		metadata: HashMap<String, String>,
	) -> Result<(), SyncError>;

	async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, SyncError>;

	async fn stat(&self, bucket: &str, key: &str) -> Result<Option<ObjectStat>, SyncError>;

	async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), SyncError>;
}

/// Connection parameters for the MinIO-compatible backend.
#[derive(Debug, Clone)]
pub struct ObjectStoreSettings {
	pub endpoint: String,
	pub access_key: String,
	pub secret_key: String,
	pub use_tls: bool,
	pub region: String,
	pub bucket_prefix: String,
}

/// Build the reproducible bucket name for a profile: slugified name,
/// `-{sha1(profile_name)[0:8]}` to disambiguate names that slugify equally,
/// truncated to 63 chars with alphanumeric first/last characters.
pub fn bucket_name_for_profile(prefix: &str, profile_name: &str) -> String {
	let slug = crate::util::slugify_bucket_component(profile_name);
	let mut hasher = Sha1::new();
	hasher.update(profile_name.as_bytes());
	let digest = hex::encode(hasher.finalize());
	let suffix = format!("-{}", &digest[0..8]);

	let mut base = format!("{}{}", prefix, slug);
	let max_base_len = 63usize.saturating_sub(suffix.len());
	if base.len() > max_base_len {
		base.truncate(max_base_len);
		base = base.trim_end_matches(|c: char| c == '.' || c == '-').to_string();
	}
	if base.is_empty() {
		base = "bucket".to_string();
	}
	let mut name = format!("{}{}", base, suffix);

	// Ensure first/last chars are alphanumeric per S3 bucket-naming rules.
	if !name.chars().next().map(|c| c.is_ascii_alphanumeric()).unwrap_or(false) {
		name = format!("b{}", name);
	}
	while name.len() > 63 {
		name.pop();
	}
	if !name.chars().last().map(|c| c.is_ascii_alphanumeric()).unwrap_or(false) {
		name.push('0');
	}
	if name.len() < 3 {
		name = format!("{:0<3}", name);
	}
	name
}

/// Production object store: MinIO-compatible S3 over a custom endpoint.
pub struct S3ObjectStore {
	client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
	pub async fn connect(settings: &ObjectStoreSettings) -> Self {
		let scheme = if settings.use_tls { "https" } else { "http" };
		let endpoint_url = if settings.endpoint.starts_with("http://") || settings.endpoint.starts_with("https://") {
			settings.endpoint.clone()
		} else {
			format!("{}://{}", scheme, settings.endpoint)
		};

		let credentials = aws_sdk_s3::config::Credentials::new(
			settings.access_key.clone(),
			settings.secret_key.clone(),
			None,
			None,
			"ragvideo-static",
		);

		let config = aws_sdk_s3::Config::builder()
			.behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
			.endpoint_url(endpoint_url)
			.region(aws_sdk_s3::config::Region::new(settings.region.clone()))
			.credentials_provider(credentials)
			.force_path_style(true)
			.build();

		S3ObjectStore { client: aws_sdk_s3::Client::from_conf(config) }
	}

	fn map_sdk_err<E: std::fmt::Display>(e: E) -> SyncError {
		SyncError::from(RemoteError::Transport { message: e.to_string() })
	}
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
	async fn ensure_bucket(&self, bucket: &str) -> Result<(), SyncError> {
		if self.client.head_bucket().bucket(bucket).send().await.is_ok() {
			return Ok(());
		}
		self.client.create_bucket().bucket(bucket).send().await.map_err(Self::map_sdk_err)?;
		Ok(())
	}

	async fn put_bytes(
		&self,
		bucket: &str,
		key: &str,
		data: Vec<u8>,
		content_type: &str,
		metadata: HashMap<String, String>,
	) -> Result<(), SyncError> {
		let mut request = self
			.client
			.put_object()
			.bucket(bucket)
			.key(key)
			.body(aws_sdk_s3::primitives::ByteStream::from(data))
			.content_type(content_type);
		for (k, v) in metadata {
			request = request.metadata(k, v);
		}
		request.send().await.map_err(Self::map_sdk_err)?;
		Ok(())
	}

	async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
		match self.client.get_object().bucket(bucket).key(key).send().await {
			Ok(output) => {
				let bytes =
					output.body.collect().await.map_err(|e| Self::map_sdk_err(e.to_string())).map(|b| b.to_vec())?;
				Ok(Some(bytes))
			}
			Err(e) if is_not_found(&e) => Ok(None),
			Err(e) => Err(Self::map_sdk_err(e)),
		}
	}

	async fn stat(&self, bucket: &str, key: &str) -> Result<Option<ObjectStat>, SyncError> {
		match self.client.head_object().bucket(bucket).key(key).send().await {
			Ok(output) => {
				let size = output.content_length().unwrap_or(0).max(0) as u64;
				let metadata = output.metadata().cloned().unwrap_or_default();
				Ok(Some(ObjectStat { size, metadata }))
			}
			Err(e) if is_not_found(&e) => Ok(None),
			Err(e) => Err(Self::map_sdk_err(e)),
		}
	}

	async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), SyncError> {
		self.client.delete_object().bucket(bucket).key(key).send().await.map_err(Self::map_sdk_err)?;
		Ok(())
	}
}

fn is_not_found<E>(_err: &aws_sdk_s3::error::SdkError<E>) -> bool
where
	E: std::fmt::Debug,
{
	// HeadObject/GetObject 404s surface as service errors whose debug output
	// names the S3 "NotFound"/"NoSuchKey" codes; string-matching the debug
	// rendering keeps this adapter independent of per-operation error enums.
	let rendered = format!("{:?}", _err);
	rendered.contains("NotFound") || rendered.contains("NoSuchKey")
}

/// In-memory fake used by tests and by callers without object-store
/// credentials configured.
#[derive(Default)]
pub struct InMemoryObjectStore {
	objects: Mutex<HashMap<(String, String), (Vec<u8>, HashMap<String, String>)>>,
}

impl InMemoryObjectStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn put_count(&self) -> usize {
		self.objects.lock().unwrap().len()
	}
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
	async fn ensure_bucket(&self, _bucket: &str) -> Result<(), SyncError> {
		Ok(())
	}

	async fn put_bytes(
		&self,
		bucket: &str,
		key: &str,
		data: Vec<u8>,
		_content_type: &str,
		metadata: HashMap<String, String>,
	) -> Result<(), SyncError> {
		self.objects.lock().unwrap().insert((bucket.to_string(), key.to_string()), (data, metadata));
		Ok(())
	}

	async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
		Ok(self.objects.lock().unwrap().get(&(bucket.to_string(), key.to_string())).map(|(data, _)| data.clone()))
	}

	async fn stat(&self, bucket: &str, key: &str) -> Result<Option<ObjectStat>, SyncError> {
		Ok(self
			.objects
			.lock()
			.unwrap()
			.get(&(bucket.to_string(), key.to_string()))
			.map(|(data, metadata)| ObjectStat { size: data.len() as u64, metadata: metadata.clone() }))
	}

	async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), SyncError> {
		self.objects.lock().unwrap().remove(&(bucket.to_string(), key.to_string()));
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_bucket_name_is_reproducible() {
		let a = bucket_name_for_profile("rv-", "My Profile");
		let b = bucket_name_for_profile("rv-", "My Profile");
		assert_eq!(a, b);
	}

	#[test]
	fn test_bucket_name_disambiguates_colliding_slugs() {
		let a = bucket_name_for_profile("rv-", "profile!!");
		let b = bucket_name_for_profile("rv-", "profile??");
		// Both slugify to "profile" but differ in their sha1 suffix.
		assert_ne!(a, b);
	}

	#[test]
	fn test_bucket_name_respects_length_and_charset() {
		let name = bucket_name_for_profile("rv-", &"x".repeat(200));
		assert!(name.len() <= 63);
		assert!(name.chars().next().unwrap().is_ascii_alphanumeric());
		assert!(name.chars().last().unwrap().is_ascii_alphanumeric());
	}

	#[tokio::test]
	async fn test_in_memory_store_roundtrip() {
		let store = InMemoryObjectStore::new();
		store.put_bytes("b", "k", b"data".to_vec(), "application/zip", HashMap::new()).await.unwrap();
		assert_eq!(store.get_bytes("b", "k").await.unwrap(), Some(b"data".to_vec()));
		assert!(store.stat("b", "k").await.unwrap().is_some());
		store.remove_object("b", "k").await.unwrap();
		assert!(store.get_bytes("b", "k").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_in_memory_store_missing_object_is_none() {
		let store = InMemoryObjectStore::new();
		assert!(store.stat("b", "missing").await.unwrap().is_none());
	}
}

// vim: ts=4
