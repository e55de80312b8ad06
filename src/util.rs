//! Small stateless helpers shared across the sync engine: hashing, canonical
//! JSON encoding, and the transactional-file-write primitive every sidecar
//! write goes through.
#![allow(dead_code)]

use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};

/// SHA-256 hex digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
	let mut hasher = Sha256::new();
	hasher.update(data);
	hex::encode(hasher.finalize())
}

/// Canonical JSON encoding used for bundle entries and hash inputs: sorted
/// keys, 2-space indent, UTF-8, no BOM. Routing through `serde_json::Value`
/// sorts keys (its `Map` is a `BTreeMap`); `serde_json` never emits a BOM.
pub fn canonical_json_bytes<T: serde::Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
	let as_value = serde_json::to_value(value)?;
	let mut buf = Vec::new();
	let mut ser =
		serde_json::Serializer::with_formatter(&mut buf, serde_json::ser::PrettyFormatter::with_indent(b"  "));
	use serde::Serialize;
	as_value.serialize(&mut ser)?;
	Ok(buf)
}

/// Write `contents` to `path` via a sibling temp file followed by an atomic
/// rename, creating parent directories as needed. Concurrent writers race on
/// the final rename rather than on partial writes, so readers never observe a
/// half-written file.
pub async fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
	if let Some(parent) = path.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}
	let tmp_path = tmp_sibling(path);
	tokio::fs::write(&tmp_path, contents).await?;
	tokio::fs::rename(&tmp_path, path).await
}

/// Synchronous counterpart of [`atomic_write`], for call sites (like `Drop`
/// guards) that cannot await.
pub fn atomic_write_sync(path: &Path, contents: &[u8]) -> io::Result<()> {
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	let tmp_path = tmp_sibling(path);
	std::fs::write(&tmp_path, contents)?;
	std::fs::rename(&tmp_path, path)
}

fn tmp_sibling(path: &Path) -> PathBuf {
	let mut name = path.file_name().unwrap_or_default().to_os_string();
	name.push(".tmp");
	path.with_file_name(name)
}

/// Slugify a profile name into an S3-safe bucket base, per the reproducible
/// bucket-naming rule: lowercase, collapse non `[a-z0-9.-]` runs into single
/// `-`, trim leading/trailing `.`/`-`.
pub fn slugify_bucket_component(name: &str) -> String {
	let lower = name.to_lowercase();
	let mut out = String::with_capacity(lower.len());
	let mut last_was_sep = false;
	for ch in lower.chars() {
		if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' {
			out.push(ch);
			last_was_sep = false;
		} else if !last_was_sep {
			out.push('-');
			last_was_sep = true;
		}
	}
	out.trim_matches(|c| c == '.' || c == '-').to_string()
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_sha256_hex_length_and_determinism() {
		let a = sha256_hex(b"hello world");
		let b = sha256_hex(b"hello world");
		assert_eq!(a.len(), 64);
		assert_eq!(a, b);
	}

	#[test]
	fn test_sha256_hex_empty_input() {
		assert_eq!(sha256_hex(b"").len(), 64);
		assert_eq!(sha256_hex(b""), "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
	}

	#[test]
	fn test_sha256_hex_different_inputs_differ() {
		assert_ne!(sha256_hex(b"a"), sha256_hex(b"b"));
	}

	#[test]
	fn test_canonical_json_sorts_keys() {
		#[derive(serde::Serialize)]
		struct Unordered {
			z: i32,
			a: i32,
		}
		let bytes = canonical_json_bytes(&Unordered { z: 1, a: 2 }).unwrap();
		let text = String::from_utf8(bytes).unwrap();
		assert!(text.find("\"a\"").unwrap() < text.find("\"z\"").unwrap());
	}

	#[test]
	fn test_slugify_bucket_component() {
		assert_eq!(slugify_bucket_component("My Profile!!"), "my-profile");
		assert_eq!(slugify_bucket_component("--leading.and.trailing--"), "leading.and.trailing");
		assert_eq!(slugify_bucket_component("api.example.com:8443"), "api.example.com-8443");
	}

	#[tokio::test]
	async fn test_atomic_write_creates_parents_and_content() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested").join("file.json");
		atomic_write(&path, b"{}").await.unwrap();
		let read = tokio::fs::read(&path).await.unwrap();
		assert_eq!(read, b"{}");
		assert!(!tmp_sibling(&path).exists());
	}
}

// vim: ts=4
