//! Stable identity for a synced item: `source_key` and `sync_id`.
//!
//! `source_key` is the logical identity a caller chooses once and never
//! regenerates; `sync_id` is a pure hash of it and doubles as the physical
//! object-store/local directory name.

use crate::util::sha256_hex;

/// Build the canonical `"{platform}:{video_id}:{created_at_ms}"` identity.
pub fn make_source_key(platform: &str, video_id: &str, created_at_ms: i64) -> String {
	format!("{}:{}:{}", platform.trim(), video_id.trim(), created_at_ms)
}

/// `SHA-256(source_key)` hex, the physical identity.
pub fn compute_sync_id(source_key: &str) -> String {
	sha256_hex(source_key.as_bytes())
}

/// Split a `source_key` into `(platform, video_id, created_at_ms)`. Returns
/// `None` if the key does not have the `platform:video_id:digits` shape.
pub fn parse_source_key(source_key: &str) -> Option<(String, String, i64)> {
	let parts: Vec<&str> = source_key.split(':').map(str::trim).collect();
	if parts.len() < 3 {
		return None;
	}
	let tail = parts[parts.len() - 1];
	if tail.is_empty() || !tail.bytes().all(|b| b.is_ascii_digit()) {
		return None;
	}
	let created_at_ms: i64 = tail.parse().ok()?;
	let platform = parts[0];
	let video_id = parts[1];
	if platform.is_empty() || video_id.is_empty() {
		return None;
	}
	Some((platform.to_string(), video_id.to_string(), created_at_ms))
}

/// Parsed tag from a RAG document name: `"<title> [platform:video_id]"` or
/// `"<title> [platform:video_id:created_at_ms]"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DifySyncTag {
	pub title: String,
	pub platform: String,
	pub video_id: String,
	/// `None` marks a legacy remote document that cannot be joined to a local
	/// item by identity.
	pub created_at_ms: Option<i64>,
}

/// Parse a RAG document name's trailing `[platform:video_id(:created_at_ms)?]`
/// tag.
pub fn parse_dify_sync_tag(name: &str) -> Option<DifySyncTag> {
	let n = name.trim();
	let right = n.rfind(']')?;
	let left = n[..right].rfind('[')?;
	let tag = n[left + 1..right].trim();
	let parts: Vec<&str> = tag.split(':').map(str::trim).collect();
	if parts.len() < 2 {
		return None;
	}
	let platform = parts[0];
	let video_id = parts[1];
	if platform.is_empty() || video_id.is_empty() {
		return None;
	}

	let created_at_ms = parts.get(2).and_then(|raw| {
		if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
			raw.parse::<i64>().ok()
		} else {
			None
		}
	});

	Some(DifySyncTag {
		title: n[..left].trim().to_string(),
		platform: platform.to_string(),
		video_id: video_id.to_string(),
		created_at_ms,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_round_trip_identity() {
		let source_key = make_source_key("bilibili", "BV1xx411c7mD", 1_700_000_000_000);
		assert_eq!(source_key, "bilibili:BV1xx411c7mD:1700000000000");
		let sync_id = compute_sync_id(&source_key);
		assert_eq!(sync_id.len(), 64);
		assert_eq!(sync_id, compute_sync_id(&source_key));
	}

	#[test]
	fn test_make_source_key_trims_whitespace() {
		assert_eq!(make_source_key(" youtube ", " abc ", 5), "youtube:abc:5");
	}

	#[test]
	fn test_parse_source_key_round_trip() {
		let key = make_source_key("youtube", "abc123", 42);
		let (platform, video_id, created_at_ms) = parse_source_key(&key).unwrap();
		assert_eq!(platform, "youtube");
		assert_eq!(video_id, "abc123");
		assert_eq!(created_at_ms, 42);
	}

	#[test]
	fn test_parse_source_key_rejects_non_numeric_tail() {
		assert!(parse_source_key("youtube:abc:not-a-number").is_none());
		assert!(parse_source_key("youtube:abc").is_none());
	}

	#[test]
	fn test_parse_dify_sync_tag_with_timestamp() {
		let tag = parse_dify_sync_tag("My Video [bilibili:BV1xx411c7mD:1700000000000] (note)").unwrap();
		assert_eq!(tag.title, "My Video");
		assert_eq!(tag.platform, "bilibili");
		assert_eq!(tag.video_id, "BV1xx411c7mD");
		assert_eq!(tag.created_at_ms, Some(1_700_000_000_000));
	}

	#[test]
	fn test_parse_dify_sync_tag_legacy_has_no_timestamp() {
		let tag = parse_dify_sync_tag("Title [bilibili:BV999]").unwrap();
		assert_eq!(tag.platform, "bilibili");
		assert_eq!(tag.video_id, "BV999");
		assert_eq!(tag.created_at_ms, None);
	}

	#[test]
	fn test_parse_dify_sync_tag_rejects_missing_brackets() {
		assert!(parse_dify_sync_tag("no tag here").is_none());
	}
}

// vim: ts=4
