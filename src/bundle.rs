//! Deterministic zip bundle codec.
//!
//! A bundle packages one synced item's content-addressable payload: audio
//! metadata, transcript JSON, a derived `.srt`, and the note markdown, plus a
//! `meta.json` identity/hash manifest. Determinism is a hard contract —
//! building the same inputs twice must produce byte-equal zips — because
//! `bundle_sha256` is both the idempotency key for uploads and the
//! remote-equality check used by push/pull/scan.
#![allow(dead_code)]

use crate::identity::parse_source_key;
use crate::util::{canonical_json_bytes, sha256_hex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Cursor, Read, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Merge window defaults for SRT derivation, overridable via
/// `RAG_TRANSCRIPT_MERGE_MAX_CHARS` / `RAG_TRANSCRIPT_MERGE_MAX_SECONDS`.
pub const DEFAULT_MAX_CHARS: usize = 900;
pub const DEFAULT_MAX_SECONDS: f64 = 60.0;

/// One transcript segment, as produced by the (out-of-scope) transcription
/// collaborator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscriptSegment {
	#[serde(default)]
	pub start: f64,
	#[serde(default)]
	pub end: f64,
	#[serde(default)]
	pub text: String,
}

/// Content hashes recorded in `meta.json`, enabling field-level conflict
/// detection without unpacking the bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentHashes {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub note_md: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub audio_json: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub transcript_json: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub transcript_srt: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleFiles {
	pub note_md: bool,
	pub transcript_json: bool,
	pub transcript_srt: bool,
	pub audio_json: bool,
}

/// `meta.json` contents: identity, per-file presence/hashes, and any extra
/// caller-supplied metadata (e.g. the original ingestion request).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleMeta {
	pub version: u32,
	pub source_key: String,
	pub sync_id: String,
	pub created_at_ms: Option<i64>,
	pub files: BundleFiles,
	pub content_sha256: ContentHashes,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub request: Option<Value>,
}

/// Inputs to [`build_bundle`]. `extra_meta`, if present, is merged into
/// `meta.json` alongside the identity fields (used to carry `request_meta`).
pub struct BundleInput<'a> {
	pub source_key: &'a str,
	pub sync_id: &'a str,
	pub audio: Option<&'a Value>,
	pub note_markdown: Option<&'a str>,
	pub transcript: Option<&'a Value>,
	pub extra_meta: Option<&'a Value>,
}

/// Build a deterministic bundle zip from the given inputs. Equal inputs
/// produce byte-equal output, and therefore identical `bundle_sha256`.
pub fn build_bundle(input: BundleInput<'_>) -> std::io::Result<Vec<u8>> {
	let note_text = input.note_markdown.unwrap_or("").trim_start_matches('\u{feff}');
	let note_bytes: Vec<u8> = if note_text.trim().is_empty() { Vec::new() } else { note_text.as_bytes().to_vec() };

	let audio_bytes = match input.audio {
		Some(v) if !is_empty_json(v) => canonical_json_bytes(v).unwrap_or_default(),
		_ => Vec::new(),
	};
	let transcript_bytes = match input.transcript {
		Some(v) if !is_empty_json(v) => canonical_json_bytes(v).unwrap_or_default(),
		_ => Vec::new(),
	};
	let srt_text = input.transcript.map(transcript_json_to_srt).unwrap_or_default();
	let srt_bytes: Vec<u8> = if srt_text.trim().is_empty() { Vec::new() } else { srt_text.into_bytes() };

	let created_at_ms = parse_source_key(input.source_key).map(|(_, _, ts)| ts);

	let mut content_sha256 = ContentHashes::default();
	if !note_bytes.is_empty() {
		content_sha256.note_md = Some(sha256_hex(&note_bytes));
	}
	if !audio_bytes.is_empty() {
		content_sha256.audio_json = Some(sha256_hex(&audio_bytes));
	}
	if !transcript_bytes.is_empty() {
		content_sha256.transcript_json = Some(sha256_hex(&transcript_bytes));
	}
	if !srt_bytes.is_empty() {
		content_sha256.transcript_srt = Some(sha256_hex(&srt_bytes));
	}

	let mut meta_value = serde_json::to_value(BundleMeta {
		version: 1,
		source_key: input.source_key.to_string(),
		sync_id: input.sync_id.to_string(),
		created_at_ms,
		files: BundleFiles {
			note_md: !note_bytes.is_empty(),
			transcript_json: !transcript_bytes.is_empty(),
			transcript_srt: !srt_bytes.is_empty(),
			audio_json: !audio_bytes.is_empty(),
		},
		content_sha256,
		request: None,
	})
	.expect("BundleMeta always serializes");

	if let (Some(extra), Value::Object(meta_map)) = (input.extra_meta, &mut meta_value) {
		if let Value::Object(extra_map) = extra {
			for (k, v) in extra_map {
				meta_map.insert(k.clone(), v.clone());
			}
		}
	}
	let meta_bytes = canonical_json_bytes(&meta_value).expect("meta_value is always serializable");

	let mut buf = Cursor::new(Vec::new());
	{
		let mut zip = ZipWriter::new(&mut buf);
		let options = FileOptions::default()
			.compression_method(CompressionMethod::Deflated)
			.unix_permissions(0o644)
			.last_modified_time(zip::DateTime::from_date_and_time(1980, 1, 1, 0, 0, 0).unwrap());

		zip.start_file("meta.json", options)?;
		zip.write_all(&meta_bytes)?;

		if !audio_bytes.is_empty() {
			zip.start_file("audio.json", options)?;
			zip.write_all(&audio_bytes)?;
		}
		if !transcript_bytes.is_empty() {
			zip.start_file("transcript.json", options)?;
			zip.write_all(&transcript_bytes)?;
		}
		if !srt_bytes.is_empty() {
			zip.start_file("transcript.srt", options)?;
			zip.write_all(&srt_bytes)?;
		}
		if !note_bytes.is_empty() {
			zip.start_file("note.md", options)?;
			zip.write_all(&note_bytes)?;
		}
		zip.finish()?;
	}
	Ok(buf.into_inner())
}

fn is_empty_json(v: &Value) -> bool {
	matches!(v, Value::Null) || matches!(v, Value::Object(m) if m.is_empty())
}

/// Merge consecutive transcript segments into blocks capped by `max_chars`
/// characters and `max_seconds` duration. Dify indexing with small-embedding
/// backends can fail when a document is split into hundreds of tiny chunks;
/// merging keeps chunk counts manageable while preserving time ranges.
pub fn merge_transcript_segments(
	segments: &[TranscriptSegment],
	max_chars: usize,
	max_seconds: f64,
) -> Vec<(f64, f64, String)> {
	if segments.is_empty() || max_chars == 0 {
		return Vec::new();
	}

	let mut merged = Vec::new();
	let mut buf: Vec<String> = Vec::new();
	let mut buf_len = 0usize;
	let mut start_ts: Option<f64> = None;
	let mut end_ts: Option<f64> = None;

	for seg in segments {
		let text = seg.text.replace('\n', " ");
		let text = collapse_whitespace(text.trim());
		if text.is_empty() {
			continue;
		}
		let seg_start = seg.start;
		let seg_end = if seg.end > 0.0 || seg.start == 0.0 { seg.end } else { seg_start };

		let extra = (if buf.is_empty() { 0 } else { 1 }) + text.chars().count();
		let mut span_ok = true;
		if max_seconds > 0.0 {
			if let Some(s) = start_ts {
				span_ok = (seg_end - s) <= max_seconds;
			}
		}

		if !buf.is_empty() && ((buf_len + extra) > max_chars || !span_ok) {
			merged.push((start_ts.unwrap_or(0.0), end_ts.unwrap_or_else(|| start_ts.unwrap_or(0.0)), buf.join(" ")));
			buf = vec![text];
			buf_len = buf[0].chars().count();
			start_ts = Some(seg_start);
			end_ts = Some(seg_end);
			continue;
		}

		if buf.is_empty() {
			start_ts = Some(seg_start);
		}
		buf.push(text);
		buf_len += extra;
		end_ts = Some(seg_end);
	}

	if !buf.is_empty() {
		merged.push((start_ts.unwrap_or(0.0), end_ts.unwrap_or_else(|| start_ts.unwrap_or(0.0)), buf.join(" ")));
	}

	merged
}

fn collapse_whitespace(s: &str) -> String {
	s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn format_srt_timestamp(ms: i64) -> String {
	let ms = ms.max(0);
	let hh = ms / 3_600_000;
	let mm = (ms % 3_600_000) / 60_000;
	let ss = (ms % 60_000) / 1_000;
	let mmm = ms % 1_000;
	format!("{:02}:{:02}:{:02},{:03}", hh, mm, ss, mmm)
}

/// Convert a transcript JSON payload (`{segments:[{start,end,text}], full_text}`)
/// into an `.srt` document, using the SRT-only merge caps.
fn transcript_json_to_srt(payload: &Value) -> String {
	let segments: Vec<TranscriptSegment> = payload
		.get("segments")
		.and_then(|v| v.as_array())
		.map(|arr| arr.iter().filter_map(|v| serde_json::from_value(v.clone()).ok()).collect())
		.unwrap_or_default();

	if segments.is_empty() {
		let full_text = payload.get("full_text").and_then(|v| v.as_str()).unwrap_or("").trim();
		if full_text.is_empty() {
			return String::new();
		}
		return format!("1\n00:00:00,000 --> 00:00:00,000\n{}\n", full_text);
	}

	let merged = merge_transcript_segments(&segments, DEFAULT_MAX_CHARS, DEFAULT_MAX_SECONDS);

	let mut lines = Vec::new();
	let mut idx = 1;
	for (start, end, text) in &merged {
		if text.is_empty() {
			continue;
		}
		let start_ms = (start * 1000.0) as i64;
		let end_ms = (end * 1000.0) as i64;
		lines.push(idx.to_string());
		lines.push(format!("{} --> {}", format_srt_timestamp(start_ms), format_srt_timestamp(end_ms)));
		lines.push(text.clone());
		lines.push(String::new());
		idx += 1;
	}
	if lines.is_empty() {
		return String::new();
	}
	let mut joined = lines.join("\n");
	while joined.ends_with('\n') {
		joined.pop();
	}
	joined.push('\n');
	joined
}

/// The five logical payloads extracted from a bundle's contents.
#[derive(Debug, Clone, Default)]
pub struct ExtractedBundle {
	pub meta: BundleMeta,
	pub audio: Option<Value>,
	pub transcript: Option<Value>,
	pub transcript_srt: Option<String>,
	pub note_markdown: Option<String>,
}

impl Default for BundleMeta {
	fn default() -> Self {
		BundleMeta {
			version: 1,
			source_key: String::new(),
			sync_id: String::new(),
			created_at_ms: None,
			files: BundleFiles::default(),
			content_sha256: ContentHashes::default(),
			request: None,
		}
	}
}

/// Parse a bundle zip back into its logical entries. Missing optional entries
/// resolve to `None`, matching the "treat absent as empty" reading convention.
pub fn extract_bundle(bytes: &[u8]) -> Result<ExtractedBundle, String> {
	let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("invalid zip: {}", e))?;

	let read_entry = |archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str| -> Option<String> {
		let mut file = archive.by_name(name).ok()?;
		let mut s = String::new();
		file.read_to_string(&mut s).ok()?;
		Some(s)
	};

	let meta_raw = read_entry(&mut archive, "meta.json").unwrap_or_else(|| "{}".to_string());
	let meta: BundleMeta = serde_json::from_str(&meta_raw).map_err(|e| format!("invalid meta.json: {}", e))?;

	let audio = read_entry(&mut archive, "audio.json").and_then(|s| serde_json::from_str(&s).ok());
	let transcript = read_entry(&mut archive, "transcript.json").and_then(|s| serde_json::from_str(&s).ok());
	let transcript_srt = read_entry(&mut archive, "transcript.srt");
	let note_markdown = read_entry(&mut archive, "note.md");

	Ok(ExtractedBundle { meta, audio, transcript, transcript_srt, note_markdown })
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn sample_input<'a>(
		source_key: &'a str,
		sync_id: &'a str,
		audio: &'a Value,
		note_markdown: &'a str,
		transcript: &'a Value,
	) -> BundleInput<'a> {
		BundleInput {
			source_key,
			sync_id,
			audio: Some(audio),
			note_markdown: Some(note_markdown),
			transcript: Some(transcript),
			extra_meta: None,
		}
	}

	#[test]
	fn test_bundle_determinism() {
		let audio = json!({"platform": "youtube", "video_id": "abc", "title": "t"});
		let transcript = json!({"segments": [{"start": 0.0, "end": 1.0, "text": "hello world"}]});
		let input = sample_input("youtube:abc:1", "sync1", &audio, "# hi", &transcript);
		let bytes_a = build_bundle(input).unwrap();
		let input2 = sample_input("youtube:abc:1", "sync1", &audio, "# hi", &transcript);
		let bytes_b = build_bundle(input2).unwrap();
		assert_eq!(bytes_a, bytes_b);
		assert_eq!(sha256_hex(&bytes_a), sha256_hex(&bytes_b));
	}

	#[test]
	fn test_bundle_round_trip_extraction() {
		let audio = json!({"platform": "youtube", "video_id": "abc", "title": "t"});
		let transcript = json!({"segments": [{"start": 0.0, "end": 1.0, "text": "hello world"}]});
		let bytes = build_bundle(sample_input("youtube:abc:1", "sync1", &audio, "# hi", &transcript)).unwrap();
		let extracted = extract_bundle(&bytes).unwrap();
		assert_eq!(extracted.meta.source_key, "youtube:abc:1");
		assert_eq!(extracted.meta.sync_id, "sync1");
		assert_eq!(extracted.note_markdown.as_deref(), Some("# hi"));
		assert!(extracted.meta.content_sha256.note_md.is_some());
		assert_eq!(
			extracted.meta.content_sha256.note_md.as_deref(),
			Some(sha256_hex(b"# hi")).as_deref()
		);
	}

	#[test]
	fn test_bundle_omits_absent_entries() {
		let input = BundleInput {
			source_key: "youtube:abc:1",
			sync_id: "sync1",
			audio: None,
			note_markdown: None,
			transcript: None,
			extra_meta: None,
		};
		let bytes = build_bundle(input).unwrap();
		let extracted = extract_bundle(&bytes).unwrap();
		assert!(extracted.audio.is_none());
		assert!(extracted.transcript.is_none());
		assert!(extracted.note_markdown.is_none());
		assert!(!extracted.meta.files.note_md);
	}

	#[test]
	fn test_bundle_strips_bom_from_note() {
		let note_with_bom = "\u{feff}# hi";
		let bytes = build_bundle(BundleInput {
			source_key: "youtube:abc:1",
			sync_id: "sync1",
			audio: None,
			note_markdown: Some(note_with_bom),
			transcript: None,
			extra_meta: None,
		})
		.unwrap();
		let extracted = extract_bundle(&bytes).unwrap();
		assert_eq!(extracted.note_markdown.as_deref(), Some("# hi"));
	}

	#[test]
	fn test_merge_transcript_segments_respects_char_cap() {
		let segments = vec![
			TranscriptSegment { start: 0.0, end: 1.0, text: "a".repeat(500) },
			TranscriptSegment { start: 1.0, end: 2.0, text: "b".repeat(500) },
		];
		let merged = merge_transcript_segments(&segments, 900, 60.0);
		assert_eq!(merged.len(), 2, "combined length exceeds max_chars, so segments stay split");
	}

	#[test]
	fn test_merge_transcript_segments_respects_seconds_cap() {
		let segments = vec![
			TranscriptSegment { start: 0.0, end: 1.0, text: "hi".into() },
			TranscriptSegment { start: 100.0, end: 101.0, text: "there".into() },
		];
		let merged = merge_transcript_segments(&segments, 900, 60.0);
		assert_eq!(merged.len(), 2, "span exceeds max_seconds, so segments stay split");
	}

	#[test]
	fn test_merge_transcript_segments_combines_short_adjacent() {
		let segments = vec![
			TranscriptSegment { start: 0.0, end: 1.0, text: "hello".into() },
			TranscriptSegment { start: 1.0, end: 2.0, text: "world".into() },
		];
		let merged = merge_transcript_segments(&segments, 900, 60.0);
		assert_eq!(merged.len(), 1);
		assert_eq!(merged[0].2, "hello world");
	}

	#[test]
	fn test_extra_meta_merges_into_meta_json() {
		let extra = json!({"request": {"foo": "bar"}});
		let bytes = build_bundle(BundleInput {
			source_key: "youtube:abc:1",
			sync_id: "sync1",
			audio: None,
			note_markdown: None,
			transcript: None,
			extra_meta: Some(&extra),
		})
		.unwrap();
		let extracted = extract_bundle(&bytes).unwrap();
		assert_eq!(extracted.meta.request, Some(json!({"foo": "bar"})));
	}
}

// vim: ts=4
