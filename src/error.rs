//! Error types for library-sync operations

use std::error::Error;
use std::fmt;
use std::io;

/// Helper function to reduce Box::new() boilerplate when wrapping errors
#[inline]
pub fn boxed_error<E: Error + Send + Sync + 'static>(e: E) -> Box<dyn Error + Send + Sync> {
	Box::new(e)
}

/// Unified error type for the sync engine.
///
/// Variants map to the HTTP-like status codes a thin surface on top of this
/// core would return; see [`SyncError::http_status`].
#[derive(Debug)]
pub enum SyncError {
	/// Missing/invalid input: bad `source_key`, bad `from_side`, empty scheme
	/// name, attempt to delete `default` or the last scheme/profile. (400)
	Validation { message: String },

	/// Missing local item, missing bundle object, unknown profile/scheme. (404)
	NotFound { message: String },

	/// Pull without `overwrite` when local is non-empty. (409)
	Conflict { message: String },

	/// Tombstone present on pull. (410)
	Gone { message: String },

	/// Object-store or RAG credentials missing, dataset id unresolved. (500)
	RemoteConfig { message: String },

	/// Object-store or RAG call returned an error.
	RemoteFailure { source: RemoteError },

	/// Downloaded bundle failed integrity checks (hash or identity mismatch). (500)
	IntegrityFailure { message: String },

	/// Local store I/O error.
	Io(io::Error),

	/// Profile registry state is corrupted beyond safe recovery.
	StateCorrupted { message: String },

	/// Lock acquisition failed (state file, registry file).
	LockFailed { message: String },

	/// Generic error message, used sparingly.
	Other { message: String },
}

impl SyncError {
	/// HTTP-like status code a thin surface on top of this core would return.
	pub fn http_status(&self) -> u16 {
		match self {
			SyncError::Validation { .. } => 400,
			SyncError::NotFound { .. } => 404,
			SyncError::Conflict { .. } => 409,
			SyncError::Gone { .. } => 410,
			SyncError::RemoteConfig { .. } => 500,
			SyncError::RemoteFailure { .. } => 500,
			SyncError::IntegrityFailure { .. } => 500,
			SyncError::Io(_) => 500,
			SyncError::StateCorrupted { .. } => 500,
			SyncError::LockFailed { .. } => 500,
			SyncError::Other { .. } => 500,
		}
	}

	pub fn validation(message: impl Into<String>) -> Self {
		SyncError::Validation { message: message.into() }
	}

	pub fn not_found(message: impl Into<String>) -> Self {
		SyncError::NotFound { message: message.into() }
	}

	pub fn conflict(message: impl Into<String>) -> Self {
		SyncError::Conflict { message: message.into() }
	}
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Validation { message } => write!(f, "{}", message),
			SyncError::NotFound { message } => write!(f, "{}", message),
			SyncError::Conflict { message } => write!(f, "{}", message),
			SyncError::Gone { message } => write!(f, "{}", message),
			SyncError::RemoteConfig { message } => write!(f, "{}", message),
			SyncError::RemoteFailure { source } => write!(f, "{}", source),
			SyncError::IntegrityFailure { message } => write!(f, "{}", message),
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::StateCorrupted { message } => write!(f, "state corrupted: {}", message),
			SyncError::LockFailed { message } => write!(f, "lock failed: {}", message),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<String> for SyncError {
	fn from(e: String) -> Self {
		SyncError::Other { message: e }
	}
}

impl From<serde_json::Error> for SyncError {
	fn from(e: serde_json::Error) -> Self {
		SyncError::StateCorrupted { message: format!("invalid JSON: {}", e) }
	}
}

impl From<RemoteError> for SyncError {
	fn from(e: RemoteError) -> Self {
		SyncError::RemoteFailure { source: e }
	}
}

/// Errors from the object store adapter or the RAG client, both of which speak
/// HTTP to a remote backend and so share the same "status + bounded body
/// preview" shape.
#[derive(Debug)]
pub enum RemoteError {
	/// The object-store SDK or the RAG HTTP client could not reach the backend.
	Transport { message: String },

	/// The backend answered with a non-success status.
	Status { status: u16, body_preview: String },

	/// The response body was not the JSON shape expected.
	InvalidResponse { message: String },
}

impl fmt::Display for RemoteError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RemoteError::Transport { message } => write!(f, "transport error: {}", message),
			RemoteError::Status { status, body_preview } => {
				write!(f, "remote returned status {}: {}", status, body_preview)
			}
			RemoteError::InvalidResponse { message } => {
				write!(f, "invalid remote response: {}", message)
			}
		}
	}
}

impl Error for RemoteError {}

/// Bounds a response body to a preview length, matching the "compact preview"
/// requirement for error messages and indexing-status forwarding.
pub fn body_preview(body: &str, max_len: usize) -> String {
	if body.len() <= max_len {
		body.to_string()
	} else {
		let mut truncated: String = body.chars().take(max_len).collect();
		truncated.push('…');
		truncated
	}
}

// vim: ts=4
