//! Cooperative cancellation and progress tracking for in-flight ingestion
//! tasks.
//!
//! One [`TaskController`] per process, keyed by task id. Cancellation is
//! advisory: a worker loop checks [`TaskController::is_cancelled`] between
//! stages and stops on its own, the same pattern the filesystem sync loop
//! used for its stop-on-next-boundary shutdown.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// Ingestion lifecycle stages, in the order a task moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
	Pending,
	Parsing,
	Downloading,
	Transcribing,
	Summarizing,
	Formatting,
	Saving,
	Success,
	Failed,
}

impl Stage {
	/// Coarse completion percentage surfaced to pollers.
	pub fn percent(self) -> u8 {
		match self {
			Stage::Pending => 0,
			Stage::Parsing => 5,
			Stage::Downloading => 20,
			Stage::Transcribing => 55,
			Stage::Summarizing => 85,
			Stage::Formatting => 92,
			Stage::Saving => 97,
			Stage::Success => 100,
			Stage::Failed => 0,
		}
	}

	pub fn name(self) -> &'static str {
		match self {
			Stage::Pending => "PENDING",
			Stage::Parsing => "PARSING",
			Stage::Downloading => "DOWNLOADING",
			Stage::Transcribing => "TRANSCRIBING",
			Stage::Summarizing => "SUMMARIZING",
			Stage::Formatting => "FORMATTING",
			Stage::Saving => "SAVING",
			Stage::Success => "SUCCESS",
			Stage::Failed => "FAILED",
		}
	}
}

struct TaskHandle {
	cancelled: Arc<AtomicBool>,
	notify: Arc<Notify>,
}

/// Registry of cancellation flags for tasks currently running in this
/// process. Not persisted — a restart drops all in-flight cancellation
/// state, same as the tasks themselves.
#[derive(Default)]
pub struct TaskController {
	tasks: Mutex<HashMap<String, TaskHandle>>,
}

/// A live handle a worker polls for cancellation while it runs.
#[derive(Clone)]
pub struct CancellationToken {
	cancelled: Arc<AtomicBool>,
	notify: Arc<Notify>,
}

impl CancellationToken {
	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::SeqCst)
	}

	/// Resolves immediately if already cancelled, otherwise waits for the
	/// next cancellation signal. Useful for a worker that wants to race this
	/// against its next unit of work.
	pub async fn cancelled(&self) {
		if self.is_cancelled() {
			return;
		}
		self.notify.notified().await;
	}
}

impl TaskController {
	pub fn new() -> Self {
		TaskController::default()
	}

	/// Register `task_id` as running and return its cancellation token,
	/// creating the entry if absent. Calling this again for a task id whose
	/// previous run already completed (via [`TaskController::cleanup`])
	/// starts a fresh, uncancelled token.
	pub async fn ensure(&self, task_id: &str) -> CancellationToken {
		let mut tasks = self.tasks.lock().await;
		let handle = tasks.entry(task_id.to_string()).or_insert_with(|| TaskHandle { cancelled: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) });
		CancellationToken { cancelled: handle.cancelled.clone(), notify: handle.notify.clone() }
	}

	/// Flag `task_id` as cancelled and wake any waiter. No-op (returns
	/// `false`) if the task is unknown or already finished.
	pub async fn cancel(&self, task_id: &str) -> bool {
		let tasks = self.tasks.lock().await;
		match tasks.get(task_id) {
			Some(handle) => {
				handle.cancelled.store(true, Ordering::SeqCst);
				handle.notify.notify_waiters();
				true
			}
			None => false,
		}
	}

	pub async fn is_cancelled(&self, task_id: &str) -> bool {
		let tasks = self.tasks.lock().await;
		tasks.get(task_id).map(|h| h.cancelled.load(Ordering::SeqCst)).unwrap_or(false)
	}

	/// Drop bookkeeping for a finished task. Idempotent.
	pub async fn cleanup(&self, task_id: &str) {
		self.tasks.lock().await.remove(task_id);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_stage_percent_table() {
		assert_eq!(Stage::Pending.percent(), 0);
		assert_eq!(Stage::Parsing.percent(), 5);
		assert_eq!(Stage::Downloading.percent(), 20);
		assert_eq!(Stage::Transcribing.percent(), 55);
		assert_eq!(Stage::Summarizing.percent(), 85);
		assert_eq!(Stage::Formatting.percent(), 92);
		assert_eq!(Stage::Saving.percent(), 97);
		assert_eq!(Stage::Success.percent(), 100);
		assert_eq!(Stage::Failed.percent(), 0);
	}

	#[tokio::test]
	async fn test_cancel_unknown_task_is_noop() {
		let controller = TaskController::new();
		assert!(!controller.cancel("missing").await);
	}

	#[tokio::test]
	async fn test_ensure_then_cancel_is_observed() {
		let controller = TaskController::new();
		let token = controller.ensure("task1").await;
		assert!(!token.is_cancelled());
		assert!(controller.cancel("task1").await);
		assert!(token.is_cancelled());
		assert!(controller.is_cancelled("task1").await);
	}

	#[tokio::test]
	async fn test_cleanup_resets_cancellation_state() {
		let controller = TaskController::new();
		controller.ensure("task1").await;
		controller.cancel("task1").await;
		controller.cleanup("task1").await;
		let fresh = controller.ensure("task1").await;
		assert!(!fresh.is_cancelled());
	}

	#[tokio::test]
	async fn test_cancelled_future_resolves_after_cancel() {
		let controller = TaskController::new();
		let token = controller.ensure("task1").await;
		let waiter = tokio::spawn({
			let token = token.clone();
			async move {
				token.cancelled().await;
			}
		});
		controller.cancel("task1").await;
		waiter.await.unwrap();
	}
}

// vim: ts=4
