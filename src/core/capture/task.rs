//! 采集任务的状态与快照

use crate::core::config::CaptureConfig;
use crate::core::video::frame::SessionId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Queued → Running → {Completed, Cancelled, Failed}，终态不再迁移
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed
        )
    }

    fn can_transition_to(self, to: TaskState) -> bool {
        match (self, to) {
            (from, _) if from.is_terminal() => false,
            (TaskState::Queued, TaskState::Running) => true,
            (TaskState::Queued, TaskState::Cancelled) => true,
            (TaskState::Queued, TaskState::Failed) => true,
            (TaskState::Running, to) => to.is_terminal(),
            _ => false,
        }
    }
}

/// 新任务参数
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub session_id: SessionId,
    pub name: String,
    pub config: CaptureConfig,
}

impl TaskSpec {
    pub fn new(session_id: impl Into<String>, config: CaptureConfig) -> Self {
        let session_id = SessionId::new(session_id);
        Self {
            name: session_id.to_string(),
            session_id,
            config,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounters {
    pub ticks: u64,
    pub frames: u64,
    pub slides_accepted: u64,
    pub slides_excluded: u64,
    pub errors: u64,
    pub retries: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub session_id: SessionId,
    pub name: String,
    pub state: TaskState,
    pub counters: TaskCounters,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskEventKind {
    StateChanged(TaskState),
    SlideAccepted { index: u32, fingerprint: String },
    SlideExcluded { name: String, distance: u32 },
    Retrying { attempt: u32, max: u32, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub kind: TaskEventKind,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub failed: usize,
}

impl TaskCounts {
    pub(crate) fn add(&mut self, state: TaskState) {
        match state {
            TaskState::Queued => self.queued += 1,
            TaskState::Running => self.running += 1,
            TaskState::Completed => self.completed += 1,
            TaskState::Cancelled => self.cancelled += 1,
            TaskState::Failed => self.failed += 1,
        }
    }

    pub fn active(&self) -> usize {
        self.queued + self.running
    }
}

struct TaskRecord {
    state: TaskState,
    counters: TaskCounters,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// 调度器与任务协程共享的任务状态
pub(crate) struct TaskShared {
    pub(crate) id: TaskId,
    pub(crate) session_id: SessionId,
    pub(crate) name: String,
    pub(crate) cancel: CancellationToken,
    record: Mutex<TaskRecord>,
    state_tx: watch::Sender<TaskState>,
}

impl TaskShared {
    pub(crate) fn new(session_id: SessionId, name: String) -> Self {
        let (state_tx, _) = watch::channel(TaskState::Queued);
        Self {
            id: TaskId::new(),
            session_id,
            name,
            cancel: CancellationToken::new(),
            record: Mutex::new(TaskRecord {
                state: TaskState::Queued,
                counters: TaskCounters::default(),
                error: None,
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
            }),
            state_tx,
        }
    }

    pub(crate) fn state(&self) -> TaskState {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    pub(crate) fn snapshot(&self) -> TaskSnapshot {
        let record = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        TaskSnapshot {
            id: self.id,
            session_id: self.session_id.clone(),
            name: self.name.clone(),
            state: record.state,
            counters: record.counters,
            error: record.error.clone(),
            created_at: record.created_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
        }
    }

    /// 非法迁移（包括离开终态）被忽略，返回 false
    pub(crate) fn transition(&self, to: TaskState, error: Option<String>) -> bool {
        let mut record = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        if !record.state.can_transition_to(to) {
            return false;
        }

        record.state = to;
        match to {
            TaskState::Running => record.started_at = Some(Utc::now()),
            s if s.is_terminal() => {
                record.finished_at = Some(Utc::now());
                if error.is_some() {
                    record.error = error;
                }
            }
            _ => {}
        }
        drop(record);

        self.state_tx.send_replace(to);
        true
    }

    pub(crate) fn update_counters(&self, f: impl FnOnce(&mut TaskCounters)) {
        let mut record = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut record.counters);
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<TaskState> {
        self.state_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> TaskShared {
        TaskShared::new(SessionId::new("lecture-1"), "Lecture 1".to_string())
    }

    #[test]
    fn test_normal_lifecycle() {
        let t = task();
        assert_eq!(t.state(), TaskState::Queued);

        assert!(t.transition(TaskState::Running, None));
        assert!(t.snapshot().started_at.is_some());

        assert!(t.transition(TaskState::Completed, None));
        let snap = t.snapshot();
        assert_eq!(snap.state, TaskState::Completed);
        assert!(snap.finished_at.is_some());
        assert!(snap.error.is_none());
    }

    #[test]
    fn test_terminal_states_never_transition() {
        for terminal in [TaskState::Completed, TaskState::Cancelled, TaskState::Failed] {
            let t = task();
            assert!(t.transition(TaskState::Running, None));
            assert!(t.transition(terminal, None));

            assert!(!t.transition(TaskState::Running, None));
            assert!(!t.transition(TaskState::Cancelled, None));
            assert!(!t.transition(TaskState::Failed, Some("late".into())));
            assert_eq!(t.state(), terminal);
        }
    }

    #[test]
    fn test_cancel_from_queued() {
        let t = task();
        assert!(t.transition(TaskState::Cancelled, None));
        assert!(!t.transition(TaskState::Running, None));
        assert!(t.snapshot().started_at.is_none());
    }

    #[test]
    fn test_failure_records_error() {
        let t = task();
        t.transition(TaskState::Running, None);
        t.transition(TaskState::Failed, Some("capture timed out".into()));
        assert_eq!(t.snapshot().error.as_deref(), Some("capture timed out"));
    }

    #[test]
    fn test_queued_cannot_complete_directly() {
        let t = task();
        assert!(!t.transition(TaskState::Completed, None));
        assert!(!t.transition(TaskState::Queued, None));
    }

    #[test]
    fn test_state_watch_follows_transitions() {
        let t = task();
        let rx = t.subscribe_state();
        t.transition(TaskState::Running, None);
        assert_eq!(*rx.borrow(), TaskState::Running);
    }

    #[test]
    fn test_counters_and_counts() {
        let t = task();
        t.update_counters(|c| {
            c.frames += 3;
            c.slides_accepted += 1;
        });
        let snap = t.snapshot();
        assert_eq!(snap.counters.frames, 3);
        assert_eq!(snap.counters.slides_accepted, 1);

        let mut counts = TaskCounts::default();
        counts.add(TaskState::Queued);
        counts.add(TaskState::Running);
        counts.add(TaskState::Failed);
        assert_eq!(counts.active(), 2);
        assert_eq!(counts.failed, 1);
    }

    #[test]
    fn test_task_spec_defaults_name_to_session() {
        let spec = TaskSpec::new("room-42", CaptureConfig::default());
        assert_eq!(spec.name, "room-42");
        assert_eq!(spec.with_name("Physics").name, "Physics");
    }
}
