//! Background analysis task registry
//!
//! `POST /api/analyze` returns a task id immediately; the spawned job writes
//! its outcome here and `GET /api/results/{id}` polls it.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Finished tasks are forgotten an hour after they finish
const TASK_TTL: Duration = Duration::from_secs(3600);
/// Jobs that never report back are dropped after this long
const PENDING_TTL: Duration = Duration::from_secs(6 * 3600);

#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Pending,
    Completed(Value),
    Failed(String),
}

#[derive(Debug, Clone)]
struct TaskEntry {
    state: TaskState,
    created_at: Instant,
    finished_at: Option<Instant>,
}

impl TaskEntry {
    fn is_expired(&self, now: Instant) -> bool {
        match self.finished_at {
            Some(finished) => now.saturating_duration_since(finished) >= TASK_TTL,
            None => now.saturating_duration_since(self.created_at) >= PENDING_TTL,
        }
    }
}

#[derive(Clone, Default)]
pub struct TaskStore {
    tasks: Arc<RwLock<HashMap<Uuid, TaskEntry>>>,
}

fn prune(tasks: &mut HashMap<Uuid, TaskEntry>, now: Instant) {
    tasks.retain(|_, entry| !entry.is_expired(now));
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending task
    pub async fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        let mut tasks = self.tasks.write().await;

        let now = Instant::now();
        prune(&mut tasks, now);

        tasks.insert(
            id,
            TaskEntry {
                state: TaskState::Pending,
                created_at: now,
                finished_at: None,
            },
        );
        id
    }

    pub async fn complete(&self, id: Uuid, result: Value) {
        self.set(id, TaskState::Completed(result)).await;
    }

    pub async fn fail(&self, id: Uuid, error: impl Into<String>) {
        self.set(id, TaskState::Failed(error.into())).await;
    }

    async fn set(&self, id: Uuid, state: TaskState) {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&id) {
            Some(entry) => {
                entry.state = state;
                entry.finished_at = Some(Instant::now());
            }
            None => tracing::warn!("Result for unknown task {}", id),
        }
    }

    pub async fn get(&self, id: &Uuid) -> Option<TaskState> {
        let tasks = self.tasks.read().await;
        tasks.get(id).map(|entry| entry.state.clone())
    }

    pub async fn pending_count(&self) -> usize {
        let tasks = self.tasks.read().await;
        tasks
            .values()
            .filter(|entry| entry.state == TaskState::Pending)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_task_lifecycle() {
        let store = TaskStore::new();
        let ok = store.create().await;
        let bad = store.create().await;
        assert_eq!(store.pending_count().await, 2);

        store.complete(ok, json!({"openai": "fine"})).await;
        store.fail(bad, "market data unavailable").await;

        assert_eq!(
            store.get(&ok).await,
            Some(TaskState::Completed(json!({"openai": "fine"})))
        );
        assert_eq!(
            store.get(&bad).await,
            Some(TaskState::Failed("market data unavailable".to_string()))
        );
        assert_eq!(store.pending_count().await, 0);
        assert_eq!(store.get(&Uuid::new_v4()).await, None);
    }

    #[test]
    fn test_prune_uses_finish_time() {
        let start = Instant::now();
        let entry = |state, finished_at| TaskEntry {
            state,
            created_at: start,
            finished_at,
        };

        let slow = Uuid::new_v4();
        let stale = Uuid::new_v4();
        let stuck = Uuid::new_v4();
        let running = Uuid::new_v4();
        let mut tasks = HashMap::from([
            // Ran for most of an hour, finished 10 minutes before the sweep
            (
                slow,
                entry(
                    TaskState::Completed(json!({})),
                    Some(start + Duration::from_secs(3000)),
                ),
            ),
            (
                stale,
                entry(TaskState::Failed("timeout".to_string()), Some(start)),
            ),
            (stuck, entry(TaskState::Pending, None)),
        ]);

        prune(&mut tasks, start + Duration::from_secs(3600));
        assert!(tasks.contains_key(&slow));
        assert!(!tasks.contains_key(&stale));
        assert!(tasks.contains_key(&stuck));

        tasks.insert(
            running,
            TaskEntry {
                state: TaskState::Pending,
                created_at: start + Duration::from_secs(5 * 3600),
                finished_at: None,
            },
        );
        prune(&mut tasks, start + PENDING_TTL);
        assert!(!tasks.contains_key(&slow));
        assert!(!tasks.contains_key(&stuck));
        assert!(tasks.contains_key(&running));
    }
}
