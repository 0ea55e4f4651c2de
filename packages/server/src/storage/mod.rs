//! Persistence capability.
//!
//! Handlers talk to [`Storage`] only; the trait is the seam where a real
//! database would plug in. The in-memory implementation in [`memory`]
//! backs development and tests.

pub mod memory;
pub mod record;

pub use memory::MemoryStorage;
pub use record::{
    NewTask, NewUser, TaskFilter, TaskPatch, TaskPriority, TaskRecord, TaskStatus, UserRecord,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Pluggable persistence backend.
/// Implementations: in-memory (development, tests); `PostgreSQL` (future).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Cheap connectivity check used by the health aggregator.
    async fn ping(&self) -> anyhow::Result<()>;

    /// Creates a user. Returns `None` when the email or username is taken.
    async fn create_user(&self, new: NewUser) -> anyhow::Result<Option<UserRecord>>;

    /// Looks up an active user by email.
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<UserRecord>>;

    /// Looks up an active user by id.
    async fn find_user_by_id(&self, id: u64) -> anyhow::Result<Option<UserRecord>>;

    /// Stamps a successful login.
    async fn record_login(&self, id: u64, at: DateTime<Utc>) -> anyhow::Result<()>;

    /// Creates a task owned by a user.
    async fn create_task(&self, new: NewTask) -> anyhow::Result<TaskRecord>;

    /// Lists a user's tasks, newest first, honoring the filter.
    async fn list_tasks(&self, user_id: u64, filter: TaskFilter) -> anyhow::Result<Vec<TaskRecord>>;

    /// Fetches one of the user's tasks. `None` when absent or owned by
    /// someone else.
    async fn get_task(&self, user_id: u64, task_id: u64) -> anyhow::Result<Option<TaskRecord>>;

    /// Applies a partial update to one of the user's tasks. `None` when
    /// absent or owned by someone else.
    async fn update_task(
        &self,
        user_id: u64,
        task_id: u64,
        patch: TaskPatch,
    ) -> anyhow::Result<Option<TaskRecord>>;

    /// Deletes one of the user's tasks. False when absent or owned by
    /// someone else.
    async fn delete_task(&self, user_id: u64, task_id: u64) -> anyhow::Result<bool>;
}
