//! In-memory [`Storage`] implementation.
//!
//! Users live behind a single `RwLock`ed map so the uniqueness check and
//! insert are atomic; tasks use a [`DashMap`] for fine-grained concurrent
//! access. Suitable for development and tests, and for workloads where the
//! data set fits in memory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use super::record::{
    NewTask, NewUser, TaskFilter, TaskPatch, TaskRecord, TaskStatus, UserRecord,
};
use super::Storage;

/// In-memory storage backend.
pub struct MemoryStorage {
    users: RwLock<HashMap<u64, UserRecord>>,
    tasks: DashMap<u64, TaskRecord>,
    next_user_id: AtomicU64,
    next_task_id: AtomicU64,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            tasks: DashMap::new(),
            next_user_id: AtomicU64::new(1),
            next_task_id: AtomicU64::new(1),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn ping(&self) -> anyhow::Result<()> {
        // Nothing to reach; the map is local memory.
        Ok(())
    }

    async fn create_user(&self, new: NewUser) -> anyhow::Result<Option<UserRecord>> {
        let mut users = self.users.write();
        let taken = users
            .values()
            .any(|u| u.email == new.email || u.username == new.username);
        if taken {
            return Ok(None);
        }

        let id = self.next_user_id.fetch_add(1, Ordering::Relaxed);
        let record = UserRecord {
            id,
            email: new.email,
            username: new.username,
            password_hash: new.password_hash,
            full_name: new.full_name,
            is_active: true,
            created_at: Utc::now(),
            last_login: None,
        };
        users.insert(id, record.clone());
        Ok(Some(record))
    }

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<UserRecord>> {
        Ok(self
            .users
            .read()
            .values()
            .find(|u| u.email == email && u.is_active)
            .cloned())
    }

    async fn find_user_by_id(&self, id: u64) -> anyhow::Result<Option<UserRecord>> {
        Ok(self
            .users
            .read()
            .get(&id)
            .filter(|u| u.is_active)
            .cloned())
    }

    async fn record_login(&self, id: u64, at: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(user) = self.users.write().get_mut(&id) {
            user.last_login = Some(at);
        }
        Ok(())
    }

    async fn create_task(&self, new: NewTask) -> anyhow::Result<TaskRecord> {
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let record = TaskRecord {
            id,
            title: new.title,
            description: new.description,
            status: TaskStatus::Pending,
            priority: new.priority,
            user_id: new.user_id,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.tasks.insert(id, record.clone());
        Ok(record)
    }

    async fn list_tasks(
        &self,
        user_id: u64,
        filter: TaskFilter,
    ) -> anyhow::Result<Vec<TaskRecord>> {
        let mut tasks: Vec<TaskRecord> = self
            .tasks
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .filter(|entry| filter.status.is_none_or(|s| entry.status == s))
            .map(|entry| entry.value().clone())
            .collect();
        // Newest first; id breaks ties for records created in the same tick.
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tasks
            .into_iter()
            .skip(filter.skip)
            .take(filter.limit)
            .collect())
    }

    async fn get_task(&self, user_id: u64, task_id: u64) -> anyhow::Result<Option<TaskRecord>> {
        Ok(self
            .tasks
            .get(&task_id)
            .filter(|t| t.user_id == user_id)
            .map(|t| t.clone()))
    }

    async fn update_task(
        &self,
        user_id: u64,
        task_id: u64,
        patch: TaskPatch,
    ) -> anyhow::Result<Option<TaskRecord>> {
        let Some(mut entry) = self.tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        if entry.user_id != user_id {
            return Ok(None);
        }

        if let Some(title) = patch.title {
            entry.title = title;
        }
        if let Some(description) = patch.description {
            entry.description = Some(description);
        }
        if let Some(priority) = patch.priority {
            entry.priority = priority;
        }
        if let Some(status) = patch.status {
            if status == TaskStatus::Completed && entry.status != TaskStatus::Completed {
                entry.completed_at = Some(Utc::now());
            }
            entry.status = status;
        }
        entry.updated_at = Utc::now();
        Ok(Some(entry.clone()))
    }

    async fn delete_task(&self, user_id: u64, task_id: u64) -> anyhow::Result<bool> {
        let owned = self
            .tasks
            .get(&task_id)
            .is_some_and(|t| t.user_id == user_id);
        if !owned {
            return Ok(false);
        }
        Ok(self.tasks.remove(&task_id).is_some())
    }
}
