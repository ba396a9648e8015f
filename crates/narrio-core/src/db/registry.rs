//! ============================================================================
//! Job Registry - Durable project → remote task mapping
//! ============================================================================
//! Written when a job is accepted by the backend, removed once the job reaches
//! a terminal state or its project is deleted. Read at startup to resume
//! polling for jobs that were in flight when the process stopped.
//! ============================================================================

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{load_collection, save_collection, KeyValueStore};
use crate::types::JobRecord;

/// Storage key of the in-flight job collection
pub const ACTIVE_JOBS_KEY: &str = "active_jobs";

/// Registry of in-flight jobs. At most one record per project.
pub struct JobRegistry {
    store: Arc<dyn KeyValueStore>,
    /// Serializes read-modify-write of the whole collection
    write_lock: Mutex<()>,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Insert a record, replacing any existing one for the same project
    pub async fn add(&self, record: JobRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut records: Vec<JobRecord> = load_collection(self.store.as_ref(), ACTIVE_JOBS_KEY)?;
        records.retain(|r| r.project_id != record.project_id);
        debug!(
            "Registering job {} for project {}",
            record.remote_task_id, record.project_id
        );
        records.push(record);

        save_collection(self.store.as_ref(), ACTIVE_JOBS_KEY, &records)
    }

    /// Remove the record for a project. Returns false when none existed.
    pub async fn remove(&self, project_id: Uuid) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let mut records: Vec<JobRecord> = load_collection(self.store.as_ref(), ACTIVE_JOBS_KEY)?;
        let before = records.len();
        records.retain(|r| r.project_id != project_id);

        if records.len() == before {
            return Ok(false);
        }

        save_collection(self.store.as_ref(), ACTIVE_JOBS_KEY, &records)?;
        debug!("Removed job record for project {}", project_id);
        Ok(true)
    }

    pub async fn all(&self) -> Result<Vec<JobRecord>> {
        let _guard = self.write_lock.lock().await;
        load_collection(self.store.as_ref(), ACTIVE_JOBS_KEY)
    }

    pub async fn get(&self, project_id: Uuid) -> Result<Option<JobRecord>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .find(|r| r.project_id == project_id))
    }
}
