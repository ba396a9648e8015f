//! ============================================================================
//! Generation Manager - Registry of live generation instances
//! ============================================================================
//! Owns every instance the process is running and is the only entry point for
//! starting, evicting and restoring generations.
//!
//! - `start_new_generation` creates the project and launches an instance
//! - `remove` cancels an instance and forgets it
//! - `restore` resumes every job left in the durable registry
//! - `delete_project` and `shutdown` wait for cancelled drivers to exit
//! ============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::{GenerationInstance, InstanceState};
use crate::context::AppContext;
use crate::error::GenerationError;
use crate::types::GenerationRequest;

pub struct GenerationManager {
    ctx: AppContext,
    active: RwLock<Vec<Arc<GenerationInstance>>>,
}

impl GenerationManager {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            active: RwLock::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Create (or reset) the request's project as in-progress, then launch
    /// an instance for it
    pub async fn start_new_generation(
        &self,
        request: GenerationRequest,
    ) -> Result<Arc<GenerationInstance>, GenerationError> {
        self.ctx.projects.ensure_in_progress(&request).await?;

        let instance = GenerationInstance::new(self.ctx.clone(), request);
        self.active.write().await.push(Arc::clone(&instance));
        instance.start().await?;

        info!(
            "Started generation {} for project {}",
            instance.id(),
            instance.project_id()
        );
        Ok(instance)
    }

    /// Cancel an instance and drop it from the active set.
    /// Returns the evicted instance, or None when the id is unknown.
    pub async fn remove(&self, instance_id: Uuid) -> Option<Arc<GenerationInstance>> {
        let removed = {
            let mut active = self.active.write().await;
            let index = active.iter().position(|i| i.id() == instance_id)?;
            active.remove(index)
        };

        removed.cancel().await;
        debug!("Removed generation {}", instance_id);
        Some(removed)
    }

    /// Resume every persisted job. Projects already tracked in memory are
    /// skipped. In-progress projects with no record and no live instance are
    /// marked failed. Returns the number of instances started.
    pub async fn restore(&self) -> Result<usize, GenerationError> {
        let records = self.ctx.registry.all().await?;
        let mut restored = 0;

        for record in &records {
            if self.find_by_project(record.project_id).await.is_some() {
                debug!("Project {} already tracked; not restoring", record.project_id);
                continue;
            }

            let instance = GenerationInstance::recovered(self.ctx.clone(), record);
            self.active.write().await.push(Arc::clone(&instance));
            instance.start().await?;

            info!(
                "Restored generation for project {} (task {})",
                record.project_id, record.remote_task_id
            );
            restored += 1;
        }

        let mut tracked: HashSet<Uuid> = records.iter().map(|r| r.project_id).collect();
        tracked.extend(self.active.read().await.iter().map(|i| i.project_id()));

        let orphans = self.ctx.projects.fail_orphans(&tracked).await?;
        if orphans > 0 {
            info!("Marked {} orphaned projects as failed", orphans);
        }

        Ok(restored)
    }

    pub async fn get(&self, instance_id: Uuid) -> Option<Arc<GenerationInstance>> {
        self.active
            .read()
            .await
            .iter()
            .find(|i| i.id() == instance_id)
            .cloned()
    }

    pub async fn find_by_project(&self, project_id: Uuid) -> Option<Arc<GenerationInstance>> {
        self.active
            .read()
            .await
            .iter()
            .find(|i| i.project_id() == project_id)
            .cloned()
    }

    /// Active instances in start order
    pub async fn active(&self) -> Vec<Arc<GenerationInstance>> {
        self.active.read().await.clone()
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Instances still submitting or polling
    pub async fn running_count(&self) -> usize {
        self.active
            .read()
            .await
            .iter()
            .filter(|i| matches!(i.state(), InstanceState::Submitting | InstanceState::Polling))
            .count()
    }

    /// Cancel any instance for the project, then drop its job record and
    /// the project itself
    pub async fn delete_project(&self, project_id: Uuid) -> Result<bool, GenerationError> {
        let evicted: Vec<_> = {
            let mut active = self.active.write().await;
            let (evicted, kept) = active
                .drain(..)
                .partition(|i: &Arc<GenerationInstance>| i.project_id() == project_id);
            *active = kept;
            evicted
        };

        for instance in &evicted {
            instance.cancel().await;
        }
        // A submission in flight may still write its record
        for instance in &evicted {
            instance.join().await;
        }

        self.ctx.registry.remove(project_id).await?;
        let deleted = self.ctx.projects.delete(project_id).await?;
        if deleted {
            info!("Deleted project {}", project_id);
        }
        Ok(deleted)
    }

    /// Cancel everything and wait for the drivers to exit. Job records stay
    /// so the next start can restore them.
    pub async fn shutdown(&self) {
        let instances: Vec<_> = self.active.write().await.drain(..).collect();
        let count = instances.len();
        for instance in &instances {
            instance.cancel().await;
        }
        for instance in &instances {
            instance.join().await;
        }
        info!("Generation manager shut down ({} instances cancelled)", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{JobStatus, JobStatusResponse};
    use crate::config::GenerationConfig;
    use crate::db::{KeyValueStore, RedbStore};
    use crate::error::{ApiError, FailureKind};
    use crate::generation::testing::{context_with_store, preset_request, setup};
    use crate::generation::TerminalOutcome;
    use crate::types::{JobRecord, Project, ProjectStatus};
    use std::time::Duration;
    use tokio::time::sleep;

    fn status(status: JobStatus) -> Result<JobStatusResponse, ApiError> {
        Ok(JobStatusResponse::new(status))
    }

    // ========================================================================
    // End-to-end scenarios
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_preset_job_completes() {
        let (ctx, api) = setup();
        api.script_next_job(vec![
            status(JobStatus::Pending),
            status(JobStatus::Processing),
            status(JobStatus::Completed),
        ]);
        let manager = GenerationManager::new(ctx.clone());

        let request = preset_request();
        let project_id = request.project_id;
        let instance = manager.start_new_generation(request).await.unwrap();

        let project = ctx.projects.get(project_id).await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::InProgress);

        let outcome = instance.wait_for_outcome().await.unwrap();
        assert_eq!(
            outcome,
            TerminalOutcome::Ready {
                video_url: "https://cdn.test/task-1.mp4".into(),
                thumbnail_url: Some("https://cdn.test/task-1.jpg".into()),
                duration_secs: Some(12.0),
            }
        );

        let calls = api.preset_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].avatar_id, "A1");
        assert_eq!(calls[0].voice_id, "V1");
        assert_eq!(calls[0].script, "Hello world");

        let project = ctx.projects.get(project_id).await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Ready);
        assert_eq!(project.video_url.as_deref(), Some("https://cdn.test/task-1.mp4"));
        assert_eq!(project.thumbnail_url, "https://cdn.test/task-1.jpg");
        assert!(ctx.registry.all().await.unwrap().is_empty());
        assert_eq!(instance.progress().percent(), 100);
        assert_eq!(manager.running_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failure_passes_message_through() {
        let (ctx, api) = setup();
        api.script_next_job(vec![
            status(JobStatus::Pending),
            Ok(JobStatusResponse::failed("render error")),
        ]);
        let manager = GenerationManager::new(ctx.clone());

        let request = preset_request();
        let project_id = request.project_id;
        let instance = manager.start_new_generation(request).await.unwrap();

        let outcome = instance.wait_for_outcome().await.unwrap();
        assert_eq!(
            outcome,
            TerminalOutcome::Failed {
                kind: FailureKind::Backend,
                message: "render error".into(),
            }
        );
        let project = ctx.projects.get(project_id).await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Failed);
        assert!(ctx.registry.all().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_keeps_job_recoverable() {
        let (ctx, api) = setup();
        api.script_next_job(vec![Err(ApiError::Network("connection reset".into()))]);
        let manager = GenerationManager::new(ctx.clone());

        let request = preset_request();
        let project_id = request.project_id;
        let instance = manager.start_new_generation(request).await.unwrap();

        let outcome = instance.wait_for_outcome().await.unwrap();
        match outcome {
            TerminalOutcome::Failed { kind, message } => {
                assert_eq!(kind, FailureKind::Polling);
                assert!(message.contains("connection reset"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(instance.state(), InstanceState::Failed);

        let project = ctx.projects.get(project_id).await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::InProgress);
        let record = ctx.registry.get(project_id).await.unwrap().unwrap();
        assert_eq!(record.remote_task_id, "task-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_resumes_without_resubmitting() {
        let (ctx, api) = setup();
        let mut project = Project::from_request(&preset_request());
        project.remote_task_id = Some("task-77".into());
        let project_id = project.id;
        ctx.projects.insert(project).await.unwrap();
        ctx.registry.add(JobRecord::new(project_id, "task-77")).await.unwrap();
        api.script_task("task-77", vec![status(JobStatus::Completed)]);

        let manager = GenerationManager::new(ctx.clone());
        assert_eq!(manager.restore().await.unwrap(), 1);

        let instance = manager.find_by_project(project_id).await.unwrap();
        assert_eq!(instance.state(), InstanceState::Polling);
        assert!(instance.request().is_none());

        let outcome = instance.wait_for_outcome().await.unwrap();
        assert!(matches!(outcome, TerminalOutcome::Ready { .. }));
        assert_eq!(api.create_calls(), 0);

        let project = ctx.projects.get(project_id).await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Ready);
        assert!(ctx.registry.all().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_skips_tracked_and_fails_orphans() {
        let (ctx, api) = setup();
        let manager = GenerationManager::new(ctx.clone());

        // Live instance with a record
        let live = manager.start_new_generation(preset_request()).await.unwrap();
        sleep(Duration::from_secs(1)).await;
        assert!(ctx.registry.get(live.project_id()).await.unwrap().is_some());

        // In-progress project nothing can resume
        let orphan = Project::from_request(&preset_request());
        let orphan_id = orphan.id;
        ctx.projects.insert(orphan).await.unwrap();

        assert_eq!(manager.restore().await.unwrap(), 0);
        assert_eq!(manager.active_count().await, 1);
        assert_eq!(api.create_calls(), 1);

        let orphan = ctx.projects.get(orphan_id).await.unwrap().unwrap();
        assert_eq!(orphan.status, ProjectStatus::Failed);
        let live_project = ctx.projects.get(live.project_id()).await.unwrap().unwrap();
        assert_eq!(live_project.status, ProjectStatus::InProgress);

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_generations_are_independent() {
        let (ctx, api) = setup();
        api.script_next_job(vec![]);
        api.script_next_job(vec![status(JobStatus::Pending), status(JobStatus::Completed)]);
        let manager = GenerationManager::new(ctx.clone());

        let first = manager.start_new_generation(preset_request()).await.unwrap();
        let second = manager.start_new_generation(preset_request()).await.unwrap();
        sleep(Duration::from_secs(1)).await;

        let records = ctx.registry.all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].project_id, records[1].project_id);

        manager.remove(first.id()).await.unwrap();
        assert_eq!(first.state(), InstanceState::Cancelled);
        assert_eq!(manager.active_count().await, 1);

        let outcome = second.wait_for_outcome().await.unwrap();
        assert!(matches!(outcome, TerminalOutcome::Ready { .. }));

        // The cancelled job is left for recovery
        let first_project = ctx.projects.get(first.project_id()).await.unwrap().unwrap();
        assert_eq!(first_project.status, ProjectStatus::InProgress);
        assert!(ctx.registry.get(first.project_id()).await.unwrap().is_some());
        assert!(ctx.registry.get(second.project_id()).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_during_submission_keeps_job_restorable() {
        let (ctx, api) = setup();
        api.delay_creates(Duration::from_secs(2));
        api.script_next_job(vec![status(JobStatus::Completed)]);
        let manager = GenerationManager::new(ctx.clone());

        let instance = manager.start_new_generation(preset_request()).await.unwrap();
        let project_id = instance.project_id();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(instance.state(), InstanceState::Submitting);

        manager.remove(instance.id()).await.unwrap();
        sleep(Duration::from_secs(10)).await;

        let project = ctx.projects.get(project_id).await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::InProgress);
        let record = ctx.registry.get(project_id).await.unwrap().unwrap();
        assert_eq!(record.remote_task_id, "task-1");
        assert_eq!(api.status_calls("task-1"), 0);

        // A later restore picks the job up instead of failing it as an orphan
        let restarted = GenerationManager::new(ctx.clone());
        assert_eq!(restarted.restore().await.unwrap(), 1);
        let resumed = restarted.find_by_project(project_id).await.unwrap();
        let outcome = resumed.wait_for_outcome().await.unwrap();
        assert!(matches!(outcome, TerminalOutcome::Ready { .. }));
        assert_eq!(api.create_calls(), 1);
        assert_eq!(
            ctx.projects.get(project_id).await.unwrap().unwrap().status,
            ProjectStatus::Ready
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_submission() {
        let (ctx, api) = setup();
        api.delay_creates(Duration::from_secs(3));
        let manager = GenerationManager::new(ctx.clone());

        let instance = manager.start_new_generation(preset_request()).await.unwrap();
        sleep(Duration::from_millis(500)).await;

        manager.shutdown().await;
        assert_eq!(instance.state(), InstanceState::Cancelled);
        assert!(ctx.registry.get(instance.project_id()).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_during_submission_leaves_no_record() {
        let (ctx, api) = setup();
        api.delay_creates(Duration::from_secs(2));
        let manager = GenerationManager::new(ctx.clone());

        let instance = manager.start_new_generation(preset_request()).await.unwrap();
        let project_id = instance.project_id();
        sleep(Duration::from_secs(1)).await;

        assert!(manager.delete_project(project_id).await.unwrap());
        sleep(Duration::from_secs(5)).await;
        assert!(ctx.registry.get(project_id).await.unwrap().is_none());
        assert!(ctx.projects.get(project_id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_unknown_instance() {
        let (ctx, _api) = setup();
        let manager = GenerationManager::new(ctx);
        assert!(manager.remove(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_project_cancels_and_cleans_up() {
        let (ctx, _api) = setup();
        let manager = GenerationManager::new(ctx.clone());
        let instance = manager.start_new_generation(preset_request()).await.unwrap();
        let project_id = instance.project_id();
        sleep(Duration::from_secs(1)).await;

        assert!(manager.delete_project(project_id).await.unwrap());
        assert_eq!(instance.state(), InstanceState::Cancelled);
        assert_eq!(manager.active_count().await, 0);
        assert!(ctx.projects.get(project_id).await.unwrap().is_none());
        assert!(ctx.registry.get(project_id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_survives_restart_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("narrio.redb");
        let path = path.to_str().unwrap();

        let project_id = {
            let store: Arc<dyn KeyValueStore> = Arc::new(RedbStore::open(Some(path)).unwrap());
            let (ctx, _api) = context_with_store(store, GenerationConfig::default());
            let manager = GenerationManager::new(ctx);
            let instance = manager.start_new_generation(preset_request()).await.unwrap();
            sleep(Duration::from_secs(5)).await;
            manager.shutdown().await;
            instance.project_id()
        };
        // Let the cancelled driver drop its handle on the database
        sleep(Duration::from_millis(100)).await;

        let store: Arc<dyn KeyValueStore> = Arc::new(RedbStore::open(Some(path)).unwrap());
        let (ctx, api) = context_with_store(store, GenerationConfig::default());
        api.script_task("task-1", vec![status(JobStatus::Completed)]);

        let manager = GenerationManager::new(ctx.clone());
        assert_eq!(manager.restore().await.unwrap(), 1);

        let instance = manager.find_by_project(project_id).await.unwrap();
        instance.wait_for_outcome().await.unwrap();
        assert_eq!(api.create_calls(), 0);

        let project = ctx.projects.get(project_id).await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Ready);
        assert_eq!(project.remote_task_id.as_deref(), Some("task-1"));
    }
}
