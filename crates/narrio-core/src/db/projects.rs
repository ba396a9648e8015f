//! ============================================================================
//! Project Store - The user's list of video projects
//! ============================================================================
//! Sole authority over project records. Generation instances request status
//! changes through it; every mutation is serialized so two jobs finishing at
//! the same moment cannot overwrite each other's update.
//! ============================================================================

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{load_collection, save_collection, KeyValueStore};
use crate::types::{GenerationRequest, Project, ProjectStatus, ProjectUpdate};

/// Storage key of the project collection
pub const PROJECTS_KEY: &str = "projects";

/// Summary counts over all projects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStats {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
    pub created_last_week: usize,
}

/// Persistent project list, newest first
pub struct ProjectStore {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl ProjectStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<Vec<Project>> {
        load_collection(self.store.as_ref(), PROJECTS_KEY)
    }

    fn persist(&self, projects: &[Project]) -> Result<()> {
        save_collection(self.store.as_ref(), PROJECTS_KEY, projects)
    }

    /// Run a read-modify-write cycle under the store lock
    async fn mutate<T>(&self, f: impl FnOnce(&mut Vec<Project>) -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let mut projects = self.load()?;
        let out = f(&mut projects)?;
        self.persist(&projects)?;
        Ok(out)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn list(&self) -> Result<Vec<Project>> {
        let _guard = self.write_lock.lock().await;
        self.load()
    }

    pub async fn list_by_status(&self, status: ProjectStatus) -> Result<Vec<Project>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|p| p.status == status)
            .collect())
    }

    /// The `n` newest projects
    pub async fn recent(&self, n: usize) -> Result<Vec<Project>> {
        Ok(self.list().await?.into_iter().take(n).collect())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Project>> {
        Ok(self.list().await?.into_iter().find(|p| p.id == id))
    }

    pub async fn stats(&self) -> Result<ProjectStats> {
        let projects = self.list().await?;
        let week_ago = Utc::now() - Duration::days(7);

        let mut by_status = HashMap::new();
        for project in &projects {
            *by_status.entry(project.status.to_string()).or_insert(0usize) += 1;
        }

        Ok(ProjectStats {
            total: projects.len(),
            created_last_week: projects.iter().filter(|p| p.created_at > week_ago).count(),
            by_status,
        })
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert a project at the front, replacing one with the same id
    pub async fn insert(&self, project: Project) -> Result<()> {
        self.mutate(|projects| {
            projects.retain(|p| p.id != project.id);
            debug!("Inserted project {}", project.id);
            projects.insert(0, project);
            Ok(())
        })
        .await
    }

    /// Make sure the request's project exists and is marked in-progress.
    /// Existing projects keep their title and creation time.
    pub async fn ensure_in_progress(&self, request: &GenerationRequest) -> Result<Project> {
        self.mutate(|projects| {
            if let Some(existing) = projects.iter_mut().find(|p| p.id == request.project_id) {
                existing.status = ProjectStatus::InProgress;
                return Ok(existing.clone());
            }

            let project = Project::from_request(request);
            info!("Created project {} ({})", project.id, project.title);
            projects.insert(0, project.clone());
            Ok(project)
        })
        .await
    }

    /// Apply a partial update. Returns None when the project no longer exists.
    pub async fn apply_update(&self, id: Uuid, update: ProjectUpdate) -> Result<Option<Project>> {
        self.mutate(|projects| {
            let Some(project) = projects.iter_mut().find(|p| p.id == id) else {
                debug!("Update for missing project {} ignored", id);
                return Ok(None);
            };

            if let Some(status) = update.status {
                project.status = status;
            }
            if let Some(url) = update.video_url {
                project.video_url = Some(url);
            }
            if let Some(thumb) = update.thumbnail_url {
                project.thumbnail_url = thumb;
            }
            if let Some(task_id) = update.remote_task_id {
                project.remote_task_id = Some(task_id);
            }
            if let Some(duration) = update.duration_secs {
                project.duration_secs = duration;
            }

            debug!("Updated project {} → {}", id, project.status);
            Ok(Some(project.clone()))
        })
        .await
    }

    pub async fn rename(&self, id: Uuid, new_name: &str) -> Result<Project> {
        let name = new_name.trim();
        if name.is_empty() {
            return Err(anyhow!("Project name cannot be empty"));
        }

        self.mutate(|projects| {
            let project = projects
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| anyhow!("Project not found: {}", id))?;
            project.title = name.to_string();
            Ok(project.clone())
        })
        .await
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        self.mutate(|projects| {
            let before = projects.len();
            projects.retain(|p| p.id != id);
            Ok(projects.len() != before)
        })
        .await
    }

    /// Mark in-progress projects that nothing can resume as failed.
    /// Returns the number of projects changed.
    pub async fn fail_orphans(&self, tracked: &HashSet<Uuid>) -> Result<usize> {
        self.mutate(|projects| {
            let mut failed = 0;
            for project in projects.iter_mut() {
                if project.status == ProjectStatus::InProgress && !tracked.contains(&project.id) {
                    project.status = ProjectStatus::Failed;
                    failed += 1;
                }
            }
            if failed > 0 {
                info!("Marked {} orphaned in-progress projects as failed", failed);
            }
            Ok(failed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::types::{AvatarRef, VoiceRef};

    fn store() -> ProjectStore {
        ProjectStore::new(Arc::new(MemoryStore::new()))
    }

    fn request(script: &str) -> GenerationRequest {
        GenerationRequest::new(
            script,
            AvatarRef::preset("Mark", "A1"),
            VoiceRef {
                voice_id: "V1".into(),
                name: "Brian".into(),
                locale: None,
            },
        )
    }

    #[tokio::test]
    async fn test_ensure_in_progress_creates_then_reuses() {
        let store = store();
        let req = request("Hello world").with_title("Launch");

        let created = store.ensure_in_progress(&req).await.unwrap();
        assert_eq!(created.status, ProjectStatus::InProgress);

        store
            .apply_update(req.project_id, ProjectUpdate::status(ProjectStatus::Failed))
            .await
            .unwrap();
        store.rename(req.project_id, "Relaunch").await.unwrap();

        let again = store.ensure_in_progress(&req).await.unwrap();
        assert_eq!(again.status, ProjectStatus::InProgress);
        assert_eq!(again.title, "Relaunch");
        assert_eq!(again.created_at, created.created_at);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_newest_first() {
        let store = store();
        let first = request("one");
        let second = request("two");
        store.ensure_in_progress(&first).await.unwrap();
        store.ensure_in_progress(&second).await.unwrap();

        let recent = store.recent(1).await.unwrap();
        assert_eq!(recent[0].id, second.project_id);
    }

    #[tokio::test]
    async fn test_apply_update_partial() {
        let store = store();
        let req = request("Hello world");
        store.ensure_in_progress(&req).await.unwrap();

        let updated = store
            .apply_update(
                req.project_id,
                ProjectUpdate {
                    status: Some(ProjectStatus::Ready),
                    video_url: Some("https://cdn/v.mp4".into()),
                    duration_secs: Some(9.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.status, ProjectStatus::Ready);
        assert_eq!(updated.video_url.as_deref(), Some("https://cdn/v.mp4"));
        assert_eq!(updated.duration_secs, 9.0);
        assert_eq!(updated.voice_name, "Brian");
    }

    #[tokio::test]
    async fn test_update_missing_project_is_noop() {
        let store = store();
        let result = store
            .apply_update(Uuid::new_v4(), ProjectUpdate::status(ProjectStatus::Ready))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rename_trims_and_rejects_empty() {
        let store = store();
        let req = request("Hello");
        store.ensure_in_progress(&req).await.unwrap();

        let renamed = store.rename(req.project_id, "  Pitch deck  ").await.unwrap();
        assert_eq!(renamed.title, "Pitch deck");
        assert!(store.rename(req.project_id, "   ").await.is_err());
        assert!(store.rename(Uuid::new_v4(), "x").await.is_err());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = store();
        let req = request("Hello");
        store.ensure_in_progress(&req).await.unwrap();

        assert!(store.delete(req.project_id).await.unwrap());
        assert!(!store.delete(req.project_id).await.unwrap());
        assert!(store.get(req.project_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_orphans() {
        let store = store();
        let tracked = request("tracked");
        let orphan = request("orphan");
        let done = request("done");
        for req in [&tracked, &orphan, &done] {
            store.ensure_in_progress(req).await.unwrap();
        }
        store
            .apply_update(done.project_id, ProjectUpdate::status(ProjectStatus::Ready))
            .await
            .unwrap();

        let keep: HashSet<Uuid> = [tracked.project_id].into_iter().collect();
        assert_eq!(store.fail_orphans(&keep).await.unwrap(), 1);

        let get = |id| {
            let store = &store;
            async move { store.get(id).await.unwrap().unwrap().status }
        };
        assert_eq!(get(tracked.project_id).await, ProjectStatus::InProgress);
        assert_eq!(get(orphan.project_id).await, ProjectStatus::Failed);
        assert_eq!(get(done.project_id).await, ProjectStatus::Ready);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = store();
        let a = request("a");
        let b = request("b");
        store.ensure_in_progress(&a).await.unwrap();
        store.ensure_in_progress(&b).await.unwrap();
        store
            .apply_update(a.project_id, ProjectUpdate::status(ProjectStatus::Ready))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.created_last_week, 2);
        assert_eq!(stats.by_status.get("ready"), Some(&1));
        assert_eq!(stats.by_status.get("in-progress"), Some(&1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_do_not_lose_writes() {
        let store = Arc::new(store());
        let requests: Vec<_> = (0..10).map(|i| request(&format!("script {}", i))).collect();
        for req in &requests {
            store.ensure_in_progress(req).await.unwrap();
        }

        let mut handles = Vec::new();
        for req in &requests {
            let store = store.clone();
            let id = req.project_id;
            handles.push(tokio::spawn(async move {
                store
                    .apply_update(id, ProjectUpdate::status(ProjectStatus::Ready))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let ready = store.list_by_status(ProjectStatus::Ready).await.unwrap();
        assert_eq!(ready.len(), 10);
    }
}
