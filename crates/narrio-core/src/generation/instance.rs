//! ============================================================================
//! Generation Instance - One video job from submission to terminal outcome
//! ============================================================================
//! A single tokio task per attempt runs the optimistic progress ticker and the
//! job driver side by side. Both stop together when the driver finishes or
//! the instance's cancellation token fires.
//!
//! Submission is the one step cancellation does not interrupt: once the
//! backend has accepted a job its record is written, and the token is only
//! checked after that.
//!
//! Every write to the project store goes through a per-instance mutation gate
//! that `cancel()` also takes, so nothing is written once `cancel()` returns.
//! ============================================================================

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    GenerationEvent, GenerationProgress, GenerationSnapshot, InstanceState, TerminalOutcome,
};
use crate::api::{wait_for_task, ImageJobRequest, JobResult, PresetJobRequest};
use crate::context::AppContext;
use crate::error::{ApiError, GenerationError};
use crate::types::{AvatarSource, GenerationRequest, JobRecord, ProjectStatus, ProjectUpdate};

/// Message used when the backend fails a task without saying why
const DEFAULT_FAILURE_MESSAGE: &str = "Video generation failed";

pub struct GenerationInstance {
    id: Uuid,
    project_id: Uuid,
    /// None for instances rebuilt from a job record after a restart
    request: Option<Arc<GenerationRequest>>,
    ctx: AppContext,
    snapshot: watch::Sender<GenerationSnapshot>,
    /// Token of the running attempt
    run: Mutex<Option<CancellationToken>>,
    /// Driver task of the running attempt
    driver: Mutex<Option<JoinHandle<()>>>,
    /// Held around project store writes and by `cancel()`
    gate: Mutex<()>,
}

impl GenerationInstance {
    /// Instance for a new request; it will submit a job when started
    pub fn new(ctx: AppContext, request: GenerationRequest) -> Arc<Self> {
        let project_id = request.project_id;
        Self::build(ctx, project_id, Some(Arc::new(request)), None)
    }

    /// Instance resuming a job that was in flight before a restart.
    /// Starting it goes straight to polling.
    pub fn recovered(ctx: AppContext, record: &JobRecord) -> Arc<Self> {
        Self::build(
            ctx,
            record.project_id,
            None,
            Some(record.remote_task_id.clone()),
        )
    }

    fn build(
        ctx: AppContext,
        project_id: Uuid,
        request: Option<Arc<GenerationRequest>>,
        remote_task_id: Option<String>,
    ) -> Arc<Self> {
        let id = Uuid::new_v4();
        let (snapshot, _) = watch::channel(GenerationSnapshot {
            instance_id: id,
            project_id,
            state: InstanceState::Idle,
            progress: GenerationProgress::initial(&ctx.config),
            remote_task_id,
            attempt: 1,
            outcome: None,
        });

        Arc::new(Self {
            id,
            project_id,
            request,
            ctx,
            snapshot,
            run: Mutex::new(None),
            driver: Mutex::new(None),
            gate: Mutex::new(()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    pub fn request(&self) -> Option<&GenerationRequest> {
        self.request.as_deref()
    }

    pub fn snapshot(&self) -> GenerationSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> InstanceState {
        self.snapshot.borrow().state
    }

    pub fn progress(&self) -> GenerationProgress {
        self.snapshot.borrow().progress
    }

    pub fn remote_task_id(&self) -> Option<String> {
        self.snapshot.borrow().remote_task_id.clone()
    }

    /// Watch the instance's snapshot; updates at ticker cadence
    pub fn subscribe(&self) -> watch::Receiver<GenerationSnapshot> {
        self.snapshot.subscribe()
    }

    /// Wait for the current attempt to end.
    /// Returns None if the instance is cancelled first.
    pub async fn wait_for_outcome(&self) -> Option<TerminalOutcome> {
        let mut rx = self.snapshot.subscribe();
        loop {
            {
                let snap = rx.borrow_and_update();
                if let Some(outcome) = &snap.outcome {
                    return Some(outcome.clone());
                }
                if snap.state == InstanceState::Cancelled {
                    return None;
                }
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    // ========================================================================
    // Lifecycle Operations
    // ========================================================================

    /// Begin the job. Submits first unless a remote task id is already known.
    pub async fn start(self: &Arc<Self>) -> Result<(), GenerationError> {
        let mut run = self.run.lock().await;

        let state = self.state();
        if state != InstanceState::Idle {
            return Err(GenerationError::InvalidTransition {
                action: "start".into(),
                state,
            });
        }

        let next = if self.remote_task_id().is_some() {
            InstanceState::Polling
        } else {
            InstanceState::Submitting
        };
        self.set_state(next);

        let token = CancellationToken::new();
        *run = Some(token.clone());

        info!(
            "Generation {} for project {} started ({})",
            self.id, self.project_id, next
        );

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.drive(token).await;
        });
        *self.driver.lock().await = Some(handle);

        Ok(())
    }

    /// Resubmit after a failure as a brand-new remote job
    pub async fn retry(self: &Arc<Self>) -> Result<(), GenerationError> {
        {
            let _gate = self.gate.lock().await;

            let state = self.state();
            if state != InstanceState::Failed {
                return Err(GenerationError::InvalidTransition {
                    action: "retry".into(),
                    state,
                });
            }

            let request = self.request.as_ref().ok_or_else(|| {
                GenerationError::NotRetryable(
                    "generation was restored without its original request".into(),
                )
            })?;

            self.ctx.projects.ensure_in_progress(request).await?;

            let initial = GenerationProgress::initial(&self.ctx.config);
            self.snapshot.send_modify(|snap| {
                snap.state = InstanceState::Idle;
                snap.progress = initial;
                snap.remote_task_id = None;
                snap.outcome = None;
                snap.attempt += 1;
            });

            info!(
                "Retrying generation {} for project {} (attempt {})",
                self.id,
                self.project_id,
                self.snapshot.borrow().attempt
            );
        }

        self.start().await
    }

    /// Stop all work. The project and its job record are left untouched so the
    /// remote job can still be picked up later.
    pub async fn cancel(&self) {
        let _gate = self.gate.lock().await;

        if let Some(token) = self.run.lock().await.take() {
            token.cancel();
        }

        let changed = self.snapshot.send_if_modified(|snap| {
            if snap.state.is_settled() {
                false
            } else {
                snap.state = InstanceState::Cancelled;
                true
            }
        });

        if changed {
            info!("Generation {} for project {} cancelled", self.id, self.project_id);
            self.publish_state(InstanceState::Cancelled);
        }
    }

    /// Wait until the driver task of the current attempt has exited.
    /// After `cancel()` this returns once an in-flight submission is recorded.
    pub async fn join(&self) {
        let handle = self.driver.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Generation {} driver task failed: {}", self.id, e);
            }
        }
    }

    // ========================================================================
    // Driver
    // ========================================================================

    async fn drive(self: Arc<Self>, token: CancellationToken) {
        let submitted = match self.remote_task_id() {
            Some(task_id) => Ok(task_id),
            None => tokio::select! {
                result = self.submit(&token) => result,
                _ = self.tick_progress() => return,
            },
        };

        let result = match submitted {
            Ok(task_id) => tokio::select! {
                biased;
                _ = token.cancelled() => return,
                result = self.await_completion(&task_id) => result,
                _ = self.tick_progress() => return,
            },
            Err(e) => Err(e),
        };

        self.finish(result, &token).await;
    }

    async fn submit(&self, token: &CancellationToken) -> Result<String, GenerationError> {
        let request = self.request.as_ref().ok_or_else(|| {
            GenerationError::Submission(ApiError::InvalidInput(
                "No generation request to submit".into(),
            ))
        })?;
        request.validate().map_err(GenerationError::Submission)?;

        let locale = request.voice.locale.clone();
        let background_color = request.background_color().map(str::to_string);

        let submitted = match &request.avatar.source {
            AvatarSource::Custom { image, image_name } => {
                info!("Submitting image-based job for project {}", self.project_id);
                self.ctx
                    .api
                    .create_job_from_image(&ImageJobRequest {
                        image: image.clone(),
                        image_name: image_name.clone(),
                        voice_id: request.voice.voice_id.clone(),
                        script: request.script.clone(),
                        locale,
                        background_color,
                        dimensions: request.dimensions,
                    })
                    .await
            }
            AvatarSource::Preset { avatar_id } => {
                info!(
                    "Submitting preset job for project {} (avatar {})",
                    self.project_id, avatar_id
                );
                self.ctx
                    .api
                    .create_job_from_preset(&PresetJobRequest {
                        avatar_id: avatar_id.clone(),
                        voice_id: request.voice.voice_id.clone(),
                        script: request.script.clone(),
                        locale,
                        background_color,
                        dimensions: request.dimensions,
                    })
                    .await
            }
        };
        let task_id = submitted.map_err(GenerationError::Submission)?;

        self.ctx
            .registry
            .add(JobRecord::new(self.project_id, task_id.clone()))
            .await?;
        self.snapshot
            .send_modify(|snap| snap.remote_task_id = Some(task_id.clone()));

        {
            let _gate = self.gate.lock().await;
            if token.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }
            self.ctx
                .projects
                .apply_update(
                    self.project_id,
                    ProjectUpdate {
                        remote_task_id: Some(task_id.clone()),
                        ..Default::default()
                    },
                )
                .await?;

            self.snapshot.send_modify(|snap| snap.state = InstanceState::Polling);
        }
        self.publish_state(InstanceState::Polling);

        Ok(task_id)
    }

    async fn await_completion(&self, task_id: &str) -> Result<JobResult, GenerationError> {
        let config = &self.ctx.config;
        wait_for_task(self.ctx.api.as_ref(), task_id, &config.poll, config.completion_timeout)
            .await
            .map_err(|e| match e {
                ApiError::TaskFailed(message) if message.is_empty() => {
                    GenerationError::TaskFailed(DEFAULT_FAILURE_MESSAGE.into())
                }
                ApiError::TaskFailed(message) => GenerationError::TaskFailed(message),
                ApiError::TimedOut(secs) => GenerationError::TimedOut(secs),
                other => GenerationError::Polling(other),
            })?;

        self.ctx
            .api
            .get_job_result(task_id)
            .await
            .map_err(GenerationError::Result)
    }

    /// Advance the optimistic progress forever; the driver drops this future
    async fn tick_progress(&self) {
        let config = &self.ctx.config;
        loop {
            sleep(config.progress_tick).await;

            let mut advanced = None;
            self.snapshot.send_if_modified(|snap| {
                if snap.state.is_settled() {
                    return false;
                }
                let next = snap.progress.advanced(config);
                if next == snap.progress {
                    return false;
                }
                snap.progress = next;
                advanced = Some(next);
                true
            });

            if let Some(progress) = advanced {
                self.ctx.publish(GenerationEvent::Progress {
                    instance_id: self.id,
                    project_id: self.project_id,
                    phase: progress.phase,
                    percent: progress.percent(),
                    eta_seconds: progress.eta_seconds,
                });
            }
        }
    }

    // ========================================================================
    // Terminal Handling
    // ========================================================================

    async fn finish(&self, result: Result<JobResult, GenerationError>, token: &CancellationToken) {
        let _gate = self.gate.lock().await;
        if token.is_cancelled() {
            debug!("Generation {} finished after cancellation; discarding", self.id);
            return;
        }

        let (state, outcome) = match result {
            Ok(job) => match self.record_ready(&job).await {
                Ok(()) => (
                    InstanceState::Completed,
                    TerminalOutcome::Ready {
                        video_url: job.video_url,
                        thumbnail_url: job.thumbnail_url,
                        duration_secs: job.duration_secs,
                    },
                ),
                Err(e) => (InstanceState::Failed, self.record_failure(e).await),
            },
            Err(e) => (InstanceState::Failed, self.record_failure(e).await),
        };

        let terminal = outcome.clone();
        self.snapshot.send_modify(|snap| {
            snap.state = state;
            snap.outcome = Some(terminal);
            if state == InstanceState::Completed {
                snap.progress = GenerationProgress::completed();
            }
        });

        if let Some(token) = self.run.lock().await.take() {
            token.cancel();
        }

        self.publish_state(state);
        self.ctx.publish(GenerationEvent::Terminal {
            instance_id: self.id,
            project_id: self.project_id,
            attempt: self.snapshot.borrow().attempt,
            outcome,
        });
    }

    async fn record_ready(&self, job: &JobResult) -> Result<(), GenerationError> {
        let update = ProjectUpdate {
            status: Some(ProjectStatus::Ready),
            video_url: Some(job.video_url.clone()),
            thumbnail_url: job.thumbnail_url.clone(),
            remote_task_id: self.remote_task_id(),
            duration_secs: job.duration_secs,
        };
        if self.ctx.projects.apply_update(self.project_id, update).await?.is_none() {
            debug!("Project {} was deleted before its video finished", self.project_id);
        }

        // A stale record only causes one extra status check after a restart
        if let Err(e) = self.ctx.registry.remove(self.project_id).await {
            warn!("Failed to remove job record for project {}: {}", self.project_id, e);
        }

        info!(
            "Generation {} for project {} complete: {}",
            self.id, self.project_id, job.video_url
        );
        Ok(())
    }

    /// Apply the failure's effect on the project and job record
    async fn record_failure(&self, error: GenerationError) -> TerminalOutcome {
        let fail_project = match &error {
            GenerationError::Submission(_)
            | GenerationError::TaskFailed(_)
            | GenerationError::TimedOut(_) => true,
            GenerationError::Storage(_) => self.remote_task_id().is_none(),
            _ => false,
        };

        if fail_project {
            if let Err(e) = self
                .ctx
                .projects
                .apply_update(self.project_id, ProjectUpdate::status(ProjectStatus::Failed))
                .await
            {
                warn!("Failed to mark project {} as failed: {}", self.project_id, e);
            }
        }

        if error.ends_remote_task() {
            if let Err(e) = self.ctx.registry.remove(self.project_id).await {
                warn!("Failed to remove job record for project {}: {}", self.project_id, e);
            }
        }

        warn!(
            "Generation {} for project {} failed: {}",
            self.id, self.project_id, error
        );

        TerminalOutcome::Failed {
            kind: error.kind(),
            message: error.user_message(),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn set_state(&self, state: InstanceState) {
        self.snapshot.send_modify(|snap| snap.state = state);
        self.publish_state(state);
    }

    fn publish_state(&self, state: InstanceState) {
        self.ctx.publish(GenerationEvent::StateChanged {
            instance_id: self.id,
            project_id: self.project_id,
            state,
        });
    }
}
