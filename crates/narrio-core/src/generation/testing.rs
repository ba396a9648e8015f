//! Scripted remote API and fixtures for generation tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::api::{
    ImageJobRequest, JobResult, JobStatus, JobStatusResponse, PresetJobRequest, RemoteJobApi,
};
use crate::config::GenerationConfig;
use crate::context::AppContext;
use crate::db::{KeyValueStore, MemoryStore};
use crate::error::ApiError;
use crate::types::{AvatarRef, GenerationRequest, VoiceRef};

type StatusScript = VecDeque<Result<JobStatusResponse, ApiError>>;

#[derive(Default)]
struct ScriptState {
    next_task: u32,
    /// Scripts handed to newly created tasks, in order
    queued: VecDeque<StatusScript>,
    statuses: HashMap<String, StatusScript>,
    results: HashMap<String, Result<JobResult, ApiError>>,
    create_errors: VecDeque<ApiError>,
    preset_calls: Vec<PresetJobRequest>,
    image_calls: Vec<ImageJobRequest>,
    status_calls: HashMap<String, usize>,
    /// How long the backend takes to accept a job
    create_delay: Duration,
}

/// Backend double. Tasks are named `task-1`, `task-2`, ...
/// A task whose script has run out stays pending.
#[derive(Default)]
pub struct ScriptedApi {
    state: Mutex<ScriptState>,
}

impl ScriptedApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Status responses for the next task to be created
    pub fn script_next_job(&self, script: Vec<Result<JobStatusResponse, ApiError>>) {
        self.state.lock().unwrap().queued.push_back(script.into());
    }

    /// Status responses for an already known task
    pub fn script_task(&self, task_id: &str, script: Vec<Result<JobStatusResponse, ApiError>>) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(task_id.to_string(), script.into());
    }

    pub fn set_result(&self, task_id: &str, result: Result<JobResult, ApiError>) {
        self.state
            .lock()
            .unwrap()
            .results
            .insert(task_id.to_string(), result);
    }

    pub fn delay_creates(&self, delay: Duration) {
        self.state.lock().unwrap().create_delay = delay;
    }

    pub fn fail_next_create(&self, error: ApiError) {
        self.state.lock().unwrap().create_errors.push_back(error);
    }

    pub fn create_calls(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.preset_calls.len() + state.image_calls.len()
    }

    pub fn preset_calls(&self) -> Vec<PresetJobRequest> {
        self.state.lock().unwrap().preset_calls.clone()
    }

    pub fn image_calls(&self) -> Vec<ImageJobRequest> {
        self.state.lock().unwrap().image_calls.clone()
    }

    pub fn status_calls(&self, task_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .status_calls
            .get(task_id)
            .copied()
            .unwrap_or(0)
    }

    async fn accept_delay(&self) {
        let delay = self.state.lock().unwrap().create_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn create_task(state: &mut ScriptState) -> Result<String, ApiError> {
        if let Some(error) = state.create_errors.pop_front() {
            return Err(error);
        }
        state.next_task += 1;
        let task_id = format!("task-{}", state.next_task);
        let script = state.queued.pop_front().unwrap_or_default();
        state.statuses.insert(task_id.clone(), script);
        Ok(task_id)
    }
}

#[async_trait]
impl RemoteJobApi for ScriptedApi {
    async fn create_job_from_preset(&self, request: &PresetJobRequest) -> Result<String, ApiError> {
        self.state.lock().unwrap().preset_calls.push(request.clone());
        self.accept_delay().await;
        Self::create_task(&mut self.state.lock().unwrap())
    }

    async fn create_job_from_image(&self, request: &ImageJobRequest) -> Result<String, ApiError> {
        self.state.lock().unwrap().image_calls.push(request.clone());
        self.accept_delay().await;
        Self::create_task(&mut self.state.lock().unwrap())
    }

    async fn get_job_status(&self, task_id: &str) -> Result<JobStatusResponse, ApiError> {
        let mut state = self.state.lock().unwrap();
        *state.status_calls.entry(task_id.to_string()).or_default() += 1;
        state
            .statuses
            .get_mut(task_id)
            .and_then(|script| script.pop_front())
            .unwrap_or_else(|| Ok(JobStatusResponse::new(JobStatus::Pending)))
    }

    async fn get_job_result(&self, task_id: &str) -> Result<JobResult, ApiError> {
        let state = self.state.lock().unwrap();
        state.results.get(task_id).cloned().unwrap_or_else(|| {
            Ok(JobResult {
                video_url: format!("https://cdn.test/{}.mp4", task_id),
                thumbnail_url: Some(format!("https://cdn.test/{}.jpg", task_id)),
                duration_secs: Some(12.0),
            })
        })
    }
}

/// Memory store whose writes to one key can be made to fail
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    failing_key: Mutex<Option<String>>,
}

impl FailingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_saves_of(&self, key: &str) {
        *self.failing_key.lock().unwrap() = Some(key.to_string());
    }

    pub fn heal(&self) {
        *self.failing_key.lock().unwrap() = None;
    }
}

impl KeyValueStore for FailingStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.load(key)
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<()> {
        if self.failing_key.lock().unwrap().as_deref() == Some(key) {
            return Err(anyhow!("Disk full while saving '{}'", key));
        }
        self.inner.save(key, value)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        self.inner.remove(key)
    }
}

pub fn preset_request() -> GenerationRequest {
    GenerationRequest::new(
        "Hello world",
        AvatarRef::preset("Anna", "A1"),
        VoiceRef {
            voice_id: "V1".into(),
            name: "Emma".into(),
            locale: Some("en-US".into()),
        },
    )
}

pub fn setup() -> (AppContext, Arc<ScriptedApi>) {
    setup_with_config(GenerationConfig::default())
}

pub fn setup_with_config(config: GenerationConfig) -> (AppContext, Arc<ScriptedApi>) {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    context_with_store(store, config)
}

pub fn context_with_store(
    store: Arc<dyn KeyValueStore>,
    config: GenerationConfig,
) -> (AppContext, Arc<ScriptedApi>) {
    let api = ScriptedApi::new();
    let ctx = AppContext::new(api.clone(), store, config);
    (ctx, api)
}
