//! ============================================================================
//! HTTP Job Client - Avatar video generation via the Narrio REST backend
//! ============================================================================
//! - Submit jobs as multipart forms (preset avatar or uploaded photo)
//! - Query task status and download task results
//! - Fetch the stock avatar and voice catalogs
//! - Map HTTP and decode failures onto `ApiError`
//! ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use super::catalog::{decode_avatar_presets, decode_voices, AvatarPreset, VoicePreset};
use super::poll::wait_for_task;
use super::{ImageJobRequest, JobResult, JobStatusResponse, PresetJobRequest, RemoteJobApi};
use crate::config::{ApiConfig, PollSchedule};
use crate::error::ApiError;
use crate::types::VideoDimensions;

/// Preset-avatar job creation endpoint
const CREATE_FROM_PRESETS: &str = "/heygen/create_from_presets";

/// Uploaded-photo job creation endpoint
const CREATE_FROM_IMAGES: &str = "/heygen/create_from_images";

/// Stock avatar catalog task
const ALL_AVATARS: &str = "/heygen/all_avatars";

/// Voice catalog task
const ALL_VOICES: &str = "/heygen/all_voices";

/// Prompt-to-avatar generation task
const AVATAR_CREATE: &str = "/avatar/create";

/// Task status endpoint (+ task id)
const TASK_STATUS: &str = "/task/status/";

/// Task result endpoint (+ task id)
const TASK_RESULT: &str = "/task/result/";

/// Fixed voice parameters the app always sends
const DEFAULT_SPEED: &str = "1.0";
const DEFAULT_PITCH: &str = "0";
const DEFAULT_EMOTION: &str = "Friendly";

/// REST implementation of `RemoteJobApi`
pub struct HttpJobApi {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpJobApi {
    /// Create a client with the configured per-request timeouts
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to build HTTP client: {}", e)))?;

        info!("HTTP job client ready | base_url = {}", config.base_url);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn get(&self, endpoint: &str) -> reqwest::RequestBuilder {
        self.authorized(self.client.get(self.url(endpoint)))
    }

    fn post(&self, endpoint: &str) -> reqwest::RequestBuilder {
        self.authorized(self.client.post(self.url(endpoint)))
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header("Accept", "application/json");
        match &self.api_key {
            Some(key) => builder.header("X-Api-Key", key),
            None => builder,
        }
    }

    /// Returns true when the backend reports itself as running
    pub async fn check_server_status(&self) -> Result<bool, ApiError> {
        let response = self.get("/status").send().await?;
        let response = check_response(response).await?;
        let body: ServerStatusResponse = response.json().await?;
        debug!("Server status = {}", body.status);
        Ok(body.status == "running")
    }

    /// Start a backend task from a prompt; returns its task id.
    /// Follow it with `get_job_status` like any other task.
    pub async fn create_avatar_from_prompt(
        &self,
        prompt: &str,
        go_fast: bool,
    ) -> Result<String, ApiError> {
        if prompt.trim().is_empty() {
            return Err(ApiError::InvalidInput("Avatar prompt is empty".into()));
        }

        let form = Form::new()
            .text("prompt", prompt.to_string())
            .text("go_fast", if go_fast { "true" } else { "false" });
        self.submit(AVATAR_CREATE, form).await
    }

    /// Fetch the stock avatar catalog (runs as a backend task)
    pub async fn list_avatar_presets(
        &self,
        schedule: &PollSchedule,
        limit: Duration,
    ) -> Result<Vec<AvatarPreset>, ApiError> {
        let task_id = self.start_task(ALL_AVATARS).await?;
        wait_for_task(self, &task_id, schedule, limit).await?;

        let avatars = decode_avatar_presets(&self.result_bytes(&task_id).await?)?;
        info!("Fetched {} avatar presets", avatars.len());
        Ok(avatars)
    }

    /// Fetch the voice catalog (runs as a backend task)
    pub async fn list_voices(
        &self,
        schedule: &PollSchedule,
        limit: Duration,
    ) -> Result<Vec<VoicePreset>, ApiError> {
        let task_id = self.start_task(ALL_VOICES).await?;
        wait_for_task(self, &task_id, schedule, limit).await?;

        let voices = decode_voices(&self.result_bytes(&task_id).await?)?;
        info!("Fetched {} voices", voices.len());
        Ok(voices)
    }

    async fn submit(&self, endpoint: &str, form: Form) -> Result<String, ApiError> {
        let response = self.post(endpoint).multipart(form).send().await?;
        self.accepted_task(endpoint, response).await
    }

    /// Start a task that takes no parameters
    async fn start_task(&self, endpoint: &str) -> Result<String, ApiError> {
        let response = self.post(endpoint).send().await?;
        self.accepted_task(endpoint, response).await
    }

    async fn accepted_task(&self, endpoint: &str, response: Response) -> Result<String, ApiError> {
        let response = check_response(response).await?;
        let body: TaskResponse = response.json().await?;

        if body.task_id.is_empty() {
            return Err(ApiError::Decode("No task_id in task creation response".into()));
        }

        info!("Task submitted via {} | task_id = {}", endpoint, body.task_id);
        Ok(body.task_id)
    }

    async fn result_bytes(&self, task_id: &str) -> Result<Vec<u8>, ApiError> {
        let response = self
            .get(&format!("{}{}", TASK_RESULT, task_id))
            .send()
            .await?;
        let response = check_response(response).await?;
        let bytes = response.bytes().await?;

        debug!("Task {} result bytes = {}", task_id, bytes.len());
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl RemoteJobApi for HttpJobApi {
    async fn create_job_from_preset(&self, request: &PresetJobRequest) -> Result<String, ApiError> {
        let mut form = Form::new().text("avatar_id", request.avatar_id.clone());
        for (key, value) in form_fields(
            &request.voice_id,
            &request.script,
            request.locale.as_deref(),
            request.background_color.as_deref(),
            request.dimensions,
        ) {
            form = form.text(key, value);
        }

        self.submit(CREATE_FROM_PRESETS, form).await
    }

    async fn create_job_from_image(&self, request: &ImageJobRequest) -> Result<String, ApiError> {
        let mut form = Form::new();
        for (key, value) in form_fields(
            &request.voice_id,
            &request.script,
            request.locale.as_deref(),
            request.background_color.as_deref(),
            request.dimensions,
        ) {
            form = form.text(key, value);
        }

        debug!(
            "Avatar image = {}, {} bytes",
            request.image_name,
            request.image.len()
        );

        let part = Part::bytes(request.image.clone())
            .file_name(request.image_name.clone())
            .mime_str(mime_type_for(&request.image_name))
            .map_err(|e| ApiError::InvalidInput(format!("Bad avatar image type: {}", e)))?;
        form = form.part("avatar_image", part);

        self.submit(CREATE_FROM_IMAGES, form).await
    }

    async fn get_job_status(&self, task_id: &str) -> Result<JobStatusResponse, ApiError> {
        let response = self
            .get(&format!("{}{}", TASK_STATUS, task_id))
            .send()
            .await?;
        let response = check_response(response).await?;
        let status: JobStatusResponse = response.json().await?;

        debug!("Task {} status = {}", task_id, status.status);
        Ok(status)
    }

    async fn get_job_result(&self, task_id: &str) -> Result<JobResult, ApiError> {
        decode_result(&self.result_bytes(task_id).await?)
    }
}

/// Turn non-success HTTP statuses into typed errors
async fn check_response(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(error_for_status(status, body))
}

fn error_for_status(status: StatusCode, body: String) -> ApiError {
    let message = if body.trim().is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        body
    };

    match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ApiError::InvalidInput(message),
        _ => ApiError::Server(message),
    }
}

/// Text fields shared by both job creation endpoints
fn form_fields(
    voice_id: &str,
    script: &str,
    locale: Option<&str>,
    background_color: Option<&str>,
    dimensions: VideoDimensions,
) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("width", dimensions.width.to_string()),
        ("height", dimensions.height.to_string()),
        ("voice_id", voice_id.to_string()),
        ("input_text", script.to_string()),
        ("speed", DEFAULT_SPEED.to_string()),
        ("pitch", DEFAULT_PITCH.to_string()),
        ("emotion", DEFAULT_EMOTION.to_string()),
    ];
    if let Some(locale) = locale {
        fields.push(("locale", locale.to_string()));
    }
    if let Some(color) = background_color {
        fields.push(("background_color", color.to_string()));
    }
    fields
}

/// Decode the result document of a completed task.
/// A completed task without a video URL is an error, never a success.
fn decode_result(bytes: &[u8]) -> Result<JobResult, ApiError> {
    let parsed: TaskResultResponse =
        serde_json::from_slice(bytes).map_err(|e| ApiError::Decode(e.to_string()))?;
    let data = parsed.result.data;

    if data.video_url.trim().is_empty() {
        return Err(ApiError::Decode("Task result has no video URL".into()));
    }

    Ok(JobResult {
        video_url: data.video_url,
        thumbnail_url: data.thumbnail_url.filter(|u| !u.is_empty()),
        duration_secs: data.duration,
    })
}

/// MIME type from a file name's extension
pub fn mime_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// Backend Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ServerStatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskResultResponse {
    result: ResultContainer,
}

#[derive(Debug, Deserialize)]
struct ResultContainer {
    data: VideoResultData,
}

#[derive(Debug, Deserialize)]
struct VideoResultData {
    video_url: String,
    #[serde(default)]
    thumbnail_url: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}
