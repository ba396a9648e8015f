//! ============================================================================
//! Remote Job API - Contract with the video rendering backend
//! ============================================================================
//! The lifecycle code only talks to `RemoteJobApi`. `HttpJobApi` implements it
//! against the REST backend; tests substitute a scripted double.
//! ============================================================================

mod catalog;
mod client;
mod poll;

pub use catalog::{decode_avatar_presets, decode_voices, AvatarPreset, VoicePreset};
pub use client::{mime_type_for, HttpJobApi};
pub use poll::wait_for_task;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::types::VideoDimensions;

/// Job creation parameters for a stock avatar
#[derive(Debug, Clone, PartialEq)]
pub struct PresetJobRequest {
    pub avatar_id: String,
    pub voice_id: String,
    pub script: String,
    pub locale: Option<String>,
    pub background_color: Option<String>,
    pub dimensions: VideoDimensions,
}

/// Job creation parameters for an uploaded avatar photo
#[derive(Debug, Clone, PartialEq)]
pub struct ImageJobRequest {
    pub image: Vec<u8>,
    pub image_name: String,
    pub voice_id: String,
    pub script: String,
    pub locale: Option<String>,
    pub background_color: Option<String>,
    pub dimensions: VideoDimensions,
}

/// Coarse status of a remote task.
/// Values the client does not recognize decode as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Response of the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobStatusResponse {
    pub fn new(status: JobStatus) -> Self {
        Self { status, error: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            error: Some(message.into()),
        }
    }
}

/// Final payload of a completed task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub video_url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

/// Remote rendering backend
#[async_trait]
pub trait RemoteJobApi: Send + Sync {
    /// Submit a job for a stock avatar; returns the remote task id
    async fn create_job_from_preset(&self, request: &PresetJobRequest) -> Result<String, ApiError>;

    /// Submit a job for an uploaded photo; returns the remote task id
    async fn create_job_from_image(&self, request: &ImageJobRequest) -> Result<String, ApiError>;

    async fn get_job_status(&self, task_id: &str) -> Result<JobStatusResponse, ApiError>;

    async fn get_job_result(&self, task_id: &str) -> Result<JobResult, ApiError>;
}
