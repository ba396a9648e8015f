//! ============================================================================
//! Core Types for Narrio
//! ============================================================================
//! Defines the generation request bundle, the user-visible project record and
//! the durable job record. Everything here is serialized to JSON, both for
//! local storage and for handing state to a frontend.
//! ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// Words per minute used to estimate spoken duration of a script
pub const WORDS_PER_MINUTE: f64 = 150.0;

/// Title given to projects created without an explicit one
pub const DEFAULT_PROJECT_TITLE: &str = "New Video";

// ============================================================================
// Generation Request
// ============================================================================

/// Output frame size sent to the rendering backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDimensions {
    pub width: u32,
    pub height: u32,
}

impl VideoDimensions {
    pub const LANDSCAPE: Self = Self { width: 1920, height: 1080 };
    pub const PORTRAIT: Self = Self { width: 1080, height: 1920 };
    pub const SQUARE: Self = Self { width: 1080, height: 1080 };

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "landscape" => Some(Self::LANDSCAPE),
            "portrait" => Some(Self::PORTRAIT),
            "square" => Some(Self::SQUARE),
            _ => None,
        }
    }
}

impl Default for VideoDimensions {
    fn default() -> Self {
        Self::LANDSCAPE
    }
}

/// Where the avatar for a video comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AvatarSource {
    /// Stock avatar known to the backend by id
    Preset { avatar_id: String },
    /// User-supplied photo uploaded with the job
    Custom { image: Vec<u8>, image_name: String },
}

/// Avatar selected for a generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvatarRef {
    pub name: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    pub source: AvatarSource,
}

impl AvatarRef {
    pub fn preset(name: impl Into<String>, avatar_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            thumbnail_url: None,
            source: AvatarSource::Preset {
                avatar_id: avatar_id.into(),
            },
        }
    }

    pub fn custom(name: impl Into<String>, image: Vec<u8>, image_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            thumbnail_url: None,
            source: AvatarSource::Custom {
                image,
                image_name: image_name.into(),
            },
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self.source, AvatarSource::Custom { .. })
    }
}

/// Synthetic voice selected for a generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceRef {
    pub voice_id: String,
    pub name: String,
    /// BCP-47 style locale, e.g. "en-US"
    #[serde(default)]
    pub locale: Option<String>,
}

/// Background behind the avatar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundRef {
    pub name: String,
    /// Solid color as "#RRGGBB"
    #[serde(default)]
    pub color_hex: Option<String>,
}

/// Immutable input bundle for one video generation.
/// Built once the user confirms; owned by the instance that consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub project_id: Uuid,
    pub title: String,
    pub script: String,
    pub avatar: AvatarRef,
    pub voice: VoiceRef,
    #[serde(default)]
    pub background: Option<BackgroundRef>,
    /// Human-readable language name shown on the project
    pub language: String,
    #[serde(default)]
    pub dimensions: VideoDimensions,
}

impl GenerationRequest {
    /// Create a request for a fresh project with default title and landscape output
    pub fn new(script: impl Into<String>, avatar: AvatarRef, voice: VoiceRef) -> Self {
        let language = voice.locale.clone().unwrap_or_else(|| "en-US".to_string());
        Self {
            project_id: Uuid::new_v4(),
            title: DEFAULT_PROJECT_TITLE.to_string(),
            script: script.into(),
            avatar,
            voice,
            background: None,
            language,
            dimensions: VideoDimensions::default(),
        }
    }

    pub fn with_background(mut self, background: BackgroundRef) -> Self {
        self.background = Some(background);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_project_id(mut self, project_id: Uuid) -> Self {
        self.project_id = project_id;
        self
    }

    pub fn with_dimensions(mut self, dimensions: VideoDimensions) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Estimated spoken length of the script in seconds
    pub fn estimated_duration(&self) -> f64 {
        let words = self.script.split_whitespace().count() as f64;
        words / WORDS_PER_MINUTE * 60.0
    }

    pub fn background_color(&self) -> Option<&str> {
        self.background.as_ref().and_then(|b| b.color_hex.as_deref())
    }

    /// Reject requests the backend would refuse anyway
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.script.trim().is_empty() {
            return Err(ApiError::InvalidInput("Script is empty".into()));
        }
        if self.voice.voice_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("Please select a voice".into()));
        }
        match &self.avatar.source {
            AvatarSource::Preset { avatar_id } if avatar_id.trim().is_empty() => {
                Err(ApiError::InvalidInput("Avatar does not have a preset id".into()))
            }
            AvatarSource::Custom { image, .. } if image.is_empty() => {
                Err(ApiError::InvalidInput("Avatar image is empty".into()))
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Projects
// ============================================================================

/// Lifecycle status of a user-visible project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectStatus {
    NotStarted,
    InProgress,
    Ready,
    Failed,
    Planned,
}

impl ProjectStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "not-started" | "not_started" | "notstarted" => Some(Self::NotStarted),
            "in-progress" | "in_progress" | "inprogress" => Some(Self::InProgress),
            "ready" => Some(Self::Ready),
            "failed" => Some(Self::Failed),
            "planned" => Some(Self::Planned),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::InProgress => "in-progress",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Planned => "planned",
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A video project as shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub title: String,
    pub thumbnail_url: String,
    pub status: ProjectStatus,
    /// Duration in seconds (estimated until the render reports it)
    pub duration_secs: f64,
    pub created_at: DateTime<Utc>,
    pub language: String,
    pub avatar_name: String,
    pub voice_name: String,
    pub script: String,
    #[serde(default)]
    pub remote_task_id: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
}

impl Project {
    /// New in-progress project built from a generation request
    pub fn from_request(request: &GenerationRequest) -> Self {
        Self {
            id: request.project_id,
            title: request.title.clone(),
            thumbnail_url: request.avatar.thumbnail_url.clone().unwrap_or_default(),
            status: ProjectStatus::InProgress,
            duration_secs: request.estimated_duration(),
            created_at: Utc::now(),
            language: request.language.clone(),
            avatar_name: request.avatar.name.clone(),
            voice_name: request.voice.name.clone(),
            script: request.script.clone(),
            remote_task_id: None,
            video_url: None,
        }
    }

    /// "m:ss" rendering of the duration
    pub fn formatted_duration(&self) -> String {
        let total = self.duration_secs.max(0.0) as u64;
        format!("{}:{:02}", total / 60, total % 60)
    }
}

/// Partial update applied to a project; `None` fields keep their value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectUpdate {
    pub status: Option<ProjectStatus>,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub remote_task_id: Option<String>,
    pub duration_secs: Option<f64>,
}

impl ProjectUpdate {
    pub fn status(status: ProjectStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

// ============================================================================
// Durable Job Record
// ============================================================================

/// Persisted link between a project and its in-flight remote task.
/// Lets a restarted process resume polling instead of resubmitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub project_id: Uuid,
    pub remote_task_id: String,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(project_id: Uuid, remote_task_id: impl Into<String>) -> Self {
        Self {
            project_id,
            remote_task_id: remote_task_id.into(),
            created_at: Utc::now(),
        }
    }
}
