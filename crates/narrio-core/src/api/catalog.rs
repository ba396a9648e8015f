//! Stock avatar and voice catalogs.
//!
//! Both catalogs are produced by a backend task; the task result wraps the
//! list as `{"answer": {"status": ..., "result": [...]}}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ApiError;

/// Stock avatar usable with `--avatar-id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvatarPreset {
    pub avatar_id: String,
    pub avatar_name: String,
    #[serde(default)]
    pub gender: Option<String>,
    /// Sent as 0/1 or as a boolean depending on the backend version
    #[serde(default, deserialize_with = "flag")]
    pub premium: bool,
    #[serde(default)]
    pub preview_image_url: Option<String>,
    #[serde(default)]
    pub preview_video_url: Option<String>,
}

/// Synthetic voice usable with `--voice-id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoicePreset {
    pub voice_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub preview_audio: Option<String>,
    #[serde(default)]
    pub support_pause: Option<bool>,
    #[serde(default)]
    pub emotion: Option<bool>,
}

impl VoicePreset {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.voice_id)
    }
}

#[derive(Debug, Deserialize)]
struct TaskAnswer<T> {
    answer: AnswerBody<T>,
}

#[derive(Debug, Deserialize)]
struct AnswerBody<T> {
    result: T,
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_i64().map(|n| n != 0).unwrap_or(false),
        _ => false,
    })
}

fn decode_answer<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    let wrapper: TaskAnswer<T> =
        serde_json::from_slice(bytes).map_err(|e| ApiError::Decode(e.to_string()))?;
    Ok(wrapper.answer.result)
}

pub fn decode_avatar_presets(bytes: &[u8]) -> Result<Vec<AvatarPreset>, ApiError> {
    decode_answer(bytes)
}

pub fn decode_voices(bytes: &[u8]) -> Result<Vec<VoicePreset>, ApiError> {
    decode_answer(bytes)
}
