//! ============================================================================
//! Optimistic Progress - Smoothed progress estimate for a running render
//! ============================================================================
//! The backend exposes no granular progress, so the displayed value is a
//! decelerating curve over time. It only ever moves forward and stays below
//! 100% until the job actually completes. It says nothing about real work.
//! ============================================================================

use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;

/// Coarse phase shown next to the progress bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationPhase {
    Analyzing,
    PreparingAvatar,
    SynthesizingVoice,
    Rendering,
    Finalizing,
}

impl GenerationPhase {
    /// Phase for a progress fraction
    pub fn for_fraction(fraction: f64) -> Self {
        match fraction {
            f if f < 0.15 => GenerationPhase::Analyzing,
            f if f < 0.35 => GenerationPhase::PreparingAvatar,
            f if f < 0.55 => GenerationPhase::SynthesizingVoice,
            f if f < 0.85 => GenerationPhase::Rendering,
            _ => GenerationPhase::Finalizing,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            GenerationPhase::Analyzing => "Analyzing script",
            GenerationPhase::PreparingAvatar => "Preparing avatar",
            GenerationPhase::SynthesizingVoice => "Synthesizing voice",
            GenerationPhase::Rendering => "Rendering video",
            GenerationPhase::Finalizing => "Finalizing...",
        }
    }

    /// 1-based step number
    pub fn step_number(&self) -> u8 {
        *self as u8 + 1
    }
}

/// Ephemeral progress of one generation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationProgress {
    pub fraction: f64,
    pub phase: GenerationPhase,
    pub eta_seconds: u32,
}

impl GenerationProgress {
    pub fn initial(config: &GenerationConfig) -> Self {
        Self::at(0.0, config)
    }

    pub fn completed() -> Self {
        Self {
            fraction: 1.0,
            phase: GenerationPhase::Finalizing,
            eta_seconds: 0,
        }
    }

    fn at(fraction: f64, config: &GenerationConfig) -> Self {
        let eta = ((1.0 - fraction) * config.estimated_total_secs as f64).max(0.0);
        Self {
            fraction,
            phase: GenerationPhase::for_fraction(fraction),
            eta_seconds: eta as u32,
        }
    }

    /// Whole percent; 100 only once the job has completed
    pub fn percent(&self) -> u8 {
        if self.fraction >= 1.0 {
            100
        } else {
            ((self.fraction * 100.0).floor() as u8).min(99)
        }
    }

    /// Progress after one ticker step.
    /// `fraction += max((ceiling - fraction) * gain, floor)` while below the ceiling.
    pub fn advanced(&self, config: &GenerationConfig) -> Self {
        if self.fraction >= config.progress_ceiling {
            return *self;
        }

        let step = ((config.progress_ceiling - self.fraction) * config.progress_gain)
            .max(config.progress_floor);
        let next = (self.fraction + step).min(config.progress_ceiling + config.progress_floor);
        Self::at(next, config)
    }
}
