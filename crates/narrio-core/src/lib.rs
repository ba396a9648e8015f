//! ============================================================================
//! NARRIO-CORE: Avatar video generation lifecycle
//! ============================================================================
//! This crate handles all backend logic for Narrio:
//! - Remote job API client (submit, poll, fetch result) via reqwest
//! - Generation instances with optimistic progress and cancellation
//! - Durable job registry so in-flight renders survive restarts
//! - Project store on an embedded redb database
//! ============================================================================

pub mod api;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod generation;
pub mod types;

// Re-export main types for convenience
pub use api::{HttpJobApi, RemoteJobApi};
pub use config::{AppConfig, GenerationConfig};
pub use context::AppContext;
pub use error::{ApiError, FailureKind, GenerationError};
pub use generation::{
    GenerationEvent, GenerationInstance, GenerationManager, GenerationPhase, GenerationProgress,
    GenerationSnapshot, InstanceState, TerminalOutcome,
};
pub use types::*;
