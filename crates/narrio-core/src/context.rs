//! ============================================================================
//! Application Context - Shared collaborators passed to every component
//! ============================================================================
//! Holds the remote API client, the project store, the job registry, the
//! generation tunables and the event bus. Cloning is cheap; every field is
//! reference counted.
//! ============================================================================

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::api::{HttpJobApi, RemoteJobApi};
use crate::config::{AppConfig, GenerationConfig};
use crate::db::{JobRegistry, KeyValueStore, ProjectStore, RedbStore};
use crate::generation::GenerationEvent;

/// Capacity of the generation event channel
const EVENT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct AppContext {
    pub api: Arc<dyn RemoteJobApi>,
    pub projects: Arc<ProjectStore>,
    pub registry: Arc<JobRegistry>,
    pub config: Arc<GenerationConfig>,
    events: broadcast::Sender<GenerationEvent>,
}

impl AppContext {
    pub fn new(
        api: Arc<dyn RemoteJobApi>,
        store: Arc<dyn KeyValueStore>,
        config: GenerationConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            api,
            projects: Arc::new(ProjectStore::new(store.clone())),
            registry: Arc::new(JobRegistry::new(store)),
            config: Arc::new(config),
            events,
        }
    }

    /// Wire up the HTTP client and the on-disk database from configuration
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api = HttpJobApi::new(&config.api)?;
        let store = RedbStore::open(config.db_path.as_deref())?;
        Ok(Self::new(
            Arc::new(api),
            Arc::new(store),
            config.generation.clone(),
        ))
    }

    /// Receive progress, state and terminal events of every generation
    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: GenerationEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
