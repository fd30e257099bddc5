//! Application state.

use std::sync::Arc;

use talkhead_ml_client::{MlClient, MlClientConfig, MlResult};
use talkhead_pipeline::{AvatarService, Collaborators, PipelineConfig};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub service: Arc<AvatarService>,
    /// Model sidecar, when the engine runs out of process
    pub sidecar: Option<MlClient>,
}

impl AppState {
    /// Connect to the model sidecar and build the avatar service on it.
    pub async fn connect(config: ApiConfig, pipeline: PipelineConfig, ml: &MlClientConfig) -> MlResult<Self> {
        let client = MlClient::connect(ml).await?;
        let shared = Arc::new(client.clone());
        let service = AvatarService::new(pipeline, Collaborators::new(shared.clone(), shared));

        Ok(Self {
            config,
            service: Arc::new(service),
            sidecar: Some(client),
        })
    }

    /// State over an already constructed service.
    pub fn with_service(config: ApiConfig, service: Arc<AvatarService>) -> Self {
        Self {
            config,
            service,
            sidecar: None,
        }
    }

    /// Whether the inference models are loaded and reachable.
    pub async fn models_ready(&self) -> bool {
        match &self.sidecar {
            Some(client) => client.health().await.map(|h| h.is_ready()).unwrap_or(false),
            None => true,
        }
    }
}
