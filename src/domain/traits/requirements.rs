use async_trait::async_trait;
use crate::application::errors::BotError;

/// Installs third-party packages listed in a module's requirements sidecar
#[async_trait]
pub trait RequirementInstaller: Send + Sync {
    async fn install(&self, requirements: &[String]) -> Result<(), BotError>;
}
