//! Requirement installer - runs an external package manager for a module's
//! third-party requirements

use async_trait::async_trait;
use tokio::process::Command;
use crate::application::errors::BotError;
use crate::domain::traits::RequirementInstaller;

/// Runs `<program> <args>... <requirement>...`, e.g. `pip install httpx`
pub struct CommandInstaller {
    program: String,
    args: Vec<String>,
}

impl CommandInstaller {
    /// Build from a whitespace-separated command line
    pub fn from_command_line(command: &str) -> Result<Self, BotError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| BotError::Internal("Empty requirement installer command".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl RequirementInstaller for CommandInstaller {
    async fn install(&self, requirements: &[String]) -> Result<(), BotError> {
        if requirements.is_empty() {
            return Ok(());
        }
        tracing::info!("Running {} {:?} for {:?}", self.program, self.args, requirements);

        let output = Command::new(&self.program)
            .args(&self.args)
            .args(requirements)
            .output()
            .await
            .map_err(|e| BotError::Internal(format!("Failed to run {}: {}", self.program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            tracing::info!("{}", stdout.trim());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            tracing::error!("{}", stderr.trim());
        }

        if !output.status.success() {
            return Err(BotError::Internal(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }
        Ok(())
    }
}
