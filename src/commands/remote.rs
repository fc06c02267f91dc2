//! Commands answered by the Codeius backend.

use std::sync::Arc;

use crate::backend::Backend;
use crate::commands::{Arity, CommandContext, CommandDispatcher, CommandHandler, CommandSpec};
use crate::error::Result;
use crate::types::Message;

/// Registers `/models`, `/switch`, `/health` and `/clear_server`.
pub fn register_backend_commands(
    dispatcher: &mut CommandDispatcher,
    backend: Arc<Backend>,
) -> Result<()> {
    dispatcher.register(
        CommandSpec::new("models", "List all available AI models"),
        ModelsCommand {
            backend: backend.clone(),
        },
    )?;
    dispatcher.register(
        CommandSpec::new("switch", "Switch to a specific model")
            .with_args("<model_key>", Arity::exactly(1))
            .with_alias("model"),
        SwitchCommand {
            backend: backend.clone(),
        },
    )?;
    dispatcher.register(
        CommandSpec::new("health", "Check that the backend is reachable"),
        HealthCommand {
            backend: backend.clone(),
        },
    )?;
    dispatcher.register(
        CommandSpec::new("clear_server", "Drop the backend's conversation memory"),
        ClearServerCommand { backend },
    )?;
    Ok(())
}

/// `/models`
pub struct ModelsCommand {
    backend: Arc<Backend>,
}

#[async_trait::async_trait]
impl CommandHandler for ModelsCommand {
    async fn execute(&self, _: &[String], _: &mut CommandContext<'_>) -> Result<Vec<Message>> {
        let models = self.backend.models().await?;
        if models.is_empty() {
            return Ok(vec![Message::system("The backend offers no models.")]);
        }
        let mut text = String::from("Available models:");
        for (key, model) in models {
            text.push_str(&format!("\n  {key}  {} ({})", model.name, model.provider));
            if !model.description.is_empty() {
                text.push_str(&format!(" - {}", model.description));
            }
        }
        text.push_str("\nUse /switch <model_key> to change models.");
        Ok(vec![Message::system(text)])
    }
}

/// `/switch <model_key>`
pub struct SwitchCommand {
    backend: Arc<Backend>,
}

#[async_trait::async_trait]
impl CommandHandler for SwitchCommand {
    async fn execute(&self, args: &[String], _: &mut CommandContext<'_>) -> Result<Vec<Message>> {
        let result = self.backend.switch_model(&args[0]).await?;
        tracing::info!(model = %args[0], "switched model");
        Ok(vec![Message::system(result)])
    }
}

/// `/health`
pub struct HealthCommand {
    backend: Arc<Backend>,
}

#[async_trait::async_trait]
impl CommandHandler for HealthCommand {
    async fn execute(&self, _: &[String], _: &mut CommandContext<'_>) -> Result<Vec<Message>> {
        let health = self.backend.health().await?;
        let text = if health.message.is_empty() {
            format!("Backend at {}: {}", self.backend.base_url(), health.status)
        } else {
            format!(
                "Backend at {}: {} ({})",
                self.backend.base_url(),
                health.status,
                health.message
            )
        };
        Ok(vec![Message::system(text)])
    }
}

/// `/clear_server`
pub struct ClearServerCommand {
    backend: Arc<Backend>,
}

#[async_trait::async_trait]
impl CommandHandler for ClearServerCommand {
    async fn execute(&self, _: &[String], _: &mut CommandContext<'_>) -> Result<Vec<Message>> {
        let result = self.backend.clear_history().await?;
        Ok(vec![Message::system(result)])
    }
}
