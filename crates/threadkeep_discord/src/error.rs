use miette::Diagnostic;
use thiserror::Error;
use threadkeep_core::CoreError;

#[derive(Error, Diagnostic, Debug)]
pub enum DiscordError {
    #[error("Discord API request failed")]
    #[diagnostic(
        code(threadkeep_discord::api_error),
        help("Check the bot token, its intents, and its permissions in the channel")
    )]
    Api(#[from] serenity::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] CoreError),

    #[error("Missing configuration: {field}")]
    #[diagnostic(code(threadkeep_discord::missing_config), help("{hint}"))]
    MissingConfig { field: String, hint: String },
}

pub type Result<T> = std::result::Result<T, DiscordError>;

impl DiscordError {
    pub fn missing_config(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingConfig {
            field: field.into(),
            hint: hint.into(),
        }
    }
}
