use trellis_core::config::ConfigError;
use trellis_core::stack::DeclarationError;

#[derive(Debug, thiserror::Error)]
pub enum WebAppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    #[error("Invalid ingress rule: {0}")]
    InvalidRule(String),

    #[error("Cannot read artifact {path}: {message}")]
    ArtifactUnreadable { path: String, message: String },

    #[error("Invalid trust policy: {0}")]
    InvalidPolicy(String),

    #[error("Setting {namespace}/{name} is defined more than once")]
    DuplicateSetting { namespace: String, name: String },

    #[error("Missing required settings: {}", .0.join(", "))]
    MissingSettings(Vec<String>),
}
