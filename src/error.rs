use miette::{Diagnostic, Result};
use thiserror::Error;

/// Main error type for the application
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("Environment error: {0}")]
    #[diagnostic(code(aircon_scheduler::environment))]
    Environment(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(aircon_scheduler::config))]
    Config(String),

    #[error("Calendar error: {0}")]
    #[diagnostic(code(aircon_scheduler::calendar))]
    Calendar(String),

    #[error("Redis error: {0}")]
    #[diagnostic(code(aircon_scheduler::redis))]
    Redis(String),

    #[error("Publish error: {0}")]
    #[diagnostic(code(aircon_scheduler::publish))]
    Publish(String),

    #[error("Scheduler error: {0}")]
    #[diagnostic(code(aircon_scheduler::scheduler))]
    Scheduler(String),

    #[error("Component error: {0}")]
    #[diagnostic(code(aircon_scheduler::component))]
    Component(String),

    #[error(transparent)]
    #[diagnostic(code(aircon_scheduler::io))]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(aircon_scheduler::serialization))]
    Serialization(String),

    #[error("Other error: {0}")]
    #[diagnostic(code(aircon_scheduler::other))]
    Other(String),
}

// Implement From for TOML deserialization errors
impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Type alias for Result with our Error type
pub type AppResult<T> = Result<T, Error>;

/// Helper to create environment errors
pub fn env_error(var: &str) -> Error {
    Error::Environment(format!("Missing environment variable: {}", var))
}

/// Helper to create configuration errors
pub fn config_error(message: &str) -> Error {
    Error::Config(message.to_string())
}

/// Helper to create calendar errors
pub fn calendar_error(message: &str) -> Error {
    Error::Calendar(message.to_string())
}

/// Helper to create redis errors
pub fn redis_error(message: &str) -> Error {
    Error::Redis(message.to_string())
}

/// Helper to create publish errors
pub fn publish_error(message: &str) -> Error {
    Error::Publish(message.to_string())
}

/// Helper to create scheduler errors
pub fn scheduler_error(message: &str) -> Error {
    Error::Scheduler(message.to_string())
}

/// Helper to create component errors
pub fn component_error(message: &str) -> Error {
    Error::Component(message.to_string())
}
