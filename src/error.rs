use std::time::Duration;

use async_openai::error::OpenAIError;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("provider request failed: {0}")]
    Provider(#[from] OpenAIError),

    #[error("no answer within {0:?}")]
    Timeout(Duration),

    #[error("provider returned empty text")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("membership request failed: {0}")]
    Transport(#[from] teloxide::RequestError),

    #[error("bad channel id {0:?}")]
    InvalidChannel(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),

    #[error("store json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}
