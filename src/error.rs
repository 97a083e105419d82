//! Error handling for the Redfire IVR engine

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Channel gone")]
    ChannelGone,

    #[error("Callback '{handle}' failed: {message}")]
    Callback { handle: String, message: String },

    #[error("Menu not found: {0}")]
    MenuNotFound(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse(msg.into())
    }

    pub fn invalid_pattern<S: Into<String>>(msg: S) -> Self {
        Self::InvalidPattern(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn callback<H: Into<String>, S: Into<String>>(handle: H, msg: S) -> Self {
        Self::Callback {
            handle: handle.into(),
            message: msg.into(),
        }
    }

    pub fn menu_not_found<S: Into<String>>(name: S) -> Self {
        Self::MenuNotFound(name.into())
    }

    pub fn unknown_action<S: Into<String>>(name: S) -> Self {
        Self::UnknownAction(name.into())
    }

    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn capacity_exceeded<S: Into<String>>(msg: S) -> Self {
        Self::CapacityExceeded(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// True when the error means the call leg disappeared underneath us.
    pub fn is_channel_gone(&self) -> bool {
        matches!(self, Self::ChannelGone)
    }
}
