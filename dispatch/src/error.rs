use std::fmt;

#[derive(Debug)]
pub enum DispatchError {
    /// No handler registered for the configured capability
    UnknownCapability(String),
    /// Handler failed, the message is still acknowledged
    Handler(anyhow::Error),
}

impl DispatchError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DispatchError::UnknownCapability(_))
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::UnknownCapability(name) => write!(f, "unsupported capability: {}", name),
            DispatchError::Handler(err) => write!(f, "handler failed: {:#}", err),
        }
    }
}

impl std::error::Error for DispatchError {}
