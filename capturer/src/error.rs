use std::fmt;

#[derive(Debug)]
pub enum AppError {
    /// Codec other than H.264/H.265 on the first keyframe
    UnsupportedCodec(String),
    /// Missing or invalid setting
    Config(String),
    /// Malformed access unit, missing parameter sets
    Protocol(String),
    Internal(anyhow::Error),
}

impl AppError {
    pub fn unsupported_codec<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::UnsupportedCodec(t.to_string())
    }

    pub fn config<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::Config(t.to_string())
    }

    pub fn protocol<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::Protocol(t.to_string())
    }

    /// Fatal errors stop the agent, everything else is reported and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::UnsupportedCodec(_) | AppError::Config(_))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::UnsupportedCodec(codec) => write!(f, "unsupported codec: {}", codec),
            AppError::Config(err) => write!(f, "config error: {}", err),
            AppError::Protocol(err) => write!(f, "protocol error: {}", err),
            AppError::Internal(err) => write!(f, "{:#}", err),
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        AppError::Internal(err.into())
    }
}
