/// Result alias that carries the custom [`CinesonicError`] type.
pub type Result<T> = std::result::Result<T, CinesonicError>;

/// Common error type for the core crate.
///
/// Runtime conditions such as a missing GPU, a rejected shader or memory
/// pressure are never reported through this type; they turn into state
/// changes. Errors here mean a caller broke the API contract or a host
/// collaborator failed outright.
#[derive(Debug, thiserror::Error)]
pub enum CinesonicError {
    /// Free-form message for failures that have no dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration or export (de)serialisation failed.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Input rejected before any processing happened.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// A scene was used after `dispose()`.
    #[error("scene `{0}` has been disposed")]
    SceneDisposed(String),
    /// The engine was used before a successful `initialize()` or after `dispose()`.
    #[error("render engine is not initialized")]
    EngineNotInitialized,
    /// World identifier did not match any known world.
    #[error("unknown world `{0}`")]
    UnknownWorld(String),
    /// The render backend reported a failure.
    #[error("render backend: {0}")]
    Backend(String),
}

impl CinesonicError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn backend<T: Into<String>>(msg: T) -> Self {
        Self::Backend(msg.into())
    }
}

impl From<&str> for CinesonicError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for CinesonicError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<realfft::FftError> for CinesonicError {
    fn from(value: realfft::FftError) -> Self {
        Self::Message(format!("fft failure: {value}"))
    }
}
