use crate::transport::protocol::ProtocolError;

/// Errors surfaced to collaborators (UI controls, transport glue).
///
/// None of these ever come out of the frame path; they only reject a request
/// that would otherwise have been applied.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown shape '{0}'")]
    UnknownShape(String),
    #[error("unknown emotion '{0}'")]
    UnknownEmotion(String),
    #[error("unknown animation '{0}'")]
    UnknownAnimation(String),
    #[error("invalid weight {weight} for shape '{shape}'")]
    InvalidWeight { shape: String, weight: f32 },
    #[error("engine has been shut down")]
    ShutDown,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

// For UI glue that reports plain strings
impl From<EngineError> for String {
    fn from(e: EngineError) -> String {
        e.to_string()
    }
}
