//! Errors from change evaluation, aggregation and payload decoding.

pub type Result<T> = std::result::Result<T, ChangeError>;

#[derive(Debug, thiserror::Error)]
pub enum ChangeError {
    /// Run image digests could not be resolved. When both sides fail the
    /// messages are joined with `; `.
    #[error("{0}")]
    Stack(String),

    /// One or more changes failed to evaluate; messages joined with `; `.
    #[error("evaluating changes: {0}")]
    Evaluation(String),

    #[error("serializing change payload: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("decoding change payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("rendering change as yaml: {0}")]
    Render(#[from] serde_yaml::Error),

    #[error("invalid change summary")]
    InvalidSummary,
}
