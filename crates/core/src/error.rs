//! Errors raised while compiling a build request into a pod.
//!
//! Every variant is terminal: the caller surfaces it on the build and waits
//! for the inputs to change. Nothing here is retried internally.

/// Result type alias for plan synthesis.
pub type Result<T> = std::result::Result<T, PlanError>;

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// No builder-advertised platform API intersects the supported set.
    /// Carries the builder's list verbatim, comma-joined.
    #[error("unsupported builder platform API versions: {0}")]
    UnsupportedPlatformApi(String),

    #[error("invalid image reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("invalid creation time '{value}': {source}")]
    InvalidCreationTime {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("unsupported binding type: {0}")]
    UnsupportedBinding(String),

    /// Two bindings would mount at the same path under the binding root.
    #[error("duplicate service binding name: {0}")]
    DuplicateBinding(String),

    #[error("build request has no tags")]
    MissingTag,

    #[error("rebase requires a previously built image")]
    MissingLastBuild,

    #[error("encoding platform environment: {0}")]
    PlatformEnv(#[from] serde_json::Error),
}
