use thiserror::Error;

#[derive(Error, Debug)]
pub enum EpiError {
    /// A sampler was asked to draw from nothing, or from weights that sum to nothing
    #[error("Domain error: {0}")]
    Domain(String),

    /// Arguments that no size distribution can satisfy
    #[error("Incompatible arguments: {0}")]
    Value(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A bounded retry loop ran out of attempts while building the world
    #[error("Build failed: {0}")]
    Build(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown {kind} id {id}")]
    UnknownId { kind: &'static str, id: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EpiError>;
