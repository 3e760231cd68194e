pub type OitResult<T> = Result<T, OitError>;

#[derive(thiserror::Error, Debug)]
pub enum OitError {
    /// The device cannot run the requested backend. Fatal at creation.
    #[error("missing capability: {0}")]
    MissingCapability(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("allocation error: buffer '{label}' needs {requested} bytes, device limit is {limit}")]
    Allocation {
        label: String,
        requested: u64,
        limit: u64,
    },

    #[error("shader mismatch: draw used {used}, active gather shader is {active}")]
    ShaderMismatch { active: String, used: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OitError {
    pub fn missing_capability(msg: impl Into<String>) -> Self {
        Self::MissingCapability(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Error for lifecycle calls made before the first `resolution_changed`.
    pub(crate) fn not_allocated(what: &str) -> Self {
        Self::Validation(format!(
            "{what} has no storage yet; resolution_changed must run first"
        ))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
