use thiserror::Error;

use crate::path_policy::PathPolicyError;
use crate::render::RenderError;
use crate::signing::SigningError;
use crate::zammad::UpstreamError;

/// Every failure a processing run can surface. The classifier in
/// [`crate::classify`] maps each of these onto exactly one of
/// [`Classification::Transient`] or [`Classification::Permanent`].
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    PathPolicy(#[from] PathPolicyError),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("processing cancelled")]
    Cancelled,
}

impl ArchiveError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Retry routing for a failed run. There is intentionally no third value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Transient,
    Permanent,
}

impl Classification {
    pub fn label(self) -> &'static str {
        match self {
            Self::Transient => "Transient",
            Self::Permanent => "Permanent",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
