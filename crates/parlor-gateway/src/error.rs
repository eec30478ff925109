use thiserror::Error;

/// Failures a client request can run into after authentication.
///
/// Either way the request had no visible effect beyond the failure report
/// sent back to the originating connection: validation rejects before any
/// side effect, and a persistence failure means nothing was fanned out.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),

    /// The display string is what clients see; the underlying cause only
    /// goes to the server log.
    #[error("message could not be persisted")]
    Persistence(#[source] anyhow::Error),
}

impl ChatError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }
}
