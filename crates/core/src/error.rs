//! Error taxonomy shared by the user-facing flows.

use thiserror::Error;

use crate::api::ApiError;

/// Failure of a single user-triggered flow.
///
/// Every variant is scoped to the flow that produced it; nothing here
/// is fatal to the application.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Local validation failure. Shown inline and never sent to the
    /// server.
    #[error("{0}")]
    Invalid(String),
    /// The request reached the network layer and failed there or was
    /// rejected by the backend.
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl FlowError {
    /// User-facing message for the status line.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}
