//! # Admission Errors

use crate::controller::store::StoreError;
use thiserror::Error;

/// Error type for admission stages
///
/// The message is surfaced to the requester verbatim.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// The object is structurally invalid
    #[error("{0}")]
    Validation(String),

    /// The object collides with existing state
    #[error("{0}")]
    Conflict(String),

    /// The store could not be consulted
    #[error("unable to verify secret state: {0}")]
    Store(#[from] StoreError),
}

impl AdmissionError {
    pub fn validation(message: impl Into<String>) -> Self {
        AdmissionError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        AdmissionError::Conflict(message.into())
    }
}
