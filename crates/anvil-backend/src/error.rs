use thiserror::Error;

/// Error surface for the hardware backend port (spec.md §4.A).
///
/// Callers distinguish "not found" (recoverable, e.g. a DHCP request
/// for an unknown MAC) from transport failures via [`HardwareBackendError::is_not_found`]
/// rather than matching on variants directly, so a concrete backend can
/// add its own transport-error detail without breaking callers.
#[derive(Debug, Error)]
pub enum HardwareBackendError {
    #[error("no hardware record for the given lookup key")]
    NotFound,
    #[error("hardware backend transport error: {0}")]
    Transport(String),
}

impl HardwareBackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HardwareBackendError::NotFound)
    }
}

/// Error surface for the workflow backend port (spec.md §4.E, §9).
#[derive(Debug, Error)]
pub enum WorkflowBackendError {
    #[error("no object for the given key")]
    NotFound,
    #[error("object was concurrently modified")]
    Conflict,
    #[error("workflow backend transport error: {0}")]
    Transport(String),
}

impl WorkflowBackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, WorkflowBackendError::NotFound)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, WorkflowBackendError::Conflict)
    }
}
