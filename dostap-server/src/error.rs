use thiserror::Error;

use dostap_surface::SnapshotError;

/// Failures surfaced to clients as `ERR <reason>` lines when building a
/// frame for GET, VIEW or a deferred TYPE reply.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ServiceError {
    #[error("text-mode server disabled")]
    Disabled,
    #[error("video adapter not in text mode")]
    NotInTextMode,
    #[error("unable to capture text snapshot")]
    CaptureFailed,
    #[error("service unavailable")]
    Unavailable,
}

impl From<SnapshotError> for ServiceError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::NotInTextMode => ServiceError::NotInTextMode,
            SnapshotError::NoMemory | SnapshotError::EmptyGeometry => {
                ServiceError::CaptureFailed
            },
        }
    }
}
