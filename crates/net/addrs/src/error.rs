//! Address manager errors.

use thiserror::Error;

/// Errors from [`AddrsManager`](crate::AddrsManager) lifecycle operations.
#[derive(Debug, Error)]
pub enum AddrsManagerError {
    /// The manager's background tasks are already running.
    #[error("address manager already started")]
    AlreadyStarted,
}
