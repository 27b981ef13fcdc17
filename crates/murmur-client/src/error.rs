//! Client error types.

use murmur_core::{SessionError, VaultError};
use thiserror::Error;

/// Errors from client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Session state machine rejected the operation.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Key vault operation failed.
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// Operation requires an authenticated session.
    #[error("cannot {operation}: session is not connected")]
    NotConnected {
        /// Operation that was attempted.
        operation: String,
    },
}
