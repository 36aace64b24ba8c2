//! Error taxonomy for the RPC boundary (§7). Reconcilers use [`crate::lease::ReconcileError`]
//! and [`crate::store::StoreError`] internally and never let those cross into a `tonic::Status`
//! directly; only [`ControllerError`] does, via the `From` impl below.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ControllerError> for tonic::Status {
    fn from(err: ControllerError) -> Self {
        match err {
            ControllerError::InvalidArgument(msg) => tonic::Status::invalid_argument(msg),
            ControllerError::Unauthenticated(msg) => tonic::Status::unauthenticated(msg),
            ControllerError::PermissionDenied(msg) => tonic::Status::permission_denied(msg),
            ControllerError::NotFound(msg) => tonic::Status::not_found(msg),
            ControllerError::AlreadyExists(msg) => tonic::Status::already_exists(msg),
            ControllerError::FailedPrecondition(msg) => tonic::Status::failed_precondition(msg),
            ControllerError::Unavailable(msg) => tonic::Status::unavailable(msg),
            ControllerError::Internal(msg) => tonic::Status::internal(msg),
        }
    }
}

impl From<crate::store::StoreError> for ControllerError {
    fn from(err: crate::store::StoreError) -> Self {
        match err {
            crate::store::StoreError::NotFound(key) => {
                ControllerError::NotFound(format!("object {key} not found"))
            }
            crate::store::StoreError::Conflict(key) => {
                ControllerError::Internal(format!("resource version conflict on {key}"))
            }
            crate::store::StoreError::AlreadyExists(key) => {
                ControllerError::AlreadyExists(format!("object {key} already exists"))
            }
            crate::store::StoreError::Other(msg) => ControllerError::Internal(msg),
        }
    }
}

impl From<crate::identifier::IdentifierError> for ControllerError {
    fn from(err: crate::identifier::IdentifierError) -> Self {
        ControllerError::InvalidArgument(err.to_string())
    }
}

impl From<crate::selector::SelectorError> for ControllerError {
    fn from(err: crate::selector::SelectorError) -> Self {
        ControllerError::InvalidArgument(err.to_string())
    }
}

impl From<crate::lease::ReconcileError> for ControllerError {
    fn from(err: crate::lease::ReconcileError) -> Self {
        match err {
            crate::lease::ReconcileError::Invalid(msg) => ControllerError::InvalidArgument(msg),
            crate::lease::ReconcileError::Store(msg) => ControllerError::Internal(msg),
        }
    }
}
