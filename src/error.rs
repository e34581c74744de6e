use thiserror::Error;

/// Errors reported by shape constructors and space operations.
///
/// The engine never panics on bad input; every fallible path returns one of
/// these and leaves the space untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PhysicsError {
    #[error("invalid shape: {0}")]
    InvalidShape(&'static str),
    #[error("no object with id {0} in this space")]
    NotFound(u64),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

pub type Result<T> = core::result::Result<T, PhysicsError>;
