//! Error types reported by the dispatcher.

use std::fmt;

/// Error returned from `publish`, `complete` and `fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// The dispatcher already completed or failed.
    #[error("dispatcher already terminated")]
    Terminated,

    /// The buffer was full under the `Error` overflow policy. The
    /// dispatcher is terminated by the same call.
    #[error("buffer overflow")]
    Overflow,
}

/// Error returned from `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    /// A unicast dispatcher already has a live subscription.
    #[error("unicast dispatcher already has a live subscriber")]
    TooManySubscribers,
}

/// Invalid construction-time configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("bounded capacity must be at least 1")]
    ZeroCapacity,

    #[error("replay retention must keep at least 1 item")]
    ZeroRetention,
}

/// Cause carried by a `Failed` terminal signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure<E> {
    /// The buffer overflowed under the `Error` policy.
    Overflow,
    /// The producer called `fail` with this error.
    Error(E),
}

impl<E: fmt::Display> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow => write!(f, "buffer overflow"),
            Self::Error(e) => write!(f, "{e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for Failure<E> {}
