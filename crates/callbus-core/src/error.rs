//! Error types for the call-control message bus

use thiserror::Error;

/// Result type for message bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Errors that can occur in the message bus
///
/// Every public operation reports failure through this enum; no operation
/// communicates failure via side channels. Engine rejections are expected
/// outcomes (registration failures are routine) and carry the engine's
/// reason text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// No live engine handle; the engine was never initialised, was shut
    /// down, or died on a transport failure
    #[error("engine is not initialised")]
    EngineNotInitialised,

    /// `initialise` was called while an engine session is already live
    #[error("engine is already initialised")]
    AlreadyInitialised,

    /// The engine adapter did not acknowledge a command in time
    #[error("operation timed out after {millis} ms")]
    Timeout {
        /// Elapsed bound in milliseconds
        millis: u64,
    },

    /// The engine reported a command failure
    #[error("command rejected by engine: {reason}")]
    Rejected {
        /// Engine-supplied failure reason
        reason: String,
    },

    /// A field was read from an envelope variant that does not carry it
    #[error("variant {variant} has no field {field}")]
    WrongVariant {
        /// Variant the envelope actually holds
        variant: &'static str,
        /// Field that was requested
        field: &'static str,
    },

    /// A correlation entry already exists for this key
    #[error("duplicate correlation key: {key}")]
    DuplicateKey {
        /// Call token or registration identifier
        key: String,
    },

    /// No correlation entry exists for this key
    #[error("no correlation entry for key: {key}")]
    NotFound {
        /// Call token or registration identifier
        key: String,
    },

    /// An indication referenced a call token that is already cleared or
    /// whose pending operation was cancelled
    #[error("stale indication for call token {token}")]
    StaleIndication {
        /// The cleared or abandoned call token
        token: String,
    },

    /// `poll` and `subscribe` were mixed on one indication channel, or a
    /// second poller raced an active one
    #[error("indication channel is already consumed in a conflicting mode")]
    ModeConflict,

    /// The indication consumer did not exit within the shutdown bound
    #[error("consumer did not exit within {millis} ms of shutdown")]
    ShutdownTimeout {
        /// Shutdown bound in milliseconds
        millis: u64,
    },

    /// A command failed per-variant field validation before dispatch
    #[error("invalid command field {field}: {reason}")]
    InvalidCommand {
        /// Offending field
        field: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// The engine adapter failed at the transport level; fatal to the
    /// engine handle
    #[error("engine transport failure: {reason}")]
    Transport {
        /// Adapter-supplied failure description
        reason: String,
    },
}

impl BusError {
    /// Create a `Rejected` error from an engine reason string
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Create an `InvalidCommand` validation error
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidCommand {
            field,
            reason: reason.into(),
        }
    }

    /// Create a `Transport` error
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Create a `WrongVariant` accessor error
    pub fn wrong_variant(variant: &'static str, field: &'static str) -> Self {
        Self::WrongVariant { variant, field }
    }

    /// Create a `Timeout` error from a duration bound
    pub fn timeout(bound: std::time::Duration) -> Self {
        Self::Timeout {
            millis: bound.as_millis() as u64,
        }
    }

    /// Whether this error is fatal to the engine handle
    ///
    /// Fatal errors mark the handle dead; all subsequent dispatches fail
    /// fast with `EngineNotInitialised`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BusError::Transport { .. } | BusError::ShutdownTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_carries_reason() {
        let err = BusError::rejected("no such party");
        assert_eq!(
            err,
            BusError::Rejected {
                reason: "no such party".to_string()
            }
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn transport_errors_are_fatal() {
        assert!(BusError::transport("engine closed the pipe").is_fatal());
        assert!(BusError::ShutdownTimeout { millis: 5000 }.is_fatal());
        assert!(!BusError::EngineNotInitialised.is_fatal());
    }

    #[test]
    fn display_includes_key() {
        let err = BusError::NotFound {
            key: "tok-1".to_string(),
        };
        assert!(err.to_string().contains("tok-1"));
    }
}
