//! Error types for the binding bridge.
//!
//! Three failure families exist here:
//!
//! - [`MangleError`] — a mangled signature key could not be decoded back
//!   into readable form.
//! - [`NativeError`] — a bound host callable rejected its arguments or
//!   failed while running. These surface to the script as engine errors
//!   and unwind to the nearest protected call.
//! - [`CallError`] — dispatch failures produced by the call adapter
//!   before any host invocation happens (unknown overload, wrong arity,
//!   bad receiver). Also script-visible.
//!
//! Configuration errors (duplicate overload registration) and internal
//! consistency failures (finalize notification for an untracked
//! reference) are deliberately not represented: both are bugs in the
//! program setup or in the bridge itself and panic instead.

use thiserror::Error;

/// Failure decoding a mangled signature key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MangleError {
    /// The key has no `_` separator between name and category codes.
    #[error("missing '_' separator in mangled key '{0}'")]
    MissingSeparator(String),

    /// A category code character is not one of `b`, `n`, `s`, `c`.
    #[error("invalid category code '{code}' in mangled key '{key}'")]
    InvalidCode { key: String, code: char },
}

/// Failure raised by a bound host callable.
#[derive(Debug, Error)]
pub enum NativeError {
    /// An argument did not have the category the callable expected.
    #[error("argument {index} expected {expected}")]
    ArgType { index: usize, expected: &'static str },

    /// The callable asked for more arguments than the call provided.
    #[error("missing argument {index}")]
    MissingArg { index: usize },

    /// The receiver could not be borrowed as the bound type.
    #[error("receiver is not a {expected}")]
    ReceiverType { expected: &'static str },

    /// Free-form failure produced by the host callable itself.
    #[error("{0}")]
    Message(String),
}

impl NativeError {
    /// Free-form host failure.
    pub fn message(msg: impl Into<String>) -> Self {
        NativeError::Message(msg.into())
    }
}

/// Script-visible dispatch failures raised through the engine's error
/// primitive before any host invocation happens.
#[derive(Debug, Error)]
pub(crate) enum CallError {
    #[error("Unknown function {mangled} \"{readable}\"")]
    UnknownFunction { mangled: String, readable: String },

    #[error("Invalid number of parameters for function '{name}'")]
    ArgCount { name: String },

    #[error("bad receiver for '{name}': not a bridge object")]
    BadReceiver { name: String },

    #[error("bad argument #{index} to '{name}': expected {expected}")]
    BadArgument {
        name: String,
        index: usize,
        expected: &'static str,
    },

    #[error(transparent)]
    Native(#[from] NativeError),
}
