//! Typed errors for registration and signature decoding.

use thiserror::Error;

use crate::signature::Signature;

/// Errors that abort a registration call.
///
/// Duplicate registrations are not errors; they are logged and skipped.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// An owner was attached to an entry created from a static handler.
    /// The descriptor stream classified the same signature both ways.
    #[error("attempting to treat static handler {signature} as instance-bound")]
    StaticOwner { signature: Signature },

    /// An instance-bound descriptor arrived without an instance to bind.
    #[error("instance-bound handler {signature} registered without an owner")]
    MissingOwner { signature: Signature },
}

/// Errors produced while decoding an encoded signature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("empty signature")]
    Empty,

    #[error("missing '#' between declaring type and handler name: {0}")]
    MissingSeparator(String),

    #[error("missing parameter list: {0}")]
    MissingParameters(String),

    #[error("unknown type code '{code}' at offset {offset}")]
    UnknownTypeCode { code: char, offset: usize },

    #[error("unterminated reference type at offset {offset}")]
    UnterminatedReference { offset: usize },

    #[error("unexpected end of type descriptor")]
    UnexpectedEnd,

    #[error("trailing input after return type: {0}")]
    TrailingInput(String),
}

/// Result type alias for registration operations.
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
