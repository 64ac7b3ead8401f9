use thiserror::Error;

/// Why a compilation could not be completed.
///
/// Only resource exhaustion is recoverable: the caller can retry with a
/// bigger budget or leave the method to the interpreter. Anything structural
/// (unbound labels, duplicate oop map entries, unfinalized frames) panics
/// instead, because it means a phase upstream of the backend is broken.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("bailout: {0}")]
    Bailout(String),
    #[error("internal error: {0}")]
    Internal(String),
}
