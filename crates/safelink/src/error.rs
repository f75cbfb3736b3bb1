//! Error taxonomy for the decision core.
//!
//! Two fallible categories: input validation and state persistence.
//! Signature verification failures are deliberately not represented here —
//! they collapse to a boolean `false` so a malformed key or signature can
//! never propagate an error past the verification boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad caller input: malformed URL, wrong secret length, missing field.
    /// Always surfaced to the caller, never silently corrected.
    #[error("validation error: {0}")]
    Validation(String),

    /// State file could not be locked, read, or written. Callers treat a
    /// failed save as "proceed with the in-memory state for this decision".
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
