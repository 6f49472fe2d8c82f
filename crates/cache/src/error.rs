//! Error types for buffer import and texture creation.
//!
//! Most failure modes in this crate never surface as errors: invalid load
//! input collapses to id 0 at the scripting boundary, decode failures are
//! retained as a queryable `Failed` state, and zero-copy import problems
//! silently degrade to the CPU copy path. `ImportError` covers the cases
//! that remain: a buffer that cannot be turned into a texture at all.

use thiserror::Error;

/// Total import failure: neither the zero-copy path nor the CPU fallback
/// could produce a texture from the buffer.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The buffer declares a zero width or height.
    #[error("buffer has zero dimension")]
    ZeroDimension,

    /// A cross-device buffer could not be mapped for the CPU fallback and
    /// zero-copy import was unavailable.
    #[error("no CPU mapping available for cross-device buffer")]
    MapUnavailable,

    /// The buffer's declared geometry is inconsistent (stride smaller than
    /// a packed row, empty pixel data).
    #[error("invalid buffer: {0}")]
    InvalidBuffer(&'static str),

    /// The pixel payload is shorter than one full row; nothing can be
    /// converted.
    #[error("pixel data too short: {got} bytes, need at least {needed}")]
    TruncatedPixels { got: usize, needed: usize },

    /// The GPU context rejected the upload.
    #[error("texture creation failed: {0}")]
    TextureCreation(String),
}
