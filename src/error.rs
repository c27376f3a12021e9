//! The error codes clients of the facade observe (spec ⇒ `CmaError`
//! variants), plus the `thiserror`-derived `Display`/`Error` impls.
//!
//! Internal plumbing that a client never sees (tree bookkeeping inside
//! `bestfit`, the region-name grammar's own recursive-descent helpers)
//! keeps using plain `Result<T, &'static str>`, same as the teacher.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CmaError>;

/// Errors surfaced across the public facade (`alloc`/`info`/`retain`/
/// `release`) and by configuration parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CmaError {
    /// Zero size, bad (non power-of-two) alignment, or a malformed
    /// device/kind pair.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// No candidate region had enough free space, or none of the
    /// candidates' strategies could carve a fitting hole.
    #[error("out of memory")]
    OutOfMemory,

    /// No routing rule matched, or an address was not found in the
    /// chunk registry.
    #[error("not found")]
    NotFound,

    /// The region or routing configuration exceeded the implementation's
    /// fixed capacity.
    #[error("no space: {0}")]
    NoSpace(&'static str),

    /// A strategy handed back a chunk whose start address collides with
    /// one already indexed; this always indicates a strategy bug.
    #[error("busy: duplicate chunk start 0x{0:x}")]
    Busy(usize),

    /// The region or route configuration string failed to parse.
    #[error("configuration error: {0}")]
    Config(String),
}
