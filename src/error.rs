use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, BrambleError>;

/// Errors surfaced by the engine.
///
/// Bounds and capacity errors are contract-level: callers either violated an
/// index contract (`OutOfBounds`) or must make room before retrying
/// (`CapacityExceeded`, normally consumed by a node split). Corruption-class
/// errors (`UnknownNodeType`, `Corruption`) indicate damaged persisted bytes
/// and are never recoverable locally.
#[derive(Debug, Error)]
pub enum BrambleError {
    /// Index or position outside the valid range.
    #[error("index {index} out of bounds for length {len}")]
    OutOfBounds {
        /// The offending index.
        index: u64,
        /// The valid length at the time of the call.
        len: u64,
    },
    /// A packed block or node cannot hold the requested content.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(&'static str),
    /// A node carries a type tag the dispatcher does not recognize.
    #[error("unknown node type tag {0}")]
    UnknownNodeType(u32),
    /// An aggregate summary grew beyond its representable domain.
    #[error("aggregate overflow: {0}")]
    AggregateOverflow(&'static str),
    /// The store could not allocate a node buffer.
    #[error("out of memory: {0}")]
    OutOfMemory(&'static str),
    /// Persisted bytes violate a structural invariant.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Invalid argument supplied by the caller.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// The requested entity does not exist.
    #[error("not found")]
    NotFound,
}
