//! Error taxonomy for the fallible part of the tracer surface.
//!
//! Per the design's propagation policy, only `init`, `deinit` and the
//! snapshot pipeline ever return a `Result`. The writer surface
//! (`trace_begin`, `trace_instant`, ...) is infallible: it either records the
//! event or silently drops it.

use thiserror::Error;

/// Errors surfaced by [`crate::Tracer`] lifecycle and snapshot operations.
#[derive(Debug, Error)]
pub enum TraceError {
    /// `init`/`init_with_size` called on a tracer that is already
    /// initialized.
    #[error("tracer is already initialized")]
    AlreadyInitialized,

    /// The ring buffer allocation failed.
    #[error("failed to allocate {requested_bytes} bytes for the trace buffer")]
    OutOfMemory {
        /// Number of bytes the caller asked for.
        requested_bytes: usize,
    },

    /// The configured buffer is smaller than the largest record kind, so no
    /// record could ever be written.
    #[error(
        "buffer size {buffer_size} is smaller than the largest record size {largest_record}"
    )]
    BufferTooSmall {
        /// Configured buffer size, in bytes.
        buffer_size: usize,
        /// Byte size of the largest record kind.
        largest_record: usize,
    },

    /// A record header encountered during the snapshot walk carries a type
    /// tag the codec does not recognize. This indicates the ring buffer's
    /// invariants were violated (a programmer error, not a transient
    /// condition).
    #[error("corrupt record at offset {offset}: unknown type tag {type_tag}")]
    CorruptRecord {
        /// Physical byte offset of the bad header.
        offset: usize,
        /// The unrecognized type tag.
        type_tag: u8,
    },
}

/// Result alias used across the fallible surface.
pub type Result<T> = std::result::Result<T, TraceError>;
