//! Tracer configuration.
//!
//! Field shape follows the teacher's `config::Opts` convention: a plain,
//! `Clone + Debug + Default`-deriving struct of knobs rather than a builder
//! type, with one constant for the out-of-the-box default.

/// Default ring buffer size, in bytes. Matches the original implementation's
/// `PROFILER_BUFFER_SIZE_IN_BYTES` default of 64 KiB, rounded to a power of
/// two for cheap modular arithmetic on embedded allocators.
pub const DEFAULT_BUFFER_SIZE: usize = 65_536;

/// Settings a caller may supply to [`crate::Tracer::init_with_config`].
#[derive(Clone, Debug)]
pub struct TracerConfig {
    /// Ring buffer capacity in bytes. Must exceed
    /// [`crate::codec::max_kind_size`] or [`crate::Tracer::init_with_config`]
    /// returns [`crate::error::TraceError::BufferTooSmall`].
    pub buffer_size: usize,

    /// When `true`, a writer call made while [`Platform::in_isr`] reports
    /// `true` is attributed to the reserved "interrupt" task id instead of
    /// resolving (and, on first sight, registering) the enclosing task via
    /// [`crate::registry::TaskRegistry`]. Disabling this is only correct on
    /// platforms where task-handle lookups are themselves ISR-safe.
    ///
    /// [`Platform::in_isr`]: crate::platform::Platform::in_isr
    pub attribute_isr_writes_to_reserved_task: bool,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            attribute_isr_writes_to_reserved_task: true,
        }
    }
}

impl TracerConfig {
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_buffer_size() {
        assert_eq!(TracerConfig::default().buffer_size, DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn builder_overrides_buffer_size() {
        let cfg = TracerConfig::default().with_buffer_size(1024);
        assert_eq!(cfg.buffer_size, 1024);
    }
}
