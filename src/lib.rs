//! Concurrent ring-buffer event tracer for dual-core embedded executives.
//!
//! `tracecore` gives application and interrupt-handler code a handful of
//! cheap, non-blocking operations (`trace_begin`, `trace_instant`,
//! `trace_counter`, ...) that pack events into a fixed-size ring buffer, plus
//! a snapshot pipeline that quiesces writers and streams the contents out as
//! a Chrome Trace Event Format document for `chrome://tracing` or
//! [Perfetto](https://ui.perfetto.dev/).
//!
//! ## Example
//!
//! ```rust
//! use tracecore::{StdPlatform, Tracer};
//!
//! let tracer = Tracer::<StdPlatform>::init_default();
//! {
//!     let _scope = tracer.trace_begin("work");
//!     // ... do the work ...
//! }
//! tracer.trace_instant("checkpoint");
//!
//! let json = tracer.snapshot_to_string().unwrap();
//! assert!(json.contains("\"name\":\"work\""));
//! ```
//!
//! ## Zero-cost builds
//!
//! Enabling the `disabled` feature turns [`trace_scope!`] and the writer
//! free functions into no-ops that the compiler strips entirely, for builds
//! that must pay nothing for instrumentation.
//!
//! ## Record format
//!
//! See [`codec`] for the on-the-wire record layout, [`ring`] for the
//! eviction algorithm, and [`snapshot`] for the export pipeline.

pub mod codec;
pub mod config;
pub mod error;
pub mod flow;
pub mod platform;
pub mod registry;
pub mod ring;
pub mod snapshot;
pub mod writer;

use std::sync::OnceLock;

pub use codec::Color;
pub use config::TracerConfig;
pub use error::{Result, TraceError};
pub use platform::{Platform, StdPlatform};
use writer::{Core, DurationGuard};

/// A tracer bound to a concrete [`Platform`]. Most applications use the
/// process-wide default via the free functions in this crate root
/// ([`init`], [`trace_begin`], ...); construct a `Tracer` directly only to
/// run more than one independent ring (e.g. in tests).
pub struct Tracer<P: Platform> {
    core: Core<P>,
}

impl<P: Platform> Tracer<P> {
    /// Builds a tracer over `platform` with `config`, enabled from
    /// construction (there is no separate `init`/`deinit` step on an owned
    /// `Tracer`; drop it to free the buffer).
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::BufferTooSmall`] if `config.buffer_size` cannot
    /// hold even the largest record kind, or [`TraceError::OutOfMemory`] if
    /// the ring buffer allocation itself fails.
    pub fn new(platform: P, config: TracerConfig) -> Result<Self> {
        if config.buffer_size < codec::max_kind_size() {
            return Err(TraceError::BufferTooSmall {
                buffer_size: config.buffer_size,
                largest_record: codec::max_kind_size(),
            });
        }
        let core = Core::new(platform, &config)?;
        core.gate().open();
        log::info!(
            "tracecore: tracer initialized with a {}-byte ring buffer",
            config.buffer_size
        );
        Ok(Self { core })
    }

    pub fn gate_enabled(&self) -> bool {
        self.core.gate().is_enabled()
    }

    /// Temporarily or permanently stops admitting new writes. Safe to call
    /// repeatedly; has no effect on writes already in flight.
    pub fn disable(&self) {
        self.core.gate().close();
    }

    pub fn enable(&self) {
        self.core.gate().open();
    }

    /// See [`TracerConfig::attribute_isr_writes_to_reserved_task`].
    pub fn set_attribute_isr_to_reserved(&self, value: bool) {
        self.core.set_attribute_isr_to_reserved(value);
    }

    pub fn trace_begin(&self, name: &'static str) -> DurationGuard<'_, P> {
        self.core.trace_begin(name)
    }

    pub fn trace_begin_colored(&self, name: &'static str, color: Color) -> DurationGuard<'_, P> {
        self.core.trace_begin_colored(name, color)
    }

    pub fn trace_begin_linked(&self, name: &'static str, link_cell: &mut u16) -> DurationGuard<'_, P> {
        self.core.trace_begin_linked(name, link_cell)
    }

    pub fn trace_instant(&self, name: &'static str) {
        self.core.trace_instant(name)
    }

    pub fn trace_instant_colored(&self, name: &'static str, color: Color) {
        self.core.trace_instant_colored(name, color)
    }

    /// See [`writer::Core::trace_instant_linked`].
    pub fn trace_instant_linked(
        &self,
        name: &'static str,
        link_in: u16,
        link_out_cell: &mut u16,
        color: Color,
    ) {
        self.core.trace_instant_linked(name, link_in, link_out_cell, color)
    }

    pub fn trace_counter(&self, name: &'static str, value: i32) {
        self.core.trace_counter(name, value)
    }

    pub fn trace_flow_in(&self, link_cell: &mut u16) {
        self.core.trace_flow_in(link_cell)
    }

    pub fn trace_flow_out(&self, link_cell: &mut u16) {
        self.core.trace_flow_out(link_cell)
    }

    pub fn trace_task_switch(&self, into: bool) {
        self.core.trace_task_switch(into)
    }

    pub fn snapshot_chunked(&self, sink: impl FnMut(&str)) -> Result<()> {
        snapshot::snapshot_chunked(&self.core, sink)
    }

    pub fn snapshot_to_string(&self) -> Result<String> {
        snapshot::snapshot_to_string(&self.core)
    }

    pub fn snapshot_size_upper_bound(&self) -> usize {
        snapshot::snapshot_size_upper_bound(self.core.ring().capacity())
    }
}

impl Tracer<StdPlatform> {
    /// Convenience constructor for the common case: the standard-library
    /// platform and the default configuration. Panics only if
    /// [`codec::max_kind_size`] somehow exceeds [`config::DEFAULT_BUFFER_SIZE`],
    /// which cannot happen with the shipped record set.
    pub fn init_default() -> Self {
        Self::new(StdPlatform::default(), TracerConfig::default())
            .expect("default buffer size always fits the largest record kind")
    }
}

static DEFAULT_TRACER: OnceLock<Tracer<StdPlatform>> = OnceLock::new();

/// Initializes the process-wide default tracer with
/// [`TracerConfig::default`]. Returns [`TraceError::AlreadyInitialized`] if
/// called twice.
pub fn init() -> Result<()> {
    init_with_config(TracerConfig::default())
}

/// Initializes the process-wide default tracer with a custom
/// [`TracerConfig`]. Returns [`TraceError::AlreadyInitialized`] if called
/// twice, or [`TraceError::BufferTooSmall`] if the configured buffer cannot
/// hold the largest record kind.
pub fn init_with_config(config: TracerConfig) -> Result<()> {
    if DEFAULT_TRACER.get().is_some() {
        return Err(TraceError::AlreadyInitialized);
    }
    let tracer = Tracer::new(StdPlatform::default(), config)?;
    DEFAULT_TRACER
        .set(tracer)
        .map_err(|_| TraceError::AlreadyInitialized)
}

/// Disables the default tracer's admission gate. Unlike the original
/// implementation's `deinit`, the buffer itself is not freed (the process
/// owns it for its lifetime via [`OnceLock`]); this matches `spec.md`'s
/// deinit contract of "close the gate, drain writers" without requiring the
/// default tracer to become reinitializable within the same process.
pub fn deinit() {
    if let Some(tracer) = DEFAULT_TRACER.get() {
        tracer.disable();
        while tracer.core.gate().in_flight() > 0 {
            std::thread::yield_now();
        }
    }
}

fn default_tracer() -> Option<&'static Tracer<StdPlatform>> {
    DEFAULT_TRACER.get()
}

/// Used by [`trace_scope!`]'s zero-argument form to recover the enclosing
/// function's path as a `'static` string: `std::any::type_name` embeds a
/// function item's full path at compile time, so naming a local marker
/// function and slicing off its own `"::f"` suffix yields the caller's name
/// for free, with no runtime cost beyond the slice.
#[doc(hidden)]
pub fn __type_name_of<T>(_marker: T) -> &'static str {
    std::any::type_name::<T>()
}

/// Begins a duration scope on the default tracer. A no-op guard is returned
/// if [`init`] was never called or the tracer is disabled.
#[cfg(not(feature = "disabled"))]
pub fn trace_begin(name: &'static str) -> Option<DurationGuard<'static, StdPlatform>> {
    default_tracer().map(|t| t.trace_begin(name))
}

/// Compiles to nothing when the `disabled` feature is enabled.
#[cfg(feature = "disabled")]
pub fn trace_begin(name: &'static str) -> Option<DurationGuard<'static, StdPlatform>> {
    let _ = name;
    None
}

#[cfg(not(feature = "disabled"))]
pub fn trace_begin_colored(name: &'static str, color: Color) -> Option<DurationGuard<'static, StdPlatform>> {
    default_tracer().map(|t| t.trace_begin_colored(name, color))
}

#[cfg(feature = "disabled")]
pub fn trace_begin_colored(name: &'static str, color: Color) -> Option<DurationGuard<'static, StdPlatform>> {
    let _ = (name, color);
    None
}

#[cfg(not(feature = "disabled"))]
pub fn trace_begin_linked(name: &'static str, link_cell: &mut u16) -> Option<DurationGuard<'static, StdPlatform>> {
    default_tracer().map(|t| t.trace_begin_linked(name, link_cell))
}

#[cfg(feature = "disabled")]
pub fn trace_begin_linked(name: &'static str, link_cell: &mut u16) -> Option<DurationGuard<'static, StdPlatform>> {
    let _ = (name, &link_cell);
    None
}

#[cfg(not(feature = "disabled"))]
pub fn trace_instant(name: &'static str) {
    if let Some(t) = default_tracer() {
        t.trace_instant(name);
    }
}

#[cfg(feature = "disabled")]
pub fn trace_instant(name: &'static str) {
    let _ = name;
}

#[cfg(not(feature = "disabled"))]
pub fn trace_instant_colored(name: &'static str, color: Color) {
    if let Some(t) = default_tracer() {
        t.trace_instant_colored(name, color);
    }
}

#[cfg(feature = "disabled")]
pub fn trace_instant_colored(name: &'static str, color: Color) {
    let _ = (name, color);
}

/// See [`writer::Core::trace_instant_linked`].
#[cfg(not(feature = "disabled"))]
pub fn trace_instant_linked(name: &'static str, link_in: u16, link_out_cell: &mut u16, color: Color) {
    if let Some(t) = default_tracer() {
        t.trace_instant_linked(name, link_in, link_out_cell, color);
    }
}

#[cfg(feature = "disabled")]
pub fn trace_instant_linked(name: &'static str, link_in: u16, link_out_cell: &mut u16, color: Color) {
    let _ = (name, link_in, &link_out_cell, color);
}

#[cfg(not(feature = "disabled"))]
pub fn trace_counter(name: &'static str, value: i32) {
    if let Some(t) = default_tracer() {
        t.trace_counter(name, value);
    }
}

#[cfg(feature = "disabled")]
pub fn trace_counter(name: &'static str, value: i32) {
    let _ = (name, value);
}

#[cfg(not(feature = "disabled"))]
pub fn trace_flow_in(link_cell: &mut u16) {
    if let Some(t) = default_tracer() {
        t.trace_flow_in(link_cell);
    }
}

#[cfg(feature = "disabled")]
pub fn trace_flow_in(link_cell: &mut u16) {
    let _ = &link_cell;
}

#[cfg(not(feature = "disabled"))]
pub fn trace_flow_out(link_cell: &mut u16) {
    if let Some(t) = default_tracer() {
        t.trace_flow_out(link_cell);
    }
}

#[cfg(feature = "disabled")]
pub fn trace_flow_out(link_cell: &mut u16) {
    let _ = &link_cell;
}

#[cfg(not(feature = "disabled"))]
pub fn trace_task_switch(into: bool) {
    if let Some(t) = default_tracer() {
        t.trace_task_switch(into);
    }
}

#[cfg(feature = "disabled")]
pub fn trace_task_switch(into: bool) {
    let _ = into;
}

/// Streams a snapshot of the default tracer, or does nothing and returns
/// `Ok(())` if it was never initialized.
pub fn snapshot_chunked(sink: impl FnMut(&str)) -> Result<()> {
    match default_tracer() {
        Some(t) => t.snapshot_chunked(sink),
        None => Ok(()),
    }
}

pub fn snapshot_to_string() -> Result<String> {
    match default_tracer() {
        Some(t) => t.snapshot_to_string(),
        None => Ok(String::new()),
    }
}

/// Scopes a duration trace to the enclosing block using the default tracer,
/// closed by the guard's `Drop` impl on every exit path (normal return,
/// `?`, or unwind). Disabled builds (`disabled` feature) compile this to
/// nothing.
///
/// Called with no arguments, the scope is named after the function it's
/// used in, via [`__type_name_of`].
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! trace_scope {
    () => {
        fn f() {}
        let name = $crate::__type_name_of(f);
        let name: &'static str = &name[..name.len() - 3];
        let _tracecore_scope = $crate::trace_begin(name);
    };
    ($name:expr) => {
        let _tracecore_scope = $crate::trace_begin($name);
    };
    ($name:expr, $color:expr) => {
        let _tracecore_scope = $crate::trace_begin_colored($name, $color);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! trace_scope {
    () => {};
    ($name:expr) => {
        let _ = &$name;
    };
    ($name:expr, $color:expr) => {
        let _ = &$name;
        let _ = &$color;
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform::test_support::TestPlatform;

    #[test]
    fn owned_tracer_round_trips_a_scope() {
        let tracer = Tracer::new(TestPlatform::new(), TracerConfig::default()).unwrap();
        {
            let _s = tracer.trace_begin("work");
        }
        let doc = tracer.snapshot_to_string().unwrap();
        assert!(doc.contains("\"name\":\"work\""));
    }

    #[test]
    fn buffer_smaller_than_largest_record_is_rejected() {
        let config = TracerConfig::default().with_buffer_size(4);
        let err = Tracer::new(TestPlatform::new(), config).unwrap_err();
        assert!(matches!(err, TraceError::BufferTooSmall { .. }));
    }

    #[test]
    fn owned_tracer_round_trips_a_linked_instant() {
        let tracer = Tracer::new(TestPlatform::new(), TracerConfig::default()).unwrap();
        let mut link_out = 0u16;
        tracer.trace_instant_linked("event", 0, &mut link_out, Color::Undefined);
        assert_ne!(link_out, 0);
        let doc = tracer.snapshot_to_string().unwrap();
        assert!(doc.contains("\"name\":\"event\""));
        assert!(doc.contains("\"cat\":\"flow\""));
    }

    #[test]
    fn zero_arg_trace_scope_derives_a_static_name() {
        fn f() {}
        let name = __type_name_of(f);
        let name: &'static str = &name[..name.len() - 3];
        assert!(name.ends_with("zero_arg_trace_scope_derives_a_static_name"));
    }

    #[test]
    fn zero_arg_trace_scope_macro_is_callable_without_a_default_tracer() {
        fn instrumented() {
            trace_scope!();
        }
        // No default tracer initialized in this test process: the macro
        // must still expand and run without panicking.
        instrumented();
    }
}
