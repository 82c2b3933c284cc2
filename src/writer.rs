//! The admission gate and the writer-facing event operations.
//!
//! Grounded on `examples/original_source/src/mabutrace.c`'s
//! `profiler_started`/`entries_lock_count` pair (an enabled flag plus an
//! in-flight writer counter the exporter spins on before reading) and on
//! `profiler_duration_handle_t`, whose begin/end split this module mirrors
//! with a `Drop`-based guard instead of a caller-managed struct.
//!
//! Every operation here is infallible by design (`spec.md` §4.8): a disabled
//! or uninitialized tracer silently drops the event rather than returning an
//! error, so instrumentation call sites never need error handling.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::codec::{self, Color, LinkDirection, RecordKind, KIND_SIZES};
use crate::flow::FlowIdAllocator;
use crate::platform::Platform;
use crate::registry::{self, TaskRegistry};
use crate::ring::Ring;

/// `enabled` plus an in-flight writer counter. The snapshotter closes the
/// gate, then spins on [`AdmissionGate::in_flight`] reaching zero before it
/// is safe to read the ring buffer; see `crate::snapshot`.
pub struct AdmissionGate {
    enabled: AtomicBool,
    in_flight: AtomicUsize,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Cheap, non-blocking peek used by writers to skip capturing event data
    /// entirely when the tracer is disabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn open(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn close(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Registers a writer as in-flight. Returns `None` if the gate is
    /// closed, in which case no count was taken. ISR-safe: only atomic
    /// ops, no blocking.
    pub fn enter(&self) -> Option<GateGuard<'_>> {
        if !self.is_enabled() {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        // The gate may have closed between the check above and the
        // increment; re-check so a racing snapshot can't miss this writer.
        if !self.is_enabled() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(GateGuard { gate: self })
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII in-flight marker; dropping it is the "cleanup" half of the enter
/// protocol.
pub struct GateGuard<'a> {
    gate: &'a AdmissionGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bundles the ring buffer, admission gate, task registry and flow-id
/// allocator behind a single platform type parameter. `crate::Tracer` wraps
/// one of these behind a global, lazily-initialized slot.
pub struct Core<P: Platform> {
    platform: P,
    ring: Ring,
    gate: AdmissionGate,
    registry: TaskRegistry<P::Task>,
    flow: FlowIdAllocator,
    attribute_isr_to_reserved: AtomicBool,
}

impl<P: Platform> Core<P> {
    /// # Errors
    ///
    /// Returns [`crate::error::TraceError::OutOfMemory`] if the ring buffer
    /// allocation fails.
    pub fn new(platform: P, config: &crate::config::TracerConfig) -> crate::error::Result<Self> {
        Ok(Self {
            platform,
            ring: Ring::new(config.buffer_size)?,
            gate: AdmissionGate::new(),
            registry: TaskRegistry::new(),
            flow: FlowIdAllocator::new(),
            attribute_isr_to_reserved: AtomicBool::new(config.attribute_isr_writes_to_reserved_task),
        })
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn registry(&self) -> &TaskRegistry<P::Task> {
        &self.registry
    }

    /// Runtime override for [`TracerConfig::attribute_isr_writes_to_reserved_task`].
    ///
    /// [`TracerConfig::attribute_isr_writes_to_reserved_task`]: crate::config::TracerConfig::attribute_isr_writes_to_reserved_task
    pub fn set_attribute_isr_to_reserved(&self, value: bool) {
        self.attribute_isr_to_reserved.store(value, Ordering::Relaxed);
    }

    fn header_ids(&self) -> (u8, u8) {
        let cpu_id = self.platform.current_cpu() & 0x01;
        let task_id = if self.platform.in_isr() && self.attribute_isr_to_reserved.load(Ordering::Relaxed) {
            registry::RESERVED_ID
        } else {
            self.registry.get_or_assign(self.platform.current_task())
        };
        (cpu_id, task_id)
    }

    /// Begins a duration scope. The returned guard writes a single combined
    /// DURATION record on drop, carrying both the begin timestamp and the
    /// computed duration — the record is never written twice.
    pub fn trace_begin(&self, name: &'static str) -> DurationGuard<'_, P> {
        self.trace_begin_colored(name, Color::Undefined)
    }

    pub fn trace_begin_colored(&self, name: &'static str, color: Color) -> DurationGuard<'_, P> {
        let _permit = match self.gate.enter() {
            Some(permit) => permit,
            None => return DurationGuard::inactive(self),
        };
        let (cpu_id, task_id) = self.header_ids();
        let begin_timestamp = self.platform.now_micros();
        DurationGuard::active(self, name, color, cpu_id, task_id, begin_timestamp)
    }

    /// Begins a duration scope and emits a LINK_IN record sharing
    /// `*link_cell`'s id (allocating one if `*link_cell` is still 0). The
    /// matching LINK_OUT is emitted when the guard drops.
    pub fn trace_begin_linked(&self, name: &'static str, link_cell: &mut u16) -> DurationGuard<'_, P> {
        let mut guard = self.trace_begin(name);
        if guard.is_active() {
            let link_id = self.flow.allocate_or_reuse(link_cell);
            self.write_link(LinkDirection::In, link_id);
            *guard.link_id_mut() = Some(link_id);
        }
        guard
    }

    fn end_duration(&self, active: &ActiveDuration) {
        let _permit = match self.gate.enter() {
            Some(permit) => permit,
            None => return,
        };
        let duration_micros = self
            .platform
            .now_micros()
            .saturating_sub(active.begin_timestamp)
            .min(u32::MAX as u64) as u32;
        let colored = active.color != Color::Undefined;
        let kind = if colored {
            RecordKind::DurationColored
        } else {
            RecordKind::Duration
        };
        let size = KIND_SIZES[kind as usize];
        let offset = self.ring.reserve(size);
        unsafe {
            self.ring.write_slot(offset, size, |slot| {
                codec::write_duration(
                    slot,
                    colored,
                    active.cpu_id,
                    active.task_id,
                    active.color,
                    duration_micros,
                    active.begin_timestamp,
                    active.name,
                );
            });
        }
        if let Some(link_id) = active.link_id {
            self.write_link(LinkDirection::Out, link_id);
        }
    }

    pub fn trace_instant(&self, name: &'static str) {
        self.trace_instant_colored(name, Color::Undefined);
    }

    pub fn trace_instant_colored(&self, name: &'static str, color: Color) {
        let _permit = match self.gate.enter() {
            Some(permit) => permit,
            None => return,
        };
        let (cpu_id, task_id) = self.header_ids();
        let timestamp = self.platform.now_micros();
        let size = KIND_SIZES[RecordKind::InstantColored as usize];
        let offset = self.ring.reserve(size);
        unsafe {
            self.ring.write_slot(offset, size, |slot| {
                codec::write_instant_colored(slot, cpu_id, task_id, color, timestamp, name);
            });
        }
    }

    /// Emits an INSTANT_COLORED record at `now`, optionally tying it into a
    /// flow on both ends: a nonzero `link_in` emits a standalone LINK(IN,
    /// link_in), and `link_out_cell` is always allocated-or-reused and
    /// emits a matching LINK(OUT), mirroring [`Core::trace_begin_linked`]'s
    /// allocation pattern.
    pub fn trace_instant_linked(
        &self,
        name: &'static str,
        link_in: u16,
        link_out_cell: &mut u16,
        color: Color,
    ) {
        {
            let _permit = match self.gate.enter() {
                Some(permit) => permit,
                None => return,
            };
            let (cpu_id, task_id) = self.header_ids();
            let timestamp = self.platform.now_micros();
            let size = KIND_SIZES[RecordKind::InstantColored as usize];
            let offset = self.ring.reserve(size);
            unsafe {
                self.ring.write_slot(offset, size, |slot| {
                    codec::write_instant_colored(slot, cpu_id, task_id, color, timestamp, name);
                });
            }
        }
        if link_in != 0 {
            self.write_link(LinkDirection::In, link_in);
        }
        let link_out = self.flow.allocate_or_reuse(link_out_cell);
        self.write_link(LinkDirection::Out, link_out);
    }

    pub fn trace_counter(&self, name: &'static str, value: i32) {
        let _permit = match self.gate.enter() {
            Some(permit) => permit,
            None => return,
        };
        let (cpu_id, task_id) = self.header_ids();
        let timestamp = self.platform.now_micros();
        let size = KIND_SIZES[RecordKind::Counter as usize];
        let offset = self.ring.reserve(size);
        unsafe {
            self.ring.write_slot(offset, size, |slot| {
                codec::write_counter(slot, cpu_id, task_id, value, timestamp, name);
            });
        }
    }

    fn write_link(&self, direction: LinkDirection, link_id: u16) {
        let _permit = match self.gate.enter() {
            Some(permit) => permit,
            None => return,
        };
        let (cpu_id, task_id) = self.header_ids();
        let timestamp = self.platform.now_micros();
        let size = KIND_SIZES[RecordKind::Link as usize];
        let offset = self.ring.reserve(size);
        unsafe {
            self.ring.write_slot(offset, size, |slot| {
                codec::write_link(slot, cpu_id, task_id, direction, link_id, timestamp);
            });
        }
    }

    /// Emits a standalone LINK_IN record (not tied to a duration scope),
    /// e.g. to mark a message handed off to another task or core.
    pub fn trace_flow_in(&self, link_cell: &mut u16) {
        let link_id = self.flow.allocate_or_reuse(link_cell);
        self.write_link(LinkDirection::In, link_id);
    }

    pub fn trace_flow_out(&self, link_cell: &mut u16) {
        let link_id = self.flow.allocate_or_reuse(link_cell);
        self.write_link(LinkDirection::Out, link_id);
    }

    /// Records a scheduler task-switch boundary. `into = true` marks the
    /// task becoming current; `into = false` marks it yielding the CPU.
    pub fn trace_task_switch(&self, into: bool) {
        let _permit = match self.gate.enter() {
            Some(permit) => permit,
            None => return,
        };
        let (cpu_id, task_id) = self.header_ids();
        let timestamp = self.platform.now_micros();
        let kind = if into {
            RecordKind::TaskSwitchIn
        } else {
            RecordKind::TaskSwitchOut
        };
        let size = KIND_SIZES[kind as usize];
        let offset = self.ring.reserve(size);
        unsafe {
            self.ring.write_slot(offset, size, |slot| {
                codec::write_task_switch(slot, into, cpu_id, task_id, timestamp);
            });
        }
    }
}

struct ActiveDuration {
    name: &'static str,
    color: Color,
    cpu_id: u8,
    task_id: u8,
    begin_timestamp: u64,
    link_id: Option<u16>,
}

/// Scoped duration handle. Emits its DURATION record when dropped, covering
/// every exit path (return, `?`, panic-driven unwind) the way a
/// caller-managed begin/end pair cannot.
pub struct DurationGuard<'a, P: Platform> {
    core: &'a Core<P>,
    active: Option<ActiveDuration>,
}

impl<'a, P: Platform> DurationGuard<'a, P> {
    fn active(
        core: &'a Core<P>,
        name: &'static str,
        color: Color,
        cpu_id: u8,
        task_id: u8,
        begin_timestamp: u64,
    ) -> Self {
        Self {
            core,
            active: Some(ActiveDuration {
                name,
                color,
                cpu_id,
                task_id,
                begin_timestamp,
                link_id: None,
            }),
        }
    }

    fn inactive(core: &'a Core<P>) -> Self {
        Self { core, active: None }
    }

    /// `false` when the tracer was disabled at the moment this scope began;
    /// such a guard's drop is a no-op.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    fn link_id_mut(&mut self) -> &mut Option<u16> {
        &mut self.active.as_mut().expect("guard is active").link_id
    }
}

impl<P: Platform> Drop for DurationGuard<'_, P> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            self.core.end_duration(&active);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::test_support::TestPlatform;

    fn new_core(buffer_size: usize) -> Core<TestPlatform> {
        let config = crate::config::TracerConfig::default().with_buffer_size(buffer_size);
        Core::new(TestPlatform::new(), &config).unwrap()
    }

    #[test]
    fn disabled_gate_drops_every_write() {
        let core = new_core(4096);
        core.trace_instant("never-recorded");
        core.trace_counter("q", 1);
        {
            let _g = core.trace_begin("scope");
        }
        let (head, tail) = core.ring.head_tail();
        assert_eq!((head, tail), (0, 0));
    }

    #[test]
    fn enabled_duration_scope_writes_on_drop() {
        let core = new_core(4096);
        core.gate.open();
        let platform = core.platform();
        platform.set_now(100);
        {
            let _g = core.trace_begin("scope");
            platform.advance(50);
        }
        let (_head, tail) = core.ring.head_tail();
        assert_eq!(tail, KIND_SIZES[RecordKind::Duration as usize]);
    }

    #[test]
    fn instant_and_counter_each_write_one_record() {
        let core = new_core(4096);
        core.gate.open();
        core.trace_instant_colored("tick", Color::Green);
        core.trace_counter("queue_depth", 7);
        let (_head, tail) = core.ring.head_tail();
        assert_eq!(
            tail,
            KIND_SIZES[RecordKind::InstantColored as usize] + KIND_SIZES[RecordKind::Counter as usize]
        );
    }

    #[test]
    fn linked_duration_emits_in_and_out() {
        let core = new_core(4096);
        core.gate.open();
        let mut link_cell = 0u16;
        {
            let _g = core.trace_begin_linked("handoff", &mut link_cell);
        }
        assert_ne!(link_cell, 0);
        let (_head, tail) = core.ring.head_tail();
        let expected = KIND_SIZES[RecordKind::Link as usize] * 2 + KIND_SIZES[RecordKind::Duration as usize];
        assert_eq!(tail, expected);
    }

    #[test]
    fn linked_instant_emits_in_and_out() {
        let core = new_core(4096);
        core.gate.open();
        let mut link_out_cell = 0u16;
        core.trace_instant_linked("event", 0, &mut link_out_cell, Color::Undefined);
        assert_ne!(link_out_cell, 0);
        let (_head, tail) = core.ring.head_tail();
        let expected = KIND_SIZES[RecordKind::InstantColored as usize] + KIND_SIZES[RecordKind::Link as usize];
        assert_eq!(tail, expected);

        let mut second_cell = 0u16;
        core.trace_instant_linked("event2", link_out_cell, &mut second_cell, Color::Undefined);
        let (_head, tail2) = core.ring.head_tail();
        let expected2 = expected
            + KIND_SIZES[RecordKind::InstantColored as usize]
            + KIND_SIZES[RecordKind::Link as usize] * 2;
        assert_eq!(tail2, expected2, "nonzero link_in also emits a LINK(IN) record");
    }

    #[test]
    fn task_switch_records_kind_matches_direction() {
        let core = new_core(4096);
        core.gate.open();
        core.trace_task_switch(true);
        core.trace_task_switch(false);
        let (_head, tail) = core.ring.head_tail();
        assert_eq!(
            tail,
            KIND_SIZES[RecordKind::TaskSwitchIn as usize] + KIND_SIZES[RecordKind::TaskSwitchOut as usize]
        );
    }

    #[test]
    fn isr_writer_is_attributed_to_reserved_task_id() {
        let core = new_core(4096);
        core.gate.open();
        core.platform().set_isr(true);
        core.trace_instant("from-isr");
        assert_eq!(core.registry.len(), 0, "ISR writes must never allocate a task id");
    }
}
