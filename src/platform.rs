//! Trait seam standing in for the target RTOS/ISR primitives.
//!
//! `spec.md` describes a timestamp source, a CPU identity and a task
//! identity that the platform (FreeRTOS/ESP-IDF on the real target) provides
//! cheaply from any context, including interrupt handlers. `tracecore` keeps
//! the ring buffer, codec and writer logic generic over these primitives via
//! the [`Platform`] trait so the crate builds and tests on `std`; a real
//! embedded target implements `Platform` over its own timer and scheduler.
//!
//! This mirrors the teacher's own isolation of syscall access behind
//! `crate::ffi` rather than calling `libc` directly from every operation.

use std::time::Instant;

/// Identifies one CPU core. The header's `cpu_id` field is a single bit, so
/// only values `0` and `1` are meaningful on the wire.
pub type CpuId = u8;

/// A platform-supplied handle identifying the calling task. Only equality
/// matters to `tracecore`; the platform assigns and owns the handle.
pub trait TaskHandle: Copy + Eq + std::hash::Hash + std::fmt::Debug + Send + 'static {}
impl<T: Copy + Eq + std::hash::Hash + std::fmt::Debug + Send + 'static> TaskHandle for T {}

/// Everything the writer core needs from the execution environment.
pub trait Platform: Send + Sync + 'static {
    /// Opaque per-task handle type (e.g. a FreeRTOS `TaskHandle_t`).
    type Task: TaskHandle;

    /// Monotonic timestamp in microseconds since an arbitrary epoch. Must be
    /// cheap to read from interrupt context.
    fn now_micros(&self) -> u64;

    /// Identifies the CPU core the caller is currently running on.
    fn current_cpu(&self) -> CpuId;

    /// `true` if the caller is executing in interrupt context.
    fn in_isr(&self) -> bool;

    /// The platform task handle for the calling task. Only meaningful when
    /// [`Platform::in_isr`] is `false`.
    fn current_task(&self) -> Self::Task;

    /// Human-readable label for a task, used only by the snapshot
    /// serializer. Defaults to the handle's `Debug` representation.
    fn task_name(&self, task: &Self::Task) -> String {
        format!("{task:?}")
    }
}

/// Default `std`-backed platform: wall-clock-derived monotonic timestamps,
/// the calling OS thread as the "task", and a single logical CPU. Suitable
/// for host-side testing and for environments without real ISR concurrency.
pub struct StdPlatform {
    epoch: Instant,
}

impl Default for StdPlatform {
    fn default() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Platform for StdPlatform {
    type Task = std::thread::ThreadId;

    fn now_micros(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    fn current_cpu(&self) -> CpuId {
        0
    }

    fn in_isr(&self) -> bool {
        false
    }

    fn current_task(&self) -> Self::Task {
        std::thread::current().id()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
    use std::sync::Mutex;

    /// A fully scriptable fake platform used to drive the property tests in
    /// `spec.md` §8 deterministically (no real clock or OS thread jitter).
    pub struct TestPlatform {
        clock: AtomicU64,
        cpu: AtomicU8,
        isr: AtomicBool,
        task: Mutex<u32>,
    }

    impl TestPlatform {
        pub fn new() -> Self {
            Self {
                clock: AtomicU64::new(0),
                cpu: AtomicU8::new(0),
                isr: AtomicBool::new(false),
                task: Mutex::new(1),
            }
        }

        pub fn set_now(&self, t: u64) {
            self.clock.store(t, Ordering::SeqCst);
        }

        pub fn advance(&self, delta: u64) -> u64 {
            self.clock.fetch_add(delta, Ordering::SeqCst) + delta
        }

        pub fn set_cpu(&self, cpu: CpuId) {
            self.cpu.store(cpu, Ordering::SeqCst);
        }

        pub fn set_isr(&self, isr: bool) {
            self.isr.store(isr, Ordering::SeqCst);
        }

        pub fn set_task(&self, task: u32) {
            *self.task.lock().unwrap() = task;
        }
    }

    impl Platform for TestPlatform {
        type Task = u32;

        fn now_micros(&self) -> u64 {
            self.clock.load(Ordering::SeqCst)
        }

        fn current_cpu(&self) -> CpuId {
            self.cpu.load(Ordering::SeqCst)
        }

        fn in_isr(&self) -> bool {
            self.isr.load(Ordering::SeqCst)
        }

        fn current_task(&self) -> Self::Task {
            *self.task.lock().unwrap()
        }
    }
}
