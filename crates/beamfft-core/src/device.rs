//! Device abstraction: programs, buffers, command queues, and events.
//!
//! This is the boundary between the scheduler and whatever executes the
//! work. A backend provides:
//!
//! - [`ComputeDevice`] — compiles programs, allocates buffers, creates
//!   command queues and transform plans, and answers capability queries
//!   (total/available memory, maximum concurrent queues).
//! - [`CommandQueue`] — an independent, ordered execution lane. Submissions
//!   never block; each returns a [`CompletionEvent`]. Work on one queue runs
//!   in submission order; work on different queues has no ordering
//!   relationship.
//! - [`DeviceBuffer`] — a byte-addressed region of device memory with an
//!   access mode. Owning buffers are freed with their last handle.
//! - [`TransformPlan`] — an opaque handle to the forward-transform primitive,
//!   bound to one (transform length, batch width) pair.
//!
//! Completion events carry device-reported start/end timestamps on success
//! and the failure detail on error, so the same object drives both
//! synchronization and profiling.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::{BeamFftError, Result};

/// Access mode of a device buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    /// Kernels may only read the buffer.
    ReadOnly,
    /// Kernels may only write the buffer.
    WriteOnly,
    /// Kernels may read and write the buffer.
    ReadWrite,
}

/// An argument bound to a kernel launch.
#[derive(Clone)]
pub enum KernelArg {
    /// A device buffer.
    Buffer(Arc<dyn DeviceBuffer>),
    /// A 32-bit unsigned scalar.
    U32(u32),
    /// A 32-bit float scalar.
    F32(f32),
}

impl std::fmt::Debug for KernelArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffer(b) => write!(f, "Buffer({} bytes)", b.len_bytes()),
            Self::U32(v) => write!(f, "U32({v})"),
            Self::F32(v) => write!(f, "F32({v})"),
        }
    }
}

/// Device-reported start/end timestamps for one completed work item.
#[derive(Clone, Copy, Debug)]
pub struct StageTiming {
    /// When the work item started executing.
    pub start: Instant,
    /// When the work item finished.
    pub end: Instant,
}

impl StageTiming {
    /// Elapsed execution time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.end.duration_since(self.start).as_secs_f64() * 1000.0
    }
}

/// Shared state behind a completion event.
struct EventState {
    outcome: Mutex<Option<Result<StageTiming>>>,
    done: Condvar,
}

/// A completion event for one submitted work item.
///
/// Cloning is cheap; all clones observe the same completion. The completing
/// side holds the paired [`EventSignal`].
#[derive(Clone)]
pub struct CompletionEvent {
    state: Arc<EventState>,
}

impl CompletionEvent {
    /// Create a pending event and the signal that completes it.
    #[must_use]
    pub fn pending() -> (Self, EventSignal) {
        let state = Arc::new(EventState {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        });
        (
            Self {
                state: Arc::clone(&state),
            },
            EventSignal { state },
        )
    }

    /// An event that is already complete with zero elapsed time.
    #[must_use]
    pub fn ready() -> Self {
        let now = Instant::now();
        let (event, signal) = Self::pending();
        signal.complete(Ok(StageTiming {
            start: now,
            end: now,
        }));
        event
    }

    /// Whether the work item has completed (successfully or not).
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state.outcome.lock().is_some()
    }

    /// Block until the work item completes, returning its timing.
    pub fn wait(&self) -> Result<StageTiming> {
        let mut outcome = self.state.outcome.lock();
        while outcome.is_none() {
            self.state.done.wait(&mut outcome);
        }
        outcome
            .as_ref()
            .cloned()
            .unwrap_or_else(|| Err(BeamFftError::device("event completed without an outcome")))
    }
}

impl std::fmt::Debug for CompletionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionEvent")
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// The completing side of a [`CompletionEvent`]. Held by the backend.
pub struct EventSignal {
    state: Arc<EventState>,
}

impl EventSignal {
    /// Complete the event with the given outcome and wake all waiters.
    pub fn complete(self, outcome: Result<StageTiming>) {
        *self.state.outcome.lock() = Some(outcome);
        self.state.done.notify_all();
    }
}

/// A region of device memory.
pub trait DeviceBuffer: Send + Sync {
    /// Length of the buffer in bytes.
    fn len_bytes(&self) -> usize;

    /// Access mode the buffer was allocated with.
    fn access(&self) -> AccessMode;

    /// Copy host data into the buffer at a byte offset.
    fn write(&self, offset: usize, data: &[u8]) -> Result<()>;

    /// Copy buffer contents into host memory from a byte offset.
    fn read(&self, offset: usize, out: &mut [u8]) -> Result<()>;

    /// Downcast support for backends.
    fn as_any(&self) -> &dyn Any;
}

/// Write a slice of POD values into a buffer at a byte offset.
pub fn write_slice<T: bytemuck::Pod>(
    buffer: &dyn DeviceBuffer,
    offset: usize,
    data: &[T],
) -> Result<()> {
    buffer.write(offset, bytemuck::cast_slice(data))
}

/// Read `count` POD values from a buffer at a byte offset.
pub fn read_vec<T: bytemuck::Pod + Default + Clone>(
    buffer: &dyn DeviceBuffer,
    offset: usize,
    count: usize,
) -> Result<Vec<T>> {
    let mut out = vec![T::default(); count];
    buffer.read(offset, bytemuck::cast_slice_mut(&mut out))?;
    Ok(out)
}

/// A kernel entry point within a compiled program.
pub trait DeviceKernel: Send + Sync {
    /// The entry-point name.
    fn name(&self) -> &str;
}

/// A compiled device program.
pub trait DeviceProgram: Send + Sync {
    /// Backend-assigned identity, stable for the program's lifetime.
    fn id(&self) -> u64;

    /// Create a handle to a kernel entry point.
    ///
    /// Fails with a compilation error if the program has no such entry.
    fn create_kernel(&self, name: &str) -> Result<Arc<dyn DeviceKernel>>;
}

/// An opaque forward-transform plan bound to one shape.
pub trait TransformPlan: Send + Sync {
    /// Per-row transform length.
    fn transform_size(&self) -> usize;

    /// Number of rows transformed per invocation.
    fn batch_width(&self) -> usize;

    /// Downcast support for backends.
    fn as_any(&self) -> &dyn Any;
}

/// An independent, ordered execution lane on the device.
pub trait CommandQueue: Send + Sync {
    /// Submit a kernel launch. Returns immediately.
    ///
    /// `wait` lists events that must complete before the launch executes;
    /// work on the same queue additionally executes in submission order.
    /// An argument-binding failure is reported synchronously as an
    /// execution error.
    fn enqueue_kernel(
        &self,
        kernel: &Arc<dyn DeviceKernel>,
        global_size: usize,
        args: Vec<KernelArg>,
        wait: &[CompletionEvent],
    ) -> Result<CompletionEvent>;

    /// Submit an in-place forward transform over the plan's full batch width.
    fn enqueue_transform(
        &self,
        plan: &Arc<dyn TransformPlan>,
        buffer: &Arc<dyn DeviceBuffer>,
        wait: &[CompletionEvent],
    ) -> Result<CompletionEvent>;

    /// Submit a zero fill of an entire buffer.
    fn enqueue_fill_zero(
        &self,
        buffer: &Arc<dyn DeviceBuffer>,
        wait: &[CompletionEvent],
    ) -> Result<CompletionEvent>;

    /// Block until every submitted item on this queue has completed.
    fn synchronize(&self) -> Result<()>;
}

/// The device itself: compiler, allocator, and capability queries.
pub trait ComputeDevice: Send + Sync {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Total device memory in bytes.
    fn total_memory(&self) -> u64;

    /// Currently available device memory in bytes.
    fn available_memory(&self) -> u64;

    /// Maximum number of concurrently usable command queues.
    fn max_concurrent_queues(&self) -> usize;

    /// Compile a device program from opaque source text.
    fn compile_program(&self, source: &str) -> Result<Arc<dyn DeviceProgram>>;

    /// Allocate a device buffer.
    fn alloc_buffer(&self, len_bytes: usize, access: AccessMode) -> Result<Arc<dyn DeviceBuffer>>;

    /// Create a new command queue.
    fn create_queue(&self) -> Result<Arc<dyn CommandQueue>>;

    /// Create a forward-transform plan for one (length, batch width) pair.
    fn create_transform_plan(
        &self,
        transform_size: usize,
        batch_width: usize,
    ) -> Result<Arc<dyn TransformPlan>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_event_completes_across_threads() {
        let (event, signal) = CompletionEvent::pending();
        assert!(!event.is_complete());

        let waiter = event.clone();
        let handle = thread::spawn(move || waiter.wait());

        thread::sleep(Duration::from_millis(5));
        let start = Instant::now();
        signal.complete(Ok(StageTiming {
            start,
            end: start + Duration::from_millis(3),
        }));

        let timing = handle.join().unwrap().unwrap();
        assert!(timing.elapsed_ms() >= 2.9);
        assert!(event.is_complete());
    }

    #[test]
    fn test_event_propagates_failure_to_all_clones() {
        let (event, signal) = CompletionEvent::pending();
        let other = event.clone();
        signal.complete(Err(BeamFftError::execution("boom")));

        assert!(matches!(event.wait(), Err(BeamFftError::Execution(_))));
        assert!(matches!(other.wait(), Err(BeamFftError::Execution(_))));
    }

    #[test]
    fn test_ready_event_is_immediate() {
        let event = CompletionEvent::ready();
        assert!(event.is_complete());
        let timing = event.wait().unwrap();
        assert!(timing.elapsed_ms() < 1.0);
    }
}
