//! Host device, buffers, queues, and transform plans.

use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use rustfft::{Fft, FftPlanner};

use beamfft_core::device::{
    AccessMode, CommandQueue, CompletionEvent, ComputeDevice, DeviceBuffer, DeviceKernel,
    DeviceProgram, EventSignal, KernelArg, StageTiming, TransformPlan,
};
use beamfft_core::error::{BeamFftError, Result};
use beamfft_core::types::Complex32;

use crate::kernels;

/// Configuration for the simulated device.
#[derive(Clone, Debug)]
pub struct HostDeviceConfig {
    /// Simulated device memory capacity in bytes.
    pub memory_bytes: u64,
    /// Maximum concurrently usable command queues.
    pub max_queues: usize,
}

impl Default for HostDeviceConfig {
    fn default() -> Self {
        Self {
            memory_bytes: 2 * 1024 * 1024 * 1024,
            max_queues: 4,
        }
    }
}

/// Shared mutable device state. Buffers hold a reference so deallocation is
/// accounted on drop.
struct DeviceState {
    config: HostDeviceConfig,
    allocated: AtomicU64,
    alloc_count: AtomicU64,
    next_program_id: AtomicU64,
    pending_faults: Mutex<HashSet<String>>,
}

impl DeviceState {
    fn take_fault(&self, kernel: &str) -> bool {
        self.pending_faults.lock().remove(kernel)
    }
}

/// A CPU-backed implementation of the device seam.
pub struct HostDevice {
    state: Arc<DeviceState>,
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDevice {
    /// Create a device with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HostDeviceConfig::default())
    }

    /// Create a device with an explicit configuration.
    #[must_use]
    pub fn with_config(config: HostDeviceConfig) -> Self {
        Self {
            state: Arc::new(DeviceState {
                config,
                allocated: AtomicU64::new(0),
                alloc_count: AtomicU64::new(0),
                next_program_id: AtomicU64::new(0),
                pending_faults: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Create a device with a specific simulated memory capacity.
    #[must_use]
    pub fn with_memory(memory_bytes: u64) -> Self {
        Self::with_config(HostDeviceConfig {
            memory_bytes,
            ..HostDeviceConfig::default()
        })
    }

    /// Total buffer allocations performed since creation.
    #[must_use]
    pub fn allocation_count(&self) -> u64 {
        self.state.alloc_count.load(Ordering::Relaxed)
    }

    /// Bytes currently allocated.
    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        self.state.allocated.load(Ordering::Relaxed)
    }

    /// Make the next launch of the named kernel fail with an execution
    /// error. Testing support for the partial-failure path.
    pub fn fail_next_launch(&self, kernel: &str) {
        self.state.pending_faults.lock().insert(kernel.to_string());
    }
}

impl ComputeDevice for HostDevice {
    fn name(&self) -> &str {
        "host"
    }

    fn total_memory(&self) -> u64 {
        self.state.config.memory_bytes
    }

    fn available_memory(&self) -> u64 {
        self.state
            .config
            .memory_bytes
            .saturating_sub(self.state.allocated.load(Ordering::Relaxed))
    }

    fn max_concurrent_queues(&self) -> usize {
        self.state.config.max_queues
    }

    fn compile_program(&self, source: &str) -> Result<Arc<dyn DeviceProgram>> {
        let entries = parse_entry_points(source);
        if entries.is_empty() {
            return Err(BeamFftError::compile(
                "source text declares no kernel entry points",
            ));
        }
        let id = self.state.next_program_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(id, entries = entries.len(), "compiled host program");
        Ok(Arc::new(HostProgram { id, entries }))
    }

    fn alloc_buffer(&self, len_bytes: usize, access: AccessMode) -> Result<Arc<dyn DeviceBuffer>> {
        // Word-aligned storage so POD views of 32-bit records are always valid.
        let words = len_bytes.div_ceil(4);
        let charged = (words * 4) as u64;

        let available = self.available_memory();
        if charged > available {
            return Err(BeamFftError::Allocation {
                requested: len_bytes,
                available: available as usize,
            });
        }

        self.state.allocated.fetch_add(charged, Ordering::Relaxed);
        self.state.alloc_count.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(len_bytes, ?access, "allocated host buffer");

        Ok(Arc::new(HostBuffer {
            words: RwLock::new(vec![0u32; words]),
            len_bytes: words * 4,
            access,
            state: Arc::clone(&self.state),
        }))
    }

    fn create_queue(&self) -> Result<Arc<dyn CommandQueue>> {
        Ok(Arc::new(HostQueue::spawn(Arc::clone(&self.state))))
    }

    fn create_transform_plan(
        &self,
        transform_size: usize,
        batch_width: usize,
    ) -> Result<Arc<dyn TransformPlan>> {
        if transform_size < 2 || !transform_size.is_power_of_two() {
            return Err(BeamFftError::config(format!(
                "transform size must be a power of two >= 2, got {transform_size}"
            )));
        }
        if batch_width == 0 {
            return Err(BeamFftError::config("transform batch width must be nonzero"));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(transform_size);
        let scratch_len = fft.get_inplace_scratch_len();
        tracing::debug!(transform_size, batch_width, "built host transform plan");

        Ok(Arc::new(HostTransformPlan {
            transform_size,
            batch_width,
            fft,
            scratch_len,
        }))
    }
}

/// Extract `__kernel void <name>` entry points from opaque source text.
fn parse_entry_points(source: &str) -> HashSet<String> {
    let mut entries = HashSet::new();
    let mut rest = source;
    while let Some(pos) = rest.find("__kernel") {
        rest = &rest[pos + "__kernel".len()..];
        let Some(void_pos) = rest.find("void") else {
            break;
        };
        let after = rest[void_pos + 4..].trim_start();
        let name: String = after
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if !name.is_empty() {
            entries.insert(name);
        }
    }
    entries
}

struct HostProgram {
    id: u64,
    entries: HashSet<String>,
}

impl DeviceProgram for HostProgram {
    fn id(&self) -> u64 {
        self.id
    }

    fn create_kernel(&self, name: &str) -> Result<Arc<dyn DeviceKernel>> {
        if !self.entries.contains(name) {
            return Err(BeamFftError::compile(format!(
                "program has no kernel entry '{name}'"
            )));
        }
        if !kernels::is_known(name) {
            return Err(BeamFftError::compile(format!(
                "host backend has no implementation for kernel '{name}'"
            )));
        }
        Ok(Arc::new(HostKernel {
            name: name.to_string(),
        }))
    }
}

struct HostKernel {
    name: String,
}

impl DeviceKernel for HostKernel {
    fn name(&self) -> &str {
        &self.name
    }
}

/// A word-aligned region of simulated device memory.
pub(crate) struct HostBuffer {
    words: RwLock<Vec<u32>>,
    len_bytes: usize,
    access: AccessMode,
    state: Arc<DeviceState>,
}

impl HostBuffer {
    /// Read access to the raw words.
    pub(crate) fn words(&self) -> parking_lot::RwLockReadGuard<'_, Vec<u32>> {
        self.words.read()
    }

    /// Write access to the raw words.
    pub(crate) fn words_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Vec<u32>> {
        self.words.write()
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        self.state
            .allocated
            .fetch_sub(self.len_bytes as u64, Ordering::Relaxed);
    }
}

impl DeviceBuffer for HostBuffer {
    fn len_bytes(&self) -> usize {
        self.len_bytes
    }

    fn access(&self) -> AccessMode {
        self.access
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        if offset + data.len() > self.len_bytes {
            return Err(BeamFftError::device(format!(
                "write of {} bytes at offset {offset} exceeds buffer of {} bytes",
                data.len(),
                self.len_bytes
            )));
        }
        let mut words = self.words.write();
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(words.as_mut_slice());
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        if offset + out.len() > self.len_bytes {
            return Err(BeamFftError::device(format!(
                "read of {} bytes at offset {offset} exceeds buffer of {} bytes",
                out.len(),
                self.len_bytes
            )));
        }
        let words = self.words.read();
        let bytes: &[u8] = bytemuck::cast_slice(words.as_slice());
        out.copy_from_slice(&bytes[offset..offset + out.len()]);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct HostTransformPlan {
    transform_size: usize,
    batch_width: usize,
    fft: Arc<dyn Fft<f32>>,
    scratch_len: usize,
}

impl TransformPlan for HostTransformPlan {
    fn transform_size(&self) -> usize {
        self.transform_size
    }

    fn batch_width(&self) -> usize {
        self.batch_width
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One unit of work on a queue's worker thread.
struct WorkItem {
    wait: Vec<CompletionEvent>,
    signal: EventSignal,
    run: Box<dyn FnOnce() -> Result<()> + Send>,
}

/// An ordered execution lane backed by one worker thread.
pub(crate) struct HostQueue {
    sender: Mutex<Option<Sender<WorkItem>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    state: Arc<DeviceState>,
}

impl HostQueue {
    fn spawn(state: Arc<DeviceState>) -> Self {
        let (sender, receiver) = channel::<WorkItem>();
        let worker = std::thread::Builder::new()
            .name("beamfft-queue".to_string())
            .spawn(move || {
                'items: for WorkItem { wait, signal, run } in receiver {
                    for dep in &wait {
                        if let Err(e) = dep.wait() {
                            signal.complete(Err(BeamFftError::execution(format!(
                                "predecessor stage failed: {e}"
                            ))));
                            continue 'items;
                        }
                    }
                    let start = Instant::now();
                    let result = run();
                    let end = Instant::now();
                    signal.complete(result.map(|()| StageTiming { start, end }));
                }
            })
            .expect("spawning queue worker thread");

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            state,
        }
    }

    fn submit(
        &self,
        wait: &[CompletionEvent],
        run: Box<dyn FnOnce() -> Result<()> + Send>,
    ) -> Result<CompletionEvent> {
        let (event, signal) = CompletionEvent::pending();
        let item = WorkItem {
            wait: wait.to_vec(),
            signal,
            run,
        };
        let sender = self.sender.lock();
        sender
            .as_ref()
            .ok_or_else(|| BeamFftError::device("queue is shut down"))?
            .send(item)
            .map_err(|_| BeamFftError::device("queue worker exited"))?;
        Ok(event)
    }
}

impl Drop for HostQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl CommandQueue for HostQueue {
    fn enqueue_kernel(
        &self,
        kernel: &Arc<dyn DeviceKernel>,
        global_size: usize,
        args: Vec<KernelArg>,
        wait: &[CompletionEvent],
    ) -> Result<CompletionEvent> {
        let name = kernel.name().to_string();
        // Binding failures surface synchronously, before anything is queued.
        kernels::validate_args(&name, &args)?;

        let state = Arc::clone(&self.state);
        self.submit(
            wait,
            Box::new(move || {
                if state.take_fault(&name) {
                    return Err(BeamFftError::execution(format!(
                        "injected fault in kernel '{name}'"
                    )));
                }
                kernels::dispatch(&name, global_size, &args)
            }),
        )
    }

    fn enqueue_transform(
        &self,
        plan: &Arc<dyn TransformPlan>,
        buffer: &Arc<dyn DeviceBuffer>,
        wait: &[CompletionEvent],
    ) -> Result<CompletionEvent> {
        let plan = Arc::clone(plan);
        let buffer = Arc::clone(buffer);
        self.submit(
            wait,
            Box::new(move || {
                let plan = plan
                    .as_any()
                    .downcast_ref::<HostTransformPlan>()
                    .ok_or_else(|| BeamFftError::device("foreign transform plan"))?;
                let host = buffer
                    .as_any()
                    .downcast_ref::<HostBuffer>()
                    .ok_or_else(|| BeamFftError::device("foreign buffer"))?;

                let needed =
                    plan.batch_width * plan.transform_size * std::mem::size_of::<Complex32>();
                if host.len_bytes() < needed {
                    return Err(BeamFftError::execution(format!(
                        "transform needs {needed} bytes, buffer has {}",
                        host.len_bytes()
                    )));
                }

                let mut words = host.words_mut();
                let total_words = plan.batch_width * plan.transform_size * 2;
                let samples: &mut [num_complex::Complex<f32>] =
                    bytemuck::cast_slice_mut(&mut words[..total_words]);
                let mut scratch = vec![num_complex::Complex::default(); plan.scratch_len];
                for row in samples.chunks_exact_mut(plan.transform_size) {
                    plan.fft.process_with_scratch(row, &mut scratch);
                }
                Ok(())
            }),
        )
    }

    fn enqueue_fill_zero(
        &self,
        buffer: &Arc<dyn DeviceBuffer>,
        wait: &[CompletionEvent],
    ) -> Result<CompletionEvent> {
        let buffer = Arc::clone(buffer);
        self.submit(
            wait,
            Box::new(move || {
                let host = buffer
                    .as_any()
                    .downcast_ref::<HostBuffer>()
                    .ok_or_else(|| BeamFftError::device("foreign buffer"))?;
                host.words_mut().fill(0);
                Ok(())
            }),
        )
    }

    fn synchronize(&self) -> Result<()> {
        let event = self.submit(&[], Box::new(|| Ok(())))?;
        event.wait().map(|_| ())
    }
}
