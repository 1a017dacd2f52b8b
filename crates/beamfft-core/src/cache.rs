//! Program and kernel resource cache.
//!
//! Compiling a device program is the most expensive setup step, so compiled
//! programs are cached by a SHA-256 content hash of their source text and
//! kernel handles by (program id, entry name). Both lookups are idempotent
//! and safe under concurrent callers; each map sits behind its own lock.
//!
//! Compilation failure is not retried: the source is deterministic, so the
//! same input would fail identically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::device::{ComputeDevice, DeviceKernel, DeviceProgram};
use crate::error::Result;

/// Hit/miss counters for the cache, exposed for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Program lookups served from the cache.
    pub program_hits: u64,
    /// Program lookups that required compilation.
    pub program_misses: u64,
    /// Kernel lookups served from the cache.
    pub kernel_hits: u64,
    /// Kernel lookups that required handle creation.
    pub kernel_misses: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "programs {}/{} hit, kernels {}/{} hit",
            self.program_hits,
            self.program_hits + self.program_misses,
            self.kernel_hits,
            self.kernel_hits + self.kernel_misses,
        )
    }
}

/// Thread-safe cache of compiled programs and kernel handles.
pub struct ResourceCache {
    device: Arc<dyn ComputeDevice>,
    programs: Mutex<HashMap<String, Arc<dyn DeviceProgram>>>,
    kernels: Mutex<HashMap<(u64, String), Arc<dyn DeviceKernel>>>,
    program_hits: AtomicU64,
    program_misses: AtomicU64,
    kernel_hits: AtomicU64,
    kernel_misses: AtomicU64,
}

impl ResourceCache {
    /// Create a cache bound to one device.
    #[must_use]
    pub fn new(device: Arc<dyn ComputeDevice>) -> Self {
        Self {
            device,
            programs: Mutex::new(HashMap::new()),
            kernels: Mutex::new(HashMap::new()),
            program_hits: AtomicU64::new(0),
            program_misses: AtomicU64::new(0),
            kernel_hits: AtomicU64::new(0),
            kernel_misses: AtomicU64::new(0),
        }
    }

    /// SHA-256 of the source text as a lowercase hex string.
    #[must_use]
    pub fn hash_source(source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Compile a program, or return the cached handle for identical source.
    pub fn compile_or_get(&self, source: &str) -> Result<Arc<dyn DeviceProgram>> {
        let key = Self::hash_source(source);
        let mut programs = self.programs.lock();

        if let Some(program) = programs.get(&key) {
            self.program_hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(hash = &key[..8], "program cache hit");
            return Ok(Arc::clone(program));
        }

        self.program_misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(hash = &key[..8], "program cache miss, compiling");
        let program = self.device.compile_program(source)?;
        programs.insert(key, Arc::clone(&program));
        Ok(program)
    }

    /// Get or create a kernel handle for (program, entry name).
    pub fn kernel(
        &self,
        program: &Arc<dyn DeviceProgram>,
        name: &str,
    ) -> Result<Arc<dyn DeviceKernel>> {
        let key = (program.id(), name.to_string());
        let mut kernels = self.kernels.lock();

        if let Some(kernel) = kernels.get(&key) {
            self.kernel_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(kernel));
        }

        self.kernel_misses.fetch_add(1, Ordering::Relaxed);
        let kernel = program.create_kernel(name)?;
        kernels.insert(key, Arc::clone(&kernel));
        Ok(kernel)
    }

    /// Current hit/miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            program_hits: self.program_hits.load(Ordering::Relaxed),
            program_misses: self.program_misses.load(Ordering::Relaxed),
            kernel_hits: self.kernel_hits.load(Ordering::Relaxed),
            kernel_misses: self.kernel_misses.load(Ordering::Relaxed),
        }
    }

    /// The device this cache compiles for.
    #[must_use]
    pub fn device(&self) -> &Arc<dyn ComputeDevice> {
        &self.device
    }
}
