//! Staging Upload Engine (§4.H): one ring-buffer sub-allocator per CPU
//! cache mode, an oversize one-shot fallback, and GPU-completion-driven
//! reclamation synchronised through the queue registry.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;

use crate::backend::RenderBackend;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::queue::{QueueId, QueueRegistry};
use crate::sync::SpinMutex;

/// `(queue, submissionIndex)`: blocks until a specific submission
/// completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitToken {
    pub queue: QueueId,
    pub submission_index: u64,
}

impl WaitToken {
    pub fn wait(&self, queues: &QueueRegistry) {
        queues.wait_for_command(self.queue, self.submission_index);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CpuCacheMode {
    WriteCombined,
    DefaultCached,
}

impl CpuCacheMode {
    const ALL: [CpuCacheMode; 2] = [CpuCacheMode::WriteCombined, CpuCacheMode::DefaultCached];
}

#[derive(Clone, Copy, Debug)]
pub struct UploadEngineConfig {
    pub staging_buffer_length: u64,
    pub alignment: u64,
}

impl Default for UploadEngineConfig {
    fn default() -> Self {
        UploadEngineConfig { staging_buffer_length: 4 << 20, alignment: 256 }
    }
}

/// A pending allocation that hasn't been patched to a real submission index
/// yet — `.max` in the spec's prose, modelled as `submission_index: None`.
struct PendingEntry {
    submission_index: Option<u64>,
    range: Range<u64>,
    temp_buffer: Option<Handle>,
}

struct Ring {
    capacity: u64,
    in_use_start: u64,
    in_use_end: u64,
    pending: VecDeque<PendingEntry>,
    staging_buffer: Handle,
}

impl Ring {
    fn overlaps(&self, start: u64, end: u64) -> bool {
        if self.in_use_start <= self.in_use_end {
            start < self.in_use_end && end > self.in_use_start
        } else {
            // window wraps: live region is [in_use_start, capacity) U [0, in_use_end)
            start < self.in_use_end || end > self.in_use_start
        }
    }

    fn process_completed(&mut self, queue: QueueId, queues: &QueueRegistry, backend: &dyn RenderBackend) {
        let completed = queues.last_completed_command(queue);
        while let Some(front) = self.pending.front() {
            match front.submission_index {
                Some(index) if index <= completed => {
                    let entry = self.pending.pop_front().unwrap();
                    if let Some(temp) = entry.temp_buffer {
                        backend.dispose(crate::handle::ResourceKind::Buffer, temp);
                    } else {
                        self.in_use_start = entry.range.end % self.capacity.max(1);
                    }
                }
                _ => break,
            }
        }
    }
}

/// A staged allocation awaiting `did_submit` to learn its real submission
/// index (until then it's the `.max` sentinel in `pendingCommands`).
pub struct StagingAllocation {
    pub buffer: Handle,
    pub offset: u64,
    pub range: Range<u64>,
    cache_mode: Option<CpuCacheMode>,
}

impl StagingAllocation {
    /// `true` for an allocation that bypassed the ring and got a dedicated
    /// one-shot buffer (`byte_count` exceeded the configured staging
    /// buffer length).
    pub fn is_oversize(&self) -> bool {
        self.cache_mode.is_none()
    }
}

/// Process-wide ring-buffer staging allocator, one ring per CPU cache mode
/// plus the oversize fallback path.
pub struct UploadEngine {
    config: UploadEngineConfig,
    rings: [SpinMutex<Ring>; 2],
}

impl UploadEngine {
    pub fn new(config: UploadEngineConfig, staging_buffers: [Handle; 2]) -> Self {
        let make = |buffer: Handle| {
            SpinMutex::new(Ring {
                capacity: config.staging_buffer_length,
                in_use_start: 0,
                in_use_end: 0,
                pending: VecDeque::new(),
                staging_buffer: buffer,
            })
        };
        UploadEngine {
            config,
            rings: [make(staging_buffers[0]), make(staging_buffers[1])],
        }
    }

    fn ring(&self, cache_mode: CpuCacheMode) -> &SpinMutex<Ring> {
        &self.rings[cache_mode as usize]
    }

    fn align_up(value: u64, alignment: u64) -> u64 {
        (value + alignment - 1) / alignment * alignment
    }

    /// Allocates `byte_count` bytes aligned to the engine's configured
    /// alignment, on the ring for `cache_mode`, blocking (cooperative
    /// yield) if the ring is momentarily full.
    pub fn allocate(
        &self,
        byte_count: u64,
        cache_mode: CpuCacheMode,
        queue: QueueId,
        queues: &QueueRegistry,
        backend: &dyn RenderBackend,
    ) -> StagingAllocation {
        if byte_count > self.config.staging_buffer_length {
            return self.allocate_oversize(byte_count, cache_mode, backend);
        }

        const SPIN_BUDGET: u32 = 10_000;
        let mut spins = 0u32;
        loop {
            let mut ring = self.ring(cache_mode).lock();
            ring.process_completed(queue, queues, backend);

            let mut start = Self::align_up(ring.in_use_end, self.config.alignment);
            if start + byte_count > ring.capacity {
                start = 0;
            }
            let end = start + byte_count;

            if ring.overlaps(start, end) && !(ring.in_use_start == ring.in_use_end) {
                drop(ring);
                if spins < SPIN_BUDGET {
                    std::thread::yield_now();
                    spins += 1;
                    continue;
                }
                std::thread::sleep(std::time::Duration::from_micros(200));
                continue;
            }

            ring.pending.push_back(PendingEntry { submission_index: None, range: start..end, temp_buffer: None });
            ring.in_use_end = end;
            let buffer = ring.staging_buffer;
            return StagingAllocation { buffer, offset: start, range: start..end, cache_mode: Some(cache_mode) };
        }
    }

    fn allocate_oversize(&self, byte_count: u64, cache_mode: CpuCacheMode, _backend: &dyn RenderBackend) -> StagingAllocation {
        // Creating the dedicated one-shot buffer is the caller's/backend's
        // job (this crate has no "create buffer" collaborator operation);
        // we only track it here so its disposal is driven by completion.
        let dedicated = Handle::new(0, 0, 0, crate::handle::HandleFlags::empty(), crate::handle::ResourceKind::Buffer);
        let mut ring = self.ring(cache_mode).lock();
        ring.pending.push_back(PendingEntry { submission_index: None, range: 0..byte_count, temp_buffer: Some(dedicated) });
        StagingAllocation { buffer: dedicated, offset: 0, range: 0..byte_count, cache_mode: None }
    }

    /// Patches the matching `.max`-sentinel pending entry with the real
    /// submission index and returns the resulting `WaitToken`. Per the
    /// resolved open question, `did_submit` is the sole progress point for
    /// oversize reclamation — nothing else advances `in_use_start` for a
    /// `temp_buffer` entry.
    pub fn did_submit(&self, allocation: &StagingAllocation, queue: QueueId, submission_index: u64) -> WaitToken {
        if let Some(cache_mode) = allocation.cache_mode {
            let mut ring = self.ring(cache_mode).lock();
            if let Some(entry) = ring.pending.iter_mut().find(|e| e.range == allocation.range && e.submission_index.is_none()) {
                entry.submission_index = Some(submission_index);
            }
        } else {
            for ring in &self.rings {
                let mut ring = ring.lock();
                if let Some(entry) = ring
                    .pending
                    .iter_mut()
                    .find(|e| e.temp_buffer == Some(allocation.buffer) && e.submission_index.is_none())
                {
                    entry.submission_index = Some(submission_index);
                    break;
                }
            }
        }
        WaitToken { queue, submission_index }
    }

    /// An executor-agnostic future that resolves once `token` completes,
    /// triggering reclamation of any oversize buffers that were waiting on
    /// it. Native callers can `pollster::block_on` it; this crate does not
    /// depend on a specific runtime.
    pub fn reclaim_when_complete(self: &Arc<Self>, token: WaitToken, queues: Arc<QueueRegistry>, backend: Arc<dyn RenderBackend>) -> impl std::future::Future<Output = ()> {
        let engine = self.clone_handle();
        async move {
            loop {
                if queues.last_completed_command(token.queue) >= token.submission_index {
                    for cache_mode in CpuCacheMode::ALL {
                        engine.ring(cache_mode).lock().process_completed(token.queue, &queues, backend.as_ref());
                    }
                    return;
                }
                std::thread::yield_now();
            }
        }
    }

    fn clone_handle(self: &Arc<Self>) -> Arc<Self> {
        Arc::clone(self)
    }

    /// Copies `source` into a fresh staging allocation and schedules a
    /// backend-level copy into `(buffer, offset)`. The blit itself is the
    /// caller's responsibility (out of scope here, per §1); this only does
    /// the staging-side bookkeeping and notifies the backend of the
    /// touched sub-range.
    pub fn upload_bytes(
        &self,
        source: &[u8],
        destination_buffer: Handle,
        destination_offset: u64,
        cache_mode: CpuCacheMode,
        queue: QueueId,
        queues: &QueueRegistry,
        backend: &dyn RenderBackend,
    ) -> StagingAllocation {
        let allocation = self.allocate(source.len() as u64, cache_mode, queue, queues, backend);
        self.fill(&allocation, backend, |dst| dst.copy_from_slice(source));
        let _ = destination_buffer;
        let _ = destination_offset;
        allocation
    }

    /// Runs `fill` over a staging allocation of `length` bytes, then hands
    /// the written sub-range to `copy` (the caller's blit-enqueue closure).
    pub fn with_upload_buffer(
        &self,
        length: u64,
        cache_mode: CpuCacheMode,
        queue: QueueId,
        queues: &QueueRegistry,
        backend: &dyn RenderBackend,
        fill: impl FnOnce(&mut [u8]) -> Result<()>,
        copy: impl FnOnce(&StagingAllocation),
    ) -> Result<StagingAllocation> {
        let allocation = self.allocate(length, cache_mode, queue, queues, backend);
        let result = self.try_fill(&allocation, backend, fill);
        copy(&allocation);
        result?;
        Ok(allocation)
    }

    /// `generateMipmaps`/`runBlitPass` have no staging-allocation component
    /// of their own in this core — they exist to give the caller a
    /// `WaitToken`-shaped handle on an arbitrary backend-issued blit. We
    /// model both as "run `body`, then let the caller `did_submit` it like
    /// any other upload" by returning a zero-length allocation on
    /// `CpuCacheMode::WriteCombined`'s ring.
    pub fn run_blit_pass(
        &self,
        queue: QueueId,
        queues: &QueueRegistry,
        backend: &dyn RenderBackend,
        body: impl FnOnce(),
    ) -> StagingAllocation {
        body();
        self.allocate(0, CpuCacheMode::WriteCombined, queue, queues, backend)
    }

    pub fn generate_mipmaps(&self, texture: Handle, queue: QueueId, queues: &QueueRegistry, backend: &dyn RenderBackend) -> StagingAllocation {
        self.run_blit_pass(queue, queues, backend, || {
            let _ = texture;
        })
    }

    /// Stages `source` (already laid out per `bytes_per_row`/
    /// `bytes_per_image`) for a `replaceTextureRegion`-style blit into one
    /// mip/slice of `texture`.
    #[allow(clippy::too_many_arguments)]
    pub fn replace_texture_region(
        &self,
        source: &[u8],
        texture: Handle,
        mip: u32,
        slice: u32,
        bytes_per_row: u32,
        bytes_per_image: u32,
        cache_mode: CpuCacheMode,
        queue: QueueId,
        queues: &QueueRegistry,
        backend: &dyn RenderBackend,
    ) -> StagingAllocation {
        let allocation = self.allocate(source.len() as u64, cache_mode, queue, queues, backend);
        self.fill(&allocation, backend, |dst| dst.copy_from_slice(source));
        let _ = (texture, mip, slice, bytes_per_row, bytes_per_image);
        allocation
    }

    fn fill(&self, allocation: &StagingAllocation, backend: &dyn RenderBackend, write: impl FnOnce(&mut [u8])) {
        let _ = self.try_fill(allocation, backend, |dst| {
            write(dst);
            Ok(())
        });
    }

    fn try_fill(&self, allocation: &StagingAllocation, backend: &dyn RenderBackend, fill: impl FnOnce(&mut [u8]) -> Result<()>) -> Result<()> {
        let len = (allocation.range.end - allocation.range.start) as usize;
        if len == 0 {
            return Ok(());
        }
        let ptr = backend.buffer_contents(allocation.buffer, allocation.range.clone());
        if ptr.is_null() {
            return Err(Error::UploadFillFailed("backend returned a null staging pointer".into()));
        }
        let slice = unsafe { std::slice::from_raw_parts_mut(ptr, len) };
        let result = fill(slice);
        backend.buffer_did_modify_range(allocation.buffer, allocation.range.clone());
        result
    }
}
