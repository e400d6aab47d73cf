//! Long-lived, per-kind persistent registries (§4.D): free-list allocation,
//! deferred disposal gated on `isKnownInUse`, and the `clear(afterGraph)`
//! sweep that advances along with GPU completion.

use std::sync::atomic::Ordering;

use crate::backend::RenderBackend;
use crate::error::{Error, Result};
use crate::handle::{Handle, HandleFlags, ResourceKind, PERSISTENT_REGISTRY_ID};
use crate::queue::QueueRegistry;
use crate::sync::SpinMutex;

use super::{CommonColumns, ExtraColumns, GraphCompletion};

struct AllocState {
    free_list: Vec<u32>,
    next_free_index: u32,
    enqueued_disposals: Vec<Handle>,
}

pub struct PersistentRegistry<D: Default, E: ExtraColumns> {
    common: CommonColumns<D>,
    extra: E,
    state: SpinMutex<AllocState>,
    kind: ResourceKind,
}

impl<D: Default, E: ExtraColumns> PersistentRegistry<D, E> {
    pub fn new(items_per_chunk: usize, kind: ResourceKind) -> Self {
        PersistentRegistry {
            common: CommonColumns::new(items_per_chunk),
            extra: E::new(items_per_chunk),
            state: SpinMutex::new(AllocState {
                free_list: Vec::new(),
                next_free_index: 0,
                enqueued_disposals: Vec::new(),
            }),
            kind,
        }
    }

    pub fn common(&self) -> &CommonColumns<D> {
        &self.common
    }

    pub fn extra(&self) -> &E {
        &self.extra
    }

    pub fn is_valid(&self, handle: Handle) -> bool {
        let slot = handle.index() as usize;
        self.common.generation.get(slot).load(Ordering::Acquire) == handle.generation()
    }

    fn check_valid(&self, handle: Handle) -> Result<()> {
        if self.is_valid(handle) {
            Ok(())
        } else {
            Err(Error::InvalidHandle { handle })
        }
    }

    pub fn allocate_handle(&self, flags: HandleFlags) -> Result<Handle> {
        let index = {
            let mut guard = self.state.lock();
            if let Some(index) = guard.free_list.pop() {
                index
            } else {
                let index = guard.next_free_index;
                guard.next_free_index = index.checked_add(1).ok_or_else(|| {
                    log::error!("{:?} persistent registry exhausted its index space", self.kind);
                    Error::CapacityExceeded { kind: self.kind, capacity: u32::MAX as usize }
                })?;
                index
            }
        };
        self.common.ensure_chunk(index as usize);
        self.extra.ensure_chunk(index as usize);
        let generation = self.common.generation.get(index as usize).load(Ordering::Acquire);
        let handle = Handle::new(index, generation, PERSISTENT_REGISTRY_ID, flags | HandleFlags::PERSISTENT, self.kind);
        log::trace!("allocated persistent {:?} at slot {index} generation {generation}", self.kind);
        Ok(handle)
    }

    pub fn initialize(&self, handle: Handle, descriptor: D, heap: Option<Handle>) -> Result<()> {
        self.check_valid(handle)?;
        let slot = handle.index() as usize;
        self.common.descriptor.set(slot, Some(descriptor));
        self.common.heap.set(slot, heap);
        self.common
            .state_flags
            .get(slot)
            .fetch_or(super::StateFlags::INITIALISED.bits(), Ordering::AcqRel);
        Ok(())
    }

    pub fn allocate(&self, descriptor: D, heap: Option<Handle>, flags: HandleFlags) -> Result<Handle> {
        let handle = self.allocate_handle(flags)?;
        self.initialize(handle, descriptor, heap)?;
        Ok(handle)
    }

    /// §4.D's three-step predicate, cheapest check first.
    pub fn is_known_in_use(&self, handle: Handle, queues: &QueueRegistry) -> bool {
        let slot = handle.index() as usize;
        if self.common.active_render_graphs.get(slot).load(Ordering::Acquire) != 0 {
            return true;
        }
        let reads = self.common.read_wait_indices.get(slot);
        let writes = self.common.write_wait_indices.get(slot);
        for q in 0..crate::queue::MAX_QUEUES {
            let queue = crate::queue::QueueId(q as u8);
            let read = reads[q].load(Ordering::Acquire);
            let write = writes[q].load(Ordering::Acquire);
            if read.max(write) > queues.last_completed_command(queue) {
                return true;
            }
        }
        false
    }

    /// If `isKnownInUse`, enqueues the handle for later disposal; otherwise
    /// disposes it immediately.
    pub fn dispose(&self, handle: Handle, queues: &QueueRegistry, backend: &dyn RenderBackend) -> Result<()> {
        self.check_valid(handle)?;
        if self.is_known_in_use(handle, queues) {
            log::debug!("deferring disposal of {handle:?}: still known in use");
            self.state.lock().enqueued_disposals.push(handle);
        } else {
            self.dispose_immediately(handle, backend);
        }
        Ok(())
    }

    fn dispose_immediately(&self, handle: Handle, backend: &dyn RenderBackend) {
        let slot = handle.index() as usize;
        self.extra.assert_disposable(slot);
        backend.dispose(handle.kind(), handle);
        self.common.deinitialise_slot(slot);
        self.extra.reset(slot);
        self.common.generation.get(slot).fetch_add(1, Ordering::AcqRel);
        self.state.lock().free_list.push(slot as u32);
        log::trace!("disposed persistent {handle:?}");
    }

    /// Processes enqueued disposals (disposing any no longer in use, and
    /// re-enqueuing the rest), zeros `usages` for every populated slot, and
    /// clears `afterGraph.queue`'s bit in each slot's `activeRenderGraphs`.
    pub fn clear(&self, after_graph: GraphCompletion, queues: &QueueRegistry, backend: &dyn RenderBackend) {
        let (pending, populated) = {
            let mut guard = self.state.lock();
            (std::mem::take(&mut guard.enqueued_disposals), guard.next_free_index)
        };
        log::trace!("{:?} registry sweep after queue {:?}: {} deferred disposals pending", self.kind, after_graph.queue, pending.len());
        for handle in pending {
            if !self.is_valid(handle) {
                continue; // already disposed via another path
            }
            if self.is_known_in_use(handle, queues) {
                self.state.lock().enqueued_disposals.push(handle);
            } else {
                self.dispose_immediately(handle, backend);
            }
        }
        let bit = !(1u8 << after_graph.queue.0);
        for slot in 0..populated as usize {
            self.common.usages.get(slot).clear();
            self.common.active_render_graphs.get(slot).fetch_and(bit, Ordering::AcqRel);
        }
    }

    /// Records a cross-queue/CPU-wait edge: pass `which = false` for reads,
    /// `true` for writes.
    pub fn record_wait_index(&self, handle: Handle, queue: crate::queue::QueueId, command_index: u64, is_write: bool) {
        let slot = handle.index() as usize;
        let column = if is_write { &self.common.write_wait_indices } else { &self.common.read_wait_indices };
        column.get(slot)[queue.0 as usize].fetch_max(command_index, Ordering::AcqRel);
    }

    pub fn mark_active_in_graph(&self, handle: Handle, queue: crate::queue::QueueId) {
        let slot = handle.index() as usize;
        self.common.active_render_graphs.get(slot).fetch_or(1u8 << queue.0, Ordering::AcqRel);
    }
}
