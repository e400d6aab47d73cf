//! Resource registries: the columns every kind shares (§3 "per-resource
//! columns"), the per-kind extension point for columns a kind alone owns
//! (argument buffers' encoder/bindings, heaps' child set), and the
//! transient/persistent allocators built on top of them (§4.C, §4.D).

pub mod persistent;
pub mod transient;

use std::sync::atomic::{AtomicU64, AtomicU8};

use crate::column::{ChunkList, Chunked};
use crate::handle::Handle;
use crate::queue::QueueId;
use crate::usage::ResourceUsage;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct StateFlags: u8 {
        const INITIALISED = 1 << 0;
    }
}

/// Columns every resource kind carries, regardless of which kind-specific
/// `ExtraColumns` it's paired with.
pub struct CommonColumns<D: Default> {
    pub descriptor: Chunked<Option<D>>,
    pub usages: Chunked<ChunkList<ResourceUsage>>,
    pub label: Chunked<Option<String>>,
    pub heap: Chunked<Option<Handle>>,
    pub read_wait_indices: Chunked<[AtomicU64; 8]>,
    pub write_wait_indices: Chunked<[AtomicU64; 8]>,
    pub active_render_graphs: Chunked<AtomicU8>,
    pub state_flags: Chunked<AtomicU8>,
    pub generation: Chunked<AtomicU8>,
}

const USAGE_LIST_CHUNK_LEN: usize = 64;

impl<D: Default> CommonColumns<D> {
    pub fn new(items_per_chunk: usize) -> Self {
        CommonColumns {
            descriptor: Chunked::new(items_per_chunk),
            usages: Chunked::new(items_per_chunk),
            label: Chunked::new(items_per_chunk),
            heap: Chunked::new(items_per_chunk),
            read_wait_indices: Chunked::new(items_per_chunk),
            write_wait_indices: Chunked::new(items_per_chunk),
            active_render_graphs: Chunked::new(items_per_chunk),
            state_flags: Chunked::new(items_per_chunk),
            generation: Chunked::new(items_per_chunk),
        }
    }

    pub fn ensure_chunk(&self, slot: usize) {
        self.descriptor.ensure_chunk(slot);
        self.usages.ensure_chunk(slot);
        self.label.ensure_chunk(slot);
        self.heap.ensure_chunk(slot);
        self.read_wait_indices.ensure_chunk(slot);
        self.write_wait_indices.ensure_chunk(slot);
        self.active_render_graphs.ensure_chunk(slot);
        self.state_flags.ensure_chunk(slot);
        self.generation.ensure_chunk(slot);
        if self.usages.get(slot).len() == 0 {
            // first touch: give the slot a usages list sized for typical
            // per-frame accumulation instead of the registry's (possibly
            // huge) per-kind chunk size.
            self.usages.set(slot, ChunkList::new(USAGE_LIST_CHUNK_LEN));
        }
    }

    /// Deinitialises a slot: clears descriptor/label/heap/state, but leaves
    /// `generation` untouched (the caller bumps it separately, since
    /// transient `clear()` and persistent disposal bump it at different
    /// points relative to the rest of this reset).
    pub fn deinitialise_slot(&self, slot: usize) {
        self.descriptor.reset(slot);
        self.label.reset(slot);
        self.heap.reset(slot);
        self.usages.get(slot).clear();
        self.state_flags.get(slot).store(0, std::sync::atomic::Ordering::Release);
        self.active_render_graphs.get(slot).store(0, std::sync::atomic::Ordering::Release);
        for q in self.read_wait_indices.get(slot) {
            q.store(0, std::sync::atomic::Ordering::Release);
        }
        for q in self.write_wait_indices.get(slot) {
            q.store(0, std::sync::atomic::Ordering::Release);
        }
    }
}

/// Extension point for columns a single resource kind alone owns (heaps'
/// `childResources`, argument buffers' `encoder`/`enqueuedBindings`/
/// `bindings`/`inlineDataStorage`/`sourceArray`). Kinds with no extra
/// columns use `NoExtra`.
pub trait ExtraColumns: Send + Sync {
    fn new(items_per_chunk: usize) -> Self;
    fn ensure_chunk(&self, slot: usize);
    /// Deinitialises a slot's kind-specific columns.
    fn reset(&self, slot: usize);
    /// Debug-only invariant check run before a slot is actually disposed
    /// (e.g. "a heap with live children cannot be freed").
    fn assert_disposable(&self, _slot: usize) {}
}

pub struct NoExtra;

impl ExtraColumns for NoExtra {
    fn new(_items_per_chunk: usize) -> Self {
        NoExtra
    }
    fn ensure_chunk(&self, _slot: usize) {}
    fn reset(&self, _slot: usize) {}
}

/// `ResourceKind::Heap`'s extra column: the set of handles it owns weakly.
/// A heap with live children cannot be disposed (§3 "the heap cannot be
/// freed while any child remains").
pub struct HeapExtra {
    child_resources: Chunked<std::sync::RwLock<std::collections::HashSet<Handle>>>,
}

impl ExtraColumns for HeapExtra {
    fn new(items_per_chunk: usize) -> Self {
        HeapExtra { child_resources: Chunked::new(items_per_chunk) }
    }
    fn ensure_chunk(&self, slot: usize) {
        self.child_resources.ensure_chunk(slot);
    }
    fn reset(&self, slot: usize) {
        self.child_resources.get(slot).write().unwrap().clear();
    }
    fn assert_disposable(&self, slot: usize) {
        debug_assert!(
            self.child_resources.get(slot).read().unwrap().is_empty(),
            "heap disposed with live children"
        );
    }
}

impl HeapExtra {
    pub fn add_child(&self, slot: usize, child: Handle) {
        self.child_resources.get(slot).write().unwrap().insert(child);
    }

    pub fn remove_child(&self, slot: usize, child: Handle) {
        self.child_resources.get(slot).write().unwrap().remove(&child);
    }

    pub fn children(&self, slot: usize) -> std::collections::HashSet<Handle> {
        self.child_resources.get(slot).read().unwrap().clone()
    }
}

/// `ResourceKind::ArgumentBufferArray`'s extra column: the ordered member
/// argument buffers. Disposal of the array cascades explicit disposal of
/// its members (§9 "cyclic ownership"); this column only tracks membership,
/// the cascade itself is the caller's responsibility (it alone knows which
/// registry a member handle belongs to).
pub struct ArgumentBufferArrayExtra {
    members: Chunked<std::sync::RwLock<Vec<Handle>>>,
}

impl ExtraColumns for ArgumentBufferArrayExtra {
    fn new(items_per_chunk: usize) -> Self {
        ArgumentBufferArrayExtra { members: Chunked::new(items_per_chunk) }
    }
    fn ensure_chunk(&self, slot: usize) {
        self.members.ensure_chunk(slot);
    }
    fn reset(&self, slot: usize) {
        self.members.get(slot).write().unwrap().clear();
    }
}

impl ArgumentBufferArrayExtra {
    pub fn push_member(&self, slot: usize, member: Handle) {
        self.members.get(slot).write().unwrap().push(member);
    }

    pub fn members(&self, slot: usize) -> Vec<Handle> {
        self.members.get(slot).read().unwrap().clone()
    }
}

/// The `(queue, command_index)` token `PersistentRegistry::clear` is driven
/// by — "afterGraph" in §4.D's prose.
#[derive(Clone, Copy, Debug)]
pub struct GraphCompletion {
    pub queue: QueueId,
    pub command_index: u64,
}

/// Per-kind registry sizing, supplied by the embedding application at graph
/// construction (in-process config only — no env vars, no files, per §6).
#[derive(Clone, Copy, Debug)]
pub struct RegistryCapacities {
    pub fixed_transient_capacity: u32,
    pub chunked_transient_chunk_len: usize,
    pub persistent_chunk_len: usize,
}

impl Default for RegistryCapacities {
    fn default() -> Self {
        RegistryCapacities {
            fixed_transient_capacity: 4096,
            chunked_transient_chunk_len: 2048,
            persistent_chunk_len: 256,
        }
    }
}
