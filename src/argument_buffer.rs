//! Argument Buffer Engine (§4.G): enqueue/translate key→path bindings for a
//! single argument buffer slot, a CAS-installed backend encoder, and the
//! append-only inline POD byte arena shared by a whole registry.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::RenderBackend;
use crate::column::Chunked;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::registry::ExtraColumns;
use crate::resolver::{BindingKey, BindingPath};
use crate::sync::SpinMutex;
use crate::usage::{record, ResourceUsage, Subresources, UsageNode, UsageType};

/// What one `enqueuedBindings`/`bindings` entry refers to.
#[derive(Clone, Debug)]
pub enum BindingResource {
    Buffer(Handle),
    Texture(Handle),
    Sampler(Handle),
    AccelerationStructure(Handle),
    /// Inline POD payload: `(offset, length)` into the registry's byte arena.
    Bytes { offset: usize, length: usize },
}

impl BindingResource {
    fn handle(&self) -> Option<Handle> {
        match self {
            BindingResource::Buffer(h) | BindingResource::Texture(h) | BindingResource::Sampler(h) | BindingResource::AccelerationStructure(h) => Some(*h),
            BindingResource::Bytes { .. } => None,
        }
    }
}

#[derive(Clone, Debug)]
struct EnqueuedBinding {
    key: BindingKey,
    array_index: u32,
    resource: BindingResource,
}

#[derive(Clone, Debug)]
pub struct BoundArgument {
    pub resource: BindingResource,
    pub usage_node: Option<UsageNode>,
}

struct RegistryState {
    enqueued: Vec<VecDeque<EnqueuedBinding>>,
    bindings: Vec<HashMap<BindingPath, BoundArgument>>,
    inline_data: Vec<u8>,
}

/// Kind-specific columns for `ResourceKind::ArgumentBuffer`. `encoder` lives
/// outside the registry's single spin lock so the common case (encoder
/// already installed) is a relaxed-ish atomic load, matching §5's "Encoder
/// pointer on an argument buffer (atomic-compare-exchange, relaxed)".
pub struct ArgumentBufferExtra {
    encoder: Chunked<AtomicU64>,
    source_array: Chunked<Option<Handle>>,
    state: SpinMutex<RegistryState>,
}

const NO_ENCODER: u64 = 0;

impl ExtraColumns for ArgumentBufferExtra {
    fn new(items_per_chunk: usize) -> Self {
        ArgumentBufferExtra {
            encoder: Chunked::new(items_per_chunk),
            source_array: Chunked::new(items_per_chunk),
            state: SpinMutex::new(RegistryState { enqueued: Vec::new(), bindings: Vec::new(), inline_data: Vec::new() }),
        }
    }

    fn ensure_chunk(&self, slot: usize) {
        self.encoder.ensure_chunk(slot);
        self.source_array.ensure_chunk(slot);
        let mut state = self.state.lock();
        while state.enqueued.len() <= slot {
            state.enqueued.push(VecDeque::new());
            state.bindings.push(HashMap::new());
        }
    }

    fn reset(&self, slot: usize) {
        self.encoder.get(slot).store(NO_ENCODER, Ordering::Release);
        self.source_array.reset(slot);
        let mut state = self.state.lock();
        state.enqueued[slot].clear();
        state.bindings[slot].clear();
    }
}

impl ArgumentBufferExtra {
    pub fn set_source_array(&self, slot: usize, array: Option<Handle>) {
        self.source_array.set(slot, array);
    }

    pub fn source_array(&self, slot: usize) -> Option<Handle> {
        *self.source_array.get(slot)
    }

    fn enqueue(&self, slot: usize, key: BindingKey, array_index: u32, resource: BindingResource) {
        self.state.lock().enqueued[slot].push_back(EnqueuedBinding { key, array_index, resource });
    }

    fn check_persistency(is_persistent: bool, handle: Handle) -> Result<()> {
        if is_persistent && !handle.is_persistent() {
            return Err(Error::PersistencyViolation { handle });
        }
        Ok(())
    }

    pub fn set_buffer(&self, slot: usize, is_persistent: bool, key: BindingKey, array_index: u32, buffer: Handle) -> Result<()> {
        Self::check_persistency(is_persistent, buffer)?;
        self.enqueue(slot, key, array_index, BindingResource::Buffer(buffer));
        Ok(())
    }

    pub fn set_texture(&self, slot: usize, is_persistent: bool, key: BindingKey, array_index: u32, texture: Handle) -> Result<()> {
        Self::check_persistency(is_persistent, texture)?;
        self.enqueue(slot, key, array_index, BindingResource::Texture(texture));
        Ok(())
    }

    pub fn set_sampler(&self, slot: usize, key: BindingKey, array_index: u32, sampler: Handle) {
        self.enqueue(slot, key, array_index, BindingResource::Sampler(sampler));
    }

    pub fn set_acceleration_structure(&self, slot: usize, key: BindingKey, array_index: u32, accel: Handle) {
        self.enqueue(slot, key, array_index, BindingResource::AccelerationStructure(accel));
    }

    /// `setValue`/`setBytes`: copies `bytes` into the registry's append-only
    /// inline-data arena and enqueues an `(offset, length)` reference.
    pub fn set_bytes(&self, slot: usize, key: BindingKey, array_index: u32, bytes: &[u8]) {
        let mut state = self.state.lock();
        let offset = state.inline_data.len();
        state.inline_data.extend_from_slice(bytes);
        state.enqueued[slot].push_back(EnqueuedBinding { key, array_index, resource: BindingResource::Bytes { offset, length: bytes.len() } });
    }

    pub fn inline_bytes(&self, range: std::ops::Range<usize>) -> Vec<u8> {
        self.state.lock().inline_data[range].to_vec()
    }

    /// Drains `slot`'s `enqueuedBindings` FIFO under the registry's single
    /// lock, moving every entry `resolve` can place to `bindings`, and
    /// recording an in-argument-buffer usage node for handle-backed
    /// resources.
    pub fn translate_enqueued_bindings(
        &self,
        slot: usize,
        command_index: u64,
        usages: &dyn crate::resolver::UsageSink,
        mut resolve: impl FnMut(&BindingKey, u32) -> Option<BindingPath>,
    ) {
        let mut state = self.state.lock();
        let mut remaining = VecDeque::new();
        while let Some(entry) = state.enqueued[slot].pop_front() {
            match resolve(&entry.key, entry.array_index) {
                Some(path) => {
                    let usage_node = entry.resource.handle().map(|handle| {
                        record(
                            usages.usages(handle),
                            ResourceUsage {
                                handle,
                                subresources: Subresources::Whole,
                                ty: UsageType::SHADER_READ,
                                stages: Default::default(),
                                active_range: command_index..command_index + 1,
                                pass_index: 0,
                            },
                        )
                    });
                    state.bindings[slot].insert(path, BoundArgument { resource: entry.resource, usage_node });
                }
                None => remaining.push_back(entry),
            }
        }
        state.enqueued[slot] = remaining;
    }

    pub fn binding(&self, slot: usize, path: BindingPath) -> Option<BoundArgument> {
        self.state.lock().bindings[slot].get(&path).cloned()
    }

    pub fn bindings_len(&self, slot: usize) -> usize {
        self.state.lock().bindings[slot].len()
    }

    /// CAS loop installing the backend-provided encoder for `path`.
    pub fn update_encoder(&self, slot: usize, path: BindingPath, backend: &dyn RenderBackend) -> u64 {
        loop {
            let current_raw = self.encoder.get(slot).load(Ordering::Acquire);
            let current = if current_raw == NO_ENCODER { None } else { Some(current_raw) };
            let proposed = backend.argument_buffer_encoder(path, current);
            if proposed == current_raw {
                return proposed;
            }
            match self.encoder.get(slot).compare_exchange_weak(current_raw, proposed, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return proposed,
                Err(_) => std::hint::spin_loop(),
            }
        }
    }
}

impl Clone for BoundArgument {
    fn clone(&self) -> Self {
        BoundArgument { resource: self.resource.clone(), usage_node: self.usage_node }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{HandleFlags, ResourceKind};
    use std::collections::HashMap as Map;

    struct NullBackend;
    impl RenderBackend for NullBackend {
        fn update_label(&self, _h: Handle, _l: Option<&str>) {}
        fn dispose(&self, _k: ResourceKind, _h: Handle) {}
        fn buffer_contents(&self, _b: Handle, _r: std::ops::Range<u64>) -> *mut u8 {
            std::ptr::null_mut()
        }
        fn buffer_did_modify_range(&self, _b: Handle, _r: std::ops::Range<u64>) {}
        fn replace_backing_resource(&self, _h: Handle, _n: Option<u64>) -> Option<u64> {
            None
        }
        fn argument_buffer_encoder(&self, _path: BindingPath, current: Option<u64>) -> u64 {
            current.unwrap_or(77)
        }
        fn argument_buffer_path(&self, index: u32, _stages: crate::usage::ShaderStages) -> BindingPath {
            BindingPath(index as u64)
        }
    }

    struct TestUsageSink {
        lists: Map<u32, crate::column::ChunkList<ResourceUsage>>,
    }

    impl crate::resolver::UsageSink for TestUsageSink {
        fn usages(&self, handle: Handle) -> &crate::column::ChunkList<ResourceUsage> {
            self.lists.get(&handle.index()).unwrap()
        }
    }

    fn persistent_buffer(index: u32) -> Handle {
        Handle::new(index, 0, 0, HandleFlags::PERSISTENT, ResourceKind::Buffer)
    }

    fn transient_buffer(index: u32) -> Handle {
        Handle::new(index, 0, 1, HandleFlags::empty(), ResourceKind::Buffer)
    }

    #[test]
    fn persistency_violation_rejects_transient_child() {
        let extra = ArgumentBufferExtra::new(8);
        extra.ensure_chunk(0);
        let err = extra.set_buffer(0, true, BindingKey::new("a", 0), 0, transient_buffer(3)).unwrap_err();
        assert!(matches!(err, Error::PersistencyViolation { .. }));
    }

    #[test]
    fn translate_moves_resolved_entries_to_bindings() {
        let extra = ArgumentBufferExtra::new(8);
        extra.ensure_chunk(0);
        extra.set_buffer(0, true, BindingKey::new("a", 0), 0, persistent_buffer(3)).unwrap();
        extra.set_buffer(0, true, BindingKey::new("b", 0), 0, persistent_buffer(4)).unwrap();

        let mut lists = Map::new();
        lists.insert(3, crate::column::ChunkList::new(4));
        lists.insert(4, crate::column::ChunkList::new(4));
        let sink = TestUsageSink { lists };

        extra.translate_enqueued_bindings(0, 0, &sink, |key, _idx| if key.argument_name == "a" { Some(BindingPath(1)) } else { None });

        assert_eq!(extra.bindings_len(0), 1);
        assert!(extra.binding(0, BindingPath(1)).is_some());
    }

    #[test]
    fn update_encoder_caches_once_installed() {
        let extra = ArgumentBufferExtra::new(8);
        extra.ensure_chunk(0);
        let backend = NullBackend;
        let first = extra.update_encoder(0, BindingPath(1), &backend);
        let second = extra.update_encoder(0, BindingPath(1), &backend);
        assert_eq!(first, second);
    }
}
