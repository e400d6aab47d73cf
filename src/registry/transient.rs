//! Per-graph, per-kind transient registries (§4.C). Two shapes back the
//! same `TransientRegistry` trait: `FixedTransientRegistry` for kinds with a
//! static per-frame bound (buffers, textures, heaps, acceleration
//! structures), and `ChunkedTransientRegistry` for argument buffers, whose
//! per-frame count is unbounded in practice.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};
use crate::handle::{Handle, HandleFlags, ResourceKind, TransientRegistryId};
use crate::sync::SpinLock;

use super::{CommonColumns, ExtraColumns};

pub trait TransientRegistry<D: Default, E: ExtraColumns> {
    fn allocate_handle(&self, flags: HandleFlags) -> Result<Handle>;

    fn initialize(&self, handle: Handle, descriptor: D) {
        let slot = handle.index() as usize;
        self.common().descriptor.set(slot, Some(descriptor));
        self.common()
            .state_flags
            .get(slot)
            .fetch_or(super::StateFlags::INITIALISED.bits(), Ordering::AcqRel);
    }

    fn allocate(&self, descriptor: D, flags: HandleFlags) -> Result<Handle> {
        let handle = self.allocate_handle(flags)?;
        self.initialize(handle, descriptor);
        Ok(handle)
    }

    /// Deinitialises every populated slot, resets the count, and bumps each
    /// populated slot's generation so all handles issued this graph become
    /// stale.
    fn clear(&self);

    fn common(&self) -> &CommonColumns<D>;
    fn extra(&self) -> &E;

    fn is_valid(&self, handle: Handle) -> bool {
        let slot = handle.index() as usize;
        self.common().generation.get(slot).load(Ordering::Acquire) == handle.generation()
    }
}

/// Static-capacity variant: a single atomic counter for lock-free issuance,
/// capacity checked against a fixed bound.
pub struct FixedTransientRegistry<D: Default, E: ExtraColumns> {
    common: CommonColumns<D>,
    extra: E,
    count: AtomicU32,
    capacity: u32,
    transient_registry_id: TransientRegistryId,
    kind: ResourceKind,
}

impl<D: Default, E: ExtraColumns> FixedTransientRegistry<D, E> {
    pub fn new(capacity: u32, transient_registry_id: TransientRegistryId, kind: ResourceKind) -> Self {
        let common = CommonColumns::new(capacity.max(1) as usize);
        let extra = E::new(capacity.max(1) as usize);
        FixedTransientRegistry { common, extra, count: AtomicU32::new(0), capacity, transient_registry_id, kind }
    }

    pub fn len(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

impl<D: Default, E: ExtraColumns> TransientRegistry<D, E> for FixedTransientRegistry<D, E> {
    fn allocate_handle(&self, flags: HandleFlags) -> Result<Handle> {
        let index = self.count.fetch_add(1, Ordering::AcqRel);
        if index >= self.capacity {
            self.count.fetch_sub(1, Ordering::AcqRel);
            log::error!("{:?} fixed transient registry {} exceeded capacity {}", self.kind, self.transient_registry_id, self.capacity);
            return Err(Error::CapacityExceeded { kind: self.kind, capacity: self.capacity as usize });
        }
        self.common.ensure_chunk(index as usize);
        self.extra.ensure_chunk(index as usize);
        let generation = self.common.generation.get(index as usize).load(Ordering::Acquire);
        let handle = Handle::new(index, generation, self.transient_registry_id, flags, self.kind);
        log::trace!("allocated transient {:?} at slot {index} generation {generation}", self.kind);
        Ok(handle)
    }

    fn clear(&self) {
        let populated = self.count.swap(0, Ordering::AcqRel);
        log::debug!("clearing {populated} transient {:?} slots (registry {})", self.kind, self.transient_registry_id);
        for slot in 0..populated as usize {
            self.common.deinitialise_slot(slot);
            self.extra.reset(slot);
            self.common.generation.get(slot).fetch_add(1, Ordering::AcqRel);
        }
    }

    fn common(&self) -> &CommonColumns<D> {
        &self.common
    }

    fn extra(&self) -> &E {
        &self.extra
    }
}

/// Chunk-growth variant: count bump and chunk growth share one spin lock,
/// per §4.C / §5.
pub struct ChunkedTransientRegistry<D: Default, E: ExtraColumns> {
    common: CommonColumns<D>,
    extra: E,
    count: AtomicU32,
    lock: SpinLock,
    transient_registry_id: TransientRegistryId,
    kind: ResourceKind,
}

impl<D: Default, E: ExtraColumns> ChunkedTransientRegistry<D, E> {
    pub fn new(items_per_chunk: usize, transient_registry_id: TransientRegistryId, kind: ResourceKind) -> Self {
        ChunkedTransientRegistry {
            common: CommonColumns::new(items_per_chunk),
            extra: E::new(items_per_chunk),
            count: AtomicU32::new(0),
            lock: SpinLock::new(),
            transient_registry_id,
            kind,
        }
    }

    pub fn len(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

impl<D: Default, E: ExtraColumns> TransientRegistry<D, E> for ChunkedTransientRegistry<D, E> {
    fn allocate_handle(&self, flags: HandleFlags) -> Result<Handle> {
        let _guard = self.lock.lock();
        let index = self.count.fetch_add(1, Ordering::AcqRel);
        self.common.ensure_chunk(index as usize);
        self.extra.ensure_chunk(index as usize);
        let generation = self.common.generation.get(index as usize).load(Ordering::Acquire);
        let handle = Handle::new(index, generation, self.transient_registry_id, flags, self.kind);
        log::trace!("allocated chunked transient {:?} at slot {index} generation {generation}", self.kind);
        Ok(handle)
    }

    fn clear(&self) {
        let _guard = self.lock.lock();
        let populated = self.count.swap(0, Ordering::AcqRel);
        log::debug!("clearing {populated} chunked transient {:?} slots (registry {})", self.kind, self.transient_registry_id);
        for slot in 0..populated as usize {
            self.common.deinitialise_slot(slot);
            self.extra.reset(slot);
            self.common.generation.get(slot).fetch_add(1, Ordering::AcqRel);
        }
    }

    fn common(&self) -> &CommonColumns<D> {
        &self.common
    }

    fn extra(&self) -> &E {
        &self.extra
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NoExtra;

    #[derive(Default, Clone, Debug, PartialEq, Eq)]
    struct TestDescriptor {
        len: u32,
    }

    #[test]
    fn transient_lifecycle_reuses_index_with_bumped_generation() {
        let reg: FixedTransientRegistry<TestDescriptor, NoExtra> =
            FixedTransientRegistry::new(8, 1, ResourceKind::Buffer);

        let a = reg.allocate(TestDescriptor { len: 16 }, HandleFlags::empty()).unwrap();
        let b = reg.allocate(TestDescriptor { len: 32 }, HandleFlags::empty()).unwrap();
        let c = reg.allocate(TestDescriptor { len: 64 }, HandleFlags::empty()).unwrap();
        assert!(reg.is_valid(a) && reg.is_valid(b) && reg.is_valid(c));
        let gen_before = a.generation();

        reg.clear();
        assert!(!reg.is_valid(a));
        assert!(!reg.is_valid(b));
        assert!(!reg.is_valid(c));

        let d = reg.allocate(TestDescriptor { len: 128 }, HandleFlags::empty()).unwrap();
        assert_eq!(d.index(), 0);
        assert_eq!(d.generation(), gen_before + 1);
    }

    #[test]
    fn fixed_registry_reports_capacity_exceeded() {
        let reg: FixedTransientRegistry<TestDescriptor, NoExtra> =
            FixedTransientRegistry::new(2, 1, ResourceKind::Buffer);
        reg.allocate_handle(HandleFlags::empty()).unwrap();
        reg.allocate_handle(HandleFlags::empty()).unwrap();
        match reg.allocate_handle(HandleFlags::empty()) {
            Err(Error::CapacityExceeded { capacity, .. }) => assert_eq!(capacity, 2),
            other => panic!("expected CapacityExceeded, got {other:?}"),
        }
    }

    #[test]
    fn chunked_registry_grows_without_bound() {
        let reg: ChunkedTransientRegistry<TestDescriptor, NoExtra> =
            ChunkedTransientRegistry::new(4, 2, ResourceKind::ArgumentBuffer);
        let mut handles = Vec::new();
        for i in 0..50 {
            handles.push(reg.allocate(TestDescriptor { len: i }, HandleFlags::empty()).unwrap());
        }
        assert!(handles.iter().all(|h| reg.is_valid(*h)));
        assert_eq!(handles[0].transient_registry_id(), 2);
    }
}
