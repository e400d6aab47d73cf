//! Exercises the staging upload engine's ring-buffer path together with the
//! queue registry's completion tracking and the executor-agnostic
//! reclamation future, the way a backend crate's frame loop would drive it:
//! allocate, fill, submit, advance GPU completion, await reclamation.

#[path = "support/mod.rs"]
mod support;

use std::sync::Arc;

use substrate_rg_core::handle::{Handle, HandleFlags, ResourceKind};
use substrate_rg_core::queue::QueueRegistry;
use substrate_rg_core::registry::persistent::PersistentRegistry;
use substrate_rg_core::registry::NoExtra;
use substrate_rg_core::upload::{CpuCacheMode, UploadEngine, UploadEngineConfig};
use support::{block_on, NullBackend};

#[derive(Default, Clone, Debug)]
struct TestDescriptor;

/// The two staging buffers an upload engine writes into are themselves
/// persistent buffers the embedding backend allocated up front.
fn staging_buffers() -> (PersistentRegistry<TestDescriptor, NoExtra>, [Handle; 2]) {
    let registry: PersistentRegistry<TestDescriptor, NoExtra> = PersistentRegistry::new(4, ResourceKind::Buffer);
    let a = registry.allocate(TestDescriptor, None, HandleFlags::empty()).unwrap();
    let b = registry.allocate(TestDescriptor, None, HandleFlags::empty()).unwrap();
    (registry, [a, b])
}

#[test]
fn upload_bytes_then_wait_token_unblocks_after_gpu_completion() {
    let (_registry, handles) = staging_buffers();
    let destination = handles[0];
    let engine = UploadEngine::new(UploadEngineConfig { staging_buffer_length: 4096, alignment: 256 }, handles);
    let queues = Arc::new(QueueRegistry::new());
    let backend = NullBackend;
    let queue = queues.allocate().unwrap();

    let payload = vec![7u8; 128];
    let allocation = engine.upload_bytes(&payload, destination, 0, CpuCacheMode::WriteCombined, queue, &queues, &backend);
    let token = engine.did_submit(&allocation, queue, 1);

    let waiter = std::thread::spawn({
        let queues = queues.clone();
        move || {
            token.wait(&queues);
        }
    });

    std::thread::sleep(std::time::Duration::from_millis(5));
    queues.mark_completed(queue, 1);
    waiter.join().unwrap();
}

#[test]
fn ring_reclaims_and_oversize_reclaims_via_async_future() {
    let (_registry, handles) = staging_buffers();
    let engine = Arc::new(UploadEngine::new(UploadEngineConfig { staging_buffer_length: 1024, alignment: 256 }, handles));
    let queues = Arc::new(QueueRegistry::new());
    let backend: Arc<dyn substrate_rg_core::backend::RenderBackend> = Arc::new(NullBackend);
    let queue = queues.allocate().unwrap();

    let oversize = engine.allocate(4096, CpuCacheMode::WriteCombined, queue, &queues, backend.as_ref());
    assert!(oversize.is_oversize());
    let token = engine.did_submit(&oversize, queue, 1);

    queues.mark_submitted(queue, 1);
    queues.mark_completed(queue, 1);

    let reclaim = engine.reclaim_when_complete(token, queues.clone(), backend.clone());
    block_on(reclaim);

    // a normal ring allocation still works after an oversize round-trip
    let ring_alloc = engine.allocate(256, CpuCacheMode::WriteCombined, queue, &queues, backend.as_ref());
    assert!(!ring_alloc.is_oversize());
}
