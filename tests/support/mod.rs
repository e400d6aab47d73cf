//! Shared collaborator mocks for the black-box integration tests. Each test
//! binary pulls this in with `#[path = "support/mod.rs"] mod support;`.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Range;

use substrate_rg_core::argument_buffer::ArgumentBufferExtra;
use substrate_rg_core::backend::{ArgumentReflection, ArgumentType, PipelineReflection, RenderBackend};
use substrate_rg_core::handle::{Handle, ResourceKind};
use substrate_rg_core::resolver::{ArgumentBufferSink, BindingKey, BindingPath, UsageSink};
use substrate_rg_core::usage::ShaderStages;

/// A `RenderBackend` that does nothing, for tests that only care about
/// registry/resolver/upload bookkeeping, not real GPU objects.
pub struct NullBackend;

impl RenderBackend for NullBackend {
    fn update_label(&self, _handle: Handle, _label: Option<&str>) {}
    fn dispose(&self, _kind: ResourceKind, _handle: Handle) {}
    fn buffer_contents(&self, _buffer: Handle, _range: Range<u64>) -> *mut u8 {
        std::ptr::null_mut()
    }
    fn buffer_did_modify_range(&self, _buffer: Handle, _range: Range<u64>) {}
    fn replace_backing_resource(&self, _handle: Handle, _new_backing: Option<u64>) -> Option<u64> {
        None
    }
    fn argument_buffer_encoder(&self, _path: BindingPath, current: Option<u64>) -> u64 {
        current.unwrap_or(1)
    }
    fn argument_buffer_path(&self, index: u32, _stages: ShaderStages) -> BindingPath {
        BindingPath(index as u64)
    }
}

/// A `PipelineReflection` whose active bindings are registered by hand, for
/// driving the resolver across a sequence of draws/dispatches.
pub struct TestReflection {
    active: RefCell<HashMap<String, BindingPath>>,
    info: RefCell<HashMap<u64, ArgumentReflection>>,
}

impl TestReflection {
    pub fn new() -> Self {
        TestReflection { active: RefCell::new(HashMap::new()), info: RefCell::new(HashMap::new()) }
    }

    pub fn register(&self, name: &str, path: BindingPath, usage_type: substrate_rg_core::usage::UsageType) {
        self.active.borrow_mut().insert(name.to_string(), path);
        self.info.borrow_mut().insert(
            path.0,
            ArgumentReflection {
                usage_type,
                active_stages: ShaderStages::FRAGMENT,
                active_range: 0..1,
                is_active: true,
                ty: ArgumentType::Buffer,
            },
        );
    }
}

impl Default for TestReflection {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineReflection for TestReflection {
    fn binding_path(&self, argument_name: &str, _array_index: u32, _argument_buffer_path: Option<BindingPath>) -> Option<BindingPath> {
        self.active.borrow().get(argument_name).copied()
    }
    fn binding_is_active(&self, path: BindingPath) -> bool {
        self.info.borrow().contains_key(&path.0)
    }
    fn argument_reflection(&self, path: BindingPath) -> Option<ArgumentReflection> {
        self.info.borrow().get(&path.0).cloned()
    }
    fn rebase_path(&self, path: BindingPath, _new_argument_buffer_path: BindingPath) -> BindingPath {
        path
    }
}

/// Drives an `Encoder`'s §4.F step 5 by forwarding to a single
/// `ArgumentBufferExtra`'s own translation, keyed by `handle.index()` (the
/// same slot convention every registry in this crate uses).
pub struct ArgumentBufferRegistrySink {
    pub extra: std::sync::Arc<ArgumentBufferExtra>,
}

impl ArgumentBufferSink for ArgumentBufferRegistrySink {
    fn translate_argument_buffer(
        &self,
        handle: Handle,
        _path: BindingPath,
        command_index: u64,
        usages: &dyn UsageSink,
        resolve: &mut dyn FnMut(&BindingKey, u32) -> Option<BindingPath>,
    ) {
        self.extra.translate_enqueued_bindings(handle.index() as usize, command_index, usages, |key, array_index| resolve(key, array_index));
    }
}

/// Minimal executor-agnostic `block_on`, for polling the `Future`s this
/// crate hands back (it deliberately depends on no async runtime).
pub fn block_on<F: std::future::Future>(mut fut: F) -> F::Output {
    use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

    unsafe fn noop(_: *const ()) {}
    unsafe fn clone(_: *const ()) -> RawWaker {
        RawWaker::new(std::ptr::null(), &VTABLE)
    }
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
    let waker = unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) };
    let mut cx = Context::from_waker(&waker);

    // SAFETY: `fut` is never moved again after this point.
    let mut fut = unsafe { std::pin::Pin::new_unchecked(&mut fut) };
    loop {
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(output) => return output,
            Poll::Pending => std::thread::yield_now(),
        }
    }
}
