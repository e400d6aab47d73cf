//! Per-encoder binding resolution (§4.F): translates user `bind(key, ...)`
//! calls into concrete backend bind commands and usage nodes, incrementally,
//! as pipeline state changes across draws and dispatches within one
//! encoder.

use std::collections::{HashMap, HashSet};

use crate::backend::PipelineReflection;
use crate::column::ChunkList;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::usage::{record, ResourceUsage, Subresources, UsageNode, UsageType};

/// Opaque, backend-specific identifier for a shader argument slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingPath(pub u64);

/// A user binding key: an argument name plus an array index (`0` for
/// non-arrayed arguments), optionally scoped inside an enclosing argument
/// buffer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BindingKey {
    pub argument_name: String,
    pub array_index: u32,
}

impl BindingKey {
    pub fn new(argument_name: impl Into<String>, array_index: u32) -> Self {
        BindingKey { argument_name: argument_name.into(), array_index }
    }
}

/// Command-specific resolution logic, step 4c of the algorithm.
#[derive(Clone, Debug, PartialEq)]
pub enum BindingCommand {
    SetSampler { sampler: Handle },
    SetBytes { bytes: Vec<u8> },
    SetBufferOffset { offset: u64 },
    SetBuffer { buffer: Handle, offset: u64 },
    SetTexture { texture: Handle },
    SetArgumentBufferArray { array: Handle },
    SetArgumentBuffer { argument_buffer: Handle },
}

impl BindingCommand {
    fn handle(&self) -> Option<Handle> {
        match self {
            BindingCommand::SetSampler { sampler } => Some(*sampler),
            BindingCommand::SetBuffer { buffer, .. } => Some(*buffer),
            BindingCommand::SetTexture { texture } => Some(*texture),
            BindingCommand::SetArgumentBufferArray { array } => Some(*array),
            BindingCommand::SetArgumentBuffer { argument_buffer } => Some(*argument_buffer),
            BindingCommand::SetBytes { .. } | BindingCommand::SetBufferOffset { .. } => None,
        }
    }
}

/// A resource currently bound at some `BindingPath`, per §4.F.
#[derive(Clone, Debug)]
pub struct BoundResource {
    pub handle: Handle,
    pub command: BindingCommand,
    pub usage_node: Option<UsageNode>,
    pub in_argument_buffer: bool,
    pub consistent_usage_assumed: bool,
    /// Whether `command` has already been pushed to the emitted list. Step
    /// 6 only re-emits a surviving binding's command if it hadn't been.
    pub emitted: bool,
}

/// Given an arbitrary handle, produces the `ChunkList` its usage records
/// live in. Implemented by whatever owns the registries (one per kind), so
/// the resolver itself stays decoupled from registry storage.
pub trait UsageSink {
    fn usages(&self, handle: Handle) -> &ChunkList<ResourceUsage>;
}

/// Drives §4.F step 5 for one argument buffer currently bound at `path`:
/// resolve every member binding it has enqueued against a reflection scoped
/// under that path, recording an in-argument-buffer usage node for each.
/// Implemented by whatever owns the argument-buffer registry (dispatching
/// on `handle.kind()`), the same decoupling `UsageSink` gives per-resource
/// usage storage.
pub trait ArgumentBufferSink {
    fn translate_argument_buffer(
        &self,
        handle: Handle,
        path: BindingPath,
        command_index: u64,
        usages: &dyn UsageSink,
        resolve: &mut dyn FnMut(&BindingKey, u32) -> Option<BindingPath>,
    );
}

/// A command the resolver has decided to emit to the backend this call,
/// alongside the command index it became relevant at (for the §4.F ordering
/// guarantee).
#[derive(Clone, Debug, PartialEq)]
pub struct EmittedCommand {
    pub path: BindingPath,
    pub command: BindingCommand,
    pub command_index: u64,
}

/// Per-encoder resolver state (§4.F "State held per encoder").
pub struct Encoder {
    resource_binding_commands: Vec<(BindingKey, BindingCommand, bool)>,
    resource_binding_commands_count_last_update: usize,

    /// Argument buffers bound by key, not yet resolved to a `BindingPath`
    /// ("pendingArgumentBuffersByKey").
    pending_argument_buffers_by_key: Vec<(BindingKey, Handle, bool)>,
    pending_argument_buffers_by_key_count_last_update: usize,
    /// Argument buffers already resolved to a path, whose member bindings
    /// get (re-)translated on every `resolve()` call ("pendingArgumentBuffers").
    pending_argument_buffers: HashMap<BindingPath, Handle>,
    argument_buffer_sink: Option<Box<dyn ArgumentBufferSink>>,

    bound_resources: HashMap<BindingPath, BoundResource>,
    untracked_bound_resources: HashMap<BindingPath, BoundResource>,
    bound_uav_resources: HashSet<BindingPath>,

    pipeline_state_changed: bool,
    needs_update_bindings: bool,
    last_gpu_command_index: u64,
    current_pipeline_reflection: Option<Box<dyn PipelineReflection>>,

    emitted: Vec<EmittedCommand>,
    pending_closes: Vec<UsageNode>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Encoder {
            resource_binding_commands: Vec::new(),
            resource_binding_commands_count_last_update: 0,
            pending_argument_buffers_by_key: Vec::new(),
            pending_argument_buffers_by_key_count_last_update: 0,
            pending_argument_buffers: HashMap::new(),
            argument_buffer_sink: None,
            bound_resources: HashMap::new(),
            untracked_bound_resources: HashMap::new(),
            bound_uav_resources: HashSet::new(),
            pipeline_state_changed: false,
            needs_update_bindings: false,
            last_gpu_command_index: 0,
            current_pipeline_reflection: None,
            emitted: Vec::new(),
            pending_closes: Vec::new(),
        }
    }

    pub fn bind(&mut self, key: BindingKey, command: BindingCommand) {
        self.bind_inner(key, command, false);
    }

    /// Binds `command`, promising the resolver this binding's usage stays
    /// stable for the life of the encoder. Once a pipeline change confirms
    /// the binding, it migrates to `untrackedBoundResources` (§4.F step 6)
    /// and is never re-walked again.
    pub fn bind_with_consistent_usage_assumed(&mut self, key: BindingKey, command: BindingCommand) {
        self.bind_inner(key, command, true);
    }

    fn bind_inner(&mut self, key: BindingKey, command: BindingCommand, consistent_usage_assumed: bool) {
        self.resource_binding_commands.push((key, command, consistent_usage_assumed));
        self.needs_update_bindings = true;
    }

    /// Binds an argument buffer by key (§4.F step 5's `pendingArgumentBuffersByKey`).
    pub fn bind_argument_buffer(&mut self, key: BindingKey, argument_buffer: Handle) {
        self.bind_argument_buffer_inner(key, argument_buffer, false);
    }

    pub fn bind_argument_buffer_with_consistent_usage_assumed(&mut self, key: BindingKey, argument_buffer: Handle) {
        self.bind_argument_buffer_inner(key, argument_buffer, true);
    }

    fn bind_argument_buffer_inner(&mut self, key: BindingKey, argument_buffer: Handle, consistent_usage_assumed: bool) {
        self.pending_argument_buffers_by_key.push((key, argument_buffer, consistent_usage_assumed));
        self.needs_update_bindings = true;
    }

    /// Registers the collaborator that drains each bound argument buffer's
    /// enqueued member bindings (§4.F step 5). Until this is set, argument
    /// buffers still resolve to a path but their member bindings are never
    /// translated.
    pub fn set_argument_buffer_sink(&mut self, sink: Box<dyn ArgumentBufferSink>) {
        self.argument_buffer_sink = Some(sink);
    }

    pub fn set_pipeline(&mut self, reflection: Box<dyn PipelineReflection>) {
        self.current_pipeline_reflection = Some(reflection);
        self.pipeline_state_changed = true;
        self.needs_update_bindings = true;
    }

    pub fn bound_uav_resources(&self) -> &HashSet<BindingPath> {
        &self.bound_uav_resources
    }

    pub fn bound_resource(&self, path: BindingPath) -> Option<&BoundResource> {
        self.bound_resources.get(&path)
    }

    pub fn untracked_bound_resource(&self, path: BindingPath) -> Option<&BoundResource> {
        self.untracked_bound_resources.get(&path)
    }

    pub fn take_emitted(&mut self) -> Vec<EmittedCommand> {
        std::mem::take(&mut self.emitted)
    }

    /// Step 2: called at `endEncoding`. Widens every bound resource's range
    /// to the encoder's final command index and returns without requiring a
    /// pipeline reflection.
    pub fn end_encoding(&mut self, command_index: u64, usages: &dyn UsageSink) {
        self.last_gpu_command_index = command_index;
        let end = command_index + 1;
        for bound in self.bound_resources.values().chain(self.untracked_bound_resources.values()) {
            if let Some(node) = bound.usage_node {
                node.widen_to(usages.usages(node.handle), end);
            }
        }
    }

    /// Steps 1, 3-8 of the resolution algorithm. Invoked before each
    /// draw/dispatch.
    pub fn resolve(&mut self, command_index: u64, usages: &dyn UsageSink) -> Result<()> {
        self.last_gpu_command_index = command_index;
        if !self.needs_update_bindings {
            return Ok(());
        }

        let reflection = self
            .current_pipeline_reflection
            .as_ref()
            .ok_or(Error::MissingPipelineState)?;

        // Step 4: walk resourceBindingCommands[resumePoint..], re-queueing
        // anything that doesn't resolve in this pipeline.
        let end = self.resource_binding_commands.len();
        let mut i = self.resource_binding_commands_count_last_update;
        while i < end {
            let (key, command, consistent_usage_assumed) = self.resource_binding_commands[i].clone();
            match reflection.binding_path(&key.argument_name, key.array_index, None) {
                None => self.resource_binding_commands.push((key, command, consistent_usage_assumed)),
                Some(path) => self.apply_binding_command(path, command, reflection.as_ref(), command_index, usages, consistent_usage_assumed)?,
            }
            i += 1;
        }
        self.resource_binding_commands_count_last_update = end;

        // Step 5: resolve newly-bound argument buffers to a path, then
        // translate every currently-bound argument buffer's enqueued member
        // bindings against a reflection scoped under its own path.
        let end = self.pending_argument_buffers_by_key.len();
        let mut i = self.pending_argument_buffers_by_key_count_last_update;
        while i < end {
            let (key, handle, consistent_usage_assumed) = self.pending_argument_buffers_by_key[i].clone();
            match reflection.binding_path(&key.argument_name, key.array_index, None) {
                None => self.pending_argument_buffers_by_key.push((key, handle, consistent_usage_assumed)),
                Some(path) => self.apply_binding_command(
                    path,
                    BindingCommand::SetArgumentBuffer { argument_buffer: handle },
                    reflection.as_ref(),
                    command_index,
                    usages,
                    consistent_usage_assumed,
                )?,
            }
            i += 1;
        }
        self.pending_argument_buffers_by_key_count_last_update = end;

        if let Some(sink) = self.argument_buffer_sink.as_deref() {
            let reflection_ref = reflection.as_ref();
            for (&path, &handle) in self.pending_argument_buffers.iter() {
                sink.translate_argument_buffer(handle, path, command_index, usages, &mut |key, array_index| {
                    reflection_ref.binding_path(&key.argument_name, array_index, Some(path))
                });
            }
        }

        // Step 6/7: pipeline change re-walk, or UAV refresh.
        if self.pipeline_state_changed {
            self.rewalk_bound_resources(reflection.as_ref(), command_index, usages);
        } else {
            self.refresh_uav_usages(reflection.as_ref(), command_index, usages);
        }

        // Step 8.
        for node in self.pending_closes.drain(..) {
            node.widen_to(usages.usages(node.handle), command_index + 1);
        }
        self.pipeline_state_changed = false;
        self.needs_update_bindings = false;
        Ok(())
    }

    fn apply_binding_command(
        &mut self,
        path: BindingPath,
        command: BindingCommand,
        reflection: &dyn PipelineReflection,
        command_index: u64,
        usages: &dyn UsageSink,
        consistent_usage_assumed: bool,
    ) -> Result<()> {
        let prior = self.bound_resources.remove(&path);

        let (next, emit) = match &command {
            BindingCommand::SetSampler { sampler } => (
                Some(BoundResource { handle: *sampler, command: command.clone(), usage_node: None, in_argument_buffer: false, consistent_usage_assumed, emitted: true }),
                true,
            ),
            BindingCommand::SetBytes { .. } => {
                if let Some(prior) = prior.as_ref().and_then(|b| b.usage_node) {
                    self.pending_closes.push(prior);
                }
                (None, true)
            }
            BindingCommand::SetBufferOffset { offset } => {
                let Some(mut bound) = prior else {
                    log::warn!("setBufferOffset with no prior setBuffer at {path:?}");
                    return Err(Error::OffsetWithoutBuffer { path });
                };
                if let BindingCommand::SetBuffer { buffer, .. } = bound.command {
                    bound.command = BindingCommand::SetBuffer { buffer, offset: *offset };
                }
                bound.emitted = true;
                (Some(bound), true)
            }
            BindingCommand::SetBuffer { buffer, offset } => {
                if let Some(prior) = &prior {
                    if !self.pipeline_state_changed && prior.command == command {
                        let unchanged = prior.clone();
                        self.bound_resources.insert(path, unchanged);
                        return Ok(());
                    }
                }
                let prior_node = prior.as_ref().and_then(|b| b.usage_node);
                if let Some(node) = prior_node {
                    self.pending_closes.push(node);
                }
                let usage_node = self.maybe_record_usage(*buffer, path, reflection, command_index, usages);
                let _ = offset;
                (
                    Some(BoundResource { handle: *buffer, command: command.clone(), usage_node, in_argument_buffer: false, consistent_usage_assumed, emitted: true }),
                    true,
                )
            }
            BindingCommand::SetTexture { texture } => {
                if let Some(prior) = &prior {
                    if !self.pipeline_state_changed && prior.handle == *texture {
                        let unchanged = prior.clone();
                        self.bound_resources.insert(path, unchanged);
                        return Ok(());
                    }
                }
                let prior_node = prior.as_ref().and_then(|b| b.usage_node);
                if let Some(node) = prior_node {
                    self.pending_closes.push(node);
                }
                let usage_node = self.maybe_record_usage(*texture, path, reflection, command_index, usages);
                (
                    Some(BoundResource { handle: *texture, command: command.clone(), usage_node, in_argument_buffer: false, consistent_usage_assumed, emitted: true }),
                    true,
                )
            }
            BindingCommand::SetArgumentBufferArray { array } => (
                // deferred: held, not emitted, until a member is bound.
                Some(BoundResource { handle: *array, command: command.clone(), usage_node: None, in_argument_buffer: false, consistent_usage_assumed, emitted: false }),
                false,
            ),
            BindingCommand::SetArgumentBuffer { argument_buffer } => {
                let prior_node = prior.as_ref().and_then(|b| b.usage_node);
                if let Some(node) = prior_node {
                    self.pending_closes.push(node);
                }
                let usage_node = self.maybe_record_usage(*argument_buffer, path, reflection, command_index, usages);
                (
                    Some(BoundResource { handle: *argument_buffer, command: command.clone(), usage_node, in_argument_buffer: false, consistent_usage_assumed, emitted: true }),
                    true,
                )
            }
        };

        if let Some(next) = next {
            if let BindingCommand::SetArgumentBuffer { argument_buffer } = next.command {
                self.pending_argument_buffers.insert(path, argument_buffer);
            }
            if next.usage_node.map(|n| n.read(usages.usages(n.handle)).ty.is_read_write()).unwrap_or(false) {
                self.bound_uav_resources.insert(path);
            }
            self.bound_resources.insert(path, next);
        }
        if emit {
            self.emitted.push(EmittedCommand { path, command, command_index });
        }
        Ok(())
    }

    /// Step 4d: if the reflection marks `path` active (pipeline unchanged),
    /// record a usage node immediately. Unreflected/inactive bindings still
    /// record a zero-range "unused argument buffer" usage per the edge case
    /// in §4.F, when `handle` names an argument buffer.
    fn maybe_record_usage(
        &self,
        handle: Handle,
        path: BindingPath,
        reflection: &dyn PipelineReflection,
        command_index: u64,
        usages: &dyn UsageSink,
    ) -> Option<UsageNode> {
        match reflection.argument_reflection(path) {
            Some(info) if info.is_active => Some(record(
                usages.usages(handle),
                ResourceUsage {
                    handle,
                    subresources: Subresources::Whole,
                    ty: info.usage_type,
                    stages: info.active_stages,
                    active_range: command_index..command_index + 1,
                    pass_index: 0,
                },
            )),
            Some(_) if handle.kind() == crate::handle::ResourceKind::ArgumentBuffer => Some(record(
                usages.usages(handle),
                ResourceUsage {
                    handle,
                    subresources: Subresources::Whole,
                    ty: UsageType::UNUSED_ARGUMENT_BUFFER,
                    stages: Default::default(),
                    active_range: command_index..command_index,
                    pass_index: 0,
                },
            )),
            _ => None,
        }
    }

    /// Step 6: re-walk every tracked binding against a fresh pipeline
    /// reflection. A surviving entry always gets a fresh usage node (the new
    /// reflection can report a different usage type/stages/active-range at
    /// the same path) and is re-emitted only if it hadn't been already.
    fn rewalk_bound_resources(&mut self, reflection: &dyn PipelineReflection, command_index: u64, usages: &dyn UsageSink) {
        let entries: Vec<(BindingPath, BoundResource)> = self.bound_resources.drain().collect();
        for (path, mut bound) in entries {
            let active = reflection.binding_is_active(path);
            if !active {
                if let Some(node) = bound.usage_node.take() {
                    self.pending_closes.push(node);
                }
                if bound.handle.kind() == crate::handle::ResourceKind::ArgumentBuffer {
                    self.pending_argument_buffers.remove(&path);
                }
                continue;
            }
            if let Some(stale) = bound.usage_node.take() {
                self.pending_closes.push(stale);
            }
            bound.usage_node = self.maybe_record_usage(bound.handle, path, reflection, command_index, usages);
            if !bound.emitted {
                self.emitted.push(EmittedCommand { path, command: bound.command.clone(), command_index });
                bound.emitted = true;
            }
            if bound
                .usage_node
                .map(|n| n.read(usages.usages(n.handle)).ty.is_read_write())
                .unwrap_or(false)
            {
                self.bound_uav_resources.insert(path);
            }
            if bound.consistent_usage_assumed {
                self.untracked_bound_resources.insert(path, bound);
            } else {
                self.bound_resources.insert(path, bound);
            }
        }
    }

    /// Step 7: when the pipeline did NOT change, refresh every UAV
    /// read-write binding's usage node so consecutive dispatches get a
    /// barrier seam between them.
    fn refresh_uav_usages(&mut self, reflection: &dyn PipelineReflection, command_index: u64, usages: &dyn UsageSink) {
        let paths: Vec<BindingPath> = self.bound_uav_resources.iter().copied().collect();
        for path in paths {
            let Some(bound) = self.bound_resources.get_mut(&path) else { continue };
            if let Some(old) = bound.usage_node.take() {
                self.pending_closes.push(old);
            }
            bound.usage_node = self.maybe_record_usage(bound.handle, path, reflection, command_index, usages);
        }
    }
}
