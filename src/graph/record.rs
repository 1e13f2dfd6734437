use std::borrow::Cow;

use fixedbitset::FixedBitSet;
use smallvec::SmallVec;

use crate::{
    device::{Device, NativeResource},
    tracing::shim_macros::{debug, trace},
    util::constant_ahash_hashmap,
};

use super::{
    access::Access,
    barrier::{skip_barrier, BarrierBatch, SharedBatchKey, SubresourceState},
    blackboard::Blackboard,
    execute::{PassCallback, PassContext},
    resource::{ResourceData, SubresourceRange},
    BatchId, GraphContext, GraphObject, GraphObjectDisplay, GraphPass, GraphResource,
    GraphTexture, PassOption, Pipeline, StateId,
};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PassFlags: u16 {
        /// Draws into render targets, runs inside a render pass.
        const RASTER = 1 << 0;
        const COMPUTE = 1 << 1;
        /// Compute work scheduled on the async compute pipeline.
        const ASYNC_COMPUTE = 1 << 2;
        const COPY = 1 << 3;
        /// Kept even if nothing depends on its results.
        const NEVER_CULL = 1 << 4;
        /// The callback begins and ends the render pass on its own.
        const SKIP_RENDER_PASS = 1 << 5;
        /// Never shares its render pass with neighbouring passes.
        const NEVER_MERGE = 1 << 6;
        /// Always recorded on the submitting thread.
        const NEVER_PARALLEL = 1 << 7;
    }
}

/// Whether the callback of a pass may be recorded on a worker thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PassTaskMode {
    Inline,
    #[default]
    Deferred,
}

/// What happens to the contents of a render target when its render pass begins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum LoadAction {
    #[default]
    Load,
    Clear,
    DontCare,
}

/// Access of the depth and stencil planes of a depth-stencil target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepthStencilAccess {
    Read,
    Write,
    DepthWriteStencilRead,
    DepthReadStencilWrite,
}

impl DepthStencilAccess {
    /// Accesses of the depth and the stencil plane.
    fn plane_accesses(self) -> [Access; 2] {
        match self {
            DepthStencilAccess::Read => [Access::DSV_READ, Access::DSV_READ],
            DepthStencilAccess::Write => [Access::DSV_WRITE, Access::DSV_WRITE],
            DepthStencilAccess::DepthWriteStencilRead => [Access::DSV_WRITE, Access::DSV_READ],
            DepthStencilAccess::DepthReadStencilWrite => [Access::DSV_READ, Access::DSV_WRITE],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct RenderTargetBinding {
    pub(crate) texture: GraphTexture,
    pub(crate) range: SubresourceRange,
    pub(crate) access: Access,
    pub(crate) load: LoadAction,
}

impl RenderTargetBinding {
    /// Same attachment regardless of how it is loaded.
    pub(crate) fn same_target(&self, other: &RenderTargetBinding) -> bool {
        self.texture == other.texture && self.range == other.range && self.access == other.access
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PassBinding {
    pub(crate) resource: GraphResource,
    pub(crate) range: SubresourceRange,
    pub(crate) access: Access,
    pub(crate) render_target: bool,
}

/// The resources a pass accesses and how it is scheduled.
///
/// ```ignore
/// let parameters = PassParameters::new()
///     .texture(scene_depth, Access::SRV_GRAPHICS)
///     .render_target(scene_color, LoadAction::Clear);
/// ```
#[derive(Clone, Debug)]
pub struct PassParameters {
    bindings: Vec<PassBinding>,
    render_targets: SmallVec<[RenderTargetBinding; 4]>,
    depth_stencil: Option<(GraphTexture, DepthStencilAccess, LoadAction)>,
    task_mode: PassTaskMode,
    workload: u32,
}

impl Default for PassParameters {
    fn default() -> Self {
        Self::new()
    }
}

impl PassParameters {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            render_targets: SmallVec::new(),
            depth_stencil: None,
            task_mode: PassTaskMode::Deferred,
            workload: 1,
        }
    }
    pub fn texture(self, texture: GraphTexture, access: Access) -> Self {
        self.texture_range(texture, SubresourceRange::ALL, access)
    }
    pub fn texture_range(
        mut self,
        texture: GraphTexture,
        range: SubresourceRange,
        access: Access,
    ) -> Self {
        self.bindings.push(PassBinding {
            resource: texture.into(),
            range,
            access,
            render_target: false,
        });
        self
    }
    pub fn buffer(mut self, buffer: super::GraphBuffer, access: Access) -> Self {
        self.bindings.push(PassBinding {
            resource: buffer.into(),
            range: SubresourceRange::ALL,
            access,
            render_target: false,
        });
        self
    }
    pub fn render_target(self, texture: GraphTexture, load: LoadAction) -> Self {
        self.render_target_range(texture, SubresourceRange::mip(0), load)
    }
    pub fn render_target_range(
        mut self,
        texture: GraphTexture,
        range: SubresourceRange,
        load: LoadAction,
    ) -> Self {
        self.bindings.push(PassBinding {
            resource: texture.into(),
            range,
            access: Access::RTV,
            render_target: true,
        });
        self.render_targets.push(RenderTargetBinding {
            texture,
            range,
            access: Access::RTV,
            load,
        });
        self
    }
    pub fn depth_stencil(
        mut self,
        texture: GraphTexture,
        access: DepthStencilAccess,
        load: LoadAction,
    ) -> Self {
        self.depth_stencil = Some((texture, access, load));
        self
    }
    pub fn task_mode(mut self, mode: PassTaskMode) -> Self {
        self.task_mode = mode;
        self
    }
    /// Relative recording cost, used to size parallel pass sets.
    pub fn workload(mut self, workload: u32) -> Self {
        self.workload = workload;
        self
    }
}

// dependencies can be "hard" and "soft"
//   hard means it guards a Read After Write or Write After Write
//   soft means it guards a Write After Read
// soft dependencies do not propagate "pass is alive" status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PassDependency {
    pass: GraphPass,
    hard: bool,
}

impl PassDependency {
    pub(crate) fn new(pass: GraphPass, hard: bool) -> Self {
        Self { pass, hard }
    }
    pub(crate) fn get_pass(&self) -> GraphPass {
        self.pass
    }
    pub(crate) fn is_hard(&self) -> bool {
        self.hard
    }
}

/// The subresource states of one resource inside one pass.
pub(crate) struct PassResourceState {
    pub(crate) resource: GraphResource,
    pub(crate) states: SmallVec<[Option<StateId>; 1]>,
    pub(crate) merge_states: SmallVec<[Option<StateId>; 1]>,
    pub(crate) reference_count: u32,
}

impl PassResourceState {
    fn new(resource: GraphResource, count: usize) -> Self {
        Self {
            resource,
            states: smallvec::smallvec![None; count],
            merge_states: smallvec::smallvec![None; count],
            reference_count: 0,
        }
    }
}

pub(crate) struct PassData {
    pub(crate) flags: PassFlags,
    pub(crate) pipeline: Pipeline,
    pub(crate) task_mode: PassTaskMode,
    pub(crate) workload: u32,

    pub(crate) bindings: Vec<PassBinding>,
    pub(crate) render_targets: SmallVec<[RenderTargetBinding; 4]>,
    /// Indices of every resource the pass binds.
    pub(crate) bound: FixedBitSet,
    pub(crate) resource_states: Vec<PassResourceState>,
    pub(crate) dependencies: Vec<PassDependency>,

    pub(crate) culled: bool,
    pub(crate) empty_parameters: bool,
    pub(crate) render_pass_only_writes: bool,

    pub(crate) cross_pipeline_producer: PassOption,
    /// Sorted.
    pub(crate) cross_pipeline_consumers: SmallVec<[GraphPass; 2]>,
    pub(crate) graphics_fork_pass: PassOption,
    pub(crate) graphics_join_pass: PassOption,
    pub(crate) async_compute_begin: bool,
    pub(crate) async_compute_end: bool,
    pub(crate) graphics_fork: bool,
    pub(crate) graphics_join: bool,

    pub(crate) skip_render_pass_begin: bool,
    pub(crate) skip_render_pass_end: bool,
    pub(crate) prologue_barrier_pass: GraphPass,
    pub(crate) epilogue_barrier_pass: GraphPass,
    /// Passes whose resources are allocated or released at this pass' barriers.
    pub(crate) resources_to_begin: SmallVec<[GraphPass; 1]>,
    pub(crate) resources_to_end: SmallVec<[GraphPass; 1]>,
    pub(crate) parallel_set: Option<u32>,

    pub(crate) prologue_begin: Option<BatchId>,
    pub(crate) prologue_end: SmallVec<[BatchId; 4]>,
    /// Indexed by [`PipelineMask::epilogue_slot`](super::PipelineMask::epilogue_slot).
    pub(crate) epilogue_begin_for: [Option<BatchId>; 3],
    pub(crate) shared_epilogue_begin: SmallVec<[BatchId; 2]>,
    pub(crate) epilogue_end: SmallVec<[BatchId; 4]>,
}

impl PassData {
    fn new(
        handle: GraphPass,
        flags: PassFlags,
        pipeline: Pipeline,
        task_mode: PassTaskMode,
        workload: u32,
    ) -> Self {
        Self {
            flags,
            pipeline,
            task_mode,
            workload,
            bindings: Vec::new(),
            render_targets: SmallVec::new(),
            bound: FixedBitSet::new(),
            resource_states: Vec::new(),
            dependencies: Vec::new(),
            culled: false,
            empty_parameters: true,
            render_pass_only_writes: true,
            cross_pipeline_producer: PassOption::NONE,
            cross_pipeline_consumers: SmallVec::new(),
            graphics_fork_pass: PassOption::NONE,
            graphics_join_pass: PassOption::NONE,
            async_compute_begin: false,
            async_compute_end: false,
            graphics_fork: false,
            graphics_join: false,
            skip_render_pass_begin: false,
            skip_render_pass_end: false,
            prologue_barrier_pass: handle,
            epilogue_barrier_pass: handle,
            resources_to_begin: smallvec::smallvec![handle],
            resources_to_end: smallvec::smallvec![handle],
            parallel_set: None,
            prologue_begin: None,
            prologue_end: SmallVec::new(),
            epilogue_begin_for: [None; 3],
            shared_epilogue_begin: SmallVec::new(),
            epilogue_end: SmallVec::new(),
        }
    }
    pub(crate) fn add_dependency(&mut self, dependency: GraphPass, hard: bool) {
        if let Some(found) = self
            .dependencies
            .iter_mut()
            .find(|d| d.get_pass() == dependency)
        {
            // hard dependency overwrites a soft one
            found.hard |= hard;
        } else {
            self.dependencies.push(PassDependency::new(dependency, hard));
        }
    }
    pub(crate) fn is_raster(&self) -> bool {
        self.flags.contains(PassFlags::RASTER)
    }
    pub(crate) fn is_async_compute(&self) -> bool {
        self.pipeline == Pipeline::AsyncCompute
    }
}

/// Records the passes and resources of a single frame.
///
/// Recording is pure bookkeeping, nothing reaches the device until
/// [`GraphBuilder::execute`] compiles the frame.
pub struct GraphBuilder<'a> {
    pub(crate) context: &'a mut GraphContext,
    pub(crate) device: &'a dyn Device,

    pub(crate) passes: Vec<GraphObject<PassData>>,
    pub(crate) callbacks: Vec<Option<PassCallback>>,
    pub(crate) resources: Vec<GraphObject<ResourceData>>,
    pub(crate) external_lookup: ahash::HashMap<NativeResource, GraphResource>,

    pub(crate) states: Vec<SubresourceState>,
    pub(crate) batches: Vec<BarrierBatch>,
    pub(crate) shared_batches: ahash::HashMap<SharedBatchKey, BatchId>,

    pub(crate) cull_stack: Vec<GraphPass>,
    pub(crate) uav_overlap_group: Option<u32>,
    next_uav_overlap_group: u32,

    /// First and last pass of every merged render pass, in pass order.
    pub(crate) merged_regions: Vec<(GraphPass, GraphPass)>,
    pub(crate) blackboard: Blackboard,
    pub(crate) dump_requested: bool,
    pub(crate) visualize_requests: Vec<String>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(context: &'a mut GraphContext, device: &'a dyn Device) -> Self {
        context.stats.reset();

        let mut builder = Self {
            context,
            device,
            passes: Vec::new(),
            callbacks: Vec::new(),
            resources: Vec::new(),
            external_lookup: constant_ahash_hashmap(),
            states: Vec::new(),
            batches: Vec::new(),
            shared_batches: constant_ahash_hashmap(),
            cull_stack: Vec::new(),
            uav_overlap_group: None,
            next_uav_overlap_group: 0,
            merged_regions: Vec::new(),
            blackboard: Blackboard::new(),
            dump_requested: false,
            visualize_requests: Vec::new(),
        };

        builder.push_pass(
            "Graph Prologue".into(),
            PassFlags::NEVER_CULL,
            PassTaskMode::Inline,
            0,
        );
        builder
    }

    #[track_caller]
    pub(crate) fn push_pass(
        &mut self,
        name: Cow<'static, str>,
        flags: PassFlags,
        task_mode: PassTaskMode,
        workload: u32,
    ) -> GraphPass {
        if self.context.config.validation {
            assert!(
                !flags.contains(PassFlags::RASTER | PassFlags::ASYNC_COMPUTE),
                "Pass '{}' can't be both RASTER and ASYNC_COMPUTE",
                name
            );
        }
        let pipeline = if flags.contains(PassFlags::ASYNC_COMPUTE)
            && self.context.config.async_compute_enabled()
        {
            Pipeline::AsyncCompute
        } else {
            Pipeline::Graphics
        };

        let handle = GraphPass::new(self.passes.len());
        trace!("Pass '{}' recorded as #{} on {}", name, handle.index(), pipeline.name());
        self.passes.push(GraphObject::new(
            name,
            PassData::new(handle, flags, pipeline, task_mode, workload),
        ));
        self.callbacks.push(None);
        handle
    }

    /// Records a pass, `callback` runs once the frame is executed.
    ///
    /// Every resource the callback touches has to be bound in `parameters`.
    #[track_caller]
    pub fn add_pass<F>(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        flags: PassFlags,
        parameters: PassParameters,
        callback: F,
    ) -> GraphPass
    where
        F: FnOnce(&mut PassContext<'_>) + Send + 'static,
    {
        let handle = self.push_pass(
            name.into(),
            flags,
            parameters.task_mode,
            parameters.workload,
        );
        self.callbacks[handle.index()] = Some(Box::new(callback));
        self.setup_pass_resources(handle, parameters, false);
        self.setup_pass_dependencies(handle);
        handle
    }

    #[track_caller]
    fn validate_binding(&self, pass: GraphPass, binding: &PassBinding) {
        let data = &self.resources[binding.resource.index()];
        let resource = self.get_resource_display(binding.resource);
        assert!(
            !binding.access.is_empty(),
            "Pass '{}' binds resource '{}' with an unknown access",
            self.get_pass_display(pass),
            resource
        );
        assert!(
            data.desc.usage_satisfies(binding.access),
            "Resource '{}' is missing usage {}",
            resource,
            data.desc.missing_usage(binding.access)
        );
        assert!(
            binding.range.is_within(data.layout),
            "Subresource range {:?} is outside of resource '{}'",
            binding.range,
            resource
        );
        assert!(
            !(data.is_extracted() && binding.access.is_writable()),
            "Resource '{}' is written by pass '{}' after being extracted",
            resource,
            self.get_pass_display(pass)
        );
    }

    #[track_caller]
    fn setup_pass_resources(
        &mut self,
        handle: GraphPass,
        parameters: PassParameters,
        external_access_pass: bool,
    ) {
        let pipeline = self.passes[handle.index()].pipeline;
        let validation = self.context.config.validation;

        let PassParameters {
            mut bindings,
            mut render_targets,
            depth_stencil,
            ..
        } = parameters;

        if let Some((texture, access, load)) = depth_stencil {
            let planes = self.resources[texture.index()].layout.planes as usize;
            for (plane, access) in access.plane_accesses().into_iter().enumerate().take(planes) {
                let range = SubresourceRange::plane(plane as u32);
                bindings.push(PassBinding {
                    resource: texture.into(),
                    range,
                    access,
                    render_target: true,
                });
                render_targets.push(RenderTargetBinding {
                    texture,
                    range,
                    access,
                    load,
                });
            }
        }

        let mut bound = FixedBitSet::with_capacity(self.resources.len());
        let mut resource_states: Vec<PassResourceState> = Vec::new();
        let mut render_pass_only_writes = true;

        for binding in &bindings {
            let resource = binding.resource;
            if validation {
                self.validate_binding(handle, binding);
            }
            bound.insert(resource.index());

            let data = &self.resources[resource.index()];
            let layout = data.layout;
            if let (Some(external), false) = (data.external_access, external_access_pass) {
                // the resource is owned by code outside the graph, passes may only read it
                if validation {
                    assert!(
                        !binding.access.is_writable() && external.contains(binding.access),
                        "Resource '{}' is in external access mode {} and can't be accessed as {}",
                        self.get_resource_display(resource),
                        external,
                        binding.access
                    );
                }
                // no state is tracked past the handover, ordering behind it is enough
                if let Some(external_pass) = data.external_access_pass.get() {
                    self.passes[handle.index()].add_dependency(external_pass, true);
                }
                continue;
            }

            let state_index = match resource_states.iter().position(|s| s.resource == resource)
            {
                Some(index) => index,
                None => {
                    resource_states.push(PassResourceState::new(resource, layout.count()));
                    resource_states.len() - 1
                }
            };
            resource_states[state_index].reference_count += 1;

            let group = if binding.access.is_uav() {
                self.uav_overlap_group
            } else {
                None
            };

            for sub in binding.range.indices(layout) {
                match resource_states[state_index].states[sub] {
                    Some(id) => {
                        let previous = self.states[id.index()].access;
                        if validation {
                            assert!(
                                !previous.conflicts_with(binding.access),
                                "Pass '{}' binds overlapping ranges of '{}' as {} and {}",
                                self.get_pass_display(handle),
                                self.get_resource_display(resource),
                                previous,
                                binding.access
                            );
                        }
                        let state = &mut self.states[id.index()];
                        state.access = previous.merge_valid(binding.access);
                        if state.no_barrier_group != group {
                            state.no_barrier_group = None;
                        }
                    }
                    None => {
                        let mut state = SubresourceState::at(pipeline, handle, binding.access);
                        state.no_barrier_group = group;
                        let id = self.alloc_state(state);
                        resource_states[state_index].states[sub] = Some(id);
                    }
                }
            }

            if binding.access.is_writable() {
                render_pass_only_writes &= binding.render_target;
                self.resources[resource.index()].produced = true;
            }
        }

        let pass = &mut self.passes[handle.index()];
        pass.empty_parameters = bindings.is_empty();
        pass.render_pass_only_writes = render_pass_only_writes;
        pass.bindings = bindings;
        pass.render_targets = render_targets;
        pass.bound = bound;
        pass.resource_states = resource_states;
    }

    fn setup_pass_dependencies(&mut self, handle: GraphPass) {
        let pipeline = self.passes[handle.index()].pipeline;
        let mut is_cull_root_producer = false;

        for state_index in 0..self.passes[handle.index()].resource_states.len() {
            let pass_state = &self.passes[handle.index()].resource_states[state_index];
            let resource = pass_state.resource;
            let reference_count = pass_state.reference_count;
            self.resources[resource.index()].reference_count += reference_count;

            let count = self.resources[resource.index()].subresource_count();
            for sub in 0..count {
                let Some(id) = self.passes[handle.index()].resource_states[state_index].states[sub]
                else {
                    continue;
                };
                let state = *self.state(id);
                let wrote = self.add_culling_dependency(
                    handle,
                    pipeline,
                    resource,
                    sub,
                    state.access,
                    state.no_barrier_group,
                );
                is_cull_root_producer |= wrote && self.resources[resource.index()].is_cull_root();
            }
        }

        let cull = self.context.config.cull_enabled();
        let pass = &mut self.passes[handle.index()];
        pass.culled = cull;

        if cull && (is_cull_root_producer || pass.flags.contains(PassFlags::NEVER_CULL)) {
            self.cull_stack.push(handle);
            self.flush_cull_stack();
        }
    }

    /// Links `pass` to the previous producers of a subresource, returns whether it writes it.
    fn add_culling_dependency(
        &mut self,
        pass: GraphPass,
        pipeline: Pipeline,
        resource: GraphResource,
        subresource: usize,
        access: Access,
        group: Option<u32>,
    ) -> bool {
        let mut dependencies: SmallVec<[(GraphPass, bool); 4]> = SmallVec::new();
        let producers = &mut self.resources[resource.index()].producers[subresource];

        for last_pipeline in Pipeline::ALL {
            let last = &producers[last_pipeline];
            if last.access.is_empty() {
                continue;
            }
            let mut producer = last.pass;
            // a skipped uav barrier across pipelines is fenced by the pass before the overlap
            if last_pipeline != pipeline
                && access.is_uav()
                && skip_barrier(last.no_barrier_group, group)
            {
                producer = last.pass_if_skip_barrier;
            }
            if let Some(producer) = producer.get().filter(|&p| p != pass) {
                dependencies.push((producer, true));
            }
        }

        let wrote = if access.is_writable() {
            // write after a read on the other pipeline still needs a fence
            if let Some(reader) = producers[pipeline.other()]
                .pass_if_read
                .get()
                .filter(|&p| p != pass)
            {
                dependencies.push((reader, false));
            }

            let last = &mut producers[pipeline];
            match (last.no_barrier_group, group) {
                (None, None) => last.pass_if_skip_barrier = pass.into(),
                (Some(previous), next) if Some(previous) != next => {
                    last.pass_if_skip_barrier = last.pass
                }
                _ => {}
            }
            last.access = access;
            last.pass = pass.into();
            last.no_barrier_group = group;
            last.pass_if_read = PassOption::NONE;
            true
        } else {
            producers[pipeline].pass_if_read = pass.into();
            false
        };

        for (dependency, hard) in dependencies {
            self.passes[pass.index()].add_dependency(dependency, hard);
        }
        wrote
    }

    /// Marks every pass reachable from the stack through hard dependencies as alive.
    pub(crate) fn flush_cull_stack(&mut self) {
        while let Some(pass) = self.cull_stack.pop() {
            let data = &mut self.passes[pass.index()];
            if data.culled {
                data.culled = false;
                self.cull_stack.extend(
                    data.dependencies
                        .iter()
                        .filter(|d| d.is_hard())
                        .map(|d| d.get_pass()),
                );
            }
        }
    }

    /// Orders `after` behind `before` even without a shared resource.
    #[track_caller]
    pub fn add_pass_dependency(&mut self, before: GraphPass, after: GraphPass) {
        if self.context.config.validation {
            assert!(
                before < after,
                "Pass '{}' can't depend on the later pass '{}', it would form a cycle",
                self.get_pass_display(after),
                self.get_pass_display(before)
            );
        }
        self.passes[after.index()].add_dependency(before, true);
        if self.context.config.cull_enabled() && !self.passes[after.index()].culled {
            self.cull_stack.push(before);
            self.flush_cull_stack();
        }
    }

    pub fn set_pass_never_cull(&mut self, pass: GraphPass) {
        let data = &mut self.passes[pass.index()];
        data.flags |= PassFlags::NEVER_CULL;
        if data.culled {
            self.cull_stack.push(pass);
            self.flush_cull_stack();
        }
    }

    /// Unordered access writes recorded until [`GraphBuilder::end_uav_overlap`] don't wait for
    /// each other.
    #[track_caller]
    pub fn begin_uav_overlap(&mut self) {
        if self.context.config.validation {
            assert!(
                self.uav_overlap_group.is_none(),
                "UAV overlap is already active"
            );
        }
        self.uav_overlap_group = Some(self.next_uav_overlap_group);
        self.next_uav_overlap_group += 1;
    }

    pub fn end_uav_overlap(&mut self) {
        self.uav_overlap_group = None;
    }

    /// Hands an external or extracted resource to code outside the graph in `access`.
    ///
    /// The resource is transitioned by a synthetic pass and left alone afterwards, later passes
    /// may only read it through a subset of `access`. Returns that pass, later passes binding the
    /// resource are ordered after it.
    #[track_caller]
    pub fn set_external_access_mode(
        &mut self,
        resource: impl Into<GraphResource>,
        access: Access,
    ) -> GraphPass {
        let resource = resource.into();
        let data = &self.resources[resource.index()];
        if self.context.config.validation {
            assert!(
                data.is_cull_root(),
                "Resource '{}' must be external or extracted to use external access mode",
                self.get_resource_display(resource)
            );
            assert!(
                access.is_read_only(),
                "External access mode {} of '{}' must be read only",
                access,
                self.get_resource_display(resource)
            );
        }
        if let Some(pass) = data.external_access_pass.get() {
            if self.context.config.validation {
                assert_eq!(
                    data.external_access,
                    Some(access),
                    "External access mode of '{}' can't change within a frame",
                    self.get_resource_display(resource)
                );
            }
            return pass;
        }

        let handle = self.push_pass(
            "External Access".into(),
            PassFlags::NEVER_CULL,
            PassTaskMode::Inline,
            0,
        );
        let binding = PassBinding {
            resource,
            range: SubresourceRange::ALL,
            access,
            render_target: false,
        };
        let mut parameters = PassParameters::new().task_mode(PassTaskMode::Inline);
        parameters.bindings.push(binding);
        self.setup_pass_resources(handle, parameters, true);
        self.setup_pass_dependencies(handle);

        let data = &mut self.resources[resource.index()];
        data.external_access = Some(access);
        data.external_access_pass = handle.into();
        data.epilogue_access = access;
        debug!(
            "Resource '{}' set to external access mode {}",
            self.get_resource_display(resource),
            access
        );
        handle
    }

    /// Whether the pass is currently considered dead, it may still be revived by later
    /// recording such as extracting a resource it writes.
    pub fn is_pass_culled(&self, pass: GraphPass) -> bool {
        self.passes[pass.index()].culled
    }
    pub fn pass_name(&self, pass: GraphPass) -> &str {
        &self.passes[pass.index()].name
    }
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }
    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }
    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        &mut self.blackboard
    }
    pub(crate) fn get_pass_display(&self, pass: GraphPass) -> GraphObjectDisplay<'_> {
        self.passes[pass.index()]
            .display(pass.index())
            .set_prefix("pass ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::GraphConfig,
        device::recording::RecordingDevice,
        graph::{TextureDesc, TextureFormat, TextureUsage},
    };

    fn color_desc() -> TextureDesc {
        TextureDesc::new_2d(
            16,
            16,
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE | TextureUsage::UNORDERED_ACCESS,
        )
    }

    #[test]
    fn test_dependencies() {
        let device = RecordingDevice::new();
        let mut context = GraphContext::new(GraphConfig::default()).unwrap();
        let mut graph = GraphBuilder::new(&mut context, &device);

        let texture = graph.create_texture("Color", color_desc());
        let write = graph.add_pass(
            "Write",
            PassFlags::RASTER,
            PassParameters::new().render_target(texture, LoadAction::Clear),
            |_| {},
        );
        let read = graph.add_pass(
            "Read",
            PassFlags::COMPUTE,
            PassParameters::new().texture(texture, Access::SRV_COMPUTE),
            |_| {},
        );
        let overwrite = graph.add_pass(
            "Overwrite",
            PassFlags::COMPUTE,
            PassParameters::new().texture(texture, Access::UAV_COMPUTE),
            |_| {},
        );

        assert_eq!(
            graph.passes[read.index()].dependencies,
            [PassDependency::new(write, true)]
        );
        // same pipeline write after read is ordered by the pass order alone
        assert_eq!(
            graph.passes[overwrite.index()].dependencies,
            [PassDependency::new(write, true)]
        );
        assert_eq!(graph.resources[texture.index()].reference_count, 3);
    }

    #[test]
    fn test_cull_roots() {
        let device = RecordingDevice::new();
        let mut context = GraphContext::new(GraphConfig::default()).unwrap();
        let mut graph = GraphBuilder::new(&mut context, &device);

        let texture = graph.create_texture("Color", color_desc());
        let write = graph.add_pass(
            "Write",
            PassFlags::RASTER,
            PassParameters::new().render_target(texture, LoadAction::Clear),
            |_| {},
        );
        assert!(graph.is_pass_culled(write));

        graph.extract_texture(texture, Access::SRV_GRAPHICS);
        assert!(!graph.is_pass_culled(write));

        let never_cull = graph.add_pass(
            "Never Cull",
            PassFlags::COMPUTE | PassFlags::NEVER_CULL,
            PassParameters::new(),
            |_| {},
        );
        assert!(!graph.is_pass_culled(never_cull));
    }

    #[test]
    fn test_depth_planes() {
        let device = RecordingDevice::new();
        let mut context = GraphContext::new(GraphConfig::default()).unwrap();
        let mut graph = GraphBuilder::new(&mut context, &device);

        let depth = graph.create_texture(
            "Depth",
            TextureDesc::new_2d(
                16,
                16,
                TextureFormat::Depth24PlusStencil8,
                TextureUsage::DEPTH_STENCIL,
            ),
        );
        let pass = graph.add_pass(
            "Depth",
            PassFlags::RASTER,
            PassParameters::new().depth_stencil(
                depth,
                DepthStencilAccess::DepthWriteStencilRead,
                LoadAction::Clear,
            ),
            |_| {},
        );

        let data = &graph.passes[pass.index()];
        assert_eq!(data.render_targets.len(), 2);
        let states = &data.resource_states[0].states;
        assert_eq!(graph.state(states[0].unwrap()).access, Access::DSV_WRITE);
        assert_eq!(graph.state(states[1].unwrap()).access, Access::DSV_READ);
    }

    #[test]
    #[should_panic(expected = "is missing usage")]
    fn test_missing_usage() {
        let device = RecordingDevice::new();
        let mut context = GraphContext::new(GraphConfig {
            validation: true,
            ..Default::default()
        })
        .unwrap();
        let mut graph = GraphBuilder::new(&mut context, &device);

        let texture = graph.create_texture(
            "Color",
            TextureDesc::new_2d(16, 16, TextureFormat::Rgba8Unorm, TextureUsage::SHADER_RESOURCE),
        );
        graph.add_pass(
            "Write",
            PassFlags::COMPUTE,
            PassParameters::new().texture(texture, Access::UAV_COMPUTE),
            |_| {},
        );
    }

    #[test]
    #[should_panic(expected = "binds overlapping ranges")]
    fn test_conflicting_overlap() {
        let device = RecordingDevice::new();
        let mut context = GraphContext::new(GraphConfig {
            validation: true,
            ..Default::default()
        })
        .unwrap();
        let mut graph = GraphBuilder::new(&mut context, &device);

        let texture = graph.create_texture("Color", color_desc().with_mips(2));
        graph.add_pass(
            "Conflict",
            PassFlags::COMPUTE,
            PassParameters::new()
                .texture(texture, Access::SRV_COMPUTE)
                .texture_range(texture, SubresourceRange::mip(1), Access::UAV_COMPUTE),
            |_| {},
        );
    }

    #[test]
    #[should_panic(expected = "would form a cycle")]
    fn test_cyclic_dependency() {
        let device = RecordingDevice::new();
        let mut context = GraphContext::new(GraphConfig {
            validation: true,
            ..Default::default()
        })
        .unwrap();
        let mut graph = GraphBuilder::new(&mut context, &device);

        let a = graph.add_pass("A", PassFlags::COMPUTE, PassParameters::new(), |_| {});
        let b = graph.add_pass("B", PassFlags::COMPUTE, PassParameters::new(), |_| {});
        graph.add_pass_dependency(b, a);
    }
}
