use std::borrow::Cow;

use bumpalo::Bump;
use fixedbitset::FixedBitSet;
use rayon::prelude::{IntoParallelIterator, ParallelIterator};

use crate::{
    device::{NativeBuffer, NativeResource, NativeTexture, TransitionToken},
    error::GraphResult,
    stats::{GraphStats, StatsSnapshot},
    tracing::shim_macros::{debug, error, info, trace},
};

use super::{
    barrier::BarrierBatch,
    record::{GraphBuilder, PassData, PassFlags, PassTaskMode},
    resource::{Placement, ResourceData},
    BatchId, GraphBuffer, GraphObject, GraphPass, GraphResource, GraphTexture, Pipeline,
};

pub(crate) type PassCallback = Box<dyn FnOnce(&mut PassContext<'_>) + Send + 'static>;

/// One entry of the stream handed to [`Device::submit`](crate::device::Device::submit).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Following commands run on another pipeline.
    SetPipeline(Pipeline),
    BeginPass(GraphPass),
    EndPass(GraphPass),
    BeginTransitions {
        pipeline: Pipeline,
        token: TransitionToken,
    },
    EndTransitions {
        pipeline: Pipeline,
        token: TransitionToken,
    },
    BeginRenderPass(GraphPass),
    EndRenderPass(GraphPass),
    /// Recorded by a pass callback through [`PassContext::record`].
    User {
        pass: GraphPass,
        label: Cow<'static, str>,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandStream {
    commands: Vec<Command>,
}

impl CommandStream {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }
    pub fn len(&self) -> usize {
        self.commands.len()
    }
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
    /// Moves every command of `other` to the end of this stream.
    pub fn append(&mut self, other: &mut CommandStream) {
        self.commands.append(&mut other.commands);
    }
}

/// Handed to a pass callback while the frame is being recorded.
///
/// Only the resources bound in the parameters of the pass can be resolved to native handles.
pub struct PassContext<'a> {
    pass: GraphPass,
    name: &'a str,
    pipeline: Pipeline,
    stream: &'a mut CommandStream,
    bound: &'a FixedBitSet,
    resources: &'a [GraphObject<ResourceData>],
    validation: bool,
}

impl<'a> PassContext<'a> {
    pub fn pass(&self) -> GraphPass {
        self.pass
    }
    pub fn name(&self) -> &str {
        self.name
    }
    pub fn pipeline(&self) -> Pipeline {
        self.pipeline
    }
    /// Appends a labelled command to the stream of the pass.
    pub fn record(&mut self, label: impl Into<Cow<'static, str>>) {
        self.stream.push(Command::User {
            pass: self.pass,
            label: label.into(),
        });
    }
    #[track_caller]
    fn native(&self, resource: GraphResource) -> NativeResource {
        let data = &self.resources[resource.index()];
        if self.validation {
            assert!(
                self.bound.contains(resource.index()),
                "Pass '{}' accesses resource '{}' which it did not bind",
                self.name,
                data.display(resource.index())
            );
        }
        match data.native {
            Some(native) => native,
            None => panic!(
                "Resource '{}' has no memory",
                data.display(resource.index())
            ),
        }
    }
    #[track_caller]
    pub fn texture(&self, texture: GraphTexture) -> NativeTexture {
        match self.native(texture.into()) {
            NativeResource::Texture(texture) => texture,
            NativeResource::Buffer(_) => unreachable!("GraphTexture handle points to a buffer"),
        }
    }
    #[track_caller]
    pub fn buffer(&self, buffer: GraphBuffer) -> NativeBuffer {
        match self.native(buffer.into()) {
            NativeResource::Buffer(buffer) => buffer,
            NativeResource::Texture(_) => unreachable!("GraphBuffer handle points to a texture"),
        }
    }
}

/// What [`GraphBuilder::execute`] leaves behind besides the submitted work.
#[derive(Clone, Debug, Default)]
pub struct ExecutionReport {
    pub stats: StatsSnapshot,
    /// Graphviz source, present if [`GraphBuilder::dump_graph`] was called.
    pub graph_dump: Option<String>,
    /// Resource name and its rendered timeline for every [`GraphBuilder::visualize`] request.
    pub visualizations: Vec<(String, String)>,
}

/// The read-only view of the compiled frame shared by all recording threads.
struct PassRecorder<'a> {
    passes: &'a [GraphObject<PassData>],
    resources: &'a [GraphObject<ResourceData>],
    batches: &'a [BarrierBatch],
    /// Whether the pass runs on another pipeline than the surviving pass before it.
    pipeline_switches: &'a [bool],
    validation: bool,
}

impl<'a> PassRecorder<'a> {
    fn begin_batch(&self, batch: BatchId, pipeline: Pipeline, stream: &mut CommandStream) {
        // batches with nothing to synchronize were never created
        if let Some(token) = self.batches[batch.index()].token {
            stream.push(Command::BeginTransitions { pipeline, token });
        }
    }
    fn end_batch(&self, batch: BatchId, pipeline: Pipeline, stream: &mut CommandStream) {
        if let Some(token) = self.batches[batch.index()].token {
            stream.push(Command::EndTransitions { pipeline, token });
        }
    }
    fn record_pass(
        &self,
        pass: GraphPass,
        callback: Option<PassCallback>,
        stream: &mut CommandStream,
    ) {
        let data = &self.passes[pass.index()];
        let pipeline = data.pipeline;

        if self.pipeline_switches[pass.index()] {
            stream.push(Command::SetPipeline(pipeline));
        }
        stream.push(Command::BeginPass(pass));

        if let Some(batch) = data.prologue_begin {
            self.begin_batch(batch, pipeline, stream);
        }
        for &batch in &data.prologue_end {
            self.end_batch(batch, pipeline, stream);
        }

        let render_pass = data.is_raster() && !data.flags.contains(PassFlags::SKIP_RENDER_PASS);
        if render_pass && !data.skip_render_pass_begin {
            stream.push(Command::BeginRenderPass(pass));
        }

        if let Some(callback) = callback {
            let mut context = PassContext {
                pass,
                name: &data.name,
                pipeline,
                stream: &mut *stream,
                bound: &data.bound,
                resources: self.resources,
                validation: self.validation,
            };
            callback(&mut context);
        }

        if render_pass && !data.skip_render_pass_end {
            stream.push(Command::EndRenderPass(pass));
        }

        for &batch in data.epilogue_begin_for.iter().flatten() {
            self.begin_batch(batch, pipeline, stream);
        }
        for &batch in &data.shared_epilogue_begin {
            self.begin_batch(batch, pipeline, stream);
        }
        for &batch in &data.epilogue_end {
            self.end_batch(batch, pipeline, stream);
        }
        stream.push(Command::EndPass(pass));
    }
}

impl<'a> GraphBuilder<'a> {
    /// Splits the surviving passes into runs which can be recorded on worker threads.
    ///
    /// A run is closed once its workload reaches the configured maximum or a pass has to be
    /// recorded inline, runs are then trimmed to not begin or end inside a merged render pass.
    fn compute_parallel_sets(&mut self) -> Vec<Vec<GraphPass>> {
        let config = &self.context.config;
        if !config.parallel_execute_enabled() {
            return Vec::new();
        }
        let min = config.parallel_execute_pass_min.max(1) as usize;
        let max = config.parallel_execute_pass_max.max(1);

        let mut sets: Vec<Vec<GraphPass>> = Vec::new();
        let mut current: Vec<GraphPass> = Vec::new();
        let mut workload = 0;

        let epilogue = self.passes.len() - 1;
        for pass_index in 1..epilogue {
            let pass = &self.passes[pass_index];
            if pass.culled {
                continue;
            }
            if pass.task_mode == PassTaskMode::Inline
                || pass.flags.contains(PassFlags::NEVER_PARALLEL)
                || self.callbacks[pass_index].is_none()
            {
                self.close_parallel_set(&mut current, &mut sets, min);
                workload = 0;
                continue;
            }

            current.push(GraphPass::new(pass_index));
            // a merged render pass stays in one set
            if !pass.skip_render_pass_end {
                workload += pass.workload;
                if workload >= max {
                    self.close_parallel_set(&mut current, &mut sets, min);
                    workload = 0;
                }
            }
        }
        self.close_parallel_set(&mut current, &mut sets, min);

        for (index, set) in sets.iter().enumerate() {
            for pass in set {
                self.passes[pass.index()].parallel_set = Some(index as u32);
            }
        }
        GraphStats::add(self.context.stats.parallel_pass_sets(), sets.len() as u64);
        sets
    }

    fn close_parallel_set(
        &self,
        current: &mut Vec<GraphPass>,
        sets: &mut Vec<Vec<GraphPass>>,
        min: usize,
    ) {
        let region = |pass: GraphPass| {
            let index = self.merged_regions.partition_point(|&(first, _)| first <= pass);
            index
                .checked_sub(1)
                .map(|i| self.merged_regions[i])
                .filter(|&(_, last)| pass <= last)
        };

        let mut start = 0;
        let mut end = current.len();
        while start < end {
            match region(current[start]) {
                Some((first, _)) if first != current[start] => start += 1,
                _ => break,
            }
        }
        while start < end {
            match region(current[end - 1]) {
                Some((_, last)) if last != current[end - 1] => end -= 1,
                _ => break,
            }
        }

        if end - start >= min {
            sets.push(current[start..end].to_vec());
        }
        current.clear();
    }

    /// Compiles the frame, allocates its memory, records every surviving pass and submits the
    /// result to the device.
    ///
    /// Fails only when the device or the allocators run out of memory, the graph is gone either
    /// way and the next frame starts from scratch.
    pub fn execute(mut self) -> GraphResult<ExecutionReport> {
        let result = self.execute_frame();
        if let Err(err) = &result {
            error!("Frame {} failed: {}", self.context.frame, err);
            self.destroy_transient_resources();
            self.context.pool.abandon_frame();
        }
        result
    }

    fn execute_frame(&mut self) -> GraphResult<ExecutionReport> {
        self.push_pass(
            "Graph Epilogue".into(),
            PassFlags::NEVER_CULL,
            PassTaskMode::Inline,
            0,
        );

        let ops = self.compile();
        self.execute_allocations(&ops)?;

        self.compile_pass_barriers();
        self.collect_pass_barriers();
        self.finalize_resources();
        self.create_transitions()?;

        let sets = self.compute_parallel_sets();

        let graph_dump = self.dump_requested.then(|| self.write_graphviz());
        let visualizations = std::mem::take(&mut self.visualize_requests)
            .into_iter()
            .filter_map(|name| {
                let timeline = self.visualize_resource(&name)?;
                Some((name, timeline))
            })
            .collect();

        let stream = self.record_passes(sets);
        self.device.submit(stream)?;
        self.finish_frame();

        let stats = self.context.stats.snapshot();
        info!(
            "Frame {} executed: {} passes ({} culled), {} barrier batches, {} transitions, {} byte transient heap",
            self.context.frame - 1,
            stats.passes,
            stats.culled_passes,
            stats.barrier_batches,
            stats.transitions,
            stats.transient_heap_high_water
        );

        Ok(ExecutionReport {
            stats,
            graph_dump,
            visualizations,
        })
    }

    fn record_passes(&mut self, sets: Vec<Vec<GraphPass>>) -> CommandStream {
        let mut callbacks = std::mem::take(&mut self.callbacks);

        let bump = Bump::new();
        let mut current = Pipeline::Graphics;
        let pipeline_switches = bump.alloc_slice_fill_iter(self.passes.iter().map(|pass| {
            if pass.culled {
                return false;
            }
            let switch = pass.pipeline != current;
            current = pass.pipeline;
            switch
        }));

        let recorder = PassRecorder {
            passes: &self.passes,
            resources: &self.resources,
            batches: &self.batches,
            pipeline_switches,
            validation: self.context.config.validation,
        };

        let jobs = sets
            .iter()
            .map(|set| {
                set.iter()
                    .map(|&pass| (pass, callbacks[pass.index()].take()))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        let mut recorded = if jobs.is_empty() {
            Vec::new()
        } else {
            self.context.thread_pool.install(|| {
                jobs.into_par_iter()
                    .map(|job| {
                        let mut stream = CommandStream::new();
                        for (pass, callback) in job {
                            recorder.record_pass(pass, callback, &mut stream);
                        }
                        stream
                    })
                    .collect::<Vec<_>>()
            })
        }
        .into_iter();

        // replay in pass order, a set is appended where its first pass would be recorded
        let mut stream = CommandStream::new();
        let mut last_set = None;
        for (pass_index, pass) in self.passes.iter().enumerate() {
            if pass.culled {
                continue;
            }
            match pass.parallel_set {
                Some(set) => {
                    if last_set != Some(set) {
                        last_set = Some(set);
                        if let Some(mut set_stream) = recorded.next() {
                            trace!("Replaying parallel set {} ({} commands)", set, set_stream.len());
                            stream.append(&mut set_stream);
                        }
                    }
                }
                None => recorder.record_pass(
                    GraphPass::new(pass_index),
                    callbacks[pass_index].take(),
                    &mut stream,
                ),
            }
        }
        stream
    }

    /// Hands extracted resources to the caller and returns pooled memory with its final access.
    fn finish_frame(&mut self) {
        for index in 0..self.resources.len() {
            let resource = GraphResource::new(index);
            let data = &self.resources[index];
            let Some(native) = data.native else {
                continue;
            };

            if let Some(slot) = &data.extraction {
                let access = self.final_access(resource);
                *slot.lock() = Some((native, access));
                if data.placement == Placement::Pooled {
                    self.context.pool.detach(&data.desc, native);
                }
                debug!(
                    "Resource '{}' extracted in {}",
                    self.get_resource_display(resource),
                    access
                );
            } else if data.placement == Placement::Pooled && !data.has_next_owner {
                let access = self.final_access(resource);
                self.context.pool.record_access(&data.desc, native, access);
            }
        }
        self.destroy_transient_resources();
        self.context.pool.tick();
        self.context.frame += 1;
    }
}
