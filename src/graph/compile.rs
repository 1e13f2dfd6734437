use fixedbitset::FixedBitSet;
use smallvec::SmallVec;

use crate::{
    stats::GraphStats,
    tracing::shim_macros::{debug, trace, warn},
};

use super::{
    allocator::AllocationOp, record::PassFlags, GraphPass, GraphResource, PassOption, Pipeline,
    PipelineMask,
};

impl<'a> super::GraphBuilder<'a> {
    /// Finalizes the recorded frame into a schedule, returns the allocation events in pass order.
    pub(crate) fn compile(&mut self) -> Vec<AllocationOp> {
        GraphStats::add(self.context.stats.passes(), self.passes.len() as u64);

        // extracted resources outlive the frame, their count never reaches zero
        for resource in self.resources.iter_mut() {
            if resource.is_extracted() {
                resource.reference_count += 1;
            }
        }

        if self.context.config.cull_enabled() {
            self.finalize_culling();
        }
        self.compile_cross_pipeline();
        if self.context.config.merge_enabled() {
            self.merge_render_passes();
        }
        if self.context.config.async_compute_enabled() {
            self.compile_async_compute();
        }

        let ops = self.collect_allocations();
        self.report_unused_resources();
        ops
    }

    fn finalize_culling(&mut self) {
        let mut culled = 0;
        for pass_index in 0..self.passes.len() {
            if !self.passes[pass_index].culled {
                continue;
            }
            culled += 1;
            debug!(
                "Pass '{}' culled",
                self.get_pass_display(GraphPass::new(pass_index))
            );
            for state_index in 0..self.passes[pass_index].resource_states.len() {
                let state = &self.passes[pass_index].resource_states[state_index];
                let (resource, count) = (state.resource, state.reference_count);
                let data = &mut self.resources[resource.index()];
                debug_assert!(data.reference_count >= count);
                data.reference_count -= count;
            }
        }
        GraphStats::add(self.context.stats.culled_passes(), culled);
    }

    /// Links passes which depend on work of the other pipeline.
    fn compile_cross_pipeline(&mut self) {
        for pass_index in 1..self.passes.len() {
            if self.passes[pass_index].culled {
                continue;
            }
            let handle = GraphPass::new(pass_index);
            let pipeline = self.passes[pass_index].pipeline;

            let dependencies = self.passes[pass_index]
                .dependencies
                .iter()
                .map(|d| d.get_pass())
                .collect::<SmallVec<[GraphPass; 8]>>();

            let mut producer = PassOption::NONE;
            for dependency in dependencies {
                let data = &mut self.passes[dependency.index()];
                if data.culled || data.pipeline == pipeline {
                    continue;
                }
                // passes are visited in order so the consumers stay sorted
                data.cross_pipeline_consumers.push(handle);
                if producer.get().map_or(true, |p| p < dependency) {
                    producer = dependency.into();
                }
            }
            self.passes[pass_index].cross_pipeline_producer = producer;
        }
    }

    /// Whether `next` can continue the render pass that `previous` belongs to.
    fn can_merge_render_passes(&self, previous: GraphPass, next: GraphPass) -> bool {
        let previous = &self.passes[previous.index()];
        let next = &self.passes[next.index()];

        if previous.render_targets.len() != next.render_targets.len()
            || !previous
                .render_targets
                .iter()
                .zip(next.render_targets.iter())
                .all(|(a, b)| a.same_target(b))
        {
            return false;
        }
        if next
            .render_targets
            .iter()
            .any(|rt| rt.load == super::LoadAction::Clear)
        {
            return false;
        }
        if next.cross_pipeline_producer.is_some() || !previous.cross_pipeline_consumers.is_empty() {
            return false;
        }

        let targets = previous
            .render_targets
            .iter()
            .map(|rt| rt.texture.index())
            .collect::<FixedBitSet>();
        !next
            .bindings
            .iter()
            .any(|b| !b.render_target && targets.contains(b.resource.index()))
    }

    fn merge_render_passes(&mut self) {
        let epilogue = self.passes.len() - 1;
        let mut run: SmallVec<[GraphPass; 8]> = SmallVec::new();

        for pass_index in 1..epilogue {
            let handle = GraphPass::new(pass_index);
            let pass = &self.passes[pass_index];
            if pass.culled || pass.empty_parameters {
                continue;
            }

            if pass.is_raster() {
                if pass
                    .flags
                    .intersects(PassFlags::SKIP_RENDER_PASS | PassFlags::NEVER_MERGE)
                    || !pass.render_pass_only_writes
                {
                    self.commit_merged_render_pass(&mut run);
                    continue;
                }
                match run.last() {
                    Some(&previous) if self.can_merge_render_passes(previous, handle) => {}
                    _ => self.commit_merged_render_pass(&mut run),
                }
                run.push(handle);
            } else if !pass.is_async_compute() {
                self.commit_merged_render_pass(&mut run);
            }
        }
        self.commit_merged_render_pass(&mut run);
    }

    fn commit_merged_render_pass(&mut self, run: &mut SmallVec<[GraphPass; 8]>) {
        if run.len() > 1 {
            let first = run[0];
            let last = run[run.len() - 1];

            for (i, &pass) in run.iter().enumerate() {
                let data = &mut self.passes[pass.index()];
                if i != 0 {
                    data.skip_render_pass_begin = true;
                    data.prologue_barrier_pass = first;
                }
                if i != run.len() - 1 {
                    data.skip_render_pass_end = true;
                    data.epilogue_barrier_pass = last;
                }
            }
            for &pass in &run[1..] {
                self.passes[pass.index()].resources_to_begin.clear();
                self.passes[first.index()].resources_to_begin.push(pass);
            }
            for &pass in &run[..run.len() - 1] {
                self.passes[pass.index()].resources_to_end.clear();
                self.passes[last.index()].resources_to_end.push(pass);
            }

            debug!(
                "Merged render passes '{}' to '{}' ({} passes)",
                self.get_pass_display(first),
                self.get_pass_display(last),
                run.len()
            );
            self.merged_regions.push((first, last));
            GraphStats::add(self.context.stats.render_pass_merges(), run.len() as u64);
        }
        run.clear();
    }

    /// Places the fork and join of every async compute pass.
    ///
    /// Async compute passes allocate their resources at the fork and release them at the join,
    /// the two pipelines run concurrently in between.
    fn compile_async_compute(&mut self) {
        let prologue = GraphPass::new(0);
        let epilogue = GraphPass::new(self.passes.len() - 1);

        let mut current_fork = PassOption::NONE;
        for pass_index in 1..epilogue.index() {
            let pass = &self.passes[pass_index];
            if !pass.is_async_compute() || pass.culled {
                continue;
            }
            let handle = GraphPass::new(pass_index);
            let fork = [pass.cross_pipeline_producer.get(), current_fork.get()]
                .into_iter()
                .flatten()
                .fold(prologue, GraphPass::max);

            self.passes[pass_index].graphics_fork_pass = fork.into();
            self.passes[pass_index].resources_to_begin.clear();
            let host = self.prologue_barrier_pass(fork);
            self.passes[host.index()].resources_to_begin.push(handle);

            if current_fork.get() != Some(fork) {
                current_fork = fork.into();
                // a fork inside a merged render pass waits for the render pass to end
                let owner = self.epilogue_barrier_pass(fork);
                let batch = self.epilogue_batch_for(owner, PipelineMask::ASYNC_COMPUTE);
                self.passes[owner.index()].graphics_fork = true;
                self.passes[pass_index].async_compute_begin = true;
                self.passes[pass_index].prologue_end.push(batch);
                trace!(
                    "Async compute '{}' forks after '{}'",
                    self.get_pass_display(handle),
                    self.get_pass_display(fork)
                );
            }
        }

        let mut current_join = PassOption::NONE;
        for pass_index in (1..epilogue.index()).rev() {
            let pass = &self.passes[pass_index];
            if !pass.is_async_compute() || pass.culled {
                continue;
            }
            let handle = GraphPass::new(pass_index);
            // consumers are sorted, the first surviving one is the earliest
            let consumer = pass
                .cross_pipeline_consumers
                .iter()
                .copied()
                .find(|c| !self.passes[c.index()].culled);
            let join = [consumer, current_join.get()]
                .into_iter()
                .flatten()
                .fold(epilogue, GraphPass::min);

            self.passes[pass_index].graphics_join_pass = join.into();
            self.passes[pass_index].resources_to_end.clear();
            let host = self.epilogue_barrier_pass(join);
            self.passes[host.index()].resources_to_end.push(handle);

            if current_join.get() != Some(join) {
                current_join = join.into();
                let batch = self.epilogue_batch_for(handle, PipelineMask::GRAPHICS);
                let owner = self.prologue_barrier_pass(join);
                self.passes[pass_index].async_compute_end = true;
                self.passes[owner.index()].graphics_join = true;
                self.passes[owner.index()].prologue_end.push(batch);
                trace!(
                    "Async compute '{}' joins before '{}'",
                    self.get_pass_display(handle),
                    self.get_pass_display(join)
                );
            }
        }
    }

    /// Walks the passes once and emits an allocation where a resource is first needed and a
    /// deallocation where its last reference is dropped.
    fn collect_allocations(&mut self) -> Vec<AllocationOp> {
        let mut ops = Vec::new();

        for pass_index in 0..self.passes.len() {
            if self.passes[pass_index].culled {
                continue;
            }
            let handle = GraphPass::new(pass_index);

            let begins = self.passes[pass_index].resources_to_begin.clone();
            for begin in begins {
                for state_index in 0..self.passes[begin.index()].resource_states.len() {
                    let resource = self.passes[begin.index()].resource_states[state_index].resource;
                    self.collect_allocate(resource, handle, &mut ops);
                }
            }

            let ends = self.passes[pass_index].resources_to_end.clone();
            for end in ends {
                for state_index in 0..self.passes[end.index()].resource_states.len() {
                    let state = &self.passes[end.index()].resource_states[state_index];
                    let (resource, count) = (state.resource, state.reference_count);
                    self.collect_deallocate(resource, handle, count, &mut ops);
                }
            }
        }

        // extracted resources no pass touched still have to hand out memory
        let epilogue = GraphPass::new(self.passes.len() - 1);
        for index in 0..self.resources.len() {
            let data = &self.resources[index];
            if data.is_extracted() && data.first_pass.is_none() {
                warn!(
                    "Resource '{}' is extracted but never produced",
                    self.get_resource_display(GraphResource::new(index))
                );
                self.collect_allocate(GraphResource::new(index), epilogue, &mut ops);
            }
        }
        ops
    }

    fn collect_allocate(&mut self, resource: GraphResource, pass: GraphPass, ops: &mut Vec<AllocationOp>) {
        let data = &mut self.resources[resource.index()];
        if data.first_pass.is_none() {
            data.first_pass = Some(pass);
            if data.is_internal() {
                ops.push(AllocationOp::allocate(pass, resource));
            }
        }
    }

    fn collect_deallocate(
        &mut self,
        resource: GraphResource,
        pass: GraphPass,
        count: u32,
        ops: &mut Vec<AllocationOp>,
    ) {
        let pipeline = self.passes[pass.index()].pipeline;
        let data = &mut self.resources[resource.index()];
        debug_assert!(data.reference_count >= count);
        data.reference_count -= count;
        data.last_passes[pipeline] = pass.into();

        if data.reference_count == 0 && !data.deallocated {
            if data.is_internal() {
                ops.push(AllocationOp::deallocate(pass, resource));
            }
            data.deallocated = true;
        }
    }

    fn report_unused_resources(&self) {
        let mut referenced = FixedBitSet::with_capacity(self.resources.len());
        for pass in &self.passes {
            referenced.union_with(&pass.bound);
        }
        for index in 0..self.resources.len() {
            let data = &self.resources[index];
            if data.is_internal() && !data.is_extracted() && !referenced.contains(index) {
                warn!(
                    "Resource '{}' is not used by any pass",
                    self.get_resource_display(GraphResource::new(index))
                );
                GraphStats::add(self.context.stats.unused_resources(), 1);
            }
        }
    }
}
