use std::borrow::Cow;

use rayon::prelude::{IntoParallelRefMutIterator, ParallelIterator};
use smallvec::SmallVec;

use crate::{
    device::{Device, NativeResource, TransitionToken},
    error::GraphResult,
    stats::GraphStats,
    tracing::shim_macros::{trace, warn},
};

use super::{
    access::Access, record::GraphBuilder, resource::Subresource, BatchId, ByPipeline, GraphPass,
    GraphResource, PassOption, Pipeline, PipelineMask, StateId,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub(crate) enum BarrierLocation {
    #[default]
    Prologue,
    Epilogue,
}

/// The access of a subresource over a range of passes on each pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub(crate) struct SubresourceState {
    pub(crate) access: Access,
    pub(crate) first_pass: ByPipeline<PassOption>,
    pub(crate) last_pass: ByPipeline<PassOption>,
    pub(crate) no_barrier_group: Option<u32>,
    pub(crate) location: BarrierLocation,
}

impl SubresourceState {
    pub(crate) fn at(pipeline: Pipeline, pass: GraphPass, access: Access) -> Self {
        let mut state = Self {
            access,
            ..Default::default()
        };
        state.set_pass(pipeline, pass);
        state
    }
    pub(crate) fn set_pass(&mut self, pipeline: Pipeline, pass: GraphPass) {
        self.first_pass = ByPipeline::default();
        self.last_pass = ByPipeline::default();
        self.first_pass[pipeline] = pass.into();
        self.last_pass[pipeline] = pass.into();
    }
    pub(crate) fn pipelines(&self) -> PipelineMask {
        let mut mask = PipelineMask::empty();
        for pipeline in Pipeline::ALL {
            if self.first_pass[pipeline].is_some() {
                mask |= pipeline.mask();
            }
        }
        mask
    }
    pub(crate) fn first_pass_overall(&self) -> Option<GraphPass> {
        self.first_pass.0.iter().filter_map(|p| p.get()).min()
    }
    pub(crate) fn last_pass_overall(&self) -> Option<GraphPass> {
        self.last_pass.0.iter().filter_map(|p| p.get()).max()
    }
    pub(crate) fn is_transition_required(previous: &Self, next: &Self) -> bool {
        previous.access != next.access
            || previous.pipelines() != next.pipelines()
            || (next.access.is_uav()
                && !skip_barrier(previous.no_barrier_group, next.no_barrier_group))
    }
    /// Only reads can share one state, any write starts a new one.
    pub(crate) fn is_merge_allowed(previous: &Self, next: &Self) -> bool {
        previous.access.is_read_only() && next.access.is_read_only()
    }
}

/// Writes inside the same skip-barrier group do not wait for each other.
pub(crate) fn skip_barrier(previous: Option<u32>, next: Option<u32>) -> bool {
    matches!((previous, next), (Some(a), Some(b)) if a == b)
}

/// One subresource (or a whole buffer) moving between two accesses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransitionInfo {
    pub resource: GraphResource,
    pub native: NativeResource,
    /// `None` for buffers.
    pub subresource: Option<Subresource>,
    pub before: Access,
    pub after: Access,
}

/// Memory of the transient heap changing hands between resources.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AliasingInfo {
    /// `native` takes over memory last used by `overlaps`.
    Acquire {
        resource: GraphResource,
        native: NativeResource,
        overlaps: SmallVec<[NativeResource; 2]>,
    },
    /// `native` gives its memory back, the contents are lost.
    Discard {
        resource: GraphResource,
        native: NativeResource,
    },
}

/// Everything a device needs to create the synchronization object of one barrier batch.
#[derive(Clone, Copy, Debug)]
pub struct TransitionCreateInfo<'a> {
    pub name: &'a str,
    /// The passes whose epilogue or prologue begins the batch.
    pub passes: ByPipeline<Option<GraphPass>>,
    pub pipelines_before: PipelineMask,
    pub pipelines_after: PipelineMask,
    pub transitions: &'a [TransitionInfo],
    pub aliases: &'a [AliasingInfo],
}

pub(crate) struct BarrierBatch {
    pub(crate) name: Cow<'static, str>,
    pub(crate) passes: ByPipeline<PassOption>,
    pub(crate) pipelines_before: PipelineMask,
    pub(crate) pipelines_after: PipelineMask,
    pub(crate) transitions: Vec<TransitionInfo>,
    pub(crate) aliases: Vec<AliasingInfo>,
    pub(crate) token: Option<TransitionToken>,
}

impl BarrierBatch {
    fn new(
        name: impl Into<Cow<'static, str>>,
        passes: ByPipeline<PassOption>,
        pipelines_before: PipelineMask,
        pipelines_after: PipelineMask,
    ) -> Self {
        Self {
            name: name.into(),
            passes,
            pipelines_before,
            pipelines_after,
            transitions: Vec::new(),
            aliases: Vec::new(),
            token: None,
        }
    }
    /// Empty batches on one pipeline have nothing to synchronize, crossing pipelines always
    /// needs a fence.
    pub(crate) fn needs_token(&self) -> bool {
        !self.transitions.is_empty()
            || !self.aliases.is_empty()
            || self.pipelines_before != self.pipelines_after
    }
    pub(crate) fn create_info(&self) -> TransitionCreateInfo<'_> {
        TransitionCreateInfo {
            name: &self.name,
            passes: ByPipeline(self.passes.0.map(|p| p.get())),
            pipelines_before: self.pipelines_before,
            pipelines_after: self.pipelines_after,
            transitions: &self.transitions,
            aliases: &self.aliases,
        }
    }
}

/// Batches begun by a pair of passes are shared by every transition leaving the same pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct SharedBatchKey {
    pub(crate) passes: ByPipeline<GraphPass>,
    pub(crate) pipelines_after: PipelineMask,
}

/// Where the begin and end of a transition are recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TransitionPlacement {
    /// Begin and end back to back in one barrier slot of a pass.
    Immediate {
        pass: GraphPass,
        pipeline: Pipeline,
        location: BarrierLocation,
    },
    /// Begin after the last pass of the previous state, end before the first pass of the next.
    Split {
        pipeline: Pipeline,
        begin: GraphPass,
        end: GraphPass,
    },
    /// One pipeline hands the subresource to the other one or to both.
    CrossPipeline {
        before: Pipeline,
        begin: GraphPass,
        after: PipelineMask,
        ends: ByPipeline<PassOption>,
    },
    /// Both pipelines used the previous state, the begin is shared by both last passes.
    Shared {
        key: SharedBatchKey,
        ends: ByPipeline<PassOption>,
        end_in_epilogue: ByPipeline<bool>,
    },
}

fn epilogue_batch_name(pipelines: PipelineMask) -> &'static str {
    match pipelines.single() {
        Some(Pipeline::Graphics) => "Epilogue (For Graphics)",
        Some(Pipeline::AsyncCompute) => "Epilogue (For AsyncCompute)",
        None => "Epilogue (For All)",
    }
}

impl<'a> GraphBuilder<'a> {
    pub(crate) fn alloc_state(&mut self, state: SubresourceState) -> StateId {
        let id = StateId::new(self.states.len());
        self.states.push(state);
        id
    }
    #[inline]
    pub(crate) fn state(&self, id: StateId) -> &SubresourceState {
        &self.states[id.index()]
    }
    #[inline]
    pub(crate) fn pass_pipeline(&self, pass: GraphPass) -> Pipeline {
        self.passes[pass.index()].pipeline
    }
    pub(crate) fn prologue_barrier_pass(&self, pass: GraphPass) -> GraphPass {
        self.passes[pass.index()].prologue_barrier_pass
    }
    pub(crate) fn epilogue_barrier_pass(&self, pass: GraphPass) -> GraphPass {
        self.passes[pass.index()].epilogue_barrier_pass
    }
    fn push_batch(&mut self, batch: BarrierBatch) -> BatchId {
        let id = BatchId::new(self.batches.len());
        self.batches.push(batch);
        id
    }
    /// Batch begun in the prologue of `pass` which ends on its own pipeline.
    pub(crate) fn prologue_batch(&mut self, pass: GraphPass) -> BatchId {
        if let Some(id) = self.passes[pass.index()].prologue_begin {
            return id;
        }
        let pipeline = self.pass_pipeline(pass);
        let mut owners = ByPipeline::default();
        owners[pipeline] = pass.into();
        let id = self.push_batch(BarrierBatch::new(
            "Prologue",
            owners,
            pipeline.mask(),
            pipeline.mask(),
        ));
        self.passes[pass.index()].prologue_begin = Some(id);
        id
    }
    /// Batch begun in the epilogue of `pass` which ends on `pipelines_after`.
    pub(crate) fn epilogue_batch_for(
        &mut self,
        pass: GraphPass,
        pipelines_after: PipelineMask,
    ) -> BatchId {
        let slot = pipelines_after.epilogue_slot();
        if let Some(id) = self.passes[pass.index()].epilogue_begin_for[slot] {
            return id;
        }
        let pipeline = self.pass_pipeline(pass);
        let mut owners = ByPipeline::default();
        owners[pipeline] = pass.into();
        let id = self.push_batch(BarrierBatch::new(
            epilogue_batch_name(pipelines_after),
            owners,
            pipeline.mask(),
            pipelines_after,
        ));
        self.passes[pass.index()].epilogue_begin_for[slot] = Some(id);
        id
    }
    fn shared_batch(&mut self, key: SharedBatchKey) -> BatchId {
        if let Some(&id) = self.shared_batches.get(&key) {
            return id;
        }
        let owners = ByPipeline(key.passes.0.map(PassOption::from));
        let id = self.push_batch(BarrierBatch::new(
            epilogue_batch_name(key.pipelines_after),
            owners,
            PipelineMask::ALL,
            key.pipelines_after,
        ));
        for pass in key.passes.0 {
            self.passes[pass.index()].shared_epilogue_begin.push(id);
        }
        self.shared_batches.insert(key, id);
        id
    }
    /// Ends `batch` before `pass` (or the first pass of its merged render pass) runs.
    pub(crate) fn add_prologue_end(&mut self, pass: GraphPass, batch: BatchId) {
        let pass = self.prologue_barrier_pass(pass);
        let ends = &mut self.passes[pass.index()].prologue_end;
        if !ends.contains(&batch) {
            ends.push(batch);
        }
    }
    /// Ends `batch` after `pass` (or the last pass of its merged render pass) ran.
    pub(crate) fn add_epilogue_end(&mut self, pass: GraphPass, batch: BatchId) {
        let pass = self.epilogue_barrier_pass(pass);
        let ends = &mut self.passes[pass.index()].epilogue_end;
        if !ends.contains(&batch) {
            ends.push(batch);
        }
    }

    pub(crate) fn classify_transition(
        &self,
        before: &SubresourceState,
        after: &SubresourceState,
    ) -> TransitionPlacement {
        if self.context.config.immediate_mode {
            // everything runs on graphics
            let pass = after.first_pass_overall().unwrap_or(GraphPass::new(0));
            return TransitionPlacement::Immediate {
                pass,
                pipeline: Pipeline::Graphics,
                location: after.location,
            };
        }

        let pipelines_before = before.pipelines();
        let pipelines_after = after.pipelines();
        debug_assert!(!pipelines_before.is_empty() && !pipelines_after.is_empty());
        debug_assert!(
            before.last_pass_overall() <= after.first_pass_overall(),
            "State begins before the previous state has ended"
        );

        if pipelines_before == pipelines_after && pipelines_after != PipelineMask::ALL {
            let pipeline = pipelines_after.single().unwrap_or(Pipeline::Graphics);
            let begin = before.last_pass[pipeline].get().unwrap_or(GraphPass::new(0));
            let end = after.first_pass[pipeline].get().unwrap_or(begin);

            if begin < end {
                TransitionPlacement::Split {
                    pipeline,
                    begin,
                    end,
                }
            } else {
                TransitionPlacement::Immediate {
                    pass: begin,
                    pipeline,
                    location: after.location,
                }
            }
        } else if let Some(before_pipeline) = pipelines_before.single() {
            TransitionPlacement::CrossPipeline {
                before: before_pipeline,
                begin: before.last_pass[before_pipeline]
                    .get()
                    .unwrap_or(GraphPass::new(0)),
                after: pipelines_after,
                ends: after.first_pass,
            }
        } else {
            let mut passes = ByPipeline::splat(GraphPass::new(0));
            let mut end_in_epilogue = ByPipeline::splat(false);
            for pipeline in Pipeline::ALL {
                let last = before.last_pass[pipeline].get().unwrap_or(GraphPass::new(0));
                passes[pipeline] = self.epilogue_barrier_pass(last);
                end_in_epilogue[pipeline] = before.last_pass[pipeline].is_some()
                    && before.last_pass[pipeline] == after.first_pass[pipeline];
            }
            TransitionPlacement::Shared {
                key: SharedBatchKey {
                    passes,
                    pipelines_after,
                },
                ends: after.first_pass,
                end_in_epilogue,
            }
        }
    }

    /// Records the begin and end of the placement, returns the batch carrying it.
    pub(crate) fn apply_placement(&mut self, placement: TransitionPlacement) -> BatchId {
        match placement {
            TransitionPlacement::Immediate {
                pass,
                pipeline,
                location: BarrierLocation::Epilogue,
            } => {
                let owner = self.epilogue_barrier_pass(pass);
                let batch = self.epilogue_batch_for(owner, pipeline.mask());
                self.add_epilogue_end(pass, batch);
                batch
            }
            TransitionPlacement::Immediate { pass, .. } => {
                let owner = self.prologue_barrier_pass(pass);
                let batch = self.prologue_batch(owner);
                self.add_prologue_end(pass, batch);
                batch
            }
            TransitionPlacement::Split {
                pipeline,
                begin,
                end,
            } => {
                let owner = self.epilogue_barrier_pass(begin);
                let batch = self.epilogue_batch_for(owner, pipeline.mask());
                self.add_prologue_end(end, batch);
                batch
            }
            TransitionPlacement::CrossPipeline {
                before,
                begin,
                after,
                ends,
            } => {
                let owner = self.epilogue_barrier_pass(begin);
                let batch = self.epilogue_batch_for(owner, after);
                for pipeline in Pipeline::ALL {
                    // the other pipeline may join back before a split end on this one would run
                    if pipeline == before && after == PipelineMask::ALL {
                        self.add_epilogue_end(begin, batch);
                    } else if after.contains(pipeline.mask()) {
                        if let Some(end) = ends[pipeline].get() {
                            self.add_prologue_end(end, batch);
                        }
                    }
                }
                batch
            }
            TransitionPlacement::Shared {
                key,
                ends,
                end_in_epilogue,
            } => {
                let batch = self.shared_batch(key);
                for pipeline in key.pipelines_after.pipelines() {
                    let Some(end) = ends[pipeline].get() else {
                        continue;
                    };
                    if end_in_epilogue[pipeline] {
                        self.add_epilogue_end(end, batch);
                    } else {
                        self.add_prologue_end(end, batch);
                    }
                }
                batch
            }
        }
    }

    pub(crate) fn add_transition(
        &mut self,
        resource: GraphResource,
        subresource: usize,
        before: &SubresourceState,
        after: &SubresourceState,
    ) {
        let data = &self.resources[resource.index()];
        let Some(native) = data.native else {
            warn!(
                "Resource '{}' has no memory, skipping its transition",
                self.get_resource_display(resource)
            );
            return;
        };
        let info = TransitionInfo {
            resource,
            native,
            subresource: data
                .desc
                .is_texture()
                .then(|| data.layout.subresource(subresource)),
            before: before.access,
            after: after.access,
        };

        let placement = self.classify_transition(before, after);
        trace!(
            "Transition '{}'[{}] {} -> {} placed {:?}",
            self.get_resource_display(resource),
            subresource,
            info.before,
            info.after,
            placement
        );
        let batch = self.apply_placement(placement);
        self.batches[batch.index()].transitions.push(info);
        GraphStats::add(self.context.stats.transitions(), 1);
    }

    /// Hands transient memory to `resource` in the prologue of `pass`, the pass allocating it.
    pub(crate) fn add_aliasing_transition(&mut self, pass: GraphPass, resource: GraphResource) {
        let data = &self.resources[resource.index()];
        let Some(native) = data.native else {
            return;
        };
        let overlaps = data
            .aliasing_overlaps
            .iter()
            .filter_map(|r| self.resources[r.index()].native)
            .collect();
        let info = AliasingInfo::Acquire {
            resource,
            native,
            overlaps,
        };

        let batch = self.prologue_batch(self.prologue_barrier_pass(pass));
        self.add_prologue_end(pass, batch);
        self.batches[batch.index()].aliases.push(info);
        GraphStats::add(self.context.stats.aliasing_acquires(), 1);
    }

    /// Releases the transient memory of `resource` in the epilogue of `pass`.
    pub(crate) fn add_aliasing_discard(&mut self, pass: GraphPass, resource: GraphResource) {
        let Some(native) = self.resources[resource.index()].native else {
            return;
        };
        let owner = self.epilogue_barrier_pass(pass);
        let batch = self.epilogue_batch_for(owner, self.pass_pipeline(pass).mask());
        self.add_epilogue_end(pass, batch);
        self.batches[batch.index()]
            .aliases
            .push(AliasingInfo::Discard { resource, native });
        GraphStats::add(self.context.stats.aliasing_discards(), 1);
    }

    /// Folds runs of compatible pass states into shared merge states, so that reads following
    /// each other need no transition between them.
    pub(crate) fn compile_pass_barriers(&mut self) {
        let epilogue = self.passes.len() - 1;
        for pass_index in 1..epilogue {
            if self.passes[pass_index].culled {
                continue;
            }
            let handle = GraphPass::new(pass_index);
            let pipeline = self.passes[pass_index].pipeline;

            for state_index in 0..self.passes[pass_index].resource_states.len() {
                let resource = self.passes[pass_index].resource_states[state_index].resource;
                let count = self.resources[resource.index()].subresource_count();

                for sub in 0..count {
                    let Some(pass_state) =
                        self.passes[pass_index].resource_states[state_index].states[sub]
                    else {
                        continue;
                    };
                    let resource_merge = self.resources[resource.index()].merge_state[sub];

                    let merged = match resource_merge {
                        Some(merge)
                            if SubresourceState::is_merge_allowed(
                                self.state(merge),
                                self.state(pass_state),
                            ) =>
                        {
                            let access = self.state(pass_state).access;
                            let merge_state = &mut self.states[merge.index()];
                            merge_state.access |= access;
                            if !merge_state.first_pass[pipeline].is_some() {
                                merge_state.first_pass[pipeline] = handle.into();
                            }
                            merge_state.last_pass[pipeline] = handle.into();
                            merge
                        }
                        _ => {
                            self.resources[resource.index()].merge_state[sub] = Some(pass_state);
                            pass_state
                        }
                    };
                    self.passes[pass_index].resource_states[state_index].merge_states[sub] =
                        Some(merged);
                }
            }
        }
    }

    /// Walks the surviving passes in order and plans a transition wherever the merged state of a
    /// subresource changes.
    pub(crate) fn collect_pass_barriers(&mut self) {
        let epilogue = self.passes.len() - 1;
        for pass_index in 1..epilogue {
            let pass = &self.passes[pass_index];
            if pass.culled || pass.empty_parameters {
                continue;
            }

            for state_index in 0..self.passes[pass_index].resource_states.len() {
                let resource = self.passes[pass_index].resource_states[state_index].resource;
                let count = self.resources[resource.index()].subresource_count();

                for sub in 0..count {
                    let Some(after) =
                        self.passes[pass_index].resource_states[state_index].merge_states[sub]
                    else {
                        continue;
                    };
                    let data = &mut self.resources[resource.index()];
                    let before = data.state[sub].replace(after);
                    if data.first_state[sub].is_none() {
                        data.first_state[sub] = Some(after);
                        continue;
                    }
                    if let Some(before) = before {
                        if before == after {
                            continue;
                        }
                        let (before, after) = (*self.state(before), *self.state(after));
                        if SubresourceState::is_transition_required(&before, &after) {
                            self.add_transition(resource, sub, &before, &after);
                        }
                    }
                }
            }
        }
    }

    /// Adds the transitions into the first and out of the last state of every resource used
    /// this frame.
    pub(crate) fn finalize_resources(&mut self) {
        for index in 0..self.resources.len() {
            let resource = GraphResource::new(index);
            if self.resources[index].first_pass.is_none() {
                continue;
            }
            self.add_first_transition(resource);
            if !self.resources[index].skip_last_transition {
                self.add_last_transition(resource);
            }
        }
    }

    fn add_first_transition(&mut self, resource: GraphResource) {
        let prologue = GraphPass::new(0);
        let data = &self.resources[resource.index()];
        let Some(first_pass) = data.first_pass else {
            return;
        };
        let count = data.subresource_count();

        let mut template = SubresourceState::at(Pipeline::Graphics, prologue, data.initial_access);
        let mut before: SmallVec<[Option<SubresourceState>; 1]> = SmallVec::new();

        if let Some(previous) = data.previous_owner {
            let previous_state = self.resources[previous.index()].state.clone();
            for sub in 0..count {
                // untouched by the new owner, keep the state of the previous one
                if self.resources[resource.index()].first_state[sub].is_none() {
                    self.resources[resource.index()].state[sub] = previous_state[sub];
                }
                let state = previous_state[sub].map(|id| *self.state(id)).unwrap_or(template);
                before.push(Some(state));
            }
        } else {
            if let (true, Some(acquire)) = (data.transient, data.acquire_pass) {
                debug_assert_eq!(acquire, first_pass);
                self.add_aliasing_transition(acquire, resource);
                template = SubresourceState::at(self.pass_pipeline(acquire), acquire, Access::DISCARD);
            }
            before.extend(std::iter::repeat(Some(template)).take(count));
        }

        for sub in 0..count {
            let Some(after) = self.resources[resource.index()].first_state[sub] else {
                continue;
            };
            let after = *self.state(after);
            if let Some(before) = &before[sub] {
                if SubresourceState::is_transition_required(before, &after) {
                    self.add_transition(resource, sub, before, &after);
                }
            }
        }
    }

    fn add_last_transition(&mut self, resource: GraphResource) {
        let epilogue = GraphPass::new(self.passes.len() - 1);
        let data = &self.resources[resource.index()];
        let count = data.subresource_count();

        let after = match data.discard_pass {
            Some(discard) => SubresourceState {
                location: BarrierLocation::Epilogue,
                ..SubresourceState::at(self.pass_pipeline(discard), discard, Access::DISCARD)
            },
            None if data.epilogue_access.is_empty() => return,
            None => SubresourceState::at(Pipeline::Graphics, epilogue, data.epilogue_access),
        };

        let untouched = match (data.transient, data.acquire_pass, data.first_pass) {
            (true, Some(_), Some(first)) => {
                SubresourceState::at(self.pass_pipeline(first), first, Access::DISCARD)
            }
            _ => SubresourceState::at(Pipeline::Graphics, GraphPass::new(0), data.initial_access),
        };

        let states = data.state.clone();
        for (sub, state) in states.into_iter().enumerate().take(count) {
            let before = state.map(|id| *self.state(id)).unwrap_or(untouched);
            if SubresourceState::is_transition_required(&before, &after) {
                self.add_transition(resource, sub, &before, &after);
            }
        }

        if let Some(discard) = self.resources[resource.index()].discard_pass {
            self.add_aliasing_discard(discard, resource);
        }
    }

    /// The access every subresource ends the frame in, `UNKNOWN` when they differ.
    pub(crate) fn final_access(&self, resource: GraphResource) -> Access {
        let data = &self.resources[resource.index()];
        if !data.epilogue_access.is_empty() && !data.skip_last_transition {
            return data.epilogue_access;
        }
        let mut accesses = data.state.iter().map(|s| s.map(|id| self.state(id).access));
        let Some(first) = accesses.next().flatten() else {
            return data.initial_access;
        };
        if accesses.all(|a| a == Some(first)) {
            first
        } else {
            Access::UNKNOWN
        }
    }

    /// Creates the device object of every batch which has something to synchronize.
    pub(crate) fn create_transitions(&mut self) -> GraphResult<()> {
        let device: &dyn Device = self.device;
        let create = |batch: &mut BarrierBatch| -> GraphResult<()> {
            if batch.needs_token() {
                batch.token = Some(device.create_transition(&batch.create_info())?);
            }
            Ok(())
        };

        if self.context.config.parallel_setup {
            let batches = &mut self.batches;
            self.context
                .thread_pool
                .install(|| batches.par_iter_mut().try_for_each(create))?;
        } else {
            self.batches.iter_mut().try_for_each(create)?;
        }

        let created = self.batches.iter().filter(|b| b.token.is_some()).count();
        GraphStats::add(self.context.stats.barrier_batches(), created as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(pipeline: Pipeline, pass: usize, access: Access) -> SubresourceState {
        SubresourceState::at(pipeline, GraphPass::new(pass), access)
    }

    #[test]
    fn test_read_states_merge() {
        let a = state(Pipeline::Graphics, 1, Access::SRV_GRAPHICS);
        let b = state(Pipeline::AsyncCompute, 2, Access::SRV_COMPUTE);
        let w = state(Pipeline::Graphics, 3, Access::RTV);
        assert!(SubresourceState::is_merge_allowed(&a, &b));
        assert!(!SubresourceState::is_merge_allowed(&a, &w));
        assert!(!SubresourceState::is_merge_allowed(&w, &w));
    }

    #[test]
    fn test_transition_required() {
        let a = state(Pipeline::Graphics, 1, Access::SRV_GRAPHICS);
        let b = state(Pipeline::Graphics, 2, Access::SRV_GRAPHICS);
        let c = state(Pipeline::AsyncCompute, 3, Access::SRV_GRAPHICS);
        assert!(!SubresourceState::is_transition_required(&a, &b));
        assert!(SubresourceState::is_transition_required(&b, &c));

        let mut uav_a = state(Pipeline::Graphics, 1, Access::UAV_COMPUTE);
        let mut uav_b = state(Pipeline::Graphics, 2, Access::UAV_COMPUTE);
        assert!(SubresourceState::is_transition_required(&uav_a, &uav_b));
        uav_a.no_barrier_group = Some(4);
        uav_b.no_barrier_group = Some(4);
        assert!(!SubresourceState::is_transition_required(&uav_a, &uav_b));
    }

    #[test]
    fn test_state_pipelines() {
        let mut merged = state(Pipeline::Graphics, 1, Access::SRV_GRAPHICS);
        assert_eq!(merged.pipelines(), PipelineMask::GRAPHICS);
        merged.first_pass[Pipeline::AsyncCompute] = GraphPass::new(3).into();
        merged.last_pass[Pipeline::AsyncCompute] = GraphPass::new(3).into();
        assert_eq!(merged.pipelines(), PipelineMask::ALL);
        assert_eq!(merged.first_pass_overall(), Some(GraphPass::new(1)));
        assert_eq!(merged.last_pass_overall(), Some(GraphPass::new(3)));
    }
}
