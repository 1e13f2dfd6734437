use std::collections::{BTreeMap, BTreeSet};

use smallvec::SmallVec;

use crate::{
    device::{create_resource, Device, NativeResource, ResourcePlacement},
    error::{DeviceError, GraphError, GraphResult},
    stats::GraphStats,
    tracing::shim_macros::{debug, trace},
    util::{constant_ahash_hashmap, round_up_pow2},
};

use super::{
    access::Access,
    record::GraphBuilder,
    resource::{Placement, ResourceDesc, ResourceFlags},
    GraphPass, GraphResource,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AllocationKind {
    Allocate,
    Deallocate,
}

/// An allocation event scheduled at a pass, executed in one batch after the whole frame has
/// been walked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AllocationOp {
    pub(crate) pass: GraphPass,
    pub(crate) resource: GraphResource,
    pub(crate) kind: AllocationKind,
}

impl AllocationOp {
    pub(crate) fn allocate(pass: GraphPass, resource: GraphResource) -> Self {
        Self {
            pass,
            resource,
            kind: AllocationKind::Allocate,
        }
    }
    pub(crate) fn deallocate(pass: GraphPass, resource: GraphResource) -> Self {
        Self {
            pass,
            resource,
            kind: AllocationKind::Deallocate,
        }
    }
}

struct PoolEntry {
    native: NativeResource,
    /// Access the resource was left in by its last owner.
    access: Access,
    last_used_frame: u64,
    in_use: bool,
    /// The graph resource which last held the entry, only meaningful within `last_used_frame`.
    owner: Option<GraphResource>,
}

/// Result of [`ResourcePool::acquire`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PooledResource {
    pub(crate) native: NativeResource,
    pub(crate) access: Access,
    /// Resource of the current frame which held the memory before.
    pub(crate) previous_owner: Option<GraphResource>,
    pub(crate) reused: bool,
}

/// Resources kept alive across frames, keyed by their description.
///
/// Entries released during a frame can be handed to a later resource of the same frame, the
/// new owner then continues from the state the previous one left the memory in.
pub struct ResourcePool {
    entries: ahash::HashMap<ResourceDesc, Vec<PoolEntry>>,
    frame: u64,
}

impl Default for ResourcePool {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourcePool {
    pub fn new() -> Self {
        Self {
            entries: constant_ahash_hashmap(),
            frame: 0,
        }
    }
    pub(crate) fn acquire(
        &mut self,
        device: &dyn Device,
        name: &str,
        desc: &ResourceDesc,
    ) -> GraphResult<PooledResource> {
        let frame = self.frame;
        let entries = self.entries.entry(desc.clone()).or_default();

        if let Some(entry) = entries.iter_mut().find(|e| !e.in_use) {
            let previous_owner = entry.owner.filter(|_| entry.last_used_frame == frame);
            entry.in_use = true;
            entry.last_used_frame = frame;
            entry.owner = None;
            return Ok(PooledResource {
                native: entry.native,
                access: entry.access,
                previous_owner,
                reused: true,
            });
        }

        let native = create_resource(device, name, desc, ResourcePlacement::Pooled).map_err(
            |e| match e {
                DeviceError::OutOfMemory => GraphError::PoolExhausted {
                    name: name.to_owned(),
                },
                e => GraphError::Device(e),
            },
        )?;
        entries.push(PoolEntry {
            native,
            access: Access::UNKNOWN,
            last_used_frame: frame,
            in_use: true,
            owner: None,
        });
        Ok(PooledResource {
            native,
            access: Access::UNKNOWN,
            previous_owner: None,
            reused: false,
        })
    }
    fn find_mut(&mut self, desc: &ResourceDesc, native: NativeResource) -> Option<&mut PoolEntry> {
        self.entries
            .get_mut(desc)?
            .iter_mut()
            .find(|e| e.native == native)
    }
    /// Makes the entry available to later resources, `owner` is the resource that released it.
    pub(crate) fn release(&mut self, desc: &ResourceDesc, native: NativeResource, owner: GraphResource) {
        let frame = self.frame;
        if let Some(entry) = self.find_mut(desc, native) {
            debug_assert!(entry.in_use);
            entry.in_use = false;
            entry.owner = Some(owner);
            entry.last_used_frame = frame;
        }
    }
    pub(crate) fn record_access(&mut self, desc: &ResourceDesc, native: NativeResource, access: Access) {
        if let Some(entry) = self.find_mut(desc, native) {
            entry.access = access;
        }
    }
    /// Removes the entry from the pool, its native resource now belongs to the caller.
    pub(crate) fn detach(&mut self, desc: &ResourceDesc, native: NativeResource) {
        if let Some(entries) = self.entries.get_mut(desc) {
            entries.retain(|e| e.native != native);
        }
    }
    /// Ages the entries by one frame, every entry has to be released by now.
    pub fn tick(&mut self) {
        for entry in self.entries.values_mut().flatten() {
            debug_assert!(!entry.in_use, "Pool entry is still in use at the end of a frame");
            entry.in_use = false;
            entry.owner = None;
        }
        self.frame += 1;
    }
    /// Releases everything a failed frame acquired, the memory is free for the next frame.
    pub(crate) fn abandon_frame(&mut self) {
        for entry in self.entries.values_mut().flatten() {
            entry.in_use = false;
            entry.owner = None;
        }
        self.frame += 1;
    }
    /// Destroys the entries which have not been used for more than `max_unused_frames` frames.
    pub fn trim(&mut self, device: &dyn Device, max_unused_frames: u64) -> usize {
        let frame = self.frame;
        let mut destroyed = 0;
        self.entries.retain(|_, entries| {
            entries.retain(|entry| {
                let keep =
                    entry.in_use || frame.saturating_sub(entry.last_used_frame) <= max_unused_frames;
                if !keep {
                    device.destroy(entry.native);
                    destroyed += 1;
                }
                keep
            });
            !entries.is_empty()
        });
        if destroyed > 0 {
            debug!("Resource pool trimmed {} entries", destroyed);
        }
        destroyed
    }
    /// Number of pooled resources.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, Default)]
struct FreeChunk {
    size: u64,
    /// Resources which used the memory of the chunk earlier in the frame.
    owners: SmallVec<[GraphResource; 2]>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TransientAllocation {
    pub(crate) offset: u64,
    pub(crate) size: u64,
    pub(crate) overlaps: SmallVec<[GraphResource; 2]>,
}

/// Places resources with disjoint lifetimes into one frame heap.
///
/// Free space is kept as chunks indexed both by `(size, offset)` for best fit lookup and by
/// offset for coalescing, space past `top` has never been handed out.
pub(crate) struct TransientAllocator {
    by_size: BTreeSet<(u64, u64)>,
    by_offset: BTreeMap<u64, FreeChunk>,
    top: u64,
    high_water: u64,
    limit: u64,
    granularity: u64,
}

impl TransientAllocator {
    pub(crate) fn new(limit: u64, granularity: u64) -> Self {
        Self {
            by_size: BTreeSet::new(),
            by_offset: BTreeMap::new(),
            top: 0,
            high_water: 0,
            limit,
            granularity: granularity.max(1).next_power_of_two(),
        }
    }
    pub(crate) fn high_water(&self) -> u64 {
        self.high_water
    }
    fn insert_chunk(&mut self, offset: u64, chunk: FreeChunk) {
        debug_assert!(chunk.size > 0);
        self.by_size.insert((chunk.size, offset));
        self.by_offset.insert(offset, chunk);
    }
    fn remove_chunk(&mut self, offset: u64) -> FreeChunk {
        let chunk = self.by_offset.remove(&offset).unwrap_or_default();
        self.by_size.remove(&(chunk.size, offset));
        chunk
    }
    /// Takes `[start, start + size)` out of the free chunk at `offset`, returns the final size and
    /// the previous owners.
    fn split_chunk(
        &mut self,
        offset: u64,
        start: u64,
        size: u64,
    ) -> (u64, SmallVec<[GraphResource; 2]>) {
        let chunk = self.remove_chunk(offset);
        let end = offset + chunk.size;
        let mut size = size;

        if start > offset {
            self.insert_chunk(
                offset,
                FreeChunk {
                    size: start - offset,
                    owners: chunk.owners.clone(),
                },
            );
        }
        let remainder = end.saturating_sub(start + size);
        // slivers smaller than the granularity are never usable
        if remainder >= self.granularity {
            self.insert_chunk(
                start + size,
                FreeChunk {
                    size: remainder,
                    owners: chunk.owners.clone(),
                },
            );
        } else {
            size += remainder;
        }
        (size, chunk.owners)
    }
    pub(crate) fn allocate(&mut self, size: u64, alignment: u64) -> GraphResult<TransientAllocation> {
        let size = round_up_pow2(size.max(1), self.granularity);
        let alignment = alignment.max(self.granularity).next_power_of_two();

        // smallest chunk that still fits after alignment
        let fit = self
            .by_size
            .range((size, 0)..)
            .find_map(|&(chunk_size, offset)| {
                let start = round_up_pow2(offset, alignment);
                (start + size <= offset + chunk_size).then_some((offset, start))
            });
        if let Some((offset, start)) = fit {
            let (size, overlaps) = self.split_chunk(offset, start, size);
            return Ok(TransientAllocation {
                offset: start,
                size,
                overlaps,
            });
        }

        // grow the heap, reusing a free chunk touching the top
        let tail = self
            .by_offset
            .iter()
            .next_back()
            .filter(|(&offset, chunk)| offset + chunk.size == self.top)
            .map(|(&offset, _)| offset);
        let base = tail.unwrap_or(self.top);
        let start = round_up_pow2(base, alignment);
        let end = start + size;
        if end > self.limit {
            return Err(GraphError::TransientHeapExhausted {
                requested: size,
                limit: self.limit,
            });
        }

        let mut overlaps = SmallVec::new();
        if let Some(offset) = tail {
            let chunk = self.remove_chunk(offset);
            overlaps = chunk.owners.clone();
            if start > offset {
                self.insert_chunk(
                    offset,
                    FreeChunk {
                        size: start - offset,
                        owners: chunk.owners,
                    },
                );
            }
        } else if start > self.top {
            self.insert_chunk(
                self.top,
                FreeChunk {
                    size: start - self.top,
                    owners: SmallVec::new(),
                },
            );
        }
        self.top = end;
        self.high_water = self.high_water.max(end);

        Ok(TransientAllocation {
            offset: start,
            size,
            overlaps,
        })
    }
    /// Returns the range to the heap, later allocations in it will overlap `owner`.
    pub(crate) fn free(&mut self, owner: GraphResource, offset: u64, size: u64) {
        let mut offset = offset;
        let mut chunk = FreeChunk {
            size,
            owners: smallvec::smallvec![owner],
        };

        let merge_owners = |into: &mut FreeChunk, from: SmallVec<[GraphResource; 2]>| {
            for owner in from {
                if !into.owners.contains(&owner) {
                    into.owners.push(owner);
                }
            }
        };

        let previous = self
            .by_offset
            .range(..offset)
            .next_back()
            .filter(|(&o, c)| o + c.size == offset)
            .map(|(&o, _)| o);
        if let Some(previous) = previous {
            let previous_chunk = self.remove_chunk(previous);
            chunk.size += previous_chunk.size;
            merge_owners(&mut chunk, previous_chunk.owners);
            offset = previous;
        }
        let next = offset + chunk.size;
        if self.by_offset.contains_key(&next) {
            let next_chunk = self.remove_chunk(next);
            chunk.size += next_chunk.size;
            merge_owners(&mut chunk, next_chunk.owners);
        }
        self.insert_chunk(offset, chunk);
    }
}

impl<'a> GraphBuilder<'a> {
    /// Transient heap requirements if the resource is allowed to live there.
    fn transient_requirements(
        &self,
        resource: GraphResource,
    ) -> Option<crate::device::MemoryRequirements> {
        let data = &self.resources[resource.index()];
        let flags = data.desc.flags();
        if !data.is_internal() || data.is_extracted() || flags.contains(ResourceFlags::FORCE_NON_TRANSIENT) {
            return None;
        }
        let policy = &self.context.config.transient_allocation;
        let enabled = if data.desc.is_texture() {
            policy.textures
        } else {
            policy.buffers
        };
        if !enabled && !flags.contains(ResourceFlags::MEMORYLESS) {
            return None;
        }
        self.device.transient_requirements(&data.desc)
    }

    /// Runs the collected allocation events in order, assigning memory to every internal resource.
    pub(crate) fn execute_allocations(&mut self, ops: &[AllocationOp]) -> GraphResult<()> {
        let policy = &self.context.config.transient_allocation;
        let mut transient =
            TransientAllocator::new(policy.heap_size_limit, policy.alignment_granularity);

        for op in ops {
            match op.kind {
                AllocationKind::Allocate => self.allocate_resource(op.pass, op.resource, &mut transient)?,
                AllocationKind::Deallocate => {
                    self.deallocate_resource(op.pass, op.resource, &mut transient)
                }
            }
        }

        GraphStats::max(
            self.context.stats.transient_heap_high_water(),
            transient.high_water(),
        );
        Ok(())
    }

    fn allocate_resource(
        &mut self,
        pass: GraphPass,
        resource: GraphResource,
        transient: &mut TransientAllocator,
    ) -> GraphResult<()> {
        let device = self.device;

        if let Some(requirements) = self.transient_requirements(resource) {
            let allocation = transient.allocate(requirements.size, requirements.alignment)?;
            let data = &self.resources[resource.index()];
            let placement = ResourcePlacement::Transient {
                offset: allocation.offset,
                size: allocation.size,
            };
            let native = create_resource(device, &data.name, &data.desc, placement)?;
            trace!(
                "Resource '{}' placed at transient offset {} ({} bytes), overlapping {:?}",
                self.get_resource_display(resource),
                allocation.offset,
                allocation.size,
                allocation.overlaps
            );

            let data = &mut self.resources[resource.index()];
            data.native = Some(native);
            data.placement = Placement::Transient {
                offset: allocation.offset,
                size: allocation.size,
            };
            data.transient = true;
            data.acquire_pass = Some(pass);
            data.aliasing_overlaps = allocation.overlaps;
            GraphStats::add(self.context.stats.transient_allocations(), 1);
            return Ok(());
        }

        let data = &self.resources[resource.index()];
        let pooled = self.context.pool.acquire(device, &data.name, &data.desc)?;
        trace!(
            "Resource '{}' acquired from the pool as {:?} (reused: {})",
            self.get_resource_display(resource),
            pooled.native,
            pooled.reused
        );

        let data = &mut self.resources[resource.index()];
        data.native = Some(pooled.native);
        data.placement = Placement::Pooled;
        data.initial_access = pooled.access;
        data.previous_owner = pooled.previous_owner;
        // the pool remembers the final state instead
        data.skip_last_transition = !data.is_extracted();
        if let Some(previous) = pooled.previous_owner {
            self.resources[previous.index()].has_next_owner = true;
        }

        GraphStats::add(self.context.stats.pooled_allocations(), 1);
        if pooled.reused {
            GraphStats::add(self.context.stats.pooled_reuses(), 1);
        }
        Ok(())
    }

    /// Gives the native objects placed in the transient heap back to the device, every frame lays
    /// the heap out anew.
    pub(crate) fn destroy_transient_resources(&mut self) {
        let device = self.device;
        let mut destroyed = 0;
        for data in self.resources.iter_mut() {
            if !matches!(data.placement, Placement::Transient { .. }) {
                continue;
            }
            if let Some(native) = data.native.take() {
                device.destroy(native);
                destroyed += 1;
            }
        }
        if destroyed > 0 {
            trace!("Destroyed {} transient resources", destroyed);
        }
    }

    fn deallocate_resource(
        &mut self,
        pass: GraphPass,
        resource: GraphResource,
        transient: &mut TransientAllocator,
    ) {
        let data = &mut self.resources[resource.index()];
        match data.placement {
            Placement::Transient { offset, size } => {
                data.discard_pass = Some(pass);
                transient.free(resource, offset, size);
            }
            Placement::Pooled => {
                if let Some(native) = data.native {
                    self.context.pool.release(&data.desc, native, resource);
                }
            }
            Placement::External | Placement::Unallocated => {}
        }
    }
}
