pub mod recording;

use crate::{
    error::DeviceError,
    graph::{
        barrier::TransitionCreateInfo, execute::CommandStream, BufferDesc, ResourceDesc,
        TextureDesc,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NativeTexture(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NativeBuffer(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NativeResource {
    Texture(NativeTexture),
    Buffer(NativeBuffer),
}

/// Opaque handle of a transition batch created by [`Device::create_transition`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransitionToken(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
}

/// Memory a resource is created in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourcePlacement {
    /// A standalone allocation which may be kept alive across frames.
    Pooled,
    /// A range of the frame's transient heap, shared with resources of disjoint lifetime.
    Transient { offset: u64, size: u64 },
}

/// The graphics device the graph schedules work for.
///
/// The graph only decides what has to happen, an implementation turns resource descriptions
/// into native objects, transition batches into its own synchronization primitives and
/// command streams into submitted work. Transition creation may be called from several threads
/// at once.
pub trait Device: Send + Sync {
    fn create_texture(
        &self,
        name: &str,
        desc: &TextureDesc,
        placement: ResourcePlacement,
    ) -> Result<NativeTexture, DeviceError>;
    fn create_buffer(
        &self,
        name: &str,
        desc: &BufferDesc,
        placement: ResourcePlacement,
    ) -> Result<NativeBuffer, DeviceError>;
    /// Releases a resource the graph no longer references. Called for trimmed pool entries and
    /// for every transient resource once its frame is submitted, the device keeps the memory
    /// alive until the submitted work is done with it.
    fn destroy(&self, resource: NativeResource);
    /// Size and alignment inside the transient heap, `None` if the resource can't be placed there.
    fn transient_requirements(&self, desc: &ResourceDesc) -> Option<MemoryRequirements>;
    fn create_transition(
        &self,
        info: &TransitionCreateInfo<'_>,
    ) -> Result<TransitionToken, DeviceError>;
    fn submit(&self, stream: CommandStream) -> Result<(), DeviceError>;
}

pub(crate) fn create_resource(
    device: &dyn Device,
    name: &str,
    desc: &ResourceDesc,
    placement: ResourcePlacement,
) -> Result<NativeResource, DeviceError> {
    match desc {
        ResourceDesc::Texture(desc) => device
            .create_texture(name, desc, placement)
            .map(NativeResource::Texture),
        ResourceDesc::Buffer(desc) => device
            .create_buffer(name, desc, placement)
            .map(NativeResource::Buffer),
    }
}
