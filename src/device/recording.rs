//! A device which performs no GPU work and only remembers what it was asked to do.
//!
//! Used by the tests and the demo binary to observe the decisions of the graph.

use std::{
    hash::{Hash, Hasher},
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;

use crate::{
    error::DeviceError,
    graph::{
        AliasingInfo, BufferDesc, ByPipeline, CommandStream, GraphPass, PipelineMask,
        ResourceDesc, TextureDesc, TransitionCreateInfo, TransitionInfo,
    },
    tracing::shim_macros::trace,
    util::constant_ahash_hasher,
};

use super::{
    Device, MemoryRequirements, NativeBuffer, NativeResource, NativeTexture, ResourcePlacement,
    TransitionToken,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedResource {
    pub name: String,
    pub native: NativeResource,
    pub placement: ResourcePlacement,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedTransition {
    pub token: TransitionToken,
    pub name: String,
    pub passes: ByPipeline<Option<GraphPass>>,
    pub pipelines_before: PipelineMask,
    pub pipelines_after: PipelineMask,
    pub transitions: Vec<TransitionInfo>,
    pub aliases: Vec<AliasingInfo>,
}

#[derive(Default)]
struct RecordingState {
    created: Vec<CreatedResource>,
    destroyed: Vec<NativeResource>,
    transitions: Vec<RecordedTransition>,
    submitted: Vec<CommandStream>,
}

pub struct RecordingDevice {
    next_handle: AtomicU64,
    transient_support: bool,
    transient_alignment: u64,
    allocation_limit: Option<usize>,
    state: Mutex<RecordingState>,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            transient_support: true,
            transient_alignment: 256,
            allocation_limit: None,
            state: Mutex::new(RecordingState::default()),
        }
    }
    /// Whether resources can be placed in the transient heap at all.
    pub fn with_transient_support(mut self, supported: bool) -> Self {
        self.transient_support = supported;
        self
    }
    /// Fails every resource creation after `count` successful ones with `OutOfMemory`.
    pub fn fail_allocations_after(mut self, count: Option<usize>) -> Self {
        self.allocation_limit = count;
        self
    }
    fn create(
        &self,
        name: &str,
        placement: ResourcePlacement,
        make: impl FnOnce(u64) -> NativeResource,
    ) -> Result<NativeResource, DeviceError> {
        let mut state = self.state.lock();
        if let Some(limit) = self.allocation_limit {
            if state.created.len() >= limit {
                return Err(DeviceError::OutOfMemory);
            }
        }
        let native = make(self.next_handle.fetch_add(1, Ordering::Relaxed));
        trace!("RecordingDevice: creating '{}' as {:?} ({:?})", name, native, placement);
        state.created.push(CreatedResource {
            name: name.to_owned(),
            native,
            placement,
        });
        Ok(native)
    }

    pub fn created(&self) -> Vec<CreatedResource> {
        self.state.lock().created.clone()
    }
    pub fn destroyed(&self) -> Vec<NativeResource> {
        self.state.lock().destroyed.clone()
    }
    /// Transition batches in creation order, which differs between runs with parallel setup.
    pub fn transitions(&self) -> Vec<RecordedTransition> {
        self.state.lock().transitions.clone()
    }
    pub fn transition(&self, token: TransitionToken) -> Option<RecordedTransition> {
        self.state
            .lock()
            .transitions
            .iter()
            .find(|t| t.token == token)
            .cloned()
    }
    pub fn submitted(&self) -> Vec<CommandStream> {
        self.state.lock().submitted.clone()
    }
    /// Drops everything recorded so far, handles keep counting up.
    pub fn clear(&self) {
        *self.state.lock() = RecordingState::default();
    }
}

impl Device for RecordingDevice {
    fn create_texture(
        &self,
        name: &str,
        _desc: &TextureDesc,
        placement: ResourcePlacement,
    ) -> Result<NativeTexture, DeviceError> {
        let native = self.create(name, placement, |h| {
            NativeResource::Texture(NativeTexture(h))
        })?;
        match native {
            NativeResource::Texture(texture) => Ok(texture),
            NativeResource::Buffer(_) => unreachable!(),
        }
    }
    fn create_buffer(
        &self,
        name: &str,
        _desc: &BufferDesc,
        placement: ResourcePlacement,
    ) -> Result<NativeBuffer, DeviceError> {
        let native = self.create(name, placement, |h| NativeResource::Buffer(NativeBuffer(h)))?;
        match native {
            NativeResource::Buffer(buffer) => Ok(buffer),
            NativeResource::Texture(_) => unreachable!(),
        }
    }
    fn destroy(&self, resource: NativeResource) {
        trace!("RecordingDevice: destroying {:?}", resource);
        self.state.lock().destroyed.push(resource);
    }
    fn transient_requirements(&self, desc: &ResourceDesc) -> Option<MemoryRequirements> {
        self.transient_support.then(|| MemoryRequirements {
            size: desc.size_in_bytes().max(1),
            alignment: self.transient_alignment,
        })
    }
    fn create_transition(
        &self,
        info: &TransitionCreateInfo<'_>,
    ) -> Result<TransitionToken, DeviceError> {
        // the token only depends on the contents so that parallel and serial setup agree
        let mut hasher = constant_ahash_hasher();
        info.name.hash(&mut hasher);
        info.passes.hash(&mut hasher);
        info.pipelines_before.hash(&mut hasher);
        info.pipelines_after.hash(&mut hasher);
        info.transitions.hash(&mut hasher);
        info.aliases.hash(&mut hasher);
        let token = TransitionToken(hasher.finish());

        self.state.lock().transitions.push(RecordedTransition {
            token,
            name: info.name.to_owned(),
            passes: info.passes,
            pipelines_before: info.pipelines_before,
            pipelines_after: info.pipelines_after,
            transitions: info.transitions.to_vec(),
            aliases: info.aliases.to_vec(),
        });
        Ok(token)
    }
    fn submit(&self, stream: CommandStream) -> Result<(), DeviceError> {
        trace!("RecordingDevice: submitting {} commands", stream.len());
        self.state.lock().submitted.push(stream);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BufferUsage, TextureFormat, TextureUsage};

    #[test]
    fn test_allocation_limit() {
        let device = RecordingDevice::new().fail_allocations_after(Some(1));
        let desc = BufferDesc::new(16, BufferUsage::SHADER_RESOURCE);
        assert!(device
            .create_buffer("a", &desc, ResourcePlacement::Pooled)
            .is_ok());
        assert_eq!(
            device.create_buffer("b", &desc, ResourcePlacement::Pooled),
            Err(DeviceError::OutOfMemory)
        );
        assert_eq!(device.created().len(), 1);
    }

    #[test]
    fn test_transient_requirements() {
        let desc = ResourceDesc::Texture(TextureDesc::new_2d(
            8,
            8,
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_TARGET,
        ));
        let device = RecordingDevice::new();
        assert_eq!(
            device.transient_requirements(&desc),
            Some(MemoryRequirements {
                size: 256,
                alignment: 256
            })
        );
        let device = RecordingDevice::new().with_transient_support(false);
        assert_eq!(device.transient_requirements(&desc), None);
    }
}
