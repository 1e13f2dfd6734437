use std::{borrow::Cow, sync::Arc};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::{
    device::{NativeBuffer, NativeResource, NativeTexture},
    tracing::shim_macros::trace,
};

use super::{
    access::Access, record::GraphBuilder, ByPipeline, GraphBuffer, GraphObject, GraphPass,
    GraphResource, GraphTexture, PassOption, Pipeline, StateId,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    Rg32Float,
    R8Unorm,
    Depth32Float,
    Depth24PlusStencil8,
    Depth32FloatStencil8,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float
                | TextureFormat::Depth24PlusStencil8
                | TextureFormat::Depth32FloatStencil8
        )
    }
    pub fn has_stencil(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth24PlusStencil8 | TextureFormat::Depth32FloatStencil8
        )
    }
    /// Depth and stencil are tracked as separate planes.
    pub fn plane_count(&self) -> u32 {
        if self.has_stencil() {
            2
        } else {
            1
        }
    }
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8
            | TextureFormat::R32Float => 4,
            TextureFormat::Rgba16Float
            | TextureFormat::Rg32Float
            | TextureFormat::Depth32FloatStencil8 => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

bitflags::bitflags! {
    /// Ways a texture may be bound, checked against the accesses of its passes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureUsage: u32 {
        const SHADER_RESOURCE = 1 << 0;
        const UNORDERED_ACCESS = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const DEPTH_STENCIL = 1 << 3;
        const COPY_SRC = 1 << 4;
        const COPY_DST = 1 << 5;
        const RESOLVE_SRC = 1 << 6;
        const RESOLVE_DST = 1 << 7;
        const PRESENT = 1 << 8;
        const CPU_READ = 1 << 9;
    }
}

bitflags::bitflags! {
    /// Ways a buffer may be bound, checked against the accesses of its passes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        const SHADER_RESOURCE = 1 << 0;
        const UNORDERED_ACCESS = 1 << 1;
        const VERTEX = 1 << 2;
        const INDEX = 1 << 3;
        const INDIRECT = 1 << 4;
        const COPY_SRC = 1 << 5;
        const COPY_DST = 1 << 6;
        const CPU_READ = 1 << 7;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceFlags: u8 {
        /// Never place the resource in the transient heap.
        const FORCE_NON_TRANSIENT = 1 << 0;
        /// Contents never outlive the passes using it, the transient heap is used even when
        /// the transient policy disables its category.
        const MEMORYLESS = 1 << 1;
    }
}

impl TextureUsage {
    /// Usage a texture must have been created with to be accessed as `access`.
    pub fn required_for(access: Access) -> TextureUsage {
        let mut usage = TextureUsage::empty();
        let map = [
            (Access::SRV_MASK, TextureUsage::SHADER_RESOURCE),
            (Access::UAV_MASK, TextureUsage::UNORDERED_ACCESS),
            (Access::RTV, TextureUsage::RENDER_TARGET),
            (Access::DSV_READ | Access::DSV_WRITE, TextureUsage::DEPTH_STENCIL),
            (Access::COPY_SRC, TextureUsage::COPY_SRC),
            (Access::COPY_DEST, TextureUsage::COPY_DST),
            (Access::RESOLVE_SRC, TextureUsage::RESOLVE_SRC),
            (Access::RESOLVE_DST, TextureUsage::RESOLVE_DST),
            (Access::PRESENT, TextureUsage::PRESENT),
            (Access::CPU_READ, TextureUsage::CPU_READ),
        ];
        for (mask, required) in map {
            if access.intersects(mask) {
                usage |= required;
            }
        }
        usage
    }
}

impl BufferUsage {
    /// Usage a buffer must have been created with to be accessed as `access`.
    pub fn required_for(access: Access) -> BufferUsage {
        let mut usage = BufferUsage::empty();
        let map = [
            (Access::SRV_MASK, BufferUsage::SHADER_RESOURCE),
            (Access::UAV_MASK, BufferUsage::UNORDERED_ACCESS),
            (Access::INDIRECT_ARGS, BufferUsage::INDIRECT),
            (Access::COPY_SRC, BufferUsage::COPY_SRC),
            (Access::COPY_DEST, BufferUsage::COPY_DST),
            (Access::CPU_READ, BufferUsage::CPU_READ),
        ];
        for (mask, required) in map {
            if access.intersects(mask) {
                usage |= required;
            }
        }
        if access.contains(Access::VERTEX_OR_INDEX_BUFFER)
            && !usage.intersects(BufferUsage::VERTEX | BufferUsage::INDEX)
        {
            usage |= BufferUsage::VERTEX;
        }
        usage
    }
    fn satisfies(self, required: BufferUsage) -> bool {
        // vertex or index buffer access is satisfied by either usage
        let mut required = required;
        if required.contains(BufferUsage::VERTEX) && self.contains(BufferUsage::INDEX) {
            required.remove(BufferUsage::VERTEX);
        }
        self.contains(required)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub extent: [u32; 3],
    pub format: TextureFormat,
    pub mips: u32,
    pub array_slices: u32,
    pub usage: TextureUsage,
    pub flags: ResourceFlags,
}

impl TextureDesc {
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            extent: [width, height, 1],
            format,
            mips: 1,
            array_slices: 1,
            usage,
            flags: ResourceFlags::empty(),
        }
    }
    pub fn with_mips(mut self, mips: u32) -> Self {
        self.mips = mips.max(1);
        self
    }
    pub fn with_array_slices(mut self, array_slices: u32) -> Self {
        self.array_slices = array_slices.max(1);
        self
    }
    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }
    pub fn layout(&self) -> SubresourceLayout {
        SubresourceLayout {
            mips: self.mips,
            slices: self.array_slices,
            planes: self.format.plane_count(),
        }
    }
    /// Bytes needed to store every subresource without any padding.
    pub fn size_in_bytes(&self) -> u64 {
        let [mut width, mut height, mut depth] = self.extent.map(|e| e.max(1) as u64);
        let mut size = 0;
        for _ in 0..self.mips {
            size += width * height * depth;
            width = (width / 2).max(1);
            height = (height / 2).max(1);
            depth = (depth / 2).max(1);
        }
        size * self.format.bytes_per_pixel() as u64 * self.array_slices as u64
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: BufferUsage,
    pub flags: ResourceFlags,
}

impl BufferDesc {
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            size,
            usage,
            flags: ResourceFlags::empty(),
        }
    }
    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceDesc {
    Texture(TextureDesc),
    Buffer(BufferDesc),
}

impl ResourceDesc {
    pub fn layout(&self) -> SubresourceLayout {
        match self {
            ResourceDesc::Texture(desc) => desc.layout(),
            ResourceDesc::Buffer(_) => SubresourceLayout::SINGLE,
        }
    }
    pub fn flags(&self) -> ResourceFlags {
        match self {
            ResourceDesc::Texture(desc) => desc.flags,
            ResourceDesc::Buffer(desc) => desc.flags,
        }
    }
    pub fn is_texture(&self) -> bool {
        matches!(self, ResourceDesc::Texture(_))
    }
    pub fn size_in_bytes(&self) -> u64 {
        match self {
            ResourceDesc::Texture(desc) => desc.size_in_bytes(),
            ResourceDesc::Buffer(desc) => desc.size,
        }
    }
    pub(crate) fn usage_satisfies(&self, access: Access) -> bool {
        match self {
            ResourceDesc::Texture(desc) => desc.usage.contains(TextureUsage::required_for(access)),
            ResourceDesc::Buffer(desc) => desc.usage.satisfies(BufferUsage::required_for(access)),
        }
    }
    pub(crate) fn missing_usage(&self, access: Access) -> String {
        match self {
            ResourceDesc::Texture(desc) => {
                format!("{:?}", TextureUsage::required_for(access).difference(desc.usage))
            }
            ResourceDesc::Buffer(desc) => {
                format!("{:?}", BufferUsage::required_for(access).difference(desc.usage))
            }
        }
    }
}

/// Number of individually tracked subresources along each dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubresourceLayout {
    pub mips: u32,
    pub slices: u32,
    pub planes: u32,
}

impl SubresourceLayout {
    pub const SINGLE: Self = Self {
        mips: 1,
        slices: 1,
        planes: 1,
    };

    pub fn count(&self) -> usize {
        (self.mips * self.slices * self.planes) as usize
    }
    pub fn index(&self, subresource: Subresource) -> usize {
        (subresource.mip
            + subresource.slice * self.mips
            + subresource.plane * self.mips * self.slices) as usize
    }
    pub fn subresource(&self, index: usize) -> Subresource {
        let index = index as u32;
        Subresource {
            mip: index % self.mips,
            slice: (index / self.mips) % self.slices,
            plane: index / (self.mips * self.slices),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subresource {
    pub mip: u32,
    pub slice: u32,
    pub plane: u32,
}

/// A box of subresources, counts of `u32::MAX` extend to the end of the layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubresourceRange {
    pub mip: u32,
    pub mip_count: u32,
    pub slice: u32,
    pub slice_count: u32,
    pub plane: u32,
    pub plane_count: u32,
}

impl Default for SubresourceRange {
    fn default() -> Self {
        Self::ALL
    }
}

impl SubresourceRange {
    pub const ALL: Self = Self {
        mip: 0,
        mip_count: u32::MAX,
        slice: 0,
        slice_count: u32::MAX,
        plane: 0,
        plane_count: u32::MAX,
    };

    pub fn mip(mip: u32) -> Self {
        Self {
            mip,
            mip_count: 1,
            ..Self::ALL
        }
    }
    pub fn slice(slice: u32) -> Self {
        Self {
            slice,
            slice_count: 1,
            ..Self::ALL
        }
    }
    pub fn plane(plane: u32) -> Self {
        Self {
            plane,
            plane_count: 1,
            ..Self::ALL
        }
    }
    pub fn with_mips(mut self, mip: u32, mip_count: u32) -> Self {
        self.mip = mip;
        self.mip_count = mip_count;
        self
    }
    pub fn with_slices(mut self, slice: u32, slice_count: u32) -> Self {
        self.slice = slice;
        self.slice_count = slice_count;
        self
    }
    /// Clamps the open ended counts to `layout`.
    pub fn resolve(&self, layout: SubresourceLayout) -> SubresourceRange {
        let clamp = |start: u32, count: u32, total: u32| {
            if count == u32::MAX {
                total.saturating_sub(start)
            } else {
                count
            }
        };
        SubresourceRange {
            mip: self.mip,
            mip_count: clamp(self.mip, self.mip_count, layout.mips),
            slice: self.slice,
            slice_count: clamp(self.slice, self.slice_count, layout.slices),
            plane: self.plane,
            plane_count: clamp(self.plane, self.plane_count, layout.planes),
        }
    }
    pub fn is_within(&self, layout: SubresourceLayout) -> bool {
        let range = self.resolve(layout);
        range.mip_count > 0
            && range.slice_count > 0
            && range.plane_count > 0
            && range.mip as u64 + range.mip_count as u64 <= layout.mips as u64
            && range.slice as u64 + range.slice_count as u64 <= layout.slices as u64
            && range.plane as u64 + range.plane_count as u64 <= layout.planes as u64
    }
    pub fn is_whole(&self, layout: SubresourceLayout) -> bool {
        let range = self.resolve(layout);
        range.mip == 0
            && range.slice == 0
            && range.plane == 0
            && range.mip_count == layout.mips
            && range.slice_count == layout.slices
            && range.plane_count == layout.planes
    }
    /// Indices of the subresources inside `layout` covered by the range.
    pub fn indices(&self, layout: SubresourceLayout) -> impl Iterator<Item = usize> {
        let range = self.resolve(layout);
        let mips = range.mip..(range.mip + range.mip_count).min(layout.mips);
        let slices = range.slice..(range.slice + range.slice_count).min(layout.slices);
        let planes = range.plane..(range.plane + range.plane_count).min(layout.planes);
        planes.flat_map(move |plane| {
            let mips = mips.clone();
            slices.clone().flat_map(move |slice| {
                mips.clone().map(move |mip| layout.index(Subresource { mip, slice, plane }))
            })
        })
    }
}

/// Where the memory of a resource comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Placement {
    Unallocated,
    External,
    Pooled,
    Transient { offset: u64, size: u64 },
}

/// Last writer and reader of a subresource on one pipeline, used to derive pass dependencies.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ProducerState {
    pub(crate) access: Access,
    pub(crate) pass: PassOption,
    pub(crate) pass_if_read: PassOption,
    pub(crate) no_barrier_group: Option<u32>,
    pub(crate) pass_if_skip_barrier: PassOption,
}

type ExtractionSlot = Arc<Mutex<Option<(NativeResource, Access)>>>;

/// Receives a texture which survives the frame, filled in once the graph has executed.
#[derive(Clone, Debug)]
pub struct ExtractedTexture(pub(crate) ExtractionSlot);

impl ExtractedTexture {
    /// The native texture and the access it was left in, `None` before execution.
    pub fn get(&self) -> Option<(NativeTexture, Access)> {
        match *self.0.lock() {
            Some((NativeResource::Texture(texture), access)) => Some((texture, access)),
            _ => None,
        }
    }
}

/// Receives a buffer which survives the frame, filled in once the graph has executed.
#[derive(Clone, Debug)]
pub struct ExtractedBuffer(pub(crate) ExtractionSlot);

impl ExtractedBuffer {
    /// The native buffer and the access it was left in, `None` before execution.
    pub fn get(&self) -> Option<(NativeBuffer, Access)> {
        match *self.0.lock() {
            Some((NativeResource::Buffer(buffer), access)) => Some((buffer, access)),
            _ => None,
        }
    }
}

pub(crate) struct ResourceData {
    pub(crate) desc: ResourceDesc,
    pub(crate) layout: SubresourceLayout,
    pub(crate) native: Option<NativeResource>,
    pub(crate) external: bool,
    pub(crate) extraction: Option<ExtractionSlot>,
    /// Set once the resource is handed back to code outside the graph, later passes only read it.
    pub(crate) external_access: Option<Access>,
    /// The synthetic pass moving the resource into `external_access`, later readers wait for it.
    pub(crate) external_access_pass: PassOption,

    pub(crate) produced: bool,
    pub(crate) transient: bool,
    pub(crate) reference_count: u32,
    pub(crate) deallocated: bool,
    pub(crate) placement: Placement,

    /// Access the memory is in before the first pass, comes from the caller or the pool.
    pub(crate) initial_access: Access,
    /// Access the resource is left in after the last pass.
    pub(crate) epilogue_access: Access,

    pub(crate) first_pass: Option<GraphPass>,
    pub(crate) last_passes: ByPipeline<PassOption>,
    pub(crate) acquire_pass: Option<GraphPass>,
    pub(crate) discard_pass: Option<GraphPass>,
    pub(crate) aliasing_overlaps: SmallVec<[GraphResource; 2]>,
    pub(crate) previous_owner: Option<GraphResource>,
    pub(crate) has_next_owner: bool,
    pub(crate) skip_last_transition: bool,

    pub(crate) producers: Vec<ByPipeline<ProducerState>>,
    pub(crate) state: Vec<Option<StateId>>,
    pub(crate) merge_state: Vec<Option<StateId>>,
    pub(crate) first_state: Vec<Option<StateId>>,
}

impl ResourceData {
    pub(crate) fn new(desc: ResourceDesc) -> Self {
        let layout = desc.layout();
        let count = layout.count();
        Self {
            desc,
            layout,
            native: None,
            external: false,
            extraction: None,
            external_access: None,
            external_access_pass: PassOption::NONE,
            produced: false,
            transient: false,
            reference_count: 0,
            deallocated: false,
            placement: Placement::Unallocated,
            initial_access: Access::UNKNOWN,
            epilogue_access: Access::UNKNOWN,
            first_pass: None,
            last_passes: ByPipeline::default(),
            acquire_pass: None,
            discard_pass: None,
            aliasing_overlaps: SmallVec::new(),
            previous_owner: None,
            has_next_owner: false,
            skip_last_transition: false,
            producers: vec![ByPipeline::default(); count],
            state: vec![None; count],
            merge_state: vec![None; count],
            first_state: vec![None; count],
        }
    }
    pub(crate) fn is_extracted(&self) -> bool {
        self.extraction.is_some()
    }
    /// Writes to cull roots are visible outside the graph and keep their passes alive.
    pub(crate) fn is_cull_root(&self) -> bool {
        self.external || self.is_extracted()
    }
    pub(crate) fn is_internal(&self) -> bool {
        !self.external
    }
    pub(crate) fn subresource_count(&self) -> usize {
        self.layout.count()
    }
    pub(crate) fn last_producer_passes(&self) -> impl Iterator<Item = GraphPass> + '_ {
        self.producers
            .iter()
            .flat_map(|by_pipeline| by_pipeline.0.iter())
            .filter_map(|producer| producer.pass.get())
    }
}

impl<'a> GraphBuilder<'a> {
    fn push_resource(&mut self, name: Cow<'static, str>, data: ResourceData) -> GraphResource {
        let handle = GraphResource::new(self.resources.len());
        trace!("Resource '{}' registered as #{}", name, handle.index());
        self.resources.push(GraphObject::new(name, data));
        handle
    }
    /// Declares a texture owned by the graph, memory is assigned once the frame is compiled.
    pub fn create_texture(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        desc: TextureDesc,
    ) -> GraphTexture {
        let resource = self.push_resource(name.into(), ResourceData::new(ResourceDesc::Texture(desc)));
        GraphTexture(resource.0)
    }
    /// Declares a buffer owned by the graph, memory is assigned once the frame is compiled.
    pub fn create_buffer(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        desc: BufferDesc,
    ) -> GraphBuffer {
        let resource = self.push_resource(name.into(), ResourceData::new(ResourceDesc::Buffer(desc)));
        GraphBuffer(resource.0)
    }
    fn register_external(
        &mut self,
        name: Cow<'static, str>,
        native: NativeResource,
        desc: ResourceDesc,
        access: Access,
    ) -> GraphResource {
        if let Some(&existing) = self.external_lookup.get(&native) {
            return existing;
        }
        let mut data = ResourceData::new(desc);
        data.native = Some(native);
        data.external = true;
        data.placement = Placement::External;
        data.initial_access = access;
        data.epilogue_access = access;

        let handle = self.push_resource(name, data);
        self.external_lookup.insert(native, handle);
        handle
    }
    /// Makes a texture owned by the caller usable by passes.
    ///
    /// `access` is the state the caller left the texture in, it is transitioned back to it at the
    /// end of the frame unless extracted with a different access. Registering the same native
    /// texture again returns the first handle.
    pub fn register_external_texture(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        native: NativeTexture,
        desc: TextureDesc,
        access: Access,
    ) -> GraphTexture {
        let resource = self.register_external(
            name.into(),
            NativeResource::Texture(native),
            ResourceDesc::Texture(desc),
            access,
        );
        GraphTexture(resource.0)
    }
    /// Buffer counterpart of [`GraphBuilder::register_external_texture`].
    pub fn register_external_buffer(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        native: NativeBuffer,
        desc: BufferDesc,
        access: Access,
    ) -> GraphBuffer {
        let resource = self.register_external(
            name.into(),
            NativeResource::Buffer(native),
            ResourceDesc::Buffer(desc),
            access,
        );
        GraphBuffer(resource.0)
    }
    fn extract(&mut self, resource: GraphResource, access: Access) -> ExtractionSlot {
        let data = &mut self.resources[resource.index()];
        data.epilogue_access = access;
        if let Some(slot) = &data.extraction {
            return slot.clone();
        }
        let slot: ExtractionSlot = Arc::new(Mutex::new(None));
        data.extraction = Some(slot.clone());

        // the resource just became a root, previously recorded writers have to survive
        if self.context.config.cull_enabled() {
            let producers = data.last_producer_passes().collect::<SmallVec<[GraphPass; 4]>>();
            self.cull_stack.extend(producers);
            self.flush_cull_stack();
        }
        slot
    }
    /// Keeps the texture alive past the frame, it is left in `access` after the last pass.
    ///
    /// Passes recorded later may still read it but writing it is a usage error. Extracting
    /// the same texture twice returns the same slot.
    #[track_caller]
    pub fn extract_texture(&mut self, texture: GraphTexture, access: Access) -> ExtractedTexture {
        ExtractedTexture(self.extract(texture.into(), access))
    }
    /// Buffer counterpart of [`GraphBuilder::extract_texture`].
    #[track_caller]
    pub fn extract_buffer(&mut self, buffer: GraphBuffer, access: Access) -> ExtractedBuffer {
        ExtractedBuffer(self.extract(buffer.into(), access))
    }
    pub fn texture_desc(&self, texture: GraphTexture) -> &TextureDesc {
        match &self.resources[texture.index()].desc {
            ResourceDesc::Texture(desc) => desc,
            ResourceDesc::Buffer(_) => unreachable!("GraphTexture handle points to a buffer"),
        }
    }
    pub fn buffer_desc(&self, buffer: GraphBuffer) -> &BufferDesc {
        match &self.resources[buffer.index()].desc {
            ResourceDesc::Buffer(desc) => desc,
            ResourceDesc::Texture(_) => unreachable!("GraphBuffer handle points to a texture"),
        }
    }
    pub fn resource_name(&self, resource: impl Into<GraphResource>) -> &str {
        &self.resources[resource.into().index()].name
    }
    pub(crate) fn get_resource_display(&self, resource: GraphResource) -> super::GraphObjectDisplay<'_> {
        self.resources[resource.index()].display(resource.index())
    }
}
