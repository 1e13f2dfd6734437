pub mod access;
pub mod allocator;
pub mod barrier;
pub mod blackboard;
pub mod compile;
pub mod dump;
pub mod execute;
pub mod record;
pub mod resource;

use std::{
    borrow::Cow,
    fmt::Display,
    ops::{Deref, DerefMut, Index, IndexMut},
    sync::Arc,
};

use crate::{config::GraphConfig, error::GraphError, stats::GraphStats};

pub use access::Access;
pub use allocator::ResourcePool;
pub use barrier::{AliasingInfo, TransitionCreateInfo, TransitionInfo};
pub use blackboard::Blackboard;
pub use execute::{Command, CommandStream, ExecutionReport, PassContext};
pub use record::{
    DepthStencilAccess, GraphBuilder, LoadAction, PassFlags, PassParameters, PassTaskMode,
};
pub use resource::{
    BufferDesc, BufferUsage, ExtractedBuffer, ExtractedTexture, ResourceDesc, ResourceFlags,
    Subresource, SubresourceLayout, SubresourceRange, TextureDesc, TextureFormat, TextureUsage,
};

macro_rules! simple_handle {
    ($($visibility:vis $name:ident),+) => {
        $(
            #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
            #[repr(transparent)]
            $visibility struct $name(u32);
            impl $name {
                pub(crate) fn new(index: usize) -> Self {
                    assert!(index < u32::MAX as usize);
                    Self(index as u32)
                }
                #[inline]
                pub fn index(&self) -> usize {
                    self.0 as usize
                }
            }
        )+
    };
}

simple_handle! {
    pub GraphPass, pub GraphResource, pub GraphTexture, pub GraphBuffer,
    pub(crate) StateId, pub(crate) BatchId
}

impl From<GraphTexture> for GraphResource {
    fn from(value: GraphTexture) -> Self {
        GraphResource(value.0)
    }
}

impl From<GraphBuffer> for GraphResource {
    fn from(value: GraphBuffer) -> Self {
        GraphResource(value.0)
    }
}

macro_rules! optional_handle {
    ($($visibility:vis $name:ident => $handle:ident),+) => {
        $(
            #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
            $visibility struct $name(u32);
            impl $name {
                pub(crate) const NONE: Self = Self(u32::MAX);
                pub(crate) fn new(handle: Option<$handle>) -> Self {
                    match handle {
                        Some(handle) => Self(handle.0),
                        None => Self::NONE,
                    }
                }
                #[inline]
                pub(crate) fn get(&self) -> Option<$handle> {
                    if self.0 == u32::MAX {
                        None
                    } else {
                        Some($handle(self.0))
                    }
                }
                #[inline]
                pub(crate) fn is_some(&self) -> bool {
                    self.0 != u32::MAX
                }
            }
            impl Default for $name {
                fn default() -> Self {
                    Self::NONE
                }
            }
            impl From<$handle> for $name {
                fn from(value: $handle) -> Self {
                    Self(value.0)
                }
            }
            impl std::fmt::Debug for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    match self.get() {
                        Some(handle) => write!(f, "{}", handle.index()),
                        None => write!(f, "-"),
                    }
                }
            }
        )+
    };
}

optional_handle! { pub(crate) PassOption => GraphPass }

/// One of the two hardware queues passes are scheduled on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Pipeline {
    Graphics = 0,
    AsyncCompute = 1,
}

impl Pipeline {
    pub const ALL: [Pipeline; 2] = [Pipeline::Graphics, Pipeline::AsyncCompute];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
    pub fn mask(self) -> PipelineMask {
        match self {
            Pipeline::Graphics => PipelineMask::GRAPHICS,
            Pipeline::AsyncCompute => PipelineMask::ASYNC_COMPUTE,
        }
    }
    pub fn other(self) -> Pipeline {
        match self {
            Pipeline::Graphics => Pipeline::AsyncCompute,
            Pipeline::AsyncCompute => Pipeline::Graphics,
        }
    }
    pub fn name(self) -> &'static str {
        match self {
            Pipeline::Graphics => "Graphics",
            Pipeline::AsyncCompute => "AsyncCompute",
        }
    }
}

bitflags::bitflags! {
    /// A set of pipelines, the owners of a subresource state or the targets of a barrier batch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct PipelineMask: u8 {
        const GRAPHICS = 1;
        const ASYNC_COMPUTE = 2;
        const ALL = Self::GRAPHICS.bits() | Self::ASYNC_COMPUTE.bits();
    }
}

impl PipelineMask {
    pub fn pipelines(self) -> impl Iterator<Item = Pipeline> {
        Pipeline::ALL
            .into_iter()
            .filter(move |p| self.contains(p.mask()))
    }
    /// The pipeline if exactly one is set.
    pub fn single(self) -> Option<Pipeline> {
        if self == Self::GRAPHICS {
            Some(Pipeline::Graphics)
        } else if self == Self::ASYNC_COMPUTE {
            Some(Pipeline::AsyncCompute)
        } else {
            None
        }
    }
    /// Slot of the epilogue batch which begins transitions for this set of pipelines.
    pub(crate) fn epilogue_slot(self) -> usize {
        debug_assert!(!self.is_empty());
        self.bits() as usize - 1
    }
    pub fn name(self) -> &'static str {
        match self.bits() {
            1 => "Graphics",
            2 => "AsyncCompute",
            3 => "All",
            _ => "None",
        }
    }
}

/// A value per pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ByPipeline<T>(pub [T; 2]);

impl<T: Copy> ByPipeline<T> {
    pub fn splat(value: T) -> Self {
        Self([value; 2])
    }
}

impl<T> ByPipeline<T> {
    pub fn iter(&self) -> impl Iterator<Item = (Pipeline, &T)> {
        Pipeline::ALL.into_iter().zip(self.0.iter())
    }
}

impl<T> Index<Pipeline> for ByPipeline<T> {
    type Output = T;
    fn index(&self, index: Pipeline) -> &Self::Output {
        &self.0[index.index()]
    }
}

impl<T> IndexMut<Pipeline> for ByPipeline<T> {
    fn index_mut(&mut self, index: Pipeline) -> &mut Self::Output {
        &mut self.0[index.index()]
    }
}

pub(crate) struct GraphObject<T> {
    pub(crate) name: Cow<'static, str>,
    pub(crate) inner: T,
}

impl<T> GraphObject<T> {
    pub(crate) fn new(name: impl Into<Cow<'static, str>>, inner: T) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }
    pub(crate) fn display(&self, index: usize) -> GraphObjectDisplay<'_> {
        GraphObjectDisplay {
            name: &self.name,
            index,
            prefix: "#",
        }
    }
}

impl<T> Deref for GraphObject<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> DerefMut for GraphObject<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

pub(crate) struct GraphObjectDisplay<'a> {
    name: &'a str,
    index: usize,
    prefix: &'a str,
}

impl<'a> GraphObjectDisplay<'a> {
    pub(crate) fn set_prefix(mut self, prefix: &'a str) -> Self {
        self.prefix = prefix;
        self
    }
}

impl<'a> Display for GraphObjectDisplay<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}{}", self.prefix, self.index)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// State that outlives a single frame: configuration, the pooled resources, the statistics
/// and the thread pool used for parallel recording.
pub struct GraphContext {
    pub(crate) config: GraphConfig,
    pub(crate) pool: ResourcePool,
    pub(crate) stats: Arc<GraphStats>,
    pub(crate) thread_pool: rayon::ThreadPool,
    pub(crate) frame: u64,
}

impl GraphContext {
    pub fn new(config: GraphConfig) -> Result<Self, GraphError> {
        Self::with_stats(config, Arc::new(GraphStats::new()))
    }
    pub fn with_stats(config: GraphConfig, stats: Arc<GraphStats>) -> Result<Self, GraphError> {
        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("frame-graph worker {i}"));
        if let Some(threads) = config.threads {
            builder = builder.num_threads(threads);
        }
        let thread_pool = builder
            .build()
            .map_err(|e| GraphError::ThreadPool(e.to_string()))?;

        Ok(Self {
            config,
            pool: ResourcePool::new(),
            stats,
            thread_pool,
            frame: 0,
        })
    }
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }
    pub fn config_mut(&mut self) -> &mut GraphConfig {
        &mut self.config
    }
    pub fn stats(&self) -> &Arc<GraphStats> {
        &self.stats
    }
    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }
    pub fn pool_mut(&mut self) -> &mut ResourcePool {
        &mut self.pool
    }
    /// Number of frames executed with this context.
    pub fn frame(&self) -> u64 {
        self.frame
    }
}
