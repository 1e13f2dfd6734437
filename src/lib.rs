#![allow(unused)]

pub mod config;
pub mod device;
pub mod error;
pub mod graph;
pub mod stats;
pub mod tracing;
pub mod util;

pub use config::{GraphConfig, TransientPolicy};
pub use error::{DeviceError, GraphError, GraphResult};
pub use graph::{
    Access, GraphBuffer, GraphBuilder, GraphContext, GraphPass, GraphResource, GraphTexture,
    PassFlags, PassParameters, Pipeline,
};
pub use stats::{GraphStats, StatsSnapshot};
