//! Frame graph: declare passes and the textures they touch, compile once,
//! then replay the compiled command stream every frame.
//!
//! Compilation orders the passes, measures each texture's lifetime, packs
//! textures with disjoint lifetimes into one heap and derives the barriers,
//! clears and discards every pass needs.

mod access;
pub mod alias;
mod barrier;
mod builder;
mod config;
mod error;
mod graph;
mod handle;
pub mod lifetime;
mod pass;
mod report;
mod resource;
mod ring;
pub mod schedule;

pub use access::{Access, AccessFlags, TrackingState, log_transition};
pub use alias::{AliasPlan, FinalResource, ResourceOrigin, SlotViews, align_up};
pub use builder::GraphBuilder;
pub use config::{DEFAULT_FRAMES_IN_FLIGHT, DEFAULT_HEAP_ALIGNMENT_FLOOR, GraphConfig};
pub use error::{ErrorKind, GraphError, GraphResult};
pub use graph::CompiledGraph;
pub use handle::{BuilderId, PassHandle, ResourceId, TextureHandle};
pub use lifetime::{Lifetime, LifetimeTable};
pub use pass::{PassContext, PassExecutor};
pub use report::{GraphReport, PassReport, ResourceReport};
pub use resource::{ClearValue, InitialState, TextureDesc};
pub use ring::GraphRing;
