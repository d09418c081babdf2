//! A per-frame render graph compiler and executor.
//!
//! Passes declare the textures they create, read and write through a
//! [`GraphBuilder`]. Building the graph orders the passes, packs transient
//! textures into one shared heap and precomputes every barrier, clear and
//! discard, yielding a [`CompiledGraph`] that replays onto any [`Backend`].

pub mod backend;
pub mod framegraph;

pub use backend::Backend;
pub use framegraph::{CompiledGraph, GraphBuilder, GraphConfig, GraphError, GraphRing};
