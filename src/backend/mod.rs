//! The device-side collaborator the frame graph drives.
//!
//! A backend owns every GPU object the graph asks for and hands back
//! generation-tagged keys. The graph never talks to a device directly.

use slotmap::new_key_type;

use crate::framegraph::{AccessFlags, ClearValue, TextureDesc, TrackingState};

pub mod recording;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use recording::{RecordedCommand, RecordingBackend, RecordingCommandList};

new_key_type! { pub struct HeapKey; }
new_key_type! { pub struct TextureKey; }
new_key_type! { pub struct ViewKey; }

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryRequirement {
    pub size_bytes: u64,
    pub alignment_bytes: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ViewKind {
    RenderTarget,
    ShaderRead,
    Depth,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TextureBarrier {
    pub texture: TextureKey,
    pub before: TrackingState,
    pub after: TrackingState,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn covering(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    pub fn covering(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// A texture owned outside the graph, one backend texture per frame slot.
#[derive(Clone, Debug)]
pub struct ImportedTexture {
    pub desc: TextureDesc,
    pub textures: Vec<TextureKey>,
}

pub trait Backend {
    type Command: Copy;

    fn name(&self) -> &'static str;

    fn query_size_and_alignment(
        &mut self,
        desc: &TextureDesc,
        accesses: AccessFlags,
    ) -> anyhow::Result<MemoryRequirement>;

    fn allocate_heap(&mut self, size_bytes: u64) -> anyhow::Result<HeapKey>;

    fn create_placed_texture(
        &mut self,
        heap: HeapKey,
        offset_bytes: u64,
        desc: &TextureDesc,
        accesses: AccessFlags,
        initial: TrackingState,
        clear: Option<ClearValue>,
    ) -> anyhow::Result<TextureKey>;

    fn create_view(
        &mut self,
        texture: TextureKey,
        kind: ViewKind,
        desc: &TextureDesc,
    ) -> anyhow::Result<ViewKey>;

    fn destroy_view(&mut self, view: ViewKey);

    fn destroy_texture(&mut self, texture: TextureKey);

    fn free_heap(&mut self, heap: HeapKey);

    fn bind_descriptor_heaps(&mut self, cmd: Self::Command);

    fn begin_pass(&mut self, cmd: Self::Command, name: &str);

    /// Called after a pass's targets, clears and discards are recorded and
    /// right before its executor runs.
    fn begin_execution(&mut self, _cmd: Self::Command) {}

    fn end_pass(&mut self, cmd: Self::Command);

    fn record_barriers(&mut self, cmd: Self::Command, barriers: &[TextureBarrier]);

    fn record_set_targets(&mut self, cmd: Self::Command, colors: &[ViewKey], depth: Option<ViewKey>);

    fn record_viewports(&mut self, cmd: Self::Command, viewports: &[Viewport]);

    fn record_scissors(&mut self, cmd: Self::Command, scissors: &[ScissorRect]);

    fn record_clear_color(&mut self, cmd: Self::Command, view: ViewKey, color: [f32; 4]);

    fn record_clear_depth(&mut self, cmd: Self::Command, view: ViewKey, depth: f32, stencil: u8);

    fn record_discard(&mut self, cmd: Self::Command, texture: TextureKey);
}
