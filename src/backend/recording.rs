//! Headless backend that records every call instead of talking to a device.
//!
//! Sizes are deterministic: texel size times area, rounded up to the
//! placement alignment. Budgets can be set to simulate out-of-memory.

use anyhow::bail;
use ash::vk;
use slotmap::SlotMap;

use super::{
    Backend, HeapKey, ImportedTexture, MemoryRequirement, ScissorRect, TextureBarrier, TextureKey,
    ViewKey, ViewKind, Viewport,
};
use crate::framegraph::{AccessFlags, ClearValue, TextureDesc, TrackingState, align_up};

pub const DEFAULT_PLACEMENT_ALIGNMENT: u64 = 64 * 1024;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordingCommandList(pub u32);

#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCommand {
    BindDescriptorHeaps,
    BeginPass(String),
    Barriers(Vec<TextureBarrier>),
    SetTargets {
        colors: Vec<ViewKey>,
        depth: Option<ViewKey>,
    },
    Viewports(Vec<Viewport>),
    Scissors(Vec<ScissorRect>),
    ClearColor {
        view: ViewKey,
        color: [f32; 4],
    },
    ClearDepth {
        view: ViewKey,
        depth: f32,
        stencil: u8,
    },
    Discard(TextureKey),
    /// Left by executors through [`RecordingBackend::mark`].
    Marker(String),
    EndPass,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedTexture {
    pub name: String,
    pub heap: Option<HeapKey>,
    pub offset_bytes: u64,
    pub size_bytes: u64,
    pub initial: Option<TrackingState>,
    pub clear: Option<ClearValue>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RecordedView {
    pub texture: TextureKey,
    pub kind: ViewKind,
}

#[derive(Debug)]
pub struct RecordingBackend {
    placement_alignment: u64,
    heap_budget: Option<u64>,
    texture_budget: Option<usize>,
    heaps: SlotMap<HeapKey, u64>,
    textures: SlotMap<TextureKey, RecordedTexture>,
    views: SlotMap<ViewKey, RecordedView>,
    commands: Vec<(RecordingCommandList, RecordedCommand)>,
    next_list: u32,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self {
            placement_alignment: DEFAULT_PLACEMENT_ALIGNMENT,
            heap_budget: None,
            texture_budget: None,
            heaps: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            views: SlotMap::with_key(),
            commands: Vec::new(),
            next_list: 0,
        }
    }
}

impl RecordingBackend {
    pub fn placement_alignment(mut self, alignment: u64) -> Self {
        self.placement_alignment = alignment;
        self
    }

    /// Fails any heap allocation larger than `bytes`.
    pub fn heap_budget(mut self, bytes: u64) -> Self {
        self.heap_budget = Some(bytes);
        self
    }

    /// Fails placed texture creation once `count` placed textures are alive.
    pub fn texture_budget(mut self, count: usize) -> Self {
        self.texture_budget = Some(count);
        self
    }

    /// Registers an externally owned texture, one per frame slot.
    pub fn import_texture(&mut self, desc: TextureDesc, frames_in_flight: usize) -> ImportedTexture {
        let textures = (0..frames_in_flight)
            .map(|slot| {
                self.textures.insert(RecordedTexture {
                    name: format!("{} #{}", desc.name, slot),
                    heap: None,
                    offset_bytes: 0,
                    size_bytes: 0,
                    initial: None,
                    clear: None,
                })
            })
            .collect();

        ImportedTexture { desc, textures }
    }

    pub fn begin_command_list(&mut self) -> RecordingCommandList {
        let list = RecordingCommandList(self.next_list);
        self.next_list += 1;
        list
    }

    /// Lets an executor leave a trace in the command stream.
    pub fn mark(&mut self, cmd: RecordingCommandList, label: impl Into<String>) {
        self.commands.push((cmd, RecordedCommand::Marker(label.into())));
    }

    pub fn commands(&self, cmd: RecordingCommandList) -> Vec<&RecordedCommand> {
        self.commands
            .iter()
            .filter(|(list, _)| *list == cmd)
            .map(|(_, command)| command)
            .collect()
    }

    pub fn take_commands(&mut self) -> Vec<(RecordingCommandList, RecordedCommand)> {
        std::mem::take(&mut self.commands)
    }

    pub fn texture_info(&self, texture: TextureKey) -> Option<&RecordedTexture> {
        self.textures.get(texture)
    }

    pub fn view_info(&self, view: ViewKey) -> Option<&RecordedView> {
        self.views.get(view)
    }

    pub fn heap_size(&self, heap: HeapKey) -> Option<u64> {
        self.heaps.get(heap).copied()
    }

    pub fn live_heap_count(&self) -> usize {
        self.heaps.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_view_count(&self) -> usize {
        self.views.len()
    }

    fn placed_texture_count(&self) -> usize {
        self.textures.values().filter(|t| t.heap.is_some()).count()
    }

    fn push(&mut self, cmd: RecordingCommandList, command: RecordedCommand) {
        self.commands.push((cmd, command));
    }
}

pub fn bytes_per_texel(format: vk::Format) -> u64 {
    match format {
        vk::Format::R8_UNORM | vk::Format::S8_UINT => 1,
        vk::Format::R8G8_UNORM | vk::Format::R16_SFLOAT | vk::Format::D16_UNORM => 2,
        vk::Format::R16G16B16A16_SFLOAT
        | vk::Format::R32G32_SFLOAT
        | vk::Format::D32_SFLOAT_S8_UINT => 8,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        _ => 4,
    }
}

impl Backend for RecordingBackend {
    type Command = RecordingCommandList;

    fn name(&self) -> &'static str {
        "Recording Backend"
    }

    fn query_size_and_alignment(
        &mut self,
        desc: &TextureDesc,
        _accesses: AccessFlags,
    ) -> anyhow::Result<MemoryRequirement> {
        let bytes = u64::from(desc.width) * u64::from(desc.height) * bytes_per_texel(desc.format);
        Ok(MemoryRequirement {
            size_bytes: align_up(bytes, self.placement_alignment),
            alignment_bytes: self.placement_alignment,
        })
    }

    fn allocate_heap(&mut self, size_bytes: u64) -> anyhow::Result<HeapKey> {
        if let Some(budget) = self.heap_budget
            && size_bytes > budget
        {
            bail!("heap of {size_bytes} bytes exceeds budget of {budget} bytes");
        }
        log::trace!("RecordingBackend: allocating heap of {} bytes", size_bytes);
        Ok(self.heaps.insert(size_bytes))
    }

    fn create_placed_texture(
        &mut self,
        heap: HeapKey,
        offset_bytes: u64,
        desc: &TextureDesc,
        accesses: AccessFlags,
        initial: TrackingState,
        clear: Option<ClearValue>,
    ) -> anyhow::Result<TextureKey> {
        let Some(&heap_size) = self.heaps.get(heap) else {
            bail!("unknown heap {:?}", heap);
        };
        if let Some(budget) = self.texture_budget
            && self.placed_texture_count() >= budget
        {
            bail!("texture budget of {budget} exhausted");
        }
        let requirement = self.query_size_and_alignment(desc, accesses)?;
        if offset_bytes % requirement.alignment_bytes != 0 {
            bail!("offset {offset_bytes} is not aligned to {}", requirement.alignment_bytes);
        }
        if offset_bytes + requirement.size_bytes > heap_size {
            bail!(
                "'{}' at {} + {} overruns heap of {} bytes",
                desc.name,
                offset_bytes,
                requirement.size_bytes,
                heap_size
            );
        }

        log::trace!(
            "RecordingBackend: placing '{}' at offset {} ({} bytes)",
            desc.name,
            offset_bytes,
            requirement.size_bytes
        );
        Ok(self.textures.insert(RecordedTexture {
            name: desc.name.clone(),
            heap: Some(heap),
            offset_bytes,
            size_bytes: requirement.size_bytes,
            initial: Some(initial),
            clear,
        }))
    }

    fn create_view(
        &mut self,
        texture: TextureKey,
        kind: ViewKind,
        _desc: &TextureDesc,
    ) -> anyhow::Result<ViewKey> {
        if !self.textures.contains_key(texture) {
            bail!("unknown texture {:?}", texture);
        }
        Ok(self.views.insert(RecordedView { texture, kind }))
    }

    fn destroy_view(&mut self, view: ViewKey) {
        self.views.remove(view);
    }

    fn destroy_texture(&mut self, texture: TextureKey) {
        self.textures.remove(texture);
    }

    fn free_heap(&mut self, heap: HeapKey) {
        log::trace!("RecordingBackend: freeing heap {:?}", heap);
        self.heaps.remove(heap);
    }

    fn bind_descriptor_heaps(&mut self, cmd: Self::Command) {
        self.push(cmd, RecordedCommand::BindDescriptorHeaps);
    }

    fn begin_pass(&mut self, cmd: Self::Command, name: &str) {
        self.push(cmd, RecordedCommand::BeginPass(name.to_owned()));
    }

    fn end_pass(&mut self, cmd: Self::Command) {
        self.push(cmd, RecordedCommand::EndPass);
    }

    fn record_barriers(&mut self, cmd: Self::Command, barriers: &[TextureBarrier]) {
        self.push(cmd, RecordedCommand::Barriers(barriers.to_vec()));
    }

    fn record_set_targets(&mut self, cmd: Self::Command, colors: &[ViewKey], depth: Option<ViewKey>) {
        self.push(
            cmd,
            RecordedCommand::SetTargets {
                colors: colors.to_vec(),
                depth,
            },
        );
    }

    fn record_viewports(&mut self, cmd: Self::Command, viewports: &[Viewport]) {
        self.push(cmd, RecordedCommand::Viewports(viewports.to_vec()));
    }

    fn record_scissors(&mut self, cmd: Self::Command, scissors: &[ScissorRect]) {
        self.push(cmd, RecordedCommand::Scissors(scissors.to_vec()));
    }

    fn record_clear_color(&mut self, cmd: Self::Command, view: ViewKey, color: [f32; 4]) {
        self.push(cmd, RecordedCommand::ClearColor { view, color });
    }

    fn record_clear_depth(&mut self, cmd: Self::Command, view: ViewKey, depth: f32, stencil: u8) {
        self.push(cmd, RecordedCommand::ClearDepth { view, depth, stencil });
    }

    fn record_discard(&mut self, cmd: Self::Command, texture: TextureKey) {
        self.push(cmd, RecordedCommand::Discard(texture));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_round_up_to_the_placement_alignment() {
        let mut backend = RecordingBackend::default();
        let desc = TextureDesc::new("lut", 16, 16, vk::Format::R8G8B8A8_UNORM);

        let requirement = backend.query_size_and_alignment(&desc, AccessFlags::empty()).unwrap();

        assert_eq!(requirement.size_bytes, DEFAULT_PLACEMENT_ALIGNMENT);
        assert_eq!(requirement.alignment_bytes, DEFAULT_PLACEMENT_ALIGNMENT);
    }

    #[test]
    fn heap_budget_rejects_large_heaps() {
        let mut backend = RecordingBackend::default().heap_budget(1024);

        assert!(backend.allocate_heap(1024).is_ok());
        assert!(backend.allocate_heap(1025).is_err());
    }

    #[test]
    fn placed_textures_must_fit_their_heap() {
        let mut backend = RecordingBackend::default();
        let heap = backend.allocate_heap(DEFAULT_PLACEMENT_ALIGNMENT).unwrap();
        let desc = TextureDesc::new("big", 256, 256, vk::Format::R8G8B8A8_UNORM);

        let placed = backend.create_placed_texture(
            heap,
            0,
            &desc,
            AccessFlags::RENDER_TARGET,
            TrackingState::UNDEFINED,
            None,
        );

        assert!(placed.is_err());
    }

    #[test]
    fn commands_are_kept_per_list() {
        let mut backend = RecordingBackend::default();
        let a = backend.begin_command_list();
        let b = backend.begin_command_list();

        backend.begin_pass(a, "shadow");
        backend.mark(b, "draw");
        backend.end_pass(a);

        assert_eq!(
            backend.commands(a),
            vec![&RecordedCommand::BeginPass("shadow".to_owned()), &RecordedCommand::EndPass]
        );
        assert_eq!(backend.commands(b).len(), 1);
    }
}
