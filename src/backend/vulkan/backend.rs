use anyhow::{Context, bail};
use ash::vk;
use slotmap::SlotMap;
use smallvec::SmallVec;
use vk_mem::Alloc;

use super::{VulkanContext, debug::DebugLabels};
use crate::{
    backend::{
        Backend, HeapKey, ImportedTexture, MemoryRequirement, ScissorRect, TextureBarrier,
        TextureKey, ViewKey, ViewKind, Viewport,
    },
    framegraph::{AccessFlags, ClearValue, TextureDesc, TrackingState},
};

struct Heap {
    allocation: vk_mem::Allocation,
    memory: vk::DeviceMemory,
    base_offset: u64,
    size_bytes: u64,
}

enum Ownership {
    Placed,
    Allocated(vk_mem::Allocation),
    External,
}

struct Texture {
    image: vk::Image,
    format: vk::Format,
    extent: vk::Extent2D,
    ownership: Ownership,
    /// The image content is still undefined; its first barrier discards it.
    fresh: bool,
}

struct View {
    view: vk::ImageView,
    texture: TextureKey,
}

struct Attachment {
    view: ViewKey,
    texture: TextureKey,
    image_view: vk::ImageView,
    load_op: vk::AttachmentLoadOp,
    clear: vk::ClearValue,
}

impl Attachment {
    fn info(&self, layout: vk::ImageLayout) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.image_view)
            .image_layout(layout)
            .load_op(self.load_op)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(self.clear)
    }
}

#[derive(Default)]
struct PendingRendering {
    extent: vk::Extent2D,
    colors: SmallVec<[Attachment; 4]>,
    depth: Option<Attachment>,
    stencil: bool,
    active: bool,
}

impl PendingRendering {
    fn attachment_mut(&mut self, view: ViewKey) -> Option<&mut Attachment> {
        self.colors
            .iter_mut()
            .chain(self.depth.as_mut())
            .find(|attachment| attachment.view == view)
    }
}

/// What every texture queried since the last heap allocation asks of the
/// memory it is placed in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct HeapConstraints {
    memory_type_bits: u32,
    alignment: u64,
}

impl Default for HeapConstraints {
    fn default() -> Self {
        Self {
            memory_type_bits: u32::MAX,
            alignment: 1,
        }
    }
}

impl HeapConstraints {
    fn narrow(&mut self, name: &str, requirements: &vk::MemoryRequirements) -> anyhow::Result<()> {
        let memory_type_bits = self.memory_type_bits & requirements.memory_type_bits;
        if memory_type_bits == 0 {
            bail!("'{}' shares no memory type with the other graph textures", name);
        }
        self.memory_type_bits = memory_type_bits;
        self.alignment = self.alignment.max(requirements.alignment);
        Ok(())
    }

    /// Hands out the accumulated constraints and starts over for the next build.
    fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}

/// Layout a barrier transitions from. Content nobody will read again is
/// dropped by transitioning from `UNDEFINED`.
fn old_layout(before: vk::ImageLayout, fresh: bool, discarded: bool) -> vk::ImageLayout {
    if fresh || discarded {
        vk::ImageLayout::UNDEFINED
    } else {
        before
    }
}

/// Places graph textures in vk-mem allocated device memory and records
/// passes with dynamic rendering and synchronization2 barriers.
pub struct VulkanBackend {
    device: ash::Device,
    labels: DebugLabels,
    heaps: SlotMap<HeapKey, Heap>,
    textures: SlotMap<TextureKey, Texture>,
    views: SlotMap<ViewKey, View>,
    constraints: HeapConstraints,
    pending: Option<PendingRendering>,
    /// Barriers of the current pass. They are recorded once the pass has
    /// declared its clears and discards.
    deferred: Vec<TextureBarrier>,
    discarded: SmallVec<[TextureKey; 4]>,
    allocator: vk_mem::Allocator,
}

impl VulkanBackend {
    pub fn new(context: &VulkanContext) -> anyhow::Result<Self> {
        let create_info = vk_mem::AllocatorCreateInfo::new(
            &context.instance,
            &context.device,
            context.physical_device,
        );
        let allocator = unsafe { vk_mem::Allocator::new(create_info).context("failed to create allocator")? };

        Ok(Self {
            device: context.device.clone(),
            labels: DebugLabels::new(&context.instance, &context.device),
            heaps: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            views: SlotMap::with_key(),
            constraints: HeapConstraints::default(),
            pending: None,
            deferred: Vec::new(),
            discarded: SmallVec::new(),
            allocator,
        })
    }

    /// Registers images owned elsewhere, one per frame slot. Their layout
    /// must already match `desc.access`.
    pub fn import_images(&mut self, desc: TextureDesc, images: &[vk::Image]) -> ImportedTexture {
        let textures = images
            .iter()
            .map(|&image| {
                self.textures.insert(Texture {
                    image,
                    format: desc.format,
                    extent: desc.extent(),
                    ownership: Ownership::External,
                    fresh: false,
                })
            })
            .collect();
        ImportedTexture { desc, textures }
    }

    /// Creates one dedicated image per frame slot, for use as an import.
    /// Release them with [`VulkanBackend::destroy_imported`].
    pub fn create_images(
        &mut self,
        desc: TextureDesc,
        accesses: AccessFlags,
        frames_in_flight: usize,
    ) -> anyhow::Result<ImportedTexture> {
        let create_info = image_create_info(&desc, usage_for(accesses | AccessFlags::from(desc.access)));
        let allocation_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::Auto,
            ..Default::default()
        };

        let mut textures = Vec::with_capacity(frames_in_flight);
        for slot in 0..frames_in_flight {
            let (image, allocation) = unsafe { self.allocator.create_image(&create_info, &allocation_info) }
                .with_context(|| format!("failed to create image '{}'", desc.name))?;
            self.labels
                .name_object(image, &format!("{} (Frame {})", desc.name, slot))?;
            textures.push(self.textures.insert(Texture {
                image,
                format: desc.format,
                extent: desc.extent(),
                ownership: Ownership::Allocated(allocation),
                fresh: true,
            }));
        }
        Ok(ImportedTexture { desc, textures })
    }

    pub fn destroy_imported(&mut self, imported: ImportedTexture) {
        for texture in imported.textures {
            self.destroy_texture(texture);
        }
    }

    pub fn image(&self, texture: TextureKey) -> Option<vk::Image> {
        self.textures.get(texture).map(|t| t.image)
    }

    pub fn image_view(&self, view: ViewKey) -> Option<vk::ImageView> {
        self.views.get(view).map(|v| v.view)
    }

    fn pending_mut(&mut self) -> Option<&mut PendingRendering> {
        let pending = self.pending.as_mut();
        if pending.is_none() {
            log::warn!("attachment command recorded outside a pass with targets");
        }
        pending
    }

    fn flush_barriers(&mut self, cmd: vk::CommandBuffer) {
        if self.deferred.is_empty() {
            self.discarded.clear();
            return;
        }

        let deferred = std::mem::take(&mut self.deferred);
        let image_barriers: SmallVec<[vk::ImageMemoryBarrier2; 8]> = deferred
            .iter()
            .filter_map(|barrier| {
                let texture = self.textures.get_mut(barrier.texture)?;
                let fresh = std::mem::take(&mut texture.fresh);
                // Only the first transition of a discarded texture drops its content.
                let discarded = match self.discarded.iter().position(|&key| key == barrier.texture) {
                    Some(index) => {
                        self.discarded.swap_remove(index);
                        true
                    }
                    None => false,
                };
                Some(
                    vk::ImageMemoryBarrier2::default()
                        .src_stage_mask(barrier.before.stage)
                        .src_access_mask(barrier.before.access)
                        .dst_stage_mask(barrier.after.stage)
                        .dst_access_mask(barrier.after.access)
                        .old_layout(old_layout(barrier.before.layout, fresh, discarded))
                        .new_layout(barrier.after.layout)
                        .image(texture.image)
                        .subresource_range(full_range(aspect_mask(texture.format))),
                )
            })
            .collect();
        self.discarded.clear();

        if image_barriers.is_empty() {
            return;
        }
        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(&image_barriers);
        unsafe { self.device.cmd_pipeline_barrier2(cmd, &dependency_info) };
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        log::trace!("Destroying Vulkan Backend");
        if !self.heaps.is_empty() || !self.views.is_empty() {
            log::warn!(
                "  {} heaps and {} views still alive",
                self.heaps.len(),
                self.views.len()
            );
        }
    }
}

fn usage_for(accesses: AccessFlags) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::empty();
    if accesses.needs_render_target_view() {
        usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if accesses.needs_shader_view() {
        usage |= vk::ImageUsageFlags::SAMPLED;
    }
    if accesses.needs_depth_view() {
        usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if accesses.contains(AccessFlags::PRESENT) {
        usage |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    usage
}

fn image_create_info(desc: &TextureDesc, usage: vk::ImageUsageFlags) -> vk::ImageCreateInfo<'static> {
    vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(desc.format)
        .extent(vk::Extent3D {
            width: desc.width,
            height: desc.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
}

fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D32_SFLOAT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT
    )
}

fn aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT | vk::Format::D16_UNORM => vk::ImageAspectFlags::DEPTH,
        vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

fn full_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect_mask)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

impl Backend for VulkanBackend {
    type Command = vk::CommandBuffer;

    fn name(&self) -> &'static str {
        "Vulkan Backend"
    }

    fn query_size_and_alignment(
        &mut self,
        desc: &TextureDesc,
        accesses: AccessFlags,
    ) -> anyhow::Result<MemoryRequirement> {
        let create_info = image_create_info(desc, usage_for(accesses));
        let query = vk::DeviceImageMemoryRequirements::default().create_info(&create_info);
        let mut requirements = vk::MemoryRequirements2::default();
        unsafe {
            self.device
                .get_device_image_memory_requirements(&query, &mut requirements)
        };
        let requirements = requirements.memory_requirements;

        self.constraints.narrow(&desc.name, &requirements)?;

        Ok(MemoryRequirement {
            size_bytes: requirements.size,
            alignment_bytes: requirements.alignment,
        })
    }

    fn allocate_heap(&mut self, size_bytes: u64) -> anyhow::Result<HeapKey> {
        let constraints = self.constraints.take();
        let requirements = vk::MemoryRequirements {
            size: size_bytes,
            alignment: constraints.alignment,
            memory_type_bits: constraints.memory_type_bits,
        };
        let create_info = vk_mem::AllocationCreateInfo {
            flags: vk_mem::AllocationCreateFlags::DEDICATED_MEMORY,
            required_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            memory_type_bits: constraints.memory_type_bits,
            ..Default::default()
        };
        let allocation = unsafe { self.allocator.allocate_memory(&requirements, &create_info) }
            .context("failed to allocate frame heap")?;
        let info = self.allocator.get_allocation_info(&allocation);

        log::trace!("VulkanBackend: allocated heap of {} bytes", size_bytes);
        Ok(self.heaps.insert(Heap {
            allocation,
            memory: info.device_memory,
            base_offset: info.offset,
            size_bytes,
        }))
    }

    fn create_placed_texture(
        &mut self,
        heap: HeapKey,
        offset_bytes: u64,
        desc: &TextureDesc,
        accesses: AccessFlags,
        _initial: TrackingState,
        _clear: Option<ClearValue>,
    ) -> anyhow::Result<TextureKey> {
        let Some(heap) = self.heaps.get(heap) else {
            bail!("unknown heap {:?}", heap);
        };
        if offset_bytes >= heap.size_bytes {
            bail!("offset {} is outside a heap of {} bytes", offset_bytes, heap.size_bytes);
        }

        let create_info = image_create_info(desc, usage_for(accesses));
        let image = unsafe { self.device.create_image(&create_info, None) }
            .with_context(|| format!("failed to create image '{}'", desc.name))?;
        if let Err(e) = unsafe {
            self.device
                .bind_image_memory(image, heap.memory, heap.base_offset + offset_bytes)
        } {
            unsafe { self.device.destroy_image(image, None) };
            bail!("failed to bind '{}' at offset {}: {:?}", desc.name, offset_bytes, e);
        }
        self.labels.name_object(image, &desc.name)?;

        Ok(self.textures.insert(Texture {
            image,
            format: desc.format,
            extent: desc.extent(),
            ownership: Ownership::Placed,
            fresh: true,
        }))
    }

    fn create_view(
        &mut self,
        texture: TextureKey,
        kind: ViewKind,
        desc: &TextureDesc,
    ) -> anyhow::Result<ViewKey> {
        let Some(image) = self.textures.get(texture) else {
            bail!("unknown texture {:?}", texture);
        };
        let aspect = match kind {
            ViewKind::Depth => aspect_mask(image.format),
            ViewKind::ShaderRead if is_depth_format(image.format) => vk::ImageAspectFlags::DEPTH,
            ViewKind::ShaderRead | ViewKind::RenderTarget => vk::ImageAspectFlags::COLOR,
        };
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(image.format)
            .subresource_range(full_range(aspect));
        let view = unsafe { self.device.create_image_view(&create_info, None) }
            .with_context(|| format!("failed to create {:?} view of '{}'", kind, desc.name))?;

        Ok(self.views.insert(View { view, texture }))
    }

    fn destroy_view(&mut self, view: ViewKey) {
        if let Some(view) = self.views.remove(view) {
            unsafe { self.device.destroy_image_view(view.view, None) };
        }
    }

    fn destroy_texture(&mut self, texture: TextureKey) {
        let Some(texture) = self.textures.remove(texture) else {
            return;
        };
        match texture.ownership {
            Ownership::Placed => unsafe { self.device.destroy_image(texture.image, None) },
            Ownership::Allocated(mut allocation) => unsafe {
                self.allocator.destroy_image(texture.image, &mut allocation)
            },
            Ownership::External => {}
        }
    }

    fn free_heap(&mut self, heap: HeapKey) {
        if let Some(mut heap) = self.heaps.remove(heap) {
            log::trace!("VulkanBackend: freeing heap of {} bytes", heap.size_bytes);
            unsafe { self.allocator.free_memory(&mut heap.allocation) };
        }
    }

    fn bind_descriptor_heaps(&mut self, _cmd: Self::Command) {
        // Descriptor sets are bound by the pass executors.
    }

    fn begin_pass(&mut self, cmd: Self::Command, name: &str) {
        self.pending = None;
        self.deferred.clear();
        self.discarded.clear();
        self.labels.begin_label(cmd, name);
    }

    fn begin_execution(&mut self, cmd: Self::Command) {
        self.flush_barriers(cmd);
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        if pending.active {
            return;
        }

        let colors: SmallVec<[vk::RenderingAttachmentInfo; 4]> = pending
            .colors
            .iter()
            .map(|attachment| attachment.info(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
            .collect();
        let depth = pending
            .depth
            .as_ref()
            .map(|attachment| attachment.info(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));

        let mut info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: pending.extent,
            })
            .layer_count(1)
            .color_attachments(&colors);
        if let Some(depth) = depth.as_ref() {
            info = info.depth_attachment(depth);
            if pending.stencil {
                info = info.stencil_attachment(depth);
            }
        }

        unsafe { self.device.cmd_begin_rendering(cmd, &info) };
        pending.active = true;
    }

    fn end_pass(&mut self, cmd: Self::Command) {
        self.flush_barriers(cmd);
        if let Some(pending) = self.pending.take()
            && pending.active
        {
            unsafe { self.device.cmd_end_rendering(cmd) };
        }
        self.labels.end_label(cmd);
    }

    fn record_barriers(&mut self, _cmd: Self::Command, barriers: &[TextureBarrier]) {
        self.deferred.extend_from_slice(barriers);
    }

    fn record_set_targets(&mut self, _cmd: Self::Command, colors: &[ViewKey], depth: Option<ViewKey>) {
        let attachment = |view: ViewKey| -> Option<(Attachment, vk::Extent2D, vk::Format)> {
            let record = self.views.get(view)?;
            let texture = self.textures.get(record.texture)?;
            let attachment = Attachment {
                view,
                texture: record.texture,
                image_view: record.view,
                load_op: vk::AttachmentLoadOp::LOAD,
                clear: vk::ClearValue::default(),
            };
            Some((attachment, texture.extent, texture.format))
        };

        let mut pending = PendingRendering::default();
        for &view in colors {
            if let Some((attachment, extent, _)) = attachment(view) {
                pending.extent = extent;
                pending.colors.push(attachment);
            }
        }
        if let Some(view) = depth
            && let Some((attachment, extent, format)) = attachment(view)
        {
            pending.extent = extent;
            pending.stencil = has_stencil(format);
            pending.depth = Some(attachment);
        }
        self.pending = Some(pending);
    }

    fn record_viewports(&mut self, cmd: Self::Command, viewports: &[Viewport]) {
        // Without multiViewport only the first viewport can be set.
        let Some(viewport) = viewports.first() else {
            return;
        };
        let viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe { self.device.cmd_set_viewport(cmd, 0, &[viewport]) };
    }

    fn record_scissors(&mut self, cmd: Self::Command, scissors: &[ScissorRect]) {
        let Some(scissor) = scissors.first() else {
            return;
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.x,
                y: scissor.y,
            },
            extent: vk::Extent2D {
                width: scissor.width,
                height: scissor.height,
            },
        };
        unsafe { self.device.cmd_set_scissor(cmd, 0, &[scissor]) };
    }

    fn record_clear_color(&mut self, _cmd: Self::Command, view: ViewKey, color: [f32; 4]) {
        let Some(attachment) = self.pending_mut().and_then(|p| p.attachment_mut(view)) else {
            return;
        };
        attachment.load_op = vk::AttachmentLoadOp::CLEAR;
        attachment.clear = vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        };
        let texture = attachment.texture;
        self.discarded.push(texture);
    }

    fn record_clear_depth(&mut self, _cmd: Self::Command, view: ViewKey, depth: f32, stencil: u8) {
        let Some(attachment) = self.pending_mut().and_then(|p| p.attachment_mut(view)) else {
            return;
        };
        attachment.load_op = vk::AttachmentLoadOp::CLEAR;
        attachment.clear = vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth,
                stencil: u32::from(stencil),
            },
        };
        let texture = attachment.texture;
        self.discarded.push(texture);
    }

    fn record_discard(&mut self, _cmd: Self::Command, texture: TextureKey) {
        self.discarded.push(texture);
        let Some(pending) = self.pending.as_mut() else {
            log::trace!("VulkanBackend: discard of {:?} outside a render target", texture);
            return;
        };
        let attachment = pending
            .colors
            .iter_mut()
            .chain(pending.depth.as_mut())
            .find(|attachment| attachment.texture == texture);
        if let Some(attachment) = attachment
            && attachment.load_op == vk::AttachmentLoadOp::LOAD
        {
            attachment.load_op = vk::AttachmentLoadOp::DONT_CARE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirements(memory_type_bits: u32, alignment: u64) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 4096,
            alignment,
            memory_type_bits,
        }
    }

    #[test]
    fn constraints_narrow_across_textures() {
        let mut constraints = HeapConstraints::default();
        constraints.narrow("color", &requirements(0b0111, 256)).unwrap();
        constraints.narrow("depth", &requirements(0b0110, 4096)).unwrap();

        assert_eq!(constraints.memory_type_bits, 0b0110);
        assert_eq!(constraints.alignment, 4096);

        let err = constraints.narrow("staging", &requirements(0b1000, 64)).unwrap_err();
        assert!(err.to_string().contains("staging"));
        assert_eq!(constraints.memory_type_bits, 0b0110);
    }

    #[test]
    fn taking_constraints_starts_the_next_build_fresh() {
        let mut constraints = HeapConstraints::default();
        constraints.narrow("first", &requirements(0b0001, 65536)).unwrap();

        let taken = constraints.take();
        assert_eq!(taken.memory_type_bits, 0b0001);
        assert_eq!(taken.alignment, 65536);
        assert_eq!(constraints, HeapConstraints::default());

        // A rebuild with textures that only fit another memory type.
        constraints.narrow("second", &requirements(0b0010, 256)).unwrap();
        assert_eq!(constraints.memory_type_bits, 0b0010);
        assert_eq!(constraints.alignment, 256);
    }

    #[test]
    fn dropped_content_transitions_from_undefined() {
        let before = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;

        assert_eq!(old_layout(before, false, false), before);
        assert_eq!(old_layout(before, true, false), vk::ImageLayout::UNDEFINED);
        assert_eq!(old_layout(before, false, true), vk::ImageLayout::UNDEFINED);
        assert_eq!(old_layout(before, true, true), vk::ImageLayout::UNDEFINED);
    }
}
