use std::{collections::HashMap, fmt};

use super::{
    alias::{AliasPlan, FinalResource, Realized, release},
    barrier::{CommandPlan, PassCommands},
    handle::{BuilderId, PassHandle, PassKey, TextureHandle, VersionKey},
    lifetime::Lifetime,
    pass::{PassContext, PassExecutor},
    report::{GraphReport, PassReport, ResourceReport},
    resource::TextureDesc,
};
use crate::backend::{Backend, HeapKey, TextureKey, ViewKey, ViewKind};

/// Where a texture version lives in the compiled graph.
#[derive(Copy, Clone, Debug)]
pub(crate) struct VersionInfo {
    pub resource: usize,
    /// Span from the writing pass to the last reader of this version.
    pub lifetime: Option<Lifetime>,
}

pub(crate) struct CompiledPass<B: Backend> {
    pub name: String,
    pub declaration_index: usize,
    pub distance: u32,
    pub commands: PassCommands,
    pub executor: Option<Box<dyn PassExecutor<B>>>,
}

/// The replayable result of [`GraphBuilder::build`](super::GraphBuilder::build).
///
/// Owns the frame heap, the placed textures and every view it created until
/// [`CompiledGraph::destroy`] is called.
pub struct CompiledGraph<B: Backend> {
    builder: BuilderId,
    frames_in_flight: usize,
    heap: Option<HeapKey>,
    frame_heap_size_bytes: u64,
    plan: AliasPlan,
    resources: Vec<FinalResource>,
    passes: Vec<CompiledPass<B>>,
    commands: CommandPlan,
    versions: HashMap<VersionKey, VersionInfo>,
    pass_index: HashMap<PassKey, usize>,
}

impl<B: Backend> fmt::Debug for CompiledGraph<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("passes", &self.pass_names())
            .field("resources", &self.resources.len())
            .field("frames_in_flight", &self.frames_in_flight)
            .field("frame_heap_size_bytes", &self.frame_heap_size_bytes)
            .field("heap", &self.heap)
            .finish()
    }
}

impl<B: Backend> CompiledGraph<B> {
    pub(crate) fn new(
        builder: BuilderId,
        frames_in_flight: usize,
        realized: Realized,
        passes: Vec<CompiledPass<B>>,
        commands: CommandPlan,
        versions: HashMap<VersionKey, VersionInfo>,
        pass_index: HashMap<PassKey, usize>,
    ) -> Self {
        Self {
            builder,
            frames_in_flight,
            heap: realized.heap,
            frame_heap_size_bytes: realized.frame_heap_size_bytes,
            plan: realized.plan,
            resources: realized.resources,
            passes,
            commands,
            versions,
            pass_index,
        }
    }

    /// Records every pass for `frame_slot` onto `cmd`.
    ///
    /// # Panics
    ///
    /// If `frame_slot` is not below [`CompiledGraph::frames_in_flight`].
    pub fn render(&self, backend: &mut B, cmd: B::Command, frame_slot: usize) {
        assert!(
            frame_slot < self.frames_in_flight,
            "frame slot {frame_slot} out of range for {} frames in flight",
            self.frames_in_flight
        );
        let slot = &self.commands.slots[frame_slot];

        backend.bind_descriptor_heaps(cmd);

        for pass in &self.passes {
            let _span = tracing::trace_span!("render_pass", pass = %pass.name).entered();
            let commands = &pass.commands;

            backend.begin_pass(cmd, &pass.name);

            for group in &self.commands.barrier_groups[commands.barrier_groups.clone()] {
                backend.record_barriers(cmd, &slot.barriers[group.clone()]);
            }

            if !commands.outputs.is_empty() {
                let depth = commands.depth_target.map(|index| slot.depth_targets[index]);
                backend.record_set_targets(cmd, &slot.color_targets[commands.color_targets.clone()], depth);
                backend.record_viewports(cmd, &self.commands.viewports[commands.outputs.clone()]);
                backend.record_scissors(cmd, &self.commands.scissors[commands.outputs.clone()]);
            }

            for clear in &slot.clear_colors[commands.clear_colors.clone()] {
                backend.record_clear_color(cmd, clear.view, clear.color);
            }
            for clear in &slot.clear_depths[commands.clear_depths.clone()] {
                backend.record_clear_depth(cmd, clear.view, clear.depth, clear.stencil);
            }
            for &texture in &slot.discards[commands.discards.clone()] {
                backend.record_discard(cmd, texture);
            }

            backend.begin_execution(cmd);
            if let Some(executor) = &pass.executor {
                let mut ctx = PassContext {
                    backend: &mut *backend,
                    cmd,
                    frame_slot,
                    pass_name: &pass.name,
                    graph: self,
                };
                if let Err(e) = executor.execute(&mut ctx) {
                    log::error!("pass '{}' failed to record: {:?}", pass.name, e);
                }
            }

            backend.end_pass(cmd);
        }
    }

    /// Releases the heap, placed textures and views. Imported textures are
    /// left to their owner.
    pub fn destroy(self, backend: &mut B) {
        log::trace!(
            "Destroying compiled graph ({} passes, {} textures)",
            self.passes.len(),
            self.resources.len()
        );
        release(backend, &self.resources, self.heap);
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Pass names in execution order.
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|pass| pass.name.as_str()).collect()
    }

    /// Execution slot of `pass`, if it belongs to this graph.
    pub fn final_index(&self, pass: PassHandle) -> Option<usize> {
        if pass.builder != self.builder {
            return None;
        }
        self.pass_index.get(&pass.key).copied()
    }

    pub fn frame_heap_size_bytes(&self) -> u64 {
        self.frame_heap_size_bytes
    }

    pub fn total_heap_size_bytes(&self) -> u64 {
        self.frame_heap_size_bytes * self.frames_in_flight as u64
    }

    pub fn heap(&self) -> Option<HeapKey> {
        self.heap
    }

    pub fn alias_plan(&self) -> &AliasPlan {
        &self.plan
    }

    /// Graph-created textures first, then imports.
    pub fn resources(&self) -> &[FinalResource] {
        &self.resources
    }

    fn version(&self, texture: TextureHandle) -> Option<&VersionInfo> {
        if texture.builder != self.builder {
            return None;
        }
        self.versions.get(&texture.version)
    }

    pub fn resource(&self, texture: TextureHandle) -> Option<&FinalResource> {
        self.resources.get(self.version(texture)?.resource)
    }

    pub fn texture_desc(&self, texture: TextureHandle) -> Option<&TextureDesc> {
        self.resource(texture).map(|resource| &resource.desc)
    }

    /// Lifetime of the whole texture, across all of its versions.
    pub fn lifetime(&self, texture: TextureHandle) -> Option<Lifetime> {
        self.resource(texture)?.lifetime
    }

    /// Lifetime of the single version `texture` names: from its writer to
    /// its last reader.
    pub fn version_lifetime(&self, texture: TextureHandle) -> Option<Lifetime> {
        self.version(texture)?.lifetime
    }

    pub fn texture(&self, texture: TextureHandle, frame_slot: usize) -> Option<TextureKey> {
        self.resource(texture)?.textures.get(frame_slot).copied()
    }

    pub fn view(&self, texture: TextureHandle, frame_slot: usize, kind: ViewKind) -> Option<ViewKey> {
        self.resource(texture)?.views.get(frame_slot)?.get(kind)
    }

    pub fn shader_view(&self, texture: TextureHandle, frame_slot: usize) -> Option<ViewKey> {
        self.view(texture, frame_slot, ViewKind::ShaderRead)
    }

    pub fn render_target_view(&self, texture: TextureHandle, frame_slot: usize) -> Option<ViewKey> {
        self.view(texture, frame_slot, ViewKind::RenderTarget)
    }

    pub fn depth_view(&self, texture: TextureHandle, frame_slot: usize) -> Option<ViewKey> {
        self.view(texture, frame_slot, ViewKind::Depth)
    }

    /// Barriers recorded per frame slot over a whole replay.
    pub fn barrier_count(&self) -> usize {
        self.commands.slots.first().map_or(0, |slot| slot.barriers.len())
    }

    pub fn report(&self) -> GraphReport {
        let passes = self
            .passes
            .iter()
            .enumerate()
            .map(|(final_index, pass)| {
                let c = &pass.commands;
                let barrier_count = self.commands.barrier_groups[c.barrier_groups.clone()]
                    .iter()
                    .map(|group| group.len())
                    .sum();
                PassReport {
                    name: pass.name.clone(),
                    declaration_index: pass.declaration_index,
                    final_index,
                    distance: pass.distance,
                    inputs: self.commands.inputs[c.inputs.clone()].to_vec(),
                    outputs: self.commands.outputs[c.outputs.clone()].to_vec(),
                    barrier_count,
                    clear_count: c.clear_colors.len() + c.clear_depths.len(),
                    discard_count: c.discards.len(),
                }
            })
            .collect();

        let resources = self
            .resources
            .iter()
            .map(|resource| ResourceReport {
                name: resource.desc.name.clone(),
                origin: resource.origin,
                width: resource.desc.width,
                height: resource.desc.height,
                format: format!("{:?}", resource.desc.format),
                accesses: resource
                    .all_accesses
                    .names()
                    .into_iter()
                    .map(str::to_owned)
                    .collect(),
                lifetime: resource.lifetime,
                offset_bytes: resource.offset_bytes,
                size_bytes: resource.size_bytes,
                needs_clear: resource.needs_clear,
            })
            .collect();

        GraphReport {
            frames_in_flight: self.frames_in_flight,
            frame_heap_size_bytes: self.frame_heap_size_bytes,
            total_heap_size_bytes: self.total_heap_size_bytes(),
            passes,
            resources,
        }
    }
}
