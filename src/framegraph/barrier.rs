//! Walks the scheduled passes and turns resource references into replayable
//! commands: transition barriers, render targets, clears and discards.

use std::{collections::HashSet, ops::Range};

use smallvec::SmallVec;

use super::{
    access::{Access, TrackingState, log_transition},
    alias::{FinalResource, SlotViews},
    error::{GraphError, GraphResult},
};
use crate::backend::{ScissorRect, TextureBarrier, TextureKey, ViewKey, ViewKind, Viewport};

/// A pass in execution order with references resolved to final resources.
pub(crate) struct ScheduledPass<'a> {
    pub name: &'a str,
    pub final_index: usize,
    pub writes: SmallVec<[(usize, Access); 4]>,
    pub reads: SmallVec<[(usize, Access); 4]>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct ClearColorCommand {
    pub view: ViewKey,
    pub color: [f32; 4],
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct ClearDepthCommand {
    pub view: ViewKey,
    pub depth: f32,
    pub stencil: u8,
}

/// Commands that differ per frame slot. Every slot has the same layout, so
/// the ranges in [`PassCommands`] index all of them.
#[derive(Clone, Debug, Default)]
pub(crate) struct SlotCommands {
    pub barriers: Vec<TextureBarrier>,
    pub color_targets: Vec<ViewKey>,
    pub depth_targets: Vec<ViewKey>,
    pub clear_colors: Vec<ClearColorCommand>,
    pub clear_depths: Vec<ClearDepthCommand>,
    pub discards: Vec<TextureKey>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct PassCommands {
    pub inputs: Range<usize>,
    pub outputs: Range<usize>,
    pub barrier_groups: Range<usize>,
    pub color_targets: Range<usize>,
    pub depth_target: Option<usize>,
    pub clear_colors: Range<usize>,
    pub clear_depths: Range<usize>,
    pub discards: Range<usize>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct CommandPlan {
    pub passes: Vec<PassCommands>,
    pub slots: Vec<SlotCommands>,
    pub barrier_groups: Vec<Range<usize>>,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
    pub viewports: Vec<Viewport>,
    pub scissors: Vec<ScissorRect>,
}

struct Synthesizer<'a> {
    resources: &'a [FinalResource],
    trackers: Vec<TrackingState>,
    first_use: HashSet<usize>,
    plan: CommandPlan,
}

impl<'a> Synthesizer<'a> {
    fn new(resources: &'a [FinalResource], frames_in_flight: usize) -> Self {
        // Start each texture in the state its last access leaves it in, as if
        // the previous replay of this graph had just finished.
        let trackers = resources
            .iter()
            .map(|resource| TrackingState::for_access(resource.last_access))
            .collect();

        Self {
            resources,
            trackers,
            first_use: HashSet::new(),
            plan: CommandPlan {
                slots: vec![SlotCommands::default(); frames_in_flight],
                ..Default::default()
            },
        }
    }

    fn transition(&mut self, pass: &str, resource: usize, access: Access) {
        let before = self.trackers[resource];
        let after = TrackingState::for_access(access);
        if before == after {
            return;
        }

        if log::log_enabled!(log::Level::Debug) {
            let name = format!("{} -> '{}'", pass, self.resources[resource].name());
            log_transition(before, after, &name);
        }

        let textures = &self.resources[resource].textures;
        for (slot, commands) in self.plan.slots.iter_mut().enumerate() {
            commands.barriers.push(TextureBarrier {
                texture: textures[slot],
                before,
                after,
            });
        }
        self.trackers[resource] = after;
    }

    fn view(&self, resource: usize, slot: usize, kind: ViewKind) -> ViewKey {
        let views: &SlotViews = &self.resources[resource].views[slot];
        debug_assert!(views.get(kind).is_some(), "missing {kind:?} view");
        views.get(kind).unwrap_or_default()
    }

    fn is_first_use(&mut self, resource: usize, final_index: usize) -> bool {
        let starts_here = self.resources[resource]
            .lifetime
            .is_some_and(|lifetime| lifetime.start == final_index);
        starts_here && self.first_use.insert(resource)
    }

    fn pass(&mut self, pass: &ScheduledPass<'_>) -> GraphResult<()> {
        let barriers_start = self.barrier_count();
        let slot0 = &self.plan.slots[0];
        let mut commands = PassCommands {
            inputs: self.plan.inputs.len()..self.plan.inputs.len(),
            outputs: self.plan.outputs.len()..self.plan.outputs.len(),
            barrier_groups: self.plan.barrier_groups.len()..self.plan.barrier_groups.len(),
            color_targets: slot0.color_targets.len()..slot0.color_targets.len(),
            depth_target: None,
            clear_colors: slot0.clear_colors.len()..slot0.clear_colors.len(),
            clear_depths: slot0.clear_depths.len()..slot0.clear_depths.len(),
            discards: slot0.discards.len()..slot0.discards.len(),
        };

        for &(resource, access) in &pass.writes {
            self.plan.outputs.push(resource);
            self.transition(pass.name, resource, access);

            let first_use = self.is_first_use(resource, pass.final_index);
            let needs_clear = self.resources[resource].needs_clear;
            let clear_value = self.resources[resource].desc.clear_value;

            if access == Access::RenderTarget {
                for slot in 0..self.plan.slots.len() {
                    let view = self.view(resource, slot, ViewKind::RenderTarget);
                    let slot_commands = &mut self.plan.slots[slot];
                    slot_commands.color_targets.push(view);
                    if first_use && needs_clear {
                        slot_commands.clear_colors.push(ClearColorCommand {
                            view,
                            color: clear_value.color(),
                        });
                    }
                }
            } else if access.is_depth_target() {
                if commands.depth_target.is_some() {
                    return Err(GraphError::MultipleDepthTargets {
                        pass: pass.name.to_owned(),
                    });
                }
                commands.depth_target = Some(self.plan.slots[0].depth_targets.len());
                let (depth, stencil) = clear_value.depth_stencil();
                for slot in 0..self.plan.slots.len() {
                    let view = self.view(resource, slot, ViewKind::Depth);
                    let slot_commands = &mut self.plan.slots[slot];
                    slot_commands.depth_targets.push(view);
                    if first_use && needs_clear {
                        slot_commands.clear_depths.push(ClearDepthCommand {
                            view,
                            depth,
                            stencil,
                        });
                    }
                }
            }

            if first_use && !(needs_clear && access.is_target()) {
                let textures = &self.resources[resource].textures;
                for (slot, slot_commands) in self.plan.slots.iter_mut().enumerate() {
                    slot_commands.discards.push(textures[slot]);
                }
            }

            let desc = &self.resources[resource].desc;
            self.plan.viewports.push(Viewport::covering(desc.width, desc.height));
            self.plan.scissors.push(ScissorRect::covering(desc.width, desc.height));
        }

        for &(resource, access) in &pass.reads {
            self.plan.inputs.push(resource);
            self.transition(pass.name, resource, access);
        }

        let barriers_end = self.barrier_count();
        if barriers_end > barriers_start {
            self.plan.barrier_groups.push(barriers_start..barriers_end);
        }

        let slot0 = &self.plan.slots[0];
        commands.inputs.end = self.plan.inputs.len();
        commands.outputs.end = self.plan.outputs.len();
        commands.barrier_groups.end = self.plan.barrier_groups.len();
        commands.color_targets.end = slot0.color_targets.len();
        commands.clear_colors.end = slot0.clear_colors.len();
        commands.clear_depths.end = slot0.clear_depths.len();
        commands.discards.end = slot0.discards.len();
        self.plan.passes.push(commands);
        Ok(())
    }

    fn barrier_count(&self) -> usize {
        self.plan.slots[0].barriers.len()
    }
}

/// Builds the per-pass command records for `passes`, given in execution order.
pub(crate) fn synthesize(
    passes: &[ScheduledPass<'_>],
    resources: &[FinalResource],
    frames_in_flight: usize,
) -> GraphResult<CommandPlan> {
    let mut synthesizer = Synthesizer::new(resources, frames_in_flight.max(1));
    for pass in passes {
        synthesizer.pass(pass)?;
    }
    Ok(synthesizer.plan)
}

#[cfg(test)]
mod tests {
    use ash::vk;
    use slotmap::SlotMap;
    use smallvec::smallvec;

    use super::*;
    use crate::framegraph::{
        access::AccessFlags,
        alias::ResourceOrigin,
        lifetime::Lifetime,
        resource::{ClearValue, InitialState, TextureDesc},
    };

    struct Keys {
        textures: SlotMap<TextureKey, ()>,
        views: SlotMap<ViewKey, ()>,
    }

    impl Keys {
        fn new() -> Self {
            Self {
                textures: SlotMap::with_key(),
                views: SlotMap::with_key(),
            }
        }

        fn resource(
            &mut self,
            name: &str,
            accesses: &[Access],
            lifetime: Lifetime,
            clear: Option<ClearValue>,
        ) -> FinalResource {
            let all_accesses = accesses
                .iter()
                .fold(AccessFlags::empty(), |flags, &a| flags | AccessFlags::from(a));
            let mut desc = TextureDesc::new(name, 256, 256, vk::Format::R8G8B8A8_UNORM);
            if let Some(clear) = clear {
                desc = desc.clear(clear);
            }
            let needs_clear = desc.initial_state == InitialState::Clear && all_accesses.is_clearable();
            let mut views = SlotViews::default();
            if all_accesses.needs_render_target_view() {
                views.render_target = Some(self.views.insert(()));
            }
            if all_accesses.needs_shader_view() {
                views.shader = Some(self.views.insert(()));
            }
            if all_accesses.needs_depth_view() {
                views.depth = Some(self.views.insert(()));
            }

            FinalResource {
                desc,
                origin: ResourceOrigin::Graph,
                all_accesses,
                last_access: *accesses.last().unwrap(),
                lifetime: Some(lifetime),
                needs_clear,
                offset_bytes: 0,
                size_bytes: 0,
                textures: smallvec![self.textures.insert(())],
                views: smallvec![views],
            }
        }
    }

    fn pass<'a>(
        name: &'a str,
        final_index: usize,
        writes: &[(usize, Access)],
        reads: &[(usize, Access)],
    ) -> ScheduledPass<'a> {
        ScheduledPass {
            name,
            final_index,
            writes: writes.iter().copied().collect(),
            reads: reads.iter().copied().collect(),
        }
    }

    #[test]
    fn cleared_target_then_present() {
        let mut keys = Keys::new();
        let resources = [keys.resource(
            "color",
            &[Access::RenderTarget, Access::Present],
            Lifetime { start: 0, end: 1 },
            Some(ClearValue::Color([0.0, 0.584, 0.929, 1.0])),
        )];
        let passes = [
            pass("forward", 0, &[(0, Access::RenderTarget)], &[]),
            pass("present", 1, &[], &[(0, Access::Present)]),
        ];

        let plan = synthesize(&passes, &resources, 1).unwrap();

        let slot = &plan.slots[0];
        // Present -> RenderTarget, then RenderTarget -> Present.
        assert_eq!(slot.barriers.len(), 2);
        assert_eq!(plan.passes[0].barrier_groups, 0..1);
        assert_eq!(plan.passes[1].barrier_groups, 1..2);
        assert_eq!(slot.clear_colors.len(), 1);
        assert_eq!(slot.clear_colors[0].color, [0.0, 0.584, 0.929, 1.0]);
        assert!(slot.discards.is_empty());
        assert_eq!(plan.passes[0].color_targets, 0..1);
        assert!(plan.passes[1].outputs.is_empty());
        assert_eq!(plan.viewports.len(), 1);
    }

    #[test]
    fn uncleared_target_is_discarded_once() {
        let mut keys = Keys::new();
        let resources = [keys.resource(
            "scratch",
            &[Access::RenderTarget, Access::PixelShader, Access::RenderTarget],
            Lifetime { start: 0, end: 2 },
            None,
        )];
        let passes = [
            pass("a", 0, &[(0, Access::RenderTarget)], &[]),
            pass("b", 1, &[], &[(0, Access::PixelShader)]),
            pass("c", 2, &[(0, Access::RenderTarget)], &[]),
        ];

        let plan = synthesize(&passes, &resources, 1).unwrap();

        assert_eq!(plan.slots[0].discards.len(), 1);
        assert_eq!(plan.passes[0].discards, 0..1);
        assert_eq!(plan.passes[2].discards, 1..1);
        assert!(plan.slots[0].clear_colors.is_empty());
    }

    #[test]
    fn identical_consecutive_accesses_need_no_barrier() {
        let mut keys = Keys::new();
        let resources = [keys.resource(
            "albedo",
            &[Access::RenderTarget, Access::PixelShader, Access::PixelShader],
            Lifetime { start: 0, end: 2 },
            None,
        )];
        let passes = [
            pass("gbuffer", 0, &[(0, Access::RenderTarget)], &[]),
            pass("light", 1, &[], &[(0, Access::PixelShader)]),
            pass("fog", 2, &[], &[(0, Access::PixelShader)]),
        ];

        let plan = synthesize(&passes, &resources, 1).unwrap();

        assert_eq!(plan.passes[2].barrier_groups, 2..2);
        assert_eq!(plan.slots[0].barriers.len(), 2);
    }

    #[test]
    fn barriers_are_duplicated_per_frame_slot() {
        let mut keys = Keys::new();
        let mut resource = keys.resource(
            "color",
            &[Access::RenderTarget, Access::PixelShader],
            Lifetime { start: 0, end: 1 },
            None,
        );
        let second = keys.resource("dup", &[Access::RenderTarget, Access::PixelShader], Lifetime::at(0), None);
        resource.textures.push(second.textures[0]);
        resource.views.push(second.views[0]);
        let resources = [resource];
        let passes = [
            pass("draw", 0, &[(0, Access::RenderTarget)], &[]),
            pass("sample", 1, &[], &[(0, Access::PixelShader)]),
        ];

        let plan = synthesize(&passes, &resources, 2).unwrap();

        assert_eq!(plan.slots.len(), 2);
        assert_eq!(plan.slots[0].barriers.len(), plan.slots[1].barriers.len());
        assert_ne!(plan.slots[0].barriers[0].texture, plan.slots[1].barriers[0].texture);
        assert_eq!(plan.slots[0].barriers[0].before, plan.slots[1].barriers[0].before);
    }

    #[test]
    fn depth_targets_clear_with_depth_values() {
        let mut keys = Keys::new();
        let resources = [keys.resource(
            "depth",
            &[Access::Depth],
            Lifetime::at(0),
            Some(ClearValue::DepthStencil {
                depth: 0.0,
                stencil: 7,
            }),
        )];
        let passes = [pass("prepass", 0, &[(0, Access::Depth)], &[])];

        let plan = synthesize(&passes, &resources, 1).unwrap();

        assert_eq!(plan.passes[0].depth_target, Some(0));
        assert_eq!(plan.slots[0].clear_depths[0].depth, 0.0);
        assert_eq!(plan.slots[0].clear_depths[0].stencil, 7);
        // Depth -> Depth: the tracker already starts in the last access state.
        assert!(plan.slots[0].barriers.is_empty());
        assert!(plan.barrier_groups.is_empty());
    }

    #[test]
    fn two_depth_targets_in_one_pass_are_rejected() {
        let mut keys = Keys::new();
        let resources = [
            keys.resource("d0", &[Access::Depth], Lifetime::at(0), None),
            keys.resource("d1", &[Access::Depth], Lifetime::at(0), None),
        ];
        let passes = [pass("bad", 0, &[(0, Access::Depth), (1, Access::Depth)], &[])];

        let err = synthesize(&passes, &resources, 1).unwrap_err();

        assert!(matches!(err, GraphError::MultipleDepthTargets { .. }));
    }
}
