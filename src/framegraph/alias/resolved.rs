use serde::Serialize;
use smallvec::SmallVec;

use super::plan::{self, AliasCandidate, AliasPlan};
use crate::{
    backend::{Backend, HeapKey, ImportedTexture, MemoryRequirement, TextureKey, ViewKey, ViewKind},
    framegraph::{
        access::{Access, AccessFlags, TrackingState},
        config::GraphConfig,
        error::{GraphError, GraphResult},
        lifetime::{Lifetime, LifetimeTable},
        resource::{ClearValue, Resource, TextureDesc},
    },
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceOrigin {
    Graph,
    Import,
}

/// Views of one frame slot's texture.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SlotViews {
    pub render_target: Option<ViewKey>,
    pub shader: Option<ViewKey>,
    pub depth: Option<ViewKey>,
}

impl SlotViews {
    pub fn get(&self, kind: ViewKind) -> Option<ViewKey> {
        match kind {
            ViewKind::RenderTarget => self.render_target,
            ViewKind::ShaderRead => self.shader,
            ViewKind::Depth => self.depth,
        }
    }

    fn iter(&self) -> impl Iterator<Item = ViewKey> {
        [self.render_target, self.shader, self.depth].into_iter().flatten()
    }
}

/// A texture as realized on the backend, one copy per frame slot.
#[derive(Clone, Debug)]
pub struct FinalResource {
    pub desc: TextureDesc,
    pub origin: ResourceOrigin,
    pub all_accesses: AccessFlags,
    pub last_access: Access,
    pub lifetime: Option<Lifetime>,
    pub needs_clear: bool,
    /// Offset inside one frame slot's heap range.
    pub offset_bytes: u64,
    pub size_bytes: u64,
    pub textures: SmallVec<[TextureKey; 3]>,
    pub views: SmallVec<[SlotViews; 3]>,
}

impl FinalResource {
    fn new(resource: &Resource, origin: ResourceOrigin, lifetime: Option<Lifetime>) -> Self {
        Self {
            desc: resource.desc.clone(),
            origin,
            all_accesses: resource.all_accesses,
            last_access: resource.last_access,
            lifetime,
            needs_clear: resource.needs_clear(),
            offset_bytes: 0,
            size_bytes: 0,
            textures: SmallVec::new(),
            views: SmallVec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn clear_value(&self) -> Option<ClearValue> {
        self.needs_clear.then_some(self.desc.clear_value)
    }
}

pub(crate) struct Realized {
    pub heap: Option<HeapKey>,
    pub frame_heap_size_bytes: u64,
    pub plan: AliasPlan,
    /// Graph-created textures first, then imports.
    pub resources: Vec<FinalResource>,
}

pub(crate) fn realize<B: Backend>(
    backend: &mut B,
    config: &GraphConfig,
    graph_resources: &[Resource],
    imports: &[(Resource, ImportedTexture)],
    lifetimes: &LifetimeTable,
) -> GraphResult<Realized> {
    let mut requirements: Vec<MemoryRequirement> = Vec::with_capacity(graph_resources.len());
    for resource in graph_resources {
        let requirement = backend
            .query_size_and_alignment(&resource.desc, resource.all_accesses)
            .map_err(|source| GraphError::Backend {
                operation: "query memory requirements",
                resource: resource.desc.name.clone(),
                bytes: 0,
                source,
            })?;
        requirements.push(requirement);
    }

    let candidates = requirements
        .iter()
        .zip(lifetimes.graph())
        .map(|(requirement, lifetime)| AliasCandidate {
            size_bytes: requirement.size_bytes,
            alignment_bytes: requirement.alignment_bytes,
            // Graph textures are always written by the pass that creates them.
            lifetime: lifetime.unwrap_or(Lifetime::at(0)),
        })
        .collect::<Vec<_>>();

    let plan = {
        let _span = tracing::debug_span!("alias").entered();
        plan::plan(&candidates, config.heap_alignment_floor)
    };
    if config.log_plan {
        log_plan(&plan, graph_resources);
    }

    let frame_heap_size_bytes = plan.frame_heap_size_bytes;
    let heap = if frame_heap_size_bytes > 0 {
        let total = frame_heap_size_bytes * config.frames_in_flight as u64;
        let heap = backend
            .allocate_heap(total)
            .map_err(|source| GraphError::Backend {
                operation: "allocate frame heap",
                resource: "frame heap".to_owned(),
                bytes: total,
                source,
            })?;
        Some(heap)
    } else {
        None
    };

    let mut resources = Vec::with_capacity(graph_resources.len() + imports.len());
    let created = create_all(
        backend,
        config.frames_in_flight,
        heap,
        &plan,
        graph_resources,
        imports,
        lifetimes,
        &mut resources,
    );

    match created {
        Ok(()) => Ok(Realized {
            heap,
            frame_heap_size_bytes,
            plan,
            resources,
        }),
        Err(err) => {
            release(backend, &resources, heap);
            Err(err)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn create_all<B: Backend>(
    backend: &mut B,
    frames_in_flight: usize,
    heap: Option<HeapKey>,
    plan: &AliasPlan,
    graph_resources: &[Resource],
    imports: &[(Resource, ImportedTexture)],
    lifetimes: &LifetimeTable,
    resources: &mut Vec<FinalResource>,
) -> GraphResult<()> {
    for (index, resource) in graph_resources.iter().enumerate() {
        let placement = plan.placements[index];
        let mut realized = FinalResource::new(
            resource,
            ResourceOrigin::Graph,
            lifetimes.graph()[index],
        );
        realized.offset_bytes = placement.offset_bytes;
        realized.size_bytes = placement.size_bytes;
        resources.push(realized);
        let realized = &mut resources[index];
        let Some(heap) = heap else {
            return Err(GraphError::Backend {
                operation: "place texture",
                resource: realized.desc.name.clone(),
                bytes: placement.size_bytes,
                source: anyhow::anyhow!("the frame heap is empty"),
            });
        };

        let initial = TrackingState::for_access(realized.last_access);
        let clear = realized.clear_value();
        for slot in 0..frames_in_flight {
            let offset = placement.offset_bytes + plan.frame_heap_size_bytes * slot as u64;
            let texture = backend
                .create_placed_texture(
                    heap,
                    offset,
                    &realized.desc,
                    realized.all_accesses,
                    initial,
                    clear,
                )
                .map_err(|source| GraphError::Backend {
                    operation: "create placed texture",
                    resource: realized.desc.name.clone(),
                    bytes: placement.size_bytes,
                    source,
                })?;
            realized.textures.push(texture);
            realized.views.push(SlotViews::default());
            create_views(backend, realized, slot)?;
        }
    }

    for (index, (resource, imported)) in imports.iter().enumerate() {
        let mut realized = FinalResource::new(
            resource,
            ResourceOrigin::Import,
            lifetimes.imported()[index],
        );
        realized.textures = imported.textures.iter().copied().collect();
        resources.push(realized);
        let realized = &mut resources[graph_resources.len() + index];

        for slot in 0..frames_in_flight {
            realized.views.push(SlotViews::default());
            create_views(backend, realized, slot)?;
        }
    }

    Ok(())
}

fn create_views<B: Backend>(
    backend: &mut B,
    resource: &mut FinalResource,
    slot: usize,
) -> GraphResult<()> {
    let wanted = [
        (ViewKind::RenderTarget, resource.all_accesses.needs_render_target_view()),
        (ViewKind::ShaderRead, resource.all_accesses.needs_shader_view()),
        (ViewKind::Depth, resource.all_accesses.needs_depth_view()),
    ];

    let texture = resource.textures[slot];
    for (kind, needed) in wanted {
        if !needed {
            continue;
        }
        let view = backend
            .create_view(texture, kind, &resource.desc)
            .map_err(|source| GraphError::Backend {
                operation: "create view",
                resource: resource.desc.name.clone(),
                bytes: 0,
                source,
            })?;
        let views = &mut resource.views[slot];
        match kind {
            ViewKind::RenderTarget => views.render_target = Some(view),
            ViewKind::ShaderRead => views.shader = Some(view),
            ViewKind::Depth => views.depth = Some(view),
        }
    }
    Ok(())
}

/// Destroys every backend object the graph created. Imported textures stay.
pub(crate) fn release<B: Backend>(
    backend: &mut B,
    resources: &[FinalResource],
    heap: Option<HeapKey>,
) {
    for resource in resources {
        for view in resource.views.iter().flat_map(SlotViews::iter) {
            backend.destroy_view(view);
        }
        if resource.origin == ResourceOrigin::Graph {
            for &texture in &resource.textures {
                backend.destroy_texture(texture);
            }
        }
    }
    if let Some(heap) = heap {
        backend.free_heap(heap);
    }
}

fn log_plan(plan: &AliasPlan, resources: &[Resource]) {
    for (index, bucket) in plan.buckets.iter().enumerate() {
        log::info!(
            "Assigned B{} '{}' offset {} size {} lifetime {}",
            index,
            resources[bucket.owner].desc.name,
            bucket.base_offset_bytes,
            bucket.size_bytes,
            bucket.lifetime,
        );
        for region in &bucket.regions {
            log::info!(
                "Assigned R '{}' to B{} offset {} size {} lifetime {}",
                resources[region.candidate].desc.name,
                index,
                bucket.base_offset_bytes + region.offset_bytes,
                region.size_bytes,
                region.lifetime,
            );
        }
    }
    log::info!(
        "Frame heap {} bytes in {} buckets for {} textures",
        plan.frame_heap_size_bytes,
        plan.buckets.len(),
        resources.len(),
    );
}
