use std::collections::HashMap;

use slotmap::SlotMap;
use smallvec::SmallVec;

use super::{
    access::Access,
    alias::{self, Realized},
    barrier::{self, ScheduledPass},
    config::GraphConfig,
    error::{GraphError, GraphResult},
    graph::{CompiledGraph, CompiledPass, VersionInfo},
    handle::{BuilderId, PassHandle, PassKey, ResourceId, TextureHandle, VersionKey},
    lifetime::{self, Lifetime, LifetimeTable},
    pass::{Pass, PassContext, PassExecutor, ResourceRef},
    resource::{Resource, ResourceVersion, TextureDesc},
    schedule::{self, CycleAt, Schedule},
};
use crate::backend::{Backend, ImportedTexture};

/// Records one frame's passes and the textures they read and write.
///
/// Nothing here touches the backend until [`GraphBuilder::build`].
pub struct GraphBuilder<B: Backend> {
    id: BuilderId,
    config: GraphConfig,
    passes: SlotMap<PassKey, Pass<B>>,
    pass_order: Vec<PassKey>,
    versions: SlotMap<VersionKey, ResourceVersion>,
    graph_resources: Vec<Resource>,
    imports: Vec<(Resource, ImportedTexture)>,
    backbuffer: TextureHandle,
}

impl<B: Backend> GraphBuilder<B> {
    pub fn new(config: GraphConfig, backbuffer: ImportedTexture) -> GraphResult<Self> {
        config.validate()?;

        let id = BuilderId::next();
        let mut builder = Self {
            id,
            config,
            passes: SlotMap::with_key(),
            pass_order: Vec::new(),
            versions: SlotMap::with_key(),
            graph_resources: Vec::new(),
            imports: Vec::new(),
            backbuffer: TextureHandle {
                builder: id,
                version: VersionKey::default(),
            },
        };
        builder.backbuffer = builder.import_texture(backbuffer)?;
        Ok(builder)
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Version 0 of the imported backbuffer.
    pub fn backbuffer(&self) -> TextureHandle {
        self.backbuffer
    }

    /// Brings an externally owned texture into the graph. It receives views
    /// and barriers but no heap placement.
    pub fn import_texture(&mut self, imported: ImportedTexture) -> GraphResult<TextureHandle> {
        if imported.textures.len() != self.config.frames_in_flight {
            return Err(GraphError::ImportSlotMismatch {
                expected: self.config.frames_in_flight,
                actual: imported.textures.len(),
            });
        }
        check_desc(&imported.desc)?;

        let id = ResourceId::Import(self.imports.len());
        self.imports.push((Resource::new(imported.desc.clone()), imported));
        let version = self.versions.insert(ResourceVersion {
            resource: id,
            version: 0,
            writer: None,
            readers: SmallVec::new(),
        });

        Ok(self.handle(version))
    }

    pub fn add_pass(&mut self, name: impl Into<String>) -> PassHandle {
        let key = self
            .passes
            .insert(Pass::new(name.into(), self.pass_order.len()));
        self.pass_order.push(key);
        PassHandle {
            builder: self.id,
            key,
        }
    }

    /// Creates a graph-owned texture, written by `pass` with `desc.access`.
    pub fn create_texture(
        &mut self,
        pass: PassHandle,
        desc: TextureDesc,
    ) -> GraphResult<TextureHandle> {
        let pass = self.pass_key(pass)?;
        check_desc(&desc)?;

        let access = desc.access;
        let id = ResourceId::Graph(self.graph_resources.len());
        self.graph_resources.push(Resource::new(desc));
        let version = self.versions.insert(ResourceVersion {
            resource: id,
            version: 0,
            writer: Some(pass),
            readers: SmallVec::new(),
        });
        self.passes[pass].writes.push(ResourceRef { version, access });

        Ok(self.handle(version))
    }

    /// Records that `pass` reads the current version of a texture. Returns
    /// the same handle.
    pub fn read_texture(
        &mut self,
        pass: PassHandle,
        texture: TextureHandle,
        access: Access,
    ) -> GraphResult<TextureHandle> {
        let pass = self.pass_key(pass)?;
        let resource = self.current_resource(texture)?;

        self.resource_mut(resource).record_access(access);
        self.versions[texture.version].readers.push(pass);
        self.passes[pass].reads.push(ResourceRef {
            version: texture.version,
            access,
        });

        Ok(texture)
    }

    /// Records that `pass` overwrites a texture, producing its next version.
    /// The previous version becomes an input of `pass`, which orders it after
    /// the previous writer.
    pub fn write_texture(
        &mut self,
        pass: PassHandle,
        texture: TextureHandle,
        access: Access,
    ) -> GraphResult<TextureHandle> {
        let pass = self.pass_key(pass)?;
        let resource_id = self.current_resource(texture)?;

        let resource = self.resource_mut(resource_id);
        resource.record_access(access);
        resource.version_count += 1;
        let version_index = resource.latest_version();

        let previous = texture.version;
        self.versions[previous].readers.push(pass);
        let version = self.versions.insert(ResourceVersion {
            resource: resource_id,
            version: version_index,
            writer: Some(pass),
            readers: SmallVec::new(),
        });

        let pass = &mut self.passes[pass];
        pass.writes.push(ResourceRef { version, access });
        pass.reads.push(ResourceRef {
            version: previous,
            access,
        });

        Ok(self.handle(version))
    }

    pub fn set_executor<F>(&mut self, pass: PassHandle, executor: F) -> GraphResult<()>
    where
        F: Fn(&mut PassContext<'_, B>) -> anyhow::Result<()> + 'static,
    {
        self.set_executor_boxed(pass, Box::new(executor))
    }

    pub fn set_executor_boxed(
        &mut self,
        pass: PassHandle,
        executor: Box<dyn PassExecutor<B>>,
    ) -> GraphResult<()> {
        let pass = self.pass_key(pass)?;
        self.passes[pass].executor = Some(executor);
        Ok(())
    }

    pub fn pass_count(&self) -> usize {
        self.pass_order.len()
    }

    pub fn texture_count(&self) -> usize {
        self.graph_resources.len() + self.imports.len()
    }

    /// Schedules, places and realizes the graph. The builder's bookkeeping is
    /// dropped afterwards; only the compiled graph survives.
    pub fn build(self, backend: &mut B) -> GraphResult<CompiledGraph<B>> {
        let _span = tracing::info_span!("build_graph", passes = self.pass_order.len()).entered();

        let schedule = {
            let _span = tracing::debug_span!("schedule").entered();
            schedule::schedule(&self.successors()).map_err(|CycleAt(pass)| GraphError::Cycle {
                pass: self.passes[self.pass_order[pass]].name.clone(),
            })?
        };
        log::debug!(
            "Scheduled {} passes: {:?}",
            schedule.order.len(),
            schedule
                .order
                .iter()
                .map(|&p| self.passes[self.pass_order[p]].name.as_str())
                .collect::<Vec<_>>()
        );

        let lifetimes = {
            let _span = tracing::debug_span!("lifetimes").entered();
            self.lifetimes(&schedule)
        };

        let realized = {
            let _span = tracing::debug_span!("realize").entered();
            alias::realize(
                backend,
                &self.config,
                &self.graph_resources,
                &self.imports,
                &lifetimes,
            )?
        };

        let commands = {
            let _span = tracing::debug_span!("barriers").entered();
            let scheduled = self.scheduled_passes(&schedule);
            barrier::synthesize(&scheduled, &realized.resources, self.config.frames_in_flight)
        };
        let commands = match commands {
            Ok(commands) => commands,
            Err(err) => {
                alias::release(backend, &realized.resources, realized.heap);
                return Err(err);
            }
        };

        Ok(self.into_compiled(schedule, realized, commands))
    }

    fn handle(&self, version: VersionKey) -> TextureHandle {
        TextureHandle {
            builder: self.id,
            version,
        }
    }

    fn pass_key(&self, pass: PassHandle) -> GraphResult<PassKey> {
        if pass.builder != self.id {
            return Err(GraphError::ForeignHandle { what: "pass" });
        }
        if !self.passes.contains_key(pass.key) {
            return Err(GraphError::UnknownHandle { what: "pass" });
        }
        Ok(pass.key)
    }

    /// Resolves a handle that must name the latest version of its texture.
    fn current_resource(&self, texture: TextureHandle) -> GraphResult<ResourceId> {
        if texture.builder != self.id {
            return Err(GraphError::ForeignHandle { what: "texture" });
        }
        let version = self
            .versions
            .get(texture.version)
            .ok_or(GraphError::UnknownHandle { what: "texture" })?;

        let resource = self.resource(version.resource);
        if version.version != resource.latest_version() {
            return Err(GraphError::StaleHandle {
                resource: resource.desc.name.clone(),
                version: version.version,
                latest: resource.latest_version(),
            });
        }
        Ok(version.resource)
    }

    fn resource(&self, id: ResourceId) -> &Resource {
        match id {
            ResourceId::Graph(i) => &self.graph_resources[i],
            ResourceId::Import(i) => &self.imports[i].0,
        }
    }

    fn resource_mut(&mut self, id: ResourceId) -> &mut Resource {
        match id {
            ResourceId::Graph(i) => &mut self.graph_resources[i],
            ResourceId::Import(i) => &mut self.imports[i].0,
        }
    }

    fn final_index(&self, id: ResourceId) -> usize {
        match id {
            ResourceId::Graph(i) => i,
            ResourceId::Import(i) => self.graph_resources.len() + i,
        }
    }

    /// For every pass, the passes reading something it wrote, in write order.
    fn successors(&self) -> Vec<Vec<usize>> {
        self.pass_order
            .iter()
            .map(|&key| {
                self.passes[key]
                    .writes
                    .iter()
                    .flat_map(|write| self.versions[write.version].readers.iter())
                    .map(|&reader| self.passes[reader].declaration_index)
                    .collect()
            })
            .collect()
    }

    fn lifetimes(&self, schedule: &Schedule) -> LifetimeTable {
        let references = schedule.order.iter().flat_map(|&declared| {
            let pass = &self.passes[self.pass_order[declared]];
            let final_index = schedule.final_index[declared];
            pass.writes
                .iter()
                .chain(pass.reads.iter())
                .map(move |r| (final_index, self.versions[r.version].resource))
        });

        let table = lifetime::analyze(self.graph_resources.len(), self.imports.len(), references);
        if log::log_enabled!(log::Level::Debug) {
            for (resource, lifetime) in self.graph_resources.iter().zip(table.graph()) {
                log::debug!("Lifetime '{}': {:?}", resource.desc.name, lifetime);
            }
        }
        table
    }

    fn scheduled_passes(&self, schedule: &Schedule) -> Vec<ScheduledPass<'_>> {
        let resolve = |r: &ResourceRef| (self.final_index(self.versions[r.version].resource), r.access);

        schedule
            .order
            .iter()
            .map(|&declared| {
                let pass = &self.passes[self.pass_order[declared]];
                ScheduledPass {
                    name: &pass.name,
                    final_index: schedule.final_index[declared],
                    writes: pass.writes.iter().map(resolve).collect(),
                    reads: pass.reads.iter().map(resolve).collect(),
                }
            })
            .collect()
    }

    fn into_compiled(
        mut self,
        schedule: Schedule,
        realized: Realized,
        mut commands: barrier::CommandPlan,
    ) -> CompiledGraph<B> {
        let pass_index = self
            .pass_order
            .iter()
            .enumerate()
            .map(|(declared, &key)| (key, schedule.final_index[declared]))
            .collect::<HashMap<_, _>>();

        let versions = self
            .versions
            .iter()
            .map(|(key, version)| {
                let lifetime = version
                    .writer
                    .iter()
                    .chain(version.readers.iter())
                    .map(|pass| pass_index[pass])
                    .fold(None, |lifetime: Option<Lifetime>, index| {
                        Some(match lifetime {
                            Some(l) => Lifetime {
                                start: l.start.min(index),
                                end: l.end.max(index),
                            },
                            None => Lifetime::at(index),
                        })
                    });
                let info = VersionInfo {
                    resource: self.final_index(version.resource),
                    lifetime,
                };
                (key, info)
            })
            .collect::<HashMap<_, _>>();

        let pass_commands = std::mem::take(&mut commands.passes);
        let passes = schedule
            .order
            .iter()
            .zip(pass_commands)
            .map(|(&declared, commands)| {
                let pass = &mut self.passes[self.pass_order[declared]];
                CompiledPass {
                    name: std::mem::take(&mut pass.name),
                    declaration_index: declared,
                    distance: schedule.distance[declared],
                    commands,
                    executor: pass.executor.take(),
                }
            })
            .collect();

        CompiledGraph::new(
            self.id,
            self.config.frames_in_flight,
            realized,
            passes,
            commands,
            versions,
            pass_index,
        )
    }
}

fn check_desc(desc: &TextureDesc) -> GraphResult<()> {
    if desc.width == 0 || desc.height == 0 {
        return Err(GraphError::EmptyExtent {
            resource: desc.name.clone(),
            width: desc.width,
            height: desc.height,
        });
    }
    if desc.sample_count > 1 {
        return Err(GraphError::Multisample {
            resource: desc.name.clone(),
            sample_count: desc.sample_count,
        });
    }
    Ok(())
}
