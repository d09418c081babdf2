use super::graph::CompiledGraph;
use crate::backend::Backend;

struct Retired<B: Backend> {
    graph: CompiledGraph<B>,
    retired_at: u64,
}

/// Owns the current compiled graph and keeps replaced ones alive until every
/// frame that may still be replaying them has retired.
pub struct GraphRing<B: Backend> {
    current: Option<CompiledGraph<B>>,
    retired: Vec<Retired<B>>,
    frames_in_flight: usize,
    frame: u64,
}

impl<B: Backend> GraphRing<B> {
    pub fn new(frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0);
        Self {
            current: None,
            retired: Vec::new(),
            frames_in_flight,
            frame: 0,
        }
    }

    /// Makes `graph` current. The graph it replaces is destroyed by a later
    /// [`GraphRing::acquire`] once `frames_in_flight` more frames have begun.
    pub fn install(&mut self, graph: CompiledGraph<B>) {
        if let Some(graph) = self.current.replace(graph) {
            log::trace!("Retiring compiled graph at frame {}", self.frame);
            self.retired.push(Retired {
                graph,
                retired_at: self.frame,
            });
        }
    }

    /// Starts the next frame, destroying graphs no in-flight frame can still
    /// reference. The caller must already have waited on the fence of the
    /// frame slot it is about to reuse.
    pub fn acquire(&mut self, backend: &mut B) -> (usize, Option<&CompiledGraph<B>>) {
        let slot = (self.frame % self.frames_in_flight as u64) as usize;
        self.frame += 1;

        let frame = self.frame;
        let frames_in_flight = self.frames_in_flight as u64;
        let (expired, alive): (Vec<_>, Vec<_>) = std::mem::take(&mut self.retired)
            .into_iter()
            .partition(|r| frame >= r.retired_at + frames_in_flight);
        self.retired = alive;
        for retired in expired {
            log::trace!(
                "Destroying compiled graph retired at frame {}",
                retired.retired_at
            );
            retired.graph.destroy(backend);
        }

        (slot, self.current.as_ref())
    }

    pub fn current(&self) -> Option<&CompiledGraph<B>> {
        self.current.as_ref()
    }

    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Destroys every graph immediately. Only valid once the device is idle.
    pub fn destroy(&mut self, backend: &mut B) {
        log::trace!("Destroying Graph Ring");
        for retired in self.retired.drain(..) {
            retired.graph.destroy(backend);
        }
        if let Some(graph) = self.current.take() {
            graph.destroy(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;

    use super::*;
    use crate::{
        backend::RecordingBackend,
        framegraph::{Access, ClearValue, GraphBuilder, GraphConfig, TextureDesc},
    };

    fn build(backend: &mut RecordingBackend, frames_in_flight: usize) -> CompiledGraph<RecordingBackend> {
        let backbuffer = backend.import_texture(
            TextureDesc::new("backbuffer", 128, 128, vk::Format::B8G8R8A8_UNORM).access(Access::Present),
            frames_in_flight,
        );
        let config = GraphConfig::default().frames_in_flight(frames_in_flight);
        let mut builder = GraphBuilder::new(config, backbuffer).unwrap();
        let pass = builder.add_pass("forward");
        let color = builder
            .create_texture(
                pass,
                TextureDesc::new("color", 128, 128, vk::Format::R8G8B8A8_UNORM)
                    .access(Access::RenderTarget)
                    .clear(ClearValue::Color([0.0, 0.0, 0.0, 1.0])),
            )
            .unwrap();
        let present = builder.add_pass("present");
        builder.read_texture(present, color, Access::PixelShader).unwrap();
        builder.build(backend).unwrap()
    }

    #[test]
    fn replaced_graphs_outlive_frames_in_flight() {
        let mut backend = RecordingBackend::default();
        let mut ring = GraphRing::new(2);

        ring.install(build(&mut backend, 2));
        assert_eq!(ring.acquire(&mut backend).0, 0);
        assert_eq!(ring.acquire(&mut backend).0, 1);
        let live_heaps = backend.live_heap_count();

        ring.install(build(&mut backend, 2));
        assert_eq!(ring.retired_len(), 1);
        assert_eq!(backend.live_heap_count(), live_heaps + 1);

        let (slot, current) = ring.acquire(&mut backend);
        assert_eq!(slot, 0);
        assert!(current.is_some());
        assert_eq!(ring.retired_len(), 1);

        ring.acquire(&mut backend);
        assert_eq!(ring.retired_len(), 0);
        assert_eq!(backend.live_heap_count(), live_heaps);
    }

    #[test]
    fn destroy_releases_everything() {
        let mut backend = RecordingBackend::default();
        let mut ring = GraphRing::new(3);

        ring.install(build(&mut backend, 3));
        ring.install(build(&mut backend, 3));
        ring.destroy(&mut backend);

        assert!(ring.current().is_none());
        assert_eq!(backend.live_heap_count(), 0);
        assert_eq!(backend.live_view_count(), 0);
        // Only the imported backbuffers remain.
        assert_eq!(backend.live_texture_count(), 6);
    }
}
