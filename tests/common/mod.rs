#![allow(dead_code)]

use arbor_graph::{
    GraphBuilder, GraphConfig,
    backend::{RecordedCommand, RecordingBackend},
    framegraph::{Access, ClearValue, TextureDesc},
};
use ash::vk;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn backbuffer_desc() -> TextureDesc {
    TextureDesc::new("backbuffer", 256, 256, vk::Format::B8G8R8A8_UNORM).access(Access::Present)
}

pub fn builder(
    backend: &mut RecordingBackend,
    frames_in_flight: usize,
) -> GraphBuilder<RecordingBackend> {
    init_logging();
    let backbuffer = backend.import_texture(backbuffer_desc(), frames_in_flight);
    let config = GraphConfig::default().frames_in_flight(frames_in_flight);
    GraphBuilder::new(config, backbuffer).unwrap()
}

/// An RGBA8 render target of `width` x `height`.
pub fn target(name: &str, width: u32, height: u32) -> TextureDesc {
    TextureDesc::new(name, width, height, vk::Format::R8G8B8A8_UNORM).access(Access::RenderTarget)
}

pub fn cleared_target(name: &str, width: u32, height: u32) -> TextureDesc {
    target(name, width, height).clear(ClearValue::Color([0.0, 0.0, 0.0, 1.0]))
}

pub fn kind(command: &RecordedCommand) -> &'static str {
    match command {
        RecordedCommand::BindDescriptorHeaps => "bind",
        RecordedCommand::BeginPass(_) => "begin",
        RecordedCommand::Barriers(_) => "barriers",
        RecordedCommand::SetTargets { .. } => "targets",
        RecordedCommand::Viewports(_) => "viewports",
        RecordedCommand::Scissors(_) => "scissors",
        RecordedCommand::ClearColor { .. } => "clear_color",
        RecordedCommand::ClearDepth { .. } => "clear_depth",
        RecordedCommand::Discard(_) => "discard",
        RecordedCommand::Marker(_) => "marker",
        RecordedCommand::EndPass => "end",
    }
}

pub fn kinds(commands: &[&RecordedCommand]) -> Vec<&'static str> {
    commands.iter().map(|command| kind(command)).collect()
}
