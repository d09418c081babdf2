use std::path::PathBuf;

use anyhow::Context;
use ash::vk;
use clap::{Parser, ValueEnum};

use arbor_graph::{
    Backend, CompiledGraph, GraphConfig, GraphRing,
    backend::{ImportedTexture, RecordingBackend},
    framegraph::{Access, DEFAULT_FRAMES_IN_FLIGHT, TextureDesc},
};

mod demo;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// Records commands in memory; needs no GPU.
    Recording,
    /// Headless Vulkan 1.3 device.
    Vulkan,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum DumpFormat {
    Json,
    Canvas,
    Mermaid,
}

/// Compiles the sample frame graph and replays it for a number of frames.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[arg(long, value_enum, default_value_t = BackendKind::Recording)]
    backend: BackendKind,

    #[arg(long, default_value_t = DEFAULT_FRAMES_IN_FLIGHT)]
    frames_in_flight: usize,

    /// Frames to replay.
    #[arg(long, default_value_t = 8)]
    frames: u64,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Recompile at half resolution after this many frames.
    #[arg(long)]
    resize_at: Option<u64>,

    /// Print the compiled graph to stdout.
    #[arg(long, value_enum)]
    dump: Option<DumpFormat>,

    #[arg(long, default_value = "log4rs.yml")]
    log_config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    log4rs::init_file(&args.log_config, Default::default())
        .context("failed to load logging config file")?;

    #[cfg(feature = "tracing")]
    {
        use tracing_subscriber::layer::SubscriberExt;

        tracy_client::Client::start();
        let subscriber = tracing_subscriber::registry().with(tracing_tracy::TracyLayer::default());
        tracing::subscriber::set_global_default(subscriber)
            .context("failed to install tracy subscriber")?;
    }

    let config = GraphConfig::default().frames_in_flight(args.frames_in_flight);
    config.validate()?;

    match args.backend {
        BackendKind::Recording => run_recording(&args, config),
        BackendKind::Vulkan => run_vulkan(&args, config),
    }
}

fn backbuffer_desc(width: u32, height: u32, access: Access) -> TextureDesc {
    TextureDesc::new("backbuffer", width, height, vk::Format::B8G8R8A8_UNORM).access(access)
}

fn dump<B: Backend>(graph: &CompiledGraph<B>, format: Option<DumpFormat>) -> anyhow::Result<()> {
    let Some(format) = format else {
        return Ok(());
    };
    let report = graph.report();
    let text = match format {
        DumpFormat::Json => report.to_json().context("failed to serialise graph report")?,
        DumpFormat::Canvas => serde_json::to_string_pretty(&report.to_canvas())
            .context("failed to serialise graph canvas")?,
        DumpFormat::Mermaid => report.to_mermaid(),
    };
    println!("{text}");
    Ok(())
}

fn resize_due(args: &Args, frame: u64) -> bool {
    args.resize_at == Some(frame)
}

fn run_recording(args: &Args, config: GraphConfig) -> anyhow::Result<()> {
    let fif = config.frames_in_flight;
    let mut backend = RecordingBackend::default();
    let import = |backend: &mut RecordingBackend, width, height| -> ImportedTexture {
        backend.import_texture(backbuffer_desc(width, height, Access::Present), fif)
    };

    let backbuffer = import(&mut backend, args.width, args.height);
    let graph = demo::compile(&mut backend, config, backbuffer)?;
    dump(&graph, args.dump)?;

    let mut ring = GraphRing::new(fif);
    ring.install(graph);

    for frame in 0..args.frames {
        if resize_due(args, frame) {
            let backbuffer = import(&mut backend, (args.width / 2).max(1), (args.height / 2).max(1));
            ring.install(demo::compile(&mut backend, config, backbuffer)?);
        }

        let _span = tracing::info_span!("frame", frame).entered();
        let cmd = backend.begin_command_list();
        let (slot, graph) = ring.acquire(&mut backend);
        if let Some(graph) = graph {
            graph.render(&mut backend, cmd, slot);
        }
        log::debug!(
            "Frame {} (slot {}) recorded {} commands",
            frame,
            slot,
            backend.commands(cmd).len()
        );

        #[cfg(feature = "tracing")]
        tracy_client::frame_mark();
    }

    ring.destroy(&mut backend);
    log::info!(
        "Replayed {} frames; {} heaps and {} views left alive",
        args.frames,
        backend.live_heap_count(),
        backend.live_view_count()
    );
    Ok(())
}

#[cfg(feature = "vulkan")]
fn run_vulkan(args: &Args, config: GraphConfig) -> anyhow::Result<()> {
    use arbor_graph::{
        backend::vulkan::{FrameRing, VulkanBackend, VulkanContext},
        framegraph::AccessFlags,
    };

    let fif = config.frames_in_flight;
    let context = VulkanContext::new().context("failed to create Vulkan context")?;
    let mut backend = VulkanBackend::new(&context)?;

    // Without a swapchain the backbuffer ends each frame readable by shaders.
    let create_backbuffer = |backend: &mut VulkanBackend, width, height| {
        backend.create_images(
            backbuffer_desc(width, height, Access::PixelShader),
            AccessFlags::RENDER_TARGET,
            fif,
        )
    };

    let mut backbuffers = vec![create_backbuffer(&mut backend, args.width, args.height)?];
    let graph = demo::compile(&mut backend, config, backbuffers[0].clone())?;
    dump(&graph, args.dump)?;

    let mut frames = FrameRing::new(&context.device, context.queue_family, fif)?;
    let mut ring = GraphRing::new(fif);
    ring.install(graph);

    for frame_number in 0..args.frames {
        if resize_due(args, frame_number) {
            let backbuffer =
                create_backbuffer(&mut backend, (args.width / 2).max(1), (args.height / 2).max(1))?;
            ring.install(demo::compile(&mut backend, config, backbuffer.clone())?);
            backbuffers.push(backbuffer);
        }

        let _span = tracing::info_span!("frame", frame = frame_number).entered();
        let frame = frames.acquire(&context.device)?;
        let cmd = frame.begin(&context.device)?;
        let (slot, graph) = ring.acquire(&mut backend);
        if let Some(graph) = graph {
            graph.render(&mut backend, cmd, slot);
        }
        frame.submit(&context.device, context.queue)?;

        #[cfg(feature = "tracing")]
        tracy_client::frame_mark();
    }

    context.wait_idle()?;
    ring.destroy(&mut backend);
    for backbuffer in backbuffers {
        backend.destroy_imported(backbuffer);
    }
    frames.destroy(&context.device);
    drop(backend);
    drop(context);

    log::debug!("Vulkan replay finished");
    Ok(())
}

#[cfg(not(feature = "vulkan"))]
fn run_vulkan(_args: &Args, _config: GraphConfig) -> anyhow::Result<()> {
    anyhow::bail!("built without the \"vulkan\" feature")
}
