//! The sample frame the binary compiles: a forward pass, a two-step bloom
//! chain and a composition into the backbuffer.

use anyhow::Context;
use ash::vk;

use arbor_graph::{
    Backend, CompiledGraph, GraphBuilder, GraphConfig,
    backend::ImportedTexture,
    framegraph::{Access, ClearValue, GraphResult, PassContext, TextureDesc, TextureHandle},
};

const FORWARD_CLEAR: [f32; 4] = [0.0, 0.584, 0.929, 1.0];
const HDR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

struct ForwardOutputs {
    color: TextureHandle,
}

fn forward_pass<B: Backend + 'static>(
    builder: &mut GraphBuilder<B>,
    width: u32,
    height: u32,
) -> GraphResult<ForwardOutputs> {
    let pass = builder.add_pass("ForwardPass");
    let color = builder.create_texture(
        pass,
        TextureDesc::new("forward_color", width, height, HDR_FORMAT)
            .access(Access::RenderTarget)
            .clear(ClearValue::Color(FORWARD_CLEAR)),
    )?;
    let depth = builder.create_texture(
        pass,
        TextureDesc::new("forward_depth", width, height, vk::Format::D32_SFLOAT)
            .access(Access::Depth)
            .clear(ClearValue::DepthStencil {
                depth: 1.0,
                stencil: 0,
            }),
    )?;

    builder.set_executor(pass, move |ctx: &mut PassContext<'_, B>| {
        let target = ctx
            .graph
            .render_target_view(color, ctx.frame_slot)
            .context("forward pass failed to resolve forward_color")?;
        let depth = ctx
            .graph
            .depth_view(depth, ctx.frame_slot)
            .context("forward pass failed to resolve forward_depth")?;
        log::trace!("{}: draw into {:?} with depth {:?}", ctx.pass_name, target, depth);
        Ok(())
    })?;

    Ok(ForwardOutputs { color })
}

fn downsample_pass<B: Backend + 'static>(
    builder: &mut GraphBuilder<B>,
    name: &str,
    source: TextureHandle,
    desc: TextureDesc,
) -> GraphResult<TextureHandle> {
    let pass = builder.add_pass(name);
    builder.read_texture(pass, source, Access::PixelShader)?;
    let target = builder.create_texture(pass, desc.access(Access::RenderTarget))?;

    builder.set_executor(pass, move |ctx: &mut PassContext<'_, B>| {
        let input = ctx
            .graph
            .shader_view(source, ctx.frame_slot)
            .context("downsample input has no shader view")?;
        log::trace!("{}: sample {:?}", ctx.pass_name, input);
        Ok(())
    })?;

    Ok(target)
}

fn composition_pass<B: Backend + 'static>(
    builder: &mut GraphBuilder<B>,
    scene: TextureHandle,
    bloom: TextureHandle,
) -> GraphResult<TextureHandle> {
    let pass = builder.add_pass("CompositionPass");
    builder.read_texture(pass, scene, Access::PixelShader)?;
    builder.read_texture(pass, bloom, Access::PixelShader)?;
    let backbuffer = builder.backbuffer();
    let output = builder.write_texture(pass, backbuffer, Access::RenderTarget)?;

    builder.set_executor(pass, move |ctx: &mut PassContext<'_, B>| {
        let target = ctx
            .graph
            .render_target_view(output, ctx.frame_slot)
            .context("composition pass failed to resolve the backbuffer")?;
        log::trace!("{}: fullscreen triangle into {:?}", ctx.pass_name, target);
        Ok(())
    })?;

    Ok(output)
}

/// Declares the sample frame against `backbuffer` and compiles it.
pub fn compile<B: Backend + 'static>(
    backend: &mut B,
    config: GraphConfig,
    backbuffer: ImportedTexture,
) -> anyhow::Result<CompiledGraph<B>> {
    let (width, height) = (backbuffer.desc.width, backbuffer.desc.height);
    let mut builder = GraphBuilder::new(config, backbuffer)?;

    let forward = forward_pass(&mut builder, width, height)?;
    let bloom = downsample_pass(
        &mut builder,
        "BloomPass",
        forward.color,
        TextureDesc::new("bloom", (width / 2).max(1), (height / 2).max(1), HDR_FORMAT),
    )?;
    let luminance = downsample_pass(
        &mut builder,
        "LuminancePass",
        bloom,
        TextureDesc::new("luminance", (width / 4).max(1), (height / 4).max(1), vk::Format::R16_SFLOAT),
    )?;
    composition_pass(&mut builder, forward.color, luminance)?;

    let graph = builder
        .build(backend)
        .context("failed to compile the sample frame")?;
    log::info!(
        "Compiled {} passes into a {} byte frame heap on {}",
        graph.pass_count(),
        graph.frame_heap_size_bytes(),
        backend.name()
    );
    Ok(graph)
}
