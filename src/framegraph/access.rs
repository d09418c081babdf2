use std::fmt;

use ash::vk;
use bitflags::bitflags;

/// How a pass touches a texture.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum Access {
    #[default]
    None,
    RenderTarget,
    VertexShader,
    PixelShader,
    Depth,
    Stencil,
    Present,
}

impl Access {
    pub fn is_depth_target(self) -> bool {
        matches!(self, Access::Depth | Access::Stencil)
    }

    pub fn is_target(self) -> bool {
        self == Access::RenderTarget || self.is_depth_target()
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Access::None => "None",
            Access::RenderTarget => "RenderTarget",
            Access::VertexShader => "VertexShader",
            Access::PixelShader => "PixelShader",
            Access::Depth => "Depth",
            Access::Stencil => "Stencil",
            Access::Present => "Present",
        };

        f.write_str(name)
    }
}

bitflags! {
    /// Every access a resource accumulated over the frame.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        const RENDER_TARGET = 1 << 0;
        const VERTEX_SHADER = 1 << 1;
        const PIXEL_SHADER = 1 << 2;
        const DEPTH = 1 << 3;
        const STENCIL = 1 << 4;
        const PRESENT = 1 << 5;
    }
}

impl From<Access> for AccessFlags {
    fn from(access: Access) -> Self {
        match access {
            Access::None => AccessFlags::empty(),
            Access::RenderTarget => AccessFlags::RENDER_TARGET,
            Access::VertexShader => AccessFlags::VERTEX_SHADER,
            Access::PixelShader => AccessFlags::PIXEL_SHADER,
            Access::Depth => AccessFlags::DEPTH,
            Access::Stencil => AccessFlags::STENCIL,
            Access::Present => AccessFlags::PRESENT,
        }
    }
}

impl AccessFlags {
    pub fn needs_render_target_view(self) -> bool {
        self.contains(AccessFlags::RENDER_TARGET)
    }

    pub fn needs_shader_view(self) -> bool {
        self.intersects(AccessFlags::VERTEX_SHADER | AccessFlags::PIXEL_SHADER)
    }

    pub fn needs_depth_view(self) -> bool {
        self.intersects(AccessFlags::DEPTH | AccessFlags::STENCIL)
    }

    pub fn is_clearable(self) -> bool {
        self.needs_render_target_view() || self.needs_depth_view()
    }

    pub fn names(self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}

/// Synchronization scope, access mask and layout a texture is left in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TrackingState {
    pub layout: vk::ImageLayout,
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

const FRAGMENT_TESTS: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
    vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
        | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
);

impl TrackingState {
    pub const UNDEFINED: TrackingState = TrackingState {
        layout: vk::ImageLayout::UNDEFINED,
        stage: vk::PipelineStageFlags2::NONE,
        access: vk::AccessFlags2::NONE,
    };

    pub const COLOR_ATTACHMENT_WRITE: TrackingState = TrackingState {
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
    };

    pub const VERTEX_SHADER_READ: TrackingState = TrackingState {
        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        stage: vk::PipelineStageFlags2::VERTEX_SHADER,
        access: vk::AccessFlags2::SHADER_SAMPLED_READ,
    };

    pub const FRAGMENT_SHADER_READ: TrackingState = TrackingState {
        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        stage: vk::PipelineStageFlags2::FRAGMENT_SHADER,
        access: vk::AccessFlags2::SHADER_SAMPLED_READ,
    };

    pub const DEPTH_STENCIL_WRITE: TrackingState = TrackingState {
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        stage: FRAGMENT_TESTS,
        access: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
    };

    pub const PRESENT: TrackingState = TrackingState {
        layout: vk::ImageLayout::PRESENT_SRC_KHR,
        stage: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        access: vk::AccessFlags2::NONE,
    };

    pub fn for_access(access: Access) -> TrackingState {
        match access {
            Access::None => Self::UNDEFINED,
            Access::RenderTarget => Self::COLOR_ATTACHMENT_WRITE,
            Access::VertexShader => Self::VERTEX_SHADER_READ,
            Access::PixelShader => Self::FRAGMENT_SHADER_READ,
            Access::Depth | Access::Stencil => Self::DEPTH_STENCIL_WRITE,
            Access::Present => Self::PRESENT,
        }
    }
}

fn layout_str(layout: vk::ImageLayout) -> &'static str {
    match layout {
        vk::ImageLayout::UNDEFINED => "UNDEFINED",
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => "COLOR_ATTACHMENT_OPTIMAL",
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => "DEPTH_STENCIL_ATTACHMENT_OPTIMAL",
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => "SHADER_READ_ONLY_OPTIMAL",
        vk::ImageLayout::PRESENT_SRC_KHR => "PRESENT_SRC_KHR",
        vk::ImageLayout::GENERAL => "GENERAL",
        _ => "OTHER",
    }
}

fn stage_str(stage: vk::PipelineStageFlags2) -> String {
    const NAMES: [(vk::PipelineStageFlags2, &str); 6] = [
        (vk::PipelineStageFlags2::VERTEX_SHADER, "VERTEX_SHADER"),
        (vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS, "EARLY_FRAGMENT_TESTS"),
        (vk::PipelineStageFlags2::FRAGMENT_SHADER, "FRAGMENT_SHADER"),
        (vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS, "LATE_FRAGMENT_TESTS"),
        (vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, "COLOR_ATTACHMENT_OUTPUT"),
        (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, "BOTTOM_OF_PIPE"),
    ];

    let stages = NAMES
        .iter()
        .filter(|(flag, _)| stage.contains(*flag))
        .map(|(_, name)| *name)
        .collect::<Vec<_>>();

    if stages.is_empty() {
        "NONE".to_owned()
    } else {
        stages.join(" | ")
    }
}

fn access_str(access: vk::AccessFlags2) -> String {
    const NAMES: [(vk::AccessFlags2, &str); 3] = [
        (vk::AccessFlags2::COLOR_ATTACHMENT_WRITE, "COLOR_ATTACHMENT_WRITE"),
        (vk::AccessFlags2::SHADER_SAMPLED_READ, "SHADER_SAMPLED_READ"),
        (
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            "DEPTH_STENCIL_ATTACHMENT_WRITE",
        ),
    ];

    let access_flags = NAMES
        .iter()
        .filter(|(flag, _)| access.contains(*flag))
        .map(|(_, name)| *name)
        .collect::<Vec<_>>();

    if access_flags.is_empty() {
        "NONE".to_owned()
    } else {
        access_flags.join(" | ")
    }
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ layout: {}, stage: {}, access: {} }}",
            layout_str(self.layout),
            stage_str(self.stage),
            access_str(self.access)
        )
    }
}

pub fn log_transition(old: TrackingState, new: TrackingState, debug_name: &str) {
    log::debug!(
        "{}\n     layout: {} -> {}\n     stage:  {} -> {}\n     access: {} -> {}",
        debug_name,
        layout_str(old.layout),
        layout_str(new.layout),
        stage_str(old.stage),
        stage_str(new.stage),
        access_str(old.access),
        access_str(new.access)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_reads_share_layout_but_not_stage() {
        let vs = TrackingState::for_access(Access::VertexShader);
        let ps = TrackingState::for_access(Access::PixelShader);

        assert_eq!(vs.layout, ps.layout);
        assert_ne!(vs, ps);
    }

    #[test]
    fn depth_and_stencil_track_identically() {
        assert_eq!(
            TrackingState::for_access(Access::Depth),
            TrackingState::for_access(Access::Stencil)
        );
        assert!(
            TrackingState::DEPTH_STENCIL_WRITE
                .stage
                .contains(vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS)
        );
    }

    #[test]
    fn view_gating_follows_accumulated_flags() {
        let flags = AccessFlags::from(Access::RenderTarget) | AccessFlags::from(Access::PixelShader);

        assert!(flags.needs_render_target_view());
        assert!(flags.needs_shader_view());
        assert!(!flags.needs_depth_view());
        assert!(flags.is_clearable());
        assert!(!AccessFlags::from(Access::Present).is_clearable());
        assert!(AccessFlags::from(Access::None).is_empty());
    }

    #[test]
    fn display_names_layout_stage_and_access() {
        let text = TrackingState::PRESENT.to_string();

        assert!(text.contains("PRESENT_SRC_KHR"));
        assert!(text.contains("BOTTOM_OF_PIPE"));
        assert!(text.contains("access: NONE"));
    }
}
