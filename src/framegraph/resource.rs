use std::fmt;

use ash::vk;
use smallvec::SmallVec;

use super::{
    access::{Access, AccessFlags},
    handle::{PassKey, ResourceId},
};

/// What a texture holds when its first pass of the frame touches it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum InitialState {
    #[default]
    Undefined,
    Clear,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u8 },
}

impl Default for ClearValue {
    fn default() -> Self {
        ClearValue::Color([0.0; 4])
    }
}

impl ClearValue {
    pub fn color(self) -> [f32; 4] {
        match self {
            ClearValue::Color(color) => color,
            ClearValue::DepthStencil { .. } => [0.0; 4],
        }
    }

    pub fn depth_stencil(self) -> (f32, u8) {
        match self {
            ClearValue::DepthStencil { depth, stencil } => (depth, stencil),
            ClearValue::Color(_) => (1.0, 0),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureDesc {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub sample_count: u32,
    pub access: Access,
    pub initial_state: InitialState,
    pub clear_value: ClearValue,
}

impl TextureDesc {
    pub fn new(name: impl Into<String>, width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            format,
            sample_count: 1,
            access: Access::None,
            initial_state: InitialState::Undefined,
            clear_value: ClearValue::default(),
        }
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }

    /// Clears the texture to `value` on its first use each frame.
    pub fn clear(mut self, value: ClearValue) -> Self {
        self.initial_state = InitialState::Clear;
        self.clear_value = value;
        self
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

impl fmt::Display for TextureDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TextureDesc(name={}, size={}x{}, format={:?}, samples={}, access={}, initial={:?})",
            self.name,
            self.width,
            self.height,
            self.format,
            self.sample_count,
            self.access,
            self.initial_state,
        )
    }
}

/// A logical texture tracked across all of its versions.
#[derive(Debug)]
pub(crate) struct Resource {
    pub desc: TextureDesc,
    pub all_accesses: AccessFlags,
    pub last_access: Access,
    pub version_count: u32,
}

impl Resource {
    pub fn new(desc: TextureDesc) -> Self {
        let access = desc.access;
        Self {
            desc,
            all_accesses: access.into(),
            last_access: access,
            version_count: 1,
        }
    }

    pub fn record_access(&mut self, access: Access) {
        self.all_accesses |= access.into();
        self.last_access = access;
    }

    pub fn latest_version(&self) -> u32 {
        self.version_count - 1
    }

    pub fn needs_clear(&self) -> bool {
        self.desc.initial_state == InitialState::Clear && self.all_accesses.is_clearable()
    }
}

/// One write-version of a [`Resource`].
#[derive(Debug)]
pub(crate) struct ResourceVersion {
    pub resource: ResourceId,
    pub version: u32,
    pub writer: Option<PassKey>,
    pub readers: SmallVec<[PassKey; 4]>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_requires_a_target_access() {
        let desc = TextureDesc::new("lut", 32, 32, vk::Format::R8G8B8A8_UNORM)
            .access(Access::PixelShader)
            .clear(ClearValue::Color([1.0, 0.0, 0.0, 1.0]));
        let mut resource = Resource::new(desc);
        assert!(!resource.needs_clear());

        resource.record_access(Access::RenderTarget);
        assert!(resource.needs_clear());
        assert_eq!(resource.last_access, Access::RenderTarget);
    }

    #[test]
    fn undefined_textures_never_clear() {
        let desc = TextureDesc::new("scratch", 64, 64, vk::Format::R8G8B8A8_UNORM)
            .access(Access::RenderTarget);

        assert!(!Resource::new(desc).needs_clear());
    }
}
