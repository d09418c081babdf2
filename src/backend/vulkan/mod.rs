mod backend;
mod context;
mod debug;
mod frame;

pub use backend::VulkanBackend;
pub use context::VulkanContext;
pub use frame::{Frame, FrameRing};
