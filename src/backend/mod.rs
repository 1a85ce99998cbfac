// Backend module - Vulkan abstraction layer
//
// Thin ownership wrappers around ash. Everything below the engine facade
// lives here; nothing in this module knows about windows or events.

pub mod buffer;
pub mod device;
pub mod frame;
pub mod lifecycle;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod targets;

pub use device::VulkanDevice;
pub use frame::{FrameDriver, FrameState, FrameStatus, FrameStep};
pub use swapchain::Swapchain;
pub use targets::ShaderPaths;
