// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Each wrapper creates its objects and hands
// back raw handles; the renderer decides when they are destroyed.

pub mod buffer;
pub mod command;
pub mod deletion;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
