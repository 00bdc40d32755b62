// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash; every wrapper owns its handles and
// releases them on drop, holding an Arc<VulkanDevice> so the device goes last.

pub mod buffer;
pub mod descriptors;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
