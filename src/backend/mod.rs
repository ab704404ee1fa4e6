// Backend module - Vulkan abstraction layer
//
// Design: the frame core speaks to the device only through the `Gpu` trait.
// `VulkanContext` is the ash implementation; everything else here builds on
// the trait and is exercised in tests against `mock::MockGpu`.

pub mod allocator;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod gpu;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod upload;

#[cfg(test)]
pub mod mock;

pub use allocator::{Allocator, Buffer, Image};
pub use context::VulkanContext;
pub use device::VulkanDevice;
pub use gpu::Gpu;
pub use swapchain::{SurfaceSize, Swapchain};
