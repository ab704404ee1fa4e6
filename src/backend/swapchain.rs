// Swapchain - presentable images bound to the window surface
//
// Owns the swapchain handle, one view + framebuffer per image, the depth
// attachment those framebuffers share, and the render pass they target.
//
// State machine:
//   Live --(acquire/present reports OutOfDate|Suboptimal)--> Recreating --> Live
//
// `recreate` is synchronous: it idles the device, tears down everything
// per-image, waits out a minimized window and rebuilds. The surface format
// and render pass survive recreation so pipelines built against them stay
// valid.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::allocator::{Allocator, Image};
use super::gpu::{Gpu, ImageDesc, SwapchainDesc};

/// Where the swapchain learns the window's drawable size
pub trait SurfaceSize {
    /// Current drawable area in pixels (0 in a dimension while minimized)
    fn drawable_size(&mut self) -> vk::Extent2D;

    /// Block until the platform has delivered more window events
    fn wait_events(&mut self);
}

/// Result of acquiring the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Ready(u32),
    /// Usable this frame, but the swapchain should be rebuilt afterwards
    Suboptimal(u32),
    /// Nothing was acquired; rebuild before rendering
    OutOfDate,
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl SurfaceStatus {
    pub fn needs_recreate(self) -> bool {
        self != SurfaceStatus::Optimal
    }
}

pub struct Swapchain<G: Gpu> {
    gpu: Arc<G>,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    depth: Option<Image>,
    render_pass: vk::RenderPass,
    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    generation: u64,
}

impl<G: Gpu> Swapchain<G> {
    /// Build the swapchain, its render pass and per-image resources.
    ///
    /// The surface format is the first entry of `preferred_formats` the
    /// surface supports, otherwise the first format the surface reports.
    /// Blocks while the window has no drawable area.
    pub fn new(
        gpu: Arc<G>,
        allocator: &mut Allocator<G>,
        surface: &mut dyn SurfaceSize,
        preferred_formats: &[vk::SurfaceFormatKHR],
    ) -> Result<Self> {
        let formats = gpu.surface_formats()?;
        let surface_format = choose_surface_format(&formats, preferred_formats)
            .context("No suitable surface format")?;
        log::info!(
            "Surface format: {:?} / {:?}",
            surface_format.format,
            surface_format.color_space
        );

        let render_pass = gpu.create_render_pass(surface_format.format)?;

        let mut swapchain = Self {
            gpu,
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            depth: None,
            render_pass,
            surface_format,
            extent: vk::Extent2D::default(),
            // Vsync'd and always available
            present_mode: vk::PresentModeKHR::FIFO,
            generation: 0,
        };

        if let Err(e) = swapchain.build(allocator, surface) {
            swapchain.destroy(allocator);
            return Err(e);
        }

        Ok(swapchain)
    }

    /// Acquire the next presentable image, signaling `semaphore` when it is ready
    pub fn acquire_next(&self, semaphore: vk::Semaphore) -> Result<Acquire> {
        match self.gpu.acquire_next_image(self.handle, semaphore) {
            Ok((index, false)) => Ok(Acquire::Ready(index)),
            Ok((index, true)) => Ok(Acquire::Suboptimal(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(e) => Err(fatal(e, "acquire")),
        }
    }

    /// Queue `image_index` for presentation once `wait` is signaled
    pub fn present(&self, image_index: u32, wait: vk::Semaphore) -> Result<SurfaceStatus> {
        match self.gpu.queue_present(self.handle, image_index, wait) {
            Ok(false) => Ok(SurfaceStatus::Optimal),
            Ok(true) => Ok(SurfaceStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SurfaceStatus::OutOfDate),
            Err(e) => Err(fatal(e, "present")),
        }
    }

    /// Tear down and rebuild against the surface's current size.
    ///
    /// Previously acquired image indices are invalid afterwards.
    pub fn recreate(
        &mut self,
        allocator: &mut Allocator<G>,
        surface: &mut dyn SurfaceSize,
    ) -> Result<()> {
        self.gpu
            .wait_idle()
            .context("Failed to idle device before swapchain recreation")?;

        self.destroy_images(allocator);
        self.build(allocator, surface)?;

        log::info!(
            "Swapchain recreated: {}x{} (generation {})",
            self.extent.width,
            self.extent.height,
            self.generation
        );
        Ok(())
    }

    /// Create the handle and everything hanging off it
    fn build(&mut self, allocator: &mut Allocator<G>, surface: &mut dyn SurfaceSize) -> Result<()> {
        let (capabilities, extent) = self.wait_for_drawable_extent(surface)?;

        // One more than the minimum so we never wait on the driver
        let mut image_count = capabilities.min_image_count + 1;
        if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
            image_count = capabilities.max_image_count;
        }

        self.handle = self.gpu.create_swapchain(&SwapchainDesc {
            min_image_count: image_count,
            format: self.surface_format,
            extent,
            present_mode: self.present_mode,
            pre_transform: capabilities.current_transform,
        })?;
        self.extent = extent;

        self.images = self.gpu.swapchain_images(self.handle)?;
        log::debug!("Swapchain has {} images at {}x{}", self.images.len(), extent.width, extent.height);

        for &image in &self.images {
            let view = self.gpu.create_image_view(
                image,
                self.surface_format.format,
                vk::ImageAspectFlags::COLOR,
            )?;
            self.image_views.push(view);
        }

        let depth = allocator.create_image("swapchain depth", &ImageDesc::depth(extent))?;
        let depth_view = depth.view;
        self.depth = Some(depth);

        for &view in &self.image_views {
            let framebuffer =
                self.gpu
                    .create_framebuffer(self.render_pass, &[view, depth_view], extent)?;
            self.framebuffers.push(framebuffer);
        }

        self.generation += 1;
        Ok(())
    }

    /// Query until the surface reports a non-zero drawable area
    fn wait_for_drawable_extent(
        &self,
        surface: &mut dyn SurfaceSize,
    ) -> Result<(vk::SurfaceCapabilitiesKHR, vk::Extent2D)> {
        loop {
            let capabilities = self.gpu.surface_capabilities()?;
            let extent = choose_extent(&capabilities, surface.drawable_size());

            if extent.width > 0 && extent.height > 0 {
                return Ok((capabilities, extent));
            }

            log::debug!("Surface has zero extent, waiting for window events");
            surface.wait_events();
        }
    }

    /// Destroy per-image resources and the handle; the render pass survives
    fn destroy_images(&mut self, allocator: &mut Allocator<G>) {
        for framebuffer in self.framebuffers.drain(..) {
            self.gpu.destroy_framebuffer(framebuffer);
        }
        for view in self.image_views.drain(..) {
            self.gpu.destroy_image_view(view);
        }
        if let Some(depth) = self.depth.take() {
            allocator.destroy_image(depth);
        }
        // Images belong to the swapchain handle
        self.images.clear();

        if self.handle != vk::SwapchainKHR::null() {
            self.gpu.destroy_swapchain(self.handle);
            self.handle = vk::SwapchainKHR::null();
        }
    }

    /// Destroy everything including the render pass. Safe to call twice.
    ///
    /// The device must be idle.
    pub fn destroy(&mut self, allocator: &mut Allocator<G>) {
        self.destroy_images(allocator);
        if self.render_pass != vk::RenderPass::null() {
            self.gpu.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image_view_count(&self) -> usize {
        self.image_views.len()
    }

    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Bumped on every (re)build; indices from an older generation are stale
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// First preferred format the surface supports, else the first it reports
pub fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    preferred: &[vk::SurfaceFormatKHR],
) -> Option<vk::SurfaceFormatKHR> {
    preferred
        .iter()
        .find(|p| {
            available
                .iter()
                .any(|a| a.format == p.format && a.color_space == p.color_space)
        })
        .or_else(|| available.first())
        .copied()
}

/// Surface extent if the platform fixes it, else the window size clamped to limits
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    drawable: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    // Minimized: report zero rather than clamping up to the minimum
    if drawable.width == 0 || drawable.height == 0 {
        return vk::Extent2D::default();
    }

    vk::Extent2D {
        width: drawable
            .width
            .max(capabilities.min_image_extent.width)
            .min(capabilities.max_image_extent.width),
        height: drawable
            .height
            .max(capabilities.min_image_extent.height)
            .min(capabilities.max_image_extent.height),
    }
}

fn fatal(result: vk::Result, operation: &str) -> anyhow::Error {
    match result {
        vk::Result::ERROR_DEVICE_LOST => anyhow::anyhow!("Device lost during swapchain {}", operation),
        vk::Result::ERROR_SURFACE_LOST_KHR => {
            anyhow::anyhow!("Surface lost during swapchain {}", operation)
        }
        other => anyhow::Error::new(other).context(format!("Swapchain {} failed", operation)),
    }
}

#[cfg(test)]
#[path = "swapchain_tests.rs"]
mod tests;
