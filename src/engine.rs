// Engine - root context owning every frame-core object
//
// Built once, passed by reference to whatever needs it. Construction order:
//   Allocator, DeletionQueue, Swapchain, FrameRing, UploadContext,
//   DescriptorAllocator, FrameScheduler
//
// Teardown (shutdown() or Drop, runs once):
//   wait_idle -> swapchain -> deletion queue (newest first) -> allocator

use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use crate::backend::allocator::Allocator;
use crate::backend::descriptor::{DescriptorAllocator, PoolSizes};
use crate::backend::gpu::Gpu;
use crate::backend::swapchain::{SurfaceSize, Swapchain};
use crate::backend::upload::UploadContext;
use crate::deletion::DeletionQueue;
use crate::frame::{CommandRecorder, DrawItem, FrameReport, FrameRing, FrameScheduler, ResizeFlag};
use crate::scene::{Mesh, Texture, Vertex};

/// Typed startup parameters
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub frames_in_flight: usize,
    /// Ordered by preference; the surface's first format is the fallback
    pub preferred_formats: Vec<vk::SurfaceFormatKHR>,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub pools: PoolSizes,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            preferred_formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_depth: 1.0,
            pools: PoolSizes::default(),
        }
    }
}

pub struct Engine<G: Gpu> {
    gpu: Arc<G>,
    allocator: Allocator<G>,
    deletion: DeletionQueue,
    swapchain: Swapchain<G>,
    upload: UploadContext<G>,
    descriptors: DescriptorAllocator<G>,
    scheduler: FrameScheduler<G>,
    shut_down: bool,
}

impl<G: Gpu> Engine<G> {
    pub fn new(gpu: Arc<G>, config: &EngineConfig, surface: &mut dyn SurfaceSize) -> Result<Self> {
        anyhow::ensure!(
            config.frames_in_flight > 0,
            "frames_in_flight must be at least 1"
        );

        let mut allocator = Allocator::new(gpu.clone());
        let mut deletion = DeletionQueue::new();
        let mut swapchain =
            Swapchain::new(gpu.clone(), &mut allocator, surface, &config.preferred_formats)?;

        let built = (|| -> Result<_> {
            let ring = FrameRing::new(&gpu, &mut deletion, config.frames_in_flight)?;
            let upload = UploadContext::new(gpu.clone(), &mut deletion)?;
            let descriptors = DescriptorAllocator::new(gpu.clone(), &mut deletion, config.pools)?;
            Ok((ring, upload, descriptors))
        })();

        let (ring, upload, descriptors) = match built {
            Ok(parts) => parts,
            Err(e) => {
                let _ = gpu.wait_idle();
                swapchain.destroy(&mut allocator);
                deletion.flush();
                return Err(e);
            }
        };

        let recorder = CommandRecorder::new(config.clear_color, config.clear_depth);
        let scheduler = FrameScheduler::new(gpu.clone(), ring, recorder);

        log::info!(
            "Engine ready: {} frames in flight, {}x{} swapchain",
            config.frames_in_flight,
            swapchain.extent().width,
            swapchain.extent().height
        );

        Ok(Self {
            gpu,
            allocator,
            deletion,
            swapchain,
            upload,
            descriptors,
            scheduler,
            shut_down: false,
        })
    }

    /// Render and present one frame. Every `Err` is fatal.
    pub fn tick(&mut self, surface: &mut dyn SurfaceSize, items: &[DrawItem]) -> Result<FrameReport> {
        anyhow::ensure!(!self.shut_down, "Engine has been shut down");
        self.scheduler
            .tick(&mut self.swapchain, &mut self.allocator, surface, items)
    }

    pub fn resize_flag(&self) -> ResizeFlag {
        self.scheduler.resize_flag()
    }

    /// Register a destructor that runs at teardown, before anything created earlier
    pub fn defer(&mut self, label: impl Into<String>, destroy: impl FnOnce() + 'static) {
        self.deletion.push(label, destroy);
    }

    pub fn upload_mesh(&mut self, name: &str, vertices: &[Vertex], indices: &[u32]) -> Result<Mesh> {
        Mesh::upload(&self.upload, &mut self.allocator, name, vertices, indices)
    }

    pub fn upload_texture(
        &mut self,
        name: &str,
        pixels: &[u8],
        extent: vk::Extent2D,
    ) -> Result<Texture> {
        Texture::upload(&self.upload, &mut self.allocator, name, pixels, extent)
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.gpu.wait_idle()
    }

    pub fn swapchain(&self) -> &Swapchain<G> {
        &self.swapchain
    }

    pub fn allocator_mut(&mut self) -> &mut Allocator<G> {
        &mut self.allocator
    }

    pub fn descriptors_mut(&mut self) -> &mut DescriptorAllocator<G> {
        &mut self.descriptors
    }

    pub fn frame_number(&self) -> u64 {
        self.scheduler.frame_number()
    }

    /// Idle the device and destroy everything. Later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        log::info!("Shutting down engine after {} frames", self.scheduler.frame_number());

        if let Err(e) = self.gpu.wait_idle() {
            log::error!("Failed to idle device before teardown: {:#}", e);
        }

        self.swapchain.destroy(&mut self.allocator);
        self.deletion.flush();
        self.allocator.release_all();
    }
}

impl<G: Gpu> Drop for Engine<G> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{Call, MockGpu, MockWindow};

    fn engine(frames: usize) -> (Arc<MockGpu>, MockWindow, Engine<MockGpu>) {
        let gpu = Arc::new(MockGpu::new());
        let mut window = MockWindow::new(800, 600);
        let config = EngineConfig {
            frames_in_flight: frames,
            ..Default::default()
        };
        let engine = Engine::new(gpu.clone(), &config, &mut window).unwrap();
        (gpu, window, engine)
    }

    fn is_sync_destroy(call: &Call) -> bool {
        matches!(call, Call::DestroyFence(_) | Call::DestroySemaphore(_))
    }

    #[test]
    fn teardown_idles_before_destroying_sync_objects() {
        let (gpu, mut window, mut engine) = engine(2);
        for _ in 0..6 {
            engine.tick(&mut window, &[]).unwrap();
        }
        assert_eq!(engine.frame_number(), 6);
        gpu.clear_calls();

        engine.shutdown();

        let calls = gpu.calls();
        assert_eq!(calls.first(), Some(&Call::WaitIdle));
        // 2 slots * 3 primitives + the upload fence
        assert_eq!(calls.iter().filter(|c| is_sync_destroy(c)).count(), 7);
        assert!(gpu.double_destroys().is_empty());
    }

    #[test]
    fn teardown_destroys_in_reverse_construction_order() {
        let (gpu, _window, mut engine) = engine(2);
        gpu.clear_calls();
        engine.shutdown();

        let calls = gpu.calls();
        let position = |pred: fn(&Call) -> bool| calls.iter().position(pred).unwrap();
        let swapchain = position(|c| matches!(c, Call::DestroySwapchain(_)));
        let render_pass = position(|c| matches!(c, Call::DestroyRenderPass(_)));
        let descriptor_pool = position(|c| matches!(c, Call::DestroyDescriptorPool(_)));
        let first_pool = position(|c| matches!(c, Call::DestroyCommandPool(_)));
        let last_pool = calls
            .iter()
            .rposition(|c| matches!(c, Call::DestroyCommandPool(_)))
            .unwrap();

        assert!(swapchain < render_pass);
        assert!(render_pass < descriptor_pool);
        // Upload pool goes before the frame ring's pool, which is destroyed last
        assert!(descriptor_pool < first_pool && first_pool < last_pool);
        assert_eq!(last_pool, calls.len() - 1);
    }

    #[test]
    fn shutdown_then_drop_runs_once() {
        let (gpu, mut window, mut engine) = engine(3);
        engine.tick(&mut window, &[]).unwrap();
        engine.shutdown();
        let after_shutdown = gpu.calls().len();

        engine.shutdown();
        assert!(engine.tick(&mut window, &[]).is_err());
        drop(engine);

        assert_eq!(gpu.calls().len(), after_shutdown);
        assert!(gpu.double_destroys().is_empty());
    }

    #[test]
    fn deferred_collaborators_are_destroyed_before_core_objects() {
        let (gpu, _window, mut engine) = engine(2);
        let pipeline_gpu = gpu.clone();
        let render_pass = engine.swapchain().render_pass();
        engine.defer("pipeline", move || {
            pipeline_gpu.destroy_render_pass(vk::RenderPass::null());
        });
        gpu.clear_calls();
        drop(engine);

        let calls = gpu.calls();
        let deferred = calls
            .iter()
            .position(|c| *c == Call::DestroyRenderPass(vk::RenderPass::null()))
            .unwrap();
        let descriptor_pool = calls
            .iter()
            .position(|c| matches!(c, Call::DestroyDescriptorPool(_)))
            .unwrap();
        let swapchain_pass = calls
            .iter()
            .position(|c| *c == Call::DestroyRenderPass(render_pass))
            .unwrap();
        assert!(swapchain_pass < deferred);
        assert!(deferred < descriptor_pool);
    }

    #[test]
    fn leaked_resources_are_freed_at_shutdown() {
        let (gpu, _window, mut engine) = engine(2);
        let vertex = Vertex {
            position: [0.0; 3],
            normal: [0.0; 3],
            color: [0.0; 3],
            uv: [0.0; 2],
        };
        let mesh = engine.upload_mesh("leak", &[vertex; 3], &[0, 1, 2]).unwrap();
        let handle = mesh.vertex_buffer.handle;
        std::mem::forget(mesh);

        engine.shutdown();
        assert!(gpu.calls().contains(&Call::DestroyBuffer(handle)));
        assert_eq!(engine.allocator_mut().live_allocations(), 0);
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let gpu = Arc::new(MockGpu::new());
        let mut window = MockWindow::new(800, 600);
        let config = EngineConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(Engine::new(gpu, &config, &mut window).is_err());
    }
}
