/// Mock GPU for unit tests (no device required)
///
/// Records every call in order, simulates fence state and a surface whose
/// reported size can change between queries, and flags double destruction.
///
/// Fence model: a submission marks its fence pending. Waiting on a pending
/// fence retires the submission and is logged as a blocking wait; waiting on
/// a signaled fence returns immediately. Waiting on a fence nothing will
/// signal is an error (it would hang a real device).

use anyhow::Result;
use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

use super::gpu::{Gpu, ImageDesc, MemoryLocation, Submission, SwapchainDesc};
use super::swapchain::SurfaceSize;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    WaitIdle,
    CreateSemaphore(vk::Semaphore),
    DestroySemaphore(vk::Semaphore),
    CreateFence { fence: vk::Fence, signaled: bool },
    DestroyFence(vk::Fence),
    WaitFence { fence: vk::Fence, blocked: bool },
    ResetFence(vk::Fence),
    CreateCommandPool(vk::CommandPool),
    DestroyCommandPool(vk::CommandPool),
    ResetCommandPool(vk::CommandPool),
    AllocateCommandBuffers(Vec<vk::CommandBuffer>),
    ResetCommandBuffer(vk::CommandBuffer),
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    Submit {
        command_buffer: vk::CommandBuffer,
        wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
        signal: Option<vk::Semaphore>,
        fence: vk::Fence,
    },
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: usize,
    },
    EndRenderPass,
    SetViewport(vk::Extent2D),
    SetScissor(vk::Extent2D),
    BindDescriptorSet(vk::DescriptorSet),
    BindPipeline(vk::Pipeline),
    PushConstants { layout: vk::PipelineLayout, size: usize },
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer),
    DrawIndexed(u32),
    CopyBuffer { src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize },
    CopyBufferToImage { src: vk::Buffer, dst: vk::Image },
    TransitionImage { image: vk::Image, old: vk::ImageLayout, new: vk::ImageLayout },
    SurfaceCapabilities,
    CreateSwapchain { swapchain: vk::SwapchainKHR, extent: vk::Extent2D, format: vk::Format, present_mode: vk::PresentModeKHR, min_image_count: u32 },
    DestroySwapchain(vk::SwapchainKHR),
    Acquire { swapchain: vk::SwapchainKHR, semaphore: vk::Semaphore },
    Present { swapchain: vk::SwapchainKHR, image_index: u32, wait: vk::Semaphore },
    CreateRenderPass(vk::RenderPass),
    DestroyRenderPass(vk::RenderPass),
    CreateImageView(vk::ImageView),
    DestroyImageView(vk::ImageView),
    CreateFramebuffer(vk::Framebuffer),
    DestroyFramebuffer(vk::Framebuffer),
    CreateBuffer(vk::Buffer),
    DestroyBuffer(vk::Buffer),
    CreateImage(vk::Image),
    DestroyImage(vk::Image),
    WriteMemory(usize),
    CreateDescriptorPool(vk::DescriptorPool),
    DestroyDescriptorPool(vk::DescriptorPool),
    AllocateDescriptorSet(vk::DescriptorSet),
    WriteImageDescriptor { set: vk::DescriptorSet, binding: u32 },
}

#[derive(Debug, Clone, Copy)]
struct FenceState {
    signaled: bool,
    pending: bool,
}

struct State {
    next_handle: u64,
    calls: Vec<Call>,
    fences: HashMap<vk::Fence, FenceState>,
    unretired: usize,
    max_unretired: usize,
    destroyed: HashSet<u64>,
    double_destroys: Vec<u64>,

    surface_extents: VecDeque<vk::Extent2D>,
    undefined_extent: bool,
    formats: Vec<vk::SurfaceFormatKHR>,
    image_count: u32,
    swapchain_images: HashMap<vk::SwapchainKHR, Vec<vk::Image>>,
    next_image: u32,

    acquire_calls: usize,
    acquire_script: HashMap<usize, VkResult<(u32, bool)>>,
    present_calls: usize,
    present_script: HashMap<usize, VkResult<bool>>,

    descriptor_capacity: HashMap<vk::DescriptorPool, u32>,
}

impl State {
    fn handle<H: Handle>(&mut self) -> H {
        self.next_handle += 1;
        H::from_raw(self.next_handle)
    }

    fn destroy<H: Handle>(&mut self, handle: H) {
        let raw = handle.as_raw();
        if !self.destroyed.insert(raw) {
            self.double_destroys.push(raw);
        }
    }

    fn retire(&mut self, fence: vk::Fence) {
        if let Some(state) = self.fences.get_mut(&fence) {
            if state.pending {
                state.pending = false;
                state.signaled = true;
                self.unretired -= 1;
            }
        }
    }
}

pub struct MockGpu {
    state: Mutex<State>,
}

impl MockGpu {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_handle: 0,
                calls: Vec::new(),
                fences: HashMap::new(),
                unretired: 0,
                max_unretired: 0,
                destroyed: HashSet::new(),
                double_destroys: Vec::new(),
                surface_extents: VecDeque::from([vk::Extent2D {
                    width: 800,
                    height: 600,
                }]),
                undefined_extent: false,
                formats: vec![vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                }],
                image_count: 3,
                swapchain_images: HashMap::new(),
                next_image: 0,
                acquire_calls: 0,
                acquire_script: HashMap::new(),
                present_calls: 0,
                present_script: HashMap::new(),
                descriptor_capacity: HashMap::new(),
            }),
        }
    }

    /// Surface sizes reported by successive capability queries; the last one sticks
    pub fn set_surface_extents(&self, extents: &[(u32, u32)]) {
        self.state.lock().surface_extents = extents
            .iter()
            .map(|&(width, height)| vk::Extent2D { width, height })
            .collect();
    }

    /// Report `current_extent == u32::MAX` so the window size decides
    pub fn set_undefined_extent(&self) {
        self.state.lock().undefined_extent = true;
    }

    pub fn set_formats(&self, formats: &[vk::SurfaceFormatKHR]) {
        self.state.lock().formats = formats.to_vec();
    }

    pub fn set_image_count(&self, count: u32) {
        self.state.lock().image_count = count;
    }

    /// Override the result of the `call`-th acquire (1-based)
    pub fn script_acquire(&self, call: usize, result: VkResult<(u32, bool)>) {
        self.state.lock().acquire_script.insert(call, result);
    }

    /// Override the result of the `call`-th present (1-based)
    pub fn script_present(&self, call: usize, result: VkResult<bool>) {
        self.state.lock().present_script.insert(call, result);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Highest number of submissions ever outstanding at once
    pub fn max_unretired(&self) -> usize {
        self.state.lock().max_unretired
    }

    pub fn double_destroys(&self) -> Vec<u64> {
        self.state.lock().double_destroys.clone()
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

impl Gpu for MockGpu {
    type Memory = Vec<u8>;

    fn wait_idle(&self) -> Result<()> {
        let mut state = self.state.lock();
        let pending: Vec<_> = state
            .fences
            .iter()
            .filter(|(_, f)| f.pending)
            .map(|(&fence, _)| fence)
            .collect();
        for fence in pending {
            state.retire(fence);
        }
        state.calls.push(Call::WaitIdle);
        Ok(())
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let mut state = self.state.lock();
        let semaphore = state.handle();
        state.calls.push(Call::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        state.destroy(semaphore);
        state.calls.push(Call::DestroySemaphore(semaphore));
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let mut state = self.state.lock();
        let fence = state.handle();
        state.fences.insert(
            fence,
            FenceState {
                signaled,
                pending: false,
            },
        );
        state.calls.push(Call::CreateFence { fence, signaled });
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        state.destroy(fence);
        state.calls.push(Call::DestroyFence(fence));
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> Result<()> {
        let mut state = self.state.lock();
        let fence_state = *state
            .fences
            .get(&fence)
            .ok_or_else(|| anyhow::anyhow!("Unknown fence {:?}", fence))?;

        let blocked = if fence_state.signaled {
            false
        } else if fence_state.pending {
            state.retire(fence);
            true
        } else {
            anyhow::bail!("Fence {:?} is unsignaled with no submission pending", fence);
        };

        state.calls.push(Call::WaitFence { fence, blocked });
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        let mut state = self.state.lock();
        let fence_state = state
            .fences
            .get_mut(&fence)
            .ok_or_else(|| anyhow::anyhow!("Unknown fence {:?}", fence))?;
        anyhow::ensure!(!fence_state.pending, "Reset of fence {:?} still in flight", fence);
        fence_state.signaled = false;
        state.calls.push(Call::ResetFence(fence));
        Ok(())
    }

    fn create_command_pool(&self, _flags: vk::CommandPoolCreateFlags) -> Result<vk::CommandPool> {
        let mut state = self.state.lock();
        let pool = state.handle();
        state.calls.push(Call::CreateCommandPool(pool));
        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.lock();
        state.destroy(pool);
        state.calls.push(Call::DestroyCommandPool(pool));
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> Result<()> {
        self.record(Call::ResetCommandPool(pool));
        Ok(())
    }

    fn allocate_command_buffers(
        &self,
        _pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        let buffers: Vec<vk::CommandBuffer> = (0..count).map(|_| state.handle()).collect();
        state.calls.push(Call::AllocateCommandBuffers(buffers.clone()));
        Ok(buffers)
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.record(Call::ResetCommandBuffer(cmd));
        Ok(())
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _usage: vk::CommandBufferUsageFlags,
    ) -> Result<()> {
        self.record(Call::BeginCommandBuffer(cmd));
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.record(Call::EndCommandBuffer(cmd));
        Ok(())
    }

    fn submit(&self, submission: &Submission) -> Result<()> {
        let mut state = self.state.lock();
        if submission.fence != vk::Fence::null() {
            let fence = state
                .fences
                .get_mut(&submission.fence)
                .ok_or_else(|| anyhow::anyhow!("Unknown fence {:?}", submission.fence))?;
            anyhow::ensure!(
                !fence.signaled && !fence.pending,
                "Submission with fence {:?} that was not reset",
                submission.fence
            );
            fence.pending = true;
            state.unretired += 1;
            state.max_unretired = state.max_unretired.max(state.unretired);
        }
        state.calls.push(Call::Submit {
            command_buffer: submission.command_buffer,
            wait: submission.wait,
            signal: submission.signal,
            fence: submission.fence,
        });
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        _cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        self.record(Call::BeginRenderPass {
            render_pass,
            framebuffer,
            extent,
            clear_values: clear_values.len(),
        });
    }

    fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {
        self.record(Call::EndRenderPass);
    }

    fn cmd_set_viewport(&self, _cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        self.record(Call::SetViewport(vk::Extent2D {
            width: viewport.width as u32,
            height: viewport.height as u32,
        }));
    }

    fn cmd_set_scissor(&self, _cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.record(Call::SetScissor(scissor.extent));
    }

    fn cmd_bind_descriptor_set(
        &self,
        _cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        self.record(Call::BindDescriptorSet(set));
    }

    fn cmd_bind_pipeline(&self, _cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.record(Call::BindPipeline(pipeline));
    }

    fn cmd_push_constants(
        &self,
        _cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        data: &[u8],
    ) {
        self.record(Call::PushConstants {
            layout,
            size: data.len(),
        });
    }

    fn cmd_bind_vertex_buffer(&self, _cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        self.record(Call::BindVertexBuffer(buffer));
    }

    fn cmd_bind_index_buffer(&self, _cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        self.record(Call::BindIndexBuffer(buffer));
    }

    fn cmd_draw_indexed(&self, _cmd: vk::CommandBuffer, index_count: u32) {
        self.record(Call::DrawIndexed(index_count));
    }

    fn cmd_copy_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        self.record(Call::CopyBuffer { src, dst, size });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        _cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        _extent: vk::Extent2D,
    ) {
        self.record(Call::CopyBufferToImage { src, dst });
    }

    fn cmd_transition_image(
        &self,
        _cmd: vk::CommandBuffer,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        self.record(Call::TransitionImage {
            image,
            old: old_layout,
            new: new_layout,
        });
    }

    fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        let mut state = self.state.lock();
        let extent = if state.surface_extents.len() > 1 {
            state.surface_extents.pop_front()
        } else {
            state.surface_extents.front().copied()
        }
        .unwrap_or_default();

        let current_extent = if state.undefined_extent {
            vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            }
        } else {
            extent
        };

        state.calls.push(Call::SurfaceCapabilities);
        Ok(vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent,
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        })
    }

    fn surface_formats(&self) -> Result<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.state.lock().formats.clone())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR> {
        let mut state = self.state.lock();
        let swapchain = state.handle();
        let images = (0..state.image_count).map(|_| state.handle()).collect();
        state.swapchain_images.insert(swapchain, images);
        state.next_image = 0;
        state.calls.push(Call::CreateSwapchain {
            swapchain,
            extent: desc.extent,
            format: desc.format.format,
            present_mode: desc.present_mode,
            min_image_count: desc.min_image_count,
        });
        Ok(swapchain)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        state.destroy(swapchain);
        state.swapchain_images.remove(&swapchain);
        state.calls.push(Call::DestroySwapchain(swapchain));
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        self.state
            .lock()
            .swapchain_images
            .get(&swapchain)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Unknown swapchain {:?}", swapchain))
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state.lock();
        state.acquire_calls += 1;
        state.calls.push(Call::Acquire {
            swapchain,
            semaphore: signal,
        });

        let call = state.acquire_calls;
        if let Some(result) = state.acquire_script.remove(&call) {
            return result;
        }

        let index = state.next_image % state.image_count;
        state.next_image += 1;
        Ok((index, false))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut state = self.state.lock();
        state.present_calls += 1;
        state.calls.push(Call::Present {
            swapchain,
            image_index,
            wait,
        });

        let call = state.present_calls;
        state.present_script.remove(&call).unwrap_or(Ok(false))
    }

    fn create_render_pass(&self, _color_format: vk::Format) -> Result<vk::RenderPass> {
        let mut state = self.state.lock();
        let render_pass = state.handle();
        state.calls.push(Call::CreateRenderPass(render_pass));
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut state = self.state.lock();
        state.destroy(render_pass);
        state.calls.push(Call::DestroyRenderPass(render_pass));
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        let mut state = self.state.lock();
        let view = state.handle();
        state.calls.push(Call::CreateImageView(view));
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state.lock();
        state.destroy(view);
        state.calls.push(Call::DestroyImageView(view));
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        let mut state = self.state.lock();
        let framebuffer = state.handle();
        state.calls.push(Call::CreateFramebuffer(framebuffer));
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut state = self.state.lock();
        state.destroy(framebuffer);
        state.calls.push(Call::DestroyFramebuffer(framebuffer));
    }

    fn create_buffer(
        &self,
        _name: &str,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
        _location: MemoryLocation,
    ) -> Result<(vk::Buffer, Vec<u8>)> {
        let mut state = self.state.lock();
        let buffer = state.handle();
        state.calls.push(Call::CreateBuffer(buffer));
        Ok((buffer, vec![0; size as usize]))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, _memory: Vec<u8>) {
        let mut state = self.state.lock();
        state.destroy(buffer);
        state.calls.push(Call::DestroyBuffer(buffer));
    }

    fn create_image(&self, _name: &str, _desc: &ImageDesc) -> Result<(vk::Image, Vec<u8>)> {
        let mut state = self.state.lock();
        let image = state.handle();
        state.calls.push(Call::CreateImage(image));
        Ok((image, Vec::new()))
    }

    fn destroy_image(&self, image: vk::Image, _memory: Vec<u8>) {
        let mut state = self.state.lock();
        state.destroy(image);
        state.calls.push(Call::DestroyImage(image));
    }

    fn write_memory(&self, memory: &mut Vec<u8>, data: &[u8]) -> Result<()> {
        anyhow::ensure!(data.len() <= memory.len(), "Write past end of mock allocation");
        memory[..data.len()].copy_from_slice(data);
        self.record(Call::WriteMemory(data.len()));
        Ok(())
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool> {
        let mut state = self.state.lock();
        let pool = state.handle();
        state.descriptor_capacity.insert(pool, max_sets);
        state.calls.push(Call::CreateDescriptorPool(pool));
        Ok(pool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state.lock();
        state.destroy(pool);
        state.calls.push(Call::DestroyDescriptorPool(pool));
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet> {
        let mut state = self.state.lock();
        match state.descriptor_capacity.get_mut(&pool) {
            Some(remaining) if *remaining > 0 => *remaining -= 1,
            _ => return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY),
        }
        let set = state.handle();
        state.calls.push(Call::AllocateDescriptorSet(set));
        Ok(set)
    }

    fn write_image_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        _view: vk::ImageView,
        _sampler: vk::Sampler,
    ) {
        self.record(Call::WriteImageDescriptor { set, binding });
    }
}

/// Window stand-in: a fixed drawable size, optionally changing on each event wait
pub struct MockWindow {
    pub size: vk::Extent2D,
    pub waits: usize,
    pending: VecDeque<vk::Extent2D>,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: vk::Extent2D { width, height },
            waits: 0,
            pending: VecDeque::new(),
        }
    }

    /// Sizes the window takes on after each successive `wait_events`
    pub fn then_sizes(mut self, sizes: &[(u32, u32)]) -> Self {
        self.pending = sizes
            .iter()
            .map(|&(width, height)| vk::Extent2D { width, height })
            .collect();
        self
    }
}

impl SurfaceSize for MockWindow {
    fn drawable_size(&mut self) -> vk::Extent2D {
        self.size
    }

    fn wait_events(&mut self) {
        self.waits += 1;
        if let Some(size) = self.pending.pop_front() {
            self.size = size;
        }
    }
}
