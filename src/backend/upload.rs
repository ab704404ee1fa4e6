// UploadContext - synchronous one-shot submissions outside the frame loop
//
// Owns its own command pool, command buffer and fence. `submit` idles the
// device, records the caller's commands, submits and blocks until done.
//
// Never call from inside a frame tick: it stalls the whole pipeline. Only
// one submission may be in flight; callers serialize.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::allocator::{Allocator, Buffer, Image};
use super::gpu::{Gpu, ImageDesc, Submission};
use super::sync;
use crate::deletion::DeletionQueue;

pub struct UploadContext<G: Gpu> {
    gpu: Arc<G>,
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
}

impl<G: Gpu> UploadContext<G> {
    pub fn new(gpu: Arc<G>, deletion: &mut DeletionQueue) -> Result<Self> {
        let pool = gpu.create_command_pool(vk::CommandPoolCreateFlags::empty())?;
        {
            let gpu = gpu.clone();
            deletion.push("upload command pool", move || gpu.destroy_command_pool(pool));
        }

        let command_buffer = gpu
            .allocate_command_buffers(pool, 1)?
            .into_iter()
            .next()
            .context("No upload command buffer allocated")?;

        let fence = sync::fence(&gpu, deletion, false, "upload fence".to_string())?;

        Ok(Self {
            gpu,
            pool,
            command_buffer,
            fence,
        })
    }

    /// Record `record` into the upload command buffer and run it to completion
    pub fn submit(&self, record: impl FnOnce(&G, vk::CommandBuffer)) -> Result<()> {
        self.gpu.wait_idle()?;
        self.gpu.reset_command_pool(self.pool)?;

        let cmd = self.command_buffer;
        self.gpu
            .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        record(self.gpu.as_ref(), cmd);
        self.gpu.end_command_buffer(cmd)?;

        self.gpu
            .submit(&Submission {
                command_buffer: cmd,
                wait: None,
                signal: None,
                fence: self.fence,
            })
            .context("Failed to submit upload")?;
        self.gpu
            .wait_for_fence(self.fence, u64::MAX)
            .context("Failed to wait for upload")?;
        self.gpu.reset_fence(self.fence)
    }

    /// Copy `data` into a new device-local buffer through a staging buffer
    pub fn upload_buffer(
        &self,
        allocator: &mut Allocator<G>,
        name: &str,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<Buffer> {
        let size = data.len() as vk::DeviceSize;
        let staging = allocator.create_buffer(
            &format!("{} staging", name),
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;

        let result = allocator.update(&staging, data).and_then(|()| {
            let buffer = allocator.create_device_buffer(
                name,
                size,
                usage | vk::BufferUsageFlags::TRANSFER_DST,
            )?;
            let (src, dst) = (staging.handle, buffer.handle);
            match self.submit(|gpu, cmd| gpu.cmd_copy_buffer(cmd, src, dst, size)) {
                Ok(()) => {
                    log::debug!("Uploaded buffer '{}' ({} bytes)", name, size);
                    Ok(buffer)
                }
                Err(e) => {
                    allocator.destroy_buffer(buffer);
                    Err(e)
                }
            }
        });

        allocator.destroy_buffer(staging);
        result
    }

    /// Copy tightly packed RGBA8 `pixels` into a new sampled texture
    pub fn upload_texture(
        &self,
        allocator: &mut Allocator<G>,
        name: &str,
        pixels: &[u8],
        extent: vk::Extent2D,
    ) -> Result<Image> {
        let expected = extent.width as usize * extent.height as usize * 4;
        anyhow::ensure!(
            pixels.len() == expected,
            "Texture '{}' is {}x{} but has {} bytes (expected {})",
            name,
            extent.width,
            extent.height,
            pixels.len(),
            expected
        );

        let image = allocator.create_image(name, &ImageDesc::texture(extent))?;
        let staging = match allocator.create_buffer(
            &format!("{} staging", name),
            pixels.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
        ) {
            Ok(staging) => staging,
            Err(e) => {
                allocator.destroy_image(image);
                return Err(e);
            }
        };

        let (src, dst) = (staging.handle, image.handle);
        let result = allocator.update(&staging, pixels).and_then(|()| {
            self.submit(|gpu, cmd| {
                gpu.cmd_transition_image(
                    cmd,
                    dst,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                );
                gpu.cmd_copy_buffer_to_image(cmd, src, dst, extent);
                gpu.cmd_transition_image(
                    cmd,
                    dst,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            })
        });
        allocator.destroy_buffer(staging);

        match result {
            Ok(()) => {
                log::debug!("Uploaded texture '{}' ({}x{})", name, extent.width, extent.height);
                Ok(image)
            }
            Err(e) => {
                allocator.destroy_image(image);
                Err(e)
            }
        }
    }
}
