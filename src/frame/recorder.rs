// Command recording - turns a draw list into one frame's command buffer
//
// Items are recorded exactly in the order supplied. There is no sorting by
// depth or material and no culling: every item given is drawn.

use anyhow::{Context, Result};
use ash::vk;
use glam::Mat4;

use crate::backend::gpu::Gpu;

/// One indexed draw, rebuilt every frame from the scene
#[derive(Debug, Clone, Copy)]
pub struct DrawItem {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    /// Pushed to the vertex stage as a 64-byte column-major matrix
    pub transform: Mat4,
}

/// Render target of a single recording
#[derive(Debug, Clone, Copy)]
pub struct RenderTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandRecorder {
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
}

impl Default for CommandRecorder {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_depth: 1.0,
        }
    }
}

impl CommandRecorder {
    pub fn new(clear_color: [f32; 4], clear_depth: f32) -> Self {
        Self {
            clear_color,
            clear_depth,
        }
    }

    /// Record `items` into `cmd`, which must already be reset
    pub fn record<G: Gpu>(
        &self,
        gpu: &G,
        cmd: vk::CommandBuffer,
        target: &RenderTarget,
        items: &[DrawItem],
    ) -> Result<()> {
        gpu.begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .context("Failed to begin frame command buffer")?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.clear_depth,
                    stencil: 0,
                },
            },
        ];
        gpu.cmd_begin_render_pass(
            cmd,
            target.render_pass,
            target.framebuffer,
            target.extent,
            &clear_values,
        );

        gpu.cmd_set_viewport(
            cmd,
            vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: target.extent.width as f32,
                height: target.extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
        );
        gpu.cmd_set_scissor(
            cmd,
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: target.extent,
            },
        );

        for item in items {
            gpu.cmd_bind_descriptor_set(cmd, item.layout, item.descriptor_set);
            gpu.cmd_bind_pipeline(cmd, item.pipeline);
            gpu.cmd_push_constants(
                cmd,
                item.layout,
                vk::ShaderStageFlags::VERTEX,
                bytemuck::bytes_of(&item.transform),
            );
            gpu.cmd_bind_vertex_buffer(cmd, item.vertex_buffer);
            gpu.cmd_bind_index_buffer(cmd, item.index_buffer);
            gpu.cmd_draw_indexed(cmd, item.index_count);
        }

        gpu.cmd_end_render_pass(cmd);
        gpu.end_command_buffer(cmd)
            .context("Failed to end frame command buffer")?;

        log::trace!("Recorded {} draws", items.len());
        Ok(())
    }
}
