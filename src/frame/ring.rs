// FrameRing - N frame slots used round-robin
//
// A slot's command buffer may only be reset after its fence has signaled;
// the scheduler enforces that by waiting before every reuse.

use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use crate::backend::gpu::Gpu;
use crate::backend::sync::FrameSync;
use crate::deletion::DeletionQueue;

/// Per-frame command buffer and sync primitives
#[derive(Debug, Clone, Copy)]
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub sync: FrameSync,
}

pub struct FrameRing {
    slots: Vec<FrameSlot>,
    current: usize,
}

impl FrameRing {
    /// Allocate `frames_in_flight` slots from one resettable command pool
    pub fn new<G: Gpu>(
        gpu: &Arc<G>,
        deletion: &mut DeletionQueue,
        frames_in_flight: usize,
    ) -> Result<Self> {
        anyhow::ensure!(frames_in_flight > 0, "At least one frame in flight is required");

        let pool = gpu.create_command_pool(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)?;
        {
            let gpu = gpu.clone();
            deletion.push("frame command pool", move || gpu.destroy_command_pool(pool));
        }

        let command_buffers = gpu.allocate_command_buffers(pool, frames_in_flight as u32)?;
        let slots = command_buffers
            .into_iter()
            .enumerate()
            .map(|(index, command_buffer)| {
                Ok(FrameSlot {
                    command_buffer,
                    sync: FrameSync::new(gpu, deletion, index)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        log::info!("Frame ring created with {} frames in flight", slots.len());
        Ok(Self { slots, current: 0 })
    }

    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }
}
