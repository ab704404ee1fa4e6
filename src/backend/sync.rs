// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync.
// Destruction is registered with the DeletionQueue at creation.

use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use super::gpu::Gpu;
use crate::deletion::DeletionQueue;

/// Frame synchronization - one per frame in flight
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    /// Signaled by acquire, waited on at color-attachment output
    pub image_available: vk::Semaphore,
    /// Signaled by the frame's submission, waited on by present
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    /// The fence starts signaled so the first wait on a fresh slot returns at once
    pub fn new<G: Gpu>(gpu: &Arc<G>, deletion: &mut DeletionQueue, index: usize) -> Result<Self> {
        let image_available = semaphore(gpu, deletion, format!("frame {} image_available", index))?;
        let render_finished = semaphore(gpu, deletion, format!("frame {} render_finished", index))?;
        let in_flight_fence = fence(gpu, deletion, true, format!("frame {} in_flight", index))?;

        Ok(Self {
            image_available,
            render_finished,
            in_flight_fence,
        })
    }
}

pub fn semaphore<G: Gpu>(
    gpu: &Arc<G>,
    deletion: &mut DeletionQueue,
    label: String,
) -> Result<vk::Semaphore> {
    let semaphore = gpu.create_semaphore()?;
    let gpu = gpu.clone();
    deletion.push(label, move || gpu.destroy_semaphore(semaphore));
    Ok(semaphore)
}

pub fn fence<G: Gpu>(
    gpu: &Arc<G>,
    deletion: &mut DeletionQueue,
    signaled: bool,
    label: String,
) -> Result<vk::Fence> {
    let fence = gpu.create_fence(signaled)?;
    let gpu = gpu.clone();
    deletion.push(label, move || gpu.destroy_fence(fence));
    Ok(fence)
}
