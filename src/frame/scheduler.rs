// FrameScheduler - drives one frame per tick
//
// tick():
//   1. wait the current slot's fence (the only CPU backpressure)
//   2. acquire an image, signaling the slot's image_available semaphore
//   3. reset + record the slot's command buffer
//   4. reset the fence, submit (wait image_available @ color output,
//      signal render_finished, fence)
//   5. present, waiting on render_finished
//   6. recreate the swapchain if acquire/present asked for it or a resize
//      was requested
//   7. advance to the next slot
//
// OutOfDate from acquire rebuilds immediately and re-acquires; nothing was
// signaled, so the same semaphore is reused.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::recorder::{CommandRecorder, DrawItem, RenderTarget};
use super::ring::FrameRing;
use crate::backend::allocator::Allocator;
use crate::backend::gpu::{Gpu, Submission};
use crate::backend::swapchain::{Acquire, SurfaceSize, Swapchain};

/// Consecutive rebuilds tolerated inside one tick while acquire keeps failing
pub const MAX_RECREATE_ATTEMPTS: u32 = 3;

/// Set from the window's resize callback, consumed by the next tick
#[derive(Debug, Clone, Default)]
pub struct ResizeFlag(Arc<AtomicBool>);

impl ResizeFlag {
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clear the flag, returning whether it was set
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What a completed tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub slot: usize,
    pub image_index: u32,
    /// The swapchain was rebuilt at least once during this tick
    pub recreated: bool,
}

pub struct FrameScheduler<G: Gpu> {
    gpu: Arc<G>,
    ring: FrameRing,
    recorder: CommandRecorder,
    resize: ResizeFlag,
    frame_number: u64,
}

impl<G: Gpu> FrameScheduler<G> {
    pub fn new(gpu: Arc<G>, ring: FrameRing, recorder: CommandRecorder) -> Self {
        Self {
            gpu,
            ring,
            recorder,
            resize: ResizeFlag::default(),
            frame_number: 0,
        }
    }

    /// Handle for the windowing layer to request a rebuild
    pub fn resize_flag(&self) -> ResizeFlag {
        self.resize.clone()
    }

    /// Frames submitted so far
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Render and present one frame of `items`.
    ///
    /// Every `Err` is fatal. Swapchain invalidation is handled here and only
    /// shows up as `FrameReport::recreated`.
    pub fn tick(
        &mut self,
        swapchain: &mut Swapchain<G>,
        allocator: &mut Allocator<G>,
        surface: &mut dyn SurfaceSize,
        items: &[DrawItem],
    ) -> Result<FrameReport> {
        let slot_index = self.ring.current_index();
        let slot = *self.ring.current();
        let fence = slot.sync.in_flight_fence;

        self.gpu
            .wait_for_fence(fence, u64::MAX)
            .context("Failed to wait for frame fence")?;

        let mut recreated = false;
        let mut attempts = 0;
        let (image_index, suboptimal) = loop {
            match swapchain.acquire_next(slot.sync.image_available)? {
                Acquire::Ready(index) => break (index, false),
                Acquire::Suboptimal(index) => break (index, true),
                Acquire::OutOfDate => {
                    if attempts == MAX_RECREATE_ATTEMPTS {
                        anyhow::bail!(
                            "Swapchain still out of date after {} recreations",
                            attempts
                        );
                    }
                    attempts += 1;
                    log::debug!("Acquire reported out of date, recreating swapchain");
                    swapchain.recreate(allocator, surface)?;
                    // The rebuild already picked up any pending resize
                    self.resize.take();
                    recreated = true;
                }
            }
        };

        let target = RenderTarget {
            render_pass: swapchain.render_pass(),
            framebuffer: swapchain
                .framebuffer(image_index)
                .with_context(|| format!("Acquired image index {} out of range", image_index))?,
            extent: swapchain.extent(),
        };

        self.gpu.reset_command_buffer(slot.command_buffer)?;
        self.recorder
            .record(self.gpu.as_ref(), slot.command_buffer, &target, items)?;

        self.gpu.reset_fence(fence)?;
        self.gpu
            .submit(&Submission {
                command_buffer: slot.command_buffer,
                wait: Some((
                    slot.sync.image_available,
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                )),
                signal: Some(slot.sync.render_finished),
                fence,
            })
            .context("Failed to submit frame")?;

        let status = swapchain.present(image_index, slot.sync.render_finished)?;

        let resize_requested = self.resize.take();
        if suboptimal || status.needs_recreate() || resize_requested {
            log::debug!(
                "Recreating swapchain (suboptimal: {}, present: {:?}, resize: {})",
                suboptimal,
                status,
                resize_requested
            );
            swapchain.recreate(allocator, surface)?;
            recreated = true;
        }

        log::trace!(
            "Frame {} presented: slot {} image {}",
            self.frame_number,
            slot_index,
            image_index
        );
        self.frame_number += 1;
        self.ring.advance();

        Ok(FrameReport {
            slot: slot_index,
            image_index,
            recreated,
        })
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
