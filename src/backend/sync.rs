// Synchronization primitives
//
// Fences and semaphores for GPU-CPU and GPU-GPU sync, plus the bookkeeping
// that bounds how many frames may be in flight.

use ash::vk;
use anyhow::{Context, Result};
use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder()
            .flags(vk::FenceCreateFlags::SIGNALED); // Start signaled

        unsafe {
            Ok(Self {
                image_available: device.device.create_semaphore(&semaphore_info, None)
                    .context("Failed to create image-available semaphore")?,
                render_finished: device.device.create_semaphore(&semaphore_info, None)
                    .context("Failed to create render-finished semaphore")?,
                in_flight_fence: device.device.create_fence(&fence_info, None)
                    .context("Failed to create in-flight fence")?,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Tracks which frame slot is current and which slot's fence last claimed
/// each swapchain image.
///
/// The frame counter and the image index are unrelated: the counter cycles
/// over the frame slots, the image index comes from acquire.
#[derive(Debug)]
pub struct InFlightFrames<F> {
    frame_fences: Vec<F>,
    image_owners: Vec<Option<F>>,
    current_frame: usize,
}

impl<F: Copy + PartialEq> InFlightFrames<F> {
    pub fn new(frame_fences: Vec<F>, image_count: usize) -> Self {
        assert!(!frame_fences.is_empty(), "Need at least one frame in flight");
        Self {
            frame_fences,
            image_owners: vec![None; image_count],
            current_frame: 0,
        }
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frame_fences.len()
    }

    pub fn image_count(&self) -> usize {
        self.image_owners.len()
    }

    /// Fence of the current slot; waited on before acquiring
    pub fn current_fence(&self) -> F {
        self.frame_fences[self.current_frame]
    }

    /// Hand `image_index` to the current slot.
    ///
    /// Returns the fence of the slot that previously rendered to this image
    /// if it is a different slot; the caller must wait on it so two frames
    /// never write the same image.
    pub fn claim_image(&mut self, image_index: usize) -> Option<F> {
        let fence = self.current_fence();
        let previous = self.image_owners[image_index].replace(fence);
        previous.filter(|&owner| owner != fence)
    }

    /// Move to the next slot. Called once per submitted frame.
    pub fn advance(&mut self) {
        self.current_frame = (self.current_frame + 1) % self.frame_fences.len();
    }
}
