// Synchronization primitives
//
// Fences and semaphores for one frame in flight. The fence starts
// signaled so the first wait on every slot returns immediately.

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
#[derive(Clone, Copy)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                image_available: device
                    .device
                    .create_semaphore(&semaphore_info, None)
                    .context("Failed to create image-available semaphore")?,
                render_finished: device
                    .device
                    .create_semaphore(&semaphore_info, None)
                    .context("Failed to create render-finished semaphore")?,
                in_flight_fence: device
                    .device
                    .create_fence(&fence_info, None)
                    .context("Failed to create in-flight fence")?,
            })
        }
    }

    pub fn wait(&self, device: &VulkanDevice, timeout: u64) -> Result<()> {
        unsafe {
            device
                .device
                .wait_for_fences(&[self.in_flight_fence], true, timeout)
        }
        .context("Failed waiting for in-flight fence")
    }

    pub fn reset(&self, device: &VulkanDevice) -> Result<()> {
        unsafe { device.device.reset_fences(&[self.in_flight_fence]) }
            .context("Failed to reset in-flight fence")
    }

    pub fn destroy(&self, device: &VulkanDevice) {
        unsafe {
            device.device.destroy_semaphore(self.image_available, None);
            device.device.destroy_semaphore(self.render_finished, None);
            device.device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Next frame-in-flight slot
pub fn next_frame_slot(current: usize, frames_in_flight: usize) -> usize {
    (current + 1) % frames_in_flight.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_slot_wraps_at_in_flight_count() {
        let visited: Vec<usize> = std::iter::successors(Some(0), |&f| Some(next_frame_slot(f, 3)))
            .take(7)
            .collect();
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn single_frame_in_flight_stays_on_slot_zero() {
        assert_eq!(next_frame_slot(0, 1), 0);
        assert_eq!(next_frame_slot(0, 0), 0);
    }
}
