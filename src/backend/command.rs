// Command pools and buffers
//
// One pool on the graphics family. Per-frame buffers are reset
// individually; uploads go through short-lived one-time buffers.

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;

#[derive(Clone, Copy)]
pub struct CommandPool {
    pub pool: vk::CommandPool,
}

impl CommandPool {
    pub fn new(device: &VulkanDevice, queue_family: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.device.create_command_pool(&create_info, None) }
            .context("Failed to create command pool")?;

        Ok(Self { pool })
    }

    pub fn allocate(&self, device: &VulkanDevice, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")
    }

    /// Record with `record`, submit to the graphics queue and block until done
    pub fn one_time_submit<F>(&self, device: &VulkanDevice, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        let cmd = self
            .allocate(device, 1)?
            .into_iter()
            .next()
            .context("Driver returned no command buffer")?;

        let result = Self::record_and_wait(device, cmd, record);

        unsafe { device.device.free_command_buffers(self.pool, &[cmd]) };
        result
    }

    fn record_and_wait<F>(device: &VulkanDevice, cmd: vk::CommandBuffer, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe { device.device.begin_command_buffer(cmd, &begin_info) }
            .context("Failed to begin one-time command buffer")?;

        record(cmd)?;

        unsafe { device.device.end_command_buffer(cmd) }
            .context("Failed to end one-time command buffer")?;

        let command_buffers = [cmd];
        let submit = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .build();

        unsafe {
            device
                .device
                .queue_submit(device.graphics_queue, &[submit], vk::Fence::null())
                .context("Failed to submit one-time command buffer")?;
            device
                .device
                .queue_wait_idle(device.graphics_queue)
                .context("Failed waiting for one-time command buffer")?;
        }

        Ok(())
    }

    pub fn destroy(&self, device: &VulkanDevice) {
        unsafe { device.device.destroy_command_pool(self.pool, None) };
    }
}
