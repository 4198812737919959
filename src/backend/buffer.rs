// Buffers for vertex, index, staging and uniform data
//
// Memory comes from gpu-allocator. Host-visible buffers stay mapped for
// their whole lifetime, so writes are plain slice copies. Device-local
// buffers are filled from staging buffers inside an upload command.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::VulkanDevice;

pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Allocation,
}

impl Buffer {
    pub fn new(
        device: &VulkanDevice,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer '{}'", name))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device
            .allocator()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .with_context(|| format!("Failed to allocate memory for buffer '{}'", name));

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };

        if let Err(e) = bound {
            unsafe { device.device.destroy_buffer(buffer, None) };
            let _ = device.allocator().free(allocation);
            return Err(e).with_context(|| format!("Failed to bind memory for buffer '{}'", name));
        }

        Ok(Self {
            buffer,
            size,
            allocation,
        })
    }

    /// Host-visible transfer source holding `bytes`
    pub fn new_staging(device: &VulkanDevice, name: &str, bytes: &[u8]) -> Result<Self> {
        let mut staging = Self::new(
            device,
            name,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;

        if let Err(e) = staging.write_bytes(bytes) {
            staging.destroy(device);
            return Err(e);
        }

        Ok(staging)
    }

    /// Copy into a host-visible buffer at offset 0
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let mapped = self
            .allocation
            .mapped_slice_mut()
            .context("Buffer memory is not host visible")?;

        if bytes.len() > mapped.len() {
            anyhow::bail!(
                "Write of {} bytes overflows buffer of {} bytes",
                bytes.len(),
                mapped.len()
            );
        }

        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn write<T: bytemuck::Pod>(&mut self, data: &[T]) -> Result<()> {
        self.write_bytes(bytemuck::cast_slice(data))
    }

    pub fn destroy(self, device: &VulkanDevice) {
        unsafe { device.device.destroy_buffer(self.buffer, None) };
        if let Err(e) = device.allocator().free(self.allocation) {
            log::error!("Failed to free buffer memory: {}", e);
        }
    }
}
