// Descriptor pool and per-frame sets
//
// Each frame in flight gets its own set pointing at its own uniform
// buffer; all sets share the one texture.

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;

pub const UBO_BINDING: u32 = 0;
pub const SAMPLER_BINDING: u32 = 1;

/// One uniform buffer and one combined image sampler per set
pub fn pool_sizes(set_count: u32) -> [vk::DescriptorPoolSize; 2] {
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: set_count,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: set_count,
        },
    ]
}

#[derive(Clone)]
pub struct FrameDescriptors {
    pub pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
}

impl FrameDescriptors {
    pub fn new(
        device: &VulkanDevice,
        layout: vk::DescriptorSetLayout,
        set_count: u32,
    ) -> Result<Self> {
        let sizes = pool_sizes(set_count);
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&sizes)
            .max_sets(set_count);

        let pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;

        let layouts = vec![layout; set_count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = match unsafe { device.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets,
            Err(e) => {
                unsafe { device.device.destroy_descriptor_pool(pool, None) };
                return Err(e).context("Failed to allocate descriptor sets");
            }
        };

        Ok(Self { pool, sets })
    }

    pub fn set(&self, index: usize) -> Result<vk::DescriptorSet> {
        self.sets
            .get(index)
            .copied()
            .with_context(|| format!("No descriptor set for frame {}", index))
    }

    /// Point set `index` at a uniform buffer and the sampled texture
    pub fn write(
        &self,
        device: &VulkanDevice,
        index: usize,
        uniform: vk::Buffer,
        uniform_range: vk::DeviceSize,
        texture_view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Result<()> {
        let set = self.set(index)?;

        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: uniform,
            offset: 0,
            range: uniform_range,
        }];
        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view: texture_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];

        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(UBO_BINDING)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(SAMPLER_BINDING)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_info)
                .build(),
        ];

        unsafe { device.device.update_descriptor_sets(&writes, &[]) };
        Ok(())
    }

    /// Sets are freed with the pool
    pub fn destroy(&self, device: &VulkanDevice) {
        unsafe { device.device.destroy_descriptor_pool(self.pool, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_holds_one_of_each_per_set() {
        let sizes = pool_sizes(3);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 3);
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[1].descriptor_count, 3);
    }

    #[test]
    fn set_lookup_past_the_frame_count_fails() {
        let descriptors = FrameDescriptors {
            pool: vk::DescriptorPool::null(),
            sets: vec![vk::DescriptorSet::null(); 2],
        };
        assert!(descriptors.set(1).is_ok());
        assert!(descriptors.set(2).is_err());
    }
}
