use std::sync::Arc;

use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::eyre;

const SETS_PER_POOL: u32 = 64;

const POOL_SIZES: &[(vk::DescriptorType, u32)] = &[
    (vk::DescriptorType::UNIFORM_BUFFER, 64),
    (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 64),
    (vk::DescriptorType::STORAGE_BUFFER, 64),
    (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, 16),
    (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 128),
    (vk::DescriptorType::STORAGE_IMAGE, 32),
    (vk::DescriptorType::INPUT_ATTACHMENT, 16),
];

/// Allocates descriptor sets from a growable list of fixed-size pools.
///
/// Allocation always tries the most recently created pool; when that pool is
/// exhausted or fragmented a new pool is pushed and the allocation retried
/// once. Pools are never recycled individually -- they live as long as the
/// allocator, which lives as long as the render context.
pub struct DescriptorSetAllocator {
    pools: Vec<vk::DescriptorPool>,
    device: Arc<ash::Device>,
}

impl DescriptorSetAllocator {
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self {
            pools: Vec::new(),
            device,
        }
    }

    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        if self.pools.is_empty() {
            self.grow()?;
        }

        match self.try_allocate(layout) {
            Ok(set) => Ok(set),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                self.grow()?;
                self.try_allocate(layout)
                    .map_err(|e| eyre!("Descriptor set allocation failed after growing: {e}"))
            }
            Err(e) => Err(eyre!("Descriptor set allocation failed: {e}")),
        }
    }

    fn try_allocate(
        &self,
        layout: vk::DescriptorSetLayout,
    ) -> std::result::Result<vk::DescriptorSet, vk::Result> {
        let pool = *self.pools.last().expect("Descriptor pool list is empty");
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info)? };
        Ok(sets[0])
    }

    fn grow(&mut self) -> Result<()> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = POOL_SIZES
            .iter()
            .map(|&(ty, descriptor_count)| vk::DescriptorPoolSize {
                ty,
                descriptor_count,
            })
            .collect();

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(SETS_PER_POOL)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { self.device.create_descriptor_pool(&pool_info, None)? };
        self.pools.push(pool);
        Ok(())
    }
}

impl Drop for DescriptorSetAllocator {
    fn drop(&mut self) {
        unsafe {
            for pool in self.pools.drain(..) {
                self.device.destroy_descriptor_pool(pool, None);
            }
        }
    }
}
