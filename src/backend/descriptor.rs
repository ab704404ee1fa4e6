// Descriptor pool - one shared pool sized once at startup
//
// There is no growth: running out is a fatal configuration error. Sets are
// never freed one by one; they go away with the pool at teardown.

use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use super::gpu::Gpu;
use crate::deletion::DeletionQueue;

/// Pool capacities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSizes {
    pub max_sets: u32,
    pub combined_image_samplers: u32,
    pub uniform_buffers: u32,
}

impl Default for PoolSizes {
    fn default() -> Self {
        Self {
            max_sets: 64,
            combined_image_samplers: 64,
            uniform_buffers: 64,
        }
    }
}

pub struct DescriptorAllocator<G: Gpu> {
    gpu: Arc<G>,
    pool: vk::DescriptorPool,
    sizes: PoolSizes,
    allocated: u32,
}

impl<G: Gpu> DescriptorAllocator<G> {
    pub fn new(gpu: Arc<G>, deletion: &mut DeletionQueue, sizes: PoolSizes) -> Result<Self> {
        anyhow::ensure!(sizes.max_sets > 0, "Descriptor pool needs at least one set");

        let pool_sizes: Vec<vk::DescriptorPoolSize> = [
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, sizes.combined_image_samplers),
            (vk::DescriptorType::UNIFORM_BUFFER, sizes.uniform_buffers),
        ]
        .into_iter()
        .filter(|&(_, count)| count > 0)
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
            ty,
            descriptor_count,
        })
        .collect();

        let pool = gpu.create_descriptor_pool(sizes.max_sets, &pool_sizes)?;
        {
            let gpu = gpu.clone();
            deletion.push("descriptor pool", move || gpu.destroy_descriptor_pool(pool));
        }

        log::info!(
            "Descriptor pool: {} sets, {} samplers, {} uniform buffers",
            sizes.max_sets,
            sizes.combined_image_samplers,
            sizes.uniform_buffers
        );

        Ok(Self {
            gpu,
            pool,
            sizes,
            allocated: 0,
        })
    }

    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        match self.gpu.allocate_descriptor_set(self.pool, layout) {
            Ok(set) => {
                self.allocated += 1;
                Ok(set)
            }
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) | Err(vk::Result::ERROR_FRAGMENTED_POOL) => {
                anyhow::bail!(
                    "Descriptor pool exhausted after {} of {} sets; raise [pools] in config.toml",
                    self.allocated,
                    self.sizes.max_sets
                )
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to allocate descriptor set")),
        }
    }

    /// Point `binding` of `set` at a sampled image
    pub fn write_texture(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) {
        self.gpu.write_image_descriptor(set, binding, view, sampler);
    }

    pub fn allocated(&self) -> u32 {
        self.allocated
    }
}
