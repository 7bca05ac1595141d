// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use prism_render::{BindingKind, BindingTable, ShaderStages};

use crate::error::{Error, Result, VkContext};

pub fn descriptor_type(kind: BindingKind) -> vk::DescriptorType {
    match kind {
        BindingKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        BindingKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

pub fn stage_flags(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    flags
}

pub fn layout_bindings(table: &BindingTable) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
    table
        .bindings()
        .iter()
        .map(|b| vk::DescriptorSetLayoutBinding {
            binding: b.index,
            descriptor_type: descriptor_type(b.kind),
            descriptor_count: b.count,
            stage_flags: stage_flags(b.stages),
            ..Default::default()
        })
        .collect()
}

pub fn pool_sizes(table: &BindingTable, sets: u32) -> Vec<vk::DescriptorPoolSize> {
    table
        .pool_sizes(sets)
        .into_iter()
        .map(|(kind, descriptor_count)| vk::DescriptorPoolSize {
            ty: descriptor_type(kind),
            descriptor_count,
        })
        .collect()
}

/// One layout, one pool and one descriptor set per frame slot.
pub struct DescriptorRegistry {
    pub table: BindingTable,
    pub layout: vk::DescriptorSetLayout,
    pub pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
}

impl DescriptorRegistry {
    pub unsafe fn new(device: &ash::Device, table: BindingTable, frames: u32) -> Result<Self> {
        let bindings = layout_bindings(&table);
        let layout_ci = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: bindings.len() as u32,
            p_bindings: bindings.as_ptr(),
            ..Default::default()
        };
        let layout = device
            .create_descriptor_set_layout(&layout_ci, None)
            .context("create_descriptor_set_layout")?;

        let mut registry = Self {
            table,
            layout,
            pool: vk::DescriptorPool::null(),
            sets: Vec::new(),
        };
        if let Err(e) = registry.allocate(device, frames) {
            registry.destroy(device);
            return Err(e);
        }
        Ok(registry)
    }

    unsafe fn allocate(&mut self, device: &ash::Device, frames: u32) -> Result<()> {
        let sizes = pool_sizes(&self.table, frames);
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: frames,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        self.pool = device
            .create_descriptor_pool(&pool_ci, None)
            .context("create_descriptor_pool")?;

        let layouts = vec![self.layout; frames as usize];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.pool,
            descriptor_set_count: frames,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        self.sets = device
            .allocate_descriptor_sets(&alloc)
            .context("allocate_descriptor_sets")?;
        Ok(())
    }

    pub fn set(&self, slot: usize) -> vk::DescriptorSet {
        self.sets.get(slot).copied().unwrap_or_default()
    }

    fn binding_of(&self, kind: BindingKind) -> Result<u32> {
        self.table
            .find(kind)
            .map(|b| b.index)
            .ok_or(Error::Misuse(prism_render::FrameMisuse::UnknownHandle(
                "descriptor binding",
            )))
    }

    /// One buffer per set, `buffers[i]` into `sets[i]`.
    pub unsafe fn write_uniforms(
        &self,
        device: &ash::Device,
        buffers: &[vk::Buffer],
        range: vk::DeviceSize,
    ) -> Result<()> {
        let binding = self.binding_of(BindingKind::UniformBuffer)?;
        let infos: Vec<vk::DescriptorBufferInfo> = buffers
            .iter()
            .map(|&buffer| vk::DescriptorBufferInfo {
                buffer,
                offset: 0,
                range,
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet> = self
            .sets
            .iter()
            .zip(&infos)
            .map(|(&dst_set, info)| vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set,
                dst_binding: binding,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: info,
                ..Default::default()
            })
            .collect();
        device.update_descriptor_sets(&writes, &[]);
        Ok(())
    }

    /// Rewrites the whole sampler array in every set. The caller makes sure
    /// no submitted frame still reads the sets.
    pub unsafe fn write_textures(
        &self,
        device: &ash::Device,
        images: &[vk::DescriptorImageInfo],
    ) -> Result<()> {
        let binding = self.binding_of(BindingKind::CombinedImageSampler)?;
        let writes: Vec<vk::WriteDescriptorSet> = self
            .sets
            .iter()
            .map(|&dst_set| vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set,
                dst_binding: binding,
                dst_array_element: 0,
                descriptor_count: images.len() as u32,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                p_image_info: images.as_ptr(),
                ..Default::default()
            })
            .collect();
        device.update_descriptor_sets(&writes, &[]);
        Ok(())
    }

    // Sets are freed with the pool.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_descriptor_pool(self.pool, None);
        device.destroy_descriptor_set_layout(self.layout, None);
        self.pool = vk::DescriptorPool::null();
        self.layout = vk::DescriptorSetLayout::null();
        self.sets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard_table() -> BindingTable {
        let mut table = BindingTable::new(16);
        table.register(BindingKind::UniformBuffer, ShaderStages::VERTEX);
        table.register(BindingKind::CombinedImageSampler, ShaderStages::FRAGMENT);
        table
    }

    #[test]
    fn layout_follows_registration_order() {
        let bindings = layout_bindings(&standard_table());
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[0].descriptor_count, 1);
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(
            bindings[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(bindings[1].descriptor_count, 16);
        assert_eq!(bindings[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn pool_scales_with_frame_count() {
        let sizes = pool_sizes(&standard_table(), 2);
        let count = |ty| {
            sizes
                .iter()
                .filter(|s| s.ty == ty)
                .map(|s| s.descriptor_count)
                .sum::<u32>()
        };
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER), 2);
        assert_eq!(count(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), 32);
    }

    #[test]
    fn stage_mapping() {
        assert_eq!(
            stage_flags(ShaderStages::VERTEX | ShaderStages::FRAGMENT),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert!(stage_flags(ShaderStages::empty()).is_empty());
    }
}
