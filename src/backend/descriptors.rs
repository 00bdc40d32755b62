// Descriptor set layouts, pools and writes
//
// Builders collect plain data first and only touch the device in build(),
// so layouts can be described before the device exists.

use anyhow::{Context, Result};
use ash::vk;
use std::collections::BTreeMap;
use std::sync::Arc;
use super::VulkanDevice;

#[derive(Debug, Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: BTreeMap<u32, vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    /// If `binding` was already added.
    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
    ) -> Self {
        assert!(!self.bindings.contains_key(&binding), "Binding {} already in use", binding);
        self.bindings.insert(
            binding,
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    pub fn build(self, device: Arc<VulkanDevice>) -> Result<DescriptorSetLayout> {
        let bindings: Vec<_> = self.bindings.values().copied().collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

        let layout = unsafe { device.device.create_descriptor_set_layout(&create_info, None) }
            .context("Failed to create descriptor set layout")?;

        Ok(DescriptorSetLayout {
            layout,
            bindings: self.bindings,
            device,
        })
    }
}

pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    bindings: BTreeMap<u32, vk::DescriptorSetLayoutBinding>,
    device: Arc<VulkanDevice>,
}

impl DescriptorSetLayout {
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn binding(&self, binding: u32) -> Option<&vk::DescriptorSetLayoutBinding> {
        self.bindings.get(&binding)
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

#[derive(Debug)]
pub struct DescriptorPoolBuilder {
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    max_sets: u32,
}

impl Default for DescriptorPoolBuilder {
    fn default() -> Self {
        Self {
            pool_sizes: Vec::new(),
            max_sets: 1000,
        }
    }
}

impl DescriptorPoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pool_size(mut self, descriptor_type: vk::DescriptorType, count: u32) -> Self {
        self.pool_sizes.push(vk::DescriptorPoolSize {
            ty: descriptor_type,
            descriptor_count: count,
        });
        self
    }

    pub fn max_sets(mut self, count: u32) -> Self {
        self.max_sets = count;
        self
    }

    pub fn build(self, device: Arc<VulkanDevice>) -> Result<DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&self.pool_sizes)
            .max_sets(self.max_sets);

        let pool = unsafe { device.device.create_descriptor_pool(&create_info, None) }
            .context("Failed to create descriptor pool")?;

        Ok(DescriptorPool { pool, device })
    }
}

pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    device: Arc<VulkanDevice>,
}

impl DescriptorPool {
    pub fn allocate_descriptor(&self, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor set")?;
        Ok(sets[0])
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Collects buffer writes against a layout, then allocates and fills a set
pub struct DescriptorWriter<'a> {
    layout: &'a DescriptorSetLayout,
    pool: &'a DescriptorPool,
    buffer_writes: Vec<(u32, vk::DescriptorType, vk::DescriptorBufferInfo)>,
}

impl<'a> DescriptorWriter<'a> {
    pub fn new(layout: &'a DescriptorSetLayout, pool: &'a DescriptorPool) -> Self {
        Self {
            layout,
            pool,
            buffer_writes: Vec::new(),
        }
    }

    /// # Panics
    /// If the layout has no such binding, or the binding holds more than one
    /// descriptor.
    pub fn write_buffer(mut self, binding: u32, buffer_info: vk::DescriptorBufferInfo) -> Self {
        let description = self
            .layout
            .binding(binding)
            .unwrap_or_else(|| panic!("Layout does not contain binding {}", binding));
        assert_eq!(
            description.descriptor_count, 1,
            "Binding single descriptor info, but binding expects multiple"
        );

        self.buffer_writes
            .push((binding, description.descriptor_type, buffer_info));
        self
    }

    pub fn build(self) -> Result<vk::DescriptorSet> {
        let set = self.pool.allocate_descriptor(self.layout.handle())?;
        self.overwrite(set);
        Ok(set)
    }

    pub fn overwrite(&self, set: vk::DescriptorSet) {
        let infos: Vec<[vk::DescriptorBufferInfo; 1]> =
            self.buffer_writes.iter().map(|&(_, _, info)| [info]).collect();

        let writes: Vec<vk::WriteDescriptorSet> = self
            .buffer_writes
            .iter()
            .zip(&infos)
            .map(|(&(binding, descriptor_type, _), info)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(binding)
                    .descriptor_type(descriptor_type)
                    .buffer_info(info)
                    .build()
            })
            .collect();

        unsafe {
            self.pool.device.device.update_descriptor_sets(&writes, &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_builder_keeps_bindings_in_order() {
        let builder = DescriptorSetLayoutBuilder::new()
            .add_binding(2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT, 1)
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::ALL_GRAPHICS, 1);

        let bindings: Vec<_> = builder.bindings.values().map(|b| b.binding).collect();
        assert_eq!(bindings, vec![0, 2]);
        assert_eq!(
            builder.bindings[&0].descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER
        );
    }

    #[test]
    #[should_panic(expected = "already in use")]
    fn duplicate_binding_panics() {
        DescriptorSetLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX, 1)
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX, 1);
    }

    #[test]
    fn pool_builder_defaults_and_sizes() {
        let builder = DescriptorPoolBuilder::new()
            .max_sets(2)
            .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, 2);

        assert_eq!(builder.max_sets, 2);
        assert_eq!(builder.pool_sizes.len(), 1);
        assert_eq!(builder.pool_sizes[0].descriptor_count, 2);
        assert_eq!(DescriptorPoolBuilder::new().max_sets, 1000);
    }
}
