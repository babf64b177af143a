use std::collections::HashMap;

use ash::vk;
use color_eyre::Result;

use crate::renderer::internals::reflection::{DescriptorKind, ShaderReflection};

/// One binding slot inside a [`SetLayout`], in layout order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutBinding {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub stages: vk::ShaderStageFlags,
}

/// Bindings of one descriptor set, ordered ascending by binding index.
///
/// The ordering is load-bearing: descriptor-write construction and
/// dynamic-offset indexing both walk it, and it must agree with the order in
/// which the driver consumes dynamic offsets at bind time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetLayout {
    pub set: u32,
    pub bindings: Vec<LayoutBinding>,
}

/// Group merged reflection data into per-set layouts.
///
/// Sets are returned ascending by set index with gaps filled by empty
/// layouts, so the pipeline layout is dense and a single bind call starting
/// at set 0 covers everything.
pub fn build_set_layouts(reflection: &ShaderReflection) -> Vec<SetLayout> {
    let mut by_set: HashMap<u32, Vec<LayoutBinding>> = HashMap::new();

    for buffer in reflection.buffers.values() {
        by_set.entry(buffer.set).or_default().push(LayoutBinding {
            binding: buffer.binding,
            kind: buffer.kind,
            stages: buffer.stages,
        });
    }
    for image in reflection.images.values() {
        by_set.entry(image.set).or_default().push(LayoutBinding {
            binding: image.binding,
            kind: image.kind,
            stages: image.stages,
        });
    }

    let Some(max_set) = by_set.keys().copied().max() else {
        return Vec::new();
    };

    (0..=max_set)
        .map(|set| {
            let mut bindings = by_set.remove(&set).unwrap_or_default();
            bindings.sort_by_key(|b| b.binding);
            SetLayout { set, bindings }
        })
        .collect()
}

/// Assign dense dynamic-offset ordinals 0..K-1 by walking sets ascending and
/// bindings ascending within each set.
///
/// This is the single source of truth for ordinal assignment: layout
/// construction and material construction both call it, and the resulting
/// order matches the driver's implicit ordering of dynamic offsets at bind
/// time. Returns a map from (set, binding) to ordinal.
pub fn assign_dynamic_ordinals(set_layouts: &[SetLayout]) -> HashMap<(u32, u32), u32> {
    let mut ordinals = HashMap::new();
    let mut next = 0u32;

    for layout in set_layouts {
        for binding in &layout.bindings {
            if binding.kind.is_dynamic() {
                ordinals.insert((layout.set, binding.binding), next);
                next += 1;
            }
        }
    }

    ordinals
}

/// Builder for a native descriptor set layout.
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
    binding_flags: Vec<vk::DescriptorBindingFlags>,
}

impl DescriptorSetLayoutBuilder<'_> {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            binding_flags: Vec::new(),
        }
    }

    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        descriptor_count: u32,
        stages: vk::ShaderStageFlags,
        binding_flags: vk::DescriptorBindingFlags,
    ) -> Self {
        let binding = vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(descriptor_type)
            .descriptor_count(descriptor_count)
            .stage_flags(stages);

        self.bindings.push(binding);
        self.binding_flags.push(binding_flags);
        self
    }

    pub fn add_layout_binding(self, binding: &LayoutBinding) -> Self {
        self.add_binding(
            binding.binding,
            binding.kind.vk_descriptor_type(),
            1,
            binding.stages,
            binding.kind.descriptor_binding_flags(),
        )
    }

    pub fn build(self, device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        let mut binding_flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
            .binding_flags(&self.binding_flags);

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&self.bindings)
            .push_next(&mut binding_flags_info);

        Ok(unsafe { device.create_descriptor_set_layout(&layout_info, None)? })
    }
}

/// Create one native descriptor set layout per [`SetLayout`], set-index
/// ascending. Creation failure aborts shader construction.
pub fn create_native_set_layouts(
    device: &ash::Device,
    set_layouts: &[SetLayout],
) -> Result<Vec<vk::DescriptorSetLayout>> {
    set_layouts
        .iter()
        .map(|layout| {
            layout
                .bindings
                .iter()
                .fold(DescriptorSetLayoutBuilder::new(), |builder, binding| {
                    builder.add_layout_binding(binding)
                })
                .build(device)
        })
        .collect()
}

/// Create the pipeline layout referencing all set layouts in ascending set
/// order.
pub fn create_pipeline_layout(
    device: &ash::Device,
    native_set_layouts: &[vk::DescriptorSetLayout],
) -> Result<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(native_set_layouts);

    Ok(unsafe { device.create_pipeline_layout(&layout_info, None)? })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::internals::reflection::{
        ImageBinding, ResourceBinding, ShaderStageKind,
    };

    fn reflection_with(
        buffers: Vec<ResourceBinding>,
        images: Vec<ImageBinding>,
    ) -> ShaderReflection {
        let mut reflection = ShaderReflection::default();
        for buffer in buffers {
            reflection.buffers.insert(buffer.name.clone(), buffer);
        }
        for image in images {
            reflection.images.insert(image.name.clone(), image);
        }
        reflection
    }

    fn buffer(name: &str, set: u32, binding: u32, kind: DescriptorKind) -> ResourceBinding {
        ResourceBinding {
            name: name.to_string(),
            set,
            binding,
            kind,
            stages: ShaderStageKind::Vertex.to_vk(),
            size: Some(64),
        }
    }

    fn image(name: &str, set: u32, binding: u32) -> ImageBinding {
        ImageBinding {
            name: name.to_string(),
            set,
            binding,
            kind: DescriptorKind::SampledImage,
            stages: ShaderStageKind::Fragment.to_vk(),
        }
    }

    #[test]
    fn bindings_are_sorted_ascending_within_each_set() {
        let reflection = reflection_with(
            vec![
                buffer("c", 0, 5, DescriptorKind::UniformBuffer),
                buffer("a", 0, 1, DescriptorKind::UniformBuffer),
            ],
            vec![image("b", 0, 3)],
        );

        let layouts = build_set_layouts(&reflection);
        assert_eq!(layouts.len(), 1);
        let bindings: Vec<u32> = layouts[0].bindings.iter().map(|b| b.binding).collect();
        assert_eq!(bindings, vec![1, 3, 5]);
    }

    #[test]
    fn set_gaps_are_filled_with_empty_layouts() {
        let reflection = reflection_with(
            vec![buffer("a", 0, 0, DescriptorKind::UniformBuffer)],
            vec![image("b", 2, 0)],
        );

        let layouts = build_set_layouts(&reflection);
        assert_eq!(layouts.len(), 3);
        assert_eq!(layouts[1].set, 1);
        assert!(layouts[1].bindings.is_empty());
    }

    #[test]
    fn dynamic_ordinals_are_dense_in_set_binding_order() {
        let reflection = reflection_with(
            vec![
                buffer("d", 1, 2, DescriptorKind::UniformBufferDynamic),
                buffer("a", 0, 0, DescriptorKind::UniformBufferDynamic),
                buffer("b", 0, 1, DescriptorKind::UniformBuffer),
                buffer("c", 0, 4, DescriptorKind::StorageBufferDynamic),
                buffer("e", 1, 0, DescriptorKind::StorageBuffer),
            ],
            vec![image("albedo", 1, 1)],
        );

        let layouts = build_set_layouts(&reflection);
        let ordinals = assign_dynamic_ordinals(&layouts);

        // Three dynamic bindings: (0,0), (0,4), (1,2) in traversal order.
        assert_eq!(ordinals.len(), 3);
        assert_eq!(ordinals[&(0, 0)], 0);
        assert_eq!(ordinals[&(0, 4)], 1);
        assert_eq!(ordinals[&(1, 2)], 2);

        let mut seen: Vec<u32> = ordinals.values().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..3).collect::<Vec<u32>>());
    }

    #[test]
    fn no_dynamic_bindings_yields_no_ordinals() {
        let reflection = reflection_with(
            vec![buffer("a", 0, 0, DescriptorKind::UniformBuffer)],
            vec![image("b", 0, 1)],
        );

        let layouts = build_set_layouts(&reflection);
        assert!(assign_dynamic_ordinals(&layouts).is_empty());
    }

    #[test]
    fn empty_reflection_has_no_layouts() {
        let reflection = ShaderReflection::default();
        assert!(build_set_layouts(&reflection).is_empty());
    }

    #[test]
    fn image_bindings_support_partial_binding() {
        assert_eq!(
            DescriptorKind::SampledImage.descriptor_binding_flags(),
            vk::DescriptorBindingFlags::PARTIALLY_BOUND,
        );
        assert_eq!(
            DescriptorKind::UniformBufferDynamic.descriptor_binding_flags(),
            vk::DescriptorBindingFlags::empty(),
        );
    }
}
