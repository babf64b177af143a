use std::collections::HashMap;
use std::ffi::CString;
use std::sync::{Arc, Mutex};

use ash::vk;
use bytemuck::Pod;
use color_eyre::Result;
use color_eyre::eyre::{bail, eyre};
use log::error;
use smallvec::SmallVec;

use crate::renderer::internals::descriptor_allocator::DescriptorSetAllocator;
use crate::renderer::internals::reflection::{DescriptorKind, ShaderReflection, ShaderStageKind};
use crate::renderer::internals::ring_allocator::CONSTANT_BUFFER_ALIGNMENT;
use crate::renderer::resources::ring_buffer::UniformRingBuffer;
use crate::renderer::resources::shader::Shader;
use crate::renderer::resources::texture::{BufferView, Texture};
use crate::renderer::resources::vertex::VertexInputDescription;

/// A single-binding descriptor update, kept as plain data so tests can
/// capture what a material would write without a live device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DescriptorWrite {
    Image {
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
    Buffer {
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    },
}

pub(crate) trait DescriptorWriter {
    fn write_descriptors(&self, writes: &[DescriptorWrite]);
}

impl DescriptorWriter for ash::Device {
    fn write_descriptors(&self, writes: &[DescriptorWrite]) {
        for write in writes {
            match *write {
                DescriptorWrite::Image { set, binding, ty, view, sampler, layout } => {
                    let image_info = vk::DescriptorImageInfo {
                        sampler,
                        image_view: view,
                        image_layout: layout,
                    };
                    let write = vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(binding)
                        .descriptor_type(ty)
                        .image_info(std::slice::from_ref(&image_info));
                    unsafe {
                        self.update_descriptor_sets(&[write], &[]);
                    }
                }
                DescriptorWrite::Buffer { set, binding, ty, buffer, offset, range } => {
                    let buffer_info = vk::DescriptorBufferInfo {
                        buffer,
                        offset,
                        range,
                    };
                    let write = vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(binding)
                        .descriptor_type(ty)
                        .buffer_info(std::slice::from_ref(&buffer_info));
                    unsafe {
                        self.update_descriptor_sets(&[write], &[]);
                    }
                }
            }
        }
    }
}

struct BufferSlot {
    set: u32,
    binding: u32,
    kind: DescriptorKind,
    size: Option<u32>,
    dynamic_ordinal: Option<u32>,
    bound: Option<BufferView>,
}

struct ImageSlot {
    set: u32,
    binding: u32,
    kind: DescriptorKind,
    bound: vk::ImageView,
}

/// Named resource slots and descriptor sets for one shader.
///
/// This is the binding core shared by the graphics and compute material
/// variants: slot bookkeeping, descriptor-write construction, and the
/// per-draw dynamic-offset array. Everything device-facing goes through
/// [`DescriptorWriter`] so the policy is testable in isolation.
pub(crate) struct MaterialBindings {
    descriptor_sets: Vec<vk::DescriptorSet>,
    buffer_slots: HashMap<String, BufferSlot>,
    image_slots: HashMap<String, ImageSlot>,
    dynamic_offsets: SmallVec<[u32; 8]>,
}

impl MaterialBindings {
    fn new(shader: &Shader, descriptor_allocator: &mut DescriptorSetAllocator) -> Result<Self> {
        let descriptor_sets = shader
            .native_set_layouts()
            .iter()
            .map(|layout| descriptor_allocator.allocate(*layout))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::from_reflection(
            shader.reflection(),
            shader.dynamic_ordinals(),
            descriptor_sets,
        ))
    }

    /// Build slots from merged reflection data. `descriptor_sets` is indexed
    /// by set number; the ordinal map comes from the same shared assignment
    /// that sized the pipeline layout.
    fn from_reflection(
        reflection: &ShaderReflection,
        ordinals: &HashMap<(u32, u32), u32>,
        descriptor_sets: Vec<vk::DescriptorSet>,
    ) -> Self {
        let buffer_slots = reflection
            .buffers
            .iter()
            .map(|(name, binding)| {
                let slot = BufferSlot {
                    set: binding.set,
                    binding: binding.binding,
                    kind: binding.kind,
                    size: binding.size,
                    dynamic_ordinal: ordinals.get(&(binding.set, binding.binding)).copied(),
                    bound: None,
                };
                (name.clone(), slot)
            })
            .collect();

        let image_slots = reflection
            .images
            .iter()
            .map(|(name, binding)| {
                let slot = ImageSlot {
                    set: binding.set,
                    binding: binding.binding,
                    kind: binding.kind,
                    bound: vk::ImageView::null(),
                };
                (name.clone(), slot)
            })
            .collect();

        let mut dynamic_offsets = SmallVec::new();
        dynamic_offsets.resize(ordinals.len(), 0);

        Self {
            descriptor_sets,
            buffer_slots,
            image_slots,
            dynamic_offsets,
        }
    }

    /// Writes that fix every uniform-buffer slot to the ring's base buffer.
    /// Issued once at material construction; afterwards only the per-draw
    /// dynamic offsets vary, never the descriptor itself.
    fn uniform_base_writes(&mut self, ring_buffer: vk::Buffer) -> Vec<DescriptorWrite> {
        let descriptor_sets = &self.descriptor_sets;
        let mut writes = Vec::new();
        for slot in self.buffer_slots.values_mut() {
            if !matches!(
                slot.kind,
                DescriptorKind::UniformBuffer | DescriptorKind::UniformBufferDynamic,
            ) {
                continue;
            }
            let range = slot.size.unwrap_or(CONSTANT_BUFFER_ALIGNMENT as u32) as u64;
            slot.bound = Some(BufferView {
                buffer: ring_buffer,
                offset: 0,
                range,
            });
            writes.push(DescriptorWrite::Buffer {
                set: descriptor_sets[slot.set as usize],
                binding: slot.binding,
                ty: slot.kind.vk_descriptor_type(),
                buffer: ring_buffer,
                offset: 0,
                range,
            });
        }
        writes
    }

    fn set_texture_with(&mut self, writer: &impl DescriptorWriter, name: &str, texture: &Texture) {
        let Some(slot) = self.image_slots.get_mut(name) else {
            error!("Unknown texture slot '{name}'");
            return;
        };
        if texture.is_null() {
            error!("Null image view passed for texture slot '{name}'");
            return;
        }
        if slot.bound == texture.view {
            return;
        }

        slot.bound = texture.view;
        writer.write_descriptors(&[DescriptorWrite::Image {
            set: self.descriptor_sets[slot.set as usize],
            binding: slot.binding,
            ty: slot.kind.vk_descriptor_type(),
            view: texture.view,
            sampler: texture.sampler,
            layout: texture.layout,
        }]);
    }

    fn set_storage_buffer_with(
        &mut self,
        writer: &impl DescriptorWriter,
        name: &str,
        view: &BufferView,
    ) {
        let Some(slot) = self.buffer_slots.get_mut(name) else {
            error!("Unknown storage buffer slot '{name}'");
            return;
        };
        if !matches!(
            slot.kind,
            DescriptorKind::StorageBuffer | DescriptorKind::StorageBufferDynamic,
        ) {
            error!("Slot '{name}' is not a storage buffer");
            return;
        }
        if view.is_null() {
            error!("Null buffer passed for storage buffer slot '{name}'");
            return;
        }
        if slot.bound.as_ref() == Some(view) {
            return;
        }

        slot.bound = Some(*view);
        writer.write_descriptors(&[DescriptorWrite::Buffer {
            set: self.descriptor_sets[slot.set as usize],
            binding: slot.binding,
            ty: slot.kind.vk_descriptor_type(),
            buffer: view.buffer,
            offset: view.offset,
            range: view.range,
        }]);
    }

    /// Record a per-draw offset at the slot's dynamic ordinal. No descriptor
    /// write: the base binding was fixed at construction.
    fn set_local_uniform_offset(&mut self, name: &str, offset: u32) {
        let Some(slot) = self.buffer_slots.get(name) else {
            error!("Unknown uniform slot '{name}'");
            return;
        };
        let Some(ordinal) = slot.dynamic_ordinal else {
            error!("Uniform slot '{name}' is not a dynamic binding");
            return;
        };
        self.dynamic_offsets[ordinal as usize] = offset;
    }

    fn descriptor_sets(&self) -> &[vk::DescriptorSet] {
        &self.descriptor_sets
    }

    fn dynamic_offsets(&self) -> &[u32] {
        &self.dynamic_offsets
    }
}

/// A shader bound to concrete GPU resources, plus its pipeline.
///
/// Covers both the graphics and compute variants; they differ only in the
/// pipeline kind and bind point. Build graphics materials through
/// [`GraphicsMaterialBuilder`] and compute materials through
/// [`ComputeMaterialBuilder`].
pub struct Material {
    shader: Arc<Shader>,
    bindings: MaterialBindings,
    uniform_ring: Arc<Mutex<UniformRingBuffer>>,
    pipeline: vk::Pipeline,
    pipeline_bind_point: vk::PipelineBindPoint,
    device: Arc<ash::Device>,
}

impl Material {
    pub fn shader(&self) -> &Arc<Shader> {
        &self.shader
    }

    /// Bind `texture` to the named image slot. Unknown names and null views
    /// are logged and ignored; re-binding the identical image is a no-op.
    pub fn set_texture(&mut self, name: &str, texture: &Texture) {
        self.bindings.set_texture_with(self.device.as_ref(), name, texture);
    }

    /// Bind a buffer range to the named storage-buffer slot. Same no-op
    /// policy as [`set_texture`].
    ///
    /// [`set_texture`]: Material::set_texture
    pub fn set_storage_buffer(&mut self, name: &str, view: &BufferView) {
        self.bindings.set_storage_buffer_with(self.device.as_ref(), name, view);
    }

    /// Copy `data` into a fresh ring allocation and point the named dynamic
    /// uniform slot at it for the next draw. Fails only when the ring is out
    /// of capacity.
    pub fn set_local_uniform(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let alloc = self
            .uniform_ring
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .alloc_constant_buffer(data)?;
        self.bindings.set_local_uniform_offset(name, alloc.offset as u32);
        Ok(())
    }

    /// Typed convenience over [`set_local_uniform`].
    ///
    /// [`set_local_uniform`]: Material::set_local_uniform
    pub fn set_local_uniform_data<T: Pod>(&mut self, name: &str, value: &T) -> Result<()> {
        self.set_local_uniform(name, bytemuck::bytes_of(value))
    }

    /// Point the named dynamic uniform slot at a caller-managed offset
    /// inside the ring buffer.
    pub fn set_local_uniform_offset(&mut self, name: &str, offset: u32) {
        self.bindings.set_local_uniform_offset(name, offset);
    }

    pub fn bind_pipeline(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device.cmd_bind_pipeline(
                command_buffer,
                self.pipeline_bind_point,
                self.pipeline,
            );
        }
    }

    /// Bind all owned descriptor sets in ascending set order together with
    /// the full dynamic-offset array.
    pub fn bind_descriptor_sets(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                command_buffer,
                self.pipeline_bind_point,
                self.shader.pipeline_layout(),
                0,
                self.bindings.descriptor_sets(),
                self.bindings.dynamic_offsets(),
            );
        }
    }

    /// Rebuild the compute pipeline, e.g. after replacing the shader's entry
    /// state. Graphics pipelines are immutable; rebuild the material instead.
    pub fn prepare_pipeline(&mut self) -> Result<()> {
        if self.pipeline_bind_point != vk::PipelineBindPoint::COMPUTE {
            bail!("Only compute materials rebuild their pipeline in place");
        }
        let pipeline = create_compute_pipeline(&self.shader, &self.device)?;
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
        self.pipeline = pipeline;
        Ok(())
    }

    /// Bind pipeline and descriptor sets, then dispatch.
    pub fn bind_dispatch(
        &self,
        command_buffer: vk::CommandBuffer,
        group_x: u32,
        group_y: u32,
        group_z: u32,
    ) {
        debug_assert_eq!(self.pipeline_bind_point, vk::PipelineBindPoint::COMPUTE);
        self.bind_pipeline(command_buffer);
        self.bind_descriptor_sets(command_buffer);
        unsafe {
            self.device.cmd_dispatch(command_buffer, group_x, group_y, group_z);
        }
    }
}

impl Drop for Material {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

fn create_compute_pipeline(shader: &Shader, device: &ash::Device) -> Result<vk::Pipeline> {
    let stage = shader
        .stage(ShaderStageKind::Compute)
        .ok_or_else(|| eyre!("Shader '{}' has no compute stage", shader.name()))?;

    let entry_point = CString::new(stage.entry_point.clone())?;
    let stage_info = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(stage.module)
        .name(&entry_point);

    let pipeline_info = vk::ComputePipelineCreateInfo::default()
        .layout(shader.pipeline_layout())
        .stage(stage_info);

    let pipeline = unsafe {
        match device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        {
            Ok(pipelines) => Ok(pipelines),
            Err(_) => Err(eyre!("Failed to create compute pipeline")),
        }
    }?[0];

    Ok(pipeline)
}

pub struct GraphicsMaterialBuilder<'a> {
    device: Arc<ash::Device>,

    vertex_input_description: Option<VertexInputDescription>,
    input_assembly: vk::PipelineInputAssemblyStateCreateInfo<'a>,
    rasterization: vk::PipelineRasterizationStateCreateInfo<'a>,
    color_blend_attachment: vk::PipelineColorBlendAttachmentState,
    multisample: vk::PipelineMultisampleStateCreateInfo<'a>,
    depth_stencil: vk::PipelineDepthStencilStateCreateInfo<'a>,
    color_attachment_format: vk::Format,
    depth_attachment_format: vk::Format,
    shader: Option<Arc<Shader>>,
}

impl GraphicsMaterialBuilder<'_> {
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self {
            device,

            vertex_input_description: None,
            input_assembly: Self::default_input_assembly_info(),
            rasterization: Self::default_rasterization_info(),
            color_blend_attachment: Self::default_color_blend_state(),
            multisample: Self::default_multisample_info(),
            depth_stencil: Self::default_depth_stencil_info(),
            color_attachment_format: vk::Format::UNDEFINED,
            depth_attachment_format: vk::Format::UNDEFINED,
            shader: None,
        }
    }

    pub fn with_shader(mut self, shader: Arc<Shader>) -> Self {
        let _ = self.shader.replace(shader);
        self
    }

    pub fn with_input_topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.input_assembly.topology = topology;
        self.input_assembly.primitive_restart_enable = vk::FALSE;
        self
    }

    pub fn with_polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.rasterization.polygon_mode = mode;
        self.rasterization.line_width = 1.0;
        self
    }

    pub fn with_cull_mode(
        mut self,
        cull_mode: vk::CullModeFlags,
        front_face: vk::FrontFace,
    ) -> Self {
        self.rasterization.cull_mode = cull_mode;
        self.rasterization.front_face = front_face;
        self
    }

    pub fn with_blending_disabled(mut self) -> Self {
        self.color_blend_attachment.color_write_mask = vk::ColorComponentFlags::RGBA;
        self.color_blend_attachment.blend_enable = vk::FALSE;
        self
    }

    // Make sure the transparent object is rendered AFTER the opaque ones
    pub fn with_alpha_blending_enabled(mut self) -> Self {
        let blend = &mut self.color_blend_attachment;
        blend.color_write_mask = vk::ColorComponentFlags::RGBA;
        blend.blend_enable = vk::TRUE;
        blend.src_color_blend_factor = vk::BlendFactor::SRC_ALPHA;
        blend.dst_color_blend_factor = vk::BlendFactor::ONE_MINUS_SRC_ALPHA;
        blend.color_blend_op = vk::BlendOp::ADD;
        blend.src_alpha_blend_factor = vk::BlendFactor::ONE;
        blend.dst_alpha_blend_factor = vk::BlendFactor::ZERO;
        blend.alpha_blend_op = vk::BlendOp::ADD;
        self
    }

    pub fn with_color_attachment_format(mut self, format: vk::Format) -> Self {
        self.color_attachment_format = format;
        self
    }

    pub fn with_depth_attachment_format(mut self, format: vk::Format) -> Self {
        self.depth_attachment_format = format;
        self
    }

    pub fn with_depth_test(mut self, enable: bool, compare: Option<vk::CompareOp>) -> Self {
        self.depth_stencil.depth_test_enable = if enable { vk::TRUE } else { vk::FALSE };
        self.depth_stencil.depth_write_enable = if enable { vk::TRUE } else { vk::FALSE };
        self.depth_stencil.depth_compare_op = if enable {
            compare.unwrap_or(vk::CompareOp::LESS_OR_EQUAL)
        } else {
            vk::CompareOp::ALWAYS
        };
        self.depth_stencil.min_depth_bounds = 0.0;
        self.depth_stencil.max_depth_bounds = 1.0;
        self
    }

    /// Override the vertex input state reflected from the shader.
    pub fn with_vertex_input(mut self, description: VertexInputDescription) -> Self {
        let _ = self.vertex_input_description.replace(description);
        self
    }

    pub fn build(
        mut self,
        descriptor_allocator: &mut DescriptorSetAllocator,
        uniform_ring: Arc<Mutex<UniformRingBuffer>>,
    ) -> Result<Material> {
        let device = self.device.clone();

        let shader = self
            .shader
            .take()
            .ok_or_else(|| eyre!("No shader provided for GraphicsMaterialBuilder"))?;

        let vertex_stage = shader
            .stage(ShaderStageKind::Vertex)
            .ok_or_else(|| eyre!("Shader '{}' has no vertex stage", shader.name()))?;
        let fragment_stage = shader
            .stage(ShaderStageKind::Fragment)
            .ok_or_else(|| eyre!("Shader '{}' has no fragment stage", shader.name()))?;

        let mut bindings = MaterialBindings::new(&shader, descriptor_allocator)?;
        let ring_buffer = {
            let guard = uniform_ring.lock().map_err(|e| eyre!(e.to_string()))?;
            guard.buffer()
        };
        let base_writes = bindings.uniform_base_writes(ring_buffer);
        device.write_descriptors(&base_writes);

        let vertex_entry = CString::new(vertex_stage.entry_point.clone())?;
        let fragment_entry = CString::new(fragment_stage.entry_point.clone())?;
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_stage.module)
                .name(&vertex_entry),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_stage.module)
                .name(&fragment_entry),
        ];

        let vertex_input_description = self
            .vertex_input_description
            .take()
            .unwrap_or_else(|| shader.vertex_input().description());
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_attribute_descriptions(&vertex_input_description.attributes)
            .vertex_binding_descriptions(&vertex_input_description.bindings)
            .flags(vertex_input_description.flags);

        let viewport_state = vk::PipelineViewportStateCreateInfo {
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };

        let color_blend_info = vk::PipelineColorBlendStateCreateInfo {
            logic_op_enable: vk::FALSE,
            logic_op: vk::LogicOp::COPY,
            attachment_count: 1,
            p_attachments: &self.color_blend_attachment,
            ..Default::default()
        };

        // Use dynamic state for viewport and scissor configuration
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_info =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [self.color_attachment_format];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .depth_attachment_format(self.depth_attachment_format);
        if self.color_attachment_format != vk::Format::UNDEFINED {
            rendering_info = rendering_info.color_attachment_formats(&color_formats);
        }

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .push_next(&mut rendering_info)
            .stages(&shader_stages)
            .layout(shader.pipeline_layout())
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&self.input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&self.rasterization)
            .multisample_state(&self.multisample)
            .color_blend_state(&color_blend_info)
            .depth_stencil_state(&self.depth_stencil)
            .dynamic_state(&dynamic_info);

        let pipeline = unsafe {
            match device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            ) {
                Ok(pipelines) => Ok(pipelines),
                Err(_) => Err(eyre!("Failed to create graphics pipeline")),
            }
        }?[0];

        Ok(Material {
            shader,
            bindings,
            uniform_ring,
            pipeline,
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            device,
        })
    }

    fn default_input_assembly_info() -> vk::PipelineInputAssemblyStateCreateInfo<'static> {
        vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false)
    }

    fn default_rasterization_info() -> vk::PipelineRasterizationStateCreateInfo<'static> {
        vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false)
    }

    fn default_color_blend_state() -> vk::PipelineColorBlendAttachmentState {
        // Enable alpha blending by default
        vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
    }

    fn default_multisample_info() -> vk::PipelineMultisampleStateCreateInfo<'static> {
        vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            // 1 sample per pixel means no multisampling
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0)
            .alpha_to_coverage_enable(false)
            .alpha_to_one_enable(false)
    }

    fn default_depth_stencil_info() -> vk::PipelineDepthStencilStateCreateInfo<'static> {
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .stencil_test_enable(false)
    }
}

pub struct ComputeMaterialBuilder {
    device: Arc<ash::Device>,
    shader: Option<Arc<Shader>>,
}

impl ComputeMaterialBuilder {
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self {
            device,
            shader: None,
        }
    }

    pub fn with_shader(mut self, shader: Arc<Shader>) -> Self {
        let _ = self.shader.replace(shader);
        self
    }

    pub fn build(
        mut self,
        descriptor_allocator: &mut DescriptorSetAllocator,
        uniform_ring: Arc<Mutex<UniformRingBuffer>>,
    ) -> Result<Material> {
        let shader = self
            .shader
            .take()
            .ok_or_else(|| eyre!("No shader provided for ComputeMaterialBuilder"))?;

        let mut bindings = MaterialBindings::new(&shader, descriptor_allocator)?;
        let ring_buffer = {
            let guard = uniform_ring.lock().map_err(|e| eyre!(e.to_string()))?;
            guard.buffer()
        };
        let base_writes = bindings.uniform_base_writes(ring_buffer);
        self.device.write_descriptors(&base_writes);

        let pipeline = create_compute_pipeline(&shader, &self.device)?;

        Ok(Material {
            shader,
            bindings,
            uniform_ring,
            pipeline,
            pipeline_bind_point: vk::PipelineBindPoint::COMPUTE,
            device: self.device,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use ash::vk::Handle;

    use super::*;
    use crate::renderer::internals::layout::{assign_dynamic_ordinals, build_set_layouts};
    use crate::renderer::internals::reflection::{ImageBinding, ResourceBinding};

    #[derive(Default)]
    struct RecordingWriter {
        writes: RefCell<Vec<DescriptorWrite>>,
    }

    impl DescriptorWriter for RecordingWriter {
        fn write_descriptors(&self, writes: &[DescriptorWrite]) {
            self.writes.borrow_mut().extend_from_slice(writes);
        }
    }

    fn test_reflection() -> ShaderReflection {
        let mut reflection = ShaderReflection::default();
        reflection.buffers.insert(
            "PerFrame".to_string(),
            ResourceBinding {
                name: "PerFrame".to_string(),
                set: 0,
                binding: 0,
                kind: DescriptorKind::UniformBufferDynamic,
                stages: vk::ShaderStageFlags::VERTEX,
                size: Some(128),
            },
        );
        reflection.buffers.insert(
            "PerDraw".to_string(),
            ResourceBinding {
                name: "PerDraw".to_string(),
                set: 0,
                binding: 1,
                kind: DescriptorKind::UniformBufferDynamic,
                stages: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                size: Some(64),
            },
        );
        reflection.buffers.insert(
            "Particles".to_string(),
            ResourceBinding {
                name: "Particles".to_string(),
                set: 0,
                binding: 2,
                kind: DescriptorKind::StorageBuffer,
                stages: vk::ShaderStageFlags::VERTEX,
                size: None,
            },
        );
        reflection.images.insert(
            "albedo".to_string(),
            ImageBinding {
                name: "albedo".to_string(),
                set: 1,
                binding: 0,
                kind: DescriptorKind::SampledImage,
                stages: vk::ShaderStageFlags::FRAGMENT,
            },
        );
        reflection
    }

    fn test_bindings(reflection: &ShaderReflection) -> MaterialBindings {
        let set_layouts = build_set_layouts(reflection);
        let ordinals = assign_dynamic_ordinals(&set_layouts);
        let descriptor_sets = (0..set_layouts.len())
            .map(|i| vk::DescriptorSet::from_raw(0x10 + i as u64))
            .collect();
        MaterialBindings::from_reflection(reflection, &ordinals, descriptor_sets)
    }

    fn texture(raw: u64) -> Texture {
        Texture::sampled(vk::ImageView::from_raw(raw), vk::Sampler::from_raw(0x99))
    }

    #[test]
    fn unknown_texture_name_is_a_logged_noop() {
        let reflection = test_reflection();
        let mut bindings = test_bindings(&reflection);
        let writer = RecordingWriter::default();

        bindings.set_texture_with(&writer, "does_not_exist", &texture(0x1));

        assert!(writer.writes.borrow().is_empty());
        assert_eq!(bindings.image_slots["albedo"].bound, vk::ImageView::null());
    }

    #[test]
    fn null_texture_is_a_logged_noop() {
        let reflection = test_reflection();
        let mut bindings = test_bindings(&reflection);
        let writer = RecordingWriter::default();

        let null_texture = Texture::sampled(vk::ImageView::null(), vk::Sampler::null());
        bindings.set_texture_with(&writer, "albedo", &null_texture);

        assert!(writer.writes.borrow().is_empty());
    }

    #[test]
    fn binding_a_texture_issues_one_single_binding_write() {
        let reflection = test_reflection();
        let mut bindings = test_bindings(&reflection);
        let writer = RecordingWriter::default();

        bindings.set_texture_with(&writer, "albedo", &texture(0x1));

        let writes = writer.writes.borrow();
        assert_eq!(writes.len(), 1);
        match writes[0] {
            DescriptorWrite::Image { binding, ty, view, .. } => {
                assert_eq!(binding, 0);
                assert_eq!(ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
                assert_eq!(view, vk::ImageView::from_raw(0x1));
            }
            _ => panic!("expected an image write"),
        }
    }

    #[test]
    fn rebinding_the_same_texture_is_a_noop() {
        let reflection = test_reflection();
        let mut bindings = test_bindings(&reflection);
        let writer = RecordingWriter::default();

        bindings.set_texture_with(&writer, "albedo", &texture(0x1));
        bindings.set_texture_with(&writer, "albedo", &texture(0x1));
        assert_eq!(writer.writes.borrow().len(), 1);

        bindings.set_texture_with(&writer, "albedo", &texture(0x2));
        assert_eq!(writer.writes.borrow().len(), 2);
    }

    #[test]
    fn storage_buffer_slot_policy_matches_textures() {
        let reflection = test_reflection();
        let mut bindings = test_bindings(&reflection);
        let writer = RecordingWriter::default();

        // Unknown slot and non-storage slot are both rejected without writes.
        let view = BufferView::whole(vk::Buffer::from_raw(0x7));
        bindings.set_storage_buffer_with(&writer, "missing", &view);
        bindings.set_storage_buffer_with(&writer, "PerFrame", &view);
        assert!(writer.writes.borrow().is_empty());

        bindings.set_storage_buffer_with(&writer, "Particles", &view);
        bindings.set_storage_buffer_with(&writer, "Particles", &view);
        assert_eq!(writer.writes.borrow().len(), 1);
        match writer.writes.borrow()[0] {
            DescriptorWrite::Buffer { binding, ty, buffer, .. } => {
                assert_eq!(binding, 2);
                assert_eq!(ty, vk::DescriptorType::STORAGE_BUFFER);
                assert_eq!(buffer, vk::Buffer::from_raw(0x7));
            }
            _ => panic!("expected a buffer write"),
        }
    }

    #[test]
    fn local_uniform_offsets_route_to_their_ordinal_without_writes() {
        let reflection = test_reflection();
        let mut bindings = test_bindings(&reflection);

        // Two dynamic bindings: PerFrame at (0,0) is ordinal 0, PerDraw at
        // (0,1) is ordinal 1.
        assert_eq!(bindings.dynamic_offsets().len(), 2);

        bindings.set_local_uniform_offset("PerDraw", 512);
        assert_eq!(bindings.dynamic_offsets(), &[0, 512]);

        bindings.set_local_uniform_offset("PerFrame", 256);
        assert_eq!(bindings.dynamic_offsets(), &[256, 512]);

        // Unknown and non-dynamic slots leave the array untouched.
        bindings.set_local_uniform_offset("missing", 42);
        bindings.set_local_uniform_offset("Particles", 42);
        assert_eq!(bindings.dynamic_offsets(), &[256, 512]);
    }

    #[test]
    fn uniform_base_writes_cover_every_uniform_slot_once() {
        let reflection = test_reflection();
        let mut bindings = test_bindings(&reflection);

        let ring_buffer = vk::Buffer::from_raw(0xABC);
        let writes = bindings.uniform_base_writes(ring_buffer);

        // PerFrame and PerDraw, not the storage buffer.
        assert_eq!(writes.len(), 2);
        for write in &writes {
            match *write {
                DescriptorWrite::Buffer { ty, buffer, offset, .. } => {
                    assert_eq!(ty, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC);
                    assert_eq!(buffer, ring_buffer);
                    assert_eq!(offset, 0);
                }
                _ => panic!("expected buffer writes only"),
            }
        }

        // The declared struct sizes become the bound ranges.
        let mut ranges: Vec<u64> = writes
            .iter()
            .map(|w| match *w {
                DescriptorWrite::Buffer { range, .. } => range,
                _ => unreachable!(),
            })
            .collect();
        ranges.sort_unstable();
        assert_eq!(ranges, vec![64, 128]);
    }

    #[test]
    fn descriptor_sets_are_kept_in_ascending_set_order() {
        let reflection = test_reflection();
        let bindings = test_bindings(&reflection);

        assert_eq!(bindings.descriptor_sets().len(), 2);
        assert_eq!(bindings.descriptor_sets()[0], vk::DescriptorSet::from_raw(0x10));
        assert_eq!(bindings.descriptor_sets()[1], vk::DescriptorSet::from_raw(0x11));
    }
}
