pub mod config;
pub mod shader_data;

pub mod contexts;
pub mod internals;
pub mod resources;

use std::sync::{Arc, Mutex};

use color_eyre::Result;
use gpu_allocator::vulkan::Allocator;

use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::RenderDeviceContext;
use crate::renderer::contexts::device_ctx::queue::Queue;
use crate::renderer::contexts::frame_ctx::RenderFrameContext;
use crate::renderer::internals::descriptor_allocator::DescriptorSetAllocator;
use crate::renderer::internals::reflection::ReflectOptions;
use crate::renderer::resources::material::{
    ComputeMaterialBuilder, GraphicsMaterialBuilder, Material,
};
use crate::renderer::resources::shader::{Shader, ShaderRegistry, ShaderStageDesc};

pub use crate::renderer::internals::reflection::ShaderStageKind;
pub use crate::renderer::resources::texture::{BufferView, Texture};

/// Top-level owner of the resource-binding pipeline: device plumbing, frame
/// cadence, descriptor pools, and the shader registry all live here and die
/// together.
pub struct RenderContext {
    pub dev: RenderDeviceContext,
    pub frames: RenderFrameContext,

    descriptor_allocator: DescriptorSetAllocator,
    shaders: ShaderRegistry,
    config: RenderConfig,
}

impl RenderContext {
    /// Build from externally created device handles. Window, surface, and
    /// device selection belong to the embedding application.
    pub fn from_handles(
        config: RenderConfig,
        device: Arc<ash::Device>,
        queue: Arc<Queue>,
        memory_allocator: Arc<Mutex<Allocator>>,
    ) -> Result<Self> {
        let config = config.clamped();
        let dev = RenderDeviceContext::from_handles(device, queue, memory_allocator)?;
        let frames = RenderFrameContext::new(&config, &dev)?;
        let descriptor_allocator = DescriptorSetAllocator::new(dev.device.clone());

        Ok(Self {
            dev,
            frames,
            descriptor_allocator,
            shaders: ShaderRegistry::new(),
            config,
        })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Advance the frame cadence. Exactly once per rendered frame.
    pub fn begin_frame(&mut self) -> Result<()> {
        self.frames.begin_frame()
    }

    /// Reflect pre-compiled SPIR-V stages into a shader and register it by
    /// name. A recompile loads a new shader under the same name; existing
    /// materials keep the old one alive until rebuilt.
    pub fn load_shader(
        &mut self,
        name: &str,
        stages: Vec<ShaderStageDesc>,
    ) -> Result<Arc<Shader>> {
        let options = ReflectOptions {
            treat_uniforms_dynamic: self.config.treat_uniforms_dynamic,
        };
        let shader = Shader::from_bytecode(name, stages, options, self.dev.device.clone())?;
        self.shaders.insert(shader.clone());
        Ok(shader)
    }

    pub fn shader(&self, name: &str) -> Option<Arc<Shader>> {
        self.shaders.get(name)
    }

    pub fn graphics_material_builder(&self) -> GraphicsMaterialBuilder<'static> {
        GraphicsMaterialBuilder::new(self.dev.device.clone())
    }

    pub fn build_graphics_material(
        &mut self,
        builder: GraphicsMaterialBuilder<'_>,
    ) -> Result<Material> {
        builder.build(&mut self.descriptor_allocator, self.frames.uniform_ring())
    }

    pub fn build_compute_material(&mut self, shader: Arc<Shader>) -> Result<Material> {
        ComputeMaterialBuilder::new(self.dev.device.clone())
            .with_shader(shader)
            .build(&mut self.descriptor_allocator, self.frames.uniform_ring())
    }
}
