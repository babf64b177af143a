use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::{bail, eyre};

use crate::renderer::internals::layout::{
    SetLayout, assign_dynamic_ordinals, build_set_layouts, create_native_set_layouts,
    create_pipeline_layout,
};
use crate::renderer::internals::reflection::{
    ReflectOptions, ShaderReflection, ShaderStageKind, merge_stage_reflections, reflect_stage,
    spirv_words,
};
use crate::renderer::resources::vertex::VertexInputLayout;

/// One stage of pre-compiled SPIR-V handed to [`Shader::from_bytecode`].
pub struct ShaderStageDesc {
    pub stage: ShaderStageKind,
    pub bytecode: Vec<u8>,
    pub entry_point: String,
}

impl ShaderStageDesc {
    pub fn new(stage: ShaderStageKind, bytecode: Vec<u8>) -> Self {
        Self {
            stage,
            bytecode,
            entry_point: "main".to_string(),
        }
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }
}

/// A compiled stage owned by its [`Shader`]; the native module is destroyed
/// with it.
pub struct ShaderStageModule {
    pub stage: ShaderStageKind,
    pub entry_point: String,
    pub module: vk::ShaderModule,
    bytecode: Vec<u8>,
}

impl ShaderStageModule {
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }
}

/// A shader with its reflected binding metadata and native layout objects.
///
/// Everything here is built once at load time and immutable afterwards; a
/// recompile produces a new `Shader` rather than mutating this one.
/// Materials hold an `Arc` to the shader they were built from, so layouts
/// outlive every material using them.
pub struct Shader {
    name: String,
    stages: Vec<ShaderStageModule>,
    reflection: ShaderReflection,
    set_layouts: Vec<SetLayout>,
    native_set_layouts: Vec<vk::DescriptorSetLayout>,
    pipeline_layout: vk::PipelineLayout,
    dynamic_ordinals: HashMap<(u32, u32), u32>,
    vertex_input: VertexInputLayout,
    device: Arc<ash::Device>,
}

impl Shader {
    pub fn from_bytecode(
        name: impl Into<String>,
        stage_descs: Vec<ShaderStageDesc>,
        options: ReflectOptions,
        device: Arc<ash::Device>,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        if stage_descs.is_empty() {
            bail!("Shader '{name}' has no stages");
        }

        let mut stage_reflections = Vec::with_capacity(stage_descs.len());
        for desc in &stage_descs {
            let stage_reflection =
                reflect_stage(&desc.bytecode, desc.stage, &desc.entry_point, options)
                    .map_err(|e| eyre!("Shader '{name}', {:?} stage: {e}", desc.stage))?;
            stage_reflections.push(stage_reflection);
        }
        let reflection = merge_stage_reflections(stage_reflections)
            .map_err(|e| eyre!("Shader '{name}': {e}"))?;

        let set_layouts = build_set_layouts(&reflection);
        let dynamic_ordinals = assign_dynamic_ordinals(&set_layouts);
        let vertex_input = VertexInputLayout::from_reflected(&reflection.vertex_inputs);

        let native_set_layouts = create_native_set_layouts(&device, &set_layouts)?;
        let pipeline_layout = create_pipeline_layout(&device, &native_set_layouts)?;

        let stages = stage_descs
            .into_iter()
            .map(|desc| {
                let words = spirv_words(&desc.bytecode)?;
                let module_info = vk::ShaderModuleCreateInfo::default().code(&words);
                let module = unsafe { device.create_shader_module(&module_info, None)? };
                Ok(ShaderStageModule {
                    stage: desc.stage,
                    entry_point: desc.entry_point,
                    module,
                    bytecode: desc.bytecode,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Arc::new(Self {
            name,
            stages,
            reflection,
            set_layouts,
            native_set_layouts,
            pipeline_layout,
            dynamic_ordinals,
            vertex_input,
            device,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[ShaderStageModule] {
        &self.stages
    }

    pub fn stage(&self, kind: ShaderStageKind) -> Option<&ShaderStageModule> {
        self.stages.iter().find(|s| s.stage == kind)
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    pub fn set_layouts(&self) -> &[SetLayout] {
        &self.set_layouts
    }

    pub fn native_set_layouts(&self) -> &[vk::DescriptorSetLayout] {
        &self.native_set_layouts
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub fn dynamic_ordinals(&self) -> &HashMap<(u32, u32), u32> {
        &self.dynamic_ordinals
    }

    pub fn vertex_input(&self) -> &VertexInputLayout {
        &self.vertex_input
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            for stage in &self.stages {
                self.device.destroy_shader_module(stage.module, None);
            }
            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            for layout in &self.native_set_layouts {
                self.device.destroy_descriptor_set_layout(*layout, None);
            }
        }
    }
}

/// Name-keyed shader storage, owned by the render context. Materials are
/// built from shaders looked up here; replacing an entry leaves existing
/// materials on the old `Arc` until they are rebuilt.
#[derive(Default)]
pub struct ShaderRegistry {
    shaders: HashMap<String, Arc<Shader>>,
}

impl ShaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, shader: Arc<Shader>) -> Option<Arc<Shader>> {
        self.shaders.insert(shader.name().to_string(), shader)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Shader>> {
        self.shaders.get(name).cloned()
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<Shader>> {
        self.shaders.remove(name)
    }
}
