use std::collections::HashMap;
use std::io::Cursor;

use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::{bail, eyre};
use spirq::ReflectConfig;
use spirq::ty::{DescriptorType, Type};
use spirq::var::Variable;

/// Decode a raw bytecode blob into SPIR-V words, validating magic and
/// alignment. Shared by reflection and native module creation.
pub fn spirv_words(bytecode: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytecode))
        .map_err(|e| eyre!("Invalid SPIR-V blob: {e}"))
}

/// Substring marker on a uniform block's declared type name that requests a
/// dynamic-offset binding (e.g. `PerDrawDataDynamic`). The constructor-level
/// hint in [`ReflectOptions`] overrides the convention wholesale.
const DYNAMIC_UNIFORM_MARKER: &str = "Dynamic";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStageKind {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStageKind {
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

/// Classification of a reflected binding, carrying the Vulkan descriptor
/// mapping used by layout and write construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    UniformBuffer,
    UniformBufferDynamic,
    StorageBuffer,
    StorageBufferDynamic,
    SampledImage,
    StorageImage,
    InputAttachment,
}

impl DescriptorKind {
    pub fn vk_descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            Self::StorageBufferDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
            Self::SampledImage => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            Self::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
        }
    }

    pub fn is_dynamic(self) -> bool {
        matches!(self, Self::UniformBufferDynamic | Self::StorageBufferDynamic)
    }

    pub fn is_image(self) -> bool {
        matches!(self, Self::SampledImage | Self::StorageImage | Self::InputAttachment)
    }

    /// Image slots may be left unset or swapped after set creation without
    /// invalidating the rest of the set; buffer bindings are always written
    /// before first use and carry no flags.
    pub fn descriptor_binding_flags(self) -> vk::DescriptorBindingFlags {
        if self.is_image() {
            vk::DescriptorBindingFlags::PARTIALLY_BOUND
        } else {
            vk::DescriptorBindingFlags::empty()
        }
    }
}

/// A reflected buffer binding. `size` is the declared struct byte size,
/// captured for uniform buffers only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBinding {
    pub name: String,
    pub set: u32,
    pub binding: u32,
    pub kind: DescriptorKind,
    pub stages: vk::ShaderStageFlags,
    pub size: Option<u32>,
}

/// A reflected image binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBinding {
    pub name: String,
    pub set: u32,
    pub binding: u32,
    pub kind: DescriptorKind,
    pub stages: vk::ShaderStageFlags,
}

/// A raw vertex-stage input, before semantic mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexInputVar {
    pub name: String,
    pub location: u32,
    pub components: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReflectOptions {
    /// Treat every reflected uniform buffer as dynamic, regardless of the
    /// type-name marker convention.
    pub treat_uniforms_dynamic: bool,
}

/// Reflection output for a single shader stage.
#[derive(Debug, Default)]
pub struct StageReflection {
    pub buffers: Vec<ResourceBinding>,
    pub images: Vec<ImageBinding>,
    pub vertex_inputs: Vec<VertexInputVar>,
}

/// Merged reflection across all stages of one shader.
#[derive(Debug, Default)]
pub struct ShaderReflection {
    pub buffers: HashMap<String, ResourceBinding>,
    pub images: HashMap<String, ImageBinding>,
    pub vertex_inputs: Vec<VertexInputVar>,
}

impl ShaderReflection {
    /// Count of dynamic-offset buffer bindings.
    pub fn dynamic_binding_count(&self) -> usize {
        self.buffers.values().filter(|b| b.kind.is_dynamic()).count()
    }
}

/// Parse one stage's SPIR-V and extract its binding metadata. Malformed
/// bytecode or an unsupported resource class aborts shader construction.
pub fn reflect_stage(
    bytecode: &[u8],
    stage: ShaderStageKind,
    entry_point: &str,
    options: ReflectOptions,
) -> Result<StageReflection> {
    let words = spirv_words(bytecode)?;
    let entry_points = ReflectConfig::new()
        .spv(words.as_slice())
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| eyre!("SPIR-V reflection failed: {e:?}"))?;

    let entry = entry_points
        .iter()
        .find(|ep| ep.name == entry_point)
        .ok_or_else(|| eyre!("Entry point '{entry_point}' not found in bytecode"))?;

    let stage_flags = stage.to_vk();
    let mut reflection = StageReflection::default();

    for var in &entry.vars {
        match var {
            Variable::Descriptor { name, desc_bind, desc_ty, ty, .. } => {
                let name = name.clone().ok_or_else(|| {
                    eyre!(
                        "Unnamed descriptor at set {} binding {}",
                        desc_bind.set(),
                        desc_bind.bind(),
                    )
                })?;

                match classify_descriptor(desc_ty, ty, options)? {
                    Classified::Buffer { kind, size } => {
                        reflection.buffers.push(ResourceBinding {
                            name,
                            set: desc_bind.set(),
                            binding: desc_bind.bind(),
                            kind,
                            stages: stage_flags,
                            size,
                        });
                    }
                    Classified::Image { kind } => {
                        reflection.images.push(ImageBinding {
                            name,
                            set: desc_bind.set(),
                            binding: desc_bind.bind(),
                            kind,
                            stages: stage_flags,
                        });
                    }
                }
            }
            Variable::Input { name, location, ty, .. } => {
                if stage != ShaderStageKind::Vertex {
                    continue;
                }
                reflection.vertex_inputs.push(VertexInputVar {
                    name: name.clone().unwrap_or_default(),
                    location: location.loc(),
                    components: component_count(ty),
                });
            }
            _ => {}
        }
    }

    reflection.vertex_inputs.sort_by_key(|input| input.location);

    Ok(reflection)
}

enum Classified {
    Buffer { kind: DescriptorKind, size: Option<u32> },
    Image { kind: DescriptorKind },
}

fn classify_descriptor(
    desc_ty: &DescriptorType,
    ty: &Type,
    options: ReflectOptions,
) -> Result<Classified> {
    match desc_ty {
        DescriptorType::UniformBuffer() => {
            let kind = if options.treat_uniforms_dynamic || type_name_marks_dynamic(ty) {
                DescriptorKind::UniformBufferDynamic
            } else {
                DescriptorKind::UniformBuffer
            };
            Ok(Classified::Buffer {
                kind,
                size: ty.nbyte().map(|s| s as u32),
            })
        }
        DescriptorType::StorageBuffer(_) => {
            let kind = if type_name_marks_dynamic(ty) {
                DescriptorKind::StorageBufferDynamic
            } else {
                DescriptorKind::StorageBuffer
            };
            Ok(Classified::Buffer { kind, size: None })
        }
        DescriptorType::CombinedImageSampler() | DescriptorType::SampledImage() => {
            Ok(Classified::Image { kind: DescriptorKind::SampledImage })
        }
        DescriptorType::StorageImage(_) => {
            Ok(Classified::Image { kind: DescriptorKind::StorageImage })
        }
        DescriptorType::InputAttachment(_) => {
            Ok(Classified::Image { kind: DescriptorKind::InputAttachment })
        }
        other => bail!("Unsupported SPIR-V descriptor type: {other:?}"),
    }
}

fn type_name_marks_dynamic(ty: &Type) -> bool {
    if let Type::Struct(st) = ty {
        st.name
            .as_deref()
            .is_some_and(|name| name.contains(DYNAMIC_UNIFORM_MARKER))
    } else {
        false
    }
}

fn component_count(ty: &Type) -> u32 {
    match ty {
        Type::Scalar(_) => 1,
        Type::Vector(v) => v.nscalar,
        Type::Matrix(m) => m.nvector * m.vector_ty.nscalar,
        _ => 4,
    }
}

/// Merge per-stage reflections into one shader-wide view, keyed by resource
/// name. The first occurrence fixes set, binding, kind, and size; later
/// stages may only contribute their stage bit. Any disagreement between
/// stages is a construction error rather than a silent preference for one
/// stage's metadata.
pub fn merge_stage_reflections(stages: Vec<StageReflection>) -> Result<ShaderReflection> {
    let mut merged = ShaderReflection::default();
    let mut occupied: HashMap<(u32, u32), String> = HashMap::new();

    for stage in stages {
        for buffer in stage.buffers {
            check_slot_owner(&mut occupied, buffer.set, buffer.binding, &buffer.name)?;
            match merged.buffers.get_mut(&buffer.name) {
                Some(existing) => {
                    if existing.set != buffer.set
                        || existing.binding != buffer.binding
                        || existing.kind != buffer.kind
                        || existing.size != buffer.size
                    {
                        bail!(
                            "Buffer '{}' declared as set {} binding {} {:?} ({:?} bytes) \
                             in one stage but set {} binding {} {:?} ({:?} bytes) in another",
                            buffer.name,
                            existing.set, existing.binding, existing.kind, existing.size,
                            buffer.set, buffer.binding, buffer.kind, buffer.size,
                        );
                    }
                    existing.stages |= buffer.stages;
                }
                None => {
                    merged.buffers.insert(buffer.name.clone(), buffer);
                }
            }
        }

        for image in stage.images {
            check_slot_owner(&mut occupied, image.set, image.binding, &image.name)?;
            match merged.images.get_mut(&image.name) {
                Some(existing) => {
                    if existing.set != image.set
                        || existing.binding != image.binding
                        || existing.kind != image.kind
                    {
                        bail!(
                            "Image '{}' declared as set {} binding {} {:?} in one stage \
                             but set {} binding {} {:?} in another",
                            image.name,
                            existing.set, existing.binding, existing.kind,
                            image.set, image.binding, image.kind,
                        );
                    }
                    existing.stages |= image.stages;
                }
                None => {
                    merged.images.insert(image.name.clone(), image);
                }
            }
        }

        if !stage.vertex_inputs.is_empty() {
            merged.vertex_inputs = stage.vertex_inputs;
        }
    }

    Ok(merged)
}

fn check_slot_owner(
    occupied: &mut HashMap<(u32, u32), String>,
    set: u32,
    binding: u32,
    name: &str,
) -> Result<()> {
    match occupied.get(&(set, binding)) {
        Some(owner) if owner != name => bail!(
            "Set {set} binding {binding} is declared under two names: '{owner}' and '{name}'",
        ),
        _ => {
            occupied.insert((set, binding), name.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(
        name: &str,
        set: u32,
        binding: u32,
        stage: ShaderStageKind,
        size: u32,
    ) -> ResourceBinding {
        ResourceBinding {
            name: name.to_string(),
            set,
            binding,
            kind: DescriptorKind::UniformBufferDynamic,
            stages: stage.to_vk(),
            size: Some(size),
        }
    }

    fn sampled(name: &str, set: u32, binding: u32, stage: ShaderStageKind) -> ImageBinding {
        ImageBinding {
            name: name.to_string(),
            set,
            binding,
            kind: DescriptorKind::SampledImage,
            stages: stage.to_vk(),
        }
    }

    #[test]
    fn same_buffer_in_two_stages_unions_the_stage_mask() {
        let vertex = StageReflection {
            buffers: vec![uniform("Foo", 0, 0, ShaderStageKind::Vertex, 64)],
            ..Default::default()
        };
        let fragment = StageReflection {
            buffers: vec![uniform("Foo", 0, 0, ShaderStageKind::Fragment, 64)],
            ..Default::default()
        };

        let merged = merge_stage_reflections(vec![vertex, fragment]).unwrap();
        assert_eq!(merged.buffers.len(), 1);

        let foo = &merged.buffers["Foo"];
        assert_eq!(
            foo.stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        );
        assert_eq!(foo.set, 0);
        assert_eq!(foo.binding, 0);
        assert_eq!(foo.size, Some(64));
    }

    #[test]
    fn mismatched_size_across_stages_is_an_error() {
        let vertex = StageReflection {
            buffers: vec![uniform("Foo", 0, 0, ShaderStageKind::Vertex, 64)],
            ..Default::default()
        };
        let fragment = StageReflection {
            buffers: vec![uniform("Foo", 0, 0, ShaderStageKind::Fragment, 128)],
            ..Default::default()
        };

        assert!(merge_stage_reflections(vec![vertex, fragment]).is_err());
    }

    #[test]
    fn mismatched_binding_slot_across_stages_is_an_error() {
        let vertex = StageReflection {
            buffers: vec![uniform("Foo", 0, 0, ShaderStageKind::Vertex, 64)],
            ..Default::default()
        };
        let fragment = StageReflection {
            buffers: vec![uniform("Foo", 1, 2, ShaderStageKind::Fragment, 64)],
            ..Default::default()
        };

        assert!(merge_stage_reflections(vec![vertex, fragment]).is_err());
    }

    #[test]
    fn two_names_on_one_slot_is_an_error() {
        let vertex = StageReflection {
            images: vec![sampled("albedo", 1, 0, ShaderStageKind::Vertex)],
            ..Default::default()
        };
        let fragment = StageReflection {
            images: vec![sampled("emissive", 1, 0, ShaderStageKind::Fragment)],
            ..Default::default()
        };

        assert!(merge_stage_reflections(vec![vertex, fragment]).is_err());
    }

    #[test]
    fn distinct_resources_all_survive_the_merge() {
        let vertex = StageReflection {
            buffers: vec![uniform("PerFrame", 0, 0, ShaderStageKind::Vertex, 128)],
            vertex_inputs: vec![VertexInputVar {
                name: "in_position".to_string(),
                location: 0,
                components: 3,
            }],
            ..Default::default()
        };
        let fragment = StageReflection {
            buffers: vec![uniform("PerMaterial", 0, 1, ShaderStageKind::Fragment, 32)],
            images: vec![sampled("albedo", 1, 0, ShaderStageKind::Fragment)],
            ..Default::default()
        };

        let merged = merge_stage_reflections(vec![vertex, fragment]).unwrap();
        assert_eq!(merged.buffers.len(), 2);
        assert_eq!(merged.images.len(), 1);
        assert_eq!(merged.vertex_inputs.len(), 1);
        assert_eq!(merged.dynamic_binding_count(), 2);
    }
}
