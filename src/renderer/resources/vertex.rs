use ash::vk;
use log::warn;

use crate::renderer::internals::reflection::VertexInputVar;

/// Meaning of one vertex-stage input, resolved from its variable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexSemantic {
    Position,
    Normal,
    Tangent,
    Color,
    TexCoord0,
    TexCoord1,
    /// Unrecognized input, treated as per-instance data by convention.
    Instance,
}

/// Fixed name table for the vertex semantics the mesh pipeline produces.
/// Anything not listed here is assumed to be instance data.
fn semantic_for_name(name: &str) -> Option<VertexSemantic> {
    match name {
        "in_position" | "a_position" => Some(VertexSemantic::Position),
        "in_normal" | "a_normal" => Some(VertexSemantic::Normal),
        "in_tangent" | "a_tangent" => Some(VertexSemantic::Tangent),
        "in_color" | "a_color" => Some(VertexSemantic::Color),
        "in_texcoord" | "in_texcoord0" | "a_texcoord" => Some(VertexSemantic::TexCoord0),
        "in_texcoord1" | "a_texcoord1" => Some(VertexSemantic::TexCoord1),
        _ => None,
    }
}

fn format_for_components(components: u32) -> vk::Format {
    match components {
        1 => vk::Format::R32_SFLOAT,
        2 => vk::Format::R32G32_SFLOAT,
        3 => vk::Format::R32G32B32_SFLOAT,
        _ => vk::Format::R32G32B32A32_SFLOAT,
    }
}

/// One resolved vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub semantic: VertexSemantic,
    pub offset: u32,
    pub format: vk::Format,
    pub components: u32,
}

/// Vertex inputs of one shader, split into per-vertex-rate and
/// per-instance-rate groups, each ordered ascending by location with packed
/// float offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexInputLayout {
    pub per_vertex: Vec<VertexAttribute>,
    pub per_instance: Vec<VertexAttribute>,
    pub vertex_stride: u32,
    pub instance_stride: u32,
}

impl VertexInputLayout {
    /// Resolve reflected vertex-stage inputs against the semantic name table.
    ///
    /// Unrecognized names are not a failure: they are logged and classified
    /// as generic per-instance attributes sized by their component count.
    pub fn from_reflected(inputs: &[VertexInputVar]) -> Self {
        let mut layout = Self::default();

        // Inputs arrive sorted by location, so offsets pack in declaration
        // order within each rate group.
        for input in inputs {
            let components = input.components.clamp(1, 4);
            match semantic_for_name(&input.name) {
                Some(semantic) => {
                    layout.per_vertex.push(VertexAttribute {
                        location: input.location,
                        semantic,
                        offset: layout.vertex_stride,
                        format: format_for_components(components),
                        components,
                    });
                    layout.vertex_stride += components * 4;
                }
                None => {
                    warn!(
                        "Vertex input '{}' (location {}) has no known semantic, \
                         treating as per-instance data",
                        input.name, input.location,
                    );
                    layout.per_instance.push(VertexAttribute {
                        location: input.location,
                        semantic: VertexSemantic::Instance,
                        offset: layout.instance_stride,
                        format: format_for_components(components),
                        components,
                    });
                    layout.instance_stride += components * 4;
                }
            }
        }

        layout
    }

    /// Build the pipeline-ready input state description. Binding 0 carries
    /// the per-vertex attributes, binding 1 the per-instance ones; either is
    /// omitted when its group is empty.
    pub fn description(&self) -> VertexInputDescription {
        let mut desc = VertexInputDescription::default();

        if !self.per_vertex.is_empty() {
            desc.bindings.push(
                vk::VertexInputBindingDescription::default()
                    .binding(0)
                    .stride(self.vertex_stride)
                    .input_rate(vk::VertexInputRate::VERTEX),
            );
            for attr in &self.per_vertex {
                desc.attributes.push(
                    vk::VertexInputAttributeDescription::default()
                        .location(attr.location)
                        .binding(0)
                        .format(attr.format)
                        .offset(attr.offset),
                );
            }
        }

        if !self.per_instance.is_empty() {
            desc.bindings.push(
                vk::VertexInputBindingDescription::default()
                    .binding(1)
                    .stride(self.instance_stride)
                    .input_rate(vk::VertexInputRate::INSTANCE),
            );
            for attr in &self.per_instance {
                desc.attributes.push(
                    vk::VertexInputAttributeDescription::default()
                        .location(attr.location)
                        .binding(1)
                        .format(attr.format)
                        .offset(attr.offset),
                );
            }
        }

        desc
    }
}

/// Raw vertex input state for graphics pipeline creation.
#[derive(Default)]
pub struct VertexInputDescription {
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub flags: vk::PipelineVertexInputStateCreateFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, location: u32, components: u32) -> VertexInputVar {
        VertexInputVar {
            name: name.to_string(),
            location,
            components,
        }
    }

    #[test]
    fn known_names_resolve_to_per_vertex_attributes() {
        let layout = VertexInputLayout::from_reflected(&[
            input("in_position", 0, 3),
            input("in_normal", 1, 3),
            input("in_texcoord", 2, 2),
        ]);

        assert_eq!(layout.per_vertex.len(), 3);
        assert!(layout.per_instance.is_empty());
        assert_eq!(layout.per_vertex[0].semantic, VertexSemantic::Position);
        assert_eq!(layout.per_vertex[1].semantic, VertexSemantic::Normal);
        assert_eq!(layout.per_vertex[2].semantic, VertexSemantic::TexCoord0);

        // Packed float offsets: vec3, vec3, vec2.
        assert_eq!(layout.per_vertex[0].offset, 0);
        assert_eq!(layout.per_vertex[1].offset, 12);
        assert_eq!(layout.per_vertex[2].offset, 24);
        assert_eq!(layout.vertex_stride, 32);
    }

    #[test]
    fn unknown_names_fall_back_to_per_instance() {
        let layout = VertexInputLayout::from_reflected(&[
            input("in_position", 0, 3),
            input("in_model_row0", 1, 4),
            input("in_model_row1", 2, 4),
        ]);

        assert_eq!(layout.per_vertex.len(), 1);
        assert_eq!(layout.per_instance.len(), 2);
        assert_eq!(layout.per_instance[0].semantic, VertexSemantic::Instance);
        assert_eq!(layout.per_instance[0].format, vk::Format::R32G32B32A32_SFLOAT);
        assert_eq!(layout.per_instance[1].offset, 16);
        assert_eq!(layout.instance_stride, 32);
    }

    #[test]
    fn description_emits_one_binding_per_populated_rate() {
        let layout = VertexInputLayout::from_reflected(&[
            input("in_position", 0, 3),
            input("in_custom_weight", 1, 1),
        ]);

        let desc = layout.description();
        assert_eq!(desc.bindings.len(), 2);
        assert_eq!(desc.bindings[0].input_rate, vk::VertexInputRate::VERTEX);
        assert_eq!(desc.bindings[1].input_rate, vk::VertexInputRate::INSTANCE);
        assert_eq!(desc.attributes.len(), 2);
        assert_eq!(desc.attributes[1].binding, 1);
        assert_eq!(desc.attributes[1].format, vk::Format::R32_SFLOAT);
    }

    #[test]
    fn empty_input_list_yields_empty_description() {
        let layout = VertexInputLayout::from_reflected(&[]);
        let desc = layout.description();
        assert!(desc.bindings.is_empty());
        assert!(desc.attributes.is_empty());
    }
}
