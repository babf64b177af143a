use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Data unique to each frame passed into a dynamic uniform buffer
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct PerFrameData {
    pub viewproj: Mat4,
    pub near: f32,
    pub far: f32,
    _padding: [f32; 2],
}

/// Data unique to each draw passed into a dynamic uniform buffer
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct PerDrawData {
    pub model: Mat4,
    pub tint: Vec4,
}
