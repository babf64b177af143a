/// "Resources" refers to middle-level objects that are created by the
/// context objects. They are relatively intuitive and managed by the user.

pub mod buffer;
pub mod material;
pub mod ring_buffer;
pub mod shader;
pub mod texture;
pub mod vertex;
