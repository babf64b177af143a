/// "Internals" refers to low-level objects that are used to implement the
/// "Resources" objects.

pub mod descriptor_allocator;
pub mod layout;
pub mod reflection;
pub mod ring_allocator;
