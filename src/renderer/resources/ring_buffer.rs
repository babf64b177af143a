use std::sync::{Arc, Mutex};

use ash::vk;
use bytemuck::Pod;
use color_eyre::Result;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::Allocator;

use crate::renderer::internals::ring_allocator::{
    CONSTANT_BUFFER_ALIGNMENT, FrameRingAllocator, RingAlloc, align_up,
};
use crate::renderer::resources::buffer::Buffer;

/// A host-visible uniform buffer streamed through a frame-synchronized ring.
///
/// One instance backs the per-draw uniform data of every material: materials
/// bind the underlying buffer once at construction and address their own
/// suballocations purely through dynamic offsets. Reclamation is driven by
/// the frame context calling [`on_begin_frame`] once per rendered frame.
///
/// [`on_begin_frame`]: UniformRingBuffer::on_begin_frame
pub struct UniformRingBuffer {
    buffer: Buffer,
    ring: FrameRingAllocator,
}

impl UniformRingBuffer {
    pub fn new(
        capacity: u64,
        back_buffer_count: usize,
        mem_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let capacity = align_up(capacity, CONSTANT_BUFFER_ALIGNMENT);
        let buffer = Buffer::new(
            capacity,
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER,
            "uniform_ring",
            MemoryLocation::CpuToGpu,
            mem_allocator,
            device,
        )?;
        let ring = FrameRingAllocator::new(capacity, back_buffer_count)?;

        Ok(Self { buffer, ring })
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer.buffer
    }

    pub fn capacity(&self) -> u64 {
        self.ring.capacity()
    }

    /// Copy `data` into a fresh ring range, rounded up to the constant-buffer
    /// alignment granule. Returns the range; out-of-capacity is an explicit
    /// error for the caller.
    pub fn alloc_constant_buffer(&mut self, data: &[u8]) -> Result<RingAlloc> {
        let size = align_up(data.len() as u64, CONSTANT_BUFFER_ALIGNMENT);
        let offset = self.ring.alloc(size)?;
        self.buffer.write(data, offset as usize)?;
        Ok(RingAlloc { offset, size })
    }

    /// Typed convenience over [`alloc_constant_buffer`].
    ///
    /// [`alloc_constant_buffer`]: UniformRingBuffer::alloc_constant_buffer
    pub fn alloc_constant_data<T: Pod>(&mut self, value: &T) -> Result<RingAlloc> {
        self.alloc_constant_buffer(bytemuck::bytes_of(value))
    }

    /// Frame cadence tick, forwarded from the frame context. Exactly once per
    /// rendered frame, after command recording for the previous frame has
    /// been issued.
    pub fn on_begin_frame(&mut self) {
        self.ring.on_begin_frame();
    }
}
