use std::sync::{Arc, Mutex};

use color_eyre::Result;
use color_eyre::eyre::eyre;

use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::RenderDeviceContext;
use crate::renderer::resources::ring_buffer::UniformRingBuffer;

/// Responsibilities:
/// - Track the frame cadence the ring reclamation is synchronized to
/// - Own the uniform ring buffer shared by every material
pub struct RenderFrameContext {
    uniform_ring: Arc<Mutex<UniformRingBuffer>>,
    frames_in_flight: usize,
    frame_number: u64,
}

impl RenderFrameContext {
    pub fn new(config: &RenderConfig, dev_ctx: &RenderDeviceContext) -> Result<Self> {
        let uniform_ring = UniformRingBuffer::new(
            config.uniform_ring_capacity,
            config.frames_in_flight,
            dev_ctx.memory_allocator.clone(),
            dev_ctx.device.clone(),
        )?;

        Ok(Self {
            uniform_ring: Arc::new(Mutex::new(uniform_ring)),
            frames_in_flight: config.frames_in_flight,
            frame_number: 0,
        })
    }

    pub fn uniform_ring(&self) -> Arc<Mutex<UniformRingBuffer>> {
        self.uniform_ring.clone()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Advance the frame cadence. Call exactly once per rendered frame, on
    /// the submitting thread, after all command recording that references the
    /// previous frame's ring allocations has been issued. The ring's
    /// back-buffer lag covers in-flight execution on the device.
    pub fn begin_frame(&mut self) -> Result<()> {
        self.frame_number += 1;
        self.uniform_ring
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .on_begin_frame();
        Ok(())
    }
}
