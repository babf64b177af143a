use crate::renderer::internals::ring_allocator::MAX_FRAMES_IN_FLIGHT;

/// Contains configuration options for the renderer like the frame cadence
/// depth and transient memory budget.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Back buffers in flight. Ring reclamation lags allocation by exactly
    /// this many frames. Clamped to [`MAX_FRAMES_IN_FLIGHT`].
    pub frames_in_flight: usize,

    /// Capacity of the transient uniform ring in bytes.
    pub uniform_ring_capacity: u64,

    /// Treat every reflected uniform buffer as dynamic instead of relying on
    /// the type-name marker convention.
    pub treat_uniforms_dynamic: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            uniform_ring_capacity: 4 * 1024 * 1024,
            treat_uniforms_dynamic: true,
        }
    }
}

impl RenderConfig {
    pub fn clamped(mut self) -> Self {
        self.frames_in_flight = self.frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT);
        self
    }
}
