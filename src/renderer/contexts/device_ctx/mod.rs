pub mod queue;
pub mod transfer_ctx;

use std::sync::{Arc, Mutex};

use color_eyre::Result;
use gpu_allocator::vulkan::Allocator;

use crate::renderer::contexts::device_ctx::queue::Queue;
use crate::renderer::contexts::device_ctx::transfer_ctx::TransferContext;

/// Responsibilities:
/// - Hold the externally created device, queue, and memory allocator
/// - Provide the one-shot transfer submission path used at resource creation
///
/// Instance, physical device, and logical device creation live with the
/// embedding application; this context only consumes the finished handles.
pub struct RenderDeviceContext {
    pub device: Arc<ash::Device>,
    pub queue: Arc<Queue>,
    pub memory_allocator: Arc<Mutex<Allocator>>,
    pub transfer: Arc<TransferContext>,
}

impl RenderDeviceContext {
    pub fn from_handles(
        device: Arc<ash::Device>,
        queue: Arc<Queue>,
        memory_allocator: Arc<Mutex<Allocator>>,
    ) -> Result<Self> {
        let transfer = Arc::new(TransferContext::new(queue.clone(), device.clone())?);

        Ok(Self {
            device,
            queue,
            memory_allocator,
            transfer,
        })
    }
}
