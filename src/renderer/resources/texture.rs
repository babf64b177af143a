use ash::vk;

/// Opaque handle to a sampled or storage image owned elsewhere. Pixel upload
/// and view/sampler creation happen outside this subsystem; materials only
/// ever see the finished handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Texture {
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub layout: vk::ImageLayout,
}

impl Texture {
    pub fn sampled(view: vk::ImageView, sampler: vk::Sampler) -> Self {
        Self {
            view,
            sampler,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    pub fn storage(view: vk::ImageView) -> Self {
        Self {
            view,
            sampler: vk::Sampler::null(),
            layout: vk::ImageLayout::GENERAL,
        }
    }

    pub fn is_null(&self) -> bool {
        self.view == vk::ImageView::null()
    }
}

/// A sub-range of a buffer owned elsewhere, bound as a storage buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferView {
    pub buffer: vk::Buffer,
    pub offset: u64,
    pub range: u64,
}

impl BufferView {
    pub fn whole(buffer: vk::Buffer) -> Self {
        Self {
            buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }

    pub fn is_null(&self) -> bool {
        self.buffer == vk::Buffer::null()
    }
}
