use color_eyre::Result;
use color_eyre::eyre::eyre;

/// Upper bound on frames in flight. The watermark array is fixed-size so the
/// allocator never heap-allocates on the per-frame path.
pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

/// Minimum offset alignment for constant-buffer suballocations. Matches the
/// largest `minUniformBufferOffsetAlignment` found on desktop hardware.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

pub const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// A suballocation handed out by [`FrameRingAllocator::alloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingAlloc {
    pub offset: u64,
    pub size: u64,
}

/// Bump-pointer allocator over a fixed-capacity circular byte arena.
///
/// Allocations are transient: bytes allocated during one frame are reclaimed
/// in bulk once the frame cadence guarantees the device can no longer read
/// them, which is exactly `back_buffer_count` calls to [`on_begin_frame`]
/// later. Individual `free` calls exist only so the frame bookkeeping can
/// retire whole batches; callers never free their own suballocations.
///
/// The arena itself holds no GPU memory. It is the offset arithmetic behind
/// `UniformRingBuffer`, which pairs it with a mapped Vulkan buffer.
///
/// [`on_begin_frame`]: FrameRingAllocator::on_begin_frame
pub struct FrameRingAllocator {
    capacity: u64,
    head: u64,
    allocated: u64,

    // Bytes allocated since the last `on_begin_frame`, not yet recorded in
    // `frame_watermarks`.
    frame_allocated: u64,
    // One slot per back buffer: bytes allocated during the frame that last
    // rendered into that slot.
    frame_watermarks: [u64; MAX_FRAMES_IN_FLIGHT],
    back_buffer_index: usize,
    back_buffer_count: usize,
}

impl FrameRingAllocator {
    pub fn new(capacity: u64, back_buffer_count: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(eyre!("Ring allocator capacity cannot be zero"));
        }
        if back_buffer_count == 0 || back_buffer_count > MAX_FRAMES_IN_FLIGHT {
            return Err(eyre!(
                "Back buffer count must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT,
                back_buffer_count,
            ));
        }

        Ok(Self {
            capacity,
            head: 0,
            allocated: 0,
            frame_allocated: 0,
            frame_watermarks: [0; MAX_FRAMES_IN_FLIGHT],
            back_buffer_index: 0,
            back_buffer_count,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    /// Offset where the next allocation would start.
    pub fn tail(&self) -> u64 {
        (self.head + self.allocated) % self.capacity
    }

    /// Bytes that must be skipped so an allocation of `size` does not
    /// straddle the physical end of the arena. The arena is one flat buffer,
    /// so a range crossing `capacity` has no contiguous backing; the
    /// allocation restarts at offset 0 instead and the skipped tail bytes
    /// are marked allocated to keep the accounting exact.
    pub fn padding_to_avoid_crossover(&self, size: u64) -> u64 {
        let tail = self.tail();
        if tail + size <= self.capacity {
            0
        } else {
            self.capacity - tail
        }
    }

    /// Allocate `size` bytes, returning the byte offset of the range.
    ///
    /// Out-of-capacity is an explicit error: the caller either frees sooner
    /// (shorter frame latency) or creates a larger arena. Nothing is retried
    /// internally.
    pub fn alloc(&mut self, size: u64) -> Result<u64> {
        let padding = self.padding_to_avoid_crossover(size);
        if padding > 0 {
            self.allocated += padding;
            self.frame_allocated += padding;
        }

        if self.allocated + size > self.capacity {
            return Err(eyre!(
                "Ring allocator out of capacity: requested {} bytes, {} of {} in use",
                size,
                self.allocated,
                self.capacity,
            ));
        }

        let offset = self.tail();
        self.allocated += size;
        self.frame_allocated += size;
        Ok(offset)
    }

    /// Retire `size` bytes from the head of the arena. Only the frame
    /// bookkeeping calls this; over-freeing breaks the accounting invariant
    /// and is a caller contract violation.
    pub fn free(&mut self, size: u64) {
        debug_assert!(size <= self.allocated, "Ring allocator over-free");
        self.head = (self.head + size) % self.capacity;
        self.allocated -= size;
    }

    /// Frame cadence tick. Must be called exactly once per rendered frame, in
    /// frame order, on the submitting thread.
    ///
    /// Records the bytes allocated during the ending frame into the watermark
    /// slot of the current back buffer, advances to the next back buffer, and
    /// retires the batch recorded `back_buffer_count` frames ago -- the
    /// oldest outstanding batch, which the device is guaranteed to no longer
    /// read. Skipping or duplicating a call reclaims memory the device may
    /// still be reading; there is no runtime detection.
    pub fn on_begin_frame(&mut self) {
        self.frame_watermarks[self.back_buffer_index] = self.frame_allocated;
        self.frame_allocated = 0;

        self.back_buffer_index = (self.back_buffer_index + 1) % self.back_buffer_count;

        let retired = self.frame_watermarks[self.back_buffer_index];
        self.frame_watermarks[self.back_buffer_index] = 0;
        if retired > 0 {
            self.free(retired);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outstanding_watermarks(ring: &FrameRingAllocator) -> u64 {
        ring.frame_watermarks.iter().sum::<u64>() + ring.frame_allocated
    }

    #[test]
    fn sequential_allocations_do_not_overlap() {
        let mut ring = FrameRingAllocator::new(1024, 3).unwrap();

        let sizes = [100u64, 200, 56, 300];
        let mut ranges = Vec::new();
        let mut total = 0u64;
        for size in sizes {
            let offset = ring.alloc(size).unwrap();
            ranges.push((offset, size));
            total += size;
            assert_eq!(ring.allocated(), total);
        }

        for (i, (offset_a, size_a)) in ranges.iter().enumerate() {
            for (offset_b, size_b) in ranges.iter().skip(i + 1) {
                let disjoint =
                    offset_a + size_a <= *offset_b || offset_b + size_b <= *offset_a;
                assert!(
                    disjoint,
                    "ranges {offset_a}+{size_a} and {offset_b}+{size_b} overlap"
                );
            }
        }
    }

    #[test]
    fn allocated_tracks_allocs_minus_frees() {
        let mut ring = FrameRingAllocator::new(4096, 2).unwrap();

        ring.alloc(512).unwrap();
        ring.alloc(256).unwrap();
        assert_eq!(ring.allocated(), 768);

        ring.free(512);
        assert_eq!(ring.allocated(), 256);

        ring.alloc(128).unwrap();
        assert_eq!(ring.allocated(), 384);
    }

    #[test]
    fn padding_is_zero_until_the_end_would_be_straddled() {
        let mut ring = FrameRingAllocator::new(1024, 3).unwrap();

        ring.alloc(800).unwrap();
        assert_eq!(ring.padding_to_avoid_crossover(224), 0);
        assert_eq!(ring.padding_to_avoid_crossover(300), 1024 - 800);
    }

    #[test]
    fn out_of_capacity_is_an_error() {
        let mut ring = FrameRingAllocator::new(1024, 3).unwrap();

        ring.alloc(1000).unwrap();
        assert!(ring.alloc(100).is_err());

        // A fresh allocator rejects anything larger than the whole arena.
        let mut ring = FrameRingAllocator::new(256, 2).unwrap();
        assert!(ring.alloc(512).is_err());
    }

    #[test]
    fn reclamation_lags_allocation_by_back_buffer_count() {
        let mut ring = FrameRingAllocator::new(4096, 3).unwrap();

        ring.alloc(512).unwrap();
        let before = ring.allocated();

        ring.on_begin_frame();
        assert_eq!(ring.allocated(), before, "freed after one frame, expected three");
        ring.on_begin_frame();
        assert_eq!(ring.allocated(), before, "freed after two frames, expected three");
        ring.on_begin_frame();
        assert_eq!(ring.allocated(), 0);
    }

    #[test]
    fn watermark_sum_matches_allocated_each_frame() {
        let mut ring = FrameRingAllocator::new(8192, 3).unwrap();

        let per_frame = [256u64, 1024, 512, 128, 768, 0, 2048];
        for size in per_frame {
            if size > 0 {
                ring.alloc(size).unwrap();
            }
            assert_eq!(outstanding_watermarks(&ring), ring.allocated());
            ring.on_begin_frame();
            assert_eq!(outstanding_watermarks(&ring), ring.allocated());
        }
    }

    #[test]
    fn interleaved_frames_reclaim_in_order() {
        let mut ring = FrameRingAllocator::new(4096, 2).unwrap();

        ring.alloc(100).unwrap(); // frame 0
        ring.on_begin_frame();
        ring.alloc(200).unwrap(); // frame 1
        ring.on_begin_frame();
        // Frame 0's batch is now retired, frame 1's is still outstanding.
        assert_eq!(ring.allocated(), 200);
        ring.on_begin_frame();
        assert_eq!(ring.allocated(), 0);
    }

    #[test]
    fn crossover_allocation_restarts_at_zero() {
        let mut ring = FrameRingAllocator::new(1024, 3).unwrap();

        // Fill 800 bytes during frame 0, then let the cadence retire them so
        // head and tail both sit at 800 with nothing outstanding.
        ring.alloc(512).unwrap();
        ring.alloc(288).unwrap();
        ring.on_begin_frame();
        ring.on_begin_frame();
        ring.on_begin_frame();
        assert_eq!(ring.allocated(), 0);
        assert_eq!(ring.tail(), 800);

        // 700 bytes cannot fit between 800 and 1024: the 224 tail bytes are
        // consumed as padding and the range starts over at offset 0.
        assert_eq!(ring.padding_to_avoid_crossover(700), 224);
        let offset = ring.alloc(700).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(ring.allocated(), 224 + 700);

        // The returned range must not straddle the arena end.
        assert!(offset + 700 <= ring.capacity());
    }

    #[test]
    fn crossover_padding_counts_against_capacity() {
        let mut ring = FrameRingAllocator::new(1024, 3).unwrap();

        ring.alloc(512).unwrap();
        ring.on_begin_frame();
        ring.on_begin_frame();
        ring.on_begin_frame();

        // Head at 512, then 288 bytes outstanding puts the tail at 800.
        ring.alloc(288).unwrap();
        assert_eq!(ring.tail(), 800);

        // 512 fits only by wrapping: 224 bytes of padding plus the request
        // lands exactly at capacity.
        let offset = ring.alloc(512).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(ring.allocated(), 1024);

        // And now the arena is exactly full.
        assert!(ring.alloc(1).is_err());
    }

    #[test]
    fn frame_scenario_with_aligned_sizes() {
        let mut ring = FrameRingAllocator::new(1024, 3).unwrap();

        // A 300-byte request is rounded to the 256-byte granule by callers
        // before it reaches the ring.
        let size = align_up(300, CONSTANT_BUFFER_ALIGNMENT);
        assert_eq!(size, 512);

        ring.alloc(size).unwrap();
        assert_eq!(ring.allocated(), 512);

        ring.on_begin_frame();
        ring.on_begin_frame();
        ring.on_begin_frame();
        assert_eq!(ring.allocated(), 0);
    }

    #[test]
    fn align_up_rounds_to_granule() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(300, 256), 512);
        assert_eq!(align_up(257, 256), 512);
    }

    #[test]
    fn rejects_invalid_configuration() {
        assert!(FrameRingAllocator::new(0, 3).is_err());
        assert!(FrameRingAllocator::new(1024, 0).is_err());
        assert!(FrameRingAllocator::new(1024, MAX_FRAMES_IN_FLIGHT + 1).is_err());
    }
}
