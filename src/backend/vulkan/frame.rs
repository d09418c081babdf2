use anyhow::Context;
use ash::vk;

/// Submission state of one frame slot: its primary command buffer and the
/// fence signalled when the GPU has finished with it.
pub struct Frame {
    pub fence: vk::Fence,
    pub command_buffer: vk::CommandBuffer,
    submissions: u64,
}

impl Frame {
    /// Blocks until the slot's last submission retired. A slot that was
    /// never submitted returns immediately.
    pub fn wait(&self, device: &ash::Device) -> anyhow::Result<()> {
        if self.submissions == 0 {
            return Ok(());
        }
        unsafe {
            device
                .wait_for_fences(&[self.fence], true, u64::MAX)
                .with_context(|| format!("failed waiting on frame fence after {} submissions", self.submissions))
        }
    }

    pub fn begin(&self, device: &ash::Device) -> anyhow::Result<vk::CommandBuffer> {
        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .context("failed to reset frame command buffer")?;
            device
                .begin_command_buffer(self.command_buffer, &begin_info)
                .context("failed to begin frame command buffer")?;
        }
        Ok(self.command_buffer)
    }

    /// Ends recording and submits; the fence is re-armed first.
    pub fn submit(&mut self, device: &ash::Device, queue: vk::Queue) -> anyhow::Result<()> {
        let command_buffers = [self.command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe {
            device
                .end_command_buffer(self.command_buffer)
                .context("failed to end frame command buffer")?;
            device
                .reset_fences(&[self.fence])
                .context("failed to re-arm frame fence")?;
            device
                .queue_submit(queue, &[submit_info], self.fence)
                .context("queue submission failed")?;
        }
        self.submissions += 1;
        Ok(())
    }
}

/// One [`Frame`] per frame slot, all allocated from a single resettable
/// pool. Slots are handed out in the same order as
/// [`GraphRing`](crate::framegraph::GraphRing) hands out graph slots.
pub struct FrameRing {
    pool: vk::CommandPool,
    frames: Vec<Frame>,
    next: usize,
}

impl FrameRing {
    pub fn new(device: &ash::Device, queue_family: u32, frames_in_flight: usize) -> anyhow::Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe {
            device
                .create_command_pool(&pool_info, None)
                .context("failed to create frame command pool")?
        };

        let mut ring = Self {
            pool,
            frames: Vec::with_capacity(frames_in_flight),
            next: 0,
        };
        if let Err(err) = ring.allocate(device, frames_in_flight) {
            ring.destroy(device);
            return Err(err);
        }
        log::debug!("Created frame ring with {} slots", frames_in_flight);
        Ok(ring)
    }

    fn allocate(&mut self, device: &ash::Device, count: usize) -> anyhow::Result<()> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(u32::try_from(count).context("too many frame slots")?);
        let command_buffers = unsafe {
            device
                .allocate_command_buffers(&alloc_info)
                .context("failed to allocate frame command buffers")?
        };

        // Unsignalled: `Frame::wait` skips slots that were never submitted.
        let fence_info = vk::FenceCreateInfo::default();
        for command_buffer in command_buffers {
            let fence = unsafe {
                device
                    .create_fence(&fence_info, None)
                    .context("failed to create frame fence")?
            };
            self.frames.push(Frame {
                fence,
                command_buffer,
                submissions: 0,
            });
        }
        Ok(())
    }

    /// The next slot, once its previous submission has retired.
    pub fn acquire(&mut self, device: &ash::Device) -> anyhow::Result<&mut Frame> {
        anyhow::ensure!(!self.frames.is_empty(), "frame ring has no slots");
        let index = self.next;
        self.next = (self.next + 1) % self.frames.len();

        let frame = &mut self.frames[index];
        frame
            .wait(device)
            .with_context(|| format!("frame slot {index} never retired"))?;
        Ok(frame)
    }

    /// Destroying the pool frees every command buffer allocated from it.
    pub fn destroy(&mut self, device: &ash::Device) {
        log::trace!("Destroying frame ring ({} slots)", self.frames.len());
        unsafe {
            for frame in self.frames.drain(..) {
                device.destroy_fence(frame.fence, None);
            }
            device.destroy_command_pool(self.pool, None);
        }
        self.pool = vk::CommandPool::null();
    }
}
