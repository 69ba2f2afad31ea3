//! Command submission and the GPU completion counter.
//!
//! # Overview
//!
//! - [`SubmissionQueue`] is the seam between the frame synchronizer and a
//!   concrete backend: it creates allocators and command lists, submits them,
//!   and exposes the device-side completion counter (signal, query, wait).
//! - [`GpuDependency`] carries the GPU-to-GPU semaphores a submission waits on
//!   and signals (presentation image acquired / rendering finished).
//! - [`VulkanQueue`] implements the trait on the graphics queue, with a
//!   [`TimelineSemaphore`] as the counter.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use inflight_rhi::device::Device;
//! use inflight_rhi::queue::{GpuDependency, SubmissionQueue, VulkanQueue};
//!
//! # fn example(device: Arc<Device>) -> Result<(), inflight_rhi::RhiError> {
//! let queue = VulkanQueue::new(device)?;
//! let pool = queue.create_allocator()?;
//! let cmd = queue.create_command_list(&pool)?;
//!
//! queue.begin_recording(&cmd)?;
//! queue.end_recording(&cmd)?;
//! queue.submit(&[&cmd], GpuDependency::none())?;
//! queue.signal(1)?;
//! queue.wait_for_value(1, Duration::from_secs(5))?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info, trace};

use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::RhiResult;
use crate::sync::TimelineSemaphore;

/// Pipeline stage at which a submission waits for its presentation image.
///
/// Every write to a swapchain image in this crate is a transfer (clear or
/// copy), so the first barrier of a frame must use this as its source stage.
pub const IMAGE_READY_WAIT_STAGE: vk::PipelineStageFlags = vk::PipelineStageFlags::TRANSFER;

/// GPU-side ordering attached to one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuDependency<S> {
    /// Semaphore the submission waits on before executing.
    pub wait: Option<S>,
    /// Semaphore the submission signals once it has executed.
    pub signal: Option<S>,
}

impl<S> GpuDependency<S> {
    /// A dependency with nothing to wait on and nothing to signal.
    pub fn none() -> Self {
        Self {
            wait: None,
            signal: None,
        }
    }
}

impl<S> Default for GpuDependency<S> {
    fn default() -> Self {
        Self::none()
    }
}

/// Command recording backend and submission queue.
///
/// Submissions execute in FIFO order. `signal(value)` enqueues a request to
/// set the completion counter to `value` once everything submitted before it
/// has finished; `completed_value` reads the counter without blocking.
pub trait SubmissionQueue {
    /// Backing memory for command lists; reset recycles all lists at once.
    type Allocator;
    /// A recordable, submittable list of GPU commands.
    type CommandList;
    /// GPU-to-GPU synchronization object used by [`GpuDependency`].
    type Semaphore: Copy;

    /// Creates an allocator for a long-lived recording slot.
    fn create_allocator(&self) -> RhiResult<Self::Allocator>;

    /// Creates an allocator for one-shot work that is discarded after use.
    fn create_transient_allocator(&self) -> RhiResult<Self::Allocator> {
        self.create_allocator()
    }

    /// Creates a command list backed by `allocator`.
    fn create_command_list(&self, allocator: &Self::Allocator) -> RhiResult<Self::CommandList>;

    /// Recycles every command list allocated from `allocator`.
    ///
    /// Only legal once the GPU has finished all work recorded with it.
    fn reset_allocator(&self, allocator: &mut Self::Allocator) -> RhiResult<()>;

    /// Opens `list` for recording.
    fn begin_recording(&self, list: &Self::CommandList) -> RhiResult<()>;

    /// Closes `list`; it can then be submitted.
    fn end_recording(&self, list: &Self::CommandList) -> RhiResult<()>;

    /// Submits closed command lists in order.
    fn submit(
        &self,
        lists: &[&Self::CommandList],
        dependency: GpuDependency<Self::Semaphore>,
    ) -> RhiResult<()>;

    /// Enqueues a request to set the completion counter to `value`.
    fn signal(&self, value: u64) -> RhiResult<()>;

    /// Reads the completion counter. Never blocks.
    fn completed_value(&self) -> RhiResult<u64>;

    /// Blocks until the completion counter reaches `value` or `timeout` expires.
    fn wait_for_value(&self, value: u64, timeout: Duration) -> RhiResult<()>;
}

/// [`SubmissionQueue`] on the Vulkan graphics queue.
///
/// The completion counter is a timeline semaphore created at value 0.
/// A signal is an empty batch that only carries the timeline signal, so it is
/// ordered after every earlier batch on the queue, presentation included.
pub struct VulkanQueue {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Device-side completion counter.
    timeline: TimelineSemaphore,
    /// Graphics queue family (command pools must match it).
    queue_family_index: u32,
}

impl VulkanQueue {
    /// Creates the queue wrapper and its timeline semaphore.
    ///
    /// # Errors
    ///
    /// Returns an error if the timeline semaphore cannot be created.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let timeline = TimelineSemaphore::new(device.clone(), 0)?;
        let queue_family_index = device.graphics_family();

        info!(
            "Submission queue ready on family {} (timeline semaphore counter)",
            queue_family_index
        );

        Ok(Self {
            device,
            timeline,
            queue_family_index,
        })
    }

    /// Returns the logical device.
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Returns the timeline semaphore backing the completion counter.
    #[inline]
    pub fn timeline(&self) -> &TimelineSemaphore {
        &self.timeline
    }
}

impl SubmissionQueue for VulkanQueue {
    type Allocator = CommandPool;
    type CommandList = CommandBuffer;
    type Semaphore = vk::Semaphore;

    fn create_allocator(&self) -> RhiResult<CommandPool> {
        CommandPool::new(self.device.clone(), self.queue_family_index)
    }

    fn create_transient_allocator(&self) -> RhiResult<CommandPool> {
        CommandPool::new_transient(self.device.clone(), self.queue_family_index)
    }

    fn create_command_list(&self, allocator: &CommandPool) -> RhiResult<CommandBuffer> {
        CommandBuffer::new(self.device.clone(), allocator)
    }

    fn reset_allocator(&self, allocator: &mut CommandPool) -> RhiResult<()> {
        allocator.reset(false)
    }

    fn begin_recording(&self, list: &CommandBuffer) -> RhiResult<()> {
        list.begin()
    }

    fn end_recording(&self, list: &CommandBuffer) -> RhiResult<()> {
        list.end()
    }

    fn submit(
        &self,
        lists: &[&CommandBuffer],
        dependency: GpuDependency<vk::Semaphore>,
    ) -> RhiResult<()> {
        let command_buffers: Vec<vk::CommandBuffer> = lists.iter().map(|l| l.handle()).collect();
        let wait_semaphores = dependency.wait.as_slice();
        let wait_stages = [IMAGE_READY_WAIT_STAGE];
        let signal_semaphores = dependency.signal.as_slice();

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(&wait_stages[..wait_semaphores.len()])
            .command_buffers(&command_buffers)
            .signal_semaphores(signal_semaphores);

        unsafe { self.device.submit_graphics(&[submit_info])? };

        trace!(
            "Submitted {} command buffer(s) (wait: {}, signal: {})",
            command_buffers.len(),
            wait_semaphores.len(),
            signal_semaphores.len()
        );
        Ok(())
    }

    fn signal(&self, value: u64) -> RhiResult<()> {
        let semaphores = [self.timeline.handle()];
        let values = [value];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&values);
        let submit_info = vk::SubmitInfo::default()
            .signal_semaphores(&semaphores)
            .push_next(&mut timeline_info);

        unsafe { self.device.submit_graphics(&[submit_info])? };

        trace!("Timeline signal {} enqueued", value);
        Ok(())
    }

    fn completed_value(&self) -> RhiResult<u64> {
        self.timeline.value()
    }

    fn wait_for_value(&self, value: u64, timeout: Duration) -> RhiResult<()> {
        debug!("Waiting for timeline value {}", value);
        self.timeline.wait(value, timeout)
    }
}
