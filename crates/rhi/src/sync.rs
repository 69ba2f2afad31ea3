//! Synchronization primitives for Vulkan.
//!
//! This module provides wrappers for the two kinds of Vulkan semaphore the
//! frame pipeline uses:
//! - [`Semaphore`] - binary, GPU-to-GPU (swapchain acquire and present)
//! - [`TimelineSemaphore`] - 64-bit monotonically increasing payload, the
//!   device-side home of the completion counter
//!
//! # Overview
//!
//! A timeline semaphore replaces the usual per-frame fences: every frame
//! signals the next integer on one semaphore, and the host learns how far the
//! GPU has progressed either by reading the current payload (non-blocking) or
//! by waiting until the payload reaches a value (blocking, with a timeout).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use inflight_rhi::device::Device;
//! use inflight_rhi::sync::TimelineSemaphore;
//!
//! # fn example(device: Arc<Device>) -> Result<(), inflight_rhi::RhiError> {
//! let timeline = TimelineSemaphore::new(device, 0)?;
//!
//! // ... submit work that signals value 1 ...
//!
//! timeline.wait(1, Duration::from_secs(5))?;
//! assert!(timeline.value()? >= 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Vulkan binary semaphore wrapper.
///
/// Binary semaphores order GPU work against the presentation engine:
/// - Image ready: signaled by swapchain acquisition, waited by the frame's submission
/// - Render complete: signaled by the frame's submission, waited by present
///
/// # Thread Safety
///
/// The semaphore is immutable after creation and can be safely shared between
/// threads.
pub struct Semaphore {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan semaphore handle.
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new binary semaphore in the unsignaled state.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();

        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        debug!("Created binary semaphore");

        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed binary semaphore");
    }
}

/// Vulkan timeline semaphore wrapper.
///
/// The payload only ever increases. A queue signal operation sets it once
/// every command submitted before the signal has finished executing, which
/// is what lets "payload >= N" stand for "submission N and everything before
/// it has retired".
///
/// # Thread Safety
///
/// Reads and host waits may happen from any thread. Signals go through a
/// queue submission and therefore inherit the queue's external
/// synchronization requirements.
pub struct TimelineSemaphore {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan semaphore handle.
    semaphore: vk::Semaphore,
}

impl TimelineSemaphore {
    /// Creates a new timeline semaphore with the given initial payload.
    ///
    /// The device must have been created with the `timelineSemaphore`
    /// feature enabled (see [`Device::new`]).
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<Device>, initial_value: u64) -> RhiResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        debug!("Created timeline semaphore (initial value {})", initial_value);

        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Reads the current payload without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails (typically device loss).
    pub fn value(&self) -> RhiResult<u64> {
        let value = unsafe {
            self.device
                .handle()
                .get_semaphore_counter_value(self.semaphore)?
        };
        Ok(value)
    }

    /// Blocks the calling thread until the payload reaches `value`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::WaitTimeout`] if `timeout` expires first, or a
    /// Vulkan error if the wait itself fails.
    pub fn wait(&self, value: u64, timeout: Duration) -> RhiResult<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        let result = unsafe {
            self.device
                .handle()
                .wait_semaphores(&wait_info, timeout_nanos(timeout))
        };

        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RhiError::WaitTimeout { value, timeout }),
            Err(e) => Err(RhiError::VulkanError(e)),
        }
    }
}

impl Drop for TimelineSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed timeline semaphore");
    }
}

/// Converts a timeout into the nanosecond count Vulkan expects, saturating.
fn timeout_nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}
