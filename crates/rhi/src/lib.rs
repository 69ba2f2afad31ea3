//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides a safe abstraction over Vulkan using the `ash` crate.
//! It handles:
//! - Instance and device creation (Vulkan 1.2, timeline semaphores enabled)
//! - Swapchain management
//! - Command pool and command buffer recording
//! - Staging buffers and device-local images
//! - Binary and timeline semaphores
//!
//! It also defines the two seams the frame pipeline is written against,
//! [`queue::SubmissionQueue`] and [`present::PresentEngine`], and their Vulkan
//! implementations [`queue::VulkanQueue`] and [`swapchain::Swapchain`].

mod error;

pub mod buffer;
pub mod command;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod present;
pub mod queue;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};
pub use present::{PresentEngine, PresentOutcome};
pub use queue::{GpuDependency, SubmissionQueue};

// Re-export ash types that users might need
pub use ash::vk;
