//! CPU/GPU frame pacing.
//!
//! This crate coordinates the CPU producing frames with the GPU consuming them:
//! - [`FrameSynchronizer`]: completion counter, recording slots, bounded waits
//! - [`PresentationSurface`]: ring of presentable buffers
//! - [`FramePipeline`]: the per-frame driver joining the two
//! - [`Renderer`]: the Vulkan instantiation behind a window

pub mod frame_sync;
pub mod pipeline;
pub mod presentation;
mod renderer;

pub use frame_sync::{FrameSynchronizer, RecordingSlot, SlotState};
pub use pipeline::{FrameOutcome, FramePipeline};
pub use presentation::{BufferHandle, PresentationSurface};
pub use renderer::{Renderer, TILE_SIZE};
