//! Platform abstraction layer for inflight.
//!
//! This crate provides platform-specific functionality:
//! - Window management via winit
//! - Instance extensions and raw window handles for Vulkan surface creation

mod window;

pub use window::{Surface, Window};

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::EventLoop;
