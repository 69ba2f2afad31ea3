//! Vulkan renderer orchestration.
//!
//! This module provides the [`Renderer`], which builds the Vulkan objects,
//! wires a [`VulkanQueue`] and a [`Swapchain`] into a [`FramePipeline`], and
//! records each frame with transfer commands only: clear the current
//! swapchain image to an animated colour and copy a small tile into it.

use std::f32::consts::TAU;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use tracing::{debug, error, info, warn};

use inflight_core::{Config, Timer};
use inflight_platform::{Surface, Window};
use inflight_rhi::buffer::Buffer;
use inflight_rhi::command::CommandBuffer;
use inflight_rhi::device::Device;
use inflight_rhi::image::Image;
use inflight_rhi::instance::Instance;
use inflight_rhi::physical_device::select_physical_device;
use inflight_rhi::queue::{IMAGE_READY_WAIT_STAGE, VulkanQueue};
use inflight_rhi::swapchain::{Swapchain, SwapchainConfig};
use inflight_rhi::{RhiError, RhiResult};

use crate::frame_sync::FrameSynchronizer;
use crate::pipeline::{FrameOutcome, FramePipeline};
use crate::presentation::PresentationSurface;

/// Edge length of the uploaded tile, in texels.
pub const TILE_SIZE: u32 = 64;

/// Format of the tile; one [`Texel`] per pixel.
const TILE_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

/// Offset of the tile from the top-left corner of the frame.
const TILE_OFFSET: i32 = 32;

/// Seconds for one full cycle of the clear colour.
const CLEAR_PERIOD_SECS: f32 = 4.0;

const CLEAR_FROM: Vec4 = Vec4::new(0.05, 0.05, 0.10, 1.0);
const CLEAR_TO: Vec4 = Vec4::new(0.10, 0.35, 0.55, 1.0);

/// How often the frame rate is logged.
const FPS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// One texel of the tile, in B, G, R, A order.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
struct Texel {
    channels: [u8; 4],
}

/// Main renderer that owns every Vulkan object.
///
/// # Resource Destruction Order
///
/// 1. Drain the GPU (final idle wait on the frame synchronizer)
/// 2. Destroy the tile image
/// 3. Destroy the frame pipeline (command pools, timeline semaphore, swapchain)
/// 4. Destroy the surface
/// 5. Release the device
/// 6. Destroy the instance
///
/// ManuallyDrop is used to ensure correct destruction order.
pub struct Renderer {
    /// Vulkan instance (destroyed last).
    instance: ManuallyDrop<Instance>,
    /// Logical device.
    device: ManuallyDrop<Arc<Device>>,
    /// Window surface (destroyed after the swapchain).
    surface: ManuallyDrop<Surface>,
    /// Synchronizer, presentation ring and pacing settings.
    pipeline: ManuallyDrop<FramePipeline<VulkanQueue, Swapchain>>,
    /// Device-local copy of the tile, in TRANSFER_SRC_OPTIMAL layout.
    tile: ManuallyDrop<Image>,
    /// Drives the clear-colour animation and frame-rate reports.
    timer: Timer,
    /// Size to rebuild the swapchain for before the next frame.
    pending_resize: Option<(u32, u32)>,
    width: u32,
    height: u32,
}

impl Renderer {
    /// Creates a renderer for the given window.
    ///
    /// Builds instance, surface, device, swapchain and synchronizer, then
    /// uploads the tile through a one-shot submission.
    ///
    /// # Errors
    ///
    /// Returns an error naming the step that failed; startup must abort.
    pub fn new(window: &Window, config: &Config) -> RhiResult<Self> {
        let width = window.width();
        let height = window.height();

        info!("Initializing Vulkan renderer ({}x{})", width, height);

        let surface_extensions = window
            .required_extensions()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        // Validation in debug builds
        let instance = Instance::new(cfg!(debug_assertions), &surface_extensions)?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let physical_device_info =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;

        let device = Device::new(&instance, &physical_device_info)?;

        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            surface.handle(),
            &SwapchainConfig {
                width,
                height,
                buffer_count: config.swapchain.buffer_count,
                vsync: config.swapchain.vsync,
                frames_in_flight: config.frames.max_in_flight,
            },
        )?;

        let queue = VulkanQueue::new(device.clone())?;
        let max_in_flight = config.frames.max_in_flight;
        let mut sync = FrameSynchronizer::new(
            queue,
            max_in_flight as usize,
            config.frames.wait_timeout(),
        )?;

        let tile = upload_tile(&mut sync, &device)?;

        let pipeline = FramePipeline::new(
            sync,
            PresentationSurface::new(swapchain),
            u64::from(max_in_flight),
            config.swapchain.vsync,
        );

        info!("Renderer initialized");

        Ok(Self {
            instance: ManuallyDrop::new(instance),
            device: ManuallyDrop::new(device),
            surface: ManuallyDrop::new(surface),
            pipeline: ManuallyDrop::new(pipeline),
            tile: ManuallyDrop::new(tile),
            timer: Timer::new(),
            pending_resize: None,
            width,
            height,
        })
    }

    /// Notifies the renderer that the window has been resized.
    ///
    /// The swapchain is rebuilt before the next frame. A zero-sized window
    /// (minimized) pauses rendering until it is restored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) == (self.width, self.height) {
            return;
        }
        debug!("Resize requested: {}x{}", width, height);
        self.width = width;
        self.height = height;
        self.pending_resize = Some((width, height));
    }

    /// Changes the vsync setting.
    ///
    /// The next present reports the swapchain stale and it is rebuilt with
    /// the matching present mode.
    pub fn set_vsync(&mut self, vsync: bool) {
        if vsync != self.pipeline.vsync() {
            info!("Vsync {}", if vsync { "on" } else { "off" });
            self.pipeline.set_vsync(vsync);
        }
    }

    /// Returns the vsync setting.
    pub fn vsync(&self) -> bool {
        self.pipeline.vsync()
    }

    /// Renders and presents one frame.
    ///
    /// # Errors
    ///
    /// Returns an error on any submission, presentation or wait failure.
    /// These are fatal; the caller should stop the frame loop.
    pub fn render_frame(&mut self) -> RhiResult<()> {
        if self.width == 0 || self.height == 0 {
            return Ok(());
        }

        if let Some((width, height)) = self.pending_resize.take() {
            self.rebuild_swapchain(width, height)?;
        }

        let color = clear_color(self.timer.elapsed_secs());
        let swapchain = self.pipeline.surface().engine();
        let extent = swapchain.extent();
        let tile = copy_compatible(TILE_FORMAT, swapchain.format())
            .then(|| (self.tile.handle(), self.tile.extent()));

        let outcome = self.pipeline.run_frame(|cmd, target| {
            record_frame(cmd, target.image, extent, color, tile);
        })?;

        if outcome == FrameOutcome::SurfaceStale {
            self.rebuild_swapchain(self.width, self.height)?;
        }

        self.timer.tick();
        if let Some(fps) = self.timer.fps_every(FPS_LOG_INTERVAL) {
            let sync = self.pipeline.sync();
            info!(
                "{:.1} fps ({} frames, completion counter {})",
                fps,
                self.pipeline.frame_count(),
                sync.counter()
            );
        }

        Ok(())
    }

    /// Drains the GPU and rebuilds the swapchain.
    fn rebuild_swapchain(&mut self, width: u32, height: u32) -> RhiResult<()> {
        let instance = &*self.instance;
        let surface = self.surface.handle();
        let vsync = self.pipeline.vsync();

        self.pipeline
            .rebuild_surface(|swapchain| swapchain.recreate(instance, surface, width, height, vsync))
    }

    /// Runs the final idle drain. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns an error if the drain fails.
    pub fn shutdown(&mut self) -> RhiResult<()> {
        self.pipeline.shutdown()
    }

    /// Returns the current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.pipeline.surface().engine().extent()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.shutdown() {
            error!("Failed to drain GPU during renderer drop: {}", e);
        }

        // The timeline only covers the graphics queue.
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during drop: {}", e);
        }

        unsafe {
            ManuallyDrop::drop(&mut self.tile);
            ManuallyDrop::drop(&mut self.pipeline);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Renderer destroyed");
    }
}

/// Uploads the tile through a staging buffer and returns the device-local image.
fn upload_tile(
    sync: &mut FrameSynchronizer<VulkanQueue>,
    device: &Arc<Device>,
) -> RhiResult<Image> {
    let texels = tile_texels(TILE_SIZE);
    let staging = Buffer::staging_with_data(device.clone(), bytemuck::cast_slice(&texels))?;
    let tile = Image::new(device.clone(), TILE_SIZE, TILE_SIZE, TILE_FORMAT)?;

    let region = vk::BufferImageCopy::default()
        .image_subresource(Image::color_subresource_layers())
        .image_extent(vk::Extent3D {
            width: TILE_SIZE,
            height: TILE_SIZE,
            depth: 1,
        });

    let upload = sync.execute_immediate(|cmd| {
        transition(
            cmd,
            tile.handle(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        cmd.copy_buffer_to_image(
            staging.handle(),
            tile.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
        transition(
            cmd,
            tile.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
    });

    if let Err(e) = upload {
        // The copy may still be reading both; they must outlive it.
        error!("Tile upload did not complete, leaking its buffer and image");
        std::mem::forget(staging);
        std::mem::forget(tile);
        return Err(e);
    }

    info!("Uploaded {}x{} tile ({} bytes)", TILE_SIZE, TILE_SIZE, staging.size());
    Ok(tile)
}

/// Records one frame into `cmd` targeting `target`.
///
/// `tile` is copied in only when given; its format must be copy-compatible
/// with the target's.
fn record_frame(
    cmd: &CommandBuffer,
    target: vk::Image,
    extent: vk::Extent2D,
    color: Vec4,
    tile: Option<(vk::Image, vk::Extent2D)>,
) {
    // Contents of the previous frame are discarded.
    transition(
        cmd,
        target,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    cmd.clear_color_image(
        target,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &vk::ClearColorValue {
            float32: color.to_array(),
        },
        &[Image::color_subresource_range()],
    );

    if let Some((tile, tile_extent)) = tile
        && let Some(copy_extent) = tile_copy_extent(extent, tile_extent)
    {
        // Clear and copy both write the image.
        transition(
            cmd,
            target,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );

        let region = vk::ImageCopy::default()
            .src_subresource(Image::color_subresource_layers())
            .dst_subresource(Image::color_subresource_layers())
            .dst_offset(vk::Offset3D {
                x: TILE_OFFSET,
                y: TILE_OFFSET,
                z: 0,
            })
            .extent(copy_extent);
        cmd.copy_image(
            tile,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            target,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    }

    transition(
        cmd,
        target,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::PRESENT_SRC_KHR,
    );
}

/// Records an image layout transition for a single-level color image.
fn transition(
    cmd: &CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let masks = transition_masks(old_layout, new_layout);

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(Image::color_subresource_range())
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access);

    cmd.pipeline_barrier(masks.src_stage, masks.dst_stage, &[barrier]);
}

/// Stage and access masks of one layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TransitionMasks {
    src_stage: vk::PipelineStageFlags,
    src_access: vk::AccessFlags,
    dst_stage: vk::PipelineStageFlags,
    dst_access: vk::AccessFlags,
}

fn transition_masks(old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> TransitionMasks {
    let (src_stage, src_access, dst_stage, dst_access) = match (old_layout, new_layout) {
        // Presentable image: chained to the image-ready semaphore wait.
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            IMAGE_READY_WAIT_STAGE,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL) => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_READ,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR) => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
        _ => {
            warn!(
                "Unhandled layout transition: {:?} -> {:?}",
                old_layout, new_layout
            );
            (
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            )
        }
    };

    TransitionMasks {
        src_stage,
        src_access,
        dst_stage,
        dst_access,
    }
}

/// Clear colour at `elapsed_secs`, oscillating between two tones.
fn clear_color(elapsed_secs: f32) -> Vec4 {
    let phase = (elapsed_secs / CLEAR_PERIOD_SECS * TAU).sin() * 0.5 + 0.5;
    CLEAR_FROM.lerp(CLEAR_TO, phase)
}

/// Bytes per texel of the uncompressed color formats a swapchain may use.
fn texel_size(format: vk::Format) -> Option<u32> {
    match format {
        vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::A8B8G8R8_UNORM_PACK32
        | vk::Format::A8B8G8R8_SRGB_PACK32
        | vk::Format::A2R10G10B10_UNORM_PACK32
        | vk::Format::A2B10G10R10_UNORM_PACK32 => Some(4),
        vk::Format::R16G16B16A16_SFLOAT | vk::Format::R16G16B16A16_UNORM => Some(8),
        _ => None,
    }
}

/// Returns true if `vkCmdCopyImage` may copy between the two formats.
fn copy_compatible(src: vk::Format, dst: vk::Format) -> bool {
    matches!((texel_size(src), texel_size(dst)), (Some(a), Some(b)) if a == b)
}

/// Part of the tile that fits inside the frame at [`TILE_OFFSET`].
fn tile_copy_extent(frame: vk::Extent2D, tile: vk::Extent2D) -> Option<vk::Extent3D> {
    let offset = TILE_OFFSET as u32;
    let width = frame.width.saturating_sub(offset).min(tile.width);
    let height = frame.height.saturating_sub(offset).min(tile.height);

    (width > 0 && height > 0).then_some(vk::Extent3D {
        width,
        height,
        depth: 1,
    })
}

/// Checkerboard of 8x8 cells with a bright border.
fn tile_texels(size: u32) -> Vec<Texel> {
    const LIGHT: Texel = Texel {
        channels: [230, 230, 230, 255],
    };
    const DARK: Texel = Texel {
        channels: [40, 40, 40, 255],
    };
    const BORDER: Texel = Texel {
        channels: [0, 200, 255, 255],
    };

    (0..size)
        .flat_map(|y| (0..size).map(move |x| (x, y)))
        .map(|(x, y)| {
            if x == 0 || y == 0 || x == size - 1 || y == size - 1 {
                BORDER
            } else if (x / 8 + y / 8) % 2 == 0 {
                LIGHT
            } else {
                DARK
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_color_stays_between_endpoints() {
        for step in 0..16 {
            let color = clear_color(step as f32 * 0.37);
            let lo = CLEAR_FROM.min(CLEAR_TO);
            let hi = CLEAR_FROM.max(CLEAR_TO);
            assert!(color.cmpge(lo - Vec4::splat(1e-5)).all());
            assert!(color.cmple(hi + Vec4::splat(1e-5)).all());
        }
    }

    #[test]
    fn test_clear_color_starts_halfway() {
        let expected = CLEAR_FROM.lerp(CLEAR_TO, 0.5);
        assert!(clear_color(0.0).abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn test_tile_texels_layout() {
        let texels = tile_texels(TILE_SIZE);
        assert_eq!(texels.len(), (TILE_SIZE * TILE_SIZE) as usize);
        assert_eq!(texels[0].channels, [0, 200, 255, 255]);
        // (1, 1) is in the first, light cell; (9, 1) is in the second, dark one.
        assert_eq!(texels[(TILE_SIZE + 1) as usize].channels, [230, 230, 230, 255]);
        assert_eq!(texels[(TILE_SIZE + 9) as usize].channels, [40, 40, 40, 255]);

        let bytes: &[u8] = bytemuck::cast_slice(&texels);
        assert_eq!(bytes.len(), texels.len() * 4);
    }

    #[test]
    fn test_tile_copy_extent_fits_frame() {
        let tile = vk::Extent2D {
            width: TILE_SIZE,
            height: TILE_SIZE,
        };

        let full = tile_copy_extent(
            vk::Extent2D {
                width: 1280,
                height: 720,
            },
            tile,
        );
        assert_eq!(
            full,
            Some(vk::Extent3D {
                width: TILE_SIZE,
                height: TILE_SIZE,
                depth: 1
            })
        );

        let clipped = tile_copy_extent(
            vk::Extent2D {
                width: 40,
                height: 720,
            },
            tile,
        );
        assert_eq!(clipped.map(|e| e.width), Some(8));

        let none = tile_copy_extent(
            vk::Extent2D {
                width: 16,
                height: 16,
            },
            tile,
        );
        assert_eq!(none, None);
    }

    #[test]
    fn test_tile_copy_requires_matching_texel_size() {
        assert_eq!(texel_size(TILE_FORMAT), Some(4));
        assert!(copy_compatible(TILE_FORMAT, vk::Format::B8G8R8A8_SRGB));
        assert!(copy_compatible(TILE_FORMAT, vk::Format::A2B10G10R10_UNORM_PACK32));
        assert!(!copy_compatible(TILE_FORMAT, vk::Format::R16G16B16A16_SFLOAT));
        assert!(!copy_compatible(TILE_FORMAT, vk::Format::UNDEFINED));
    }

    #[test]
    fn test_tile_upload_size_is_independent_of_swapchain() {
        let texels = tile_texels(TILE_SIZE);
        let bytes: &[u8] = bytemuck::cast_slice(&texels);
        let expected = texel_size(TILE_FORMAT).map(|size| (TILE_SIZE * TILE_SIZE * size) as usize);
        assert_eq!(Some(bytes.len()), expected);
    }

    #[test]
    fn test_present_transition_waits_on_transfers() {
        let masks = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(masks.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(masks.dst_access, vk::AccessFlags::empty());
    }

    #[test]
    fn test_first_transition_chains_to_image_ready_wait() {
        let masks = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert_eq!(masks.src_stage, IMAGE_READY_WAIT_STAGE);
        assert_eq!(masks.dst_access, vk::AccessFlags::TRANSFER_WRITE);
    }

    #[test]
    fn test_unknown_transition_falls_back_to_full_barrier() {
        let masks = transition_masks(
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::ALL_COMMANDS);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::ALL_COMMANDS);
    }
}
