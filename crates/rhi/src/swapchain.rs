//! Swapchain management.
//!
//! This module handles VkSwapchainKHR creation, image acquisition, and
//! presentation, and implements [`PresentEngine`] on top of them.
//!
//! # Overview
//!
//! The [`Swapchain`] struct provides a safe abstraction over the Vulkan swapchain,
//! including:
//! - Surface capability querying
//! - Format and present mode selection (the present mode follows the vsync flag)
//! - Acquire-after-present, so an image is always held between frames
//! - Per-image render-complete semaphores and a small pool of acquire semaphores
//! - Rebuild on resize or vsync change
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use inflight_rhi::instance::Instance;
//! use inflight_rhi::device::Device;
//! use inflight_rhi::present::PresentEngine;
//! use inflight_rhi::swapchain::{Swapchain, SwapchainConfig};
//! use ash::vk;
//!
//! # fn example(instance: &Instance, device: Arc<Device>, surface: vk::SurfaceKHR)
//! #     -> Result<(), inflight_rhi::RhiError> {
//! let config = SwapchainConfig {
//!     width: 1280,
//!     height: 720,
//!     buffer_count: 3,
//!     vsync: false,
//!     frames_in_flight: 3,
//! };
//! let mut swapchain = Swapchain::new(instance, device, surface, &config)?;
//!
//! // In render loop:
//! // ... record into swapchain.image(swapchain.current_index().unwrap()) ...
//! let outcome = swapchain.present(false)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::present::{PresentEngine, PresentOutcome};
use crate::sync::Semaphore;

/// Image usage requested for swapchain images.
///
/// Frames are composed with transfer commands, so TRANSFER_DST is required.
const IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw() | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// Swapchain creation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    /// Desired width (ignored when the surface dictates its extent).
    pub width: u32,
    /// Desired height (ignored when the surface dictates its extent).
    pub height: u32,
    /// Requested ring depth; clamped to what the surface allows.
    pub buffer_count: u32,
    /// FIFO when true, otherwise MAILBOX or IMMEDIATE when available.
    pub vsync: bool,
    /// Frames the CPU may run ahead; sizes the acquire semaphore pool.
    pub frames_in_flight: u32,
}

/// Swapchain surface support details.
///
/// Contains information about what the surface supports for swapchain creation.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Checks if the swapchain support is adequate for rendering.
    ///
    /// Returns true if at least one format and one present mode are available
    /// and images can be written by transfer commands.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty()
            && !self.present_modes.is_empty()
            && self
                .capabilities
                .supported_usage_flags
                .contains(vk::ImageUsageFlags::TRANSFER_DST)
    }
}

/// The image currently held by the application.
#[derive(Debug, Clone, Copy)]
struct AcquiredImage {
    index: u32,
    ready: vk::Semaphore,
}

/// How an acquisition ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcquireStatus {
    /// An image is held and the swapchain matches the surface.
    Ready,
    /// An image is held, but the swapchain should be rebuilt after it is presented.
    ReadySuboptimal,
    /// No image is held; the swapchain must be rebuilt first.
    OutOfDate,
}

/// Maps the result of `vkAcquireNextImageKHR` onto an [`AcquireStatus`].
fn classify_acquire(result: RhiResult<bool>) -> RhiResult<AcquireStatus> {
    match result {
        Ok(false) => Ok(AcquireStatus::Ready),
        Ok(true) => Ok(AcquireStatus::ReadySuboptimal),
        Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DATE_KHR)) => {
            Ok(AcquireStatus::OutOfDate)
        }
        Err(e) => Err(e),
    }
}

/// Vulkan swapchain wrapper.
///
/// At most one image is held at a time. It is acquired at construction and
/// again right after each successful present, so the current index is known
/// before the next frame starts recording.
///
/// # Thread Safety
///
/// The swapchain is not thread-safe. Only the frame driver touches it.
pub struct Swapchain {
    /// Reference to the logical device
    device: Arc<Device>,
    /// Swapchain extension loader
    swapchain_loader: ash::khr::swapchain::Device,
    /// Swapchain handle
    swapchain: vk::SwapchainKHR,
    /// Swapchain images (owned by the swapchain)
    images: Vec<vk::Image>,
    /// One render-complete semaphore per image, waited by present
    render_complete: Vec<Semaphore>,
    /// Acquire semaphores, rotated per acquisition
    acquire_semaphores: Vec<Semaphore>,
    /// Next acquire semaphore to use
    next_acquire: usize,
    /// Image held by the application, if any
    acquired: Option<AcquiredImage>,
    /// Set by a suboptimal acquire; the held image is presented before rebuilding
    rebuild_pending: bool,
    /// Swapchain image format
    format: vk::Format,
    /// Swapchain extent (resolution)
    extent: vk::Extent2D,
    /// Present mode
    present_mode: vk::PresentModeKHR,
    /// Parameters the swapchain was built with
    config: SwapchainConfig,
}

impl Swapchain {
    /// Creates a new swapchain and acquires its first image.
    ///
    /// This function creates a swapchain with:
    /// - Preferred format: B8G8R8A8_SRGB with SRGB_NONLINEAR color space
    /// - Present mode chosen from `config.vsync`
    /// - Image usage: COLOR_ATTACHMENT | TRANSFER_DST
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Surface queries fail
    /// - No suitable format or present mode is available
    /// - Swapchain or semaphore creation fails
    /// - The first image cannot be acquired
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        config: &SwapchainConfig,
    ) -> RhiResult<Self> {
        let mut swapchain =
            Self::create_internal(instance, device, surface, config, vk::SwapchainKHR::null())?;
        swapchain.acquire_next()?;
        Ok(swapchain)
    }

    /// Creates a new swapchain, optionally retiring an old one.
    fn create_internal(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        config: &SwapchainConfig,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        let support =
            SwapchainSupportDetails::query(device.physical_device(), surface, &surface_loader)?;

        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Inadequate swapchain support (no formats, no present modes, or no TRANSFER_DST)"
                    .to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes, config.vsync);
        let extent = choose_extent(&support.capabilities, config.width, config.height);
        let image_count = determine_image_count(&support.capabilities, config.buffer_count);

        info!(
            "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images requested",
            extent.width, extent.height, surface_format.format, present_mode, image_count
        );

        let queue_families = device.queue_families();
        let (graphics_family, present_family) =
            match (queue_families.graphics_family, queue_families.present_family) {
                (Some(graphics), Some(present)) => (graphics, present),
                _ => {
                    return Err(RhiError::SwapchainError(
                        "Device has no graphics or present queue family".to_string(),
                    ));
                }
            };
        let queue_family_indices = [graphics_family, present_family];

        let (sharing_mode, queue_family_indices_slice) = if graphics_family != present_family {
            debug!(
                "Using CONCURRENT sharing mode between graphics ({}) and present ({}) queues",
                graphics_family, present_family
            );
            (vk::SharingMode::CONCURRENT, queue_family_indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(IMAGE_USAGE)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(queue_family_indices_slice)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };

        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain)? };
        info!("Swapchain created with {} images", images.len());

        let render_complete = (0..images.len())
            .map(|_| Semaphore::new(device.clone()))
            .collect::<RhiResult<Vec<_>>>()?;
        let acquire_semaphores = (0..config.frames_in_flight.max(1) + 1)
            .map(|_| Semaphore::new(device.clone()))
            .collect::<RhiResult<Vec<_>>>()?;

        Ok(Self {
            device,
            swapchain_loader,
            swapchain,
            images,
            render_complete,
            acquire_semaphores,
            next_acquire: 0,
            acquired: None,
            rebuild_pending: false,
            format: surface_format.format,
            extent,
            present_mode,
            config: *config,
        })
    }

    /// Rebuilds the swapchain for a new size and vsync setting.
    ///
    /// This should be called when the window is resized or when
    /// [`PresentEngine::present`] reports [`PresentOutcome::Stale`].
    ///
    /// The caller must have drained the GPU first: no submission may still
    /// reference the old images or semaphores.
    ///
    /// # Errors
    ///
    /// Returns an error if swapchain recreation fails.
    pub fn recreate(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> RhiResult<()> {
        // Acquire semaphores may still be pending on the presentation engine.
        self.device.wait_idle()?;

        info!(
            "Recreating swapchain: {}x{}, vsync {}",
            width,
            height,
            if vsync { "on" } else { "off" }
        );

        let config = SwapchainConfig {
            width,
            height,
            vsync,
            ..self.config
        };
        let new_swapchain = Self::create_internal(
            instance,
            self.device.clone(),
            surface,
            &config,
            self.swapchain,
        )?;

        // Dropping the old value destroys the retired swapchain and its semaphores.
        drop(std::mem::replace(self, new_swapchain));
        self.acquire_next()?;
        Ok(())
    }

    /// Acquires the next image with the next semaphore from the pool.
    ///
    /// Returns whether the swapchain reported itself suboptimal.
    fn acquire_next(&mut self) -> RhiResult<bool> {
        let ready = self.acquire_semaphores[self.next_acquire].handle();
        self.next_acquire = (self.next_acquire + 1) % self.acquire_semaphores.len();

        let (index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                ready,
                vk::Fence::null(),
            )?
        };

        self.acquired = Some(AcquiredImage { index, ready });
        Ok(suboptimal)
    }

    /// Returns the swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Returns the swapchain image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the swapchain extent (resolution).
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the present mode.
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Returns whether the swapchain was built for vsync.
    #[inline]
    pub fn vsync(&self) -> bool {
        self.config.vsync
    }
}

impl PresentEngine for Swapchain {
    type Image = vk::Image;
    type Semaphore = vk::Semaphore;

    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn current_index(&self) -> Option<usize> {
        self.acquired.map(|a| a.index as usize)
    }

    fn image(&self, index: usize) -> vk::Image {
        self.images[index]
    }

    fn image_ready(&self) -> Option<vk::Semaphore> {
        self.acquired.map(|a| a.ready)
    }

    fn render_complete(&self) -> Option<vk::Semaphore> {
        self.acquired
            .map(|a| self.render_complete[a.index as usize].handle())
    }

    fn present(&mut self, vsync: bool) -> RhiResult<PresentOutcome> {
        let acquired = self.acquired.take().ok_or_else(|| {
            RhiError::SwapchainError("present called with no acquired image".to_string())
        })?;

        let swapchains = [self.swapchain];
        let image_indices = [acquired.index];
        let wait_semaphores = [self.render_complete[acquired.index as usize].handle()];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.swapchain_loader
                .queue_present(self.device.present_queue(), &present_info)
        };

        let mut stale = match result {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(e) => return Err(e.into()),
        };

        // A suboptimal image acquired last frame has now been presented.
        stale |= std::mem::take(&mut self.rebuild_pending);

        if vsync != self.config.vsync {
            debug!(
                "Vsync changed to {}; swapchain must be rebuilt",
                if vsync { "on" } else { "off" }
            );
            stale = true;
        }

        if stale {
            return Ok(PresentOutcome::Stale);
        }

        match classify_acquire(self.acquire_next())? {
            AcquireStatus::Ready => Ok(PresentOutcome::Presented),
            AcquireStatus::ReadySuboptimal => {
                debug!("Acquired a suboptimal image; rebuilding after it is presented");
                self.rebuild_pending = true;
                Ok(PresentOutcome::Presented)
            }
            AcquireStatus::OutOfDate => Ok(PresentOutcome::Stale),
        }
    }

    fn refresh(&mut self) -> RhiResult<()> {
        if self.acquired.is_some() {
            return Ok(());
        }
        match classify_acquire(self.acquire_next())? {
            AcquireStatus::Ready => Ok(()),
            AcquireStatus::ReadySuboptimal => {
                warn!("Swapchain is suboptimal right after acquisition");
                self.rebuild_pending = true;
                Ok(())
            }
            AcquireStatus::OutOfDate => Err(vk::Result::ERROR_OUT_OF_DATE_KHR.into()),
        }
    }

    fn wait_presents(&mut self) -> RhiResult<()> {
        // Covers the present queue when it differs from the graphics queue.
        self.device.wait_idle()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }

        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

/// Chooses the best surface format from the available formats.
///
/// Prefers B8G8R8A8_SRGB with SRGB_NONLINEAR color space.
/// Falls back to the first available format if the preferred format is not available.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = preferred {
        debug!("Selected preferred surface format: B8G8R8A8_SRGB with SRGB_NONLINEAR");
        return format;
    }

    let alternative = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = alternative {
        warn!("Using fallback surface format: B8G8R8A8_UNORM with SRGB_NONLINEAR");
        return format;
    }

    warn!(
        "Using first available surface format: {:?}",
        formats[0].format
    );
    formats[0]
}

/// Chooses the present mode for the vsync setting.
///
/// With vsync: FIFO, which every implementation supports.
/// Without: MAILBOX (no tearing), then IMMEDIATE, then FIFO.
fn choose_present_mode(present_modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        debug!("Selected FIFO present mode (vsync)");
        return vk::PresentModeKHR::FIFO;
    }

    for mode in [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE] {
        if present_modes.contains(&mode) {
            debug!("Selected {:?} present mode", mode);
            return mode;
        }
    }

    warn!("No tearing-free uncapped present mode available, falling back to FIFO");
    vk::PresentModeKHR::FIFO
}

/// Chooses the swapchain extent (resolution).
///
/// If the current extent is not set (width/height are u32::MAX),
/// clamps the requested size to the surface's min/max extents.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let extent = vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };

    debug!(
        "Calculated extent: {}x{} (requested: {}x{})",
        extent.width, extent.height, width, height
    );

    extent
}

/// Determines the number of swapchain images to request.
///
/// Uses the configured ring depth, raised to the surface minimum and
/// lowered to its maximum if one is set.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let count = requested.max(capabilities.min_image_count);

    // 0 means no maximum
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}
