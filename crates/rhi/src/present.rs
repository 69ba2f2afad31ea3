//! The presentation-engine boundary.
//!
//! A [`PresentEngine`] owns a fixed ring of presentable images and decides
//! which one is current. The application never picks the next image: it asks
//! after each present (or refresh) and renders into whatever it is handed.

use crate::error::RhiResult;

/// Result of handing an image to the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// The image was queued for display and the next one is current.
    Presented,
    /// The ring no longer matches the window or the requested present mode
    /// and must be rebuilt before the next frame.
    Stale,
}

impl PresentOutcome {
    /// Returns true if the ring must be rebuilt.
    #[inline]
    pub fn is_stale(self) -> bool {
        self == PresentOutcome::Stale
    }
}

/// Display-side provider of a presentable image ring.
pub trait PresentEngine {
    /// Handle to one presentable image.
    type Image: Copy;
    /// GPU-to-GPU synchronization object.
    type Semaphore: Copy;

    /// Number of images in the ring (at least 2).
    fn image_count(&self) -> usize;

    /// Index of the current image, or `None` when no image is held
    /// (the ring went stale before one could be fetched).
    fn current_index(&self) -> Option<usize>;

    /// Returns the image at `index`.
    fn image(&self, index: usize) -> Self::Image;

    /// Semaphore the frame's submission must wait on before writing the
    /// current image.
    fn image_ready(&self) -> Option<Self::Semaphore>;

    /// Semaphore the frame's submission must signal; presentation waits on it.
    fn render_complete(&self) -> Option<Self::Semaphore>;

    /// Queues the current image for display and fetches the next one.
    ///
    /// Does not wait for GPU completion. With `vsync` the call may block
    /// until the display is ready to accept another image.
    fn present(&mut self, vsync: bool) -> RhiResult<PresentOutcome>;

    /// Fetches the current image if none is held.
    fn refresh(&mut self) -> RhiResult<()>;

    /// Blocks until every queued present has consumed its wait semaphore.
    ///
    /// Presents may run on a queue the completion counter does not cover, so
    /// this must be called before the ring's semaphores are destroyed.
    fn wait_presents(&mut self) -> RhiResult<()>;
}
