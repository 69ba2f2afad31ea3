//! The per-frame driver.
//!
//! [`FramePipeline`] joins a [`FrameSynchronizer`] and a
//! [`PresentationSurface`] and runs one tick in a fixed order:
//!
//! ```text
//! wait_for_slot -> begin_frame -> record -> submit_frame -> present -> signal -> advance
//! ```
//!
//! The signal follows the present, so the completion value of a frame covers
//! its presentation request too.

use tracing::{debug, info};

use inflight_rhi::{PresentEngine, PresentOutcome, RhiResult, SubmissionQueue};

use crate::frame_sync::FrameSynchronizer;
use crate::presentation::{BufferHandle, PresentationSurface};

/// What happened to one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and presented; `fence_value` is its signal.
    Presented {
        /// Completion value signaled for this frame.
        fence_value: u64,
    },
    /// The frame was submitted but the surface needs a rebuild before the
    /// next one (or was already stale and nothing was recorded).
    SurfaceStale,
}

/// Frame loop state: synchronizer, surface and the pacing settings.
pub struct FramePipeline<Q, P>
where
    Q: SubmissionQueue,
    P: PresentEngine<Semaphore = Q::Semaphore>,
{
    sync: FrameSynchronizer<Q>,
    surface: PresentationSurface<P>,
    max_in_flight: u64,
    vsync: bool,
    frames: u64,
}

impl<Q, P> FramePipeline<Q, P>
where
    Q: SubmissionQueue,
    P: PresentEngine<Semaphore = Q::Semaphore>,
{
    /// Creates a pipeline.
    ///
    /// # Panics
    ///
    /// Panics if `max_in_flight` is 0 or exceeds the synchronizer's slot
    /// count (a slot would be reused before it could retire).
    pub fn new(
        sync: FrameSynchronizer<Q>,
        surface: PresentationSurface<P>,
        max_in_flight: u64,
        vsync: bool,
    ) -> Self {
        assert!(max_in_flight >= 1, "max frames in flight must be at least 1");
        assert!(
            max_in_flight <= sync.slot_count() as u64,
            "max frames in flight ({}) exceeds the {} recording slot(s)",
            max_in_flight,
            sync.slot_count()
        );

        info!(
            "Frame pipeline: {} frame(s) in flight, {} buffers, vsync {}",
            max_in_flight,
            surface.buffer_count(),
            if vsync { "on" } else { "off" }
        );

        Self {
            sync,
            surface,
            max_in_flight,
            vsync,
            frames: 0,
        }
    }

    /// Runs one tick, letting `record` fill the frame's command list.
    ///
    /// `record` receives the list and the buffer to target. It must bracket
    /// its writes with the presentable/render-target transitions.
    ///
    /// # Errors
    ///
    /// Returns any synchronizer, submission or presentation error; all are
    /// fatal to the frame loop.
    pub fn run_frame<F>(&mut self, record: F) -> RhiResult<FrameOutcome>
    where
        F: FnOnce(&Q::CommandList, BufferHandle<P::Image>),
    {
        if self.surface.is_stale() {
            return Ok(FrameOutcome::SurfaceStale);
        }

        self.sync.wait_for_slot(self.max_in_flight)?;

        let target = self.surface.current_buffer();
        let list = self.sync.begin_frame()?;
        record(list, target);
        self.sync.submit_frame(self.surface.dependency())?;

        let outcome = self.surface.present(self.vsync)?;
        let fence_value = self.sync.signal()?;
        self.sync.advance();
        self.frames += 1;

        match outcome {
            PresentOutcome::Presented => Ok(FrameOutcome::Presented { fence_value }),
            PresentOutcome::Stale => {
                debug!("Surface went stale at frame {}", self.frames);
                Ok(FrameOutcome::SurfaceStale)
            }
        }
    }

    /// Drains the GPU, lets `rebuild` replace the presentation engine's ring,
    /// then fetches the new current buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the drain, the rebuild or the refresh fails.
    pub fn rebuild_surface<F>(&mut self, rebuild: F) -> RhiResult<()>
    where
        F: FnOnce(&mut P) -> RhiResult<()>,
    {
        self.sync.wait_idle()?;
        rebuild(self.surface.engine_mut())?;
        self.surface.refresh()?;
        info!("Surface rebuilt: {} buffers", self.surface.buffer_count());
        Ok(())
    }

    /// Returns the synchronizer.
    #[inline]
    pub fn sync(&self) -> &FrameSynchronizer<Q> {
        &self.sync
    }

    /// Returns the synchronizer mutably (one-shot uploads, manual drains).
    #[inline]
    pub fn sync_mut(&mut self) -> &mut FrameSynchronizer<Q> {
        &mut self.sync
    }

    /// Returns the presentation surface.
    #[inline]
    pub fn surface(&self) -> &PresentationSurface<P> {
        &self.surface
    }

    /// Returns the vsync setting used for presents.
    #[inline]
    pub fn vsync(&self) -> bool {
        self.vsync
    }

    /// Changes the vsync setting; the next present reports a stale surface
    /// if the ring was built for the other mode.
    #[inline]
    pub fn set_vsync(&mut self, vsync: bool) {
        self.vsync = vsync;
    }

    /// Returns the number of frames run.
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Drains the GPU and the presentation engine; afterwards every resource
    /// can be released.
    ///
    /// # Errors
    ///
    /// Returns an error if either drain fails.
    pub fn shutdown(&mut self) -> RhiResult<()> {
        self.sync.shutdown()?;
        self.surface.engine_mut().wait_presents()
    }
}
