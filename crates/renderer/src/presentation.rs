//! The presentation surface: a ring of presentable buffers.
//!
//! [`PresentationSurface`] wraps a [`PresentEngine`] and caches the index of
//! the buffer the renderer should target this frame. The engine, not the
//! application, picks the next buffer after every present, so the order is
//! not necessarily round-robin.
//!
//! Recorded commands must move the current buffer from "presentable" to
//! "render target" before writing it, and back before [`present`] is called.
//! The surface does not check this.
//!
//! [`present`]: PresentationSurface::present

use tracing::{debug, info};

use inflight_rhi::{GpuDependency, PresentEngine, PresentOutcome, RhiResult};

/// The buffer to render into this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferHandle<I> {
    /// Position in the ring.
    pub index: usize,
    /// Engine-specific image handle.
    pub image: I,
}

/// Ring of presentable buffers with a current-buffer cursor.
pub struct PresentationSurface<P: PresentEngine> {
    engine: P,
    /// Cached current index; `None` while the ring is stale.
    current: Option<usize>,
    /// Total successful presents.
    presents: u64,
}

impl<P: PresentEngine> PresentationSurface<P> {
    /// Wraps an engine that already holds its first buffer.
    ///
    /// # Panics
    ///
    /// Panics if the engine has fewer than 2 buffers.
    pub fn new(engine: P) -> Self {
        let count = engine.image_count();
        assert!(count >= 2, "a presentation ring needs at least 2 buffers, got {}", count);

        let current = engine.current_index();
        info!("Presentation surface ready: {} buffers", count);

        Self {
            engine,
            current,
            presents: 0,
        }
    }

    /// Returns the buffer the renderer targets this frame.
    ///
    /// # Panics
    ///
    /// Panics if the ring went stale and has not been rebuilt.
    pub fn current_buffer(&self) -> BufferHandle<P::Image> {
        let index = self
            .current
            .expect("no current buffer: the surface is stale and must be rebuilt");
        BufferHandle {
            index,
            image: self.engine.image(index),
        }
    }

    /// Returns true if no buffer is held and the ring needs a rebuild.
    #[inline]
    pub fn is_stale(&self) -> bool {
        self.current.is_none()
    }

    /// Returns the ring depth.
    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.engine.image_count()
    }

    /// Returns the number of presents issued so far.
    #[inline]
    pub fn present_count(&self) -> u64 {
        self.presents
    }

    /// GPU dependency the frame's submission needs for the current buffer.
    pub fn dependency(&self) -> GpuDependency<P::Semaphore> {
        GpuDependency {
            wait: self.engine.image_ready(),
            signal: self.engine.render_complete(),
        }
    }

    /// Hands the current buffer to the display and moves to the next one.
    ///
    /// Does not wait for GPU completion. Re-query [`current_buffer`] afterwards.
    ///
    /// [`current_buffer`]: PresentationSurface::current_buffer
    ///
    /// # Errors
    ///
    /// Returns an error if presentation fails for a reason other than the
    /// ring being stale.
    pub fn present(&mut self, vsync: bool) -> RhiResult<PresentOutcome> {
        let outcome = self.engine.present(vsync)?;
        self.presents += 1;
        self.current = match outcome {
            PresentOutcome::Presented => self.engine.current_index(),
            PresentOutcome::Stale => None,
        };

        debug!(
            "Present #{} ({:?}), next buffer {:?}",
            self.presents, outcome, self.current
        );
        Ok(outcome)
    }

    /// Re-fetches the current buffer from the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot provide a buffer.
    pub fn refresh(&mut self) -> RhiResult<()> {
        self.engine.refresh()?;
        self.current = self.engine.current_index();
        Ok(())
    }

    /// Returns the wrapped engine.
    #[inline]
    pub fn engine(&self) -> &P {
        &self.engine
    }

    /// Returns the wrapped engine for a rebuild; call [`refresh`] afterwards.
    ///
    /// [`refresh`]: PresentationSurface::refresh
    #[inline]
    pub fn engine_mut(&mut self) -> &mut P {
        &mut self.engine
    }
}
