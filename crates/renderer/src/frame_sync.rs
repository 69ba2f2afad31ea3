//! CPU/GPU frame synchronization.
//!
//! This module provides the [`FrameSynchronizer`], which bounds how far the
//! CPU may run ahead of the GPU and guarantees that no command list (or the
//! allocator behind it) is reused while the GPU may still be reading it.
//!
//! # Overview
//!
//! One monotonically increasing completion counter lives on the host. Every
//! frame ends with [`FrameSynchronizer::signal`], which asks the queue to set
//! the device-side counter to the next integer once all earlier work has
//! finished. The host compares the two:
//!
//! ```text
//! frames in flight = counter - completed value
//! ```
//!
//! and only blocks when it is about to reuse a recording slot whose last
//! submission may still be executing ([`FrameSynchronizer::wait_for_slot`]),
//! or when it needs the GPU fully drained ([`FrameSynchronizer::wait_idle`]).
//!
//! # Slot lifecycle
//!
//! ```text
//! Idle --begin_frame--> Recording --submit_frame--> Submitted
//!  ^                                                    |
//!  +------ completed value >= stamped fence value ------+
//! ```
//!
//! Slots are used in strict round-robin order. The retirement check in
//! [`FrameSynchronizer::begin_frame`] compares counter values only.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use inflight_renderer::frame_sync::FrameSynchronizer;
//! use inflight_rhi::{GpuDependency, SubmissionQueue};
//!
//! # fn example<Q: SubmissionQueue>(queue: Q) -> Result<(), inflight_rhi::RhiError> {
//! let mut sync = FrameSynchronizer::new(queue, 3, Duration::from_secs(5))?;
//!
//! loop {
//!     sync.wait_for_slot(3)?;
//!     let _cmd = sync.begin_frame()?;
//!     // ... record commands ...
//!     sync.submit_frame(GpuDependency::none())?;
//!     // ... present ...
//!     sync.signal()?;
//!     sync.advance();
//!     # break;
//! }
//!
//! sync.shutdown()?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use inflight_rhi::{GpuDependency, RhiResult, SubmissionQueue};

/// Where a recording slot is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// CPU-owned; may be reset and recorded.
    Idle,
    /// Open for recording.
    Recording,
    /// Handed to the GPU; unusable until its fence value completes.
    Submitted,
}

/// One reusable bundle of per-frame recording resources.
pub struct RecordingSlot<Q: SubmissionQueue> {
    /// Backing allocator of the command list.
    allocator: Q::Allocator,
    /// The frame's command list.
    command_list: Q::CommandList,
    state: SlotState,
    /// Counter value stamped at the last signal after this slot's submission.
    fence_value: Option<u64>,
}

impl<Q: SubmissionQueue> RecordingSlot<Q> {
    fn new(queue: &Q) -> RhiResult<Self> {
        let allocator = queue.create_allocator()?;
        let command_list = queue.create_command_list(&allocator)?;
        Ok(Self {
            allocator,
            command_list,
            state: SlotState::Idle,
            fence_value: None,
        })
    }

    /// Returns the slot's lifecycle state.
    #[inline]
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Returns the counter value of the slot's most recent signal, if any.
    #[inline]
    pub fn fence_value(&self) -> Option<u64> {
        self.fence_value
    }

    /// Returns the slot's command list.
    #[inline]
    pub fn command_list(&self) -> &Q::CommandList {
        &self.command_list
    }
}

/// Bounds CPU/GPU skew over a fixed set of round-robin recording slots.
///
/// # Thread Safety
///
/// Every mutating call takes `&mut self`; the counter has a single writer.
pub struct FrameSynchronizer<Q: SubmissionQueue> {
    queue: Q,
    /// Work submitted so far (value of the last signal).
    counter: u64,
    /// Highest completed value observed.
    last_completed: u64,
    slots: Vec<RecordingSlot<Q>>,
    /// Index of the active slot.
    active: usize,
    wait_timeout: Duration,
    /// One-shot work whose drain failed; released after the next idle drain.
    stranded: Vec<(Q::CommandList, Q::Allocator)>,
    shut_down: bool,
}

impl<Q: SubmissionQueue> FrameSynchronizer<Q> {
    /// Creates a synchronizer with `slot_count` recording slots.
    ///
    /// All slots are allocated here; nothing is allocated per frame.
    ///
    /// # Panics
    ///
    /// Panics if `slot_count` is 0.
    ///
    /// # Errors
    ///
    /// Returns an error if an allocator or command list cannot be created.
    pub fn new(queue: Q, slot_count: usize, wait_timeout: Duration) -> RhiResult<Self> {
        assert!(slot_count >= 1, "a frame synchronizer needs at least one slot");

        let slots = (0..slot_count)
            .map(|_| RecordingSlot::new(&queue))
            .collect::<RhiResult<Vec<_>>>()?;

        info!(
            "Frame synchronizer created: {} recording slot(s), wait timeout {:?}",
            slot_count, wait_timeout
        );

        Ok(Self {
            queue,
            counter: 0,
            last_completed: 0,
            slots,
            active: 0,
            wait_timeout,
            stranded: Vec::new(),
            shut_down: false,
        })
    }

    /// Returns the submission queue.
    #[inline]
    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Returns the value of the most recent signal.
    #[inline]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Returns the number of recording slots.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns the index of the active slot.
    #[inline]
    pub fn active_index(&self) -> usize {
        self.active
    }

    /// Returns the slot at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn slot(&self, index: usize) -> &RecordingSlot<Q> {
        &self.slots[index]
    }

    /// Returns the active slot.
    #[inline]
    pub fn active_slot(&self) -> &RecordingSlot<Q> {
        &self.slots[self.active]
    }

    /// Enqueues the next completion signal and returns its value.
    ///
    /// Does not block. If the active slot was submitted and has not been
    /// stamped yet, it is stamped with the returned value.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue rejects the signal; the counter is left
    /// unchanged in that case.
    pub fn signal(&mut self) -> RhiResult<u64> {
        let value = self.counter + 1;
        self.queue.signal(value)?;
        self.counter = value;

        let slot = &mut self.slots[self.active];
        if slot.state == SlotState::Submitted && slot.fence_value.is_none() {
            slot.fence_value = Some(value);
        }

        trace!("Signaled completion value {}", value);
        Ok(value)
    }

    /// Reads the completed value from the queue.
    ///
    /// # Panics
    ///
    /// Panics if the value is lower than one observed earlier.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue query fails.
    pub fn completed_value(&mut self) -> RhiResult<u64> {
        let completed = self.queue.completed_value()?;
        assert!(
            completed >= self.last_completed,
            "completed value went backwards: {} after {}",
            completed,
            self.last_completed
        );
        self.last_completed = completed;
        Ok(completed)
    }

    /// Returns how many signaled frames the GPU has not finished yet.
    ///
    /// # Panics
    ///
    /// Panics if the completed value exceeds the counter or went backwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue query fails.
    pub fn frames_in_flight(&mut self) -> RhiResult<u64> {
        let completed = self.completed_value()?;
        assert!(
            completed <= self.counter,
            "completed value {} is ahead of the completion counter {}",
            completed,
            self.counter
        );
        Ok(self.counter - completed)
    }

    /// Blocks until fewer than `max_in_flight` frames are in flight.
    ///
    /// Returns immediately when that already holds. Otherwise waits for the
    /// completed value to reach `counter - max_in_flight + 1`.
    ///
    /// # Panics
    ///
    /// Panics if `max_in_flight` is 0, or if the bound still does not hold
    /// once the wait returns.
    ///
    /// # Errors
    ///
    /// Returns [`inflight_rhi::RhiError::WaitTimeout`] if the GPU does not
    /// catch up within the configured timeout.
    pub fn wait_for_slot(&mut self, max_in_flight: u64) -> RhiResult<()> {
        assert!(max_in_flight >= 1, "max frames in flight must be at least 1");

        let in_flight = self.frames_in_flight()?;
        if in_flight < max_in_flight {
            return Ok(());
        }

        let target = self.counter - max_in_flight + 1;
        debug!(
            "{} frame(s) in flight, waiting for completion value {}",
            in_flight, target
        );
        self.queue.wait_for_value(target, self.wait_timeout)?;

        let in_flight = self.frames_in_flight()?;
        assert!(
            in_flight < max_in_flight,
            "wait returned with {} frame(s) still in flight (limit {})",
            in_flight,
            max_in_flight
        );
        Ok(())
    }

    /// Signals once more and blocks until the GPU has finished everything.
    ///
    /// # Panics
    ///
    /// Panics if frames are still in flight after the wait.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal or the wait fails.
    pub fn wait_idle(&mut self) -> RhiResult<()> {
        let value = self.signal()?;
        self.queue.wait_for_value(value, self.wait_timeout)?;

        let in_flight = self.frames_in_flight()?;
        assert_eq!(in_flight, 0, "frames still in flight after an idle drain");
        if !self.stranded.is_empty() {
            debug!("Releasing {} stranded one-shot allocator(s)", self.stranded.len());
            self.stranded.clear();
        }
        debug!("GPU idle at completion value {}", value);
        Ok(())
    }

    /// Opens the active slot for recording and returns its command list.
    ///
    /// A submitted slot is retired first if the GPU has reached its fence
    /// value. The slot's allocator is then reset and the list opened.
    ///
    /// # Panics
    ///
    /// Panics if the active slot is still recording, was submitted but never
    /// signaled, or was submitted and has not retired yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the completed-value query, the reset or the begin
    /// fails.
    pub fn begin_frame(&mut self) -> RhiResult<&Q::CommandList> {
        let completed = self.completed_value()?;
        let index = self.active;
        let slot = &mut self.slots[index];

        if slot.state == SlotState::Submitted {
            match slot.fence_value {
                Some(fence) if fence <= completed => {
                    trace!("Slot {} retired at fence value {}", index, fence);
                    slot.state = SlotState::Idle;
                }
                Some(fence) => panic!(
                    "recording slot {} reused before retirement (fence value {}, completed value {})",
                    index, fence, completed
                ),
                None => panic!("recording slot {} was submitted but never signaled", index),
            }
        }

        assert_eq!(
            slot.state,
            SlotState::Idle,
            "recording slot {} is already recording",
            index
        );

        self.queue.reset_allocator(&mut slot.allocator)?;
        self.queue.begin_recording(&slot.command_list)?;
        slot.state = SlotState::Recording;

        Ok(&slot.command_list)
    }

    /// Closes the active slot's command list and submits it.
    ///
    /// # Panics
    ///
    /// Panics if the active slot is not recording.
    ///
    /// # Errors
    ///
    /// Returns an error if closing or submitting fails.
    pub fn submit_frame(&mut self, dependency: GpuDependency<Q::Semaphore>) -> RhiResult<()> {
        let index = self.active;
        let slot = &mut self.slots[index];
        assert_eq!(
            slot.state,
            SlotState::Recording,
            "recording slot {} submitted without begin_frame",
            index
        );

        self.queue.end_recording(&slot.command_list)?;
        self.queue.submit(&[&slot.command_list], dependency)?;
        slot.state = SlotState::Submitted;
        slot.fence_value = None;
        Ok(())
    }

    /// Moves to the next slot in round-robin order.
    pub fn advance(&mut self) {
        self.active = (self.active + 1) % self.slots.len();
    }

    /// Records and submits one-shot work, then drains the GPU.
    ///
    /// The work uses its own transient allocator, released before returning.
    /// If the drain fails the allocator is kept until a later drain succeeds
    /// (or leaked if none does).
    ///
    /// # Errors
    ///
    /// Returns an error if allocation, recording, submission or the drain
    /// fails. Callers must keep anything the recorded commands reference
    /// alive in the drain-failure case too.
    pub fn execute_immediate<F>(&mut self, record: F) -> RhiResult<()>
    where
        F: FnOnce(&Q::CommandList),
    {
        let allocator = self.queue.create_transient_allocator()?;
        let list = self.queue.create_command_list(&allocator)?;

        self.queue.begin_recording(&list)?;
        record(&list);
        self.queue.end_recording(&list)?;
        self.queue.submit(&[&list], GpuDependency::none())?;

        // The GPU may still be executing the list; keep it until a drain succeeds.
        if let Err(e) = self.wait_idle() {
            warn!("Immediate submission did not drain, keeping its allocator alive");
            self.stranded.push((list, allocator));
            return Err(e);
        }
        debug!("Immediate submission complete");
        Ok(())
    }

    /// Drains the GPU so every slot can be released.
    ///
    /// # Errors
    ///
    /// Returns an error if the drain fails.
    pub fn shutdown(&mut self) -> RhiResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.wait_idle()?;
        self.shut_down = true;
        info!("Frame synchronizer shut down at completion value {}", self.counter);
        Ok(())
    }
}

impl<Q: SubmissionQueue> Drop for FrameSynchronizer<Q> {
    fn drop(&mut self) {
        if self.shut_down || std::thread::panicking() {
            return;
        }
        warn!("Frame synchronizer dropped without shutdown, draining GPU");
        if let Err(e) = self.wait_idle() {
            error!("Failed to drain GPU during drop, leaking recording resources: {}", e);
            std::mem::forget(std::mem::take(&mut self.slots));
            std::mem::forget(std::mem::take(&mut self.stranded));
        }
    }
}
