//! Simulated queue and presentation engine for driving the frame pipeline
//! without a GPU.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use inflight_rhi::{
    GpuDependency, PresentEngine, PresentOutcome, RhiError, RhiResult, SubmissionQueue,
};

/// One recorded call to [`SubmissionQueue::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub lists: Vec<usize>,
    pub dependency: GpuDependency<u32>,
    /// Signals still pending when the submission arrived.
    pub pending_signals: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Signals the GPU has not reached yet, oldest first.
    pending: VecDeque<u64>,
    completed: u64,
    auto_complete: bool,
    allocators: usize,
    resets: Vec<usize>,
    submissions: Vec<Submission>,
    waits: Vec<u64>,
}

/// A queue whose GPU only finishes work when the test says so.
///
/// Clones share state, so one handle can drive completion from another thread
/// while the synchronizer owns the other.
#[derive(Clone, Default)]
pub struct SimulatedQueue {
    shared: Arc<(Mutex<QueueState>, Condvar)>,
}

impl SimulatedQueue {
    /// A GPU that keeps up: every signal completes as soon as it is issued.
    pub fn idle() -> Self {
        let queue = Self::default();
        queue.set_auto_complete(true);
        queue
    }

    /// A GPU that finishes nothing until [`retire`](Self::retire) is called.
    pub fn stalled() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.shared.0.lock().expect("queue state poisoned")
    }

    /// Lets the GPU finish the `count` oldest pending signals.
    pub fn retire(&self, count: usize) {
        let mut state = self.state();
        for _ in 0..count {
            match state.pending.pop_front() {
                Some(value) => state.completed = value,
                None => break,
            }
        }
        self.shared.1.notify_all();
    }

    /// Lets the GPU finish every pending signal up to `value`.
    pub fn complete_up_to(&self, value: u64) {
        let mut state = self.state();
        while state.pending.front().is_some_and(|&v| v <= value) {
            state.completed = state.pending.pop_front().unwrap_or(value);
        }
        self.shared.1.notify_all();
    }

    /// Overwrites the completed value, bypassing the pending queue.
    pub fn force_completed(&self, value: u64) {
        self.state().completed = value;
        self.shared.1.notify_all();
    }

    /// Switches auto-completion; enabling it also finishes pending work.
    pub fn set_auto_complete(&self, enabled: bool) {
        let mut state = self.state();
        state.auto_complete = enabled;
        if enabled && let Some(&last) = state.pending.back() {
            state.completed = last;
            state.pending.clear();
        }
        self.shared.1.notify_all();
    }

    pub fn completed(&self) -> u64 {
        self.state().completed
    }

    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    pub fn resets(&self) -> Vec<usize> {
        self.state().resets.clone()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state().submissions.clone()
    }

    /// Targets of every blocking wait, in order.
    pub fn waits(&self) -> Vec<u64> {
        self.state().waits.clone()
    }
}

impl SubmissionQueue for SimulatedQueue {
    type Allocator = usize;
    type CommandList = usize;
    type Semaphore = u32;

    fn create_allocator(&self) -> RhiResult<usize> {
        let mut state = self.state();
        let id = state.allocators;
        state.allocators += 1;
        Ok(id)
    }

    fn create_command_list(&self, allocator: &usize) -> RhiResult<usize> {
        Ok(*allocator)
    }

    fn reset_allocator(&self, allocator: &mut usize) -> RhiResult<()> {
        self.state().resets.push(*allocator);
        Ok(())
    }

    fn begin_recording(&self, _list: &usize) -> RhiResult<()> {
        Ok(())
    }

    fn end_recording(&self, _list: &usize) -> RhiResult<()> {
        Ok(())
    }

    fn submit(&self, lists: &[&usize], dependency: GpuDependency<u32>) -> RhiResult<()> {
        let mut state = self.state();
        let pending_signals = state.pending.len();
        state.submissions.push(Submission {
            lists: lists.iter().map(|&&id| id).collect(),
            dependency,
            pending_signals,
        });
        Ok(())
    }

    fn signal(&self, value: u64) -> RhiResult<()> {
        let mut state = self.state();
        if state.auto_complete {
            state.completed = value;
        } else {
            state.pending.push_back(value);
        }
        self.shared.1.notify_all();
        Ok(())
    }

    fn completed_value(&self) -> RhiResult<u64> {
        Ok(self.state().completed)
    }

    fn wait_for_value(&self, value: u64, timeout: Duration) -> RhiResult<()> {
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().expect("queue state poisoned");
        state.waits.push(value);

        let (state, result) = cvar
            .wait_timeout_while(state, timeout, |s| s.completed < value)
            .expect("queue state poisoned");

        if result.timed_out() && state.completed < value {
            Err(RhiError::WaitTimeout { value, timeout })
        } else {
            Ok(())
        }
    }
}

/// A presentation ring that hands out buffers in a fixed, possibly
/// non-round-robin order.
pub struct SimulatedSwapchain {
    image_count: usize,
    order: Vec<usize>,
    cursor: usize,
    current: Option<usize>,
    vsync: bool,
    /// Present number (1-based) that reports the ring stale.
    stale_at: Option<u64>,
    presents: u64,
    pub presented: Vec<usize>,
    pub rebuilds: u32,
    pub present_waits: u32,
}

impl SimulatedSwapchain {
    /// Round-robin ring of `image_count` buffers.
    pub fn new(image_count: usize) -> Self {
        Self::with_order(image_count, (0..image_count).collect())
    }

    /// Ring that cycles through `order`.
    pub fn with_order(image_count: usize, order: Vec<usize>) -> Self {
        assert!(order.iter().all(|&i| i < image_count));
        let current = order.first().copied();
        Self {
            image_count,
            order,
            cursor: 1,
            current,
            vsync: false,
            stale_at: None,
            presents: 0,
            presented: Vec::new(),
            rebuilds: 0,
            present_waits: 0,
        }
    }

    /// Reports the ring stale on the `present`-th present.
    pub fn stale_at(mut self, present: u64) -> Self {
        self.stale_at = Some(present);
        self
    }

    /// Replaces the ring, as a swapchain rebuild would.
    pub fn rebuild(&mut self, vsync: bool) -> RhiResult<()> {
        self.vsync = vsync;
        self.stale_at = None;
        self.cursor = 0;
        self.current = None;
        self.rebuilds += 1;
        Ok(())
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    fn next_index(&mut self) -> usize {
        let index = self.order[self.cursor % self.order.len()];
        self.cursor += 1;
        index
    }
}

/// Image handles are offset so they never equal buffer indices.
pub const IMAGE_BASE: usize = 100;

impl PresentEngine for SimulatedSwapchain {
    type Image = usize;
    type Semaphore = u32;

    fn image_count(&self) -> usize {
        self.image_count
    }

    fn current_index(&self) -> Option<usize> {
        self.current
    }

    fn image(&self, index: usize) -> usize {
        IMAGE_BASE + index
    }

    fn image_ready(&self) -> Option<u32> {
        self.current.map(|i| 2 * i as u32)
    }

    fn render_complete(&self) -> Option<u32> {
        self.current.map(|i| 2 * i as u32 + 1)
    }

    fn present(&mut self, vsync: bool) -> RhiResult<PresentOutcome> {
        let index = self
            .current
            .ok_or_else(|| RhiError::SwapchainError("present without a buffer".to_string()))?;
        self.presents += 1;
        self.presented.push(index);

        if vsync != self.vsync || self.stale_at == Some(self.presents) {
            self.current = None;
            return Ok(PresentOutcome::Stale);
        }

        let next = self.next_index();
        self.current = Some(next);
        Ok(PresentOutcome::Presented)
    }

    fn refresh(&mut self) -> RhiResult<()> {
        if self.current.is_none() {
            let next = self.next_index();
            self.current = Some(next);
        }
        Ok(())
    }

    fn wait_presents(&mut self) -> RhiResult<()> {
        self.present_waits += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct HangState {
    hung: bool,
    /// Submitted work the GPU has not finished.
    busy: bool,
    signaled: u64,
    completed: u64,
    next_id: usize,
    released: Vec<Release>,
}

/// One allocator destruction seen by [`HangingQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    pub id: usize,
    /// Whether submitted work was still executing at the time.
    pub while_busy: bool,
}

/// Allocator that reports its destruction to the queue that made it.
pub struct TrackedAllocator {
    id: usize,
    state: Arc<Mutex<HangState>>,
}

impl Drop for TrackedAllocator {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            let while_busy = state.busy;
            state.released.push(Release {
                id: self.id,
                while_busy,
            });
        }
    }
}

/// A queue whose GPU can stop making progress, so every wait times out.
#[derive(Clone, Default)]
pub struct HangingQueue {
    state: Arc<Mutex<HangState>>,
}

impl HangingQueue {
    fn state(&self) -> MutexGuard<'_, HangState> {
        self.state.lock().expect("hang state poisoned")
    }

    /// Stops the GPU; later signals never complete.
    pub fn hang(&self) {
        self.state().hung = true;
    }

    /// Restarts the GPU and finishes everything signaled so far.
    pub fn recover(&self) {
        let mut state = self.state();
        state.hung = false;
        state.completed = state.signaled;
        state.busy = false;
    }

    pub fn released(&self) -> Vec<Release> {
        self.state().released.clone()
    }
}

impl SubmissionQueue for HangingQueue {
    type Allocator = TrackedAllocator;
    type CommandList = usize;
    type Semaphore = u32;

    fn create_allocator(&self) -> RhiResult<TrackedAllocator> {
        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;
        Ok(TrackedAllocator {
            id,
            state: self.state.clone(),
        })
    }

    fn create_command_list(&self, allocator: &TrackedAllocator) -> RhiResult<usize> {
        Ok(allocator.id)
    }

    fn reset_allocator(&self, _allocator: &mut TrackedAllocator) -> RhiResult<()> {
        Ok(())
    }

    fn begin_recording(&self, _list: &usize) -> RhiResult<()> {
        Ok(())
    }

    fn end_recording(&self, _list: &usize) -> RhiResult<()> {
        Ok(())
    }

    fn submit(&self, _lists: &[&usize], _dependency: GpuDependency<u32>) -> RhiResult<()> {
        self.state().busy = true;
        Ok(())
    }

    fn signal(&self, value: u64) -> RhiResult<()> {
        let mut state = self.state();
        state.signaled = value;
        if !state.hung {
            state.completed = value;
            state.busy = false;
        }
        Ok(())
    }

    fn completed_value(&self) -> RhiResult<u64> {
        Ok(self.state().completed)
    }

    fn wait_for_value(&self, value: u64, timeout: Duration) -> RhiResult<()> {
        if self.state().completed >= value {
            Ok(())
        } else {
            Err(RhiError::WaitTimeout { value, timeout })
        }
    }
}
