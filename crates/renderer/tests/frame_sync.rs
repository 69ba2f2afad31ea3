//! Integration tests for the frame synchronizer against a simulated GPU.

mod common;

use std::thread;
use std::time::{Duration, Instant};

use inflight_renderer::{FrameSynchronizer, SlotState};
use inflight_rhi::{GpuDependency, RhiError};

use common::{HangingQueue, SimulatedQueue};

const TIMEOUT: Duration = Duration::from_secs(2);

/// Runs one frame on the active slot without any pacing wait.
fn submit_and_signal(sync: &mut FrameSynchronizer<SimulatedQueue>) -> u64 {
    sync.begin_frame().expect("begin_frame");
    sync.submit_frame(GpuDependency::none()).expect("submit_frame");
    let value = sync.signal().expect("signal");
    sync.advance();
    value
}

fn finish(mut sync: FrameSynchronizer<SimulatedQueue>, queue: &SimulatedQueue) {
    queue.set_auto_complete(true);
    sync.shutdown().expect("shutdown");
}

#[test]
fn test_wait_for_slot_blocks_until_oldest_frame_completes() {
    let queue = SimulatedQueue::stalled();
    let mut sync = FrameSynchronizer::new(queue.clone(), 3, TIMEOUT).expect("synchronizer");

    assert_eq!(submit_and_signal(&mut sync), 1);
    assert_eq!(submit_and_signal(&mut sync), 2);

    let gpu = queue.clone();
    let delay = Duration::from_millis(50);
    let worker = thread::spawn(move || {
        thread::sleep(delay);
        gpu.retire(1);
    });

    let start = Instant::now();
    sync.wait_for_slot(2).expect("wait_for_slot");
    assert!(start.elapsed() >= delay, "wait returned before frame 0 completed");
    worker.join().expect("worker");

    assert_eq!(queue.waits(), vec![1]);
    assert_eq!(sync.completed_value().expect("completed"), 1);
    assert_eq!(submit_and_signal(&mut sync), 3);

    finish(sync, &queue);
}

#[test]
fn test_wait_for_slot_returns_immediately_below_limit() {
    let queue = SimulatedQueue::stalled();
    let mut sync = FrameSynchronizer::new(queue.clone(), 3, TIMEOUT).expect("synchronizer");

    submit_and_signal(&mut sync);
    sync.wait_for_slot(2).expect("wait_for_slot");
    assert!(queue.waits().is_empty());

    finish(sync, &queue);
}

#[test]
fn test_wait_idle_after_construction() {
    let queue = SimulatedQueue::idle();
    let mut sync = FrameSynchronizer::new(queue.clone(), 2, TIMEOUT).expect("synchronizer");

    let start = Instant::now();
    sync.wait_idle().expect("wait_idle");
    assert!(start.elapsed() < TIMEOUT);

    assert_eq!(sync.counter(), 1);
    assert_eq!(queue.waits(), vec![1]);
    assert_eq!(sync.frames_in_flight().expect("in flight"), 0);

    finish(sync, &queue);
}

#[test]
#[should_panic(expected = "went backwards")]
fn test_completed_value_going_backwards_is_rejected() {
    let queue = SimulatedQueue::stalled();
    let mut sync = FrameSynchronizer::new(queue.clone(), 3, TIMEOUT).expect("synchronizer");

    for _ in 0..3 {
        submit_and_signal(&mut sync);
    }
    queue.force_completed(3);
    assert_eq!(sync.frames_in_flight().expect("in flight"), 0);

    queue.force_completed(2);
    let _ = sync.frames_in_flight();
}

#[test]
#[should_panic(expected = "ahead of the completion counter")]
fn test_completed_value_ahead_of_counter_is_rejected() {
    let queue = SimulatedQueue::stalled();
    let mut sync = FrameSynchronizer::new(queue.clone(), 2, TIMEOUT).expect("synchronizer");

    submit_and_signal(&mut sync);
    queue.force_completed(5);
    let _ = sync.frames_in_flight();
}

#[test]
fn test_counter_is_strictly_increasing() {
    let queue = SimulatedQueue::idle();
    let mut sync = FrameSynchronizer::new(queue.clone(), 2, TIMEOUT).expect("synchronizer");

    let mut last = sync.counter();
    for _ in 0..10 {
        let value = submit_and_signal(&mut sync);
        assert_eq!(value, last + 1);
        last = value;
    }
    let value = sync.signal().expect("bare signal");
    assert_eq!(value, last + 1);

    finish(sync, &queue);
}

#[test]
fn test_frames_in_flight_never_exceeds_limit() {
    const MAX_IN_FLIGHT: u64 = 2;

    let queue = SimulatedQueue::stalled();
    let mut sync = FrameSynchronizer::new(queue.clone(), 3, TIMEOUT).expect("synchronizer");

    for frame in 0..12u64 {
        // The GPU finishes one frame every third tick.
        if frame % 3 == 2 {
            queue.retire(1);
        }
        if sync.frames_in_flight().expect("in flight") >= MAX_IN_FLIGHT {
            let gpu = queue.clone();
            let worker = thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                gpu.retire(1);
            });
            sync.wait_for_slot(MAX_IN_FLIGHT).expect("wait_for_slot");
            worker.join().expect("worker");
        } else {
            sync.wait_for_slot(MAX_IN_FLIGHT).expect("wait_for_slot");
        }

        assert!(sync.frames_in_flight().expect("in flight") < MAX_IN_FLIGHT);
        submit_and_signal(&mut sync);
        assert!(sync.frames_in_flight().expect("in flight") <= MAX_IN_FLIGHT);
    }

    assert!(
        queue
            .submissions()
            .iter()
            .all(|s| s.pending_signals < MAX_IN_FLIGHT as usize)
    );

    finish(sync, &queue);
}

#[test]
fn test_wait_idle_drains_pending_work() {
    let queue = SimulatedQueue::stalled();
    let mut sync = FrameSynchronizer::new(queue.clone(), 3, TIMEOUT).expect("synchronizer");

    for _ in 0..3 {
        submit_and_signal(&mut sync);
    }
    assert_eq!(sync.frames_in_flight().expect("in flight"), 3);

    let gpu = queue.clone();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        gpu.complete_up_to(4);
    });
    sync.wait_idle().expect("wait_idle");
    worker.join().expect("worker");

    assert_eq!(sync.counter(), 4);
    assert_eq!(sync.frames_in_flight().expect("in flight"), 0);

    finish(sync, &queue);
}

#[test]
fn test_slots_rotate_and_reset_only_after_completion() {
    let queue = SimulatedQueue::stalled();
    let mut sync = FrameSynchronizer::new(queue.clone(), 2, TIMEOUT).expect("synchronizer");

    submit_and_signal(&mut sync);
    submit_and_signal(&mut sync);
    assert_eq!(sync.slot(0).state(), SlotState::Submitted);
    assert_eq!(sync.slot(0).fence_value(), Some(1));
    assert_eq!(sync.slot(1).fence_value(), Some(2));

    queue.retire(1);
    sync.wait_for_slot(2).expect("wait_for_slot");
    submit_and_signal(&mut sync);

    let submitted_lists: Vec<usize> = queue
        .submissions()
        .iter()
        .flat_map(|s| s.lists.clone())
        .collect();
    assert_eq!(submitted_lists, vec![0, 1, 0]);
    assert_eq!(queue.resets(), vec![0, 1, 0]);
    assert_eq!(sync.slot(0).fence_value(), Some(3));

    finish(sync, &queue);
}

#[test]
#[should_panic(expected = "reused before retirement")]
fn test_reusing_unretired_slot_panics() {
    let queue = SimulatedQueue::stalled();
    let mut sync = FrameSynchronizer::new(queue.clone(), 2, TIMEOUT).expect("synchronizer");

    submit_and_signal(&mut sync);
    submit_and_signal(&mut sync);
    // Slot 0 is still on the GPU; skipping wait_for_slot must be caught.
    let _ = sync.begin_frame();
}

#[test]
fn test_wait_times_out() {
    let queue = SimulatedQueue::stalled();
    let timeout = Duration::from_millis(20);
    let mut sync = FrameSynchronizer::new(queue.clone(), 2, timeout).expect("synchronizer");

    submit_and_signal(&mut sync);
    submit_and_signal(&mut sync);

    match sync.wait_for_slot(2) {
        Err(RhiError::WaitTimeout { value, timeout: t }) => {
            assert_eq!(value, 1);
            assert_eq!(t, timeout);
        }
        other => panic!("expected a wait timeout, got {:?}", other),
    }

    finish(sync, &queue);
}

#[test]
fn test_execute_immediate_drains_before_returning() {
    let queue = SimulatedQueue::idle();
    let mut sync = FrameSynchronizer::new(queue.clone(), 2, TIMEOUT).expect("synchronizer");

    let mut recorded = None;
    sync.execute_immediate(|list| recorded = Some(*list))
        .expect("execute_immediate");

    // Two slot allocators exist already; the one-shot list gets the next id.
    assert_eq!(recorded, Some(2));
    assert_eq!(sync.counter(), 1);
    assert_eq!(sync.frames_in_flight().expect("in flight"), 0);
    assert_eq!(sync.active_index(), 0);
    assert_eq!(sync.slot(0).state(), SlotState::Idle);

    finish(sync, &queue);
}

#[test]
fn test_shutdown_is_idempotent() {
    let queue = SimulatedQueue::idle();
    let mut sync = FrameSynchronizer::new(queue.clone(), 2, TIMEOUT).expect("synchronizer");

    submit_and_signal(&mut sync);
    sync.shutdown().expect("first shutdown");
    let counter = sync.counter();
    sync.shutdown().expect("second shutdown");
    assert_eq!(sync.counter(), counter);
}

#[test]
fn test_drop_without_shutdown_drains() {
    let queue = SimulatedQueue::idle();
    {
        let mut sync = FrameSynchronizer::new(queue.clone(), 2, TIMEOUT).expect("synchronizer");
        submit_and_signal(&mut sync);
    }
    // The drop-time drain signals once more and waits for it.
    assert_eq!(queue.waits(), vec![2]);
    assert_eq!(queue.completed(), 2);
}

#[test]
fn test_failed_immediate_drain_keeps_allocator_alive() {
    let queue = HangingQueue::default();
    let mut sync = FrameSynchronizer::new(queue.clone(), 2, TIMEOUT).expect("synchronizer");

    queue.hang();
    let result = sync.execute_immediate(|_| {});
    assert!(matches!(result, Err(RhiError::WaitTimeout { .. })));
    assert!(
        queue.released().is_empty(),
        "one-shot allocator released while its submission may still run"
    );

    queue.recover();
    sync.shutdown().expect("shutdown");
    let released = queue.released();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].id, 2);

    drop(sync);
    let released = queue.released();
    assert_eq!(released.len(), 3);
    assert!(released.iter().all(|r| !r.while_busy));
}

#[test]
fn test_drop_with_hung_gpu_does_not_release_slots() {
    let queue = HangingQueue::default();
    let mut sync = FrameSynchronizer::new(queue.clone(), 2, TIMEOUT).expect("synchronizer");

    queue.hang();
    sync.begin_frame().expect("begin_frame");
    sync.submit_frame(GpuDependency::none()).expect("submit_frame");
    sync.signal().expect("signal");
    drop(sync);

    assert!(queue.released().is_empty());
}
