//! Integration tests for the frame pipeline and presentation surface.

mod common;

use std::time::Duration;

use inflight_renderer::{FrameOutcome, FramePipeline, FrameSynchronizer, PresentationSurface};
use inflight_rhi::{GpuDependency, PresentOutcome};

use common::{IMAGE_BASE, SimulatedQueue, SimulatedSwapchain};

const TIMEOUT: Duration = Duration::from_secs(2);

fn pipeline(
    queue: &SimulatedQueue,
    swapchain: SimulatedSwapchain,
    max_in_flight: u64,
) -> FramePipeline<SimulatedQueue, SimulatedSwapchain> {
    let sync = FrameSynchronizer::new(queue.clone(), max_in_flight as usize, TIMEOUT)
        .expect("synchronizer");
    FramePipeline::new(sync, PresentationSurface::new(swapchain), max_in_flight, false)
}

#[test]
fn test_frames_present_in_order_with_increasing_fence_values() {
    let queue = SimulatedQueue::idle();
    let mut pipeline = pipeline(&queue, SimulatedSwapchain::new(3), 2);

    let mut targets = Vec::new();
    for expected in 1..=6 {
        let outcome = pipeline
            .run_frame(|_, target| targets.push(target))
            .expect("run_frame");
        assert_eq!(outcome, FrameOutcome::Presented { fence_value: expected });
    }

    let indices: Vec<usize> = targets.iter().map(|t| t.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 0, 1, 2]);
    assert!(targets.iter().all(|t| t.image == IMAGE_BASE + t.index));
    assert_eq!(pipeline.frame_count(), 6);
    assert_eq!(pipeline.surface().present_count(), 6);

    pipeline.shutdown().expect("shutdown");
}

#[test]
fn test_submission_waits_on_image_ready_and_signals_render_complete() {
    let queue = SimulatedQueue::idle();
    let mut pipeline = pipeline(&queue, SimulatedSwapchain::new(2), 2);

    for _ in 0..4 {
        pipeline.run_frame(|_, _| {}).expect("run_frame");
    }

    let dependencies: Vec<GpuDependency<u32>> =
        queue.submissions().iter().map(|s| s.dependency).collect();
    let expected: Vec<GpuDependency<u32>> = [0u32, 1, 0, 1]
        .iter()
        .map(|&i| GpuDependency {
            wait: Some(2 * i),
            signal: Some(2 * i + 1),
        })
        .collect();
    assert_eq!(dependencies, expected);

    pipeline.shutdown().expect("shutdown");
}

#[test]
fn test_current_buffer_follows_engine_order() {
    let queue = SimulatedQueue::idle();
    let swapchain = SimulatedSwapchain::with_order(3, vec![2, 0, 1, 1]);
    let mut pipeline = pipeline(&queue, swapchain, 2);

    let mut indices = Vec::new();
    for _ in 0..6 {
        pipeline
            .run_frame(|_, target| indices.push(target.index))
            .expect("run_frame");
    }

    assert_eq!(indices, vec![2, 0, 1, 1, 2, 0]);
    assert_eq!(pipeline.surface().engine().presented, indices);

    pipeline.shutdown().expect("shutdown");
}

#[test]
fn test_recording_slots_rotate_independently_of_buffers() {
    let queue = SimulatedQueue::idle();
    let mut pipeline = pipeline(&queue, SimulatedSwapchain::new(3), 2);

    let mut lists = Vec::new();
    for _ in 0..5 {
        pipeline
            .run_frame(|list, _| lists.push(*list))
            .expect("run_frame");
    }
    assert_eq!(lists, vec![0, 1, 0, 1, 0]);

    pipeline.shutdown().expect("shutdown");
}

#[test]
fn test_in_flight_bound_holds_with_slow_gpu() {
    const MAX_IN_FLIGHT: u64 = 2;

    let queue = SimulatedQueue::stalled();
    let mut pipeline = pipeline(&queue, SimulatedSwapchain::new(3), MAX_IN_FLIGHT);

    for _ in 0..8 {
        // A GPU one frame behind: finish the oldest frame once the limit is hit.
        if queue.pending_count() as u64 >= MAX_IN_FLIGHT {
            queue.retire(1);
        }
        pipeline.run_frame(|_, _| {}).expect("run_frame");
        assert!(pipeline.sync_mut().frames_in_flight().expect("in flight") <= MAX_IN_FLIGHT);
    }

    assert!(
        queue
            .submissions()
            .iter()
            .all(|s| s.pending_signals < MAX_IN_FLIGHT as usize)
    );

    queue.set_auto_complete(true);
    pipeline.shutdown().expect("shutdown");
}

#[test]
fn test_stale_surface_skips_frames_until_rebuilt() {
    let queue = SimulatedQueue::idle();
    let swapchain = SimulatedSwapchain::new(3).stale_at(2);
    let mut pipeline = pipeline(&queue, swapchain, 2);

    assert!(matches!(
        pipeline.run_frame(|_, _| {}).expect("frame 1"),
        FrameOutcome::Presented { .. }
    ));
    // The stale frame was still submitted and signaled.
    assert_eq!(
        pipeline.run_frame(|_, _| {}).expect("frame 2"),
        FrameOutcome::SurfaceStale
    );
    assert_eq!(pipeline.sync().counter(), 2);
    assert!(pipeline.surface().is_stale());

    let mut recorded = false;
    assert_eq!(
        pipeline.run_frame(|_, _| recorded = true).expect("skipped"),
        FrameOutcome::SurfaceStale
    );
    assert!(!recorded);
    assert_eq!(queue.submissions().len(), 2);

    let vsync = pipeline.vsync();
    pipeline
        .rebuild_surface(|swapchain| swapchain.rebuild(vsync))
        .expect("rebuild");
    assert!(!pipeline.surface().is_stale());
    assert_eq!(pipeline.surface().engine().rebuilds, 1);
    assert_eq!(pipeline.surface().current_buffer().index, 0);

    // The rebuild drained the GPU first.
    assert_eq!(pipeline.sync_mut().frames_in_flight().expect("in flight"), 0);
    assert_eq!(
        pipeline.run_frame(|_, _| {}).expect("frame 3"),
        FrameOutcome::Presented { fence_value: 4 }
    );

    pipeline.shutdown().expect("shutdown");
}

#[test]
fn test_vsync_change_goes_through_rebuild() {
    let queue = SimulatedQueue::idle();
    let mut pipeline = pipeline(&queue, SimulatedSwapchain::new(2), 1);

    pipeline.run_frame(|_, _| {}).expect("frame");
    pipeline.set_vsync(true);
    assert_eq!(
        pipeline.run_frame(|_, _| {}).expect("mismatched frame"),
        FrameOutcome::SurfaceStale
    );

    pipeline
        .rebuild_surface(|swapchain| swapchain.rebuild(true))
        .expect("rebuild");
    assert!(pipeline.surface().engine().vsync());
    assert!(matches!(
        pipeline.run_frame(|_, _| {}).expect("frame"),
        FrameOutcome::Presented { .. }
    ));

    pipeline.shutdown().expect("shutdown");
}

#[test]
fn test_surface_present_outcomes() {
    let mut surface = PresentationSurface::new(SimulatedSwapchain::new(2).stale_at(2));
    assert_eq!(surface.buffer_count(), 2);
    assert_eq!(surface.current_buffer().index, 0);

    assert_eq!(surface.present(false).expect("present"), PresentOutcome::Presented);
    assert_eq!(surface.current_buffer().index, 1);

    assert_eq!(surface.present(false).expect("present"), PresentOutcome::Stale);
    assert!(surface.is_stale());
    assert_eq!(surface.dependency(), GpuDependency::none());
    assert_eq!(surface.present_count(), 2);
}

#[test]
#[should_panic(expected = "at least 2 buffers")]
fn test_single_buffer_ring_rejected() {
    let _ = PresentationSurface::new(SimulatedSwapchain::new(1));
}

#[test]
#[should_panic(expected = "surface is stale")]
fn test_current_buffer_on_stale_surface_panics() {
    let mut surface = PresentationSurface::new(SimulatedSwapchain::new(2).stale_at(1));
    let _ = surface.present(false);
    let _ = surface.current_buffer();
}

#[test]
#[should_panic(expected = "exceeds the 2 recording slot(s)")]
fn test_limit_above_slot_count_rejected() {
    let queue = SimulatedQueue::idle();
    let sync = FrameSynchronizer::new(queue, 2, TIMEOUT).expect("synchronizer");
    let _ = FramePipeline::new(sync, PresentationSurface::new(SimulatedSwapchain::new(3)), 3, false);
}

#[test]
fn test_shutdown_waits_for_presents_after_gpu_drain() {
    let queue = SimulatedQueue::idle();
    let mut pipeline = pipeline(&queue, SimulatedSwapchain::new(3), 2);

    for _ in 0..3 {
        pipeline.run_frame(|_, _| {}).expect("run_frame");
    }
    assert_eq!(pipeline.surface().engine().present_waits, 0);

    pipeline.shutdown().expect("shutdown");
    assert_eq!(pipeline.surface().engine().present_waits, 1);
    assert_eq!(pipeline.sync_mut().frames_in_flight().expect("in flight"), 0);
}

#[test]
fn test_shutdown_skips_present_wait_when_gpu_drain_fails() {
    let queue = SimulatedQueue::stalled();
    let timeout = Duration::from_millis(20);
    let sync = FrameSynchronizer::new(queue.clone(), 2, timeout).expect("synchronizer");
    let mut pipeline =
        FramePipeline::new(sync, PresentationSurface::new(SimulatedSwapchain::new(2)), 2, false);

    pipeline.run_frame(|_, _| {}).expect("run_frame");
    assert!(pipeline.shutdown().is_err());
    assert_eq!(pipeline.surface().engine().present_waits, 0);

    queue.set_auto_complete(true);
    pipeline.shutdown().expect("shutdown");
    assert_eq!(pipeline.surface().engine().present_waits, 1);
}
