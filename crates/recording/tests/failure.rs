//! Storage-exhaustion handling, driven through the `strobe-fail` points.
//!
//! These tests arm process-global fault state, so they live in their own
//! binary and serialize on a lock.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use strobe_camera::{CameraConfig, CameraLimits, CaptureMode, TestPatternSource};
use strobe_project::SessionState;
use strobe_recording::{CaptureController, CaptureOptions, CaptureState};

static FAIL_GUARD: Mutex<()> = Mutex::new(());

fn wait_until(what: &str, mut ready: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !ready() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn run_until_failed(mode: CaptureMode, fail_point: &str) -> SessionState {
    let _guard = FAIL_GUARD.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let source = TestPatternSource::new(CameraLimits::default());
    let mut controller = CaptureController::new(Box::new(source));

    controller
        .start(
            mode,
            CameraConfig {
                width: 32,
                height: 8,
                fps_cap: None,
                ..Default::default()
            },
            &dir.path().join("session"),
            CaptureOptions::default(),
        )
        .unwrap();

    strobe_fail::arm(fail_point);
    wait_until("the failure to surface", || {
        controller.status().state == CaptureState::Failed
    });
    strobe_fail::disarm(fail_point);

    let status = controller.status();
    assert!(status
        .failure
        .is_some_and(|reason| reason.contains("storage exhausted")));

    controller.stop().unwrap().state
}

#[test]
fn full_disk_fails_an_area_session() {
    let state = run_until_failed(CaptureMode::Area, "strobe-recording::frame_dir::write");
    assert_eq!(state, SessionState::Failed);
}

#[test]
fn full_disk_fails_a_waterfall_session() {
    let state = run_until_failed(CaptureMode::Waterfall, "strobe-recording::waterfall::write");
    assert_eq!(state, SessionState::Failed);
}
