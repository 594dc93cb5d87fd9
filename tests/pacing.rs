mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{CoreProbe, DirStore, TestCoreFactory, content_with_rom, init_logging};
use gb_arcade::battery::{BatteryStore, SaveScope};
use gb_arcade::serial::LinkHub;
use gb_arcade::session::ArcadeHost;

fn paced_host(dir: &std::path::Path, probe: Arc<CoreProbe>) -> ArcadeHost {
    let store: Arc<dyn BatteryStore> = Arc::new(DirStore::new(dir));
    ArcadeHost::new(
        0,
        Arc::new(TestCoreFactory::new(probe)),
        store,
        SaveScope {
            save_id: "farm-1".into(),
            player_id: "player-1".into(),
        },
        LinkHub::new(),
    )
}

#[test]
fn pacing_throttles_to_roughly_sixty_fps() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(CoreProbe::default());
    let mut host = paced_host(dir.path(), probe);

    let content = content_with_rom(dir.path(), "test.paced");
    host.load(&content, false).unwrap();

    thread::sleep(Duration::from_millis(400));
    let published = host.frames_published();
    host.unload();

    // 400ms at a 16ms interval is ~25 frames; allow generous scheduling
    // slack in both directions, but rule out an unthrottled core.
    assert!(published >= 5, "only {published} frames published");
    assert!(published <= 40, "{published} frames is faster than pacing allows");
}

#[test]
fn turbo_skips_the_pacing_sleep() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(CoreProbe::default());
    let mut host = paced_host(dir.path(), probe);

    let content = content_with_rom(dir.path(), "test.turbo");
    host.load(&content, false).unwrap();

    thread::sleep(Duration::from_millis(200));
    let paced = host.frames_published();
    assert!(paced <= 20, "paced rate too high: {paced}");

    assert!(host.toggle_turbo());
    thread::sleep(Duration::from_millis(200));
    let turbo = host.frames_published() - paced;
    host.unload();

    // Without the sleep the scripted core publishes orders of magnitude
    // faster; even a heavily loaded machine clears this bar.
    assert!(
        turbo > paced * 3,
        "turbo published {turbo} frames vs {paced} paced"
    );
}

#[test]
fn published_frames_are_whole_and_advance() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(CoreProbe::default());
    let mut host = paced_host(dir.path(), probe);

    let content = content_with_rom(dir.path(), "test.frames");
    host.load(&content, false).unwrap();

    let mut last_value = 0u16;
    for _ in 0..5 {
        thread::sleep(Duration::from_millis(40));
        let frame = host.latest_frame().unwrap();
        let first = frame[0];
        // Uniform fill proves the reader never sees a half-written frame.
        assert!(frame.iter().all(|&px| px == first));
        assert!(first >= last_value);
        last_value = first;
    }
    assert!(last_value > 0);
    host.unload();
}

#[test]
fn cancellation_stops_frame_writes_and_checkpoints_ram() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(CoreProbe::default());
    let mut host = paced_host(dir.path(), Arc::clone(&probe));

    let content = content_with_rom(dir.path(), "test.cancel");
    host.load(&content, false).unwrap();
    thread::sleep(Duration::from_millis(50));
    host.unload();

    // unload joined the emulation thread, so the step counter is final.
    let steps_after_stop = probe.steps.load(std::sync::atomic::Ordering::Relaxed);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(
        probe.steps.load(std::sync::atomic::Ordering::Relaxed),
        steps_after_stop
    );

    // Exactly one final battery checkpoint.
    assert_eq!(probe.saves.lock().unwrap().len(), 1);
}

#[test]
fn toggle_turbo_without_a_session_is_inert() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(CoreProbe::default());
    let host = paced_host(dir.path(), probe);
    assert!(!host.toggle_turbo());
}
