//! The background execution loop that drives a core at ~60 logical frames per
//! second.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::emulator::EmulatorCore;
use crate::frame::FrameSlot;

/// Target interval between published frames, approximating 60 Hz.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Handle to a session's emulation thread.
///
/// Cancellation is cooperative: the loop checks the flag once per step, so a
/// stop request is observed within one iteration and no frame writes happen
/// after the loop exits.
pub struct CoreRunner {
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CoreRunner {
    /// Spawn the step loop for `core`. The runner takes ownership of the
    /// core; when the loop exits it asks the core for a final battery
    /// checkpoint before the core is dropped.
    pub fn spawn(mut core: Box<dyn EmulatorCore>, frame: Arc<FrameSlot>, turbo: Arc<AtomicBool>) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = Arc::clone(&cancel);

        let thread = thread::spawn(move || {
            run_loop(core.as_mut(), &frame, &turbo, &cancel_flag);
            core.save_ram();
            debug!("runner: emulation thread exited");
        });

        Self {
            cancel,
            thread: Some(thread),
        }
    }

    /// Signal cancellation and wait for the emulation thread to exit.
    /// Safe to call more than once.
    pub fn stop(&mut self) {
        self.cancel.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            warn!("runner: emulation thread panicked during shutdown");
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }
}

impl Drop for CoreRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(core: &mut dyn EmulatorCore, frame: &FrameSlot, turbo: &AtomicBool, cancel: &AtomicBool) {
    let mut pace = Instant::now();

    while !cancel.load(Ordering::Acquire) {
        core.step();
        if !core.frame_ready() {
            continue;
        }

        frame.publish(core.framebuffer());
        core.clear_frame_flag();

        // Pace to the target interval unless turbo is on; either way the
        // elapsed measurement restarts at the publish that just happened.
        if !turbo.load(Ordering::Relaxed) {
            let elapsed = pace.elapsed();
            if elapsed < FRAME_INTERVAL {
                thread::sleep(FRAME_INTERVAL - elapsed);
            }
        }
        pace = Instant::now();
    }
}
