//! Timer thread that advances a directory's epochs

use super::Directory;
use crate::config::Config;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Runs update and verification transitions at the configured cadence until
/// stopped or dropped
#[derive(Debug)]
pub struct EpochDriver {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl EpochDriver {
    pub fn spawn(directory: Arc<Directory>, config: &Config) -> Self {
        let (stop, stopped) = mpsc::channel();
        let update_period = config.update_period();
        let verification_period = config.verification_period();

        let thread = thread::spawn(move || {
            let start = Instant::now();
            let mut next_update = start + update_period;
            let mut next_verification = start + verification_period;

            loop {
                let wait = next_update
                    .min(next_verification)
                    .saturating_duration_since(Instant::now());
                match stopped.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }

                let now = Instant::now();
                if now >= next_update {
                    if let Err(e) = directory.increment_update_epoch() {
                        error!(error = %e, "update epoch failed");
                    }
                    next_update = advance(next_update, update_period, now);
                }
                if now >= next_verification {
                    if let Err(e) = directory.increment_verification_period() {
                        error!(error = %e, "verification period failed");
                    }
                    next_verification = advance(next_verification, verification_period, now);
                }
            }
            debug!("epoch driver stopped");
        });

        EpochDriver {
            stop: Some(stop),
            thread: Some(thread),
        }
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("epoch driver thread panicked");
            }
        }
    }
}

impl Drop for EpochDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Next deadline after `now`, skipping any missed ticks
fn advance(deadline: Instant, period: Duration, now: Instant) -> Instant {
    let mut next = deadline + period;
    while next <= now {
        next += period;
    }
    next
}
