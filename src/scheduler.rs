//! The delay scheduler: converts a command's replay offset into a wait
//! against the worker's anchor time, combining coarse sleeping with a
//! short busy-wait tail for accuracy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Coarse-sleep quantum during the bulk of a wait.
const SLEEP_QUANTUM: Duration = Duration::from_millis(25);
/// Busy-wait burst size during the final, accuracy-critical stretch.
const SPIN_BURST: u32 = 1000;
/// If the busy-wait tail still overshoots by more than this, warn.
const ACCURACY_WARNING_TOLERANCE: Duration = Duration::from_millis(100);
/// Beyond this much behind, stop trying to catch up and just go.
const SKIP_THRESHOLD: Duration = Duration::from_secs(10);
/// Emit a "falling behind" warning every this-many consecutive skips.
const SKIP_WARNING_EVERY: u64 = 100;

/// Tracks the worker's wall-clock anchor and how many delays in a row have
/// been skipped because the replay had fallen too far behind.
pub struct DelayScheduler {
    anchor: Option<Instant>,
    consecutive_skipped_delays: u64,
}

impl DelayScheduler {
    pub fn new() -> Self {
        Self {
            anchor: None,
            consecutive_skipped_delays: 0,
        }
    }

    #[cfg(test)]
    pub fn consecutive_skipped_delays(&self) -> u64 {
        self.consecutive_skipped_delays
    }

    /// Set once, on the worker's first command, and never rewritten.
    fn anchor(&mut self) -> Instant {
        *self.anchor.get_or_insert_with(Instant::now)
    }

    /// Waits until `anchor + offset_ms`, or returns immediately if already
    /// behind. Polls `stopped` throughout so a worker shutdown interrupts a
    /// long wait promptly.
    pub async fn wait_for_offset(&mut self, offset_ms: Option<i64>, stopped: &AtomicBool) {
        let Some(offset_ms) = offset_ms else {
            return;
        };
        let anchor = self.anchor();
        let now = Instant::now();
        let target_offset = Duration::from_millis(offset_ms.max(0) as u64);
        let elapsed_since_anchor = now.saturating_duration_since(anchor);

        if target_offset > elapsed_since_anchor {
            let delay = target_offset - elapsed_since_anchor;
            self.consecutive_skipped_delays = 0;
            self.sleep_with_accuracy_tail(delay, stopped).await;
        } else {
            let behind = elapsed_since_anchor - target_offset;
            if behind > SKIP_THRESHOLD {
                self.consecutive_skipped_delays += 1;
                if self.consecutive_skipped_delays % SKIP_WARNING_EVERY == 0 {
                    log::warn!(
                        "replay falling behind: {} consecutive delays skipped, {:?} behind",
                        self.consecutive_skipped_delays,
                        behind
                    );
                }
            }
            // Slightly behind (within the skip threshold): execute
            // immediately, no warning.
        }
    }

    async fn sleep_with_accuracy_tail(&self, delay: Duration, stopped: &AtomicBool) {
        let start = Instant::now();

        while start.elapsed() + SLEEP_QUANTUM < delay {
            if stopped.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(SLEEP_QUANTUM).await;
        }

        while start.elapsed() < delay {
            if stopped.load(Ordering::SeqCst) {
                return;
            }
            for _ in 0..SPIN_BURST {
                std::hint::spin_loop();
            }
            tokio::task::yield_now().await;
        }

        let overshoot = start.elapsed().saturating_sub(delay);
        if overshoot > ACCURACY_WARNING_TOLERANCE {
            log::warn!(
                "replay delay inaccurate: overshot target by {:?}",
                overshoot
            );
        }
    }
}

impl Default for DelayScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[tokio::test]
    async fn first_command_sets_anchor_and_does_not_block() {
        let mut scheduler = DelayScheduler::new();
        assert!(scheduler.anchor.is_none());
        scheduler.wait_for_offset(Some(0), &running()).await;
        assert!(scheduler.anchor.is_some());
    }

    #[tokio::test]
    async fn does_not_rewrite_anchor() {
        let mut scheduler = DelayScheduler::new();
        scheduler.wait_for_offset(Some(0), &running()).await;
        let first_anchor = scheduler.anchor;
        scheduler.wait_for_offset(Some(0), &running()).await;
        assert_eq!(scheduler.anchor, first_anchor);
    }

    #[tokio::test]
    async fn none_offset_never_blocks_or_touches_anchor() {
        let mut scheduler = DelayScheduler::new();
        scheduler.wait_for_offset(None, &running()).await;
        assert!(scheduler.anchor.is_none());
    }

    #[tokio::test]
    async fn falling_behind_increments_skip_counter_without_sleeping() {
        let mut scheduler = DelayScheduler::new();
        // Force the anchor far enough in the past that any offset under
        // SKIP_THRESHOLD reads as "far behind" relative to now.
        scheduler.anchor = Some(Instant::now() - Duration::from_secs(11));
        scheduler.wait_for_offset(Some(500), &running()).await;
        assert_eq!(scheduler.consecutive_skipped_delays(), 1);
    }

    #[tokio::test]
    async fn slightly_behind_does_not_increment_skip_counter() {
        let mut scheduler = DelayScheduler::new();
        scheduler.anchor = Some(Instant::now() - Duration::from_secs(1));
        scheduler.wait_for_offset(Some(500), &running()).await;
        assert_eq!(scheduler.consecutive_skipped_delays(), 0);
    }

    #[tokio::test]
    async fn stopped_flag_interrupts_a_long_wait() {
        let mut scheduler = DelayScheduler::new();
        let stopped = AtomicBool::new(true);
        let started = Instant::now();
        scheduler.wait_for_offset(Some(60_000), &stopped).await;
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
