//! Cooperative cancellation and progress reporting for the import worker.
//!
//! The worker checks the [`CancelToken`] and emits a [`ProgressEvent`] once per
//! insert batch through [`Controller::tick`]; nothing else is shared with the
//! caller.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
    },
    thread,
    time::Duration,
};

use log::debug;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Deadline expressed as a delayed cancellation. A zero timeout cancels
    /// immediately.
    pub fn cancel_after(&self, timeout: Duration) {
        if timeout.is_zero() {
            self.cancel();
            return;
        }
        let token = self.clone();
        thread::spawn(move || {
            thread::sleep(timeout);
            debug!("Deadline of {timeout:?} reached; cancelling import");
            token.cancel();
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub rows_processed: u64,
    pub rows_total_estimate: Option<u64>,
}

impl ProgressEvent {
    /// Completion ratio in `0.0..=1.0`, when the total is known.
    pub fn fraction(&self) -> Option<f64> {
        self.rows_total_estimate
            .filter(|total| *total > 0)
            .map(|total| (self.rows_processed as f64 / total as f64).min(1.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Cancel,
}

/// Rows per insert batch for an estimated row count.
pub fn batch_size_for(estimate: Option<u64>) -> usize {
    match estimate.unwrap_or(0) {
        0..1_000 => 50,
        1_000..10_000 => 250,
        10_000..100_000 => 1_000,
        100_000..1_000_000 => 2_500,
        _ => 5_000,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Controller {
    cancel: CancelToken,
    progress: Option<Sender<ProgressEvent>>,
    batch_size: Option<usize>,
    total_estimate: Option<u64>,
}

impl Controller {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, sender: Sender<ProgressEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Fixed batch size; `0` is treated as `1`.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size.max(1));
        self
    }

    pub fn with_total_estimate(mut self, estimate: Option<u64>) -> Self {
        self.total_estimate = estimate;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
            .unwrap_or_else(|| batch_size_for(self.total_estimate))
    }

    /// Called after each flushed batch. A dropped receiver is not an error:
    /// the import keeps going without an audience.
    pub fn tick(&self, rows_processed: u64) -> Tick {
        if self.cancel.is_cancelled() {
            return Tick::Cancel;
        }
        if let Some(sender) = &self.progress {
            let _ = sender.send(ProgressEvent {
                rows_processed,
                rows_total_estimate: self.total_estimate,
            });
        }
        Tick::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn batch_size_scales_with_estimate() {
        assert_eq!(batch_size_for(None), 50);
        assert_eq!(batch_size_for(Some(999)), 50);
        assert_eq!(batch_size_for(Some(1_000)), 250);
        assert_eq!(batch_size_for(Some(50_000)), 1_000);
        assert_eq!(batch_size_for(Some(500_000)), 2_500);
        assert_eq!(batch_size_for(Some(5_000_000)), 5_000);
    }

    #[test]
    fn tick_reports_progress_until_cancelled() {
        let (tx, rx) = mpsc::channel();
        let controller = Controller::new(CancelToken::new())
            .with_progress(tx)
            .with_total_estimate(Some(200));
        assert_eq!(controller.tick(50), Tick::Continue);
        let event = rx.recv().unwrap();
        assert_eq!(event.rows_processed, 50);
        assert_eq!(event.fraction(), Some(0.25));

        controller.cancel_token().cancel();
        assert_eq!(controller.tick(100), Tick::Cancel);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receiver_does_not_stop_the_import() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let controller = Controller::new(CancelToken::new()).with_progress(tx);
        assert_eq!(controller.tick(1), Tick::Continue);
    }

    #[test]
    fn explicit_batch_size_wins() {
        let controller = Controller::default()
            .with_total_estimate(Some(1_000_000))
            .with_batch_size(0);
        assert_eq!(controller.batch_size(), 1);
    }

    #[test]
    fn deadline_cancels_the_token() {
        let token = CancelToken::new();
        token.cancel_after(Duration::from_millis(10));
        for _ in 0..200 {
            if token.is_cancelled() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("token was not cancelled by the deadline");
    }
}
