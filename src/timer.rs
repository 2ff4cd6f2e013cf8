//! # Summary
//!
//! One-shot replaceable timer. Arming a timer aborts whatever it was
//! previously counting down, so each purpose has at most one pending firing.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct Timer {
    name: &'static str,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Timer { name, pending: Mutex::new(None) }
    }

    /// Runs `task` after `delay`, replacing any pending firing.
    ///
    /// The task must not re-arm the timer that is running it: arming aborts
    /// the previous handle, which would be the task itself.
    pub fn arm<F>(&self, delay: Duration, task: F)
    where F: Future<Output = ()> + Send + 'static,
    {
        trace!("arming {} timer for {:?}", self.name, delay);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        if let Some(previous) = self.pending.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Aborts the pending firing, if any.
    pub fn cancel(&self) {
        if let Some(previous) = self.pending.lock().take() {
            trace!("cancelling {} timer", self.name);
            previous.abort();
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(previous) = self.pending.get_mut().take() {
            previous.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_pending_firing() {
        let timer = Timer::new("test");
        let fired = Arc::new(AtomicUsize::new(0));

        for value in 1..=3 {
            let fired = fired.clone();
            timer.arm(Duration::from_secs(5), async move {
                fired.store(value, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let timer = Timer::new("test");
        let fired = Arc::new(AtomicUsize::new(0));
        let flag = fired.clone();
        timer.arm(Duration::from_secs(1), async move {
            flag.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
