//! Cancellable trailing-edge debounce with a maximum-wait ceiling.
//!
//! Each [`Debouncer::call`] pushes a value and (re)arms a timer. The timer
//! fires at `min(last_call + wait, first_call + max_wait)`, so a steady stream
//! of calls is still flushed at least every `max_wait`. Firing hands every
//! value collected since the previous fire to the callback; the callback runs
//! on its own task, so cancelling the debouncer never aborts work already
//! started.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use super::remote::BoxFuture;

type FireFn<T> = dyn Fn(Vec<T>) -> BoxFuture<'static, ()> + Send + Sync;

/// Debounce timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    /// Trailing window after the last call.
    pub wait: Duration,
    /// Upper bound from the first call of a burst.
    pub max_wait: Duration,
}

impl DebounceConfig {
    pub fn new(wait: Duration, max_wait: Duration) -> Self {
        Self {
            wait,
            max_wait: max_wait.max(wait),
        }
    }

    pub fn from_millis(wait_ms: u64, max_wait_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(wait_ms),
            Duration::from_millis(max_wait_ms),
        )
    }
}

struct Pending<T> {
    values: Vec<T>,
    first_call: Option<Instant>,
    last_call: Option<Instant>,
    timer: Option<JoinHandle<()>>,
}

impl<T> Pending<T> {
    fn deadline(&self, config: DebounceConfig) -> Option<Instant> {
        let first = self.first_call?;
        let last = self.last_call?;
        Some((last + config.wait).min(first + config.max_wait))
    }

    fn take(&mut self) -> Vec<T> {
        self.first_call = None;
        self.last_call = None;
        std::mem::take(&mut self.values)
    }
}

/// Debounced callback owned by a coordinator or channel.
///
/// Must be used from within a tokio runtime.
pub struct Debouncer<T: Send + 'static> {
    config: DebounceConfig,
    pending: Arc<Mutex<Pending<T>>>,
    fire: Arc<FireFn<T>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F>(config: DebounceConfig, fire: F) -> Self
    where
        F: Fn(Vec<T>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            config,
            pending: Arc::new(Mutex::new(Pending {
                values: Vec::new(),
                first_call: None,
                last_call: None,
                timer: None,
            })),
            fire: Arc::new(fire),
        }
    }

    pub fn config(&self) -> DebounceConfig {
        self.config
    }

    fn lock(pending: &Mutex<Pending<T>>) -> MutexGuard<'_, Pending<T>> {
        pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue `value` and (re)arm the timer.
    pub fn call(&self, value: T) {
        let mut pending = Self::lock(&self.pending);
        let now = Instant::now();
        pending.values.push(value);
        pending.first_call.get_or_insert(now);
        pending.last_call = Some(now);

        if pending.timer.is_none() {
            pending.timer = Some(self.spawn_timer());
        }
    }

    fn spawn_timer(&self) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        let fire = Arc::clone(&self.fire);
        let config = self.config;

        tokio::spawn(async move {
            loop {
                let deadline = Self::lock(&pending).deadline(config);
                let Some(deadline) = deadline else {
                    Self::lock(&pending).timer = None;
                    return;
                };
                sleep_until(deadline).await;

                let batch = {
                    let mut guard = Self::lock(&pending);
                    match guard.deadline(config) {
                        Some(current) if current <= Instant::now() => {
                            guard.timer = None;
                            guard.take()
                        }
                        // re-armed by a later call
                        Some(_) => continue,
                        None => {
                            guard.timer = None;
                            return;
                        }
                    }
                };
                tokio::spawn(fire(batch));
                return;
            }
        })
    }

    /// Whether values are waiting for the timer.
    pub fn is_pending(&self) -> bool {
        !Self::lock(&self.pending).values.is_empty()
    }

    /// Drop pending values without firing.
    pub fn cancel(&self) {
        self.take_now();
    }

    /// Fire immediately with whatever is pending, on a new task.
    pub fn fire_now(&self) {
        let batch = self.take_now();
        if !batch.is_empty() {
            tokio::spawn((self.fire)(batch));
        }
    }

    fn take_now(&self) -> Vec<T> {
        let mut pending = Self::lock(&self.pending);
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }
        pending.take()
    }

    /// Fire immediately with whatever is pending and wait for the callback.
    ///
    /// Does nothing when nothing is pending.
    pub async fn flush(&self) {
        let batch = self.take_now();
        if !batch.is_empty() {
            (self.fire)(batch).await;
        }
    }
}

impl<T: Send + 'static> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(timer) = Self::lock(&self.pending).timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    fn recorder(config: DebounceConfig) -> (Debouncer<u32>, mpsc::UnboundedReceiver<Vec<u32>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::new(config, move |batch| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(batch);
            })
        });
        (debouncer, rx)
    }

    async fn advance(ms: u64) {
        tokio::time::advance(Duration::from_millis(ms)).await;
        // let spawned fire tasks run
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_edge_collapses_burst() {
        let (debouncer, mut rx) = recorder(DebounceConfig::from_millis(500, 3000));

        debouncer.call(1);
        advance(200).await;
        debouncer.call(2);
        advance(200).await;
        debouncer.call(3);

        advance(499).await;
        assert!(rx.try_recv().is_err());

        advance(2).await;
        assert_eq!(rx.try_recv().unwrap(), vec![1, 2, 3]);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_wait_bounds_a_steady_stream() {
        let (debouncer, mut rx) = recorder(DebounceConfig::from_millis(500, 3000));

        // one call every 400ms never leaves a 500ms gap
        for i in 0..8 {
            debouncer.call(i);
            advance(400).await;
        }

        let first = rx.try_recv().unwrap();
        assert_eq!(first, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending() {
        let (debouncer, mut rx) = recorder(DebounceConfig::from_millis(500, 3000));

        debouncer.call(1);
        debouncer.cancel();
        advance(1000).await;

        assert!(rx.try_recv().is_err());

        debouncer.call(2);
        advance(600).await;
        assert_eq!(rx.try_recv().unwrap(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_fires_immediately() {
        let (debouncer, mut rx) = recorder(DebounceConfig::from_millis(500, 3000));

        debouncer.flush().await;
        assert!(rx.try_recv().is_err());

        debouncer.call(7);
        debouncer.flush().await;
        assert_eq!(rx.try_recv().unwrap(), vec![7]);

        advance(1000).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_now_runs_in_background() {
        let (debouncer, mut rx) = recorder(DebounceConfig::from_millis(500, 3000));

        debouncer.call(4);
        debouncer.call(5);
        debouncer.fire_now();
        assert!(!debouncer.is_pending());

        advance(0).await;
        assert_eq!(rx.try_recv().unwrap(), vec![4, 5]);
        advance(1000).await;
        assert!(rx.try_recv().is_err());
    }
}
