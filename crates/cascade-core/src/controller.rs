//! The generic lease controller state machine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use crate::credential::Credential;
use crate::error::StartError;
use crate::observer::LeaseObserver;
use crate::refresher::Refresher;
use crate::backoff::calc_backoff;

/// A TTL-driven refresh loop for one role in the cascade.
///
/// `Controller<R>` is generic over the [`Refresher`] that knows how to
/// actually obtain a credential; the ticker discipline, backoff, and
/// observer fan-out are shared by every role. A controller is also a
/// [`LeaseObserver`] in its own right, so it can be registered directly as
/// a parent's child.
pub struct Controller<R: Refresher> {
    id: String,
    refresher: R,
    max_backoff: Duration,
    credential: RwLock<Credential>,
    children: Mutex<Vec<Arc<dyn LeaseObserver>>>,
    stale_notify: tokio::sync::Notify,
    new_notify: tokio::sync::Notify,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<R: Refresher> Controller<R> {
    /// Create a controller. It does nothing until [`start`](Self::start) is
    /// called.
    pub fn new(id: impl Into<String>, refresher: R, max_backoff: Duration) -> Arc<Self> {
        let (shutdown_tx, _rx) = watch::channel(false);
        Arc::new(Self {
            id: id.into(),
            refresher,
            max_backoff,
            credential: RwLock::new(Credential::empty()),
            children: Mutex::new(Vec::new()),
            stale_notify: tokio::sync::Notify::new(),
            new_notify: tokio::sync::Notify::new(),
            shutdown_tx,
            loop_handle: Mutex::new(None),
        })
    }

    /// Stable identity, shared with the `LeaseObserver` impl.
    #[must_use]
    pub fn controller_id(&self) -> &str {
        &self.id
    }

    /// Current credential snapshot. Empty if unhealthy or suspended.
    pub async fn credential(&self) -> Credential {
        self.credential.read().await.clone()
    }

    /// Register a child. Fan-out order among children is unspecified.
    pub async fn register(&self, child: Arc<dyn LeaseObserver>) {
        self.children.lock().await.push(child);
    }

    /// Deregister a child by identity. A no-op if no child has that id.
    pub async fn deregister(&self, id: &str) {
        let mut children = self.children.lock().await;
        if let Some(pos) = children.iter().position(|c| c.id() == id) {
            children.swap_remove(pos);
        }
    }

    /// Warm the credential with one synchronous refresh attempt, then spawn
    /// the refresh loop. A failed warm is not fatal — the loop retries
    /// under backoff.
    ///
    /// # Errors
    ///
    /// Returns [`StartError::AlreadyStarted`] if called twice.
    pub async fn start(self: &Arc<Self>) -> Result<(), StartError> {
        let mut handle_slot = self.loop_handle.lock().await;
        if handle_slot.is_some() {
            return Err(StartError::AlreadyStarted);
        }

        let mut retry: u32 = 0;
        // A placeholder period; the first warm attempt reshapes it below.
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // consume the immediate first tick tokio::interval fires
        // The warm attempt never forces a NewLease fan-out: any child
        // registered before `start()` is called would otherwise have its
        // `Notify` permit latched before its own loop is even spawned, and
        // the very first iteration of that loop would force a redundant
        // second refresh right behind its own warm. Only the ticker-tick
        // branch in `run_loop` applies `unconditional_rotation()`.
        self.attempt_refresh(&mut retry, &mut ticker, false).await;

        let this = Arc::clone(self);
        *handle_slot = Some(tokio::spawn(async move { this.run_loop(retry, ticker).await }));
        Ok(())
    }

    /// Request termination, wait for any in-flight refresh to finish, and
    /// wait for the loop to acknowledge exit.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }
        tracing::info!(controller = %self.id, "stopped");
    }

    async fn run_loop(self: Arc<Self>, mut retry: u32, mut ticker: Interval) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut suspended = false;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    tracing::info!(controller = %self.id, "terminate received, exiting refresh loop");
                    return;
                }

                () = self.stale_notify.notified() => {
                    tracing::info!(controller = %self.id, "stale lease received, suspending");
                    suspended = true;
                    self.clear_credential().await;
                    self.fan_out_stale().await;
                }

                () = self.new_notify.notified() => {
                    tracing::debug!(controller = %self.id, "new lease received, forcing refresh");
                    suspended = false;
                    self.attempt_refresh(&mut retry, &mut ticker, true).await;
                }

                _ = ticker.tick(), if !suspended => {
                    if self.refresher.unconditional_rotation() {
                        self.fan_out_stale().await;
                    }
                    let force_new = self.refresher.unconditional_rotation();
                    self.attempt_refresh(&mut retry, &mut ticker, force_new).await;
                }
            }
        }
    }

    /// Perform one refresh attempt and drive the retry counter, ticker
    /// period, and fan-out from its outcome.
    ///
    /// `force_notify_new` additionally fans out `NewLease` on success even
    /// when the refresh was not preceded by a failure (used for
    /// parent-triggered forced refreshes, and for session-like roles that
    /// always rotate their children).
    async fn attempt_refresh(&self, retry: &mut u32, ticker: &mut Interval, force_notify_new: bool) {
        let was_healthy = *retry == 0;
        tracing::debug!(controller = %self.id, "attempting refresh");

        match self.refresher.refresh().await {
            Ok(credential) => {
                let period = self.refresher.healthy_period(&credential);
                *self.credential.write().await = credential;
                *retry = 0;
                ticker.reset_after(period);
                tracing::info!(
                    controller = %self.id,
                    next_refresh_secs = period.as_secs(),
                    "refresh succeeded",
                );
                if force_notify_new || !was_healthy {
                    self.fan_out_new().await;
                }
            }
            Err(err) => {
                // Session-like roles already fanned StaleLease unconditionally
                // before this attempt; do not double-notify on failure.
                if was_healthy && !self.refresher.unconditional_rotation() {
                    self.fan_out_stale().await;
                }
                let backoff = calc_backoff(*retry, self.max_backoff);
                *retry += 1;
                self.clear_credential().await;
                ticker.reset_after(backoff);
                tracing::warn!(
                    controller = %self.id,
                    retry = *retry,
                    backoff_secs = backoff.as_secs(),
                    error = %err,
                    "refresh failed",
                );
            }
        }
    }

    async fn clear_credential(&self) {
        *self.credential.write().await = Credential::empty();
    }

    async fn fan_out_new(&self) {
        let children = self.children.lock().await;
        for child in children.iter() {
            child.notify_new_lease();
        }
    }

    async fn fan_out_stale(&self) {
        let children = self.children.lock().await;
        tracing::info!(controller = %self.id, children = children.len(), "fanning out stale lease");
        for child in children.iter() {
            child.notify_stale_lease();
        }
    }
}

impl<R: Refresher> LeaseObserver for Controller<R> {
    fn id(&self) -> &str {
        &self.id
    }

    fn notify_new_lease(&self) {
        self.new_notify.notify_one();
    }

    fn notify_stale_lease(&self) {
        self.stale_notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::error::RefreshError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingRefresher {
        calls: Arc<AtomicU32>,
        fail_first_n: u32,
        unconditional: bool,
        healthy_period: Duration,
    }

    impl CountingRefresher {
        fn new(calls: Arc<AtomicU32>, fail_first_n: u32) -> Self {
            Self {
                calls,
                fail_first_n,
                unconditional: false,
                healthy_period: Duration::from_secs(300),
            }
        }
    }

    #[async_trait]
    impl Refresher for CountingRefresher {
        async fn refresh(&self) -> Result<Credential, RefreshError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first_n {
                return Err(RefreshError::new(std::io::Error::other("injected failure")));
            }
            Ok(Credential {
                material: vec![1, 2, 3],
                ttl_seconds: 300,
                identifier: "cred".to_owned(),
            })
        }

        fn healthy_period(&self, _credential: &Credential) -> Duration {
            self.healthy_period
        }

        fn unconditional_rotation(&self) -> bool {
            self.unconditional
        }
    }

    struct RecordingObserver {
        id: String,
        new_count: AtomicU32,
        stale_count: AtomicU32,
    }

    impl LeaseObserver for RecordingObserver {
        fn id(&self) -> &str {
            &self.id
        }
        fn notify_new_lease(&self) {
            self.new_count.fetch_add(1, Ordering::SeqCst);
        }
        fn notify_stale_lease(&self) {
            self.stale_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn warm_start_populates_credential_on_success() {
        let refresher = CountingRefresher::new(Arc::new(AtomicU32::new(0)), 0);
        let controller = Controller::new("sc", refresher, Duration::from_secs(64));
        controller.start().await.unwrap();
        assert!(!controller.credential().await.is_empty());
        controller.stop().await;
    }

    #[tokio::test]
    async fn failed_warm_leaves_credential_empty_and_does_not_panic() {
        let refresher = CountingRefresher::new(Arc::new(AtomicU32::new(0)), 5);
        let controller = Controller::new("kc", refresher, Duration::from_secs(64));
        controller.start().await.unwrap();
        assert!(controller.credential().await.is_empty());
        controller.stop().await;
    }

    #[tokio::test]
    async fn deregister_absent_child_is_a_no_op() {
        let refresher = CountingRefresher::new(Arc::new(AtomicU32::new(0)), 0);
        let controller = Controller::new("wc", refresher, Duration::from_secs(64));
        controller.deregister("nonexistent").await;
    }

    #[tokio::test]
    async fn stale_then_new_suspends_and_rearms_child() {
        let refresher = CountingRefresher::new(Arc::new(AtomicU32::new(0)), 0);
        let parent = Controller::new("kc", refresher, Duration::from_secs(64));
        parent.start().await.unwrap();

        parent.notify_stale_lease();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Suspension is internal to the loop; observable effect is that a
        // subsequent forced refresh via NewLease still succeeds.
        parent.notify_new_lease();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!parent.credential().await.is_empty());

        parent.stop().await;
    }

    #[tokio::test]
    async fn double_start_rejected() {
        let refresher = CountingRefresher::new(Arc::new(AtomicU32::new(0)), 0);
        let controller = Controller::new("sc", refresher, Duration::from_secs(64));
        controller.start().await.unwrap();
        assert!(controller.start().await.is_err());
        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_backoff_uses_pre_increment_retry_count() {
        let calls = Arc::new(AtomicU32::new(0));
        // Never succeeds, so every attempt exercises the backoff path.
        let refresher = CountingRefresher::new(Arc::clone(&calls), u32::MAX);
        let controller = Controller::new("kc", refresher, Duration::from_secs(64));

        // The warm attempt in start() is the 1st (failing) call.
        controller.start().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // calc_backoff(0, ..) is in [1s, 2s). With the pre-increment retry
        // counter, the 2nd attempt must fire before 2s elapse. The bug this
        // guards against (incrementing before computing backoff) would have
        // drawn from calc_backoff(1, ..), whose range is [2s, 3s), and the
        // 2nd attempt would not yet have happened at this point.
        tokio::time::advance(Duration::from_millis(1_999)).await;
        assert_eq!(
            calls.load(Ordering::SeqCst),
            2,
            "first backoff must be drawn from retry=0, not retry=1",
        );

        // calc_backoff(1, ..) is in [2s, 3s); give ample margin for the 3rd.
        tokio::time::advance(Duration::from_millis(3_500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_tick_waits_for_the_reported_period() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut refresher = CountingRefresher::new(Arc::clone(&calls), 0);
        refresher.healthy_period = Duration::from_secs(10);
        let controller = Controller::new("wc", refresher, Duration::from_secs(64));

        controller.start().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(9_900)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "ticker must not fire before the healthy period elapses");

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2, "ticker must rearm at the reported healthy period");

        controller.stop().await;
    }
}
