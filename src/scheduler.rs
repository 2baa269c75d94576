//! Shared polling scheduler.
//!
//! The backend has no push channel, so freshness comes from polling. Each
//! resource gets at most one background loop no matter how many views are
//! watching it: subscribers are counted, and the loop is cancelled when the
//! last [`PollHandle`] drops. Because the loop is a single task, ticks are
//! strictly sequential — a slow response can never overlap the next poll —
//! and a cancellation mid-request discards the response instead of
//! delivering it to a view that no longer exists.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::events::{ClientEvent, EventBus};

/// Resources the storefront polls for freshness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollResource {
    Catalog,
    Cart,
    Orders,
    Dashboard,
}

impl PollResource {
    /// Default cadence per resource. Orders poll fastest since status
    /// changes drive user notifications.
    pub fn default_interval(&self) -> Duration {
        match self {
            PollResource::Orders => Duration::from_secs(5),
            PollResource::Catalog | PollResource::Cart | PollResource::Dashboard => {
                Duration::from_secs(10)
            }
        }
    }
}

pub type PollFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
pub type PollFn = Arc<dyn Fn() -> PollFuture + Send + Sync>;

struct ActivePoll {
    subscribers: usize,
    token: CancellationToken,
}

pub struct PollScheduler {
    active: Mutex<HashMap<PollResource, ActivePoll>>,
    events: EventBus,
}

/// Subscription guard. Dropping the last handle for a resource cancels its
/// poll loop.
pub struct PollHandle {
    scheduler: Arc<PollScheduler>,
    resource: PollResource,
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.scheduler.unsubscribe(self.resource);
    }
}

impl PollScheduler {
    pub fn new(events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            active: Mutex::new(HashMap::new()),
            events,
        })
    }

    /// Subscribe a view to a resource. The first subscriber starts the
    /// loop with `poll` and the given cadence; later subscribers share it
    /// (their `interval`/`poll` arguments are ignored until the loop is
    /// restarted by a fresh first subscriber).
    pub fn subscribe(
        self: &Arc<Self>,
        resource: PollResource,
        interval: Option<Duration>,
        poll: PollFn,
    ) -> PollHandle {
        let mut active = self.active.lock().unwrap();
        if let Some(entry) = active.get_mut(&resource) {
            entry.subscribers += 1;
        } else {
            let token = CancellationToken::new();
            let interval = interval.unwrap_or_else(|| resource.default_interval());
            spawn_poll_loop(resource, interval, poll, token.clone(), self.events.clone());
            active.insert(
                resource,
                ActivePoll {
                    subscribers: 1,
                    token,
                },
            );
        }
        PollHandle {
            scheduler: Arc::clone(self),
            resource,
        }
    }

    pub fn subscriber_count(&self, resource: PollResource) -> usize {
        self.active
            .lock()
            .unwrap()
            .get(&resource)
            .map(|a| a.subscribers)
            .unwrap_or(0)
    }

    fn unsubscribe(&self, resource: PollResource) {
        let mut active = self.active.lock().unwrap();
        if let Some(entry) = active.get_mut(&resource) {
            entry.subscribers -= 1;
            if entry.subscribers == 0 {
                entry.token.cancel();
                active.remove(&resource);
                info!(?resource, "last subscriber gone, poll loop cancelled");
            }
        }
    }
}

fn spawn_poll_loop(
    resource: PollResource,
    interval: Duration,
    poll: PollFn,
    token: CancellationToken,
    events: EventBus,
) {
    tokio::spawn(async move {
        info!(
            ?resource,
            interval_ms = interval.as_millis() as u64,
            "poll loop started"
        );
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            // The in-flight request is dropped on cancellation, so its
            // response is never applied after teardown.
            tokio::select! {
                _ = token.cancelled() => break,
                result = poll() => match result {
                    Ok(()) => events.emit(ClientEvent::PollCompleted { resource, ok: true }),
                    Err(e) => {
                        warn!(?resource, error = %e, "poll failed, waiting for next interval");
                        events.emit(ClientEvent::PollCompleted { resource, ok: false });
                    }
                }
            }
        }
        info!(?resource, "poll loop stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const INTERVAL: Duration = Duration::from_secs(5);

    fn counting_poll(count: Arc<AtomicUsize>) -> PollFn {
        Arc::new(move || {
            let count = count.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    /// Let the loop task register its sleep, advance the paused clock by
    /// one interval, then let the tick run to completion.
    async fn tick() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        tokio::time::advance(INTERVAL).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn two_subscribers_share_one_loop() {
        let scheduler = PollScheduler::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));

        let _h1 = scheduler.subscribe(
            PollResource::Orders,
            Some(INTERVAL),
            counting_poll(count.clone()),
        );
        let _h2 = scheduler.subscribe(
            PollResource::Orders,
            Some(INTERVAL),
            counting_poll(count.clone()),
        );
        assert_eq!(scheduler.subscriber_count(PollResource::Orders), 2);

        tick().await;
        assert_eq!(count.load(Ordering::SeqCst), 1, "one poll per tick");

        tick().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_survives_until_last_handle_drops() {
        let scheduler = PollScheduler::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));

        let h1 = scheduler.subscribe(
            PollResource::Cart,
            Some(INTERVAL),
            counting_poll(count.clone()),
        );
        let h2 = scheduler.subscribe(
            PollResource::Cart,
            Some(INTERVAL),
            counting_poll(count.clone()),
        );

        tick().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        drop(h2);
        assert_eq!(scheduler.subscriber_count(PollResource::Cart), 1);
        tick().await;
        assert_eq!(count.load(Ordering::SeqCst), 2, "loop still running");

        drop(h1);
        assert_eq!(scheduler.subscriber_count(PollResource::Cart), 0);
        tick().await;
        tick().await;
        assert_eq!(count.load(Ordering::SeqCst), 2, "loop cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_poll_keeps_the_loop_alive() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let scheduler = PollScheduler::new(events);
        let count = Arc::new(AtomicUsize::new(0));

        let count2 = count.clone();
        let poll: PollFn = Arc::new(move || {
            let count = count2.clone();
            Box::pin(async move {
                let n = count.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(crate::error::ClientError::Timeout {
                        url: "http://test".into(),
                    })
                } else {
                    Ok(())
                }
            })
        });

        let _h = scheduler.subscribe(PollResource::Dashboard, Some(INTERVAL), poll);

        tick().await;
        assert!(matches!(
            rx.try_recv().expect("first poll event"),
            ClientEvent::PollCompleted { ok: false, .. }
        ));

        tick().await;
        assert!(matches!(
            rx.try_recv().expect("second poll event"),
            ClientEvent::PollCompleted { ok: true, .. }
        ));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_resources_poll_independently() {
        let scheduler = PollScheduler::new(EventBus::new());
        let orders = Arc::new(AtomicUsize::new(0));
        let catalog = Arc::new(AtomicUsize::new(0));

        let _h1 = scheduler.subscribe(
            PollResource::Orders,
            Some(INTERVAL),
            counting_poll(orders.clone()),
        );
        let _h2 = scheduler.subscribe(
            PollResource::Catalog,
            Some(INTERVAL * 2),
            counting_poll(catalog.clone()),
        );

        tick().await;
        tick().await;
        assert_eq!(orders.load(Ordering::SeqCst), 2);
        assert_eq!(catalog.load(Ordering::SeqCst), 1);
    }
}
