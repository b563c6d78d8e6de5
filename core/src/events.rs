//! The Event Bus: in-process, topic-less publish/subscribe
//! with at-least-once delivery, subscriber isolation, and an optional
//! durable log.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::collaborators::Persistence;
use crate::models::{Event, EventKind};

type Subscriber = Arc<dyn Fn(&Event) + Send + Sync>;

struct Subscription {
    id: u64,
    kinds: Option<Vec<EventKind>>,
    callback: Subscriber,
}

/// Handle returned by [`EventBus::subscribe`]; dropping it does not
/// unsubscribe, call [`EventBus::unsubscribe`] explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle(u64);

pub struct EventBus {
    subscriptions: Mutex<Vec<Subscription>>,
    next_sub_id: AtomicU64,
    durable_log: Option<Arc<dyn Persistence>>,
}

impl EventBus {
    pub fn new(durable_log: Option<Arc<dyn Persistence>>) -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
            next_sub_id: AtomicU64::new(0),
            durable_log,
        }
    }

    /// Register a subscriber for the given event kinds, or all kinds if
    /// `kinds` is `None`. Only subscribers registered before `publish` is
    /// called receive that event.
    pub fn subscribe(
        &self,
        kinds: Option<Vec<EventKind>>,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let id = self.next_sub_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.lock().push(Subscription { id, kinds, callback: Arc::new(callback) });
        SubscriptionHandle(id)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscriptions.lock().retain(|s| s.id != handle.0);
    }

    /// Deliver `event` to every matching subscriber. A panic inside one
    /// subscriber is caught and logged so it cannot prevent delivery to the
    /// rest.
    pub async fn publish(&self, event: Event) {
        let subs: Vec<Subscriber> = {
            let subs = self.subscriptions.lock();
            subs.iter()
                .filter(|s| s.kinds.as_ref().map(|k| k.contains(&event.kind)).unwrap_or(true))
                .map(|s| s.callback.clone())
                .collect()
        };

        for callback in subs {
            let event = event.clone();
            if let Err(panic) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(&event)))
            {
                warn!(?panic, kind = ?event.kind, "event subscriber panicked, continuing");
            }
        }

        if let Some(log) = &self.durable_log {
            let payload = serde_json::to_value(&event).expect("Event always serializes");
            if let Err(err) = log.append("events", payload).await {
                warn!(error = %err, "failed to append event to durable log");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventPayload;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    fn sample_event() -> Event {
        Event {
            kind: EventKind::TaskAssigned,
            payload: EventPayload::TaskAssigned { task_id: "t1".into(), agent_id: "a1".into() },
            timestamp: Utc::now(),
            project_id: "p1".into(),
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn all_subscribers_receive_matching_events() {
        let bus = EventBus::new(None);
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = count.clone();
        bus.subscribe(None, move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = count.clone();
        bus.subscribe(Some(vec![EventKind::TaskAssigned]), move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(sample_event()).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_block_others() {
        let bus = EventBus::new(None);
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(None, |_| panic!("boom"));
        let c = count.clone();
        bus.subscribe(None, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(sample_event()).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new(None);
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = bus.subscribe(None, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.unsubscribe(handle);
        bus.publish(sample_event()).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
