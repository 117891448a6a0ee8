//! In-process pub-sub for `{event, error, started, stopped}` notifications
//! (spec §2 EventBus). Subscriber exceptions/panics inside a notification
//! must never escape `publish` — errors inside subscriber invocation are the
//! caller's responsibility to guard, which the dispatcher does.

use std::sync::{Arc, Mutex};

use crate::event::NormalizedEvent;

#[derive(Debug, Clone)]
pub enum BusNotification {
    Event {
        provider: String,
        event: NormalizedEvent,
    },
    Error {
        provider: String,
        message: String,
    },
    Started,
    Stopped,
}

pub trait Subscriber: Send + Sync {
    fn on_notification(&self, notification: &BusNotification);
}

/// Handle returned by `subscribe`; dropping it, or calling `unsubscribe`
/// explicitly, removes the subscriber. A distilled "subscribers" pub-sub
/// with no unsubscribe path leaks indefinitely, so this is carried as an
/// ambient-stack supplement (SPEC_FULL §3).
pub struct Subscription {
    id: u64,
    bus: Arc<Mutex<Vec<(u64, Arc<dyn Subscriber>)>>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop performs the removal; this method just makes the intent explicit.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut subs) = self.bus.lock() {
            subs.retain(|(id, _)| *id != self.id);
        }
    }
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<(u64, Arc<dyn Subscriber>)>>>,
    next_id: Mutex<u64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> Subscription {
        let id = {
            let mut next_id = self.next_id.lock().expect("eventbus id lock poisoned");
            let id = *next_id;
            *next_id += 1;
            id
        };
        self.subscribers
            .lock()
            .expect("eventbus subscriber lock poisoned")
            .push((id, subscriber));
        Subscription {
            id,
            bus: Arc::clone(&self.subscribers),
        }
    }

    /// Publishes to a snapshot of the subscriber list taken at call time, so
    /// a subscriber that unsubscribes mid-publish (e.g. from within its own
    /// callback) cannot deadlock on the subscriber-list lock. A subscriber
    /// that panics is caught and logged; it never unwinds into the caller.
    pub fn publish(&self, notification: BusNotification) {
        let snapshot: Vec<Arc<dyn Subscriber>> = self
            .subscribers
            .lock()
            .expect("eventbus subscriber lock poisoned")
            .iter()
            .map(|(_, sub)| Arc::clone(sub))
            .collect();
        for subscriber in snapshot {
            let notification = &notification;
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                subscriber.on_notification(notification);
            }));
            if let Err(payload) = outcome {
                tracing::error!(error = %panic_message(&payload), "subscriber panicked during notification");
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "subscriber panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(Arc<AtomicUsize>);
    impl Subscriber for Counter {
        fn on_notification(&self, _notification: &BusNotification) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _sub1 = bus.subscribe(Arc::new(Counter(Arc::clone(&count))));
        let _sub2 = bus.subscribe(Arc::new(Counter(Arc::clone(&count))));
        bus.publish(BusNotification::Started);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_subscription_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sub = bus.subscribe(Arc::new(Counter(Arc::clone(&count))));
        drop(sub);
        bus.publish(BusNotification::Stopped);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    struct Panicking;
    impl Subscriber for Panicking {
        fn on_notification(&self, _notification: &BusNotification) {
            panic!("boom");
        }
    }

    #[test]
    fn panicking_subscriber_does_not_stop_later_subscribers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _panicker = bus.subscribe(Arc::new(Panicking));
        let _counter = bus.subscribe(Arc::new(Counter(Arc::clone(&count))));
        bus.publish(BusNotification::Started);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
