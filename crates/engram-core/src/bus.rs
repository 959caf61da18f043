//! Typed pub/sub over graph mutations. Bounded, non-blocking for the
//! emitter, per-subscriber isolation. Under pressure the oldest
//! non-critical event in a subscriber's buffer is shed; added/retracted
//! events are always kept.

use futures::future::BoxFuture;
use log::{error, warn};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::BusConfig;
use crate::types::{Edge, Node};

/// A mutation event carrying the affected record.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    NodeAdded(Node),
    NodeUpdated(Node),
    EdgeAdded(Edge),
    EdgeUpdated(Edge),
    EdgeArchived(Edge),
    EdgeRetracted(Edge),
}

impl GraphEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GraphEvent::NodeAdded(_) => EventKind::NodeAdded,
            GraphEvent::NodeUpdated(_) => EventKind::NodeUpdated,
            GraphEvent::EdgeAdded(_) => EventKind::EdgeAdded,
            GraphEvent::EdgeUpdated(_) => EventKind::EdgeUpdated,
            GraphEvent::EdgeArchived(_) => EventKind::EdgeArchived,
            GraphEvent::EdgeRetracted(_) => EventKind::EdgeRetracted,
        }
    }

    /// Critical events survive back-pressure shedding.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            GraphEvent::NodeAdded(_) | GraphEvent::EdgeAdded(_) | GraphEvent::EdgeRetracted(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NodeAdded,
    NodeUpdated,
    EdgeAdded,
    EdgeUpdated,
    EdgeArchived,
    EdgeRetracted,
}

impl EventKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "node_added" => Some(EventKind::NodeAdded),
            "node_updated" => Some(EventKind::NodeUpdated),
            "edge_added" => Some(EventKind::EdgeAdded),
            "edge_updated" => Some(EventKind::EdgeUpdated),
            "edge_archived" => Some(EventKind::EdgeArchived),
            "edge_retracted" => Some(EventKind::EdgeRetracted),
            _ => None,
        }
    }
}

/// Subscriber callback. Errors are caught and counted, never propagated
/// to the emitter.
pub type EventCallback =
    Arc<dyn Fn(GraphEvent) -> BoxFuture<'static, std::result::Result<(), String>> + Send + Sync>;

struct Subscriber {
    filter: Option<HashSet<EventKind>>,
    queue: Arc<Mutex<VecDeque<GraphEvent>>>,
    notify: Arc<Notify>,
    errors: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

/// The event bus. One dispatcher task per subscriber; emission never
/// blocks and never awaits.
pub struct EventBus {
    config: BusConfig,
    subscribers: RwLock<HashMap<String, Subscriber>>,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            subscribers: RwLock::new(HashMap::new()),
        })
    }

    /// Register a callback. Duplicate subscription is a no-op.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        filter: Option<Vec<EventKind>>,
        callback: EventCallback,
    ) {
        let name = name.into();
        let mut subscribers = self.subscribers.write().unwrap();
        if subscribers.contains_key(&name) {
            return;
        }

        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let notify = Arc::new(Notify::new());
        let errors = Arc::new(AtomicU64::new(0));
        let dropped = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(Self::dispatch_loop(
            name.clone(),
            queue.clone(),
            notify.clone(),
            errors.clone(),
            callback,
            Duration::from_secs(self.config.callback_soft_deadline_secs),
        ));

        subscribers.insert(
            name,
            Subscriber {
                filter: filter.map(|f| f.into_iter().collect()),
                queue,
                notify,
                errors,
                dropped,
                task,
            },
        );
    }

    /// Register a bounded channel subscriber (used by the SSE adapter).
    /// Events that do not fit are dropped for this subscriber only.
    pub fn subscribe_channel(
        &self,
        name: impl Into<String>,
        filter: Option<Vec<EventKind>>,
    ) -> tokio::sync::mpsc::Receiver<GraphEvent> {
        let (tx, rx) = tokio::sync::mpsc::channel(self.config.buffer_capacity);
        self.subscribe(
            name,
            filter,
            Arc::new(move |event| {
                let tx = tx.clone();
                Box::pin(async move {
                    tx.try_send(event).map_err(|e| e.to_string())
                })
            }),
        );
        rx
    }

    /// Unsubscribing a non-subscriber is a no-op.
    pub fn unsubscribe(&self, name: &str) {
        let mut subscribers = self.subscribers.write().unwrap();
        if let Some(sub) = subscribers.remove(name) {
            sub.task.abort();
        }
    }

    /// Fan an event out to every matching subscriber. Non-blocking.
    pub fn emit(&self, event: GraphEvent) {
        let subscribers = self.subscribers.read().unwrap();
        for (name, sub) in subscribers.iter() {
            if let Some(ref filter) = sub.filter {
                if !filter.contains(&event.kind()) {
                    continue;
                }
            }

            let mut queue = sub.queue.lock().unwrap();
            if queue.len() >= self.config.buffer_capacity {
                // Shed the oldest non-critical event to make room.
                if let Some(pos) = queue.iter().position(|e| !e.is_critical()) {
                    queue.remove(pos);
                    sub.dropped.fetch_add(1, Ordering::Relaxed);
                } else if !event.is_critical() {
                    sub.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!("event bus: subscriber '{}' saturated, dropping event", name);
                    continue;
                }
                // A buffer full of critical events grows past capacity
                // rather than losing a critical event.
            }
            queue.push_back(event.clone());
            drop(queue);
            sub.notify.notify_one();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }

    pub fn error_count(&self, name: &str) -> u64 {
        self.subscribers
            .read()
            .unwrap()
            .get(name)
            .map(|s| s.errors.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn dropped_count(&self, name: &str) -> u64 {
        self.subscribers
            .read()
            .unwrap()
            .get(name)
            .map(|s| s.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    async fn dispatch_loop(
        name: String,
        queue: Arc<Mutex<VecDeque<GraphEvent>>>,
        notify: Arc<Notify>,
        errors: Arc<AtomicU64>,
        callback: EventCallback,
        soft_deadline: Duration,
    ) {
        loop {
            let event = {
                let mut queue = queue.lock().unwrap();
                queue.pop_front()
            };

            let Some(event) = event else {
                notify.notified().await;
                continue;
            };

            let mut fut = callback(event);
            let result = tokio::select! {
                res = &mut fut => res,
                _ = tokio::time::sleep(soft_deadline) => {
                    // Warn but do not cancel.
                    warn!(
                        "event bus: subscriber '{}' callback exceeded {:?} soft deadline",
                        name, soft_deadline
                    );
                    fut.await
                }
            };

            if let Err(e) = result {
                errors.fetch_add(1, Ordering::Relaxed);
                error!("event bus: subscriber '{}' callback failed: {}", name, e);
            }
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        let subscribers = self.subscribers.write().unwrap();
        for sub in subscribers.values() {
            sub.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Node, NodeKind, PrivacyLevel};
    use std::sync::atomic::AtomicUsize;

    fn node_event() -> GraphEvent {
        GraphEvent::NodeAdded(Node::new(NodeKind::Person, "Lena", PrivacyLevel::L2Personal))
    }

    fn update_event() -> GraphEvent {
        GraphEvent::NodeUpdated(Node::new(NodeKind::Person, "Lena", PrivacyLevel::L2Personal))
    }

    #[tokio::test]
    async fn events_reach_subscriber_in_order() {
        let bus = EventBus::new(BusConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_cb = seen.clone();
        bus.subscribe(
            "test",
            None,
            Arc::new(move |event| {
                let seen = seen_cb.clone();
                Box::pin(async move {
                    seen.lock().unwrap().push(event.kind());
                    Ok(())
                })
            }),
        );

        bus.emit(node_event());
        bus.emit(update_event());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let seen = seen.lock().unwrap();
        assert_eq!(&*seen, &[EventKind::NodeAdded, EventKind::NodeUpdated]);
    }

    #[tokio::test]
    async fn filter_limits_delivery() {
        let bus = EventBus::new(BusConfig::default());
        let count = Arc::new(AtomicUsize::new(0));

        let count_cb = count.clone();
        bus.subscribe(
            "filtered",
            Some(vec![EventKind::NodeAdded]),
            Arc::new(move |_| {
                let count = count_cb.clone();
                Box::pin(async move {
                    count.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                })
            }),
        );

        bus.emit(node_event());
        bus.emit(update_event());
        bus.emit(node_event());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn callback_errors_are_counted_not_propagated() {
        let bus = EventBus::new(BusConfig::default());
        bus.subscribe(
            "flaky",
            None,
            Arc::new(|_| Box::pin(async { Err("boom".to_string()) })),
        );

        bus.emit(node_event());
        bus.emit(node_event());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(bus.error_count("flaky"), 2);
    }

    #[tokio::test]
    async fn duplicate_subscribe_and_unknown_unsubscribe_are_noops() {
        let bus = EventBus::new(BusConfig::default());
        bus.subscribe("dup", None, Arc::new(|_| Box::pin(async { Ok(()) })));
        bus.subscribe("dup", None, Arc::new(|_| Box::pin(async { Ok(()) })));
        assert_eq!(bus.subscriber_count(), 1);

        bus.unsubscribe("nobody");
        bus.unsubscribe("dup");
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn saturation_sheds_oldest_non_critical() {
        let config = BusConfig {
            buffer_capacity: 2,
            ..Default::default()
        };
        let bus = EventBus::new(config);
        // A callback that never completes, so the queue only fills.
        bus.subscribe(
            "slow",
            None,
            Arc::new(|_| {
                Box::pin(async {
                    futures::future::pending::<()>().await;
                    Ok(())
                })
            }),
        );

        // One event is immediately taken by the dispatcher; these fill
        // and overflow the buffer.
        bus.emit(update_event());
        bus.emit(update_event());
        bus.emit(update_event());
        bus.emit(node_event());
        bus.emit(node_event());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(bus.dropped_count("slow") >= 1);
    }
}
