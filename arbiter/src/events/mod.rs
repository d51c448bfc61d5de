//! In-process typed pub/sub and the per-session JSONL event log.
//!
//! [`EventBus`] is best-effort observability: publish never blocks the
//! pipeline, a slow or failing handler never stalls other subscribers, and a
//! dropped event degrades visibility but never correctness. Wire types come
//! from the `agent-event` crate.
//!
//! Delivery model: one consumer task drains the unbounded publish queue and
//! forwards each event into the private queue of every subscription of that
//! type. Each subscription runs its own worker task, so events of one type
//! reach one subscriber in publish order while subscribers stay independent.

mod jsonl;

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

pub use agent_event::{Event, EventType};
pub use jsonl::JsonlEventLog;

/// Async event handler. Panics and errors stay inside the worker task.
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

struct Subscription {
    id: String,
    tx: mpsc::UnboundedSender<Event>,
}

/// Typed pub/sub bus with a bounded replay buffer.
pub struct EventBus {
    queue_tx: mpsc::UnboundedSender<Event>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    subscriptions: Arc<DashMap<EventType, Vec<Subscription>>>,
    ring: Arc<Mutex<std::collections::VecDeque<Event>>>,
    ring_capacity: usize,
    jsonl: Option<Arc<JsonlEventLog>>,
    consumer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl EventBus {
    /// Creates a bus with the default replay capacity (1000 events).
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Creates a bus with an explicit replay capacity.
    pub fn with_capacity(ring_capacity: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            queue_tx: tx,
            queue_rx: Mutex::new(Some(rx)),
            subscriptions: Arc::new(DashMap::new()),
            ring: Arc::new(Mutex::new(std::collections::VecDeque::new())),
            ring_capacity,
            jsonl: None,
            consumer: Mutex::new(None),
        }
    }

    /// Attaches a JSONL sink; every event is appended to the session's log file.
    pub fn with_jsonl_sink(mut self, sink: JsonlEventLog) -> Self {
        self.jsonl = Some(Arc::new(sink));
        self
    }

    /// Publishes an event. Fire-and-forget: an error here means the consumer
    /// is gone, which only costs observability.
    pub fn publish(&self, event: Event) {
        if self.queue_tx.send(event).is_err() {
            warn!("event bus consumer gone, event dropped");
        }
    }

    /// Subscribes a handler to one event type; returns the subscription id.
    ///
    /// Spawns the subscription's worker task, so a running runtime is
    /// required. Events already published are not replayed to new
    /// subscribers; use [`EventBus::recent`] for history.
    pub fn subscribe(&self, event_type: EventType, handler: EventHandler) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let worker_id = id.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let fut = handler(event);
                // One handler at a time per subscription keeps per-type order.
                if let Err(panic) = tokio::spawn(fut).await {
                    warn!(subscription = %worker_id, error = %panic, "event handler failed");
                }
            }
        });
        self.subscriptions
            .entry(event_type)
            .or_default()
            .push(Subscription { id: id.clone(), tx });
        debug!(event_type = event_type.as_str(), subscription = %id, "subscribed");
        id
    }

    /// Removes a subscription; its worker drains and exits.
    pub fn unsubscribe(&self, subscription_id: &str) {
        for mut entry in self.subscriptions.iter_mut() {
            entry.value_mut().retain(|s| s.id != subscription_id);
        }
    }

    /// Starts the consumer loop. Idempotent: a second call is a no-op.
    pub async fn start(&self) {
        let mut guard = self.consumer.lock().await;
        if guard.is_some() {
            warn!("event bus already running");
            return;
        }
        let Some(mut rx) = self.queue_rx.lock().await.take() else {
            return;
        };
        let subscriptions = Arc::clone(&self.subscriptions);
        let ring = Arc::clone(&self.ring);
        let capacity = self.ring_capacity;
        let jsonl = self.jsonl.clone();
        *guard = Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                {
                    let mut ring = ring.lock().await;
                    ring.push_back(event.clone());
                    while ring.len() > capacity {
                        ring.pop_front();
                    }
                }
                if let Some(sink) = &jsonl {
                    if let Err(e) = sink.append(&event).await {
                        warn!(error = %e, "event log append failed");
                    }
                }
                if let Some(subs) = subscriptions.get(&event.event_type) {
                    for sub in subs.iter() {
                        let _ = sub.tx.send(event.clone());
                    }
                }
            }
        }));
        debug!("event bus consumer started");
    }

    /// Stops the consumer loop; queued events are dropped.
    pub async fn stop(&self) {
        if let Some(handle) = self.consumer.lock().await.take() {
            handle.abort();
        }
    }

    /// Returns up to `limit` most recent events, optionally filtered by type.
    pub async fn recent(&self, event_type: Option<EventType>, limit: usize) -> Vec<Event> {
        let ring = self.ring.lock().await;
        let filtered: Vec<Event> = ring
            .iter()
            .filter(|e| event_type.map_or(true, |t| e.event_type == t))
            .cloned()
            .collect();
        let skip = filtered.len().saturating_sub(limit);
        filtered.into_iter().skip(skip).collect()
    }

    /// Number of active subscriptions across all types.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.iter().map(|e| e.value().len()).sum()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, timeout, Duration};

    fn counting_handler(counter: Arc<AtomicUsize>) -> EventHandler {
        Arc::new(move |_event| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    async fn wait_for(counter: &AtomicUsize, expected: usize) {
        timeout(Duration::from_secs(2), async {
            while counter.load(Ordering::SeqCst) < expected {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("handler count reached");
    }

    /// **Scenario**: a subscribed handler receives events of its type only.
    #[tokio::test]
    async fn subscriber_receives_matching_type() {
        let bus = EventBus::new();
        bus.start().await;
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventType::ToolCall, counting_handler(Arc::clone(&count)));

        bus.publish(Event::new(EventType::ToolCall, "worker", json!({})));
        bus.publish(Event::new(EventType::Metric, "system", json!({})));
        bus.publish(Event::new(EventType::ToolCall, "worker", json!({})));

        wait_for(&count, 2).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    /// **Scenario**: a panicking handler does not affect other subscribers.
    #[tokio::test]
    async fn panicking_handler_is_contained() {
        let bus = EventBus::new();
        bus.start().await;
        bus.subscribe(
            EventType::Error,
            Arc::new(|_| Box::pin(async { panic!("handler bug") })),
        );
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventType::Error, counting_handler(Arc::clone(&count)));

        bus.publish(Event::new(EventType::Error, "system", json!({})));
        wait_for(&count, 1).await;
    }

    /// **Scenario**: unsubscribe stops delivery; subscription_count drops.
    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        bus.start().await;
        let count = Arc::new(AtomicUsize::new(0));
        let id = bus.subscribe(EventType::Decision, counting_handler(Arc::clone(&count)));
        assert_eq!(bus.subscription_count(), 1);

        bus.publish(Event::new(EventType::Decision, "router", json!({})));
        wait_for(&count, 1).await;

        bus.unsubscribe(&id);
        assert_eq!(bus.subscription_count(), 0);
        bus.publish(Event::new(EventType::Decision, "router", json!({})));
        sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    /// **Scenario**: ring buffer keeps the last N events and supports a type
    /// filter.
    #[tokio::test]
    async fn ring_buffer_replay() {
        let bus = EventBus::with_capacity(3);
        bus.start().await;
        for i in 0..5 {
            bus.publish(Event::new(
                EventType::Metric,
                "system",
                json!({ "seq": i }),
            ));
        }
        sleep(Duration::from_millis(50)).await;

        let recent = bus.recent(Some(EventType::Metric), 10).await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].payload["seq"], 2);
        assert_eq!(recent[2].payload["seq"], 4);

        let limited = bus.recent(None, 1).await;
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].payload["seq"], 4);
    }
}
