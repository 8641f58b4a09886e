use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::logging;
use crate::model::{MarketCache, NewsArticle};

use super::metrics::{MetricsEvent, MetricsTx};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Topic {
    MarketUpdate,
    NewsUpdate,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::MarketUpdate => "marketUpdate",
            Topic::NewsUpdate => "newsUpdate",
        }
    }
}

/// Payload of one publish: the full cache after the tick, shared read-only.
#[derive(Debug, Clone)]
pub enum Update {
    Market(Arc<MarketCache>),
    News(Arc<Vec<NewsArticle>>),
}

impl Update {
    pub fn topic(&self) -> Topic {
        match self {
            Update::Market(_) => Topic::MarketUpdate,
            Update::News(_) => Topic::NewsUpdate,
        }
    }
}

/// Handle returned by [`Hub::subscribe`]; pass it to [`Hub::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    topic: Topic,
    id: u64,
}

impl SubscriptionId {
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

type Callback = Arc<dyn Fn(&Update) -> Result<()> + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    callback: Callback,
}

/// Topic-keyed callback registry.
///
/// Callbacks run synchronously in registration order on the publishing task.
/// The registry lock is never held while a callback runs, so callbacks may
/// subscribe or unsubscribe freely; such changes apply from the next publish.
pub struct Hub {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
    metrics: MetricsTx,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(MetricsTx::noop())
    }
}

impl Hub {
    pub fn new(metrics: MetricsTx) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
            metrics,
        }
    }

    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> SubscriptionId
    where
        F: Fn(&Update) -> Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId {
            topic,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        self.lock().push(Subscriber {
            id,
            callback: Arc::new(callback),
        });
        id
    }

    /// Returns `false` if the handle was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.lock()
            .iter()
            .filter(|subscriber| subscriber.id.topic == topic)
            .count()
    }

    /// Deliver `update` to every subscriber of its topic. Returns how many
    /// callbacks completed without error.
    pub(crate) fn publish(&self, update: &Update) -> usize {
        let topic = update.topic();
        let targets: Vec<(SubscriptionId, Callback)> = self
            .lock()
            .iter()
            .filter(|subscriber| subscriber.id.topic == topic)
            .map(|subscriber| (subscriber.id, Arc::clone(&subscriber.callback)))
            .collect();

        let mut delivered = 0;
        for (id, callback) in targets {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(update)));
            let failure = match outcome {
                Ok(Ok(())) => {
                    delivered += 1;
                    continue;
                }
                Ok(Err(err)) => format!("{err:#}"),
                Err(payload) => panic_message(payload.as_ref()),
            };

            logging::error(
                "hub.subscriber_failed",
                "Subscriber callback failed, continuing fan-out",
                json!({ "topic": topic.as_str(), "subscription": id.id, "error": failure }),
            );
            self.metrics.report(MetricsEvent::SubscriberFailure { topic });
        }
        delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic: <non-string payload>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::bail;

    use super::*;

    fn market_update() -> Update {
        Update::Market(Arc::new(MarketCache::new()))
    }

    #[test]
    fn callbacks_run_in_registration_order_per_topic() {
        let hub = Arc::new(Hub::default());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second"] {
            let seen = Arc::clone(&seen);
            hub.subscribe(Topic::MarketUpdate, move |_| {
                seen.lock().unwrap().push(label);
                Ok(())
            });
        }
        let news_seen = Arc::clone(&seen);
        hub.subscribe(Topic::NewsUpdate, move |_| {
            news_seen.lock().unwrap().push("news");
            Ok(())
        });

        assert_eq!(hub.publish(&market_update()), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn failing_subscriber_does_not_block_others() {
        let hub = Hub::default();
        let received = Arc::new(Mutex::new(None));

        hub.subscribe(Topic::MarketUpdate, |_| bail!("consumer exploded"));
        let sink = Arc::clone(&received);
        hub.subscribe(Topic::MarketUpdate, move |update| {
            *sink.lock().unwrap() = Some(update.clone());
            Ok(())
        });

        let cache = Arc::new(MarketCache::new());
        let update = Update::Market(Arc::clone(&cache));
        assert_eq!(hub.publish(&update), 1);

        match received.lock().unwrap().take() {
            Some(Update::Market(payload)) => assert!(Arc::ptr_eq(&payload, &cache)),
            other => panic!("second subscriber not invoked with market payload: {other:?}"),
        };
    }

    #[test]
    fn panicking_subscriber_is_contained() {
        let hub = Hub::default();
        let hits = Arc::new(AtomicU64::new(0));

        hub.subscribe(Topic::NewsUpdate, |_| panic!("boom"));
        let counter = Arc::clone(&hits);
        hub.subscribe(Topic::NewsUpdate, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let delivered = hub.publish(&Update::News(Arc::new(Vec::new())));
        assert_eq!(delivered, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribe_and_unsubscribe_from_inside_a_callback() {
        let hub = Arc::new(Hub::default());
        let late_hits = Arc::new(AtomicU64::new(0));
        let own_id: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let hub_in_cb = Arc::clone(&hub);
        let own = Arc::clone(&own_id);
        let late = Arc::clone(&late_hits);
        let id = hub.subscribe(Topic::MarketUpdate, move |_| {
            if let Some(id) = own.lock().unwrap().take() {
                hub_in_cb.unsubscribe(id);
                let late = Arc::clone(&late);
                hub_in_cb.subscribe(Topic::MarketUpdate, move |_| {
                    late.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
            }
            Ok(())
        });
        *own_id.lock().unwrap() = Some(id);

        assert_eq!(hub.publish(&market_update()), 1);
        assert_eq!(late_hits.load(Ordering::SeqCst), 0, "new subscriber waits for next publish");
        assert_eq!(hub.subscriber_count(Topic::MarketUpdate), 1);

        hub.publish(&market_update());
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let hub = Hub::default();
        let id = hub.subscribe(Topic::NewsUpdate, |_| Ok(()));
        assert_eq!(id.topic(), Topic::NewsUpdate);
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        assert_eq!(hub.publish(&Update::News(Arc::new(Vec::new()))), 0);
    }
}
