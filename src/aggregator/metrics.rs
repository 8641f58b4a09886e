use std::{collections::HashMap, time::Duration};

use anyhow::Result;
use serde_json::{json, Map, Value};
use tokio::{
    sync::{mpsc, watch},
    time::{interval, MissedTickBehavior},
};

use crate::logging;

use super::hub::Topic;
use super::ShutdownSignal;

#[derive(Debug)]
pub enum MetricsEvent {
    MarketTick { symbols: usize },
    MarketFailure { kind: &'static str },
    NewsTick { generated: usize, cached: usize },
    SubscriberFailure { topic: Topic },
}

#[derive(Clone, Default)]
pub struct MetricsTx(Option<mpsc::UnboundedSender<MetricsEvent>>);

impl MetricsTx {
    pub fn report(&self, event: MetricsEvent) {
        if let Some(sender) = &self.0 {
            let _ = sender.send(event);
        }
    }

    pub fn noop() -> Self {
        Self(None)
    }
}

pub fn reporter(
    period: Duration,
    shutdown: watch::Receiver<ShutdownSignal>,
) -> (MetricsTx, impl std::future::Future<Output = Result<()>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MetricsTx(Some(tx)), process_events(period, rx, shutdown))
}

#[derive(Default)]
struct Window {
    market_ticks: usize,
    market_symbols: usize,
    market_failures: HashMap<&'static str, usize>,
    news_ticks: usize,
    news_generated: usize,
    news_cached: usize,
    subscriber_failures: HashMap<Topic, usize>,
}

impl Window {
    fn record(&mut self, event: MetricsEvent) {
        match event {
            MetricsEvent::MarketTick { symbols } => {
                self.market_ticks = self.market_ticks.saturating_add(1);
                self.market_symbols = self.market_symbols.saturating_add(symbols);
            }
            MetricsEvent::MarketFailure { kind } => {
                *self.market_failures.entry(kind).or_default() += 1;
            }
            MetricsEvent::NewsTick { generated, cached } => {
                self.news_ticks = self.news_ticks.saturating_add(1);
                self.news_generated = self.news_generated.saturating_add(generated);
                self.news_cached = cached;
            }
            MetricsEvent::SubscriberFailure { topic } => {
                *self.subscriber_failures.entry(topic).or_default() += 1;
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.market_ticks == 0
            && self.market_failures.is_empty()
            && self.news_ticks == 0
            && self.subscriber_failures.is_empty()
    }

    fn summary(&self) -> Value {
        let failures: Map<String, Value> = self
            .market_failures
            .iter()
            .map(|(kind, count)| (kind.to_string(), json!(count)))
            .collect();
        let subscriber_failures: Map<String, Value> = self
            .subscriber_failures
            .iter()
            .map(|(topic, count)| (topic.as_str().to_string(), json!(count)))
            .collect();

        json!({
            "market_ticks": self.market_ticks,
            "avg_symbols_per_tick": if self.market_ticks > 0 { self.market_symbols as f64 / self.market_ticks as f64 } else { 0.0 },
            "market_failures": Value::Object(failures),
            "news_ticks": self.news_ticks,
            "news_generated": self.news_generated,
            "news_cached": self.news_cached,
            "subscriber_failures": Value::Object(subscriber_failures),
        })
    }
}

async fn process_events(
    period: Duration,
    mut rx: mpsc::UnboundedReceiver<MetricsEvent>,
    mut shutdown: watch::Receiver<ShutdownSignal>,
) -> Result<()> {
    let mut window = Window::default();
    let mut reporter = interval(period);
    reporter.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            maybe_event = rx.recv() => {
                match maybe_event {
                    Some(event) => window.record(event),
                    None => break,
                }
            }
            _ = reporter.tick() => {
                if !window.is_empty() {
                    logging::info("metrics.pipeline", "pipeline activity summary", window.summary());
                }
                window = Window::default();
            }
            changed = shutdown.changed() => {
                if changed.is_err() || !matches!(*shutdown.borrow(), ShutdownSignal::None) {
                    break;
                }
            }
        }
    }

    logging::info_simple("metrics.stop", "Metrics reporter stopped");
    Ok(())
}
