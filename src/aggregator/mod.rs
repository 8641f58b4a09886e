pub mod gateway;
pub mod hub;
pub mod market;
pub mod metrics;
pub mod news;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::constants::{
    GATEWAY_PORT, MARKET_TICK_SECS, METRICS_REPORT_SECS, NEWS_BATCH_SIZE, NEWS_CAPACITY,
    NEWS_TICK_SECS, REQUEST_TIMEOUT_SECS, UPSTREAM_BASE_URL,
};
use crate::logging;
use crate::model::{MarketCache, MarketSnapshot, NewsArticle};
use crate::symbols::{default_basket, SymbolMap};
use crate::upstream::{FetchError, HttpMarketSource, MarketSource};

use hub::{Hub, SubscriptionId, Topic, Update};
use metrics::{MetricsEvent, MetricsTx};
use news::NewsSynthesizer;

#[derive(Clone, Debug)]
pub struct AggregatorConfig {
    pub basket: Vec<String>,
    pub market_interval: Duration,
    pub news_interval: Duration,
    pub news_batch_size: usize,
    pub news_capacity: usize,
    pub request_timeout: Duration,
    pub upstream_url: String,
    pub gateway_addr: SocketAddr,
    pub enable_gateway: bool,
    pub news_seed: Option<u64>,
    pub metrics_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            basket: default_basket(),
            market_interval: Duration::from_secs(MARKET_TICK_SECS),
            news_interval: Duration::from_secs(NEWS_TICK_SECS),
            news_batch_size: NEWS_BATCH_SIZE,
            news_capacity: NEWS_CAPACITY,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            upstream_url: UPSTREAM_BASE_URL.to_string(),
            gateway_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), GATEWAY_PORT),
            enable_gateway: true,
            news_seed: None,
            metrics_interval: Duration::from_secs(METRICS_REPORT_SECS),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownSignal {
    None,
    Graceful,
    Immediate,
}

/// Owns the market and news caches and the two pipelines that refresh them.
///
/// Readers go through the accessor methods or [`AggregatorService::subscribe`];
/// nothing outside the pipelines can write either cache.
pub struct AggregatorService {
    config: AggregatorConfig,
    source: Arc<dyn MarketSource>,
    symbols: SymbolMap,
    market: RwLock<Arc<MarketCache>>,
    news: RwLock<Arc<Vec<NewsArticle>>>,
    synthesizer: Mutex<NewsSynthesizer>,
    market_tick_lock: tokio::sync::Mutex<()>,
    hub: Hub,
    metrics: MetricsTx,
    shutdown: watch::Sender<ShutdownSignal>,
    refresh: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AggregatorService {
    pub fn new(config: AggregatorConfig, source: Arc<dyn MarketSource>) -> Self {
        Self::with_metrics(config, source, MetricsTx::noop())
    }

    pub fn with_metrics(
        config: AggregatorConfig,
        source: Arc<dyn MarketSource>,
        metrics: MetricsTx,
    ) -> Self {
        let (shutdown, _) = watch::channel(ShutdownSignal::None);
        let (refresh, _) = broadcast::channel(4);
        Self {
            synthesizer: Mutex::new(NewsSynthesizer::new(config.news_seed)),
            market_tick_lock: tokio::sync::Mutex::new(()),
            config,
            source,
            symbols: SymbolMap::default(),
            market: RwLock::new(Arc::new(MarketCache::new())),
            news: RwLock::new(Arc::new(Vec::new())),
            hub: Hub::new(metrics.clone()),
            metrics,
            shutdown,
            refresh,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /* ---------------- Read side ---------------- */

    pub fn get_market_snapshot(&self, symbol: &str) -> Option<MarketSnapshot> {
        read(&self.market).get(symbol).cloned()
    }

    /// Immutable view of the whole market cache as of the last successful tick.
    pub fn get_all_market_snapshots(&self) -> Arc<MarketCache> {
        Arc::clone(&read(&self.market))
    }

    /// Newest first, at most `news_capacity` items.
    pub fn get_latest_news(&self) -> Arc<Vec<NewsArticle>> {
        Arc::clone(&read(&self.news))
    }

    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> SubscriptionId
    where
        F: Fn(&Update) -> Result<()> + Send + Sync + 'static,
    {
        self.hub.subscribe(topic, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.hub.subscriber_count(topic)
    }

    /* ---------------- Market pipeline ---------------- */

    pub async fn market_tick(&self) -> Result<usize, FetchError> {
        self.market_tick_at(Utc::now()).await
    }

    /// One fetch-normalize-publish cycle. On failure the cache is left exactly
    /// as it was and nothing is published.
    ///
    /// Concurrent calls run one after another, so publishes follow cache writes
    /// in the same order.
    pub async fn market_tick_at(&self, now: DateTime<Utc>) -> Result<usize, FetchError> {
        let _serial = self.market_tick_lock.lock().await;
        let timeout = self.config.request_timeout;
        let fetched = match time::timeout(timeout, self.source.fetch_quotes(&self.config.basket)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(timeout)),
        };

        let snapshots = match fetched.and_then(|batch| market::normalize_quotes(batch, &self.symbols, now)) {
            Ok(snapshots) => snapshots,
            Err(err) => {
                logging::error(
                    "market.tick.failed",
                    "Market refresh failed, keeping last known snapshots",
                    json!({
                        "endpoint": self.source.endpoint(),
                        "kind": err.kind(),
                        "status": err.status(),
                        "error": err.to_string(),
                        "cached_symbols": read(&self.market).len(),
                    }),
                );
                self.metrics.report(MetricsEvent::MarketFailure { kind: err.kind() });
                return Err(err);
            }
        };

        let refreshed = snapshots.len();
        let updated = {
            let mut guard = write(&self.market);
            let next = Arc::new(market::apply_snapshots(&guard, snapshots));
            *guard = Arc::clone(&next);
            next
        };

        logging::debug(
            "market.tick",
            "Market snapshots refreshed",
            json!({ "refreshed": refreshed, "cached": updated.len() }),
        );
        self.metrics.report(MetricsEvent::MarketTick { symbols: refreshed });
        self.hub.publish(&Update::Market(updated));
        Ok(refreshed)
    }

    /* ---------------- News pipeline ---------------- */

    pub fn news_tick(&self) -> usize {
        self.news_tick_at(Utc::now())
    }

    /// Generate a batch, prepend it, enforce capacity, then publish.
    ///
    /// The synthesizer stays locked until the publish returns, so news
    /// subscribers must not call back into `news_tick`.
    pub fn news_tick_at(&self, now: DateTime<Utc>) -> usize {
        let mut synthesizer = lock(&self.synthesizer);
        let batch = synthesizer.generate_batch(self.config.news_batch_size, now);
        let generated = batch.len();

        let updated = {
            let mut guard = write(&self.news);
            let next = Arc::new(news::merge_newest_first(&guard, batch, self.config.news_capacity));
            *guard = Arc::clone(&next);
            next
        };

        logging::debug(
            "news.tick",
            "News batch generated",
            json!({ "generated": generated, "cached": updated.len() }),
        );
        self.metrics.report(MetricsEvent::NewsTick {
            generated,
            cached: updated.len(),
        });
        self.hub.publish(&Update::News(updated));
        drop(synthesizer);
        generated
    }

    /* ---------------- Lifecycle ---------------- */

    /// Spawn both pipeline loops. Calling it on a running service does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = lock(&self.tasks);
        if !tasks.is_empty() {
            logging::warn_simple("aggregator.start", "Aggregator already running");
            return;
        }

        self.shutdown.send_replace(ShutdownSignal::None);
        tasks.push(tokio::spawn(run_market_loop(
            Arc::clone(self),
            self.shutdown.subscribe(),
            self.refresh.subscribe(),
        )));
        tasks.push(tokio::spawn(run_news_loop(
            Arc::clone(self),
            self.shutdown.subscribe(),
            self.refresh.subscribe(),
        )));

        logging::info(
            "aggregator.start",
            "Market and news pipelines started",
            json!({
                "endpoint": self.source.endpoint(),
                "basket": self.config.basket.len(),
                "market_interval_ms": self.config.market_interval.as_millis() as u64,
                "news_interval_ms": self.config.news_interval.as_millis() as u64,
            }),
        );
    }

    /// Cancel both timers and wait for any in-flight tick to finish.
    pub async fn stop(&self) {
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        if tasks.is_empty() {
            return;
        }

        self.shutdown.send_replace(ShutdownSignal::Graceful);
        for task in tasks {
            let _ = task.await;
        }
        logging::info_simple("aggregator.stop", "Market and news pipelines stopped");
    }

    pub fn is_running(&self) -> bool {
        !lock(&self.tasks).is_empty()
    }

    /// Ask both running pipelines for an out-of-schedule tick.
    pub fn refresh_now(&self) {
        if self.refresh.send(()).is_err() {
            logging::warn_simple("aggregator.refresh", "Refresh requested but pipelines are not running");
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wait for the next scheduled tick, a refresh request, or shutdown.
/// Returns `false` when the loop should exit.
async fn next_tick(
    ticker: &mut time::Interval,
    shutdown: &mut watch::Receiver<ShutdownSignal>,
    refresh: &mut broadcast::Receiver<()>,
) -> bool {
    loop {
        tokio::select! {
            _ = ticker.tick() => return true,
            recv = refresh.recv() => {
                match recv {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => return true,
                    Err(broadcast::error::RecvError::Closed) => return false,
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return false;
                }
                match *shutdown.borrow() {
                    ShutdownSignal::None => continue,
                    _ => return false,
                }
            }
        }
    }
}

async fn run_market_loop(
    service: Arc<AggregatorService>,
    mut shutdown: watch::Receiver<ShutdownSignal>,
    mut refresh: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(service.config.market_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // A tick is awaited to completion before the timer is polled again, so two
    // market ticks never overlap; ticks missed meanwhile are skipped.
    while next_tick(&mut ticker, &mut shutdown, &mut refresh).await {
        let _ = service.market_tick().await;
    }

    logging::info_simple("market.stop", "Market pipeline stopped");
}

async fn run_news_loop(
    service: Arc<AggregatorService>,
    mut shutdown: watch::Receiver<ShutdownSignal>,
    mut refresh: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(service.config.news_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while next_tick(&mut ticker, &mut shutdown, &mut refresh).await {
        service.news_tick();
    }

    logging::info_simple("news.stop", "News pipeline stopped");
}

pub async fn run_with_config(config: AggregatorConfig) -> Result<()> {
    let source = HttpMarketSource::new(&config.upstream_url, config.request_timeout)
        .with_context(|| format!("invalid upstream url {:?}", config.upstream_url))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownSignal::None);
    let (metrics, metrics_future) = metrics::reporter(config.metrics_interval, shutdown_rx.clone());

    let service = Arc::new(AggregatorService::with_metrics(
        config.clone(),
        Arc::new(source),
        metrics,
    ));
    service.start();

    let signals_task = tokio::spawn(handle_signals(shutdown_tx.clone(), Arc::clone(&service)));

    let run_result = tokio::try_join!(
        run_gateway(&config, Arc::clone(&service), shutdown_rx.clone()),
        metrics_future
    );

    // a gateway failure must still bring the pipelines down
    let _ = shutdown_tx.send(ShutdownSignal::Graceful);
    service.stop().await;
    signals_task.abort();
    let _ = signals_task.await;

    run_result?;
    Ok(())
}

async fn run_gateway(
    config: &AggregatorConfig,
    service: Arc<AggregatorService>,
    shutdown: watch::Receiver<ShutdownSignal>,
) -> Result<()> {
    if !config.enable_gateway {
        wait_for_shutdown(shutdown).await;
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(config.gateway_addr)
        .await
        .with_context(|| format!("failed to bind gateway at {}", config.gateway_addr))?;
    gateway::serve(listener, service, shutdown).await
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<ShutdownSignal>) {
    while shutdown.changed().await.is_ok() {
        if !matches!(*shutdown.borrow(), ShutdownSignal::None) {
            break;
        }
    }
}

async fn handle_signals(
    shutdown_tx: watch::Sender<ShutdownSignal>,
    service: Arc<AggregatorService>,
) -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("failed to register SIGHUP handler")?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                logging::info(
                    "signal.received",
                    "SIGTERM received, initiating graceful shutdown",
                    json!({ "signal": "SIGTERM" })
                );
                let _ = shutdown_tx.send(ShutdownSignal::Graceful);
                break;
            }
            _ = sigint.recv() => {
                logging::warn(
                    "signal.received",
                    "SIGINT received, shutting down",
                    json!({ "signal": "SIGINT" })
                );
                let _ = shutdown_tx.send(ShutdownSignal::Immediate);
                break;
            }
            _ = sighup.recv() => {
                logging::info(
                    "signal.received",
                    "SIGHUP received, refreshing market and news now",
                    json!({ "signal": "SIGHUP" })
                );
                service.refresh_now();
            }
        }
    }

    Ok(())
}

pub mod testkit {
    //! In-memory upstream for driving the service without a network.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::upstream::{QuoteBatch, UpstreamQuote};

    /// One scripted upstream reply.
    pub enum Reply {
        Quotes(QuoteBatch),
        Fail(FetchError),
        /// Sleep before answering, to exercise the per-request timeout.
        Delayed(Duration, QuoteBatch),
    }

    /// Replays queued replies in order; an empty queue answers with an empty batch.
    #[derive(Default)]
    pub struct ScriptedSource {
        replies: Mutex<VecDeque<Reply>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, reply: Reply) -> &Self {
            lock(&self.replies).push_back(reply);
            self
        }

        pub fn push_quotes<I, S>(&self, quotes: I) -> &Self
        where
            I: IntoIterator<Item = (S, UpstreamQuote)>,
            S: Into<String>,
        {
            let batch = quotes
                .into_iter()
                .map(|(id, quote)| (id.into(), quote))
                .collect();
            self.push(Reply::Quotes(batch))
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MarketSource for ScriptedSource {
        fn endpoint(&self) -> String {
            "scripted://quotes".to_string()
        }

        async fn fetch_quotes(&self, _ids: &[String]) -> Result<QuoteBatch, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = lock(&self.replies).pop_front();
            match reply {
                Some(Reply::Quotes(batch)) => Ok(batch),
                Some(Reply::Fail(err)) => Err(err),
                Some(Reply::Delayed(delay, batch)) => {
                    time::sleep(delay).await;
                    Ok(batch)
                }
                None => Ok(QuoteBatch::new()),
            }
        }
    }

    /// Service over a scripted source with fast timers and a seeded news feed.
    pub fn service(source: Arc<ScriptedSource>) -> Arc<AggregatorService> {
        let config = AggregatorConfig {
            market_interval: Duration::from_millis(20),
            news_interval: Duration::from_millis(20),
            request_timeout: Duration::from_millis(200),
            enable_gateway: false,
            news_seed: Some(0xBADF00D),
            ..AggregatorConfig::default()
        };
        Arc::new(AggregatorService::new(config, source))
    }
}
