use std::sync::Arc;
use std::time::Duration;

use market_aggregator::aggregator::hub::Topic;
use market_aggregator::aggregator::testkit::{self, ScriptedSource};
use market_aggregator::aggregator::{AggregatorConfig, AggregatorService};
use market_aggregator::logging;
use market_aggregator::upstream::{MarketSource, UpstreamQuote};
use tokio::sync::mpsc;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn started_service_ticks_both_pipelines_until_stopped() {
    logging::set_silent(true);
    let source = Arc::new(ScriptedSource::new());
    source.push_quotes([("bitcoin", UpstreamQuote::new(50_000.0))]);
    let service = testkit::service(Arc::clone(&source));

    let (tx, mut rx) = mpsc::unbounded_channel();
    for topic in [Topic::MarketUpdate, Topic::NewsUpdate] {
        let tx = tx.clone();
        service.subscribe(topic, move |update| {
            let _ = tx.send(update.topic());
            Ok(())
        });
    }

    service.start();
    service.start();
    assert!(service.is_running());

    let mut market_seen = false;
    let mut news_seen = false;
    while !(market_seen && news_seen) {
        let topic = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("pipeline tick within timeout")
            .expect("channel open");
        match topic {
            Topic::MarketUpdate => market_seen = true,
            Topic::NewsUpdate => news_seen = true,
        }
    }

    service.stop().await;
    assert!(!service.is_running());
    assert!(service.get_market_snapshot("BTC").is_some());
    assert!(!service.get_latest_news().is_empty());

    // nothing further is published once stopped
    tokio::time::sleep(Duration::from_millis(60)).await;
    while rx.try_recv().is_ok() {}
    let calls = source.calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(source.calls(), calls);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_is_idempotent_and_service_restarts() {
    logging::set_silent(true);
    let service = testkit::service(Arc::new(ScriptedSource::new()));

    service.stop().await;
    service.start();
    service.stop().await;
    service.stop().await;
    assert!(!service.is_running());

    service.start();
    assert!(service.is_running());
    tokio::time::sleep(Duration::from_millis(50)).await;
    service.stop().await;
    assert!(!service.get_latest_news().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refresh_now_triggers_an_extra_tick() {
    logging::set_silent(true);
    let source = Arc::new(ScriptedSource::new());
    let config = AggregatorConfig {
        market_interval: Duration::from_secs(3600),
        news_interval: Duration::from_secs(3600),
        enable_gateway: false,
        ..Default::default()
    };
    let service = Arc::new(AggregatorService::new(config, Arc::clone(&source) as Arc<dyn MarketSource>));

    service.start();
    // the first interval tick fires immediately
    tokio::time::timeout(Duration::from_secs(5), async {
        while source.calls() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("initial tick");

    service.refresh_now();
    tokio::time::timeout(Duration::from_secs(5), async {
        while source.calls() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("refresh market tick");

    tokio::time::timeout(Duration::from_secs(5), async {
        while service.get_latest_news().len() < 6 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("refresh news tick");

    service.stop().await;
}
