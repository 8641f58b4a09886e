use std::sync::Arc;
use std::time::Duration;

use httpmock::{Method::GET, MockServer};
use market_aggregator::aggregator::{AggregatorConfig, AggregatorService};
use market_aggregator::logging;
use market_aggregator::upstream::{FetchError, HttpMarketSource, MarketSource};
use serde_json::json;

fn service_for(server: &MockServer) -> AggregatorService {
    let config = AggregatorConfig {
        basket: vec!["bitcoin".to_string(), "ethereum".to_string()],
        upstream_url: server.base_url(),
        request_timeout: Duration::from_secs(2),
        enable_gateway: false,
        ..AggregatorConfig::default()
    };
    let source = HttpMarketSource::new(&config.upstream_url, config.request_timeout)
        .expect("valid mock url");
    AggregatorService::new(config, Arc::new(source))
}

#[tokio::test]
async fn batched_request_is_normalized_into_cache() {
    logging::set_silent(true);
    let server = MockServer::start();
    let mock = server
        .mock(|when, then| {
            when.method(GET)
                .path("/simple/price")
                .query_param("ids", "bitcoin,ethereum")
                .query_param("vs_currencies", "usd")
                .query_param("include_24hr_change", "true");
            then.status(200).json_body(json!({
                "bitcoin": {
                    "usd": 50000.0,
                    "usd_24h_change": 2.5,
                    "usd_market_cap": 980000000000.0,
                    "usd_24h_vol": 31000000000.0
                },
                "ethereum": { "usd": 3000.0 }
            }));
        });

    let service = service_for(&server);
    assert_eq!(service.market_tick().await.unwrap(), 2);
    mock.assert();

    let btc = service.get_market_snapshot("BTC").unwrap();
    assert_eq!(btc.price, 50_000.0);
    assert_eq!(btc.change_24h_percent, 2.5);
    assert_eq!(btc.market_cap, 980_000_000_000.0);

    let eth = service.get_market_snapshot("ETH").unwrap();
    assert_eq!(eth.change_24h_percent, 0.0);
    assert_eq!(eth.high_24h, 3_000.0);
}

#[tokio::test]
async fn server_error_leaves_cache_unchanged() {
    logging::set_silent(true);
    let server = MockServer::start();
    let mut ok = server
        .mock(|when, then| {
            when.method(GET).path("/simple/price");
            then.status(200).json_body(json!({ "bitcoin": { "usd": 50000.0 } }));
        });

    let service = service_for(&server);
    service.market_tick().await.unwrap();
    let before = service.get_market_snapshot("BTC");
    ok.delete();

    server
        .mock(|when, then| {
            when.method(GET).path("/simple/price");
            then.status(500).body("upstream down");
        });

    let err = service.market_tick().await.unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 500, .. }));
    assert_eq!(service.get_market_snapshot("BTC"), before);
}

#[tokio::test]
async fn coin_without_data_does_not_block_the_rest() {
    logging::set_silent(true);
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/simple/price");
        then.status(200).json_body(json!({
            "bitcoin": { "usd": 50000.0 },
            "ethereum": {}
        }));
    });

    let service = service_for(&server);
    assert_eq!(service.market_tick().await.unwrap(), 1);
    assert_eq!(service.get_market_snapshot("BTC").unwrap().price, 50_000.0);
    assert!(service.get_market_snapshot("ETH").is_none());
}

#[tokio::test]
async fn malformed_body_is_a_payload_error() {
    logging::set_silent(true);
    let server = MockServer::start();
    server
        .mock(|when, then| {
            when.method(GET).path("/simple/price");
            then.status(200).body("{\"bitcoin\": {\"usd\": \"lots\"}}");
        });

    let source = HttpMarketSource::new(&server.base_url(), Duration::from_secs(2)).unwrap();
    let err = source
        .fetch_quotes(&["bitcoin".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "payload");
}

#[tokio::test]
async fn unreachable_upstream_is_a_transport_error() {
    logging::set_silent(true);
    let source = HttpMarketSource::new("http://127.0.0.1:9/", Duration::from_millis(500)).unwrap();
    let err = source
        .fetch_quotes(&["bitcoin".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), "transport" | "timeout"));
}
