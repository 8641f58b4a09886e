use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};

use crate::constants::GATEWAY_CHANNEL_CAPACITY;
use crate::logging;
use crate::model::{MarketCache, MarketSnapshot, NewsArticle, NewsItemView};

use super::hub::{SubscriptionId, Topic, Update};
use super::{AggregatorService, ShutdownSignal};

/// One WebSocket frame: `{"topic": "marketUpdate", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "data", rename_all = "camelCase")]
pub enum UpdateFrame {
    MarketUpdate(BTreeMap<String, MarketSnapshot>),
    NewsUpdate(Vec<NewsItemView>),
}

impl UpdateFrame {
    pub fn from_update(update: &Update, now: DateTime<Utc>) -> Self {
        match update {
            Update::Market(cache) => UpdateFrame::MarketUpdate(sorted_market(cache)),
            Update::News(articles) => UpdateFrame::NewsUpdate(news_views(articles, now)),
        }
    }
}

fn sorted_market(cache: &MarketCache) -> BTreeMap<String, MarketSnapshot> {
    cache
        .iter()
        .map(|(symbol, snapshot)| (symbol.clone(), snapshot.clone()))
        .collect()
}

fn news_views(articles: &[NewsArticle], now: DateTime<Utc>) -> Vec<NewsItemView> {
    articles.iter().map(|article| article.view(now)).collect()
}

#[derive(Clone)]
struct GatewayState {
    service: Arc<AggregatorService>,
    frames: broadcast::Sender<String>,
    shutdown: watch::Receiver<ShutdownSignal>,
}

/// Hub subscriptions that turn every published update into a serialized frame.
struct UpdateBridge {
    subscriptions: Vec<SubscriptionId>,
}

impl UpdateBridge {
    fn install(service: &AggregatorService, frames: broadcast::Sender<String>) -> Self {
        let subscriptions = [Topic::MarketUpdate, Topic::NewsUpdate]
            .into_iter()
            .map(|topic| {
                let frames = frames.clone();
                service.subscribe(topic, move |update| {
                    let payload = serde_json::to_string(&UpdateFrame::from_update(update, Utc::now()))
                        .context("serialize update frame")?;
                    // no connected clients is fine
                    let _ = frames.send(payload);
                    Ok(())
                })
            })
            .collect();
        Self { subscriptions }
    }

    fn remove(self, service: &AggregatorService) {
        for id in self.subscriptions {
            service.unsubscribe(id);
        }
    }
}

pub fn router(
    service: Arc<AggregatorService>,
    frames: broadcast::Sender<String>,
    shutdown: watch::Receiver<ShutdownSignal>,
) -> Router {
    Router::new()
        .route("/api/market", get(all_markets))
        .route("/api/market/:symbol", get(one_market))
        .route("/api/news", get(latest_news))
        .route("/api/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .with_state(GatewayState {
            service,
            frames,
            shutdown,
        })
}

/// Serve the read-only API on `listener` until `shutdown` leaves `None`.
pub async fn serve(
    listener: TcpListener,
    service: Arc<AggregatorService>,
    mut shutdown: watch::Receiver<ShutdownSignal>,
) -> Result<()> {
    let addr = listener.local_addr().context("gateway listener has no local address")?;
    let (frames, _) = broadcast::channel::<String>(GATEWAY_CHANNEL_CAPACITY);
    let bridge = UpdateBridge::install(&service, frames.clone());

    logging::info(
        "gateway.bind",
        "Gateway listening for readers",
        json!({ "addr": addr.to_string() }),
    );

    let app = router(Arc::clone(&service), frames, shutdown.clone());
    let shutdown_signal = async move {
        while shutdown.changed().await.is_ok() {
            if !matches!(*shutdown.borrow(), ShutdownSignal::None) {
                break;
            }
        }
    };

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("gateway server terminated with error");

    bridge.remove(&service);
    logging::info_simple("gateway.server.stop", "Gateway server stopped");
    served
}

async fn all_markets(State(state): State<GatewayState>) -> Json<BTreeMap<String, MarketSnapshot>> {
    Json(sorted_market(&state.service.get_all_market_snapshots()))
}

async fn one_market(
    State(state): State<GatewayState>,
    Path(symbol): Path<String>,
) -> Result<Json<MarketSnapshot>, (StatusCode, Json<Value>)> {
    let symbol = symbol.to_uppercase();
    state
        .service
        .get_market_snapshot(&symbol)
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("no market data for {symbol}") })),
            )
        })
}

async fn latest_news(State(state): State<GatewayState>) -> Json<Vec<NewsItemView>> {
    Json(news_views(&state.service.get_latest_news(), Utc::now()))
}

async fn health(State(state): State<GatewayState>) -> Json<Value> {
    let market = state.service.get_all_market_snapshots();
    let last_market_update = market.values().map(|snapshot| snapshot.last_updated).max();
    Json(json!({
        "status": "ok",
        "running": state.service.is_running(),
        "symbols": market.len(),
        "news": state.service.get_latest_news().len(),
        "lastMarketUpdate": last_market_update,
    }))
}

async fn websocket_upgrade(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Response {
    ws.on_upgrade(move |socket| async move {
        if let Err(err) = forward_updates_to_client(socket, state).await {
            logging::warn(
                "gateway.client_error",
                "Gateway websocket client ended with error",
                json!({ "error": format!("{err:?}") }),
            );
        }
    })
}

async fn forward_updates_to_client(socket: WebSocket, state: GatewayState) -> Result<()> {
    logging::info_simple("gateway.client.connected", "Gateway websocket client connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut receiver = state.frames.subscribe();
    let mut shutdown = state.shutdown.clone();

    // current state first, so a new reader does not wait a full interval
    let now = Utc::now();
    let greeting = [
        UpdateFrame::MarketUpdate(sorted_market(&state.service.get_all_market_snapshots())),
        UpdateFrame::NewsUpdate(news_views(&state.service.get_latest_news(), now)),
    ];
    for frame in greeting {
        let payload = serde_json::to_string(&frame).context("serialize greeting frame")?;
        ws_sender.send(Message::Text(payload)).await?;
    }

    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            recv = receiver.recv() => {
                match recv {
                    Ok(payload) => {
                        if ws_sender.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        logging::warn(
                            "gateway.client.lagged",
                            "Websocket client lagged gateway frames",
                            json!({ "skipped": skipped }),
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || !matches!(*shutdown.borrow(), ShutdownSignal::None) {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
            _ = &mut reader => break,
        }
    }

    reader.abort();
    logging::info_simple("gateway.client.disconnected", "Gateway websocket client disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn market_frame_is_tagged_and_sorted() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut cache = MarketCache::new();
        for (symbol, price) in [("ETH", 3_000.0), ("BTC", 50_000.0)] {
            cache.insert(
                symbol.to_string(),
                MarketSnapshot {
                    symbol: symbol.to_string(),
                    display_name: symbol.to_string(),
                    price,
                    change_24h_percent: 0.0,
                    market_cap: 0.0,
                    volume_24h: 0.0,
                    high_24h: price,
                    low_24h: price,
                    last_updated: at,
                },
            );
        }

        let frame = UpdateFrame::from_update(&Update::Market(Arc::new(cache)), at);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["topic"], "marketUpdate");
        let keys: Vec<&String> = json["data"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["BTC", "ETH"]);

        let decoded: UpdateFrame = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn news_frame_uses_relative_timestamps() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut synth = super::super::news::NewsSynthesizer::new(Some(9));
        let articles = synth.generate_batch(2, at);

        let frame = UpdateFrame::from_update(
            &Update::News(Arc::new(articles)),
            at + chrono::Duration::hours(3),
        );
        match frame {
            UpdateFrame::NewsUpdate(items) => {
                assert_eq!(items.len(), 2);
                assert!(items.iter().all(|item| item.timestamp == "3h ago"));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
