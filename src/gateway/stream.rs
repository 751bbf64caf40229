//! Authenticated streaming subscription reader task. Runs for the life of
//! the process: connects, subscribes to the union of known tickers,
//! reconnects with resubscription and a fresh book-cache reset on
//! disconnect (§7 "Stream disconnect").

use super::Event;
use crate::book_cache::{BookDelta, BookLevel, BookSnapshot};
use crate::inventory::PositionUpdate;
use crate::types::{Fill, Side};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub ws_url: String,
    pub key_id: String,
    pub tickers: Vec<String>,
}

/// Runs until the process shuts down; every observed event is forwarded on
/// `event_tx`. Reconnects indefinitely on disconnect, per §7.
pub async fn run(cfg: StreamConfig, event_tx: mpsc::Sender<Event>) {
    loop {
        if let Err(err) = connect_and_listen(&cfg, &event_tx).await {
            warn!(error = %err, "stream disconnected, reconnecting");
        }
        sleep(RECONNECT_BACKOFF).await;
    }
}

async fn connect_and_listen(cfg: &StreamConfig, event_tx: &mpsc::Sender<Event>) -> anyhow::Result<()> {
    let (ws_stream, _) = connect_async(&cfg.ws_url).await?;
    let (mut write, mut read) = ws_stream.split();

    let subscribe = json!({
        "id": 1,
        "cmd": "subscribe",
        "params": {
            "channels": ["orderbook_delta", "fill", "position"],
            "market_tickers": cfg.tickers,
        }
    });
    write.send(Message::Text(subscribe.to_string())).await?;
    info!(tickers = cfg.tickers.len(), "subscribed to market stream");

    while let Some(msg) = read.next().await {
        let msg = msg?;
        let Message::Text(text) = msg else { continue };
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            debug!(%text, "unparseable stream message");
            continue;
        };
        if let Some(event) = parse_event(&value) {
            if event_tx.send(event).await.is_err() {
                // Receiver gone: process is shutting down.
                return Ok(());
            }
        }
    }
    Err(anyhow::anyhow!("stream closed by peer"))
}

fn parse_event(value: &Value) -> Option<Event> {
    let msg_type = value.get("type")?.as_str()?;
    match msg_type {
        "orderbook_snapshot" => {
            let ticker = value.get("market_ticker")?.as_str()?.to_string();
            let (yes, no) = parse_levels(value);
            Some(Event::OrderbookSnapshot(crate::gateway::OrderbookSnapshot {
                ticker,
                yes,
                no,
            }))
        }
        "orderbook_delta" => {
            let ticker = value.get("market_ticker")?.as_str()?.to_string();
            let (yes, no) = parse_levels(value);
            Some(Event::OrderbookDelta(crate::gateway::OrderbookDelta {
                ticker,
                yes,
                no,
            }))
        }
        "fill" => parse_fill(value).map(Event::Fill),
        "position" => parse_position(value),
        other => {
            debug!(msg_type = other, "ignoring unrecognized stream message type");
            None
        }
    }
}

fn parse_levels(value: &Value) -> (Vec<super::Level>, Vec<super::Level>) {
    let side_levels = |side: &str| -> Vec<super::Level> {
        value
            .get(side)
            .and_then(Value::as_array)
            .map(|levels| {
                levels
                    .iter()
                    .filter_map(|l| {
                        let arr = l.as_array()?;
                        let price = arr.first()?.as_i64()?;
                        let qty = arr.get(1)?.as_i64()?;
                        Some(super::Level {
                            price: price.clamp(0, 99) as u8,
                            qty: qty.max(0) as u32,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    };
    (side_levels("yes"), side_levels("no"))
}

fn parse_fill(value: &Value) -> Option<Fill> {
    let side = match value.get("side")?.as_str()? {
        "yes" => Side::Yes,
        "no" => Side::No,
        _ => return None,
    };
    Some(Fill {
        fill_id: value.get("fill_id")?.as_str()?.to_string(),
        ticker: value.get("ticker")?.as_str()?.to_string(),
        side,
        action: value.get("action").and_then(Value::as_str).unwrap_or("buy").to_string(),
        price: value.get("price")?.as_i64()?.clamp(0, 99) as u8,
        count: value.get("count")?.as_i64()?.max(0) as u32,
        fee_cost: value.get("fee").and_then(Value::as_i64).unwrap_or(0),
        is_taker: value.get("is_taker").and_then(Value::as_bool).unwrap_or(false),
        created_time: value
            .get("created_time")
            .and_then(Value::as_str)
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now),
        match_id: None,
    })
}

fn parse_position(value: &Value) -> Option<Event> {
    let ticker = value.get("ticker")?.as_str()?.to_string();
    let get = |field: &str| value.get(field).and_then(Value::as_i64).unwrap_or(0);
    Some(Event::PositionUpdate {
        ticker,
        update: PositionUpdate {
            a_yes: get("a_yes"),
            a_no: get("a_no"),
            b_yes: get("b_yes"),
            b_no: get("b_no"),
        },
    })
}

/// Converts a gateway-level snapshot/delta into the shape `BookCache` stores.
/// Used by `World`'s event dispatch when applying stream events.
pub fn snapshot_into_cache(ticker: String, yes: Vec<super::Level>, no: Vec<super::Level>) -> BookSnapshot {
    BookSnapshot {
        ticker,
        yes: yes.into_iter().map(|l| BookLevel { price: l.price, qty: l.qty }).collect(),
        no: no.into_iter().map(|l| BookLevel { price: l.price, qty: l.qty }).collect(),
    }
}

pub fn delta_into_cache(ticker: String, yes: Vec<super::Level>, no: Vec<super::Level>) -> BookDelta {
    BookDelta {
        ticker,
        yes: yes.into_iter().map(|l| BookLevel { price: l.price, qty: l.qty }).collect(),
        no: no.into_iter().map(|l| BookLevel { price: l.price, qty: l.qty }).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_fill_message() {
        let value = json!({
            "type": "fill",
            "fill_id": "f1",
            "ticker": "T-A",
            "side": "yes",
            "price": 53,
            "count": 5,
            "fee": 2,
            "is_taker": false,
            "created_time": "2024-03-01T12:00:00Z",
        });
        let event = parse_event(&value).unwrap();
        match event {
            Event::Fill(fill) => {
                assert_eq!(fill.fill_id, "f1");
                assert_eq!(fill.price, 53);
                assert_eq!(fill.count, 5);
            }
            _ => panic!("expected Fill event"),
        }
    }

    #[test]
    fn parses_orderbook_delta() {
        let value = json!({
            "type": "orderbook_delta",
            "market_ticker": "T-A",
            "yes": [[52, 10]],
            "no": [[40, 3]],
        });
        let event = parse_event(&value).unwrap();
        assert!(matches!(event, Event::OrderbookDelta(_)));
    }

    #[test]
    fn ignores_unrecognized_message_type() {
        let value = json!({ "type": "heartbeat" });
        assert!(parse_event(&value).is_none());
    }
}
