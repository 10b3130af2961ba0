// =============================================================================
// Feed Ingestion — Binance USD-M futures websocket streams
// =============================================================================
//
// Two combined-stream connections per session: bookTicker frames keep the
// shared quote map fresh, aggTrade frames drive the symbol engines. A decode
// failure drops the offending frame with a warning; a transport failure
// returns to the caller, which reconnects with jittered exponential backoff.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio_tungstenite::connect_async;
use tracing::{info, warn};

use crate::util::json_f64;

/// Latest top-of-book for one symbol.
#[derive(Debug, Clone, Copy, Default)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

impl Quote {
    /// Mid price; `None` until both sides have printed.
    pub fn mid(&self) -> Option<f64> {
        if self.bid > 0.0 && self.ask > 0.0 {
            Some((self.bid + self.ask) / 2.0)
        } else {
            None
        }
    }

    /// Relative spread `(ask - bid) / mid`.
    pub fn spread(&self) -> Option<f64> {
        let mid = self.mid()?;
        Some((self.ask - self.bid) / mid)
    }
}

/// Shared quote map: written by the book-ticker task, read by the trade task.
pub type BookMap = Arc<RwLock<HashMap<String, Quote>>>;

/// One aggregated trade as consumed by the symbol engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub symbol: String,
    pub event_time_ms: i64,
    pub qty: f64,
}

/// Build the combined-stream URL for all symbols with the given stream suffix
/// (`bookTicker` or `aggTrade`).
pub fn combined_stream_url(base: &str, symbols: &[String], suffix: &str) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@{suffix}", s.to_lowercase()))
        .collect();
    format!("{base}/stream?streams={}", streams.join("/"))
}

/// Unwrap the combined-stream envelope; raw single-stream payloads pass
/// through unchanged.
fn payload(root: &serde_json::Value) -> &serde_json::Value {
    if root.get("data").is_some() {
        &root["data"]
    } else {
        root
    }
}

/// Parse a bookTicker frame: `{ "s": sym, "b": best_bid, "a": best_ask }`.
pub fn parse_book_ticker(text: &str) -> Result<(String, Quote)> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse bookTicker JSON")?;
    let data = payload(&root);

    let symbol = data["s"]
        .as_str()
        .context("missing field s")?
        .to_uppercase();
    let bid = json_f64(&data["b"], "b")?;
    let ask = json_f64(&data["a"], "a")?;

    Ok((symbol, Quote { bid, ask }))
}

/// Parse an aggTrade frame: `{ "s": sym, "T": event_time_ms, "q": qty }`.
pub fn parse_agg_trade(text: &str) -> Result<TradeEvent> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse aggTrade JSON")?;
    let data = payload(&root);

    let symbol = data["s"]
        .as_str()
        .context("missing field s")?
        .to_uppercase();
    let event_time_ms = data["T"].as_i64().context("missing field T")?;
    let qty = json_f64(&data["q"], "q")?;

    Ok(TradeEvent {
        symbol,
        event_time_ms,
        qty,
    })
}

/// Run one book-ticker session: connect, then update `books` until the stream
/// ends or errors. The caller owns reconnection.
pub async fn run_book_stream(base_url: &str, symbols: &[String], books: &BookMap) -> Result<()> {
    let url = combined_stream_url(base_url, symbols, "bookTicker");
    info!(streams = symbols.len(), "connecting to bookTicker stream");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to bookTicker stream")?;
    info!("bookTicker stream connected");

    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_book_ticker(&text) {
                        Ok((symbol, quote)) => {
                            books.write().insert(symbol, quote);
                        }
                        Err(e) => warn!(error = %e, "dropping unparseable bookTicker frame"),
                    }
                }
                // Ping/pong/binary frames are handled by tungstenite.
            }
            Some(Err(e)) => return Err(e).context("bookTicker read error"),
            None => {
                warn!("bookTicker stream ended");
                return Ok(());
            }
        }
    }
}

/// Run one aggTrade session, invoking `on_trade` per decoded event. All
/// engine work happens inside the callback on this task.
pub async fn run_trade_stream<F>(
    base_url: &str,
    symbols: &[String],
    mut on_trade: F,
) -> Result<()>
where
    F: FnMut(TradeEvent),
{
    let url = combined_stream_url(base_url, symbols, "aggTrade");
    info!(streams = symbols.len(), "connecting to aggTrade stream");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to aggTrade stream")?;
    info!("aggTrade stream connected");

    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_agg_trade(&text) {
                        Ok(event) => on_trade(event),
                        Err(e) => warn!(error = %e, "dropping unparseable aggTrade frame"),
                    }
                }
            }
            Some(Err(e)) => return Err(e).context("aggTrade read error"),
            None => {
                warn!("aggTrade stream ended");
                return Ok(());
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_contains_all_streams() {
        let url = combined_stream_url(
            "wss://fstream.binance.com",
            &["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            "aggTrade",
        );
        assert!(url.starts_with("wss://fstream.binance.com/stream?streams="));
        assert!(url.contains("btcusdt@aggTrade"));
        assert!(url.contains("ethusdt@aggTrade"));
    }

    #[test]
    fn parse_book_ticker_combined_envelope() {
        let json = r#"{
            "stream": "btcusdt@bookTicker",
            "data": { "e": "bookTicker", "s": "BTCUSDT", "b": "37000.10", "a": "37000.30" }
        }"#;
        let (symbol, quote) = parse_book_ticker(json).unwrap();
        assert_eq!(symbol, "BTCUSDT");
        assert_eq!(quote.bid, 37_000.10);
        assert_eq!(quote.ask, 37_000.30);
        assert!((quote.mid().unwrap() - 37_000.20).abs() < 1e-9);
    }

    #[test]
    fn parse_agg_trade_raw_payload() {
        let json = r#"{ "e": "aggTrade", "s": "solusdt", "T": 1700000000123, "q": "12.5", "p": "95.0", "m": false }"#;
        let ev = parse_agg_trade(json).unwrap();
        assert_eq!(ev.symbol, "SOLUSDT");
        assert_eq!(ev.event_time_ms, 1_700_000_000_123);
        assert_eq!(ev.qty, 12.5);
    }

    #[test]
    fn malformed_frames_error_instead_of_panicking() {
        assert!(parse_agg_trade("not json").is_err());
        assert!(parse_agg_trade(r#"{ "e": "aggTrade" }"#).is_err());
        assert!(parse_book_ticker(r#"{ "s": "BTCUSDT", "b": "x", "a": "1" }"#).is_err());
    }

    #[test]
    fn quote_mid_requires_both_sides() {
        assert!(Quote { bid: 0.0, ask: 10.0 }.mid().is_none());
        assert!(Quote { bid: 10.0, ask: 0.0 }.spread().is_none());
        let q = Quote { bid: 99.0, ask: 101.0 };
        assert_eq!(q.mid(), Some(100.0));
        assert!((q.spread().unwrap() - 0.02).abs() < 1e-12);
    }
}
